//! Multicasting: one upstream execution, many attachments.
//!
//! Two entry points share the same fan-out hub:
//!
//! - [`Source::share`] turns a cold source into a hot, reference-counted one.
//!   The first attachment connects the upstream once; later attachments join
//!   the execution already in flight.
//! - [`Publisher`] is a stateful emitter. The owner pushes values; consumers
//!   only ever see the read-only [`Source`] returned by
//!   [`Publisher::source`], which replays the current value on attach.

use super::{Attachment, Emission, Source, Teardown};
use crate::error::{Result, StoreError};
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::trace;

/// How a shared source treats late attachments and upstream termination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SharePolicy {
    /// Deliver the most recent value to every new attachment, at any time.
    pub replay: bool,

    /// After an upstream error, the next attachment starts a fresh upstream
    /// execution instead of receiving the cached error.
    pub reset_on_error: bool,

    /// Disconnect the upstream when the last attachment goes away; the next
    /// attachment reconnects.
    pub reset_on_refcount_zero: bool,
}

impl SharePolicy {
    /// Plain multicast: no replay, late attachments after completion only
    /// see completion.
    pub fn multicast() -> Self {
        Self {
            replay: false,
            reset_on_error: true,
            reset_on_refcount_zero: true,
        }
    }

    /// Replay the latest value; keep the upstream connected with no
    /// attachments; start over after an error.
    pub fn replay() -> Self {
        Self {
            replay: true,
            reset_on_error: true,
            reset_on_refcount_zero: false,
        }
    }

    /// Replay the latest value and the terminal signal, errors included.
    pub fn replay_forever() -> Self {
        Self {
            replay: true,
            reset_on_error: false,
            reset_on_refcount_zero: false,
        }
    }
}

impl Default for SharePolicy {
    fn default() -> Self {
        Self::replay()
    }
}

/// Fan-out to the current set of attachments.
struct Hub<T> {
    subscribers: HashMap<u64, UnboundedSender<Emission<T>>>,
    next_id: u64,
}

impl<T: Clone> Hub<T> {
    fn new() -> Self {
        Self {
            subscribers: HashMap::new(),
            next_id: 1,
        }
    }

    /// Register a subscriber, queueing `replay` for it first.
    fn add(&mut self, replay: Option<T>) -> (u64, UnboundedReceiver<Emission<T>>) {
        let (sender, receiver) = mpsc::unbounded();
        if let Some(value) = replay {
            let _ = sender.unbounded_send(Emission::Next(value));
        }
        let id = self.next_id;
        self.next_id += 1;
        self.subscribers.insert(id, sender);
        (id, receiver)
    }

    fn remove(&mut self, id: u64) {
        self.subscribers.remove(&id);
    }

    fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Deliver to everyone, dropping subscribers whose receivers are gone.
    /// A terminal emission also clears the hub.
    fn emit(&mut self, emission: Emission<T>) {
        let terminal = emission.is_terminal();
        self.subscribers
            .retain(|_, sender| sender.unbounded_send(emission.clone()).is_ok());
        if terminal {
            self.subscribers.clear();
        }
    }
}

enum Phase {
    Idle,
    Running { driver: JoinHandle<()> },
    Completed,
    Failed(StoreError),
}

struct Shared<T> {
    upstream: Source<T>,
    policy: SharePolicy,
    hub: Hub<T>,
    latest: Option<T>,
    phase: Phase,
    /// Bumped on every connect and disconnect so a stale driver can tell it
    /// no longer owns the hub.
    generation: u64,
}

impl<T: Clone + Send + Sync + 'static> Shared<T> {
    fn attach(this: &Arc<Mutex<Self>>) -> Attachment<T> {
        let mut state = this.lock();

        let terminal = match &state.phase {
            Phase::Completed => Some(Emission::Complete),
            Phase::Failed(error) if !state.policy.reset_on_error => {
                Some(Emission::Error(error.clone()))
            }
            _ => None,
        };
        if let Some(terminal) = terminal {
            return state.closed_attachment(terminal);
        }
        if matches!(state.phase, Phase::Failed(_)) {
            state.phase = Phase::Idle;
        }

        let replay = if state.policy.replay {
            state.latest.clone()
        } else {
            None
        };
        let (id, receiver) = state.hub.add(replay);

        if matches!(state.phase, Phase::Idle) {
            state.connect(Arc::downgrade(this));
        }
        drop(state);

        let shared = Arc::clone(this);
        Attachment::from_receiver(receiver, Teardown::new(move || shared.lock().detach(id)))
    }

    fn closed_attachment(&self, terminal: Emission<T>) -> Attachment<T> {
        let mut emissions = Vec::with_capacity(2);
        if self.policy.replay {
            if let Some(value) = &self.latest {
                emissions.push(Emission::Next(value.clone()));
            }
        }
        emissions.push(terminal);
        Attachment::from_emissions(emissions)
    }

    /// Attach the upstream once and pump its emissions into the hub.
    fn connect(&mut self, this: Weak<Mutex<Self>>) {
        self.generation += 1;
        let generation = self.generation;
        let mut upstream = self.upstream.attach();
        trace!(generation, "shared source connecting upstream");

        let driver = tokio::spawn(async move {
            loop {
                let emission = upstream.next_emission().await;
                let Some(shared) = this.upgrade() else {
                    return;
                };
                let terminal = emission.is_terminal();
                {
                    let mut state = shared.lock();
                    if state.generation != generation {
                        return;
                    }
                    state.deliver(emission);
                }
                if terminal {
                    return;
                }
            }
        });
        self.phase = Phase::Running { driver };
    }

    fn deliver(&mut self, emission: Emission<T>) {
        match &emission {
            Emission::Next(value) => self.latest = Some(value.clone()),
            Emission::Error(error) => self.phase = Phase::Failed(error.clone()),
            Emission::Complete => self.phase = Phase::Completed,
        }
        self.hub.emit(emission);
    }

    fn detach(&mut self, id: u64) {
        self.hub.remove(id);
        if self.hub.len() > 0 || !self.policy.reset_on_refcount_zero {
            return;
        }
        if matches!(self.phase, Phase::Running { .. }) {
            if let Phase::Running { driver } = std::mem::replace(&mut self.phase, Phase::Idle) {
                trace!(generation = self.generation, "last attachment gone, disconnecting upstream");
                driver.abort();
                self.generation += 1;
            }
        }
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        if let Phase::Running { driver } = &self.phase {
            driver.abort();
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Source<T> {
    /// Multicast this source according to `policy`.
    ///
    /// At most one upstream execution is in flight at any time, however many
    /// attachments exist. Cancelling one attachment does not affect the
    /// others.
    pub fn share(&self, policy: SharePolicy) -> Source<T> {
        let shared = Arc::new(Mutex::new(Shared {
            upstream: self.clone(),
            policy,
            hub: Hub::new(),
            latest: None,
            phase: Phase::Idle,
            generation: 0,
        }));
        Source::new(move || Shared::attach(&shared))
    }

    /// Shorthand for `share(SharePolicy::replay())`.
    pub fn share_replay(&self) -> Source<T> {
        self.share(SharePolicy::replay())
    }
}

struct Cell<T> {
    current: T,
    hub: Hub<T>,
    closed: bool,
}

impl<T: Clone + Send + Sync + 'static> Cell<T> {
    fn attach(this: &Arc<Mutex<Self>>) -> Attachment<T> {
        let mut cell = this.lock();
        let current = cell.current.clone();
        if cell.closed {
            return Attachment::from_emissions(vec![Emission::Next(current), Emission::Complete]);
        }
        let (id, receiver) = cell.hub.add(Some(current));
        drop(cell);

        let cell = Arc::clone(this);
        Attachment::from_receiver(receiver, Teardown::new(move || cell.lock().hub.remove(id)))
    }
}

/// Write side of a stateful, replaying emitter.
///
/// The publisher is the only way to change the value; it is deliberately not
/// `Clone`. Consumers get a read-only [`Source`] from [`source`](Self::source)
/// that delivers the current value to every new attachment immediately.
/// Dropping the publisher completes all attachments.
pub struct Publisher<T> {
    cell: Arc<Mutex<Cell<T>>>,
}

impl<T: Clone + Send + Sync + 'static> Publisher<T> {
    pub fn new(initial: T) -> Self {
        Self {
            cell: Arc::new(Mutex::new(Cell {
                current: initial,
                hub: Hub::new(),
                closed: false,
            })),
        }
    }

    /// Replace the current value and push it to every attachment.
    pub fn publish(&self, value: T) {
        let mut cell = self.cell.lock();
        cell.current = value.clone();
        cell.hub.emit(Emission::Next(value));
    }

    /// Derive the next value from the current one and publish it atomically.
    ///
    /// If `f` fails nothing is published.
    pub fn modify<F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&T) -> Result<T>,
    {
        let mut cell = self.cell.lock();
        let next = f(&cell.current)?;
        cell.current = next.clone();
        cell.hub.emit(Emission::Next(next.clone()));
        Ok(next)
    }

    /// Current value.
    pub fn value(&self) -> T {
        self.cell.lock().current.clone()
    }

    /// Read-only view that replays the current value on attach.
    pub fn source(&self) -> Source<T> {
        let cell = Arc::clone(&self.cell);
        Source::new(move || Cell::attach(&cell))
    }

    /// Number of live attachments.
    pub fn subscriber_count(&self) -> usize {
        self.cell.lock().hub.len()
    }
}

impl<T> Drop for Publisher<T> {
    fn drop(&mut self) {
        let mut cell = self.cell.lock();
        cell.closed = true;
        for (_, sender) in cell.hub.subscribers.drain() {
            let _ = sender.unbounded_send(Emission::Complete);
        }
    }
}
