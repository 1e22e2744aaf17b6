//! General-purpose stages: map, filter, start_with, distinct, debounce,
//! switch_map.

use super::{lift, ready, Attachment, Emission, Source, Teardown};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

impl<T: Send + 'static> Source<T> {
    /// Transform every value.
    pub fn map<U, F>(&self, f: F) -> Source<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        lift(self, move |emissions| {
            let f = Arc::clone(&f);
            emissions.map(move |emission| emission.map(|value| f(value))).boxed()
        })
    }

    /// Drop values that do not satisfy `predicate`.
    pub fn filter<F>(&self, predicate: F) -> Source<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        lift(self, move |emissions| {
            let predicate = Arc::clone(&predicate);
            emissions
                .filter(move |emission| {
                    ready(match emission {
                        Emission::Next(value) => predicate(value),
                        _ => true,
                    })
                })
                .boxed()
        })
    }

    /// Emit `value` before anything the upstream produces.
    pub fn start_with(&self, value: T) -> Source<T>
    where
        T: Clone + Sync,
    {
        lift(self, move |emissions| {
            stream::once(ready(Emission::Next(value.clone())))
                .chain(emissions)
                .boxed()
        })
    }

    /// Suppress a value equal to the one emitted just before it.
    pub fn distinct_until_changed(&self) -> Source<T>
    where
        T: Clone + PartialEq,
    {
        lift(self, |emissions| {
            let mut last: Option<T> = None;
            emissions
                .filter(move |emission| {
                    let keep = match emission {
                        Emission::Next(value) if last.as_ref() == Some(value) => false,
                        Emission::Next(value) => {
                            last = Some(value.clone());
                            true
                        }
                        _ => true,
                    };
                    ready(keep)
                })
                .boxed()
        })
    }

    /// Emit a value only once `quiet` has passed without a newer one.
    ///
    /// A pending value is flushed when the upstream completes and discarded
    /// when it errors.
    pub fn debounce(&self, quiet: Duration) -> Source<T> {
        let upstream = self.clone();
        Source::new(move || {
            let state = Debounce {
                upstream: upstream.attach(),
                pending: None,
                deadline: Instant::now(),
                queued: None,
                done: false,
            };
            let emissions = stream::unfold(state, move |mut state| async move {
                if state.done {
                    return None;
                }
                if let Some(terminal) = state.queued.take() {
                    state.done = true;
                    return Some((terminal, state));
                }
                loop {
                    let step = if state.pending.is_some() {
                        tokio::select! {
                            emission = state.upstream.next_emission() => DebounceStep::Upstream(emission),
                            _ = tokio::time::sleep_until(state.deadline) => DebounceStep::Elapsed,
                        }
                    } else {
                        DebounceStep::Upstream(state.upstream.next_emission().await)
                    };

                    match step {
                        DebounceStep::Elapsed => {
                            if let Some(value) = state.pending.take() {
                                return Some((Emission::Next(value), state));
                            }
                        }
                        DebounceStep::Upstream(Emission::Next(value)) => {
                            state.pending = Some(value);
                            state.deadline = Instant::now() + quiet;
                        }
                        DebounceStep::Upstream(Emission::Complete) => match state.pending.take() {
                            Some(value) => {
                                state.queued = Some(Emission::Complete);
                                return Some((Emission::Next(value), state));
                            }
                            None => {
                                state.done = true;
                                return Some((Emission::Complete, state));
                            }
                        },
                        DebounceStep::Upstream(error) => {
                            state.pending = None;
                            state.done = true;
                            return Some((error, state));
                        }
                    }
                }
            });
            Attachment::from_stream(emissions.boxed(), Teardown::none())
        })
    }

    /// Map each value to an inner source, following only the most recent.
    ///
    /// A new upstream value cancels the previous inner attachment, aborting
    /// whatever it was doing. Completes once the upstream and the last inner
    /// source have both completed.
    pub fn switch_map<U, F>(&self, project: F) -> Source<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Source<U> + Send + Sync + 'static,
    {
        let upstream = self.clone();
        let project = Arc::new(project);
        Source::new(move || {
            let state = Switch {
                outer: upstream.attach(),
                inner: None,
                outer_done: false,
                done: false,
            };
            let project = Arc::clone(&project);
            let emissions = stream::unfold(state, move |mut state| {
                let project = Arc::clone(&project);
                async move {
                    if state.done {
                        return None;
                    }
                    loop {
                        if state.inner.is_none() && state.outer_done {
                            state.done = true;
                            return Some((Emission::Complete, state));
                        }

                        let step = match state.inner.as_mut() {
                            Some(inner) if !state.outer_done => tokio::select! {
                                emission = state.outer.next_emission() => SwitchStep::Outer(emission),
                                emission = inner.next_emission() => SwitchStep::Inner(emission),
                            },
                            Some(inner) => SwitchStep::Inner(inner.next_emission().await),
                            None => SwitchStep::Outer(state.outer.next_emission().await),
                        };

                        match step {
                            SwitchStep::Outer(Emission::Next(value)) => {
                                // Replacing drops (and so cancels) the previous inner.
                                state.inner = Some(project(value).attach());
                            }
                            SwitchStep::Outer(Emission::Complete) => state.outer_done = true,
                            SwitchStep::Outer(Emission::Error(error))
                            | SwitchStep::Inner(Emission::Error(error)) => {
                                state.inner = None;
                                state.done = true;
                                return Some((Emission::Error(error), state));
                            }
                            SwitchStep::Inner(Emission::Next(value)) => {
                                return Some((Emission::Next(value), state));
                            }
                            SwitchStep::Inner(Emission::Complete) => state.inner = None,
                        }
                    }
                }
            });
            Attachment::from_stream(emissions.boxed(), Teardown::none())
        })
    }
}

struct Debounce<T> {
    upstream: Attachment<T>,
    pending: Option<T>,
    deadline: Instant,
    queued: Option<Emission<T>>,
    done: bool,
}

struct Switch<T, U> {
    outer: Attachment<T>,
    inner: Option<Attachment<U>>,
    outer_done: bool,
    done: bool,
}

enum DebounceStep<T> {
    Upstream(Emission<T>),
    Elapsed,
}

enum SwitchStep<T, U> {
    Outer(Emission<T>),
    Inner(Emission<U>),
}
