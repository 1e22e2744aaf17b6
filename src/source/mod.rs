//! Lazy, cancelable event sources.
//!
//! A [`Source`] describes work; nothing happens until it is attached. Each
//! call to [`Source::attach`] produces an independent [`Attachment`], which is
//! a [`Stream`] of `Result<T>`:
//!
//! - `Some(Ok(value))` is a next-value emission
//! - `Some(Err(error))` is the terminal error
//! - `None` is completion
//!
//! After a terminal emission an attachment yields nothing further. Dropping
//! (or [`cancel`](Attachment::cancel)ling) an attachment tears down whatever
//! work it started; siblings attached to the same shared source are
//! unaffected.
//!
//! Stages are methods on `Source` that return a new `Source`:
//!
//! ```ignore
//! let courses = api
//!     .courses()
//!     .debug(&log, LogLevel::Debug, "courses")
//!     .retry_with_delay(RetryPolicy::fixed(Duration::from_secs(2)))
//!     .share(SharePolicy::replay());
//!
//! let mut attachment = courses.attach();
//! while let Some(collection) = attachment.next().await {
//!     println!("{:?}", collection?);
//! }
//! ```
//!
//! Attaching to anything backed by asynchronous work spawns Tokio tasks, so
//! it must happen inside a Tokio runtime.

mod cancelable;
mod debug;
mod operators;
mod retry;
mod share;

pub use debug::{LogConfig, LogLevel};
pub use retry::RetryPolicy;
pub use share::{Publisher, SharePolicy};

use crate::error::{Result, StoreError};
use futures::channel::mpsc::UnboundedReceiver;
use futures::future::{self, FutureExt};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// One signal travelling from a source to an attachment.
#[derive(Clone, Debug, PartialEq)]
pub enum Emission<T> {
    Next(T),
    Error(StoreError),
    Complete,
}

impl<T> Emission<T> {
    /// Error and complete are terminal.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Emission::Next(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Emission<U> {
        match self {
            Emission::Next(value) => Emission::Next(f(value)),
            Emission::Error(error) => Emission::Error(error),
            Emission::Complete => Emission::Complete,
        }
    }
}

type AttachFn<T> = dyn Fn() -> Attachment<T> + Send + Sync;

/// A cold, cloneable description of an event source.
pub struct Source<T> {
    attach: Arc<AttachFn<T>>,
}

impl<T> Clone for Source<T> {
    fn clone(&self) -> Self {
        Self {
            attach: Arc::clone(&self.attach),
        }
    }
}

impl<T> fmt::Debug for Source<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Source")
    }
}

impl<T: Send + 'static> Source<T> {
    /// Create a source from an attach function, called once per attachment.
    pub fn new<F>(attach: F) -> Self
    where
        F: Fn() -> Attachment<T> + Send + Sync + 'static,
    {
        Self {
            attach: Arc::new(attach),
        }
    }

    /// Start a new, independent attachment.
    pub fn attach(&self) -> Attachment<T> {
        (self.attach)()
    }

    /// A source that emits `value` once and completes.
    pub fn just(value: T) -> Self
    where
        T: Clone + Sync,
    {
        Source::new(move || {
            Attachment::from_emissions(vec![Emission::Next(value.clone()), Emission::Complete])
        })
    }

    /// A source that fails immediately with `error`.
    pub fn fail(error: StoreError) -> Self {
        Source::new(move || Attachment::from_emissions(vec![Emission::Error(error.clone())]))
    }

    /// A source that completes without emitting.
    pub fn empty() -> Self {
        Source::new(|| Attachment::from_emissions(vec![Emission::Complete]))
    }
}

/// Runs a closure when the attachment that owns it goes away.
pub(crate) struct Teardown(Option<Box<dyn FnOnce() + Send>>);

impl Teardown {
    pub(crate) fn none() -> Self {
        Teardown(None)
    }

    pub(crate) fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Teardown(Some(Box::new(f)))
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

/// One consumer's live connection to a [`Source`].
pub struct Attachment<T> {
    emissions: BoxStream<'static, Emission<T>>,
    terminated: bool,
    _teardown: Teardown,
}

impl<T: Send + 'static> Attachment<T> {
    pub(crate) fn from_stream(emissions: BoxStream<'static, Emission<T>>, teardown: Teardown) -> Self {
        Self {
            emissions,
            terminated: false,
            _teardown: teardown,
        }
    }

    pub(crate) fn from_receiver(receiver: UnboundedReceiver<Emission<T>>, teardown: Teardown) -> Self {
        Self::from_stream(receiver.boxed(), teardown)
    }

    pub(crate) fn from_emissions(emissions: Vec<Emission<T>>) -> Self {
        Self::from_stream(stream::iter(emissions).boxed(), Teardown::none())
    }

    /// Cancel this attachment, aborting any work it started.
    pub fn cancel(self) {
        drop(self);
    }

    /// Whether a terminal emission has been observed.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Take an emission only if one is ready right now.
    ///
    /// Returns `None` both when nothing is ready yet and after completion;
    /// use [`is_terminated`](Self::is_terminated) to tell them apart.
    pub fn try_next(&mut self) -> Option<Result<T>> {
        self.next().now_or_never().flatten()
    }

    /// Drain every emission that is ready right now.
    pub fn drain_ready(&mut self) -> Vec<Result<T>> {
        let mut ready = Vec::new();
        while let Some(item) = self.try_next() {
            ready.push(item);
        }
        ready
    }

    /// Next emission, with end-of-stream reported as `Complete`.
    pub(crate) async fn next_emission(&mut self) -> Emission<T> {
        if self.terminated {
            return Emission::Complete;
        }
        let emission = self.emissions.next().await.unwrap_or(Emission::Complete);
        if emission.is_terminal() {
            self.terminated = true;
        }
        emission
    }

    /// Convert into a plain emission stream that ends after the terminal
    /// emission. The attachment (and its teardown) lives as long as the stream.
    pub(crate) fn into_emissions(self) -> BoxStream<'static, Emission<T>> {
        stream::unfold(Some(self), |state| async move {
            let mut attachment = state?;
            let emission = attachment.next_emission().await;
            if emission.is_terminal() {
                Some((emission, None))
            } else {
                Some((emission, Some(attachment)))
            }
        })
        .boxed()
    }

    /// Wait for the terminal emission, discarding values.
    pub async fn completion(mut self) -> Result<()> {
        loop {
            match self.next_emission().await {
                Emission::Next(_) => continue,
                Emission::Error(error) => return Err(error),
                Emission::Complete => return Ok(()),
            }
        }
    }

    /// Wait for the first value, or the error that ended the attachment.
    ///
    /// Completion without a value yields `Ok(None)`.
    pub async fn first(mut self) -> Result<Option<T>> {
        match self.next_emission().await {
            Emission::Next(value) => Ok(Some(value)),
            Emission::Error(error) => Err(error),
            Emission::Complete => Ok(None),
        }
    }
}

impl<T> Stream for Attachment<T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.terminated {
            return Poll::Ready(None);
        }
        match self.emissions.poll_next_unpin(cx) {
            Poll::Ready(Some(Emission::Next(value))) => Poll::Ready(Some(Ok(value))),
            Poll::Ready(Some(Emission::Error(error))) => {
                self.terminated = true;
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(Some(Emission::Complete)) | Poll::Ready(None) => {
                self.terminated = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for Attachment<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("terminated", &self.terminated)
            .finish()
    }
}

/// Map each emission of `source` through `f`, keeping the upstream
/// attachment alive for as long as the returned one.
pub(crate) fn lift<T, U, F>(source: &Source<T>, f: F) -> Source<U>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(BoxStream<'static, Emission<T>>) -> BoxStream<'static, Emission<U>> + Send + Sync + 'static,
{
    let upstream = source.clone();
    Source::new(move || Attachment::from_stream(f(upstream.attach().into_emissions()), Teardown::none()))
}

pub(crate) fn ready<T>(value: T) -> future::Ready<T> {
    future::ready(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_just_emits_once_then_completes() {
        let mut attachment = Source::just(7).attach();
        assert_eq!(attachment.try_next(), Some(Ok(7)));
        assert_eq!(attachment.try_next(), None);
        assert!(attachment.is_terminated());
    }

    #[test]
    fn test_nothing_after_error() {
        let source: Source<u32> = Source::new(|| {
            Attachment::from_emissions(vec![
                Emission::Error(StoreError::Transport("boom".into())),
                Emission::Next(1),
                Emission::Complete,
            ])
        });

        let mut attachment = source.attach();
        assert!(matches!(attachment.try_next(), Some(Err(StoreError::Transport(_)))));
        assert_eq!(attachment.try_next(), None);
        assert!(attachment.is_terminated());
    }

    #[test]
    fn test_each_attachment_is_independent() {
        let source = Source::just("a");
        let mut first = source.attach();
        let mut second = source.attach();
        assert_eq!(first.drain_ready(), vec![Ok("a")]);
        assert_eq!(second.drain_ready(), vec![Ok("a")]);
    }

    #[test]
    fn test_teardown_runs_on_cancel() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let torn_down = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&torn_down);
        let source: Source<u32> = Source::new(move || {
            let flag = Arc::clone(&flag);
            Attachment::from_stream(
                stream::pending().boxed(),
                Teardown::new(move || flag.store(true, Ordering::SeqCst)),
            )
        });

        let attachment = source.attach();
        assert!(!torn_down.load(Ordering::SeqCst));
        attachment.cancel();
        assert!(torn_down.load(Ordering::SeqCst));
    }

    #[test]
    fn test_fail_and_empty() {
        let mut failed = Source::<u32>::fail(StoreError::Transport("x".into())).attach();
        assert!(matches!(failed.try_next(), Some(Err(_))));

        let mut empty = Source::<u32>::empty().attach();
        assert_eq!(empty.try_next(), None);
        assert!(empty.is_terminated());
    }
}
