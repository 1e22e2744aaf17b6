//! Sources backed by one external asynchronous operation.

use super::{Attachment, Emission, Source, Teardown};
use crate::error::Result;
use futures::channel::mpsc;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::trace;

impl<T: Send + 'static> Source<T> {
    /// Wrap an asynchronous operation as a lazy, cancelable source.
    ///
    /// `invoker` runs once per attachment and receives a fresh
    /// [`CancellationToken`]. The operation's value is emitted once followed
    /// by completion; its error is emitted as the terminal error.
    ///
    /// Cancelling the attachment cancels the token and drops the operation
    /// future, so an in-flight request is aborted rather than left running.
    pub fn from_cancelable<F, Fut>(invoker: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Source::new(move || {
            let (sender, receiver) = mpsc::unbounded();
            let token = CancellationToken::new();
            let operation = invoker(token.clone());
            let cancelled = token.clone();

            tokio::spawn(async move {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => {
                        trace!("operation cancelled before it settled");
                    }
                    outcome = operation => match outcome {
                        Ok(value) => {
                            let _ = sender.unbounded_send(Emission::Next(value));
                            let _ = sender.unbounded_send(Emission::Complete);
                        }
                        Err(error) => {
                            let _ = sender.unbounded_send(Emission::Error(error));
                        }
                    },
                }
            });

            Attachment::from_receiver(receiver, Teardown::new(move || token.cancel()))
        })
    }

    /// Like [`from_cancelable`](Self::from_cancelable) for operations that
    /// have no use for the token. Cancellation still drops the future.
    pub fn from_future<F, Fut>(invoker: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Source::from_cancelable(move |_| invoker())
    }
}
