//! Failure recovery: retry with delay, catch, rethrow, recover.

use super::{Attachment, Emission, Source, Teardown};
use crate::error::StoreError;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// How long to wait before resubscribing, and when to give up.
///
/// Use the constructors for common shapes:
/// - [`RetryPolicy::fixed()`] - same delay every time, never give up
/// - [`RetryPolicy::backoff()`] - exponential delay with a cap
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Retries after the first failure; `None` retries forever.
    pub max_retries: Option<usize>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(2))
    }
}

impl RetryPolicy {
    /// Retry forever, waiting `delay` between attempts.
    #[must_use]
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            factor: 1.0,
            max_retries: None,
        }
    }

    /// Retry forever with exponential backoff capped at `max_delay`.
    ///
    /// A `factor` below 1.0, or one that is not finite, is treated as 1.0.
    #[must_use]
    pub fn backoff(initial_delay: Duration, max_delay: Duration, factor: f64) -> Self {
        let factor = if factor.is_finite() { factor.max(1.0) } else { 1.0 };
        Self {
            initial_delay,
            max_delay,
            factor,
            max_retries: None,
        }
    }

    /// Give up after `retries` failed resubscriptions.
    #[must_use]
    pub fn with_max_retries(mut self, retries: usize) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let mut delay = self.initial_delay;
        for _ in 1..attempt {
            if delay >= self.max_delay {
                break;
            }
            delay = Duration::try_from_secs_f64(delay.as_secs_f64() * self.factor)
                .map_or(self.max_delay, |next| next.min(self.max_delay));
        }
        delay
    }
}

struct RetryState<T> {
    upstream: Source<T>,
    current: Option<Attachment<T>>,
    policy: Arc<RetryPolicy>,
    failures: usize,
    done: bool,
}

impl<T: Send + 'static> Source<T> {
    /// On error, wait and resubscribe to this source from scratch.
    ///
    /// Errors never reach the consumer unless the policy's retry budget runs
    /// out, in which case the attachment fails with
    /// [`StoreError::RetriesExhausted`]. The failure count resets after every
    /// successful value.
    pub fn retry_with_delay(&self, policy: RetryPolicy) -> Source<T> {
        let upstream = self.clone();
        let policy = Arc::new(policy);

        Source::new(move || {
            let state = RetryState {
                upstream: upstream.clone(),
                current: Some(upstream.attach()),
                policy: Arc::clone(&policy),
                failures: 0,
                done: false,
            };

            let emissions = stream::unfold(state, |mut state| async move {
                if state.done {
                    return None;
                }
                loop {
                    let upstream = &state.upstream;
                    let attachment = state.current.get_or_insert_with(|| upstream.attach());

                    match attachment.next_emission().await {
                        Emission::Next(value) => {
                            if state.failures > 0 {
                                info!(retries = state.failures, "upstream recovered");
                            }
                            state.failures = 0;
                            return Some((Emission::Next(value), state));
                        }
                        Emission::Complete => {
                            state.done = true;
                            return Some((Emission::Complete, state));
                        }
                        Emission::Error(error) => {
                            state.current = None;
                            state.failures += 1;

                            if let Some(max) = state.policy.max_retries {
                                if state.failures > max {
                                    warn!(attempts = state.failures, %error, "giving up");
                                    state.done = true;
                                    let exhausted = StoreError::RetriesExhausted {
                                        attempts: state.failures,
                                        last: Box::new(error),
                                    };
                                    return Some((Emission::Error(exhausted), state));
                                }
                            }

                            let delay = state.policy.delay_for(state.failures);
                            warn!(
                                attempt = state.failures,
                                ?delay,
                                %error,
                                "upstream failed, resubscribing after delay"
                            );
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            });

            Attachment::from_stream(emissions.boxed(), Teardown::none())
        })
    }

    /// On error, switch to the source produced by `handler`.
    pub fn catch_error<F>(&self, handler: F) -> Source<T>
    where
        F: Fn(StoreError) -> Source<T> + Send + Sync + 'static,
    {
        let upstream = self.clone();
        let handler = Arc::new(handler);

        Source::new(move || {
            let handler = Arc::clone(&handler);
            let primary = upstream.attach();

            let emissions = stream::unfold(
                (Some(primary), None::<Attachment<T>>),
                move |(mut primary, mut fallback)| {
                    let handler = Arc::clone(&handler);
                    async move {
                        if let Some(attachment) = primary.as_mut() {
                            match attachment.next_emission().await {
                                Emission::Error(error) => {
                                    primary = None;
                                    fallback = Some(handler(error).attach());
                                }
                                Emission::Next(value) => {
                                    return Some((Emission::Next(value), (primary, fallback)));
                                }
                                Emission::Complete => {
                                    return Some((Emission::Complete, (None, None)));
                                }
                            }
                        }
                        let emission = fallback.as_mut()?.next_emission().await;
                        if emission.is_terminal() {
                            Some((emission, (None, None)))
                        } else {
                            Some((emission, (primary, fallback)))
                        }
                    }
                },
            );

            Attachment::from_stream(emissions.boxed(), Teardown::none())
        })
    }

    /// Catch and rethrow a different error.
    pub fn map_err<F>(&self, f: F) -> Source<T>
    where
        F: Fn(StoreError) -> StoreError + Send + Sync + 'static,
    {
        self.catch_error(move |error| Source::fail(f(error)))
    }

    /// Catch any error and complete with `value` instead.
    pub fn recover_with(&self, value: T) -> Source<T>
    where
        T: Clone + Sync,
    {
        self.catch_error(move |_| Source::just(value.clone()))
    }
}
