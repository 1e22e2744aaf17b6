//! Level-gated tracing stage.

use super::{lift, Emission, Source};
use futures::StreamExt;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Diagnostic severity, ordered `Trace < Debug < Info < Error`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    #[default]
    Info = 2,
    Error = 3,
}

impl LogLevel {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LogLevel::Trace,
            1 => LogLevel::Debug,
            2 => LogLevel::Info,
            _ => LogLevel::Error,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Shared, adjustable threshold for debug stages.
///
/// Clones observe the same threshold. Stages read it at emission time, so a
/// change applies to pipelines that were built earlier.
#[derive(Clone, Debug)]
pub struct LogConfig {
    threshold: Arc<AtomicU8>,
}

impl LogConfig {
    pub fn new(level: LogLevel) -> Self {
        Self {
            threshold: Arc::new(AtomicU8::new(level as u8)),
        }
    }

    pub fn level(&self) -> LogLevel {
        LogLevel::from_u8(self.threshold.load(Ordering::Relaxed))
    }

    pub fn set_level(&self, level: LogLevel) {
        self.threshold.store(level as u8, Ordering::Relaxed);
    }

    /// Whether a stage at `level` currently writes.
    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.level()
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new(LogLevel::default())
    }
}

impl<T: fmt::Debug + Send + 'static> Source<T> {
    /// Forward every emission unchanged, tracing values under `label` when
    /// `level` meets the threshold of `log`.
    ///
    /// Errors and completion pass through untraced.
    pub fn debug(&self, log: &LogConfig, level: LogLevel, label: impl Into<String>) -> Source<T> {
        let log = log.clone();
        let label: Arc<str> = Arc::from(label.into());
        lift(self, move |emissions| {
            let log = log.clone();
            let label = Arc::clone(&label);
            emissions
                .inspect(move |emission| {
                    if let Emission::Next(value) = emission {
                        trace_value(&log, level, &label, value);
                    }
                })
                .boxed()
        })
    }
}

fn trace_value<T: fmt::Debug>(log: &LogConfig, level: LogLevel, label: &str, value: &T) {
    if !log.enabled(level) {
        return;
    }
    match level {
        LogLevel::Trace => tracing::trace!(target: "course_store::debug", label = %label, value = ?value, "emission"),
        LogLevel::Debug => tracing::debug!(target: "course_store::debug", label = %label, value = ?value, "emission"),
        LogLevel::Info => tracing::info!(target: "course_store::debug", label = %label, value = ?value, "emission"),
        LogLevel::Error => tracing::error!(target: "course_store::debug", label = %label, value = ?value, "emission"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use parking_lot::Mutex;
    use std::io;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    fn with_capture(f: impl FnOnce()) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        captured.text()
    }

    #[test]
    fn test_levels_are_ordered() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Error);
        assert_eq!(LogConfig::default().level(), LogLevel::Info);
    }

    #[test]
    fn test_values_pass_through_unchanged() {
        let log = LogConfig::new(LogLevel::Error);
        let mut attachment = Source::just(42).debug(&log, LogLevel::Trace, "answer").attach();
        assert_eq!(attachment.drain_ready(), vec![Ok(42)]);
        assert!(attachment.is_terminated());
    }

    #[test]
    fn test_errors_pass_through() {
        let log = LogConfig::default();
        let mut attachment = Source::<u32>::fail(StoreError::Transport("down".into()))
            .debug(&log, LogLevel::Error, "failing")
            .attach();
        assert_eq!(
            attachment.try_next(),
            Some(Err(StoreError::Transport("down".into())))
        );
    }

    #[test]
    fn test_below_threshold_is_silent() {
        let log = LogConfig::new(LogLevel::Info);
        let output = with_capture(|| {
            let mut attachment = Source::just(1).debug(&log, LogLevel::Debug, "quiet").attach();
            attachment.drain_ready();
        });
        assert!(!output.contains("quiet"));
    }

    #[test]
    fn test_threshold_read_at_emission_time() {
        let log = LogConfig::new(LogLevel::Error);
        let source = Source::just("hello").debug(&log, LogLevel::Debug, "greeting");

        // Lowered after the stage was built
        log.set_level(LogLevel::Trace);

        let output = with_capture(|| {
            source.attach().drain_ready();
        });
        assert!(output.contains("greeting"));
        assert!(output.contains("hello"));
    }
}
