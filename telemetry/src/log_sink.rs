use std::error::Error as StdError;
use std::fmt;

use tracing::subscriber::NoSubscriber;

#[cfg(any(test, feature = "mocks"))]
use mockall::automock;

/// Destination for the adapter's own log lines.
///
/// Errors and warnings belong on stderr, informational lines on stdout.
#[cfg_attr(any(test, feature = "mocks"), automock)]
pub trait LogSink: Send + Sync {
    fn error(&self, message: &str);
    fn warn(&self, message: &str);
    fn info(&self, message: &str);
}

/// Sink forwarding to the `tracing` subscriber installed by [`crate::logging::init`].
///
/// Without a subscriber, lines are written to the console directly so they are never lost.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn error(&self, message: &str) {
        if !subscribed() {
            eprintln!("ERROR telemetry: {message}");
            return;
        }
        tracing::error!(target: "telemetry", "{message}");
    }

    fn warn(&self, message: &str) {
        if !subscribed() {
            eprintln!("WARN telemetry: {message}");
            return;
        }
        tracing::warn!(target: "telemetry", "{message}");
    }

    fn info(&self, message: &str) {
        if !subscribed() {
            println!("INFO telemetry: {message}");
            return;
        }
        tracing::info!(target: "telemetry", "{message}");
    }
}

/// Whether a `tracing` subscriber, global or scoped, is active on this thread.
fn subscribed() -> bool {
    tracing::dispatcher::get_default(|dispatch| !dispatch.is::<NoSubscriber>())
}

/// Formats an error together with all of its causes.
pub struct ErrorChain<'a, E: StdError + ?Sized>(pub &'a E);

impl<E: StdError + ?Sized> fmt::Display for ErrorChain<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;

        let mut source = self.0.source();
        while let Some(s) = source {
            write!(f, "\n  caused by: {s}")?;
            source = s.source();
        }

        Ok(())
    }
}
