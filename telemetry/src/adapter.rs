use std::any::Any;
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use figment::Figment;
use once_cell::sync::OnceCell;
use serde_json::Value;

use crate::backend::{BackendError, ClientSettings, TelemetryBackend};
use crate::configuration::{ConfigError, TelemetryConfig};
use crate::handler::Instrumented;
use crate::log_sink::{ErrorChain, LogSink, TracingSink};
use crate::scope::{BreadcrumbEntry, ScopeContext, Severity, UserIdentity};

/// Default delay after which a still running invocation is reported as a possible timeout.
pub const DEFAULT_TIMEOUT_WARNING: Duration = Duration::from_millis(500);

/// Default upper bound on the time spent flushing after an invocation.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_millis(2000);

/// Extra time granted to the blocking flush task on top of the backend's own budget.
const FLUSH_GRACE: Duration = Duration::from_millis(50);

/// Builds the figment telemetry settings are extracted from.
pub type ConfigLoader = Arc<dyn Fn() -> Figment + Send + Sync>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TelemetryStatus {
    Enabled,
    Disabled,
}

impl TelemetryStatus {
    pub fn is_enabled(self) -> bool {
        self == TelemetryStatus::Enabled
    }
}

/// Time limits applied to wrapped handlers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HandlerTimeouts {
    pub timeout_warning: Duration,
    pub flush_timeout: Duration,
}

impl Default for HandlerTimeouts {
    fn default() -> Self {
        Self {
            timeout_warning: DEFAULT_TIMEOUT_WARNING,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum InitError {
    #[error("ENDPOINT_CREDENTIAL is not set")]
    MissingCredential,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to construct telemetry client")]
    Backend(#[from] BackendError),
}

/// Reports errors and diagnostics to the telemetry backend.
///
/// The backend client is constructed lazily by [`initialize`](Self::initialize), at most once per
/// adapter. Until then, and whenever telemetry is not configured, every operation degrades to a
/// local log line. None of the operations panic or return errors.
#[derive(Clone)]
pub struct TelemetryAdapter {
    inner: Arc<Inner>,
}

struct Inner {
    backend: Arc<dyn TelemetryBackend>,
    sink: Arc<dyn LogSink>,
    loader: ConfigLoader,
    timeouts: HandlerTimeouts,
    settings: OnceCell<ClientSettings>,
}

pub struct TelemetryAdapterBuilder {
    backend: Arc<dyn TelemetryBackend>,
    sink: Arc<dyn LogSink>,
    loader: ConfigLoader,
    timeouts: HandlerTimeouts,
}

impl TelemetryAdapterBuilder {
    pub fn log_sink<S: LogSink + 'static>(mut self, sink: S) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Reads settings from `loader` instead of the process environment.
    pub fn config_loader<F>(mut self, loader: F) -> Self
    where
        F: Fn() -> Figment + Send + Sync + 'static,
    {
        self.loader = Arc::new(loader);
        self
    }

    pub fn timeouts(mut self, timeouts: HandlerTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn build(self) -> TelemetryAdapter {
        TelemetryAdapter {
            inner: Arc::new(Inner {
                backend: self.backend,
                sink: self.sink,
                loader: self.loader,
                timeouts: self.timeouts,
                settings: OnceCell::new(),
            }),
        }
    }
}

impl TelemetryAdapter {
    pub fn builder<B: TelemetryBackend + 'static>(backend: B) -> TelemetryAdapterBuilder {
        TelemetryAdapterBuilder {
            backend: Arc::new(backend),
            sink: Arc::new(TracingSink),
            loader: Arc::new(TelemetryConfig::figment),
            timeouts: HandlerTimeouts::default(),
        }
    }

    pub fn new<B: TelemetryBackend + 'static>(backend: B) -> Self {
        Self::builder(backend).build()
    }

    /// Constructs the backend client if it has not been constructed yet.
    ///
    /// Concurrent callers block until the first attempt completes; a successful construction is
    /// never repeated. A missing credential or a failed construction leaves the adapter
    /// uninitialized, so a later call tries again.
    pub fn initialize(&self) -> TelemetryStatus {
        if self.is_enabled() {
            return TelemetryStatus::Enabled;
        }

        match self.inner.settings.get_or_try_init(|| self.construct()) {
            Ok(settings) => {
                tracing::debug!(
                    environment = %settings.environment,
                    sample_rate = settings.sample_rate,
                    "telemetry initialized"
                );
                TelemetryStatus::Enabled
            }
            Err(InitError::MissingCredential) => {
                self.inner
                    .sink
                    .warn("ENDPOINT_CREDENTIAL is not set, telemetry is disabled");
                TelemetryStatus::Disabled
            }
            Err(error) => {
                self.inner.sink.error(&format!(
                    "telemetry is disabled: {}",
                    ErrorChain(&error)
                ));
                TelemetryStatus::Disabled
            }
        }
    }

    fn construct(&self) -> Result<ClientSettings, InitError> {
        let config = TelemetryConfig::extract((self.inner.loader)())?;
        let settings = ClientSettings::from_config(&config).ok_or(InitError::MissingCredential)?;

        shielded(|| self.inner.backend.init(&settings))?;

        Ok(settings)
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.settings.get().is_some()
    }

    /// Settings the backend client was constructed with, once initialized.
    pub fn settings(&self) -> Option<&ClientSettings> {
        self.inner.settings.get()
    }

    pub fn timeouts(&self) -> HandlerTimeouts {
        self.inner.timeouts
    }

    /// Wraps `handler` so failures are reported and telemetry is flushed after each invocation.
    ///
    /// When telemetry is disabled the handler is handed back untouched.
    pub fn wrap_handler<F>(&self, handler: F) -> Instrumented<F> {
        match self.initialize() {
            TelemetryStatus::Enabled => Instrumented::Wrapped {
                handler,
                adapter: self.clone(),
            },
            TelemetryStatus::Disabled => Instrumented::Passthrough(handler),
        }
    }

    pub fn capture_exception(&self, error: &(dyn StdError + 'static), context: &ScopeContext) {
        if !self.is_enabled() {
            self.inner.sink.error(&ErrorChain(error).to_string());
            return;
        }

        if let Err(failure) = shielded(|| self.inner.backend.capture_exception(error, context)) {
            self.inner.sink.error(&format!(
                "failed to capture exception `{error}`: {}",
                ErrorChain(&failure)
            ));
        }
    }

    pub fn capture_message(&self, message: &str, level: Severity, context: &ScopeContext) {
        if !self.is_enabled() {
            self.inner.sink.info(&format!("[{level}] {message}"));
            return;
        }

        if let Err(failure) =
            shielded(|| self.inner.backend.capture_message(message, level, context))
        {
            self.inner.sink.error(&format!(
                "failed to capture message `{message}`: {}",
                ErrorChain(&failure)
            ));
        }
    }

    /// Sets the user attributed to every following capture.
    pub fn set_user(&self, user_id: &str, user_data: BTreeMap<String, Value>) {
        self.replace_user(Some(UserIdentity::merged(user_id, user_data)));
    }

    pub fn clear_user(&self) {
        self.replace_user(None);
    }

    fn replace_user(&self, user: Option<UserIdentity>) {
        if !self.is_enabled() {
            return;
        }

        if let Err(failure) = shielded(|| self.inner.backend.set_user(user)) {
            self.inner.sink.error(&format!(
                "failed to set user: {}",
                ErrorChain(&failure)
            ));
        }
    }

    pub fn add_breadcrumb(
        &self,
        message: &str,
        category: Option<&str>,
        level: Option<Severity>,
        data: BTreeMap<String, Value>,
    ) {
        if !self.is_enabled() {
            return;
        }

        let mut breadcrumb = BreadcrumbEntry::new(message);
        if let Some(category) = category {
            breadcrumb.category = category.to_string();
        }
        breadcrumb.level = level.unwrap_or_default();
        breadcrumb.data = data;
        breadcrumb.timestamp = SystemTime::now();

        if let Err(failure) = shielded(|| self.inner.backend.add_breadcrumb(breadcrumb)) {
            self.inner.sink.error(&format!(
                "failed to add breadcrumb: {}",
                ErrorChain(&failure)
            ));
        }
    }

    /// Waits up to `timeout` for buffered events to be sent.
    ///
    /// The backend flush runs on the blocking pool, so the runtime keeps making progress. The
    /// wait on it is cut off shortly after `timeout` even if the backend overruns its budget.
    /// Returns `true` if everything was sent or telemetry is disabled.
    pub async fn flush(&self, timeout: Duration) -> bool {
        if !self.is_enabled() {
            return true;
        }

        let backend = Arc::clone(&self.inner.backend);
        let flush = tokio::task::spawn_blocking(move || shielded(|| Ok(backend.flush(timeout))));

        match tokio::time::timeout(timeout + FLUSH_GRACE, flush).await {
            Ok(Ok(Ok(true))) => true,
            Ok(Ok(Ok(false))) | Err(_) => {
                self.inner.sink.warn(&format!(
                    "telemetry was not flushed within {}ms",
                    timeout.as_millis()
                ));
                false
            }
            Ok(Ok(Err(failure))) => {
                self.inner.sink.error(&format!(
                    "failed to flush telemetry: {}",
                    ErrorChain(&failure)
                ));
                false
            }
            Ok(Err(join_error)) => {
                self.inner.sink.error(&format!(
                    "failed to flush telemetry: {join_error}"
                ));
                false
            }
        }
    }

    pub(crate) fn log_warning(&self, message: &str) {
        self.inner.sink.warn(message);
    }
}

/// Runs a backend call, turning a panic into a [`BackendError`].
fn shielded<T, F>(call: F) -> Result<T, BackendError>
where
    F: FnOnce() -> Result<T, BackendError>,
{
    panic::catch_unwind(AssertUnwindSafe(call))
        .unwrap_or_else(|payload| Err(BackendError::Panicked(panic_message(&*payload))))
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
