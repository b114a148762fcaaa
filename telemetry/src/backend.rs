use std::error::Error as StdError;
use std::time::Duration;

use crate::configuration::TelemetryConfig;
use crate::scope::{BreadcrumbEntry, ScopeContext, Severity, UserIdentity};

#[cfg(any(test, feature = "mocks"))]
use mockall::automock;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("invalid endpoint credential")]
    InvalidCredential(#[source] Box<dyn StdError + Send + Sync>),
    #[error("telemetry client is not initialized")]
    NotInitialized,
    #[error("telemetry backend panicked: {0}")]
    Panicked(String),
    #[error("telemetry backend rejected the call: {0}")]
    Rejected(String),
}

/// Options a backend client is constructed with.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientSettings {
    pub credential: String,
    pub environment: String,
    pub sample_rate: f32,
    pub release: Option<String>,
    pub server_name: Option<String>,
}

impl ClientSettings {
    /// Resolves client settings, or `None` when no usable credential is configured.
    pub fn from_config(config: &TelemetryConfig) -> Option<Self> {
        let credential = config.credential()?;

        Some(Self {
            credential: credential.to_string(),
            environment: config.environment().to_string(),
            sample_rate: config.sample_rate(),
            release: config.release().map(str::to_string),
            server_name: config.server_name().map(str::to_string),
        })
    }
}

/// The error tracking client the adapter reports through.
///
/// Capture methods receive the caller's scope and must apply it to an isolated scope that is
/// discarded once the report is made. Ambient state (user, breadcrumbs) is shared by every
/// capture that follows.
#[cfg_attr(any(test, feature = "mocks"), automock)]
pub trait TelemetryBackend: Send + Sync {
    fn init(&self, settings: &ClientSettings) -> Result<(), BackendError>;

    fn capture_exception(
        &self,
        error: &(dyn StdError + 'static),
        scope: &ScopeContext,
    ) -> Result<(), BackendError>;

    fn capture_message(
        &self,
        message: &str,
        level: Severity,
        scope: &ScopeContext,
    ) -> Result<(), BackendError>;

    fn set_user(&self, user: Option<UserIdentity>) -> Result<(), BackendError>;

    fn add_breadcrumb(&self, breadcrumb: BreadcrumbEntry) -> Result<(), BackendError>;

    /// Blocks until buffered events are sent or `timeout` elapses. Returns `true` when drained.
    fn flush(&self, timeout: Duration) -> bool;
}
