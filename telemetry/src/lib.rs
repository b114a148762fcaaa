//! Error reporting for AWS Lambda handlers.
//!
//! Telemetry is enabled by setting `ENDPOINT_CREDENTIAL` to a Sentry DSN. Without it, every
//! function in this crate degrades to a local log line and wrapped handlers run untouched.
//!
//! ```no_run
//! use lambda_runtime::{run, service_fn, Error, LambdaEvent};
//! use serde_json::Value;
//!
//! async fn function_handler(event: LambdaEvent<Value>) -> Result<Value, Error> {
//!     Ok(event.payload)
//! }
//!
//! # async fn main_() -> Result<(), Error> {
//! telemetry::logging::init();
//! let handler = telemetry::wrap_handler(function_handler);
//! run(service_fn(|event| handler.call(event))).await
//! # }
//! ```
//!
//! The environment label is taken from `TELEMETRY_ENVIRONMENT`, then `STAGE`, and defaults to
//! `development`. Production environments are sampled at a lower rate.

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde_json::Value;

pub mod adapter;
pub mod backend;
pub mod configuration;
pub mod handler;
pub mod log_sink;
pub mod logging;
pub mod scope;
pub mod sentry_backend;

pub use adapter::{HandlerTimeouts, TelemetryAdapter, TelemetryStatus};
pub use backend::{BackendError, ClientSettings, TelemetryBackend};
pub use configuration::TelemetryConfig;
pub use handler::{Instrumented, Invocation};
pub use log_sink::{ErrorChain, LogSink, TracingSink};
pub use scope::{BreadcrumbEntry, ScopeContext, Severity, UserIdentity};
pub use sentry_backend::SentryBackend;

static GLOBAL: Lazy<TelemetryAdapter> = Lazy::new(|| TelemetryAdapter::new(SentryBackend::new()));

/// The process-wide adapter, reporting to Sentry with settings from the environment.
pub fn global() -> &'static TelemetryAdapter {
    &GLOBAL
}

pub fn initialize() -> TelemetryStatus {
    global().initialize()
}

pub fn wrap_handler<F>(handler: F) -> Instrumented<F> {
    global().wrap_handler(handler)
}

pub fn capture_exception(error: &(dyn StdError + 'static), context: &ScopeContext) {
    global().capture_exception(error, context)
}

pub fn capture_message(message: &str, level: Severity, context: &ScopeContext) {
    global().capture_message(message, level, context)
}

pub fn set_user(user_id: &str, user_data: BTreeMap<String, Value>) {
    global().set_user(user_id, user_data)
}

pub fn clear_user() {
    global().clear_user()
}

pub fn add_breadcrumb(
    message: &str,
    category: Option<&str>,
    level: Option<Severity>,
    data: BTreeMap<String, Value>,
) {
    global().add_breadcrumb(message, category, level, data)
}

pub async fn flush(timeout: Duration) -> bool {
    global().flush(timeout).await
}
