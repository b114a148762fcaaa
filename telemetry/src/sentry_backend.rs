use std::borrow::Cow;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use sentry::protocol::{Breadcrumb, Event, Map, User};
use sentry::types::Dsn;
use sentry::{ClientOptions, Hub, Level, Scope, TransportFactory};

use crate::backend::{BackendError, ClientSettings, TelemetryBackend};
use crate::scope::{BreadcrumbEntry, ScopeContext, Severity, UserIdentity};

/// Hook invoked with every event before it is sent. Returning `None` drops the event.
pub type EventFilter = Arc<dyn Fn(Event<'static>) -> Option<Event<'static>> + Send + Sync>;

/// [`TelemetryBackend`] reporting to Sentry.
///
/// The client is bound to a hub owned by the backend, which holds the ambient user and the
/// breadcrumb trail. Every capture runs on a fresh hub forked from it, so scope data passed to
/// one capture is never visible to another.
pub struct SentryBackend {
    hub: OnceCell<Arc<Hub>>,
    before_send: EventFilter,
    transport: Option<Arc<dyn TransportFactory>>,
}

impl SentryBackend {
    pub fn new() -> Self {
        Self {
            hub: OnceCell::new(),
            before_send: Arc::new(|event: Event<'static>| Some(event)),
            transport: None,
        }
    }

    /// Replaces the default pass-through event filter.
    pub fn before_send<F>(mut self, filter: F) -> Self
    where
        F: Fn(Event<'static>) -> Option<Event<'static>> + Send + Sync + 'static,
    {
        self.before_send = Arc::new(filter);
        self
    }

    /// Sends events through `transport` instead of the default HTTP transport.
    pub fn transport<T>(mut self, transport: T) -> Self
    where
        T: TransportFactory + 'static,
    {
        self.transport = Some(Arc::new(transport));
        self
    }

    fn ambient(&self) -> Result<&Arc<Hub>, BackendError> {
        self.hub.get().ok_or(BackendError::NotInitialized)
    }

    fn isolated(&self, context: &ScopeContext) -> Result<Hub, BackendError> {
        let hub = Hub::new_from_top(Arc::clone(self.ambient()?));
        hub.configure_scope(|scope| apply_context(scope, context));
        Ok(hub)
    }
}

impl Default for SentryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryBackend for SentryBackend {
    fn init(&self, settings: &ClientSettings) -> Result<(), BackendError> {
        let dsn: Dsn = settings
            .credential
            .parse()
            .map_err(|e| BackendError::InvalidCredential(Box::new(e)))?;

        let options = ClientOptions {
            dsn: Some(dsn),
            environment: Some(Cow::Owned(settings.environment.clone())),
            release: settings.release.clone().map(Cow::Owned),
            server_name: settings.server_name.clone().map(Cow::Owned),
            traces_sample_rate: settings.sample_rate,
            before_send: Some(Arc::clone(&self.before_send)),
            transport: self.transport.clone(),
            ..Default::default()
        };

        let client = Arc::new(sentry::Client::with_options(options));
        let hub = Arc::new(Hub::new(Some(client), Arc::new(Scope::default())));

        self.hub
            .set(hub)
            .map_err(|_| BackendError::Rejected("client is already initialized".to_string()))
    }

    fn capture_exception(
        &self,
        error: &(dyn StdError + 'static),
        scope: &ScopeContext,
    ) -> Result<(), BackendError> {
        self.isolated(scope)?.capture_error(error);
        Ok(())
    }

    fn capture_message(
        &self,
        message: &str,
        level: Severity,
        scope: &ScopeContext,
    ) -> Result<(), BackendError> {
        self.isolated(scope)?
            .capture_message(message, sentry_level(level));
        Ok(())
    }

    fn set_user(&self, user: Option<UserIdentity>) -> Result<(), BackendError> {
        let user = user.as_ref().map(sentry_user);
        self.ambient()?
            .configure_scope(|scope| scope.set_user(user));
        Ok(())
    }

    fn add_breadcrumb(&self, breadcrumb: BreadcrumbEntry) -> Result<(), BackendError> {
        self.ambient()?.add_breadcrumb(sentry_breadcrumb(breadcrumb));
        Ok(())
    }

    fn flush(&self, timeout: Duration) -> bool {
        match self.hub.get().and_then(|hub| hub.client()) {
            Some(client) => client.flush(Some(timeout)),
            None => true,
        }
    }
}

fn apply_context(scope: &mut Scope, context: &ScopeContext) {
    for (key, value) in &context.tags {
        scope.set_tag(key, value);
    }
    for (key, value) in &context.extra {
        scope.set_extra(key, value.clone());
    }
    if let Some(user) = &context.user {
        scope.set_user(Some(sentry_user(user)));
    }
}

fn sentry_level(level: Severity) -> Level {
    match level {
        Severity::Info => Level::Info,
        Severity::Warning => Level::Warning,
        Severity::Error => Level::Error,
    }
}

fn sentry_user(user: &UserIdentity) -> User {
    let mut sentry_user = User {
        id: Some(user.id.clone()),
        ..Default::default()
    };
    let mut other = Map::new();

    for (key, value) in &user.fields {
        match (key.as_str(), value.as_str()) {
            ("email", Some(email)) => sentry_user.email = Some(email.to_string()),
            ("username", Some(username)) => sentry_user.username = Some(username.to_string()),
            _ => {
                other.insert(key.clone(), value.clone());
            }
        }
    }

    sentry_user.other = other;
    sentry_user
}

fn sentry_breadcrumb(entry: BreadcrumbEntry) -> Breadcrumb {
    Breadcrumb {
        timestamp: entry.timestamp,
        category: Some(entry.category),
        level: sentry_level(entry.level),
        message: Some(entry.message),
        data: entry.data.into_iter().collect(),
        ..Default::default()
    }
}
