use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Category used for breadcrumbs that do not name one.
pub const DEFAULT_BREADCRUMB_CATEGORY: &str = "default";

/// Severity of a captured message or breadcrumb.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown severity `{0}`")]
pub struct ParseSeverityError(String);

impl FromStr for Severity {
    type Err = ParseSeverityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" | "warn" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            _ => Err(ParseSeverityError(s.to_string())),
        }
    }
}

/// Identity of the user an event is attributed to.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl UserIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Merges an identifier with additional user data into a single record.
    ///
    /// An `id` entry in `fields` never replaces the explicit identifier.
    pub fn merged(id: impl Into<String>, fields: BTreeMap<String, Value>) -> Self {
        let mut user = Self::new(id);
        user.fields = fields;
        user.fields.remove("id");
        user
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if key != "id" {
            self.fields.insert(key, value.into());
        }
        self
    }

    /// Returns a well-known string field such as `email` or `username`.
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

/// Context attached to a single capture call.
///
/// A scope context never outlives the call it is passed to.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeContext {
    pub tags: BTreeMap<String, String>,
    pub extra: BTreeMap<String, Value>,
    pub user: Option<UserIdentity>,
}

impl ScopeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn user(mut self, user: UserIdentity) -> Self {
        self.user = Some(user);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.extra.is_empty() && self.user.is_none()
    }
}

/// A single entry for the ambient breadcrumb trail.
#[derive(Clone, Debug, PartialEq)]
pub struct BreadcrumbEntry {
    pub message: String,
    pub category: String,
    pub level: Severity,
    pub data: BTreeMap<String, Value>,
    pub timestamp: SystemTime,
}

impl BreadcrumbEntry {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            category: DEFAULT_BREADCRUMB_CATEGORY.to_string(),
            level: Severity::default(),
            data: BTreeMap::new(),
            timestamp: SystemTime::now(),
        }
    }
}
