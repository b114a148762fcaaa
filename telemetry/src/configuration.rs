use figment::providers::Env;
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Environment label used when neither an override nor a stage is configured.
pub const DEFAULT_ENVIRONMENT: &str = "development";

/// Sample rate applied to production environments.
pub const PRODUCTION_SAMPLE_RATE: f32 = 0.1;

/// Sample rate applied to every other environment.
pub const DEFAULT_SAMPLE_RATE: f32 = 1.0;

const PRODUCTION_ENVIRONMENTS: &[&str] = &["production", "prod"];

const ENV_KEYS: &[&str] = &[
    "ENDPOINT_CREDENTIAL",
    "TELEMETRY_ENVIRONMENT",
    "STAGE",
    "TELEMETRY_RELEASE",
    "AWS_LAMBDA_FUNCTION_NAME",
];

#[derive(Debug, thiserror::Error)]
#[error("failed to load telemetry configuration")]
pub struct ConfigError(#[from] figment::Error);

/// Telemetry settings read from the process environment.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub endpoint_credential: Option<String>,
    pub telemetry_environment: Option<String>,
    pub stage: Option<String>,
    pub telemetry_release: Option<String>,
    pub aws_lambda_function_name: Option<String>,
}

impl TelemetryConfig {
    /// Figment reading the telemetry variables from the environment.
    ///
    /// Providers are evaluated when merged, so a fresh figment must be built for every read.
    pub fn figment() -> Figment {
        Figment::new().merge(Env::raw().only(ENV_KEYS))
    }

    pub fn load() -> Result<Self, ConfigError> {
        Self::extract(Self::figment())
    }

    pub fn extract(figment: Figment) -> Result<Self, ConfigError> {
        Ok(figment.extract()?)
    }

    /// The endpoint credential, or `None` when it is absent or blank.
    pub fn credential(&self) -> Option<&str> {
        non_blank(&self.endpoint_credential)
    }

    /// Resolves the environment label: explicit override, then deployment stage, then the default.
    pub fn environment(&self) -> &str {
        non_blank(&self.telemetry_environment)
            .or_else(|| non_blank(&self.stage))
            .unwrap_or(DEFAULT_ENVIRONMENT)
    }

    pub fn is_production(&self) -> bool {
        PRODUCTION_ENVIRONMENTS.contains(&self.environment())
    }

    pub fn sample_rate(&self) -> f32 {
        if self.is_production() {
            PRODUCTION_SAMPLE_RATE
        } else {
            DEFAULT_SAMPLE_RATE
        }
    }

    pub fn release(&self) -> Option<&str> {
        non_blank(&self.telemetry_release)
    }

    pub fn server_name(&self) -> Option<&str> {
        non_blank(&self.aws_lambda_function_name)
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
