use std::collections::BTreeMap;

use lambda_runtime::{Error, LambdaEvent};
use serde::{Deserialize, Serialize};
use serde_json::json;
use telemetry::TelemetryAdapter;

pub(crate) struct HandlerDeps {
    pub telemetry: TelemetryAdapter,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct GreetRequest {
    pub name: Option<String>,
    pub user_id: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, PartialEq, Serialize)]
pub(crate) struct GreetResponse {
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum GreetError {
    #[error("name must not be empty")]
    MissingName,
}

#[tracing::instrument(skip(deps, event), fields(request_id = %event.context.request_id))]
pub(crate) async fn function_handler(
    deps: &HandlerDeps,
    event: LambdaEvent<GreetRequest>,
) -> Result<GreetResponse, Error> {
    let request = event.payload;

    if let Some(user_id) = &request.user_id {
        let mut user_data = BTreeMap::new();
        if let Some(email) = &request.email {
            user_data.insert("email".to_string(), json!(email));
        }
        deps.telemetry.set_user(user_id, user_data);
    }

    let name = request
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty());

    let mut data = BTreeMap::new();
    data.insert("has_name".to_string(), json!(name.is_some()));
    deps.telemetry
        .add_breadcrumb("greeting requested", Some("greet"), None, data);

    match name {
        Some(name) => {
            tracing::info!("Greeting {}", name);
            Ok(GreetResponse {
                message: format!("Hello, {name}!"),
            })
        }
        None => {
            tracing::warn!("Rejecting greeting without a name");
            Err(Box::new(GreetError::MissingName))
        }
    }
}
