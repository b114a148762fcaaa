use crate::event_handler::HandlerDeps;
use event_handler::function_handler;
use lambda_runtime::{run, service_fn, Error};

mod event_handler;

#[tokio::main]
async fn main() -> Result<(), Error> {
    telemetry::logging::init();
    let deps = HandlerDeps {
        telemetry: telemetry::global().clone(),
    };
    let handler = telemetry::wrap_handler(|event| function_handler(&deps, event));

    run(service_fn(|event| handler.call(event))).await
}
