use std::error::Error as StdError;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};

use futures::FutureExt;
use lambda_runtime::LambdaEvent;

use crate::adapter::{panic_message, TelemetryAdapter};
use crate::scope::{ScopeContext, Severity};

/// A request a wrapped handler can be invoked with.
///
/// The returned scope is attached to everything reported while the invocation runs.
pub trait Invocation {
    fn scope(&self) -> ScopeContext {
        ScopeContext::default()
    }
}

impl<T> Invocation for LambdaEvent<T> {
    fn scope(&self) -> ScopeContext {
        let mut scope = ScopeContext::new()
            .tag("aws_request_id", self.context.request_id.clone())
            .tag("function_arn", self.context.invoked_function_arn.clone());
        if let Some(trace_id) = &self.context.xray_trace_id {
            scope = scope.extra("xray_trace_id", trace_id.clone());
        }
        scope
    }
}

impl Invocation for serde_json::Value {}

impl Invocation for () {}

/// A handler returned by [`TelemetryAdapter::wrap_handler`].
pub enum Instrumented<F> {
    /// Telemetry is disabled; calls go straight to the handler.
    Passthrough(F),
    Wrapped { handler: F, adapter: TelemetryAdapter },
}

impl<F> Instrumented<F> {
    pub fn is_passthrough(&self) -> bool {
        matches!(self, Instrumented::Passthrough(_))
    }

    /// Returns the handler that was wrapped.
    pub fn into_inner(self) -> F {
        match self {
            Instrumented::Passthrough(handler) => handler,
            Instrumented::Wrapped { handler, .. } => handler,
        }
    }

    /// Invokes the handler with `request`.
    ///
    /// When wrapped, a warning is reported if the handler is still running after the configured
    /// threshold, errors and panics are reported before they are handed back to the caller, and
    /// telemetry is flushed before returning.
    pub async fn call<Req, Fut, Resp, E>(&self, request: Req) -> Result<Resp, E>
    where
        F: Fn(Req) -> Fut,
        Fut: Future<Output = Result<Resp, E>>,
        Req: Invocation,
        E: AsRef<dyn StdError + Send + Sync + 'static>,
    {
        match self {
            Instrumented::Passthrough(handler) => handler(request).await,
            Instrumented::Wrapped { handler, adapter } => {
                invoke(adapter, handler, request).await
            }
        }
    }
}

async fn invoke<F, Req, Fut, Resp, E>(
    adapter: &TelemetryAdapter,
    handler: &F,
    request: Req,
) -> Result<Resp, E>
where
    F: Fn(Req) -> Fut,
    Fut: Future<Output = Result<Resp, E>>,
    Req: Invocation,
    E: AsRef<dyn StdError + Send + Sync + 'static>,
{
    let scope = request.scope();
    let timeouts = adapter.timeouts();

    let invocation = AssertUnwindSafe(handler(request)).catch_unwind();
    tokio::pin!(invocation);
    let timeout_warning = tokio::time::sleep(timeouts.timeout_warning);
    tokio::pin!(timeout_warning);

    let outcome = tokio::select! {
        biased;
        outcome = &mut invocation => outcome,
        () = &mut timeout_warning => {
            let message = format!(
                "invocation still running after {}ms, possible function timeout",
                timeouts.timeout_warning.as_millis()
            );
            adapter.log_warning(&message);
            adapter.capture_message(&message, Severity::Warning, &scope);
            invocation.await
        }
    };

    match &outcome {
        Ok(Ok(_)) => {}
        Ok(Err(error)) => adapter.capture_exception(error.as_ref(), &scope),
        Err(payload) => adapter.capture_message(
            &format!("handler panicked: {}", panic_message(&**payload)),
            Severity::Error,
            &scope,
        ),
    }

    adapter.flush(timeouts.flush_timeout).await;

    match outcome {
        Ok(result) => result,
        Err(payload) => panic::resume_unwind(payload),
    }
}
