use std::collections::BTreeMap;
use std::sync::Arc;

use lambda_runtime::{Context, LambdaEvent};
use sentry::protocol::Event;
use sentry::test::TestTransport;
use sentry::Level;
use serde_json::{json, Value};
use telemetry::{ScopeContext, SentryBackend, Severity, TelemetryAdapter, TelemetryStatus};

const DSN: &str = "https://public@sentry.invalid/1";

fn enabled_adapter(environment: &str) -> (TelemetryAdapter, Arc<TestTransport>) {
    let transport = TestTransport::new();
    let backend = SentryBackend::new().transport(transport.clone());
    let environment = environment.to_string();
    let adapter = TelemetryAdapter::builder(backend)
        .config_loader(move || {
            figment::Figment::from(figment::providers::Serialized::defaults(json!({
                "endpoint_credential": DSN,
                "telemetry_environment": environment,
            })))
        })
        .build();

    assert_eq!(adapter.initialize(), TelemetryStatus::Enabled);
    (adapter, transport)
}

fn exception_value<'a>(event: &'a Event<'static>) -> Option<&'a str> {
    event
        .exception
        .values
        .first()
        .and_then(|exception| exception.value.as_deref())
}

#[derive(Debug)]
struct Boom;

impl std::fmt::Display for Boom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "boom")
    }
}

impl std::error::Error for Boom {}

#[test]
fn when_capturing_with_scope_should_not_leak_into_next_capture() {
    let (adapter, transport) = enabled_adapter("staging");

    adapter.capture_exception(&Boom, &ScopeContext::new().tag("a", "1").extra("b", 2));
    adapter.capture_message("unrelated", Severity::Info, &ScopeContext::default());

    let events = transport.fetch_and_clear_events();
    assert_eq!(events.len(), 2);

    assert_eq!(exception_value(&events[0]), Some("boom"));
    assert_eq!(events[0].tags.get("a").map(String::as_str), Some("1"));
    assert_eq!(events[0].extra.get("b"), Some(&json!(2)));
    assert_eq!(events[0].environment.as_deref(), Some("staging"));

    assert_eq!(events[1].message.as_deref(), Some("unrelated"));
    assert_eq!(events[1].level, Level::Info);
    assert!(!events[1].tags.contains_key("a"));
    assert!(!events[1].extra.contains_key("b"));
}

#[test]
fn when_capture_carries_user_should_not_replace_ambient_user() {
    let (adapter, transport) = enabled_adapter("staging");
    adapter.set_user("ambient", BTreeMap::new());

    adapter.capture_message(
        "scoped",
        Severity::Warning,
        &ScopeContext::new().user(telemetry::UserIdentity::new("scoped-user")),
    );
    adapter.capture_message("ambient", Severity::Info, &ScopeContext::default());

    let events = transport.fetch_and_clear_events();
    let user_id = |event: &Event<'static>| event.user.as_ref().and_then(|u| u.id.clone());
    assert_eq!(user_id(&events[0]).as_deref(), Some("scoped-user"));
    assert_eq!(user_id(&events[1]).as_deref(), Some("ambient"));
}

#[test]
fn when_user_set_should_apply_until_cleared() {
    let (adapter, transport) = enabled_adapter("staging");
    let mut user_data = BTreeMap::new();
    user_data.insert("email".to_string(), json!("jane@example.com"));
    user_data.insert("plan".to_string(), json!("pro"));

    adapter.set_user("user-1", user_data);
    adapter.capture_message("with user", Severity::Info, &ScopeContext::default());
    adapter.clear_user();
    adapter.capture_message("without user", Severity::Info, &ScopeContext::default());

    let events = transport.fetch_and_clear_events();
    let user = events[0].user.as_ref().unwrap();
    assert_eq!(user.id.as_deref(), Some("user-1"));
    assert_eq!(user.email.as_deref(), Some("jane@example.com"));
    assert_eq!(user.other.get("plan"), Some(&json!("pro")));
    assert!(events[1].user.is_none());
}

#[test]
fn when_breadcrumbs_added_should_attach_to_later_events() {
    let (adapter, transport) = enabled_adapter("staging");
    let mut data = BTreeMap::new();
    data.insert("order_id".to_string(), json!("o-1"));

    adapter.add_breadcrumb("loaded order", Some("db"), Some(Severity::Warning), data);
    adapter.add_breadcrumb("rendering", None, None, BTreeMap::new());
    adapter.capture_exception(&Boom, &ScopeContext::default());

    let events = transport.fetch_and_clear_events();
    let breadcrumbs = &events[0].breadcrumbs.values;
    assert_eq!(breadcrumbs.len(), 2);
    assert_eq!(breadcrumbs[0].message.as_deref(), Some("loaded order"));
    assert_eq!(breadcrumbs[0].category.as_deref(), Some("db"));
    assert_eq!(breadcrumbs[0].level, Level::Warning);
    assert_eq!(breadcrumbs[0].data.get("order_id"), Some(&json!("o-1")));
    assert_eq!(breadcrumbs[1].category.as_deref(), Some("default"));
    assert_eq!(breadcrumbs[1].level, Level::Info);
}

#[test]
fn when_capturing_concurrently_should_keep_scopes_apart() {
    let (adapter, transport) = enabled_adapter("staging");

    let threads: Vec<_> = (0..8)
        .map(|i| {
            let adapter = adapter.clone();
            std::thread::spawn(move || {
                let scope = ScopeContext::new()
                    .tag("worker", i.to_string())
                    .extra(format!("only_{i}"), i);
                adapter.capture_message(&format!("worker {i}"), Severity::Info, &scope);
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    let events = transport.fetch_and_clear_events();
    assert_eq!(events.len(), 8);
    for event in events {
        let message = event.message.as_deref().unwrap();
        let worker = event.tags.get("worker").unwrap();
        assert_eq!(message, format!("worker {worker}"));
        assert_eq!(event.extra.len(), 1);
        assert!(event.extra.contains_key(&format!("only_{worker}")));
    }
}

#[test]
fn when_production_should_use_low_sample_rate() {
    let (prod, _) = enabled_adapter("prod");
    let (staging, _) = enabled_adapter("staging");

    assert_eq!(prod.settings().unwrap().sample_rate, 0.1);
    assert_eq!(staging.settings().unwrap().sample_rate, 1.0);
}

#[test]
fn when_credential_is_malformed_should_stay_disabled() {
    let transport = TestTransport::new();
    let adapter = TelemetryAdapter::builder(SentryBackend::new().transport(transport.clone()))
        .config_loader(|| {
            figment::Figment::from(figment::providers::Serialized::defaults(json!({
                "endpoint_credential": "not a dsn",
            })))
        })
        .build();

    assert_eq!(adapter.initialize(), TelemetryStatus::Disabled);
    adapter.capture_exception(&Boom, &ScopeContext::default());

    assert!(transport.fetch_and_clear_events().is_empty());
}

#[tokio::test]
async fn when_wrapped_handler_fails_should_report_and_return_error() {
    let (adapter, transport) = enabled_adapter("staging");
    let handler = adapter.wrap_handler(|event: LambdaEvent<Value>| async move {
        let order_id = event.payload["order_id"].as_str().unwrap_or_default().to_string();
        Err::<Value, _>(anyhow::anyhow!("order {order_id} not found"))
    });
    let mut context = Context::default();
    context.request_id = "req-42".to_string();

    let result = handler
        .call(LambdaEvent::new(json!({ "order_id": "o-9" }), context))
        .await;

    assert_eq!(result.unwrap_err().to_string(), "order o-9 not found");
    let events = transport.fetch_and_clear_events();
    assert_eq!(events.len(), 1);
    assert_eq!(exception_value(&events[0]), Some("order o-9 not found"));
    assert_eq!(
        events[0].tags.get("aws_request_id").map(String::as_str),
        Some("req-42")
    );
}

#[tokio::test]
async fn when_wrapped_handler_succeeds_should_report_nothing() {
    let (adapter, transport) = enabled_adapter("staging");
    let handler = adapter.wrap_handler(|event: LambdaEvent<Value>| async move {
        Ok::<_, anyhow::Error>(json!({ "echo": event.payload }))
    });

    let result = handler
        .call(LambdaEvent::new(json!("hi"), Context::default()))
        .await;

    assert_eq!(result.unwrap(), json!({ "echo": "hi" }));
    assert!(transport.fetch_and_clear_events().is_empty());
}
