//! End-to-end tests of the telemetry adapter against a Sentry client, see `tests/`.
