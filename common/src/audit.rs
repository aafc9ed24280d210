use std::sync::Arc;

/// The audit-event emitter is an external collaborator (out of scope); this
/// trait is the narrow interface the group and drivers consume. The
/// default `TracingAuditSink` just logs structured events, which is enough
/// for local runs and tests.
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: &str, domain: &str, operation_id: &str, detail: &str);
}

#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: &str, domain: &str, operation_id: &str, detail: &str) {
        tracing::info!(
            audit_event = event,
            domain,
            operation_id,
            detail,
            "audit"
        );
    }
}

pub type SharedAuditSink = Arc<dyn AuditSink>;

pub fn tracing_audit_sink() -> SharedAuditSink {
    Arc::new(TracingAuditSink)
}
