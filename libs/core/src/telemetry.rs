use gsm_telemetry::{TelemetryLabels, record_counter};

use crate::types::{ConnectionState, TenantId};

pub(crate) fn state_transition(tenant: &TenantId, state: ConnectionState) {
    let labels = TelemetryLabels::new(tenant.as_str()).with("state", state.as_str());
    record_counter("session_state_transitions_total", 1, &labels);
}

pub(crate) fn reconnect_scheduled(tenant: &TenantId) {
    record_counter(
        "session_reconnects_scheduled_total",
        1,
        &TelemetryLabels::new(tenant.as_str()),
    );
}

pub(crate) fn session_failed(tenant: &TenantId) {
    record_counter(
        "session_failed_total",
        1,
        &TelemetryLabels::new(tenant.as_str()),
    );
}

pub(crate) fn inbound(tenant: &TenantId, verdict: &'static str) {
    let labels = TelemetryLabels::new(tenant.as_str()).with("verdict", verdict);
    record_counter("inbound_messages_total", 1, &labels);
}

pub(crate) fn outbound(tenant: &TenantId, outcome: &'static str) {
    let labels = TelemetryLabels::new(tenant.as_str()).with("outcome", outcome);
    record_counter("outbound_messages_total", 1, &labels);
}
