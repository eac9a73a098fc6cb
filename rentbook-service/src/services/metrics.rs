use anyhow::anyhow;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static PAYMENT_METRICS: OnceLock<PaymentMetrics> = OnceLock::new();

/// Reconciliation counters exported next to the HTTP metrics.
pub struct PaymentMetrics {
    registry: Registry,
    initiated: IntCounterVec,
    gateway_outcomes: IntCounterVec,
    duplicate_deliveries: IntCounterVec,
    ledger_entries: IntCounterVec,
    reference_conflicts: IntCounter,
}

fn counter(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    IntCounterVec::new(Opts::new(name, help), labels)
        .unwrap_or_else(|e| panic!("invalid metric definition {}: {}", name, e))
}

impl PaymentMetrics {
    fn new() -> Self {
        let registry = Registry::new();

        let initiated = counter(
            "rentbook_payments_initiated_total",
            "Mobile money payments initiated by transaction type and result",
            &["type", "result"],
        );
        let gateway_outcomes = counter(
            "rentbook_gateway_outcomes_total",
            "Gateway results applied by source and outcome",
            &["source", "outcome"],
        );
        let duplicate_deliveries = counter(
            "rentbook_duplicate_deliveries_total",
            "Gateway results received for already settled transactions",
            &["source"],
        );
        let ledger_entries = counter(
            "rentbook_ledger_entries_appended_total",
            "Payment entries appended to lease payment histories",
            &["source"],
        );

        let reference_conflicts = IntCounter::with_opts(Opts::new(
            "rentbook_reference_conflicts_total",
            "Complete transactions whose receipt reference is held by another entry",
        ))
        .unwrap_or_else(|e| panic!("invalid metric definition: {}", e));
        if let Err(e) = registry.register(Box::new(reference_conflicts.clone())) {
            tracing::warn!(error = %e, "Failed to register payment metric");
        }

        for collector in [
            &initiated,
            &gateway_outcomes,
            &duplicate_deliveries,
            &ledger_entries,
        ] {
            if let Err(e) = registry.register(Box::new(collector.clone())) {
                tracing::warn!(error = %e, "Failed to register payment metric");
            }
        }

        Self {
            registry,
            initiated,
            gateway_outcomes,
            duplicate_deliveries,
            ledger_entries,
            reference_conflicts,
        }
    }
}

fn payment_metrics() -> &'static PaymentMetrics {
    PAYMENT_METRICS.get_or_init(PaymentMetrics::new)
}

/// Install the global `metrics` recorder used by the HTTP middleware.
pub fn init_metrics() -> anyhow::Result<()> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow!("failed to install Prometheus recorder: {}", e))?;
    METRICS_HANDLE
        .set(handle)
        .map_err(|_| anyhow!("metrics handle already initialized"))?;
    payment_metrics();
    Ok(())
}

pub fn get_metrics() -> String {
    let mut output = METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string());

    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = payment_metrics().registry.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).ok();
    if let Ok(custom_metrics) = String::from_utf8(buffer) {
        output.push_str(&custom_metrics);
    }

    output
}

pub fn record_initiation(transaction_type: &str, result: &str) {
    payment_metrics()
        .initiated
        .with_label_values(&[transaction_type, result])
        .inc();
}

pub fn record_gateway_outcome(source: &str, outcome: &str) {
    payment_metrics()
        .gateway_outcomes
        .with_label_values(&[source, outcome])
        .inc();
}

pub fn record_duplicate_delivery(source: &str) {
    payment_metrics()
        .duplicate_deliveries
        .with_label_values(&[source])
        .inc();
}

pub fn record_ledger_entry(source: &str) {
    payment_metrics()
        .ledger_entries
        .with_label_values(&[source])
        .inc();
}

pub fn record_reference_conflict() {
    payment_metrics().reference_conflicts.inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_counters_are_rendered() {
        record_ledger_entry("manual");
        record_duplicate_delivery("callback");
        record_reference_conflict();
        let rendered = get_metrics();
        assert!(rendered.contains("rentbook_ledger_entries_appended_total"));
        assert!(rendered.contains("rentbook_duplicate_deliveries_total"));
        assert!(rendered.contains("rentbook_reference_conflicts_total"));
    }
}
