//! Prometheus counters for the checkout flow, exposed at `/metrics`.

use crate::domain::{EntryReason, PaymentMethod, PaymentPurpose, PaymentStatus};
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

struct Metrics {
    registry: Registry,
    intents_created: IntCounterVec,
    intents_resolved: IntCounterVec,
    ledger_entries: IntCounterVec,
    webhooks_rejected: IntCounterVec,
    invalid_transitions: IntCounterVec,
    settlements_parked: IntCounterVec,
}

fn counter(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    // Names and labels are static and valid; construction cannot fail.
    IntCounterVec::new(Opts::new(name, help), labels)
        .unwrap_or_else(|e| panic!("invalid metric definition {}: {}", name, e))
}

static METRICS: Lazy<Metrics> = Lazy::new(|| {
    let registry = Registry::new();
    let metrics = Metrics {
        intents_created: counter(
            "payment_intents_created_total",
            "Payment intents created",
            &["purpose", "method"],
        ),
        intents_resolved: counter(
            "payment_intents_resolved_total",
            "Payment intents reaching a terminal status",
            &["status"],
        ),
        ledger_entries: counter(
            "ledger_entries_total",
            "Ledger entries appended",
            &["reason"],
        ),
        webhooks_rejected: counter(
            "gateway_webhooks_rejected_total",
            "Gateway webhooks refused before any state change",
            &["gateway", "cause"],
        ),
        invalid_transitions: counter(
            "payment_invalid_transitions_total",
            "Refused payment intent transitions",
            &["from", "to"],
        ),
        settlements_parked: counter(
            "payment_settlements_parked_total",
            "Terminal intents whose side effects were given up on",
            &["status"],
        ),
        registry,
    };

    for c in [
        &metrics.intents_created,
        &metrics.intents_resolved,
        &metrics.ledger_entries,
        &metrics.webhooks_rejected,
        &metrics.invalid_transitions,
        &metrics.settlements_parked,
    ] {
        if let Err(e) = metrics.registry.register(Box::new(c.clone())) {
            tracing::warn!("Failed to register metric: {}", e);
        }
    }
    metrics
});

pub fn record_intent_created(purpose: PaymentPurpose, method: PaymentMethod) {
    METRICS
        .intents_created
        .with_label_values(&[purpose.as_str(), method.as_str()])
        .inc();
}

pub fn record_intent_resolved(status: PaymentStatus) {
    METRICS
        .intents_resolved
        .with_label_values(&[status.as_str()])
        .inc();
}

pub fn record_ledger_entry(reason: EntryReason) {
    METRICS
        .ledger_entries
        .with_label_values(&[reason.as_str()])
        .inc();
}

pub fn record_webhook_rejected(gateway: &str, cause: &str) {
    METRICS
        .webhooks_rejected
        .with_label_values(&[gateway, cause])
        .inc();
}

pub fn record_invalid_transition(from: PaymentStatus, to: PaymentStatus) {
    METRICS
        .invalid_transitions
        .with_label_values(&[from.as_str(), to.as_str()])
        .inc();
}

pub fn record_settlement_parked(status: PaymentStatus) {
    METRICS
        .settlements_parked
        .with_label_values(&[status.as_str()])
        .inc();
}

/// Text exposition format.
pub fn render() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&METRICS.registry.gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}
