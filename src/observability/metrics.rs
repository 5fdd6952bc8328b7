//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gate_requests_total` (counter): requests by outcome (forwarded, preflight, denied)
//! - `gate_denials_total` (counter): denials by reason
//! - `gate_bans_total` (counter): bans by source (escalation, manual)
//! - `gate_pipeline_duration_seconds` (histogram): time spent in the gate and handler
//! - `gate_active_windows` (gauge): identifiers with a tracked window
//! - `gate_banned_identifiers` (gauge): current ban set size
//! - `gate_sweep_evictions_total` (counter): entries reclaimed by the sweeper
//!
//! Without an installed recorder every call is a no-op, so library users and
//! tests pay nothing.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(outcome: &'static str, start: Instant) {
    counter!("gate_requests_total", "outcome" => outcome).increment(1);
    histogram!("gate_pipeline_duration_seconds", "outcome" => outcome)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_denial(reason: &'static str) {
    counter!("gate_denials_total", "reason" => reason).increment(1);
}

pub fn record_ban(source: &'static str) {
    counter!("gate_bans_total", "source" => source).increment(1);
}

pub fn record_active_windows(count: usize) {
    gauge!("gate_active_windows").set(count as f64);
}

pub fn record_banned_identifiers(count: usize) {
    gauge!("gate_banned_identifiers").set(count as f64);
}

pub fn record_sweep(evicted: usize) {
    counter!("gate_sweep_evictions_total").increment(evicted as u64);
}
