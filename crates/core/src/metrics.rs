//! Metrics definitions for the indexer.
//!
//! This module defines all metrics used throughout the indexer.
//! Metrics are collected using the `metrics` crate and can be exported
//! to Prometheus via `metrics-exporter-prometheus`.

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use std::time::Instant;

/// Initialize all metric descriptions.
/// Call this once at startup before any metrics are recorded.
pub fn init_metrics() {
    describe_counter!(
        "blocks_indexed_total",
        "Total number of blocks fully processed per domain"
    );
    describe_counter!(
        "decode_errors_total",
        "Total number of raw logs/events that could not be decoded"
    );
    describe_counter!(
        "handler_errors_total",
        "Total number of bridge events whose persistence failed"
    );
    describe_counter!(
        "events_skipped_total",
        "Total number of bridge events skipped by policy"
    );
    describe_counter!(
        "price_lookup_failures_total",
        "Total number of USD price lookups that failed and defaulted to zero"
    );
    describe_counter!(
        "window_failures_total",
        "Total number of block windows that failed and were retried"
    );
    describe_gauge!(
        "last_indexed_block",
        "Last block number checkpointed per domain"
    );
    describe_histogram!(
        "window_processing_duration_seconds",
        "Time taken to process a block window in seconds"
    );
}

/// Record a fully processed block.
pub fn record_block_indexed(domain: &str) {
    record_blocks_indexed(domain, 1);
}

/// Record a fully processed block range.
pub fn record_blocks_indexed(domain: &str, count: u64) {
    counter!("blocks_indexed_total", "domain" => domain.to_string()).increment(count);
}

/// Record a decode error.
///
/// # Arguments
/// * `domain` - Domain name
/// * `kind` - What failed to decode ("log" or "event")
pub fn record_decode_error(domain: &str, kind: &str) {
    counter!("decode_errors_total", "domain" => domain.to_string(), "kind" => kind.to_string())
        .increment(1);
}

/// Record a persistence failure for one bridge event.
pub fn record_handler_error(family: &str) {
    counter!("handler_errors_total", "family" => family.to_string()).increment(1);
}

/// Record a skipped bridge event.
///
/// # Arguments
/// * `reason` - "blacklisted" or "already_executed"
pub fn record_event_skipped(reason: &str) {
    counter!("events_skipped_total", "reason" => reason.to_string()).increment(1);
}

/// Record a failed price lookup.
pub fn record_price_lookup_failure(symbol: &str) {
    counter!("price_lookup_failures_total", "symbol" => symbol.to_string()).increment(1);
}

/// Record a failed block window.
pub fn record_window_failure(domain: &str) {
    counter!("window_failures_total", "domain" => domain.to_string()).increment(1);
}

/// Record the checkpoint written for a domain.
pub fn record_checkpoint(domain: &str, block: u64) {
    gauge!("last_indexed_block", "domain" => domain.to_string()).set(block as f64);
}

/// Record window processing duration.
pub fn record_window_processing_duration(duration_secs: f64) {
    histogram!("window_processing_duration_seconds").record(duration_secs);
}

/// A timer that automatically records window duration when dropped.
pub struct ProcessingTimer {
    start: Instant,
}

impl ProcessingTimer {
    /// Start a new processing timer.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for ProcessingTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessingTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        record_window_processing_duration(duration);
    }
}
