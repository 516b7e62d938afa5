//! Metrics for courier.
//!
//! Metric names live in [`definitions`]; recording goes through the `metrics`
//! crate facade, which is a no-op until [`init_metrics`] installs a recorder.
//! With the `prometheus` feature the recorder renders the text exposition
//! format for the `/metrics` endpoint.
//!
//! ```rust,ignore
//! use courier_metrics::{counter, ingest};
//!
//! counter!(ingest::MALFORMED_TOTAL).increment(1);
//! ```

mod definitions;
mod recorder;

pub use {
    definitions::*,
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

pub use metrics::{counter, gauge, histogram};
