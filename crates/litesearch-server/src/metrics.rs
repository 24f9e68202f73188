use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram, register_histogram_vec,
    register_int_counter_vec, CounterVec, Gauge, Histogram, HistogramVec, IntCounterVec,
};

pub static OPS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!("litesearch_ops_total", "Operations by kind", &["op"]).unwrap()
});

pub static OP_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "litesearch_op_duration_seconds",
        "Operation latency by kind",
        &["op"]
    )
    .unwrap()
});

pub static WAL_ACTIVE_SEGMENTS: Lazy<Gauge> =
    Lazy::new(|| register_gauge!("wal_active_segments", "Current WAL segments").unwrap());

pub static SNAPSHOT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!("snapshot_total", "Snapshots by result", &["result"]).unwrap()
});

pub static SNAPSHOT_DURATION_SEC: Lazy<Histogram> =
    Lazy::new(|| register_histogram!("snapshot_duration_seconds", "Snapshot duration").unwrap());

/// Counts `op` and times it until the returned timer drops.
pub fn track(op: &str) -> prometheus::HistogramTimer {
    OPS_TOTAL.with_label_values(&[op]).inc();
    OP_DURATION.with_label_values(&[op]).start_timer()
}
