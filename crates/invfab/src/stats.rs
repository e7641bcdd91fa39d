//! Run statistics.
//!
//! Workers count locally without any synchronization; the dispatcher sums
//! worker counters after the end barrier, peer compute nodes ship their
//! sums to the initiator over the bootstrap channel, and the initiator
//! prints one JSON object on stdout.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Additive run counters.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Counters {
    pub universe_size: u64,
    pub num_queries: u64,
    pub num_read_queries: u64,
    pub num_insert_queries: u64,
    pub num_result: u64,
    pub total_initial_index_size: u64,
    pub total_index_buffer_size: u64,
    pub remote_reads_in_bytes: u64,
    pub allocated_read_buffers_size: u64,
    pub catalog_size: u64,
    pub remote_allocations: u64,
    pub remote_deallocations: u64,
    pub block_repeated_reads: u64,
    pub list_repeated_reads: u64,
    pub locking_failed: u64,
    pub read_failed: u64,
    pub wait_for_write: u64,
}

impl Counters {
    pub fn merge(&mut self, other: &Counters) {
        self.num_result += other.num_result;
        self.remote_reads_in_bytes += other.remote_reads_in_bytes;
        self.remote_allocations += other.remote_allocations;
        self.remote_deallocations += other.remote_deallocations;
        self.block_repeated_reads += other.block_repeated_reads;
        self.list_repeated_reads += other.list_repeated_reads;
        self.locking_failed += other.locking_failed;
        self.read_failed += other.read_failed;
        self.wait_for_write += other.wait_for_write;
        self.allocated_read_buffers_size += other.allocated_read_buffers_size;
    }
}

/// The full report: counters, derived rates, topology metadata, timings.
#[derive(Debug, Default)]
pub struct Statistics {
    pub counters: Counters,
    meta: BTreeMap<String, Value>,
    timings: BTreeMap<String, f64>,
    derived: BTreeMap<String, Value>,
}

impl Statistics {
    pub fn new() -> Self {
        Statistics::default()
    }

    pub fn add_meta(&mut self, key: &str, value: impl Into<Value>) {
        self.meta.insert(key.to_string(), value.into());
    }

    pub fn add_timing(&mut self, name: &str, ms: f64) {
        self.timings.insert(name.to_string(), ms);
    }

    pub fn add_derived(&mut self, key: &str, value: impl Into<Value>) {
        self.derived.insert(key.to_string(), value.into());
    }

    pub fn to_json(&self) -> Value {
        let mut root = match serde_json::to_value(&self.counters) {
            Ok(Value::Object(map)) => map,
            _ => unreachable!("Counters serializes to an object"),
        };
        for (k, v) in &self.derived {
            root.insert(k.clone(), v.clone());
        }
        root.insert("meta".into(), json!(self.meta));
        root.insert("timings".into(), json!(self.timings));
        Value::Object(root)
    }

    pub fn render(&self) -> String {
        serde_json::to_string_pretty(&self.to_json()).expect("statistics serialize")
    }
}
