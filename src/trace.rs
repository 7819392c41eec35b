//! Execution traces.
//!
//! One entry per executed IR record, in execution order, with resolved
//! arguments and the provider's result. Serialized as JSON lines for the
//! CLI and as a JSON array for programmatic consumers. `duration_nanos` is
//! the only non-deterministic field; comparisons ignore it.

use std::collections::BTreeMap;

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct TraceEntry {
    pub op: String,
    pub args: BTreeMap<String, serde_json::Value>,
    pub result: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_nanos: u64,
}

impl TraceEntry {
    /// Equality modulo `duration_nanos`.
    pub fn same_outcome(&self, other: &TraceEntry) -> bool {
        self.op == other.op
            && self.args == other.args
            && self.result == other.result
            && self.error == other.error
    }
}

pub type Trace = Vec<TraceEntry>;

pub fn to_json_lines(trace: &[TraceEntry]) -> String {
    trace
        .iter()
        .map(|entry| serde_json::to_string(entry).expect("trace serialization is infallible"))
        .collect::<Vec<_>>()
        .join("\n")
}
