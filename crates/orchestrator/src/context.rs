use std::collections::HashMap;

use serde_json::Value;
use uuid::Uuid;

/// Everything a handler gets to see when it runs: the execution-level
/// configuration plus the stored outputs of its completed upstream phases,
/// keyed by phase name.
#[derive(Debug, Clone)]
pub struct PhaseContext {
    pub execution_id: Uuid,
    pub phase_name: String,
    pub config: Value,
    pub upstream: HashMap<String, Value>,
}

impl PhaseContext {
    pub fn new(
        execution_id: Uuid,
        phase_name: impl Into<String>,
        config: Value,
        upstream: HashMap<String, Value>,
    ) -> Self {
        Self {
            execution_id,
            phase_name: phase_name.into(),
            config,
            upstream,
        }
    }

    /// Stored output of an upstream phase, if that phase completed.
    pub fn upstream_output(&self, phase_name: &str) -> Option<&Value> {
        self.upstream.get(phase_name)
    }
}
