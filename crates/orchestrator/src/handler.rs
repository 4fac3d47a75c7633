use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serplens_core::PhaseOutput;

use crate::context::PhaseContext;

/// A named unit of pipeline work supplied by the application.
///
/// Handlers signal failure either by returning `PhaseOutput` with
/// `success: false` or by returning an error; the runner records both
/// identically. A handler is invoked at most once per run attempt and
/// must not assume it runs on any particular task or thread.
#[async_trait]
pub trait PhaseHandler: Send + Sync {
    async fn execute(&self, ctx: &PhaseContext) -> anyhow::Result<PhaseOutput>;
}

/// Maps phase names to the handlers that execute them.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn PhaseHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `phase_name`, replacing any previous handler.
    pub fn register(
        &mut self,
        phase_name: impl Into<String>,
        handler: impl PhaseHandler + 'static,
    ) {
        self.handlers.insert(phase_name.into(), Arc::new(handler));
    }

    pub fn get(&self, phase_name: &str) -> Option<Arc<dyn PhaseHandler>> {
        self.handlers.get(phase_name).cloned()
    }

    pub fn contains(&self, phase_name: &str) -> bool {
        self.handlers.contains_key(phase_name)
    }

    /// Names from `phases` that have no registered handler.
    pub fn missing_from<'a>(&self, phases: impl IntoIterator<Item = &'a String>) -> Vec<String> {
        phases
            .into_iter()
            .filter(|phase| !self.handlers.contains_key(phase.as_str()))
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("phases", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    #[async_trait]
    impl PhaseHandler for NoopHandler {
        async fn execute(&self, _ctx: &PhaseContext) -> anyhow::Result<PhaseOutput> {
            Ok(PhaseOutput::success(serde_json::json!({})))
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = HandlerRegistry::new();
        assert!(!registry.contains("serp_collection"));

        registry.register("serp_collection", NoopHandler);
        assert!(registry.contains("serp_collection"));
        assert!(registry.get("serp_collection").is_some());
        assert!(registry.get("keyword_metrics").is_none());
    }

    #[test]
    fn test_missing_from_reports_unregistered_phases() {
        let mut registry = HandlerRegistry::new();
        registry.register("keyword_metrics", NoopHandler);

        let enabled = vec![
            "keyword_metrics".to_string(),
            "serp_collection".to_string(),
            "content_scraping".to_string(),
        ];
        let missing = registry.missing_from(&enabled);
        assert_eq!(missing, vec!["serp_collection", "content_scraping"]);
    }
}
