use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::{FleetError, FleetResult};
use crate::traits::TaskHandler;

/// 任务类型到处理器的映射，进程启动时显式构建
#[derive(Clone, Default)]
pub struct TaskRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(handler.kind().to_string(), handler);
    }

    pub fn with_handler(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn get(&self, kind: &str) -> FleetResult<Arc<dyn TaskHandler>> {
        self.handlers
            .get(kind)
            .cloned()
            .ok_or_else(|| FleetError::UnknownTaskKind {
                kind: kind.to_string(),
            })
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.handlers.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::TaskContext;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl TaskHandler for Noop {
        fn kind(&self) -> &str {
            "noop"
        }

        async fn run(&self, _ctx: &TaskContext) -> FleetResult<bool> {
            Ok(true)
        }
    }

    #[test]
    fn test_lookup_by_kind() {
        let registry = TaskRegistry::new().with_handler(Arc::new(Noop));
        assert!(registry.contains("noop"));
        assert_eq!(registry.kinds(), vec!["noop".to_string()]);
        assert!(registry.get("noop").is_ok());
        assert!(matches!(
            registry.get("python"),
            Err(FleetError::UnknownTaskKind { .. })
        ));
    }
}
