// Workflow type registry - string `workflow_type` to `WorkflowFactory`, the
// same shape as rocketship_core::registry::PluginRegistry, just keyed on
// workflow type name instead of plugin name.

use std::collections::HashMap;

use crate::suite_workflow::SuiteWorkflow;
use crate::test_workflow::TestWorkflow;
use crate::traits::{WorkflowFactory, WorkflowInput};

#[derive(Default)]
pub struct WorkflowRegistry {
    factories: HashMap<String, WorkflowFactory>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<W: WorkflowInput>(&mut self) -> &mut Self {
        self.factories
            .insert(W::WORKFLOW_TYPE.to_string(), W::factory());
        self
    }

    pub fn get(&self, workflow_type: &str) -> Option<&WorkflowFactory> {
        self.factories.get(workflow_type)
    }

    pub fn workflow_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }
}

/// The registry every runner (in-process or Temporal) dispatches against.
pub fn builtin_registry() -> WorkflowRegistry {
    let mut registry = WorkflowRegistry::new();
    registry.register::<SuiteWorkflow>();
    registry.register::<TestWorkflow>();
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_knows_both_workflow_types() {
        let registry = builtin_registry();
        assert_eq!(registry.workflow_types(), vec!["SuiteWorkflow", "TestWorkflow"]);
        assert!(registry.get("SuiteWorkflow").is_some());
        assert!(registry.get("TestWorkflow").is_some());
        assert!(registry.get("NoSuchWorkflow").is_none());
    }
}
