// Plugin registry - dispatches a step to its Activity by `plugin` string.
//
// Grounded on everruns_core::tools::ToolRegistry: same HashMap<String, Arc<dyn
// T>> shape, same accessor names renamed to the plugin domain, same builder.

use std::collections::HashMap;
use std::sync::Arc;

use crate::plugin::Activity;

/// Process-wide table of step executors, keyed by the lowercase `plugin:`
/// string named in suite YAML (spec.md S4.2). Built once at process start
/// (spec.md S9 "Global registry & logger") and handed to the workflow runtime;
/// nothing mutates it after startup.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn Activity>>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.plugin_names())
            .finish()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> PluginRegistryBuilder {
        PluginRegistryBuilder::default()
    }

    pub fn register(&mut self, activity: impl Activity + 'static) {
        self.register_arc(Arc::new(activity));
    }

    pub fn register_boxed(&mut self, activity: Box<dyn Activity>) {
        self.plugins
            .insert(activity.plugin_type().to_string(), Arc::from(activity));
    }

    pub fn register_arc(&mut self, activity: Arc<dyn Activity>) {
        self.plugins
            .insert(activity.plugin_type().to_string(), activity);
    }

    pub fn get(&self, plugin: &str) -> Option<Arc<dyn Activity>> {
        self.plugins.get(plugin).cloned()
    }

    pub fn has(&self, plugin: &str) -> bool {
        self.plugins.contains_key(plugin)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.plugins.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn unregister(&mut self, plugin: &str) -> Option<Arc<dyn Activity>> {
        self.plugins.remove(plugin)
    }

    pub fn clear(&mut self) {
        self.plugins.clear();
    }
}

/// Fluent construction helper, mirroring `ToolRegistryBuilder`.
#[derive(Default)]
pub struct PluginRegistryBuilder {
    registry: PluginRegistry,
}

impl PluginRegistryBuilder {
    pub fn with(mut self, activity: impl Activity + 'static) -> Self {
        self.registry.register(activity);
        self
    }

    pub fn with_arc(mut self, activity: Arc<dyn Activity>) -> Self {
        self.registry.register_arc(activity);
        self
    }

    pub fn build(self) -> PluginRegistry {
        self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::plugin::{ActivityInput, ActivityOutput};
    use async_trait::async_trait;

    struct EchoActivity;

    #[async_trait]
    impl Activity for EchoActivity {
        fn plugin_type(&self) -> &'static str {
            "echo"
        }

        async fn execute(&self, _input: ActivityInput) -> Result<ActivityOutput> {
            Ok(ActivityOutput::new())
        }
    }

    #[test]
    fn register_and_lookup_by_plugin_type() {
        let mut registry = PluginRegistry::new();
        registry.register(EchoActivity);
        assert!(registry.has("echo"));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn builder_composes_multiple_plugins() {
        let registry = PluginRegistry::builder().with(EchoActivity).build();
        assert_eq!(registry.plugin_names(), vec!["echo"]);
    }

    #[test]
    fn unregister_removes_entry() {
        let mut registry = PluginRegistry::builder().with(EchoActivity).build();
        assert!(registry.unregister("echo").is_some());
        assert!(registry.is_empty());
    }
}
