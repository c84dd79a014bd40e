// Built-in step plugins, one module per `plugin:` type named in spec.md S4.2.

pub mod browser;
pub mod delay;
pub mod http;
pub mod log;
pub mod script;
pub mod sql;

use std::path::PathBuf;

use rocketship_core::PluginRegistry;

/// Build a registry carrying every built-in plugin, the way a process entry
/// point does explicit construction at startup (spec.md S9 "Global registry").
pub fn builtin_registry(run_dir: PathBuf) -> PluginRegistry {
    PluginRegistry::builder()
        .with(http::HttpActivity::new())
        .with(delay::DelayActivity)
        .with(log::LogActivity)
        .with(script::ScriptActivity)
        .with(sql::SqlActivity::default())
        .with(browser::BrowserActivity::new(run_dir))
        .build()
}

/// The full set of plugin type strings the planner validates steps against.
pub const PLUGIN_TYPES: &[&str] = &["http", "delay", "log", "script", "sql", "browser"];
