// Suite-execution core: template DSL, plugin activity contract, and the
// suite planner. Everything downstream (rocketship-plugins, rocketship-worker)
// depends on this crate.

pub mod dsl;
pub mod error;
pub mod plugin;
pub mod planner;
pub mod registry;

pub use dsl::{resolve, VarsEnv};
pub use error::{Result, RocketshipError};
pub use plugin::{Activity, ActivityInput, ActivityOutput, AssertionResult};
pub use planner::plan_suite;
pub use registry::{PluginRegistry, PluginRegistryBuilder};
