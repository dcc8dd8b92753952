#[cfg(feature = "cli")]
pub mod cli;
pub mod module_config;

pub use module_config::ModuleConfig;
