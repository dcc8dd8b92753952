pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::cli::Cli;
pub use config::ModuleConfig;

pub use core::{
    Dispatcher, HandleStore, LifecycleConfig, ModelHandle, ModelState, ValidatorRegistry,
};
pub use domain::model::{
    Class, Method, MethodRequest, ModuleInterface, Resource, Resources, Schema, Value, Values,
};
pub use domain::ports::{Invocation, Invoker, Validator};
pub use utils::error::{ErrorCategory, MeillionenError, Result};
