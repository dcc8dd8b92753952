pub mod dispatch;
pub mod handles;
pub mod lifecycle;
pub mod registry;
pub mod wire;

pub use dispatch::Dispatcher;
pub use handles::HandleStore;
pub use lifecycle::{LifecycleConfig, ModelHandle, ModelState};
pub use registry::ValidatorRegistry;
