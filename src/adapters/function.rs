use crate::domain::model::Values;
use crate::domain::ports::{Invocation, Invoker};
use crate::utils::error::Result;
use async_trait::async_trait;

/// Wraps an in-process function as a model implementation.
///
/// The function runs on the calling task, so it should not block for long;
/// wrap slow library calls in an [`Invoker`] that uses `spawn_blocking`.
pub struct FnInvoker<F> {
    func: F,
}

impl<F> FnInvoker<F>
where
    F: Fn(Invocation<'_>) -> Result<Values> + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> Invoker for FnInvoker<F>
where
    F: Fn(Invocation<'_>) -> Result<Values> + Send + Sync,
{
    async fn invoke(&self, invocation: Invocation<'_>) -> Result<Values> {
        tracing::debug!(
            "Calling in-process {}.{}",
            invocation.class_name,
            invocation.method.name()
        );
        (self.func)(invocation)
    }
}
