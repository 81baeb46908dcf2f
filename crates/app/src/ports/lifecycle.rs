//! Lifecycle hook port — code that runs when the kernel changes state.

use std::future::Future;

use async_trait::async_trait;

use homehub_domain::error::HubError;
use homehub_domain::lifecycle::CoreState;

/// Invoked, as its own scheduled job, whenever the kernel enters the state
/// the hook was registered for.
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    async fn on_state(&self, state: CoreState) -> Result<(), HubError>;
}

#[async_trait]
impl<F, Fut> LifecycleHook for F
where
    F: Fn(CoreState) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HubError>> + Send + 'static,
{
    async fn on_state(&self, state: CoreState) -> Result<(), HubError> {
        self(state).await
    }
}
