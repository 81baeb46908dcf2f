//! Type-erased async callbacks shared by the timer, store and event bus.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use homehub_domain::error::HubError;

/// An async callback receiving one argument.
pub type Callback<A> = Arc<dyn Fn(A) -> BoxFuture<'static, Result<(), HubError>> + Send + Sync>;

/// Erase an async closure into a [`Callback`].
pub fn callback<A, F, Fut>(f: F) -> Callback<A>
where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HubError>> + Send + 'static,
{
    Arc::new(move |arg| f(arg).boxed())
}
