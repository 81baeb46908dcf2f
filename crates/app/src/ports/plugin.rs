//! Plugin port — a bundle of services registered at startup.

use async_trait::async_trait;

use homehub_domain::error::HubError;

use crate::hub::Hub;

/// A pluggable integration.
///
/// [`Hub::add_plugin`] calls [`register`](Self::register) right away, before
/// the kernel starts, and [`teardown`](Self::teardown) when it enters
/// `Stopping`.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique name identifying this plugin (e.g. `"virtual"`).
    fn name(&self) -> &str;

    /// Register services, formatters and hooks on `hub`.
    ///
    /// # Errors
    ///
    /// Returns an error when a registration clashes with an existing one.
    fn register(&self, hub: &Hub) -> Result<(), HubError>;

    /// Release resources on shutdown.
    ///
    /// # Errors
    ///
    /// Teardown failures are logged; they never abort shutdown.
    async fn teardown(&self) -> Result<(), HubError> {
        Ok(())
    }
}
