//! Outcome of loading a batch of declarative items.

use homehub_domain::error::HubError;

/// Which items of a batch were loaded and which were skipped.
///
/// A bad item never aborts the batch: it is logged, recorded here and the
/// remaining items still load.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub failed: Vec<(String, HubError)>,
}

impl LoadReport {
    /// Whether every item of the batch loaded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub(crate) fn record(&mut self, kind: &'static str, name: &str, result: Result<(), HubError>) {
        match result {
            Ok(()) => {
                tracing::debug!(kind, name, "loaded");
                self.loaded.push(name.to_string());
            }
            Err(err) => {
                tracing::warn!(%err, kind, name, "skipping invalid item");
                self.failed.push((name.to_string(), err));
            }
        }
    }
}
