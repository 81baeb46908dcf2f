//! Scenes — named bulk-state templates applied through the registry.
//!
//! Activation calls `set` on every target in declaration order. It is
//! best-effort and not atomic: a failing target is logged and reported,
//! the remaining targets still run and nothing already applied is rolled
//! back.

use homehub_domain::address::Address;
use homehub_domain::auth::Context;
use homehub_domain::error::{ConfigError, HubError};
use homehub_domain::scene::{SceneSpec, SceneTarget};

use super::{EntityRegistry, lock};
use crate::load::LoadReport;

const SET: &str = "set";

/// Per-target result of applying a scene.
#[derive(Debug, Default)]
pub struct SceneOutcome {
    pub applied: Vec<Address>,
    pub failed: Vec<(Address, HubError)>,
}

impl SceneOutcome {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

impl EntityRegistry {
    /// Register scenes, skipping invalid or duplicate ones.
    pub fn add_scenes(&self, specs: &[SceneSpec]) -> LoadReport {
        let mut report = LoadReport::default();
        for spec in specs {
            report.record("scene", &spec.name, self.add_scene(spec));
        }
        report
    }

    fn add_scene(&self, spec: &SceneSpec) -> Result<(), HubError> {
        spec.validate()?;
        let mut scenes = lock(&self.inner.scenes);
        if scenes.contains_key(&spec.name) {
            return Err(ConfigError::Duplicate(spec.name.clone()).into());
        }
        scenes.insert(spec.name.clone(), spec.clone());
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`HubError::SceneNotFound`] for unknown names.
    pub fn scene(&self, name: &str) -> Result<SceneSpec, HubError> {
        lock(&self.inner.scenes)
            .get(name)
            .cloned()
            .ok_or_else(|| HubError::SceneNotFound(name.to_string()))
    }

    /// Scene names, sorted.
    #[must_use]
    pub fn scene_names(&self) -> Vec<String> {
        let mut names: Vec<_> = lock(&self.inner.scenes).keys().cloned().collect();
        names.sort();
        names
    }

    /// Apply the scene's activation targets.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::SceneNotFound`] for unknown names. Failing
    /// targets are reported in the outcome, not raised.
    pub async fn activate_scene(
        &self,
        name: &str,
        context: &Context,
    ) -> Result<SceneOutcome, HubError> {
        let scene = self.scene(name)?;
        tracing::info!(scene = name, "activating scene");
        Ok(self.apply(&scene.activate, context).await)
    }

    /// Apply the scene's deactivation targets.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::SceneNotFound`] for unknown names.
    pub async fn deactivate_scene(
        &self,
        name: &str,
        context: &Context,
    ) -> Result<SceneOutcome, HubError> {
        let scene = self.scene(name)?;
        tracing::info!(scene = name, "deactivating scene");
        Ok(self.apply(&scene.deactivate, context).await)
    }

    async fn apply(&self, targets: &[SceneTarget], context: &Context) -> SceneOutcome {
        let mut outcome = SceneOutcome::default();
        for SceneTarget { address, target } in targets {
            let result = self
                .invoke(address.entity(), address.component(), SET, target, context)
                .await;
            match result {
                Ok(_) => outcome.applied.push(address.clone()),
                Err(err) => {
                    tracing::warn!(%err, %address, "scene target failed");
                    outcome.failed.push((address.clone(), err));
                }
            }
        }
        outcome
    }
}
