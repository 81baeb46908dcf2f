//! Runtime components — a [`Behavior`] bound to live state and an output
//! handler.
//!
//! A method call happens in two steps. [`DynComponent::propose`] runs the
//! behavior's pure transition and yields a [`Proposal`] without touching the
//! state. [`DynComponent::commit`] hands the proposed state to the external
//! handler and stores it only once the handler accepted it. The registry
//! runs coupling follow-ups between the two steps.

use std::marker::PhantomData;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use homehub_domain::address::Address;
use homehub_domain::auth::Context;
use homehub_domain::component::{Behavior, ComponentKind};
use homehub_domain::entity::ComponentSnapshot;
use homehub_domain::error::{HubError, ValidationError};

use crate::io::BoundHandler;

/// The next state of one component, computed but not yet committed.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    address: Address,
    method: String,
    value: Value,
}

impl Proposal {
    #[must_use]
    pub fn address(&self) -> &Address {
        &self.address
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The proposed state.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }
}

/// Object-safe view of a [`Component`], whatever its state type.
#[async_trait]
pub trait DynComponent: Send + Sync {
    fn address(&self) -> &Address;

    fn kind(&self) -> ComponentKind;

    /// Current state, serialized.
    fn state(&self) -> Value;

    fn methods(&self) -> Vec<&'static str>;

    /// Compute the state `method` would move to for `target`.
    ///
    /// # Errors
    ///
    /// [`HubError::ComponentNotFound`] for unknown methods and
    /// [`HubError::Validation`] for rejected targets.
    fn propose(&self, method: &str, target: &Value) -> Result<Proposal, HubError>;

    /// Run the external handler with the proposed state, then store it.
    ///
    /// # Errors
    ///
    /// Any handler failure; the state is left untouched.
    async fn commit(&self, proposal: Proposal, context: &Context) -> Result<Value, HubError>;

    fn name(&self) -> &str {
        self.address().component()
    }

    /// Propose and commit in one go.
    ///
    /// # Errors
    ///
    /// See [`propose`](Self::propose) and [`commit`](Self::commit).
    async fn call(&self, method: &str, target: &Value, context: &Context) -> Result<Value, HubError> {
        let proposal = self.propose(method, target)?;
        self.commit(proposal, context).await
    }

    fn snapshot(&self) -> ComponentSnapshot {
        ComponentSnapshot {
            name: self.name().to_string(),
            kind: self.kind(),
            state: self.state(),
            methods: self.methods(),
        }
    }
}

/// One behavior facet of an entity, holding state of type `B::State`.
pub struct Component<B: Behavior> {
    address: Address,
    state: Mutex<B::State>,
    handler: Option<BoundHandler>,
    _behavior: PhantomData<fn() -> B>,
}

impl<B: Behavior> Component<B> {
    /// A component in its behavior's initial state. Without a `handler` the
    /// component only holds state.
    #[must_use]
    pub fn new(address: Address, handler: Option<BoundHandler>) -> Self {
        Self {
            address,
            state: Mutex::new(B::initial_state()),
            handler,
            _behavior: PhantomData,
        }
    }

    /// Current typed state.
    #[must_use]
    pub fn current(&self) -> B::State {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

fn to_value<T: serde::Serialize>(state: &T) -> Result<Value, HubError> {
    serde_json::to_value(state).map_err(HubError::handler)
}

#[async_trait]
impl<B: Behavior> DynComponent for Component<B> {
    fn address(&self) -> &Address {
        &self.address
    }

    fn kind(&self) -> ComponentKind {
        B::KIND
    }

    fn state(&self) -> Value {
        to_value(&self.current()).unwrap_or(Value::Null)
    }

    fn methods(&self) -> Vec<&'static str> {
        B::methods().iter().map(|(name, _)| *name).collect()
    }

    fn propose(&self, method: &str, target: &Value) -> Result<Proposal, HubError> {
        let transition = B::transition(method)
            .ok_or_else(|| HubError::ComponentNotFound(format!("{}.{method}", self.address)))?;
        let next = transition(&self.current(), target)?;
        Ok(Proposal {
            address: self.address.clone(),
            method: method.to_string(),
            value: to_value(&next)?,
        })
    }

    async fn commit(&self, proposal: Proposal, context: &Context) -> Result<Value, HubError> {
        if proposal.address != self.address {
            return Err(ValidationError::InvalidAddress(proposal.address.to_string()).into());
        }
        let next: B::State =
            serde_json::from_value(proposal.value.clone()).map_err(|err| ValidationError::WrongType {
                expected: "component state",
                got: err.to_string(),
            })?;

        if let Some(handler) = &self.handler {
            handler(proposal.value.clone(), context.clone()).await?;
        }

        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
        tracing::debug!(
            address = %self.address,
            method = %proposal.method,
            state = %proposal.value,
            "component state committed"
        );
        Ok(proposal.value)
    }
}

impl<B: Behavior> std::fmt::Debug for Component<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("address", &self.address)
            .field("kind", &B::KIND)
            .field("state", &self.state())
            .field("bound", &self.handler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use homehub_domain::component::{Blinds, Brightness, Switch};
    use serde_json::json;
    use std::sync::Arc;

    fn recording(log: &Arc<Mutex<Vec<Value>>>, fail: bool) -> BoundHandler {
        let log = Arc::clone(log);
        Arc::new(move |value: Value, _: Context| {
            let log = Arc::clone(&log);
            async move {
                if fail {
                    return Err(HubError::handler("device offline"));
                }
                log.lock().unwrap().push(value.clone());
                Ok(Some(value))
            }
            .boxed()
        })
    }

    fn address(component: &str) -> Address {
        Address::new("desk", component)
    }

    // ── Propose ──────────────────────────────────────────────────────

    #[test]
    fn should_propose_without_touching_state() {
        let switch = Component::<Switch>::new(address("switch"), None);
        let proposal = switch.propose("turn_on", &Value::Null).unwrap();
        assert_eq!(proposal.value(), &json!(true));
        assert_eq!(proposal.method(), "turn_on");
        assert!(!switch.current());
    }

    #[test]
    fn should_report_unknown_method_as_component_not_found() {
        let switch = Component::<Switch>::new(address("switch"), None);
        let result = switch.propose("dim", &Value::Null);
        assert!(matches!(result, Err(HubError::ComponentNotFound(name)) if name == "desk.switch.dim"));
    }

    #[test]
    fn should_reject_out_of_range_blinds_target() {
        let blinds = Component::<Blinds>::new(address("blinds"), None);
        let result = blinds.propose("set", &json!(120));
        assert!(matches!(result, Err(HubError::Validation(_))));
    }

    // ── Commit ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn should_commit_after_handler_accepts() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let brightness = Component::<Brightness>::new(address("brightness"), Some(recording(&log, false)));

        let committed = brightness
            .call("set", &json!(42), &Context::system())
            .await
            .unwrap();

        assert_eq!(committed, json!(42));
        assert_eq!(brightness.current(), 42);
        assert_eq!(log.lock().unwrap().as_slice(), &[json!(42)]);
    }

    #[tokio::test]
    async fn should_keep_state_when_handler_fails() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let switch = Component::<Switch>::new(address("switch"), Some(recording(&log, true)));

        let result = switch.call("turn_on", &Value::Null, &Context::system()).await;

        assert!(matches!(result, Err(HubError::Handler(_))));
        assert!(!switch.current());
    }

    #[tokio::test]
    async fn should_commit_state_only_component_directly() {
        let switch = Component::<Switch>::new(address("switch"), None);
        switch
            .call("toggle", &Value::Null, &Context::system())
            .await
            .unwrap();
        assert_eq!(switch.state(), json!(true));
    }

    #[tokio::test]
    async fn should_refuse_proposal_for_another_component() {
        let switch = Component::<Switch>::new(address("switch"), None);
        let other = Component::<Switch>::new(Address::new("hall", "switch"), None);
        let proposal = other.propose("turn_on", &Value::Null).unwrap();

        let result = switch.commit(proposal, &Context::system()).await;

        assert!(matches!(result, Err(HubError::Validation(ValidationError::InvalidAddress(_)))));
        assert!(!switch.current());
    }

    #[test]
    fn should_snapshot_name_kind_state_and_methods() {
        let switch = Component::<Switch>::new(address("switch"), None);
        let snapshot = switch.snapshot();
        assert_eq!(snapshot.name, "switch");
        assert_eq!(snapshot.kind, ComponentKind::Switch);
        assert_eq!(snapshot.state, json!(false));
        assert_eq!(snapshot.methods, vec!["turn_on", "turn_off", "toggle", "set"]);
    }
}
