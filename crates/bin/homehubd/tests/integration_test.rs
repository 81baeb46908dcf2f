//! End-to-end tests for the fully-wired kernel.
//!
//! Each test builds a [`Hub`] with the virtual plugin, loads declarative
//! items the way `homehubd` does and drives them through the public API.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

use homehub_adapter_virtual::VirtualPlugin;
use homehub_app::callback::callback;
use homehub_app::hub::Hub;
use homehub_app::ports::Plugin;
use homehub_app::scheduler::SchedulerConfig;
use homehub_domain::entity::EntitySpec;
use homehub_domain::event::Event;
use homehub_domain::event::topics::ENTITY_STATE_CHANGED;
use homehub_domain::lifecycle::CoreState;
use homehub_domain::scene::SceneSpec;

/// A started hub with the virtual plugin registered.
fn hub() -> (Hub, Arc<VirtualPlugin>) {
    let hub = Hub::new(SchedulerConfig {
        shutdown_delay: Duration::ZERO,
        ..SchedulerConfig::default()
    });
    let plugin = Arc::new(VirtualPlugin::new());
    hub.add_plugin(Arc::clone(&plugin) as Arc<dyn Plugin>)
        .unwrap();
    (hub, plugin)
}

fn desk() -> EntitySpec {
    serde_json::from_value(json!({
        "name": "desk",
        "type": "dimmable_lamp",
        "control_service": "virtual",
        "components": {
            "switch": { "config": { "device": "desk-relay" } },
            "brightness": { "config": { "device": "desk-dimmer" } }
        }
    }))
    .unwrap()
}

fn hall() -> EntitySpec {
    serde_json::from_value(json!({
        "name": "hall",
        "type": "blinds",
        "control_service": "virtual",
        "components": {
            "blinds": { "config": { "device": "hall-motor" }, "formatter": "invert" }
        }
    }))
    .unwrap()
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_push_coupled_states_to_virtual_devices() {
    let (hub, plugin) = hub();
    let report = hub.registry().load_entities(&[desk()]);
    assert!(report.is_complete());
    hub.start();

    let applied = hub
        .registry()
        .call_method(
            "desk",
            "brightness",
            "set",
            json!(40),
            hub.system_context().clone(),
        )
        .await
        .unwrap();

    assert_eq!(applied, Some(json!(40)));
    assert_eq!(plugin.devices().last("desk-dimmer"), Some(json!(40)));
    assert_eq!(plugin.devices().last("desk-relay"), Some(json!(true)));
    let desk = hub.registry().entity("desk").unwrap();
    assert_eq!(desk.component("switch").unwrap().state(), json!(true));
}

#[tokio::test]
async fn should_apply_formatter_before_virtual_device() {
    let (hub, plugin) = hub();
    hub.registry().load_entities(&[hall()]);
    hub.start();

    hub.registry()
        .call_method_dotted("hall.blinds.close", Value::Null, hub.system_context().clone())
        .await
        .unwrap();

    assert_eq!(plugin.devices().last("hall-motor"), Some(json!(0.0)));
    let hall = hub.registry().entity("hall").unwrap();
    assert_eq!(hall.component("blinds").unwrap().state(), json!(100));
}

#[tokio::test]
async fn should_announce_state_changes_on_the_bus() {
    let (hub, _) = hub();
    hub.registry().load_entities(&[desk()]);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    hub.bus().listen(
        ENTITY_STATE_CHANGED,
        callback(move |event: Event| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(event.payload().clone());
                Ok(())
            }
        }),
    );
    hub.start();

    hub.registry()
        .call_method("desk", "switch", "turn_on", Value::Null, hub.system_context().clone())
        .await
        .unwrap();
    settle().await;

    let seen = seen.lock().unwrap();
    let components: Vec<_> = seen
        .iter()
        .map(|payload| payload["component"].as_str().unwrap().to_string())
        .collect();
    assert!(components.contains(&"switch".to_string()));
    assert!(components.contains(&"brightness".to_string()));
    assert!(seen.iter().all(|payload| payload["entity"] == json!("desk")));
}

#[tokio::test]
async fn should_skip_entities_bound_to_unknown_services() {
    let (hub, _) = hub();
    let mut ghost = desk();
    ghost.name = "ghost".to_string();
    ghost.control_service = Some("zigbee".to_string());

    let report = hub.registry().load_entities(&[ghost, hall()]);

    assert_eq!(report.loaded, vec!["hall"]);
    assert_eq!(report.failed[0].0, "ghost");
    assert!(hub.registry().entity("ghost").is_err());
}

// ---------------------------------------------------------------------------
// Flows
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn should_run_interval_flow_into_virtual_device() {
    let (hub, plugin) = hub();
    let flows = BTreeMap::from([(
        "banner".to_string(),
        vec![
            json!({ "interval": { "seconds": 1, "payload": "hello" } }),
            json!("f_upper"),
            json!({ "virtual": { "device": "banner" } }),
        ],
    )]);
    let report = hub.flows().load_flows(&flows).await;
    assert!(report.is_complete());
    hub.start();

    tokio::time::sleep(Duration::from_millis(1_500)).await;

    assert_eq!(plugin.devices().last("banner"), Some(json!("HELLO")));
}

#[tokio::test(start_paused = true)]
async fn should_stop_interval_inputs_on_shutdown() {
    let (hub, plugin) = hub();
    let flows = BTreeMap::from([(
        "ticker".to_string(),
        vec![
            json!({ "interval": { "seconds": 1 } }),
            json!({ "virtual": { "device": "ticker" } }),
        ],
    )]);
    hub.flows().load_flows(&flows).await;
    hub.start();
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(plugin.devices().last("ticker").is_some());

    hub.shutdown().await.unwrap();
    let stopped_at = plugin.devices().last("ticker");
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(hub.scheduler().state(), CoreState::Stopped);
    assert_eq!(plugin.devices().last("ticker"), stopped_at);
}

#[tokio::test]
async fn should_skip_flows_with_unknown_trigger() {
    let (hub, _) = hub();
    let flows = BTreeMap::from([
        (
            "broken".to_string(),
            vec![json!("doorbell"), json!({ "virtual": {} })],
        ),
        (
            "fine".to_string(),
            vec![json!({ "interval": { "seconds": 60 } }), json!("log")],
        ),
    ]);

    let report = hub.flows().load_flows(&flows).await;

    assert_eq!(report.loaded, vec!["fine"]);
    assert_eq!(hub.flows().flow_names(), vec!["fine"]);
}

// ---------------------------------------------------------------------------
// Scenes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_activate_scene_across_entities() {
    let (hub, plugin) = hub();
    hub.registry().load_entities(&[desk(), hall()]);
    let scene: SceneSpec = serde_json::from_value(json!({
        "name": "evening",
        "activate": [
            { "address": "desk.brightness", "target": 30 },
            { "address": "hall.blinds", "target": 80 }
        ]
    }))
    .unwrap();
    hub.registry().add_scenes(&[scene]);
    hub.start();

    let outcome = hub
        .registry()
        .activate_scene("evening", hub.system_context())
        .await
        .unwrap();

    assert!(outcome.is_complete());
    assert_eq!(plugin.devices().last("desk-dimmer"), Some(json!(30)));
    assert_eq!(plugin.devices().last("hall-motor"), Some(json!(20.0)));
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_report_clean_shutdown() {
    let (hub, _) = hub();
    hub.start();
    assert_eq!(hub.scheduler().state(), CoreState::Running);

    let report = hub.shutdown().await.unwrap();

    assert!(report.protected_errors.is_empty());
    assert_eq!(hub.scheduler().state(), CoreState::Stopped);
    assert!(hub.shutdown().await.is_err());
}
