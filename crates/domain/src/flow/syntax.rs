//! The "micro" flow syntax.
//!
//! A flow is an ordered list. Each element is a bare name or a single-key
//! map `{ name = config }`:
//!
//! ```toml
//! [flows]
//! porch = [
//!     { config = { suspend_on_error = true } },
//!     { interval = { seconds = 30 } },
//!     "f_upper",
//!     { store = { key = "last" } },
//!     { log = { level = "info" } },
//! ]
//! ```
//!
//! The optional `config` element must come first. The next element is the
//! trigger input. Names starting with `f_` are formatters; `store` and
//! `retrieve` (also spelled `n_store`, `n_retrieve`) are built-in nodes;
//! anything else is an output service.

use serde_json::Value;

use super::{FlowSettings, FlowSpec, FlowStep, StepKind, TriggerSpec};
use crate::error::ConfigError;

const CONFIG: &str = "config";
const FORMATTER_PREFIX: &str = "f_";
const NODE_PREFIX: &str = "n_";

/// Parse a micro-syntax flow declaration.
///
/// # Errors
///
/// Returns [`ConfigError::EmptyFlow`] when the list has no trigger or no
/// step, [`ConfigError::InvalidField`] for malformed elements or settings,
/// and [`ConfigError::MissingField`] when a built-in node lacks its `key`.
pub fn parse_micro_flow(name: &str, elements: &[Value]) -> Result<FlowSpec, ConfigError> {
    let mut rest = elements;
    let mut settings = FlowSettings::default();

    if let Some((Value::Object(first), tail)) = rest.split_first()
        && first.len() == 1
        && let Some(config) = first.get(CONFIG)
    {
        settings =
            serde_json::from_value(config.clone()).map_err(|err| ConfigError::InvalidField {
                item: name.to_string(),
                field: CONFIG.to_string(),
                reason: err.to_string(),
            })?;
        rest = tail;
    }

    let Some((trigger, steps)) = rest.split_first() else {
        return Err(ConfigError::EmptyFlow {
            flow: name.to_string(),
        });
    };
    let (service, config) = element(name, 0, trigger)?;
    let trigger = TriggerSpec { service, config };

    let steps = steps
        .iter()
        .enumerate()
        .map(|(idx, raw)| step(name, idx + 1, raw))
        .collect::<Result<Vec<_>, _>>()?;
    if steps.is_empty() {
        return Err(ConfigError::EmptyFlow {
            flow: name.to_string(),
        });
    }

    Ok(FlowSpec {
        name: name.to_string(),
        settings,
        trigger,
        steps,
    })
}

fn element(flow: &str, index: usize, raw: &Value) -> Result<(String, Value), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidField {
        item: flow.to_string(),
        field: format!("[{index}]"),
        reason: reason.to_string(),
    };
    let (name, config) = match raw {
        Value::String(name) => (name.clone(), Value::Null),
        Value::Object(map) if map.len() == 1 => map
            .iter()
            .next()
            .map(|(k, v)| (k.clone(), v.clone()))
            .ok_or_else(|| invalid("empty map"))?,
        _ => return Err(invalid("expected a name or a single-key map")),
    };
    if name.is_empty() {
        return Err(invalid("empty name"));
    }
    Ok((name, config))
}

fn step(flow: &str, index: usize, raw: &Value) -> Result<FlowStep, ConfigError> {
    let (name, config) = element(flow, index, raw)?;

    if let Some(formatter) = name.strip_prefix(FORMATTER_PREFIX) {
        return Ok(FlowStep {
            kind: StepKind::Formatter,
            name: formatter.to_string(),
            config,
        });
    }

    let builtin = name.strip_prefix(NODE_PREFIX).unwrap_or(&name);
    let kind = match builtin {
        "store" => StepKind::Store,
        "retrieve" => StepKind::Retrieve,
        _ => {
            return Ok(FlowStep {
                kind: StepKind::Output,
                name,
                config,
            });
        }
    };
    let key = config
        .get("key")
        .and_then(Value::as_str)
        .ok_or_else(|| ConfigError::MissingField {
            item: flow.to_string(),
            field: format!("[{index}].{builtin}.key"),
        })?
        .to_string();
    Ok(FlowStep {
        kind,
        name: key,
        config,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::PassThrough;
    use serde_json::json;

    #[test]
    fn should_parse_flow_with_leading_config() {
        let flow = parse_micro_flow(
            "porch",
            &[
                json!({"config": {"suspend_on_error": true, "pass_through": "always"}}),
                json!({"interval": {"seconds": 30}}),
                json!("f_upper"),
                json!({"log": {"level": "info"}}),
            ],
        )
        .unwrap();

        assert!(flow.settings.suspend_on_error);
        assert_eq!(flow.settings.pass_through, PassThrough::Always);
        assert_eq!(flow.trigger.service, "interval");
        assert_eq!(flow.trigger.config, json!({"seconds": 30}));
        assert_eq!(flow.steps.len(), 2);
        assert_eq!(flow.steps[0].kind, StepKind::Formatter);
        assert_eq!(flow.steps[0].name, "upper");
        assert_eq!(flow.steps[1].kind, StepKind::Output);
        assert_eq!(flow.steps[1].name, "log");
    }

    #[test]
    fn should_use_default_settings_without_config_element() {
        let flow = parse_micro_flow("plain", &[json!("manual"), json!("log")]).unwrap();
        assert_eq!(flow.settings, FlowSettings::default());
        assert_eq!(flow.trigger.service, "manual");
        assert_eq!(flow.trigger.config, Value::Null);
    }

    #[test]
    fn should_recognise_builtin_nodes_with_and_without_prefix() {
        let flow = parse_micro_flow(
            "mem",
            &[
                json!("manual"),
                json!({"store": {"key": "last"}}),
                json!({"n_retrieve": {"key": "last"}}),
            ],
        )
        .unwrap();
        assert_eq!(flow.steps[0].kind, StepKind::Store);
        assert_eq!(flow.steps[0].name, "last");
        assert_eq!(flow.steps[1].kind, StepKind::Retrieve);
    }

    #[test]
    fn should_require_key_for_builtin_nodes() {
        let err = parse_micro_flow("mem", &[json!("manual"), json!("store")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { .. }));
    }

    #[test]
    fn should_reject_flow_with_only_trigger() {
        let err = parse_micro_flow("lonely", &[json!("manual")]).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyFlow { .. }));
        assert!(parse_micro_flow("none", &[]).is_err());
    }

    #[test]
    fn should_reject_multi_key_elements() {
        let err = parse_micro_flow("bad", &[json!("manual"), json!({"a": 1, "b": 2})]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { .. }));
    }

    #[test]
    fn should_reject_unknown_settings() {
        let err = parse_micro_flow(
            "bad",
            &[json!({"config": {"pass_through": "sometimes"}}), json!("manual"), json!("log")],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { .. }));
    }
}
