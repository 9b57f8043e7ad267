//! Lifecycle commands sent by the host viewer as `{type, data}` records.

use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CommandError;
use crate::ids::ContainerId;
use crate::notebook::Notebook;
use crate::types::{RenderConfig, RenderConfigPatch};
use crate::values::UniformValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitOptions {
    /// Start drawing as soon as initialization succeeds.
    #[serde(default = "default_autoplay")]
    pub autoplay: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self { autoplay: true }
    }
}

fn default_autoplay() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    Init {
        container_id: ContainerId,
        /// Replaces the engine notebook when present.
        notebook: Option<Box<Notebook>>,
        config: Box<RenderConfig>,
        options: InitOptions,
    },
    UpdateConfig {
        container_id: ContainerId,
        config: Box<RenderConfigPatch>,
    },
    /// `update{notebook}`: swap the notebook and re-initialize every live renderer.
    ReloadNotebook { notebook: Box<Notebook> },
    Resize {
        container_id: ContainerId,
        width: u32,
        height: u32,
    },
    Uniform {
        container_id: ContainerId,
        name: String,
        value: UniformValue,
    },
    Reset { container_id: ContainerId },
    Pause { container_id: ContainerId },
    Resume { container_id: ContainerId },
    Destroy { container_id: ContainerId },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContainerPayload {
    container_id: ContainerId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitPayload {
    container_id: ContainerId,
    #[serde(default)]
    notebook: Option<Notebook>,
    #[serde(default)]
    config: Option<Value>,
    #[serde(default)]
    options: InitOptions,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdatePayload {
    #[serde(default)]
    container_id: Option<ContainerId>,
    #[serde(default)]
    config: Option<Value>,
    #[serde(default)]
    notebook: Option<Notebook>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResizePayload {
    container_id: ContainerId,
    width: u32,
    height: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UniformPayload {
    container_id: ContainerId,
    name: String,
    value: Value,
}

impl EngineCommand {
    /// Parses a `{type, data}` envelope. Unknown command types yield
    /// `Ok(None)` so the caller can log and move on.
    pub fn from_json(value: Value) -> Result<Option<Self>, CommandError> {
        let envelope: Envelope = serde_json::from_value(value).map_err(CommandError::Envelope)?;
        let kind = envelope.kind.as_str();
        let payload = |source| CommandError::Payload {
            kind: envelope.kind.clone(),
            source,
        };
        let container = |data: Value| -> Result<ContainerId, CommandError> {
            serde_json::from_value::<ContainerPayload>(data)
                .map(|payload| payload.container_id)
                .map_err(payload)
        };

        let command = match kind {
            "init" => {
                let data: InitPayload =
                    serde_json::from_value(envelope.data.clone()).map_err(payload)?;
                let config = match data.config {
                    Some(config) => config_from_value(config).map_err(payload)?,
                    None => RenderConfig::default(),
                };
                EngineCommand::Init {
                    container_id: data.container_id,
                    notebook: data.notebook.map(Box::new),
                    config: Box::new(config),
                    options: data.options,
                }
            }
            "update" => {
                let data: UpdatePayload =
                    serde_json::from_value(envelope.data.clone()).map_err(payload)?;
                match (data.notebook, data.container_id, data.config) {
                    (Some(notebook), _, _) => EngineCommand::ReloadNotebook {
                        notebook: Box::new(notebook),
                    },
                    (None, Some(container_id), Some(config)) => EngineCommand::UpdateConfig {
                        container_id,
                        config: Box::new(config_from_value(config).map_err(payload)?),
                    },
                    (None, None, _) => {
                        return Err(payload(serde_json::Error::missing_field("containerId")))
                    }
                    (None, Some(_), None) => {
                        return Err(payload(serde_json::Error::missing_field("config")))
                    }
                }
            }
            "resize" => {
                let data: ResizePayload =
                    serde_json::from_value(envelope.data.clone()).map_err(payload)?;
                EngineCommand::Resize {
                    container_id: data.container_id,
                    width: data.width,
                    height: data.height,
                }
            }
            "uniform" => {
                let data: UniformPayload =
                    serde_json::from_value(envelope.data.clone()).map_err(payload)?;
                let value = UniformValue::from_json(&data.value)
                    .ok_or_else(|| CommandError::UniformValue(data.name.clone()))?;
                EngineCommand::Uniform {
                    container_id: data.container_id,
                    name: data.name,
                    value,
                }
            }
            "reset" => EngineCommand::Reset {
                container_id: container(envelope.data.clone())?,
            },
            "pause" => EngineCommand::Pause {
                container_id: container(envelope.data.clone())?,
            },
            "resume" => EngineCommand::Resume {
                container_id: container(envelope.data.clone())?,
            },
            "destroy" => EngineCommand::Destroy {
                container_id: container(envelope.data.clone())?,
            },
            _ => return Ok(None),
        };
        Ok(Some(command))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EngineCommand::Init { .. } => "init",
            EngineCommand::UpdateConfig { .. } | EngineCommand::ReloadNotebook { .. } => "update",
            EngineCommand::Resize { .. } => "resize",
            EngineCommand::Uniform { .. } => "uniform",
            EngineCommand::Reset { .. } => "reset",
            EngineCommand::Pause { .. } => "pause",
            EngineCommand::Resume { .. } => "resume",
            EngineCommand::Destroy { .. } => "destroy",
        }
    }

    /// Target container; `None` for notebook reloads.
    pub fn container_id(&self) -> Option<&ContainerId> {
        match self {
            EngineCommand::Init { container_id, .. }
            | EngineCommand::UpdateConfig { container_id, .. }
            | EngineCommand::Resize { container_id, .. }
            | EngineCommand::Uniform { container_id, .. }
            | EngineCommand::Reset { container_id }
            | EngineCommand::Pause { container_id }
            | EngineCommand::Resume { container_id }
            | EngineCommand::Destroy { container_id } => Some(container_id),
            EngineCommand::ReloadNotebook { .. } => None,
        }
    }
}

/// Configs arrive either as JSON objects or as JSON text.
fn config_from_value<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, serde_json::Error> {
    match value {
        Value::String(text) => serde_json::from_str(&text),
        other => serde_json::from_value(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resize_envelope_parses() {
        let command = EngineCommand::from_json(json!({
            "type": "resize",
            "data": {"containerId": "cell-1", "width": 320, "height": 200}
        }))
        .unwrap()
        .unwrap();
        assert_eq!(
            command,
            EngineCommand::Resize {
                container_id: ContainerId::new("cell-1"),
                width: 320,
                height: 200
            }
        );
        assert_eq!(command.kind(), "resize");
    }

    #[test]
    fn unknown_type_yields_none() {
        let parsed = EngineCommand::from_json(json!({"type": "teleport", "data": {}})).unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn malformed_envelope_and_payload_are_errors() {
        assert!(matches!(
            EngineCommand::from_json(json!({"data": {}})),
            Err(CommandError::Envelope(_))
        ));
        assert!(matches!(
            EngineCommand::from_json(json!({"type": "pause", "data": {}})),
            Err(CommandError::Payload { .. })
        ));
        assert!(matches!(
            EngineCommand::from_json(json!({
                "type": "uniform",
                "data": {"containerId": "a", "name": "tint", "value": "red"}
            })),
            Err(CommandError::UniformValue(name)) if name == "tint"
        ));
    }

    #[test]
    fn update_distinguishes_config_and_notebook() {
        let config = EngineCommand::from_json(json!({
            "type": "update",
            "data": {"containerId": "a", "config": "{\"width\": 1024}"}
        }))
        .unwrap()
        .unwrap();
        match config {
            EngineCommand::UpdateConfig { config, .. } => {
                assert_eq!(config.width, Some(1024));
                assert_eq!(config.height, None);
            }
            other => panic!("unexpected {other:?}"),
        }

        let reload = EngineCommand::from_json(json!({
            "type": "update",
            "data": {"notebook": {"shaders": []}}
        }))
        .unwrap()
        .unwrap();
        assert!(matches!(reload, EngineCommand::ReloadNotebook { .. }));
        assert_eq!(reload.container_id(), None);
    }

    #[test]
    fn init_defaults_autoplay_and_config() {
        let command = EngineCommand::from_json(json!({
            "type": "init",
            "data": {"containerId": "a", "config": {"width": 640, "height": 480}}
        }))
        .unwrap()
        .unwrap();
        match command {
            EngineCommand::Init {
                config,
                options,
                notebook,
                ..
            } => {
                assert!(options.autoplay);
                assert!(notebook.is_none());
                assert_eq!(config.dimensions(), (640, 480));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
