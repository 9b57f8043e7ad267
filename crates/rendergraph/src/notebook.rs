//! Notebook input model: the parsed document handed over by the viewer.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::NotebookError;
use crate::ids::{ResourceId, ShaderId};
use crate::types::RenderConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub shaders: Vec<ShaderAsset>,
    #[serde(default)]
    pub resources: Vec<ResourceAsset>,
    #[serde(default)]
    pub content: NotebookContent,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotebookContent {
    #[serde(default)]
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub cell_type: String,
    #[serde(default)]
    pub content: Value,
}

pub const RENDER_CELL: &str = "render";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShaderAsset {
    pub id: ShaderId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_shader_type")]
    pub shader_type: String,
    pub code: String,
}

fn default_shader_type() -> String {
    "wgsl".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAsset {
    pub id: ResourceId,
    #[serde(default)]
    pub name: Option<String>,
    pub resource_type: String,
    pub data: ResourceData,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Texture,
    Buffer,
}

impl ResourceAsset {
    /// `texture`/`image` decode to textures, `buffer`/`data` become storage
    /// buffers; anything else is unsupported.
    pub fn kind(&self) -> Option<ResourceKind> {
        match self.resource_type.to_ascii_lowercase().as_str() {
            "texture" | "image" => Some(ResourceKind::Texture),
            "buffer" | "data" => Some(ResourceKind::Buffer),
            _ => None,
        }
    }

    pub fn bytes(&self) -> Result<Vec<u8>, NotebookError> {
        self.data
            .decode()
            .map_err(|message| NotebookError::ResourceData {
                id: self.id,
                message,
            })
    }
}

/// Raw resource payload: base64 text, a data URL, or a plain byte array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceData {
    Bytes(Vec<u8>),
    Text(String),
}

impl ResourceData {
    pub fn decode(&self) -> Result<Vec<u8>, String> {
        match self {
            ResourceData::Bytes(bytes) => Ok(bytes.clone()),
            ResourceData::Text(text) => {
                let text = text.trim();
                if let Some(rest) = text.strip_prefix("data:") {
                    let (header, payload) = rest
                        .split_once(',')
                        .ok_or_else(|| "data URL without payload".to_string())?;
                    if header.ends_with(";base64") {
                        STANDARD
                            .decode(payload)
                            .map_err(|err| format!("invalid base64 payload: {err}"))
                    } else {
                        Ok(payload.as_bytes().to_vec())
                    }
                } else {
                    STANDARD
                        .decode(text)
                        .map_err(|err| format!("invalid base64 payload: {err}"))
                }
            }
        }
    }
}

impl Notebook {
    pub fn from_json_str(text: &str) -> Result<Self, NotebookError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn shader(&self, id: ShaderId) -> Option<&ShaderAsset> {
        self.shaders.iter().find(|shader| shader.id == id)
    }

    pub fn resource(&self, id: ResourceId) -> Option<&ResourceAsset> {
        self.resources.iter().find(|resource| resource.id == id)
    }

    /// Every render cell with its index in `content.cells`. Cell content may be
    /// JSON text or an already structured object.
    pub fn render_configs(&self) -> Vec<(usize, Result<RenderConfig, NotebookError>)> {
        self.content
            .cells
            .iter()
            .enumerate()
            .filter(|(_, cell)| cell.cell_type == RENDER_CELL)
            .map(|(index, cell)| {
                let parsed = match &cell.content {
                    Value::String(text) => serde_json::from_str(text),
                    other => serde_json::from_value(other.clone()),
                };
                let config = parsed.map_err(|source| NotebookError::RenderConfig {
                    cell: index,
                    source,
                });
                (index, config)
            })
            .collect()
    }

    /// Render config of the `nth` render cell (counting render cells only).
    pub fn render_config(&self, nth: usize) -> Option<Result<RenderConfig, NotebookError>> {
        self.render_configs()
            .into_iter()
            .nth(nth)
            .map(|(_, config)| config)
    }
}
