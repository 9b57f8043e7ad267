//! Declarative render-cell configuration.
//!
//! These records arrive as JSON from the notebook viewer; serde defaults keep
//! sparse configs loadable, mirroring how render cells are usually authored
//! (only `render_passes` and `shader_bindings` are spelled out).

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ResourceId, ShaderId};
use crate::values::{UniformType, UniformValue};

pub const DEFAULT_WIDTH: u32 = 800;
pub const DEFAULT_HEIGHT: u32 = 600;

/// Snapshot of one render cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default)]
    pub shader_ids: Vec<ShaderId>,
    #[serde(default)]
    pub resource_ids: Vec<ResourceId>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub uniforms: Vec<UniformDecl>,
    #[serde(default)]
    pub camera: Option<Camera>,
    #[serde(default)]
    pub performance: Option<PerfConfig>,
}

fn default_width() -> u32 {
    DEFAULT_WIDTH
}

fn default_height() -> u32 {
    DEFAULT_HEIGHT
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            shader_ids: Vec::new(),
            resource_ids: Vec::new(),
            pipeline: PipelineConfig::default(),
            uniforms: Vec::new(),
            camera: None,
            performance: None,
        }
    }
}

/// Partial update applied through `update` commands. Absent fields keep the
/// current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderConfigPatch {
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub shader_ids: Option<Vec<ShaderId>>,
    #[serde(default)]
    pub resource_ids: Option<Vec<ResourceId>>,
    #[serde(default)]
    pub pipeline: Option<PipelineConfig>,
    #[serde(default)]
    pub uniforms: Option<Vec<UniformDecl>>,
    #[serde(default)]
    pub camera: Option<Camera>,
    #[serde(default)]
    pub performance: Option<PerfConfig>,
}

impl From<RenderConfig> for RenderConfigPatch {
    fn from(config: RenderConfig) -> Self {
        Self {
            width: Some(config.width),
            height: Some(config.height),
            shader_ids: Some(config.shader_ids),
            resource_ids: Some(config.resource_ids),
            pipeline: Some(config.pipeline),
            uniforms: Some(config.uniforms),
            camera: config.camera,
            performance: config.performance,
        }
    }
}

impl RenderConfig {
    /// Returns a copy with every field present in `patch` replaced.
    pub fn merged(&self, patch: RenderConfigPatch) -> RenderConfig {
        let mut merged = self.clone();
        if let Some(width) = patch.width {
            merged.width = width;
        }
        if let Some(height) = patch.height {
            merged.height = height;
        }
        if let Some(shader_ids) = patch.shader_ids {
            merged.shader_ids = shader_ids;
        }
        if let Some(resource_ids) = patch.resource_ids {
            merged.resource_ids = resource_ids;
        }
        if let Some(pipeline) = patch.pipeline {
            merged.pipeline = pipeline;
        }
        if let Some(uniforms) = patch.uniforms {
            merged.uniforms = uniforms;
        }
        if patch.camera.is_some() {
            merged.camera = patch.camera;
        }
        if patch.performance.is_some() {
            merged.performance = patch.performance;
        }
        merged
    }

    /// Canvas dimensions clamped to at least one pixel.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width.max(1), self.height.max(1))
    }

    /// Looks up a declared uniform by name.
    pub fn uniform(&self, name: &str) -> Option<&UniformDecl> {
        self.uniforms.iter().find(|decl| decl.name == name)
    }

    /// Frame cap requested by the cell, if any.
    pub fn target_fps(&self) -> Option<f32> {
        self.performance
            .as_ref()
            .and_then(|perf| perf.target_fps)
            .filter(|fps| *fps > 0.0)
    }

    pub fn fingerprint(&self) -> PipelineFingerprint {
        PipelineFingerprint::of(self)
    }
}

/// Content hash of everything that shapes pipelines and bind groups.
///
/// Uniform default values, labels, ranges, camera and performance settings are
/// deliberately excluded so that uniform-only edits never trigger a rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineFingerprint(u64);

impl PipelineFingerprint {
    pub fn of(config: &RenderConfig) -> Self {
        let mut hasher = DefaultHasher::new();
        config.shader_ids.hash(&mut hasher);
        config.resource_ids.hash(&mut hasher);
        // PipelineConfig carries floats; hash its canonical JSON form instead.
        serde_json::to_string(&config.pipeline)
            .unwrap_or_default()
            .hash(&mut hasher);
        for decl in &config.uniforms {
            decl.name.hash(&mut hasher);
            decl.ty.hash(&mut hasher);
        }
        Self(hasher.finish())
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub shader_bindings: Vec<ShaderBinding>,
    /// Informational; the vertex layout is fixed to the shared quad.
    #[serde(default)]
    pub vertex_attributes: Vec<Value>,
    #[serde(default)]
    pub resource_bindings: Vec<ResourceBinding>,
    #[serde(default)]
    pub render_passes: Vec<PassConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShaderBinding {
    /// Index into `RenderConfig::shader_ids`.
    pub shader_index: usize,
    pub shader_stage: ShaderStage,
    #[serde(default = "default_entry_point")]
    pub entry_point: String,
}

fn default_entry_point() -> String {
    "main".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassType {
    /// Renders to the canvas.
    #[default]
    Main,
    Intermediate,
    Postprocess,
    /// Tagged only; no pipeline is compiled for compute passes.
    Compute,
}

impl fmt::Display for PassType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassType::Main => f.write_str("main"),
            PassType::Intermediate => f.write_str("intermediate"),
            PassType::Postprocess => f.write_str("postprocess"),
            PassType::Compute => f.write_str("compute"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassConfig {
    pub id: String,
    #[serde(default)]
    pub pass_type: PassType,
    /// Pass-local `[vertex, fragment]` indices into `PipelineConfig::shader_bindings`.
    #[serde(default)]
    pub shader_bindings: Option<Vec<usize>>,
    #[serde(default)]
    pub input_textures: Vec<InputTextureRef>,
    #[serde(default)]
    pub output_textures: Vec<OutputTextureSpec>,
    #[serde(default)]
    pub clear_color: ClearColor,
    #[serde(default = "default_clear_depth")]
    pub clear_depth: f32,
    #[serde(default)]
    pub depth_enabled: bool,
    #[serde(default)]
    pub geometry: Option<GeometryConfig>,
    #[serde(default)]
    pub blend: BlendMode,
}

fn default_clear_depth() -> f32 {
    1.0
}

impl PassConfig {
    /// The pass synthesized when a pipeline declares none.
    pub fn default_main() -> Self {
        Self {
            id: "main".to_string(),
            pass_type: PassType::Main,
            shader_bindings: None,
            input_textures: Vec::new(),
            output_textures: Vec::new(),
            clear_color: ClearColor::default(),
            clear_depth: default_clear_depth(),
            depth_enabled: false,
            geometry: None,
            blend: BlendMode::default(),
        }
    }
}

/// RGBA clear color; accepts `[r, g, b, a]` or `{ "r": .., "g": .., "b": .., "a": .. }`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClearColor(pub [f64; 4]);

impl Default for ClearColor {
    fn default() -> Self {
        ClearColor([0.0, 0.0, 0.0, 1.0])
    }
}

impl ClearColor {
    pub fn to_wgpu(self) -> wgpu::Color {
        let [r, g, b, a] = self.0;
        wgpu::Color { r, g, b, a }
    }
}

impl<'de> Deserialize<'de> for ClearColor {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Helper {
            Rgba(Vec<f64>),
            Object {
                r: f64,
                g: f64,
                b: f64,
                #[serde(default = "opaque")]
                a: f64,
            },
        }

        fn opaque() -> f64 {
            1.0
        }

        let color = match Helper::deserialize(deserializer)? {
            Helper::Rgba(values) => {
                let mut rgba = [0.0, 0.0, 0.0, 1.0];
                for (slot, value) in rgba.iter_mut().zip(values) {
                    *slot = value;
                }
                rgba
            }
            Helper::Object { r, g, b, a } => [r, g, b, a],
        };
        Ok(ClearColor(color))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendMode {
    #[default]
    Replace,
    Alpha,
    Additive,
}

impl BlendMode {
    pub fn to_wgpu(self) -> Option<wgpu::BlendState> {
        match self {
            BlendMode::Replace => Some(wgpu::BlendState::REPLACE),
            BlendMode::Alpha => Some(wgpu::BlendState::ALPHA_BLENDING),
            BlendMode::Additive => Some(wgpu::BlendState {
                color: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::One,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
                alpha: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::One,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputTextureRef {
    /// `"<passId>_<textureId>"`, `"previous"`, or a numeric resource id.
    pub texture_id: String,
    #[serde(default = "default_input_group")]
    pub group: u32,
    /// Texture binding; the sampler takes `binding + 1`. Defaults to the
    /// reference's position times two.
    #[serde(default)]
    pub binding: Option<u32>,
}

fn default_input_group() -> u32 {
    1
}

pub const PREVIOUS_PASS_ALIAS: &str = "previous";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputTextureSpec {
    pub id: String,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_scale")]
    pub width_scale: f32,
    #[serde(default = "default_scale")]
    pub height_scale: f32,
    #[serde(default)]
    pub sampler_config: Option<SamplerConfig>,
}

fn default_format() -> String {
    "rgba8unorm".to_string()
}

fn default_scale() -> f32 {
    1.0
}

impl OutputTextureSpec {
    pub fn texture_format(&self) -> wgpu::TextureFormat {
        parse_texture_format(&self.format).unwrap_or_else(|| {
            tracing::warn!(
                texture = %self.id,
                format = %self.format,
                "unknown texture format; falling back to rgba8unorm"
            );
            wgpu::TextureFormat::Rgba8Unorm
        })
    }
}

/// Maps WebGPU format names onto wgpu formats.
pub fn parse_texture_format(name: &str) -> Option<wgpu::TextureFormat> {
    use wgpu::TextureFormat as F;
    let format = match name.trim().to_ascii_lowercase().as_str() {
        "rgba8unorm" => F::Rgba8Unorm,
        "rgba8unorm-srgb" => F::Rgba8UnormSrgb,
        "bgra8unorm" => F::Bgra8Unorm,
        "bgra8unorm-srgb" => F::Bgra8UnormSrgb,
        "rgba16float" => F::Rgba16Float,
        "rgba32float" => F::Rgba32Float,
        "r8unorm" => F::R8Unorm,
        "r16float" => F::R16Float,
        "r32float" => F::R32Float,
        "rg16float" => F::Rg16Float,
        "rg32float" => F::Rg32Float,
        _ => return None,
    };
    Some(format)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SamplerConfig {
    #[serde(default)]
    pub address_mode_u: Option<String>,
    #[serde(default)]
    pub address_mode_v: Option<String>,
    #[serde(default)]
    pub mag_filter: Option<String>,
    #[serde(default)]
    pub min_filter: Option<String>,
}

impl SamplerConfig {
    pub fn descriptor(&self) -> wgpu::SamplerDescriptor<'static> {
        let address_u = address_mode(self.address_mode_u.as_deref());
        let address_v = address_mode(self.address_mode_v.as_deref());
        wgpu::SamplerDescriptor {
            label: Some("pass texture sampler"),
            address_mode_u: address_u,
            address_mode_v: address_v,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: filter_mode(self.mag_filter.as_deref()),
            min_filter: filter_mode(self.min_filter.as_deref()),
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        }
    }
}

fn address_mode(name: Option<&str>) -> wgpu::AddressMode {
    match name {
        Some("repeat") => wgpu::AddressMode::Repeat,
        Some("mirror-repeat") | Some("mirror_repeat") => wgpu::AddressMode::MirrorRepeat,
        _ => wgpu::AddressMode::ClampToEdge,
    }
}

fn filter_mode(name: Option<&str>) -> wgpu::FilterMode {
    match name {
        Some("nearest") => wgpu::FilterMode::Nearest,
        _ => wgpu::FilterMode::Linear,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryKind {
    #[serde(rename = "indexed")]
    Indexed,
    #[serde(rename = "nonindexed", alias = "non_indexed", alias = "non-indexed")]
    NonIndexed,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeometryConfig {
    #[serde(rename = "type", default = "default_geometry_kind")]
    pub kind: GeometryKind,
    #[serde(default)]
    pub vertex_count: Option<u32>,
    #[serde(default)]
    pub index_count: Option<u32>,
    #[serde(default)]
    pub instance_count: Option<u32>,
}

fn default_geometry_kind() -> GeometryKind {
    GeometryKind::Other
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceBinding {
    pub group: u32,
    pub binding: u32,
    /// `uniform`, `storage`, `texture` or `sampler`.
    pub binding_type: String,
    /// Index into `RenderConfig::resource_ids`.
    pub resource_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    Uniform,
    Storage,
    Texture,
    Sampler,
}

impl ResourceBinding {
    pub fn kind(&self) -> Option<BindingKind> {
        match self.binding_type.trim().to_ascii_lowercase().as_str() {
            "uniform" => Some(BindingKind::Uniform),
            "storage" => Some(BindingKind::Storage),
            "texture" => Some(BindingKind::Texture),
            "sampler" => Some(BindingKind::Sampler),
            _ => None,
        }
    }
}

/// Config-level uniform declaration, surfaced as a UI control by the viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniformDecl {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(rename = "type", default = "default_uniform_type")]
    pub ty: String,
    #[serde(default)]
    pub default: Value,
    #[serde(default)]
    pub min: Option<f32>,
    #[serde(default)]
    pub max: Option<f32>,
    #[serde(default)]
    pub step: Option<f32>,
}

fn default_uniform_type() -> String {
    "f32".to_string()
}

impl UniformDecl {
    pub fn uniform_type(&self) -> UniformType {
        UniformType::parse(&self.ty)
    }

    pub fn default_value(&self) -> Option<UniformValue> {
        UniformValue::from_json(&self.default)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub position: [f32; 3],
    pub target: [f32; 3],
    #[serde(default = "default_up")]
    pub up: [f32; 3],
    #[serde(default = "default_fov")]
    pub fov: f32,
    #[serde(default = "default_near")]
    pub near: f32,
    #[serde(default = "default_far")]
    pub far: f32,
}

fn default_up() -> [f32; 3] {
    [0.0, 1.0, 0.0]
}

fn default_fov() -> f32 {
    45.0
}

fn default_near() -> f32 {
    0.1
}

fn default_far() -> f32 {
    100.0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerfConfig {
    #[serde(default)]
    pub target_fps: Option<f32>,
}

/// Collects duplicate ids in declaration order.
pub(crate) fn duplicate_pass_ids(passes: &[PassConfig]) -> Vec<String> {
    let mut seen = HashSet::new();
    passes
        .iter()
        .filter(|pass| !seen.insert(pass.id.as_str()))
        .map(|pass| pass.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> RenderConfig {
        serde_json::from_value(json!({
            "width": 640,
            "height": 480,
            "shader_ids": [1, 2],
            "pipeline": {
                "shader_bindings": [
                    {"shader_index": 0, "shader_stage": "vertex"},
                    {"shader_index": 1, "shader_stage": "fragment", "entry_point": "fs_main"}
                ],
                "render_passes": [
                    {"id": "main", "pass_type": "main", "shader_bindings": [0, 1],
                     "clear_color": {"r": 0.1, "g": 0.2, "b": 0.3}}
                ]
            },
            "uniforms": [{"name": "speed", "type": "f32", "default": 1.5}]
        }))
        .unwrap()
    }

    #[test]
    fn sparse_config_fills_defaults() {
        let config: RenderConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config.dimensions(), (DEFAULT_WIDTH, DEFAULT_HEIGHT));
        assert!(config.pipeline.render_passes.is_empty());

        let config = sample();
        let binding = &config.pipeline.shader_bindings[0];
        assert_eq!(binding.entry_point, "main");
        let pass = &config.pipeline.render_passes[0];
        assert_eq!(pass.clear_color.0, [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(pass.clear_depth, 1.0);
        assert_eq!(pass.blend, BlendMode::Replace);
    }

    #[test]
    fn merge_keeps_absent_fields() {
        let config = sample();
        let patch: RenderConfigPatch = serde_json::from_value(json!({"width": 1024})).unwrap();
        let merged = config.merged(patch);
        assert_eq!(merged.width, 1024);
        assert_eq!(merged.height, 480);
        assert_eq!(merged.shader_ids, config.shader_ids);
        assert_eq!(merged.uniforms, config.uniforms);
    }

    #[test]
    fn fingerprint_tracks_structure_not_uniform_values() {
        let config = sample();
        let base = config.fingerprint();

        let mut tweaked = config.clone();
        tweaked.uniforms[0].default = json!(9.0);
        tweaked.width = 10;
        assert_eq!(tweaked.fingerprint(), base);

        let mut rebound = config.clone();
        rebound.pipeline.shader_bindings[1].entry_point = "other".into();
        assert_ne!(rebound.fingerprint(), base);

        let mut reordered = config;
        reordered.shader_ids.reverse();
        assert_ne!(reordered.fingerprint(), base);
    }

    #[test]
    fn geometry_kind_accepts_aliases_and_unknowns() {
        let geometry: GeometryConfig =
            serde_json::from_value(json!({"type": "non-indexed", "vertex_count": 3})).unwrap();
        assert_eq!(geometry.kind, GeometryKind::NonIndexed);
        let other: GeometryConfig = serde_json::from_value(json!({"type": "mesh"})).unwrap();
        assert_eq!(other.kind, GeometryKind::Other);
    }

    #[test]
    fn binding_kinds_and_formats() {
        let binding = ResourceBinding {
            group: 2,
            binding: 0,
            binding_type: "Storage".into(),
            resource_index: 0,
        };
        assert_eq!(binding.kind(), Some(BindingKind::Storage));
        let bogus = ResourceBinding {
            binding_type: "atomic".into(),
            ..binding
        };
        assert_eq!(bogus.kind(), None);
        assert_eq!(
            parse_texture_format("rgba16float"),
            Some(wgpu::TextureFormat::Rgba16Float)
        );
        assert_eq!(parse_texture_format("rgb9e5"), None);
    }

    #[test]
    fn target_fps_ignores_non_positive_values() {
        let mut config = sample();
        config.performance = Some(PerfConfig {
            target_fps: Some(0.0),
        });
        assert_eq!(config.target_fps(), None);
        config.performance = Some(PerfConfig {
            target_fps: Some(30.0),
        });
        assert_eq!(config.target_fps(), Some(30.0));
    }

    #[test]
    fn duplicate_ids_are_reported() {
        let mut pass = PassConfig::default_main();
        let passes = vec![pass.clone(), {
            pass.pass_type = PassType::Intermediate;
            pass
        }];
        assert_eq!(duplicate_pass_ids(&passes), vec!["main".to_string()]);
    }
}
