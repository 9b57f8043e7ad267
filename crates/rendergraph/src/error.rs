use crate::ids::{ResourceId, ShaderId};
use crate::runtime::RendererStatus;
use crate::types::ShaderStage;

/// Fatal-to-renderer failures. A renderer that hits one of these during
/// `initialize` moves to the `error` state and has to be recreated.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("canvas unavailable: {0}")]
    Canvas(String),
    #[error("shader {0} is referenced by the render config but missing from the notebook")]
    ShaderAssetMissing(ShaderId),
    #[error("shader {id} failed to compile: {message}")]
    ShaderCompile { id: ShaderId, message: String },
    #[error("shader {0} has not been loaded")]
    ShaderNotLoaded(ShaderId),
    #[error("pass '{pass}' has no {stage} shader")]
    MissingShader { pass: String, stage: ShaderStage },
    #[error("pass '{pass}' references shader binding {index}, but only {available} are declared")]
    ShaderBindingOutOfRange {
        pass: String,
        index: usize,
        available: usize,
    },
    #[error("shader binding index {index} points past the {available} configured shader ids")]
    ShaderIndexOutOfRange { index: usize, available: usize },
    #[error("unsupported resource binding type '{0}'")]
    UnsupportedBindingType(String),
    #[error("bind group {group} of pass '{pass}' is reserved for {reserved}")]
    GroupConflict {
        pass: String,
        group: u32,
        reserved: &'static str,
    },
    #[error("pass '{pass}' needs bind group {group} but the device supports {max}")]
    TooManyBindGroups { pass: String, group: u32, max: u32 },
    #[error("duplicate pass id '{0}'")]
    DuplicatePass(String),
    #[error("failed to reflect shader {shader}: {source}")]
    Reflect {
        shader: ShaderId,
        #[source]
        source: ReflectError,
    },
    #[error("failed to create pipeline for pass '{pass}': {message}")]
    Pipeline { pass: String, message: String },
    #[error("resource {id} could not be loaded: {message}")]
    Resource { id: ResourceId, message: String },
    #[error("surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),
    #[error("renderer is {0}")]
    InvalidState(RendererStatus),
}

/// Shader reflection failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReflectError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("line {line}: uniform '{name}' is missing @{attribute}")]
    MissingAttribute {
        line: usize,
        name: String,
        attribute: &'static str,
    },
    #[error("line {line}: @{attribute}({value}) is out of range (max {max})")]
    OutOfRange {
        line: usize,
        attribute: &'static str,
        value: u64,
        max: u32,
    },
    #[error("line {line}: '{name}' reuses @group({group}) @binding({binding}) already taken by '{previous}'")]
    DuplicateBinding {
        line: usize,
        name: String,
        previous: String,
        group: u32,
        binding: u32,
    },
}

/// Why a single bind group could not be created. The group is skipped; the
/// rest of the pass bindings are unaffected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BindError {
    #[error("uniform buffer '{0}' is missing")]
    MissingUniformBuffer(String),
    #[error("reflected bind group for {0} was not created")]
    MissingReflectedGroup(String),
    #[error("no input texture resolved")]
    NoTexturesResolved,
    #[error("group {group} binding {binding}: {reason}")]
    UnresolvedResource {
        group: u32,
        binding: u32,
        reason: String,
    },
}

/// Why a pass was skipped for the current frame.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PassError {
    #[error("pass '{0}' has no pipeline")]
    NoPipeline(String),
    #[error("pass '{0}' has no valid color attachments")]
    NoColorAttachments(String),
    #[error("pass '{pass}' is missing bind group {group}")]
    IncompleteBindings { pass: String, group: u32 },
    #[error("pass '{0}' enables depth but no matching depth texture exists")]
    DepthUnavailable(String),
    #[error("pass '{0}': shared quad buffers are missing")]
    MissingGeometry(String),
}

#[derive(Debug, thiserror::Error)]
pub enum NotebookError {
    #[error("failed to parse notebook: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("cell {cell}: invalid render config: {source}")]
    RenderConfig {
        cell: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("resource {id}: {message}")]
    ResourceData { id: ResourceId, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("malformed command envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    #[error("malformed '{kind}' command: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("uniform '{0}': value must be a number, boolean or numeric array")]
    UniformValue(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to find a suitable GPU adapter: {0}")]
    Adapter(String),
    #[error("failed to create GPU device: {0}")]
    Device(String),
    #[error("no renderer for container '{0}'")]
    UnknownContainer(String),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Command(#[from] CommandError),
}
