//! Render-graph engine for notebook render cells.
//!
//! A render cell carries a [`RenderConfig`]: shaders, resources and an ordered
//! list of passes whose output textures feed later passes. The engine turns
//! each cell into a [`Renderer`] that owns its own GPU managers, while every
//! renderer shares one [`GpuContext`]:
//!
//! ```text
//!   host viewer ──{type, data}──▶ Engine ──▶ Renderer (one per container)
//!                                   │           ├─ ResourceManager / UniformManager
//!                                   │           ├─ GeometryManager / TextureManager
//!                                   │           ├─ RenderPipelineManager / BindGroupManager
//!                                   │           └─ RenderPassExecutor ──▶ canvas
//!                                   └── run_frame(now) ticks every eligible renderer
//! ```
//!
//! Configs are compiled into a [`RenderGraph`] once per pipeline build, so
//! per-frame work never resolves names. Uniform declarations are discovered
//! by reflecting WGSL source ([`reflect_uniforms`]).

pub mod commands;
pub mod engine;
pub mod error;
pub mod gpu;
pub mod graph;
pub mod ids;
pub mod notebook;
pub mod reflect;
pub mod renderer;
pub mod runtime;
pub mod types;
mod validate;
pub mod values;

pub use commands::{EngineCommand, InitOptions};
pub use engine::{Engine, EngineOptions, EngineState, EngineStatusReport, TickReport};
pub use error::{BindError, CommandError, EngineError, NotebookError, PassError, ReflectError, RenderError};
pub use gpu::{CanvasSource, GpuContext, GpuInfo, GpuOptions};
pub use graph::{InputSource, PassNode, RenderGraph};
pub use ids::{ContainerId, PassIndex, ResourceId, ShaderId, TextureKey, UniformScope};
pub use notebook::{Notebook, ResourceAsset, ShaderAsset};
pub use reflect::{reflect_uniforms, ReflectedUniform};
pub use renderer::{Lifecycle, Renderer};
pub use runtime::{
    frame_interval, AlwaysVisible, FrameStats, RendererStatus, ViewportVisibility, VisibilityHandle, VisibilityProvider,
    DEFAULT_VISIBILITY_THRESHOLD,
};
pub use types::{PassConfig, PassType, PerfConfig, PipelineConfig, RenderConfig, RenderConfigPatch};
pub use values::{UniformType, UniformValue};
pub use wgpu;
