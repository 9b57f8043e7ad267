//! GPU managers owned by each renderer.
//!
//! One instance of each manager lives inside a `Renderer`; only the
//! `GpuContext` (device and queue) is shared across renderers:
//! - `context` wires the wgpu instance, adapter, device and queue, and turns a
//!   host canvas (window surface or offscreen texture) into frame targets.
//! - `resources` is the sole owner of shader modules, resource textures and
//!   buffers; everything else refers to them by id or `BufferKey`.
//! - `uniforms` holds reflection-driven uniform buffers and bind groups per
//!   shader instance.
//! - `geometry` owns the shared quad plus the time, resolution, camera and
//!   custom uniform buffers.
//! - `textures` keeps per-pass render targets and the shared depth texture.
//! - `pipeline` plans bind-group slots and compiles one pipeline per pass.
//! - `bind_groups` wires concrete groups against those layouts.
//! - `executor` encodes a single pass.

mod bind_groups;
mod context;
mod executor;
mod geometry;
mod pipeline;
mod resources;
mod textures;
mod uniforms;

pub use bind_groups::{plan_resource_group, BindGroupManager, PassBindings, ResourceSlot};
pub use context::{Canvas, CanvasFrame, CanvasSource, GpuContext, GpuInfo, GpuLimits, GpuOptions, OFFSCREEN_FORMAT};
pub use executor::{FrameTargets, RenderPassExecutor};
pub use geometry::{
    quad_vertex_layout, CameraUniform, DrawCall, GeometryManager, QuadVertex, ResolutionUniform,
    TimeUniform, QUAD_INDEX_COUNT, QUAD_INDICES, QUAD_VERTEX_COUNT, QUAD_VERTICES,
};
pub use pipeline::{
    color_formats, globals_scope, plan_group_slots, GroupSlot, PassPipeline, RenderPipelineManager,
    FALLBACK_COLOR_FORMAT,
};
pub use resources::{align_uniform_size, BufferKey, ResourceManager, TextureResource, UNIFORM_ALIGNMENT};
pub use textures::{scaled_extent, DepthTexture, PassTexture, TextureManager, DEPTH_FORMAT};
pub use uniforms::{group_uniforms, UniformManager};
