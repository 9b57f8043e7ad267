//! One render cell: owns a full set of GPU managers and drives them through
//! the renderer lifecycle.
//!
//! ```text
//!   created ─▶ initializing ─▶ ready ─▶ running ⇄ paused ─▶ destroyed
//!                   │                      │
//!                   ▼                      ▼
//!                 error               device-lost ─▶ initializing
//! ```

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, warn};

use crate::error::RenderError;
use crate::graph::RenderGraph;
use crate::gpu::{
    BindGroupManager, CameraUniform, Canvas, CanvasSource, FrameTargets, GeometryManager, GpuContext,
    RenderPassExecutor, RenderPipelineManager, ResolutionUniform, ResourceManager, TextureManager,
    UniformManager,
};
use crate::ids::{ContainerId, UniformScope};
use crate::notebook::Notebook;
use crate::runtime::{
    AlwaysVisible, FpsCounter, FrameClock, FrameLimiter, FrameStats, RendererStatus, TimeSample,
    VisibilityProvider,
};
use crate::types::{PassType, PipelineFingerprint, RenderConfig, RenderConfigPatch};
use crate::values::UniformValue;

/// Solid colour shown in place of the canvas once a renderer has failed.
pub const ERROR_CLEAR_COLOR: wgpu::Color = wgpu::Color {
    r: 0.55,
    g: 0.05,
    b: 0.08,
    a: 1.0,
};

/// Status transitions, kept apart from GPU state.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    status: RendererStatus,
    frame_requested: bool,
    /// Status to return to once a re-initialization succeeds.
    restore: Option<RendererStatus>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            status: RendererStatus::Created,
            frame_requested: false,
            restore: None,
        }
    }
}

impl Lifecycle {
    pub fn status(&self) -> RendererStatus {
        self.status
    }

    pub fn frame_requested(&self) -> bool {
        self.frame_requested
    }

    /// Enters `initializing`. Renderers that errored or were destroyed must
    /// be recreated instead.
    pub fn begin_init(&mut self) -> Result<(), RenderError> {
        match self.status {
            RendererStatus::Error | RendererStatus::Destroyed | RendererStatus::Initializing => {
                Err(RenderError::InvalidState(self.status))
            }
            RendererStatus::Running | RendererStatus::Paused => {
                self.restore = Some(self.status);
                self.status = RendererStatus::Initializing;
                Ok(())
            }
            RendererStatus::DeviceLost => {
                self.status = RendererStatus::Initializing;
                Ok(())
            }
            RendererStatus::Created | RendererStatus::Ready => {
                self.restore = None;
                self.status = RendererStatus::Initializing;
                Ok(())
            }
        }
    }

    pub fn finish_init(&mut self) {
        self.status = RendererStatus::Ready;
        self.frame_requested = false;
        match self.restore.take() {
            Some(RendererStatus::Running) => {
                self.resume();
            }
            Some(RendererStatus::Paused) => self.status = RendererStatus::Paused,
            _ => {}
        }
    }

    pub fn fail(&mut self) {
        self.status = RendererStatus::Error;
        self.frame_requested = false;
        self.restore = None;
    }

    pub fn pause(&mut self) -> bool {
        if self.status != RendererStatus::Running {
            return false;
        }
        self.status = RendererStatus::Paused;
        self.frame_requested = false;
        true
    }

    pub fn resume(&mut self) -> bool {
        if !matches!(self.status, RendererStatus::Ready | RendererStatus::Paused) {
            return false;
        }
        self.status = RendererStatus::Running;
        self.frame_requested = true;
        true
    }

    /// Remembers whether the renderer was drawing so recovery can resume it.
    pub fn device_lost(&mut self) -> bool {
        if !self.status.is_live() {
            return false;
        }
        self.restore = Some(self.status);
        self.status = RendererStatus::DeviceLost;
        self.frame_requested = false;
        true
    }

    /// Returns `false` when already destroyed.
    pub fn destroy(&mut self) -> bool {
        if self.status == RendererStatus::Destroyed {
            return false;
        }
        self.status = RendererStatus::Destroyed;
        self.frame_requested = false;
        self.restore = None;
        true
    }

    pub fn drawable(&self) -> bool {
        self.status == RendererStatus::Running && self.frame_requested
    }
}

/// GPU objects that only exist while the renderer is live.
struct GpuState {
    canvas: Canvas,
    resources: ResourceManager,
}

pub struct Renderer {
    container: ContainerId,
    notebook: Arc<Notebook>,
    config: RenderConfig,
    fingerprint: PipelineFingerprint,
    source: CanvasSource,
    visibility: Box<dyn VisibilityProvider>,
    lifecycle: Lifecycle,
    error: Option<String>,
    gpu: Option<GpuState>,
    uniforms: UniformManager,
    geometry: GeometryManager,
    textures: TextureManager,
    pipelines: RenderPipelineManager,
    bind_groups: BindGroupManager,
    executor: RenderPassExecutor,
    graph: RenderGraph,
    clock: FrameClock,
    limiter: FrameLimiter,
    fps: FpsCounter,
    frame_count: u64,
    submissions: u64,
    draw_calls: u32,
    failed_passes: u32,
}

impl Renderer {
    pub fn new(
        container: ContainerId,
        notebook: Arc<Notebook>,
        config: RenderConfig,
        source: CanvasSource,
        visibility: Box<dyn VisibilityProvider>,
    ) -> Self {
        let fingerprint = config.fingerprint();
        let limiter = FrameLimiter::new(config.target_fps());
        Self {
            container,
            notebook,
            config,
            fingerprint,
            source,
            visibility,
            lifecycle: Lifecycle::default(),
            error: None,
            gpu: None,
            uniforms: UniformManager::new(),
            geometry: GeometryManager::new(),
            textures: TextureManager::new(),
            pipelines: RenderPipelineManager::new(),
            bind_groups: BindGroupManager::new(),
            executor: RenderPassExecutor::new(),
            graph: RenderGraph::default(),
            clock: FrameClock::new(),
            limiter,
            fps: FpsCounter::default(),
            frame_count: 0,
            submissions: 0,
            draw_calls: 0,
            failed_passes: 0,
        }
    }

    /// Builds every GPU object for the current config. Any failure moves the
    /// renderer to `error`, which is terminal.
    pub fn initialize(&mut self, ctx: &GpuContext) -> Result<(), RenderError> {
        self.lifecycle.begin_init()?;
        debug!(container = %self.container, "initializing renderer");
        self.release_gpu();
        match self.try_initialize(ctx) {
            Ok(()) => {
                self.visibility.connect();
                self.error = None;
                self.lifecycle.finish_init();
                debug!(
                    container = %self.container,
                    pipelines = self.pipelines.len(),
                    status = %self.lifecycle.status(),
                    "renderer ready"
                );
                Ok(())
            }
            Err(err) => {
                self.fail(ctx, &err);
                Err(err)
            }
        }
    }

    fn try_initialize(&mut self, ctx: &GpuContext) -> Result<(), RenderError> {
        let (width, height) = self.config.dimensions();
        let canvas = Canvas::new(ctx, &self.source, width, height)?;
        let resources = ResourceManager::new(ctx);
        self.gpu = Some(GpuState { canvas, resources });
        self.build_pipeline_state(ctx)
    }

    /// Everything after canvas setup: shaders and resources, geometry,
    /// reflection, pipelines, pass textures and bind groups.
    fn build_pipeline_state(&mut self, ctx: &GpuContext) -> Result<(), RenderError> {
        let Some(gpu) = self.gpu.as_mut() else {
            return Err(RenderError::InvalidState(self.lifecycle.status()));
        };
        let (width, height) = self.config.dimensions();

        gpu.resources.release_all();
        for id in &self.config.shader_ids {
            let shader = self
                .notebook
                .shader(*id)
                .ok_or(RenderError::ShaderAssetMissing(*id))?;
            gpu.resources.load_shader(ctx, shader)?;
        }
        for id in &self.config.resource_ids {
            match self.notebook.resource(*id) {
                Some(resource) => gpu.resources.load_resource(ctx, resource)?,
                None => warn!(resource = %id, "resource missing from notebook; bindings using it will fail"),
            }
        }

        self.geometry
            .create_default_geometry(&mut gpu.resources, &ctx.device, width, height, &self.config);

        let graph = RenderGraph::build(&self.config)?;

        self.uniforms.clear();
        for pass in graph.passes() {
            let Some(shaders) = pass.shaders.as_ref() else {
                continue;
            };
            let mut ids = vec![shaders.vertex.shader];
            if shaders.fragment.shader != shaders.vertex.shader {
                ids.push(shaders.fragment.shader);
            }
            for shader_id in ids {
                let shader = self
                    .notebook
                    .shader(shader_id)
                    .ok_or(RenderError::ShaderAssetMissing(shader_id))?;
                let scope = UniformScope::new(pass.index, shader_id);
                self.uniforms
                    .analyze_shader(scope, &shader.code)
                    .map_err(|source| RenderError::Reflect {
                        shader: shader_id,
                        source,
                    })?;
                for decl in &self.config.uniforms {
                    if let Some(value) = decl.default_value() {
                        self.uniforms.set_default_value(scope, &decl.name, value);
                    }
                }
                self.uniforms.create_bind_group_layouts(&ctx.device, scope);
                self.uniforms.ensure_uniform_buffers(&ctx.device, scope);
                self.uniforms.create_bind_groups(&ctx.device, scope);
            }
        }

        self.pipelines.create_render_pipelines(
            ctx,
            &graph,
            &self.config,
            &gpu.resources,
            &self.uniforms,
            gpu.canvas.format(),
        )?;

        for pass in graph.passes() {
            self.textures
                .create_pass_textures(&ctx.device, pass, width, height);
        }
        self.textures.prune(&graph);
        if graph
            .passes()
            .iter()
            .any(|pass| pass.config.depth_enabled && pass.pass_type() != PassType::Compute)
        {
            self.textures.ensure_depth_texture(&ctx.device, width, height);
        }

        self.bind_groups.create_bind_groups(
            &ctx.device,
            &graph,
            &self.config,
            &self.pipelines,
            &gpu.resources,
            &self.uniforms,
            &self.textures,
        );
        self.graph = graph;
        self.fingerprint = self.config.fingerprint();
        self.limiter.set_target(self.config.target_fps());
        self.sync_resolution(ctx, width, height);
        if let Some(camera) = self.config.camera.clone() {
            self.sync_camera(ctx, CameraUniform::from(&camera));
        }
        Ok(())
    }

    fn fail(&mut self, ctx: &GpuContext, err: &RenderError) {
        error!(container = %self.container, error = %err, "renderer failed");
        self.lifecycle.fail();
        self.error = Some(err.to_string());
        self.release_managers();
        if let Some(gpu) = self.gpu.as_mut() {
            gpu.resources.release_all();
            clear_canvas(ctx, &mut gpu.canvas, ERROR_CLEAR_COLOR);
        }
    }

    /// Draws one frame if the renderer is eligible. `Ok(false)` means the
    /// frame was skipped; an error means the renderer has moved to `error`.
    pub fn render(&mut self, ctx: &GpuContext, now: Instant) -> Result<bool, RenderError> {
        if !self.is_eligible() || !self.limiter.should_draw(now) {
            return Ok(false);
        }
        let Some(gpu) = self.gpu.as_mut() else {
            return Ok(false);
        };
        let frame = match gpu.canvas.acquire(&ctx.device) {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(false),
            Err(err) => {
                self.fail(ctx, &err);
                return Err(err);
            }
        };

        let sample = self.clock.sample(now);
        self.geometry.update_time(&gpu.resources, &ctx.queue, sample);
        let time = time_value(sample);
        for scope in self.uniforms.scopes_declaring("time") {
            self.uniforms.update_uniform(&ctx.queue, scope, "time", &time);
        }

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("render graph encoder"),
            });
        let targets = FrameTargets {
            canvas_view: &frame.view,
            canvas_size: gpu.canvas.size(),
            textures: &self.textures,
            resources: &gpu.resources,
        };
        let mut draw_calls = 0;
        let mut failed_passes = 0;
        for pass in self.graph.passes() {
            if pass.pass_type() == PassType::Compute {
                continue;
            }
            let result = self.executor.execute_render_pass(
                &mut encoder,
                pass,
                self.pipelines.pipeline(pass.index),
                self.bind_groups.bindings(pass.index),
                &targets,
            );
            match result {
                Ok(_) => draw_calls += 1,
                Err(err) => {
                    warn!(pass = %pass.id(), error = %err, "pass skipped");
                    failed_passes += 1;
                }
            }
        }
        ctx.queue.submit(Some(encoder.finish()));
        frame.present();

        self.submissions += 1;
        self.frame_count += 1;
        self.draw_calls = draw_calls;
        self.failed_passes = failed_passes;
        self.limiter.mark_drawn(now);
        if let Some(fps) = self.fps.tick(now) {
            debug!(
                container = %self.container,
                fps,
                frames = self.frame_count,
                draw_calls,
                failed_passes,
                "render stats"
            );
        }
        Ok(true)
    }

    /// Merges `patch` into the config. Returns whether pipelines were rebuilt;
    /// only changes to the pipeline fingerprint trigger a rebuild.
    pub fn update_config(
        &mut self,
        ctx: &GpuContext,
        patch: RenderConfigPatch,
    ) -> Result<bool, RenderError> {
        let previous = self.config.clone();
        let merged = previous.merged(patch);
        if !self.lifecycle.status().is_live() {
            self.config = merged;
            self.fingerprint = self.config.fingerprint();
            return Ok(false);
        }

        let (width, height) = merged.dimensions();
        let resized = (width, height) != previous.dimensions();
        let rebuild = merged.fingerprint() != self.fingerprint;
        self.config = merged;
        self.limiter.set_target(self.config.target_fps());

        if rebuild {
            debug!(container = %self.container, "pipeline fingerprint changed; rebuilding");
            if let Some(gpu) = self.gpu.as_mut() {
                if resized {
                    gpu.canvas.resize(&ctx.device, width, height);
                }
            }
            self.release_managers();
            if let Err(err) = self.build_pipeline_state(ctx) {
                self.fail(ctx, &err);
                return Err(err);
            }
            return Ok(true);
        }

        if resized {
            self.apply_resize(ctx, width, height);
        }
        if self.config.camera != previous.camera {
            if let Some(camera) = self.config.camera.clone() {
                let uniform = match self.gpu.as_mut() {
                    Some(gpu) => Some(self.geometry.update_camera(
                        &mut gpu.resources,
                        &ctx.device,
                        &ctx.queue,
                        &camera,
                    )),
                    None => None,
                };
                if let Some(uniform) = uniform {
                    self.sync_camera(ctx, uniform);
                }
            }
        }
        let changed: Vec<(String, UniformValue)> = self
            .config
            .uniforms
            .iter()
            .filter(|decl| {
                previous
                    .uniform(&decl.name)
                    .map_or(true, |old| old.default != decl.default)
            })
            .filter_map(|decl| decl.default_value().map(|value| (decl.name.clone(), value)))
            .collect();
        for (name, value) in changed {
            self.set_uniform(ctx, &name, &value);
        }
        Ok(false)
    }

    /// Returns `false` when the size is unchanged. Does not change whether the
    /// renderer is running or paused.
    pub fn resize(&mut self, ctx: &GpuContext, width: u32, height: u32) -> bool {
        let size = (width.max(1), height.max(1));
        if size == self.config.dimensions() {
            return false;
        }
        self.config.width = size.0;
        self.config.height = size.1;
        if self.lifecycle.status().is_live() {
            self.apply_resize(ctx, size.0, size.1);
        }
        true
    }

    fn apply_resize(&mut self, ctx: &GpuContext, width: u32, height: u32) {
        let Some(gpu) = self.gpu.as_mut() else {
            return;
        };
        gpu.canvas.resize(&ctx.device, width, height);
        self.geometry
            .update_resolution(&gpu.resources, &ctx.queue, width, height);
        self.textures.resize_textures(&ctx.device, width, height);
        self.bind_groups.create_bind_groups(
            &ctx.device,
            &self.graph,
            &self.config,
            &self.pipelines,
            &gpu.resources,
            &self.uniforms,
            &self.textures,
        );
        self.sync_resolution(ctx, width, height);
        debug!(container = %self.container, width, height, "renderer resized");
    }

    /// Writes a live uniform value. Returns whether any buffer took it.
    pub fn set_uniform(&mut self, ctx: &GpuContext, name: &str, value: &UniformValue) -> bool {
        let Some(gpu) = self.gpu.as_ref() else {
            return false;
        };
        let written = self.bind_groups.update_uniform_buffer(
            &ctx.queue,
            &self.geometry,
            &gpu.resources,
            &mut self.uniforms,
            name,
            value,
        );
        if written == 0 {
            warn!(container = %self.container, uniform = name, "no buffer for uniform; update ignored");
        }
        written > 0
    }

    /// Restores declared uniform defaults and restarts the frame counters.
    pub fn reset(&mut self, ctx: &GpuContext) {
        let defaults: Vec<(String, UniformValue)> = self
            .config
            .uniforms
            .iter()
            .filter_map(|decl| {
                let value = if decl.default.is_null() {
                    Some(decl.uniform_type().zero_default())
                } else {
                    decl.default_value()
                };
                value.map(|value| (decl.name.clone(), value))
            })
            .collect();
        for (name, value) in defaults {
            self.set_uniform(ctx, &name, &value);
        }
        self.clock.reset();
        self.limiter.reset();
        self.fps = FpsCounter::default();
        self.frame_count = 0;
        debug!(container = %self.container, "renderer reset");
    }

    pub fn pause(&mut self) -> bool {
        self.lifecycle.pause()
    }

    pub fn resume(&mut self) -> bool {
        let resumed = self.lifecycle.resume();
        if resumed {
            self.limiter.reset();
        }
        resumed
    }

    /// Releases every GPU object and disconnects visibility. Safe to call
    /// more than once.
    pub fn destroy(&mut self) {
        if !self.lifecycle.destroy() {
            return;
        }
        self.visibility.disconnect();
        self.release_gpu();
        debug!(container = %self.container, "renderer destroyed");
    }

    /// Drops GPU objects created on a lost device; `initialize` recreates them.
    pub fn mark_device_lost(&mut self) {
        if self.lifecycle.device_lost() {
            warn!(container = %self.container, "renderer lost its GPU device");
            self.release_managers();
            self.gpu = None;
        }
    }

    /// Hands the visibility provider back to the host, leaving an
    /// always-visible one in its place.
    pub fn take_visibility(&mut self) -> Box<dyn VisibilityProvider> {
        std::mem::replace(&mut self.visibility, Box::new(AlwaysVisible))
    }

    /// Swaps the notebook used by the next `initialize`.
    pub fn set_notebook(&mut self, notebook: Arc<Notebook>) {
        self.notebook = notebook;
    }

    fn release_managers(&mut self) {
        self.bind_groups.clear();
        self.pipelines.clear();
        self.textures.destroy();
        self.uniforms.clear();
    }

    fn release_gpu(&mut self) {
        self.release_managers();
        if let Some(mut gpu) = self.gpu.take() {
            gpu.resources.release_all();
        }
    }

    fn sync_resolution(&mut self, ctx: &GpuContext, width: u32, height: u32) {
        let resolution = ResolutionUniform::new(width, height);
        let value = UniformValue::Vector(vec![
            resolution.width,
            resolution.height,
            resolution.aspect,
            0.0,
        ]);
        for scope in self.uniforms.scopes_declaring("resolution") {
            self.uniforms
                .update_uniform(&ctx.queue, scope, "resolution", &value);
        }
    }

    fn sync_camera(&mut self, ctx: &GpuContext, camera: CameraUniform) {
        let components: [f32; 16] = bytemuck::cast(camera);
        let value = UniformValue::Vector(components.to_vec());
        for scope in self.uniforms.scopes_declaring("camera") {
            self.uniforms.update_uniform(&ctx.queue, scope, "camera", &value);
        }
    }

    /// Running, frame requested and visible.
    pub fn is_eligible(&self) -> bool {
        self.lifecycle.drawable() && self.visibility.is_visible()
    }

    pub fn status(&self) -> RendererStatus {
        self.lifecycle.status()
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn container(&self) -> &ContainerId {
        &self.container
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn graph(&self) -> &RenderGraph {
        &self.graph
    }

    pub fn pipelines(&self) -> &RenderPipelineManager {
        &self.pipelines
    }

    pub fn bind_groups(&self) -> &BindGroupManager {
        &self.bind_groups
    }

    pub fn textures(&self) -> &TextureManager {
        &self.textures
    }

    pub fn uniforms(&self) -> &UniformManager {
        &self.uniforms
    }

    pub fn canvas(&self) -> Option<&Canvas> {
        self.gpu.as_ref().map(|gpu| &gpu.canvas)
    }

    pub fn resources(&self) -> Option<&ResourceManager> {
        self.gpu.as_ref().map(|gpu| &gpu.resources)
    }

    /// GPU objects owned by this renderer across every manager.
    pub fn resource_count(&self) -> usize {
        self.resources().map_or(0, ResourceManager::resource_count)
            + self.textures.len()
            + self.uniforms.buffer_count()
    }

    pub fn stats(&self) -> FrameStats {
        FrameStats {
            status: self.lifecycle.status(),
            fps: self.fps.fps(),
            frame_count: self.frame_count,
            draw_calls: self.draw_calls,
            pass_count: self.graph.len(),
            failed_passes: self.failed_passes,
            submissions: self.submissions,
            error: self.error.clone(),
        }
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn time_value(sample: TimeSample) -> UniformValue {
    UniformValue::Vector(vec![
        sample.seconds,
        sample.delta,
        sample.frame_index as f32,
        0.0,
    ])
}

/// Clears the canvas once; used to show the error state.
fn clear_canvas(ctx: &GpuContext, canvas: &mut Canvas, color: wgpu::Color) {
    let frame = match canvas.acquire(&ctx.device) {
        Ok(Some(frame)) => frame,
        _ => return,
    };
    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("error clear encoder"),
        });
    {
        let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("error clear"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &frame.view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(color),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });
    }
    ctx.queue.submit(Some(encoder.finish()));
    frame.present();
}
