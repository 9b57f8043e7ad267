//! Multi-renderer façade: one GPU context, a command queue and the renderers
//! of every active render cell.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::commands::{EngineCommand, InitOptions};
use crate::error::EngineError;
use crate::gpu::{CanvasSource, GpuContext, GpuInfo, GpuOptions};
use crate::ids::ContainerId;
use crate::notebook::Notebook;
use crate::renderer::Renderer;
use crate::runtime::{AlwaysVisible, FrameStats, RendererStatus, VisibilityProvider};
use crate::types::{PerfConfig, RenderConfig};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EngineOptions {
    pub gpu: GpuOptions,
    /// FPS cap applied to cells that do not declare `performance.target_fps`.
    pub default_target_fps: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineState {
    Running,
    DeviceLost,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusReport {
    pub status: EngineState,
    pub renderer_count: usize,
    pub resource_count: usize,
    pub gpu: Option<GpuInfo>,
}

/// Outcome of one `run_frame` tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub rendered: usize,
    pub skipped: usize,
}

/// Host binding of a container: where it presents and how visibility is read.
struct ContainerSlot {
    source: CanvasSource,
    visibility: Option<Box<dyn VisibilityProvider>>,
}

pub struct Engine {
    renderers: BTreeMap<ContainerId, Renderer>,
    containers: HashMap<ContainerId, ContainerSlot>,
    notebook: Arc<Notebook>,
    sender: Sender<EngineCommand>,
    receiver: Receiver<EngineCommand>,
    state: EngineState,
    options: EngineOptions,
    ctx: GpuContext,
}

impl Engine {
    pub fn new(notebook: Notebook, options: EngineOptions) -> Result<Self, EngineError> {
        let ctx = GpuContext::new(options.gpu)?;
        Ok(Self::with_context(ctx, notebook, options))
    }

    pub fn with_context(ctx: GpuContext, notebook: Notebook, options: EngineOptions) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        info!(adapter = %ctx.info().name, backend = %ctx.info().backend, "engine ready");
        Self {
            renderers: BTreeMap::new(),
            containers: HashMap::new(),
            notebook: Arc::new(notebook),
            sender,
            receiver,
            state: EngineState::Running,
            options,
            ctx,
        }
    }

    /// Binds a container to a canvas and visibility provider. Takes effect on
    /// the next `init` for that container.
    pub fn register_container(
        &mut self,
        id: ContainerId,
        source: CanvasSource,
        visibility: Box<dyn VisibilityProvider>,
    ) {
        self.containers.insert(
            id,
            ContainerSlot {
                source,
                visibility: Some(visibility),
            },
        );
    }

    pub fn command_sender(&self) -> Sender<EngineCommand> {
        self.sender.clone()
    }

    pub fn submit(&self, command: EngineCommand) {
        // The engine holds the receiver, so the channel cannot be disconnected.
        let _ = self.sender.send(command);
    }

    /// Parses and queues a `{type, data}` command. Returns `Ok(false)` for
    /// unknown command types, which are logged and dropped.
    pub fn submit_json(&self, value: Value) -> Result<bool, EngineError> {
        match EngineCommand::from_json(value)? {
            Some(command) => {
                self.submit(command);
                Ok(true)
            }
            None => {
                warn!("ignoring unknown command type");
                Ok(false)
            }
        }
    }

    /// Applies every queued command. Failures are logged; returns the number
    /// of commands handled.
    pub fn process_commands(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(command) = self.receiver.try_recv() {
            handled += 1;
            let kind = command.kind();
            let container = command.container_id().cloned();
            if let Err(err) = self.apply(command) {
                match container {
                    Some(container) => warn!(%container, command = kind, error = %err, "command failed"),
                    None => warn!(command = kind, error = %err, "command failed"),
                }
            }
        }
        handled
    }

    /// Applies one command immediately.
    pub fn apply(&mut self, command: EngineCommand) -> Result<(), EngineError> {
        if self.state == EngineState::Shutdown {
            debug!(command = command.kind(), "engine shut down; command dropped");
            return Ok(());
        }
        match command {
            EngineCommand::Init {
                container_id,
                notebook,
                config,
                options,
            } => {
                if let Some(notebook) = notebook {
                    self.notebook = Arc::new(*notebook);
                }
                self.init_renderer(container_id, *config, options)
            }
            EngineCommand::UpdateConfig {
                container_id,
                config,
            } => {
                let renderer = renderer_entry(&mut self.renderers, &container_id)?;
                renderer.update_config(&self.ctx, *config)?;
                Ok(())
            }
            EngineCommand::ReloadNotebook { notebook } => {
                self.reload_notebook(*notebook);
                Ok(())
            }
            EngineCommand::Resize {
                container_id,
                width,
                height,
            } => {
                let renderer = renderer_entry(&mut self.renderers, &container_id)?;
                renderer.resize(&self.ctx, width, height);
                Ok(())
            }
            EngineCommand::Uniform {
                container_id,
                name,
                value,
            } => {
                let renderer = renderer_entry(&mut self.renderers, &container_id)?;
                renderer.set_uniform(&self.ctx, &name, &value);
                Ok(())
            }
            EngineCommand::Reset { container_id } => {
                let renderer = renderer_entry(&mut self.renderers, &container_id)?;
                renderer.reset(&self.ctx);
                Ok(())
            }
            EngineCommand::Pause { container_id } => {
                renderer_entry(&mut self.renderers, &container_id)?.pause();
                Ok(())
            }
            EngineCommand::Resume { container_id } => {
                renderer_entry(&mut self.renderers, &container_id)?.resume();
                Ok(())
            }
            EngineCommand::Destroy { container_id } => {
                if !self.renderers.contains_key(&container_id) {
                    return Err(EngineError::UnknownContainer(container_id.to_string()));
                }
                self.destroy_renderer(&container_id);
                Ok(())
            }
        }
    }

    fn init_renderer(
        &mut self,
        id: ContainerId,
        mut config: RenderConfig,
        options: InitOptions,
    ) -> Result<(), EngineError> {
        if self.renderers.contains_key(&id) {
            debug!(container = %id, "replacing existing renderer");
            self.destroy_renderer(&id);
        }
        if config.target_fps().is_none() {
            if let Some(fps) = self.options.default_target_fps {
                config.performance = Some(PerfConfig {
                    target_fps: Some(fps),
                });
            }
        }

        let (source, visibility) = match self.containers.get_mut(&id) {
            Some(slot) => (
                slot.source.clone(),
                slot.visibility
                    .take()
                    .unwrap_or_else(|| Box::new(AlwaysVisible)),
            ),
            None => (CanvasSource::Offscreen, Box::new(AlwaysVisible) as Box<dyn VisibilityProvider>),
        };
        let mut renderer = Renderer::new(
            id.clone(),
            Arc::clone(&self.notebook),
            config,
            source,
            visibility,
        );
        let result = renderer.initialize(&self.ctx);
        if result.is_ok() && options.autoplay {
            renderer.resume();
        }
        self.renderers.insert(id, renderer);
        result.map_err(EngineError::from)
    }

    fn destroy_renderer(&mut self, id: &ContainerId) {
        if let Some(mut renderer) = self.renderers.remove(id) {
            renderer.destroy();
            let visibility = renderer.take_visibility();
            if let Some(slot) = self.containers.get_mut(id) {
                slot.visibility = Some(visibility);
            }
        }
    }

    fn reload_notebook(&mut self, notebook: Notebook) {
        self.notebook = Arc::new(notebook);
        for (id, renderer) in &mut self.renderers {
            if !renderer.status().is_live() {
                continue;
            }
            renderer.set_notebook(Arc::clone(&self.notebook));
            if let Err(err) = renderer.initialize(&self.ctx) {
                error!(container = %id, error = %err, "re-initialization after notebook update failed");
            }
        }
    }

    /// Drains commands, recovers from device loss and gives every renderer a
    /// chance to draw, in container order.
    pub fn run_frame(&mut self, now: Instant) -> TickReport {
        self.process_commands();
        if self.state == EngineState::Shutdown {
            return TickReport::default();
        }
        if self.ctx.is_lost() || self.state == EngineState::DeviceLost {
            self.recover_device();
        }

        let mut report = TickReport::default();
        for renderer in self.renderers.values_mut() {
            match renderer.render(&self.ctx, now) {
                Ok(true) => report.rendered += 1,
                Ok(false) | Err(_) => report.skipped += 1,
            }
        }
        report
    }

    fn recover_device(&mut self) {
        if self.state != EngineState::DeviceLost {
            warn!("GPU device lost; marking renderers");
            for renderer in self.renderers.values_mut() {
                renderer.mark_device_lost();
            }
            self.state = EngineState::DeviceLost;
        }
        let ctx = match GpuContext::new(self.options.gpu) {
            Ok(ctx) => ctx,
            Err(err) => {
                error!(error = %err, "failed to recreate GPU context; retrying next frame");
                return;
            }
        };
        self.ctx = ctx;
        self.state = EngineState::Running;
        for (id, renderer) in &mut self.renderers {
            if renderer.status() != RendererStatus::DeviceLost {
                continue;
            }
            match renderer.initialize(&self.ctx) {
                Ok(()) => info!(container = %id, status = %renderer.status(), "renderer recovered"),
                Err(err) => error!(container = %id, error = %err, "renderer recovery failed"),
            }
        }
    }

    pub fn status(&self) -> EngineStatusReport {
        EngineStatusReport {
            status: self.state,
            renderer_count: self.renderers.len(),
            resource_count: self.renderers.values().map(Renderer::resource_count).sum(),
            gpu: (self.state != EngineState::Shutdown).then(|| self.ctx.info().clone()),
        }
    }

    pub fn renderer(&self, id: &ContainerId) -> Option<&Renderer> {
        self.renderers.get(id)
    }

    pub fn renderer_stats(&self, id: &ContainerId) -> Option<FrameStats> {
        self.renderers.get(id).map(Renderer::stats)
    }

    pub fn containers(&self) -> impl Iterator<Item = &ContainerId> {
        self.renderers.keys()
    }

    pub fn notebook(&self) -> &Notebook {
        &self.notebook
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    /// Destroys every renderer; later commands are dropped.
    pub fn shutdown(&mut self) {
        if self.state == EngineState::Shutdown {
            return;
        }
        let ids: Vec<ContainerId> = self.renderers.keys().cloned().collect();
        for id in ids {
            self.destroy_renderer(&id);
        }
        while self.receiver.try_recv().is_ok() {}
        self.state = EngineState::Shutdown;
        info!("engine shut down");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Borrows only the renderer map, leaving `Engine::ctx` free.
fn renderer_entry<'a>(
    renderers: &'a mut BTreeMap<ContainerId, Renderer>,
    id: &ContainerId,
) -> Result<&'a mut Renderer, EngineError> {
    renderers
        .get_mut(id)
        .ok_or_else(|| EngineError::UnknownContainer(id.to_string()))
}
