use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use winit::window::Window;

use crate::error::{EngineError, RenderError};

/// Knobs for adapter selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuOptions {
    pub power_preference: wgpu::PowerPreference,
    /// Ask for a software adapter (useful on CI machines without a GPU).
    pub force_fallback_adapter: bool,
}

impl Default for GpuOptions {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
        }
    }
}

/// Adapter snapshot reported by the status query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpuInfo {
    pub name: String,
    #[serde(rename = "isIntegratedGPU")]
    pub is_integrated_gpu: bool,
    pub backend: String,
    pub limits: GpuLimits,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuLimits {
    pub max_texture_dimension_2d: u32,
    pub max_bind_groups: u32,
    pub max_uniform_buffer_binding_size: u32,
    pub max_storage_buffer_binding_size: u32,
    pub min_uniform_buffer_offset_alignment: u32,
}

impl GpuInfo {
    fn from_wgpu(info: &wgpu::AdapterInfo, limits: &wgpu::Limits) -> Self {
        Self {
            name: info.name.clone(),
            is_integrated_gpu: info.device_type == wgpu::DeviceType::IntegratedGpu,
            backend: format!("{:?}", info.backend),
            limits: GpuLimits {
                max_texture_dimension_2d: limits.max_texture_dimension_2d,
                max_bind_groups: limits.max_bind_groups,
                max_uniform_buffer_binding_size: limits.max_uniform_buffer_binding_size,
                max_storage_buffer_binding_size: limits.max_storage_buffer_binding_size,
                min_uniform_buffer_offset_alignment: limits.min_uniform_buffer_offset_alignment,
            },
        }
    }
}

/// Instance, adapter, device and queue shared by every renderer of an engine.
pub struct GpuContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    info: GpuInfo,
    lost: Arc<AtomicBool>,
}

impl GpuContext {
    pub fn new(options: GpuOptions) -> Result<Self, EngineError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
            backend_options: wgpu::BackendOptions::default(),
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: options.power_preference,
            compatible_surface: None,
            force_fallback_adapter: options.force_fallback_adapter,
        }))
        .map_err(|err| EngineError::Adapter(err.to_string()))?;

        let adapter_info = adapter.get_info();
        let limits = adapter.limits();
        let info = GpuInfo::from_wgpu(&adapter_info, &limits);
        tracing::debug!(
            name = %info.name,
            backend = %info.backend,
            device_type = ?adapter_info.device_type,
            "selected GPU adapter"
        );

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("rendergraph device"),
            required_features: wgpu::Features::empty(),
            required_limits: limits,
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .map_err(|err| EngineError::Device(err.to_string()))?;

        let lost = Arc::new(AtomicBool::new(false));
        let lost_flag = Arc::clone(&lost);
        device.set_device_lost_callback(move |reason, message| {
            if reason == wgpu::DeviceLostReason::Destroyed {
                tracing::debug!(%message, "GPU device destroyed");
                return;
            }
            tracing::error!(?reason, %message, "GPU device lost");
            lost_flag.store(true, Ordering::SeqCst);
        });
        device.on_uncaptured_error(Box::new(|error| {
            tracing::error!(%error, "uncaptured GPU error");
        }));

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            info,
            lost,
        })
    }

    pub fn info(&self) -> &GpuInfo {
        &self.info
    }

    pub fn limits(&self) -> wgpu::Limits {
        self.device.limits()
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    /// Marks the device lost; used by hosts that detect loss out of band.
    pub fn mark_lost(&self) {
        self.lost.store(true, Ordering::SeqCst);
    }

    /// Runs `f` inside a validation error scope and reports the first
    /// validation error raised while it ran.
    pub fn validated<T>(&self, f: impl FnOnce(&wgpu::Device) -> T) -> Result<T, String> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(error.to_string()),
            None => Ok(value),
        }
    }
}

/// Where a renderer presents its `main` pass.
#[derive(Debug, Clone, Default)]
pub enum CanvasSource {
    Window(Arc<Window>),
    /// An owned texture; used by headless hosts and tests.
    #[default]
    Offscreen,
}

pub const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

enum CanvasTarget {
    Surface {
        surface: wgpu::Surface<'static>,
        config: wgpu::SurfaceConfiguration,
    },
    Offscreen {
        texture: wgpu::Texture,
    },
}

/// Presentation target of one renderer.
pub struct Canvas {
    target: CanvasTarget,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
}

/// Color target for one frame's `main` pass.
pub struct CanvasFrame {
    pub view: wgpu::TextureView,
    surface_texture: Option<wgpu::SurfaceTexture>,
}

impl CanvasFrame {
    pub fn present(self) {
        if let Some(texture) = self.surface_texture {
            texture.present();
        }
    }
}

impl Canvas {
    pub fn new(
        ctx: &GpuContext,
        source: &CanvasSource,
        width: u32,
        height: u32,
    ) -> Result<Self, RenderError> {
        let width = width.max(1);
        let height = height.max(1);
        let max_dimension = ctx.device.limits().max_texture_dimension_2d;
        if width > max_dimension || height > max_dimension {
            return Err(RenderError::Canvas(format!(
                "GPU max texture dimension is {max_dimension}, requested canvas is {width}x{height}"
            )));
        }

        match source {
            CanvasSource::Window(window) => {
                let surface = ctx
                    .instance
                    .create_surface(Arc::clone(window))
                    .map_err(|err| RenderError::Canvas(err.to_string()))?;
                let caps = surface.get_capabilities(&ctx.adapter);
                let Some(&first_format) = caps.formats.first() else {
                    return Err(RenderError::Canvas(
                        "surface is not supported by the selected adapter".to_string(),
                    ));
                };
                let format = caps
                    .formats
                    .iter()
                    .copied()
                    .find(|format| !format.is_srgb())
                    .unwrap_or_else(|| {
                        tracing::warn!(
                            fallback = ?first_format,
                            "no linear (non-sRGB) surface format available"
                        );
                        first_format
                    });
                let present_mode = if caps.present_modes.contains(&wgpu::PresentMode::Fifo) {
                    wgpu::PresentMode::Fifo
                } else {
                    caps.present_modes
                        .first()
                        .copied()
                        .unwrap_or(wgpu::PresentMode::Fifo)
                };
                let config = wgpu::SurfaceConfiguration {
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                    format,
                    width,
                    height,
                    present_mode,
                    alpha_mode: caps
                        .alpha_modes
                        .first()
                        .copied()
                        .unwrap_or(wgpu::CompositeAlphaMode::Auto),
                    view_formats: vec![],
                    desired_maximum_frame_latency: 2,
                };
                surface.configure(&ctx.device, &config);
                tracing::debug!(?format, ?present_mode, width, height, "configured surface");
                Ok(Self {
                    target: CanvasTarget::Surface { surface, config },
                    format,
                    width,
                    height,
                })
            }
            CanvasSource::Offscreen => Ok(Self {
                target: CanvasTarget::Offscreen {
                    texture: create_offscreen_texture(&ctx.device, width, height),
                },
                format: OFFSCREEN_FORMAT,
                width,
                height,
            }),
        }
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_offscreen(&self) -> bool {
        matches!(self.target, CanvasTarget::Offscreen { .. })
    }

    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        let width = width.max(1);
        let height = height.max(1);
        self.width = width;
        self.height = height;
        match &mut self.target {
            CanvasTarget::Surface { surface, config } => {
                config.width = width;
                config.height = height;
                surface.configure(device, config);
            }
            CanvasTarget::Offscreen { texture } => {
                texture.destroy();
                *texture = create_offscreen_texture(device, width, height);
            }
        }
    }

    /// Current frame target; `Ok(None)` means skip this frame.
    pub fn acquire(&mut self, device: &wgpu::Device) -> Result<Option<CanvasFrame>, RenderError> {
        match &mut self.target {
            CanvasTarget::Offscreen { texture } => Ok(Some(CanvasFrame {
                view: texture.create_view(&wgpu::TextureViewDescriptor::default()),
                surface_texture: None,
            })),
            CanvasTarget::Surface { surface, config } => match surface.get_current_texture() {
                Ok(frame) => Ok(Some(CanvasFrame {
                    view: frame
                        .texture
                        .create_view(&wgpu::TextureViewDescriptor::default()),
                    surface_texture: Some(frame),
                })),
                Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                    tracing::debug!("surface lost or outdated; reconfiguring");
                    surface.configure(device, config);
                    Ok(None)
                }
                Err(err @ wgpu::SurfaceError::OutOfMemory) => Err(RenderError::Surface(err)),
                Err(err) => {
                    tracing::warn!(error = %err, "failed to acquire surface texture");
                    Ok(None)
                }
            },
        }
    }

    /// Reads back an offscreen canvas as tightly packed RGBA8 rows.
    pub fn read_pixels(&self, ctx: &GpuContext) -> Option<Vec<u8>> {
        let CanvasTarget::Offscreen { texture } = &self.target else {
            return None;
        };
        let unpadded = self.width * 4;
        let padded = unpadded.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("canvas readback"),
            size: u64::from(padded) * u64::from(self.height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("canvas readback encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        ctx.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = ctx.device.poll(wgpu::PollType::Wait);
        rx.recv().ok()?.ok()?;

        let mapped = slice.get_mapped_range();
        let mut pixels = Vec::with_capacity((unpadded * self.height) as usize);
        for row in mapped.chunks(padded as usize) {
            pixels.extend_from_slice(&row[..unpadded as usize]);
        }
        drop(mapped);
        buffer.unmap();
        Some(pixels)
    }
}

fn create_offscreen_texture(device: &wgpu::Device, width: u32, height: u32) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("offscreen canvas"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: OFFSCREEN_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    })
}
