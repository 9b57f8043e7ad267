use std::collections::HashMap;
use std::fmt;

use wgpu::util::{BufferInitDescriptor, DeviceExt, TextureDataOrder};

use crate::error::RenderError;
use crate::ids::{ResourceId, ShaderId};
use crate::notebook::{ResourceAsset, ResourceKind, ShaderAsset};

use super::context::GpuContext;

/// Minimum uniform buffer alignment honoured by every allocation.
pub const UNIFORM_ALIGNMENT: u64 = 256;

pub fn align_uniform_size(len: usize) -> u64 {
    (len.max(1) as u64).div_ceil(UNIFORM_ALIGNMENT) * UNIFORM_ALIGNMENT
}

/// Every buffer the resource manager can own.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BufferKey {
    QuadVertices,
    QuadIndices,
    Time,
    Resolution,
    Camera,
    CustomUniform(String),
    Resource(ResourceId),
}

impl fmt::Display for BufferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferKey::QuadVertices => f.write_str("quad vertices"),
            BufferKey::QuadIndices => f.write_str("quad indices"),
            BufferKey::Time => f.write_str("time"),
            BufferKey::Resolution => f.write_str("resolution"),
            BufferKey::Camera => f.write_str("camera"),
            BufferKey::CustomUniform(name) => write!(f, "custom_uniform_{name}"),
            BufferKey::Resource(id) => write!(f, "resource {id}"),
        }
    }
}

/// Sampled texture with its view and default sampler.
pub struct TextureResource {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
    pub size: (u32, u32),
}

/// Sole owner of shader modules, resource textures and buffers.
pub struct ResourceManager {
    shaders: HashMap<ShaderId, wgpu::ShaderModule>,
    textures: HashMap<ResourceId, TextureResource>,
    buffers: HashMap<BufferKey, wgpu::Buffer>,
    placeholder: TextureResource,
    nearest: wgpu::Sampler,
}

impl ResourceManager {
    pub fn new(ctx: &GpuContext) -> Self {
        Self {
            shaders: HashMap::new(),
            textures: HashMap::new(),
            buffers: HashMap::new(),
            placeholder: create_placeholder_texture(&ctx.device, &ctx.queue),
            nearest: ctx.device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("non-filtering sampler"),
                ..Default::default()
            }),
        }
    }

    pub fn load_shader(&mut self, ctx: &GpuContext, shader: &ShaderAsset) -> Result<(), RenderError> {
        if !shader.shader_type.eq_ignore_ascii_case("wgsl") {
            return Err(RenderError::ShaderCompile {
                id: shader.id,
                message: format!("unsupported shader type '{}'", shader.shader_type),
            });
        }
        let label = shader
            .name
            .clone()
            .unwrap_or_else(|| format!("shader {}", shader.id));
        let module = ctx
            .validated(|device| {
                device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(&label),
                    source: wgpu::ShaderSource::Wgsl(shader.code.as_str().into()),
                })
            })
            .map_err(|message| RenderError::ShaderCompile {
                id: shader.id,
                message,
            })?;
        tracing::debug!(shader = %shader.id, "compiled shader module");
        self.shaders.insert(shader.id, module);
        Ok(())
    }

    /// Loads a notebook resource. Unknown resource types are skipped with a
    /// warning.
    pub fn load_resource(
        &mut self,
        ctx: &GpuContext,
        resource: &ResourceAsset,
    ) -> Result<(), RenderError> {
        let Some(kind) = resource.kind() else {
            tracing::warn!(
                resource = %resource.id,
                resource_type = %resource.resource_type,
                "skipping resource of unsupported type"
            );
            return Ok(());
        };
        let bytes = resource.bytes().map_err(|err| RenderError::Resource {
            id: resource.id,
            message: err.to_string(),
        })?;
        match kind {
            ResourceKind::Texture => {
                let image = image::load_from_memory(&bytes)
                    .map_err(|err| RenderError::Resource {
                        id: resource.id,
                        message: format!("failed to decode image: {err}"),
                    })?
                    .to_rgba8();
                let (width, height) = image.dimensions();
                let texture = ctx.device.create_texture_with_data(
                    &ctx.queue,
                    &wgpu::TextureDescriptor {
                        label: Some(&format!("resource texture {}", resource.id)),
                        size: wgpu::Extent3d {
                            width,
                            height,
                            depth_or_array_layers: 1,
                        },
                        mip_level_count: 1,
                        sample_count: 1,
                        dimension: wgpu::TextureDimension::D2,
                        format: wgpu::TextureFormat::Rgba8Unorm,
                        usage: wgpu::TextureUsages::TEXTURE_BINDING
                            | wgpu::TextureUsages::COPY_DST,
                        view_formats: &[],
                    },
                    TextureDataOrder::LayerMajor,
                    image.as_raw(),
                );
                let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
                let sampler = ctx.device.create_sampler(&wgpu::SamplerDescriptor {
                    label: Some("resource sampler"),
                    address_mode_u: wgpu::AddressMode::Repeat,
                    address_mode_v: wgpu::AddressMode::Repeat,
                    address_mode_w: wgpu::AddressMode::Repeat,
                    mag_filter: wgpu::FilterMode::Linear,
                    min_filter: wgpu::FilterMode::Linear,
                    mipmap_filter: wgpu::FilterMode::Linear,
                    ..Default::default()
                });
                tracing::debug!(resource = %resource.id, width, height, "loaded texture resource");
                if let Some(old) = self.textures.insert(
                    resource.id,
                    TextureResource {
                        texture,
                        view,
                        sampler,
                        size: (width, height),
                    },
                ) {
                    old.texture.destroy();
                }
            }
            ResourceKind::Buffer => {
                // Uniform bindings need 16-byte multiples; pad with zeros.
                let mut data = bytes;
                let padded = data.len().max(16).div_ceil(16) * 16;
                data.resize(padded, 0);
                self.create_storage_buffer(&ctx.device, BufferKey::Resource(resource.id), &data);
                tracing::debug!(resource = %resource.id, size = padded, "loaded buffer resource");
            }
        }
        Ok(())
    }

    pub fn create_vertex_buffer(&mut self, device: &wgpu::Device, key: BufferKey, data: &[u8]) {
        self.insert_init(device, key, data, wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST);
    }

    pub fn create_index_buffer(&mut self, device: &wgpu::Device, key: BufferKey, data: &[u8]) {
        self.insert_init(device, key, data, wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST);
    }

    /// Allocates a uniform buffer rounded up to [`UNIFORM_ALIGNMENT`] and
    /// seeds it with `data`.
    pub fn create_uniform_buffer(&mut self, device: &wgpu::Device, key: BufferKey, data: &[u8]) {
        let mut contents = data.to_vec();
        contents.resize(align_uniform_size(data.len()) as usize, 0);
        self.insert_init(
            device,
            key,
            &contents,
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        );
    }

    pub fn create_storage_buffer(&mut self, device: &wgpu::Device, key: BufferKey, data: &[u8]) {
        self.insert_init(
            device,
            key,
            data,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        );
    }

    fn insert_init(
        &mut self,
        device: &wgpu::Device,
        key: BufferKey,
        data: &[u8],
        usage: wgpu::BufferUsages,
    ) {
        let label = key.to_string();
        let buffer = device.create_buffer_init(&BufferInitDescriptor {
            label: Some(&label),
            contents: data,
            usage,
        });
        if let Some(old) = self.buffers.insert(key, buffer) {
            old.destroy();
        }
    }

    /// Writes `data` at `offset`. Unknown keys and out-of-bounds writes are
    /// logged and dropped; returns whether the write was issued.
    pub fn update_buffer(&self, queue: &wgpu::Queue, key: &BufferKey, data: &[u8], offset: u64) -> bool {
        let Some(buffer) = self.buffers.get(key) else {
            tracing::warn!(buffer = %key, "update for unknown buffer ignored");
            return false;
        };
        if offset + data.len() as u64 > buffer.size() {
            tracing::warn!(
                buffer = %key,
                offset,
                len = data.len(),
                size = buffer.size(),
                "buffer update exceeds allocation; ignored"
            );
            return false;
        }
        queue.write_buffer(buffer, offset, data);
        true
    }

    pub fn shader(&self, id: ShaderId) -> Option<&wgpu::ShaderModule> {
        self.shaders.get(&id)
    }

    pub fn texture(&self, id: ResourceId) -> Option<&TextureResource> {
        self.textures.get(&id)
    }

    pub fn buffer(&self, key: &BufferKey) -> Option<&wgpu::Buffer> {
        self.buffers.get(key)
    }

    /// 1×1 texture bound in place of input references that resolve to nothing.
    pub fn placeholder(&self) -> &TextureResource {
        &self.placeholder
    }

    /// Nearest-filter sampler for inputs whose format cannot be filtered.
    pub fn nearest_sampler(&self) -> &wgpu::Sampler {
        &self.nearest
    }

    pub fn release_buffer(&mut self, key: &BufferKey) {
        if let Some(buffer) = self.buffers.remove(key) {
            buffer.destroy();
        }
    }

    /// Drops every custom uniform buffer, keeping built-ins and resources.
    pub fn release_custom_uniforms(&mut self) {
        self.buffers.retain(|key, buffer| {
            let keep = !matches!(key, BufferKey::CustomUniform(_));
            if !keep {
                buffer.destroy();
            }
            keep
        });
    }

    pub fn release_all(&mut self) {
        for (_, buffer) in self.buffers.drain() {
            buffer.destroy();
        }
        for (_, resource) in self.textures.drain() {
            resource.texture.destroy();
        }
        self.shaders.clear();
    }

    /// Number of GPU objects currently owned (shaders, textures, buffers).
    pub fn resource_count(&self) -> usize {
        self.shaders.len() + self.textures.len() + self.buffers.len()
    }
}

fn create_placeholder_texture(device: &wgpu::Device, queue: &wgpu::Queue) -> TextureResource {
    let data = [0u8, 0, 0, 255];
    let texture = device.create_texture_with_data(
        queue,
        &wgpu::TextureDescriptor {
            label: Some("placeholder input texture"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        },
        TextureDataOrder::LayerMajor,
        &data,
    );
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::FilterMode::Linear,
        ..Default::default()
    });
    TextureResource {
        texture,
        view,
        sampler,
        size: (1, 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_sizes_round_up_to_alignment() {
        assert_eq!(align_uniform_size(0), 256);
        assert_eq!(align_uniform_size(16), 256);
        assert_eq!(align_uniform_size(256), 256);
        assert_eq!(align_uniform_size(257), 512);
    }

    #[test]
    fn buffer_keys_render_legacy_names() {
        assert_eq!(
            BufferKey::CustomUniform("speed".into()).to_string(),
            "custom_uniform_speed"
        );
    }
}
