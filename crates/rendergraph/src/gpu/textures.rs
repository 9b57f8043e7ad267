use std::collections::BTreeMap;

use crate::graph::{PassNode, RenderGraph};
use crate::ids::TextureKey;
use crate::types::OutputTextureSpec;

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24Plus;

/// `max(1, floor(canvas * scale))`.
pub fn scaled_extent(canvas: u32, scale: f32) -> u32 {
    let scaled = (canvas as f64 * f64::from(scale.max(0.0))).floor();
    (scaled as u32).max(1)
}

/// Render target owned by one pass output.
pub struct PassTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
    pub format: wgpu::TextureFormat,
    pub size: (u32, u32),
    spec: OutputTextureSpec,
    /// Bumped every time a texture is (re)created.
    pub generation: u64,
}

pub struct DepthTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub size: (u32, u32),
    pub generation: u64,
}

/// Per-pass render targets and the shared canvas-sized depth texture.
#[derive(Default)]
pub struct TextureManager {
    textures: BTreeMap<TextureKey, PassTexture>,
    depth: Option<DepthTexture>,
    next_generation: u64,
}

impl TextureManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Creates (or reuses, when already the right size and format) one texture
    /// per declared output of `pass`.
    pub fn create_pass_textures(
        &mut self,
        device: &wgpu::Device,
        pass: &PassNode,
        canvas_width: u32,
        canvas_height: u32,
    ) {
        let outputs = &pass.config.output_textures;
        self.textures.retain(|key, texture| {
            let keep = key.pass != pass.index || key.slot < outputs.len();
            if !keep {
                texture.texture.destroy();
            }
            keep
        });
        for (slot, spec) in outputs.iter().enumerate() {
            let key = TextureKey::new(pass.index, slot);
            self.create_texture(device, key, spec, canvas_width, canvas_height);
        }
    }

    fn create_texture(
        &mut self,
        device: &wgpu::Device,
        key: TextureKey,
        spec: &OutputTextureSpec,
        canvas_width: u32,
        canvas_height: u32,
    ) {
        let size = (
            scaled_extent(canvas_width, spec.width_scale),
            scaled_extent(canvas_height, spec.height_scale),
        );
        let format = spec.texture_format();
        if let Some(existing) = self.textures.get_mut(&key) {
            if existing.size == size && existing.format == format {
                existing.spec = spec.clone();
                return;
            }
        }

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&format!("pass {} output {}", key.pass, spec.id)),
            size: wgpu::Extent3d {
                width: size.0,
                height: size.1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = device.create_sampler(
            &spec
                .sampler_config
                .clone()
                .unwrap_or_default()
                .descriptor(),
        );
        let generation = self.bump();
        tracing::debug!(pass = %key.pass, texture = %spec.id, width = size.0, height = size.1, "created pass texture");
        if let Some(old) = self.textures.insert(
            key,
            PassTexture {
                texture,
                view,
                sampler,
                format,
                size,
                spec: spec.clone(),
                generation,
            },
        ) {
            old.texture.destroy();
        }
    }

    /// Lazily creates the shared depth texture; recreated only when the canvas
    /// size changed.
    pub fn ensure_depth_texture(&mut self, device: &wgpu::Device, width: u32, height: u32) -> &DepthTexture {
        let size = (width.max(1), height.max(1));
        if self.depth.as_ref().is_some_and(|depth| depth.size != size) {
            if let Some(old) = self.depth.take() {
                old.texture.destroy();
            }
        }
        if self.depth.is_none() {
            self.next_generation += 1;
        }
        let generation = self.next_generation;
        self.depth
            .get_or_insert_with(|| create_depth_texture(device, size, generation))
    }

    /// Recomputes every owned texture from its stored scale factors and
    /// refreshes the depth texture if one exists.
    pub fn resize_textures(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        let specs: Vec<(TextureKey, OutputTextureSpec)> = self
            .textures
            .iter()
            .map(|(key, texture)| (*key, texture.spec.clone()))
            .collect();
        for (key, spec) in specs {
            self.create_texture(device, key, &spec, width, height);
        }
        if self.depth.is_some() {
            self.ensure_depth_texture(device, width, height);
        }
    }

    /// Drops textures belonging to passes or slots the graph no longer has.
    pub fn prune(&mut self, graph: &RenderGraph) {
        self.textures.retain(|key, texture| {
            let keep = graph
                .pass(key.pass)
                .is_some_and(|pass| key.slot < pass.config.output_textures.len());
            if !keep {
                texture.texture.destroy();
            }
            keep
        });
    }

    pub fn texture(&self, key: TextureKey) -> Option<&PassTexture> {
        self.textures.get(&key)
    }

    pub fn depth(&self) -> Option<&DepthTexture> {
        self.depth.as_ref()
    }

    pub fn len(&self) -> usize {
        self.textures.len() + usize::from(self.depth.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn destroy(&mut self) {
        for (_, texture) in std::mem::take(&mut self.textures) {
            texture.texture.destroy();
        }
        if let Some(depth) = self.depth.take() {
            depth.texture.destroy();
        }
    }
}

fn create_depth_texture(device: &wgpu::Device, size: (u32, u32), generation: u64) -> DepthTexture {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("shared depth texture"),
        size: wgpu::Extent3d {
            width: size.0,
            height: size.1,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    DepthTexture {
        texture,
        view,
        size,
        generation,
    }
}
