use bytemuck::{Pod, Zeroable};

use crate::runtime::TimeSample;
use crate::types::{Camera, GeometryConfig, GeometryKind, RenderConfig};
use crate::values::UniformValue;

use super::resources::{BufferKey, ResourceManager};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

pub const QUAD_VERTICES: [QuadVertex; 4] = [
    QuadVertex {
        position: [-1.0, -1.0, 0.0],
        uv: [0.0, 1.0],
    },
    QuadVertex {
        position: [1.0, -1.0, 0.0],
        uv: [1.0, 1.0],
    },
    QuadVertex {
        position: [1.0, 1.0, 0.0],
        uv: [1.0, 0.0],
    },
    QuadVertex {
        position: [-1.0, 1.0, 0.0],
        uv: [0.0, 0.0],
    },
];

pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];
pub const QUAD_INDEX_COUNT: u32 = QUAD_INDICES.len() as u32;
pub const QUAD_VERTEX_COUNT: u32 = QUAD_VERTICES.len() as u32;

const QUAD_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x2];

/// Fixed layout of the shared quad: stride 20, position @0, uv @12.
pub fn quad_vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &QUAD_ATTRIBUTES,
    }
}

/// `time` buffer contents: elapsed seconds, frame delta, frame index.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct TimeUniform {
    pub time: f32,
    pub delta: f32,
    pub frame: f32,
    pub _reserved: f32,
}

impl From<TimeSample> for TimeUniform {
    fn from(sample: TimeSample) -> Self {
        Self {
            time: sample.seconds,
            delta: sample.delta,
            frame: sample.frame_index as f32,
            _reserved: 0.0,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ResolutionUniform {
    pub width: f32,
    pub height: f32,
    pub aspect: f32,
    pub _reserved: f32,
}

impl ResolutionUniform {
    pub fn new(width: u32, height: u32) -> Self {
        let width = width.max(1) as f32;
        let height = height.max(1) as f32;
        Self {
            width,
            height,
            aspect: width / height,
            _reserved: 0.0,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct CameraUniform {
    pub position: [f32; 4],
    pub target: [f32; 4],
    pub up: [f32; 4],
    /// fov, near, far, padding.
    pub params: [f32; 4],
}

impl From<&Camera> for CameraUniform {
    fn from(camera: &Camera) -> Self {
        let pad = |v: [f32; 3]| [v[0], v[1], v[2], 0.0];
        Self {
            position: pad(camera.position),
            target: pad(camera.target),
            up: pad(camera.up),
            params: [camera.fov, camera.near, camera.far, 0.0],
        }
    }
}

/// Draw call chosen for a pass by its geometry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawCall {
    Indexed { index_count: u32, instance_count: u32 },
    NonIndexed { vertex_count: u32, instance_count: u32 },
}

impl DrawCall {
    pub fn for_geometry(geometry: Option<&GeometryConfig>) -> Self {
        let full_quad = DrawCall::Indexed {
            index_count: QUAD_INDEX_COUNT,
            instance_count: 1,
        };
        match geometry {
            Some(GeometryConfig {
                kind: GeometryKind::Indexed,
                index_count,
                instance_count,
                ..
            }) => DrawCall::Indexed {
                index_count: index_count.unwrap_or(QUAD_INDEX_COUNT),
                instance_count: instance_count.unwrap_or(1),
            },
            Some(GeometryConfig {
                kind: GeometryKind::NonIndexed,
                vertex_count,
                instance_count,
                ..
            }) => DrawCall::NonIndexed {
                vertex_count: vertex_count.unwrap_or(QUAD_VERTEX_COUNT),
                instance_count: instance_count.unwrap_or(1),
            },
            _ => full_quad,
        }
    }
}

/// Owns the shared quad plus the built-in and custom uniform buffers (through
/// the resource manager).
#[derive(Debug, Default)]
pub struct GeometryManager {
    custom: Vec<String>,
    has_camera: bool,
    time: TimeUniform,
    resolution: ResolutionUniform,
}

impl GeometryManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_default_geometry(
        &mut self,
        resources: &mut ResourceManager,
        device: &wgpu::Device,
        width: u32,
        height: u32,
        config: &RenderConfig,
    ) {
        resources.create_vertex_buffer(
            device,
            BufferKey::QuadVertices,
            bytemuck::cast_slice(&QUAD_VERTICES),
        );
        resources.create_index_buffer(
            device,
            BufferKey::QuadIndices,
            bytemuck::cast_slice(&QUAD_INDICES),
        );

        self.time = TimeUniform::default();
        self.resolution = ResolutionUniform::new(width, height);
        resources.create_uniform_buffer(device, BufferKey::Time, bytemuck::bytes_of(&self.time));
        resources.create_uniform_buffer(
            device,
            BufferKey::Resolution,
            bytemuck::bytes_of(&self.resolution),
        );

        self.has_camera = false;
        if let Some(camera) = &config.camera {
            let uniform = CameraUniform::from(camera);
            resources.create_uniform_buffer(device, BufferKey::Camera, bytemuck::bytes_of(&uniform));
            self.has_camera = true;
        } else {
            resources.release_buffer(&BufferKey::Camera);
        }

        self.create_custom_uniforms(resources, device, config);
    }

    /// (Re)creates one buffer per declared uniform from its default value. A
    /// missing default uses the type's zero value; a default that is not a
    /// number, boolean or numeric array gets no buffer.
    pub fn create_custom_uniforms(
        &mut self,
        resources: &mut ResourceManager,
        device: &wgpu::Device,
        config: &RenderConfig,
    ) {
        resources.release_custom_uniforms();
        self.custom.clear();
        for decl in &config.uniforms {
            let value = if decl.default.is_null() {
                decl.uniform_type().zero_default()
            } else if let Some(value) = decl.default_value() {
                value
            } else {
                tracing::warn!(
                    uniform = %decl.name,
                    default = %decl.default,
                    "uniform default has no buffer representation; skipping"
                );
                continue;
            };
            resources.create_uniform_buffer(
                device,
                BufferKey::CustomUniform(decl.name.clone()),
                &value.to_aligned_bytes(),
            );
            self.custom.push(decl.name.clone());
        }
    }

    pub fn update_time(
        &mut self,
        resources: &ResourceManager,
        queue: &wgpu::Queue,
        sample: TimeSample,
    ) -> TimeUniform {
        self.time = TimeUniform::from(sample);
        resources.update_buffer(queue, &BufferKey::Time, bytemuck::bytes_of(&self.time), 0);
        self.time
    }

    pub fn update_resolution(
        &mut self,
        resources: &ResourceManager,
        queue: &wgpu::Queue,
        width: u32,
        height: u32,
    ) -> ResolutionUniform {
        self.resolution = ResolutionUniform::new(width, height);
        resources.update_buffer(
            queue,
            &BufferKey::Resolution,
            bytemuck::bytes_of(&self.resolution),
            0,
        );
        self.resolution
    }

    pub fn update_camera(
        &mut self,
        resources: &mut ResourceManager,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        camera: &Camera,
    ) -> CameraUniform {
        let uniform = CameraUniform::from(camera);
        if self.has_camera {
            resources.update_buffer(queue, &BufferKey::Camera, bytemuck::bytes_of(&uniform), 0);
        } else {
            resources.create_uniform_buffer(device, BufferKey::Camera, bytemuck::bytes_of(&uniform));
            self.has_camera = true;
        }
        uniform
    }

    /// Writes a custom uniform in its four-lane representation.
    pub fn update_custom_uniform(
        &self,
        resources: &ResourceManager,
        queue: &wgpu::Queue,
        name: &str,
        value: &UniformValue,
    ) -> bool {
        resources.update_buffer(
            queue,
            &BufferKey::CustomUniform(name.to_string()),
            &value.to_aligned_bytes(),
            0,
        )
    }

    pub fn custom_uniforms(&self) -> &[String] {
        &self.custom
    }

    pub fn has_camera(&self) -> bool {
        self.has_camera
    }

    pub fn time(&self) -> TimeUniform {
        self.time
    }

    pub fn resolution(&self) -> ResolutionUniform {
        self.resolution
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quad_layout_matches_vertex_struct() {
        assert_eq!(std::mem::size_of::<QuadVertex>(), 20);
        let layout = quad_vertex_layout();
        assert_eq!(layout.array_stride, 20);
        assert_eq!(layout.attributes[0].offset, 0);
        assert_eq!(layout.attributes[1].offset, 12);
        assert_eq!(layout.attributes[1].format, wgpu::VertexFormat::Float32x2);
    }

    #[test]
    fn uniform_structs_are_vec4_sized() {
        assert_eq!(std::mem::size_of::<TimeUniform>(), 16);
        assert_eq!(std::mem::size_of::<ResolutionUniform>(), 16);
        assert_eq!(std::mem::size_of::<CameraUniform>(), 64);
        let res = ResolutionUniform::new(640, 480);
        assert!((res.aspect - 4.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn camera_vectors_are_padded() {
        let camera: Camera =
            serde_json::from_value(json!({"position": [1, 2, 3], "target": [0, 0, 0]})).unwrap();
        let uniform = CameraUniform::from(&camera);
        assert_eq!(uniform.position, [1.0, 2.0, 3.0, 0.0]);
        assert_eq!(uniform.up, [0.0, 1.0, 0.0, 0.0]);
        assert_eq!(uniform.params, [45.0, 0.1, 100.0, 0.0]);
    }

    #[test]
    fn draw_policy_follows_geometry_type() {
        assert_eq!(
            DrawCall::for_geometry(None),
            DrawCall::Indexed {
                index_count: 6,
                instance_count: 1
            }
        );
        let indexed: GeometryConfig = serde_json::from_value(json!({"type": "indexed"})).unwrap();
        assert_eq!(
            DrawCall::for_geometry(Some(&indexed)),
            DrawCall::Indexed {
                index_count: 6,
                instance_count: 1
            }
        );
        let direct: GeometryConfig = serde_json::from_value(
            json!({"type": "nonindexed", "vertex_count": 3, "instance_count": 2}),
        )
        .unwrap();
        assert_eq!(
            DrawCall::for_geometry(Some(&direct)),
            DrawCall::NonIndexed {
                vertex_count: 3,
                instance_count: 2
            }
        );
        let other: GeometryConfig = serde_json::from_value(json!({"type": "mesh"})).unwrap();
        assert_eq!(
            DrawCall::for_geometry(Some(&other)),
            DrawCall::Indexed {
                index_count: 6,
                instance_count: 1
            }
        );
    }
}
