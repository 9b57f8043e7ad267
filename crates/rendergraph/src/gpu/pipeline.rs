use std::collections::{BTreeMap, BTreeSet};

use crate::error::RenderError;
use crate::graph::{InputSource, PassNode, RenderGraph};
use crate::ids::{PassIndex, UniformScope};
use crate::types::{BindingKind, PassType, RenderConfig};

use super::context::GpuContext;
use super::geometry::quad_vertex_layout;
use super::resources::ResourceManager;
use super::textures::DEPTH_FORMAT;
use super::uniforms::UniformManager;

pub const FALLBACK_COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// What occupies one bind group index of a pass pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupSlot {
    /// Group 0 taken from the reflected uniforms of a shader instance.
    ReflectedGlobals(UniformScope),
    /// Group 0 built from time, resolution and the declared custom uniforms.
    SynthesizedGlobals,
    /// Any other group declared by the reflected shader.
    ReflectedUniforms(UniformScope, u32),
    InputTextures,
    Resources(u32),
    /// Filler so group indices stay contiguous.
    Empty,
}

impl GroupSlot {
    fn reserved_for(&self) -> &'static str {
        match self {
            GroupSlot::ReflectedGlobals(_) | GroupSlot::SynthesizedGlobals => "globals",
            GroupSlot::ReflectedUniforms(..) => "reflected uniforms",
            GroupSlot::InputTextures => "input textures",
            GroupSlot::Resources(_) => "resources",
            GroupSlot::Empty => "nothing",
        }
    }
}

/// Reflection scope whose uniforms provide a pass's globals: the fragment
/// shader when it declares any, else the vertex shader.
pub fn globals_scope(pass: &PassNode, uniforms: &UniformManager) -> Option<UniformScope> {
    let shaders = pass.shaders.as_ref()?;
    [shaders.fragment.shader, shaders.vertex.shader]
        .into_iter()
        .map(|shader| UniformScope::new(pass.index, shader))
        .find(|scope| uniforms.has_reflection(*scope))
}

/// Assigns every bind group index a pass uses, filling gaps with
/// [`GroupSlot::Empty`].
pub fn plan_group_slots(
    pass: &PassNode,
    config: &RenderConfig,
    reflected: Option<(UniformScope, &[u32])>,
    max_bind_groups: u32,
) -> Result<Vec<GroupSlot>, RenderError> {
    let mut slots: BTreeMap<u32, GroupSlot> = BTreeMap::new();
    let mut claim = |group: u32, slot: GroupSlot| -> Result<(), RenderError> {
        if group >= max_bind_groups {
            return Err(RenderError::TooManyBindGroups {
                pass: pass.id().to_string(),
                group,
                max: max_bind_groups,
            });
        }
        if let Some(existing) = slots.get(&group) {
            return Err(RenderError::GroupConflict {
                pass: pass.id().to_string(),
                group,
                reserved: existing.reserved_for(),
            });
        }
        slots.insert(group, slot);
        Ok(())
    };

    match reflected {
        Some((scope, groups)) if groups.contains(&0) => {
            claim(0, GroupSlot::ReflectedGlobals(scope))?;
            for group in groups.iter().copied().filter(|group| *group != 0) {
                claim(group, GroupSlot::ReflectedUniforms(scope, group))?;
            }
        }
        Some((scope, groups)) => {
            claim(0, GroupSlot::SynthesizedGlobals)?;
            for group in groups.iter().copied() {
                claim(group, GroupSlot::ReflectedUniforms(scope, group))?;
            }
        }
        None => claim(0, GroupSlot::SynthesizedGlobals)?,
    }

    if let Some(group) = pass.input_group() {
        claim(group, GroupSlot::InputTextures)?;
    }

    let resource_groups: BTreeSet<u32> = config
        .pipeline
        .resource_bindings
        .iter()
        .map(|binding| binding.group)
        .collect();
    for group in resource_groups {
        claim(group, GroupSlot::Resources(group))?;
    }

    let count = slots.keys().next_back().map_or(0, |last| last + 1);
    Ok((0..count)
        .map(|group| slots.remove(&group).unwrap_or(GroupSlot::Empty))
        .collect())
}

/// Whether the input feeding `source` can be sampled with filtering.
pub fn input_filterable(graph: &RenderGraph, source: InputSource, features: wgpu::Features) -> bool {
    match source {
        InputSource::PassOutput(key) => graph
            .pass(key.pass)
            .and_then(|pass| pass.config.output_textures.get(key.slot))
            .map_or(true, |spec| {
                spec.texture_format()
                    .guaranteed_format_features(features)
                    .flags
                    .contains(wgpu::TextureFormatFeatureFlags::FILTERABLE)
            }),
        InputSource::Resource(_) | InputSource::Unresolved => true,
    }
}

/// Compiled pipeline of one pass, with the layouts its bind groups must match.
pub struct PassPipeline {
    pub pass: PassIndex,
    pub pipeline: wgpu::RenderPipeline,
    pub slots: Vec<GroupSlot>,
    pub layouts: Vec<wgpu::BindGroupLayout>,
    /// Per input reference: whether a filtering sampler is bound.
    pub input_filterable: Vec<bool>,
}

#[derive(Default)]
pub struct RenderPipelineManager {
    pipelines: BTreeMap<PassIndex, PassPipeline>,
}

impl RenderPipelineManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles one pipeline per non-compute pass. Any failure aborts the
    /// whole build; already compiled pipelines are discarded.
    pub fn create_render_pipelines(
        &mut self,
        ctx: &GpuContext,
        graph: &RenderGraph,
        config: &RenderConfig,
        resources: &ResourceManager,
        uniforms: &UniformManager,
        canvas_format: wgpu::TextureFormat,
    ) -> Result<usize, RenderError> {
        self.pipelines.clear();
        let mut compiled = BTreeMap::new();
        for pass in graph.passes() {
            if pass.pass_type() == PassType::Compute {
                tracing::debug!(pass = %pass.id(), "compute pass is tagged only; no pipeline");
                continue;
            }
            let pipeline = self.create_pass_pipeline(
                ctx,
                graph,
                pass,
                config,
                resources,
                uniforms,
                canvas_format,
            )?;
            compiled.insert(pass.index, pipeline);
        }
        self.pipelines = compiled;
        Ok(self.pipelines.len())
    }

    #[allow(clippy::too_many_arguments)]
    fn create_pass_pipeline(
        &self,
        ctx: &GpuContext,
        graph: &RenderGraph,
        pass: &PassNode,
        config: &RenderConfig,
        resources: &ResourceManager,
        uniforms: &UniformManager,
        canvas_format: wgpu::TextureFormat,
    ) -> Result<PassPipeline, RenderError> {
        let Some(shaders) = pass.shaders.as_ref() else {
            return Err(RenderError::MissingShader {
                pass: pass.id().to_string(),
                stage: crate::types::ShaderStage::Vertex,
            });
        };
        let vertex_module = resources
            .shader(shaders.vertex.shader)
            .ok_or(RenderError::ShaderNotLoaded(shaders.vertex.shader))?;
        let fragment_module = resources
            .shader(shaders.fragment.shader)
            .ok_or(RenderError::ShaderNotLoaded(shaders.fragment.shader))?;

        let scope = globals_scope(pass, uniforms);
        let reflected_groups = scope.map(|scope| (scope, uniforms.groups(scope)));
        let slots = plan_group_slots(
            pass,
            config,
            reflected_groups
                .as_ref()
                .map(|(scope, groups)| (*scope, groups.as_slice())),
            ctx.limits().max_bind_groups,
        )?;

        let features = ctx.device.features();
        let input_filterable: Vec<bool> = pass
            .inputs
            .iter()
            .map(|input| input_filterable(graph, input.source, features))
            .collect();

        let mut layouts = Vec::with_capacity(slots.len());
        for (group, slot) in slots.iter().enumerate() {
            let layout = match slot {
                GroupSlot::ReflectedGlobals(scope) => uniforms.layout(*scope, 0).cloned(),
                GroupSlot::ReflectedUniforms(scope, group) => uniforms.layout(*scope, *group).cloned(),
                GroupSlot::SynthesizedGlobals => {
                    Some(globals_layout(&ctx.device, config.uniforms.len()))
                }
                GroupSlot::InputTextures => {
                    Some(input_layout(&ctx.device, pass, &input_filterable))
                }
                GroupSlot::Resources(group) => Some(resource_layout(&ctx.device, config, *group)?),
                GroupSlot::Empty => Some(ctx.device.create_bind_group_layout(
                    &wgpu::BindGroupLayoutDescriptor {
                        label: Some("empty group layout"),
                        entries: &[],
                    },
                )),
            };
            let layout = layout.ok_or_else(|| RenderError::Pipeline {
                pass: pass.id().to_string(),
                message: format!("reflected layout for group {group} was not created"),
            })?;
            layouts.push(layout);
        }

        let targets: Vec<Option<wgpu::ColorTargetState>> = color_formats(pass, canvas_format)
            .into_iter()
            .map(|format| {
                Some(wgpu::ColorTargetState {
                    format,
                    blend: pass.config.blend.to_wgpu(),
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();

        let depth_stencil = pass.config.depth_enabled.then(|| wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        let label = format!("pass '{}' pipeline", pass.id());
        let pipeline = ctx
            .validated(|device| {
                let layout_refs: Vec<&wgpu::BindGroupLayout> = layouts.iter().collect();
                let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some(&label),
                    bind_group_layouts: &layout_refs,
                    push_constant_ranges: &[],
                });
                device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(&label),
                    layout: Some(&pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: vertex_module,
                        entry_point: Some(shaders.vertex.entry_point.as_str()),
                        buffers: &[quad_vertex_layout()],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    },
                    primitive: wgpu::PrimitiveState {
                        topology: wgpu::PrimitiveTopology::TriangleList,
                        strip_index_format: None,
                        front_face: wgpu::FrontFace::Ccw,
                        cull_mode: None,
                        polygon_mode: wgpu::PolygonMode::Fill,
                        unclipped_depth: false,
                        conservative: false,
                    },
                    depth_stencil,
                    multisample: wgpu::MultisampleState {
                        count: 1,
                        mask: !0,
                        alpha_to_coverage_enabled: false,
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: fragment_module,
                        entry_point: Some(shaders.fragment.entry_point.as_str()),
                        targets: &targets,
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    }),
                    multiview: None,
                    cache: None,
                })
            })
            .map_err(|message| RenderError::Pipeline {
                pass: pass.id().to_string(),
                message,
            })?;

        tracing::debug!(
            pass = %pass.id(),
            groups = slots.len(),
            targets = targets.len(),
            depth = pass.config.depth_enabled,
            "created render pipeline"
        );

        Ok(PassPipeline {
            pass: pass.index,
            pipeline,
            slots,
            layouts,
            input_filterable,
        })
    }

    pub fn pipeline(&self, pass: PassIndex) -> Option<&PassPipeline> {
        self.pipelines.get(&pass)
    }

    pub fn pipelines(&self) -> impl Iterator<Item = &PassPipeline> {
        self.pipelines.values()
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    pub fn clear(&mut self) {
        self.pipelines.clear();
    }
}

/// `main` targets the canvas; other passes target their declared outputs.
pub fn color_formats(pass: &PassNode, canvas_format: wgpu::TextureFormat) -> Vec<wgpu::TextureFormat> {
    if pass.is_main() {
        return vec![canvas_format];
    }
    let formats: Vec<wgpu::TextureFormat> = pass
        .config
        .output_textures
        .iter()
        .map(|output| output.texture_format())
        .collect();
    if formats.is_empty() {
        vec![FALLBACK_COLOR_FORMAT]
    } else {
        formats
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// time @0, resolution @1, then one entry per declared uniform at `i + 2`.
fn globals_layout(device: &wgpu::Device, custom_count: usize) -> wgpu::BindGroupLayout {
    let entries: Vec<wgpu::BindGroupLayoutEntry> = (0..custom_count as u32 + 2)
        .map(uniform_entry)
        .collect();
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("globals layout"),
        entries: &entries,
    })
}

fn input_layout(device: &wgpu::Device, pass: &PassNode, filterable: &[bool]) -> wgpu::BindGroupLayout {
    let mut entries = Vec::with_capacity(pass.inputs.len() * 2);
    for (input, filterable) in pass.inputs.iter().zip(filterable) {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: input.binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float {
                    filterable: *filterable,
                },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: input.binding + 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(if *filterable {
                wgpu::SamplerBindingType::Filtering
            } else {
                wgpu::SamplerBindingType::NonFiltering
            }),
            count: None,
        });
    }
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(&format!("pass '{}' input textures", pass.id())),
        entries: &entries,
    })
}

fn resource_layout(
    device: &wgpu::Device,
    config: &RenderConfig,
    group: u32,
) -> Result<wgpu::BindGroupLayout, RenderError> {
    let mut entries = Vec::new();
    for binding in config
        .pipeline
        .resource_bindings
        .iter()
        .filter(|binding| binding.group == group)
    {
        let kind = binding
            .kind()
            .ok_or_else(|| RenderError::UnsupportedBindingType(binding.binding_type.clone()))?;
        let (visibility, ty) = match kind {
            BindingKind::Uniform => (
                wgpu::ShaderStages::VERTEX_FRAGMENT,
                wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
            ),
            BindingKind::Storage => (
                wgpu::ShaderStages::FRAGMENT,
                wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: true },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
            ),
            BindingKind::Texture => (
                wgpu::ShaderStages::VERTEX_FRAGMENT,
                wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
            ),
            BindingKind::Sampler => (
                wgpu::ShaderStages::VERTEX_FRAGMENT,
                wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            ),
        };
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: binding.binding,
            visibility,
            ty,
            count: None,
        });
    }
    Ok(device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(&format!("resource group {group}")),
        entries: &entries,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ShaderId;
    use serde_json::json;

    fn graph_and_config(extra: serde_json::Value) -> (RenderGraph, RenderConfig) {
        let mut value = json!({
            "shader_ids": [1, 2],
            "pipeline": {
                "shader_bindings": [
                    {"shader_index": 0, "shader_stage": "vertex"},
                    {"shader_index": 1, "shader_stage": "fragment"}
                ],
                "render_passes": [
                    {"id": "scene", "pass_type": "intermediate",
                     "output_textures": [{"id": "color", "format": "rgba16float"}]},
                    {"id": "main", "input_textures": [{"texture_id": "previous"}]}
                ]
            }
        });
        if let (Some(pipeline), Some(extra)) = (value["pipeline"].as_object_mut(), extra.as_object()) {
            for (key, entry) in extra {
                pipeline.insert(key.clone(), entry.clone());
            }
        }
        let config: RenderConfig = serde_json::from_value(value).unwrap();
        (RenderGraph::build(&config).unwrap(), config)
    }

    #[test]
    fn fixed_group_order_with_gap_filling() {
        let (graph, config) = graph_and_config(json!({
            "resource_bindings": [
                {"group": 3, "binding": 0, "binding_type": "storage", "resource_index": 0}
            ]
        }));
        let main = &graph.passes()[1];
        let slots = plan_group_slots(main, &config, None, 4).unwrap();
        assert_eq!(
            slots,
            vec![
                GroupSlot::SynthesizedGlobals,
                GroupSlot::InputTextures,
                GroupSlot::Empty,
                GroupSlot::Resources(3)
            ]
        );
        let scene = &graph.passes()[0];
        assert_eq!(
            plan_group_slots(scene, &config, None, 4).unwrap(),
            vec![
                GroupSlot::SynthesizedGlobals,
                GroupSlot::Empty,
                GroupSlot::Empty,
                GroupSlot::Resources(3)
            ]
        );
    }

    #[test]
    fn reflected_globals_take_group_zero() {
        let (graph, config) = graph_and_config(json!({}));
        let main = &graph.passes()[1];
        let scope = UniformScope::new(main.index, ShaderId(2));
        let slots = plan_group_slots(main, &config, Some((scope, &[0u32, 2][..])), 4).unwrap();
        assert_eq!(
            slots,
            vec![
                GroupSlot::ReflectedGlobals(scope),
                GroupSlot::InputTextures,
                GroupSlot::ReflectedUniforms(scope, 2)
            ]
        );
    }

    #[test]
    fn conflicting_groups_are_fatal() {
        let (graph, config) = graph_and_config(json!({
            "resource_bindings": [
                {"group": 1, "binding": 0, "binding_type": "uniform", "resource_index": 0}
            ]
        }));
        let err = plan_group_slots(&graph.passes()[1], &config, None, 4).unwrap_err();
        assert!(matches!(
            err,
            RenderError::GroupConflict {
                group: 1,
                reserved: "input textures",
                ..
            }
        ));

        let (graph, config) = graph_and_config(json!({
            "resource_bindings": [
                {"group": 5, "binding": 0, "binding_type": "uniform", "resource_index": 0}
            ]
        }));
        let err = plan_group_slots(&graph.passes()[1], &config, None, 4).unwrap_err();
        assert!(matches!(err, RenderError::TooManyBindGroups { group: 5, max: 4, .. }));
    }

    #[test]
    fn color_targets_follow_pass_type() {
        let (graph, _) = graph_and_config(json!({}));
        let canvas = wgpu::TextureFormat::Bgra8Unorm;
        assert_eq!(
            color_formats(&graph.passes()[0], canvas),
            vec![wgpu::TextureFormat::Rgba16Float]
        );
        assert_eq!(color_formats(&graph.passes()[1], canvas), vec![canvas]);
    }

    #[test]
    fn float32_outputs_are_not_filterable() {
        let (graph, _) = graph_and_config(json!({}));
        let source = graph.passes()[1].inputs[0].source;
        assert!(input_filterable(&graph, source, wgpu::Features::empty()));

        let config: RenderConfig = serde_json::from_value(json!({
            "shader_ids": [1],
            "pipeline": {
                "shader_bindings": [
                    {"shader_index": 0, "shader_stage": "vertex"},
                    {"shader_index": 0, "shader_stage": "fragment"}
                ],
                "render_passes": [
                    {"id": "a", "pass_type": "intermediate",
                     "output_textures": [{"id": "c", "format": "r32float"}]},
                    {"id": "main", "input_textures": [{"texture_id": "a_c"}]}
                ]
            }
        }))
        .unwrap();
        let graph = RenderGraph::build(&config).unwrap();
        let source = graph.passes()[1].inputs[0].source;
        assert!(!input_filterable(&graph, source, wgpu::Features::empty()));
    }
}
