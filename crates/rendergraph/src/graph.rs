//! Compiled pass graph.
//!
//! `RenderGraph::build` resolves, once per pipeline (re)build, everything the
//! GPU managers would otherwise look up by string: each pass's shader pair,
//! and each input texture reference as a [`TextureKey`] or [`ResourceId`].

use std::collections::HashMap;

use tracing::warn;

use crate::error::RenderError;
use crate::ids::{PassIndex, ResourceId, ShaderId, TextureKey};
use crate::reflect::MAX_BINDING;
use crate::types::{
    duplicate_pass_ids, InputTextureRef, PassConfig, PassType, RenderConfig, ShaderStage,
    PREVIOUS_PASS_ALIAS,
};

/// Shader module plus entry point for one pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StageShader {
    /// Index into `PipelineConfig::shader_bindings`.
    pub binding_index: usize,
    pub shader: ShaderId,
    pub entry_point: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderPair {
    pub vertex: StageShader,
    pub fragment: StageShader,
}

/// What an input texture reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource {
    PassOutput(TextureKey),
    Resource(ResourceId),
    Unresolved,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedInput {
    pub reference: InputTextureRef,
    /// Texture binding; the sampler sits at `binding + 1`.
    pub binding: u32,
    pub source: InputSource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PassNode {
    pub index: PassIndex,
    pub config: PassConfig,
    /// `None` for compute passes, which are tagged but never compiled.
    pub shaders: Option<ShaderPair>,
    pub inputs: Vec<ResolvedInput>,
}

impl PassNode {
    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn pass_type(&self) -> PassType {
        self.config.pass_type
    }

    pub fn is_main(&self) -> bool {
        self.config.pass_type == PassType::Main
    }

    /// Bind group index holding the input textures, if the pass samples any.
    pub fn input_group(&self) -> Option<u32> {
        self.inputs.first().map(|input| input.reference.group)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderGraph {
    passes: Vec<PassNode>,
}

impl RenderGraph {
    pub fn build(config: &RenderConfig) -> Result<Self, RenderError> {
        let declared = &config.pipeline.render_passes;
        let passes: Vec<PassConfig> = if declared.is_empty() {
            tracing::debug!("pipeline declares no passes; synthesizing default main pass");
            vec![PassConfig::default_main()]
        } else {
            declared.clone()
        };

        if let Some(duplicate) = duplicate_pass_ids(&passes).into_iter().next() {
            return Err(RenderError::DuplicatePass(duplicate));
        }

        let main_count = passes.iter().filter(|pass| pass.pass_type == PassType::Main).count();
        if main_count != 1 {
            warn!(main_count, "pipeline should declare exactly one main pass");
        }

        let mut nodes = Vec::with_capacity(passes.len());
        for (position, pass) in passes.iter().enumerate() {
            let shaders = if pass.pass_type == PassType::Compute {
                None
            } else {
                Some(resolve_shaders(config, pass)?)
            };
            let inputs = resolve_inputs(&passes, position)?;
            for input in inputs.iter().filter(|input| input.source == InputSource::Unresolved) {
                warn!(
                    pass = %pass.id,
                    texture = %input.reference.texture_id,
                    "input texture reference does not resolve"
                );
            }
            nodes.push(PassNode {
                index: PassIndex(position),
                config: pass.clone(),
                shaders,
                inputs,
            });
        }

        Ok(Self { passes: nodes })
    }

    pub fn passes(&self) -> &[PassNode] {
        &self.passes
    }

    pub fn pass(&self, index: PassIndex) -> Option<&PassNode> {
        self.passes.get(index.0)
    }

    pub fn find(&self, id: &str) -> Option<&PassNode> {
        self.passes.iter().find(|pass| pass.config.id == id)
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }
}

/// Picks the vertex/fragment bindings of a pass: a pass-local list of at least
/// two entries wins, otherwise the first binding of each stage is used.
pub fn resolve_shaders(config: &RenderConfig, pass: &PassConfig) -> Result<ShaderPair, RenderError> {
    let bindings = &config.pipeline.shader_bindings;
    let (vertex_index, fragment_index) = match pass.shader_bindings.as_deref() {
        Some([vertex, fragment, ..]) => {
            for index in [*vertex, *fragment] {
                if index >= bindings.len() {
                    return Err(RenderError::ShaderBindingOutOfRange {
                        pass: pass.id.clone(),
                        index,
                        available: bindings.len(),
                    });
                }
            }
            (Some(*vertex), Some(*fragment))
        }
        _ => (
            bindings
                .iter()
                .position(|binding| binding.shader_stage == ShaderStage::Vertex),
            bindings
                .iter()
                .position(|binding| binding.shader_stage == ShaderStage::Fragment),
        ),
    };

    let stage = |index: Option<usize>, stage: ShaderStage| -> Result<StageShader, RenderError> {
        let index = index.ok_or_else(|| RenderError::MissingShader {
            pass: pass.id.clone(),
            stage,
        })?;
        let binding = &bindings[index];
        let shader = config
            .shader_ids
            .get(binding.shader_index)
            .copied()
            .ok_or(RenderError::ShaderIndexOutOfRange {
                index: binding.shader_index,
                available: config.shader_ids.len(),
            })?;
        Ok(StageShader {
            binding_index: index,
            shader,
            entry_point: binding.entry_point.clone(),
        })
    };

    Ok(ShaderPair {
        vertex: stage(vertex_index, ShaderStage::Vertex)?,
        fragment: stage(fragment_index, ShaderStage::Fragment)?,
    })
}

/// Resolves every input reference of `passes[position]`.
///
/// Input textures share one bind group; references without an explicit
/// binding take consecutive texture/sampler pairs (`0/1`, `2/3`, ...).
pub fn resolve_inputs(
    passes: &[PassConfig],
    position: usize,
) -> Result<Vec<ResolvedInput>, RenderError> {
    let pass = &passes[position];
    let mut taken: HashMap<u32, usize> = HashMap::new();
    let mut resolved = Vec::with_capacity(pass.input_textures.len());
    let group = pass.input_textures.first().map(|reference| reference.group);

    for (slot, reference) in pass.input_textures.iter().enumerate() {
        if Some(reference.group) != group {
            return Err(RenderError::Pipeline {
                pass: pass.id.clone(),
                message: format!(
                    "input texture '{}' uses group {} but inputs of this pass are bound in group {}",
                    reference.texture_id,
                    reference.group,
                    group.unwrap_or_default()
                ),
            });
        }
        let binding = reference
            .binding
            .unwrap_or_else(|| (slot as u32).saturating_mul(2));
        if binding >= MAX_BINDING {
            return Err(RenderError::Pipeline {
                pass: pass.id.clone(),
                message: format!(
                    "input texture '{}' binding {binding} leaves no room for its sampler (max binding {MAX_BINDING})",
                    reference.texture_id
                ),
            });
        }
        for occupied in [binding, binding + 1] {
            if let Some(previous) = taken.insert(occupied, slot) {
                return Err(RenderError::Pipeline {
                    pass: pass.id.clone(),
                    message: format!(
                        "input textures #{previous} and #{slot} overlap at binding {occupied}"
                    ),
                });
            }
        }
        resolved.push(ResolvedInput {
            reference: reference.clone(),
            binding,
            source: resolve_texture_reference(passes, position, &reference.texture_id),
        });
    }
    Ok(resolved)
}

/// Applies the reference rules in order: the `previous` alias, an explicit
/// `<passId>_<textureId>` key (longest matching id of another pass), then a
/// numeric resource id. A key that only names the pass's own output is
/// `Unresolved`.
pub fn resolve_texture_reference(passes: &[PassConfig], position: usize, texture_id: &str) -> InputSource {
    let texture_id = texture_id.trim();

    if texture_id == PREVIOUS_PASS_ALIAS {
        // Only the first output of the preceding pass is reachable this way.
        return match position.checked_sub(1) {
            Some(previous) if !passes[previous].output_textures.is_empty() => {
                InputSource::PassOutput(TextureKey::new(PassIndex(previous), 0))
            }
            _ => InputSource::Unresolved,
        };
    }

    let matches: Vec<(usize, usize, usize)> = passes
        .iter()
        .enumerate()
        .filter_map(|(index, pass)| {
            let rest = texture_id.strip_prefix(pass.id.as_str())?.strip_prefix('_')?;
            let slot = pass.output_textures.iter().position(|output| output.id == rest)?;
            Some((pass.id.len(), index, slot))
        })
        .collect();
    let explicit = matches
        .iter()
        .filter(|(_, index, _)| *index != position)
        .max_by_key(|(len, _, _)| *len);
    if let Some(&(_, index, slot)) = explicit {
        return InputSource::PassOutput(TextureKey::new(PassIndex(index), slot));
    }
    if !matches.is_empty() {
        // Sampling the texture being rendered to.
        return InputSource::Unresolved;
    }

    match texture_id.parse::<u64>() {
        Ok(id) => InputSource::Resource(ResourceId(id)),
        Err(_) => InputSource::Unresolved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(passes: serde_json::Value) -> RenderConfig {
        serde_json::from_value(json!({
            "shader_ids": [10, 11, 12],
            "pipeline": {
                "shader_bindings": [
                    {"shader_index": 0, "shader_stage": "vertex"},
                    {"shader_index": 1, "shader_stage": "fragment"},
                    {"shader_index": 2, "shader_stage": "fragment", "entry_point": "blur"}
                ],
                "render_passes": passes
            }
        }))
        .unwrap()
    }

    #[test]
    fn synthesizes_default_main_pass() {
        let graph = RenderGraph::build(&config(json!([]))).unwrap();
        assert_eq!(graph.len(), 1);
        let main = &graph.passes()[0];
        assert_eq!(main.id(), "main");
        assert!(main.is_main());
        let shaders = main.shaders.as_ref().unwrap();
        assert_eq!(shaders.vertex.shader, ShaderId(10));
        assert_eq!(shaders.fragment.shader, ShaderId(11));
    }

    #[test]
    fn pass_local_bindings_override_global_list() {
        let graph = RenderGraph::build(&config(json!([
            {"id": "main", "pass_type": "main", "shader_bindings": [0, 2]}
        ])))
        .unwrap();
        let shaders = graph.passes()[0].shaders.as_ref().unwrap();
        assert_eq!(shaders.fragment.shader, ShaderId(12));
        assert_eq!(shaders.fragment.entry_point, "blur");

        let err = RenderGraph::build(&config(json!([
            {"id": "main", "shader_bindings": [0, 7]}
        ])))
        .unwrap_err();
        assert!(matches!(err, RenderError::ShaderBindingOutOfRange { index: 7, .. }));
    }

    #[test]
    fn missing_stage_is_fatal_except_for_compute() {
        let mut cfg = config(json!([{"id": "main"}]));
        cfg.pipeline.shader_bindings.retain(|b| b.shader_stage == ShaderStage::Vertex);
        let err = RenderGraph::build(&cfg).unwrap_err();
        assert!(matches!(
            err,
            RenderError::MissingShader {
                stage: ShaderStage::Fragment,
                ..
            }
        ));

        cfg.pipeline.render_passes[0].pass_type = PassType::Compute;
        let graph = RenderGraph::build(&cfg).unwrap();
        assert!(graph.passes()[0].shaders.is_none());
    }

    #[test]
    fn duplicate_pass_ids_are_rejected() {
        let err = RenderGraph::build(&config(json!([{"id": "a"}, {"id": "a"}]))).unwrap_err();
        assert!(matches!(err, RenderError::DuplicatePass(ref id) if id == "a"));
    }

    #[test]
    fn previous_alias_takes_first_output_only() {
        let graph = RenderGraph::build(&config(json!([
            {"id": "scene", "pass_type": "intermediate",
             "output_textures": [{"id": "color"}, {"id": "normals"}]},
            {"id": "main", "input_textures": [{"texture_id": "previous"}]}
        ])))
        .unwrap();
        let input = &graph.passes()[1].inputs[0];
        assert_eq!(input.source, InputSource::PassOutput(TextureKey::new(PassIndex(0), 0)));
        assert_eq!(input.binding, 0);
        assert_eq!(graph.passes()[1].input_group(), Some(1));
    }

    #[test]
    fn previous_alias_without_outputs_is_unresolved() {
        let graph = RenderGraph::build(&config(json!([
            {"id": "scene", "pass_type": "intermediate"},
            {"id": "main", "input_textures": [{"texture_id": "previous"}]}
        ])))
        .unwrap();
        assert_eq!(graph.passes()[1].inputs[0].source, InputSource::Unresolved);

        let first = RenderGraph::build(&config(json!([
            {"id": "main", "input_textures": [{"texture_id": "previous"}]}
        ])))
        .unwrap();
        assert_eq!(first.passes()[0].inputs[0].source, InputSource::Unresolved);
    }

    #[test]
    fn explicit_references_prefer_longest_pass_id() {
        let passes: Vec<PassConfig> = serde_json::from_value(json!([
            {"id": "blur", "output_textures": [{"id": "h_out"}]},
            {"id": "blur_h", "output_textures": [{"id": "out"}]},
            {"id": "main"}
        ]))
        .unwrap();
        assert_eq!(
            resolve_texture_reference(&passes, 2, "blur_h_out"),
            InputSource::PassOutput(TextureKey::new(PassIndex(1), 0))
        );
        // From `blur_h` itself the key can only mean `blur`'s `h_out`.
        assert_eq!(
            resolve_texture_reference(&passes, 1, "blur_h_out"),
            InputSource::PassOutput(TextureKey::new(PassIndex(0), 0))
        );
        assert_eq!(
            resolve_texture_reference(&passes, 2, "42"),
            InputSource::Resource(ResourceId(42))
        );
        assert_eq!(resolve_texture_reference(&passes, 2, "nope_tex"), InputSource::Unresolved);
    }

    #[test]
    fn own_output_is_unresolved() {
        let passes: Vec<PassConfig> = serde_json::from_value(json!([
            {"id": "7", "output_textures": [{"id": "1"}]},
            {"id": "main"}
        ]))
        .unwrap();
        assert_eq!(resolve_texture_reference(&passes, 0, "7_1"), InputSource::Unresolved);
        assert_eq!(
            resolve_texture_reference(&passes, 1, "7_1"),
            InputSource::PassOutput(TextureKey::new(PassIndex(0), 0))
        );
    }

    #[test]
    fn input_binding_must_leave_room_for_sampler() {
        let err = RenderGraph::build(&config(json!([
            {"id": "a", "pass_type": "intermediate", "output_textures": [{"id": "out"}]},
            {"id": "main", "input_textures": [{"texture_id": "a_out", "binding": 4294967295u32}]}
        ])))
        .unwrap_err();
        assert!(matches!(err, RenderError::Pipeline { ref pass, .. } if pass == "main"));

        let err = RenderGraph::build(&config(json!([
            {"id": "main", "input_textures": [{"texture_id": "5", "binding": 999}]}
        ])))
        .unwrap_err();
        assert!(err.to_string().contains("max binding 999"));

        let graph = RenderGraph::build(&config(json!([
            {"id": "main", "input_textures": [{"texture_id": "5", "binding": 998}]}
        ])))
        .unwrap();
        assert_eq!(graph.passes()[0].inputs[0].binding, 998);
    }

    #[test]
    fn input_bindings_default_to_consecutive_pairs() {
        let graph = RenderGraph::build(&config(json!([
            {"id": "a", "pass_type": "intermediate", "output_textures": [{"id": "c"}]},
            {"id": "main", "input_textures": [
                {"texture_id": "a_c"}, {"texture_id": "5"}
            ]}
        ])))
        .unwrap();
        let bindings: Vec<u32> = graph.passes()[1].inputs.iter().map(|i| i.binding).collect();
        assert_eq!(bindings, vec![0, 2]);

        let err = RenderGraph::build(&config(json!([
            {"id": "main", "input_textures": [
                {"texture_id": "5", "binding": 0}, {"texture_id": "6", "binding": 1}
            ]}
        ])))
        .unwrap_err();
        assert!(matches!(err, RenderError::Pipeline { .. }));
    }
}
