//! GPU-free checks of a render config against its notebook.

use crate::graph::{resolve_inputs, resolve_shaders, InputSource};
use crate::notebook::Notebook;
use crate::types::{duplicate_pass_ids, PassConfig, PassType, RenderConfig};

impl RenderConfig {
    /// Human-readable issues that would make initialization fail or leave
    /// bindings unresolved. An empty list means the cell looks renderable.
    pub fn validate(&self, notebook: &Notebook) -> Vec<String> {
        let mut issues = Vec::new();
        for id in &self.shader_ids {
            if notebook.shader(*id).is_none() {
                issues.push(format!("shader {id} is not defined in the notebook"));
            }
        }
        for id in &self.resource_ids {
            match notebook.resource(*id) {
                None => issues.push(format!("resource {id} is not defined in the notebook")),
                Some(resource) if resource.kind().is_none() => issues.push(format!(
                    "resource {id} has unsupported type '{}'",
                    resource.resource_type
                )),
                Some(_) => {}
            }
        }
        for binding in &self.pipeline.shader_bindings {
            if binding.shader_index >= self.shader_ids.len() {
                issues.push(format!(
                    "shader binding points at shader index {} but only {} shader ids are listed",
                    binding.shader_index,
                    self.shader_ids.len()
                ));
            }
        }
        for binding in &self.pipeline.resource_bindings {
            if binding.kind().is_none() {
                issues.push(format!(
                    "resource binding @group({}) @binding({}) has unsupported type '{}'",
                    binding.group, binding.binding, binding.binding_type
                ));
            }
            if binding.resource_index >= self.resource_ids.len() {
                issues.push(format!(
                    "resource binding @group({}) @binding({}) points at resource index {} but only {} resource ids are listed",
                    binding.group,
                    binding.binding,
                    binding.resource_index,
                    self.resource_ids.len()
                ));
            }
        }

        let passes: Vec<PassConfig> = if self.pipeline.render_passes.is_empty() {
            vec![PassConfig::default_main()]
        } else {
            self.pipeline.render_passes.clone()
        };
        for duplicate in duplicate_pass_ids(&passes) {
            issues.push(format!("pass id '{duplicate}' is declared more than once"));
        }
        let main_count = passes
            .iter()
            .filter(|pass| pass.pass_type == PassType::Main)
            .count();
        if main_count != 1 {
            issues.push(format!("expected exactly one main pass, found {main_count}"));
        }

        for (position, pass) in passes.iter().enumerate() {
            if pass.pass_type != PassType::Compute {
                if let Err(err) = resolve_shaders(self, pass) {
                    issues.push(format!("pass '{}': {err}", pass.id));
                }
            }
            match resolve_inputs(&passes, position) {
                Ok(inputs) => {
                    for input in inputs {
                        match input.source {
                            InputSource::Unresolved => issues.push(format!(
                                "pass '{}': input texture '{}' does not resolve",
                                pass.id, input.reference.texture_id
                            )),
                            InputSource::Resource(id) if notebook.resource(id).is_none() => {
                                issues.push(format!(
                                    "pass '{}': input texture '{}' names a missing resource",
                                    pass.id, input.reference.texture_id
                                ))
                            }
                            _ => {}
                        }
                    }
                }
                Err(err) => issues.push(err.to_string()),
            }
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn notebook() -> Notebook {
        serde_json::from_value(json!({
            "shaders": [
                {"id": 1, "code": "@vertex fn main() {}"},
                {"id": 2, "code": "@fragment fn main() {}"}
            ],
            "resources": [
                {"id": 7, "resource_type": "texture", "data": ""}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn clean_config_has_no_issues() {
        let config: RenderConfig = serde_json::from_value(json!({
            "shader_ids": [1, 2],
            "resource_ids": [7],
            "pipeline": {
                "shader_bindings": [
                    {"shader_index": 0, "shader_stage": "vertex"},
                    {"shader_index": 1, "shader_stage": "fragment"}
                ],
                "render_passes": [
                    {"id": "blur", "pass_type": "intermediate",
                     "output_textures": [{"id": "out"}]},
                    {"id": "main", "input_textures": [
                        {"texture_id": "blur_out"},
                        {"texture_id": "7"}
                    ]}
                ]
            }
        }))
        .unwrap();
        assert_eq!(config.validate(&notebook()), Vec::<String>::new());
    }

    #[test]
    fn reports_each_problem() {
        let config: RenderConfig = serde_json::from_value(json!({
            "shader_ids": [1, 9],
            "resource_ids": [8],
            "pipeline": {
                "shader_bindings": [
                    {"shader_index": 0, "shader_stage": "vertex"},
                    {"shader_index": 3, "shader_stage": "fragment"}
                ],
                "resource_bindings": [
                    {"group": 2, "binding": 0, "binding_type": "atomic", "resource_index": 0}
                ],
                "render_passes": [
                    {"id": "a", "pass_type": "main"},
                    {"id": "a", "pass_type": "main",
                     "input_textures": [{"texture_id": "ghost_tex"}]}
                ]
            }
        }))
        .unwrap();
        let issues = config.validate(&notebook());
        let has = |needle: &str| issues.iter().any(|issue| issue.contains(needle));
        assert!(has("shader 9 is not defined"), "{issues:?}");
        assert!(has("resource 8 is not defined"), "{issues:?}");
        assert!(has("shader index 3"), "{issues:?}");
        assert!(has("unsupported type 'atomic'"), "{issues:?}");
        assert!(has("declared more than once"), "{issues:?}");
        assert!(has("exactly one main pass, found 2"), "{issues:?}");
        assert!(has("'ghost_tex' does not resolve"), "{issues:?}");
    }
}
