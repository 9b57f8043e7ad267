use std::collections::BTreeMap;

use crate::error::BindError;
use crate::graph::{InputSource, PassNode, RenderGraph};
use crate::ids::{PassIndex, ResourceId};
use crate::types::{BindingKind, RenderConfig};
use crate::values::UniformValue;

use super::geometry::GeometryManager;
use super::pipeline::{GroupSlot, PassPipeline, RenderPipelineManager};
use super::resources::{BufferKey, ResourceManager};
use super::textures::TextureManager;
use super::uniforms::UniformManager;

/// One binding of a user resource group, before GPU lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceSlot {
    Buffer(ResourceId),
    Texture(ResourceId),
    Sampler(ResourceId),
}

impl ResourceSlot {
    fn resource(&self) -> ResourceId {
        match self {
            ResourceSlot::Buffer(id) | ResourceSlot::Texture(id) | ResourceSlot::Sampler(id) => *id,
        }
    }
}

/// Resolves every binding of resource group `group`. Any binding that does
/// not resolve fails the whole group.
pub fn plan_resource_group(
    config: &RenderConfig,
    group: u32,
    available: impl Fn(&ResourceSlot) -> bool,
) -> Result<Vec<(u32, ResourceSlot)>, BindError> {
    let mut planned = Vec::new();
    for binding in config
        .pipeline
        .resource_bindings
        .iter()
        .filter(|binding| binding.group == group)
    {
        let unresolved = |reason: String| BindError::UnresolvedResource {
            group,
            binding: binding.binding,
            reason,
        };
        let id = config
            .resource_ids
            .get(binding.resource_index)
            .copied()
            .ok_or_else(|| {
                unresolved(format!(
                    "resource index {} out of range ({} resources)",
                    binding.resource_index,
                    config.resource_ids.len()
                ))
            })?;
        let slot = match binding.kind() {
            Some(BindingKind::Uniform | BindingKind::Storage) => ResourceSlot::Buffer(id),
            Some(BindingKind::Texture) => ResourceSlot::Texture(id),
            Some(BindingKind::Sampler) => ResourceSlot::Sampler(id),
            None => {
                return Err(unresolved(format!(
                    "unsupported binding type '{}'",
                    binding.binding_type
                )))
            }
        };
        if !available(&slot) {
            return Err(unresolved(format!("resource {} is not loaded as {slot:?}", slot.resource())));
        }
        planned.push((binding.binding, slot));
    }
    Ok(planned)
}

/// Bind groups of one pass, indexed like its pipeline layout. `None` marks a
/// group that could not be created.
#[derive(Default)]
pub struct PassBindings {
    pub groups: Vec<Option<wgpu::BindGroup>>,
}

impl PassBindings {
    /// First group index without a bind group.
    pub fn missing_group(&self) -> Option<u32> {
        self.groups
            .iter()
            .position(Option::is_none)
            .map(|group| group as u32)
    }

    pub fn is_complete(&self) -> bool {
        self.missing_group().is_none()
    }
}

/// Concrete bind groups for every compiled pass.
#[derive(Default)]
pub struct BindGroupManager {
    passes: BTreeMap<PassIndex, PassBindings>,
    /// Bumped on every rebuild.
    generation: u64,
}

impl BindGroupManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds every pass's bind groups. Returns the number of passes whose
    /// set is complete; failed groups are logged and left empty.
    #[allow(clippy::too_many_arguments)]
    pub fn create_bind_groups(
        &mut self,
        device: &wgpu::Device,
        graph: &RenderGraph,
        config: &RenderConfig,
        pipelines: &RenderPipelineManager,
        resources: &ResourceManager,
        uniforms: &UniformManager,
        textures: &TextureManager,
    ) -> usize {
        self.passes.clear();
        self.generation += 1;
        for pipeline in pipelines.pipelines() {
            let Some(pass) = graph.pass(pipeline.pass) else {
                continue;
            };
            let mut bindings = PassBindings::default();
            for (index, slot) in pipeline.slots.iter().enumerate() {
                let group = index as u32;
                let result = match slot {
                    GroupSlot::ReflectedGlobals(scope) => uniforms
                        .bind_group(*scope, 0)
                        .cloned()
                        .ok_or_else(|| BindError::MissingReflectedGroup(scope.to_string())),
                    GroupSlot::ReflectedUniforms(scope, reflected) => uniforms
                        .bind_group(*scope, *reflected)
                        .cloned()
                        .ok_or_else(|| BindError::MissingReflectedGroup(scope.to_string())),
                    GroupSlot::SynthesizedGlobals => {
                        synthesize_globals(device, pipeline, group, config, resources)
                    }
                    GroupSlot::InputTextures => {
                        input_group(device, pipeline, group, pass, resources, textures)
                    }
                    GroupSlot::Resources(declared) => {
                        resource_group(device, pipeline, group, *declared, config, resources)
                    }
                    GroupSlot::Empty => Ok(device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some("empty group"),
                        layout: &pipeline.layouts[index],
                        entries: &[],
                    })),
                };
                match result {
                    Ok(bind_group) => bindings.groups.push(Some(bind_group)),
                    Err(err) => {
                        tracing::warn!(pass = %pass.id(), group, error = %err, "bind group skipped");
                        bindings.groups.push(None);
                    }
                }
            }
            self.passes.insert(pipeline.pass, bindings);
        }
        let complete = self.passes.values().filter(|pass| pass.is_complete()).count();
        tracing::debug!(passes = self.passes.len(), complete, "created bind groups");
        complete
    }

    pub fn bindings(&self, pass: PassIndex) -> Option<&PassBindings> {
        self.passes.get(&pass)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Live uniform write path: the `custom_uniform_<name>` buffer plus every
    /// reflected scope declaring `name`. Returns the number of buffers written.
    pub fn update_uniform_buffer(
        &self,
        queue: &wgpu::Queue,
        geometry: &GeometryManager,
        resources: &ResourceManager,
        uniforms: &mut UniformManager,
        name: &str,
        value: &UniformValue,
    ) -> usize {
        let mut written = 0;
        if geometry.custom_uniforms().iter().any(|custom| custom == name)
            && geometry.update_custom_uniform(resources, queue, name, value)
        {
            written += 1;
        }
        for scope in uniforms.scopes_declaring(name) {
            if uniforms.update_uniform(queue, scope, name, value) {
                written += 1;
            }
        }
        written
    }

    pub fn clear(&mut self) {
        self.passes.clear();
    }
}

fn synthesize_globals(
    device: &wgpu::Device,
    pipeline: &PassPipeline,
    group: u32,
    config: &RenderConfig,
    resources: &ResourceManager,
) -> Result<wgpu::BindGroup, BindError> {
    let mut keys = vec![BufferKey::Time, BufferKey::Resolution];
    keys.extend(
        config
            .uniforms
            .iter()
            .map(|decl| BufferKey::CustomUniform(decl.name.clone())),
    );
    let mut entries = Vec::with_capacity(keys.len());
    for (binding, key) in keys.iter().enumerate() {
        let buffer = resources
            .buffer(key)
            .ok_or_else(|| BindError::MissingUniformBuffer(key.to_string()))?;
        entries.push(wgpu::BindGroupEntry {
            binding: binding as u32,
            resource: buffer.as_entire_binding(),
        });
    }
    Ok(device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("globals"),
        layout: &pipeline.layouts[group as usize],
        entries: &entries,
    }))
}

fn input_group(
    device: &wgpu::Device,
    pipeline: &PassPipeline,
    group: u32,
    pass: &PassNode,
    resources: &ResourceManager,
    textures: &TextureManager,
) -> Result<wgpu::BindGroup, BindError> {
    let placeholder = resources.placeholder();
    let mut resolved_any = false;
    let mut entries = Vec::with_capacity(pass.inputs.len() * 2);
    for (input, filterable) in pass.inputs.iter().zip(&pipeline.input_filterable) {
        let found = match input.source {
            InputSource::PassOutput(key) => textures
                .texture(key)
                .map(|texture| (&texture.view, &texture.sampler)),
            InputSource::Resource(id) => resources
                .texture(id)
                .map(|texture| (&texture.view, &texture.sampler)),
            InputSource::Unresolved => None,
        };
        let (view, sampler) = match found {
            Some(found) => {
                resolved_any = true;
                found
            }
            None => {
                tracing::warn!(
                    pass = %pass.id(),
                    texture = %input.reference.texture_id,
                    "input texture unavailable; binding placeholder"
                );
                (&placeholder.view, &placeholder.sampler)
            }
        };
        let sampler = if *filterable {
            sampler
        } else {
            resources.nearest_sampler()
        };
        entries.push(wgpu::BindGroupEntry {
            binding: input.binding,
            resource: wgpu::BindingResource::TextureView(view),
        });
        entries.push(wgpu::BindGroupEntry {
            binding: input.binding + 1,
            resource: wgpu::BindingResource::Sampler(sampler),
        });
    }
    if !resolved_any {
        return Err(BindError::NoTexturesResolved);
    }
    Ok(device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(&format!("pass '{}' input textures", pass.id())),
        layout: &pipeline.layouts[group as usize],
        entries: &entries,
    }))
}

fn resource_group(
    device: &wgpu::Device,
    pipeline: &PassPipeline,
    group: u32,
    declared: u32,
    config: &RenderConfig,
    resources: &ResourceManager,
) -> Result<wgpu::BindGroup, BindError> {
    let planned = plan_resource_group(config, declared, |slot| match slot {
        ResourceSlot::Buffer(id) => resources.buffer(&BufferKey::Resource(*id)).is_some(),
        ResourceSlot::Texture(id) | ResourceSlot::Sampler(id) => resources.texture(*id).is_some(),
    })?;
    let mut entries = Vec::with_capacity(planned.len());
    for (binding, slot) in &planned {
        let resource = match slot {
            ResourceSlot::Buffer(id) => resources
                .buffer(&BufferKey::Resource(*id))
                .map(|buffer| buffer.as_entire_binding()),
            ResourceSlot::Texture(id) => resources
                .texture(*id)
                .map(|texture| wgpu::BindingResource::TextureView(&texture.view)),
            ResourceSlot::Sampler(id) => resources
                .texture(*id)
                .map(|texture| wgpu::BindingResource::Sampler(&texture.sampler)),
        };
        let resource = resource.ok_or_else(|| BindError::UnresolvedResource {
            group: declared,
            binding: *binding,
            reason: format!("resource {} disappeared", slot.resource()),
        })?;
        entries.push(wgpu::BindGroupEntry {
            binding: *binding,
            resource,
        });
    }
    Ok(device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(&format!("resource group {declared}")),
        layout: &pipeline.layouts[group as usize],
        entries: &entries,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> RenderConfig {
        serde_json::from_value(json!({
            "resource_ids": [10, "11"],
            "pipeline": {
                "resource_bindings": [
                    {"group": 2, "binding": 0, "binding_type": "storage", "resource_index": 0},
                    {"group": 2, "binding": 1, "binding_type": "texture", "resource_index": 1},
                    {"group": 2, "binding": 2, "binding_type": "sampler", "resource_index": 1},
                    {"group": 3, "binding": 0, "binding_type": "uniform", "resource_index": 4}
                ]
            }
        }))
        .unwrap()
    }

    #[test]
    fn complete_resource_group_resolves_every_binding() {
        let planned = plan_resource_group(&config(), 2, |_| true).unwrap();
        assert_eq!(
            planned,
            vec![
                (0, ResourceSlot::Buffer(ResourceId(10))),
                (1, ResourceSlot::Texture(ResourceId(11))),
                (2, ResourceSlot::Sampler(ResourceId(11))),
            ]
        );
    }

    #[test]
    fn one_missing_binding_fails_the_group() {
        let err = plan_resource_group(&config(), 2, |slot| {
            !matches!(slot, ResourceSlot::Texture(_))
        })
        .unwrap_err();
        assert!(matches!(
            err,
            BindError::UnresolvedResource {
                group: 2,
                binding: 1,
                ..
            }
        ));
    }

    #[test]
    fn out_of_range_resource_index_fails_the_group() {
        let err = plan_resource_group(&config(), 3, |_| true).unwrap_err();
        assert!(matches!(err, BindError::UnresolvedResource { group: 3, binding: 0, .. }));
    }

    #[test]
    fn missing_group_reports_first_gap() {
        let bindings = PassBindings {
            groups: vec![None, None],
        };
        assert_eq!(bindings.missing_group(), Some(0));
        assert!(PassBindings::default().is_complete());
    }
}
