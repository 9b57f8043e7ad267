use std::collections::{BTreeMap, HashMap};

use wgpu::util::{BufferInitDescriptor, DeviceExt};

use crate::error::ReflectError;
use crate::ids::{ShaderId, UniformScope};
use crate::reflect::{reflect_uniforms, ReflectedUniform};
use crate::values::{UniformType, UniformValue};

use super::resources::align_uniform_size;

struct UniformBuffer {
    buffer: wgpu::Buffer,
    ty: UniformType,
    /// Last value written, in the type's uniform layout.
    encoded: Vec<u8>,
}

#[derive(Default)]
struct ScopeState {
    uniforms: Vec<ReflectedUniform>,
    layouts: BTreeMap<u32, wgpu::BindGroupLayout>,
    buffers: HashMap<String, UniformBuffer>,
    bind_groups: BTreeMap<u32, wgpu::BindGroup>,
}

/// Reflection-driven uniform buffers, layouts and bind groups, one set per
/// shader instance (pass + shader).
#[derive(Default)]
pub struct UniformManager {
    scopes: HashMap<UniformScope, ScopeState>,
    defaults: HashMap<UniformScope, HashMap<String, UniformValue>>,
}

/// Reflected uniforms grouped by `group`, each group sorted by binding.
pub fn group_uniforms(uniforms: &[ReflectedUniform]) -> BTreeMap<u32, Vec<&ReflectedUniform>> {
    let mut groups: BTreeMap<u32, Vec<&ReflectedUniform>> = BTreeMap::new();
    for uniform in uniforms {
        groups.entry(uniform.group).or_default().push(uniform);
    }
    for entries in groups.values_mut() {
        entries.sort_by_key(|uniform| uniform.binding);
    }
    groups
}

impl UniformManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reflects `source` and records its uniforms under `scope`, replacing
    /// anything previously recorded there.
    pub fn analyze_shader(
        &mut self,
        scope: UniformScope,
        source: &str,
    ) -> Result<&[ReflectedUniform], ReflectError> {
        let uniforms = reflect_uniforms(source)?;
        tracing::debug!(%scope, count = uniforms.len(), "reflected shader uniforms");
        let state = self.scopes.entry(scope).or_default();
        *state = ScopeState {
            uniforms,
            ..ScopeState::default()
        };
        Ok(&state.uniforms)
    }

    pub fn reflected(&self, scope: UniformScope) -> &[ReflectedUniform] {
        self.scopes
            .get(&scope)
            .map(|state| state.uniforms.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_reflection(&self, scope: UniformScope) -> bool {
        !self.reflected(scope).is_empty()
    }

    pub fn set_default_value(&mut self, scope: UniformScope, name: &str, value: UniformValue) {
        self.defaults
            .entry(scope)
            .or_default()
            .insert(name.to_string(), value);
    }

    pub fn create_bind_group_layouts(&mut self, device: &wgpu::Device, scope: UniformScope) {
        let Some(state) = self.scopes.get_mut(&scope) else {
            return;
        };
        let mut layouts = BTreeMap::new();
        for (group, uniforms) in group_uniforms(&state.uniforms) {
            let entries: Vec<wgpu::BindGroupLayoutEntry> = uniforms
                .iter()
                .map(|uniform| wgpu::BindGroupLayoutEntry {
                    binding: uniform.binding,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                })
                .collect();
            let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&format!("reflected uniforms {scope} group {group}")),
                entries: &entries,
            });
            layouts.insert(group, layout);
        }
        state.layouts = layouts;
    }

    pub fn layout(&self, scope: UniformScope, group: u32) -> Option<&wgpu::BindGroupLayout> {
        self.scopes.get(&scope)?.layouts.get(&group)
    }

    /// Group indices declared by the reflected uniforms of `scope`.
    pub fn groups(&self, scope: UniformScope) -> Vec<u32> {
        self.scopes
            .get(&scope)
            .map(|state| state.layouts.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Allocates a buffer for every reflected uniform that does not have one,
    /// seeded from the scope default or the type's zero value.
    pub fn ensure_uniform_buffers(&mut self, device: &wgpu::Device, scope: UniformScope) {
        let Some(state) = self.scopes.get_mut(&scope) else {
            return;
        };
        let defaults = self.defaults.get(&scope);
        for uniform in &state.uniforms {
            if state.buffers.contains_key(&uniform.name) {
                continue;
            }
            let value = defaults
                .and_then(|defaults| defaults.get(&uniform.name))
                .cloned()
                .unwrap_or_else(|| uniform.ty.zero_default());
            let encoded = uniform.ty.encode(&value);
            let mut contents = encoded.clone();
            contents.resize(align_uniform_size(encoded.len()) as usize, 0);
            let buffer = device.create_buffer_init(&BufferInitDescriptor {
                label: Some(&format!("uniform {} ({scope})", uniform.name)),
                contents: &contents,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });
            state.buffers.insert(
                uniform.name.clone(),
                UniformBuffer {
                    buffer,
                    ty: uniform.ty.clone(),
                    encoded,
                },
            );
        }
    }

    /// Creates one bind group per reflected group. A group with any missing
    /// buffer or layout is skipped entirely.
    pub fn create_bind_groups(&mut self, device: &wgpu::Device, scope: UniformScope) -> usize {
        let Some(state) = self.scopes.get_mut(&scope) else {
            return 0;
        };
        let mut bind_groups = BTreeMap::new();
        for (group, uniforms) in group_uniforms(&state.uniforms) {
            let Some(layout) = state.layouts.get(&group) else {
                tracing::warn!(%scope, group, "no layout for reflected group; skipping");
                continue;
            };
            let entries: Option<Vec<wgpu::BindGroupEntry>> = uniforms
                .iter()
                .map(|uniform| {
                    let buffer = state.buffers.get(&uniform.name)?;
                    Some(wgpu::BindGroupEntry {
                        binding: uniform.binding,
                        resource: buffer.buffer.as_entire_binding(),
                    })
                })
                .collect();
            let Some(entries) = entries else {
                tracing::warn!(%scope, group, "uniform buffer missing; skipping bind group");
                continue;
            };
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("reflected uniforms {scope} group {group}")),
                layout,
                entries: &entries,
            });
            bind_groups.insert(group, bind_group);
        }
        let created = bind_groups.len();
        state.bind_groups = bind_groups;
        created
    }

    pub fn bind_group(&self, scope: UniformScope, group: u32) -> Option<&wgpu::BindGroup> {
        self.scopes.get(&scope)?.bind_groups.get(&group)
    }

    /// Re-encodes `value` with the declared type and writes it in place.
    /// Writes that would overflow the allocation are dropped.
    pub fn update_uniform(
        &mut self,
        queue: &wgpu::Queue,
        scope: UniformScope,
        name: &str,
        value: &UniformValue,
    ) -> bool {
        let Some(uniform) = self
            .scopes
            .get_mut(&scope)
            .and_then(|state| state.buffers.get_mut(name))
        else {
            return false;
        };
        let encoded = uniform.ty.encode(value);
        if encoded.len() as u64 > uniform.buffer.size() {
            tracing::warn!(
                %scope,
                uniform = name,
                len = encoded.len(),
                size = uniform.buffer.size(),
                "uniform value larger than its buffer; ignored"
            );
            return false;
        }
        queue.write_buffer(&uniform.buffer, 0, &encoded);
        uniform.encoded = encoded;
        true
    }

    /// Bytes most recently written for `name` under `scope`.
    pub fn encoded(&self, scope: UniformScope, name: &str) -> Option<&[u8]> {
        self.scopes
            .get(&scope)?
            .buffers
            .get(name)
            .map(|uniform| uniform.encoded.as_slice())
    }

    /// Every scope whose shader declares a uniform called `name`, in scope order.
    pub fn scopes_declaring(&self, name: &str) -> Vec<UniformScope> {
        let mut scopes: Vec<UniformScope> = self
            .scopes
            .iter()
            .filter(|(_, state)| state.uniforms.iter().any(|uniform| uniform.name == name))
            .map(|(scope, _)| *scope)
            .collect();
        scopes.sort();
        scopes
    }

    pub fn remove_scope(&mut self, scope: UniformScope) {
        if let Some(state) = self.scopes.remove(&scope) {
            for uniform in state.buffers.into_values() {
                uniform.buffer.destroy();
            }
        }
        self.defaults.remove(&scope);
    }

    /// Drops every scope instantiated from `shader`.
    pub fn remove_shader(&mut self, shader: ShaderId) {
        let scopes: Vec<UniformScope> = self
            .scopes
            .keys()
            .chain(self.defaults.keys())
            .filter(|scope| scope.shader == shader)
            .copied()
            .collect();
        for scope in scopes {
            self.remove_scope(scope);
        }
    }

    pub fn clear(&mut self) {
        let scopes: Vec<UniformScope> = self.scopes.keys().copied().collect();
        for scope in scopes {
            self.remove_scope(scope);
        }
        self.defaults.clear();
    }

    pub fn buffer_count(&self) -> usize {
        self.scopes.values().map(|state| state.buffers.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::PassIndex;

    const SOURCE: &str = "
        @group(0) @binding(2) var<uniform> color: vec4f;
        @group(0) @binding(0) var<uniform> time: f32;
        @group(2) @binding(0) var<uniform> model: mat4x4f;
    ";

    #[test]
    fn groups_sort_bindings() {
        let uniforms = reflect_uniforms(SOURCE).unwrap();
        let groups = group_uniforms(&uniforms);
        assert_eq!(groups.keys().copied().collect::<Vec<_>>(), vec![0, 2]);
        let bindings: Vec<u32> = groups[&0].iter().map(|u| u.binding).collect();
        assert_eq!(bindings, vec![0, 2]);
    }

    #[test]
    fn reflection_is_scoped_per_pass() {
        let mut manager = UniformManager::new();
        let a = UniformScope::new(PassIndex(0), ShaderId(1));
        let b = UniformScope::new(PassIndex(1), ShaderId(1));
        let c = UniformScope::new(PassIndex(1), ShaderId(2));
        manager.analyze_shader(a, SOURCE).unwrap();
        manager.analyze_shader(b, SOURCE).unwrap();
        manager
            .analyze_shader(c, "@group(0) @binding(0) var<uniform> other: f32;")
            .unwrap();
        assert_eq!(manager.scopes_declaring("time"), vec![a, b]);
        assert_eq!(manager.reflected(c).len(), 1);

        manager.set_default_value(a, "time", UniformValue::Scalar(1.0));
        manager.remove_shader(ShaderId(1));
        assert!(manager.scopes_declaring("time").is_empty());
        assert!(manager.defaults.is_empty());
        assert!(manager.has_reflection(c));
    }

    #[test]
    fn reflection_errors_propagate() {
        let mut manager = UniformManager::new();
        let scope = UniformScope::new(PassIndex(0), ShaderId(1));
        let err = manager
            .analyze_shader(scope, "@group(9) @binding(0) var<uniform> x: f32;")
            .unwrap_err();
        assert!(matches!(err, ReflectError::OutOfRange { .. }));
        assert!(!manager.has_reflection(scope));
    }
}
