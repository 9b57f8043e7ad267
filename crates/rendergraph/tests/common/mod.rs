#![allow(dead_code)]

use rendergraph::{Engine, EngineOptions, GpuContext, GpuOptions, Notebook};
use serde_json::{json, Value};

/// Shared vertex stage: the default quad with uv pass-through.
pub const QUAD_VS: &str = r#"
struct VsOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn main(@location(0) position: vec3<f32>, @location(1) uv: vec2<f32>) -> VsOut {
    var out: VsOut;
    out.position = vec4<f32>(position, 1.0);
    out.uv = uv;
    return out;
}
"#;

pub const SOLID_RED_FS: &str = r#"
@fragment
fn main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 0.0, 0.0, 1.0);
}
"#;

pub const TINT_FS: &str = r#"
@group(0) @binding(0) var<uniform> tint: vec4<f32>;
@group(0) @binding(1) var<uniform> time: vec4<f32>;

@fragment
fn main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return tint + vec4<f32>(0.0 * time.x);
}
"#;

pub const SAMPLE_INPUT_FS: &str = r#"
@group(1) @binding(0) var input_tex: texture_2d<f32>;
@group(1) @binding(1) var input_sampler: sampler;

@fragment
fn main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return textureSample(input_tex, input_sampler, uv);
}
"#;

/// Shader ids: 1 quad vertex, 2 solid red, 3 tint uniform, 4 input sampler.
pub fn notebook() -> Notebook {
    serde_json::from_value(json!({
        "title": "render graph tests",
        "shaders": [
            {"id": 1, "name": "quad", "code": QUAD_VS},
            {"id": 2, "name": "red", "code": SOLID_RED_FS},
            {"id": 3, "name": "tint", "code": TINT_FS},
            {"id": 4, "name": "sample", "code": SAMPLE_INPUT_FS}
        ],
        "resources": [
            {"id": 5, "resource_type": "buffer", "data": "AAAAAAAAAAAAAAAAAAAAAA=="}
        ]
    }))
    .expect("test notebook parses")
}

/// Creates a GPU context, or `None` when the machine has no usable adapter.
pub fn headless_gpu() -> Option<GpuContext> {
    match GpuContext::new(GpuOptions::default()) {
        Ok(ctx) => Some(ctx),
        Err(err) => {
            eprintln!("No adapter available ({err}); skipping GPU test.");
            None
        }
    }
}

pub fn headless_engine() -> Option<Engine> {
    headless_gpu().map(|ctx| Engine::with_context(ctx, notebook(), EngineOptions::default()))
}

pub fn init_command(container: &str, config: Value) -> Value {
    json!({
        "type": "init",
        "data": {"containerId": container, "config": config}
    })
}

/// Single main pass drawing `fragment` over the default quad.
pub fn single_pass_config(fragment: u64) -> Value {
    json!({
        "width": 64,
        "height": 48,
        "shader_ids": [1, fragment],
        "pipeline": {
            "shader_bindings": [
                {"shader_index": 0, "shader_stage": "vertex"},
                {"shader_index": 1, "shader_stage": "fragment"}
            ]
        }
    })
}
