mod common;

use std::time::{Duration, Instant};

use rendergraph::{
    ContainerId, EngineCommand, EngineError, EngineState, PassIndex, RenderConfigPatch, RendererStatus,
    ShaderId, TextureKey, TickReport, UniformScope,
};
use serde_json::json;

use common::{headless_engine, init_command, single_pass_config};

#[test]
fn single_main_pass_renders_one_frame() {
    let Some(mut engine) = headless_engine() else {
        return;
    };
    assert!(engine
        .submit_json(init_command("cell-a", single_pass_config(2)))
        .unwrap());
    let report = engine.run_frame(Instant::now());
    assert_eq!(report.rendered, 1);

    let id = ContainerId::new("cell-a");
    let renderer = engine.renderer(&id).expect("renderer exists");
    assert_eq!(renderer.status(), RendererStatus::Running);
    assert_eq!(renderer.pipelines().len(), 1);
    assert!(renderer.graph().find("main").is_some());

    let stats = engine.renderer_stats(&id).unwrap();
    assert_eq!(stats.frame_count, 1);
    assert_eq!(stats.submissions, 1);
    assert_eq!(stats.draw_calls, 1);
    assert_eq!(stats.failed_passes, 0);

    let pixels = renderer
        .canvas()
        .and_then(|canvas| canvas.read_pixels(engine.context()))
        .expect("offscreen canvas reads back");
    assert_eq!(pixels.len(), 64 * 48 * 4);
    assert_eq!(&pixels[..4], &[255, 0, 0, 255]);

    let status = engine.status();
    assert_eq!(status.status, EngineState::Running);
    assert_eq!(status.renderer_count, 1);
    assert!(status.gpu.is_some());
}

#[test]
fn previous_alias_feeds_intermediate_output_into_main() {
    let Some(mut engine) = headless_engine() else {
        return;
    };
    let config = json!({
        "width": 32,
        "height": 32,
        "shader_ids": [1, 2, 4],
        "pipeline": {
            "shader_bindings": [
                {"shader_index": 0, "shader_stage": "vertex"},
                {"shader_index": 1, "shader_stage": "fragment"},
                {"shader_index": 2, "shader_stage": "fragment"}
            ],
            "render_passes": [
                {"id": "scene", "pass_type": "intermediate", "shader_bindings": [0, 1],
                 "output_textures": [{"id": "color"}]},
                {"id": "main", "pass_type": "main", "shader_bindings": [0, 2],
                 "input_textures": [{"texture_id": "previous", "group": 1}]}
            ]
        }
    });
    engine.submit_json(init_command("chain", config)).unwrap();
    assert_eq!(engine.run_frame(Instant::now()).rendered, 1);

    let id = ContainerId::new("chain");
    let renderer = engine.renderer(&id).unwrap();
    assert_eq!(renderer.pipelines().len(), 2);
    let stats = renderer.stats();
    assert_eq!(stats.draw_calls, 2);
    assert_eq!(stats.failed_passes, 0);

    let pixels = renderer
        .canvas()
        .and_then(|canvas| canvas.read_pixels(engine.context()))
        .unwrap();
    let center = (16 * 32 + 16) * 4;
    assert_eq!(&pixels[center..center + 4], &[255, 0, 0, 255]);
}

#[test]
fn depth_texture_follows_canvas_size() {
    let Some(mut engine) = headless_engine() else {
        return;
    };
    let config = json!({
        "width": 64,
        "height": 48,
        "shader_ids": [1, 2],
        "pipeline": {
            "shader_bindings": [
                {"shader_index": 0, "shader_stage": "vertex"},
                {"shader_index": 1, "shader_stage": "fragment"}
            ],
            "render_passes": [
                {"id": "main", "depth_enabled": true}
            ]
        }
    });
    engine.submit_json(init_command("depth", config)).unwrap();
    engine.process_commands();
    let id = ContainerId::new("depth");

    let depth = engine.renderer(&id).unwrap().textures().depth().unwrap();
    assert_eq!(depth.size, (64, 48));
    let generation = depth.generation;

    engine
        .submit_json(json!({"type": "resize", "data": {"containerId": "depth", "width": 64, "height": 48}}))
        .unwrap();
    engine.process_commands();
    let depth = engine.renderer(&id).unwrap().textures().depth().unwrap();
    assert_eq!(depth.generation, generation);

    engine
        .submit_json(json!({"type": "resize", "data": {"containerId": "depth", "width": 128, "height": 96}}))
        .unwrap();
    let report = engine.run_frame(Instant::now());
    assert_eq!(report.rendered, 1);
    let renderer = engine.renderer(&id).unwrap();
    let depth = renderer.textures().depth().unwrap();
    assert_eq!(depth.size, (128, 96));
    assert_ne!(depth.generation, generation);
    assert_eq!(renderer.stats().failed_passes, 0);
}

#[test]
fn same_size_resize_keeps_textures_and_bind_groups() {
    let Some(mut engine) = headless_engine() else {
        return;
    };
    let config = json!({
        "width": 100,
        "height": 80,
        "shader_ids": [1, 2, 4],
        "pipeline": {
            "shader_bindings": [
                {"shader_index": 0, "shader_stage": "vertex"},
                {"shader_index": 1, "shader_stage": "fragment"},
                {"shader_index": 2, "shader_stage": "fragment"}
            ],
            "render_passes": [
                {"id": "half", "pass_type": "intermediate", "shader_bindings": [0, 1],
                 "output_textures": [{"id": "color", "width_scale": 0.5, "height_scale": 0.5}]},
                {"id": "main", "shader_bindings": [0, 2],
                 "input_textures": [{"texture_id": "half_color"}]}
            ]
        }
    });
    engine.submit_json(init_command("scaled", config)).unwrap();
    engine.process_commands();
    let id = ContainerId::new("scaled");
    let key = TextureKey::new(PassIndex(0), 0);

    let renderer = engine.renderer(&id).unwrap();
    let texture = renderer.textures().texture(key).unwrap();
    assert_eq!(texture.size, (50, 40));
    let texture_generation = texture.generation;
    let bind_generation = renderer.bind_groups().generation();

    engine
        .submit_json(json!({"type": "resize", "data": {"containerId": "scaled", "width": 100, "height": 80}}))
        .unwrap();
    engine.process_commands();
    let renderer = engine.renderer(&id).unwrap();
    assert_eq!(renderer.textures().texture(key).unwrap().generation, texture_generation);
    assert_eq!(renderer.bind_groups().generation(), bind_generation);

    engine
        .submit_json(json!({"type": "resize", "data": {"containerId": "scaled", "width": 200, "height": 120}}))
        .unwrap();
    engine.process_commands();
    let renderer = engine.renderer(&id).unwrap();
    assert_eq!(renderer.textures().texture(key).unwrap().size, (100, 60));
    assert_ne!(renderer.bind_groups().generation(), bind_generation);
}

#[test]
fn paused_renderer_stays_paused_across_resize() {
    let Some(mut engine) = headless_engine() else {
        return;
    };
    engine
        .submit_json(init_command("p", single_pass_config(2)))
        .unwrap();
    engine
        .submit_json(json!({"type": "pause", "data": {"containerId": "p"}}))
        .unwrap();
    engine
        .submit_json(json!({"type": "resize", "data": {"containerId": "p", "width": 90, "height": 70}}))
        .unwrap();
    let report = engine.run_frame(Instant::now());
    assert_eq!(report.rendered, 0);
    assert_eq!(report.skipped, 1);

    let id = ContainerId::new("p");
    let renderer = engine.renderer(&id).unwrap();
    assert_eq!(renderer.status(), RendererStatus::Paused);
    assert_eq!(renderer.config().dimensions(), (90, 70));
    assert_eq!(renderer.canvas().unwrap().size(), (90, 70));

    engine
        .submit_json(json!({"type": "resume", "data": {"containerId": "p"}}))
        .unwrap();
    assert_eq!(engine.run_frame(Instant::now()).rendered, 1);
}

#[test]
fn partially_resolved_resource_group_is_not_bound() {
    let Some(mut engine) = headless_engine() else {
        return;
    };
    let config = json!({
        "width": 16,
        "height": 16,
        "shader_ids": [1, 2],
        "resource_ids": [5, 6],
        "pipeline": {
            "shader_bindings": [
                {"shader_index": 0, "shader_stage": "vertex"},
                {"shader_index": 1, "shader_stage": "fragment"}
            ],
            "resource_bindings": [
                {"group": 2, "binding": 0, "binding_type": "uniform", "resource_index": 0},
                {"group": 2, "binding": 1, "binding_type": "uniform", "resource_index": 1}
            ]
        }
    });
    engine.submit_json(init_command("closed", config)).unwrap();
    engine.run_frame(Instant::now());

    let id = ContainerId::new("closed");
    let renderer = engine.renderer(&id).unwrap();
    assert_eq!(renderer.status(), RendererStatus::Running);
    let bindings = renderer.bind_groups().bindings(PassIndex(0)).unwrap();
    assert!(bindings.groups[0].is_some());
    assert!(bindings.groups[2].is_none());
    assert_eq!(bindings.missing_group(), Some(2));

    let stats = renderer.stats();
    assert_eq!(stats.frame_count, 1);
    assert_eq!(stats.draw_calls, 0);
    assert_eq!(stats.failed_passes, 1);
}

#[test]
fn uniform_command_updates_reflected_buffer() {
    let Some(mut engine) = headless_engine() else {
        return;
    };
    engine
        .submit_json(init_command("tint", single_pass_config(3)))
        .unwrap();
    engine
        .submit_json(json!({
            "type": "uniform",
            "data": {"containerId": "tint", "name": "tint", "value": [0.1, 0.2, 0.3, 0.4]}
        }))
        .unwrap();
    engine.process_commands();

    let id = ContainerId::new("tint");
    let renderer = engine.renderer(&id).unwrap();
    let scope = UniformScope::new(PassIndex(0), ShaderId::new(3));
    let expected: Vec<u8> = [0.1f32, 0.2, 0.3, 0.4]
        .iter()
        .flat_map(|value| value.to_le_bytes())
        .collect();
    assert_eq!(renderer.uniforms().encoded(scope, "tint"), Some(expected.as_slice()));

    let start = Instant::now();
    engine.run_frame(start);
    engine.run_frame(start + Duration::from_millis(500));
    let time = engine
        .renderer(&id)
        .unwrap()
        .uniforms()
        .encoded(scope, "time")
        .unwrap()
        .to_vec();
    let frame_index = f32::from_le_bytes([time[8], time[9], time[10], time[11]]);
    assert_eq!(frame_index, 1.0);
    let seconds = f32::from_le_bytes([time[0], time[1], time[2], time[3]]);
    assert!(seconds > 0.4, "elapsed seconds {seconds}");
}

#[test]
fn update_and_reset_commands_reach_the_renderer() {
    let Some(mut engine) = headless_engine() else {
        return;
    };
    engine.submit_json(init_command("live", single_pass_config(2))).unwrap();
    let start = Instant::now();
    engine.run_frame(start);
    engine.run_frame(start + Duration::from_millis(16));

    let id = ContainerId::new("live");
    assert_eq!(engine.renderer_stats(&id).unwrap().frame_count, 2);

    engine
        .apply(EngineCommand::UpdateConfig {
            container_id: id.clone(),
            config: Box::new(RenderConfigPatch {
                width: Some(40),
                height: Some(30),
                ..RenderConfigPatch::default()
            }),
        })
        .unwrap();
    let renderer = engine.renderer(&id).unwrap();
    assert_eq!(renderer.config().dimensions(), (40, 30));
    assert_eq!(renderer.status(), RendererStatus::Running);

    engine
        .apply(EngineCommand::Reset {
            container_id: id.clone(),
        })
        .unwrap();
    assert_eq!(engine.renderer_stats(&id).unwrap().frame_count, 0);

    let err = engine
        .apply(EngineCommand::Reset {
            container_id: ContainerId::new("missing"),
        })
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownContainer(name) if name == "missing"));
}

#[test]
fn missing_shader_asset_moves_renderer_to_error() {
    let Some(mut engine) = headless_engine() else {
        return;
    };
    engine
        .submit_json(init_command("broken", single_pass_config(99)))
        .unwrap();
    let report = engine.run_frame(Instant::now());
    assert_eq!(report.rendered, 0);

    let id = ContainerId::new("broken");
    let renderer = engine.renderer(&id).unwrap();
    assert_eq!(renderer.status(), RendererStatus::Error);
    assert!(renderer.error_message().unwrap().contains("99"));
    let stats = renderer.stats();
    assert!(stats.error.is_some());

    let pixels = renderer
        .canvas()
        .and_then(|canvas| canvas.read_pixels(engine.context()))
        .unwrap();
    let close = |actual: u8, expected: u8| actual.abs_diff(expected) <= 1;
    assert!(close(pixels[0], 140) && close(pixels[1], 13) && close(pixels[2], 20));

    // Error is terminal until the container is initialized again.
    engine
        .submit_json(json!({"type": "resume", "data": {"containerId": "broken"}}))
        .unwrap();
    assert_eq!(engine.run_frame(Instant::now()).rendered, 0);
}

#[test]
fn destroy_and_shutdown_release_renderers() {
    let Some(mut engine) = headless_engine() else {
        return;
    };
    engine.submit_json(init_command("a", single_pass_config(2))).unwrap();
    engine.submit_json(init_command("b", single_pass_config(2))).unwrap();
    assert_eq!(engine.run_frame(Instant::now()).rendered, 2);

    engine
        .submit_json(json!({"type": "destroy", "data": {"containerId": "a"}}))
        .unwrap();
    assert_eq!(engine.process_commands(), 1);
    assert_eq!(engine.status().renderer_count, 1);
    assert!(engine.renderer(&ContainerId::new("a")).is_none());

    // Commands for unknown containers are logged and dropped.
    engine
        .submit_json(json!({"type": "pause", "data": {"containerId": "a"}}))
        .unwrap();
    assert_eq!(engine.process_commands(), 1);

    engine.shutdown();
    let status = engine.status();
    assert_eq!(status.status, EngineState::Shutdown);
    assert_eq!(status.renderer_count, 0);
    assert!(status.gpu.is_none());
    engine.submit_json(init_command("c", single_pass_config(2))).unwrap();
    assert_eq!(engine.run_frame(Instant::now()), TickReport::default());
}
