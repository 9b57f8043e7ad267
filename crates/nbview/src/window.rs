use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use rendergraph::{
    frame_interval, CanvasSource, ContainerId, Engine, EngineCommand, InitOptions, RendererStatus,
    ViewportVisibility,
};
use tracing::{error, info};
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::WindowBuilder;

use crate::run::RunPlan;

enum KeyAction {
    TogglePause,
    Reset,
    Quit,
}

fn key_action(key: &Key) -> Option<KeyAction> {
    match key {
        Key::Named(NamedKey::Space) => Some(KeyAction::TogglePause),
        Key::Named(NamedKey::Escape) => Some(KeyAction::Quit),
        Key::Character(value) if value.as_str() == " " => Some(KeyAction::TogglePause),
        Key::Character(value) if value.eq_ignore_ascii_case("r") => Some(KeyAction::Reset),
        _ => None,
    }
}

pub fn run_window(plan: RunPlan) -> Result<()> {
    let RunPlan {
        notebook,
        config,
        viewer,
        options,
        cell,
        ..
    } = plan;

    let event_loop = EventLoop::new().map_err(|err| anyhow!("failed to create event loop: {err}"))?;
    let (width, height) = config.dimensions();
    let title = match notebook.title.as_deref() {
        Some(title) => format!("{title} (render cell {cell})"),
        None => format!("nbview (render cell {cell})"),
    };
    let window = WindowBuilder::new()
        .with_title(title)
        .with_inner_size(PhysicalSize::new(width, height))
        .build(&event_loop)
        .map_err(|err| anyhow!("failed to create viewer window: {err}"))?;
    let window = Arc::new(window);

    let mut engine = Engine::new(notebook, options).context("failed to create GPU context")?;
    let container = ContainerId::new(format!("cell-{cell}"));
    let (visibility, visibility_handle) = ViewportVisibility::new(viewer.visibility_threshold);
    engine.register_container(
        container.clone(),
        CanvasSource::Window(Arc::clone(&window)),
        Box::new(visibility),
    );
    engine.submit(EngineCommand::Init {
        container_id: container.clone(),
        notebook: None,
        config: Box::new(config),
        options: InitOptions::default(),
    });
    engine.process_commands();
    if let Some(message) = engine
        .renderer(&container)
        .and_then(|renderer| renderer.error_message())
    {
        error!(%container, "render cell failed to initialise: {message}");
    }

    let interval = viewer
        .fps
        .or_else(|| engine.renderer(&container).and_then(|r| r.config().target_fps()))
        .and_then(|fps| frame_interval(Some(fps)));
    let started = Instant::now();
    let mut last_stats = started;

    let run_result = event_loop.run(move |event, elwt| match event {
        Event::WindowEvent { window_id, event } if window_id == window.id() => match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => elwt.exit(),
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state != ElementState::Pressed || event.repeat {
                    return;
                }
                let command = match key_action(&event.logical_key) {
                    Some(KeyAction::Quit) => {
                        elwt.exit();
                        return;
                    }
                    Some(KeyAction::Reset) => EngineCommand::Reset {
                        container_id: container.clone(),
                    },
                    Some(KeyAction::TogglePause) => {
                        let running = engine
                            .renderer(&container)
                            .is_some_and(|renderer| renderer.status() == RendererStatus::Running);
                        if running {
                            EngineCommand::Pause {
                                container_id: container.clone(),
                            }
                        } else {
                            EngineCommand::Resume {
                                container_id: container.clone(),
                            }
                        }
                    }
                    None => return,
                };
                info!(command = command.kind(), "keyboard command");
                engine.submit(command);
            }
            WindowEvent::Resized(size) => {
                engine.submit(EngineCommand::Resize {
                    container_id: container.clone(),
                    width: size.width.max(1),
                    height: size.height.max(1),
                });
            }
            WindowEvent::Occluded(occluded) => {
                visibility_handle.set_ratio(if occluded { 0.0 } else { 1.0 });
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                engine.run_frame(now);
                if now.duration_since(last_stats) >= viewer.stats_interval {
                    last_stats = now;
                    if let Some(stats) = engine.renderer_stats(&container) {
                        info!(
                            status = %stats.status,
                            fps = stats.fps,
                            frames = stats.frame_count,
                            draw_calls = stats.draw_calls,
                            failed_passes = stats.failed_passes,
                            "viewer stats"
                        );
                    }
                }
                if viewer
                    .run_duration
                    .is_some_and(|limit| started.elapsed() >= limit)
                {
                    info!("run duration reached");
                    elwt.exit();
                }
            }
            _ => {}
        },
        Event::AboutToWait => {
            window.request_redraw();
            let flow = match interval {
                Some(interval) => Instant::now()
                    .checked_add(interval)
                    .map_or(ControlFlow::Wait, ControlFlow::WaitUntil),
                None => ControlFlow::Poll,
            };
            elwt.set_control_flow(flow);
        }
        Event::LoopExiting => engine.shutdown(),
        _ => {}
    });

    run_result.map_err(|err| anyhow!("window event loop error: {err}"))
}
