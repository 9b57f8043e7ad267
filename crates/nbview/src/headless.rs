use std::collections::BTreeMap;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use rendergraph::{
    ContainerId, Engine, EngineCommand, EngineStatusReport, FrameStats, InitOptions,
};
use serde::Serialize;
use tracing::info;

use crate::run::RunPlan;

#[derive(Serialize)]
struct HeadlessReport {
    engine: EngineStatusReport,
    renderers: BTreeMap<String, FrameStats>,
}

pub fn run_headless(plan: RunPlan) -> Result<()> {
    let RunPlan {
        notebook,
        config,
        viewer,
        options,
        cell,
        frames,
    } = plan;

    let mut engine = Engine::new(notebook, options).context("failed to create GPU context")?;
    let container = ContainerId::new(format!("cell-{cell}"));
    engine.submit(EngineCommand::Init {
        container_id: container.clone(),
        notebook: None,
        config: Box::new(config),
        options: InitOptions::default(),
    });
    engine.process_commands();

    let started = Instant::now();
    let mut last_stats = started;
    loop {
        let Some(stats) = engine.renderer_stats(&container) else {
            bail!("renderer for {container} was not created");
        };
        if !stats.status.is_live() || stats.frame_count >= frames {
            break;
        }
        if viewer
            .run_duration
            .is_some_and(|limit| started.elapsed() >= limit)
        {
            info!(frames = stats.frame_count, "run duration reached");
            break;
        }

        let now = Instant::now();
        let report = engine.run_frame(now);
        if report.rendered == 0 {
            // Frame cap in effect; wait for the next slot.
            thread::sleep(Duration::from_millis(1));
        }
        if now.duration_since(last_stats) >= viewer.stats_interval {
            last_stats = now;
            info!(
                fps = stats.fps,
                frames = stats.frame_count,
                draw_calls = stats.draw_calls,
                failed_passes = stats.failed_passes,
                "viewer stats"
            );
        }
    }

    let renderers: BTreeMap<String, FrameStats> = engine
        .containers()
        .filter_map(|id| engine.renderer_stats(id).map(|stats| (id.to_string(), stats)))
        .collect();
    let report = HeadlessReport {
        engine: engine.status(),
        renderers,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("failed to encode report")?
    );

    let error = engine
        .renderer(&container)
        .and_then(|renderer| renderer.error_message().map(str::to_owned));
    engine.shutdown();
    if let Some(message) = error {
        bail!("render cell {cell} failed: {message}");
    }
    Ok(())
}
