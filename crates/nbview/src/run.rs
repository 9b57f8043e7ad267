use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use rendergraph::{EngineOptions, GpuOptions, Notebook, PerfConfig, RenderConfig};
use tracing_subscriber::EnvFilter;

use crate::cli::{CheckArgs, Cli, Command, RunArgs};
use crate::config::ViewerConfig;
use crate::{headless, window};

pub fn run(cli: Cli) -> Result<()> {
    initialise_tracing();

    match cli.command {
        Command::Run(args) => run_cell(args),
        Command::Check(args) => check(args),
    }
}

fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_notebook(path: &Path) -> Result<Notebook> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read notebook {}", path.display()))?;
    Notebook::from_json_str(&text)
        .with_context(|| format!("failed to parse notebook {}", path.display()))
}

/// Everything a run needs once flags, config file and cell are resolved.
pub struct RunPlan {
    pub notebook: Notebook,
    pub config: RenderConfig,
    pub viewer: ViewerConfig,
    pub options: EngineOptions,
    pub cell: usize,
    pub frames: u64,
}

fn plan(args: &RunArgs) -> Result<RunPlan> {
    let viewer = match args.config.as_ref() {
        Some(path) => ViewerConfig::load(path)?,
        None => ViewerConfig::default(),
    };
    let notebook = load_notebook(&args.notebook)?;

    let mut config = notebook
        .render_config(args.cell)
        .with_context(|| {
            format!(
                "notebook has {} render cell(s); --cell {} is out of range",
                notebook.render_configs().len(),
                args.cell
            )
        })?
        .context("render cell content is not a valid render config")?;

    if let Some((width, height)) = args.size {
        config.width = width;
        config.height = height;
    }
    if let Some(fps) = args.fps {
        if !fps.is_finite() || fps < 0.0 {
            bail!("--fps must be >= 0");
        }
        config.performance = Some(PerfConfig {
            target_fps: Some(fps),
        });
    }

    let options = EngineOptions {
        gpu: GpuOptions {
            power_preference: viewer.power.preference(),
            ..GpuOptions::default()
        },
        default_target_fps: viewer.fps,
    };
    tracing::debug!(
        notebook = %args.notebook.display(),
        cell = args.cell,
        width = config.width,
        height = config.height,
        passes = config.pipeline.render_passes.len(),
        "resolved render cell"
    );

    Ok(RunPlan {
        notebook,
        config,
        viewer,
        options,
        cell: args.cell,
        frames: args.frames,
    })
}

fn run_cell(args: RunArgs) -> Result<()> {
    let plan = plan(&args)?;
    if args.headless {
        headless::run_headless(plan)
    } else {
        window::run_window(plan)
    }
}

fn check(args: CheckArgs) -> Result<()> {
    let notebook = load_notebook(&args.notebook)?;
    let cells = notebook.render_configs();
    if cells.is_empty() {
        println!("{}: no render cells", args.notebook.display());
        return Ok(());
    }

    let mut failing = 0;
    for (index, config) in cells {
        let issues = match config {
            Ok(config) => config.validate(&notebook),
            Err(err) => vec![err.to_string()],
        };
        if issues.is_empty() {
            println!("cell {index}: ok");
            continue;
        }
        failing += 1;
        for issue in issues {
            println!("cell {index}: {issue}");
        }
    }

    if failing > 0 {
        bail!("{failing} render cell(s) have issues");
    }
    Ok(())
}
