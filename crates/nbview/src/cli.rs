use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "nbview",
    author,
    version,
    about = "Render-cell viewer for shader notebooks"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Render one render cell in a window, or headlessly with `--headless`.
    Run(RunArgs),
    /// Validate every render cell without touching the GPU.
    Check(CheckArgs),
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Notebook JSON file.
    #[arg(value_name = "NOTEBOOK")]
    pub notebook: PathBuf,

    /// Which render cell to show, counting render cells only.
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub cell: usize,

    /// Override the cell's canvas size (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub size: Option<(u32, u32)>,

    /// Render to an offscreen canvas and print statistics as JSON.
    #[arg(long)]
    pub headless: bool,

    /// Frames to render in headless mode.
    #[arg(long, value_name = "N", default_value_t = 60)]
    pub frames: u64,

    /// FPS cap for the cell (0=uncapped); overrides the cell's own setting.
    #[arg(long, value_name = "FPS")]
    pub fps: Option<f32>,

    /// Viewer settings TOML; can also be supplied via `NBVIEW_CONFIG`.
    #[arg(long, value_name = "PATH", env = "NBVIEW_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Notebook JSON file.
    #[arg(value_name = "NOTEBOOK")]
    pub notebook: PathBuf,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let trimmed = value.trim();
    let (width, height) = trimmed
        .split_once(['x', 'X', '×'])
        .ok_or_else(|| "expected WxH format, e.g. 1280x720".to_string())?;

    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| format!("invalid width '{}' in size specification", width.trim()))?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| format!("invalid height '{}' in size specification", height.trim()))?;

    if width == 0 || height == 0 {
        return Err("canvas dimensions must be greater than zero".to_string());
    }
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sizes() {
        assert_eq!(parse_size("1280x720"), Ok((1280, 720)));
        assert_eq!(parse_size(" 64 X 48 "), Ok((64, 48)));
        assert!(parse_size("1280").is_err());
        assert!(parse_size("0x10").is_err());
        assert!(parse_size("wide x 10").unwrap_err().contains("invalid width"));
    }

    #[test]
    fn run_defaults() {
        let cli = Cli::try_parse_from(["nbview", "run", "book.json", "--headless"]).unwrap();
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.cell, 0);
                assert_eq!(args.frames, 60);
                assert!(args.headless);
                assert!(args.size.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn size_flag_is_validated() {
        assert!(Cli::try_parse_from(["nbview", "run", "book.json", "--size", "big"]).is_err());
        let cli =
            Cli::try_parse_from(["nbview", "run", "book.json", "--size", "320x200"]).unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.size, Some((320, 200)));
    }
}
