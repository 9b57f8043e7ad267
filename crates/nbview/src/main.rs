mod cli;
mod config;
mod headless;
mod run;
mod window;

use anyhow::Result;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::run(cli)
}
