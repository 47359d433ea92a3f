use std::process::ExitCode;

use clap::Parser;

use stencilc::cli::{run, Cli};

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli).map_err(anyhow::Error::from) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
