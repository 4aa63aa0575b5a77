use anyhow::Result;
use backpocket_common::observability::init_logging;
use backpocket_config::BackpocketConfigLoader;
use backpocket_runtime::BackpocketRuntime;
use clap::Parser;
use commands::Cli;

mod commands;
mod tether;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // explicit --config must exist; the default file is optional
    let loader = BackpocketConfigLoader::new();
    let loader = match &cli.config {
        Some(path) => loader.with_file(path),
        None => loader.with_optional_file("backpocket.yaml"),
    };
    let cfg = loader.load()?;

    let mut logging = cfg.logging.clone();
    if cli.verbose {
        logging.stderr = true;
        logging.filter = "debug".into();
    }
    init_logging("backpocket", &logging)?;

    let runtime = BackpocketRuntime::from_config(&cfg.runtime)?;
    let handle = runtime.handle();
    handle.cancel_on_ctrl_c();
    let result = runtime.block_on(commands::run(cli, cfg, handle.cancellation()));
    runtime.shutdown();
    result
}
