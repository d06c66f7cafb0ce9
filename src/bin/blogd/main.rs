use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use spdlog::{info, warn};

use blogstore::config_data::write_sample_cfg;
use blogstore::logger::configure_logger;
use blogstore::server::server_run;
use blogstore::util::os_helper::get_name;

use crate::config::open_config;

mod config;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Config path
    #[arg(short, long)]
    config_path: Option<String>,

    /// Writes a sample configuration to this path and exits
    #[arg(long)]
    write_sample: Option<String>,
}

#[ntex::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(sample_path) = args.write_sample {
        write_sample_cfg(&PathBuf::from(&sample_path), &get_name())?;
        println!("Sample configuration written to {}", sample_path);
        return Ok(());
    }

    let config_path = args.config_path.map(PathBuf::from);
    let config = match open_config(config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err);
            eprintln!("Please run blogd --help");
            return Ok(());
        }
    };

    if let Err(err) = configure_logger(&config, "server") {
        warn!("Error creating logger sinks. Using console instead. Desc={}", err);
    }

    info!("Starting blogd =-=-=-=-=-=-=-=-=-=-=-=-=-=-=-");
    info!("Listening on {}:{}", config.server.address, config.server.port);

    server_run(config).await?;
    Ok(())
}
