use std::env;
use std::path::PathBuf;

use blogstore::config::{load_config, Config};
use blogstore::logger::default_log_location;

pub(crate) fn open_config(cfg_path: Option<PathBuf>) -> Result<Config, String> {
    if let Ok(cur_dir) = env::current_dir() {
        println!("Current dir: {}", cur_dir.display());
    }
    if let Some(ref path) = cfg_path {
        println!("Reading config from {}", path.display());
    }

    let mut config = load_config(cfg_path).map_err(|e| e.to_string())?;

    if let Some(mut log) = config.log {
        let location = log.location.unwrap_or_else(|| default_log_location("server"));
        println!("Log enabled. Files will be written in {}", location.display());
        log.location = Some(location);
        config.log = Some(log);
    } else {
        println!("Log disabled. Using stdout");
    }

    println!("Repository: {}", config.repository.path.display());
    if config.server.api_keys.is_empty() {
        println!("No API key configured. Set api_keys or BLOG_API_KEYS");
    }

    Ok(config)
}
