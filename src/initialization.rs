use std::env;
use log::info;
use anyhow::Result;
use crate::config::{load_config, Config};
use crate::consolidator::{consolidate, Consolidated};
use crate::logging::setup_logger;
use crate::queue::JobQueue;

/// Holds everything a run needs beyond the raw config: the consolidated
/// parameters (built once, shared by every job until the config changes)
/// and the in-memory job queue.
pub struct Mgr {
    pub consolidated: Consolidated,
    pub queue: JobQueue,
}

/// Loads configuration, sets up logging, and consolidates parameters.
pub fn init() -> Result<(Config, Mgr)> {
    let args: Vec<String> = env::args().collect();
    let config_path = args.iter()
        .find(|p| p.starts_with("--config="))
        .expect("config file argument should be present");
    let config_path = config_path
        .split_once('=')
        .expect("config file argument should be correct")
        .1;

    let config = load_config(config_path)?;

    setup_logger(&config.general.log_path, config.general.log_level, config.general.log_to_stdout)?;

    info!("starting gridbatch version: {}", env!("CARGO_PKG_VERSION"));

    let consolidated = consolidate(&config)?;
    let queue = JobQueue::new();

    Ok((config, Mgr { consolidated, queue }))
}
