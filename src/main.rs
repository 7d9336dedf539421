use std::thread;
use std::time::Duration as StdDuration;
use rayon::ThreadPoolBuilder;
use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use log::error;
use crate::initialization::init;

mod consolidator;
mod dispatch;
mod errors;
mod ingest;
mod initialization;
mod logging;
mod macros;
pub mod models;
mod persistence;
mod pricing;
mod proposer;
mod queue;
mod config;
mod validator;
mod worker;

fn main() -> Result<()> {
    ThreadPoolBuilder::new().num_threads(2).build_global()?;

    let (config, mut mgr) = match init() {
        Ok((c, m)) => (c, m),
        Err(e) => {
            return Err(anyhow::anyhow!("initialization failed: {}", e));
        }
    };

    let tick = StdDuration::from_secs(config.queue.tick_seconds);
    let debounce = ChronoDuration::seconds(config.queue.debounce_seconds as i64);

    // Single-threaded periodic loop: every tick, submit a run, debouncing it
    // into the still-queued job from the previous tick if one is pending.
    loop {
        let job_id = mgr.queue.submit_debounced(Utc::now(), debounce);
        if let Some(job) = mgr.queue.pop_next() {
            let calc_id = format!("calc_{}", job.job_id);
            match worker::run(&mgr.consolidated, &config.files, &calc_id) {
                Ok(()) => {
                    mgr.queue.mark_done(job_id);
                }
                Err(e) => {
                    error!("run {calc_id} failed: {}", e.short_reason());
                    mgr.queue.mark_failed(job_id);
                }
            }
        }
        thread::sleep(tick);
    }
}
