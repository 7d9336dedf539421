use std::fs;
use chrono::Utc;
use log::info;
use crate::config::Files;
use crate::consolidator::Consolidated;
use crate::dispatch;
use crate::errors::{RunError, TransientIOError};
use crate::ingest::{self, IngestInputs, PriceSample, RawPoint};
use crate::models::CalendarHour;
use crate::persistence;
use crate::pricing;
use crate::proposer;
use crate::validator;

/// The hourly series the core reads, loaded whole from `Files.input_dir`
/// (the file-based stand-in for the out-of-scope time-axis/prices/series
/// collaborators named in spec.md §6).
struct RawInputs {
    calendar: Vec<CalendarHour>,
    prices: Vec<PriceSample>,
    production_pv_pp: Vec<RawPoint>,
    production_pv_wz: Vec<RawPoint>,
    production_wiatr: Vec<RawPoint>,
    load: Vec<RawPoint>,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, TransientIOError> {
    let text = fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|e| TransientIOError(format!("malformed JSON in {path}: {e}")))
}

fn load_inputs(input_dir: &str) -> Result<RawInputs, TransientIOError> {
    Ok(RawInputs {
        calendar: retry!(|| read_json(&format!("{input_dir}/calendar.json")))?,
        prices: retry!(|| read_json(&format!("{input_dir}/prices.json")))?,
        production_pv_pp: retry!(|| read_json(&format!("{input_dir}/production_pv_pp.json")))?,
        production_pv_wz: retry!(|| read_json(&format!("{input_dir}/production_pv_wz.json")))?,
        production_wiatr: retry!(|| read_json(&format!("{input_dir}/production_wiatr.json")))?,
        load: retry!(|| read_json(&format!("{input_dir}/load.json")))?,
    })
}

/// Runs one full pipeline pass (C0 already consolidated into `consolidated`;
/// C1 -> C2 -> C3 -> C4 -> C5 here) for `calc_id`, then persists the stage
/// outputs.
pub fn run(consolidated: &Consolidated, files: &Files, calc_id: &str) -> Result<(), RunError> {
    let raw = load_inputs(&files.input_dir)?;

    let inputs = IngestInputs {
        calendar: &raw.calendar,
        prices: &raw.prices,
        production_pv_pp: &raw.production_pv_pp,
        production_pv_wz: &raw.production_pv_wz,
        production_wiatr: &raw.production_wiatr,
        load: &raw.load,
    };

    let hourly = ingest::ingest(consolidated, &inputs)?;
    let proposed = proposer::propose(consolidated, &raw.calendar, &hourly, 0.0);
    let commit = dispatch::commit(consolidated, &hourly, &proposed, 0.0, 0.0);
    let priced = pricing::price(consolidated, &raw.calendar, &hourly, &commit);

    validator::validate(consolidated, &raw.calendar, &hourly, &proposed, &commit, &priced)?;

    persistence::persist_run(&files.output_dir, calc_id, &hourly, &proposed, &commit, &priced, Utc::now())?;

    info!("run {calc_id} completed: {} hours, {} proposer rows, {} commit rows, {} pricing rows",
        hourly.len(), proposed.len(), commit.len(), priced.len());

    Ok(())
}
