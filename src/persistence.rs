//! Batch-local, file-based sink for stage outputs: one pretty-JSON file per
//! stage per `calc_id` under `Files.output_dir`, with glob-based cleanup of
//! stale prior runs. Stands in for the out-of-scope SQL sink (§6).

use std::fs;
use chrono::{DateTime, Duration, Utc};
use glob::glob;
use log::info;
use serde::Serialize;
use crate::errors::TransientIOError;
use crate::models::{CommitRow, HourlyRow, PricingRow, ProposerRow};

fn max_age() -> Duration {
    Duration::hours(48)
}

fn write_stage<T: Serialize>(output_dir: &str, calc_id: &str, stage: &str, rows: &[T], now: DateTime<Utc>) -> Result<(), TransientIOError> {
    let filename = format!("{output_dir}/{calc_id}_{stage}.json");
    let json = serde_json::to_string_pretty(rows)
        .map_err(|e| TransientIOError(format!("serializing {stage} for {calc_id}: {e}")))?;
    fs::write(&filename, json)?;
    clean_up_files(&format!("{output_dir}/*_{stage}.json"), now)?;
    info!("persisted stage {stage} for calc_id={calc_id} ({} rows) to {filename}", rows.len());
    Ok(())
}

/// Persists the four stage outputs for one `calc_id`.
pub fn persist_run(
    output_dir: &str,
    calc_id: &str,
    ingest: &[HourlyRow],
    proposer: &[ProposerRow],
    commit: &[CommitRow],
    pricing: &[PricingRow],
    now: DateTime<Utc>,
) -> Result<(), TransientIOError> {
    write_stage(output_dir, calc_id, "01_ingest", ingest, now)?;
    write_stage(output_dir, calc_id, "02_proposer", proposer, now)?;
    write_stage(output_dir, calc_id, "03_commit", commit, now)?;
    write_stage(output_dir, calc_id, "04_pricing", pricing, now)?;
    Ok(())
}

/// Removes stage output files older than [`max_age`] relative to `now`,
/// identified by the `calc_id` prefix embedded in the filename.
fn clean_up_files(pattern: &str, now: DateTime<Utc>) -> Result<(), TransientIOError> {
    for entry in glob(pattern).map_err(|e| TransientIOError(e.to_string()))? {
        let path = match entry {
            Ok(p) => p,
            Err(_) => continue,
        };
        let Ok(meta) = fs::metadata(&path) else { continue };
        let Ok(modified) = meta.modified() else { continue };
        let modified: DateTime<Utc> = DateTime::from(modified);
        if now - modified > max_age() {
            fs::remove_file(&path)?;
            info!("removed stale output file {}", path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn write_stage_roundtrips_through_serde_json() {
        let dir = std::env::temp_dir().join(format!("gridbatch_test_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let dir_str = dir.to_str().unwrap();

        let rows = vec![ProposerRow::default()];
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        write_stage(dir_str, "calc_test", "02_proposer", &rows, now).unwrap();

        let written = fs::read_to_string(format!("{dir_str}/calc_test_02_proposer.json")).unwrap();
        let parsed: Vec<ProposerRow> = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed.len(), 1);

        fs::remove_dir_all(&dir).ok();
    }
}
