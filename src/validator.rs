//! Validator (C5): post-run invariant checks over the four stage buffers,
//! one aggregated error per failing section rather than fail-fast on the
//! first bad row, mirroring the original per-section check/report shape.

use log::info;
use crate::consolidator::Consolidated;
use crate::errors::NumericError;
use crate::models::{CalendarHour, CommitRow, HourlyRow, ProposerRow, EPS};

fn finite(x: f64) -> bool {
    x.is_finite()
}

fn check_ingest(hourly: &[HourlyRow]) -> Vec<String> {
    let mut issues = Vec::new();
    for (i, h) in hourly.iter().enumerate() {
        // Each hour belongs to exactly one zone; summed over a full day this
        // is the spec's "mask_am + mask_pm + mask_off = 24" per (month, mode).
        let mask_sum = h.mask_am as u32 + h.mask_pm as u32 + h.mask_off as u32;
        if mask_sum != 1 {
            issues.push(format!("row {i}: exactly one of mask_am/mask_pm/mask_off must be set, got sum={mask_sum}"));
        }
        if !finite(h.prod_total) || !finite(h.load) || !finite(h.surplus_net) || !finite(h.deficit_net) {
            issues.push(format!("row {i}: non-finite production/load/surplus/deficit"));
        }
        if h.prod_total < -EPS || h.load < -EPS || h.surplus_net < -EPS || h.deficit_net < -EPS {
            issues.push(format!("row {i}: negative production/load/surplus/deficit"));
        }
    }
    issues
}

fn check_proposer(proposed: &[ProposerRow], policy_cycles_per_day: u32, calendar: &[CalendarHour]) -> Vec<String> {
    let mut issues = Vec::new();
    for (i, p) in proposed.iter().enumerate() {
        if p.prop_ch_ac < -EPS {
            issues.push(format!("row {i}: prop_ch_ac negative ({})", p.prop_ch_ac));
        }
        if p.prop_dis_ac < -EPS {
            issues.push(format!("row {i}: prop_dis_ac negative ({})", p.prop_dis_ac));
        }
        if !finite(p.prop_ch_ac) || !finite(p.prop_dis_ac) {
            issues.push(format!("row {i}: non-finite prop_ch_ac/prop_dis_ac"));
        }
        if p.dec_ch && p.dec_dis {
            issues.push(format!("row {i}: dec_ch and dec_dis both set"));
        }
    }

    let mut max_cycles_by_day: std::collections::HashMap<chrono::NaiveDate, u32> = std::collections::HashMap::new();
    for (c, p) in calendar.iter().zip(proposed.iter()) {
        let entry = max_cycles_by_day.entry(c.date_key()).or_insert(0);
        *entry = (*entry).max(p.cycles_today);
    }
    for (date, cycles) in max_cycles_by_day {
        if cycles > policy_cycles_per_day {
            issues.push(format!("day {date}: realized cycles {cycles} exceeds cycles_per_day {policy_cycles_per_day}"));
        }
    }
    issues
}

fn check_commit(commit: &[CommitRow], hourly: &[HourlyRow]) -> Vec<String> {
    let mut issues = Vec::new();
    for (i, (c, h)) in commit.iter().zip(hourly.iter()).enumerate() {
        if !finite(c.soc_oze_pct) || !finite(c.soc_arbi_pct) {
            issues.push(format!("row {i}: non-finite SOC percentage"));
        }
        if c.soc_oze_pct < -EPS || c.soc_oze_pct > 1.0 + EPS {
            issues.push(format!("row {i}: soc_oze_pct out of [0,1]: {}", c.soc_oze_pct));
        }
        if c.soc_arbi_pct < -EPS || c.soc_arbi_pct > 1.0 + EPS {
            issues.push(format!("row {i}: soc_arbi_pct out of [0,1]: {}", c.soc_arbi_pct));
        }
        if !finite(c.rev_arbi_to_grid) || !finite(c.cost_grid_to_arbi) || !finite(c.cashflow_arbi) {
            issues.push(format!("row {i}: non-finite arbitrage cashflow field"));
        }

        for (name, v) in [
            ("ch_from_surplus", c.ch_from_surplus), ("ch_from_grid", c.ch_from_grid),
            ("dis_to_load", c.dis_to_load), ("dis_to_grid", c.dis_to_grid),
            ("import_for_load", c.import_for_load), ("import_for_arbi", c.import_for_arbi),
            ("export_from_surplus", c.export_from_surplus), ("export_from_arbi", c.export_from_arbi),
            ("loss_idle_oze", c.loss_idle_oze), ("loss_idle_arbi", c.loss_idle_arbi),
            ("loss_conv_ch", c.loss_conv_ch), ("loss_conv_dis_to_grid", c.loss_conv_dis_to_grid),
            ("loss_conv_dis_to_load", c.loss_conv_dis_to_load),
        ] {
            if v < -EPS {
                issues.push(format!("row {i}: {name} negative ({v})"));
            }
            if !finite(v) {
                issues.push(format!("row {i}: {name} non-finite"));
            }
        }

        let export_sum = c.export_from_surplus + c.export_from_arbi;
        if export_sum > h.caps.cap_grid_export_ac + EPS {
            issues.push(format!("row {i}: export sum {export_sum} exceeds cap_grid_export_ac {}", h.caps.cap_grid_export_ac));
        }
        let import_sum = c.import_for_load + c.import_for_arbi;
        if import_sum > h.caps.cap_grid_import_ac + EPS {
            issues.push(format!("row {i}: import sum {import_sum} exceeds cap_grid_import_ac {}", h.caps.cap_grid_import_ac));
        }

        let expected_arbi = c.rev_arbi_to_grid - c.cost_grid_to_arbi;
        if (c.cashflow_arbi - expected_arbi).abs() > 1e-6 {
            issues.push(format!("row {i}: cashflow_arbi {} != rev-cost {expected_arbi}", c.cashflow_arbi));
        }
        let expected_net = c.cashflow_arbi + c.rev_surplus_export - c.cost_import_for_load;
        if (c.cashflow_net - expected_net).abs() > 1e-6 {
            issues.push(format!("row {i}: cashflow_net {} != cashflow_arbi+rev_surplus-cost_import {expected_net}", c.cashflow_net));
        }
    }
    issues
}

fn check_pricing(pricing: &[crate::models::PricingRow]) -> Vec<String> {
    let mut issues = Vec::new();
    for (i, row) in pricing.iter().enumerate() {
        if !finite(row.total_netto) || !finite(row.total_brutto) {
            issues.push(format!("pricing row {i} ({:?}/{:?}): non-finite total", row.scenario, row.tariff));
        }
    }
    issues
}

fn check_rowcount(hourly: usize, proposed: usize, commit: usize, pricing_hours: usize) -> Vec<String> {
    let mut issues = Vec::new();
    if !(hourly == proposed && proposed == commit && commit == pricing_hours) {
        issues.push(format!(
            "row-count mismatch across stages: ingest={hourly} proposer={proposed} commit={commit} pricing_hours={pricing_hours}"
        ));
    }
    issues
}

/// Runs every invariant check over a completed run's buffers and aggregates
/// failures into one [`NumericError`] per offending section.
pub fn validate(
    consolidated: &Consolidated,
    calendar: &[CalendarHour],
    hourly: &[HourlyRow],
    proposed: &[ProposerRow],
    commit: &[CommitRow],
    pricing: &[crate::models::PricingRow],
) -> Result<(), NumericError> {
    let mut all_issues = Vec::new();
    all_issues.extend(check_ingest(hourly).into_iter().map(|s| format!("[ingest] {s}")));
    all_issues.extend(
        check_proposer(proposed, consolidated.arbitrage.cycles_per_day, calendar)
            .into_iter()
            .map(|s| format!("[proposer] {s}")),
    );
    all_issues.extend(check_commit(commit, hourly).into_iter().map(|s| format!("[commit] {s}")));
    all_issues.extend(check_pricing(pricing).into_iter().map(|s| format!("[pricing] {s}")));

    let tariffs_x_scenarios = crate::models::Scenario::ALL.len() * crate::models::Tariff::ALL.len();
    let pricing_hours = if tariffs_x_scenarios > 0 { pricing.len() / tariffs_x_scenarios } else { 0 };
    all_issues.extend(
        check_rowcount(hourly.len(), proposed.len(), commit.len(), pricing_hours)
            .into_iter()
            .map(|s| format!("[rowcount] {s}")),
    );

    if all_issues.is_empty() {
        info!("validate: all checks passed over {} hours", hourly.len());
        return Ok(());
    }

    Err(NumericError(format!("{} invariant violation(s): {}", all_issues.len(), all_issues.join("; "))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScalarCaps;

    fn caps() -> ScalarCaps {
        ScalarCaps { cap_bess_ch_net: 1.0, cap_bess_dis_net: 1.0, cap_grid_import_ac: 1.0, cap_grid_export_ac: 1.0 }
    }

    #[test]
    fn mask_sum_mismatch_is_reported() {
        let h = HourlyRow {
            ts_utc: chrono::Utc::now(),
            price_import: 0.0, price_export: 0.0,
            mask_am: 1, mask_pm: 1, mask_off: 1, mask_peak_fee: 0,
            prod_total: 0.0, load: 0.0, surplus_net: 0.0, deficit_net: 0.0,
            bonus_hrs_ch: 0, bonus_hrs_dis: 0,
            caps: caps(),
        };
        let issues = check_ingest(&[h]);
        assert!(issues.iter().any(|s| s.contains("sum=3")));
    }

    #[test]
    fn export_over_cap_is_reported() {
        let h = HourlyRow {
            ts_utc: chrono::Utc::now(),
            price_import: 0.0, price_export: 0.0,
            mask_am: 0, mask_pm: 0, mask_off: 1, mask_peak_fee: 0,
            prod_total: 0.0, load: 0.0, surplus_net: 0.0, deficit_net: 0.0,
            bonus_hrs_ch: 0, bonus_hrs_dis: 0,
            caps: caps(),
        };
        let mut c = CommitRow::default();
        c.export_from_surplus = 2.0;
        let issues = check_commit(&[c], &[h]);
        assert!(issues.iter().any(|s| s.contains("exceeds cap_grid_export_ac")));
    }

    #[test]
    fn clean_rows_pass_every_check() {
        let h = HourlyRow {
            ts_utc: chrono::Utc::now(),
            price_import: 0.0, price_export: 0.0,
            mask_am: 0, mask_pm: 0, mask_off: 1, mask_peak_fee: 0,
            prod_total: 0.0, load: 0.0, surplus_net: 0.0, deficit_net: 0.0,
            bonus_hrs_ch: 0, bonus_hrs_dis: 0,
            caps: caps(),
        };
        assert!(check_ingest(&[h]).is_empty());
        assert!(check_commit(&[CommitRow::default()], &[HourlyRow {
            ts_utc: chrono::Utc::now(),
            price_import: 0.0, price_export: 0.0,
            mask_am: 1, mask_pm: 0, mask_off: 0, mask_peak_fee: 0,
            prod_total: 0.0, load: 0.0, surplus_net: 0.0, deficit_net: 0.0,
            bonus_hrs_ch: 0, bonus_hrs_dis: 0,
            caps: caps(),
        }]).is_empty());
    }
}
