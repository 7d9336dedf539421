//! Arbitrage Proposer (C2): a deterministic daily pairing of low-price
//! charge hours and high-price discharge hours, gated by profitability
//! thresholds with hour- and SOC-dependent bonuses and a cycle budget.

use std::collections::HashMap;
use chrono::NaiveDate;
use log::info;
use crate::consolidator::Consolidated;
use crate::models::{CalendarHour, HourlyRow, ProposerRow, clamp_small, EPS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleState {
    Idle,
    Charging,
    Discharging,
}

/// Greedy time-ordered pairing of up to K lowest-import and K
/// highest-export hours within one day (§4.3 "Daily pairing").
fn pair_day(day_idx: &[usize], rows: &[HourlyRow], k: u32) -> (Vec<i64>, Vec<i64>) {
    let n = day_idx.len();
    let mut pair_low = vec![-1i64; n];
    let mut pair_high = vec![-1i64; n];

    let mut lows: Vec<usize> = day_idx.to_vec();
    lows.sort_by(|&a, &b| {
        rows[a].price_import
            .partial_cmp(&rows[b].price_import)
            .unwrap()
            .then(a.cmp(&b))
    });
    lows.truncate(k as usize);
    lows.sort();

    let mut highs: Vec<usize> = day_idx.to_vec();
    highs.sort_by(|&a, &b| {
        rows[b].price_export
            .partial_cmp(&rows[a].price_export)
            .unwrap()
            .then(a.cmp(&b))
    });
    highs.truncate(k as usize);

    let mut used = vec![false; highs.len()];
    for &low in &lows {
        let mut best: Option<(usize, usize)> = None; // (position in highs, global idx)
        for (pos, &high) in highs.iter().enumerate() {
            if used[pos] || high <= low {
                continue;
            }
            match best {
                None => best = Some((pos, high)),
                Some((_, bh)) if rows[high].price_export > rows[bh].price_export => {
                    best = Some((pos, high));
                }
                _ => {}
            }
        }
        if let Some((pos, high)) = best {
            used[pos] = true;
            let li = day_idx.iter().position(|&x| x == low).unwrap();
            let hi = day_idx.iter().position(|&x| x == high).unwrap();
            pair_low[li] = high as i64;
            pair_high[hi] = low as i64;
        }
    }

    (pair_low, pair_high)
}

/// Runs the arbitrage proposer over the whole hourly buffer, producing one
/// [`ProposerRow`] per hour, lockstep with `rows`.
pub fn propose(
    consolidated: &Consolidated,
    calendar: &[CalendarHour],
    rows: &[HourlyRow],
    initial_soc_arbi: f64,
) -> Vec<ProposerRow> {
    let policy = &consolidated.arbitrage;
    let bess = &consolidated.bess;
    let n = rows.len();
    let mut out: Vec<ProposerRow> = (0..n).map(|_| ProposerRow::default()).collect();

    let mut days: HashMap<NaiveDate, Vec<usize>> = HashMap::new();
    for (i, hour) in calendar.iter().enumerate() {
        days.entry(hour.date_key()).or_default().push(i);
    }
    let mut day_keys: Vec<NaiveDate> = days.keys().copied().collect();
    day_keys.sort();

    let mut soc_sim = initial_soc_arbi;
    let mut pending = 0.0f64;
    let mut state = CycleState::Idle;

    let cap_ch_ac_eff = bess.caps.cap_grid_import_ac.min(bess.caps.cap_bess_ch_net / bess.eta_ch);
    let cap_dis_ac_eff = bess.caps.cap_grid_export_ac.min(bess.caps.cap_bess_dis_net * bess.eta_dis);

    for day in day_keys {
        let day_idx = days[&day].clone();
        let (pair_low, pair_high) = pair_day(&day_idx, rows, policy.cycles_per_day);

        if !policy.allow_carry_over {
            pending = 0.0;
        }
        let mut cycles_today = 0u32;

        for (pos, &i) in day_idx.iter().enumerate() {
            let row = &rows[i];
            let p_low_thr = soc_sim <= policy.p_low * bess.emax_arbi;
            let p_high_thr = soc_sim >= policy.p_high * bess.emax_arbi;

            let thr_low = policy.base_min_profit_pln_mwh
                + if row.bonus_hrs_ch == 1 { policy.hour_bonus_ch } else { 0.0 }
                + if p_low_thr { policy.soc_bonus_ch } else { 0.0 };
            let thr_high = policy.base_min_profit_pln_mwh
                + if row.bonus_hrs_dis == 1 { policy.hour_bonus_dis } else { 0.0 }
                + if p_high_thr { policy.soc_bonus_dis } else { 0.0 };

            let is_low = pair_low[pos] >= 0;
            let is_high = pair_high[pos] >= 0;

            let delta_k = if is_low {
                Some(rows[pair_low[pos] as usize].price_export - row.price_import)
            } else if is_high {
                Some(row.price_export - rows[pair_high[pos] as usize].price_import)
            } else {
                None
            };

            let mut prop_ch_ac = 0.0;
            let mut prop_dis_ac = 0.0;
            let mut dec_ch = false;
            let mut dec_dis = false;

            if is_low && cycles_today < policy.cycles_per_day {
                let dk = delta_k.unwrap();
                let headroom = bess.emax_arbi - soc_sim;
                if dk - thr_low >= 0.0 && headroom > EPS {
                    let charge_net = (cap_ch_ac_eff * bess.eta_ch).min(headroom);
                    prop_ch_ac = charge_net / bess.eta_ch;
                    soc_sim = clamp_small(soc_sim + charge_net);
                    pending += charge_net;
                    dec_ch = true;
                    if state == CycleState::Idle {
                        state = CycleState::Charging;
                    }
                }
            }

            // An hour paired on both sides commits to at most one decision per
            // the IDLE -> CHARGING -> DISCHARGING state machine: charge wins.
            if is_high && !dec_ch && cycles_today < policy.cycles_per_day {
                let dk = delta_k.unwrap();
                if dk - thr_high >= 0.0 && soc_sim > EPS {
                    let mut can_dis_net = (cap_dis_ac_eff / bess.eta_dis).min(soc_sim);
                    if policy.force_order {
                        can_dis_net = can_dis_net.min(pending);
                    }
                    if can_dis_net > EPS {
                        prop_dis_ac = can_dis_net * bess.eta_dis;
                        soc_sim = clamp_small(soc_sim - can_dis_net);
                        pending = clamp_small((pending - can_dis_net).max(0.0));
                        dec_dis = true;
                        if state == CycleState::Charging || state == CycleState::Idle {
                            state = CycleState::Discharging;
                        }
                        if pending <= EPS {
                            cycles_today += 1;
                            state = CycleState::Idle;
                        }
                    }
                }
            }

            out[i] = ProposerRow {
                prop_ch_ac,
                prop_dis_ac,
                dec_ch,
                dec_dis,
                thr_low,
                thr_high,
                delta_k,
                soc_sim_arbi: soc_sim,
                pending,
                cycles_today,
                pair_low: pair_low[pos],
                pair_high: pair_high[pos],
            };
        }
    }

    info!("proposer produced {} hourly rows", out.len());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;
    use crate::consolidator::consolidate;
    use chrono::{TimeZone, Utc, Weekday};

    fn hourly_row(ts: chrono::DateTime<Utc>, price_import: f64, price_export: f64) -> HourlyRow {
        HourlyRow {
            ts_utc: ts,
            price_import,
            price_export,
            mask_am: 0,
            mask_pm: 0,
            mask_off: 1,
            mask_peak_fee: 0,
            prod_total: 0.0,
            load: 0.0,
            surplus_net: 0.0,
            deficit_net: 0.0,
            bonus_hrs_ch: 0,
            bonus_hrs_dis: 0,
            caps: crate::models::ScalarCaps {
                cap_bess_ch_net: 10.0,
                cap_bess_dis_net: 10.0,
                cap_grid_import_ac: 10.0,
                cap_grid_export_ac: 10.0,
            },
        }
    }

    fn minimal_config() -> Config {
        let mut distribution_schedule = vec![];
        let mut peak_fee_schedule = vec![];
        for tariff in ["B21", "B22", "B23"] {
            for month in 1..=12u32 {
                for mode in ["work", "free"] {
                    distribution_schedule.push(DistributionScheduleEntry {
                        tariff: tariff.into(), month, mode: mode.into(), segment: "morn".into(), start: 6, end: 10,
                    });
                    distribution_schedule.push(DistributionScheduleEntry {
                        tariff: tariff.into(), month, mode: mode.into(), segment: "aft".into(), start: 17, end: 21,
                    });
                }
            }
        }
        for month in 1..=12u32 {
            for mode in ["work", "free"] {
                peak_fee_schedule.push(PeakFeeEntry { month, mode: mode.into(), start: 17, end: 21 });
            }
        }
        let mut distribution_rates = vec![];
        for tariff in ["B21", "B22", "B23"] {
            distribution_rates.push(DistributionRatesEntry {
                tariff: tariff.into(),
                rate_am_pln_mwh: Some(100.0),
                rate_pm_pln_mwh: Some(120.0),
                rate_off_pln_mwh: Some(80.0),
                rate_day_pln_mwh: Some(110.0),
                rate_night_pln_mwh: Some(80.0),
                rate_flat_pln_mwh: Some(100.0),
                quality_pln_mwh: 2.0,
                fixed_per_kw_month: 5.0,
                trans_per_kw_month: 3.0,
                abonament_month_pln: 10.0,
            });
        }

        Config {
            params: ParamForms {
                bess: BessForm {
                    emax_total_mwh: 2.0,
                    frac_arbi: 0.5,
                    eta_ch_pct: 95.0,
                    eta_dis_pct: 95.0,
                    lambda_h_frac: Some(0.0),
                    lambda_day_pct: None,
                    lambda_month_pct: None,
                    c_rate_charge: Some(1.0),
                    c_rate_discharge: Some(1.0),
                    time_to_full_charge_h: None,
                    time_to_full_discharge_h: None,
                },
                arbitrage: ArbitrageForm {
                    cycles_per_day: 1,
                    base_min_profit_pln_mwh: 50.0,
                    hour_bonus_ch: 0.0,
                    hour_bonus_dis: 0.0,
                    soc_bonus_ch: 0.0,
                    soc_bonus_dis: 0.0,
                    p_low_pct: 10.0,
                    p_high_pct: 90.0,
                    allow_carry_over: false,
                    force_order: false,
                    arbi_dis_to_load: false,
                    bonus_hours_ch_per_day: 0,
                    bonus_hours_dis_per_day: 0,
                },
                contract: ContractForm {
                    model: "fixed".into(),
                    fixed_price_pln_mwh: Some(300.0),
                    delta_pct: None,
                    margin_var_pln_mwh: 5.0,
                    margin_fix_pln_mwh: 2.0,
                    trading_fee_monthly_pln: 10.0,
                    contract_power_import_mw: 1.0,
                    contract_power_export_mw: 1.0,
                },
                fiscal: FiscalForm { vat_pct: 23.0, excise_pln_mwh: 5.0 },
                lcoe: LcoeForm { lcoe_pv_pp: 200.0, lcoe_pv_wz: 210.0, lcoe_wiatr: 180.0 },
                distribution_schedule,
                peak_fee_schedule,
                distribution_rates,
                system_fees: SystemFeesForm { rate_oze_pln_mwh: 1.0, rate_kog_pln_mwh: 1.0, rate_moc_pln_mwh: 10.0 },
                k_param: KParamForm::default(),
                customer: CustomerForm {
                    contract_power_kw: 10.0,
                    production_multiplier_pv_pp: 1.0,
                    production_multiplier_pv_wz: 1.0,
                    production_multiplier_wiatr: 1.0,
                    consumption_multiplier_pct: 0.0,
                },
            },
            files: Files { output_dir: "/tmp".into(), input_dir: "/tmp".into() },
            queue: Queue { debounce_seconds: 2, tick_seconds: 30 },
            general: General { log_path: "/tmp/log".into(), log_level: log::LevelFilter::Info, log_to_stdout: true },
        }
    }

    /// S3 — single arbitrage cycle.
    #[test]
    fn single_day_pairs_lowest_import_with_highest_export() {
        let config = minimal_config();
        let consolidated = consolidate(&config).unwrap();
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut calendar = vec![];
        let mut rows = vec![];
        for h in 0..24u32 {
            let ts = base + chrono::Duration::hours(h as i64);
            calendar.push(CalendarHour {
                ts_utc: ts,
                ts_local: ts.naive_utc(),
                year: 2026, month: 1, day: 1, hour: h,
                weekday: Weekday::Thu, is_workday: true, is_holiday: false,
            });
            let (pi, pe) = match h {
                3 | 4 => (100.0, 200.0),
                18 | 19 => (200.0, 500.0),
                _ => (250.0, 250.0),
            };
            rows.push(hourly_row(ts, pi, pe));
        }

        let proposed = propose(&consolidated, &calendar, &rows, 0.0);
        let total_ch: f64 = proposed.iter().map(|r| r.prop_ch_ac).sum();
        let total_dis: f64 = proposed.iter().map(|r| r.prop_dis_ac).sum();
        assert!(total_ch > 0.0);
        assert!(total_dis > 0.0);
        assert_eq!(proposed.last().unwrap().cycles_today, 1);
    }

    /// Runs one 24h day with a single low hour (price_import=100) at hour 3
    /// paired against a single high hour (price_export) at hour 18, and
    /// returns the proposer row for the low hour.
    fn single_pair_day(price_export_high: f64, soc_bonus_ch: f64, initial_soc_arbi: f64) -> ProposerRow {
        let mut config = minimal_config();
        config.params.arbitrage.base_min_profit_pln_mwh = 50.0;
        config.params.arbitrage.soc_bonus_ch = soc_bonus_ch;
        config.params.arbitrage.p_low_pct = 10.0;
        let consolidated = consolidate(&config).unwrap();

        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut calendar = vec![];
        let mut rows = vec![];
        for h in 0..24u32 {
            let ts = base + chrono::Duration::hours(h as i64);
            calendar.push(CalendarHour {
                ts_utc: ts,
                ts_local: ts.naive_utc(),
                year: 2026, month: 1, day: 1, hour: h,
                weekday: Weekday::Thu, is_workday: true, is_holiday: false,
            });
            let (pi, pe) = match h {
                3 => (100.0, 100.0),
                18 => (100.0, price_export_high),
                _ => (250.0, 50.0),
            };
            rows.push(hourly_row(ts, pi, pe));
        }

        let proposed = propose(&consolidated, &calendar, &rows, initial_soc_arbi);
        proposed[3].clone()
    }

    /// S5 — SOC bonus activation.
    #[test]
    fn soc_bonus_raises_low_threshold_and_gates_charge_decision() {
        // soc_arbi = 0.05 * emax_arbi (emax_arbi = 1.0), p_low=10%, soc_bonus_ch=30,
        // base_min_profit=50 => thr_low=80.
        let enabling = single_pair_day(185.0, 30.0, 0.05); // delta_k = 85
        assert!((enabling.thr_low - 80.0).abs() < 1e-9);
        assert!((enabling.delta_k.unwrap() - 85.0).abs() < 1e-9);
        assert!(enabling.dec_ch);

        let blocking = single_pair_day(170.0, 30.0, 0.05); // delta_k = 70
        assert!((blocking.thr_low - 80.0).abs() < 1e-9);
        assert!((blocking.delta_k.unwrap() - 70.0).abs() < 1e-9);
        assert!(!blocking.dec_ch);
    }
}
