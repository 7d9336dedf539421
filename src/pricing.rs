//! Pricing & Tariff (C4): prices every hour under three load-coverage
//! scenarios and three tariffs, including the K-coefficient-gated
//! capacity fee and the valuation of commit-stage losses.

use std::collections::HashMap;
use chrono::NaiveDate;
use log::info;
use crate::consolidator::{Consolidated, ContractModel};
use crate::models::{
    price_or_zero, CalendarHour, CommitRow, DailyKCoefficient, HourlyRow, PricingRow,
    Scenario, Tariff,
};

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .expect("valid next-month boundary");
    let first = NaiveDate::from_ymd_opt(year, month, 1).expect("valid month start");
    (next - first).num_days() as u32
}

/// Consumption-weighted zone split for one day, feeding the K-coefficient
/// capacity fee (§4.5 "K coefficient per day").
fn daily_k_coefficients(
    consolidated: &Consolidated,
    calendar: &[CalendarHour],
    hourly: &[HourlyRow],
) -> HashMap<NaiveDate, DailyKCoefficient> {
    struct Acc {
        peak_sum: f64,
        peak_n: u32,
        off_sum: f64,
        off_n: u32,
    }

    let mut accs: HashMap<NaiveDate, Acc> = HashMap::new();
    for (c, h) in calendar.iter().zip(hourly.iter()) {
        let acc = accs.entry(c.date_key()).or_insert(Acc { peak_sum: 0.0, peak_n: 0, off_sum: 0.0, off_n: 0 });
        if h.mask_peak_fee == 1 {
            acc.peak_sum += h.load;
            acc.peak_n += 1;
        } else {
            acc.off_sum += h.load;
            acc.off_n += 1;
        }
    }

    let mut out = HashMap::new();
    for (date, acc) in accs {
        let avg_peak = if acc.peak_n > 0 { acc.peak_sum / acc.peak_n as f64 } else { 0.0 };
        let avg_off = if acc.off_n > 0 { acc.off_sum / acc.off_n as f64 } else { 0.0 };

        let delta_s_pct = if avg_off == 0.0 && avg_peak == 0.0 {
            0.0
        } else if avg_off == 0.0 && avg_peak > 0.0 {
            f64::INFINITY
        } else {
            (avg_peak / avg_off - 1.0) * 100.0
        };

        let (bucket, a) = consolidated.k_param.bucket(delta_s_pct);
        out.insert(date, DailyKCoefficient { date, delta_s_pct, bucket, a });
    }
    out
}

/// Energy covered by the grid under one scenario, for one hour.
fn scenario_energy(scenario: Scenario, h: &HourlyRow, c: &CommitRow) -> f64 {
    match scenario {
        Scenario::Grid => h.load,
        Scenario::OzeGrid => h.deficit_net,
        Scenario::MagOze => c.import_for_load,
    }
}

fn distribution_rate(consolidated: &Consolidated, tariff: Tariff, h: &HourlyRow) -> f64 {
    let rates = consolidated.distribution_rates.get(&tariff)
        .expect("distribution rates present for every tariff");
    let base = match tariff {
        Tariff::B23 => {
            if h.mask_am == 1 { rates.rate_am.unwrap_or(0.0) }
            else if h.mask_pm == 1 { rates.rate_pm.unwrap_or(0.0) }
            else { rates.rate_off.unwrap_or(0.0) }
        }
        Tariff::B22 => {
            if h.mask_am == 1 || h.mask_pm == 1 { rates.rate_day.unwrap_or(0.0) }
            else { rates.rate_night.unwrap_or(0.0) }
        }
        Tariff::B21 => rates.rate_flat.unwrap_or(0.0),
    };
    base + rates.quality
}

/// Runs pricing for every hour, scenario and tariff.
pub fn price(
    consolidated: &Consolidated,
    calendar: &[CalendarHour],
    hourly: &[HourlyRow],
    commit: &[CommitRow],
) -> Vec<PricingRow> {
    let k_by_day = daily_k_coefficients(consolidated, calendar, hourly);
    let mut out = Vec::with_capacity(hourly.len() * Scenario::ALL.len() * Tariff::ALL.len());

    for ((c, h), commit_row) in calendar.iter().zip(hourly.iter()).zip(commit.iter()) {
        let hours_in_month = days_in_month(c.year, c.month) * 24;
        let k = k_by_day.get(&c.date_key()).expect("every hour's day has a K coefficient");

        for scenario in Scenario::ALL {
            let energy = scenario_energy(scenario, h, commit_row);

            let price_import = price_or_zero(h.price_import);
            let price_export = price_or_zero(h.price_export);
            let commodity_price = match consolidated.contract.model {
                ContractModel::Fixed { price_pln_mwh } => price_pln_mwh,
                ContractModel::Dynamic { delta_pct } => price_import * (1.0 + delta_pct / 100.0),
            };

            for tariff in Tariff::ALL {
                let commodity_cost = energy * commodity_price;
                let margin_var_cost = energy * consolidated.contract.margin_var_pln_mwh;
                let margin_fix_cost = energy * consolidated.contract.margin_fix_pln_mwh;
                let trading_fee_share = consolidated.contract.trading_fee_monthly_pln / hours_in_month as f64;

                let distribution_variable_cost = energy * distribution_rate(consolidated, tariff, h);
                let rates = consolidated.distribution_rates.get(&tariff)
                    .expect("distribution rates present for every tariff");
                let monthly_fixed = (rates.fixed_per_kw_month + rates.trans_per_kw_month)
                    * consolidated.customer.contract_power_kw
                    + rates.abonament_month_pln;
                let distribution_fixed_share = monthly_fixed / hours_in_month as f64;

                let system_fee_oze = energy * consolidated.system_fees.rate_oze_pln_mwh;
                let system_fee_kog = energy * consolidated.system_fees.rate_kog_pln_mwh;
                let system_fee_capacity = if h.mask_peak_fee == 1 {
                    energy * consolidated.system_fees.rate_moc_pln_mwh * k.a
                } else {
                    0.0
                };

                let excise_cost = energy * consolidated.fiscal.excise_pln_mwh;

                let vat_base = commodity_cost
                    + margin_var_cost
                    + margin_fix_cost
                    + trading_fee_share
                    + distribution_variable_cost
                    + distribution_fixed_share
                    + system_fee_oze
                    + system_fee_kog
                    + system_fee_capacity
                    + excise_cost;
                let vat_amount = vat_base * consolidated.fiscal.vat_frac;
                let total_netto = vat_base;
                let total_brutto = total_netto + vat_amount;

                out.push(PricingRow {
                    ts_utc: h.ts_utc,
                    scenario,
                    tariff,
                    commodity_cost,
                    margin_var_cost,
                    margin_fix_cost,
                    trading_fee_share,
                    distribution_variable_cost,
                    distribution_fixed_share,
                    system_fee_oze,
                    system_fee_kog,
                    system_fee_capacity,
                    excise_cost,
                    vat_base,
                    vat_amount: round2(vat_amount),
                    total_netto: round2(total_netto),
                    total_brutto: round2(total_brutto),
                    pln_loss_conv_ch: commit_row.loss_conv_ch * price_import,
                    pln_loss_conv_dis_to_grid: commit_row.loss_conv_dis_to_grid * price_export,
                    pln_loss_conv_dis_to_load: commit_row.loss_conv_dis_to_load * price_import,
                    pln_loss_idle_arbi: commit_row.loss_idle_arbi * price_import,
                    pln_loss_idle_oze: commit_row.loss_idle_oze * price_export,
                    pln_wasted_surplus_cap: commit_row.wasted_surplus_due_to_export_cap * price_export,
                    pln_cap_blocked_dis_ac: commit_row.cap_blocked_dis_ac * price_export,
                    pln_cap_blocked_ch_ac: commit_row.cap_blocked_ch_ac * price_import,
                    pln_unserved_load_after_cap: commit_row.unserved_load_after_cap * price_import,
                });
            }
        }
    }

    info!("priced {} rows across {} scenarios x {} tariffs", out.len(), Scenario::ALL.len(), Tariff::ALL.len());
    out
}
