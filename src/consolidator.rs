//! Parameter Consolidator (C0): turns the raw, alias-bearing parameter forms
//! into one immutable, semantically-named [`Consolidated`] value. Every
//! percent-to-fraction normalization and c-rate/time-to-full resolution
//! happens here, once, so nothing downstream ever looks up an alias.

use std::collections::HashMap;
use log::info;
use crate::config::{Config, DistributionRatesEntry, KParamForm};
use crate::errors::ParameterError;
use crate::models::{BessConfig, KBucket, Mode, ScalarCaps, Tariff};

/// Distribution variable rate, resolved per (tariff, mode, zone).
#[derive(Debug, Clone, Copy)]
pub struct DistributionVariableRates {
    pub rate_am: Option<f64>,
    pub rate_pm: Option<f64>,
    pub rate_off: Option<f64>,
    pub rate_day: Option<f64>,
    pub rate_night: Option<f64>,
    pub rate_flat: Option<f64>,
    pub quality: f64,
    pub fixed_per_kw_month: f64,
    pub trans_per_kw_month: f64,
    pub abonament_month_pln: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct ArbitragePolicy {
    pub cycles_per_day: u32,
    pub base_min_profit_pln_mwh: f64,
    pub hour_bonus_ch: f64,
    pub hour_bonus_dis: f64,
    pub soc_bonus_ch: f64,
    pub soc_bonus_dis: f64,
    pub p_low: f64,
    pub p_high: f64,
    pub allow_carry_over: bool,
    pub force_order: bool,
    pub arbi_dis_to_load: bool,
    pub bonus_hours_ch_per_day: u32,
    pub bonus_hours_dis_per_day: u32,
}

#[derive(Debug, Clone, Copy)]
pub enum ContractModel {
    Fixed { price_pln_mwh: f64 },
    Dynamic { delta_pct: f64 },
}

#[derive(Debug, Clone, Copy)]
pub struct Contract {
    pub model: ContractModel,
    pub margin_var_pln_mwh: f64,
    pub margin_fix_pln_mwh: f64,
    pub trading_fee_monthly_pln: f64,
    pub contract_power_import_kw: f64,
    pub contract_power_export_kw: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct Fiscal {
    pub vat_frac: f64,
    pub excise_pln_mwh: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct Lcoe {
    pub pv_pp: f64,
    pub pv_wz: f64,
    pub wiatr: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct SystemFees {
    pub rate_oze_pln_mwh: f64,
    pub rate_kog_pln_mwh: f64,
    pub rate_moc_pln_mwh: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct KParamPolicy {
    pub thresholds_pct: [f64; 3],
    pub a: [f64; 4],
}

impl KParamPolicy {
    pub fn bucket(&self, delta_s_pct: f64) -> (KBucket, f64) {
        if delta_s_pct <= self.thresholds_pct[0] {
            (KBucket::K1, self.a[0])
        } else if delta_s_pct <= self.thresholds_pct[1] {
            (KBucket::K2, self.a[1])
        } else if delta_s_pct <= self.thresholds_pct[2] {
            (KBucket::K3, self.a[2])
        } else {
            (KBucket::K4, self.a[3])
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Customer {
    pub contract_power_kw: f64,
    pub production_multiplier_pv_pp: f64,
    pub production_multiplier_pv_wz: f64,
    pub production_multiplier_wiatr: f64,
    pub consumption_multiplier: f64,
}

/// A resolved (start, end) window on the 24-hour ring. May wrap past midnight.
#[derive(Debug, Clone, Copy)]
pub struct Window {
    pub start: u32,
    pub end: u32,
}

/// Everything the rest of the pipeline reads — no aliases, no fallbacks.
pub struct Consolidated {
    pub bess: BessConfig,
    pub arbitrage: ArbitragePolicy,
    pub contract: Contract,
    pub fiscal: Fiscal,
    pub lcoe: Lcoe,
    pub system_fees: SystemFees,
    pub k_param: KParamPolicy,
    pub customer: Customer,
    /// (tariff, month, mode, "morn"|"aft") -> window
    pub distribution_schedule: HashMap<(Tariff, u32, Mode, &'static str), Window>,
    /// (month, mode) -> window
    pub peak_fee_schedule: HashMap<(u32, Mode), Window>,
    pub distribution_rates: HashMap<Tariff, DistributionVariableRates>,
}

fn parse_mode(s: &str) -> Result<Mode, ParameterError> {
    match s.trim().to_lowercase().as_str() {
        "work" => Ok(Mode::Work),
        "free" => Ok(Mode::Free),
        other => Err(ParameterError(format!("unknown schedule mode '{other}'"))),
    }
}

fn parse_segment(s: &str) -> Result<&'static str, ParameterError> {
    match s.trim().to_lowercase().as_str() {
        "morn" => Ok("morn"),
        "aft" => Ok("aft"),
        other => Err(ParameterError(format!("unknown schedule segment '{other}'"))),
    }
}

fn check_hour(h: u32, ctx: &str) -> Result<(), ParameterError> {
    if h > 24 {
        return Err(ParameterError(format!("schedule hour out of range in {ctx}: {h}")));
    }
    Ok(())
}

/// `c_rate = 1/t_full` and vice versa; whichever is given directly wins.
fn resolve_rate_and_time(c_rate: Option<f64>, t_full: Option<f64>) -> (f64, f64) {
    if let Some(t) = t_full.filter(|t| *t > 0.0) {
        (1.0 / t, t)
    } else if let Some(c) = c_rate.filter(|c| *c > 0.0) {
        (c, 1.0 / c)
    } else {
        (0.0, 0.0)
    }
}

/// Hourly self-discharge, derived from whichever granularity was given,
/// falling back to daily then monthly percent, then 0.
fn resolve_lambda_h(lambda_h: Option<f64>, lambda_day_pct: Option<f64>, lambda_month_pct: Option<f64>) -> f64 {
    if let Some(h) = lambda_h {
        return h;
    }
    if let Some(d) = lambda_day_pct {
        return (d / 100.0) / 24.0;
    }
    if let Some(m) = lambda_month_pct {
        return (m / 100.0) / (24.0 * 30.4375);
    }
    0.0
}

fn normalize_fraction(pct_or_frac: f64) -> f64 {
    if pct_or_frac > 1.0 { pct_or_frac / 100.0 } else { pct_or_frac }
}

pub fn consolidate(config: &Config) -> Result<Consolidated, ParameterError> {
    let p = &config.params;

    let eta_ch = normalize_fraction(p.bess.eta_ch_pct);
    let eta_dis = normalize_fraction(p.bess.eta_dis_pct);
    if !(0.0..=1.0).contains(&eta_ch) || eta_ch <= 0.0 {
        return Err(ParameterError(format!("eta_ch out of (0,1]: {eta_ch}")));
    }
    if !(0.0..=1.0).contains(&eta_dis) || eta_dis <= 0.0 {
        return Err(ParameterError(format!("eta_dis out of (0,1]: {eta_dis}")));
    }

    let lambda_h = resolve_lambda_h(p.bess.lambda_h_frac, p.bess.lambda_day_pct, p.bess.lambda_month_pct);
    if !(0.0..1.0).contains(&lambda_h) {
        return Err(ParameterError(format!("lambda_h out of [0,1): {lambda_h}")));
    }

    let (_c_ch, t_full_ch) = resolve_rate_and_time(p.bess.c_rate_charge, p.bess.time_to_full_charge_h);
    let (_c_dis, t_full_dis) = resolve_rate_and_time(p.bess.c_rate_discharge, p.bess.time_to_full_discharge_h);
    if t_full_ch <= 0.0 {
        return Err(ParameterError("bess charge c-rate/time-to-full is unresolvable".into()));
    }
    if t_full_dis <= 0.0 {
        return Err(ParameterError("bess discharge c-rate/time-to-full is unresolvable".into()));
    }

    let emax_total = p.bess.emax_total_mwh;
    if emax_total <= 0.0 {
        return Err(ParameterError("emax_total_mwh must be positive".into()));
    }
    let emax_arbi = emax_total * p.bess.frac_arbi;
    let emax_oze = emax_total - emax_arbi;

    let caps = ScalarCaps {
        cap_bess_ch_net: emax_total / t_full_ch,
        cap_bess_dis_net: emax_total / t_full_dis,
        cap_grid_import_ac: p.contract.contract_power_import_mw,
        cap_grid_export_ac: p.contract.contract_power_export_mw,
    };

    let bess = BessConfig {
        emax_total,
        emax_oze,
        emax_arbi,
        eta_ch,
        eta_dis,
        lambda_h,
        caps,
    };

    let arbitrage = ArbitragePolicy {
        cycles_per_day: p.arbitrage.cycles_per_day,
        base_min_profit_pln_mwh: p.arbitrage.base_min_profit_pln_mwh,
        hour_bonus_ch: p.arbitrage.hour_bonus_ch,
        hour_bonus_dis: p.arbitrage.hour_bonus_dis,
        soc_bonus_ch: p.arbitrage.soc_bonus_ch,
        soc_bonus_dis: p.arbitrage.soc_bonus_dis,
        p_low: normalize_fraction(p.arbitrage.p_low_pct),
        p_high: normalize_fraction(p.arbitrage.p_high_pct),
        allow_carry_over: p.arbitrage.allow_carry_over,
        force_order: p.arbitrage.force_order,
        arbi_dis_to_load: p.arbitrage.arbi_dis_to_load,
        bonus_hours_ch_per_day: p.arbitrage.bonus_hours_ch_per_day,
        bonus_hours_dis_per_day: p.arbitrage.bonus_hours_dis_per_day,
    };

    let model = match p.contract.model.trim().to_lowercase().as_str() {
        "fixed" => ContractModel::Fixed {
            price_pln_mwh: p.contract.fixed_price_pln_mwh
                .ok_or_else(|| ParameterError("contract model 'fixed' requires fixed_price_pln_mwh".into()))?,
        },
        "dynamic" => ContractModel::Dynamic {
            delta_pct: p.contract.delta_pct
                .ok_or_else(|| ParameterError("contract model 'dynamic' requires delta_pct".into()))?,
        },
        other => return Err(ParameterError(format!("unknown contract model '{other}'"))),
    };

    let contract = Contract {
        model,
        margin_var_pln_mwh: p.contract.margin_var_pln_mwh,
        margin_fix_pln_mwh: p.contract.margin_fix_pln_mwh,
        trading_fee_monthly_pln: p.contract.trading_fee_monthly_pln,
        contract_power_import_kw: p.contract.contract_power_import_mw * 1000.0,
        contract_power_export_kw: p.contract.contract_power_export_mw * 1000.0,
    };

    let fiscal = Fiscal {
        vat_frac: normalize_fraction(p.fiscal.vat_pct),
        excise_pln_mwh: p.fiscal.excise_pln_mwh,
    };

    let lcoe = Lcoe {
        pv_pp: p.lcoe.lcoe_pv_pp,
        pv_wz: p.lcoe.lcoe_pv_wz,
        wiatr: p.lcoe.lcoe_wiatr,
    };

    let system_fees = SystemFees {
        rate_oze_pln_mwh: p.system_fees.rate_oze_pln_mwh,
        rate_kog_pln_mwh: p.system_fees.rate_kog_pln_mwh,
        rate_moc_pln_mwh: p.system_fees.rate_moc_pln_mwh,
    };

    let k_param = build_k_param(&p.k_param)?;

    let customer = Customer {
        contract_power_kw: p.customer.contract_power_kw,
        production_multiplier_pv_pp: p.customer.production_multiplier_pv_pp,
        production_multiplier_pv_wz: p.customer.production_multiplier_pv_wz,
        production_multiplier_wiatr: p.customer.production_multiplier_wiatr,
        consumption_multiplier: normalize_fraction(p.customer.consumption_multiplier_pct),
    };

    let distribution_schedule = build_distribution_schedule(&p.distribution_schedule)?;
    let peak_fee_schedule = build_peak_fee_schedule(&p.peak_fee_schedule)?;
    let distribution_rates = build_distribution_rates(&p.distribution_rates)?;

    info!(
        "consolidated parameters: emax_total={:.3} MWh, eta_ch={:.3}, eta_dis={:.3}, lambda_h={:.6}",
        emax_total, eta_ch, eta_dis, lambda_h
    );

    Ok(Consolidated {
        bess,
        arbitrage,
        contract,
        fiscal,
        lcoe,
        system_fees,
        k_param,
        customer,
        distribution_schedule,
        peak_fee_schedule,
        distribution_rates,
    })
}

fn build_k_param(form: &KParamForm) -> Result<KParamPolicy, ParameterError> {
    let mut thresholds = form.thresholds_pct.clone();
    thresholds.sort_by(|a, b| a.partial_cmp(b).unwrap());
    if thresholds.len() != 3 {
        return Err(ParameterError(format!(
            "k_param thresholds_pct must have exactly 3 entries, got {}",
            thresholds.len()
        )));
    }
    Ok(KParamPolicy {
        thresholds_pct: [thresholds[0], thresholds[1], thresholds[2]],
        a: [form.k1, form.k2, form.k3, form.k4],
    })
}

fn build_distribution_schedule(
    entries: &[crate::config::DistributionScheduleEntry],
) -> Result<HashMap<(Tariff, u32, Mode, &'static str), Window>, ParameterError> {
    let mut map = HashMap::new();
    for e in entries {
        let tariff = Tariff::parse(&e.tariff)
            .ok_or_else(|| ParameterError(format!("unknown tariff identifier '{}'", e.tariff)))?;
        let mode = parse_mode(&e.mode)?;
        let segment = parse_segment(&e.segment)?;
        check_hour(e.start, "distribution_schedule")?;
        check_hour(e.end, "distribution_schedule")?;
        map.insert((tariff, e.month, mode, segment), Window { start: e.start, end: e.end });
    }
    for tariff in Tariff::ALL {
        for month in 1..=12u32 {
            for mode in [Mode::Work, Mode::Free] {
                for segment in ["morn", "aft"] {
                    if !map.contains_key(&(tariff, month, mode, segment)) {
                        return Err(ParameterError(format!(
                            "missing distribution schedule entry for {tariff} month={month} mode={mode} segment={segment}"
                        )));
                    }
                }
            }
        }
    }
    Ok(map)
}

fn build_peak_fee_schedule(
    entries: &[crate::config::PeakFeeEntry],
) -> Result<HashMap<(u32, Mode), Window>, ParameterError> {
    let mut map = HashMap::new();
    for e in entries {
        let mode = parse_mode(&e.mode)?;
        check_hour(e.start, "peak_fee_schedule")?;
        check_hour(e.end, "peak_fee_schedule")?;
        map.insert((e.month, mode), Window { start: e.start, end: e.end });
    }
    for month in 1..=12u32 {
        for mode in [Mode::Work, Mode::Free] {
            if !map.contains_key(&(month, mode)) {
                return Err(ParameterError(format!(
                    "missing peak-fee schedule entry for month={month} mode={mode}"
                )));
            }
        }
    }
    Ok(map)
}

fn build_distribution_rates(
    entries: &[DistributionRatesEntry],
) -> Result<HashMap<Tariff, DistributionVariableRates>, ParameterError> {
    let mut map = HashMap::new();
    for e in entries {
        let tariff = Tariff::parse(&e.tariff)
            .ok_or_else(|| ParameterError(format!("unknown tariff identifier '{}'", e.tariff)))?;
        map.insert(tariff, DistributionVariableRates {
            rate_am: e.rate_am_pln_mwh,
            rate_pm: e.rate_pm_pln_mwh,
            rate_off: e.rate_off_pln_mwh,
            rate_day: e.rate_day_pln_mwh,
            rate_night: e.rate_night_pln_mwh,
            rate_flat: e.rate_flat_pln_mwh,
            quality: e.quality_pln_mwh,
            fixed_per_kw_month: e.fixed_per_kw_month,
            trans_per_kw_month: e.trans_per_kw_month,
            abonament_month_pln: e.abonament_month_pln,
        });
    }
    for tariff in Tariff::ALL {
        if !map.contains_key(&tariff) {
            return Err(ParameterError(format!("missing distribution rates entry for {tariff}")));
        }
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_and_time_resolve_both_ways() {
        let (c, t) = resolve_rate_and_time(None, Some(2.0));
        assert!((c - 0.5).abs() < 1e-9);
        assert!((t - 2.0).abs() < 1e-9);

        let (c, t) = resolve_rate_and_time(Some(0.25), None);
        assert!((c - 0.25).abs() < 1e-9);
        assert!((t - 4.0).abs() < 1e-9);

        let (c, t) = resolve_rate_and_time(None, None);
        assert_eq!(c, 0.0);
        assert_eq!(t, 0.0);
    }

    #[test]
    fn lambda_falls_back_through_granularities() {
        assert_eq!(resolve_lambda_h(Some(0.001), Some(99.0), Some(99.0)), 0.001);
        let from_daily = resolve_lambda_h(None, Some(2.4), None);
        assert!((from_daily - (0.024 / 24.0)).abs() < 1e-9);
        let from_monthly = resolve_lambda_h(None, None, Some(3.0));
        assert!((from_monthly - (0.03 / (24.0 * 30.4375))).abs() < 1e-9);
        assert_eq!(resolve_lambda_h(None, None, None), 0.0);
    }

    #[test]
    fn k_param_buckets_pick_the_right_coefficient() {
        let policy = KParamPolicy { thresholds_pct: [5.0, 10.0, 15.0], a: [0.17, 0.50, 0.83, 1.00] };
        assert_eq!(policy.bucket(200.0).1, 1.00);
        assert_eq!(policy.bucket(0.0).1, 0.17);
        assert_eq!(policy.bucket(7.0).1, 0.50);
    }
}
