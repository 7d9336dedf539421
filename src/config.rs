use std::fs;
use log::LevelFilter;
use serde::Deserialize;
use crate::errors::ConfigError;

/// Raw BESS parameter form — percentages and either c-rate or time-to-full
/// may be given; the consolidator resolves both to canonical fields.
#[derive(Deserialize, Clone, Debug)]
pub struct BessForm {
    pub emax_total_mwh: f64,
    pub frac_arbi: f64,
    pub eta_ch_pct: f64,
    pub eta_dis_pct: f64,
    pub lambda_h_frac: Option<f64>,
    pub lambda_day_pct: Option<f64>,
    pub lambda_month_pct: Option<f64>,
    pub c_rate_charge: Option<f64>,
    pub c_rate_discharge: Option<f64>,
    pub time_to_full_charge_h: Option<f64>,
    pub time_to_full_discharge_h: Option<f64>,
}

/// Raw arbitrage policy form.
#[derive(Deserialize, Clone, Debug)]
pub struct ArbitrageForm {
    pub cycles_per_day: u32,
    pub base_min_profit_pln_mwh: f64,
    pub hour_bonus_ch: f64,
    pub hour_bonus_dis: f64,
    pub soc_bonus_ch: f64,
    pub soc_bonus_dis: f64,
    pub p_low_pct: f64,
    pub p_high_pct: f64,
    pub allow_carry_over: bool,
    pub force_order: bool,
    pub arbi_dis_to_load: bool,
    pub bonus_hours_ch_per_day: u32,
    pub bonus_hours_dis_per_day: u32,
}

/// Raw energy contract form.
#[derive(Deserialize, Clone, Debug)]
pub struct ContractForm {
    /// "fixed" or "dynamic".
    pub model: String,
    pub fixed_price_pln_mwh: Option<f64>,
    pub delta_pct: Option<f64>,
    pub margin_var_pln_mwh: f64,
    pub margin_fix_pln_mwh: f64,
    pub trading_fee_monthly_pln: f64,
    pub contract_power_import_mw: f64,
    pub contract_power_export_mw: f64,
}

/// Raw fiscal parameters (VAT as a percent, excise per MWh).
#[derive(Deserialize, Clone, Debug)]
pub struct FiscalForm {
    pub vat_pct: f64,
    pub excise_pln_mwh: f64,
}

/// Raw LCOE per generator.
#[derive(Deserialize, Clone, Debug)]
pub struct LcoeForm {
    pub lcoe_pv_pp: f64,
    pub lcoe_pv_wz: f64,
    pub lcoe_wiatr: f64,
}

/// One morning/afternoon window of a per-tariff distribution schedule.
#[derive(Deserialize, Clone, Debug)]
pub struct DistributionScheduleEntry {
    pub tariff: String,
    pub month: u32,
    pub mode: String,
    /// "morn" or "aft".
    pub segment: String,
    pub start: u32,
    pub end: u32,
}

/// One capacity-fee (peak-fee) window. A single window per (month, mode),
/// shared across tariffs.
#[derive(Deserialize, Clone, Debug)]
pub struct PeakFeeEntry {
    pub month: u32,
    pub mode: String,
    pub start: u32,
    pub end: u32,
}

/// Distribution variable/fixed rates for one tariff.
#[derive(Deserialize, Clone, Debug)]
pub struct DistributionRatesEntry {
    pub tariff: String,
    /// B23: am/pm/off; B22: day/night; B21: single "flat" rate.
    pub rate_am_pln_mwh: Option<f64>,
    pub rate_pm_pln_mwh: Option<f64>,
    pub rate_off_pln_mwh: Option<f64>,
    pub rate_day_pln_mwh: Option<f64>,
    pub rate_night_pln_mwh: Option<f64>,
    pub rate_flat_pln_mwh: Option<f64>,
    pub quality_pln_mwh: f64,
    pub fixed_per_kw_month: f64,
    pub trans_per_kw_month: f64,
    pub abonament_month_pln: f64,
}

/// System (non-distribution) fee rates, shared across tariffs.
#[derive(Deserialize, Clone, Debug)]
pub struct SystemFeesForm {
    pub rate_oze_pln_mwh: f64,
    pub rate_kog_pln_mwh: f64,
    pub rate_moc_pln_mwh: f64,
}

/// K-parameter policy: ascending ΔS% thresholds and the A coefficient map.
#[derive(Deserialize, Clone, Debug)]
pub struct KParamForm {
    #[serde(default = "default_k_thresholds")]
    pub thresholds_pct: Vec<f64>,
    #[serde(default = "default_k1")]
    pub k1: f64,
    #[serde(default = "default_k2")]
    pub k2: f64,
    #[serde(default = "default_k3")]
    pub k3: f64,
    #[serde(default = "default_k4")]
    pub k4: f64,
}

fn default_k_thresholds() -> Vec<f64> { vec![5.0, 10.0, 15.0] }
fn default_k1() -> f64 { 0.17 }
fn default_k2() -> f64 { 0.50 }
fn default_k3() -> f64 { 0.83 }
fn default_k4() -> f64 { 1.00 }

impl Default for KParamForm {
    fn default() -> Self {
        KParamForm {
            thresholds_pct: default_k_thresholds(),
            k1: default_k1(),
            k2: default_k2(),
            k3: default_k3(),
            k4: default_k4(),
        }
    }
}

/// Customer contract power and production/consumption multipliers.
#[derive(Deserialize, Clone, Debug)]
pub struct CustomerForm {
    pub contract_power_kw: f64,
    pub production_multiplier_pv_pp: f64,
    pub production_multiplier_pv_wz: f64,
    pub production_multiplier_wiatr: f64,
    pub consumption_multiplier_pct: f64,
}

/// All raw parameter forms the consolidator (C0) reads.
#[derive(Deserialize, Clone, Debug)]
pub struct ParamForms {
    pub bess: BessForm,
    pub arbitrage: ArbitrageForm,
    pub contract: ContractForm,
    pub fiscal: FiscalForm,
    pub lcoe: LcoeForm,
    pub distribution_schedule: Vec<DistributionScheduleEntry>,
    pub peak_fee_schedule: Vec<PeakFeeEntry>,
    pub distribution_rates: Vec<DistributionRatesEntry>,
    pub system_fees: SystemFeesForm,
    #[serde(default)]
    pub k_param: KParamForm,
    pub customer: CustomerForm,
}

#[derive(Deserialize, Clone, Debug)]
pub struct Files {
    pub output_dir: String,
    pub input_dir: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct Queue {
    pub debounce_seconds: u64,
    pub tick_seconds: u64,
}

#[derive(Deserialize, Clone, Debug)]
pub struct General {
    pub log_path: String,
    pub log_level: LevelFilter,
    pub log_to_stdout: bool,
}

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub params: ParamForms,
    pub files: Files,
    pub queue: Queue,
    pub general: General,
}

/// Loads the configuration file and returns a struct with all configuration items.
///
/// # Arguments
///
/// * 'config_path' - path to the configuration file
pub fn load_config(config_path: &str) -> Result<Config, ConfigError> {
    let toml = fs::read_to_string(config_path)?;
    let config: Config = toml::from_str(&toml)?;
    Ok(config)
}
