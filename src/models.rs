use chrono::{NaiveDate, NaiveDateTime, DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One hour on the calendar axis the whole pipeline walks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarHour {
    pub ts_utc: DateTime<Utc>,
    pub ts_local: NaiveDateTime,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub weekday: Weekday,
    pub is_workday: bool,
    pub is_holiday: bool,
}

impl CalendarHour {
    pub fn is_free(&self) -> bool {
        self.is_holiday || !self.is_workday
    }

    pub fn date_key(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
            .expect("calendar hour carries a valid calendar date")
    }

    /// "work" or "free", the mode axis masks and schedules are keyed by.
    pub fn mode(&self) -> Mode {
        if self.is_free() { Mode::Free } else { Mode::Work }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    Work,
    Free,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Mode::Work => write!(f, "work"),
            Mode::Free => write!(f, "free"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tariff {
    B21,
    B22,
    B23,
}

impl fmt::Display for Tariff {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Tariff::B21 => write!(f, "B21"),
            Tariff::B22 => write!(f, "B22"),
            Tariff::B23 => write!(f, "B23"),
        }
    }
}

impl Tariff {
    pub const ALL: [Tariff; 3] = [Tariff::B21, Tariff::B22, Tariff::B23];

    pub fn parse(s: &str) -> Option<Tariff> {
        match s.trim().to_uppercase().as_str() {
            "B21" => Some(Tariff::B21),
            "B22" => Some(Tariff::B22),
            "B23" => Some(Tariff::B23),
            _ => None,
        }
    }
}

/// Load-coverage scenario pricing is computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scenario {
    /// Pure grid supply: import = load.
    Grid,
    /// Grid + renewables: import = deficit_net.
    OzeGrid,
    /// Grid + renewables + BESS: import = import_for_load from commit.
    MagOze,
}

impl Scenario {
    pub const ALL: [Scenario; 3] = [Scenario::Grid, Scenario::OzeGrid, Scenario::MagOze];
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Scenario::Grid => write!(f, "grid"),
            Scenario::OzeGrid => write!(f, "oze_grid"),
            Scenario::MagOze => write!(f, "mag_oze"),
        }
    }
}

/// Scalar caps derived once by the consolidator and broadcast onto every
/// hour of buffer H.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScalarCaps {
    pub cap_bess_ch_net: f64,
    pub cap_bess_dis_net: f64,
    pub cap_grid_import_ac: f64,
    pub cap_grid_export_ac: f64,
}

/// Fully-derived BESS configuration (§3 "BESS configuration (scalar)").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BessConfig {
    pub emax_total: f64,
    pub emax_oze: f64,
    pub emax_arbi: f64,
    pub eta_ch: f64,
    pub eta_dis: f64,
    pub lambda_h: f64,
    pub caps: ScalarCaps,
}

/// One row of the hourly buffer H — the shared spine C1 builds and C2/C3 walk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HourlyRow {
    pub ts_utc: DateTime<Utc>,
    pub price_import: f64,
    pub price_export: f64,
    pub mask_am: u8,
    pub mask_pm: u8,
    pub mask_off: u8,
    pub mask_peak_fee: u8,
    pub prod_total: f64,
    pub load: f64,
    pub surplus_net: f64,
    pub deficit_net: f64,
    pub bonus_hrs_ch: u8,
    pub bonus_hrs_dis: u8,
    pub caps: ScalarCaps,
}

/// One row of the proposer buffer P, indexed in lockstep with H.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposerRow {
    pub prop_ch_ac: f64,
    pub prop_dis_ac: f64,
    pub dec_ch: bool,
    pub dec_dis: bool,
    pub thr_low: f64,
    pub thr_high: f64,
    /// Only meaningful on hours belonging to a pair.
    pub delta_k: Option<f64>,
    pub soc_sim_arbi: f64,
    pub pending: f64,
    pub cycles_today: u32,
    pub pair_low: i64,
    pub pair_high: i64,
}

impl Default for ProposerRow {
    fn default() -> Self {
        ProposerRow {
            prop_ch_ac: 0.0,
            prop_dis_ac: 0.0,
            dec_ch: false,
            dec_dis: false,
            thr_low: 0.0,
            thr_high: 0.0,
            delta_k: None,
            soc_sim_arbi: 0.0,
            pending: 0.0,
            cycles_today: 0,
            pair_low: -1,
            pair_high: -1,
        }
    }
}

/// One row of the commit buffer C, the realized hour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRow {
    pub ch_from_surplus: f64,
    pub ch_from_grid: f64,
    pub dis_to_load: f64,
    pub dis_to_grid: f64,

    pub import_for_load: f64,
    pub import_for_arbi: f64,
    pub export_from_surplus: f64,
    pub export_from_arbi: f64,

    pub soc_oze_before: f64,
    pub soc_oze_after: f64,
    pub soc_arbi_before: f64,
    pub soc_arbi_after: f64,
    pub soc_oze_pct: f64,
    pub soc_arbi_pct: f64,

    pub loss_idle_oze: f64,
    pub loss_idle_arbi: f64,
    pub loss_conv_ch: f64,
    pub loss_conv_dis_to_grid: f64,
    pub loss_conv_dis_to_load: f64,
    pub wasted_surplus_due_to_export_cap: f64,
    pub unserved_load_after_cap: f64,

    pub bind_export_cap: bool,
    pub bind_import_cap: bool,
    pub cap_blocked_dis_ac: f64,
    pub cap_blocked_ch_ac: f64,

    pub rev_arbi_to_grid: f64,
    pub rev_surplus_export: f64,
    pub cost_grid_to_arbi: f64,
    pub cost_import_for_load: f64,
    pub cashflow_arbi: f64,
    pub cashflow_net: f64,
}

impl Default for CommitRow {
    fn default() -> Self {
        CommitRow {
            ch_from_surplus: 0.0,
            ch_from_grid: 0.0,
            dis_to_load: 0.0,
            dis_to_grid: 0.0,
            import_for_load: 0.0,
            import_for_arbi: 0.0,
            export_from_surplus: 0.0,
            export_from_arbi: 0.0,
            soc_oze_before: 0.0,
            soc_oze_after: 0.0,
            soc_arbi_before: 0.0,
            soc_arbi_after: 0.0,
            soc_oze_pct: 0.0,
            soc_arbi_pct: 0.0,
            loss_idle_oze: 0.0,
            loss_idle_arbi: 0.0,
            loss_conv_ch: 0.0,
            loss_conv_dis_to_grid: 0.0,
            loss_conv_dis_to_load: 0.0,
            wasted_surplus_due_to_export_cap: 0.0,
            unserved_load_after_cap: 0.0,
            bind_export_cap: false,
            bind_import_cap: false,
            cap_blocked_dis_ac: 0.0,
            cap_blocked_ch_ac: 0.0,
            rev_arbi_to_grid: 0.0,
            rev_surplus_export: 0.0,
            cost_grid_to_arbi: 0.0,
            cost_import_for_load: 0.0,
            cashflow_arbi: 0.0,
            cashflow_net: 0.0,
        }
    }
}

/// The A coefficient bucket a day's peak-ratio ΔS lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KBucket {
    K1,
    K2,
    K3,
    K4,
}

/// Per-day K-coefficient computation (§4.5 "K coefficient per day").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DailyKCoefficient {
    pub date: NaiveDate,
    pub delta_s_pct: f64,
    pub bucket: KBucket,
    pub a: f64,
}

/// One itemized tariff cost breakdown for a single hour, scenario and tariff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingRow {
    pub ts_utc: DateTime<Utc>,
    pub scenario: Scenario,
    pub tariff: Tariff,

    pub commodity_cost: f64,
    pub margin_var_cost: f64,
    pub margin_fix_cost: f64,
    pub trading_fee_share: f64,

    pub distribution_variable_cost: f64,
    pub distribution_fixed_share: f64,

    pub system_fee_oze: f64,
    pub system_fee_kog: f64,
    pub system_fee_capacity: f64,

    pub excise_cost: f64,

    pub vat_base: f64,
    pub vat_amount: f64,
    pub total_netto: f64,
    pub total_brutto: f64,

    pub pln_loss_conv_ch: f64,
    pub pln_loss_conv_dis_to_grid: f64,
    pub pln_loss_conv_dis_to_load: f64,
    pub pln_loss_idle_arbi: f64,
    pub pln_loss_idle_oze: f64,
    pub pln_wasted_surplus_cap: f64,
    pub pln_cap_blocked_dis_ac: f64,
    pub pln_cap_blocked_ch_ac: f64,
    pub pln_unserved_load_after_cap: f64,
}

/// Epsilon used throughout the core to clamp numerically small residuals to
/// exactly zero, per the numerical hygiene design note.
pub const EPS: f64 = 1e-9;

pub fn clamp_small(x: f64) -> f64 {
    if x.abs() < EPS { 0.0 } else { x }
}

/// Non-finite (NaN/Inf) prices are treated as 0 PLN/MWh only in revenue/cost
/// aggregations; the price column itself is preserved as-is.
pub fn price_or_zero(price: f64) -> f64 {
    if price.is_finite() { price } else { 0.0 }
}
