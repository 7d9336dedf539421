//! Commit/Dispatch (C3): realizes the proposer's decisions hour-by-hour
//! under a strict priority order, splitting the BESS into OZE and ARBI
//! pools, applying conversion losses and idle self-discharge, and
//! enforcing grid caps on the summed AC flows with a defined reversal
//! policy.

use log::info;
use crate::consolidator::Consolidated;
use crate::models::{clamp_small, price_or_zero, CommitRow, HourlyRow, ProposerRow, EPS};

struct PoolState {
    soc_oze: f64,
    soc_arbi: f64,
}

/// Runs the commit/dispatch stage over the whole buffer, producing one
/// [`CommitRow`] per hour, lockstep with `hourly` and `proposed`.
pub fn commit(
    consolidated: &Consolidated,
    hourly: &[HourlyRow],
    proposed: &[ProposerRow],
    initial_soc_oze: f64,
    initial_soc_arbi: f64,
) -> Vec<CommitRow> {
    let bess = &consolidated.bess;
    let policy = &consolidated.arbitrage;
    let mut state = PoolState { soc_oze: initial_soc_oze, soc_arbi: initial_soc_arbi };
    let mut out = Vec::with_capacity(hourly.len());

    for (h, p) in hourly.iter().zip(proposed.iter()) {
        out.push(commit_hour(bess, policy, h, p, &mut state));
    }

    info!("commit produced {} hourly rows", out.len());
    out
}

fn commit_hour(
    bess: &crate::models::BessConfig,
    policy: &crate::consolidator::ArbitragePolicy,
    h: &HourlyRow,
    p: &ProposerRow,
    state: &mut PoolState,
) -> CommitRow {
    let mut row = CommitRow::default();
    row.soc_oze_before = state.soc_oze;
    row.soc_arbi_before = state.soc_arbi;

    // Remaining BESS-side (NET) budgets for this hour, consumed as flows are realized.
    let mut ch_budget = bess.caps.cap_bess_ch_net;
    let mut dis_budget = bess.caps.cap_bess_dis_net;

    // 1. Absorb surplus: OZE first, then ARBI, then export.
    let to_oze = h.surplus_net.min(bess.emax_oze - state.soc_oze).max(0.0);
    state.soc_oze += to_oze;
    row.ch_from_surplus = to_oze;
    let mut remaining_surplus = h.surplus_net - to_oze;

    let to_arbi_from_surplus = remaining_surplus.min(bess.emax_arbi - state.soc_arbi).min(ch_budget).max(0.0);
    state.soc_arbi += to_arbi_from_surplus;
    ch_budget -= to_arbi_from_surplus;
    remaining_surplus -= to_arbi_from_surplus;
    row.export_from_surplus = remaining_surplus.max(0.0);

    // 2. Cover deficit: OZE first, then optionally ARBI, then import.
    let from_oze = h.deficit_net.min(state.soc_oze).max(0.0);
    state.soc_oze -= from_oze;
    row.loss_conv_dis_to_load += from_oze * (1.0 / bess.eta_dis - 1.0);
    let mut remaining_deficit = h.deficit_net - from_oze;

    let mut from_arbi_to_load = 0.0;
    if policy.arbi_dis_to_load && dis_budget > EPS {
        from_arbi_to_load = remaining_deficit.min(state.soc_arbi).min(dis_budget).max(0.0);
        state.soc_arbi -= from_arbi_to_load;
        dis_budget -= from_arbi_to_load;
        row.loss_conv_dis_to_load += from_arbi_to_load * (1.0 / bess.eta_dis - 1.0);
        remaining_deficit -= from_arbi_to_load;
    }
    row.dis_to_load = from_oze + from_arbi_to_load;
    row.import_for_load = remaining_deficit.max(0.0);

    // 3. Arbitrage discharge to grid, bounded by SOC, remaining discharge budget and eta_dis.
    let arbi_dis_net = p.prop_dis_ac.min(state.soc_arbi).min(dis_budget).max(0.0);
    state.soc_arbi -= arbi_dis_net;
    dis_budget -= arbi_dis_net;
    row.dis_to_grid = arbi_dis_net;
    row.export_from_arbi = arbi_dis_net * bess.eta_dis;
    row.loss_conv_dis_to_grid = arbi_dis_net * (1.0 - bess.eta_dis);

    // 4. Arbitrage charge from grid, bounded by headroom, remaining charge budget and eta_ch.
    let headroom = bess.emax_arbi - state.soc_arbi;
    let arbi_ch_ac = p.prop_ch_ac.min(headroom.max(0.0) / bess.eta_ch.max(EPS)).min(ch_budget / bess.eta_ch.max(EPS)).max(0.0);
    let arbi_ch_net = arbi_ch_ac * bess.eta_ch;
    state.soc_arbi += arbi_ch_net;
    ch_budget -= arbi_ch_net;
    row.ch_from_grid = arbi_ch_net;
    row.import_for_arbi = arbi_ch_ac;
    row.loss_conv_ch = arbi_ch_ac * (1.0 - bess.eta_ch);

    // 5. Enforce grid caps on the AC sums, with reversal semantics.
    let export_total = row.export_from_surplus + row.export_from_arbi;
    if export_total > bess.caps.cap_grid_export_ac {
        let mut over = export_total - bess.caps.cap_grid_export_ac;
        let cut_from_arbi = over.min(row.export_from_arbi);
        row.export_from_arbi -= cut_from_arbi;
        let cut_net = cut_from_arbi / bess.eta_dis;
        state.soc_arbi += cut_net;
        dis_budget += cut_net;
        row.dis_to_grid -= cut_net;
        row.loss_conv_dis_to_grid -= cut_from_arbi * (1.0 - bess.eta_dis);
        row.cap_blocked_dis_ac = cut_from_arbi;
        over -= cut_from_arbi;

        let cut_from_surplus = over.min(row.export_from_surplus);
        row.export_from_surplus -= cut_from_surplus;
        row.wasted_surplus_due_to_export_cap += cut_from_surplus;

        row.bind_export_cap = cut_from_arbi > EPS || cut_from_surplus > EPS;
    }

    let import_total = row.import_for_load + row.import_for_arbi;
    if import_total > bess.caps.cap_grid_import_ac {
        let mut over = import_total - bess.caps.cap_grid_import_ac;
        let cut_from_arbi = over.min(row.import_for_arbi);
        row.import_for_arbi -= cut_from_arbi;
        let cut_net = cut_from_arbi * bess.eta_ch;
        state.soc_arbi -= cut_net;
        ch_budget += cut_net;
        row.ch_from_grid -= cut_net;
        row.loss_conv_ch -= cut_from_arbi * (1.0 - bess.eta_ch);
        row.cap_blocked_ch_ac = cut_from_arbi;
        over -= cut_from_arbi;

        let cut_from_load = over.min(row.import_for_load);
        row.import_for_load -= cut_from_load;
        row.unserved_load_after_cap += cut_from_load;

        row.bind_import_cap = cut_from_arbi > EPS || cut_from_load > EPS;
    }

    // 6. Idle self-discharge.
    let soc_oze_pre_idle = state.soc_oze;
    let soc_arbi_pre_idle = state.soc_arbi;
    state.soc_oze *= 1.0 - bess.lambda_h;
    state.soc_arbi *= 1.0 - bess.lambda_h;
    row.loss_idle_oze = soc_oze_pre_idle - state.soc_oze;
    row.loss_idle_arbi = soc_arbi_pre_idle - state.soc_arbi;

    state.soc_oze = clamp_small(state.soc_oze).clamp(0.0, bess.emax_oze);
    state.soc_arbi = clamp_small(state.soc_arbi).clamp(0.0, bess.emax_arbi);

    row.soc_oze_after = state.soc_oze;
    row.soc_arbi_after = state.soc_arbi;
    row.soc_oze_pct = if bess.emax_oze > 0.0 { state.soc_oze / bess.emax_oze } else { 0.0 };
    row.soc_arbi_pct = if bess.emax_arbi > 0.0 { state.soc_arbi / bess.emax_arbi } else { 0.0 };

    row.loss_conv_ch = clamp_small(row.loss_conv_ch).max(0.0);
    row.loss_conv_dis_to_grid = clamp_small(row.loss_conv_dis_to_grid).max(0.0);
    row.loss_conv_dis_to_load = clamp_small(row.loss_conv_dis_to_load).max(0.0);

    let price_import = price_or_zero(h.price_import);
    let price_export = price_or_zero(h.price_export);

    row.rev_arbi_to_grid = row.export_from_arbi * price_export;
    row.rev_surplus_export = row.export_from_surplus * price_export;
    row.cost_grid_to_arbi = row.import_for_arbi * price_import;
    row.cost_import_for_load = row.import_for_load * price_import;
    row.cashflow_arbi = row.rev_arbi_to_grid - row.cost_grid_to_arbi;
    row.cashflow_net = row.cashflow_arbi + row.rev_surplus_export - row.cost_import_for_load;

    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BessConfig, ScalarCaps};
    use crate::consolidator::{ArbitragePolicy};

    fn bess(caps: ScalarCaps) -> BessConfig {
        BessConfig {
            emax_total: 2.0,
            emax_oze: 1.0,
            emax_arbi: 1.0,
            eta_ch: 0.95,
            eta_dis: 0.95,
            lambda_h: 0.0,
            caps,
        }
    }

    fn policy() -> ArbitragePolicy {
        ArbitragePolicy {
            cycles_per_day: 1,
            base_min_profit_pln_mwh: 0.0,
            hour_bonus_ch: 0.0,
            hour_bonus_dis: 0.0,
            soc_bonus_ch: 0.0,
            soc_bonus_dis: 0.0,
            p_low: 0.1,
            p_high: 0.9,
            allow_carry_over: false,
            force_order: false,
            arbi_dis_to_load: false,
            bonus_hours_ch_per_day: 0,
            bonus_hours_dis_per_day: 0,
        }
    }

    fn hourly(surplus: f64, deficit: f64, price_export: f64) -> HourlyRow {
        HourlyRow {
            ts_utc: chrono::Utc::now(),
            price_import: 100.0,
            price_export,
            mask_am: 0, mask_pm: 0, mask_off: 1, mask_peak_fee: 0,
            prod_total: surplus, load: deficit,
            surplus_net: surplus, deficit_net: deficit,
            bonus_hrs_ch: 0, bonus_hrs_dis: 0,
            caps: ScalarCaps { cap_bess_ch_net: 10.0, cap_bess_dis_net: 10.0, cap_grid_import_ac: 10.0, cap_grid_export_ac: 10.0 },
        }
    }

    /// S4 — export cap binding: surplus 5 MWh, `cap_grid_export_ac=1`,
    /// simultaneous ARBI discharge proposal 0.5 MWh_AC. The OZE pool absorbs
    /// exactly 0.5 MWh of the surplus (`emax_oze=0.5`, starting empty); the
    /// ARBI pool starts full so it absorbs none. `eta_ch=eta_dis=1` keeps
    /// AC==NET so the spec's literal numbers hold exactly.
    #[test]
    fn export_cap_cuts_arbi_first_then_surplus() {
        let caps = ScalarCaps { cap_bess_ch_net: 10.0, cap_bess_dis_net: 10.0, cap_grid_import_ac: 10.0, cap_grid_export_ac: 1.0 };
        let mut b = bess(caps);
        b.emax_oze = 0.5;
        b.emax_arbi = 1.0;
        b.emax_total = 1.5;
        b.eta_ch = 1.0;
        b.eta_dis = 1.0;
        let pol = policy();
        let h = hourly(5.0, 0.0, 100.0);
        let mut p = ProposerRow::default();
        p.prop_dis_ac = 0.5;

        // OZE empty (absorbs 0.5 of the surplus), ARBI full (absorbs none,
        // and can supply the 0.5 MWh discharge proposal).
        let mut state = PoolState { soc_oze: 0.0, soc_arbi: 1.0 };
        let row = commit_hour(&b, &pol, &h, &p, &mut state);

        assert!((row.cap_blocked_dis_ac - 0.5).abs() < 1e-9);
        assert!((row.export_from_arbi - 0.0).abs() < 1e-9);
        assert!((row.export_from_surplus - 1.0).abs() < 1e-9);
        assert!((row.wasted_surplus_due_to_export_cap - 3.5).abs() < 1e-9);
        assert!(row.bind_export_cap);
    }

    #[test]
    fn soc_never_leaves_its_bounds() {
        let caps = ScalarCaps { cap_bess_ch_net: 10.0, cap_bess_dis_net: 10.0, cap_grid_import_ac: 10.0, cap_grid_export_ac: 10.0 };
        let b = bess(caps);
        let pol = policy();
        let h = hourly(5.0, 0.0, 100.0);
        let p = ProposerRow::default();
        let mut state = PoolState { soc_oze: 0.9, soc_arbi: 0.9 };
        let row = commit_hour(&b, &pol, &h, &p, &mut state);
        assert!(row.soc_oze_after >= 0.0 && row.soc_oze_after <= b.emax_oze + 1e-9);
        assert!(row.soc_arbi_after >= 0.0 && row.soc_arbi_after <= b.emax_arbi + 1e-9);
    }

    #[test]
    fn cashflow_identities_hold_exactly() {
        let caps = ScalarCaps { cap_bess_ch_net: 10.0, cap_bess_dis_net: 10.0, cap_grid_import_ac: 10.0, cap_grid_export_ac: 10.0 };
        let b = bess(caps);
        let pol = policy();
        let h = hourly(0.0, 2.0, 100.0);
        let mut p = ProposerRow::default();
        p.prop_dis_ac = 0.2;
        let mut state = PoolState { soc_oze: 0.0, soc_arbi: 0.5 };
        let row = commit_hour(&b, &pol, &h, &p, &mut state);
        assert_eq!(row.cashflow_arbi, row.rev_arbi_to_grid - row.cost_grid_to_arbi);
        assert_eq!(row.cashflow_net, row.cashflow_arbi + row.rev_surplus_export - row.cost_import_for_load);
    }
}
