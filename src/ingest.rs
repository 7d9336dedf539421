//! Ingestor / Mask Builder (C1): joins the calendar axis with load, market
//! prices and production onto a single UTC hourly axis, builds the
//! per-(month,mode) tariff-zone masks and the peak-fee mask, and computes
//! local net surplus/deficit.

use std::collections::HashMap;
use chrono::NaiveDate;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use crate::consolidator::{Consolidated, Window};
use crate::errors::DataShapeError;
use crate::models::{CalendarHour, HourlyRow, Mode};

/// One raw, possibly sparse or duplicated, sample keyed by local calendar
/// components — the shape an external series lands in before alignment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RawPoint {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub value: f64,
}

/// Market price series for one hour, aligned one-to-one with the calendar.
/// NaN is a legal value, preserved verbatim (treated as 0 only in revenue
/// aggregation downstream).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceSample {
    pub price_import: f64,
    pub price_export: f64,
}

/// Inputs the ingestor needs beyond the consolidated parameters: the
/// calendar axis, aligned-or-raw market prices, and raw production/load
/// series for the three generators and the single consumption meter.
pub struct IngestInputs<'a> {
    pub calendar: &'a [CalendarHour],
    pub prices: &'a [PriceSample],
    pub production_pv_pp: &'a [RawPoint],
    pub production_pv_wz: &'a [RawPoint],
    pub production_wiatr: &'a [RawPoint],
    pub load: &'a [RawPoint],
}

/// Zone masks for one (month, mode) pair, the ring-windowed 24-hour arrays
/// morn/aft/off partition into, plus the peak-fee window's own mask.
#[derive(Debug, Clone, Copy)]
pub struct DayMasks {
    pub am: [u8; 24],
    pub pm: [u8; 24],
    pub off: [u8; 24],
    pub peak_fee: [u8; 24],
}

fn ring_len(w: Window) -> u32 {
    if w.start == w.end {
        0
    } else if w.end > w.start {
        w.end - w.start
    } else {
        (24 - w.start) + w.end
    }
}

fn ring_mark(w: Window, out: &mut [u8; 24]) {
    if w.start == w.end {
        return;
    }
    if w.end > w.start {
        for h in w.start..w.end {
            out[h as usize] = 1;
        }
    } else {
        for h in w.start..24 {
            out[h as usize] = 1;
        }
        for h in 0..w.end {
            out[h as usize] = 1;
        }
    }
}

/// Builds the am/pm/off masks for one (month, mode), per §4.2: empty month
/// (both windows zero-length) yields a fully-off day; otherwise morn and
/// aft must be disjoint and the three zones must sum to 24.
pub fn build_zone_masks(morn: Window, aft: Window) -> Result<([u8; 24], [u8; 24], [u8; 24]), DataShapeError> {
    let len_morn = ring_len(morn);
    let len_aft = ring_len(aft);

    if len_morn == 0 && len_aft == 0 {
        return Ok(([0u8; 24], [0u8; 24], [1u8; 24]));
    }

    let mut am = [0u8; 24];
    let mut pm = [0u8; 24];
    ring_mark(morn, &mut am);
    ring_mark(aft, &mut pm);

    for h in 0..24 {
        if am[h] == 1 && pm[h] == 1 {
            return Err(DataShapeError(format!("morn and aft zones overlap at hour {h}")));
        }
    }

    let mut off = [0u8; 24];
    let mut total = 0u32;
    for h in 0..24 {
        if am[h] == 0 && pm[h] == 0 {
            off[h] = 1;
        }
        total += (am[h] + pm[h] + off[h]) as u32;
    }
    if total != 24 {
        return Err(DataShapeError(format!("zone masks do not sum to 24 hours: {total}")));
    }

    Ok((am, pm, off))
}

/// Builds the single-window peak-fee mask for one (month, mode).
pub fn build_peak_fee_mask(window: Window) -> [u8; 24] {
    let mut mask = [0u8; 24];
    ring_mark(window, &mut mask);
    mask
}

fn group_and_average(points: &[RawPoint]) -> Vec<((i32, u32, u32, u32), f64)> {
    let mut sums: HashMap<(i32, u32, u32, u32), (f64, u32)> = HashMap::new();
    for p in points {
        let key = (p.year, p.month, p.day, p.hour);
        let entry = sums.entry(key).or_insert((0.0, 0));
        entry.0 += p.value;
        entry.1 += 1;
    }
    let mut out: Vec<((i32, u32, u32, u32), f64)> = sums
        .into_iter()
        .map(|(k, (sum, n))| (k, sum / n as f64))
        .collect();
    out.sort_by_key(|(k, _)| *k);
    out
}

fn key_to_seconds(y: i32, m: u32, d: u32, h: u32) -> i64 {
    NaiveDate::from_ymd_opt(y, m, d)
        .and_then(|nd| nd.and_hms_opt(h, 0, 0))
        .map(|ndt| ndt.and_utc().timestamp())
        .unwrap_or(0)
}

/// Groups duplicate (y,m,d,h-local) samples by averaging them, then
/// piecewise-linearly interpolates onto the full calendar axis with
/// edge-fill (values before the first sample or after the last are held flat).
pub fn align_to_axis(calendar: &[CalendarHour], points: &[RawPoint]) -> Result<Vec<f64>, DataShapeError> {
    if points.is_empty() {
        return Err(DataShapeError("required series is entirely absent".into()));
    }
    let averaged = group_and_average(points);
    let xs: Vec<i64> = averaged.iter().map(|((y, m, d, h), _)| key_to_seconds(*y, *m, *d, *h)).collect();
    let ys: Vec<f64> = averaged.iter().map(|(_, v)| *v).collect();

    let mut out = Vec::with_capacity(calendar.len());
    let mut cursor = 0usize;
    for hour in calendar {
        let x = key_to_seconds(hour.year, hour.month, hour.day, hour.hour);
        if x <= xs[0] {
            out.push(ys[0]);
            continue;
        }
        if x >= *xs.last().unwrap() {
            out.push(*ys.last().unwrap());
            continue;
        }
        while cursor + 1 < xs.len() && xs[cursor + 1] < x {
            cursor += 1;
        }
        let (x0, x1) = (xs[cursor], xs[cursor + 1]);
        let (y0, y1) = (ys[cursor], ys[cursor + 1]);
        let value = if x1 == x0 {
            y0
        } else {
            y0 + (y1 - y0) * ((x - x0) as f64 / (x1 - x0) as f64)
        };
        out.push(value);
    }
    Ok(out)
}

/// Bonus hour selection (§4.2): per calendar day, mark `w_ch` hours for
/// charge bonus preferring off-zone hours (fill remainder from peak zone),
/// and mirror for discharge preferring peak-zone hours.
pub fn select_bonus_hours(
    day_indices: &[usize],
    off_mask: &[u8],
    peak_mask: &[u8],
    w_ch: u32,
    w_dis: u32,
    bonus_ch: &mut [u8],
    bonus_dis: &mut [u8],
) {
    let off_hours: Vec<usize> = day_indices.iter().copied().filter(|&i| off_mask[i] == 1).collect();
    let peak_hours: Vec<usize> = day_indices.iter().copied().filter(|&i| peak_mask[i] == 1).collect();

    pick_with_fallback(&off_hours, &peak_hours, w_ch, bonus_ch);
    pick_with_fallback(&peak_hours, &off_hours, w_dis, bonus_dis);
}

fn pick_with_fallback(preferred: &[usize], fallback: &[usize], want: u32, out: &mut [u8]) {
    let mut taken = 0u32;
    for &i in preferred {
        if taken >= want {
            break;
        }
        out[i] = 1;
        taken += 1;
    }
    if taken < want {
        for &i in fallback {
            if taken >= want || out[i] == 1 {
                if out[i] == 1 {
                    continue;
                }
                break;
            }
            out[i] = 1;
            taken += 1;
        }
    }
}

/// Runs the full ingestor stage, producing one [`HourlyRow`] per calendar hour.
pub fn ingest(consolidated: &Consolidated, inputs: &IngestInputs) -> Result<Vec<HourlyRow>, DataShapeError> {
    if inputs.calendar.is_empty() {
        return Err(DataShapeError("calendar axis is empty".into()));
    }
    let n = inputs.calendar.len();
    if inputs.prices.len() != n {
        return Err(DataShapeError(format!(
            "price series length {} does not match calendar axis length {}",
            inputs.prices.len(),
            n
        )));
    }

    let pv_pp = align_to_axis(inputs.calendar, inputs.production_pv_pp)?;
    let pv_wz = align_to_axis(inputs.calendar, inputs.production_pv_wz)?;
    let wiatr = align_to_axis(inputs.calendar, inputs.production_wiatr)?;
    let load_raw = align_to_axis(inputs.calendar, inputs.load)?;

    let mut mask_cache: HashMap<(u32, Mode), ([u8; 24], [u8; 24], [u8; 24], [u8; 24])> = HashMap::new();
    let mut rows = Vec::with_capacity(n);

    if inputs.prices.iter().all(|p| !p.price_import.is_finite() && !p.price_export.is_finite()) {
        warn!("all market prices are non-finite for this run");
    }

    for (i, hour) in inputs.calendar.iter().enumerate() {
        let month = hour.month;
        let mode = hour.mode();
        let masks = match mask_cache.get(&(month, mode)) {
            Some(m) => *m,
            None => {
                let morn = *consolidated.distribution_schedule.get(&(crate::models::Tariff::B23, month, mode, "morn"))
                    .ok_or_else(|| DataShapeError(format!("no morn window for month={month} mode={mode}")))?;
                let aft = *consolidated.distribution_schedule.get(&(crate::models::Tariff::B23, month, mode, "aft"))
                    .ok_or_else(|| DataShapeError(format!("no aft window for month={month} mode={mode}")))?;
                let (am, pm, off) = build_zone_masks(morn, aft)?;
                let peak_window = *consolidated.peak_fee_schedule.get(&(month, mode))
                    .ok_or_else(|| DataShapeError(format!("no peak-fee window for month={month} mode={mode}")))?;
                let peak_fee = build_peak_fee_mask(peak_window);
                let computed = (am, pm, off, peak_fee);
                mask_cache.insert((month, mode), computed);
                computed
            }
        };

        let prod_total = pv_pp[i] * consolidated.customer.production_multiplier_pv_pp
            + pv_wz[i] * consolidated.customer.production_multiplier_pv_wz
            + wiatr[i] * consolidated.customer.production_multiplier_wiatr;
        let load = load_raw[i] * (1.0 + consolidated.customer.consumption_multiplier);

        let hr = hour.hour as usize;
        rows.push(HourlyRow {
            ts_utc: hour.ts_utc,
            price_import: inputs.prices[i].price_import,
            price_export: inputs.prices[i].price_export,
            mask_am: masks.0[hr],
            mask_pm: masks.1[hr],
            mask_off: masks.2[hr],
            mask_peak_fee: masks.3[hr],
            prod_total,
            load,
            surplus_net: (prod_total - load).max(0.0),
            deficit_net: (load - prod_total).max(0.0),
            bonus_hrs_ch: 0,
            bonus_hrs_dis: 0,
            caps: consolidated.bess.caps,
        });
    }

    apply_bonus_hours(consolidated, inputs.calendar, &mut rows);

    info!("ingest produced {} hourly rows", rows.len());
    Ok(rows)
}

fn apply_bonus_hours(consolidated: &Consolidated, calendar: &[CalendarHour], rows: &mut [HourlyRow]) {
    let mut days: HashMap<NaiveDate, Vec<usize>> = HashMap::new();
    for (i, hour) in calendar.iter().enumerate() {
        days.entry(hour.date_key()).or_default().push(i);
    }
    let off_mask: Vec<u8> = rows.iter().map(|r| r.mask_off).collect();
    let peak_mask: Vec<u8> = rows.iter().map(|r| if r.mask_am == 1 || r.mask_pm == 1 { 1 } else { 0 }).collect();

    let mut bonus_ch = vec![0u8; rows.len()];
    let mut bonus_dis = vec![0u8; rows.len()];

    let mut day_keys: Vec<NaiveDate> = days.keys().copied().collect();
    day_keys.sort();
    for day in day_keys {
        let idx = &days[&day];
        select_bonus_hours(
            idx,
            &off_mask,
            &peak_mask,
            consolidated.arbitrage.bonus_hours_ch_per_day,
            consolidated.arbitrage.bonus_hours_dis_per_day,
            &mut bonus_ch,
            &mut bonus_dis,
        );
    }

    for (i, row) in rows.iter_mut().enumerate() {
        row.bonus_hrs_ch = bonus_ch[i];
        row.bonus_hrs_dis = bonus_dis[i];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_without_wrap_partition_the_day() {
        let morn = Window { start: 6, end: 10 };
        let aft = Window { start: 17, end: 21 };
        let (am, pm, off) = build_zone_masks(morn, aft).unwrap();
        assert_eq!(am.iter().sum::<u8>(), 4);
        assert_eq!(pm.iter().sum::<u8>(), 4);
        assert_eq!(off.iter().sum::<u8>(), 16);
        for h in 0..24 {
            assert!(!(am[h] == 1 && pm[h] == 1));
        }
    }

    #[test]
    fn masks_wrap_past_midnight() {
        let morn = Window { start: 22, end: 2 };
        let aft = Window { start: 10, end: 14 };
        let (am, pm, off) = build_zone_masks(morn, aft).unwrap();
        for h in [22, 23, 0, 1] {
            assert_eq!(am[h], 1, "hour {h} should be AM");
        }
        assert_eq!(am.iter().sum::<u8>(), 4);
        for h in 10..14 {
            assert_eq!(pm[h], 1, "hour {h} should be PM");
        }
        assert_eq!(pm.iter().sum::<u8>(), 4);
        assert_eq!(off.iter().sum::<u8>(), 16);
    }

    #[test]
    fn empty_month_is_fully_off() {
        let empty = Window { start: 0, end: 0 };
        let (am, pm, off) = build_zone_masks(empty, empty).unwrap();
        assert_eq!(am.iter().sum::<u8>(), 0);
        assert_eq!(pm.iter().sum::<u8>(), 0);
        assert_eq!(off.iter().sum::<u8>(), 24);
    }

    #[test]
    fn overlapping_windows_are_rejected() {
        let morn = Window { start: 6, end: 12 };
        let aft = Window { start: 10, end: 14 };
        assert!(build_zone_masks(morn, aft).is_err());
    }

    #[test]
    fn bonus_hours_prefer_off_then_fall_back_to_peak() {
        let day: Vec<usize> = (0..24).collect();
        let mut off = vec![0u8; 24];
        let mut peak = vec![0u8; 24];
        for h in 0..4 { off[h] = 1; }
        for h in 20..22 { peak[h] = 1; }
        let mut bonus_ch = vec![0u8; 24];
        let mut bonus_dis = vec![0u8; 24];
        select_bonus_hours(&day, &off, &peak, 3, 1, &mut bonus_ch, &mut bonus_dis);
        assert_eq!(bonus_ch.iter().sum::<u8>(), 3);
        assert_eq!(bonus_dis.iter().sum::<u8>(), 1);
        assert_eq!(bonus_dis[20] + bonus_dis[21], 1);
    }

    #[test]
    fn alignment_interpolates_and_holds_edges_flat() {
        let calendar: Vec<CalendarHour> = (0..5).map(|h| CalendarHour {
            ts_utc: chrono::Utc::now(),
            ts_local: chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap().and_hms_opt(h, 0, 0).unwrap(),
            year: 2026,
            month: 1,
            day: 1,
            hour: h,
            weekday: chrono::Weekday::Thu,
            is_workday: true,
            is_holiday: false,
        }).collect();
        let points = vec![
            RawPoint { year: 2026, month: 1, day: 1, hour: 1, value: 10.0 },
            RawPoint { year: 2026, month: 1, day: 1, hour: 3, value: 30.0 },
        ];
        let aligned = align_to_axis(&calendar, &points).unwrap();
        assert_eq!(aligned[0], 10.0);
        assert_eq!(aligned[1], 10.0);
        assert_eq!(aligned[2], 20.0);
        assert_eq!(aligned[3], 30.0);
        assert_eq!(aligned[4], 30.0);
    }
}
