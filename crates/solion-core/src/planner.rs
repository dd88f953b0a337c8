// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of SolION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use solion_types::{
    BatteryState, ForecastSummary, OverrideKind, PlanConfig, PriceClass, Slot, SlotAction,
};
use tracing::{debug, warn};

/// Number of slots in the peak-avoidance window. Three and a half hours covers
/// the typical evening peak of the half-hourly tariffs we run against.
const PEAK_WINDOW_SLOTS: usize = 7;

/// Classify every slot and assign its planned action.
///
/// The rules run as a fixed cascade; later rules may overwrite the
/// classification or action a slot received earlier. Pure with respect to its
/// inputs: the annotated sequence is returned, nothing else is touched.
///
/// # Arguments
/// * `slots` - ordered price slots with `price` and `forecast_kwh` populated
/// * `battery` - latest battery telemetry (SOC 0 means invalid, see below)
/// * `forecast` - daily PV yield totals
/// * `config` - cascade tuning parameters
///
/// # Returns
/// The same sequence, annotated with `price_class`, `planned_action` and
/// `reason`. Override fields are only touched by the scheduled-action and
/// negative-dump rules; everything else belongs to the override layer.
pub fn evaluate_slot_actions(
    mut slots: Vec<Slot>,
    battery: BatteryState,
    forecast: ForecastSummary,
    config: &PlanConfig,
) -> Vec<Slot> {
    if slots.is_empty() {
        return slots;
    }

    let full_charge = config.full_charge_slot_count.min(slots.len());

    // 1. Reset: classification is recomputed from scratch every cycle
    for slot in &mut slots {
        slot.price_class = PriceClass::Average;
        slot.planned_action = SlotAction::DoNothing;
        slot.reason = "Average price, no action".to_owned();
    }

    // 2. Cheapest contiguous charging window
    let cheapest_indices = select_cheapest_window(&slots, full_charge, config);

    // 3. Priciest window, fixed length
    let peak_len = PEAK_WINDOW_SLOTS.min(slots.len());
    let peak_start = max_sum_window_start(&slots, peak_len);
    if let Some(start) = peak_start {
        for slot in &mut slots[start..start + peak_len] {
            slot.price_class = PriceClass::MostExpensive;
            slot.reason = "Most expensive window, avoid grid charging".to_owned();
        }
    }

    // 4. Mark the cheapest window, peak classification wins on overlap
    for &idx in &cheapest_indices {
        if slots[idx].price_class == PriceClass::MostExpensive {
            continue;
        }
        slots[idx].price_class = PriceClass::Cheapest;
        slots[idx].planned_action = SlotAction::Charge;
        slots[idx].reason = "Cheapest charging window".to_owned();
    }

    // 5. Below-average detection among the remaining unclassified slots
    mark_below_average(&mut slots);

    // 6. Dropping suppression ahead of the cheapest window
    if let Some(&window_start) = cheapest_indices.first() {
        suppress_dropping_run(&mut slots, window_start, full_charge);
    }

    // 7. Pre-peak top-up through the run-up to the peak window
    if let Some(peak_start_idx) = peak_start {
        apply_pre_peak_top_up(&mut slots, peak_start_idx, full_charge);
    }

    // 8. Skip the overnight charge when tomorrow looks sunny enough
    if config.skip_overnight_charge_if_forecast_good {
        let damped = config.forecast_damp_factor * forecast.tomorrow_kwh;
        if damped > config.forecast_threshold_kwh {
            skip_overnight_charge(&mut slots, damped);
        }
    }

    // 9. Always charge below the configured price floor
    for slot in &mut slots {
        if slot.price < config.always_charge_below_price {
            slot.price_class = PriceClass::BelowThreshold;
            slot.planned_action = SlotAction::Charge;
            slot.reason = format!(
                "Price {:.2} below always-charge threshold {:.2}",
                slot.price, config.always_charge_below_price
            );
        }
    }

    // 10. Negative prices always charge, overriding rule 9's classification
    for slot in &mut slots {
        if slot.price < 0.0 {
            slot.price_class = PriceClass::Negative;
            slot.planned_action = SlotAction::Charge;
            slot.reason = format!("Negative price {:.2}, charging is paid", slot.price);
        }
    }

    // 11. Low battery promotes opportunistic charges to real ones
    if battery.is_valid() {
        if battery.soc_percent < config.low_battery_percent_threshold {
            let mut promoted = 0_usize;
            for slot in &mut slots {
                if promoted == full_charge {
                    break;
                }
                if slot.planned_action == SlotAction::ChargeIfLowBattery {
                    slot.planned_action = SlotAction::Charge;
                    slot.reason = format!(
                        "Below-average price and battery low ({}%)",
                        battery.soc_percent
                    );
                    promoted += 1;
                }
            }
            if promoted > 0 {
                debug!(
                    soc = battery.soc_percent,
                    promoted, "low battery, promoted opportunistic charge slots"
                );
            }
        }
    } else {
        warn!("battery SOC reads zero, treating telemetry as invalid and skipping low-battery rules");
    }

    // 12. Scheduled time-of-day overrides
    for scheduled in &config.scheduled_actions {
        for slot in &mut slots {
            if slot.start.time() == scheduled.start_time {
                slot.apply_override(scheduled.action, OverrideKind::Scheduled);
            }
        }
    }

    // 13. Maintain-minimum-charge safety floor on the imminent slot
    if battery.is_valid() && battery.soc_percent < config.always_charge_below_soc {
        if let Some(first) = slots.first_mut() {
            first.planned_action = SlotAction::Charge;
            first.reason = format!(
                "Battery at {}%, below minimum {}%",
                battery.soc_percent, config.always_charge_below_soc
            );
        }
    }

    // 14. Dump-and-recharge across long negative-price runs
    apply_negative_dump(&mut slots, full_charge);

    slots
}

/// Indices of the cheapest contiguous window of `len` slots, by minimum summed
/// price with ties broken to the earliest window. If the window starts right
/// now it is shrunk to the cheapest `ceil(len * fraction)` slots inside it,
/// since a battery that is already part-charged needs fewer slots.
fn select_cheapest_window(slots: &[Slot], len: usize, config: &PlanConfig) -> Vec<usize> {
    let Some(start) = min_sum_window_start(slots, len) else {
        return Vec::new();
    };

    let mut indices: Vec<usize> = (start..start + len).collect();

    if start == 0 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let keep = ((len as f64) * config.peak_period_battery_use_fraction).ceil() as usize;
        let keep = keep.clamp(1, len);
        // Cheapest `keep` slots within the window, earliest first on price ties
        indices.sort_by(|&a, &b| {
            slots[a]
                .price
                .partial_cmp(&slots[b].price)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });
        indices.truncate(keep);
        indices.sort_unstable();
        debug!(
            window_len = len,
            kept = keep,
            "cheapest window starts now, shrunk to cheapest slots"
        );
    }

    indices
}

fn min_sum_window_start(slots: &[Slot], len: usize) -> Option<usize> {
    // Strict comparison keeps the earliest window on ties
    let mut best: Option<(usize, f64)> = None;
    for (idx, sum) in window_sums(slots, len)?.into_iter().enumerate() {
        if best.is_none_or(|(_, best_sum)| sum < best_sum) {
            best = Some((idx, sum));
        }
    }
    best.map(|(idx, _)| idx)
}

fn max_sum_window_start(slots: &[Slot], len: usize) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, sum) in window_sums(slots, len)?.into_iter().enumerate() {
        if best.is_none_or(|(_, best_sum)| sum > best_sum) {
            best = Some((idx, sum));
        }
    }
    best.map(|(idx, _)| idx)
}

fn window_sums(slots: &[Slot], len: usize) -> Option<Vec<f64>> {
    if len == 0 || slots.len() < len {
        return None;
    }
    Some(
        slots
            .windows(len)
            .map(|w| w.iter().map(|s| s.price).sum())
            .collect(),
    )
}

/// Rule 5: slots still unclassified whose price is at least 10% below the
/// average of the unclassified population.
fn mark_below_average(slots: &mut [Slot]) {
    let average: Vec<f64> = slots
        .iter()
        .filter(|s| s.price_class == PriceClass::Average)
        .map(|s| s.price)
        .collect();
    if average.is_empty() {
        return;
    }

    #[allow(clippy::cast_precision_loss)]
    let mean = average.iter().sum::<f64>() / average.len() as f64;
    let mean = (mean * 100.0).round() / 100.0;
    let threshold = mean * 0.9;

    for slot in slots.iter_mut() {
        if slot.price_class == PriceClass::Average && slot.price < threshold {
            slot.price_class = PriceClass::BelowAverage;
            slot.planned_action = SlotAction::ChargeIfLowBattery;
            slot.reason = format!("Price {:.2} below average {mean:.2}", slot.price);
        }
    }
}

/// Rule 6: walk backward from the cheapest window across consecutive
/// below-average slots and neutralise them, so the battery is not filled just
/// before the genuinely cheapest slots arrive.
fn suppress_dropping_run(slots: &mut [Slot], window_start: usize, max_run: usize) {
    let mut reclassified = 0_usize;
    for idx in (0..window_start).rev() {
        if reclassified == max_run {
            break;
        }
        if slots[idx].price_class != PriceClass::BelowAverage {
            break;
        }
        slots[idx].price_class = PriceClass::Dropping;
        slots[idx].planned_action = SlotAction::DoNothing;
        slots[idx].reason = "Price dropping towards cheapest window".to_owned();
        reclassified += 1;
    }
}

/// Rule 7: of the slots in the run-up to the peak window, force-charge the
/// cheapest ones so the battery hits the peak period at its usage target.
fn apply_pre_peak_top_up(slots: &mut [Slot], peak_start: usize, full_charge: usize) {
    let run_up_start = peak_start.saturating_sub(full_charge + 2);
    let mut candidates: Vec<usize> = (run_up_start..peak_start).collect();
    if candidates.is_empty() {
        return;
    }

    candidates.sort_by(|&a, &b| {
        slots[a]
            .price
            .partial_cmp(&slots[b].price)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
    candidates.truncate(full_charge);

    for idx in candidates {
        slots[idx].planned_action = SlotAction::Charge;
        slots[idx].reason = "Pre-peak top-up charge".to_owned();
    }
}

/// Rule 8: drop planned grid charges across the night span when tomorrow's
/// damped forecast clears the threshold. The span runs from the first slot
/// forecast at zero to the next slot with real forecast yield; without both
/// boundaries there is no identifiable night and nothing is skipped.
fn skip_overnight_charge(slots: &mut [Slot], damped_kwh: f64) {
    let Some(night_start) = slots
        .iter()
        .position(|s| s.forecast_kwh.is_some_and(|kwh| kwh == 0.0))
    else {
        return;
    };
    let Some(night_end) = slots[night_start..]
        .iter()
        .position(|s| s.forecast_kwh.is_some_and(|kwh| kwh > 0.0))
        .map(|offset| night_start + offset)
    else {
        return;
    };

    let mut skipped = 0_usize;
    for slot in &mut slots[night_start..=night_end] {
        if slot.planned_action == SlotAction::Charge {
            slot.planned_action = SlotAction::DoNothing;
            slot.reason = format!("Overnight charge skipped, {damped_kwh:.1} kWh forecast tomorrow");
            skipped += 1;
        }
    }
    if skipped > 0 {
        debug!(skipped, forecast_kwh = damped_kwh, "skipped overnight charge slots");
    }
}

/// Rule 14: a negative-price run longer than a full charge gets drained first,
/// leaving exactly enough trailing slots to refill for free.
fn apply_negative_dump(slots: &mut [Slot], full_charge: usize) {
    let mut idx = 0;
    while idx < slots.len() {
        if slots[idx].price_class != PriceClass::Negative {
            idx += 1;
            continue;
        }

        let run_start = idx;
        while idx < slots.len() && slots[idx].price_class == PriceClass::Negative {
            idx += 1;
        }
        let run_len = idx - run_start;

        if run_len > full_charge {
            let dump_end = run_start + (run_len - full_charge);
            for slot in &mut slots[run_start..dump_end] {
                slot.apply_override(SlotAction::Discharge, OverrideKind::NegativePriceDump);
                slot.reason = "Dumping battery before free recharge".to_owned();
            }
            debug!(
                run_len,
                dump_slots = run_len - full_charge,
                "negative price run, dump-and-recharge applied"
            );
        }
    }
}
