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

use chrono::{DateTime, Utc};
use solion_types::{ChangeSlotActionRequest, OverrideKind, Slot, SlotAction};
use tracing::{debug, info};

use crate::traits::UtilityDispatchWindow;

/// Manual overrides survive the recompute that rebuilds every slot from fresh
/// price data. They are keyed by slot start; all other override kinds are
/// cycle-local and recomputed from scratch.
pub fn capture_manual_overrides(slots: &[Slot]) -> Vec<(DateTime<Utc>, SlotAction)> {
    slots
        .iter()
        .filter(|s| s.override_kind == OverrideKind::Manual)
        .filter_map(|s| s.override_action.map(|action| (s.start, action)))
        .collect()
}

/// Reapply previously captured manual overrides to the freshly rebuilt
/// sequence. Slots whose start no longer exists (the horizon moved on) are
/// silently dropped.
pub fn reapply_manual_overrides(slots: &mut [Slot], captured: &[(DateTime<Utc>, SlotAction)]) {
    for &(start, action) in captured {
        if let Some(slot) = slots.iter_mut().find(|s| s.start == start) {
            slot.apply_override(action, OverrideKind::Manual);
        }
    }
}

/// Apply a batch of user override requests.
///
/// Requesting the action the planner already chose clears any existing
/// override instead of storing a redundant one, so clicking the same action
/// twice round-trips back to the plan.
pub fn set_manual_overrides(slots: &mut [Slot], requests: &[ChangeSlotActionRequest]) {
    for request in requests {
        let Some(slot) = slots.iter_mut().find(|s| s.start == request.slot_start) else {
            debug!(start = %request.slot_start, "override request for unknown slot, ignored");
            continue;
        };

        if request.new_action == slot.planned_action {
            info!(
                start = %slot.start,
                action = %request.new_action,
                "override matches planned action, clearing"
            );
            slot.clear_override();
        } else {
            info!(start = %slot.start, action = %request.new_action, "manual override set");
            slot.apply_override(request.new_action, OverrideKind::Manual);
        }
    }
}

/// Drop every manual override, leaving other layers untouched.
pub fn clear_manual_overrides(slots: &mut [Slot]) {
    let mut cleared = 0_usize;
    for slot in slots.iter_mut() {
        if slot.override_kind == OverrideKind::Manual {
            slot.clear_override();
            cleared += 1;
        }
    }
    if cleared > 0 {
        info!(cleared, "cleared manual overrides");
    }
}

/// Layer in supplier-dispatched mandatory charge windows. Any slot
/// overlapping a dispatch window charges, unless a higher-precedence override
/// already owns the slot.
pub fn apply_utility_dispatches(slots: &mut [Slot], dispatches: &[UtilityDispatchWindow]) {
    for dispatch in dispatches {
        for slot in slots.iter_mut() {
            let overlaps = slot.start < dispatch.end && slot.end > dispatch.start;
            if overlaps {
                slot.apply_override(SlotAction::Charge, OverrideKind::UtilityDispatch);
                slot.reason = "Supplier smart-charge dispatch".to_owned();
            }
        }
    }
}

/// How many half-hour slots it takes to charge from `soc_percent` to full,
/// given the full-charge slot count for an empty battery. At least one.
pub fn slots_to_full(soc_percent: u32, full_charge_slot_count: usize) -> usize {
    let missing_fraction = f64::from(100_u32.saturating_sub(soc_percent.min(100))) / 100.0;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let needed = (full_charge_slot_count as f64 * missing_fraction).ceil() as usize;
    needed.max(1)
}

/// Build override requests forcing `action` on the next `count` slots,
/// the "boost from now" entry point.
pub fn boost_requests(slots: &[Slot], action: SlotAction, count: usize) -> Vec<ChangeSlotActionRequest> {
    slots
        .iter()
        .take(count)
        .map(|slot| ChangeSlotActionRequest {
            slot_start: slot.start,
            new_action: action,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn make_slots(count: usize) -> Vec<Slot> {
        let base = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        (0..count)
            .map(|i| Slot::new(base + Duration::minutes(30 * i as i64), 20.0, None))
            .collect()
    }

    #[test]
    fn test_toggle_law() {
        let mut slots = make_slots(4);
        slots[1].planned_action = SlotAction::Charge;

        // Overriding with a different action sticks
        let slot_start = slots[1].start;
        set_manual_overrides(
            &mut slots,
            &[ChangeSlotActionRequest {
                slot_start,
                new_action: SlotAction::Discharge,
            }],
        );
        assert_eq!(slots[1].resolved_action(), SlotAction::Discharge);
        assert_eq!(slots[1].override_kind, OverrideKind::Manual);

        // Requesting the planned action clears the override
        let slot_start = slots[1].start;
        set_manual_overrides(
            &mut slots,
            &[ChangeSlotActionRequest {
                slot_start,
                new_action: SlotAction::Charge,
            }],
        );
        assert_eq!(slots[1].override_action, None);
        assert_eq!(slots[1].resolved_action(), SlotAction::Charge);
    }

    #[test]
    fn test_manual_overrides_survive_rebuild() {
        let mut slots = make_slots(4);
        let slot_start = slots[2].start;
        set_manual_overrides(
            &mut slots,
            &[ChangeSlotActionRequest {
                slot_start,
                new_action: SlotAction::Hold,
            }],
        );

        let captured = capture_manual_overrides(&slots);
        assert_eq!(captured.len(), 1);

        // Fresh sequence, one slot shifted off the front
        let mut rebuilt = make_slots(5);
        reapply_manual_overrides(&mut rebuilt, &captured);

        assert_eq!(rebuilt[2].resolved_action(), SlotAction::Hold);
        assert_eq!(rebuilt[2].override_kind, OverrideKind::Manual);
    }

    #[test]
    fn test_dispatch_overlap() {
        let mut slots = make_slots(6);
        let dispatch = UtilityDispatchWindow {
            start: slots[1].start + Duration::minutes(10),
            end: slots[3].start + Duration::minutes(5),
        };

        apply_utility_dispatches(&mut slots, &[dispatch]);

        assert_eq!(slots[0].override_kind, OverrideKind::None);
        for slot in &slots[1..4] {
            assert_eq!(slot.resolved_action(), SlotAction::Charge);
            assert_eq!(slot.override_kind, OverrideKind::UtilityDispatch);
        }
        assert_eq!(slots[4].override_kind, OverrideKind::None);
    }

    #[test]
    fn test_dispatch_does_not_displace_manual() {
        let mut slots = make_slots(3);
        let slot_start = slots[1].start;
        set_manual_overrides(
            &mut slots,
            &[ChangeSlotActionRequest {
                slot_start,
                new_action: SlotAction::Discharge,
            }],
        );

        let window = UtilityDispatchWindow {
            start: slots[0].start,
            end: slots[2].end,
        };
        apply_utility_dispatches(&mut slots, &[window]);

        assert_eq!(slots[0].resolved_action(), SlotAction::Charge);
        assert_eq!(slots[1].resolved_action(), SlotAction::Discharge);
        assert_eq!(slots[1].override_kind, OverrideKind::Manual);
    }

    #[test]
    fn test_clear_manual_only() {
        let mut slots = make_slots(3);
        slots[0].apply_override(SlotAction::Charge, OverrideKind::UtilityDispatch);
        slots[1].apply_override(SlotAction::Hold, OverrideKind::Manual);

        clear_manual_overrides(&mut slots);

        assert_eq!(slots[0].override_kind, OverrideKind::UtilityDispatch);
        assert_eq!(slots[1].override_kind, OverrideKind::None);
    }

    #[test]
    fn test_slots_to_full() {
        assert_eq!(slots_to_full(0, 8), 8);
        assert_eq!(slots_to_full(50, 8), 4);
        assert_eq!(slots_to_full(90, 8), 1);
        assert_eq!(slots_to_full(100, 8), 1);
        // ceil: 30% missing of 8 slots is 2.4, rounds up
        assert_eq!(slots_to_full(70, 8), 3);
    }

    #[test]
    fn test_boost_requests() {
        let slots = make_slots(6);
        let requests = boost_requests(&slots, SlotAction::Charge, 3);
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].slot_start, slots[0].start);
        assert!(requests.iter().all(|r| r.new_action == SlotAction::Charge));
    }
}
