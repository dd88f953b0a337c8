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

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of a pricing slot. The tariff publishes half-hourly rates, and the
/// whole planning pipeline works in this granularity.
pub const SLOT_MINUTES: i64 = 30;

/// What the planner (or an override) wants the inverter to do during one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SlotAction {
    /// Normal self-use behaviour, no forced charge or discharge
    #[default]
    DoNothing,
    /// Force-charge the battery from the grid
    Charge,
    /// Charge, but only if the battery is below the low-battery threshold
    ChargeIfLowBattery,
    /// Force-discharge the battery
    Discharge,
    /// Block battery discharge without charging (discharge window at 0A)
    Hold,
}

impl fmt::Display for SlotAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DoNothing => "Do Nothing",
            Self::Charge => "Charge",
            Self::ChargeIfLowBattery => "Charge If Low Battery",
            Self::Discharge => "Discharge",
            Self::Hold => "Hold",
        };
        write!(f, "{name}")
    }
}

/// Price classification assigned to a slot by the rule cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PriceClass {
    /// Unremarkable price, the reset state for every slot
    #[default]
    Average,
    /// Member of the cheapest contiguous charging window
    Cheapest,
    /// Member of the priciest (peak) window
    MostExpensive,
    /// At least 10% below the average of the unclassified slots
    BelowAverage,
    /// Below the always-charge price threshold
    BelowThreshold,
    /// Negative price - we get paid to consume
    Negative,
    /// Price falling in the run-up to the cheapest window
    Dropping,
}

/// Who put an override on a slot. Determines precedence when several layers
/// want to override the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OverrideKind {
    #[default]
    None,
    /// Set by the user via the override entry point; persists across recomputes
    Manual,
    /// Set by a configured time-of-day scheduled action
    Scheduled,
    /// Mandatory charge window dispatched by the energy supplier
    UtilityDispatch,
    /// Discharge phase of the negative-price dump-and-recharge rule
    NegativePriceDump,
}

impl OverrideKind {
    /// Precedence when layering overrides: Manual > Scheduled > UtilityDispatch
    /// > NegativePriceDump > None.
    pub fn precedence(self) -> u8 {
        match self {
            Self::Manual => 4,
            Self::Scheduled => 3,
            Self::UtilityDispatch => 2,
            Self::NegativePriceDump => 1,
            Self::None => 0,
        }
    }
}

/// A single half-hour pricing interval, annotated by the planning cascade.
///
/// The slot sequence is rebuilt from fresh price data on every recompute
/// cycle; classifications and planned actions are never mutated incrementally.
/// Pipeline stages take the sequence by value and return a new annotated one,
/// so snapshots handed to readers can be compared by equality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    /// Start of the interval (UTC)
    pub start: DateTime<Utc>,
    /// End of the interval; always `start + 30min`
    pub end: DateTime<Utc>,
    /// Import price for the interval, currency units per kWh. May be negative.
    pub price: f64,
    /// Solar forecast for the interval, if the forecaster had an estimate
    pub forecast_kwh: Option<f64>,
    /// Price classification from the rule cascade
    pub price_class: PriceClass,
    /// Action the cascade planned for this slot
    pub planned_action: SlotAction,
    /// Override action, if any layer overrode the plan
    pub override_action: Option<SlotAction>,
    /// Which layer owns the override; `None` iff `override_action` is `None`
    pub override_kind: OverrideKind,
    /// Human-readable explanation of the decision. Display only, not
    /// authoritative.
    pub reason: String,
}

impl Slot {
    /// Create a fresh, unclassified slot from raw price-feed data.
    pub fn new(start: DateTime<Utc>, price: f64, forecast_kwh: Option<f64>) -> Self {
        Self {
            start,
            end: start + Duration::minutes(SLOT_MINUTES),
            price,
            forecast_kwh,
            price_class: PriceClass::default(),
            planned_action: SlotAction::default(),
            override_action: None,
            override_kind: OverrideKind::default(),
            reason: String::new(),
        }
    }

    /// The action that will actually be executed for this slot.
    pub fn resolved_action(&self) -> SlotAction {
        self.override_action.unwrap_or(self.planned_action)
    }

    /// Apply an override, respecting layer precedence. An override of a lower
    /// precedence than the one already present is ignored; equal or higher
    /// precedence replaces it.
    pub fn apply_override(&mut self, action: SlotAction, kind: OverrideKind) -> bool {
        if kind.precedence() < self.override_kind.precedence() {
            return false;
        }
        self.override_action = Some(action);
        self.override_kind = kind;
        true
    }

    /// Remove any override, falling back to the planned action.
    pub fn clear_override(&mut self) {
        self.override_action = None;
        self.override_kind = OverrideKind::None;
    }
}

/// Request to override the action of the slot starting at `slot_start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSlotActionRequest {
    pub slot_start: DateTime<Utc>,
    pub new_action: SlotAction,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn slot_at(hour: u32) -> Slot {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, hour, 0, 0).unwrap();
        Slot::new(start, 20.0, None)
    }

    #[test]
    fn test_slot_duration() {
        let slot = slot_at(10);
        assert_eq!(slot.end - slot.start, Duration::minutes(30));
    }

    #[test]
    fn test_resolved_action_prefers_override() {
        let mut slot = slot_at(10);
        slot.planned_action = SlotAction::Charge;
        assert_eq!(slot.resolved_action(), SlotAction::Charge);

        slot.apply_override(SlotAction::Discharge, OverrideKind::Manual);
        assert_eq!(slot.resolved_action(), SlotAction::Discharge);

        slot.clear_override();
        assert_eq!(slot.resolved_action(), SlotAction::Charge);
        assert_eq!(slot.override_kind, OverrideKind::None);
    }

    #[test]
    fn test_override_precedence() {
        let mut slot = slot_at(10);

        assert!(slot.apply_override(SlotAction::Discharge, OverrideKind::NegativePriceDump));
        assert!(slot.apply_override(SlotAction::Charge, OverrideKind::Manual));

        // Lower-precedence layers cannot displace a manual override
        assert!(!slot.apply_override(SlotAction::Hold, OverrideKind::Scheduled));
        assert_eq!(slot.resolved_action(), SlotAction::Charge);
        assert_eq!(slot.override_kind, OverrideKind::Manual);

        // Equal precedence replaces
        assert!(slot.apply_override(SlotAction::Hold, OverrideKind::Manual));
        assert_eq!(slot.resolved_action(), SlotAction::Hold);
    }

    #[test]
    fn test_override_kind_ordering() {
        assert!(OverrideKind::Manual.precedence() > OverrideKind::Scheduled.precedence());
        assert!(OverrideKind::Scheduled.precedence() > OverrideKind::UtilityDispatch.precedence());
        assert!(
            OverrideKind::UtilityDispatch.precedence()
                > OverrideKind::NegativePriceDump.precedence()
        );
        assert!(OverrideKind::NegativePriceDump.precedence() > OverrideKind::None.precedence());
    }
}
