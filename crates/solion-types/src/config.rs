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

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::slot::SlotAction;

/// A recurring time-of-day action configured by the user, applied to the
/// matching slot on every planning cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduledAction {
    /// Time of day (UTC) of the slot this action applies to
    pub start_time: NaiveTime,
    pub action: SlotAction,
}

/// Tunable parameters of the planning cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    /// Number of contiguous slots needed to fully charge the battery from
    /// empty (the cheapest-window length)
    pub full_charge_slot_count: usize,
    /// Fraction of a full charge the battery is expected to cover during the
    /// peak period; used to shrink an already-started cheapest window
    pub peak_period_battery_use_fraction: f64,
    /// SOC below which `ChargeIfLowBattery` slots promote to real charges
    pub low_battery_percent_threshold: u32,
    /// SOC below which the imminent slot always becomes a charge
    pub always_charge_below_soc: u32,
    /// Price below which a slot always charges, regardless of classification
    pub always_charge_below_price: f64,
    /// Tomorrow-forecast yield above which the overnight cheapest charge is
    /// skipped (kWh, after damping)
    pub forecast_threshold_kwh: f64,
    /// Multiplier applied to the raw forecast before comparing against the
    /// threshold. Forecasts run optimistic; 1.0 disables damping.
    pub forecast_damp_factor: f64,
    /// Enable the overnight-charge skip rule at all
    pub skip_overnight_charge_if_forecast_good: bool,
    /// Charge/discharge current written to the inverter when forcing
    pub max_charge_amps: u32,
    /// Recurring time-of-day overrides
    pub scheduled_actions: Vec<ScheduledAction>,
    /// Log intended inverter writes without performing them
    pub simulate_only: bool,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            full_charge_slot_count: 8,
            peak_period_battery_use_fraction: 0.85,
            low_battery_percent_threshold: 25,
            always_charge_below_soc: 20,
            always_charge_below_price: 0.0,
            forecast_threshold_kwh: 0.0,
            forecast_damp_factor: 1.0,
            skip_overnight_charge_if_forecast_good: false,
            max_charge_amps: 50,
            scheduled_actions: Vec::new(),
            simulate_only: false,
        }
    }
}

impl PlanConfig {
    /// Check the parameters are internally coherent. An invalid configuration
    /// turns every planning cycle into a logged no-op rather than producing a
    /// nonsense plan.
    pub fn is_valid(&self) -> bool {
        self.full_charge_slot_count > 0
            && self.max_charge_amps > 0
            && self.peak_period_battery_use_fraction > 0.0
            && self.peak_period_battery_use_fraction <= 1.0
            && self.forecast_damp_factor > 0.0
            && self.forecast_damp_factor <= 1.0
            && self.low_battery_percent_threshold <= 100
            && self.always_charge_below_soc <= 100
    }
}
