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
use serde::{Deserialize, Serialize};

use crate::slot::{PriceClass, SlotAction};

/// One row of the execution history: what was actually committed to the
/// inverter for a slot, plus the telemetry recorded while the slot ran.
///
/// Field order is the on-disk CSV column order; reordering fields breaks
/// existing history files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub slot_start: DateTime<Utc>,
    pub slot_end: DateTime<Utc>,
    /// Import price at decision time, currency units per kWh
    pub price: f64,
    pub price_class: PriceClass,
    /// The resolved action that was committed for this slot
    pub action: SlotAction,
    /// Battery SOC at decision time; 0 means telemetry was unavailable
    pub soc_percent: u32,
    /// PV forecast for the slot, if one existed at decision time
    pub forecast_kwh: Option<f64>,
    /// Grid import accumulated during the slot, kWh
    pub import_kwh: f64,
    /// Grid export accumulated during the slot, kWh
    pub export_kwh: f64,
    /// House consumption during the slot, kWh
    pub house_load_kwh: f64,
    /// Actual PV yield during the slot, kWh
    pub pv_yield_kwh: f64,
}

impl HistoryEntry {
    /// A fresh entry at decision time, before any in-slot telemetry exists.
    pub fn new(
        slot_start: DateTime<Utc>,
        slot_end: DateTime<Utc>,
        price: f64,
        price_class: PriceClass,
        action: SlotAction,
        soc_percent: u32,
        forecast_kwh: Option<f64>,
    ) -> Self {
        Self {
            slot_start,
            slot_end,
            price,
            price_class,
            action,
            soc_percent,
            forecast_kwh,
            import_kwh: 0.0,
            export_kwh: 0.0,
            house_load_kwh: 0.0,
            pv_yield_kwh: 0.0,
        }
    }
}
