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

pub mod config;
pub mod forecast;
pub mod history;
pub mod inverter;
pub mod slot;

// Re-export common types for convenience
pub use config::{PlanConfig, ScheduledAction};
pub use forecast::{ForecastPoint, ForecastSummary};
pub use history::HistoryEntry;
pub use inverter::{
    BatteryState, CommandId, DeviceChargeWindow, FirmwareVariant, WindowTimes,
};
pub use slot::{ChangeSlotActionRequest, OverrideKind, PriceClass, Slot, SlotAction, SLOT_MINUTES};
