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

pub mod actuator;
pub mod backoff;
pub mod cycle;
pub mod error;
pub mod history;
pub mod overrides;
pub mod planner;
pub mod traits;

pub use actuator::ChargeActuator;
pub use backoff::BackoffPolicy;
pub use cycle::{Pipeline, PlanSnapshot};
pub use error::DeviceError;
pub use history::HistoryRecorder;
pub use planner::evaluate_slot_actions;
pub use traits::{
    EnergyDelta, InverterControl, PricePoint, PriceDataSource, SolarForecastSource,
    UtilityDispatchWindow,
};
