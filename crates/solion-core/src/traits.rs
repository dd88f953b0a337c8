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

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use solion_types::{BatteryState, CommandId, ForecastPoint};

/// One half-hourly price from the tariff feed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub period_start: DateTime<Utc>,
    /// Import price, currency units per kWh. May be negative.
    pub price: f64,
}

/// A mandatory charge window dispatched by the energy supplier, e.g. a smart
/// tariff granting cheap off-schedule charging.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UtilityDispatchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Per-slot energy counters read from the inverter, cumulative for the day.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EnergyDelta {
    pub import_kwh: f64,
    pub export_kwh: f64,
    pub house_load_kwh: f64,
    pub pv_yield_kwh: f64,
}

/// Generic control channel to the inverter.
/// Business logic uses this trait, never knows about cloud-API details.
#[async_trait]
pub trait InverterControl: Send + Sync {
    /// Read the current value of a control register.
    /// `Ok(None)` means the register exists but has no value set.
    async fn read_state(&self, command: CommandId) -> Result<Option<String>>;

    /// Write a value to a control register.
    async fn write_state(&self, command: CommandId, value: &str) -> Result<()>;

    /// Read the current battery state of charge.
    async fn battery_state(&self) -> Result<BatteryState>;

    /// Read today's cumulative energy counters.
    async fn energy_totals(&self) -> Result<EnergyDelta>;

    /// Get control channel name for logging
    fn name(&self) -> &str;
}

/// Generic data source for reading price data
#[async_trait]
pub trait PriceDataSource: Send + Sync {
    /// Read the published half-hourly price forecast.
    async fn read_prices(&self) -> Result<Vec<PricePoint>>;

    /// Read any supplier-dispatched mandatory charge windows.
    /// Most tariffs have none; the default is empty.
    async fn smart_charge_dispatches(&self) -> Result<Vec<UtilityDispatchWindow>> {
        Ok(Vec::new())
    }

    /// Get data source name for logging
    fn name(&self) -> &str;
}

/// Generic data source for the PV yield forecast.
#[async_trait]
pub trait SolarForecastSource: Send + Sync {
    /// Read the per-period yield forecast, today plus tomorrow.
    async fn read_forecast(&self) -> Result<Vec<ForecastPoint>>;

    /// Get data source name for logging
    fn name(&self) -> &str;
}
