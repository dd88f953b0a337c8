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

//! In-process stand-ins for the device and the feeds, used until a cloud
//! adapter is wired in and for dry runs against synthetic tariffs.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Timelike, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

use solion_core::{EnergyDelta, InverterControl, PricePoint, PriceDataSource, SolarForecastSource};
use solion_types::{BatteryState, CommandId, ForecastPoint, SLOT_MINUTES};

/// Inverter simulator: registers live in a map, the packed charge write is
/// mirrored into its readback register the way the real device does it.
#[derive(Debug)]
pub struct SimulatedInverter {
    registers: Mutex<HashMap<CommandId, String>>,
    soc_percent: u32,
}

impl SimulatedInverter {
    pub fn new(soc_percent: u32) -> Self {
        Self {
            registers: Mutex::new(HashMap::new()),
            soc_percent,
        }
    }
}

#[async_trait]
impl InverterControl for SimulatedInverter {
    async fn read_state(&self, command: CommandId) -> Result<Option<String>> {
        Ok(self.registers.lock().get(&command).cloned())
    }

    async fn write_state(&self, command: CommandId, value: &str) -> Result<()> {
        let mut registers = self.registers.lock();
        registers.insert(command, value.to_owned());
        if command == CommandId::SetCharge {
            registers.insert(CommandId::ReadChargeState, value.to_owned());
        }
        Ok(())
    }

    async fn battery_state(&self) -> Result<BatteryState> {
        Ok(BatteryState::new(self.soc_percent, Utc::now()))
    }

    async fn energy_totals(&self) -> Result<EnergyDelta> {
        Ok(EnergyDelta::default())
    }

    fn name(&self) -> &str {
        "simulated-inverter"
    }
}

/// Synthetic day-ahead tariff: a base curve with a cheap overnight valley and
/// an expensive evening peak, published for the next 24 hours.
#[derive(Debug)]
pub struct SyntheticPrices;

impl SyntheticPrices {
    fn price_at(start: DateTime<Utc>) -> f64 {
        match start.hour() {
            1..=4 => 8.0,
            17..=19 => 42.0,
            _ => 20.0,
        }
    }
}

#[async_trait]
impl PriceDataSource for SyntheticPrices {
    async fn read_prices(&self) -> Result<Vec<PricePoint>> {
        let now = Utc::now();
        // Align to the current half-hour boundary
        let minute = i64::from(now.minute()) % SLOT_MINUTES;
        let slot_start = now - Duration::minutes(minute) - Duration::seconds(i64::from(now.second()));

        Ok((0..48)
            .map(|i| {
                let period_start = slot_start + Duration::minutes(SLOT_MINUTES * i);
                PricePoint {
                    period_start,
                    price: Self::price_at(period_start),
                }
            })
            .collect())
    }

    fn name(&self) -> &str {
        "synthetic-prices"
    }
}

/// Forecast source with no data, for installations without a PV forecast.
#[derive(Debug)]
pub struct NoForecast;

#[async_trait]
impl SolarForecastSource for NoForecast {
    async fn read_forecast(&self) -> Result<Vec<ForecastPoint>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "no-forecast"
    }
}
