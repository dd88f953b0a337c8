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

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============= Control Command IDs =============

/// Control registers exposed by the Solis cloud control API.
///
/// Which subset is usable depends on the firmware variant: old firmware takes
/// one packed `SetCharge` value, new firmware exposes discrete registers per
/// slot plus enable switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandId {
    /// Capability probe used to detect the firmware variant
    FirmwareProbe,
    /// Packed charge/discharge instruction (old firmware)
    SetCharge,
    /// Packed charge/discharge state readback (old firmware)
    ReadChargeState,
    ChargeSlotTime,
    ChargeSlotAmps,
    ChargeSlotSoc,
    DischargeSlotTime,
    DischargeSlotAmps,
    DischargeSlotSoc,
    ChargeSlotSwitch,
    DischargeSlotSwitch,
}

impl CommandId {
    /// Numeric CID as documented in the SolisCloud control API command list.
    pub fn cid(self) -> u32 {
        match self {
            Self::FirmwareProbe => 6798,
            Self::SetCharge => 103,
            Self::ReadChargeState => 4643,
            Self::ChargeSlotTime => 5946,
            Self::ChargeSlotAmps => 5948,
            Self::ChargeSlotSoc => 5928,
            Self::DischargeSlotTime => 5964,
            Self::DischargeSlotAmps => 5967,
            Self::DischargeSlotSoc => 5965,
            Self::ChargeSlotSwitch => 5916,
            Self::DischargeSlotSwitch => 5922,
        }
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (CID {})", self, self.cid())
    }
}

/// Which control protocol generation the inverter firmware speaks.
///
/// Probed once per device session; the hardware capability does not change
/// while the process is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FirmwareVariant {
    /// Single packed charge instruction (CID 103)
    Legacy,
    /// Discrete per-slot registers with enable switches
    Modern,
}

// ============= Charge Windows =============

/// A start/end time-of-day pair as stored in the inverter, e.g. "01:30-05:00".
///
/// The inverter only holds times of day, so a window spanning midnight is
/// represented with `end < start` and has to be anchored to real dates before
/// it can be compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowTimes {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl WindowTimes {
    /// The cleared window the inverter treats as "no window set".
    pub fn cleared() -> Self {
        let midnight = NaiveTime::from_hms_opt(0, 0, 0).unwrap_or_default();
        Self {
            start: midnight,
            end: midnight,
        }
    }

    pub fn is_cleared(&self) -> bool {
        *self == Self::cleared()
    }

    /// Build a window from the UTC span of a conflated slot run.
    pub fn from_span(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: start.time().with_second(0).unwrap_or(start.time()),
            end: end.time().with_second(0).unwrap_or(end.time()),
        }
    }

    /// Parse a "HH:MM-HH:MM" pair as returned by the inverter.
    ///
    /// Some firmware revisions occasionally report an hour component above 24;
    /// those are wrapped modulo 24 rather than rejected.
    pub fn parse(value: &str) -> Result<Self> {
        let (start, end) = value
            .split_once('-')
            .ok_or_else(|| anyhow!("invalid time pair '{value}'"))?;

        Ok(Self {
            start: parse_time_of_day(start.trim())?,
            end: parse_time_of_day(end.trim())?,
        })
    }

    /// Anchor the window to concrete date-times so windows that cross midnight
    /// order correctly. Mirrors the inverter's own interpretation: a window
    /// whose start time has begun refers to tomorrow. The comparison is
    /// inclusive so that at an exact slot boundary a window starting right now
    /// anchors to the same day as a wider live window that started earlier.
    pub fn to_real_dates(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let today = now.date_naive();
        let mut start = today
            .and_time(self.start)
            .and_utc();
        let mut end = today.and_time(self.end).and_utc();

        if self.start <= now.time() {
            start += Duration::days(1);
            end += Duration::days(1);
        }

        if self.end < self.start {
            end += Duration::days(1);
        }

        (start, end)
    }
}

impl fmt::Display for WindowTimes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}-{:02}:{:02}",
            self.start.hour(),
            self.start.minute(),
            self.end.hour(),
            self.end.minute()
        )
    }
}

fn parse_time_of_day(value: &str) -> Result<NaiveTime> {
    let (hours, minutes) = value
        .split_once(':')
        .ok_or_else(|| anyhow!("invalid time '{value}'"))?;

    let mut hours: u32 = hours.trim().parse()?;
    let minutes: u32 = minutes.trim().parse()?;

    // Firmware quirk - hour components above 24 wrap rather than fail
    hours %= 24;

    NaiveTime::from_hms_opt(hours, minutes, 0).ok_or_else(|| anyhow!("invalid time '{value}'"))
}

/// The charge/discharge state resident in the inverter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceChargeWindow {
    pub charge_amps: u32,
    pub discharge_amps: u32,
    pub charge_window: WindowTimes,
    pub discharge_window: WindowTimes,
}

impl DeviceChargeWindow {
    pub fn cleared() -> Self {
        Self {
            charge_amps: 0,
            discharge_amps: 0,
            charge_window: WindowTimes::cleared(),
            discharge_window: WindowTimes::cleared(),
        }
    }

    /// Parse the packed value returned by `ReadChargeState` on old firmware.
    /// Only the first four fields (amps and windows for slot 1) are
    /// meaningful; slots 2 and 3 are unused.
    pub fn from_packed_value(value: &str) -> Result<Self> {
        let fields: Vec<&str> = value.split(',').map(str::trim).collect();
        if fields.len() < 4 {
            bail!("packed charge state '{value}' has {} fields, need 4", fields.len());
        }

        Ok(Self {
            charge_amps: fields[0].parse()?,
            discharge_amps: fields[1].parse()?,
            charge_window: WindowTimes::parse(fields[2])?,
            discharge_window: WindowTimes::parse(fields[3])?,
        })
    }

    /// Encode as the packed value expected by `SetCharge` on old firmware.
    /// Slots 2 and 3 are always written cleared.
    pub fn to_packed_value(&self) -> String {
        format!(
            "{},{},{},{},0,0,00:00-00:00,00:00-00:00,0,0,00:00-00:00,00:00-00:00",
            self.charge_amps, self.discharge_amps, self.charge_window, self.discharge_window
        )
    }
}

// ============= Battery Telemetry =============

/// Battery state-of-charge reading from the inverter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryState {
    /// 0-100. Zero is a known bad-telemetry sentinel, not a literally empty
    /// battery; check [`BatteryState::is_valid`] before using it in rules.
    pub soc_percent: u32,
    pub timestamp: DateTime<Utc>,
}

impl BatteryState {
    pub fn new(soc_percent: u32, timestamp: DateTime<Utc>) -> Self {
        Self {
            soc_percent,
            timestamp,
        }
    }

    /// The inverter occasionally reports SOC 0 when its own state read
    /// failed. Treat that as no-data.
    pub fn is_valid(&self) -> bool {
        self.soc_percent != 0
    }
}

impl Default for BatteryState {
    fn default() -> Self {
        Self {
            soc_percent: 0,
            timestamp: DateTime::<Utc>::MIN_UTC,
        }
    }
}
