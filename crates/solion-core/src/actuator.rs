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
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backoff::{BackoffPolicy, write_and_verify};
use crate::error::DeviceError;
use crate::traits::InverterControl;
use solion_types::{
    CommandId, DeviceChargeWindow, FirmwareVariant, PlanConfig, Slot, SlotAction, WindowTimes,
};

/// Probe register value identifying the discrete-register firmware.
const MODERN_FIRMWARE_SENTINEL: u32 = 0xAA55;

/// Target SOC written alongside discharge windows on new firmware; discharge
/// there works by setting a charge target below the current level.
const DISCHARGE_TARGET_SOC: &str = "15";
const FULL_CHARGE_TARGET_SOC: &str = "100";

/// Drives the physical inverter to match the resolved plan for "now".
///
/// Owns the probed firmware variant for the device session and the retry
/// policy for verified writes. All entry points report success as a bool and
/// log failures; no device fault propagates out.
pub struct ChargeActuator {
    device: Arc<dyn InverterControl>,
    policy: BackoffPolicy,
    variant: FirmwareVariant,
}

impl std::fmt::Debug for ChargeActuator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChargeActuator")
            .field("device", &self.device.name())
            .field("variant", &self.variant)
            .finish_non_exhaustive()
    }
}

impl ChargeActuator {
    /// Probe the device's firmware variant and build the actuator for this
    /// session. An unreadable or unrecognised probe register means old
    /// firmware; that path only uses commands every unit supports.
    pub async fn connect(device: Arc<dyn InverterControl>, policy: BackoffPolicy) -> Self {
        let variant = match device.read_state(CommandId::FirmwareProbe).await {
            Ok(Some(value)) if is_modern_sentinel(&value) => FirmwareVariant::Modern,
            Ok(value) => {
                debug!(?value, "firmware probe did not match, assuming legacy protocol");
                FirmwareVariant::Legacy
            }
            Err(err) => {
                warn!(error = %err, "firmware probe failed, assuming legacy protocol");
                FirmwareVariant::Legacy
            }
        };
        info!(device = device.name(), ?variant, "inverter control session established");

        Self {
            device,
            policy,
            variant,
        }
    }

    pub fn variant(&self) -> FirmwareVariant {
        self.variant
    }

    /// Synchronize the inverter with the resolved plan.
    ///
    /// Conflates the run of slots from "now" sharing one resolved action into
    /// a single device window, skips the write when the device already holds
    /// an equivalent state, and otherwise performs verified writes. Returns
    /// whether the device ended the call in the desired state.
    pub async fn sync_plan(&self, slots: &[Slot], now: DateTime<Utc>, config: &PlanConfig) -> bool {
        let Some(current_idx) = slots.iter().position(|s| s.start <= now && now < s.end) else {
            debug!("no slot covers the current time, nothing to actuate");
            return true;
        };

        let action = slots[current_idx].resolved_action();
        let run: Vec<&Slot> = slots[current_idx..]
            .iter()
            .take_while(|s| s.resolved_action() == action)
            .collect();

        let span_start = run[0].start;
        let span_end = run[run.len() - 1].end;
        let desired = desired_device_state(action, span_start, span_end, config);

        debug!(
            %action,
            slots = run.len(),
            span = %WindowTimes::from_span(span_start, span_end),
            "resolved device target"
        );

        if config.simulate_only {
            info!(
                %action,
                charge = %desired.charge_window,
                discharge = %desired.discharge_window,
                amps = desired.charge_amps.max(desired.discharge_amps),
                "simulation mode, skipping device write"
            );
            return true;
        }

        match self.read_device_state().await {
            Ok(current) if !needs_update(&desired, &current, now) => {
                debug!("inverter already matches the plan, no write needed");
                return true;
            }
            Ok(current) => {
                debug!(
                    current_charge = %current.charge_window,
                    current_discharge = %current.discharge_window,
                    "inverter state differs from plan, updating"
                );
            }
            Err(err) => {
                // Unreadable state: assume a write is needed rather than skip
                warn!(error = %err, "could not read inverter charge state, forcing update");
            }
        }

        match self.variant {
            FirmwareVariant::Legacy => self.apply_legacy(&desired).await,
            FirmwareVariant::Modern => self.apply_modern(&desired, action).await,
        }
    }

    /// Read the live charge/discharge windows and currents.
    async fn read_device_state(&self) -> Result<DeviceChargeWindow, DeviceError> {
        match self.variant {
            FirmwareVariant::Legacy => {
                let packed = self
                    .read_register(CommandId::ReadChargeState)
                    .await?
                    .unwrap_or_default();
                DeviceChargeWindow::from_packed_value(&packed)
                    .map_err(|_| DeviceError::MalformedWindow(packed))
            }
            FirmwareVariant::Modern => {
                let charge_amps = self.read_number(CommandId::ChargeSlotAmps).await?;
                let discharge_amps = self.read_number(CommandId::DischargeSlotAmps).await?;
                let charge_window = self.read_window(CommandId::ChargeSlotTime).await?;
                let discharge_window = self.read_window(CommandId::DischargeSlotTime).await?;
                Ok(DeviceChargeWindow {
                    charge_amps,
                    discharge_amps,
                    charge_window,
                    discharge_window,
                })
            }
        }
    }

    async fn read_register(&self, command: CommandId) -> Result<Option<String>, DeviceError> {
        self.device
            .read_state(command)
            .await
            .map_err(|source| DeviceError::StateRead { command, source })
    }

    async fn read_number(&self, command: CommandId) -> Result<u32, DeviceError> {
        let value = self.read_register(command).await?.unwrap_or_default();
        if value.trim().is_empty() {
            return Ok(0);
        }
        // Amps registers report whole amps, occasionally with a decimal tail
        let amps = value.trim().parse::<f64>().map_err(|err| DeviceError::StateRead {
            command,
            source: err.into(),
        })?;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let amps = amps.max(0.0) as u32;
        Ok(amps)
    }

    async fn read_window(&self, command: CommandId) -> Result<WindowTimes, DeviceError> {
        match self.read_register(command).await? {
            Some(value) if !value.trim().is_empty() => {
                WindowTimes::parse(&value).map_err(|_| DeviceError::MalformedWindow(value))
            }
            _ => Ok(WindowTimes::cleared()),
        }
    }

    /// Old firmware: one packed write carries the whole charge state.
    async fn apply_legacy(&self, desired: &DeviceChargeWindow) -> bool {
        let packed = desired.to_packed_value();
        match write_and_verify(self.device.as_ref(), CommandId::SetCharge, &packed, &self.policy)
            .await
        {
            Ok(()) => {
                info!(value = %packed, "inverter charge state updated");
                true
            }
            Err(err) => {
                warn!(error = %err, "charge state write abandoned, will retry next cycle");
                false
            }
        }
    }

    /// New firmware: enable the slot switches first, then targets, currents
    /// and windows as discrete verified writes.
    async fn apply_modern(&self, desired: &DeviceChargeWindow, action: SlotAction) -> bool {
        let charge_soc = if action == SlotAction::Discharge {
            DISCHARGE_TARGET_SOC
        } else {
            FULL_CHARGE_TARGET_SOC
        };

        let writes: Vec<(CommandId, String)> = vec![
            (CommandId::ChargeSlotSwitch, "1".to_owned()),
            (CommandId::DischargeSlotSwitch, "1".to_owned()),
            (CommandId::ChargeSlotSoc, charge_soc.to_owned()),
            (CommandId::DischargeSlotSoc, DISCHARGE_TARGET_SOC.to_owned()),
            (CommandId::ChargeSlotAmps, desired.charge_amps.to_string()),
            (CommandId::DischargeSlotAmps, desired.discharge_amps.to_string()),
            (CommandId::ChargeSlotTime, desired.charge_window.to_string()),
            (CommandId::DischargeSlotTime, desired.discharge_window.to_string()),
        ];

        let mut all_ok = true;
        for (command, value) in writes {
            if let Err(err) =
                write_and_verify(self.device.as_ref(), command, &value, &self.policy).await
            {
                warn!(error = %err, "register write abandoned, will retry next cycle");
                all_ok = false;
            }
        }

        if all_ok {
            info!(
                charge = %desired.charge_window,
                discharge = %desired.discharge_window,
                "inverter charge state updated"
            );
        }
        all_ok
    }
}

fn is_modern_sentinel(value: &str) -> bool {
    let trimmed = value.trim().trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(trimmed, 16).is_ok_and(|n| n == MODERN_FIRMWARE_SENTINEL)
}

/// Translate a resolved slot action into the device window state it requires.
fn desired_device_state(
    action: SlotAction,
    span_start: DateTime<Utc>,
    span_end: DateTime<Utc>,
    config: &PlanConfig,
) -> DeviceChargeWindow {
    let span = WindowTimes::from_span(span_start, span_end);
    match action {
        SlotAction::Charge | SlotAction::ChargeIfLowBattery => DeviceChargeWindow {
            charge_amps: config.max_charge_amps,
            discharge_amps: 0,
            charge_window: span,
            discharge_window: WindowTimes::cleared(),
        },
        SlotAction::Discharge => DeviceChargeWindow {
            charge_amps: 0,
            discharge_amps: config.max_charge_amps,
            charge_window: WindowTimes::cleared(),
            discharge_window: span,
        },
        // Hold blocks discharge by parking a zero-current discharge window
        SlotAction::Hold => DeviceChargeWindow {
            charge_amps: 0,
            discharge_amps: 0,
            charge_window: WindowTimes::cleared(),
            discharge_window: span,
        },
        SlotAction::DoNothing => DeviceChargeWindow::cleared(),
    }
}

/// Whether the live device state differs enough from the desired one to need
/// a write. Both sides must match; a stale window on either side forces an
/// update.
fn needs_update(desired: &DeviceChargeWindow, current: &DeviceChargeWindow, now: DateTime<Utc>) -> bool {
    !(window_equivalent(desired.charge_window, current.charge_window, now)
        && window_equivalent(desired.discharge_window, current.discharge_window, now)
        && desired.charge_amps == current.charge_amps
        && desired.discharge_amps == current.discharge_amps)
}

/// A desired window is already covered by the device iff its start falls
/// inside the live window and the ends coincide. Comparison happens over
/// concrete date-times so windows crossing midnight order correctly.
fn window_equivalent(desired: WindowTimes, current: WindowTimes, now: DateTime<Utc>) -> bool {
    if desired.is_cleared() || current.is_cleared() {
        return desired.is_cleared() && current.is_cleared();
    }

    let (desired_start, desired_end) = desired.to_real_dates(now);
    let (current_start, current_end) = current.to_real_dates(now);

    desired_start >= current_start && desired_start <= current_end && desired_end == current_end
}
