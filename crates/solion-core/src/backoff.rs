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

use std::time::Duration;
use tracing::{debug, warn};

use crate::error::DeviceError;
use crate::traits::InverterControl;
use solion_types::CommandId;

/// Delay sequence for the write-then-verify loop. One attempt per delay;
/// exhausting the list abandons the write until the next planning cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub delays: Vec<Duration>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            delays: vec![
                Duration::from_millis(50),
                Duration::from_millis(200),
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(5),
            ],
        }
    }
}

impl BackoffPolicy {
    pub fn max_attempts(&self) -> usize {
        self.delays.len()
    }
}

/// Write a register and keep re-reading until the device reports the written
/// value, backing off between attempts.
///
/// The inverter's cloud API acks writes before they land in the device, and
/// some never land at all. Each attempt writes, waits the next delay from the
/// policy, then reads back. A pre-read that already matches skips the write
/// entirely.
///
/// # Returns
/// `Ok(())` once a readback matches; [`DeviceError::WriteVerification`] after
/// the retry budget is spent.
pub async fn write_and_verify(
    device: &dyn InverterControl,
    command: CommandId,
    value: &str,
    policy: &BackoffPolicy,
) -> Result<(), DeviceError> {
    // Skip the write when the register already holds the desired value
    match device.read_state(command).await {
        Ok(Some(current)) if current == value => {
            debug!(%command, value, "register already holds desired value, write skipped");
            return Ok(());
        }
        Ok(_) => {}
        Err(err) => {
            // Unreadable state means we cannot prove equivalence; fall
            // through and write
            debug!(%command, error = %err, "pre-write read failed, writing anyway");
        }
    }

    for (attempt, delay) in policy.delays.iter().enumerate() {
        if let Err(err) = device.write_state(command, value).await {
            warn!(%command, attempt = attempt + 1, error = %err, "device write failed");
        } else {
            tokio::time::sleep(*delay).await;

            match device.read_state(command).await {
                Ok(Some(readback)) if readback == value => {
                    debug!(%command, value, attempt = attempt + 1, "write verified");
                    return Ok(());
                }
                Ok(readback) => {
                    warn!(
                        %command,
                        attempt = attempt + 1,
                        expected = value,
                        actual = ?readback,
                        "write did not verify"
                    );
                }
                Err(err) => {
                    warn!(%command, attempt = attempt + 1, error = %err, "verification read failed");
                }
            }
        }
    }

    Err(DeviceError::WriteVerification {
        command,
        value: value.to_owned(),
        attempts: policy.max_attempts(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use solion_types::BatteryState;
    use std::collections::HashMap;

    use crate::traits::EnergyDelta;

    /// Fake device: registers in a map, with a switch controlling whether
    /// writes actually land.
    struct FlakyInverter {
        registers: Mutex<HashMap<CommandId, String>>,
        accept_writes: bool,
        writes: Mutex<usize>,
    }

    impl FlakyInverter {
        fn new(accept_writes: bool) -> Self {
            Self {
                registers: Mutex::new(HashMap::new()),
                accept_writes,
                writes: Mutex::new(0),
            }
        }

        fn write_count(&self) -> usize {
            *self.writes.lock()
        }
    }

    #[async_trait]
    impl InverterControl for FlakyInverter {
        async fn read_state(&self, command: CommandId) -> Result<Option<String>> {
            Ok(self.registers.lock().get(&command).cloned())
        }

        async fn write_state(&self, command: CommandId, value: &str) -> Result<()> {
            *self.writes.lock() += 1;
            if self.accept_writes {
                self.registers.lock().insert(command, value.to_owned());
            }
            Ok(())
        }

        async fn battery_state(&self) -> Result<BatteryState> {
            Ok(BatteryState::new(50, Utc::now()))
        }

        async fn energy_totals(&self) -> Result<EnergyDelta> {
            Ok(EnergyDelta::default())
        }

        fn name(&self) -> &str {
            "flaky-test-inverter"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_verifies_first_attempt() {
        let device = FlakyInverter::new(true);
        let policy = BackoffPolicy::default();

        write_and_verify(&device, CommandId::ChargeSlotAmps, "50", &policy)
            .await
            .unwrap();
        assert_eq!(device.write_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_matching_register_skips_write() {
        let device = FlakyInverter::new(true);
        device
            .registers
            .lock()
            .insert(CommandId::ChargeSlotAmps, "50".to_owned());

        let policy = BackoffPolicy::default();
        write_and_verify(&device, CommandId::ChargeSlotAmps, "50", &policy)
            .await
            .unwrap();
        assert_eq!(device.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_report_failure() {
        let device = FlakyInverter::new(false);
        let policy = BackoffPolicy::default();

        let err = write_and_verify(&device, CommandId::ChargeSlotAmps, "50", &policy)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DeviceError::WriteVerification { attempts: 5, .. }
        ));
        assert_eq!(device.write_count(), policy.max_attempts());
    }
}
