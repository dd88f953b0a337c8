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

use solion_types::CommandId;
use thiserror::Error;

/// Faults raised while talking to the inverter. None of these may escape a
/// planning cycle; the pipeline downgrades each to a logged, recoverable
/// condition.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// A state readback failed, so we cannot tell what the inverter holds.
    #[error("failed to read inverter state for {command}")]
    StateRead {
        command: CommandId,
        #[source]
        source: anyhow::Error,
    },

    /// A write never verified against its readback within the retry budget.
    #[error("write of '{value}' to {command} did not verify after {attempts} attempts")]
    WriteVerification {
        command: CommandId,
        value: String,
        attempts: usize,
    },

    /// The inverter returned a time window we could not make sense of.
    #[error("malformed charge window from inverter: {0}")]
    MalformedWindow(String),
}
