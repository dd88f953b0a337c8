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

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::traits::EnergyDelta;
use solion_types::{HistoryEntry, Slot};

/// Retention cap: 180 days of half-hourly slots.
const MAX_ENTRIES: usize = 180 * 48;

/// Append-only log of what was committed to the inverter, one row per slot
/// transition, persisted as CSV.
#[derive(Debug)]
pub struct HistoryRecorder {
    path: PathBuf,
    entries: Vec<HistoryEntry>,
    /// Cumulative day counters at the previous energy update, for delta
    /// computation
    last_totals: Option<EnergyDelta>,
}

impl HistoryRecorder {
    /// Load existing history from `path`. A missing file starts an empty
    /// history; a corrupt row ends the load at that row rather than losing
    /// the whole file.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match read_csv(&path) {
            Ok(entries) => {
                info!(rows = entries.len(), path = %path.display(), "loaded execution history");
                entries
            }
            Err(err) => {
                if path.exists() {
                    warn!(path = %path.display(), error = %err, "could not read history, starting empty");
                } else {
                    debug!(path = %path.display(), "no history file yet");
                }
                Vec::new()
            }
        };

        Self {
            path,
            entries,
            last_totals: None,
        }
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Record the resolved action committed for `slot`, if this is a new slot.
    /// A repeat call for the slot already at the tail is a no-op, so one cycle
    /// per interval produces exactly one row.
    ///
    /// # Returns
    /// Whether a new row was appended (and persisted).
    pub fn record_transition(&mut self, slot: &Slot, soc_percent: u32) -> Result<bool> {
        if self
            .entries
            .last()
            .is_some_and(|last| last.slot_start == slot.start)
        {
            return Ok(false);
        }

        self.entries.push(HistoryEntry::new(
            slot.start,
            slot.end,
            slot.price,
            slot.price_class,
            slot.resolved_action(),
            soc_percent,
            slot.forecast_kwh,
        ));

        if self.entries.len() > MAX_ENTRIES {
            let excess = self.entries.len() - MAX_ENTRIES;
            self.entries.drain(..excess);
        }

        self.save()?;
        debug!(start = %slot.start, action = %slot.resolved_action(), "slot transition recorded");
        Ok(true)
    }

    /// Fold fresh cumulative day counters into the row being written.
    ///
    /// Counters reset at midnight, which shows up as a negative delta; those
    /// deltas are discarded rather than subtracted from the entry.
    pub fn update_energy(&mut self, totals: EnergyDelta) {
        let delta = match self.last_totals {
            Some(prev) => EnergyDelta {
                import_kwh: non_negative(totals.import_kwh - prev.import_kwh),
                export_kwh: non_negative(totals.export_kwh - prev.export_kwh),
                house_load_kwh: non_negative(totals.house_load_kwh - prev.house_load_kwh),
                pv_yield_kwh: non_negative(totals.pv_yield_kwh - prev.pv_yield_kwh),
            },
            None => EnergyDelta::default(),
        };
        self.last_totals = Some(totals);

        if let Some(current) = self.entries.last_mut() {
            current.import_kwh += delta.import_kwh;
            current.export_kwh += delta.export_kwh;
            current.house_load_kwh += delta.house_load_kwh;
            current.pv_yield_kwh += delta.pv_yield_kwh;
        }
    }

    fn save(&self) -> Result<()> {
        let mut writer = csv::Writer::from_path(&self.path)
            .with_context(|| format!("opening history file {}", self.path.display()))?;
        for entry in &self.entries {
            writer.serialize(entry)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn non_negative(value: f64) -> f64 {
    if value < 0.0 {
        // Day counter reset; the lost fraction of a slot is acceptable
        0.0
    } else {
        value
    }
}

fn read_csv(path: &Path) -> Result<Vec<HistoryEntry>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut entries = Vec::new();
    for row in reader.deserialize() {
        entries.push(row?);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use solion_types::SlotAction;

    fn slot_at(minutes: i64) -> Slot {
        let base = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let mut slot = Slot::new(base + Duration::minutes(minutes), 20.0, Some(0.5));
        slot.planned_action = SlotAction::Charge;
        slot
    }

    fn temp_history() -> (tempfile::TempDir, HistoryRecorder) {
        let dir = tempfile::tempdir().unwrap();
        let recorder = HistoryRecorder::load(dir.path().join("history.csv"));
        (dir, recorder)
    }

    #[test]
    fn test_one_row_per_slot() {
        let (_dir, mut recorder) = temp_history();

        assert!(recorder.record_transition(&slot_at(0), 50).unwrap());
        // Same slot again within the interval: no new row
        assert!(!recorder.record_transition(&slot_at(0), 55).unwrap());
        assert!(recorder.record_transition(&slot_at(30), 55).unwrap());

        assert_eq!(recorder.entries().len(), 2);
        assert_eq!(recorder.entries()[0].soc_percent, 50);
    }

    #[test]
    fn test_round_trip_through_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.csv");

        let mut recorder = HistoryRecorder::load(&path);
        recorder.record_transition(&slot_at(0), 42).unwrap();
        recorder.record_transition(&slot_at(30), 47).unwrap();

        let reloaded = HistoryRecorder::load(&path);
        assert_eq!(reloaded.entries(), recorder.entries());
        assert_eq!(reloaded.entries()[1].action, SlotAction::Charge);
        assert_eq!(reloaded.entries()[1].forecast_kwh, Some(0.5));
    }

    #[test]
    fn test_energy_deltas_accumulate() {
        let (_dir, mut recorder) = temp_history();
        recorder.record_transition(&slot_at(0), 50).unwrap();

        recorder.update_energy(EnergyDelta {
            import_kwh: 10.0,
            export_kwh: 2.0,
            house_load_kwh: 5.0,
            pv_yield_kwh: 1.0,
        });
        recorder.update_energy(EnergyDelta {
            import_kwh: 10.5,
            export_kwh: 2.0,
            house_load_kwh: 5.2,
            pv_yield_kwh: 1.4,
        });

        let entry = &recorder.entries()[0];
        assert!((entry.import_kwh - 0.5).abs() < 1e-9);
        assert!((entry.pv_yield_kwh - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_negative_delta_discarded() {
        let (_dir, mut recorder) = temp_history();
        recorder.record_transition(&slot_at(0), 50).unwrap();

        recorder.update_energy(EnergyDelta {
            import_kwh: 10.0,
            ..EnergyDelta::default()
        });
        // Midnight counter reset: totals drop below the previous reading
        recorder.update_energy(EnergyDelta {
            import_kwh: 0.2,
            ..EnergyDelta::default()
        });

        assert!((recorder.entries()[0].import_kwh - 0.0).abs() < 1e-9);

        // Counting resumes from the new baseline
        recorder.update_energy(EnergyDelta {
            import_kwh: 0.7,
            ..EnergyDelta::default()
        });
        assert!((recorder.entries()[0].import_kwh - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_retention_cap() {
        let (_dir, mut recorder) = temp_history();

        // Pre-fill to the cap without paying for a CSV rewrite per row
        for i in 0..MAX_ENTRIES as i64 {
            let slot = slot_at(30 * i);
            recorder.entries.push(HistoryEntry::new(
                slot.start,
                slot.end,
                slot.price,
                slot.price_class,
                slot.resolved_action(),
                50,
                slot.forecast_kwh,
            ));
        }

        recorder
            .record_transition(&slot_at(30 * MAX_ENTRIES as i64), 50)
            .unwrap();

        assert_eq!(recorder.entries().len(), MAX_ENTRIES);
        // The oldest row was dropped
        assert_eq!(recorder.entries()[0].slot_start, slot_at(30).start);
    }
}
