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

use chrono::{DateTime, Days, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::actuator::ChargeActuator;
use crate::history::HistoryRecorder;
use crate::overrides::{
    apply_utility_dispatches, capture_manual_overrides, clear_manual_overrides,
    reapply_manual_overrides, set_manual_overrides,
};
use crate::planner::evaluate_slot_actions;
use crate::traits::{InverterControl, PriceDataSource, SolarForecastSource};
use solion_types::{
    BatteryState, ChangeSlotActionRequest, ForecastPoint, ForecastSummary, PlanConfig, Slot,
};

/// Read-only view of the current plan, published at the end of every cycle.
/// Status displays and APIs consume this; they never touch live slot state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlanSnapshot {
    pub slots: Vec<Slot>,
    pub battery: BatteryState,
    pub forecast: ForecastSummary,
    pub computed_at: Option<DateTime<Utc>>,
}

/// Mutable state owned exclusively by the running cycle.
struct CycleState {
    slots: Vec<Slot>,
    battery: BatteryState,
    forecast_points: Vec<ForecastPoint>,
    recorder: HistoryRecorder,
}

/// The recompute-and-actuate pipeline.
///
/// One cycle: fetch feeds, rebuild and classify the slot sequence, reapply
/// persisted overrides, publish a snapshot, drive the inverter, record
/// history. Cycles never overlap; a trigger arriving while one runs is
/// dropped. No fault escapes a cycle; every failure degrades to "no change
/// this cycle" so the scheduler stays alive.
pub struct Pipeline {
    inverter: Arc<dyn InverterControl>,
    prices: Arc<dyn PriceDataSource>,
    forecast: Arc<dyn SolarForecastSource>,
    actuator: ChargeActuator,
    config: PlanConfig,
    state: Mutex<CycleState>,
    snapshot: RwLock<PlanSnapshot>,
    /// Reentrancy guard; held for the duration of one cycle
    busy: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("inverter", &self.inverter.name())
            .field("prices", &self.prices.name())
            .field("forecast", &self.forecast.name())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(
        inverter: Arc<dyn InverterControl>,
        prices: Arc<dyn PriceDataSource>,
        forecast: Arc<dyn SolarForecastSource>,
        actuator: ChargeActuator,
        config: PlanConfig,
        recorder: HistoryRecorder,
    ) -> Self {
        Self {
            inverter,
            prices,
            forecast,
            actuator,
            config,
            state: Mutex::new(CycleState {
                slots: Vec::new(),
                battery: BatteryState::default(),
                forecast_points: Vec::new(),
                recorder,
            }),
            snapshot: RwLock::new(PlanSnapshot::default()),
            busy: tokio::sync::Mutex::new(()),
        }
    }

    /// The latest published plan.
    pub fn snapshot(&self) -> PlanSnapshot {
        self.snapshot.read().clone()
    }

    /// Run one full recompute-and-actuate cycle at `now`.
    pub async fn run_cycle(&self, now: DateTime<Utc>) {
        let Ok(_guard) = self.busy.try_lock() else {
            warn!("planning cycle already in progress, trigger dropped");
            return;
        };

        if !self.config.is_valid() {
            warn!("configuration invalid, planning cycle is a no-op");
            return;
        }

        let (slots, battery, summary) = self.recompute(now).await;

        let committed = self.actuator.sync_plan(&slots, now, &self.config).await;
        if !committed {
            warn!("inverter not synchronized this cycle, next cycle will retry");
        }

        self.record_history(&slots, battery, now).await;

        debug!(slots = slots.len(), soc = battery.soc_percent, "planning cycle complete");
        *self.snapshot.write() = PlanSnapshot {
            slots,
            battery,
            forecast: summary,
            computed_at: Some(now),
        };
    }

    /// Apply user override requests, then recompute so the new resolution is
    /// planned and actuated immediately.
    pub async fn request_overrides(&self, requests: &[ChangeSlotActionRequest], now: DateTime<Utc>) {
        {
            let mut state = self.state.lock();
            set_manual_overrides(&mut state.slots, requests);
        }
        self.run_cycle(now).await;
    }

    /// Drop all manual overrides and recompute.
    pub async fn clear_overrides(&self, now: DateTime<Utc>) {
        {
            let mut state = self.state.lock();
            clear_manual_overrides(&mut state.slots);
        }
        self.run_cycle(now).await;
    }

    /// Fetch feeds and rebuild the annotated slot sequence. Every feed
    /// failure falls back to the last-known data. All I/O happens before the
    /// state lock is taken; the cascade itself is synchronous.
    async fn recompute(&self, now: DateTime<Utc>) -> (Vec<Slot>, BatteryState, ForecastSummary) {
        let fresh_prices = match self.prices.read_prices().await {
            Ok(points) if !points.is_empty() => Some(points),
            Ok(_) => {
                warn!(source = self.prices.name(), "price feed returned no slots, keeping last plan");
                None
            }
            Err(err) => {
                warn!(source = self.prices.name(), error = %err, "price feed unavailable, keeping last plan");
                None
            }
        };

        let fresh_forecast = match self.forecast.read_forecast().await {
            Ok(points) => Some(points),
            Err(err) => {
                warn!(source = self.forecast.name(), error = %err, "solar forecast unavailable, keeping last data");
                None
            }
        };

        let fresh_battery = match self.inverter.battery_state().await {
            Ok(battery) if battery.is_valid() => Some(battery),
            Ok(_) => {
                warn!("battery SOC read zero, keeping last known value");
                None
            }
            Err(err) => {
                warn!(error = %err, "battery telemetry unavailable, keeping last known value");
                None
            }
        };

        let dispatches = match self.prices.smart_charge_dispatches().await {
            Ok(dispatches) => dispatches,
            Err(err) => {
                debug!(error = %err, "smart-charge dispatches unavailable this cycle");
                Vec::new()
            }
        };

        let mut state = self.state.lock();

        if let Some(points) = fresh_forecast {
            state.forecast_points = points;
        }
        if let Some(battery) = fresh_battery {
            state.battery = battery;
        }

        // Rebuild the sequence from fresh prices, preserving manual overrides
        // keyed by slot start
        let manual = capture_manual_overrides(&state.slots);
        if let Some(points) = fresh_prices {
            state.slots = points
                .iter()
                .map(|p| Slot::new(p.period_start, p.price, None))
                .collect();
        } else {
            // Keep the previous sequence but strip stale cycle-local overrides
            for slot in &mut state.slots {
                slot.clear_override();
            }
        }

        let points = std::mem::take(&mut state.forecast_points);
        enrich_with_forecast(&mut state.slots, &points);
        let summary = summarize_forecast(&points, now);
        state.forecast_points = points;

        let battery = state.battery;
        state.slots = evaluate_slot_actions(
            std::mem::take(&mut state.slots),
            battery,
            summary,
            &self.config,
        );

        apply_utility_dispatches(&mut state.slots, &dispatches);
        reapply_manual_overrides(&mut state.slots, &manual);

        (state.slots.clone(), battery, summary)
    }

    async fn record_history(&self, slots: &[Slot], battery: BatteryState, now: DateTime<Utc>) {
        let Some(current) = slots.iter().find(|s| s.start <= now && now < s.end) else {
            return;
        };

        let totals = match self.inverter.energy_totals().await {
            Ok(totals) => Some(totals),
            Err(err) => {
                debug!(error = %err, "energy counters unavailable this cycle");
                None
            }
        };

        let mut state = self.state.lock();
        match state.recorder.record_transition(current, battery.soc_percent) {
            Ok(true) => info!(start = %current.start, action = %current.resolved_action(), "slot committed to history"),
            Ok(false) => {}
            Err(err) => warn!(error = %err, "could not persist history"),
        }
        if let Some(totals) = totals {
            state.recorder.update_energy(totals);
        }
    }
}

/// Attach forecast estimates to slots by period start. Missing estimates stay
/// `None`; they mean "no data", not zero yield.
fn enrich_with_forecast(slots: &mut [Slot], points: &[ForecastPoint]) {
    for slot in slots.iter_mut() {
        slot.forecast_kwh = points
            .iter()
            .find(|p| p.period_start == slot.start)
            .map(|p| p.kwh);
    }
}

/// Daily yield totals, keyed off the UTC date of `now`.
fn summarize_forecast(points: &[ForecastPoint], now: DateTime<Utc>) -> ForecastSummary {
    let today = now.date_naive();
    let tomorrow = today.checked_add_days(Days::new(1));

    let mut summary = ForecastSummary::default();
    for point in points {
        let date = point.period_start.date_naive();
        if date == today {
            summary.today_kwh += point.kwh;
        } else if Some(date) == tomorrow {
            summary.tomorrow_kwh += point.kwh;
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::collections::HashMap;

    use crate::backoff::BackoffPolicy;
    use crate::traits::{EnergyDelta, PricePoint};
    use solion_types::{CommandId, PriceClass, SlotAction};

    struct FakeInverter {
        registers: Mutex<HashMap<CommandId, String>>,
        writes: Mutex<usize>,
        soc: u32,
    }

    impl FakeInverter {
        fn new(soc: u32) -> Self {
            Self {
                registers: Mutex::new(HashMap::new()),
                writes: Mutex::new(0),
                soc,
            }
        }
    }

    #[async_trait]
    impl InverterControl for FakeInverter {
        async fn read_state(&self, command: CommandId) -> Result<Option<String>> {
            Ok(self.registers.lock().get(&command).cloned())
        }

        async fn write_state(&self, command: CommandId, value: &str) -> Result<()> {
            *self.writes.lock() += 1;
            let mut registers = self.registers.lock();
            registers.insert(command, value.to_owned());
            if command == CommandId::SetCharge {
                registers.insert(CommandId::ReadChargeState, value.to_owned());
            }
            Ok(())
        }

        async fn battery_state(&self) -> Result<BatteryState> {
            Ok(BatteryState::new(self.soc, Utc::now()))
        }

        async fn energy_totals(&self) -> Result<EnergyDelta> {
            Ok(EnergyDelta::default())
        }

        fn name(&self) -> &str {
            "fake-inverter"
        }
    }

    struct FakePrices {
        points: Mutex<Option<Vec<PricePoint>>>,
    }

    impl FakePrices {
        fn with_dip(base: DateTime<Utc>) -> Self {
            let points = (0..48)
                .map(|i| PricePoint {
                    period_start: base + Duration::minutes(30 * i),
                    price: if (10..16).contains(&i) { 5.0 } else { 20.0 },
                })
                .collect();
            Self {
                points: Mutex::new(Some(points)),
            }
        }

        fn fail(&self) {
            *self.points.lock() = None;
        }
    }

    #[async_trait]
    impl PriceDataSource for FakePrices {
        async fn read_prices(&self) -> Result<Vec<PricePoint>> {
            self.points
                .lock()
                .clone()
                .ok_or_else(|| anyhow!("price feed down"))
        }

        fn name(&self) -> &str {
            "fake-prices"
        }
    }

    struct FakeForecast;

    #[async_trait]
    impl SolarForecastSource for FakeForecast {
        async fn read_forecast(&self) -> Result<Vec<ForecastPoint>> {
            Ok(Vec::new())
        }

        fn name(&self) -> &str {
            "fake-forecast"
        }
    }

    async fn build_pipeline(
        inverter: Arc<FakeInverter>,
        prices: Arc<FakePrices>,
        config: PlanConfig,
        dir: &tempfile::TempDir,
    ) -> Pipeline {
        let actuator =
            ChargeActuator::connect(Arc::clone(&inverter) as Arc<dyn InverterControl>, BackoffPolicy::default())
                .await;
        let recorder = HistoryRecorder::load(dir.path().join("history.csv"));
        Pipeline::new(
            inverter,
            prices,
            Arc::new(FakeForecast),
            actuator,
            config,
            recorder,
        )
    }

    fn test_config() -> PlanConfig {
        PlanConfig {
            full_charge_slot_count: 6,
            always_charge_below_price: -100.0,
            ..PlanConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_plans_and_actuates() {
        let base = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let inverter = Arc::new(FakeInverter::new(80));
        let prices = Arc::new(FakePrices::with_dip(base));
        let dir = tempfile::tempdir().unwrap();
        let pipeline = build_pipeline(Arc::clone(&inverter), prices, test_config(), &dir).await;

        pipeline.run_cycle(base + Duration::minutes(5)).await;

        let snapshot = pipeline.snapshot();
        assert_eq!(snapshot.slots.len(), 48);
        assert_eq!(snapshot.battery.soc_percent, 80);

        // The price dip became the cheapest charging window
        for slot in &snapshot.slots[10..16] {
            assert_eq!(slot.price_class, PriceClass::Cheapest);
            assert_eq!(slot.resolved_action(), SlotAction::Charge);
        }

        // Current slot is DoNothing: the device was told to clear its windows
        let packed = inverter
            .registers
            .lock()
            .get(&CommandId::SetCharge)
            .cloned()
            .unwrap();
        assert!(packed.starts_with("0,0,00:00-00:00,00:00-00:00"), "{packed}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_price_outage_keeps_last_plan() {
        let base = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let inverter = Arc::new(FakeInverter::new(80));
        let prices = Arc::new(FakePrices::with_dip(base));
        let dir = tempfile::tempdir().unwrap();
        let pipeline =
            build_pipeline(Arc::clone(&inverter), Arc::clone(&prices), test_config(), &dir).await;

        pipeline.run_cycle(base).await;
        assert_eq!(pipeline.snapshot().slots.len(), 48);

        prices.fail();
        pipeline.run_cycle(base + Duration::minutes(30)).await;

        // The previous sequence is still planned against
        let snapshot = pipeline.snapshot();
        assert_eq!(snapshot.slots.len(), 48);
        for slot in &snapshot.slots[10..16] {
            assert_eq!(slot.resolved_action(), SlotAction::Charge);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config_short_circuits() {
        let base = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let inverter = Arc::new(FakeInverter::new(80));
        let prices = Arc::new(FakePrices::with_dip(base));
        let dir = tempfile::tempdir().unwrap();

        let config = PlanConfig {
            full_charge_slot_count: 0,
            ..PlanConfig::default()
        };
        let pipeline = build_pipeline(Arc::clone(&inverter), prices, config, &dir).await;

        pipeline.run_cycle(base).await;

        assert!(pipeline.snapshot().slots.is_empty());
        assert_eq!(*inverter.writes.lock(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_override_survives_recompute() {
        let base = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let inverter = Arc::new(FakeInverter::new(80));
        let prices = Arc::new(FakePrices::with_dip(base));
        let dir = tempfile::tempdir().unwrap();
        let pipeline = build_pipeline(Arc::clone(&inverter), prices, test_config(), &dir).await;

        pipeline.run_cycle(base).await;

        // Slot 20 is DoNothing in the plan; the user forces a discharge
        let target = pipeline.snapshot().slots[20].start;
        pipeline
            .request_overrides(
                &[ChangeSlotActionRequest {
                    slot_start: target,
                    new_action: SlotAction::Discharge,
                }],
                base,
            )
            .await;

        let snapshot = pipeline.snapshot();
        assert_eq!(snapshot.slots[20].resolved_action(), SlotAction::Discharge);

        // Another plain recompute must not shed the override
        pipeline.run_cycle(base + Duration::minutes(30)).await;
        assert_eq!(
            pipeline.snapshot().slots[20].resolved_action(),
            SlotAction::Discharge
        );

        // Clearing returns the slot to its planned action
        pipeline.clear_overrides(base + Duration::minutes(30)).await;
        assert_eq!(
            pipeline.snapshot().slots[20].resolved_action(),
            SlotAction::DoNothing
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_records_one_row_per_slot() {
        let base = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let inverter = Arc::new(FakeInverter::new(80));
        let prices = Arc::new(FakePrices::with_dip(base));
        let dir = tempfile::tempdir().unwrap();
        let pipeline = build_pipeline(Arc::clone(&inverter), prices, test_config(), &dir).await;

        // Two cycles inside the same slot, one in the next
        pipeline.run_cycle(base).await;
        pipeline.run_cycle(base + Duration::minutes(10)).await;
        pipeline.run_cycle(base + Duration::minutes(30)).await;

        let state = pipeline.state.lock();
        assert_eq!(state.recorder.entries().len(), 2);
        assert_eq!(state.recorder.entries()[0].slot_start, base);
    }
}
