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

mod config;
mod sim;

use anyhow::Result;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

use sim::{NoForecast, SimulatedInverter, SyntheticPrices};
use solion_core::{BackoffPolicy, ChargeActuator, HistoryRecorder, InverterControl, Pipeline};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Handle command line arguments
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        match args[1].as_str() {
            "--help" | "-h" => {
                println!("SolION - Solis battery slot planner");
                println!("Version: {VERSION}");
                println!();
                println!("Usage: solion [CONFIG_FILE]");
                println!();
                println!("Options:");
                println!("  -h, --help    Print this help message");
                println!("  -v, --version Print version");
                return Ok(());
            }
            "--version" | "-v" => {
                println!("{VERSION}");
                return Ok(());
            }
            _ => {}
        }
    }

    // Initialize tracing with env filter support
    // Respects RUST_LOG environment variable
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = args
        .get(1)
        .map_or_else(|| PathBuf::from("config.toml"), PathBuf::from);
    let config = config::load_config(&config_path)?;

    info!("Starting SolION - Solis battery slot planner");
    info!("Configuration Summary:");
    info!("   Full charge: {} slots", config.plan.full_charge_slot_count);
    info!("   Max charge current: {}A", config.plan.max_charge_amps);
    info!(
        "   Low battery / minimum SOC: {}% / {}%",
        config.plan.low_battery_percent_threshold, config.plan.always_charge_below_soc
    );
    info!(
        "   Always charge below: {:.2}/kWh",
        config.plan.always_charge_below_price
    );
    info!(
        "   Overnight skip: {} (threshold {:.1} kWh, damp {:.2})",
        config.plan.skip_overnight_charge_if_forecast_good,
        config.plan.forecast_threshold_kwh,
        config.plan.forecast_damp_factor
    );
    info!("   Scheduled actions: {}", config.plan.scheduled_actions.len());
    info!("   Simulation mode: {}", config.plan.simulate_only);
    info!("   Update interval: {}s", config.system.update_interval_secs);
    info!("   History file: {}", config.system.history_file);

    let inverter: Arc<dyn InverterControl> =
        Arc::new(SimulatedInverter::new(config.system.simulated_battery_soc));
    let actuator = ChargeActuator::connect(Arc::clone(&inverter), BackoffPolicy::default()).await;
    let recorder = HistoryRecorder::load(&config.system.history_file);

    let pipeline = Pipeline::new(
        inverter,
        Arc::new(SyntheticPrices),
        Arc::new(NoForecast),
        actuator,
        config.plan.clone(),
        recorder,
    );

    let mut interval = tokio::time::interval(Duration::from_secs(config.system.update_interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                pipeline.run_cycle(Utc::now()).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested, stopping");
                break;
            }
        }
    }

    Ok(())
}
