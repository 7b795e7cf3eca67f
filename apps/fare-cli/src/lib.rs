use std::io::Write;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fare_engine::{FareEngine, FareEngineConfig, FareRequest, TripMode, TripType};
use serde_json::{Value, json};
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "fare")]
#[command(about = "Resolve, quote, and manage cached taxi fares")]
pub struct FareCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the canonical id for a raw vehicle identifier
    Resolve {
        raw: String,
    },
    /// Quote one fare
    Quote {
        #[command(flatten)]
        trip: TripArgs,
        #[arg(long)]
        vehicle: String,
        /// Local package id, e.g. 8hrs-80km
        #[arg(long)]
        package: Option<String>,
        /// Skip throttle and cache
        #[arg(long)]
        force: bool,
        /// Reconcile against the confirmed fare for this vehicle and trip
        #[arg(long)]
        booking: bool,
    },
    /// Quote several vehicles sequentially
    Bulk {
        #[command(flatten)]
        trip: TripArgs,
        #[arg(long, value_delimiter = ',', required = true)]
        vehicles: Vec<String>,
        #[arg(long)]
        force: bool,
    },
    /// Show the pricing tier and sanity ranges for a vehicle
    Tiers {
        vehicle: String,
    },
    /// Clear cached fares, optionally for one trip type
    Clear {
        #[arg(long)]
        trip: Option<TripType>,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct TripArgs {
    #[arg(long)]
    pub trip: TripType,
    #[arg(long, default_value_t = 0.0)]
    pub distance: f64,
    #[arg(long, default_value = "one-way")]
    pub mode: TripMode,
}

impl TripArgs {
    #[must_use]
    pub fn request(&self, vehicle_id: &str, package_id: Option<String>) -> FareRequest {
        FareRequest {
            vehicle_id: vehicle_id.to_string(),
            trip_type: self.trip,
            distance_km: self.distance,
            trip_mode: self.mode,
            package_id,
        }
    }
}

pub async fn run(cli: FareCli) -> Result<()> {
    let config = FareEngineConfig::from_env().context("load fare engine config")?;
    debug!(?config, "loaded fare engine config");
    let engine = FareEngine::from_config(&config).context("build fare engine")?;
    let output = execute(&engine, cli.command).await?;
    emit(&output)
}

async fn execute(engine: &FareEngine, command: Commands) -> Result<Value> {
    match command {
        Commands::Resolve { raw } => {
            let canonical = engine.resolver().resolve(raw.as_str())?;
            Ok(json!({ "raw": raw, "canonicalId": canonical }))
        }
        Commands::Quote {
            trip,
            vehicle,
            package,
            force,
            booking,
        } => {
            let request = trip.request(vehicle.as_str(), package);
            let resolution = if booking {
                engine.booking_quote(&request).await?
            } else {
                engine.quote(&request, force).await?
            };
            Ok(serde_json::to_value(resolution)?)
        }
        Commands::Bulk {
            trip,
            vehicles,
            force,
        } => {
            let requests = vehicles
                .iter()
                .map(|vehicle| trip.request(vehicle.as_str(), None))
                .collect::<Vec<_>>();
            let resolutions = engine.quote_all(&requests, force).await?;
            let rows = vehicles
                .iter()
                .zip(resolutions)
                .map(|(vehicle, resolution)| {
                    let resolution = serde_json::to_value(resolution)?;
                    Ok(json!({ "vehicle": vehicle, "resolution": resolution }))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::Array(rows))
        }
        Commands::Tiers { vehicle } => {
            let canonical = engine.resolver().resolve(vehicle.as_str())?;
            let catalog = engine.catalog();
            let ranges = TripType::ALL
                .iter()
                .map(|trip_type| {
                    let (min, max) = catalog.valid_range(&canonical, *trip_type);
                    (trip_type.to_string(), json!({ "min": min, "max": max }))
                })
                .collect::<serde_json::Map<_, _>>();
            Ok(json!({
                "canonicalId": canonical,
                "tier": catalog.tier_for(&canonical),
                "validRanges": ranges,
            }))
        }
        Commands::Clear { trip: Some(trip_type) } => {
            let removed = engine.clear_cache_for(trip_type)?;
            Ok(json!({ "trip": trip_type, "removed": removed }))
        }
        Commands::Clear { trip: None } => Ok(serde_json::to_value(engine.clear_cache()?)?),
    }
}

fn emit(value: &Value) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}
