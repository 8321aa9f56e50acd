use std::path::Path;

use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use agenda::api::{AvailabilityQuery, Caller, ErrorBody, RecurrencePayload, SlotRecord};
use agenda::calendar;
use agenda::config::EngineConfig;
use agenda::engine::{GridStep, Snapshot, expand};
use agenda::tenant::TenantManager;

const USAGE: &str = "usage:
  agenda slots <tenant.json> <query.json>
  agenda expand <anchor YYYY-MM-DD> <recurrence.json>";

/// A tenant's records as exported by the persistence layer.
#[derive(Deserialize)]
struct TenantFile {
    tenant: String,
    #[serde(default)]
    timezone: Option<Tz>,
    #[serde(flatten)]
    snapshot: Snapshot,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(Path::new(path))?;
    Ok(serde_json::from_str(&raw)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = EngineConfig::from_env();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let arg = |i: usize| args.get(i).map(String::as_str).ok_or(USAGE);

    match arg(0)? {
        "slots" => {
            let file: TenantFile = read_json(arg(1)?)?;
            let mut query: AvailabilityQuery = read_json(arg(2)?)?;
            if query.intervalo_minutos.is_none() && config.grid != GridStep::default() {
                query.intervalo_minutos = Some(config.grid.minutes());
            }

            let manager = TenantManager::new(config.clone());
            let tz = file.timezone.unwrap_or(config.timezone);
            let engine = manager.get_or_create_in(&file.tenant, tz)?;
            engine.load(file.snapshot).await?;
            info!("tenant {} ready ({tz})", file.tenant);

            let now = calendar::now_ms();
            let caller = Caller::Authenticated { tenant: file.tenant.clone() };
            let outcome = match query.into_request(&caller, calendar::today(&tz, now), now) {
                Ok(resolved) => engine.slots(&resolved.request).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(slots) => {
                    let records: Vec<SlotRecord> =
                        slots.iter().map(|s| SlotRecord::from_slot(s, &tz)).collect();
                    println!("{}", serde_json::to_string_pretty(&records)?);
                }
                Err(e) => {
                    if e.is_fault() {
                        tracing::error!("slot query failed: {e}");
                    }
                    println!("{}", serde_json::to_string_pretty(&ErrorBody::from(&e))?);
                    std::process::exit(1);
                }
            }
        }
        "expand" => {
            let anchor: NaiveDate = arg(1)?.parse()?;
            let payload: RecurrencePayload = read_json(arg(2)?)?;
            let pattern = payload.into_pattern()?;
            let dates = expand(anchor, &pattern)?;
            info!("{} occurrence(s) from {anchor}", dates.len());
            println!("{}", serde_json::to_string_pretty(&dates)?);
        }
        other => {
            eprintln!("unknown command {other}\n{USAGE}");
            std::process::exit(2);
        }
    }
    Ok(())
}
