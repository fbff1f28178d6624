//! Parcel tracker demo entry point.
//!
//! # Responsibility
//! - Drive the parcel lifecycle end-to-end against a database file.
//! - Keep output deterministic apart from storage-assigned numbers.
//!
//! # Configuration
//! - `PARCEL_DB_PATH`: database file, default `tracker.db`.
//! - `PARCEL_LOG_DIR`: absolute log directory; file logging is off when unset.
//! - `PARCEL_LOG_LEVEL`: `trace|debug|info|warn|error`, default per build mode.

use log::error;
use parcel_core::db::open_db;
use parcel_core::{
    core_version, default_log_level, init_logging, ClientId, ParcelRepository, ParcelService,
    ServiceResult, SqliteParcelStore,
};
use std::env;
use std::error::Error;
use std::process::ExitCode;

const DEFAULT_DB_PATH: &str = "tracker.db";
const DEMO_CLIENT: ClientId = 1;

struct CliConfig {
    db_path: String,
    log_dir: Option<String>,
    log_level: String,
}

impl CliConfig {
    fn from_env() -> Self {
        Self {
            db_path: env::var("PARCEL_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string()),
            log_dir: env::var("PARCEL_LOG_DIR").ok(),
            log_level: env::var("PARCEL_LOG_LEVEL")
                .unwrap_or_else(|_| default_log_level().to_string()),
        }
    }
}

fn main() -> ExitCode {
    let config = CliConfig::from_env();
    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("event=cli_run module=cli status=error error={err}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: &CliConfig) -> Result<(), Box<dyn Error>> {
    if let Some(log_dir) = config.log_dir.as_deref() {
        init_logging(&config.log_level, log_dir)?;
    }

    println!("parcel_core version={}", core_version());
    let conn = open_db(&config.db_path)?;
    let service = ParcelService::new(SqliteParcelStore::try_new(&conn)?);

    let parcel = service.register(DEMO_CLIENT, "Psk, Lenina 13")?;
    println!(
        "registered parcel {} for client {} at {}",
        parcel.number, parcel.client, parcel.created_at
    );
    print_client_parcels(&service, DEMO_CLIENT)?;

    service.change_address(parcel.number, "Psk, Lenina 15")?;
    println!("changed address of parcel {}", parcel.number);

    let status = service.next_status(parcel.number)?;
    println!("parcel {} is now {status}", parcel.number);

    // Expected to fail: the parcel left `registered`.
    match service.change_address(parcel.number, "Psk, Lenina 17") {
        Ok(()) => println!("address of parcel {} changed again", parcel.number),
        Err(err) => println!("address change rejected: {err}"),
    }
    print_client_parcels(&service, DEMO_CLIENT)?;

    let extra = service.register(DEMO_CLIENT, "Psk, Pushkina 3")?;
    println!("registered parcel {}", extra.number);
    service.delete(extra.number)?;
    println!("deleted parcel {}", extra.number);
    print_client_parcels(&service, DEMO_CLIENT)?;

    Ok(())
}

fn print_client_parcels<R: ParcelRepository>(
    service: &ParcelService<R>,
    client: ClientId,
) -> ServiceResult<()> {
    let parcels = service.client_parcels(client)?;
    println!("client {client} has {} parcel(s):", parcels.len());
    for parcel in parcels {
        println!(
            "  #{} status={} address={} created_at={}",
            parcel.number, parcel.status, parcel.address, parcel.created_at
        );
    }
    Ok(())
}
