//! ROBERT client command-line driver.
//!
//! Runs one protocol operation per invocation against a persistent local
//! database, so the full lifecycle can be exercised from a shell.
//!
//! # Usage
//!
//! ```bash
//! # Register with a solved captcha
//! robert --server https://robert.example/api/v1 --pinned-cert server.pem \
//!     register --captcha-id 8f2c --captcha xk7p2
//!
//! # Periodic status check
//! robert --server https://robert.example/api/v1 --pinned-cert server.pem status
//!
//! # Local inspection, no network
//! robert info
//! robert export-csv --output contacts.csv
//! ```

use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use clap::{Parser, Subcommand};
use robert_client::{
    Session, SessionConfig, StatusOutcome, SystemEnv,
    transport::{HttpsConfig, HttpsServerApi, load_pinned_certificate},
};
use robert_core::{
    DEFAULT_RETENTION, ProximityRecorder, ProximityStore, RedbDatabase, RedbProximityStore,
    SessionStore, write_csv,
};
use robert_proto::ContactEncoding;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Database file inside the data directory
const DB_FILE: &str = "robert.redb";

/// ROBERT proximity-tracing client
#[derive(Parser, Debug)]
#[command(name = "robert")]
#[command(about = "ROBERT proximity-tracing client")]
#[command(version)]
struct Args {
    /// Server base URL, e.g. https://host/api/v1
    #[arg(long)]
    server: Option<String>,

    /// Pinned server certificate (PEM format)
    #[arg(long)]
    pinned_cert: Option<PathBuf>,

    /// Directory holding the local database
    #[arg(long, default_value = ".robert")]
    data_dir: PathBuf,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout_secs: u64,

    /// Upload contacts as a base64 CBOR blob instead of a JSON list
    #[arg(long)]
    binary_contacts: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register with the server
    Register {
        /// Captcha identifier issued by the server
        #[arg(long)]
        captcha_id: String,
        /// Captcha answer
        #[arg(long)]
        captcha: String,
    },
    /// Check exposure status and refresh epoch material
    Status,
    /// Report a positive diagnosis, then unregister
    Report {
        /// Verification code
        #[arg(long)]
        code: String,
    },
    /// Unregister and erase local data
    Unregister,
    /// Ask the server to forget this device's exposure history
    DeleteHistory,
    /// Show local session state
    Info,
    /// Export recorded proximities as CSV
    ExportCsv {
        /// Output file; stdout when omitted
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Drop proximities older than the retention window
    Prune {
        /// Retention in days
        #[arg(long, default_value = "14")]
        days: u64,
    },
    /// Erase every recorded proximity
    EraseProximities,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer().with_writer(io::stderr)).with(filter).init();

    fs::create_dir_all(&args.data_dir)?;
    let db = RedbDatabase::open(args.data_dir.join(DB_FILE))?;
    tracing::debug!(data_dir = %args.data_dir.display(), "database opened");

    match &args.command {
        Command::Info => info(&db),
        Command::ExportCsv { output } => export_csv(&db, output.as_deref()),
        Command::Prune { days } => {
            let retention = Duration::from_secs(days.saturating_mul(24 * 60 * 60));
            let removed = local_recorder(&db).prune_older_than(retention)?;
            writeln!(io::stdout().lock(), "pruned {removed} proximities")?;
            Ok(())
        },
        Command::EraseProximities => {
            let removed = local_recorder(&db).clear_all()?;
            writeln!(io::stdout().lock(), "erased {removed} proximities")?;
            Ok(())
        },
        remote => run_remote(&args, &db, remote).await,
    }
}

async fn run_remote(
    args: &Args,
    db: &RedbDatabase,
    command: &Command,
) -> Result<(), Box<dyn std::error::Error>> {
    let (Some(server), Some(cert_path)) = (&args.server, &args.pinned_cert) else {
        return Err("--server and --pinned-cert are required for network commands".into());
    };

    let request_timeout = Duration::from_secs(args.timeout_secs);
    let api = HttpsServerApi::new(HttpsConfig {
        base_url: server.clone(),
        pinned_certificate: load_pinned_certificate(&fs::read(cert_path)?)?,
        request_timeout,
    })?;

    let config = SessionConfig {
        request_timeout,
        retention: DEFAULT_RETENTION,
        contact_encoding: if args.binary_contacts {
            ContactEncoding::Binary
        } else {
            ContactEncoding::Json
        },
        ..SessionConfig::default()
    };
    let session =
        Session::open(api, db.session_store(), db.proximity_store(), SystemEnv::new(), config)?;

    let message = match command {
        Command::Register { captcha_id, captcha } => {
            session.register(captcha_id, captcha).await?;
            format!("registered, {} epochs stored", session.epoch_count())
        },
        Command::Status => match session.check_status().await? {
            StatusOutcome::NotAtRisk => "not at risk".to_owned(),
            StatusOutcome::AtRisk { last_exposure_timeframe } => {
                format!("AT RISK (last exposure timeframe: {last_exposure_timeframe:?})")
            },
        },
        Command::Report { code } => {
            if session.report(code).await?.unregistered_remotely {
                "report accepted, unregistered".to_owned()
            } else {
                "report accepted, unregistered locally only".to_owned()
            }
        },
        Command::Unregister => {
            session.unregister().await?;
            "unregistered".to_owned()
        },
        Command::DeleteHistory => {
            session.delete_exposure_history().await?;
            "exposure history deleted".to_owned()
        },
        Command::Info
        | Command::ExportCsv { .. }
        | Command::Prune { .. }
        | Command::EraseProximities => return Ok(()),
    };

    writeln!(io::stdout().lock(), "{message}")?;
    Ok(())
}

/// Recorder for commands that touch proximities without a session.
fn local_recorder(db: &RedbDatabase) -> ProximityRecorder<RedbProximityStore, SystemEnv> {
    ProximityRecorder::new(db.proximity_store(), SystemEnv::new())
}

fn info(db: &RedbDatabase) -> Result<(), Box<dyn std::error::Error>> {
    let session = db.session_store().load()?.unwrap_or_default();
    let proximities = db.proximity_store().len()?;

    let mut out = io::stdout().lock();
    writeln!(out, "registered:  {}", session.registered)?;
    writeln!(out, "sick:        {}", session.sick)?;
    writeln!(out, "epochs:      {}", session.epochs.len())?;
    if let Some(latest) = session.epochs.latest() {
        writeln!(out, "last epoch:  {}", latest.index)?;
    }
    writeln!(out, "proximities: {proximities}")?;
    match &session.last_status {
        Some(status) => writeln!(
            out,
            "last status: at_risk={} checked_at={}",
            status.at_risk, status.checked_at
        )?,
        None => writeln!(out, "last status: never checked")?,
    }
    Ok(())
}

fn export_csv(db: &RedbDatabase, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = local_recorder(db).export_all()?;
    let rows = match output {
        Some(path) => write_csv(&snapshot, File::create(path)?)?,
        None => write_csv(&snapshot, io::stdout().lock())?,
    };
    tracing::info!(rows, "proximities exported");
    Ok(())
}

#[cfg(test)]
mod tests {
    use robert_core::RawReception;

    use super::*;

    fn reception(ebid: u8) -> RawReception {
        RawReception {
            ebid: vec![ebid; 8],
            ecc: vec![1, 2],
            mac: vec![3; 4],
            time_from_hello_message: 5,
            rssi_raw: -70,
            rssi_calibrated: -65,
            tx_power: 0,
            received_at: None,
        }
    }

    #[test]
    fn erase_clears_through_recorder() {
        let dir = tempfile::tempdir().unwrap();
        let db = RedbDatabase::open(dir.path().join(DB_FILE)).unwrap();
        let recorder = local_recorder(&db);
        recorder.record(reception(1)).unwrap();
        recorder.record(reception(2)).unwrap();

        assert_eq!(local_recorder(&db).clear_all().unwrap(), 2);
        assert_eq!(db.proximity_store().len().unwrap(), 0);
    }
}
