//! alert_export - list stored proximity alerts and optionally extract their images

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;

use proximity_guard::{AlertStore, SqliteAlertStore, StoredAlert};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the alert database.
    #[arg(long, env = "GUARD_DB_PATH", default_value = "proximity_guard.db")]
    db_path: String,
    /// Number of most recent alerts to export.
    #[arg(long, default_value_t = 50)]
    limit: usize,
    /// Directory to write each alert's JPEG into (alert-<id>.jpg).
    #[arg(long, value_name = "DIR")]
    images_dir: Option<PathBuf>,
    /// Write the listing here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Serialize)]
struct ExportedAlert {
    id: i64,
    created_at: String,
    created_at_ms: i64,
    distance_m: f64,
    image_len: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_file: Option<String>,
}

#[derive(Serialize)]
struct Export {
    db_path: String,
    alerts: Vec<ExportedAlert>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let mut store = SqliteAlertStore::open(&args.db_path)
        .with_context(|| format!("open alert database {}", args.db_path))?;
    let recent = store.recent(args.limit)?;

    if let Some(dir) = &args.images_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create image directory {}", dir.display()))?;
    }

    let mut alerts = Vec::with_capacity(recent.len());
    for alert in recent {
        let image_file = match &args.images_dir {
            Some(dir) => write_image(&mut store, dir, &alert)?,
            None => None,
        };
        let local: DateTime<Local> = alert.created_at().into();
        alerts.push(ExportedAlert {
            id: alert.id,
            created_at: local.to_rfc3339(),
            created_at_ms: alert.created_at_ms,
            distance_m: alert.distance_m,
            image_len: alert.image_len,
            image_file,
        });
    }

    let count = alerts.len();
    let export = Export {
        db_path: args.db_path.clone(),
        alerts,
    };
    let json = serde_json::to_string_pretty(&export)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json.as_bytes())
                .with_context(|| format!("write export to {}", path.display()))?;
            eprintln!("exported {} alerts to {}", count, path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn write_image(
    store: &mut SqliteAlertStore,
    dir: &std::path::Path,
    alert: &StoredAlert,
) -> Result<Option<String>> {
    let Some(bytes) = store.image(alert.id)? else {
        log::warn!("alert {} has no stored image", alert.id);
        return Ok(None);
    };
    let path = dir.join(format!("alert-{}.jpg", alert.id));
    std::fs::write(&path, &bytes).with_context(|| format!("write {}", path.display()))?;
    Ok(Some(path.display().to_string()))
}
