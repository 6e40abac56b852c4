//! # pushcert
//!
//! Send one alert notification through APNs using a certificate archive.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use pushcert::config::{load_settings, load_settings_from_path, settings_path};
use pushcert::{CertificateConfig, Host, Payload, Priority, PushClient, PushSettings};
use tracing::info;

/// Certificate-authenticated APNs sender.
#[derive(Parser, Debug)]
#[command(name = "pushcert", about = "Send an APNs alert with a p12 client certificate")]
struct Cli {
    /// Settings file (defaults to `~/.pushcert/config.json` when present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Certificate archive name, without the `.p12` extension.
    #[arg(long)]
    name: Option<String>,

    /// Archive password.
    #[arg(long, env = "PUSHCERT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// `sandbox` or `production`.
    #[arg(long)]
    host: Option<Host>,

    /// Directory holding the archive.
    #[arg(long)]
    archive_dir: Option<PathBuf>,

    /// Device token.
    #[arg(long)]
    token: String,

    /// App bundle identifier (`apns-topic`).
    #[arg(long)]
    topic: String,

    /// Alert title.
    #[arg(long)]
    title: String,

    /// Alert body.
    #[arg(long)]
    body: String,

    /// Alert subtitle.
    #[arg(long)]
    subtitle: Option<String>,

    /// Badge count.
    #[arg(long)]
    badge: Option<u32>,

    /// `low`, `medium` or `immediate` (or 1, 5, 10).
    #[arg(long, default_value = "immediate")]
    priority: Priority,
}

impl Cli {
    /// Settings from the file (if any) with command-line flags on top.
    fn settings(&self) -> Result<PushSettings> {
        let mut settings = if let Some(path) = &self.config {
            load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings: {}", path.display()))?
        } else if settings_path().exists() {
            load_settings().context("Failed to load default settings")?
        } else {
            let Some(name) = &self.name else {
                bail!("--name is required when no settings file is available");
            };
            PushSettings::new(CertificateConfig::new(name.clone(), "", Host::default()))
        };

        if let Some(name) = &self.name {
            settings.certificate.name.clone_from(name);
        }
        if let Some(password) = &self.password {
            settings.certificate.password.clone_from(password);
        }
        if let Some(host) = self.host {
            settings.certificate.host = host;
        }
        if let Some(dir) = &self.archive_dir {
            settings.archive_dir = Some(dir.clone());
        }
        Ok(settings)
    }

    fn payload(&self) -> Payload {
        let mut payload = Payload::new(
            self.title.clone(),
            self.body.clone(),
            self.priority,
            self.token.clone(),
            self.topic.clone(),
        );
        if let Some(subtitle) = &self.subtitle {
            payload = payload.with_subtitle(subtitle.clone());
        }
        if let Some(badge) = self.badge {
            payload = payload.with_badge(badge);
        }
        payload
    }
}

fn init_subscriber() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_subscriber();
    let cli = Cli::parse();

    let settings = cli.settings()?;
    info!(
        name = %settings.certificate.name,
        host = %settings.certificate.host,
        "sending push"
    );

    let client = PushClient::from_settings(settings).context("Failed to build push client")?;
    let result = client.push(cli.payload()).await;
    client.shutdown().await;

    let receipt = result.context("Push failed")?;
    match receipt.apns_id {
        Some(id) => println!("delivered (status {}, apns-id {id})", receipt.status),
        None => println!("delivered (status {})", receipt.status),
    }
    Ok(())
}
