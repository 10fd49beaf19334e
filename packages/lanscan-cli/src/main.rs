//! lanscan CLI - discover and classify hosts on the local IPv4 subnet
//!
//! This binary can:
//! - List local IPv4 interfaces
//! - Sweep a subnet and identify the hosts that answer
//! - Rebuild the OUI vendor table from an IEEE-style text listing
//! - Show the effective configuration

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use lanscan_core::config::{self, OsHintMode, Settings};
use lanscan_core::interfaces::{self, LocalInterface};
use lanscan_core::scanner::{
    NmapFingerprinter, ScanEngine, ScanReport, TcpConnectProbe, TtlFingerprinter, UNKNOWN,
    VendorTable, privileges,
};
use lanscan_core::ScanError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "lanscan")]
#[command(version)]
#[command(about = "Discover, identify and classify hosts on the local IPv4 subnet")]
#[command(long_about = "
lanscan pings every host address of a local IPv4 subnet, resolves the MAC
address of each host that answers, looks up its vendor and guesses what kind
of device it is.

Quick start:
  1. Pick an interface:  lanscan interfaces
  2. Run a scan:         lanscan scan --interface 0
  3. Scripted output:    lanscan scan --format json

Press Ctrl+C during a scan to stop early and print what was found so far.
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Read settings from this config file instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan a subnet for active hosts
    Scan(ScanArgs),

    /// List local IPv4 interfaces
    #[command(alias = "ifaces")]
    Interfaces,

    /// Manage the OUI vendor table
    Oui {
        #[command(subcommand)]
        command: OuiCommand,
    },

    /// Show configuration paths and settings
    Config,
}

#[derive(clap::Args)]
pub struct ScanArgs {
    /// Interface to scan from, by index or name (see `lanscan interfaces`)
    #[arg(short, long, conflicts_with = "address")]
    interface: Option<String>,

    /// Address inside the subnet to scan (dotted quad)
    #[arg(short, long, requires = "mask")]
    address: Option<String>,

    /// Subnet mask, dotted (255.255.255.0) or prefix length (24)
    #[arg(short, long, requires = "address")]
    mask: Option<String>,

    /// Probe hosts in random order
    #[arg(long)]
    shuffle: bool,

    /// Refuse ranges with more usable hosts than this
    #[arg(long)]
    max_hosts: Option<u64>,

    /// Maximum number of hosts probed at once
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Ping timeout per attempt in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Ping attempts per host
    #[arg(long)]
    retries: Option<u32>,

    /// OS hint used when the vendor says nothing: off, ttl or nmap
    #[arg(long)]
    os_hint: Option<OsHintMode>,

    /// Check active hosts for commonly exposed TCP ports
    #[arg(long)]
    exposure: bool,

    /// Path to an oui.json vendor table
    #[arg(long)]
    vendors: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum OuiCommand {
    /// Build or extend an oui.json table from a `<prefix> <vendor>` text listing
    Build {
        /// Text listing, e.g. the IEEE oui.txt
        input: PathBuf,
        /// JSON table to create or extend (existing entries win)
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so JSON on stdout stays clean
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    format!("lanscan={},lanscan_core={}", log_level, log_level).into()
                }),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Scan(args) => cmd_scan(&cli, args).await,
        Commands::Interfaces => cmd_interfaces(&cli).await,
        Commands::Oui { command } => match command {
            OuiCommand::Build { input, output } => cmd_oui_build(&cli, input, output),
        },
        Commands::Config => cmd_config(&cli),
    }
}

fn user_error(e: ScanError) -> anyhow::Error {
    anyhow!(e.user_message())
}

async fn local_interfaces() -> Result<Vec<LocalInterface>> {
    tokio::task::spawn_blocking(interfaces::list_local_interfaces)
        .await
        .context("Interface enumeration task failed")
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    match &cli.config {
        Some(path) => config::load_settings_from(path),
        None => Ok(config::load_settings()),
    }
}

fn apply_scan_flags(settings: &mut Settings, args: &ScanArgs) {
    settings.concurrency.override_with(args.concurrency);
    settings.timeout_ms.override_with(args.timeout_ms);
    settings.retries.override_with(args.retries);
    settings.shuffle.override_with(args.shuffle.then_some(true));
    settings.max_hosts.override_with(args.max_hosts);
    settings.os_hint.override_with(args.os_hint);
    settings.exposure.override_with(args.exposure.then_some(true));
    settings.vendors_path.override_with(args.vendors.clone().map(Some));
}

async fn cmd_scan(cli: &Cli, args: &ScanArgs) -> Result<()> {
    let mut settings = load_settings(cli)?;
    apply_scan_flags(&mut settings, args);

    let local = local_interfaces().await?;
    let explicit = args.address.as_deref().zip(args.mask.as_deref());
    let (range, local_mac) =
        interfaces::scan_target(&local, explicit, args.interface.as_deref()).map_err(user_error)?;

    let caps = privileges::detect_capabilities().await;
    tracing::info!(
        "Capabilities: mode={}, ping={}, neighbors={}, elevated={}",
        caps.mode,
        caps.can_ping,
        caps.can_read_neighbors,
        caps.is_elevated
    );
    if let Some(warning) = &caps.warning {
        tracing::warn!("{}", warning);
        if matches!(cli.format, OutputFormat::Text) {
            eprintln!("{}", privileges::format_capabilities_message(&caps));
        }
    }

    let vendors = VendorTable::load_or_empty(settings.vendors_path.value.as_deref());
    if vendors.is_empty() {
        tracing::warn!("No vendor table loaded; vendors will be reported as {}", UNKNOWN);
    }

    let ping_timeout = Duration::from_millis(settings.timeout_ms.value);
    let mut engine =
        ScanEngine::system(vendors, ping_timeout).with_classifier(settings.classifier());
    engine = match settings.os_hint.value {
        OsHintMode::Off => engine,
        OsHintMode::Ttl => engine.with_fingerprinter(Arc::new(TtlFingerprinter)),
        OsHintMode::Nmap => engine.with_fingerprinter(Arc::new(NmapFingerprinter::default())),
    };
    if settings.exposure.value {
        engine = engine.with_exposure_probe(Arc::new(TcpConnectProbe));
    }

    let mut options = settings.scan_options();
    options.local_mac = local_mac;

    if matches!(cli.format, OutputFormat::Text) {
        println!(
            "Scanning {} ({} hosts, {} at a time)...",
            range,
            range.host_count(),
            options.concurrency
        );
    }

    let session = engine.start_scan(range, options).map_err(user_error)?;

    let token = session.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, stopping scan");
            token.cancel();
        }
    });

    let report = match cli.format {
        OutputFormat::Text => {
            session
                .wait_with(|p| println!("[{:>3}%] {} {}", p.percent, p.ip, p.status))
                .await
        }
        OutputFormat::Json => session.wait().await,
    }
    .ok_or_else(|| anyhow!("Scan ended without a report"))?;

    match cli.format {
        OutputFormat::Text => print_report(&report),
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn print_report(report: &ScanReport) {
    println!();
    println!(
        "Scan {} in {:.1}s: {} of {} hosts probed, {} active",
        report.state,
        report.elapsed_secs,
        report.hosts_scanned,
        report.hosts_total,
        report.results.len()
    );
    println!(
        "Network {}  local {}  gateway {}",
        report.network, report.local_address, report.gateway
    );
    println!();

    for result in &report.results {
        let time_str = result
            .response_time_ms
            .map(|t| format!("{:.1}ms", t))
            .unwrap_or_else(|| "-".to_string());
        let os_str = result
            .os_hint
            .map(|os| format!("  [{}]", os))
            .unwrap_or_default();

        println!(
            "  {:15} {:17} {:>8}  {} ({}){}",
            result.ip, result.mac, time_str, result.device_type, result.vendor, os_str
        );
        if let Some(exposure) = &result.exposure {
            println!("  {:15} {}", "", exposure);
        }
    }
}

async fn cmd_interfaces(cli: &Cli) -> Result<()> {
    let local = local_interfaces().await?;

    match cli.format {
        OutputFormat::Text => {
            if local.is_empty() {
                println!("No local IPv4 interfaces found.");
                return Ok(());
            }
            for (index, iface) in local.iter().enumerate() {
                println!(
                    "  [{}] {:10} {:15} {:15} {:17} {}",
                    index,
                    iface.name,
                    iface.address,
                    iface.mask,
                    iface.mac_or_unknown(),
                    iface.description
                );
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&local)?);
        }
    }

    Ok(())
}

fn cmd_oui_build(cli: &Cli, input: &Path, output: &Path) -> Result<()> {
    let text = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;

    let mut table = if output.exists() {
        VendorTable::try_load(output).map_err(user_error)?
    } else {
        VendorTable::new()
    };
    let existing = table.len();

    let report = table.merge_text(&text);
    table.save(output)?;

    match cli.format {
        OutputFormat::Text => {
            println!(
                "Wrote {} with {} prefixes ({} existing, {} added, {} lines skipped)",
                output.display(),
                table.len(),
                existing,
                report.added,
                report.skipped_lines
            );
            if !report.duplicates.is_empty() {
                println!();
                println!(
                    "{} duplicate prefixes kept their existing vendor:",
                    report.duplicates.len()
                );
                for prefix in &report.duplicates {
                    println!("  {}", prefix);
                }
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::json!({
                "output": output.display().to_string(),
                "total": table.len(),
                "added": report.added,
                "skipped_lines": report.skipped_lines,
                "duplicates": report.duplicates,
            }));
        }
    }

    Ok(())
}

fn cmd_config(cli: &Cli) -> Result<()> {
    let settings = load_settings(cli)?;
    let config_path = match &cli.config {
        Some(path) => path.display().to_string(),
        None => config::get_config_file_path_string(),
    };
    let rows = settings.describe();

    match cli.format {
        OutputFormat::Text => {
            println!("Configuration");
            println!("=============");
            println!();
            println!("Config file: {}", config_path);
            println!();
            for (name, value, source) in &rows {
                println!("  {:20} {} (from {})", name, value, source);
            }
            println!();
            println!("Environment variables:");
            println!("  {} - Maximum hosts probed at once", config::ENV_CONCURRENCY);
            println!("  {} - Ping timeout in milliseconds", config::ENV_TIMEOUT_MS);
            println!("  {} - Probe hosts in random order (true/false)", config::ENV_SHUFFLE);
            println!("  {} - Path to an oui.json vendor table", config::ENV_OUI_PATH);
            println!();
            println!("Example config.toml:");
            println!();
            println!("{}", config::generate_example_config());
        }
        OutputFormat::Json => {
            let values: serde_json::Map<String, serde_json::Value> = rows
                .iter()
                .map(|(name, value, source)| {
                    (
                        name.to_string(),
                        serde_json::json!({ "value": value, "source": source.to_string() }),
                    )
                })
                .collect();
            println!("{}", serde_json::json!({
                "config_file": config_path,
                "settings": values,
            }));
        }
    }

    Ok(())
}
