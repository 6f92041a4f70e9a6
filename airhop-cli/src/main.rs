use std::{io::Write, net::IpAddr, path::PathBuf};

use airhop_cli::{
    config::{
        NetworkBackend, SavedConfig, Settings, config_path, load_config, save_config_with_retry,
    },
    logging::init_logging,
    prompt::StdinPrompt,
    wifi::{CliWifi, NmcliWifi, StaticWifi},
};
use airhop_session::{
    Collaborators, CredentialStrategy, Direction, NoBle, SessionEvent, SessionOptions,
    SessionRequest, SessionSlot, SessionSummary, format_duration, format_size, spawn_session,
};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "airhop", version, about = "Move files between nearby devices over WiFi")]
struct Cli {
    #[command(subcommand)]
    command: Command,
    /// Platform of the other device: android, ios, linux, mac or windows.
    #[arg(long, global = true)]
    peer: Option<String>,
    /// Platform of this device, when it cannot be detected.
    #[arg(long, global = true)]
    local: Option<String>,
    /// SSID shown on the other device, if any.
    #[arg(long, global = true)]
    ssid: Option<String>,
    /// Password shown on the other device. Prompted for when omitted.
    #[arg(long, global = true)]
    password: Option<String>,
    /// Peer address for `--network static`.
    #[arg(long, global = true)]
    peer_ip: Option<IpAddr>,
    #[arg(long, global = true)]
    port: Option<u16>,
    /// Wireless interface used for the hotspot or for joining.
    #[arg(long, global = true)]
    interface: Option<String>,
    #[arg(long, global = true, value_enum)]
    network: Option<NetworkBackend>,
    #[arg(long, global = true)]
    ble_retry_limit: Option<u32>,
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    /// Config file to use instead of the per-user one.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Store the platform, port, interface and network flags as defaults.
    #[arg(long, global = true)]
    save_defaults: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send files or folders.
    Send {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Receive into a folder.
    Receive {
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref());

    match run(cli).await {
        Ok(summary) => {
            info!(
                files = summary.files,
                skipped = summary.skipped,
                chunks = summary.data_chunks,
                "session finished"
            );
            println!(
                "Done: {} file(s), {} skipped, {} total.",
                summary.files,
                summary.skipped,
                format_size(summary.bytes)
            );
        }
        Err(err) => {
            error!("{err}");
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<SessionSummary, String> {
    let path = cli.config.clone().unwrap_or_else(config_path);
    let saved = if path.exists() {
        load_config(&path).unwrap_or_else(|err| {
            warn!("ignoring config at {}: {err}", path.display());
            SavedConfig::default()
        })
    } else {
        SavedConfig::default()
    };

    let overrides = SavedConfig {
        local_platform: cli.local.clone(),
        peer_platform: cli.peer.clone(),
        port: cli.port,
        interface: cli.interface.clone(),
        network: cli.network,
        ble_retry_limit: cli.ble_retry_limit,
    };
    let merged = saved.merged_with(&overrides);
    let settings = Settings::from_config(&merged)?;

    if cli.save_defaults {
        save_config_with_retry(&path, &merged)
            .map_err(|err| format!("failed to save {}: {err}", path.display()))?;
        info!("saved defaults to {}", path.display());
    }

    let wifi = match settings.network {
        NetworkBackend::Nmcli => CliWifi::Nmcli(NmcliWifi::new(settings.interface.clone())),
        NetworkBackend::Static => {
            CliWifi::Static(StaticWifi::new(cli.password.clone(), cli.peer_ip))
        }
    };
    let direction = match cli.command {
        Command::Send { paths } => Direction::Send(paths),
        Command::Receive { dir } => Direction::Receive(dir),
    };
    let request = SessionRequest {
        local: settings.local,
        peer: settings.peer,
        direction,
        strategy: CredentialStrategy::OutOfBand,
        options: SessionOptions {
            port: settings.port,
            ble_poll_limit: settings.ble_retry_limit,
            ..SessionOptions::default()
        },
    };

    let slot = SessionSlot::new();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let handle = spawn_session(
        &slot,
        request,
        Collaborators {
            wifi,
            ble: NoBle,
            oob: StdinPrompt::new(cli.ssid, cli.password),
        },
        events_tx,
    )
    .map_err(|err| err.to_string())?;

    let printer = tokio::spawn(print_events(events_rx));
    let cancel = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cleaning up");
            cancel.cancel();
        }
    });

    let result = handle.wait().await;
    let _ = printer.await;
    result.map_err(|err| err.to_string())
}

async fn print_events(mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Status(status) => println!("{status}"),
            SessionEvent::PeerResolved { peer, role } => {
                println!("Peer is {peer}; this device is {role:?}.")
            }
            SessionEvent::ShowCredentials { payload, as_qr } => {
                if as_qr {
                    println!("Scan or paste on the other device: {payload}");
                } else {
                    println!("Enter on the other device: {payload}");
                }
            }
            SessionEvent::FileStarted {
                index,
                total,
                name,
                size,
            } => println!("[{index}/{total}] {name} ({})", format_size(size)),
            SessionEvent::FileSkipped { name } => println!("{name} already present, skipped"),
            SessionEvent::Progress { percent } => {
                print!("\r{percent:>3}%");
                let _ = std::io::stdout().flush();
            }
            SessionEvent::FileCompleted { name, stats } => println!(
                "\r{name}: {} in {} ({:.2} Mbps)",
                format_size(stats.bytes),
                format_duration(stats.elapsed),
                stats.megabits_per_second()
            ),
            SessionEvent::Finished => {}
            SessionEvent::Failed(reason) => eprintln!("Transfer failed: {reason}"),
        }
    }
}
