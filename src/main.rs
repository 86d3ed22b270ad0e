use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use fritz_vpn::coordinator::Notifier;
use fritz_vpn::notify::{DesktopNotifier, LogNotifier};
use fritz_vpn::{Config, FritzSession, TunnelMap, VpnCoordinator};

#[derive(Parser)]
#[command(name = "fritz-vpn")]
#[command(about = "Monitor and switch WireGuard VPN tunnels on a FritzBox")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current state of all VPN tunnels
    Status,
    /// Poll the FritzBox and report tunnel state changes
    Watch,
    /// Activate a VPN tunnel (by display name or connection key)
    On {
        /// Tunnel display name or connection key
        tunnel: String,
    },
    /// Deactivate a VPN tunnel (by display name or connection key)
    Off {
        /// Tunnel display name or connection key
        tunnel: String,
    },
    /// Generate default config file
    Init,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Set up logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = cli.config.unwrap_or_else(Config::default_path);

    match cli.command {
        Commands::Init => {
            info!("Generating default config...");
            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let config = Config::default();
            config.save(&config_path)?;
            println!("Created default config: {}", config_path.display());
            println!("Edit it to set host, username and password.");
        }
        Commands::Status => {
            let mut coordinator = build_coordinator(&config_path, LogNotifier)?;
            let tunnels = coordinator.refresh().await?;
            print_status(&tunnels);
            coordinator.close();
        }
        Commands::Watch => {
            let mut coordinator = build_coordinator(&config_path, DesktopNotifier)?;
            watch(&mut coordinator).await;
            coordinator.close();
        }
        Commands::On { tunnel } => {
            toggle_command(&config_path, &tunnel, true).await?;
        }
        Commands::Off { tunnel } => {
            toggle_command(&config_path, &tunnel, false).await?;
        }
    }

    Ok(())
}

fn build_coordinator<N: Notifier>(
    config_path: &PathBuf,
    notifier: N,
) -> Result<VpnCoordinator<FritzSession, N>, Box<dyn std::error::Error>> {
    if !config_path.exists() {
        return Err(format!(
            "No config file at {}. Run `fritz-vpn init` first.",
            config_path.display()
        )
        .into());
    }
    let config = Config::load(config_path)?;
    let fritz = &config.fritz;

    let password = if fritz.password.is_empty() {
        rpassword::prompt_password(format!("Password for {}@{}: ", fritz.username, fritz.host))?
    } else {
        fritz.password.clone()
    };

    let session = FritzSession::new(&fritz.host, &fritz.username, &password, fritz.protocol());
    Ok(VpnCoordinator::new(
        session,
        notifier,
        &fritz.host,
        fritz.poll_interval(),
    ))
}

fn print_status(tunnels: &TunnelMap) {
    if tunnels.is_empty() {
        println!("No VPN tunnels configured.");
        return;
    }
    let mut sorted: Vec<_> = tunnels.values().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));
    println!("{} VPN tunnel(s):", sorted.len());
    for tunnel in sorted {
        println!("  {:<24} {:<22} [{}]", tunnel.name, tunnel.status(), tunnel.key);
    }
}

/// Poll loop: one refresh per tick, state transitions printed as they
/// happen. Ticks that would overlap a slow refresh are skipped.
async fn watch<N: Notifier>(coordinator: &mut VpnCoordinator<FritzSession, N>) {
    let mut ticker = tokio::time::interval(coordinator.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        "Watching VPN tunnels every {}s, press Ctrl-C to stop",
        coordinator.poll_interval().as_secs()
    );

    let mut last = TunnelMap::new();
    let mut first_cycle = true;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match coordinator.refresh().await {
                    Ok(tunnels) => {
                        if first_cycle {
                            print_status(&tunnels);
                            first_cycle = false;
                        } else {
                            print_transitions(&last, &tunnels);
                        }
                        last = tunnels;
                    }
                    Err(err) => {
                        error!("{}", err);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }
}

// Connection keys are stable across polls, so a key join is enough to
// diff two snapshots.
fn print_transitions(last: &TunnelMap, current: &TunnelMap) {
    for (key, tunnel) in current {
        match last.get(key) {
            None => println!("+ {:<24} {}", tunnel.name, tunnel.status()),
            Some(previous) if previous.status() != tunnel.status() => {
                println!(
                    "~ {:<24} {} -> {}",
                    tunnel.name,
                    previous.status(),
                    tunnel.status()
                );
            }
            Some(_) => {}
        }
    }
    for (key, tunnel) in last {
        if !current.contains_key(key) {
            println!("- {:<24} removed", tunnel.name);
        }
    }
}

async fn toggle_command(
    config_path: &PathBuf,
    tunnel: &str,
    desired_active: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut coordinator = build_coordinator(config_path, LogNotifier)?;

    let tunnels = coordinator.refresh().await?;
    let Some(key) = resolve_key(&tunnels, tunnel) else {
        error!("No tunnel named '{}'", tunnel);
        print_status(&tunnels);
        coordinator.close();
        std::process::exit(1);
    };

    let verb = if desired_active { "activate" } else { "deactivate" };
    info!("Requesting {} of '{}'", verb, tunnel);

    let ok = coordinator.toggle(&key, desired_active).await?;
    coordinator.close();

    if ok {
        println!("Tunnel '{}' is now {}.", tunnel, if desired_active { "active" } else { "inactive" });
        Ok(())
    } else {
        error!("Failed to {} '{}'", verb, tunnel);
        std::process::exit(1);
    }
}

/// Accept either the router-assigned connection key or the display name.
fn resolve_key(tunnels: &TunnelMap, needle: &str) -> Option<String> {
    if tunnels.contains_key(needle) {
        return Some(needle.to_string());
    }
    tunnels
        .values()
        .find(|t| t.name.eq_ignore_ascii_case(needle))
        .map(|t| t.key.clone())
}
