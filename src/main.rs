use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use timer_switch::*;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration and print the normalized schedules
    Check {
        /// Configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Print the status the switch would show right now
    Status {
        /// Configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Run the timer switch until interrupted
    Run {
        /// Configuration file
        #[arg(short, long)]
        config: PathBuf,
        /// Drive an LED strip with this MAC address or id ("any" for the first found)
        #[arg(short, long)]
        device: Option<String>,
    },
}

#[tokio::main]
#[instrument]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("timer_switch=info")),
        )
        .compact()
        .init();

    color_eyre::install()?;

    let cli = Cli::parse();
    debug!("Parsed command line arguments");

    match cli.command {
        Commands::Check { config } => check(&config)?,
        Commands::Status { config } => status(&config)?,
        Commands::Run { config, device } => run(&config, device.as_deref()).await?,
    }

    Ok(())
}

/// Print every normalized schedule
#[instrument]
fn check(path: &Path) -> Result<()> {
    let config = SwitchConfig::load(path)?;
    let now = SystemClock.now();
    let schedule = config.schedule(now)?;

    println!(
        "{} schedule(s){}",
        schedule.count(),
        if config.disabled { " (disabled)" } else { "" }
    );
    for interval in schedule.iter() {
        println!(
            "{}  on {}  off {}{}",
            interval.id,
            interval.on.format("%Y-%m-%d %H:%M:%S"),
            interval.off.format("%Y-%m-%d %H:%M:%S"),
            if interval.active { "  active" } else { "" }
        );
    }
    Ok(())
}

/// Evaluate the schedule at the current time and print the status line
#[instrument]
fn status(path: &Path) -> Result<()> {
    let config = SwitchConfig::load(path)?;
    let now = SystemClock.now();
    let mut driver = TimerDriver::new(config.schedule(now)?, LogSink);
    if config.disabled {
        driver.disable();
    }
    driver.start(now);
    driver.fire_due(now);

    println!("{}", Status::capture(&driver, now));
    Ok(())
}

/// Run the switch in the foreground, optionally driving an LED strip
#[instrument]
async fn run(path: &Path, device: Option<&str>) -> Result<()> {
    let config = SwitchConfig::load(path)?;

    let led = match device {
        Some(addr) => {
            let addr = (addr != "any").then_some(addr);
            Some(LedSwitch::connect(addr).await?)
        }
        None => None,
    };

    let (sink, mut alarms) = ChannelSink::channel();
    let mut driver = TimerDriver::new(config.schedule(SystemClock.now())?, sink);
    if config.disabled {
        driver.disable();
    }
    let handle = SwitchService::spawn(driver, SystemClock);
    let mut gate = config.output_gate();

    let status = handle.status().await?;
    info!("Timer switch started: {}", status);
    drive(&mut gate, led.as_ref(), &status).await;

    loop {
        tokio::select! {
            alarm = alarms.recv() => {
                let Some(alarm) = alarm else { break };
                debug!("Alarm {:?}", alarm.kind);
                let status = handle.status().await?;
                info!("{}", status);
                drive(&mut gate, led.as_ref(), &status).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    handle.shutdown().await?;
    Ok(())
}

/// Send the state downstream if it changed
async fn drive(gate: &mut OutputGate, led: Option<&LedSwitch>, status: &Status) {
    let Some(output) = gate.emit(status.state) else {
        return;
    };
    println!("{output}");

    if let (Some(led), Some(state)) = (led, status.state) {
        if let Err(e) = led.apply(state).await {
            error!("Failed to switch LED strip {}: {}", state, e);
        }
    }
}
