use std::path::{Path, PathBuf};

use clap::Parser;
use color_eyre::eyre::Result;
use timer_switch::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Line-oriented timer switch daemon.
///
/// Reads commands from stdin (on, off, pause, resume, disable, restart,
/// status, reload) and answers each with `OK`, `STATUS <text>` or
/// `ERR <message>`. Every output change is printed as
/// `SEND [<topic> ]<payload>`.
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Configuration file
    config: PathBuf,
    /// Drive an LED strip with this MAC address or id ("any" for the first found)
    #[arg(short, long)]
    device: Option<String>,
}

struct Daemon {
    config_path: PathBuf,
    handle: SwitchHandle,
    gate: OutputGate,
    led: Option<LedSwitch>,
}

impl Daemon {
    /// Applies one upstream command and returns the reply line
    async fn command(&mut self, command: Command) -> Result<String> {
        let status = match command {
            Command::Manual(state) => self.handle.manual(state).await?,
            Command::Pause => self.handle.pause().await?,
            Command::Resume => self.handle.resume().await?,
            Command::Disable => self.handle.disable().await?,
            Command::Restart => {
                self.gate.restart();
                self.handle.status().await?
            }
            Command::Status => {
                let status = self.handle.status().await?;
                return Ok(format!("STATUS {status}"));
            }
            Command::Reload => {
                let config = load(&self.config_path)?;
                let schedule = config.schedule(SystemClock.now())?;
                self.gate = config.output_gate();
                let status = self.handle.reconfigure(schedule).await?;
                if config.disabled {
                    self.handle.disable().await?
                } else {
                    status
                }
            }
        };

        self.send(&status).await;
        Ok("OK".to_string())
    }

    /// Forwards the state downstream when it changed
    async fn send(&mut self, status: &Status) {
        debug!("Status: {}", status);
        let Some(output) = self.gate.emit(status.state) else {
            return;
        };
        println!("SEND {output}");

        if let (Some(led), Some(state)) = (&self.led, status.state) {
            if let Err(e) = led.apply(state).await {
                error!("Failed to switch LED strip {}: {}", state, e);
            }
        }
    }
}

fn load(path: &Path) -> Result<SwitchConfig> {
    Ok(SwitchConfig::load(path)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr, stdout carries the protocol
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("timer_switch=info")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();

    color_eyre::install()?;

    let args = Args::parse();
    let config = load(&args.config)?;

    let led = match args.device.as_deref() {
        Some(addr) => Some(LedSwitch::connect((addr != "any").then_some(addr)).await?),
        None => None,
    };

    let (sink, mut alarms) = ChannelSink::channel();
    let mut driver = TimerDriver::new(config.schedule(SystemClock.now())?, sink);
    if config.disabled {
        driver.disable();
    }

    let mut daemon = Daemon {
        config_path: args.config,
        handle: SwitchService::spawn(driver, SystemClock),
        gate: config.output_gate(),
        led,
    };

    let status = daemon.handle.status().await?;
    info!("Timer switch started: {}", status);
    daemon.send(&status).await;

    // Inform about successful initialization
    println!("OK");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("stdin closed, shutting down");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }

                match line.parse::<Command>() {
                    Ok(command) => match daemon.command(command).await {
                        Ok(reply) => println!("{reply}"),
                        Err(e) => {
                            warn!("Command {:?} failed: {}", command, e);
                            println!("ERR {e}");
                        }
                    },
                    Err(e) => println!("ERR {e}"),
                }
            }
            alarm = alarms.recv() => {
                let Some(alarm) = alarm else { break };
                debug!("Alarm {:?}", alarm.kind);
                let status = daemon.handle.status().await?;
                daemon.send(&status).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    daemon.handle.shutdown().await?;
    Ok(())
}
