//! footctl - footswitch MIDI controller
//!
//! Runs the controller tick loop against real MIDI ports: parameter traffic on the
//! device ports, switch levels from a pedal board.

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use std::rc::Rc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use footctl::clock::MonotonicClock;
use footctl::config::{AppConfig, Setup};
use footctl::display::Labels;
use footctl::hardware::{MemoryLeds, MidiPedalSwitch, PedalInput, SwitchDriver};
use footctl::transport::{list_ports, MidirTransport};
use footctl::{Controller, TickResult};

/// Tick period of the host loop
const TICK_INTERVAL: Duration = Duration::from_millis(1);

/// footctl - drive device parameters from a MIDI footswitch board
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// List available MIDI ports
    #[arg(long)]
    list_ports: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level)?;

    if args.list_ports {
        return list_ports_formatted();
    }

    info!("Starting footctl...");
    info!("Configuration file: {}", args.config);

    let config = AppConfig::load(&args.config).await?;
    let mut controller = build_controller(&config)?;

    run(&mut controller).await;

    info!("footctl shutdown complete");
    Ok(())
}

fn build_controller(config: &AppConfig) -> Result<Controller> {
    let midi = &config.midi;
    let clock = Rc::new(MonotonicClock::new());
    let transport = MidirTransport::connect(&midi.client_name, &midi.input_port, &midi.output_port)?;

    let pedals = match &midi.pedal_port {
        Some(port) => PedalInput::connect(&midi.client_name, port, midi.channel_index())?,
        None => {
            warn!("No pedal_port configured, switches stay released");
            PedalInput::detached(midi.channel_index()).1
        }
    }
    .into_shared();

    let leds = MemoryLeds::new(config.leds.pixel_count);
    let setup = Setup::new(config);
    let client = setup.client(Box::new(transport), clock.clone())?;

    setup
        .build(client, clock, Box::new(leds), |switch| {
            Ok(Box::new(MidiPedalSwitch::new(pedals.clone(), switch.pedal_cc)) as Box<dyn SwitchDriver>)
        })
        .context("Failed to set up controller")
}

async fn run(controller: &mut Controller) {
    let stop = controller.stop_handle();
    let mut interval = tokio::time::interval(TICK_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Ready to process MIDI events!");
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if controller.tick() == TickResult::Stop {
                    break;
                }
                print_labels(controller.labels_mut());
            }
            result = &mut shutdown => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                }
                info!("Shutdown signal received, stopping tick loop");
                stop.stop();
                break;
            }
        }
    }
    info!("Stopped after {} ticks", controller.ticks());
}

/// Console rendering of labels that changed since the last tick
fn print_labels(labels: &mut Labels) {
    for id in labels.take_dirty() {
        let (Some(name), Some(label)) = (labels.name(id), labels.get(id)) else {
            continue;
        };
        let color = label.back_color.scaled(label.brightness);
        println!(
            "{} {}",
            format!("[{}]", name).bold(),
            format!(" {} ", label.text).on_truecolor(color.0, color.1, color.2)
        );
    }
}

fn list_ports_formatted() -> Result<()> {
    let (inputs, outputs) = list_ports()?;

    println!("\n{}", "=== Available MIDI Ports ===".bold().cyan());
    for (title, ports) in [("Input Ports:", inputs), ("Output Ports:", outputs)] {
        println!("\n{}", title.bold());
        if ports.is_empty() {
            println!("  {}", "No ports found".dimmed());
        }
        for port in ports {
            println!("  {}", port.green());
        }
    }
    println!();
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}
