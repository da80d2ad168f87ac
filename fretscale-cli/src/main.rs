//! # fretscale - live note and scale listener
//!
//! Headless host for the detection pipeline. It owns the capture session,
//! drives the pipeline from a fixed-rate tick and reports every published
//! event through the logger, where a renderer would otherwise consume them.
//!
//! ## Architecture
//! - **Main Thread**: tick loop; the only writer of pipeline state
//! - **Audio Callback**: slices device audio into frames (inside `fretscale-core`)
//! - **Input Thread**: reads runtime commands from stdin
//! - **Communication**: crossbeam channels for ticks, commands and shutdown

mod report;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use crossbeam_channel::{Receiver, select};
use fretscale_core::{
    audio::{self, AudioInput},
    config::{PipelineConfig, SmoothingStrategy},
    pipeline::{Pipeline, PipelineEvent},
    scales::ScaleEngine,
};
use std::io::BufRead;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    MovingAverage,
    MedianWeighted,
}

impl From<StrategyArg> for SmoothingStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::MovingAverage => SmoothingStrategy::MovingAverage,
            StrategyArg::MedianWeighted => SmoothingStrategy::MedianWeighted,
        }
    }
}

/// Listens to an input device and reports detected notes and scales.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// List input devices and exit
    #[arg(long)]
    list_devices: bool,
    /// Input device name; the system default when omitted
    #[arg(long)]
    device: Option<String>,
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Smoothing strategy override
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,
    /// Consecutive agreeing frames before a note is emitted
    #[arg(long)]
    threshold: Option<u32>,
    /// Disable the F# minor tonality heuristic
    #[arg(long)]
    no_override: bool,
}

/// Messages handled by the main loop.
#[derive(Debug, Clone, PartialEq)]
enum Message {
    Tick,
    ListDevices,
    SwitchDevice(String),
    Reset,
    Exit,
}

/// Parses one line of stdin into a command. Unknown input gives `None`.
fn parse_command(line: &str) -> Option<Message> {
    let line = line.trim();
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    match word.to_ascii_lowercase().as_str() {
        "devices" | "list" => Some(Message::ListDevices),
        "device" | "switch" if !rest.trim().is_empty() => Some(Message::SwitchDevice(rest.trim().to_string())),
        "reset" => Some(Message::Reset),
        "quit" | "exit" | "q" => Some(Message::Exit),
        _ => None,
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.list_devices {
        for name in audio::list_input_devices().context("Failed to list input devices")? {
            println!("{name}");
        }
        return Ok(());
    }

    let config = load_config(&args)?;
    log::info!("Starting fretscale...");
    let mut app = ListenerApp::new(config, args.no_override);
    app.start(args.device.as_deref())?;
    app.run()?;
    log::info!("Application finished");
    Ok(())
}

fn load_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(strategy) = args.strategy {
        config.stabilizer.strategy = strategy.into();
    }
    if let Some(threshold) = args.threshold {
        config.stabilizer.confidence_threshold = threshold;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

struct ListenerApp {
    config: PipelineConfig,
    input: AudioInput,
    pipeline: Pipeline,
    events: Receiver<PipelineEvent>,
}

impl ListenerApp {
    fn new(config: PipelineConfig, no_override: bool) -> Self {
        let mut pipeline = if no_override {
            Pipeline::with_scale_engine(&config, ScaleEngine::with_override(config.history_length, None))
        } else {
            Pipeline::new(&config)
        };
        let events = pipeline.subscribe();
        Self {
            input: AudioInput::new(config.clone()),
            config,
            pipeline,
            events,
        }
    }

    fn start(&mut self, device: Option<&str>) -> Result<()> {
        self.input
            .start(device)
            .with_context(|| format!("Failed to start capture on {}", device.unwrap_or("the default input")))?;
        log::info!(
            "Listening on {} at {} Hz",
            self.input.device_name().unwrap_or("?"),
            self.input.sample_rate().unwrap_or(0)
        );
        Ok(())
    }

    /// Runs the tick loop until Ctrl-C or `quit`.
    fn run(&mut self) -> Result<()> {
        let ticker = crossbeam_channel::tick(Duration::from_millis(self.config.tick_interval_ms));
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
        ctrlc::set_handler(move || {
            let _ = shutdown_tx.try_send(());
        })
        .context("Failed to install Ctrl-C handler")?;
        let mut commands = spawn_command_reader();

        log::info!("Commands: devices | device <name> | reset | quit");
        loop {
            let message = select! {
                recv(ticker) -> _ => Some(Message::Tick),
                recv(commands) -> msg => msg.ok(),
                recv(shutdown_rx) -> _ => Some(Message::Exit),
            };
            let Some(message) = message else {
                // stdin closed; keep listening until Ctrl-C.
                commands = crossbeam_channel::never();
                continue;
            };
            if message == Message::Exit {
                break;
            }
            self.update(message);
        }

        log::info!("Stopping capture...");
        self.input.stop();
        Ok(())
    }

    fn update(&mut self, message: Message) {
        match message {
            Message::Tick => {
                self.pipeline.tick(&mut self.input);
                for event in self.events.try_iter() {
                    report::log_event(&event);
                }
            }
            Message::ListDevices => match audio::list_input_devices() {
                Ok(names) => {
                    for name in names {
                        log::info!("  {name}");
                    }
                }
                Err(e) => log::error!("Error listing devices: {e}"),
            },
            Message::SwitchDevice(name) => {
                self.pipeline.reset();
                match self.input.switch_device(&name) {
                    Ok(()) => log::info!("Now listening on {name}"),
                    Err(e) => log::error!("Could not switch to {name}: {e}; capture stopped"),
                }
            }
            Message::Reset => {
                self.pipeline.reset();
                log::info!("Pipeline state cleared");
            }
            Message::Exit => {}
        }
    }
}

fn spawn_command_reader() -> Receiver<Message> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            match parse_command(&line) {
                Some(message) => {
                    if tx.send(message).is_err() {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => log::warn!("Unknown command: {}", line.trim()),
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_runtime_commands() {
        assert_eq!(parse_command("devices"), Some(Message::ListDevices));
        assert_eq!(
            parse_command("device  USB Audio CODEC "),
            Some(Message::SwitchDevice("USB Audio CODEC".into()))
        );
        assert_eq!(parse_command("QUIT"), Some(Message::Exit));
        assert_eq!(parse_command("reset"), Some(Message::Reset));
        assert_eq!(parse_command("device"), None);
        assert_eq!(parse_command("play"), None);
    }

    #[test]
    fn cli_overrides_apply_over_defaults() {
        let args = Args::parse_from(["fretscale", "--strategy", "median-weighted", "--threshold", "6"]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.stabilizer.strategy, SmoothingStrategy::MedianWeighted);
        assert_eq!(config.stabilizer.confidence_threshold, 6);
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let args = Args::parse_from(["fretscale", "--threshold", "0"]);
        assert!(load_config(&args).is_err());
    }
}
