//! # ms2000
//!
//! Command-line access to an ASI MS-2000 controller.
//!
//! ```bash
//! # Read the position using ms2000.toml
//! ms2000 position
//!
//! # Move X by +500 um, leave Y where it is
//! ms2000 move 500 _
//!
//! # Absolute move without waiting for completion
//! ms2000 move --absolute --no-wait 0 0
//!
//! # Dry run against the simulated controller
//! ms2000 --mock -v light pwm
//! ```

use anyhow::{Context, Result};
use asi_stage::adapters::{MockDevice, Transport};
use asi_stage::config::StageConfig;
use asi_stage::{AxisId, Controller, IlluminationState, LeadScrew, Setpoint, StageSetup};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// ASI MS-2000 stage and LED controller
#[derive(Parser, Debug)]
#[command(name = "ms2000")]
#[command(version)]
#[command(about = "Control an ASI MS-2000 stage and LED controller")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "ms2000.toml")]
    config: PathBuf,

    /// Talk to a simulated controller instead of the serial port
    #[arg(long)]
    mock: bool,

    /// Log every wire exchange (overrides RUST_LOG)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the firmware version
    Version,
    /// Print the stage position (um)
    Position,
    /// Move the stage (um per axis, `_` keeps an axis)
    Move {
        /// Targets are absolute positions rather than offsets
        #[arg(long)]
        absolute: bool,
        /// Return without waiting for the move to finish
        #[arg(long)]
        no_wait: bool,
        /// One value per configured axis
        #[arg(required = true, allow_negative_numbers = true)]
        values: Vec<String>,
    },
    /// Print or set the velocity (mm/s per axis, `_` keeps an axis)
    Velocity {
        /// One value per configured axis; none to print
        values: Vec<String>,
    },
    /// Set the illumination state (off, on, pwm, external)
    Light {
        /// Target state
        state: String,
    },
    /// Set the LED intensity in pwm state (1-99 %)
    Intensity {
        /// Duty cycle in percent
        percent: u32,
    },
    /// Print the effective configuration
    ShowConfig,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = StageConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let directive = log_directive(
        args.verbose,
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
        &config.logging.level,
    );
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directive))
        .init();

    if let Command::ShowConfig = args.command {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    if args.mock {
        if config.stage.is_none() {
            config.stage = Some(demo_stage());
        }
        info!("using simulated controller");
        let controller =
            Controller::with_transport(MockDevice::new(), config.controller_options())
                .context("opening simulated controller")?;
        run(controller, args.command)
    } else {
        let controller = config
            .open()
            .with_context(|| format!("opening {}", config.controller.port))?;
        run(controller, args.command)
    }
}

fn run<T: Transport>(mut controller: Controller<T>, command: Command) -> Result<()> {
    match command {
        Command::Version => println!("{}", controller.version()),
        Command::Position => {
            let position = controller.get_position_um()?;
            print_per_axis(&controller, &position, "um");
        }
        Command::Move {
            absolute,
            no_wait,
            values,
        } => {
            let request = parse_setpoints(&values)?;
            controller.move_um(&request, !absolute, !no_wait)?;
            if !no_wait {
                print_per_axis(&controller, controller.position_um(), "um");
            }
        }
        Command::Velocity { values } => {
            if !values.is_empty() {
                controller.set_velocity_mmps(&parse_setpoints(&values)?)?;
            }
            let velocity = controller.get_velocity_mmps()?;
            print_per_axis(&controller, &velocity, "mm/s");
        }
        Command::Light { state } => {
            let state: IlluminationState = state.parse()?;
            controller.set_illumination(state)?;
            println!("illumination = {}", state);
            // Closing switches the light off, so only release the port here.
            return Ok(());
        }
        Command::Intensity { percent } => {
            controller.set_intensity(percent)?;
            println!("intensity = {} %", percent);
            return Ok(());
        }
        Command::ShowConfig => {}
    }
    controller.close()?;
    Ok(())
}

/// Filter directive: `-v` first, then `RUST_LOG`, then the configured level.
fn log_directive(verbose: bool, rust_log: Option<String>, level: &str) -> String {
    if verbose {
        return "debug".to_string();
    }
    rust_log
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| level.to_string())
}

fn parse_setpoints(values: &[String]) -> Result<Vec<Setpoint>> {
    values
        .iter()
        .map(|v| v.parse::<Setpoint>().with_context(|| format!("parsing '{}'", v)))
        .collect()
}

fn print_per_axis<T: Transport>(controller: &Controller<T>, values: &[f64], unit: &str) {
    for (axis, value) in controller.axes().iter().zip(values) {
        println!("{} = {} {}", axis, value, unit);
    }
}

/// XY stage used for dry runs when no stage is configured.
fn demo_stage() -> StageSetup {
    StageSetup::new(
        vec![AxisId::X, AxisId::Y],
        vec![LeadScrew::Standard, LeadScrew::Standard],
        vec![-50.0, -25.0],
        vec![50.0, 25.0],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_overrides_rust_log() {
        assert_eq!(log_directive(true, Some("warn".to_string()), "info"), "debug");
        assert_eq!(log_directive(true, None, "error"), "debug");
    }

    #[test]
    fn test_rust_log_overrides_config_level() {
        assert_eq!(
            log_directive(false, Some("asi_stage=trace".to_string()), "info"),
            "asi_stage=trace"
        );
        assert_eq!(log_directive(false, None, "warn"), "warn");
        assert_eq!(log_directive(false, Some("  ".to_string()), "warn"), "warn");
    }

    #[test]
    fn test_move_accepts_negative_values() {
        let args = Args::try_parse_from(["ms2000", "--mock", "move", "-500", "_"]).unwrap();
        match args.command {
            Command::Move { values, absolute, .. } => {
                assert!(!absolute);
                assert_eq!(values, vec!["-500", "_"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
