use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use tracing::*;

use ttrex_rust::error::{TrexError, TrexResult};
use ttrex_rust::gamepad::{EvdevGameController, InputSource};
use ttrex_rust::power::{PiJuicePower, PowerStatus, StubPower};
use ttrex_rust::quadruped_cpu::QuadrupedCpu;
use ttrex_rust::scheduler::{PeriodicScheduler, ThreadScheduler};
use ttrex_rust::servo_bus::{Pca9685ServoBus, ServoBus, StubServoBus};
use ttrex_rust::trex_config::TrexConfig;
use ttrex_rust::utilities;

/// T-Trex quadruped controller
#[derive(Parser)]
#[command(version, about = "Controls the t-trex quadruped robot")]
struct Args {
    /// Mode tokens: STUB uses the stub servo bus,
    /// NO_CONTROLLER skips the gamepad connection (headless tests)
    #[arg(value_name = "TOKEN")]
    tokens: Vec<String>,
    /// Sets path to body config file (.toml)
    /// If unset uses default values.
    #[arg(long)]
    config: Option<String>,
    /// Sets the level of verbosity
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// First timer arm is generous so startup I²C traffic settles; afterwards
/// the tick rearms itself every 2 ms and advances one leg per firing.
const TICK_INITIAL: Duration = Duration::from_millis(20);
const TICK_PERIOD: Duration = Duration::from_millis(2);

fn main() -> ExitCode {
    let args = Args::parse();
    utilities::setup_tracing(args.verbose);
    info!("Started t-trex controller");

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) if error.is_termination() => {
            info!("Program killed due to program killed signal: running cleanup code...");
            ExitCode::SUCCESS
        }
        Err(error) => {
            error!("Program killed due to exception: running cleanup code... {error}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> TrexResult<()> {
    let stub = args.tokens.iter().any(|token| token == "STUB");
    let use_controller = !args.tokens.iter().any(|token| token == "NO_CONTROLLER");

    let config = match &args.config {
        Some(path) => TrexConfig::load(Path::new(path))?,
        None => TrexConfig::default(),
    };

    let mut power: Box<dyn PowerStatus> = if stub {
        Box::new(StubPower::new())
    } else {
        Box::new(PiJuicePower::open()?)
    };

    let bus_result: TrexResult<(Box<dyn ServoBus>, bool)> = if stub {
        Ok((Box::new(StubServoBus::new()), false))
    } else {
        Pca9685ServoBus::open().map(|bus| (Box::new(bus) as Box<dyn ServoBus>, true))
    };
    let (bus, online) = match bus_result {
        Ok(bus) => bus,
        Err(error) => {
            let _ = power.set_led(200, 0, 0);
            return Err(error);
        }
    };

    let input: Option<Box<dyn InputSource>> = if use_controller {
        match EvdevGameController::connect() {
            Ok(controller) => Some(Box::new(controller)),
            Err(error) => {
                let _ = power.set_led(200, 0, 0);
                return Err(error);
            }
        }
    } else {
        None
    };

    let mut cpu = QuadrupedCpu::initialize(&config, bus, online, input, power)?;
    cpu.set_status_led(0, 255, 255)?;
    cpu.get_system_report();

    let terminated = Arc::new(AtomicBool::new(false));
    let signal_flag = Arc::clone(&terminated);
    ctrlc::set_handler(move || signal_flag.store(true, Ordering::SeqCst))
        .expect("Failed to set signal handler");

    let engine = cpu.engine();
    let mut scheduler = ThreadScheduler::new();
    scheduler.arm(
        TICK_INITIAL,
        TICK_PERIOD,
        Box::new(move || QuadrupedCpu::servo_tick(&engine)),
    )?;
    cpu.start_input_reader()?;
    cpu.set_status_led(0, 50, 25)?;

    let result = loop {
        if terminated.load(Ordering::SeqCst) {
            break Err(TrexError::ProgramTerminated);
        }
        if let Err(error) = cpu.run_once() {
            break Err(error);
        }
        thread::sleep(Duration::from_millis(1));
    };

    match &result {
        Err(error) if error.is_termination() => {
            let _ = cpu.set_status_led(0, 0, 0);
        }
        Err(_) => cpu.set_error_state(),
        Ok(()) => {}
    }
    scheduler.disarm();
    cpu.release();
    result
}
