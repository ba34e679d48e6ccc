use std::process::Command;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::*;

use crate::action_controller::{Action, ActionController};
use crate::body::Body;
use crate::error::{TrexError, TrexResult};
use crate::gait;
use crate::gamepad::{ControllerEvent, InputSource};
use crate::geometry::LegGeometry;
use crate::motion::{MotionEngine, STAY};
use crate::power::PowerStatus;
use crate::servo_bus::ServoBus;
use crate::trex_config::TrexConfig;

pub type SharedEngine = Arc<Mutex<MotionEngine>>;

/// Central processing unit for the body actions.
///
/// Owns the motion engine (shared with the servo tick), the action
/// dispatcher and the external peripherals, and carries the shift-style
/// mode flags that L2/R2 compose into other actions.
pub struct QuadrupedCpu {
    engine: SharedEngine,
    action_controller: ActionController<QuadrupedCpu>,
    input: Option<Box<dyn InputSource>>,
    power: Box<dyn PowerStatus>,
    mode_1: bool,
    mode_2: bool,
    hard_shutdown: fn(),
}

fn platform_hard_shutdown() {
    match Command::new("sudo").args(["shutdown", "-h", "now"]).status() {
        Ok(status) if !status.success() => warn!("Platform shutdown exited with {status}"),
        Err(error) => warn!("Failed to issue platform shutdown: {error}"),
        _ => {}
    }
}

impl QuadrupedCpu {
    pub fn initialize(
        config: &TrexConfig,
        bus: Box<dyn ServoBus>,
        online: bool,
        input: Option<Box<dyn InputSource>>,
        power: Box<dyn PowerStatus>,
    ) -> TrexResult<Self> {
        let geometry = LegGeometry::new(&config.geometry);
        let body = Body::new(bus, online, config, &geometry)?;
        let engine = Arc::new(Mutex::new(MotionEngine::new(body, geometry, config)));

        let mut action_controller = ActionController::new();
        if let Some(input) = &input {
            action_controller.attach_event_source(input.event_slot());
        }
        Self::register_movements(&mut action_controller);

        let mut cpu = QuadrupedCpu {
            engine,
            action_controller,
            input,
            power,
            mode_1: false,
            mode_2: false,
            hard_shutdown: platform_hard_shutdown,
        };

        let rumble_welcome = {
            let engine = cpu.engine.lock().unwrap();
            engine.body().online() && !engine.calibrate_mode()
        };
        if rumble_welcome {
            if let Some(input) = &mut cpu.input {
                input.rumble();
            }
        }
        Ok(cpu)
    }

    fn register_movements(controller: &mut ActionController<QuadrupedCpu>) {
        controller.register(Action::Mode1, Self::set_mode_1, ControllerEvent::L2Pressed);
        controller.register(Action::Mode2, Self::set_mode_2, ControllerEvent::R2Pressed);
        controller.register(Action::Sit, Self::sit, ControllerEvent::CrossPressed);
        controller.register(Action::SpeedUp, Self::speed_up, ControllerEvent::CirclePressed);
        controller.register(
            Action::SpeedDown,
            Self::speed_down,
            ControllerEvent::SquarePressed,
        );
        controller.register(Action::Stand, Self::stand, ControllerEvent::TrianglePressed);
        controller.register(Action::Forward, Self::step_forward, ControllerEvent::UpPressed);
        controller.register(
            Action::Backward,
            Self::step_backward,
            ControllerEvent::DownPressed,
        );
        controller.register(
            Action::TurnRight,
            Self::turn_right,
            ControllerEvent::RightPressed,
        );
        controller.register(
            Action::TurnLeft,
            Self::turn_left,
            ControllerEvent::LeftPressed,
        );
        controller.register(Action::Shutdown, Self::shutdown, ControllerEvent::MenuPressed);
        controller.register(Action::Calibrate, Self::calibrate, ControllerEvent::PsShare);
        controller.register(
            Action::Report,
            Self::print_system_report,
            ControllerEvent::PsHome,
        );
        controller.register(
            Action::Released,
            Self::reset_modes,
            ControllerEvent::Released,
        );
    }

    /// Handle for the periodic scheduler; the tick only ever touches the
    /// engine, never the dispatcher.
    pub fn engine(&self) -> SharedEngine {
        Arc::clone(&self.engine)
    }

    pub fn action_controller(&self) -> &ActionController<QuadrupedCpu> {
        &self.action_controller
    }

    /// One servo tick: advances one leg and writes its servos. Returns
    /// `false` once the body is sleeping so the scheduler stops rearming.
    pub fn servo_tick(engine: &SharedEngine) -> bool {
        match engine.lock().unwrap().servo_tick() {
            Ok(alive) => alive,
            Err(error) => {
                warn!("Servo tick failed: {error}");
                true
            }
        }
    }

    /// One foreground dispatch iteration. A proposed action claims the
    /// single action slot and its handler runs synchronously, driving the
    /// gait keyframes to completion before this returns.
    pub fn run_once(&mut self) -> TrexResult<()> {
        if let Some(action) = self.action_controller.poll() {
            if let Some(handler) = self.action_controller.try_begin(action) {
                handler(self)?;
            }
        }
        Ok(())
    }

    pub fn start_input_reader(&mut self) -> TrexResult<()> {
        if let Some(input) = &mut self.input {
            input.start_reader()?;
        }
        Ok(())
    }

    pub fn set_status_led(&mut self, red: u8, green: u8, blue: u8) -> TrexResult<()> {
        self.power.set_led(red, green, blue)
    }

    pub fn set_error_state(&mut self) {
        if let Err(error) = self.power.set_led(200, 0, 0) {
            warn!("Failed to set error LED: {error}");
        }
    }

    /// Blocks the gait thread until all four legs reached their targets.
    /// The servo tick keeps firing from its own thread while this spins.
    fn wait_all_reach(&self) {
        loop {
            if self.engine.lock().unwrap().all_reached() {
                return;
            }
            thread::sleep(Duration::from_micros(200));
        }
    }

    fn run_keyframes(&mut self, frames: Vec<gait::Keyframe>) {
        for frame in frames {
            {
                let mut engine = self.engine.lock().unwrap();
                if let Some(tier) = frame.speed {
                    engine.set_speed_tier(tier);
                }
                for target in &frame.targets {
                    engine.set_leg_target(target.leg, target.x, target.y, target.z);
                }
            }
            self.wait_all_reach();
        }
    }

    fn step_forward(&mut self) -> TrexResult<()> {
        let frames = {
            let engine = self.engine.lock().unwrap();
            let leads =
                engine.body().left_front_leg().target_position.y == engine.geometry().y_start;
            gait::step_forward(engine.geometry(), leads)
        };
        self.run_keyframes(frames);
        self.action_controller.end_action(true);
        Ok(())
    }

    fn step_backward(&mut self) -> TrexResult<()> {
        let frames = {
            let engine = self.engine.lock().unwrap();
            let leads =
                engine.body().left_back_leg().target_position.y == engine.geometry().y_start;
            gait::step_backward(engine.geometry(), leads)
        };
        self.run_keyframes(frames);
        self.action_controller.end_action(true);
        Ok(())
    }

    fn turn_right(&mut self) -> TrexResult<()> {
        let frames = {
            let engine = self.engine.lock().unwrap();
            let leads =
                engine.body().left_front_leg().target_position.y == engine.geometry().y_start;
            gait::turn_right(engine.geometry(), leads)
        };
        self.run_keyframes(frames);
        self.action_controller.end_action(true);
        Ok(())
    }

    fn turn_left(&mut self) -> TrexResult<()> {
        let frames = {
            let engine = self.engine.lock().unwrap();
            let leads =
                engine.body().left_back_leg().target_position.y == engine.geometry().y_start;
            gait::turn_left(engine.geometry(), leads)
        };
        self.run_keyframes(frames);
        self.action_controller.end_action(true);
        Ok(())
    }

    fn sit(&mut self) -> TrexResult<()> {
        if !self.mode_1 {
            {
                let mut engine = self.engine.lock().unwrap();
                let z_ground = engine.geometry().z_ground;
                for leg in 0..4 {
                    engine.set_leg_target(leg, STAY, STAY, z_ground);
                }
            }
            self.wait_all_reach();
        } else {
            self.head_down();
            self.mode_1 = false;
        }
        self.action_controller.end_action(false);
        Ok(())
    }

    fn stand(&mut self) -> TrexResult<()> {
        if !self.mode_1 {
            {
                let mut engine = self.engine.lock().unwrap();
                let z_range = engine.geometry().z_range;
                for leg in 0..4 {
                    engine.set_leg_target(leg, STAY, STAY, z_range);
                }
            }
            self.wait_all_reach();
        } else {
            self.head_up();
            self.mode_1 = false;
        }
        self.action_controller.end_action(false);
        Ok(())
    }

    /// Tilts the head up by extending the front legs and folding the back
    /// legs by 10 mm each.
    fn head_up(&mut self) {
        {
            let mut engine = self.engine.lock().unwrap();
            for (leg, delta) in [(0, -10.0), (1, 10.0), (2, -10.0), (3, 10.0)] {
                let z = engine.body().leg(leg).target_position.z + delta;
                engine.set_leg_target(leg, STAY, STAY, z);
            }
        }
        self.wait_all_reach();
    }

    fn head_down(&mut self) {
        {
            let mut engine = self.engine.lock().unwrap();
            for (leg, delta) in [(0, 10.0), (1, -10.0), (2, 10.0), (3, -10.0)] {
                let z = engine.body().leg(leg).target_position.z + delta;
                engine.set_leg_target(leg, STAY, STAY, z);
            }
        }
        self.wait_all_reach();
    }

    fn speed_up(&mut self) -> TrexResult<()> {
        self.engine.lock().unwrap().speed_up();
        self.action_controller.end_action(false);
        Ok(())
    }

    fn speed_down(&mut self) -> TrexResult<()> {
        self.engine.lock().unwrap().speed_down();
        self.action_controller.end_action(false);
        Ok(())
    }

    /// Toggles calibrate mode on the falling edge of the button; with
    /// mode 1 held it restores the default stance instead. The repeat guard
    /// keeps the toggle from oscillating while the button is held.
    fn calibrate(&mut self) -> TrexResult<()> {
        if !self.action_controller.is_repeating() {
            let mut engine = self.engine.lock().unwrap();
            if !self.mode_1 {
                engine.toggle_calibrate_mode();
            } else {
                engine.body_mut().default_stance();
            }
            drop(engine);
            self.action_controller.end_action(false);
        }
        Ok(())
    }

    fn set_mode_1(&mut self) -> TrexResult<()> {
        self.mode_1 = true;
        self.action_controller.end_action(false);
        debug!("mode 1: {}", self.mode_1);
        Ok(())
    }

    fn set_mode_2(&mut self) -> TrexResult<()> {
        self.mode_2 = true;
        self.action_controller.end_action(false);
        debug!("mode 2: {}", self.mode_2);
        Ok(())
    }

    fn reset_modes(&mut self) -> TrexResult<()> {
        self.mode_1 = false;
        self.mode_2 = false;
        self.action_controller.end_action(false);
        Ok(())
    }

    fn print_system_report(&mut self) -> TrexResult<()> {
        if !self.action_controller.is_repeating() {
            self.get_system_report();
            self.action_controller.end_action(false);
        }
        Ok(())
    }

    pub fn get_system_report(&mut self) {
        fn check<T: std::fmt::Display>(value: TrexResult<T>) -> String {
            match value {
                Ok(value) => value.to_string(),
                Err(error) => error.to_string(),
            }
        }

        let status = check(self.power.status());
        let fault = check(self.power.fault_status());
        let charge = check(self.power.charge_level());
        let temperature = check(self.power.battery_temperature());
        let battery_voltage = check(self.power.battery_voltage());
        let battery_current = check(self.power.battery_current());
        let io_voltage = check(self.power.io_voltage());
        let io_current = check(self.power.io_current());
        let firmware = check(self.power.firmware_version());

        info!("---------- Pi-Juice Report --------------------");
        info!("Status: {status}");
        info!("Fault state: {fault}");
        info!("Firmware version = {firmware}");
        info!("Charge = {charge} %, T = {temperature} Celsius");
        info!(
            "Vbat = {battery_voltage} mV, Ibat = {battery_current} mA, \
             Vio = {io_voltage} mV, Iio = {io_current} mA"
        );
        info!("---------- Pi-Juice Report --------------------");
        let engine = self.engine.lock().unwrap();
        info!("---------- States Report ----------------------");
        info!("Mode 1         : {}      Mode 2      : {}", self.mode_1, self.mode_2);
        info!("Calibrate mode : {}", engine.calibrate_mode());
        info!(
            "Sleeping mode  : {}      Body online : {}",
            engine.is_sleeping(),
            engine.body().online()
        );
        info!("---------- States Report ----------------------");
    }

    /// Shuts the platform down when both mode buttons are held, and always
    /// raises the termination signal that unwinds the foreground loop.
    fn shutdown(&mut self) -> TrexResult<()> {
        if self.mode_1 && self.mode_2 {
            info!("Hard shutdown initiated...");
            (self.hard_shutdown)();
        } else {
            info!("Soft shutdown initiated...");
        }
        Err(TrexError::ProgramTerminated)
    }

    pub fn awake(&mut self) -> TrexResult<()> {
        self.engine.lock().unwrap().awake()?;
        if let Some(input) = &mut self.input {
            input.rumble();
        }
        Ok(())
    }

    /// Releases all resources for the shutdown sequence. Idempotent.
    pub fn release(&mut self) {
        if let Err(error) = self.engine.lock().unwrap().sleep() {
            warn!("Failed to sleep the body: {error}");
        }
        if let Some(input) = &mut self.input {
            input.disconnect();
        }
        self.action_controller.end_action(false);
    }
}
