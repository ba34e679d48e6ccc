use tracing::*;

use crate::body::Body;
use crate::error::TrexResult;
use crate::geometry::LegGeometry;
use crate::trex_config::TrexConfig;

/// Sentinel coordinate meaning "leave this axis's target unchanged".
pub const STAY: f64 = 255.0;

/// Owns the body and the interpolation state shared between the foreground
/// gait thread and the servo tick. Callers wrap it in a mutex; every method
/// only needs the lock for the duration of one call, which keeps the tick
/// and the gait thread interleaving without starving each other.
pub struct MotionEngine {
    body: Body,
    geometry: LegGeometry,
    current_leg: usize,
    move_speed: f64,
    custom_move_speed: f64,
    leg_move_speed: f64,
    body_move_speed: f64,
    calibration_reference: [f64; 3],
    calibrate_mode: bool,
    sleeping: bool,
}

/// Speed tiers the gait scripts alternate between: swing moves a single
/// lifted leg fast, shift translates the whole supported body slowly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedTier {
    Swing,
    Shift,
}

impl MotionEngine {
    pub fn new(body: Body, geometry: LegGeometry, config: &TrexConfig) -> Self {
        MotionEngine {
            body,
            geometry,
            current_leg: 0,
            move_speed: config.speeds.move_speed,
            custom_move_speed: config.speeds.move_speed,
            leg_move_speed: config.speeds.leg_move_speed,
            body_move_speed: config.speeds.body_move_speed,
            calibration_reference: config.calibration.reference,
            calibrate_mode: false,
            sleeping: false,
        }
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    pub fn geometry(&self) -> &LegGeometry {
        &self.geometry
    }

    /// Sets the target position of one leg endpoint. Axes given as [`STAY`]
    /// keep their current value, which also halts motion on that axis.
    /// Speeds are scaled so the leg travels straight toward the target at
    /// the current move speed.
    pub fn set_leg_target(&mut self, leg_index: usize, x: f64, y: f64, z: f64) {
        let custom_move_speed = self.custom_move_speed;
        let leg = self.body.get_leg(leg_index);

        let length_x = if x != STAY {
            x - leg.current_position.x
        } else {
            0.0
        };
        let length_y = if y != STAY {
            y - leg.current_position.y
        } else {
            0.0
        };
        let length_z = if z != STAY {
            z - leg.current_position.z
        } else {
            0.0
        };

        // if the leg is already in position the length is zero and the old
        // speeds are kept
        let length = (length_x.powi(2) + length_y.powi(2) + length_z.powi(2)).sqrt();
        if length != 0.0 {
            leg.movement.x = length_x / length * custom_move_speed;
            leg.movement.y = length_y / length * custom_move_speed;
            leg.movement.z = length_z / length * custom_move_speed;
        }

        leg.target_position.x = if x != STAY { x } else { leg.current_position.x };
        leg.target_position.y = if y != STAY { y } else { leg.current_position.y };
        leg.target_position.z = if z != STAY { z } else { leg.current_position.z };
    }

    /// True once every leg matches its target on all three axes.
    pub fn all_reached(&self) -> bool {
        (0..4).all(|index| {
            let leg = self.body.leg(index);
            leg.current_position == leg.target_position
        })
    }

    /// Advances exactly one leg toward its target and writes its servos.
    /// Legs take turns in round-robin order so a full pass costs four
    /// ticks. Returns `false` once the body is sleeping, which tells the
    /// scheduler to stop rearming.
    pub fn servo_tick(&mut self) -> TrexResult<bool> {
        let index = self.current_leg;
        self.current_leg = (self.current_leg + 1) % 4;

        let leg = self.body.get_leg(index);
        for axis in 0..3 {
            let current = leg.current_position[axis];
            let target = leg.target_position[axis];
            let speed = leg.movement[axis];
            if (current - target).abs() >= speed.abs() {
                leg.current_position[axis] = current + speed;
            } else {
                leg.current_position[axis] = target;
            }
        }

        let (alpha, beta, gamma) = if self.calibrate_mode {
            let [x, y, z] = self.calibration_reference;
            self.geometry.cartesian_to_polar(x, y, z)
        } else {
            let position = self.body.leg(index).current_position;
            self.geometry
                .cartesian_to_polar(position.x, position.y, position.z)
        };
        self.body.apply_polar(index, alpha, beta, gamma)?;

        Ok(!self.sleeping)
    }

    pub fn custom_move_speed(&self) -> f64 {
        self.custom_move_speed
    }

    pub fn set_custom_move_speed(&mut self, speed: f64) {
        self.custom_move_speed = speed;
    }

    pub fn set_speed_tier(&mut self, tier: SpeedTier) {
        self.custom_move_speed = match tier {
            SpeedTier::Swing => self.leg_move_speed,
            SpeedTier::Shift => self.body_move_speed,
        };
    }

    pub fn speed_up(&mut self) {
        if self.custom_move_speed <= self.move_speed * 3.0 {
            self.custom_move_speed += 0.1;
        }
        debug!("Speed {}", self.custom_move_speed);
    }

    pub fn speed_down(&mut self) {
        if self.custom_move_speed > 0.1 {
            self.custom_move_speed -= 0.1;
        } else {
            self.custom_move_speed = 0.1;
        }
        debug!("Speed {}", self.custom_move_speed);
    }

    pub fn calibrate_mode(&self) -> bool {
        self.calibrate_mode
    }

    pub fn toggle_calibrate_mode(&mut self) {
        self.calibrate_mode = !self.calibrate_mode;
        debug!("Calibrate mode {}", self.calibrate_mode);
    }

    pub fn is_sleeping(&self) -> bool {
        self.sleeping
    }

    pub fn sleep(&mut self) -> TrexResult<()> {
        self.body.sleep_mode()?;
        self.sleeping = true;
        Ok(())
    }

    pub fn awake(&mut self) -> TrexResult<()> {
        self.body.wake_up_mode()?;
        self.sleeping = false;
        Ok(())
    }
}
