use nalgebra::{Point3, Vector3};
use tracing::*;

use crate::error::TrexResult;
use crate::geometry::LegGeometry;
use crate::servo_bus::ServoBus;
use crate::trex_config::{CalibrationConfig, TrexConfig};

/// Servo channel offsets within a leg. For leg index `i` the channels are
/// COXA = 3+3i, FEMUR = 1+3i, TIBIA = 2+3i:
///
/// Leg 0 (right front) coxa 3, femur 1, tibia 2
/// Leg 1 (right back)  coxa 6, femur 4, tibia 5
/// Leg 2 (left front)  coxa 9, femur 7, tibia 8
/// Leg 3 (left back)   coxa 12, femur 10, tibia 11
const COXA: u8 = 3;
const FEMUR: u8 = 1;
const TIBIA: u8 = 2;

const SERVO_STEPS: u16 = 180;

/// The limits for a servo are typically between 1 ms and 2 ms; these are
/// the values the t-trex servos are driven between.
const SERVO_LOW_LIMIT_MS: f64 = 0.8;
const SERVO_HIGH_LIMIT_MS: f64 = 2.3;

/// One servo channel on the shared bus.
#[derive(Debug, Clone, Copy)]
struct Servo {
    channel: u8,
}

impl Servo {
    fn write(&self, bus: &mut dyn ServoBus, angle: f64) -> TrexResult<()> {
        bus.move_servo(self.channel, angle, SERVO_STEPS)
    }
}

pub struct Leg {
    index: usize,
    servo_coxa: Servo,
    servo_femur: Servo,
    servo_tibia: Servo,
    pub current_position: Point3<f64>,
    pub target_position: Point3<f64>,
    /// Millimetres per servo tick, per axis, signed.
    pub movement: Vector3<f64>,
    alpha_error: f64,
    beta_error: f64,
    gamma_error: f64,
}

impl Leg {
    fn new(index: usize, x: f64, y: f64, z: f64, move_speed: f64) -> Self {
        Leg {
            index,
            servo_coxa: Servo {
                channel: COXA + (index as u8 * 3),
            },
            servo_femur: Servo {
                channel: FEMUR + (index as u8 * 3),
            },
            servo_tibia: Servo {
                channel: TIBIA + (index as u8 * 3),
            },
            current_position: Point3::new(x, y, z),
            // stock startup target; the z is 1 mm above the stance so the
            // first tick pass settles every leg with a visible snap, and the
            // y keeps the first locomotion call out of the y_start phase
            target_position: Point3::new(62.0, 62.0, -28.0),
            movement: Vector3::new(move_speed, move_speed, move_speed),
            alpha_error: 0.0,
            beta_error: 0.0,
            gamma_error: 0.0,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn set_error(&mut self, alpha_error: f64, beta_error: f64, gamma_error: f64) {
        self.alpha_error = alpha_error;
        self.beta_error = beta_error;
        self.gamma_error = gamma_error;
    }

    /// Maps leg-local joint angles onto servo angles, compensating the
    /// calibration error and the mounting orientation of this leg.
    pub fn polar_to_servo(&self, alpha: f64, beta: f64, gamma: f64) -> (f64, f64, f64) {
        let alpha = alpha + self.alpha_error;
        let beta = beta + self.beta_error;
        let gamma = gamma + self.gamma_error;

        match self.index {
            0 | 3 => (90.0 - alpha, beta, gamma + 90.0),
            _ => (alpha + 90.0, 180.0 - beta, 90.0 - gamma),
        }
    }

    /// Writes the joint angles to the three servo channels of this leg.
    pub fn set(&self, bus: &mut dyn ServoBus, alpha: f64, beta: f64, gamma: f64) -> TrexResult<()> {
        let (alpha_servo, beta_servo, gamma_servo) = self.polar_to_servo(alpha, beta, gamma);
        self.servo_coxa.write(bus, gamma_servo)?;
        self.servo_femur.write(bus, alpha_servo)?;
        self.servo_tibia.write(bus, beta_servo)?;
        Ok(())
    }
}

/// The body owns the four legs and the servo bus they share.
pub struct Body {
    bus: Box<dyn ServoBus>,
    legs: [Leg; 4],
    online: bool,
    z_default: f64,
    initial_move_speed: f64,
}

const X_DEFAULT: f64 = 62.0;
const Y_DEFAULT: f64 = X_DEFAULT;

impl Body {
    pub fn new(
        mut bus: Box<dyn ServoBus>,
        online: bool,
        config: &TrexConfig,
        geometry: &LegGeometry,
    ) -> TrexResult<Self> {
        bus.set_low_limit(SERVO_LOW_LIMIT_MS)?;
        bus.set_high_limit(SERVO_HIGH_LIMIT_MS)?;
        bus.output_enable()?;

        let mut body = Body {
            bus,
            legs: build_legs(geometry.z_ground, config.speeds.move_speed),
            online,
            z_default: geometry.z_ground,
            initial_move_speed: config.speeds.move_speed,
        };
        body.calculate_error(geometry, &config.calibration);
        Ok(body)
    }

    /// Derives the per-leg joint offsets from the factory calibration poses.
    fn calculate_error(&mut self, geometry: &LegGeometry, calibration: &CalibrationConfig) {
        let [x, y, z] = calibration.reference;
        let (alpha_expected, beta_expected, gamma_expected) = geometry.cartesian_to_polar(x, y, z);

        for leg in self.legs.iter_mut() {
            let [x, y, z] = calibration.measured(leg.index);
            let (alpha_measured, beta_measured, gamma_measured) =
                geometry.cartesian_to_polar(x, y, z);
            leg.set_error(
                alpha_expected - alpha_measured,
                beta_expected - beta_measured,
                gamma_expected - gamma_measured,
            );
        }
    }

    /// Re-instantiates all four legs in the default stance.
    pub fn default_stance(&mut self) {
        self.legs = build_legs(self.z_default, self.initial_move_speed);
    }

    pub fn get_leg(&mut self, index: usize) -> &mut Leg {
        &mut self.legs[index]
    }

    pub fn leg(&self, index: usize) -> &Leg {
        &self.legs[index]
    }

    pub fn right_front_leg(&self) -> &Leg {
        &self.legs[0]
    }

    pub fn right_back_leg(&self) -> &Leg {
        &self.legs[1]
    }

    pub fn left_front_leg(&self) -> &Leg {
        &self.legs[2]
    }

    pub fn left_back_leg(&self) -> &Leg {
        &self.legs[3]
    }

    pub fn online(&self) -> bool {
        self.online
    }

    /// Runs the polar angles of one leg through its servo mapping and
    /// writes the three channels.
    pub fn apply_polar(
        &mut self,
        index: usize,
        alpha: f64,
        beta: f64,
        gamma: f64,
    ) -> TrexResult<()> {
        self.legs[index].set(&mut *self.bus, alpha, beta, gamma)
    }

    pub fn sleep_mode(&mut self) -> TrexResult<()> {
        self.bus.output_disable()?;
        self.bus.sleep()?;
        info!("ServoController sleeping!");
        Ok(())
    }

    pub fn wake_up_mode(&mut self) -> TrexResult<()> {
        self.bus.output_enable()?;
        self.bus.wake()?;
        info!("ServoController awake!");
        Ok(())
    }
}

fn build_legs(z_default: f64, move_speed: f64) -> [Leg; 4] {
    [
        Leg::new(0, X_DEFAULT, Y_DEFAULT, z_default, move_speed),
        Leg::new(1, X_DEFAULT, Y_DEFAULT, z_default, move_speed),
        Leg::new(2, X_DEFAULT, Y_DEFAULT, z_default, move_speed),
        Leg::new(3, X_DEFAULT, Y_DEFAULT, z_default, move_speed),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::servo_bus::StubServoBus;
    use approx::assert_relative_eq;

    fn test_body() -> (Body, std::sync::Arc<std::sync::Mutex<crate::servo_bus::StubBusState>>) {
        let config = TrexConfig::default();
        let geometry = LegGeometry::new(&config.geometry);
        let bus = StubServoBus::new();
        let state = bus.state_handle();
        let body = Body::new(Box::new(bus), false, &config, &geometry).unwrap();
        (body, state)
    }

    #[test]
    fn servo_channel_numbering() {
        let leg = Leg::new(2, 62.0, 62.0, -27.0, 8.0);
        assert_eq!(leg.servo_coxa.channel, 9);
        assert_eq!(leg.servo_femur.channel, 7);
        assert_eq!(leg.servo_tibia.channel, 8);
    }

    #[test]
    fn right_front_servo_mapping() {
        let leg = Leg::new(0, 62.0, 62.0, -27.0, 8.0);
        let (alpha, beta, gamma) =
            leg.polar_to_servo(64.63491398182961, 99.62805465243616, 38.65980825409009);
        assert_relative_eq!(alpha, 25.36508601817039, epsilon = 1e-9);
        assert_relative_eq!(beta, 99.62805465243616, epsilon = 1e-9);
        assert_relative_eq!(gamma, 128.65980825409009, epsilon = 1e-9);
    }

    #[test]
    fn right_back_servo_mapping_mirrors() {
        let leg = Leg::new(1, 62.0, 62.0, -27.0, 8.0);
        let (alpha, beta, gamma) = leg.polar_to_servo(60.0, 100.0, 30.0);
        assert_relative_eq!(alpha, 150.0);
        assert_relative_eq!(beta, 80.0);
        assert_relative_eq!(gamma, 60.0);
    }

    #[test]
    fn left_back_servo_mapping_matches_right_front() {
        let leg = Leg::new(3, 62.0, 62.0, -27.0, 8.0);
        let (alpha, beta, gamma) = leg.polar_to_servo(60.0, 100.0, 30.0);
        assert_relative_eq!(alpha, 30.0);
        assert_relative_eq!(beta, 100.0);
        assert_relative_eq!(gamma, 120.0);
    }

    #[test]
    fn calibration_error_applied_before_orientation_fixup() {
        let mut leg = Leg::new(0, 62.0, 62.0, -27.0, 8.0);
        leg.set_error(1.0, -2.0, 3.0);
        let (alpha, beta, gamma) = leg.polar_to_servo(60.0, 100.0, 30.0);
        assert_relative_eq!(alpha, 29.0);
        assert_relative_eq!(beta, 98.0);
        assert_relative_eq!(gamma, 123.0);
    }

    #[test]
    fn set_writes_coxa_femur_tibia_channels() {
        let (mut body, state) = test_body();
        // neutralize factory calibration for a pure mapping check
        body.get_leg(0).set_error(0.0, 0.0, 0.0);
        body.apply_polar(0, 64.63491398182961, 99.62805465243616, 38.65980825409009)
            .unwrap();

        let state = state.lock().unwrap();
        assert_relative_eq!(state.positions[3], 128.65980825409009, epsilon = 1e-9);
        assert_relative_eq!(state.positions[1], 25.36508601817039, epsilon = 1e-9);
        assert_relative_eq!(state.positions[2], 99.62805465243616, epsilon = 1e-9);
    }

    #[test]
    fn body_configures_bus_limits_on_construction() {
        let (_body, state) = test_body();
        let state = state.lock().unwrap();
        assert_eq!(state.low_limit_ms, 0.8);
        assert_eq!(state.high_limit_ms, 2.3);
        assert!(state.output_enabled);
    }

    #[test]
    fn factory_calibration_matches_reference_minus_measured() {
        let config = TrexConfig::default();
        let geometry = LegGeometry::new(&config.geometry);
        let (body, _) = test_body();

        let [x, y, z] = config.calibration.reference;
        let expected = geometry.cartesian_to_polar(x, y, z);
        let [x, y, z] = config.calibration.left_front;
        let measured = geometry.cartesian_to_polar(x, y, z);

        let leg = body.left_front_leg();
        assert_relative_eq!(leg.alpha_error, expected.0 - measured.0);
        assert_relative_eq!(leg.beta_error, expected.1 - measured.1);
        assert_relative_eq!(leg.gamma_error, expected.2 - measured.2);
    }

    #[test]
    fn default_stance_resets_positions_and_errors() {
        let (mut body, _) = test_body();
        body.get_leg(2).current_position = Point3::new(10.0, 10.0, -50.0);
        body.default_stance();
        assert_eq!(
            body.left_front_leg().current_position,
            Point3::new(62.0, 62.0, -27.0)
        );
        assert_eq!(
            body.left_front_leg().target_position,
            Point3::new(62.0, 62.0, -28.0)
        );
        assert_eq!(body.left_front_leg().alpha_error, 0.0);
    }

    #[test]
    fn sleep_and_wake_drive_the_bus() {
        let (mut body, state) = test_body();
        body.sleep_mode().unwrap();
        {
            let state = state.lock().unwrap();
            assert!(state.sleeping);
            assert!(!state.output_enabled);
        }
        body.wake_up_mode().unwrap();
        let state = state.lock().unwrap();
        assert!(!state.sleeping);
        assert!(state.output_enabled);
    }
}
