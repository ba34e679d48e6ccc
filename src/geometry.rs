use crate::trex_config::GeometryConfig;

/// Fixed leg geometry plus the turn-trajectory waypoints derived from it.
///
/// The turn waypoints describe where the feet have to sit so that the body
/// rotates about its centre while one tripod swings; they only depend on
/// the stance rectangle and are computed once at startup.
#[derive(Debug, Clone)]
pub struct LegGeometry {
    pub coxa_len: f64,
    pub femur_len: f64,
    pub tibia_len: f64,
    pub length_side: f64,
    pub x_range: f64,
    pub z_range: f64,
    pub z_ground: f64,
    pub z_up: f64,
    pub y_start: f64,
    pub y_step: f64,
    pub x_offset: f64,
    pub turn_x0: f64,
    pub turn_y0: f64,
    pub turn_x1: f64,
    pub turn_y1: f64,
}

impl LegGeometry {
    pub fn new(config: &GeometryConfig) -> Self {
        let temp_a =
            ((2.0 * config.x_range + config.length_side).powi(2) + config.y_step.powi(2)).sqrt();
        let temp_b = 2.0 * (config.y_start + config.y_step) + config.length_side;
        let temp_c = ((2.0 * config.x_range + config.length_side).powi(2)
            + (2.0 * config.y_start + config.y_step + config.length_side).powi(2))
        .sqrt();
        let temp_alpha =
            ((temp_a.powi(2) + temp_b.powi(2) - temp_c.powi(2)) / (2.0 * temp_a * temp_b)).acos();

        let turn_x1 = (temp_a - config.length_side) / 2.0;
        let turn_y1 = config.y_start + config.y_step / 2.0;
        let turn_x0 = turn_x1 - temp_b * temp_alpha.cos();
        let turn_y0 = temp_b * temp_alpha.sin() - turn_y1 - config.length_side;

        LegGeometry {
            coxa_len: config.coxa_len,
            femur_len: config.femur_len,
            tibia_len: config.tibia_len,
            length_side: config.length_side,
            x_range: config.x_range,
            z_range: config.z_range,
            z_ground: config.z_ground,
            z_up: config.z_up,
            y_start: config.y_start,
            y_step: config.y_step,
            x_offset: config.x_offset,
            turn_x0,
            turn_y0,
            turn_x1,
            turn_y1,
        }
    }

    /// Converts a Cartesian foot position in the leg-local frame into the
    /// three joint angles (alpha, beta, gamma) in degrees.
    ///
    /// Out-of-reach targets are recovered silently: the `acos` arguments are
    /// clamped to ±1, which drives the leg to its fully stretched or fully
    /// folded pose instead of failing.
    pub fn cartesian_to_polar(&self, x: f64, y: f64, z: f64) -> (f64, f64, f64) {
        let w = if x >= 0.0 {
            (x.powi(2) + y.powi(2)).sqrt()
        } else {
            -(x.powi(2) + y.powi(2)).sqrt()
        };
        let v = w - self.coxa_len;

        let alpha = z.atan2(v)
            + clamped_acos(
                (self.femur_len.powi(2) - self.tibia_len.powi(2) + v.powi(2) + z.powi(2))
                    / (2.0 * self.femur_len * (v.powi(2) + z.powi(2)).sqrt()),
            );
        let beta = clamped_acos(
            (self.femur_len.powi(2) + self.tibia_len.powi(2) - v.powi(2) - z.powi(2))
                / (2.0 * self.femur_len * self.tibia_len),
        );
        let gamma = if w >= 0.0 { y.atan2(x) } else { (-y).atan2(-x) };

        (alpha.to_degrees(), beta.to_degrees(), gamma.to_degrees())
    }
}

fn clamped_acos(value: f64) -> f64 {
    (-1.0_f64).max(1.0_f64.min(value)).acos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trex_config::TrexConfig;
    use approx::assert_relative_eq;

    fn geometry() -> LegGeometry {
        LegGeometry::new(&TrexConfig::default().geometry)
    }

    /// Rebuilds the Cartesian foot position from joint angles. Only valid
    /// for the `w >= 0` branch, which covers every pose the gaits use.
    fn polar_to_cartesian(geometry: &LegGeometry, alpha: f64, beta: f64, gamma: f64) -> (f64, f64, f64) {
        let (femur, tibia) = (geometry.femur_len, geometry.tibia_len);
        let r = (femur.powi(2) + tibia.powi(2)
            - 2.0 * femur * tibia * beta.to_radians().cos())
        .sqrt();
        let phi = ((femur.powi(2) - tibia.powi(2) + r.powi(2)) / (2.0 * femur * r)).acos();
        let theta = alpha.to_radians() - phi;
        let v = r * theta.cos();
        let z = r * theta.sin();
        let w = v + geometry.coxa_len;
        (
            w * gamma.to_radians().cos(),
            w * gamma.to_radians().sin(),
            z,
        )
    }

    #[test]
    fn calibration_reference_pose() {
        let (alpha, beta, gamma) = geometry().cartesian_to_polar(100.0, 80.0, 28.0);
        assert_relative_eq!(alpha, 64.63491398182961, epsilon = 1e-9);
        assert_relative_eq!(beta, 99.62805465243616, epsilon = 1e-9);
        assert_relative_eq!(gamma, 38.65980825409009, epsilon = 1e-9);
    }

    #[test]
    fn turn_waypoints() {
        let geometry = geometry();
        assert_relative_eq!(geometry.turn_x1, 64.5624804809475, epsilon = 1e-9);
        assert_relative_eq!(geometry.turn_y1, 22.5, epsilon = 1e-9);
        assert_relative_eq!(geometry.turn_x0, 28.360099902447388, epsilon = 1e-9);
        assert_relative_eq!(geometry.turn_y0, 63.3769825068338, epsilon = 1e-9);
    }

    #[test]
    fn inverse_kinematics_roundtrips_through_forward_kinematics() {
        let geometry = geometry();
        let reachable_poses = [
            (100.0, 80.0, 28.0),
            (62.0, 62.0, -27.0),
            (62.0, 62.0, -50.0),
            (69.0, 0.0, -30.0),
            (62.0, 45.0, -30.0),
            (28.360099902447388, 63.3769825068338, -50.0),
            (64.5624804809475, 22.5, -50.0),
        ];
        for (x, y, z) in reachable_poses {
            let (alpha, beta, gamma) = geometry.cartesian_to_polar(x, y, z);
            let (fk_x, fk_y, fk_z) = polar_to_cartesian(&geometry, alpha, beta, gamma);
            assert_relative_eq!(fk_x, x, epsilon = 1e-6);
            assert_relative_eq!(fk_y, y, epsilon = 1e-6);
            assert_relative_eq!(fk_z, z, epsilon = 1e-6);
        }
    }

    #[test]
    fn out_of_reach_targets_never_produce_nan() {
        let geometry = geometry();
        let extremes = [-500.0, -135.0, -62.0, -27.5, 0.0, 27.5, 62.0, 135.0, 500.0];
        for x in extremes {
            for y in extremes {
                for z in extremes {
                    let (alpha, beta, gamma) = geometry.cartesian_to_polar(x, y, z);
                    assert!(alpha.is_finite(), "alpha for ({x}, {y}, {z})");
                    assert!(beta.is_finite(), "beta for ({x}, {y}, {z})");
                    assert!(gamma.is_finite(), "gamma for ({x}, {y}, {z})");
                }
            }
        }
    }

    #[test]
    fn negative_x_mirrors_gamma() {
        let geometry = geometry();
        let (_, _, gamma) = geometry.cartesian_to_polar(-100.0, -80.0, 28.0);
        assert_relative_eq!(gamma, 38.65980825409009, epsilon = 1e-9);
    }
}
