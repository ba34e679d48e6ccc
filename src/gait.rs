use crate::geometry::LegGeometry;
use crate::motion::SpeedTier;

/// One absolute leg target inside a keyframe batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegTarget {
    pub leg: usize,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// A batch of leg targets that is reached before the next batch starts.
/// The optional speed tier switches the interpolation speed before the
/// batch is written.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyframe {
    pub speed: Option<SpeedTier>,
    pub targets: Vec<LegTarget>,
}

impl Keyframe {
    fn of(targets: Vec<LegTarget>) -> Self {
        Keyframe {
            speed: None,
            targets,
        }
    }

    fn at(speed: SpeedTier, targets: Vec<LegTarget>) -> Self {
        Keyframe {
            speed: Some(speed),
            targets,
        }
    }
}

fn t(leg: usize, x: f64, y: f64, z: f64) -> LegTarget {
    LegTarget { leg, x, y, z }
}

/// Forward step. `left_front_leads` selects the tripod phase: when the
/// left front leg still sits at `y_start` legs 2 and 1 swing, otherwise
/// legs 0 and 3. Two consecutive invocations make one full cycle.
pub fn step_forward(g: &LegGeometry, left_front_leads: bool) -> Vec<Keyframe> {
    let (xr, xo, ys, yst, zr, zu) = (
        g.x_range, g.x_offset, g.y_start, g.y_step, g.z_range, g.z_up,
    );
    if left_front_leads {
        // leg 2 & 1 move
        vec![
            Keyframe::at(SpeedTier::Swing, vec![t(2, xr + xo, ys, zu)]),
            Keyframe::of(vec![t(2, xr + xo, ys + 2.0 * yst, zu)]),
            Keyframe::of(vec![t(2, xr + xo, ys + 2.0 * yst, zr)]),
            Keyframe::at(
                SpeedTier::Shift,
                vec![
                    t(0, xr + xo, ys, zr),
                    t(1, xr + xo, ys + 2.0 * yst, zr),
                    t(2, xr - xo, ys + yst, zr),
                    t(3, xr - xo, ys + yst, zr),
                ],
            ),
            Keyframe::at(SpeedTier::Swing, vec![t(1, xr + xo, ys + 2.0 * yst, zu)]),
            Keyframe::of(vec![t(1, xr + xo, ys, zu)]),
            Keyframe::of(vec![t(1, xr + xo, ys, zr)]),
        ]
    } else {
        // leg 0 & 3 move
        vec![
            Keyframe::at(SpeedTier::Swing, vec![t(0, xr + xo, ys, zu)]),
            Keyframe::of(vec![t(0, xr + xo, ys + 2.0 * yst, zu)]),
            Keyframe::of(vec![t(0, xr + xo, ys + 2.0 * yst, zr)]),
            Keyframe::at(
                SpeedTier::Shift,
                vec![
                    t(0, xr - xo, ys + yst, zr),
                    t(1, xr - xo, ys + yst, zr),
                    t(2, xr + xo, ys, zr),
                    t(3, xr + xo, ys + 2.0 * yst, zr),
                ],
            ),
            Keyframe::at(SpeedTier::Swing, vec![t(3, xr + xo, ys + 2.0 * yst, zu)]),
            Keyframe::of(vec![t(3, xr + xo, ys, zu)]),
            Keyframe::of(vec![t(3, xr + xo, ys, zr)]),
        ]
    }
}

/// Backward step, the mirror of [`step_forward`] with the left back leg as
/// the phase witness.
pub fn step_backward(g: &LegGeometry, left_back_leads: bool) -> Vec<Keyframe> {
    let (xr, xo, ys, yst, zr, zu) = (
        g.x_range, g.x_offset, g.y_start, g.y_step, g.z_range, g.z_up,
    );
    if left_back_leads {
        // leg 3 & 0 move
        vec![
            Keyframe::at(SpeedTier::Swing, vec![t(3, xr + xo, ys, zu)]),
            Keyframe::of(vec![t(3, xr + xo, ys + 2.0 * yst, zu)]),
            Keyframe::of(vec![t(3, xr + xo, ys + 2.0 * yst, zr)]),
            Keyframe::at(
                SpeedTier::Shift,
                vec![
                    t(0, xr + xo, ys + 2.0 * yst, zr),
                    t(1, xr + xo, ys, zr),
                    t(2, xr - xo, ys + yst, zr),
                    t(3, xr - xo, ys + yst, zr),
                ],
            ),
            Keyframe::at(SpeedTier::Swing, vec![t(0, xr + xo, ys + 2.0 * yst, zu)]),
            Keyframe::of(vec![t(0, xr + xo, ys, zu)]),
            Keyframe::of(vec![t(0, xr + xo, ys, zr)]),
        ]
    } else {
        // leg 1 & 2 move
        vec![
            Keyframe::at(SpeedTier::Swing, vec![t(1, xr + xo, ys, zu)]),
            Keyframe::of(vec![t(1, xr + xo, ys + 2.0 * yst, zu)]),
            Keyframe::of(vec![t(1, xr + xo, ys + 2.0 * yst, zr)]),
            Keyframe::at(
                SpeedTier::Shift,
                vec![
                    t(0, xr - xo, ys + yst, zr),
                    t(1, xr - xo, ys + yst, zr),
                    t(2, xr + xo, ys + 2.0 * yst, zr),
                    t(3, xr + xo, ys, zr),
                ],
            ),
            Keyframe::at(SpeedTier::Swing, vec![t(2, xr + xo, ys + 2.0 * yst, zu)]),
            Keyframe::of(vec![t(2, xr + xo, ys, zu)]),
            Keyframe::of(vec![t(2, xr + xo, ys, zr)]),
        ]
    }
}

/// Right turn about the body centre, using the precomputed turn waypoints.
/// Turns keep whatever move speed is currently configured.
pub fn turn_right(g: &LegGeometry, left_front_leads: bool) -> Vec<Keyframe> {
    let (xr, ys, yst, zr, zu) = (g.x_range, g.y_start, g.y_step, g.z_range, g.z_up);
    let (tx0, ty0, tx1, ty1) = (g.turn_x0, g.turn_y0, g.turn_x1, g.turn_y1);
    if left_front_leads {
        // leg 2 & 0 move
        vec![
            Keyframe::of(vec![t(2, xr, ys, zu)]),
            Keyframe::of(vec![
                t(0, tx0, ty0, zr),
                t(1, tx1, ty1, zr),
                t(2, tx0, ty0, zu),
                t(3, tx1, ty1, zr),
            ]),
            Keyframe::of(vec![t(2, tx0, ty0, zr)]),
            Keyframe::of(vec![
                t(0, tx0, ty0, zr),
                t(1, tx1, ty1, zr),
                t(2, tx0, ty0, zr),
                t(3, tx1, ty1, zr),
            ]),
            Keyframe::of(vec![t(0, tx0, ty0, zu)]),
            Keyframe::of(vec![
                t(0, xr, ys, zu),
                t(1, xr, ys, zr),
                t(2, xr, ys + yst, zr),
                t(3, xr, ys + yst, zr),
            ]),
            Keyframe::of(vec![t(0, xr, ys, zr)]),
        ]
    } else {
        // leg 1 & 3 move
        vec![
            Keyframe::of(vec![t(1, xr, ys, zu)]),
            Keyframe::of(vec![
                t(0, tx1, ty1, zr),
                t(1, tx0, ty0, zu),
                t(2, tx1, ty1, zr),
                t(3, tx0, ty0, zr),
            ]),
            Keyframe::of(vec![t(1, tx0, ty0, zr)]),
            Keyframe::of(vec![
                t(0, tx1, ty1, zr),
                t(1, tx0, ty0, zr),
                t(2, tx1, ty1, zr),
                t(3, tx0, ty0, zr),
            ]),
            Keyframe::of(vec![t(3, tx0, ty0, zu)]),
            Keyframe::of(vec![
                t(0, xr, ys + yst, zr),
                t(1, xr, ys + yst, zr),
                t(2, xr, ys, zr),
                t(3, xr, ys, zu),
            ]),
            Keyframe::of(vec![t(3, xr, ys, zr)]),
        ]
    }
}

/// Left turn, with the left back leg as the phase witness.
pub fn turn_left(g: &LegGeometry, left_back_leads: bool) -> Vec<Keyframe> {
    let (xr, ys, yst, zr, zu) = (g.x_range, g.y_start, g.y_step, g.z_range, g.z_up);
    let (tx0, ty0, tx1, ty1) = (g.turn_x0, g.turn_y0, g.turn_x1, g.turn_y1);
    if left_back_leads {
        // leg 3 & 1 move
        vec![
            Keyframe::of(vec![t(3, xr, ys, zu)]),
            Keyframe::of(vec![
                t(0, tx1, ty1, zr),
                t(1, tx0, ty0, zr),
                t(2, tx1, ty1, zr),
                t(3, tx0, ty0, zu),
            ]),
            Keyframe::of(vec![t(3, tx0, ty0, zr)]),
            Keyframe::of(vec![
                t(0, tx1, ty1, zr),
                t(1, tx0, ty0, zr),
                t(2, tx1, ty1, zr),
                t(3, tx0, ty0, zr),
            ]),
            Keyframe::of(vec![t(1, tx0, ty0, zu)]),
            Keyframe::of(vec![
                t(0, xr, ys, zr),
                t(1, xr, ys, zu),
                t(2, xr, ys + yst, zr),
                t(3, xr, ys + yst, zr),
            ]),
            Keyframe::of(vec![t(1, xr, ys, zr)]),
        ]
    } else {
        // leg 0 & 2 move
        vec![
            Keyframe::of(vec![t(0, xr, ys, zu)]),
            Keyframe::of(vec![
                t(0, tx0, ty0, zu),
                t(1, tx1, ty1, zr),
                t(2, tx0, ty0, zr),
                t(3, tx1, ty1, zr),
            ]),
            Keyframe::of(vec![t(0, tx0, ty0, zr)]),
            Keyframe::of(vec![
                t(0, tx0, ty0, zr),
                t(1, tx1, ty1, zr),
                t(2, tx0, ty0, zr),
                t(3, tx1, ty1, zr),
            ]),
            Keyframe::of(vec![t(2, tx0, ty0, zu)]),
            Keyframe::of(vec![
                t(0, xr, ys + yst, zr),
                t(1, xr, ys + yst, zr),
                t(2, xr, ys, zu),
                t(3, xr, ys, zr),
            ]),
            Keyframe::of(vec![t(2, xr, ys, zr)]),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trex_config::TrexConfig;

    fn geometry() -> LegGeometry {
        LegGeometry::new(&TrexConfig::default().geometry)
    }

    /// The last written target for a leg across all keyframes.
    fn final_target(frames: &[Keyframe], leg: usize) -> LegTarget {
        frames
            .iter()
            .flat_map(|frame| frame.targets.iter())
            .filter(|target| target.leg == leg)
            .copied()
            .last()
            .unwrap()
    }

    #[test]
    fn step_forward_phases_toggle_the_witness_leg() {
        let geometry = geometry();
        let leading = step_forward(&geometry, true);
        assert_eq!(final_target(&leading, 2).y, geometry.y_start + geometry.y_step);
        let trailing = step_forward(&geometry, false);
        assert_eq!(final_target(&trailing, 2).y, geometry.y_start);
    }

    #[test]
    fn step_backward_phases_toggle_the_witness_leg() {
        let geometry = geometry();
        let leading = step_backward(&geometry, true);
        assert_eq!(final_target(&leading, 3).y, geometry.y_start + geometry.y_step);
        let trailing = step_backward(&geometry, false);
        assert_eq!(final_target(&trailing, 3).y, geometry.y_start);
    }

    #[test]
    fn step_gaits_alternate_swing_and_shift() {
        let geometry = geometry();
        for frames in [
            step_forward(&geometry, true),
            step_forward(&geometry, false),
            step_backward(&geometry, true),
            step_backward(&geometry, false),
        ] {
            assert_eq!(frames.len(), 7);
            assert_eq!(frames[0].speed, Some(SpeedTier::Swing));
            assert_eq!(frames[3].speed, Some(SpeedTier::Shift));
            assert_eq!(frames[4].speed, Some(SpeedTier::Swing));
        }
    }

    #[test]
    fn turns_keep_the_configured_speed() {
        let geometry = geometry();
        for frames in [
            turn_right(&geometry, true),
            turn_right(&geometry, false),
            turn_left(&geometry, true),
            turn_left(&geometry, false),
        ] {
            assert_eq!(frames.len(), 7);
            assert!(frames.iter().all(|frame| frame.speed.is_none()));
        }
    }

    #[test]
    fn turn_gaits_end_back_on_the_stance_rectangle() {
        let geometry = geometry();
        let frames = turn_right(&geometry, true);
        for leg in 0..4 {
            let target = final_target(&frames, leg);
            assert_eq!(target.x, geometry.x_range);
            assert_eq!(target.z, geometry.z_range);
        }
    }

    #[test]
    fn every_batch_lands_a_body_shift_on_all_four_legs() {
        let geometry = geometry();
        let frames = step_forward(&geometry, true);
        assert_eq!(frames[3].targets.len(), 4);
        let legs: Vec<usize> = frames[3].targets.iter().map(|target| target.leg).collect();
        assert_eq!(legs, vec![0, 1, 2, 3]);
    }
}
