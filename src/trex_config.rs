use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::TrexResult;

/// Leg segment lengths and the stance ranges used by the gait scripts.
/// All lengths in millimetres in the leg-local frame.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct GeometryConfig {
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
}

/// Speed tiers in millimetres per servo tick.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct SpeedConfig {
    pub move_speed: f64,
    pub leg_move_speed: f64,
    pub body_move_speed: f64,
}

/// Factory calibration poses. `reference` is the pose every leg is driven
/// to in calibrate mode; the per-leg entries are where each leg actually
/// ended up on this unit.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct CalibrationConfig {
    pub reference: [f64; 3],
    pub right_front: [f64; 3],
    pub right_back: [f64; 3],
    pub left_front: [f64; 3],
    pub left_back: [f64; 3],
}

impl CalibrationConfig {
    pub fn measured(&self, leg_index: usize) -> [f64; 3] {
        match leg_index {
            0 => self.right_front,
            1 => self.right_back,
            2 => self.left_front,
            _ => self.left_back,
        }
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct TrexConfig {
    pub geometry: GeometryConfig,
    pub speeds: SpeedConfig,
    pub calibration: CalibrationConfig,
}

impl TrexConfig {
    pub fn load(path: &Path) -> TrexResult<TrexConfig> {
        let text = fs::read_to_string(path)?;
        let deserialized_config: TrexConfig = toml::from_str(&text)?;
        Ok(deserialized_config)
    }

    pub fn save_as_toml(&self, path: &Path) -> TrexResult<()> {
        fs::write(path, toml::to_string_pretty(&self)?)?;
        Ok(())
    }
}

impl Default for TrexConfig {
    fn default() -> Self {
        toml::from_str(include_str!("../config/ttrex.toml")).unwrap()
    }
}
