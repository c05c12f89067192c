use std::path::PathBuf;

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Everything a host may tweak between frames.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub background_color: [f32; 4],
    pub wireframe_mode: bool,
    pub light_intensity: f32,
    /// Radians per second of scene time.
    pub rotation_speed: f32,
    pub rotation_axis: Vec3,
    pub light_pos: Vec3,
    pub light_color: Vec3,
    pub light_indicator_scale: f32,
    pub diffuse_texture: PathBuf,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            background_color: [0.1, 0.1, 0.1, 1.0],
            wireframe_mode: false,
            light_intensity: 1.0,
            rotation_speed: 0.5,
            rotation_axis: Vec3::new(0.5, 1.0, 0.0),
            light_pos: Vec3::new(1.2, 1.0, 2.0),
            light_color: Vec3::ONE,
            light_indicator_scale: 0.2,
            diffuse_texture: PathBuf::from("assets/textures/container2.png"),
        }
    }
}
