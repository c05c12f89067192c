//! Host-independent building blocks shared by the renderer and the editor shell.

pub mod camera;
pub mod time;

pub use camera::{Camera, CameraMovement};
pub use time::Time;
