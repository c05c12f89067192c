//! WGSL sources of the two bundled programs.

pub const LIT_VERTEX: &str = include_str!("shaders/lit.vert.wgsl");
pub const LIT_FRAGMENT: &str = include_str!("shaders/lit.frag.wgsl");

pub const LIGHT_VERTEX: &str = include_str!("shaders/light.vert.wgsl");
pub const LIGHT_FRAGMENT: &str = include_str!("shaders/light.frag.wgsl");
