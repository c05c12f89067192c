//! Offscreen rendering of the Atelier viewport.
//!
//! [`RenderEngine`] owns a color + depth/stencil target and draws a lit, textured cube
//! and a light indicator into it every frame. All GPU work goes through [`GpuBackend`],
//! implemented by [`WgpuBackend`] for real devices and [`HeadlessBackend`] for tests.

pub mod backend;
pub mod engine;
pub mod error;
pub mod mesh;
pub mod settings;
pub mod shader;
pub mod shaders;
pub mod target;
pub mod texture;
pub mod uniforms;

pub use backend::{GpuBackend, HeadlessBackend, TextureId, WgpuBackend};
pub use engine::{EngineState, RenderEngine, ShaderPair, ShaderSources};
pub use error::RenderError;
pub use mesh::{GeometryBuffer, Vertex};
pub use settings::RenderSettings;
pub use shader::{ShaderError, ShaderProgram, ShaderStage};
pub use target::OffscreenTarget;
pub use texture::Texture;
pub use uniforms::{UniformLocation, UniformValue};
