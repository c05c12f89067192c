use std::borrow::Cow;

use atelier_core::{Camera, camera::perspective};
use glam::{Mat4, Vec3};

use crate::{
    backend::{BlendMode, GpuBackend, ImageOrigin, PolygonMode, TextureId},
    error::RenderError,
    mesh::GeometryBuffer,
    settings::RenderSettings,
    shader::ShaderProgram,
    shaders,
    target::OffscreenTarget,
    texture::Texture,
    uniforms::UniformLocation,
};

pub const DEFAULT_WIDTH: u32 = 800;
pub const DEFAULT_HEIGHT: u32 = 600;

const FOV_DEGREES: f32 = 45.0;
const SHININESS: f32 = 32.0;

#[derive(Clone, Debug)]
pub struct ShaderPair {
    pub vertex: Cow<'static, str>,
    pub fragment: Cow<'static, str>,
}

/// Sources compiled on [`RenderEngine::initialize`]. Replace them before initializing to
/// run custom programs with the same uniform names.
#[derive(Clone, Debug)]
pub struct ShaderSources {
    pub lit: ShaderPair,
    pub light: ShaderPair,
}

impl Default for ShaderSources {
    fn default() -> Self {
        Self {
            lit: ShaderPair {
                vertex: Cow::Borrowed(shaders::LIT_VERTEX),
                fragment: Cow::Borrowed(shaders::LIT_FRAGMENT),
            },
            light: ShaderPair {
                vertex: Cow::Borrowed(shaders::LIGHT_VERTEX),
                fragment: Cow::Borrowed(shaders::LIGHT_FRAGMENT),
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Initialized,
}

struct LitLocations {
    model: UniformLocation,
    view: UniformLocation,
    projection: UniformLocation,
    normal_matrix: UniformLocation,
    view_pos: UniformLocation,
    light_position: UniformLocation,
    light_ambient: UniformLocation,
    light_diffuse: UniformLocation,
    light_specular: UniformLocation,
    shininess: UniformLocation,
    samplers: Vec<UniformLocation>,
}

impl LitLocations {
    fn resolve(program: &ShaderProgram, cube: &GeometryBuffer) -> Self {
        Self {
            model: program.location("model"),
            view: program.location("view"),
            projection: program.location("projection"),
            normal_matrix: program.location("normal_matrix"),
            view_pos: program.location("view_pos"),
            light_position: program.location("light.position"),
            light_ambient: program.location("light.ambient"),
            light_diffuse: program.location("light.diffuse"),
            light_specular: program.location("light.specular"),
            shininess: program.location("material.shininess"),
            samplers: cube.sampler_locations(program),
        }
    }
}

struct LightLocations {
    model: UniformLocation,
    view: UniformLocation,
    projection: UniformLocation,
    light_color: UniformLocation,
    samplers: Vec<UniformLocation>,
}

impl LightLocations {
    fn resolve(program: &ShaderProgram, cube: &GeometryBuffer) -> Self {
        Self {
            model: program.location("model"),
            view: program.location("view"),
            projection: program.location("projection"),
            light_color: program.location("light_color"),
            samplers: cube.sampler_locations(program),
        }
    }
}

/// Everything that only exists while the engine is initialized.
struct GpuResources {
    target: OffscreenTarget,
    lit: ShaderProgram,
    lit_locations: LitLocations,
    light: ShaderProgram,
    light_locations: LightLocations,
    /// Owns the diffuse texture.
    cube: GeometryBuffer,
}

/// Renders a lit, textured cube and a light indicator into an offscreen color texture.
///
/// Binding state: `initialize` enables depth testing and alpha blending. `render` leaves
/// no framebuffer and no vertex array bound, the program and texture unit 0 stay as the
/// light pass left them.
pub struct RenderEngine<B: GpuBackend> {
    backend: B,
    width: u32,
    height: u32,

    pub camera_pos: Vec3,
    pub camera_front: Vec3,
    pub camera_up: Vec3,
    pub settings: RenderSettings,
    pub shaders: ShaderSources,

    resources: Option<GpuResources>,
}

impl<B: GpuBackend> RenderEngine<B> {
    pub fn new(backend: B) -> Self {
        Self::with_size(backend, DEFAULT_WIDTH, DEFAULT_HEIGHT)
    }

    pub fn with_size(backend: B, width: u32, height: u32) -> Self {
        Self {
            backend,
            width: width.max(1),
            height: height.max(1),
            camera_pos: Vec3::new(0.0, 0.0, 3.0),
            camera_front: Vec3::NEG_Z,
            camera_up: Vec3::Y,
            settings: RenderSettings::default(),
            shaders: ShaderSources::default(),
            resources: None,
        }
    }

    pub fn with_settings(mut self, settings: RenderSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Creates every GPU resource. Does nothing when already initialized.
    ///
    /// On error nothing created by this call is left alive and the engine stays
    /// uninitialized.
    pub fn initialize(&mut self) -> Result<(), RenderError> {
        if self.resources.is_some() {
            return Ok(());
        }
        log::info!(
            "Initializing render engine on {} at {}x{}",
            self.backend.describe(),
            self.width,
            self.height
        );

        let backend = &mut self.backend;
        let target = OffscreenTarget::new(backend, self.width, self.height)?;

        let lit = match ShaderProgram::compile_and_link(
            backend,
            "lit",
            &self.shaders.lit.vertex,
            &self.shaders.lit.fragment,
        ) {
            Ok(program) => program,
            Err(source) => {
                target.delete(backend);
                return Err(RenderError::Shader {
                    program: "lit",
                    source,
                });
            }
        };
        let light = match ShaderProgram::compile_and_link(
            backend,
            "light",
            &self.shaders.light.vertex,
            &self.shaders.light.fragment,
        ) {
            Ok(program) => program,
            Err(source) => {
                lit.delete(backend);
                target.delete(backend);
                return Err(RenderError::Shader {
                    program: "light",
                    source,
                });
            }
        };

        backend.set_depth_test(true);
        backend.set_blend(Some(BlendMode::Alpha));

        let diffuse = Texture::load(backend, &self.settings.diffuse_texture);
        let mut cube = GeometryBuffer::create_cube(backend);
        cube.attach_texture(diffuse);

        self.resources = Some(GpuResources {
            target,
            lit_locations: LitLocations::resolve(&lit, &cube),
            lit,
            light_locations: LightLocations::resolve(&light, &cube),
            light,
            cube,
        });
        log::info!("Render engine initialized");
        Ok(())
    }

    /// Reallocates the offscreen attachments in place. Ignored before `initialize` and
    /// for non-positive sizes. Sizes beyond the backend's texture limit are clamped to it.
    pub fn resize(&mut self, width: i32, height: i32) {
        if width <= 0 || height <= 0 {
            return;
        }
        let Some(resources) = self.resources.as_mut() else {
            return;
        };

        let max = self.backend.max_texture_extent();
        let (requested_width, requested_height) = (width as u32, height as u32);
        let (width, height) = (requested_width.min(max), requested_height.min(max));
        if (width, height) == (self.width, self.height) {
            return;
        }
        if (width, height) != (requested_width, requested_height) {
            log::warn!(
                "Offscreen target {requested_width}x{requested_height} exceeds the {max} texture limit; using {width}x{height}"
            );
        }

        log::debug!(
            "Resizing offscreen target {}x{} -> {width}x{height}",
            self.width,
            self.height
        );
        resources.target.resize(&mut self.backend, width, height);
        self.width = width;
        self.height = height;
    }

    /// Draws one frame. `time` is scene time in seconds and drives the cube's rotation.
    pub fn render(&mut self, time: f32) {
        let Some(res) = self.resources.as_ref() else {
            return;
        };
        let backend = &mut self.backend;
        let settings = &self.settings;

        res.target.bind(backend);
        backend.clear(settings.background_color);
        backend.set_polygon_mode(if settings.wireframe_mode {
            PolygonMode::Line
        } else {
            PolygonMode::Fill
        });

        let view = Mat4::look_at_rh(
            self.camera_pos,
            self.camera_pos + self.camera_front,
            self.camera_up,
        );
        let projection = perspective(FOV_DEGREES, self.width as f32 / self.height as f32);

        // Lit cube
        let (lit, loc) = (&res.lit, &res.lit_locations);
        let axis = settings.rotation_axis.try_normalize().unwrap_or(Vec3::Y);
        let model = Mat4::from_axis_angle(axis, time * settings.rotation_speed);
        let intensity = settings.light_intensity;

        lit.use_program(backend);
        lit.set(backend, loc.view, view);
        lit.set(backend, loc.projection, projection);
        lit.set(backend, loc.model, model);
        lit.set(backend, loc.normal_matrix, model.inverse().transpose());
        lit.set(backend, loc.view_pos, self.camera_pos);
        lit.set(backend, loc.light_position, settings.light_pos);
        lit.set(backend, loc.light_ambient, Vec3::splat(0.2 * intensity));
        lit.set(backend, loc.light_diffuse, Vec3::splat(0.5 * intensity));
        lit.set(backend, loc.light_specular, Vec3::splat(intensity));
        lit.set(backend, loc.shininess, SHININESS);
        res.cube.draw(backend, lit, &loc.samplers);

        // Light indicator
        let (light, loc) = (&res.light, &res.light_locations);
        let model = Mat4::from_translation(settings.light_pos)
            * Mat4::from_scale(Vec3::splat(settings.light_indicator_scale));

        light.use_program(backend);
        light.set(backend, loc.view, view);
        light.set(backend, loc.projection, projection);
        light.set(backend, loc.model, model);
        light.set(backend, loc.light_color, settings.light_color * intensity);
        res.cube.draw(backend, light, &loc.samplers);

        backend.bind_vertex_array(None);
        backend.bind_framebuffer(None);
    }

    /// The offscreen color texture. The id survives resizes.
    pub fn get_texture_id(&self) -> Option<TextureId> {
        self.resources
            .as_ref()
            .map(|res| res.target.color_texture())
    }

    /// UV corners `(min, max)` that show the output upright in a top-left origin UI.
    pub fn texture_uv_rect(&self) -> ([f32; 2], [f32; 2]) {
        match self.backend.image_origin() {
            ImageOrigin::BottomLeft => ([0.0, 1.0], [1.0, 0.0]),
            ImageOrigin::TopLeft => ([0.0, 0.0], [1.0, 1.0]),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn state(&self) -> EngineState {
        if self.resources.is_some() {
            EngineState::Initialized
        } else {
            EngineState::Uninitialized
        }
    }

    /// Copies the camera's position and basis into the engine's camera scalars.
    pub fn set_camera(&mut self, camera: &Camera) {
        self.camera_pos = camera.position;
        self.camera_front = camera.front();
        self.camera_up = camera.up();
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Releases every GPU resource. Does nothing when uninitialized.
    pub fn cleanup(&mut self) {
        let Some(res) = self.resources.take() else {
            return;
        };

        let backend = &mut self.backend;
        res.target.delete(backend);
        res.cube.delete(backend);
        res.lit.delete(backend);
        res.light.delete(backend);
        log::info!("Render engine resources released");
    }
}

impl<B: GpuBackend> Drop for RenderEngine<B> {
    fn drop(&mut self) {
        self.cleanup();
    }
}
