use std::sync::Arc;

use atelier_core::{Camera, Time};
use atelier_renderer::{RenderEngine, WgpuBackend};
use winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::WindowEvent,
    event_loop::ActiveEventLoop,
    window::{Window, WindowId},
};

use crate::{
    config::{AppConfig, AppError},
    egui_state::EguiState,
    gpu::Gpu,
    ui::{UiState, ViewportInput, apply_camera_input},
};

/// Everything that exists only while the window does.
struct AppState {
    window: Arc<Window>,
    gpu: Gpu,
    egui: EguiState,
    engine: RenderEngine<WgpuBackend>,
    camera: Camera,
    time: Time,
    ui: UiState,
}

impl AppState {
    fn new(event_loop: &ActiveEventLoop, config: &AppConfig) -> Result<Self, AppError> {
        let attributes = Window::default_attributes()
            .with_title(config.window.title.as_str())
            .with_inner_size(LogicalSize::new(config.window.width, config.window.height));
        let window = Arc::new(event_loop.create_window(attributes)?);

        let (gpu, backend) = Gpu::new(window.clone())?;
        let egui = EguiState::new(&gpu, &window);

        let size = window.inner_size();
        let mut engine = RenderEngine::with_size(backend, size.width.max(1), size.height.max(1))
            .with_settings(config.render.clone());
        engine.initialize()?;

        Ok(Self {
            window,
            gpu,
            egui,
            engine,
            camera: Camera::default(),
            time: Time::default(),
            ui: UiState::default(),
        })
    }

    /// Runs one UI frame. Returns `true` when the user asked to quit.
    fn redraw(&mut self) -> bool {
        self.time.update();

        let Some(frame) = self.gpu.acquire() else {
            return false;
        };

        let raw_input = self.egui.state.take_egui_input(&self.window);
        let ctx = self.egui.context.clone();
        ctx.begin_pass(raw_input);

        let actions =
            self.ui
                .show_panels(&ctx, &mut self.engine.settings, &self.camera, &self.time);

        let mut input = ViewportInput::default();
        egui::CentralPanel::default()
            .frame(egui::Frame::NONE)
            .show(&ctx, |ui| input = self.viewport(ui));

        if actions.reset_view {
            self.camera = Camera::default();
        } else {
            apply_camera_input(&mut self.camera, &input, self.time.delta_seconds());
        }

        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        self.egui.end_frame(&self.gpu, &self.window, &view);
        self.window.pre_present_notify();
        frame.present();

        actions.exit
    }

    /// Renders the scene at the panel's pixel size and shows it.
    fn viewport(&mut self, ui: &mut egui::Ui) -> ViewportInput {
        let size = ui.available_size();
        let pixels_per_point = ui.ctx().pixels_per_point();

        self.engine.set_camera(&self.camera);
        self.engine.resize(
            (size.x * pixels_per_point).round() as i32,
            (size.y * pixels_per_point).round() as i32,
        );
        self.engine.render(self.time.elapsed_seconds());

        let Some(view) = self
            .engine
            .get_texture_id()
            .and_then(|id| self.engine.backend().texture_view(id))
        else {
            return ViewportInput::default();
        };
        let texture = self
            .egui
            .viewport_texture(&self.gpu.device, view, self.engine.size());

        let (uv_min, uv_max) = self.engine.texture_uv_rect();
        let image = egui::Image::new(egui::load::SizedTexture::new(texture, size))
            .uv(egui::Rect::from_min_max(
                egui::pos2(uv_min[0], uv_min[1]),
                egui::pos2(uv_max[0], uv_max[1]),
            ))
            .sense(egui::Sense::click_and_drag());
        let response = ui.add(image);

        ViewportInput::from_response(ui.ctx(), &response)
    }
}

pub struct AtelierRunner {
    config: AppConfig,
    state: Option<AppState>,
    error: Option<AppError>,
}

impl AtelierRunner {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            state: None,
            error: None,
        }
    }

    /// The error that stopped the event loop, if any.
    pub fn finish(self) -> Result<(), AppError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(mut state) = self.state.take() {
            state.engine.cleanup();
        }
        event_loop.exit();
    }
}

impl ApplicationHandler for AtelierRunner {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        match AppState::new(event_loop, &self.config) {
            Ok(state) => self.state = Some(state),
            Err(err) => {
                self.error = Some(err);
                event_loop.exit();
            }
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.window.request_redraw();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        let Some(state) = self.state.as_mut() else {
            return;
        };

        let _ = state.egui.state.on_window_event(&state.window, &event);

        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested; stopping");
                self.shutdown(event_loop);
            }
            WindowEvent::Resized(size) => {
                state.gpu.resize(size.width, size.height);
            }
            WindowEvent::RedrawRequested => {
                if state.redraw() {
                    self.shutdown(event_loop);
                }
            }
            _ => (),
        }
    }
}
