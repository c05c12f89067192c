use egui_wgpu::{RendererOptions, ScreenDescriptor};
use winit::window::Window;

use crate::gpu::Gpu;

pub struct EguiState {
    pub context: egui::Context,
    pub state: egui_winit::State,
    pub renderer: egui_wgpu::Renderer,
    /// The engine's output as an egui texture, re-pointed whenever its storage changes.
    viewport_texture: Option<(egui::TextureId, (u32, u32))>,
}

impl EguiState {
    pub fn new(gpu: &Gpu, window: &Window) -> Self {
        let context = egui::Context::default();

        let viewport_id = context.viewport_id();
        let state = egui_winit::State::new(
            context.clone(),
            viewport_id,
            window,
            Some(window.scale_factor() as f32),
            None,
            None,
        );

        let renderer =
            egui_wgpu::Renderer::new(&gpu.device, gpu.config.format, RendererOptions::PREDICTABLE);

        Self {
            context,
            state,
            renderer,
            viewport_texture: None,
        }
    }

    /// Registers `view` as the viewport image, or re-points the existing id after a resize.
    pub fn viewport_texture(
        &mut self,
        device: &wgpu::Device,
        view: &wgpu::TextureView,
        size: (u32, u32),
    ) -> egui::TextureId {
        match self.viewport_texture {
            Some((id, registered)) if registered == size => id,
            Some((id, _)) => {
                self.renderer.update_egui_texture_from_wgpu_texture(
                    device,
                    view,
                    wgpu::FilterMode::Linear,
                    id,
                );
                self.viewport_texture = Some((id, size));
                id
            }
            None => {
                let id = self
                    .renderer
                    .register_native_texture(device, view, wgpu::FilterMode::Linear);
                self.viewport_texture = Some((id, size));
                id
            }
        }
    }

    /// Ends the egui pass and paints it over the swapchain image.
    pub fn end_frame(&mut self, gpu: &Gpu, window: &Window, target: &wgpu::TextureView) {
        let full_output = self.context.end_pass();
        self.state
            .handle_platform_output(window, full_output.platform_output);

        let paint_jobs = self
            .context
            .tessellate(full_output.shapes, self.context.pixels_per_point());
        let screen_descriptor = ScreenDescriptor {
            size_in_pixels: [gpu.config.width, gpu.config.height],
            pixels_per_point: self.context.pixels_per_point(),
        };

        for (id, delta) in &full_output.textures_delta.set {
            self.renderer
                .update_texture(&gpu.device, &gpu.queue, *id, delta);
        }

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Egui Encoder"),
            });
        let command_buffers = self.renderer.update_buffers(
            &gpu.device,
            &gpu.queue,
            &mut encoder,
            &paint_jobs,
            &screen_descriptor,
        );
        {
            let pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Egui Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: 0.06,
                            g: 0.06,
                            b: 0.06,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            let mut pass = pass.forget_lifetime();
            self.renderer
                .render(&mut pass, &paint_jobs, &screen_descriptor);
        }
        for id in &full_output.textures_delta.free {
            self.renderer.free_texture(id);
        }

        gpu.queue.submit(
            command_buffers
                .into_iter()
                .chain(std::iter::once(encoder.finish())),
        );
    }
}
