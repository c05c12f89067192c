use atelier_core::{Camera, CameraMovement, Time};
use atelier_renderer::RenderSettings;
use glam::Vec3;

/// World units moved per scroll line.
const SCROLL_STEP: f32 = 0.5;
/// egui reports smooth scroll in points; one wheel notch is about this many.
const POINTS_PER_LINE: f32 = 50.0;

const CUBE_VERTICES: usize = 24;
const CUBE_TRIANGLES: usize = 12;
/// The lit cube and the light indicator.
const CUBES_PER_FRAME: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tool {
    Select,
    Move,
    Rotate,
    Scale,
    VertexEdit,
}

impl Tool {
    pub const ALL: [Tool; 5] = [
        Tool::Select,
        Tool::Move,
        Tool::Rotate,
        Tool::Scale,
        Tool::VertexEdit,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Tool::Select => "Select",
            Tool::Move => "Move",
            Tool::Rotate => "Rotate",
            Tool::Scale => "Scale",
            Tool::VertexEdit => "Vertex Edit",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SceneObject {
    Cube,
    Light,
}

impl SceneObject {
    pub fn label(self) -> &'static str {
        match self {
            SceneObject::Cube => "Cube",
            SceneObject::Light => "Light",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoordinateSystem {
    Local,
    World,
}

impl CoordinateSystem {
    pub fn label(self) -> &'static str {
        match self {
            CoordinateSystem::Local => "Local",
            CoordinateSystem::World => "World",
        }
    }
}

/// What the user did inside the viewport this frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ViewportInput {
    pub hovered: bool,
    /// Pointer travel while the secondary button is held, in points. +y is down.
    pub look_delta: [f32; 2],
    /// Scroll in lines, positive away from the user.
    pub scroll: f32,
    pub forward: bool,
    pub backward: bool,
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,
}

impl ViewportInput {
    pub fn from_response(ctx: &egui::Context, response: &egui::Response) -> Self {
        let hovered = response.hovered();
        let look_delta = if response.dragged_by(egui::PointerButton::Secondary) {
            let delta = response.drag_delta();
            [delta.x, delta.y]
        } else {
            [0.0, 0.0]
        };

        if !hovered {
            return Self {
                look_delta,
                ..Self::default()
            };
        }

        // Keys only drive the camera while no text field has focus.
        let typing = ctx.wants_keyboard_input();
        ctx.input(|i| {
            let key = |k| !typing && i.key_down(k);
            Self {
                hovered,
                look_delta,
                scroll: i.smooth_scroll_delta.y / POINTS_PER_LINE,
                forward: key(egui::Key::W),
                backward: key(egui::Key::S),
                left: key(egui::Key::A),
                right: key(egui::Key::D),
                up: key(egui::Key::E),
                down: key(egui::Key::Q),
            }
        })
    }
}

/// Moves `camera` according to `input`. Movement keys only count while hovered.
pub fn apply_camera_input(camera: &mut Camera, input: &ViewportInput, delta_seconds: f32) {
    let [dx, dy] = input.look_delta;
    if dx != 0.0 || dy != 0.0 {
        camera.look(dx, -dy, true);
    }

    if !input.hovered {
        return;
    }

    if input.scroll != 0.0 {
        camera.position += camera.front() * input.scroll * SCROLL_STEP;
    }

    let moves = [
        (input.forward, CameraMovement::Forward),
        (input.backward, CameraMovement::Backward),
        (input.left, CameraMovement::Left),
        (input.right, CameraMovement::Right),
        (input.up, CameraMovement::Up),
        (input.down, CameraMovement::Down),
    ];
    for (held, direction) in moves {
        if held {
            camera.move_in(direction, delta_seconds);
        }
    }
}

/// Actions the panels ask the runner to perform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UiActions {
    pub exit: bool,
    pub reset_view: bool,
}

pub struct UiState {
    pub tool: Tool,
    pub selection: SceneObject,
    pub coordinate_system: CoordinateSystem,
    pub status: String,
    pub show_left_panel: bool,
    pub show_right_panel: bool,
    pub show_status_bar: bool,
    pub about_open: bool,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            tool: Tool::Select,
            selection: SceneObject::Cube,
            coordinate_system: CoordinateSystem::World,
            status: "Ready".to_string(),
            show_left_panel: true,
            show_right_panel: true,
            show_status_bar: true,
            about_open: false,
        }
    }
}

impl UiState {
    /// Draws every panel except the central viewport.
    pub fn show_panels(
        &mut self,
        ctx: &egui::Context,
        settings: &mut RenderSettings,
        camera: &Camera,
        time: &Time,
    ) -> UiActions {
        let mut actions = UiActions::default();

        egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
            egui::MenuBar::new().ui(ui, |ui| {
                self.menu(ui, settings, &mut actions);
            });
        });

        if self.show_status_bar {
            egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.label(self.status.as_str());
                    ui.separator();
                    ui.label(format!("Tool: {}", self.tool.label()));
                    ui.separator();
                    ui.label(format!("Coordinates: {}", self.coordinate_system.label()));
                });
            });
        }

        if self.show_left_panel {
            egui::SidePanel::left("tools_panel")
                .default_width(180.0)
                .show(ctx, |ui| self.left_panel(ui));
        }

        if self.show_right_panel {
            egui::SidePanel::right("properties_panel")
                .default_width(260.0)
                .show(ctx, |ui| self.right_panel(ui, settings, camera, time));
        }

        egui::Window::new("About Atelier")
            .open(&mut self.about_open)
            .collapsible(false)
            .resizable(false)
            .show(ctx, |ui| {
                ui.label(format!("Atelier {}", env!("CARGO_PKG_VERSION")));
                ui.label("Offscreen 3D viewport built on wgpu and egui.");
            });

        actions
    }

    fn menu(&mut self, ui: &mut egui::Ui, settings: &mut RenderSettings, actions: &mut UiActions) {
        ui.menu_button("File", |ui| {
            for item in ["New", "Open", "Save"] {
                if ui.button(item).clicked() {
                    self.status = format!("{item} is not available yet");
                    ui.close();
                }
            }
            ui.separator();
            if ui.button("Exit").clicked() {
                actions.exit = true;
                ui.close();
            }
        });

        ui.menu_button("Edit", |ui| {
            for item in ["Undo", "Redo"] {
                if ui.button(item).clicked() {
                    self.status = format!("Nothing to {}", item.to_lowercase());
                    ui.close();
                }
            }
        });

        ui.menu_button("View", |ui| {
            if ui.button("Reset View").clicked() {
                actions.reset_view = true;
                self.status = "View reset".to_string();
                ui.close();
            }
            ui.checkbox(&mut settings.wireframe_mode, "Wireframe");
            ui.separator();
            ui.checkbox(&mut self.show_left_panel, "Tools Panel");
            ui.checkbox(&mut self.show_right_panel, "Properties Panel");
            ui.checkbox(&mut self.show_status_bar, "Status Bar");
        });

        ui.menu_button("Help", |ui| {
            if ui.button("About").clicked() {
                self.about_open = true;
                ui.close();
            }
        });
    }

    fn left_panel(&mut self, ui: &mut egui::Ui) {
        ui.heading("Tools");
        for tool in Tool::ALL {
            ui.selectable_value(&mut self.tool, tool, tool.label());
        }

        ui.separator();
        egui::ComboBox::from_id_salt("coordinate_system")
            .selected_text(self.coordinate_system.label())
            .show_ui(ui, |ui| {
                for system in [CoordinateSystem::Local, CoordinateSystem::World] {
                    ui.selectable_value(&mut self.coordinate_system, system, system.label());
                }
            });

        ui.separator();
        ui.heading("Scene");
        for object in [SceneObject::Cube, SceneObject::Light] {
            ui.selectable_value(&mut self.selection, object, object.label());
        }
    }

    fn right_panel(
        &mut self,
        ui: &mut egui::Ui,
        settings: &mut RenderSettings,
        camera: &Camera,
        time: &Time,
    ) {
        egui::CollapsingHeader::new("Transform")
            .default_open(true)
            .show(ui, |ui| match self.selection {
                SceneObject::Cube => {
                    ui.label("Position: 0.00, 0.00, 0.00");
                    ui.label(format!(
                        "Rotation: {:.2} rad/s about {}",
                        settings.rotation_speed,
                        format_vec3(settings.rotation_axis)
                    ));
                }
                SceneObject::Light => {
                    ui.horizontal(|ui| {
                        ui.label("Position");
                        ui.add(egui::DragValue::new(&mut settings.light_pos.x).speed(0.05));
                        ui.add(egui::DragValue::new(&mut settings.light_pos.y).speed(0.05));
                        ui.add(egui::DragValue::new(&mut settings.light_pos.z).speed(0.05));
                    });
                }
            });

        egui::CollapsingHeader::new("Camera")
            .default_open(false)
            .show(ui, |ui| {
                ui.label(format!("Position: {}", format_vec3(camera.position)));
                ui.label(format!("Yaw {:.1}, pitch {:.1}", camera.yaw, camera.pitch));
            });

        egui::CollapsingHeader::new("Rendering")
            .default_open(true)
            .show(ui, |ui| {
                ui.checkbox(&mut settings.wireframe_mode, "Wireframe");
                ui.horizontal(|ui| {
                    ui.label("Background");
                    ui.color_edit_button_rgba_unmultiplied(&mut settings.background_color);
                });
                ui.add(
                    egui::Slider::new(&mut settings.light_intensity, 0.0..=3.0)
                        .text("Light intensity"),
                );
                ui.add(
                    egui::Slider::new(&mut settings.rotation_speed, -5.0..=5.0)
                        .text("Rotation speed"),
                );
                ui.horizontal(|ui| {
                    ui.label("Light color");
                    let mut color = settings.light_color.to_array();
                    if ui.color_edit_button_rgb(&mut color).changed() {
                        settings.light_color = Vec3::from_array(color);
                    }
                });
            });

        egui::CollapsingHeader::new("Performance")
            .default_open(true)
            .show(ui, |ui| {
                ui.label(format!("FPS: {:.0}", time.fps()));
                ui.label(format!("Frame time: {:.2} ms", time.delta_seconds() * 1000.0));
                ui.label(format!("Vertices: {}", CUBE_VERTICES * CUBES_PER_FRAME));
                ui.label(format!("Triangles: {}", CUBE_TRIANGLES * CUBES_PER_FRAME));
            });
    }
}

fn format_vec3(v: Vec3) -> String {
    format!("{:.2}, {:.2}, {:.2}", v.x, v.y, v.z)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> Camera {
        Camera::new(Vec3::new(0.0, 0.0, 3.0), Vec3::Y, -90.0, 0.0)
    }

    #[test]
    fn movement_needs_hover() {
        let mut cam = camera();
        let input = ViewportInput {
            forward: true,
            scroll: 2.0,
            ..Default::default()
        };

        apply_camera_input(&mut cam, &input, 1.0);

        assert_eq!(cam.position, Vec3::new(0.0, 0.0, 3.0));
    }

    #[test]
    fn forward_moves_along_front() {
        let mut cam = camera();
        let input = ViewportInput {
            hovered: true,
            forward: true,
            ..Default::default()
        };

        apply_camera_input(&mut cam, &input, 0.5);

        let expected = 3.0 - cam.movement_speed * 0.5;
        assert!((cam.position.z - expected).abs() < 1e-5);
        assert!(cam.position.x.abs() < 1e-5);
    }

    #[test]
    fn opposite_keys_cancel() {
        let mut cam = camera();
        let input = ViewportInput {
            hovered: true,
            left: true,
            right: true,
            up: true,
            down: true,
            ..Default::default()
        };

        apply_camera_input(&mut cam, &input, 1.0);

        assert!(cam.position.abs_diff_eq(Vec3::new(0.0, 0.0, 3.0), 1e-5));
    }

    #[test]
    fn scroll_dollies_towards_the_view() {
        let mut cam = camera();
        let input = ViewportInput {
            hovered: true,
            scroll: 2.0,
            ..Default::default()
        };

        apply_camera_input(&mut cam, &input, 0.0);

        assert!((cam.position.z - (3.0 - 2.0 * SCROLL_STEP)).abs() < 1e-5);
    }

    #[test]
    fn dragging_up_pitches_up() {
        let mut cam = camera();
        let input = ViewportInput {
            look_delta: [10.0, -20.0],
            ..Default::default()
        };

        apply_camera_input(&mut cam, &input, 0.0);

        assert!(cam.yaw > -90.0);
        assert!(cam.pitch > 0.0);
    }

    #[test]
    fn status_starts_ready_with_panels_visible() {
        let ui = UiState::default();
        assert_eq!(ui.status, "Ready");
        assert!(ui.show_left_panel && ui.show_right_panel && ui.show_status_bar);
        assert_eq!(ui.tool, Tool::Select);
    }
}
