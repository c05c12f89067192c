use atelier_renderer::{
    EngineState, GpuBackend, HeadlessBackend, RenderEngine, RenderError, RenderSettings,
    backend::{BlendMode, FramebufferStatus, PolygonMode},
};
use glam::{Mat4, Vec3};

fn settings() -> RenderSettings {
    RenderSettings {
        diffuse_texture: "no/such/texture.png".into(),
        ..Default::default()
    }
}

fn engine() -> RenderEngine<HeadlessBackend> {
    RenderEngine::new(HeadlessBackend::new()).with_settings(settings())
}

fn initialized() -> RenderEngine<HeadlessBackend> {
    let mut engine = engine();
    engine.initialize().expect("headless initialize");
    engine
}

#[test]
fn resize_reallocates_color_attachment_in_place() {
    let mut engine = initialized();
    let texture = engine.get_texture_id().expect("initialized");

    engine.resize(1024, 768);

    assert_eq!(engine.size(), (1024, 768));
    assert_eq!(engine.get_texture_id(), Some(texture));
    assert_eq!(engine.backend().texture_extent(texture), Some((1024, 768)));
}

#[test]
fn resize_to_the_same_size_allocates_nothing() {
    let mut engine = initialized();
    let created = engine.backend().objects_created();

    engine.resize(800, 600);
    engine.resize(800, 600);

    assert_eq!(engine.backend().objects_created(), created);
    assert_eq!(engine.size(), (800, 600));
}

#[test]
fn non_positive_resize_is_ignored() {
    let mut engine = initialized();
    let texture = engine.get_texture_id().expect("initialized");

    engine.resize(0, 500);
    engine.resize(640, -1);
    engine.resize(-3, -3);

    assert_eq!(engine.size(), (800, 600));
    assert_eq!(engine.backend().texture_extent(texture), Some((800, 600)));
}

#[test]
fn oversized_resize_is_clamped_to_the_texture_limit() {
    let mut engine = RenderEngine::new(HeadlessBackend::new().with_max_texture_extent(2048))
        .with_settings(settings());
    engine.initialize().expect("headless initialize");
    let texture = engine.get_texture_id().expect("initialized");

    engine.resize(10_000, 1000);
    engine.render(0.0);

    assert_eq!(engine.size(), (2048, 1000));
    let backend = engine.backend();
    assert_eq!(backend.texture_extent(texture), Some((2048, 1000)));
    let lit = &backend.draws()[0];
    assert_eq!(lit.viewport, (2048, 1000));
    let fb = lit.framebuffer.expect("offscreen framebuffer");
    assert_eq!(backend.framebuffer_status(fb), FramebufferStatus::Complete);
}

#[test]
fn calls_before_initialize_do_nothing() {
    let mut engine = engine();

    engine.resize(300, 200);
    engine.render(1.0);
    engine.cleanup();

    assert_eq!(engine.state(), EngineState::Uninitialized);
    assert_eq!(engine.size(), (800, 600));
    assert_eq!(engine.get_texture_id(), None);
    assert!(engine.backend().draws().is_empty());
    assert!(engine.backend().clears().is_empty());
    assert_eq!(engine.backend().objects_created(), 0);
}

#[test]
fn initialize_twice_allocates_once() {
    let mut engine = initialized();
    let created = engine.backend().objects_created();
    let live = engine.backend().live_objects();

    engine.initialize().expect("second initialize is a no-op");

    assert_eq!(engine.backend().objects_created(), created);
    assert_eq!(engine.backend().live_objects(), live);
    assert_eq!(engine.state(), EngineState::Initialized);
}

#[test]
fn invalid_fragment_source_fails_tagged_fragment() {
    let mut engine = engine();
    engine.shaders.lit.fragment = "this is not wgsl".into();

    let err = engine.initialize().unwrap_err();

    assert_eq!(err.shader_stage_tag(), Some("fragment"));
    assert!(matches!(err, RenderError::Shader { program: "lit", .. }));
    assert_eq!(engine.state(), EngineState::Uninitialized);
    assert_eq!(engine.backend().live_objects(), 0);
}

#[test]
fn failing_light_program_releases_the_lit_program() {
    let mut engine = engine();
    engine.shaders.light.vertex = "@vertex fn vs_main( {".into();

    let err = engine.initialize().unwrap_err();

    assert_eq!(err.shader_stage_tag(), Some("vertex"));
    assert_eq!(engine.backend().live_objects(), 0);
    assert_eq!(engine.backend().double_releases(), 0);
}

#[test]
fn failed_initialize_leaves_pipeline_state_untouched() {
    let mut engine = engine();
    engine.shaders.light.fragment = "@fragment fn fs_main(".into();

    engine.initialize().unwrap_err();

    assert!(!engine.backend().depth_test());
    assert_eq!(engine.backend().blend(), None);
}

#[test]
fn initialize_enables_depth_test_and_blending() {
    let engine = initialized();

    assert!(engine.backend().depth_test());
    assert_eq!(engine.backend().blend(), Some(BlendMode::Alpha));
}

#[test]
fn missing_framebuffer_support_is_fatal() {
    let mut engine = RenderEngine::new(HeadlessBackend::new().without_framebuffers());

    let err = engine.initialize().unwrap_err();

    assert!(matches!(err, RenderError::FramebuffersUnsupported));
    assert_eq!(engine.backend().objects_created(), 0);
}

#[test]
fn incomplete_framebuffer_is_fatal_and_leaks_nothing() {
    let mut engine = RenderEngine::new(HeadlessBackend::new().with_incomplete_framebuffers());

    let err = engine.initialize().unwrap_err();

    assert!(matches!(err, RenderError::IncompleteFramebuffer(_)));
    assert_eq!(engine.state(), EngineState::Uninitialized);
    assert_eq!(engine.backend().live_objects(), 0);
}

#[test]
fn missing_texture_falls_back_to_checkerboard() {
    let mut engine = initialized();
    engine.render(0.0);

    let diffuse = engine.backend().draws()[0].textures[0].expect("diffuse bound");
    let texture = engine.backend().texture(diffuse).expect("diffuse alive");
    let pixels = texture.pixels.as_ref().expect("uploaded pixels");

    assert_eq!(engine.backend().texture_extent(diffuse), Some((64, 64)));
    assert_eq!(pixels.len(), 64 * 64 * 3);
    let pixel = |x: usize, y: usize| &pixels[(y * 64 + x) * 3..(y * 64 + x) * 3 + 3];
    assert_eq!(pixel(0, 0), &[255, 0, 255]);
    assert_eq!(pixel(8, 0), &[0, 255, 255]);
    assert_eq!(pixel(8, 8), &[255, 0, 255]);
    assert_eq!(pixel(63, 0), &[0, 255, 255]);
    assert!(texture.mipmaps_generated);
}

#[test]
fn diffuse_texture_is_loaded_flipped() {
    let path = std::env::temp_dir().join(format!("atelier-diffuse-{}.png", std::process::id()));
    let mut image = image::RgbaImage::new(2, 2);
    image.put_pixel(0, 0, image::Rgba([255, 0, 0, 255]));
    image.put_pixel(0, 1, image::Rgba([0, 0, 255, 255]));
    image.save(&path).expect("write test png");

    let mut engine = RenderEngine::new(HeadlessBackend::new()).with_settings(RenderSettings {
        diffuse_texture: path.clone(),
        ..Default::default()
    });
    engine.initialize().expect("initialize");
    engine.render(0.0);

    let diffuse = engine.backend().draws()[0].textures[0].expect("diffuse bound");
    let texture = engine.backend().texture(diffuse).expect("diffuse alive");
    let pixels = texture.pixels.as_ref().expect("uploaded pixels");

    assert_eq!(engine.backend().texture_extent(diffuse), Some((2, 2)));
    // Row 0 is the bottom row of the file.
    assert_eq!(&pixels[0..4], &[0, 0, 255, 255]);
    assert_eq!(&pixels[8..12], &[255, 0, 0, 255]);

    let _ = std::fs::remove_file(path);
}

#[test]
fn render_draws_lit_cube_then_light_indicator() {
    let mut engine = initialized();
    engine.render(2.0);

    let backend = engine.backend();
    let draws = backend.draws();
    assert_eq!(draws.len(), 2);

    let (lit, light) = (&draws[0], &draws[1]);
    assert!(lit.framebuffer.is_some());
    assert_eq!(lit.framebuffer, light.framebuffer);
    assert_ne!(lit.program, light.program);
    assert_eq!(lit.index_count, 36);
    assert_eq!(light.index_count, 36);
    assert_eq!(lit.viewport, (800, 600));
    assert!(lit.depth_test);
    assert_eq!(lit.blend, Some(BlendMode::Alpha));
    assert_eq!(lit.polygon_mode, PolygonMode::Fill);

    assert_eq!(backend.clears(), &[(lit.framebuffer, [0.1, 0.1, 0.1, 1.0])]);
    assert_eq!(backend.bound_framebuffer(), None);
    assert_eq!(backend.bound_vertex_array(), None);
    assert_eq!(backend.bound_program(), light.program);

    let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, Vec3::Y);
    let projection = Mat4::perspective_rh(45f32.to_radians(), 800.0 / 600.0, 0.1, 100.0);
    let model = Mat4::from_axis_angle(Vec3::new(0.5, 1.0, 0.0).normalize(), 1.0);

    let uniform = |draw, name| backend.draw_mat4(draw, name).expect(name);
    assert!(uniform(lit, "view").abs_diff_eq(view, 1e-5));
    assert!(uniform(lit, "projection").abs_diff_eq(projection, 1e-5));
    assert!(uniform(lit, "model").abs_diff_eq(model, 1e-5));
    assert!(uniform(lit, "normal_matrix").abs_diff_eq(model.inverse().transpose(), 1e-5));
    assert_eq!(backend.draw_vec3(lit, "light.position"), Some(Vec3::new(1.2, 1.0, 2.0)));
    assert_eq!(backend.draw_vec3(lit, "light.ambient"), Some(Vec3::splat(0.2)));
    assert_eq!(backend.draw_vec3(lit, "light.diffuse"), Some(Vec3::splat(0.5)));
    assert_eq!(backend.draw_vec3(lit, "light.specular"), Some(Vec3::ONE));
    assert_eq!(backend.draw_vec3(lit, "view_pos"), Some(Vec3::new(0.0, 0.0, 3.0)));
    assert_eq!(backend.draw_float(lit, "material.shininess"), Some(32.0));

    let indicator = Mat4::from_translation(Vec3::new(1.2, 1.0, 2.0)) * Mat4::from_scale(Vec3::splat(0.2));
    assert!(uniform(light, "model").abs_diff_eq(indicator, 1e-5));
    assert!(uniform(light, "view").abs_diff_eq(view, 1e-5));
    assert_eq!(backend.draw_vec3(light, "light_color"), Some(Vec3::ONE));
}

#[test]
fn light_intensity_scales_light_terms() {
    let mut engine = initialized();
    engine.settings.light_intensity = 2.0;
    engine.settings.light_color = Vec3::new(1.0, 0.5, 0.0);
    engine.render(0.0);

    let backend = engine.backend();
    let (lit, light) = (&backend.draws()[0], &backend.draws()[1]);
    assert_eq!(backend.draw_vec3(lit, "light.ambient"), Some(Vec3::splat(0.4)));
    assert_eq!(backend.draw_vec3(lit, "light.diffuse"), Some(Vec3::splat(1.0)));
    assert_eq!(backend.draw_vec3(lit, "light.specular"), Some(Vec3::splat(2.0)));
    assert_eq!(backend.draw_vec3(light, "light_color"), Some(Vec3::new(2.0, 1.0, 0.0)));
}

#[test]
fn every_frame_issues_the_same_two_draws() {
    let mut engine = RenderEngine::new(HeadlessBackend::new()).with_settings(settings());
    engine.initialize().expect("headless initialize");

    engine.render(0.0);
    let first = engine.backend().draws().to_vec();
    engine.render(0.0);
    engine.render(0.0);

    let rest = engine.backend().draws()[first.len()..].to_vec();
    assert_eq!(first.len(), 2);
    assert_eq!(rest.len(), 4);
    for (a, b) in first.iter().cycle().zip(&rest) {
        assert_eq!(a.program, b.program);
        assert_eq!(a.textures, b.textures);
        assert_eq!(a.uniforms, b.uniforms);
    }
}

#[test]
fn wireframe_and_background_follow_settings() {
    let mut engine = initialized();
    engine.settings.wireframe_mode = true;
    engine.settings.background_color = [0.2, 0.3, 0.4, 1.0];
    engine.render(0.0);

    let backend = engine.backend();
    assert!(backend.draws().iter().all(|d| d.polygon_mode == PolygonMode::Line));
    assert_eq!(backend.clears()[0].1, [0.2, 0.3, 0.4, 1.0]);
}

#[test]
fn resized_frames_use_the_new_viewport_and_aspect() {
    let mut engine = initialized();
    engine.resize(400, 400);
    engine.render(0.0);

    let backend = engine.backend();
    let lit = &backend.draws()[0];
    let projection = Mat4::perspective_rh(45f32.to_radians(), 1.0, 0.1, 100.0);
    assert_eq!(lit.viewport, (400, 400));
    assert!(backend.draw_mat4(lit, "projection").expect("projection").abs_diff_eq(projection, 1e-5));

    let fb = lit.framebuffer.expect("offscreen framebuffer");
    assert_eq!(backend.framebuffer_status(fb), FramebufferStatus::Complete);
}

#[test]
fn camera_scalars_drive_the_view() {
    let mut engine = initialized();
    let mut camera = atelier_core::Camera::default();
    camera.position = Vec3::new(1.0, 2.0, 5.0);
    camera.look(30.0, -10.0, true);
    engine.set_camera(&camera);
    engine.render(0.0);

    let backend = engine.backend();
    let expected = camera.view_matrix();
    let view = backend.draw_mat4(&backend.draws()[0], "view").expect("view");
    assert!(view.abs_diff_eq(expected, 1e-5));
    assert_eq!(backend.draw_vec3(&backend.draws()[0], "view_pos"), Some(camera.position));
}

#[test]
fn bottom_left_output_is_flipped_for_display() {
    let engine = engine();
    assert_eq!(engine.texture_uv_rect(), ([0.0, 1.0], [1.0, 0.0]));
}

#[test]
fn cleanup_twice_releases_everything_once() {
    let mut engine = initialized();
    engine.render(1.0);

    engine.cleanup();
    engine.cleanup();

    assert_eq!(engine.state(), EngineState::Uninitialized);
    assert_eq!(engine.get_texture_id(), None);
    assert_eq!(engine.backend().live_objects(), 0);
    assert_eq!(engine.backend().double_releases(), 0);
}

#[test]
fn engine_can_be_initialized_again_after_cleanup() {
    let mut engine = initialized();
    engine.cleanup();

    engine.initialize().expect("re-initialize");
    engine.render(0.5);

    assert_eq!(engine.state(), EngineState::Initialized);
    assert_eq!(engine.backend().draws().len(), 2);
}

#[test]
fn dropping_the_engine_releases_its_resources() {
    let mut backend = HeadlessBackend::new();
    {
        let mut engine = RenderEngine::new(&mut backend).with_settings(settings());
        engine.initialize().expect("initialize");
        engine.render(0.0);
    }

    assert!(backend.objects_created() > 0);
    assert_eq!(backend.live_objects(), 0);
    assert_eq!(backend.double_releases(), 0);
}
