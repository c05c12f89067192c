mod config;
mod egui_state;
mod gpu;
mod runner;
mod ui;

use config::{AppConfig, AppError, CONFIG_FILE};
use runner::AtelierRunner;
use winit::event_loop::{ControlFlow, EventLoop};

const DEFAULT_LOG_FILTER: &str = "info,wgpu_core=warn,wgpu_hal=warn,naga=warn";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(DEFAULT_LOG_FILTER))
        .init();

    if let Err(err) = run() {
        log::error!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), AppError> {
    let config = AppConfig::load(CONFIG_FILE)?;

    let event_loop = EventLoop::new()?;
    // Poll keeps the viewport animating without input events.
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AtelierRunner::new(config);
    event_loop.run_app(&mut runner)?;
    runner.finish()
}
