use winit::event_loop::{ControlFlow, EventLoop};
use anyhow::Result;
use log::*;

use trigon::{app::App, config::Config};

fn main() -> Result<()> {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    pretty_env_logger::init();

    let config = Config::from_env();
    info!("Loading shaders from {:?}.", config.shader_dir);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    app.finish()
}
