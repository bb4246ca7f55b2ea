use crate::{
    config::Config,
    error::{severity, Severity},
    renderer::Renderer,
};

use winit::window::Window;
use anyhow::Result;
use log::*;

/// Host application: owns the window and the renderer, and
/// applies the error policy to whatever the renderer reports.
pub struct App {
    pub config: Config,
    pub window: Option<Window>,
    renderer: Option<Renderer>,
    fatal: Option<anyhow::Error>,
}

impl App {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            window: None,
            renderer: None,
            fatal: None,
        }
    }

    pub fn init(&mut self, window: Window) -> Result<()> {
        let renderer = Renderer::create(&window, &self.config);
        self.window = Some(window);
        self.renderer = Some(renderer?);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.renderer.is_some()
    }

    pub fn render(&mut self) -> Result<()> {
        match self.renderer.as_mut() {
            Some(renderer) => renderer.render(),
            None => Ok(()),
        }
    }

    pub fn toggle_pipeline(&mut self) {
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.toggle_pipeline();
        }
    }

    /// Logs the error and decides what happens next. Returns
    /// `true` when the application must stop, after releasing
    /// everything the renderer recorded.
    pub fn handle_error(&mut self, error: anyhow::Error) -> bool {
        match severity(&error) {
            Severity::Recoverable => {
                warn!("{error:#}");
                false
            },
            Severity::Fatal => {
                error!("Fatal error: {error:#}");
                self.destroy();
                self.fatal = Some(error);
                true
            },
        }
    }

    /// Releases the renderer if there is one. Safe to call any
    /// number of times, including before initialization.
    pub fn destroy(&mut self) {
        if let Some(renderer) = self.renderer.take() {
            renderer.destroy();
            info!("Destroyed the app.");
        }
    }

    /// Result of the run: the fatal error that stopped it, if any.
    pub fn finish(mut self) -> Result<()> {
        self.destroy();
        match self.fatal.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RenderError, ShaderError};
    use anyhow::anyhow;

    #[test]
    fn destroy_before_init_does_nothing() {
        let mut app = App::new(Config::default());
        app.destroy();
        app.destroy();

        assert!(!app.is_running());
        assert!(app.render().is_ok());
        assert!(app.finish().is_ok());
    }

    #[test]
    fn recoverable_errors_keep_the_app_running() {
        let mut app = App::new(Config::default());
        let error = anyhow!(ShaderError::Empty { path: "triangle.frag.spv".into() });

        assert!(!app.handle_error(error));
        assert!(app.finish().is_ok());
    }

    #[test]
    fn fatal_errors_stop_the_app_and_are_reported() {
        let mut app = App::new(Config::default());

        assert!(app.handle_error(anyhow!(RenderError::SwapchainOutOfDate)));

        let error = app.finish().unwrap_err();
        assert!(matches!(error.downcast_ref::<RenderError>(), Some(RenderError::SwapchainOutOfDate)));
    }
}
