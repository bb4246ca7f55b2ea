use crate::app::App;

use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::ActiveEventLoop,
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};
use log::*;

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        // The swapchain is never rebuilt, so the window keeps its
        // initial size.
        let window_attr = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height))
            .with_resizable(false);

        let result = event_loop
            .create_window(window_attr)
            .map_err(anyhow::Error::from)
            .and_then(|window| self.init(window));

        if let Err(error) = result {
            if self.handle_error(error) {
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested.");
                self.destroy();
                event_loop.exit();
            },
            WindowEvent::KeyboardInput {
                event: KeyEvent {
                    physical_key: PhysicalKey::Code(code),
                    state: ElementState::Pressed,
                    repeat: false,
                    ..
                },
                ..
            } => match code {
                KeyCode::Escape => {
                    self.destroy();
                    event_loop.exit();
                },
                KeyCode::Space => self.toggle_pipeline(),
                _ => (),
            },
            WindowEvent::RedrawRequested => {
                if let Err(error) = self.render() {
                    if self.handle_error(error) {
                        event_loop.exit();
                    }
                }
            },
            _ => (),
        }
    }

    fn about_to_wait(&mut self, _: &ActiveEventLoop) {
        // Draw continuously; FIFO presentation paces the loop.
        if self.is_running() {
            if let Some(window) = self.window.as_ref() {
                window.request_redraw();
            }
        }
    }
}
