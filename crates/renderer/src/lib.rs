//! Windowed viewer for the radiance cascade pipeline.
//!
//! The overall flow is:
//!
//! ```text
//!   radview CLI
//!        │ RendererConfig
//!        ▼
//!   Renderer::run ──▶ GpuState ──▶ winit event loop ──▶ render_frame()
//!                                        │
//!                                        └─▶ plan::frame_ops() pass list
//! ```
//!
//! `GpuState` owns all GPU resources (surface, device, kernels, cascade
//! buffers) while `Renderer` is the thin entry point that opens the window
//! and drives the event loop. Each frame walks the pass plan verbatim:
//! gather every level, fold the cascade coarsest-to-finest with a barrier
//! after every step, then resolve the selected layer to the surface.
//! Keyboard and scroll input only mutate [`PipelineParameters`]; the GPU
//! reads them at the start of the next frame.

mod compile;
mod gpu;
mod params;
mod plan;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, KeyEvent, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::WindowBuilder;

use gpu::GpuState;

pub use params::{PipelineParameters, RendererConfig, RAY_LENGTH_MAX, RAY_LENGTH_MIN};
pub use plan::{frame_ops, PassOp};

/// Thin entry point around the event loop.
pub struct Renderer {
    config: RendererConfig,
}

impl Renderer {
    pub fn new(config: RendererConfig) -> Self {
        Self { config }
    }

    /// Opens the viewer window and runs the event loop until close.
    pub fn run(self) -> Result<()> {
        let event_loop =
            EventLoop::new().map_err(|err| anyhow!("failed to create event loop: {err}"))?;
        let window_size = PhysicalSize::new(self.config.surface_size.0, self.config.surface_size.1);
        let window = WindowBuilder::new()
            .with_title("radview")
            .with_inner_size(window_size)
            .build(&event_loop)
            .map_err(|err| anyhow!("failed to create viewer window: {err}"))?;
        let window = Arc::new(window);

        let mut gpu = GpuState::new(window.as_ref(), window.inner_size(), &self.config)?;
        let mut params = self.config.initial_params.clone();
        let level_count = self.config.level_count;

        let mut result = Ok(());
        let run_result = event_loop.run(|event, elwt| match event {
            Event::WindowEvent { window_id, event } if window_id == window.id() => match event {
                WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                    elwt.exit();
                }
                WindowEvent::KeyboardInput { event, .. } => {
                    if apply_key(&event, &mut params, level_count) == KeyAction::Exit {
                        elwt.exit();
                    }
                }
                WindowEvent::MouseWheel { delta, .. } => {
                    let steps = match delta {
                        MouseScrollDelta::LineDelta(_, rows) => rows as i32,
                        MouseScrollDelta::PixelDelta(position) => (position.y / 20.0) as i32,
                    };
                    if steps != 0 {
                        params.adjust_ray_length(steps);
                    }
                }
                WindowEvent::Resized(new_size) => {
                    gpu.resize(new_size);
                }
                WindowEvent::ScaleFactorChanged {
                    mut inner_size_writer,
                    ..
                } => {
                    let _ = inner_size_writer.request_inner_size(gpu.size());
                }
                WindowEvent::RedrawRequested => {
                    if params.paused {
                        return;
                    }
                    match gpu.render_frame(&params) {
                        Ok(()) => {}
                        Err(wgpu::SurfaceError::Lost) | Err(wgpu::SurfaceError::Outdated) => {
                            gpu.resize(gpu.size());
                        }
                        Err(wgpu::SurfaceError::OutOfMemory) => {
                            result = Err(anyhow!("surface out of memory"));
                            elwt.exit();
                        }
                        Err(wgpu::SurfaceError::Timeout) => {
                            tracing::warn!("surface timeout; retrying next frame");
                        }
                        Err(other) => {
                            tracing::warn!(error = ?other, "surface error; retrying next frame");
                        }
                    }
                }
                _ => {}
            },
            Event::AboutToWait => {
                if params.paused {
                    elwt.set_control_flow(ControlFlow::Wait);
                } else {
                    window.request_redraw();
                    elwt.set_control_flow(ControlFlow::Poll);
                }
            }
            _ => {}
        });

        if let Err(err) = run_result {
            return Err(anyhow!("event loop error: {err}"));
        }
        result
    }
}

#[derive(Debug, PartialEq, Eq)]
enum KeyAction {
    Continue,
    Exit,
}

/// Applies one key press to the live parameters.
///
/// M toggles the merge reduction, I the probe interpolation, U the
/// probe-UV visualization, Space pauses, digits select the displayed
/// layer, Escape exits.
fn apply_key(event: &KeyEvent, params: &mut PipelineParameters, level_count: u32) -> KeyAction {
    if event.state != ElementState::Pressed || event.repeat {
        return KeyAction::Continue;
    }

    match &event.logical_key {
        Key::Named(NamedKey::Escape) => return KeyAction::Exit,
        Key::Named(NamedKey::Space) => params.toggle_pause(),
        Key::Character(value) => match value.as_str() {
            "m" | "M" => params.toggle_merge(),
            "i" | "I" => params.toggle_interpolate(),
            "u" | "U" => params.toggle_probe_uv(),
            text => {
                if let Some(digit) = text.chars().next().and_then(|ch| ch.to_digit(10)) {
                    params.select_layer(digit, level_count);
                }
            }
        },
        _ => {}
    }
    KeyAction::Continue
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digit_text_maps_to_layer_selection() {
        let mut params = PipelineParameters::default();
        for (text, expected) in [("0", 0), ("3", 3), ("9", 5)] {
            let digit = text.chars().next().and_then(|ch| ch.to_digit(10)).unwrap();
            params.select_layer(digit, 6);
            assert_eq!(params.display_layer, expected);
        }
    }

    #[test]
    fn scroll_steps_round_toward_zero() {
        assert_eq!((15.0_f64 / 20.0) as i32, 0);
        assert_eq!((45.0_f64 / 20.0) as i32, 2);
        assert_eq!((-45.0_f64 / 20.0) as i32, -2);
    }
}
