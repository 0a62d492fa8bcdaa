//! Prism demo application.
//!
//! Opens a window, uploads a colored cube, and renders it through the
//! pixelize post-process pass. P toggles pixelization; the bracket keys
//! halve and double the block size.

use anyhow::Result;
use glam::{Mat4, Vec3};
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::WindowId;

use prism_core::FrameTimer;
use prism_platform::Window;
use prism_renderer::{DEFAULT_BLOCK_SIZE, Renderer};
use prism_rhi::vertex::MeshVertex;

const WINDOW_WIDTH: u32 = 1280;
const WINDOW_HEIGHT: u32 = 720;

/// Unit cube centered at the origin with per-face normals and colors.
fn cube_mesh() -> (Vec<MeshVertex>, Vec<u32>) {
    struct Face {
        normal: [f32; 3],
        color: [f32; 3],
        corners: [[f32; 3]; 4],
    }

    let faces = [
        Face {
            normal: [0.0, 0.0, 1.0],
            color: [0.9, 0.2, 0.2],
            corners: [
                [-0.5, -0.5, 0.5],
                [0.5, -0.5, 0.5],
                [0.5, 0.5, 0.5],
                [-0.5, 0.5, 0.5],
            ],
        },
        Face {
            normal: [0.0, 0.0, -1.0],
            color: [0.2, 0.9, 0.2],
            corners: [
                [0.5, -0.5, -0.5],
                [-0.5, -0.5, -0.5],
                [-0.5, 0.5, -0.5],
                [0.5, 0.5, -0.5],
            ],
        },
        Face {
            normal: [1.0, 0.0, 0.0],
            color: [0.2, 0.2, 0.9],
            corners: [
                [0.5, -0.5, 0.5],
                [0.5, -0.5, -0.5],
                [0.5, 0.5, -0.5],
                [0.5, 0.5, 0.5],
            ],
        },
        Face {
            normal: [-1.0, 0.0, 0.0],
            color: [0.9, 0.9, 0.2],
            corners: [
                [-0.5, -0.5, -0.5],
                [-0.5, -0.5, 0.5],
                [-0.5, 0.5, 0.5],
                [-0.5, 0.5, -0.5],
            ],
        },
        Face {
            normal: [0.0, 1.0, 0.0],
            color: [0.2, 0.9, 0.9],
            corners: [
                [-0.5, 0.5, 0.5],
                [0.5, 0.5, 0.5],
                [0.5, 0.5, -0.5],
                [-0.5, 0.5, -0.5],
            ],
        },
        Face {
            normal: [0.0, -1.0, 0.0],
            color: [0.9, 0.2, 0.9],
            corners: [
                [-0.5, -0.5, -0.5],
                [0.5, -0.5, -0.5],
                [0.5, -0.5, 0.5],
                [-0.5, -0.5, 0.5],
            ],
        },
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for face in &faces {
        let base = vertices.len() as u32;
        for corner in &face.corners {
            vertices.push(MeshVertex::new(
                Vec3::from_array(*corner),
                Vec3::from_array(face.normal),
                Vec3::from_array(face.color),
            ));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }
    (vertices, indices)
}

struct App {
    window: Option<Window>,
    renderer: Option<Renderer>,
    timer: FrameTimer,
    rotation: f32,
    block_size: f32,
}

impl App {
    fn new() -> Self {
        Self {
            window: None,
            renderer: None,
            timer: FrameTimer::new(),
            rotation: 0.0,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }

    fn setup_scene(renderer: &mut Renderer, aspect_ratio: f32) -> Result<()> {
        let (vertices, indices) = cube_mesh();
        renderer.upload_mesh(&vertices, &indices)?;

        let eye = Vec3::new(1.5, 1.2, 2.5);
        let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
        let mut projection =
            Mat4::perspective_rh(45.0_f32.to_radians(), aspect_ratio, 0.1, 100.0);
        // GLSL clip space has Y pointing down.
        projection.y_axis.y *= -1.0;
        renderer.set_camera(view, projection, eye);
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            match Window::new(event_loop, WINDOW_WIDTH, WINDOW_HEIGHT, "Prism") {
                Ok(window) => match Renderer::new(&window) {
                    Ok(mut renderer) => {
                        if let Err(e) = Self::setup_scene(&mut renderer, window.aspect_ratio()) {
                            error!("Failed to set up scene: {:?}", e);
                            event_loop.exit();
                            return;
                        }
                        info!("Initialization complete, entering main loop");
                        self.renderer = Some(renderer);
                        self.window = Some(window);
                    }
                    Err(e) => {
                        error!("Failed to create renderer: {:?}", e);
                        event_loop.exit();
                    }
                },
                Err(e) => {
                    error!("Failed to create window: {}", e);
                    event_loop.exit();
                }
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(ref mut window) = self.window {
                    window.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                let delta = self.timer.delta_secs();
                self.rotation += delta * 0.8;

                let (Some(window), Some(renderer)) = (&mut self.window, &mut self.renderer)
                else {
                    return;
                };

                if window.take_resized() {
                    renderer.resize(window.width(), window.height());
                    if !window.is_zero_extent() {
                        let eye = Vec3::new(1.5, 1.2, 2.5);
                        let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
                        let mut projection = Mat4::perspective_rh(
                            45.0_f32.to_radians(),
                            window.aspect_ratio(),
                            0.1,
                            100.0,
                        );
                        projection.y_axis.y *= -1.0;
                        renderer.set_camera(view, projection, eye);
                    }
                }

                renderer.set_model_transform(Mat4::from_rotation_y(self.rotation));
                if let Err(e) = renderer.render_frame(delta) {
                    error!("Render error: {:?}", e);
                    event_loop.exit();
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed()
                    && !event.repeat
                    && let PhysicalKey::Code(code) = event.physical_key
                    && let Some(ref mut renderer) = self.renderer
                {
                    match code {
                        KeyCode::KeyP => {
                            renderer.toggle_pixelize();
                        }
                        KeyCode::BracketLeft => {
                            self.block_size = (self.block_size / 2.0).max(1.0);
                            renderer.set_block_size(self.block_size);
                            info!("Pixelize block size: {}", self.block_size);
                        }
                        KeyCode::BracketRight => {
                            self.block_size = (self.block_size * 2.0).min(256.0);
                            renderer.set_block_size(self.block_size);
                            info!("Pixelize block size: {}", self.block_size);
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    prism_core::init_logging();
    info!("Starting prism");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new();
    event_loop.run_app(&mut app)?;

    Ok(())
}
