//! Spinning cube demo
//!
//! Opens a window, uploads a cube through the staging buffer and draws it every frame.
//! Resizing and minimizing the window exercise swapchain recreation.

use glfw::{Action, Key, WindowEvent};
use render_core::config::{Config, ConfigError};
use render_core::foundation::logging::{self, LevelFilter};
use render_core::foundation::math::{look_at, Point3, Quat, Vec3};
use render_core::backend::vulkan::WindowError;
use render_core::prelude::*;
use thiserror::Error;

const CONFIG_PATH: &str = "cube_demo.toml";

#[derive(Debug, Error)]
enum AppError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("window: {0}")]
    Window(#[from] WindowError),

    #[error("renderer: {0}")]
    Render(#[from] VulkanError),
}

fn cube_vertices() -> [Vertex; 8] {
    [
        Vertex::new([-0.5, -0.5, 0.5], [1.0, 0.0, 0.0]),
        Vertex::new([0.5, -0.5, 0.5], [0.0, 1.0, 0.0]),
        Vertex::new([0.5, 0.5, 0.5], [0.0, 0.0, 1.0]),
        Vertex::new([-0.5, 0.5, 0.5], [1.0, 1.0, 0.0]),
        Vertex::new([-0.5, -0.5, -0.5], [1.0, 0.0, 1.0]),
        Vertex::new([0.5, -0.5, -0.5], [0.0, 1.0, 1.0]),
        Vertex::new([0.5, 0.5, -0.5], [1.0, 1.0, 1.0]),
        Vertex::new([-0.5, 0.5, -0.5], [0.2, 0.2, 0.2]),
    ]
}

// Clockwise seen from outside the cube, matching the pipeline's front face
const CUBE_INDICES: [u32; 36] = [
    0, 2, 1, 2, 0, 3, // front
    1, 6, 5, 6, 1, 2, // right
    5, 7, 4, 7, 5, 6, // back
    4, 3, 0, 3, 4, 7, // left
    3, 6, 2, 6, 3, 7, // top
    4, 1, 5, 1, 4, 0, // bottom
];

fn run() -> Result<(), AppError> {
    let config = BackendConfig::load_or_default(CONFIG_PATH)?;
    logging::init_with_level(logging::parse_level(&config.log_level).unwrap_or(LevelFilter::Info));

    let mut window = Window::new(&config.window)?;
    let mut backend = VulkanBackend::new(&mut window, &config)?;

    let mut cube = backend.load_mesh(&cube_vertices(), &CUBE_INDICES)?;
    backend.set_view(look_at(&Point3::new(1.5, 1.5, 3.0), &Point3::origin(), &Vec3::y()));

    let start = window.time();
    let mut frames = 0_u64;

    while !window.should_close() {
        for event in window.poll_events() {
            if let WindowEvent::Key(Key::Escape, _, Action::Press, _) = event {
                window.set_should_close(true);
            }
        }

        if window.take_resized() {
            backend.notify_framebuffer_resized();
        }

        let (width, height) = window.framebuffer_size();
        if width == 0 || height == 0 {
            window.wait_events();
            continue;
        }

        let elapsed = (window.time() - start) as f32;
        cube.transform.rotation = Quat::from_axis_angle(&Vec3::y_axis(), elapsed);

        if let Some(mut frame) = backend.begin_draw(&window)? {
            cube.draw(&mut frame, &Mat4::identity())?;
            backend.end_draw(frame, &window)?;
            frames += 1;
        }
    }

    backend.wait_idle()?;
    log::info!("Rendered {frames} frames in {:.1}s", window.time() - start);
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        log::error!("{e}");
        eprintln!("cube_demo: {e}");
        std::process::exit(1);
    }
}
