use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{info, warn};
use pollster::block_on;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use lumen_renderer::{RecordingDevice, RenderSettings, Renderer, Scene, SceneDescription};

#[derive(Parser, Debug)]
#[command(
    name = "lumen-renderer",
    about = "Render an XML scene with frustum culling and an optional depth prepass"
)]
struct Cli {
    /// Scene XML file
    scene: PathBuf,

    /// Render without a window, printing per-frame statistics
    #[arg(long)]
    headless: bool,

    /// Frames to render in headless mode
    #[arg(long, default_value_t = 1)]
    frames: u32,

    /// Skip the depth-only prepass
    #[arg(long)]
    no_z_prepass: bool,

    /// Viewport width in pixels
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Viewport height in pixels
    #[arg(long, default_value_t = 720)]
    height: u32,
}

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let description = SceneDescription::load(&cli.scene)
        .with_context(|| format!("failed to load scene {}", cli.scene.display()))?;

    println!(
        "Loaded scene with {} objects ({} lights)",
        description.objects.len(),
        description.lights.len()
    );
    for object in &description.objects {
        println!(
            " - {} ({})",
            object.name,
            object.mesh.as_deref().unwrap_or("builtin cube")
        );
    }

    let settings = RenderSettings {
        z_prepass: !cli.no_z_prepass,
        ..RenderSettings::default()
    };
    let size = PhysicalSize::new(cli.width.max(1), cli.height.max(1));

    if cli.headless {
        return run_headless(&description, &settings, size, cli.frames);
    }

    match run_interactive(&description, settings, size) {
        Ok(()) => Ok(()),
        Err(err) => {
            if err.downcast_ref::<WindowInitError>().is_some() {
                eprintln!(
                    "{err}. Falling back to --headless mode (set DISPLAY or install a GPU driver to enable rendering)."
                );
                run_headless(&description, &settings, size, cli.frames)
            } else {
                Err(err)
            }
        }
    }
}

fn run_headless(
    description: &SceneDescription,
    settings: &RenderSettings,
    size: PhysicalSize<u32>,
    frames: u32,
) -> Result<()> {
    let mut device = RecordingDevice::new();
    let scene = description.instantiate(&mut device, aspect_ratio(size))?;

    for frame in 1..=frames {
        device.clear_commands();
        if settings.z_prepass {
            scene.render(&mut device, true);
        }
        let stats = scene.render(&mut device, false);
        println!(
            "Frame {frame}: drew {} of {} objects ({} culled), {} light record(s)",
            stats.drawn,
            scene.objects().len(),
            stats.culled,
            stats.light_records
        );
    }
    Ok(())
}

fn run_interactive(
    description: &SceneDescription,
    settings: RenderSettings,
    size: PhysicalSize<u32>,
) -> Result<()> {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(|_| {}));
    let event_loop = panic::catch_unwind(AssertUnwindSafe(EventLoop::new));
    panic::set_hook(default_hook);
    let event_loop = event_loop
        .map_err(|panic| WindowInitError::from_panic("event loop", panic))?
        .map_err(|err| WindowInitError::from_error("event loop", err))?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = ViewerApp {
        description,
        settings,
        size,
        state: None,
        error: None,
    };
    event_loop.run_app(&mut app)?;

    match app.error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn aspect_ratio(size: PhysicalSize<u32>) -> f32 {
    size.width as f32 / size.height.max(1) as f32
}

struct ViewerApp<'a> {
    description: &'a SceneDescription,
    settings: RenderSettings,
    size: PhysicalSize<u32>,
    state: Option<ViewerState>,
    error: Option<anyhow::Error>,
}

struct ViewerState {
    renderer: Renderer,
    scene: Scene,
}

impl ViewerApp<'_> {
    fn init(&self, event_loop: &ActiveEventLoop) -> Result<ViewerState> {
        let attrs = Window::default_attributes()
            .with_title("Lumen Renderer")
            .with_inner_size(self.size);
        let window = Arc::new(
            event_loop
                .create_window(attrs)
                .map_err(|err| WindowInitError::from_error("window", err))?,
        );
        let mut renderer = block_on(Renderer::new(window, self.settings))
            .map_err(|err| WindowInitError::from_error("renderer", err))?;
        let aspect = renderer.aspect_ratio();
        let scene = self.description.instantiate(&mut renderer, aspect)?;
        Ok(ViewerState { renderer, scene })
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        self.error = Some(err);
        event_loop.exit();
    }
}

impl ApplicationHandler for ViewerApp<'_> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }
        match self.init(event_loop) {
            Ok(state) => self.state = Some(state),
            Err(err) => self.fail(event_loop, err),
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        if window_id != state.renderer.window_id() {
            return;
        }

        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => event_loop.exit(),
            WindowEvent::Resized(size) => {
                state.renderer.resize(size);
                let aspect = state.renderer.aspect_ratio();
                state.scene.camera_mut().set_aspect_ratio(aspect);
            }
            WindowEvent::RedrawRequested => match state.renderer.render_frame(&state.scene) {
                Ok(_) => {}
                Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                    let size = state.renderer.window().inner_size();
                    state.renderer.resize(size);
                }
                Err(wgpu::SurfaceError::OutOfMemory) => {
                    self.fail(event_loop, anyhow!("GPU is out of memory"));
                }
                Err(wgpu::SurfaceError::Timeout) => {
                    info!("Surface timeout; retrying next frame");
                }
                Err(err) => warn!("dropping frame: {err}"),
            },
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.renderer.window().request_redraw();
        }
    }
}

#[derive(Debug)]
struct WindowInitError {
    message: String,
}

impl WindowInitError {
    fn from_panic(stage: &str, panic: Box<dyn Any + Send>) -> Self {
        Self {
            message: format!("failed to initialize {stage}: {}", panic_message(panic)),
        }
    }

    fn from_error(stage: &str, err: impl fmt::Display) -> Self {
        Self {
            message: format!("failed to initialize {stage}: {err}"),
        }
    }
}

impl fmt::Display for WindowInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for WindowInitError {}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    match panic.downcast::<String>() {
        Ok(msg) => *msg,
        Err(panic) => match panic.downcast::<&'static str>() {
            Ok(msg) => (*msg).to_string(),
            Err(_) => "unknown panic".into(),
        },
    }
}
