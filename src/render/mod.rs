pub mod headless;
pub mod native;

pub use headless::{Command, RecordingDevice};
pub use native::{Renderer, RendererError};
