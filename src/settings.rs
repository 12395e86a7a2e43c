use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Renderer options shared by the CLI and the wgpu backend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    /// Run a depth-only pass before shading.
    #[serde(default = "default_z_prepass")]
    pub z_prepass: bool,
    #[serde(default = "default_clear_color")]
    pub clear_color: Vec3,
    #[serde(default)]
    pub vsync: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            z_prepass: default_z_prepass(),
            clear_color: default_clear_color(),
            vsync: false,
        }
    }
}

fn default_z_prepass() -> bool {
    true
}

fn default_clear_color() -> Vec3 {
    Vec3::new(0.03, 0.03, 0.05)
}
