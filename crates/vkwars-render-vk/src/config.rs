use crate::staging::StagingConfig;
use crate::surface::SurfacePreferences;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CLEAR_COLOR: [f32; 4] = [0.02, 0.02, 0.04, 1.0];
pub const DEFAULT_SHADER_DIR: &str = "shaders";

/// Everything [`crate::VkRenderer`] needs besides the window.
#[derive(Clone, Debug)]
pub struct RendererConfig {
    pub clear_color: [f32; 4],
    pub surface: SurfacePreferences,
    pub staging: StagingConfig,
    /// Bound on every frame fence wait; `None` waits forever.
    pub fence_timeout: Option<Duration>,
    /// Where `ui.vert.spv` / `ui.frag.spv` live when they are not embedded.
    pub shader_dir: PathBuf,
    /// Overrides the per-device cache file.
    pub pipeline_cache: Option<PathBuf>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            clear_color: DEFAULT_CLEAR_COLOR,
            surface: SurfacePreferences::default(),
            staging: StagingConfig::default(),
            fence_timeout: None,
            shader_dir: PathBuf::from(DEFAULT_SHADER_DIR),
            pipeline_cache: None,
        }
    }
}
