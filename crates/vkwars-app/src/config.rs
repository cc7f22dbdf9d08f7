// SPDX-License-Identifier: CEPL-1.0
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use vkwars_render_vk::config::{DEFAULT_CLEAR_COLOR, DEFAULT_SHADER_DIR};
use vkwars_render_vk::staging::{STAGING_BUFFER_ALIGNMENT, STAGING_BUFFER_SIZE};
use vkwars_render_vk::surface::DESIRED_IMAGE_COUNT;
use vkwars_render_vk::{vk, RendererConfig, StagingConfig, SurfacePreferences};

pub const DEFAULT_CONFIG_PATH: &str = "vkwars.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeCfg {
    Immediate,
    Mailbox,
    Fifo,
    FifoRelaxed,
}

impl PresentModeCfg {
    pub fn to_vk(self) -> vk::PresentModeKHR {
        match self {
            PresentModeCfg::Immediate => vk::PresentModeKHR::IMMEDIATE,
            PresentModeCfg::Mailbox => vk::PresentModeKHR::MAILBOX,
            PresentModeCfg::Fifo => vk::PresentModeKHR::FIFO,
            PresentModeCfg::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub present_modes: Vec<PresentModeCfg>,
    pub image_count: u32,
    pub staging_capacity: u64,
    pub staging_alignment: u64,
    /// 0 = wait forever
    pub fence_timeout_ms: u64,
    pub shader_dir: PathBuf,
    pub pipeline_cache: Option<PathBuf>,
    pub unfocused_fps: u32,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: DEFAULT_CLEAR_COLOR,
            present_modes: vec![PresentModeCfg::Mailbox, PresentModeCfg::Fifo],
            image_count: DESIRED_IMAGE_COUNT,
            staging_capacity: STAGING_BUFFER_SIZE,
            staging_alignment: STAGING_BUFFER_ALIGNMENT,
            fence_timeout_ms: 0,
            shader_dir: PathBuf::from(DEFAULT_SHADER_DIR),
            pipeline_cache: None,
            unfocused_fps: 30,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AppCfg {
    pub render: RenderCfg,
}

impl RenderCfg {
    fn fence_timeout(&self) -> Option<Duration> {
        (self.fence_timeout_ms > 0).then(|| Duration::from_millis(self.fence_timeout_ms))
    }

    /// Preference list with `present_override` first; FIFO always ends it.
    pub fn present_modes(&self, present_override: Option<PresentModeCfg>) -> Vec<vk::PresentModeKHR> {
        let mut modes: Vec<vk::PresentModeKHR> = present_override
            .into_iter()
            .chain(self.present_modes.iter().copied())
            .map(PresentModeCfg::to_vk)
            .collect();
        let mut seen = Vec::with_capacity(modes.len());
        modes.retain(|m| {
            let first = !seen.contains(m);
            seen.push(*m);
            first
        });
        if !modes.contains(&vk::PresentModeKHR::FIFO) {
            modes.push(vk::PresentModeKHR::FIFO);
        }
        modes
    }

    pub fn renderer_config(&self, present_override: Option<PresentModeCfg>) -> RendererConfig {
        let timeout = self.fence_timeout();
        RendererConfig {
            clear_color: self.clear_color,
            surface: SurfacePreferences::default()
                .with_present_modes(self.present_modes(present_override))
                .with_image_count(self.image_count),
            staging: StagingConfig {
                capacity: self.staging_capacity,
                alignment: self.staging_alignment.max(1),
                fence_timeout: timeout,
            },
            fence_timeout: timeout,
            shader_dir: self.shader_dir.clone(),
            pipeline_cache: self.pipeline_cache.clone(),
        }
    }
}

pub fn parse_cfg(text: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str(text)
}

/// Missing file → defaults; malformed file → defaults plus a warning.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => match parse_cfg(&s) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!("{}: {e}; using defaults", path.display());
                AppCfg::default()
            }
        },
        Err(_) => {
            info!("no config at {}; using defaults", path.display());
            AppCfg::default()
        }
    }
}
