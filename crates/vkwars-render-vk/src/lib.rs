#![deny(unsafe_op_in_unsafe_fn)]
//! Vulkan backend: frame pacing, swapchain lifecycle, staging uploads and the
//! UI overlay, exposed through [`vkwars_render::Renderer`].

use anyhow::{Context, Result};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{info, warn};
use vkwars_render::{FrameStatus, RenderSize, Renderer, UiAtlas, UiDrawData};

mod ash_gpu;
pub mod config;
pub mod driver;
pub mod error;
pub mod frame;
pub mod gpu;
pub mod pipeline;
pub mod staging;
pub mod surface;
pub mod swapchain;
pub mod ui;

#[cfg(test)]
mod fake_gpu;

pub use ash::vk;
pub use ash_gpu::AshGpu;
pub use config::RendererConfig;
pub use driver::{FrameContext, FramePass, NoOverlay, Presenter};
pub use error::{RenderError, RenderResult};
pub use gpu::Gpu;
pub use staging::{StagingConfig, StagingUploader};
pub use surface::SurfacePreferences;
pub use swapchain::SwapchainManager;
pub use ui::UiRenderer;

use pipeline::{pipeline_cache_path, ShaderSet};

const APP_NAME: &str = "vkwars";

fn extent_of(size: RenderSize) -> vk::Extent2D {
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

pub struct VkRenderer {
    presenter: Presenter<AshGpu>,
    ui: UiRenderer,
}

impl VkRenderer {
    pub fn with_config(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        atlas: &UiAtlas,
        config: &RendererConfig,
    ) -> RenderResult<Self> {
        let gpu = AshGpu::new(window, display, APP_NAME)?;
        let mut presenter = Presenter::new(
            gpu,
            config.surface.clone(),
            extent_of(size),
            config.fence_timeout,
        )?;
        presenter.set_clear_color(config.clear_color);

        let gpu = presenter.gpu();
        let cache_path = config
            .pipeline_cache
            .clone()
            .unwrap_or_else(|| pipeline_cache_path(gpu.properties()));
        let shaders = ShaderSet::load(&config.shader_dir)?;
        let ui = UiRenderer::new(gpu, atlas, config.staging, shaders, cache_path)?;

        info!(
            "vulkan renderer ready ({}x{}, font atlas {}x{})",
            size.width, size.height, atlas.width, atlas.height
        );
        Ok(Self { presenter, ui })
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        atlas: &UiAtlas,
    ) -> Result<Self> {
        Ok(Self::with_config(
            window,
            display,
            size,
            atlas,
            &RendererConfig::default(),
        )?)
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        self.presenter.resize(extent_of(size));
        Ok(())
    }

    fn render(&mut self, ui: &UiDrawData) -> Result<FrameStatus> {
        self.presenter
            .render_frame(ui, &mut self.ui)
            .context("render_frame")
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.presenter.set_clear_color(rgba);
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        // STRICT ORDER: idle GPU, overlay resources, then the presenter
        // (swapchain, frame ring) and finally the device with it.
        if let Err(e) = self.presenter.drain() {
            warn!("drain before teardown failed: {e}");
        }
        self.ui.destroy(self.presenter.gpu());
    }
}
