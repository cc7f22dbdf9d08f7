// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

pub mod ui;

pub use imgui;
pub use ui::{configure_imgui, UiAtlas, UiDrawCmd, UiDrawData, UiDrawList, UiIndex, UiVertex};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_zero(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// What a call to [`Renderer::render`] did with the frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// The frame reached the presentation engine. `rebuilt` is set when the
    /// swapchain was rebuilt before returning.
    Presented { rebuilt: bool },
    /// The acquired image was unusable; the swapchain was rebuilt instead.
    Skipped,
    /// The surface has no area (minimized); nothing was submitted.
    Suspended,
}

impl FrameStatus {
    pub fn presented(&self) -> bool {
        matches!(self, FrameStatus::Presented { .. })
    }
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        atlas: &UiAtlas,
    ) -> Result<Self>
    where
        Self: Sized;

    fn resize(&mut self, size: RenderSize) -> Result<()>;
    fn render(&mut self, ui: &UiDrawData) -> Result<FrameStatus>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
}
