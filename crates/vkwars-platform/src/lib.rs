// SPDX-License-Identifier: CEPL-1.0
pub use imgui_winit_support;
pub use winit;

use winit::dpi::LogicalSize;
use winit::window::WindowAttributes;

pub const WINDOW_TITLE: &str = "vkwars";
pub const WINDOW_SIZE: (u32, u32) = (800, 600);

/// Attributes of the main window: titled, 800x600 logical, opened maximized.
pub fn main_window_attributes() -> WindowAttributes {
    WindowAttributes::default()
        .with_title(WINDOW_TITLE)
        .with_inner_size(LogicalSize::new(WINDOW_SIZE.0, WINDOW_SIZE.1))
        .with_maximized(true)
}
