// SPDX-License-Identifier: CEPL-1.0
//! Immediate-mode UI payload handed to a renderer once per frame.
//!
//! Built from imgui draw data: per-list vertex and index arrays plus scissored
//! draw commands that index into them. Renderers only see these types.

use bytemuck::{Pod, Zeroable};

pub type UiIndex = u16;

/// Vertex layout: `pos` R32G32, `uv` R32G32, `color` R8G8B8A8_UNORM.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct UiVertex {
    pub pos: [f32; 2],
    pub uv: [f32; 2],
    pub color: u32,
}

pub fn pack_rgba(rgba: [u8; 4]) -> u32 {
    u32::from_le_bytes(rgba)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UiDrawCmd {
    /// `[min_x, min_y, max_x, max_y]` in display coordinates.
    pub clip_rect: [f32; 4],
    pub elem_count: u32,
    pub idx_offset: u32,
    pub vtx_offset: u32,
}

#[derive(Clone, Debug, Default)]
pub struct UiDrawList {
    pub vertices: Vec<UiVertex>,
    pub indices: Vec<UiIndex>,
    pub commands: Vec<UiDrawCmd>,
}

#[derive(Clone, Debug)]
pub struct UiDrawData {
    pub display_pos: [f32; 2],
    pub display_size: [f32; 2],
    pub framebuffer_scale: [f32; 2],
    pub lists: Vec<UiDrawList>,
}

impl Default for UiDrawData {
    fn default() -> Self {
        Self {
            display_pos: [0.0, 0.0],
            display_size: [0.0, 0.0],
            framebuffer_scale: [1.0, 1.0],
            lists: Vec::new(),
        }
    }
}

impl UiDrawData {
    pub fn total_vtx_count(&self) -> usize {
        self.lists.iter().map(|l| l.vertices.len()).sum()
    }

    pub fn total_idx_count(&self) -> usize {
        self.lists.iter().map(|l| l.indices.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_idx_count() == 0
    }
}

/// RGBA8 texture sampled by every UI draw.
#[derive(Clone, Debug)]
pub struct UiAtlas {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl UiAtlas {
    pub const BYTES_PER_TEXEL: u32 = 4;
}

/// Prepares an imgui context for this payload format and returns its font
/// atlas as RGBA32.
///
/// Large draw lists are split with `vtx_offset` rather than overflowing the
/// 16-bit index range, so renderers must add it to each command's base vertex.
pub fn configure_imgui(ctx: &mut imgui::Context) -> UiAtlas {
    ctx.set_ini_filename(None);
    ctx.set_renderer_name(Some(format!(
        "vkwars-render {}",
        env!("CARGO_PKG_VERSION")
    )));
    ctx.io_mut()
        .backend_flags
        .insert(imgui::BackendFlags::RENDERER_HAS_VTX_OFFSET);

    let fonts = ctx.fonts();
    if fonts.fonts().is_empty() {
        fonts.add_font(&[imgui::FontSource::DefaultFontData { config: None }]);
    }
    let texture = fonts.build_rgba32_texture();
    UiAtlas {
        width: texture.width,
        height: texture.height,
        pixels: texture.data.to_vec(),
    }
}

impl UiDrawData {
    /// Copies a rendered imgui frame. Callback commands are dropped; the
    /// renderer has no hook to run them.
    pub fn from_imgui(draw_data: &imgui::DrawData) -> Self {
        let lists = draw_data
            .draw_lists()
            .map(|list| UiDrawList {
                vertices: list
                    .vtx_buffer()
                    .iter()
                    .map(|v| UiVertex {
                        pos: v.pos,
                        uv: v.uv,
                        color: pack_rgba(v.col),
                    })
                    .collect(),
                indices: list.idx_buffer().to_vec(),
                commands: list
                    .commands()
                    .filter_map(|cmd| match cmd {
                        imgui::DrawCmd::Elements { count, cmd_params } => Some(UiDrawCmd {
                            clip_rect: cmd_params.clip_rect,
                            elem_count: count as u32,
                            idx_offset: cmd_params.idx_offset as u32,
                            vtx_offset: cmd_params.vtx_offset as u32,
                        }),
                        imgui::DrawCmd::ResetRenderState
                        | imgui::DrawCmd::RawCallback { .. } => None,
                    })
                    .collect(),
            })
            .collect();

        Self {
            display_pos: draw_data.display_pos,
            display_size: draw_data.display_size,
            framebuffer_scale: draw_data.framebuffer_scale,
            lists,
        }
    }
}
