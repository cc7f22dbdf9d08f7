//! Pipeline cache persistence, SPIR-V loading and the UI graphics pipeline.

use crate::error::{RenderError, RenderResult, VkResultExt};
use ash::util::read_spv;
use ash::vk;
use std::ffi::CStr;
use std::fs;
use std::io::Cursor;
use std::mem::{offset_of, size_of};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use vkwars_render::UiVertex;

pub const UI_VERT_SPV: &str = "ui.vert.spv";
pub const UI_FRAG_SPV: &str = "ui.frag.spv";

#[cfg(feature = "compile-shaders")]
const EMBEDDED_UI_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/ui.vert.spv"));
#[cfg(feature = "compile-shaders")]
const EMBEDDED_UI_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/ui.frag.spv"));

/// SPIR-V words for the UI vertex and fragment stages.
#[derive(Clone, Debug)]
pub struct ShaderSet {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

impl ShaderSet {
    /// Embedded SPIR-V when built with `compile-shaders`, otherwise
    /// `ui.vert.spv`/`ui.frag.spv` from `dir`.
    pub fn load(dir: &Path) -> RenderResult<Self> {
        #[cfg(feature = "compile-shaders")]
        {
            let _ = dir;
            Self::from_bytes(EMBEDDED_UI_VERT, EMBEDDED_UI_FRAG)
        }
        #[cfg(not(feature = "compile-shaders"))]
        {
            let read = |name: &str| {
                let path = dir.join(name);
                fs::read(&path)
                    .map_err(|e| RenderError::Shader(format!("{}: {e}", path.display())))
            };
            Self::from_bytes(&read(UI_VERT_SPV)?, &read(UI_FRAG_SPV)?)
        }
    }

    pub fn from_bytes(vertex: &[u8], fragment: &[u8]) -> RenderResult<Self> {
        let words = |stage: &str, bytes: &[u8]| {
            read_spv(&mut Cursor::new(bytes))
                .map_err(|e| RenderError::Shader(format!("{stage} stage: {e}")))
        };
        Ok(Self {
            vertex: words("vertex", vertex)?,
            fragment: words("fragment", fragment)?,
        })
    }
}

fn hex_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Per-device cache file name, so switching GPUs or drivers never feeds a
/// foreign blob to the driver.
pub fn pipeline_cache_path(props: &vk::PhysicalDeviceProperties) -> PathBuf {
    let uuid = hex_bytes(&props.pipeline_cache_uuid);
    PathBuf::from(format!(
        "vk_pipeline_cache_{:04x}_{:04x}_{:08x}_{}.bin",
        props.vendor_id, props.device_id, props.driver_version, uuid
    ))
}

pub struct PipelineCache {
    handle: vk::PipelineCache,
    path: PathBuf,
}

impl PipelineCache {
    /// Seeds the cache from `path` when the file exists.
    pub fn load(device: &ash::Device, path: PathBuf) -> RenderResult<Self> {
        let data = fs::read(&path).ok();
        let create = |initial: &[u8]| {
            let ci = vk::PipelineCacheCreateInfo {
                s_type: vk::StructureType::PIPELINE_CACHE_CREATE_INFO,
                initial_data_size: initial.len(),
                p_initial_data: initial.as_ptr().cast(),
                ..Default::default()
            };
            unsafe { device.create_pipeline_cache(&ci, None) }
        };
        let handle = match data.as_deref().map(create) {
            Some(Ok(handle)) => {
                debug!("pipeline cache loaded from {}", path.display());
                handle
            }
            Some(Err(e)) => {
                warn!("pipeline cache {} rejected ({e:?}); starting empty", path.display());
                create(&[]).vk("vkCreatePipelineCache")?
            }
            None => create(&[]).vk("vkCreatePipelineCache")?,
        };
        Ok(Self { handle, path })
    }

    pub fn handle(&self) -> vk::PipelineCache {
        self.handle
    }

    pub fn save(&self, device: &ash::Device) {
        match unsafe { device.get_pipeline_cache_data(self.handle) } {
            Ok(bytes) => {
                if let Some(parent) = self.path.parent() {
                    let _ = fs::create_dir_all(parent);
                }
                if let Err(e) = fs::write(&self.path, &bytes) {
                    warn!("pipeline cache not saved to {}: {e}", self.path.display());
                }
            }
            Err(e) => debug!("pipeline cache data unavailable: {e:?}"),
        }
    }

    /// Persists, then destroys the cache.
    pub fn destroy(&mut self, device: &ash::Device) {
        if self.handle == vk::PipelineCache::null() {
            return;
        }
        self.save(device);
        unsafe { device.destroy_pipeline_cache(self.handle, None) };
        self.handle = vk::PipelineCache::null();
    }
}

fn shader_module(device: &ash::Device, code: &[u32]) -> RenderResult<vk::ShaderModule> {
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: code.as_ptr(),
        code_size: code.len() * 4,
        ..Default::default()
    };
    unsafe { device.create_shader_module(&ci, None) }.vk("vkCreateShaderModule")
}

pub fn ui_vertex_attributes() -> [vk::VertexInputAttributeDescription; 3] {
    [
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: offset_of!(UiVertex, pos) as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: offset_of!(UiVertex, uv) as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 2,
            binding: 0,
            format: vk::Format::R8G8B8A8_UNORM,
            offset: offset_of!(UiVertex, color) as u32,
        },
    ]
}

/// Alpha-blended, unculled, depth-ignoring pipeline for UI geometry inside
/// `render_pass`. Viewport and scissor are dynamic.
pub fn create_ui_pipeline(
    device: &ash::Device,
    cache: vk::PipelineCache,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    shaders: &ShaderSet,
) -> RenderResult<vk::Pipeline> {
    // --- Shader modules (destroyed before return) ---
    let vs = shader_module(device, &shaders.vertex)?;
    let fs = match shader_module(device, &shaders.fragment) {
        Ok(fs) => fs,
        Err(e) => {
            unsafe { device.destroy_shader_module(vs, None) };
            return Err(e);
        }
    };
    let entry: &CStr = c"main";
    let stages = [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: fs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
    ];

    // --- Fixed-function state ---
    let binding = vk::VertexInputBindingDescription {
        binding: 0,
        stride: size_of::<UiVertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    };
    let attributes = ui_vertex_attributes();
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        vertex_binding_description_count: 1,
        p_vertex_binding_descriptions: &binding,
        vertex_attribute_description_count: attributes.len() as u32,
        p_vertex_attribute_descriptions: attributes.as_ptr(),
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        ..Default::default()
    };
    let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
        dynamic_state_count: dyn_states.len() as u32,
        p_dynamic_states: dyn_states.as_ptr(),
        ..Default::default()
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        scissor_count: 1,
        ..Default::default()
    };
    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::NONE,
        front_face: vk::FrontFace::COUNTER_CLOCKWISE,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        ..Default::default()
    };
    // overlay: drawn in submission order, never depth tested
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
        depth_test_enable: vk::FALSE,
        depth_write_enable: vk::FALSE,
        ..Default::default()
    };
    let color_blend_att = vk::PipelineColorBlendAttachmentState {
        blend_enable: vk::TRUE,
        src_color_blend_factor: vk::BlendFactor::SRC_ALPHA,
        dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        color_blend_op: vk::BlendOp::ADD,
        src_alpha_blend_factor: vk::BlendFactor::ONE,
        dst_alpha_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        alpha_blend_op: vk::BlendOp::ADD,
        color_write_mask: vk::ColorComponentFlags::RGBA,
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_blend_att,
        ..Default::default()
    };

    let pipeline_info = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_depth_stencil_state: &depth_stencil,
        p_color_blend_state: &color_blend,
        p_dynamic_state: &dynamic_state,
        layout,
        render_pass,
        subpass: 0,
        ..Default::default()
    };

    let created = unsafe {
        device.create_graphics_pipelines(cache, std::slice::from_ref(&pipeline_info), None)
    };
    unsafe {
        device.destroy_shader_module(vs, None);
        device.destroy_shader_module(fs, None);
    }
    match created {
        Ok(pipelines) => Ok(pipelines[0]),
        Err((_, result)) => Err(RenderError::Vk {
            call: "vkCreateGraphicsPipelines",
            result,
        }),
    }
}
