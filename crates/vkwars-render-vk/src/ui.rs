//! UI overlay pass: font atlas, per-slot geometry buffers and scissored
//! indexed draws for a [`UiDrawData`] payload.

use crate::ash_gpu::AshGpu;
use crate::driver::{FrameContext, FramePass};
use crate::error::{RenderResult, VkResultExt};
use crate::frame::MAX_FRAMES_IN_FLIGHT;
use crate::gpu::{BufferDesc, Gpu, ImageDesc, MemoryUsage};
use crate::pipeline::{create_ui_pipeline, PipelineCache, ShaderSet};
use crate::staging::{ImageTarget, ImageUpload, StagingConfig, StagingUploader};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use gpu_allocator::vulkan::Allocation;
use std::mem::size_of;
use std::path::PathBuf;
use tracing::{debug, warn};
use vkwars_render::{UiAtlas, UiDrawData, UiIndex, UiVertex};

pub const UI_VERTEX_BUFFER_SIZE: u64 = 1 << 20;
pub const UI_INDEX_BUFFER_SIZE: u64 = 1 << 20;
pub const UI_FONT_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Maps display coordinates to clip space: `clip = pos * scale + translate`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct UiPushConstants {
    pub scale: [f32; 2],
    pub translate: [f32; 2],
}

impl UiPushConstants {
    pub fn for_display(pos: [f32; 2], size: [f32; 2]) -> Self {
        let scale = [2.0 / size[0], 2.0 / size[1]];
        Self {
            scale,
            translate: [-1.0 - pos[0] * scale[0], -1.0 - pos[1] * scale[1]],
        }
    }
}

/// Clip rect in display space → framebuffer scissor, clamped to `extent`.
/// `None` when nothing of the rect is visible.
pub fn scissor_for(
    clip: [f32; 4],
    display_pos: [f32; 2],
    framebuffer_scale: [f32; 2],
    extent: vk::Extent2D,
) -> Option<vk::Rect2D> {
    let min_x = ((clip[0] - display_pos[0]) * framebuffer_scale[0]).max(0.0);
    let min_y = ((clip[1] - display_pos[1]) * framebuffer_scale[1]).max(0.0);
    let max_x = ((clip[2] - display_pos[0]) * framebuffer_scale[0]).min(extent.width as f32);
    let max_y = ((clip[3] - display_pos[1]) * framebuffer_scale[1]).min(extent.height as f32);
    if max_x <= min_x || max_y <= min_y {
        return None;
    }
    Some(vk::Rect2D {
        offset: vk::Offset2D {
            x: min_x as i32,
            y: min_y as i32,
        },
        extent: vk::Extent2D {
            width: (max_x - min_x) as u32,
            height: (max_y - min_y) as u32,
        },
    })
}

/// Whether a payload fits the per-slot geometry buffers.
pub fn fits_geometry_buffers(data: &UiDrawData) -> bool {
    let vtx = (data.total_vtx_count() * size_of::<UiVertex>()) as u64;
    let idx = (data.total_idx_count() * size_of::<UiIndex>()) as u64;
    vtx <= UI_VERTEX_BUFFER_SIZE && idx <= UI_INDEX_BUFFER_SIZE
}

struct GeometryBuffers {
    vertex: vk::Buffer,
    vertex_alloc: Allocation,
    index: vk::Buffer,
    index_alloc: Allocation,
}

pub struct UiRenderer {
    cache: PipelineCache,
    shaders: ShaderSet,

    font_image: vk::Image,
    font_alloc: Option<Allocation>,
    font_view: vk::ImageView,
    sampler: vk::Sampler,

    set_layout: vk::DescriptorSetLayout,
    descriptor_pool: vk::DescriptorPool,
    descriptor_set: vk::DescriptorSet,
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    pipeline_generation: u64,

    geometry: Vec<GeometryBuffers>,
}

impl UiRenderer {
    pub fn new(
        gpu: &AshGpu,
        atlas: &UiAtlas,
        staging: StagingConfig,
        shaders: ShaderSet,
        cache_path: PathBuf,
    ) -> RenderResult<Self> {
        let cache = PipelineCache::load(gpu.device(), cache_path)?;
        let mut ui = Self {
            cache,
            shaders,
            font_image: vk::Image::null(),
            font_alloc: None,
            font_view: vk::ImageView::null(),
            sampler: vk::Sampler::null(),
            set_layout: vk::DescriptorSetLayout::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            descriptor_set: vk::DescriptorSet::null(),
            layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            pipeline_generation: 0,
            geometry: Vec::with_capacity(MAX_FRAMES_IN_FLIGHT),
        };
        if let Err(e) = ui.init(gpu, atlas, staging) {
            ui.destroy(gpu);
            return Err(e);
        }
        Ok(ui)
    }

    fn init(&mut self, gpu: &AshGpu, atlas: &UiAtlas, staging: StagingConfig) -> RenderResult<()> {
        let device = gpu.device();

        // 1) font atlas, uploaded through one staging session
        let extent = vk::Extent3D {
            width: atlas.width,
            height: atlas.height,
            depth: 1,
        };
        let (image, alloc) = gpu.create_image(&ImageDesc {
            name: "ui font atlas",
            format: UI_FONT_FORMAT,
            extent,
            usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            memory: MemoryUsage::GpuOnly,
        })?;
        self.font_image = image;
        self.font_alloc = Some(alloc);
        self.font_view =
            gpu.create_image_view(image, UI_FONT_FORMAT, vk::ImageAspectFlags::COLOR)?;
        {
            let mut uploader = StagingUploader::new(gpu, staging)?;
            uploader.begin_session()?;
            uploader.upload_image(&ImageUpload {
                image,
                subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                extent,
                bytes_per_texel: UiAtlas::BYTES_PER_TEXEL,
                data: &atlas.pixels,
                target: ImageTarget::FRAGMENT_SAMPLED,
            })?;
            uploader.end_session()?;
            uploader.finish()?;
        }
        debug!("ui atlas {}x{} uploaded", atlas.width, atlas.height);

        // 2) sampler baked into the set layout
        let sampler_ci = vk::SamplerCreateInfo {
            s_type: vk::StructureType::SAMPLER_CREATE_INFO,
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode_u: vk::SamplerAddressMode::REPEAT,
            address_mode_v: vk::SamplerAddressMode::REPEAT,
            address_mode_w: vk::SamplerAddressMode::REPEAT,
            min_lod: -1000.0,
            max_lod: 1000.0,
            max_anisotropy: 1.0,
            ..Default::default()
        };
        self.sampler =
            unsafe { device.create_sampler(&sampler_ci, None) }.vk("vkCreateSampler")?;

        let binding = vk::DescriptorSetLayoutBinding {
            binding: 0,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            p_immutable_samplers: &self.sampler,
            ..Default::default()
        };
        let set_layout_ci = vk::DescriptorSetLayoutCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
            binding_count: 1,
            p_bindings: &binding,
            ..Default::default()
        };
        self.set_layout = unsafe { device.create_descriptor_set_layout(&set_layout_ci, None) }
            .vk("vkCreateDescriptorSetLayout")?;

        // 3) one set pointing at the atlas
        let pool_size = vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 1,
        };
        let pool_ci = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: 1,
            pool_size_count: 1,
            p_pool_sizes: &pool_size,
            ..Default::default()
        };
        self.descriptor_pool = unsafe { device.create_descriptor_pool(&pool_ci, None) }
            .vk("vkCreateDescriptorPool")?;
        let alloc_ci = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: self.descriptor_pool,
            descriptor_set_count: 1,
            p_set_layouts: &self.set_layout,
            ..Default::default()
        };
        self.descriptor_set = unsafe { device.allocate_descriptor_sets(&alloc_ci) }
            .vk("vkAllocateDescriptorSets")?[0];
        let image_info = vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: self.font_view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };
        let write = vk::WriteDescriptorSet {
            s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
            dst_set: self.descriptor_set,
            dst_binding: 0,
            descriptor_count: 1,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            p_image_info: &image_info,
            ..Default::default()
        };
        unsafe { device.update_descriptor_sets(&[write], &[]) };

        // 4) layout: the set + scale/translate push constants
        let push_range = vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX,
            offset: 0,
            size: size_of::<UiPushConstants>() as u32,
        };
        let layout_ci = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            set_layout_count: 1,
            p_set_layouts: &self.set_layout,
            push_constant_range_count: 1,
            p_push_constant_ranges: &push_range,
            ..Default::default()
        };
        self.layout = unsafe { device.create_pipeline_layout(&layout_ci, None) }
            .vk("vkCreatePipelineLayout")?;

        // 5) host-visible geometry, one pair per frame slot
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            let (vertex, vertex_alloc) = gpu.create_buffer(&BufferDesc {
                name: "ui vertices",
                size: UI_VERTEX_BUFFER_SIZE,
                usage: vk::BufferUsageFlags::VERTEX_BUFFER,
                memory: MemoryUsage::CpuToGpu,
            })?;
            let (index, index_alloc) = match gpu.create_buffer(&BufferDesc {
                name: "ui indices",
                size: UI_INDEX_BUFFER_SIZE,
                usage: vk::BufferUsageFlags::INDEX_BUFFER,
                memory: MemoryUsage::CpuToGpu,
            }) {
                Ok(b) => b,
                Err(e) => {
                    gpu.destroy_buffer(vertex, vertex_alloc);
                    return Err(e);
                }
            };
            self.geometry.push(GeometryBuffers {
                vertex,
                vertex_alloc,
                index,
                index_alloc,
            });
        }
        Ok(())
    }

    /// Callers drain the GPU first.
    pub fn destroy(&mut self, gpu: &AshGpu) {
        let device = gpu.device();
        unsafe {
            if self.pipeline != vk::Pipeline::null() {
                device.destroy_pipeline(self.pipeline, None);
                self.pipeline = vk::Pipeline::null();
            }
            if self.layout != vk::PipelineLayout::null() {
                device.destroy_pipeline_layout(self.layout, None);
                self.layout = vk::PipelineLayout::null();
            }
            if self.descriptor_pool != vk::DescriptorPool::null() {
                // frees the set with it
                device.destroy_descriptor_pool(self.descriptor_pool, None);
                self.descriptor_pool = vk::DescriptorPool::null();
                self.descriptor_set = vk::DescriptorSet::null();
            }
            if self.set_layout != vk::DescriptorSetLayout::null() {
                device.destroy_descriptor_set_layout(self.set_layout, None);
                self.set_layout = vk::DescriptorSetLayout::null();
            }
            if self.sampler != vk::Sampler::null() {
                device.destroy_sampler(self.sampler, None);
                self.sampler = vk::Sampler::null();
            }
        }
        if self.font_view != vk::ImageView::null() {
            gpu.destroy_image_view(self.font_view);
            self.font_view = vk::ImageView::null();
        }
        if let Some(alloc) = self.font_alloc.take() {
            gpu.destroy_image(self.font_image, alloc);
            self.font_image = vk::Image::null();
        }
        for g in self.geometry.drain(..) {
            gpu.destroy_buffer(g.vertex, g.vertex_alloc);
            gpu.destroy_buffer(g.index, g.index_alloc);
        }
        self.cache.destroy(device);
    }

    fn ensure_pipeline(&mut self, gpu: &AshGpu, frame: &FrameContext) -> RenderResult<()> {
        if self.pipeline != vk::Pipeline::null()
            && self.pipeline_generation == frame.render_pass_generation
        {
            return Ok(());
        }
        let device = gpu.device();
        if self.pipeline != vk::Pipeline::null() {
            // the render pass changed during a rebuild, after all frames retired
            unsafe { device.destroy_pipeline(self.pipeline, None) };
            self.pipeline = vk::Pipeline::null();
        }
        self.pipeline = create_ui_pipeline(
            device,
            self.cache.handle(),
            frame.render_pass,
            self.layout,
            &self.shaders,
        )?;
        self.pipeline_generation = frame.render_pass_generation;
        debug!(
            generation = frame.render_pass_generation,
            "ui pipeline built"
        );
        Ok(())
    }
}

impl FramePass<AshGpu> for UiRenderer {
    fn record(
        &mut self,
        gpu: &AshGpu,
        cmd: vk::CommandBuffer,
        frame: &FrameContext,
        ui: &UiDrawData,
    ) -> RenderResult<()> {
        self.ensure_pipeline(gpu, frame)?;
        if ui.is_empty() || ui.display_size[0] <= 0.0 || ui.display_size[1] <= 0.0 {
            return Ok(());
        }
        if !fits_geometry_buffers(ui) {
            warn!(
                vertices = ui.total_vtx_count(),
                indices = ui.total_idx_count(),
                "ui geometry exceeds its buffers; overlay skipped this frame"
            );
            return Ok(());
        }

        // 1) geometry into this slot's buffers; the slot fence already retired
        //    their previous contents
        let geo = &mut self.geometry[frame.slot];
        let (mut vtx_off, mut idx_off) = (0u64, 0u64);
        for list in &ui.lists {
            let vtx: &[u8] = bytemuck::cast_slice(&list.vertices);
            let idx: &[u8] = bytemuck::cast_slice(&list.indices);
            gpu.write_mapped(&mut geo.vertex_alloc, vtx_off, vtx)?;
            gpu.write_mapped(&mut geo.index_alloc, idx_off, idx)?;
            vtx_off += vtx.len() as u64;
            idx_off += idx.len() as u64;
        }

        // 2) state
        let device = gpu.device();
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: frame.extent.width as f32,
            height: frame.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let push = UiPushConstants::for_display(ui.display_pos, ui.display_size);
        unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.layout,
                0,
                &[self.descriptor_set],
                &[],
            );
            device.cmd_bind_vertex_buffers(cmd, 0, &[geo.vertex], &[0]);
            device.cmd_bind_index_buffer(cmd, geo.index, 0, vk::IndexType::UINT16);
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_push_constants(
                cmd,
                self.layout,
                vk::ShaderStageFlags::VERTEX,
                0,
                bytemuck::bytes_of(&push),
            );
        }

        // 3) one scissored draw per command
        let (mut base_vtx, mut base_idx) = (0u32, 0u32);
        for list in &ui.lists {
            for dc in &list.commands {
                let Some(scissor) =
                    scissor_for(dc.clip_rect, ui.display_pos, ui.framebuffer_scale, frame.extent)
                else {
                    continue;
                };
                unsafe {
                    device.cmd_set_scissor(cmd, 0, &[scissor]);
                    device.cmd_draw_indexed(
                        cmd,
                        dc.elem_count,
                        1,
                        base_idx + dc.idx_offset,
                        (base_vtx + dc.vtx_offset) as i32,
                        0,
                    );
                }
            }
            base_vtx += list.vertices.len() as u32;
            base_idx += list.indices.len() as u32;
        }
        Ok(())
    }
}
