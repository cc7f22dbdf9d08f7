//! Device seam used by the frame pacing, swapchain and staging code.
//!
//! Every handle passed back into a [`Gpu`] must have been created by that same
//! `Gpu`. [`crate::AshGpu`] is the real implementation; tests drive the same
//! code through a scripted fake.

use crate::error::RenderResult;
use ash::prelude::VkResult;
use ash::vk;
use std::time::Duration;

/// Placement hint for allocations, mirroring the usual allocator vocabulary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryUsage {
    GpuOnly,
    CpuToGpu,
    CpuOnly,
}

/// A transient command pool with its single primary command buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommandContext {
    pub pool: vk::CommandPool,
    pub buffer: vk::CommandBuffer,
}

/// Surface state as reported right now. Queried fresh on every (re)build.
#[derive(Clone, Debug, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub queue_family: u32,
    pub present_supported: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct SwapchainDesc {
    pub min_image_count: u32,
    pub surface_format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
    pub present_mode: vk::PresentModeKHR,
    pub old_swapchain: vk::SwapchainKHR,
}

#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub name: &'static str,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub usage: vk::ImageUsageFlags,
    pub memory: MemoryUsage,
}

#[derive(Clone, Copy, Debug)]
pub struct BufferDesc {
    pub name: &'static str,
    pub size: u64,
    pub usage: vk::BufferUsageFlags,
    pub memory: MemoryUsage,
}

/// One queue submission of a single command buffer.
#[derive(Clone, Copy, Debug)]
pub struct Submission {
    pub command_buffer: vk::CommandBuffer,
    pub wait: Option<(vk::Semaphore, vk::PipelineStageFlags)>,
    pub signal: Option<vk::Semaphore>,
    pub fence: vk::Fence,
}

/// Layout transition with its execution and memory dependency.
#[derive(Clone, Copy, Debug)]
pub struct ImageTransition {
    pub image: vk::Image,
    pub range: vk::ImageSubresourceRange,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

pub trait Gpu {
    /// Opaque token returned by the allocator alongside each image or buffer.
    type Allocation;

    // sync
    fn create_fence(&self, signaled: bool) -> RenderResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    /// `None` waits forever. A timeout surfaces as `RenderError::FenceTimeout`.
    fn wait_for_fences(&self, fences: &[vk::Fence], timeout: Option<Duration>)
        -> RenderResult<()>;
    fn reset_fences(&self, fences: &[vk::Fence]) -> RenderResult<()>;
    fn create_semaphore(&self) -> RenderResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn device_wait_idle(&self) -> RenderResult<()>;

    // commands
    fn create_command_context(&self) -> RenderResult<CommandContext>;
    fn destroy_command_context(&self, ctx: CommandContext);
    fn reset_command_context(&self, ctx: CommandContext) -> RenderResult<()>;
    /// Begins one-time-submit recording.
    fn begin_commands(&self, cmd: vk::CommandBuffer) -> RenderResult<()>;
    fn end_commands(&self, cmd: vk::CommandBuffer) -> RenderResult<()>;
    fn queue_submit(&self, submission: &Submission) -> RenderResult<()>;

    // surface + swapchain
    fn surface_support(&self) -> RenderResult<SurfaceSupport>;
    fn depth_format_supported(&self, format: vk::Format) -> bool;
    fn create_swapchain(&self, desc: &SwapchainDesc) -> RenderResult<vk::SwapchainKHR>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RenderResult<Vec<vk::Image>>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    /// Raw result so callers can classify `SUBOPTIMAL_KHR`/`ERROR_OUT_OF_DATE_KHR`.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)>;
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool>;

    // attachments
    fn create_render_pass(
        &self,
        color: vk::Format,
        depth: vk::Format,
    ) -> RenderResult<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> RenderResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RenderResult<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    // memory
    fn create_image(&self, desc: &ImageDesc) -> RenderResult<(vk::Image, Self::Allocation)>;
    fn destroy_image(&self, image: vk::Image, allocation: Self::Allocation);
    fn create_buffer(&self, desc: &BufferDesc) -> RenderResult<(vk::Buffer, Self::Allocation)>;
    fn destroy_buffer(&self, buffer: vk::Buffer, allocation: Self::Allocation);
    /// Copies `bytes` into a host-visible allocation at `offset`.
    fn write_mapped(
        &self,
        allocation: &mut Self::Allocation,
        offset: u64,
        bytes: &[u8],
    ) -> RenderResult<()>;

    // recording
    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        region: vk::BufferCopy,
    );
    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        region: vk::BufferImageCopy,
    );
    fn cmd_image_barrier(&self, cmd: vk::CommandBuffer, transition: &ImageTransition);
    fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    );
    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer);
}
