//! Scripted in-memory [`Gpu`] for exercising the frame pacing, swapchain and
//! staging logic without a device.
//!
//! Handles are sequential integers. Submissions complete instantly unless
//! completions are held, acquire/present results can be queued up front, and
//! every call lands in an ordered log the tests assert on.

use crate::error::{RenderError, RenderResult};
use crate::gpu::{
    BufferDesc, CommandContext, Gpu, ImageDesc, ImageTransition, Submission, SurfaceSupport,
    SwapchainDesc,
};
use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    CreateFence { fence: u64, signaled: bool },
    DestroyFence(u64),
    WaitFences(Vec<u64>),
    ResetFences(Vec<u64>),
    CreateSemaphore(u64),
    DestroySemaphore(u64),
    DeviceWaitIdle,
    CreateCommandContext(u64),
    DestroyCommandContext(u64),
    ResetCommandContext(u64),
    BeginCommands(u64),
    EndCommands(u64),
    Submit {
        cmd: u64,
        wait: Option<u64>,
        signal: Option<u64>,
        fence: u64,
    },
    SurfaceSupport,
    CreateSwapchain { swapchain: u64, old: u64 },
    DestroySwapchain(u64),
    Acquire { swapchain: u64, semaphore: u64 },
    Present { swapchain: u64, index: u32, wait: u64 },
    CreateRenderPass(u64),
    DestroyRenderPass(u64),
    CreateImageView(u64),
    DestroyImageView(u64),
    CreateFramebuffer(u64),
    DestroyFramebuffer(u64),
    CreateImage { image: u64, name: &'static str },
    DestroyImage(u64),
    CreateBuffer { buffer: u64, size: u64 },
    DestroyBuffer(u64),
    WriteMapped { offset: u64, len: usize },
    CopyBuffer {
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    },
    CopyBufferToImage { image: u64, buffer_offset: u64 },
    Barrier {
        image: u64,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },
    BeginRenderPass { framebuffer: u64 },
    EndRenderPass,
}

#[derive(Debug)]
pub struct FakeAllocation {
    pub id: u64,
    pub host: Option<Vec<u8>>,
}

struct State {
    next_handle: u64,
    calls: Vec<Call>,
    live: HashSet<u64>,
    fences: HashMap<u64, bool>,
    hold_completions: bool,
    held: Vec<u64>,
    support: SurfaceSupport,
    depth_formats: Vec<vk::Format>,
    swapchain_images: HashMap<u64, Vec<vk::Image>>,
    next_image: u32,
    acquire_script: VecDeque<VkResult<(u32, bool)>>,
    present_script: VecDeque<VkResult<bool>>,
    failures: HashMap<&'static str, usize>,
    op_counts: HashMap<&'static str, usize>,
}

#[derive(Clone)]
pub struct FakeGpu {
    state: Rc<RefCell<State>>,
}

pub fn default_support() -> SurfaceSupport {
    SurfaceSupport {
        capabilities: vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            ..Default::default()
        },
        formats: vec![vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }],
        present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        queue_family: 0,
        present_supported: true,
    }
}

impl FakeGpu {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(State {
                next_handle: 1,
                calls: Vec::new(),
                live: HashSet::new(),
                fences: HashMap::new(),
                hold_completions: false,
                held: Vec::new(),
                support: default_support(),
                depth_formats: vec![vk::Format::D32_SFLOAT],
                swapchain_images: HashMap::new(),
                next_image: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                failures: HashMap::new(),
                op_counts: HashMap::new(),
            })),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    pub fn live_objects(&self) -> usize {
        self.state.borrow().live.len()
    }

    pub fn fence_signaled(&self, fence: vk::Fence) -> bool {
        self.state
            .borrow()
            .fences
            .get(&fence.as_raw())
            .copied()
            .unwrap_or(false)
    }

    /// While held, submitted fences stay unsignaled until [`Self::complete_held`].
    pub fn hold_completions(&self, hold: bool) {
        self.state.borrow_mut().hold_completions = hold;
    }

    pub fn complete_held(&self) {
        let mut s = self.state.borrow_mut();
        let held = std::mem::take(&mut s.held);
        for fence in held {
            s.fences.insert(fence, true);
        }
    }

    pub fn set_support(&self, support: SurfaceSupport) {
        self.state.borrow_mut().support = support;
    }

    pub fn set_extent(&self, width: u32, height: u32) {
        self.state.borrow_mut().support.capabilities.current_extent =
            vk::Extent2D { width, height };
    }

    pub fn set_depth_formats(&self, formats: Vec<vk::Format>) {
        self.state.borrow_mut().depth_formats = formats;
    }

    pub fn script_acquire(&self, result: VkResult<(u32, bool)>) {
        self.state.borrow_mut().acquire_script.push_back(result);
    }

    pub fn script_present(&self, result: VkResult<bool>) {
        self.state.borrow_mut().present_script.push_back(result);
    }

    /// The `n`th (1-based) call of `op` fails with `ERROR_OUT_OF_DEVICE_MEMORY`.
    pub fn fail_nth(&self, op: &'static str, n: usize) {
        self.state.borrow_mut().failures.insert(op, n);
    }

    fn check(&self, op: &'static str) -> RenderResult<()> {
        let mut s = self.state.borrow_mut();
        let count = s.op_counts.entry(op).or_insert(0);
        *count += 1;
        let count = *count;
        if s.failures.get(op) == Some(&count) {
            return Err(RenderError::Vk {
                call: op,
                result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            });
        }
        Ok(())
    }

    fn alloc_handle(&self) -> u64 {
        let mut s = self.state.borrow_mut();
        let id = s.next_handle;
        s.next_handle += 1;
        s.live.insert(id);
        id
    }

    fn release(&self, id: u64) {
        if id != 0 {
            let removed = self.state.borrow_mut().live.remove(&id);
            assert!(removed, "handle {id} destroyed twice or never created");
        }
    }

    fn log(&self, call: Call) {
        self.state.borrow_mut().calls.push(call);
    }
}

impl Gpu for FakeGpu {
    type Allocation = FakeAllocation;

    fn create_fence(&self, signaled: bool) -> RenderResult<vk::Fence> {
        self.check("create_fence")?;
        let id = self.alloc_handle();
        self.state.borrow_mut().fences.insert(id, signaled);
        self.log(Call::CreateFence {
            fence: id,
            signaled,
        });
        Ok(vk::Fence::from_raw(id))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.release(fence.as_raw());
        self.state.borrow_mut().fences.remove(&fence.as_raw());
        self.log(Call::DestroyFence(fence.as_raw()));
    }

    fn wait_for_fences(
        &self,
        fences: &[vk::Fence],
        timeout: Option<Duration>,
    ) -> RenderResult<()> {
        let raw: Vec<u64> = fences.iter().map(|f| f.as_raw()).collect();
        self.log(Call::WaitFences(raw.clone()));
        let s = self.state.borrow();
        if raw.iter().all(|f| s.fences.get(f).copied().unwrap_or(false)) {
            Ok(())
        } else {
            // An unbounded wait would hang forever; report it like a timeout.
            Err(RenderError::FenceTimeout {
                timeout: timeout.unwrap_or(Duration::MAX),
            })
        }
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> RenderResult<()> {
        let raw: Vec<u64> = fences.iter().map(|f| f.as_raw()).collect();
        {
            let mut s = self.state.borrow_mut();
            for f in &raw {
                s.fences.insert(*f, false);
            }
        }
        self.log(Call::ResetFences(raw));
        Ok(())
    }

    fn create_semaphore(&self) -> RenderResult<vk::Semaphore> {
        self.check("create_semaphore")?;
        let id = self.alloc_handle();
        self.log(Call::CreateSemaphore(id));
        Ok(vk::Semaphore::from_raw(id))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.release(semaphore.as_raw());
        self.log(Call::DestroySemaphore(semaphore.as_raw()));
    }

    fn device_wait_idle(&self) -> RenderResult<()> {
        self.log(Call::DeviceWaitIdle);
        Ok(())
    }

    fn create_command_context(&self) -> RenderResult<CommandContext> {
        self.check("create_command_context")?;
        let pool = self.alloc_handle();
        let buffer = self.alloc_handle();
        self.log(Call::CreateCommandContext(buffer));
        Ok(CommandContext {
            pool: vk::CommandPool::from_raw(pool),
            buffer: vk::CommandBuffer::from_raw(buffer),
        })
    }

    fn destroy_command_context(&self, ctx: CommandContext) {
        self.release(ctx.buffer.as_raw());
        self.release(ctx.pool.as_raw());
        self.log(Call::DestroyCommandContext(ctx.buffer.as_raw()));
    }

    fn reset_command_context(&self, ctx: CommandContext) -> RenderResult<()> {
        self.log(Call::ResetCommandContext(ctx.buffer.as_raw()));
        Ok(())
    }

    fn begin_commands(&self, cmd: vk::CommandBuffer) -> RenderResult<()> {
        self.log(Call::BeginCommands(cmd.as_raw()));
        Ok(())
    }

    fn end_commands(&self, cmd: vk::CommandBuffer) -> RenderResult<()> {
        self.log(Call::EndCommands(cmd.as_raw()));
        Ok(())
    }

    fn queue_submit(&self, submission: &Submission) -> RenderResult<()> {
        self.check("queue_submit")?;
        let fence = submission.fence.as_raw();
        {
            let mut s = self.state.borrow_mut();
            if s.hold_completions {
                s.held.push(fence);
            } else {
                s.fences.insert(fence, true);
            }
        }
        self.log(Call::Submit {
            cmd: submission.command_buffer.as_raw(),
            wait: submission.wait.map(|(sem, _)| sem.as_raw()),
            signal: submission.signal.map(|sem| sem.as_raw()),
            fence,
        });
        Ok(())
    }

    fn surface_support(&self) -> RenderResult<SurfaceSupport> {
        self.log(Call::SurfaceSupport);
        Ok(self.state.borrow().support.clone())
    }

    fn depth_format_supported(&self, format: vk::Format) -> bool {
        self.state.borrow().depth_formats.contains(&format)
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> RenderResult<vk::SwapchainKHR> {
        self.check("create_swapchain")?;
        let id = self.alloc_handle();
        let images = (0..desc.min_image_count)
            .map(|_| {
                let mut s = self.state.borrow_mut();
                let img = s.next_handle;
                s.next_handle += 1;
                vk::Image::from_raw(img)
            })
            .collect();
        self.state.borrow_mut().swapchain_images.insert(id, images);
        self.log(Call::CreateSwapchain {
            swapchain: id,
            old: desc.old_swapchain.as_raw(),
        });
        Ok(vk::SwapchainKHR::from_raw(id))
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RenderResult<Vec<vk::Image>> {
        Ok(self
            .state
            .borrow()
            .swapchain_images
            .get(&swapchain.as_raw())
            .cloned()
            .unwrap_or_default())
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        self.release(swapchain.as_raw());
        self.state
            .borrow_mut()
            .swapchain_images
            .remove(&swapchain.as_raw());
        self.log(Call::DestroySwapchain(swapchain.as_raw()));
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        self.log(Call::Acquire {
            swapchain: swapchain.as_raw(),
            semaphore: signal.as_raw(),
        });
        let mut s = self.state.borrow_mut();
        if let Some(result) = s.acquire_script.pop_front() {
            return result;
        }
        let count = s
            .swapchain_images
            .get(&swapchain.as_raw())
            .map_or(1, |v| v.len().max(1)) as u32;
        let index = s.next_image % count;
        s.next_image += 1;
        Ok((index, false))
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        self.log(Call::Present {
            swapchain: swapchain.as_raw(),
            index: image_index,
            wait: wait.as_raw(),
        });
        self.state
            .borrow_mut()
            .present_script
            .pop_front()
            .unwrap_or(Ok(false))
    }

    fn create_render_pass(
        &self,
        _color: vk::Format,
        _depth: vk::Format,
    ) -> RenderResult<vk::RenderPass> {
        self.check("create_render_pass")?;
        let id = self.alloc_handle();
        self.log(Call::CreateRenderPass(id));
        Ok(vk::RenderPass::from_raw(id))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.release(render_pass.as_raw());
        self.log(Call::DestroyRenderPass(render_pass.as_raw()));
    }

    fn create_image_view(
        &self,
        _image: vk::Image,
        _format: vk::Format,
        _aspect: vk::ImageAspectFlags,
    ) -> RenderResult<vk::ImageView> {
        self.check("create_image_view")?;
        let id = self.alloc_handle();
        self.log(Call::CreateImageView(id));
        Ok(vk::ImageView::from_raw(id))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.release(view.as_raw());
        self.log(Call::DestroyImageView(view.as_raw()));
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        _attachments: &[vk::ImageView],
        _extent: vk::Extent2D,
    ) -> RenderResult<vk::Framebuffer> {
        self.check("create_framebuffer")?;
        let id = self.alloc_handle();
        self.log(Call::CreateFramebuffer(id));
        Ok(vk::Framebuffer::from_raw(id))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.release(framebuffer.as_raw());
        self.log(Call::DestroyFramebuffer(framebuffer.as_raw()));
    }

    fn create_image(&self, desc: &ImageDesc) -> RenderResult<(vk::Image, FakeAllocation)> {
        self.check("create_image")?;
        let id = self.alloc_handle();
        self.log(Call::CreateImage {
            image: id,
            name: desc.name,
        });
        Ok((
            vk::Image::from_raw(id),
            FakeAllocation { id, host: None },
        ))
    }

    fn destroy_image(&self, image: vk::Image, _allocation: FakeAllocation) {
        self.release(image.as_raw());
        self.log(Call::DestroyImage(image.as_raw()));
    }

    fn create_buffer(&self, desc: &BufferDesc) -> RenderResult<(vk::Buffer, FakeAllocation)> {
        self.check("create_buffer")?;
        let id = self.alloc_handle();
        self.log(Call::CreateBuffer {
            buffer: id,
            size: desc.size,
        });
        let host = match desc.memory {
            crate::gpu::MemoryUsage::GpuOnly => None,
            _ => Some(vec![0u8; desc.size as usize]),
        };
        Ok((vk::Buffer::from_raw(id), FakeAllocation { id, host }))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer, _allocation: FakeAllocation) {
        self.release(buffer.as_raw());
        self.log(Call::DestroyBuffer(buffer.as_raw()));
    }

    fn write_mapped(
        &self,
        allocation: &mut FakeAllocation,
        offset: u64,
        bytes: &[u8],
    ) -> RenderResult<()> {
        let host = allocation
            .host
            .as_mut()
            .ok_or(RenderError::NotHostVisible)?;
        let start = offset as usize;
        host[start..start + bytes.len()].copy_from_slice(bytes);
        self.log(Call::WriteMapped {
            offset,
            len: bytes.len(),
        });
        Ok(())
    }

    fn cmd_copy_buffer(
        &self,
        _cmd: vk::CommandBuffer,
        _src: vk::Buffer,
        _dst: vk::Buffer,
        region: vk::BufferCopy,
    ) {
        self.log(Call::CopyBuffer {
            src_offset: region.src_offset,
            dst_offset: region.dst_offset,
            size: region.size,
        });
    }

    fn cmd_copy_buffer_to_image(
        &self,
        _cmd: vk::CommandBuffer,
        _src: vk::Buffer,
        dst: vk::Image,
        region: vk::BufferImageCopy,
    ) {
        self.log(Call::CopyBufferToImage {
            image: dst.as_raw(),
            buffer_offset: region.buffer_offset,
        });
    }

    fn cmd_image_barrier(&self, _cmd: vk::CommandBuffer, transition: &ImageTransition) {
        self.log(Call::Barrier {
            image: transition.image.as_raw(),
            old: transition.old_layout,
            new: transition.new_layout,
        });
    }

    fn cmd_begin_render_pass(
        &self,
        _cmd: vk::CommandBuffer,
        _render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        _extent: vk::Extent2D,
        _clear_values: &[vk::ClearValue],
    ) {
        self.log(Call::BeginRenderPass {
            framebuffer: framebuffer.as_raw(),
        });
    }

    fn cmd_end_render_pass(&self, _cmd: vk::CommandBuffer) {
        self.log(Call::EndRenderPass);
    }
}
