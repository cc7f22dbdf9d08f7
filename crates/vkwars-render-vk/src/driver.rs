//! Per-frame orchestration: slot pacing, acquire, record, submit, present and
//! rebuild on surface invalidation.

use crate::error::{RenderError, RenderResult};
use crate::frame::{FrameRing, FrameSlot};
use crate::gpu::{Gpu, Submission};
use crate::surface::SurfacePreferences;
use crate::swapchain::{BuildOutcome, SwapchainManager};
use ash::prelude::VkResult;
use ash::vk;
use std::time::Duration;
use tracing::{debug, warn};
use vkwars_render::{FrameStatus, UiDrawData};

/// What a [`FramePass`] needs to know about the frame being recorded.
#[derive(Clone, Copy, Debug)]
pub struct FrameContext {
    pub slot: usize,
    pub image_index: u32,
    pub extent: vk::Extent2D,
    pub render_pass: vk::RenderPass,
    pub render_pass_generation: u64,
}

/// Records draws inside the frame's render pass.
pub trait FramePass<G: Gpu> {
    fn record(
        &mut self,
        gpu: &G,
        cmd: vk::CommandBuffer,
        frame: &FrameContext,
        ui: &UiDrawData,
    ) -> RenderResult<()>;
}

/// Clear-only frames.
pub struct NoOverlay;

impl<G: Gpu> FramePass<G> for NoOverlay {
    fn record(
        &mut self,
        _gpu: &G,
        _cmd: vk::CommandBuffer,
        _frame: &FrameContext,
        _ui: &UiDrawData,
    ) -> RenderResult<()> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Render into `image_index`; `rebuild` is set for suboptimal surfaces.
    Usable { image_index: u32, rebuild: bool },
    /// Out of date: nothing may be rendered, rebuild now.
    Stale,
}

pub fn classify_acquire(result: VkResult<(u32, bool)>) -> RenderResult<AcquireOutcome> {
    match result {
        Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Usable {
            image_index,
            rebuild: suboptimal,
        }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::Stale),
        Err(result) => Err(RenderError::Vk {
            call: "vkAcquireNextImageKHR",
            result,
        }),
    }
}

/// `Ok(true)` when the surface needs a rebuild after this present.
pub fn present_needs_rebuild(result: VkResult<bool>) -> RenderResult<bool> {
    match result {
        Ok(suboptimal) => Ok(suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
        Err(result) => Err(RenderError::Vk {
            call: "vkQueuePresentKHR",
            result,
        }),
    }
}

pub struct Presenter<G: Gpu> {
    gpu: G,
    frames: FrameRing,
    swapchain: SwapchainManager<G>,
    clear_color: [f32; 4],
    fence_timeout: Option<Duration>,
    rebuild_requested: bool,
}

impl<G: Gpu> Presenter<G> {
    /// Creates the frame ring and performs the initial swapchain build.
    pub fn new(
        gpu: G,
        prefs: SurfacePreferences,
        extent_hint: vk::Extent2D,
        fence_timeout: Option<Duration>,
    ) -> RenderResult<Self> {
        let frames = FrameRing::new(&gpu)?;
        let mut presenter = Self {
            gpu,
            frames,
            swapchain: SwapchainManager::new(prefs, extent_hint),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            fence_timeout,
            rebuild_requested: false,
        };
        presenter.swapchain.build(&presenter.gpu)?;
        Ok(presenter)
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn swapchain(&self) -> &SwapchainManager<G> {
        &self.swapchain
    }

    pub fn frames(&self) -> &FrameRing {
        &self.frames
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    /// New surface size; the rebuild happens at the start of the next frame.
    pub fn resize(&mut self, extent_hint: vk::Extent2D) {
        self.swapchain.set_extent_hint(extent_hint);
        self.rebuild_requested = true;
    }

    /// Waits until no frame is in flight.
    pub fn drain(&self) -> RenderResult<()> {
        self.frames.wait_all(&self.gpu, self.fence_timeout)?;
        self.gpu.device_wait_idle()
    }

    pub fn render_frame(
        &mut self,
        ui: &UiDrawData,
        pass: &mut dyn FramePass<G>,
    ) -> RenderResult<FrameStatus> {
        if self.rebuild_requested || !self.swapchain.is_ready() {
            // a failed rebuild keeps the request for the next frame
            let outcome = self.rebuild()?;
            self.rebuild_requested = false;
            if outcome == BuildOutcome::Deferred {
                return Ok(FrameStatus::Suspended);
            }
        }

        // 1) pick the slot and wait until its previous submission retired
        let slot_index = self.frames.advance();
        let slot = *self.frames.slot(slot_index);
        self.gpu
            .wait_for_fences(&[slot.completion], self.fence_timeout)?;

        // 2) acquire
        let swapchain = self.swapchain.swapchain();
        let acquired =
            classify_acquire(self.gpu.acquire_next_image(swapchain, slot.image_acquired))?;

        let (mut status, rebuild) = match acquired {
            AcquireOutcome::Stale => {
                debug!("acquire: swapchain out of date");
                (FrameStatus::Skipped, true)
            }
            AcquireOutcome::Usable {
                image_index,
                rebuild,
            } => {
                // 3) record, submit, present
                let needs_rebuild =
                    self.submit_and_present(slot_index, &slot, image_index, ui, pass)?;
                (
                    FrameStatus::Presented { rebuilt: false },
                    rebuild || needs_rebuild,
                )
            }
        };

        // 4) absorb surface invalidation
        if rebuild {
            self.rebuild()?;
            if let FrameStatus::Presented { rebuilt } = &mut status {
                *rebuilt = true;
            }
        }
        Ok(status)
    }

    fn submit_and_present(
        &mut self,
        slot_index: usize,
        slot: &FrameSlot,
        image_index: u32,
        ui: &UiDrawData,
        pass: &mut dyn FramePass<G>,
    ) -> RenderResult<bool> {
        let image = *self
            .swapchain
            .image(image_index)
            .ok_or(RenderError::ImageIndex(image_index))?;

        self.record(slot_index, slot, image_index, image.framebuffer, ui, pass)?;

        // reset right before the submit that re-signals it
        self.gpu.reset_fences(&[slot.completion])?;
        let submitted = self.gpu.queue_submit(&Submission {
            command_buffer: slot.commands.buffer,
            wait: Some((
                slot.image_acquired,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            )),
            signal: Some(image.render_complete),
            fence: slot.completion,
        });
        if let Err(e) = submitted {
            // nothing will ever signal the reset fence; later waits must not hang
            if let Err(rearm) = self.frames.rearm(&self.gpu, slot_index) {
                warn!("frame slot {slot_index} not rearmed after failed submit: {rearm}");
            }
            return Err(e);
        }

        let presented = self.gpu.queue_present(
            self.swapchain.swapchain(),
            image_index,
            image.render_complete,
        );
        let needs_rebuild = present_needs_rebuild(presented)?;
        if needs_rebuild {
            debug!("present: surface suboptimal or out of date");
        }
        Ok(needs_rebuild)
    }

    fn record(
        &self,
        slot_index: usize,
        slot: &FrameSlot,
        image_index: u32,
        framebuffer: vk::Framebuffer,
        ui: &UiDrawData,
        pass: &mut dyn FramePass<G>,
    ) -> RenderResult<()> {
        let gpu = &self.gpu;
        let cmd = slot.commands.buffer;
        let extent = self.swapchain.extent();
        gpu.reset_command_context(slot.commands)?;
        gpu.begin_commands(cmd)?;

        let clears = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        gpu.cmd_begin_render_pass(cmd, self.swapchain.render_pass(), framebuffer, extent, &clears);
        let frame = FrameContext {
            slot: slot_index,
            image_index,
            extent,
            render_pass: self.swapchain.render_pass(),
            render_pass_generation: self.swapchain.render_pass_generation(),
        };
        pass.record(gpu, cmd, &frame, ui)?;
        gpu.cmd_end_render_pass(cmd);
        gpu.end_commands(cmd)
    }

    fn rebuild(&mut self) -> RenderResult<BuildOutcome> {
        let fences = self.frames.completion_fences();
        self.swapchain
            .rebuild(&self.gpu, &fences, self.fence_timeout)
    }
}

impl<G: Gpu> Drop for Presenter<G> {
    fn drop(&mut self) {
        if let Err(e) = self.frames.wait_all(&self.gpu, self.fence_timeout) {
            warn!("frames still in flight at shutdown: {e}");
        }
        self.swapchain.teardown(&self.gpu);
        self.frames.destroy(&self.gpu);
    }
}
