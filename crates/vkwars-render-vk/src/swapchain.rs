//! Swapchain lifecycle: negotiate, build, rebuild and tear down the swapchain
//! together with everything sized or formatted after it.
//!
//! Every handle is stored in `self` the moment it is created, so a build that
//! fails half way is cleaned up by the next `rebuild` or by `teardown`.

use crate::error::{RenderError, RenderResult};
use crate::gpu::{Gpu, ImageDesc, MemoryUsage, SwapchainDesc};
use crate::surface::{negotiate, SurfaceConfig, SurfacePreferences};
use ash::vk;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One entry per swapchain-owned image.
#[derive(Clone, Copy, Debug)]
pub struct PresentableImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub framebuffer: vk::Framebuffer,
    /// Signaled by the submission rendering into this image, waited by present.
    pub render_complete: vk::Semaphore,
}

impl PresentableImage {
    fn new(image: vk::Image) -> Self {
        Self {
            image,
            view: vk::ImageView::null(),
            framebuffer: vk::Framebuffer::null(),
            render_complete: vk::Semaphore::null(),
        }
    }
}

struct DepthAttachment<A> {
    image: vk::Image,
    allocation: A,
    view: vk::ImageView,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildOutcome {
    Ready,
    /// The surface currently has no area; nothing was created.
    Deferred,
}

pub struct SwapchainManager<G: Gpu> {
    prefs: SurfacePreferences,
    extent_hint: vk::Extent2D,
    config: Option<SurfaceConfig>,

    swapchain: vk::SwapchainKHR,
    /// Previous swapchain, passed as `old_swapchain` and destroyed on the next
    /// rebuild or at teardown.
    retiring: vk::SwapchainKHR,

    images: Vec<PresentableImage>,
    depth: Option<DepthAttachment<G::Allocation>>,

    render_pass: vk::RenderPass,
    render_pass_formats: (vk::Format, vk::Format),
    render_pass_generation: u64,
}

impl<G: Gpu> SwapchainManager<G> {
    pub fn new(prefs: SurfacePreferences, extent_hint: vk::Extent2D) -> Self {
        Self {
            prefs,
            extent_hint,
            config: None,
            swapchain: vk::SwapchainKHR::null(),
            retiring: vk::SwapchainKHR::null(),
            images: Vec::new(),
            depth: None,
            render_pass: vk::RenderPass::null(),
            render_pass_formats: (vk::Format::UNDEFINED, vk::Format::UNDEFINED),
            render_pass_generation: 0,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.swapchain != vk::SwapchainKHR::null()
    }

    pub fn swapchain(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn config(&self) -> Option<&SurfaceConfig> {
        self.config.as_ref()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.config.map(|c| c.extent).unwrap_or_default()
    }

    pub fn image(&self, index: u32) -> Option<&PresentableImage> {
        self.images.get(index as usize)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Bumped whenever the render pass is recreated, so pipelines built
    /// against it know to follow.
    pub fn render_pass_generation(&self) -> u64 {
        self.render_pass_generation
    }

    pub fn set_extent_hint(&mut self, hint: vk::Extent2D) {
        self.extent_hint = hint;
    }

    /// Negotiates against the live surface and creates the swapchain, depth
    /// attachment and image table.
    pub fn build(&mut self, gpu: &G) -> RenderResult<BuildOutcome> {
        // 1) fresh surface state
        let support = gpu.surface_support()?;
        if !support.present_supported {
            return Err(RenderError::NoPresentSupport(support.queue_family));
        }
        let config = negotiate(&support, &self.prefs, self.extent_hint, |f| {
            gpu.depth_format_supported(f)
        })?;
        self.config = Some(config);
        if config.extent.width == 0 || config.extent.height == 0 {
            debug!("surface has no area; swapchain build deferred");
            return Ok(BuildOutcome::Deferred);
        }

        // 2) render pass follows the negotiated formats
        self.ensure_render_pass(gpu, config.surface_format.format, config.depth_format)?;

        // 3) swapchain, with the retiring one as the hint
        self.swapchain = gpu.create_swapchain(&SwapchainDesc {
            min_image_count: config.image_count,
            surface_format: config.surface_format,
            extent: config.extent,
            pre_transform: config.pre_transform,
            composite_alpha: config.composite_alpha,
            present_mode: config.present_mode,
            old_swapchain: self.retiring,
        })?;

        // 4) depth, then the per-image table
        self.create_depth(gpu, &config)?;
        for image in gpu.swapchain_images(self.swapchain)? {
            self.push_image(gpu, image, &config)?;
        }

        info!(
            "swapchain: format {:?} / {:?}, present_mode {:?}, alpha {:?}, depth {:?}, extent {}x{}, images {} (asked {})",
            config.surface_format.format,
            config.surface_format.color_space,
            config.present_mode,
            config.composite_alpha,
            config.depth_format,
            config.extent.width,
            config.extent.height,
            self.images.len(),
            config.image_count,
        );
        Ok(BuildOutcome::Ready)
    }

    /// Waits for every frame in flight, replaces all surface-derived resources
    /// and builds again.
    pub fn rebuild(
        &mut self,
        gpu: &G,
        in_flight: &[vk::Fence],
        timeout: Option<Duration>,
    ) -> RenderResult<BuildOutcome> {
        if !in_flight.is_empty() {
            gpu.wait_for_fences(in_flight, timeout)?;
        }
        self.destroy_targets(gpu);
        self.retire(gpu);
        self.build(gpu)
    }

    /// Drains the device and releases everything this manager owns.
    pub fn teardown(&mut self, gpu: &G) {
        if let Err(e) = gpu.device_wait_idle() {
            warn!("device_wait_idle during swapchain teardown: {e}");
        }
        self.destroy_targets(gpu);
        if self.swapchain != vk::SwapchainKHR::null() {
            gpu.destroy_swapchain(self.swapchain);
            self.swapchain = vk::SwapchainKHR::null();
        }
        if self.retiring != vk::SwapchainKHR::null() {
            gpu.destroy_swapchain(self.retiring);
            self.retiring = vk::SwapchainKHR::null();
        }
        if self.render_pass != vk::RenderPass::null() {
            gpu.destroy_render_pass(self.render_pass);
            self.render_pass = vk::RenderPass::null();
        }
        self.config = None;
    }

    fn ensure_render_pass(
        &mut self,
        gpu: &G,
        color: vk::Format,
        depth: vk::Format,
    ) -> RenderResult<()> {
        if self.render_pass != vk::RenderPass::null() && self.render_pass_formats == (color, depth)
        {
            return Ok(());
        }
        if self.render_pass != vk::RenderPass::null() {
            debug!("attachment formats changed; recreating render pass");
            gpu.destroy_render_pass(self.render_pass);
            self.render_pass = vk::RenderPass::null();
        }
        self.render_pass = gpu.create_render_pass(color, depth)?;
        self.render_pass_formats = (color, depth);
        self.render_pass_generation += 1;
        Ok(())
    }

    fn create_depth(&mut self, gpu: &G, config: &SurfaceConfig) -> RenderResult<()> {
        let (image, allocation) = gpu.create_image(&ImageDesc {
            name: "depth",
            format: config.depth_format,
            extent: vk::Extent3D {
                width: config.extent.width,
                height: config.extent.height,
                depth: 1,
            },
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
                | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
            memory: MemoryUsage::GpuOnly,
        })?;
        let depth = self.depth.insert(DepthAttachment {
            image,
            allocation,
            view: vk::ImageView::null(),
        });
        depth.view =
            gpu.create_image_view(image, config.depth_format, vk::ImageAspectFlags::DEPTH)?;
        Ok(())
    }

    fn push_image(&mut self, gpu: &G, image: vk::Image, config: &SurfaceConfig) -> RenderResult<()> {
        let depth_view = self
            .depth
            .as_ref()
            .map(|d| d.view)
            .unwrap_or_default();
        let index = self.images.len();
        self.images.push(PresentableImage::new(image));
        let entry = &mut self.images[index];

        entry.view = gpu.create_image_view(
            image,
            config.surface_format.format,
            vk::ImageAspectFlags::COLOR,
        )?;
        entry.framebuffer =
            gpu.create_framebuffer(self.render_pass, &[entry.view, depth_view], config.extent)?;
        entry.render_complete = gpu.create_semaphore()?;
        Ok(())
    }

    /// Image table first, then the depth attachment.
    fn destroy_targets(&mut self, gpu: &G) {
        for entry in self.images.drain(..) {
            if entry.framebuffer != vk::Framebuffer::null() {
                gpu.destroy_framebuffer(entry.framebuffer);
            }
            if entry.view != vk::ImageView::null() {
                gpu.destroy_image_view(entry.view);
            }
            if entry.render_complete != vk::Semaphore::null() {
                gpu.destroy_semaphore(entry.render_complete);
            }
        }
        if let Some(depth) = self.depth.take() {
            if depth.view != vk::ImageView::null() {
                gpu.destroy_image_view(depth.view);
            }
            gpu.destroy_image(depth.image, depth.allocation);
        }
    }

    /// At most one retired handle exists: a pending one is destroyed before
    /// the current swapchain takes its place.
    fn retire(&mut self, gpu: &G) {
        if self.swapchain == vk::SwapchainKHR::null() {
            return;
        }
        if self.retiring != vk::SwapchainKHR::null() {
            gpu.destroy_swapchain(self.retiring);
        }
        self.retiring = self.swapchain;
        self.swapchain = vk::SwapchainKHR::null();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_gpu::{Call, FakeGpu};
    use ash::vk::Handle;

    fn manager() -> SwapchainManager<FakeGpu> {
        SwapchainManager::new(SurfacePreferences::default(), vk::Extent2D::default())
    }

    fn position(calls: &[Call], want: &Call) -> usize {
        calls
            .iter()
            .position(|c| c == want)
            .unwrap_or_else(|| panic!("{want:?} not in call log"))
    }

    #[test]
    fn build_creates_one_entry_per_image() {
        let gpu = FakeGpu::new();
        let mut sc = manager();
        assert_eq!(sc.build(&gpu).unwrap(), BuildOutcome::Ready);
        // min 2, desired 3, unbounded max
        assert_eq!(sc.image_count(), 3);
        assert_eq!(sc.extent().width, 800);
        assert_eq!(sc.render_pass_generation(), 1);
        for i in 0..3 {
            let entry = sc.image(i).unwrap();
            assert_ne!(entry.framebuffer, vk::Framebuffer::null());
            assert_ne!(entry.render_complete, vk::Semaphore::null());
        }
        sc.teardown(&gpu);
        assert_eq!(gpu.live_objects(), 0);
    }

    #[test]
    fn consecutive_rebuilds_destroy_previous_retired_handle_first() {
        let gpu = FakeGpu::new();
        let mut sc = manager();
        sc.build(&gpu).unwrap();
        let first = sc.swapchain().as_raw();

        sc.rebuild(&gpu, &[], None).unwrap();
        let second = sc.swapchain().as_raw();
        let calls = gpu.calls();
        assert!(calls.contains(&Call::CreateSwapchain {
            swapchain: second,
            old: first
        }));
        assert!(!calls.contains(&Call::DestroySwapchain(first)));

        sc.rebuild(&gpu, &[], None).unwrap();
        let third = sc.swapchain().as_raw();
        let calls = gpu.calls();
        let destroyed_first = position(&calls, &Call::DestroySwapchain(first));
        let created_third = position(
            &calls,
            &Call::CreateSwapchain {
                swapchain: third,
                old: second,
            },
        );
        assert!(destroyed_first < created_third);
        assert!(!calls.contains(&Call::DestroySwapchain(second)));

        sc.teardown(&gpu);
        assert_eq!(gpu.live_objects(), 0);
    }

    #[test]
    fn teardown_releases_in_dependency_order() {
        let gpu = FakeGpu::new();
        let mut sc = manager();
        sc.build(&gpu).unwrap();
        let retired = sc.swapchain().as_raw();
        sc.rebuild(&gpu, &[], None).unwrap();
        let current = sc.swapchain().as_raw();
        gpu.clear_calls();

        sc.teardown(&gpu);
        let calls = gpu.calls();
        let last = |pred: fn(&Call) -> bool| calls.iter().rposition(pred).unwrap();
        let first = |pred: fn(&Call) -> bool| calls.iter().position(pred).unwrap();

        let idle = first(|c| matches!(c, Call::DeviceWaitIdle));
        let first_target = first(|c| {
            matches!(c, Call::DestroyFramebuffer(_) | Call::DestroyImageView(_))
        });
        let last_framebuffer = last(|c| matches!(c, Call::DestroyFramebuffer(_)));
        let last_view = last(|c| matches!(c, Call::DestroyImageView(_)));
        let depth = first(|c| matches!(c, Call::DestroyImage(_)));
        let current_gone = position(&calls, &Call::DestroySwapchain(current));
        let retired_gone = position(&calls, &Call::DestroySwapchain(retired));

        assert_eq!(idle, 0);
        assert!(idle < first_target);
        assert!(last_framebuffer < depth && last_view < depth);
        assert!(depth < current_gone);
        assert!(current_gone < retired_gone);
        assert_eq!(gpu.live_objects(), 0);
    }

    #[test]
    fn rebuild_waits_before_destroying_anything() {
        let gpu = FakeGpu::new();
        let mut sc = manager();
        sc.build(&gpu).unwrap();
        let a = gpu.create_fence(true).unwrap();
        let b = gpu.create_fence(true).unwrap();
        gpu.clear_calls();

        sc.rebuild(&gpu, &[a, b], None).unwrap();
        let calls = gpu.calls();
        assert_eq!(calls[0], Call::WaitFences(vec![a.as_raw(), b.as_raw()]));
        assert!(matches!(calls[1], Call::DestroyFramebuffer(_)));

        sc.teardown(&gpu);
        gpu.destroy_fence(a);
        gpu.destroy_fence(b);
        assert_eq!(gpu.live_objects(), 0);
    }

    #[test]
    fn rebuild_reads_extent_fresh_from_surface() {
        let gpu = FakeGpu::new();
        let mut sc = manager();
        sc.build(&gpu).unwrap();
        gpu.set_extent(1280, 720);
        sc.rebuild(&gpu, &[], None).unwrap();
        assert_eq!(
            (sc.extent().width, sc.extent().height),
            (1280, 720)
        );
        sc.teardown(&gpu);
    }

    #[test]
    fn zero_extent_defers_without_creating_resources() {
        let gpu = FakeGpu::new();
        gpu.set_extent(0, 0);
        let mut sc = manager();
        assert_eq!(sc.build(&gpu).unwrap(), BuildOutcome::Deferred);
        assert!(!sc.is_ready());
        assert_eq!(gpu.live_objects(), 0);

        gpu.set_extent(640, 480);
        assert_eq!(sc.rebuild(&gpu, &[], None).unwrap(), BuildOutcome::Ready);
        sc.teardown(&gpu);
        assert_eq!(gpu.live_objects(), 0);
    }

    #[test]
    fn missing_depth_format_is_fatal() {
        let gpu = FakeGpu::new();
        gpu.set_depth_formats(vec![vk::Format::D16_UNORM]);
        let mut sc = manager();
        assert!(matches!(sc.build(&gpu), Err(RenderError::NoDepthFormat)));
    }

    #[test]
    fn queue_without_present_support_is_fatal() {
        let gpu = FakeGpu::new();
        let mut support = crate::fake_gpu::default_support();
        support.present_supported = false;
        support.queue_family = 3;
        gpu.set_support(support);
        let mut sc = manager();
        assert!(matches!(
            sc.build(&gpu),
            Err(RenderError::NoPresentSupport(3))
        ));
    }

    #[test]
    fn half_built_table_is_released_by_teardown() {
        let gpu = FakeGpu::new();
        gpu.fail_nth("create_framebuffer", 2);
        let mut sc = manager();
        assert!(sc.build(&gpu).is_err());
        assert!(gpu.live_objects() > 0);
        sc.teardown(&gpu);
        assert_eq!(gpu.live_objects(), 0);
    }

    #[test]
    fn render_pass_is_kept_while_formats_match() {
        let gpu = FakeGpu::new();
        let mut sc = manager();
        sc.build(&gpu).unwrap();
        let rp = sc.render_pass();
        sc.rebuild(&gpu, &[], None).unwrap();
        assert_eq!(sc.render_pass(), rp);
        assert_eq!(sc.render_pass_generation(), 1);

        let mut support = crate::fake_gpu::default_support();
        support.formats[0].format = vk::Format::R8G8B8A8_SRGB;
        gpu.set_support(support);
        sc.rebuild(&gpu, &[], None).unwrap();
        assert_ne!(sc.render_pass(), rp);
        assert_eq!(sc.render_pass_generation(), 2);
        sc.teardown(&gpu);
        assert_eq!(gpu.live_objects(), 0);
    }
}
