//! [`Gpu`] on top of ash: instance, surface, one graphics+present queue and a
//! gpu-allocator heap.

use crate::error::{RenderError, RenderResult, VkResultExt};
use crate::gpu::{
    BufferDesc, CommandContext, Gpu, ImageDesc, ImageTransition, MemoryUsage, Submission,
    SurfaceSupport, SwapchainDesc,
};
use ash::khr::{surface, swapchain};
use ash::prelude::VkResult;
use ash::{vk, Device, Entry, Instance};
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use std::ffi::{c_void, CStr, CString};
use std::mem::ManuallyDrop;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

#[cfg(debug_assertions)]
use ash::ext::debug_utils as ext_debug;

#[cfg(debug_assertions)]
type DebugState = Option<(ext_debug::Instance, vk::DebugUtilsMessengerEXT)>;
#[cfg(not(debug_assertions))]
type DebugState = ();

pub const API_VERSION: u32 = vk::API_VERSION_1_2;

pub struct AshGpu {
    _entry: Entry,
    instance: Instance,
    #[allow(dead_code)]
    debug: DebugState,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,

    phys: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    queue_family: u32,
    device: Device,
    queue: vk::Queue,
    swapchain_loader: swapchain::Device,

    allocator: ManuallyDrop<Mutex<Allocator>>,
}

#[cfg(debug_assertions)]
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    let msg = unsafe { CStr::from_ptr((*data).p_message) }.to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", "{msg}");
    } else {
        trace!(target: "vulkan", "{msg}");
    }
    vk::FALSE
}

#[cfg(debug_assertions)]
unsafe fn create_debug_messenger(entry: &Entry, instance: &Instance) -> DebugState {
    let loader = ext_debug::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    match unsafe { loader.create_debug_utils_messenger(&ci, None) } {
        Ok(messenger) => Some((loader, messenger)),
        Err(e) => {
            warn!("debug messenger unavailable: {e:?}");
            None
        }
    }
}

#[cfg(not(debug_assertions))]
unsafe fn create_debug_messenger(_entry: &Entry, _instance: &Instance) -> DebugState {}

#[cfg(debug_assertions)]
unsafe fn destroy_debug_messenger(debug: &mut DebugState) {
    if let Some((loader, messenger)) = debug.take() {
        unsafe { loader.destroy_debug_utils_messenger(messenger, None) };
    }
}

#[cfg(not(debug_assertions))]
unsafe fn destroy_debug_messenger(_debug: &mut DebugState) {}

#[cfg(debug_assertions)]
fn has_layer(entry: &Entry, name: &CStr) -> bool {
    unsafe { entry.enumerate_instance_layer_properties() }
        .unwrap_or_default()
        .iter()
        .any(|l| l.layer_name_as_c_str().is_ok_and(|n| n == name))
}

unsafe fn create_instance(
    entry: &Entry,
    display_raw: RawDisplayHandle,
    app_name: &str,
) -> RenderResult<Instance> {
    let app = CString::new(app_name).unwrap_or_default();

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: 0,
        p_engine_name: app.as_ptr(),
        engine_version: 0,
        api_version: API_VERSION,
        ..Default::default()
    };

    let required = ash_window::enumerate_required_extensions(display_raw)
        .vk("enumerate_required_extensions")?;

    #[cfg(debug_assertions)]
    let (extensions, layers) = {
        let mut extensions = required.to_vec();
        extensions.push(ext_debug::NAME.as_ptr());
        let mut layers = Vec::new();
        let validation = c"VK_LAYER_KHRONOS_validation";
        if has_layer(entry, validation) {
            layers.push(validation.as_ptr());
        } else {
            warn!("validation layer not installed; running without it");
        }
        (extensions, layers)
    };
    #[cfg(not(debug_assertions))]
    let (extensions, layers): (Vec<_>, Vec<*const std::ffi::c_char>) =
        (required.to_vec(), Vec::new());

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };

    unsafe { entry.create_instance(&create_info, None) }.vk("vkCreateInstance")
}

/// First device exposing a queue family that does graphics and can present to
/// `surface`.
unsafe fn pick_device_and_queue(
    instance: &Instance,
    surf_i: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> RenderResult<(vk::PhysicalDevice, u32)> {
    let devices =
        unsafe { instance.enumerate_physical_devices() }.vk("vkEnumeratePhysicalDevices")?;
    for phys in devices {
        let qprops = unsafe { instance.get_physical_device_queue_family_properties(phys) };
        for (i, q) in qprops.iter().enumerate() {
            let present = unsafe {
                surf_i.get_physical_device_surface_support(phys, i as u32, surface)
            }
            .unwrap_or(false);
            if q.queue_flags.contains(vk::QueueFlags::GRAPHICS) && present {
                return Ok((phys, i as u32));
            }
        }
    }
    Err(RenderError::NoQueueFamily)
}

unsafe fn create_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    queue_family: u32,
) -> RenderResult<Device> {
    let priorities = [1.0f32];
    let queue_ci = vk::DeviceQueueCreateInfo {
        s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
        queue_family_index: queue_family,
        queue_count: 1,
        p_queue_priorities: priorities.as_ptr(),
        ..Default::default()
    };
    let extensions = [swapchain::NAME.as_ptr()];
    let device_ci = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: 1,
        p_queue_create_infos: &queue_ci,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        ..Default::default()
    };
    unsafe { instance.create_device(phys, &device_ci, None) }.vk("vkCreateDevice")
}

fn location(memory: MemoryUsage) -> MemoryLocation {
    match memory {
        MemoryUsage::GpuOnly => MemoryLocation::GpuOnly,
        MemoryUsage::CpuToGpu | MemoryUsage::CpuOnly => MemoryLocation::CpuToGpu,
    }
}

fn timeout_ns(timeout: Option<Duration>) -> u64 {
    timeout.map_or(u64::MAX, |d| d.as_nanos().min(u64::MAX as u128) as u64)
}

impl AshGpu {
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        app_name: &str,
    ) -> RenderResult<Self> {
        // STRICT ORDER:
        // 1) instance with the window system's required extensions
        // 2) surface from that instance
        // 3) physical device + queue family checked against that surface
        // 4) device, then the allocator bound to it
        let dh = display
            .display_handle()
            .map_err(|e| RenderError::Window(e.to_string()))?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| RenderError::Window(e.to_string()))?
            .as_raw();

        unsafe {
            let entry = Entry::load()?;
            let instance = create_instance(&entry, dh, app_name)?;
            let mut debug = create_debug_messenger(&entry, &instance);
            let surface_loader = surface::Instance::new(&entry, &instance);

            let early_exit = |debug: &mut DebugState, surface: vk::SurfaceKHR| {
                if surface != vk::SurfaceKHR::null() {
                    surface_loader.destroy_surface(surface, None);
                }
                destroy_debug_messenger(debug);
                instance.destroy_instance(None);
            };

            let surface = match ash_window::create_surface(&entry, &instance, dh, wh, None) {
                Ok(s) => s,
                Err(result) => {
                    early_exit(&mut debug, vk::SurfaceKHR::null());
                    return Err(RenderError::Vk {
                        call: "ash_window::create_surface",
                        result,
                    });
                }
            };

            let (phys, queue_family) =
                match pick_device_and_queue(&instance, &surface_loader, surface) {
                    Ok(picked) => picked,
                    Err(e) => {
                        early_exit(&mut debug, surface);
                        return Err(e);
                    }
                };
            let device = match create_device(&instance, phys, queue_family) {
                Ok(d) => d,
                Err(e) => {
                    early_exit(&mut debug, surface);
                    return Err(e);
                }
            };

            let allocator = match Allocator::new(&AllocatorCreateDesc {
                instance: instance.clone(),
                device: device.clone(),
                physical_device: phys,
                debug_settings: Default::default(),
                buffer_device_address: false,
                allocation_sizes: Default::default(),
            }) {
                Ok(a) => a,
                Err(e) => {
                    device.destroy_device(None);
                    early_exit(&mut debug, surface);
                    return Err(e.into());
                }
            };

            let properties = instance.get_physical_device_properties(phys);
            let queue = device.get_device_queue(queue_family, 0);
            let swapchain_loader = swapchain::Device::new(&instance, &device);

            info!(
                "device: {} (api {}.{}.{}), queue family {}",
                properties
                    .device_name_as_c_str()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                vk::api_version_major(properties.api_version),
                vk::api_version_minor(properties.api_version),
                vk::api_version_patch(properties.api_version),
                queue_family
            );

            Ok(Self {
                _entry: entry,
                instance,
                debug,
                surface_loader,
                surface,
                phys,
                properties,
                queue_family,
                device,
                queue,
                swapchain_loader,
                allocator: ManuallyDrop::new(Mutex::new(allocator)),
            })
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    fn allocator(&self) -> RenderResult<MutexGuard<'_, Allocator>> {
        self.allocator
            .lock()
            .map_err(|_| RenderError::AllocatorPoisoned)
    }

    fn free(&self, allocation: Allocation) {
        match self.allocator() {
            Ok(mut a) => {
                if let Err(e) = a.free(allocation) {
                    warn!("allocator free failed: {e}");
                }
            }
            Err(e) => warn!("leaking allocation: {e}"),
        }
    }
}

// STRICT TEARDOWN ORDER:
// - allocator (frees its device memory blocks) BEFORE device
// - device BEFORE surface
// - debug messenger and instance last
impl Drop for AshGpu {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            destroy_debug_messenger(&mut self.debug);
            self.instance.destroy_instance(None);
        }
        debug!("vulkan device released");
    }
}

impl Gpu for AshGpu {
    type Allocation = Allocation;

    fn create_fence(&self, signaled: bool) -> RenderResult<vk::Fence> {
        let ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: if signaled {
                vk::FenceCreateFlags::SIGNALED
            } else {
                vk::FenceCreateFlags::empty()
            },
            ..Default::default()
        };
        unsafe { self.device.create_fence(&ci, None) }.vk("vkCreateFence")
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn wait_for_fences(
        &self,
        fences: &[vk::Fence],
        timeout: Option<Duration>,
    ) -> RenderResult<()> {
        match unsafe {
            self.device
                .wait_for_fences(fences, true, timeout_ns(timeout))
        } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(RenderError::FenceTimeout {
                timeout: timeout.unwrap_or(Duration::MAX),
            }),
            Err(result) => Err(RenderError::Vk {
                call: "vkWaitForFences",
                result,
            }),
        }
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> RenderResult<()> {
        unsafe { self.device.reset_fences(fences) }.vk("vkResetFences")
    }

    fn create_semaphore(&self) -> RenderResult<vk::Semaphore> {
        let ci = vk::SemaphoreCreateInfo {
            s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
            ..Default::default()
        };
        unsafe { self.device.create_semaphore(&ci, None) }.vk("vkCreateSemaphore")
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn device_wait_idle(&self) -> RenderResult<()> {
        unsafe { self.device.device_wait_idle() }.vk("vkDeviceWaitIdle")
    }

    fn create_command_context(&self) -> RenderResult<CommandContext> {
        let pool_ci = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            flags: vk::CommandPoolCreateFlags::TRANSIENT,
            queue_family_index: self.queue_family,
            ..Default::default()
        };
        let pool =
            unsafe { self.device.create_command_pool(&pool_ci, None) }.vk("vkCreateCommandPool")?;
        let alloc_ci = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        match unsafe { self.device.allocate_command_buffers(&alloc_ci) } {
            Ok(buffers) => Ok(CommandContext {
                pool,
                buffer: buffers[0],
            }),
            Err(result) => {
                unsafe { self.device.destroy_command_pool(pool, None) };
                Err(RenderError::Vk {
                    call: "vkAllocateCommandBuffers",
                    result,
                })
            }
        }
    }

    fn destroy_command_context(&self, ctx: CommandContext) {
        // buffers are freed with their pool
        unsafe { self.device.destroy_command_pool(ctx.pool, None) };
    }

    fn reset_command_context(&self, ctx: CommandContext) -> RenderResult<()> {
        unsafe {
            self.device
                .reset_command_pool(ctx.pool, vk::CommandPoolResetFlags::empty())
        }
        .vk("vkResetCommandPool")
    }

    fn begin_commands(&self, cmd: vk::CommandBuffer) -> RenderResult<()> {
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        unsafe { self.device.begin_command_buffer(cmd, &begin) }.vk("vkBeginCommandBuffer")
    }

    fn end_commands(&self, cmd: vk::CommandBuffer) -> RenderResult<()> {
        unsafe { self.device.end_command_buffer(cmd) }.vk("vkEndCommandBuffer")
    }

    fn queue_submit(&self, submission: &Submission) -> RenderResult<()> {
        let (wait_sem, wait_stage) = submission.wait.unzip();
        let wait_sems = wait_sem.as_slice();
        let wait_stages = wait_stage.as_slice();
        let signal_sems = submission.signal.as_slice();
        let info = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: wait_sems.len() as u32,
            p_wait_semaphores: wait_sems.as_ptr(),
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &submission.command_buffer,
            signal_semaphore_count: signal_sems.len() as u32,
            p_signal_semaphores: signal_sems.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.device
                .queue_submit(self.queue, &[info], submission.fence)
        }
        .vk("vkQueueSubmit")
    }

    fn surface_support(&self) -> RenderResult<SurfaceSupport> {
        unsafe {
            let capabilities = self
                .surface_loader
                .get_physical_device_surface_capabilities(self.phys, self.surface)
                .vk("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;
            let formats = self
                .surface_loader
                .get_physical_device_surface_formats(self.phys, self.surface)
                .vk("vkGetPhysicalDeviceSurfaceFormatsKHR")?;
            let present_modes = self
                .surface_loader
                .get_physical_device_surface_present_modes(self.phys, self.surface)
                .vk("vkGetPhysicalDeviceSurfacePresentModesKHR")?;
            let present_supported = self
                .surface_loader
                .get_physical_device_surface_support(self.phys, self.queue_family, self.surface)
                .vk("vkGetPhysicalDeviceSurfaceSupportKHR")?;
            Ok(SurfaceSupport {
                capabilities,
                formats,
                present_modes,
                queue_family: self.queue_family,
                present_supported,
            })
        }
    }

    fn depth_format_supported(&self, format: vk::Format) -> bool {
        let props = unsafe {
            self.instance
                .get_physical_device_format_properties(self.phys, format)
        };
        props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> RenderResult<vk::SwapchainKHR> {
        let info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: self.surface,
            min_image_count: desc.min_image_count,
            image_format: desc.surface_format.format,
            image_color_space: desc.surface_format.color_space,
            image_extent: desc.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            pre_transform: desc.pre_transform,
            composite_alpha: desc.composite_alpha,
            present_mode: desc.present_mode,
            clipped: vk::TRUE,
            old_swapchain: desc.old_swapchain,
            ..Default::default()
        };
        unsafe { self.swapchain_loader.create_swapchain(&info, None) }.vk("vkCreateSwapchainKHR")
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RenderResult<Vec<vk::Image>> {
        unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }
            .vk("vkGetSwapchainImagesKHR")
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) };
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, u64::MAX, signal, vk::Fence::null())
        }
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        let info = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &swapchain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        unsafe { self.swapchain_loader.queue_present(self.queue, &info) }
    }

    fn create_render_pass(
        &self,
        color: vk::Format,
        depth: vk::Format,
    ) -> RenderResult<vk::RenderPass> {
        let attachments = [
            vk::AttachmentDescription {
                format: color,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::STORE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
                ..Default::default()
            },
            vk::AttachmentDescription {
                format: depth,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::DONT_CARE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                ..Default::default()
            },
        ];
        let color_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let subpass = vk::SubpassDescription {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachment_count: 1,
            p_color_attachments: &color_ref,
            p_depth_stencil_attachment: &depth_ref,
            ..Default::default()
        };
        let dependencies = [
            // color writes wait for the acquire semaphore's stage
            vk::SubpassDependency {
                src_subpass: vk::SUBPASS_EXTERNAL,
                dst_subpass: 0,
                src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                src_access_mask: vk::AccessFlags::empty(),
                dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                ..Default::default()
            },
            // depth is shared by frames in flight
            vk::SubpassDependency {
                src_subpass: vk::SUBPASS_EXTERNAL,
                dst_subpass: 0,
                src_stage_mask: vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                dst_stage_mask: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                src_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                dst_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                ..Default::default()
            },
        ];
        let ci = vk::RenderPassCreateInfo {
            s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            subpass_count: 1,
            p_subpasses: &subpass,
            dependency_count: dependencies.len() as u32,
            p_dependencies: dependencies.as_ptr(),
            ..Default::default()
        };
        unsafe { self.device.create_render_pass(&ci, None) }.vk("vkCreateRenderPass")
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) };
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> RenderResult<vk::ImageView> {
        let ci = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        unsafe { self.device.create_image_view(&ci, None) }.vk("vkCreateImageView")
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) };
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RenderResult<vk::Framebuffer> {
        let ci = vk::FramebufferCreateInfo {
            s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
            render_pass,
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            width: extent.width,
            height: extent.height,
            layers: 1,
            ..Default::default()
        };
        unsafe { self.device.create_framebuffer(&ci, None) }.vk("vkCreateFramebuffer")
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) };
    }

    fn create_image(&self, desc: &ImageDesc) -> RenderResult<(vk::Image, Allocation)> {
        let ci = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format: desc.format,
            extent: desc.extent,
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: desc.usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let image = unsafe { self.device.create_image(&ci, None) }.vk("vkCreateImage")?;
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let allocation = self.allocator().and_then(|mut a| {
            a.allocate(&AllocationCreateDesc {
                name: desc.name,
                requirements,
                location: location(desc.memory),
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(RenderError::from)
        });
        let allocation = match allocation {
            Ok(a) => a,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };
        if let Err(result) = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        } {
            unsafe { self.device.destroy_image(image, None) };
            self.free(allocation);
            return Err(RenderError::Vk {
                call: "vkBindImageMemory",
                result,
            });
        }
        Ok((image, allocation))
    }

    fn destroy_image(&self, image: vk::Image, allocation: Allocation) {
        unsafe { self.device.destroy_image(image, None) };
        self.free(allocation);
    }

    fn create_buffer(&self, desc: &BufferDesc) -> RenderResult<(vk::Buffer, Allocation)> {
        let ci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size: desc.size,
            usage: desc.usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let buffer = unsafe { self.device.create_buffer(&ci, None) }.vk("vkCreateBuffer")?;
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = self.allocator().and_then(|mut a| {
            a.allocate(&AllocationCreateDesc {
                name: desc.name,
                requirements,
                location: location(desc.memory),
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(RenderError::from)
        });
        let allocation = match allocation {
            Ok(a) => a,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };
        if let Err(result) = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            unsafe { self.device.destroy_buffer(buffer, None) };
            self.free(allocation);
            return Err(RenderError::Vk {
                call: "vkBindBufferMemory",
                result,
            });
        }
        Ok((buffer, allocation))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer, allocation: Allocation) {
        unsafe { self.device.destroy_buffer(buffer, None) };
        self.free(allocation);
    }

    fn write_mapped(
        &self,
        allocation: &mut Allocation,
        offset: u64,
        bytes: &[u8],
    ) -> RenderResult<()> {
        let mapped = allocation
            .mapped_slice_mut()
            .ok_or(RenderError::NotHostVisible)?;
        let capacity = mapped.len() as u64;
        let start = offset as usize;
        let dst = mapped
            .get_mut(start..start + bytes.len())
            .ok_or(RenderError::StagingExhausted {
                offset,
                requested: bytes.len() as u64,
                capacity,
            })?;
        dst.copy_from_slice(bytes);
        Ok(())
    }

    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        region: vk::BufferCopy,
    ) {
        unsafe { self.device.cmd_copy_buffer(cmd, src, dst, &[region]) };
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        region: vk::BufferImageCopy,
    ) {
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                cmd,
                src,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            )
        };
    }

    fn cmd_image_barrier(&self, cmd: vk::CommandBuffer, t: &ImageTransition) {
        let barrier = vk::ImageMemoryBarrier {
            s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
            src_access_mask: t.src_access,
            dst_access_mask: t.dst_access,
            old_layout: t.old_layout,
            new_layout: t.new_layout,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            image: t.image,
            subresource_range: t.range,
            ..Default::default()
        };
        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                t.src_stage,
                t.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            )
        };
    }

    fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) {
        let begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass,
            framebuffer,
            render_area: vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            },
            clear_value_count: clear_values.len() as u32,
            p_clear_values: clear_values.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.device
                .cmd_begin_render_pass(cmd, &begin, vk::SubpassContents::INLINE)
        };
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(cmd) };
    }
}
