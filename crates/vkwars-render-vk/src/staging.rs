//! Staging transfer engine: a bump-allocated host-visible buffer that records
//! copies into device-local buffers and images, one session at a time.

use crate::error::{RenderError, RenderResult};
use crate::gpu::{BufferDesc, CommandContext, Gpu, ImageTransition, MemoryUsage, Submission};
use ash::vk;
use std::time::Duration;
use tracing::{debug, warn};

pub const STAGING_BUFFER_SIZE: u64 = 1 << 20;
pub const STAGING_BUFFER_ALIGNMENT: u64 = 4;

#[derive(Clone, Copy, Debug)]
pub struct StagingConfig {
    pub capacity: u64,
    pub alignment: u64,
    pub fence_timeout: Option<Duration>,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            capacity: STAGING_BUFFER_SIZE,
            alignment: STAGING_BUFFER_ALIGNMENT,
            fence_timeout: None,
        }
    }
}

/// Where an uploaded image is consumed next.
#[derive(Clone, Copy, Debug)]
pub struct ImageTarget {
    pub stage: vk::PipelineStageFlags,
    pub layout: vk::ImageLayout,
    pub access: vk::AccessFlags,
}

impl ImageTarget {
    pub const FRAGMENT_SAMPLED: Self = Self {
        stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        access: vk::AccessFlags::SHADER_READ,
    };
}

pub struct ImageUpload<'a> {
    pub image: vk::Image,
    pub subresource: vk::ImageSubresourceLayers,
    pub extent: vk::Extent3D,
    pub bytes_per_texel: u32,
    pub data: &'a [u8],
    pub target: ImageTarget,
}

impl ImageUpload<'_> {
    pub fn byte_size(&self) -> u64 {
        self.extent.width as u64
            * self.extent.height as u64
            * self.extent.depth as u64
            * self.bytes_per_texel as u64
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Session {
    Idle,
    Recording,
    /// Submitted; the staging memory is in use until the fence signals.
    Pending,
}

pub struct StagingUploader<'g, G: Gpu> {
    gpu: &'g G,
    config: StagingConfig,
    commands: CommandContext,
    fence: vk::Fence,
    buffer: vk::Buffer,
    allocation: Option<G::Allocation>,
    offset: u64,
    session: Session,
}

pub fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        value
    } else {
        value.div_ceil(alignment) * alignment
    }
}

impl<'g, G: Gpu> StagingUploader<'g, G> {
    pub fn new(gpu: &'g G, config: StagingConfig) -> RenderResult<Self> {
        let mut uploader = Self {
            gpu,
            config,
            commands: CommandContext::default(),
            fence: vk::Fence::null(),
            buffer: vk::Buffer::null(),
            allocation: None,
            offset: 0,
            session: Session::Idle,
        };
        uploader.commands = gpu.create_command_context()?;
        uploader.fence = gpu.create_fence(false)?;
        let (buffer, allocation) = gpu.create_buffer(&BufferDesc {
            name: "staging",
            size: config.capacity,
            usage: vk::BufferUsageFlags::TRANSFER_SRC,
            memory: MemoryUsage::CpuOnly,
        })?;
        uploader.buffer = buffer;
        uploader.allocation = Some(allocation);
        Ok(uploader)
    }

    /// Current ring offset; the next upload starts here.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn capacity(&self) -> u64 {
        self.config.capacity
    }

    pub fn is_pending(&self) -> bool {
        self.session == Session::Pending
    }

    /// Opens a session: rewinds the ring and starts recording. A submitted
    /// session that was never finished is waited for first.
    pub fn begin_session(&mut self) -> RenderResult<()> {
        match self.session {
            Session::Recording => return Err(RenderError::SessionState("session already open")),
            Session::Pending => self.finish()?,
            Session::Idle => {}
        }
        self.gpu.reset_command_context(self.commands)?;
        self.gpu.begin_commands(self.commands.buffer)?;
        self.offset = 0;
        self.session = Session::Recording;
        Ok(())
    }

    /// Stages `data[..size]` and records a copy into `dst` at `dst_offset`.
    pub fn upload_buffer(
        &mut self,
        dst: vk::Buffer,
        dst_offset: u64,
        size: u64,
        data: &[u8],
    ) -> RenderResult<()> {
        self.expect_recording()?;
        if size == 0 {
            // zero-sized copy regions are invalid
            return Ok(());
        }
        let bytes = source_bytes(data, size)?;
        let src_offset = self.reserve(size)?;
        self.write(src_offset, bytes)?;
        self.gpu.cmd_copy_buffer(
            self.commands.buffer,
            self.buffer,
            dst,
            vk::BufferCopy {
                src_offset,
                dst_offset,
                size,
            },
        );
        self.advance(size);
        Ok(())
    }

    /// Stages a tightly packed image and records
    /// UNDEFINED → TRANSFER_DST → copy → `target.layout`.
    pub fn upload_image(&mut self, upload: &ImageUpload<'_>) -> RenderResult<()> {
        self.expect_recording()?;
        let size = upload.byte_size();
        let bytes = source_bytes(upload.data, size)?;
        let buffer_offset = self.reserve(size)?;
        self.write(buffer_offset, bytes)?;

        let sub = upload.subresource;
        let range = vk::ImageSubresourceRange {
            aspect_mask: sub.aspect_mask,
            base_mip_level: sub.mip_level,
            level_count: 1,
            base_array_layer: sub.base_array_layer,
            layer_count: sub.layer_count,
        };
        let cmd = self.commands.buffer;

        self.gpu.cmd_image_barrier(
            cmd,
            &ImageTransition {
                image: upload.image,
                range,
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                dst_stage: vk::PipelineStageFlags::TRANSFER,
                src_access: vk::AccessFlags::empty(),
                dst_access: vk::AccessFlags::TRANSFER_WRITE,
            },
        );
        self.gpu.cmd_copy_buffer_to_image(
            cmd,
            self.buffer,
            upload.image,
            vk::BufferImageCopy {
                buffer_offset,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: sub,
                image_offset: vk::Offset3D::default(),
                image_extent: upload.extent,
            },
        );
        self.gpu.cmd_image_barrier(
            cmd,
            &ImageTransition {
                image: upload.image,
                range,
                old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                new_layout: upload.target.layout,
                src_stage: vk::PipelineStageFlags::TRANSFER,
                dst_stage: upload.target.stage,
                src_access: vk::AccessFlags::TRANSFER_WRITE,
                dst_access: upload.target.access,
            },
        );
        self.advance(size);
        Ok(())
    }

    /// Ends recording and submits. The staging memory stays in use until
    /// [`Self::finish`].
    pub fn end_session(&mut self) -> RenderResult<()> {
        self.expect_recording()?;
        self.gpu.end_commands(self.commands.buffer)?;
        self.gpu.reset_fences(&[self.fence])?;
        self.gpu.queue_submit(&Submission {
            command_buffer: self.commands.buffer,
            wait: None,
            signal: None,
            fence: self.fence,
        })?;
        debug!(
            bytes = self.offset,
            capacity = self.config.capacity,
            "staging session submitted"
        );
        self.session = Session::Pending;
        Ok(())
    }

    /// Blocks until the submitted session retires. No-op when nothing is pending.
    pub fn finish(&mut self) -> RenderResult<()> {
        if self.session != Session::Pending {
            return Ok(());
        }
        self.gpu
            .wait_for_fences(&[self.fence], self.config.fence_timeout)?;
        self.session = Session::Idle;
        Ok(())
    }

    fn expect_recording(&self) -> RenderResult<()> {
        if self.session == Session::Recording {
            Ok(())
        } else {
            Err(RenderError::SessionState("no session open"))
        }
    }

    fn reserve(&self, size: u64) -> RenderResult<u64> {
        if self.offset.saturating_add(size) > self.config.capacity {
            return Err(RenderError::StagingExhausted {
                offset: self.offset,
                requested: size,
                capacity: self.config.capacity,
            });
        }
        Ok(self.offset)
    }

    fn write(&mut self, offset: u64, bytes: &[u8]) -> RenderResult<()> {
        let allocation = self
            .allocation
            .as_mut()
            .ok_or(RenderError::SessionState("staging buffer released"))?;
        self.gpu.write_mapped(allocation, offset, bytes)
    }

    fn advance(&mut self, size: u64) {
        self.offset = align_up(self.offset + size, self.config.alignment);
    }
}

fn source_bytes(data: &[u8], size: u64) -> RenderResult<&[u8]> {
    data.get(..size as usize).ok_or(RenderError::ShortUpload {
        expected: size,
        actual: data.len() as u64,
    })
}

impl<G: Gpu> Drop for StagingUploader<'_, G> {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!("staging finish on drop failed ({e}); draining device");
            let _ = self.gpu.device_wait_idle();
        }
        if let Some(allocation) = self.allocation.take() {
            self.gpu.destroy_buffer(self.buffer, allocation);
        }
        if self.fence != vk::Fence::null() {
            self.gpu.destroy_fence(self.fence);
        }
        if self.commands.pool != vk::CommandPool::null() {
            self.gpu.destroy_command_context(self.commands);
        }
    }
}
