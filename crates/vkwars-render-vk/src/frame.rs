//! Fixed ring of CPU-side frame contexts.
//!
//! At most [`MAX_FRAMES_IN_FLIGHT`] frames are queued on the GPU: a slot is
//! only reused after its completion fence from the previous round signals.

use crate::error::RenderResult;
use crate::gpu::{CommandContext, Gpu};
use ash::vk;
use std::time::Duration;

pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

#[derive(Clone, Copy, Debug)]
pub struct FrameSlot {
    pub commands: CommandContext,
    /// Created signaled so the first wait on a fresh slot returns at once.
    pub completion: vk::Fence,
    pub image_acquired: vk::Semaphore,
}

impl FrameSlot {
    fn create<G: Gpu>(gpu: &G) -> RenderResult<Self> {
        let completion = gpu.create_fence(true)?;
        let image_acquired = match gpu.create_semaphore() {
            Ok(s) => s,
            Err(e) => {
                gpu.destroy_fence(completion);
                return Err(e);
            }
        };
        let commands = match gpu.create_command_context() {
            Ok(c) => c,
            Err(e) => {
                gpu.destroy_semaphore(image_acquired);
                gpu.destroy_fence(completion);
                return Err(e);
            }
        };
        Ok(Self {
            commands,
            completion,
            image_acquired,
        })
    }

    fn destroy<G: Gpu>(self, gpu: &G) {
        gpu.destroy_command_context(self.commands);
        gpu.destroy_semaphore(self.image_acquired);
        gpu.destroy_fence(self.completion);
    }
}

pub struct FrameRing {
    slots: Vec<FrameSlot>,
    counter: u64,
}

impl FrameRing {
    pub fn new<G: Gpu>(gpu: &G) -> RenderResult<Self> {
        Self::with_len(gpu, MAX_FRAMES_IN_FLIGHT)
    }

    pub fn with_len<G: Gpu>(gpu: &G, len: usize) -> RenderResult<Self> {
        let mut ring = Self {
            slots: Vec::with_capacity(len),
            counter: 0,
        };
        for _ in 0..len {
            match FrameSlot::create(gpu) {
                Ok(slot) => ring.slots.push(slot),
                Err(e) => {
                    ring.destroy(gpu);
                    return Err(e);
                }
            }
        }
        Ok(ring)
    }

    /// Index of the slot for the next frame: `counter % len`, then bump.
    pub fn advance(&mut self) -> usize {
        let index = (self.counter % self.slots.len() as u64) as usize;
        self.counter += 1;
        index
    }

    pub fn slot(&self, index: usize) -> &FrameSlot {
        &self.slots[index]
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Frames started so far.
    pub fn frame_count(&self) -> u64 {
        self.counter
    }

    pub fn completion_fences(&self) -> Vec<vk::Fence> {
        self.slots.iter().map(|s| s.completion).collect()
    }

    /// Blocks until every slot's last submission has retired.
    pub fn wait_all<G: Gpu>(&self, gpu: &G, timeout: Option<Duration>) -> RenderResult<()> {
        if self.slots.is_empty() {
            return Ok(());
        }
        gpu.wait_for_fences(&self.completion_fences(), timeout)
    }

    /// Swaps in a signaled fence and an unsignaled semaphore for a slot whose
    /// submission never reached the queue. The old semaphore may still hold a
    /// signal from acquire, so it cannot be reused either.
    pub fn rearm<G: Gpu>(&mut self, gpu: &G, index: usize) -> RenderResult<()> {
        let completion = gpu.create_fence(true)?;
        let image_acquired = match gpu.create_semaphore() {
            Ok(s) => s,
            Err(e) => {
                gpu.destroy_fence(completion);
                return Err(e);
            }
        };
        let slot = &mut self.slots[index];
        gpu.destroy_fence(slot.completion);
        gpu.destroy_semaphore(slot.image_acquired);
        slot.completion = completion;
        slot.image_acquired = image_acquired;
        Ok(())
    }

    /// Callers drain the GPU first.
    pub fn destroy<G: Gpu>(&mut self, gpu: &G) {
        for slot in self.slots.drain(..) {
            slot.destroy(gpu);
        }
    }
}
