use ash::vk;
use std::time::Duration;
use thiserror::Error;

pub type RenderResult<T> = Result<T, RenderError>;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{call} failed: {result:?}")]
    Vk {
        call: &'static str,
        result: vk::Result,
    },
    #[error("failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),
    #[error("device memory allocation failed: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),
    #[error("allocator lock poisoned")]
    AllocatorPoisoned,

    #[error("no Vulkan device with a graphics queue that can present to the surface")]
    NoQueueFamily,
    #[error("queue family {0} cannot present to the surface")]
    NoPresentSupport(u32),
    #[error("surface reports no formats")]
    NoSurfaceFormat,
    #[error("no supported present mode")]
    NoPresentMode,
    #[error("no supported composite alpha mode")]
    NoCompositeAlpha,
    #[error("no supported depth format")]
    NoDepthFormat,

    #[error("staging buffer out of memory: {requested} bytes at offset {offset} exceeds capacity {capacity}")]
    StagingExhausted {
        offset: u64,
        requested: u64,
        capacity: u64,
    },
    #[error("upload source holds {actual} bytes, {expected} required")]
    ShortUpload { expected: u64, actual: u64 },
    #[error("staging session: {0}")]
    SessionState(&'static str),
    #[error("allocation is not host visible")]
    NotHostVisible,

    #[error("acquired image index {0} is outside the image table")]
    ImageIndex(u32),

    #[error("fence wait exceeded {timeout:?}")]
    FenceTimeout { timeout: Duration },

    #[error("shader: {0}")]
    Shader(String),
    #[error("window handle: {0}")]
    Window(String),
}

/// `.vk("vkCall")?` tags a raw `vk::Result` with the call that produced it.
pub trait VkResultExt<T> {
    fn vk(self, call: &'static str) -> RenderResult<T>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    fn vk(self, call: &'static str) -> RenderResult<T> {
        self.map_err(|result| RenderError::Vk { call, result })
    }
}

impl RenderError {
    pub fn vk_result(&self) -> Option<vk::Result> {
        match self {
            RenderError::Vk { result, .. } => Some(*result),
            _ => None,
        }
    }
}
