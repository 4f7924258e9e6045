//! The device seam the transfer scheduler records and submits through.
//!
//! `vulkan` drives a real GPU through `ash`, `recording` captures everything in memory
//! so transfers can be inspected without a GPU.

pub mod buffer;
pub mod image;
pub mod instance;
pub mod queue;
pub mod recording;
pub mod vulkan;

use ash::prelude::VkResult;
use ash::vk;

/// A semaphore together with the pipeline stage that waits on it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Semaphore {
    pub handle: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags,
}

impl Semaphore {
    pub fn new(handle: vk::Semaphore, wait_stage: vk::PipelineStageFlags) -> Self {
        Self { handle, wait_stage }
    }
}

/// One batch handed to the transfer queue
#[derive(Debug, Clone, Copy)]
pub struct Submission<'a> {
    pub wait_semaphores: &'a [Semaphore],
    pub command_buffer: vk::CommandBuffer,
    pub signal_semaphores: &'a [vk::Semaphore],
}

/// Host-visible, host-coherent memory a transfer stages its bytes in
pub trait StagingMemory: Send {
    fn buffer(&self) -> vk::Buffer;
    fn size(&self) -> vk::DeviceSize;
    /// True when the whole buffer is persistently mapped
    fn is_mapped(&self) -> bool;
    /// Copies `bytes` into the mapping, starting `offset` bytes in
    fn write(&mut self, offset: vk::DeviceSize, bytes: &[u8]) -> VkResult<()>;
}

/// Copies `bytes` into a mapped slab at `offset`, reporting overruns as a Vulkan status
pub(crate) fn write_to_slab<S: presser::Slab>(
    slab: &mut S,
    offset: vk::DeviceSize,
    bytes: &[u8],
) -> VkResult<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    presser::copy_from_slice_to_offset(bytes, slab, offset as usize)
        .map(|_| ())
        .map_err(|e| {
            log::error!("Failed to write {} bytes of staging memory at {offset}: {e:?}", bytes.len());
            vk::Result::ERROR_OUT_OF_HOST_MEMORY
        })
}

/// Everything the transfer scheduler needs from a device and its transfer queue.
///
/// Command recording methods follow the Vulkan rules: the command buffer must be in the
/// recording state and is only touched by one thread at a time.
pub trait TransferDevice: Send + Sync {
    type Staging: StagingMemory;

    /// Index used to track per-device modification counts
    fn device_id(&self) -> u32;

    fn allocate_staging_buffer(&self, size: vk::DeviceSize) -> VkResult<Self::Staging>;

    fn allocate_command_buffer(&self) -> VkResult<vk::CommandBuffer>;
    fn free_command_buffer(&self, command_buffer: vk::CommandBuffer);
    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()>;
    /// Begins recording with the one-time-submit hint
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()>;
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()>;

    fn create_semaphore(&self) -> VkResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    );

    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    );

    fn cmd_image_barriers(
        &self,
        command_buffer: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barriers: &[vk::ImageMemoryBarrier<'_>],
    );

    /// Blit within one image, used to generate mip levels
    fn cmd_blit_image(
        &self,
        command_buffer: vk::CommandBuffer,
        image: vk::Image,
        regions: &[vk::ImageBlit],
        filter: vk::Filter,
    );

    fn submit(&self, submission: &Submission<'_>) -> VkResult<()>;
}
