use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use crate::device::{write_to_slab, Semaphore, StagingMemory, Submission, TransferDevice};

/// Simplified view of a `vk::ImageMemoryBarrier`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedBarrier {
    pub image: vk::Image,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub base_mip_level: u32,
    pub level_count: u32,
}

#[derive(Debug, Clone)]
pub enum RecordedCommand {
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: Vec<vk::BufferCopy>,
    },
    CopyBufferToImage {
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: Vec<vk::BufferImageCopy>,
    },
    ImageBarriers {
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barriers: Vec<RecordedBarrier>,
    },
    BlitImage {
        image: vk::Image,
        regions: Vec<vk::ImageBlit>,
        filter: vk::Filter,
    },
}

/// A submission with the commands its command buffer held at submit time
#[derive(Debug, Clone)]
pub struct RecordedSubmission {
    pub wait_semaphores: Vec<Semaphore>,
    pub command_buffer: vk::CommandBuffer,
    pub commands: Vec<RecordedCommand>,
    pub signal_semaphores: Vec<vk::Semaphore>,
}

impl RecordedSubmission {
    /// Every buffer to buffer copy region with its destination, in recording order
    pub fn buffer_copies(&self) -> Vec<(vk::Buffer, vk::BufferCopy)> {
        self.commands
            .iter()
            .flat_map(|command| match command {
                RecordedCommand::CopyBuffer { dst, regions, .. } => {
                    regions.iter().map(|region| (*dst, *region)).collect()
                }
                _ => Vec::new(),
            })
            .collect()
    }

    pub fn image_copies(&self) -> Vec<(vk::Image, vk::BufferImageCopy)> {
        self.commands
            .iter()
            .flat_map(|command| match command {
                RecordedCommand::CopyBufferToImage { dst, regions, .. } => {
                    regions.iter().map(|region| (*dst, *region)).collect()
                }
                _ => Vec::new(),
            })
            .collect()
    }

    pub fn blits(&self) -> Vec<vk::ImageBlit> {
        self.commands
            .iter()
            .flat_map(|command| match command {
                RecordedCommand::BlitImage { regions, .. } => regions.clone(),
                _ => Vec::new(),
            })
            .collect()
    }

    pub fn barriers(&self) -> Vec<RecordedBarrier> {
        self.commands
            .iter()
            .flat_map(|command| match command {
                RecordedCommand::ImageBarriers { barriers, .. } => barriers.clone(),
                _ => Vec::new(),
            })
            .collect()
    }
}

/// Host bytes standing in for a mapped allocation
#[derive(Debug)]
struct HostBytes(Vec<u8>);

// SAFETY: the pointers cover exactly the `Vec`'s initialised length, which never
// changes after allocation.
unsafe impl presser::Slab for HostBytes {
    fn base_ptr(&self) -> *const u8 {
        self.0.as_ptr()
    }

    fn base_ptr_mut(&mut self) -> *mut u8 {
        self.0.as_mut_ptr()
    }

    fn size(&self) -> usize {
        self.0.len()
    }
}

/// Staging memory backed by a plain byte vector
#[derive(Debug)]
pub struct RecordingStaging {
    buffer: vk::Buffer,
    bytes: HostBytes,
    mapped: bool,
}

impl RecordingStaging {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes.0
    }
}

impl StagingMemory for RecordingStaging {
    fn buffer(&self) -> vk::Buffer {
        self.buffer
    }

    fn size(&self) -> vk::DeviceSize {
        self.bytes.0.len() as vk::DeviceSize
    }

    fn is_mapped(&self) -> bool {
        self.mapped
    }

    fn write(&mut self, offset: vk::DeviceSize, bytes: &[u8]) -> VkResult<()> {
        if !self.mapped {
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        }
        write_to_slab(&mut self.bytes, offset, bytes)
    }
}

#[derive(Default)]
struct CommandBufferState {
    commands: Vec<RecordedCommand>,
    recording: bool,
}

#[derive(Default)]
struct RecordingState {
    next_handle: u64,
    command_buffers: HashMap<vk::CommandBuffer, CommandBufferState>,
    semaphores: HashSet<vk::Semaphore>,
    submissions: Vec<RecordedSubmission>,
    staging_allocations: Vec<vk::DeviceSize>,
    command_buffer_resets: usize,

    fail_staging_allocation: bool,
    fail_mapping: bool,
    fail_submission: Option<vk::Result>,
    fail_semaphore_creation: Option<vk::Result>,
    fail_begin: Option<vk::Result>,
    fail_end: Option<vk::Result>,
}

impl RecordingState {
    fn next_raw_handle(&mut self) -> u64 {
        // Zero is the null handle
        self.next_handle += 1;
        self.next_handle
    }

    fn record(&mut self, command_buffer: vk::CommandBuffer, command: RecordedCommand) {
        match self.command_buffers.get_mut(&command_buffer) {
            Some(state) if state.recording => state.commands.push(command),
            Some(_) => log::warn!("Command recorded into {:?} outside of begin/end", command_buffer),
            None => log::warn!("Command recorded into unknown command buffer {:?}", command_buffer),
        }
    }
}

/// A `TransferDevice` that records everything in memory instead of talking to a GPU
pub struct RecordingDevice {
    device_id: u32,
    state: Mutex<RecordingState>,
}

impl RecordingDevice {
    pub fn new(device_id: u32) -> Self {
        Self {
            device_id,
            state: Mutex::new(RecordingState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, RecordingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// All successful submissions, oldest first
    pub fn submissions(&self) -> Vec<RecordedSubmission> {
        self.state().submissions.clone()
    }

    /// Sizes of every staging buffer handed out, oldest first
    pub fn staging_allocations(&self) -> Vec<vk::DeviceSize> {
        self.state().staging_allocations.clone()
    }

    pub fn live_semaphores(&self) -> usize {
        self.state().semaphores.len()
    }

    pub fn live_command_buffers(&self) -> usize {
        self.state().command_buffers.len()
    }

    pub fn command_buffer_resets(&self) -> usize {
        self.state().command_buffer_resets
    }

    pub fn fail_next_staging_allocation(&self) {
        self.state().fail_staging_allocation = true;
    }

    /// The next staging buffer is allocated but never mapped
    pub fn fail_next_mapping(&self) {
        self.state().fail_mapping = true;
    }

    pub fn fail_next_submission(&self, result: vk::Result) {
        self.state().fail_submission = Some(result);
    }

    pub fn fail_next_semaphore_creation(&self, result: vk::Result) {
        self.state().fail_semaphore_creation = Some(result);
    }

    pub fn fail_next_begin(&self, result: vk::Result) {
        self.state().fail_begin = Some(result);
    }

    /// The next `end_command_buffer` fails and leaves the command buffer recording
    pub fn fail_next_end(&self, result: vk::Result) {
        self.state().fail_end = Some(result);
    }
}

impl TransferDevice for RecordingDevice {
    type Staging = RecordingStaging;

    fn device_id(&self) -> u32 {
        self.device_id
    }

    fn allocate_staging_buffer(&self, size: vk::DeviceSize) -> VkResult<RecordingStaging> {
        let mut state = self.state();
        if std::mem::take(&mut state.fail_staging_allocation) {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        let mapped = !std::mem::take(&mut state.fail_mapping);
        let buffer = vk::Buffer::from_raw(state.next_raw_handle());
        state.staging_allocations.push(size);

        Ok(RecordingStaging {
            buffer,
            bytes: HostBytes(vec![0; size as usize]),
            mapped,
        })
    }

    fn allocate_command_buffer(&self) -> VkResult<vk::CommandBuffer> {
        let mut state = self.state();
        let command_buffer = vk::CommandBuffer::from_raw(state.next_raw_handle());
        state.command_buffers.insert(command_buffer, CommandBufferState::default());
        Ok(command_buffer)
    }

    fn free_command_buffer(&self, command_buffer: vk::CommandBuffer) {
        if self.state().command_buffers.remove(&command_buffer).is_none() {
            log::warn!("Freeing unknown command buffer {:?}", command_buffer);
        }
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        let mut state = self.state();
        let command_buffer = state.command_buffers
            .get_mut(&command_buffer)
            .ok_or(vk::Result::ERROR_UNKNOWN)?;
        command_buffer.commands.clear();
        command_buffer.recording = false;
        state.command_buffer_resets += 1;
        Ok(())
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        let mut state = self.state();
        if let Some(result) = state.fail_begin.take() {
            return Err(result);
        }
        let command_buffer = state.command_buffers
            .get_mut(&command_buffer)
            .ok_or(vk::Result::ERROR_UNKNOWN)?;
        command_buffer.commands.clear();
        command_buffer.recording = true;
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        let mut state = self.state();
        if let Some(result) = state.fail_end.take() {
            return Err(result);
        }
        let command_buffer = state.command_buffers
            .get_mut(&command_buffer)
            .ok_or(vk::Result::ERROR_UNKNOWN)?;
        command_buffer.recording = false;
        Ok(())
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let mut state = self.state();
        if let Some(result) = state.fail_semaphore_creation.take() {
            return Err(result);
        }
        let semaphore = vk::Semaphore::from_raw(state.next_raw_handle());
        state.semaphores.insert(semaphore);
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        if !self.state().semaphores.remove(&semaphore) {
            log::warn!("Destroying unknown semaphore {:?}", semaphore);
        }
    }

    fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        self.state().record(command_buffer, RecordedCommand::CopyBuffer {
            src,
            dst,
            regions: regions.to_vec(),
        });
    }

    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        self.state().record(command_buffer, RecordedCommand::CopyBufferToImage {
            src,
            dst,
            dst_layout,
            regions: regions.to_vec(),
        });
    }

    fn cmd_image_barriers(
        &self,
        command_buffer: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barriers: &[vk::ImageMemoryBarrier<'_>],
    ) {
        let barriers = barriers
            .iter()
            .map(|barrier| RecordedBarrier {
                image: barrier.image,
                old_layout: barrier.old_layout,
                new_layout: barrier.new_layout,
                src_access: barrier.src_access_mask,
                dst_access: barrier.dst_access_mask,
                base_mip_level: barrier.subresource_range.base_mip_level,
                level_count: barrier.subresource_range.level_count,
            })
            .collect();
        self.state().record(command_buffer, RecordedCommand::ImageBarriers {
            src_stage,
            dst_stage,
            barriers,
        });
    }

    fn cmd_blit_image(
        &self,
        command_buffer: vk::CommandBuffer,
        image: vk::Image,
        regions: &[vk::ImageBlit],
        filter: vk::Filter,
    ) {
        self.state().record(command_buffer, RecordedCommand::BlitImage {
            image,
            regions: regions.to_vec(),
            filter,
        });
    }

    fn submit(&self, submission: &Submission<'_>) -> VkResult<()> {
        let mut state = self.state();
        if let Some(result) = state.fail_submission.take() {
            return Err(result);
        }
        let commands = match state.command_buffers.get(&submission.command_buffer) {
            Some(command_buffer) if !command_buffer.recording => command_buffer.commands.clone(),
            Some(_) => {
                log::error!("Submitting {:?} while it is still recording", submission.command_buffer);
                return Err(vk::Result::ERROR_VALIDATION_FAILED_EXT);
            }
            None => return Err(vk::Result::ERROR_UNKNOWN),
        };
        state.submissions.push(RecordedSubmission {
            wait_semaphores: submission.wait_semaphores.to_vec(),
            command_buffer: submission.command_buffer,
            commands,
            signal_semaphores: submission.signal_semaphores.to_vec(),
        });
        Ok(())
    }
}
