use ash::vk;
use crate::device::{StagingMemory, TransferDevice};

/// Staging memory, copy regions and a command buffer owned by one frame slot
pub struct TransferBlock<S> {
    pub staging: Option<S>,
    pub copy_regions: Vec<vk::BufferCopy>,
    pub command_buffer: Option<vk::CommandBuffer>,
}

impl<S> Default for TransferBlock<S> {
    fn default() -> Self {
        Self {
            staging: None,
            copy_regions: Vec::new(),
            command_buffer: None,
        }
    }
}

impl<S: StagingMemory> TransferBlock<S> {
    pub fn staging_size(&self) -> vk::DeviceSize {
        self.staging.as_ref().map_or(0, StagingMemory::size)
    }

    /// Makes sure the staging buffer holds at least `required` bytes. A buffer is only
    /// ever replaced by a larger one.
    pub fn ensure_staging<D>(
        &mut self,
        device: &D,
        required: vk::DeviceSize,
        minimum: vk::DeviceSize,
    ) -> Result<bool, vk::Result>
    where
        D: TransferDevice<Staging = S>,
    {
        if self.staging.is_some() && self.staging_size() >= required {
            return Ok(false);
        }

        let size = required.max(minimum);
        let staging = device.allocate_staging_buffer(size)?;
        if !staging.is_mapped() {
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        }
        self.staging = Some(staging);
        Ok(true)
    }

    /// Returns a command buffer in the recording state
    pub fn begin<D>(&mut self, device: &D) -> Result<vk::CommandBuffer, vk::Result>
    where
        D: TransferDevice<Staging = S>,
    {
        let command_buffer = match self.command_buffer {
            Some(command_buffer) => {
                device.reset_command_buffer(command_buffer)?;
                command_buffer
            }
            None => {
                let command_buffer = device.allocate_command_buffer()?;
                self.command_buffer = Some(command_buffer);
                command_buffer
            }
        };
        device.begin_command_buffer(command_buffer)?;
        Ok(command_buffer)
    }

    pub fn free<D>(&mut self, device: &D)
    where
        D: TransferDevice<Staging = S>,
    {
        if let Some(command_buffer) = self.command_buffer.take() {
            device.free_command_buffer(command_buffer);
        }
        self.staging = None;
        self.copy_regions.clear();
    }
}
