use std::sync::{Arc, Mutex, PoisonError};
use ash::prelude::VkResult;
use ash::vk;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator},
    AllocationError, MemoryLocation,
};
use crate::device::{write_to_slab, StagingMemory};

pub struct Buffer {
    pub buffer: vk::Buffer,
    pub size: u64,

    allocation: Option<Allocation>,
    memory_allocator: Arc<Mutex<Allocator>>,
    device: Arc<ash::Device>,
}

impl Buffer {
    /// `MemoryLocation::CpuToGpu` gives host-visible, host-coherent memory that stays
    /// mapped for the lifetime of the buffer.
    pub fn new(
        size: u64,
        usage: vk::BufferUsageFlags,
        name: &str,
        mem_loc: MemoryLocation,
        mem_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
    ) -> VkResult<Self> {
        let buffer = {
            let buffer_info = vk::BufferCreateInfo {
                size,
                usage,
                sharing_mode: vk::SharingMode::EXCLUSIVE,
                ..Default::default()
            };
            unsafe { device.create_buffer(&buffer_info, None)? }
        };

        let requirements = unsafe {
            device.get_buffer_memory_requirements(buffer)
        };
        let allocation = mem_allocator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: mem_loc,
                linear: true,
                allocation_scheme: AllocationScheme::DedicatedBuffer(buffer),
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                log::error!("Failed to allocate memory for buffer {name:?}: {e}");
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(allocation_error_to_vk(&e));
            }
        };

        let bound = unsafe {
            device.bind_buffer_memory(
                buffer,
                allocation.memory(),
                allocation.offset(),
            )
        };

        let mut buffer = Self {
            buffer,
            size,

            allocation: Some(allocation),
            memory_allocator: mem_allocator,
            device,
        };

        // Dropping `buffer` releases the allocation and the handle
        bound?;

        if !matches!(mem_loc, MemoryLocation::GpuOnly) && !buffer.is_mapped() {
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        }

        Ok(buffer)
    }
}

impl StagingMemory for Buffer {
    fn buffer(&self) -> vk::Buffer {
        self.buffer
    }

    fn size(&self) -> vk::DeviceSize {
        self.size
    }

    fn is_mapped(&self) -> bool {
        self.allocation
            .as_ref()
            .is_some_and(|allocation| allocation.mapped_ptr().is_some())
    }

    fn write(&mut self, offset: vk::DeviceSize, bytes: &[u8]) -> VkResult<()> {
        match self.allocation.as_mut() {
            Some(allocation) if allocation.mapped_ptr().is_some() => {
                write_to_slab(allocation, offset, bytes)
            }
            _ => Err(vk::Result::ERROR_MEMORY_MAP_FAILED),
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            let freed = self.memory_allocator
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .free(allocation);
            if let Err(e) = freed {
                log::error!("Failed to free buffer memory: {e}");
            }
        }
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
        }
    }
}

pub(crate) fn allocation_error_to_vk(error: &AllocationError) -> vk::Result {
    match error {
        AllocationError::FailedToMap(_) => vk::Result::ERROR_MEMORY_MAP_FAILED,
        AllocationError::OutOfMemory => vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
        AllocationError::NoCompatibleMemoryTypeFound => vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
        _ => vk::Result::ERROR_INITIALIZATION_FAILED,
    }
}
