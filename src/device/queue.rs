use std::sync::{Mutex, PoisonError};
use ash::prelude::VkResult;
use ash::vk;

/// A device queue. Submissions are serialised through the handle's lock since
/// `vkQueueSubmit` requires external synchronisation.
pub struct Queue {
    pub family: QueueFamily,
    handle: Mutex<vk::Queue>,
}

impl Queue {
    pub fn new(
        family: QueueFamily,
        handle: vk::Queue,
    ) -> Self {
        Self {
            family,
            handle: Mutex::new(handle),
        }
    }

    pub fn submit(
        &self,
        device: &ash::Device,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> VkResult<()> {
        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        unsafe { device.queue_submit(*handle, submits, fence) }
    }

    pub fn wait_idle(&self, device: &ash::Device) -> VkResult<()> {
        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        unsafe { device.queue_wait_idle(*handle) }
    }
}

#[derive(Clone, Debug)]
pub struct QueueFamily {
    pub index: u32,
    pub properties: vk::QueueFamilyProperties,
}

impl QueueFamily {
    pub fn new(
        index: u32,
        properties: vk::QueueFamilyProperties,
    ) -> Self {
        Self {
            index,
            properties,
        }
    }

    pub fn supports_graphics(&self) -> bool {
        self.properties.queue_flags.contains(vk::QueueFlags::GRAPHICS)
    }

    pub fn supports_transfer(&self) -> bool {
        // Graphics and compute queues implicitly support transfer operations
        self.properties.queue_flags.intersects(
            vk::QueueFlags::TRANSFER | vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE
        )
    }
}
