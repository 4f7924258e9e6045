use std::sync::{Arc, Mutex, PoisonError};
use ash::prelude::VkResult;
use ash::vk;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator},
    MemoryLocation,
};
use crate::device::buffer::allocation_error_to_vk;

pub struct ImageCreateInfo {
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
    pub name: String,
}

/// A device-local 2D image that transfers write into
pub struct Image {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub aspect: vk::ImageAspectFlags,

    allocation: Option<Allocation>, // GPU-only memory block
    memory_allocator: Arc<Mutex<Allocator>>,
    device: Arc<ash::Device>,
}

impl Image {
    // NOTE: The image is created in `UNDEFINED` layout with no contents.
    // Hand it to the transfer scheduler through an `ImageInfo` to fill it.
    pub fn new(
        create_info: &ImageCreateInfo,
        memory_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
    ) -> VkResult<Self> {
        let image = {
            let info = vk::ImageCreateInfo::default()
                .format(create_info.format)
                .usage(create_info.usage)
                .extent(create_info.extent)
                .image_type(vk::ImageType::TYPE_2D)
                .mip_levels(create_info.mip_levels.max(1))
                .array_layers(1)
                .samples(vk::SampleCountFlags::TYPE_1)
                .tiling(vk::ImageTiling::OPTIMAL);
            unsafe { device.create_image(&info, None)? }
        };
        let reqs = unsafe { device.get_image_memory_requirements(image) };
        let allocation = memory_allocator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .allocate(&AllocationCreateDesc {
                name: &create_info.name,
                requirements: reqs,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::DedicatedImage(image),
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                log::error!("Failed to allocate memory for image {:?}: {e}", create_info.name);
                unsafe { device.destroy_image(image, None) };
                return Err(allocation_error_to_vk(&e));
            }
        };

        let mut image = Self {
            image,
            view: vk::ImageView::null(),
            format: create_info.format,
            extent: create_info.extent,
            mip_levels: create_info.mip_levels.max(1),
            aspect: create_info.aspect,

            allocation: Some(allocation),
            memory_allocator,
            device,
        };

        unsafe {
            image.device.bind_image_memory(image.image, image.memory()?, 0)?;
        }
        image.view = {
            let info = vk::ImageViewCreateInfo::default()
                .view_type(vk::ImageViewType::TYPE_2D)
                .image(image.image)
                .format(create_info.format)
                .subresource_range(vk::ImageSubresourceRange {
                    base_mip_level: 0,
                    level_count: image.mip_levels,
                    base_array_layer: 0,
                    layer_count: 1,
                    aspect_mask: create_info.aspect,
                });
            unsafe { image.device.create_image_view(&info, None)? }
        };

        Ok(image)
    }

    fn memory(&self) -> VkResult<vk::DeviceMemory> {
        self.allocation
            .as_ref()
            .map(|allocation| unsafe { allocation.memory() })
            .ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.destroy_image_view(self.view, None);
            }
        }
        if let Some(allocation) = self.allocation.take() {
            let freed = self.memory_allocator
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .free(allocation);
            if let Err(e) = freed {
                log::error!("Failed to free image memory: {e}");
            }
        }
        unsafe {
            self.device.destroy_image(self.image, None);
        }
    }
}
