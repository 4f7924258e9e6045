use std::collections::HashMap;
use std::mem::ManuallyDrop;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use ash::prelude::VkResult;
use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use gpu_allocator::MemoryLocation;
use smallvec::SmallVec;
use crate::device::buffer::Buffer;
use crate::device::image::{Image, ImageCreateInfo};
use crate::device::instance::TransferInstance;
use crate::device::queue::{Queue, QueueFamily};
use crate::device::{Semaphore, Submission, TransferDevice};

static DEVICE_ID_COUNTER: AtomicU32 = AtomicU32::new(0);

/// A logical device with the queue transfers are submitted to
pub struct VulkanDevice {
    pub logical: Arc<ash::Device>,
    pub physical: vk::PhysicalDevice,
    pub transfer_queue: Arc<Queue>,

    device_id: u32,
    // Released before the logical device is destroyed
    memory_allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,
    // Each command buffer owns its pool so recording never contends across schedulers
    command_pools: Mutex<HashMap<vk::CommandBuffer, vk::CommandPool>>,
    wait_fence: vk::Fence,
}

impl VulkanDevice {
    pub fn new(instance: &TransferInstance) -> Result<Self> {
        let (
            physical_device,
            transfer_queue_family,
        ) = Self::select_physical_device(&instance.instance)?;

        let (
            logical_device,
            transfer_queue,
        ) = Self::create_logical_device(
            &instance.instance,
            &physical_device,
            transfer_queue_family,
        )?;

        let memory_allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.instance.clone(),
            device: logical_device.clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: true,
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: true,
                log_frees: true,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        let wait_fence = unsafe {
            logical_device.create_fence(&vk::FenceCreateInfo::default(), None)?
        };

        let device_id = DEVICE_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        log::info!(
            "Created device {} with transfer queue family {}",
            device_id,
            transfer_queue.family.index,
        );

        Ok(Self {
            logical: Arc::new(logical_device),
            physical: physical_device,
            transfer_queue: Arc::new(transfer_queue),

            device_id,
            memory_allocator: ManuallyDrop::new(Arc::new(Mutex::new(memory_allocator))),
            command_pools: Mutex::new(HashMap::new()),
            wait_fence,
        })
    }

    /// Device-local buffer that transfers can copy into
    pub fn create_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        name: &str,
    ) -> VkResult<Buffer> {
        Buffer::new(
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            name,
            MemoryLocation::GpuOnly,
            Arc::clone(&self.memory_allocator),
            self.logical.clone(),
        )
    }

    /// Sampled color image that transfers can copy into and generate mips for
    pub fn create_color_image(
        &self,
        format: vk::Format,
        width: u32,
        height: u32,
        mip_levels: u32,
        name: &str,
    ) -> VkResult<Image> {
        let create_info = ImageCreateInfo {
            format,
            extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
            mip_levels,
            usage: vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::TRANSFER_SRC,
            aspect: vk::ImageAspectFlags::COLOR,
            name: name.into(),
        };
        Image::new(&create_info, Arc::clone(&self.memory_allocator), self.logical.clone())
    }

    /// Consumes `semaphore` with an empty submission and blocks until it is signaled.
    /// Stands in for the rendering work that would normally wait on a transfer.
    pub fn wait_for_semaphore(&self, semaphore: Semaphore) -> VkResult<()> {
        let wait_semaphores = [semaphore.handle];
        let wait_stages = [semaphore.wait_stage];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages);
        self.transfer_queue.submit(&self.logical, &[submit], self.wait_fence)?;

        unsafe {
            // `wait_fence` will now block until the transfer it waited on completes
            self.logical.wait_for_fences(&[self.wait_fence], true, u64::MAX)?;
            self.logical.reset_fences(&[self.wait_fence])?;
        }

        Ok(())
    }

    pub fn wait_idle(&self) -> VkResult<()> {
        self.transfer_queue.wait_idle(&self.logical)
    }

    fn select_physical_device(
        instance: &ash::Instance,
    ) -> Result<(vk::PhysicalDevice, QueueFamily)> {
        Ok(unsafe {
            instance
                .enumerate_physical_devices()?
                .into_iter()
                // Blits and shader-read transitions need a graphics-capable queue
                .filter_map(|device| {
                    instance
                        .get_physical_device_queue_family_properties(device)
                        .into_iter()
                        .enumerate()
                        .map(|(i, properties)| QueueFamily::new(i as u32, properties))
                        .find(|family| family.supports_graphics() && family.supports_transfer())
                        .map(|family| (device, family))
                })
                .min_by_key(|(device, _)| {
                    let props = instance.get_physical_device_properties(*device);
                    match props.device_type {
                        vk::PhysicalDeviceType::DISCRETE_GPU => 0,
                        vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
                        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
                        vk::PhysicalDeviceType::CPU => 3,
                        vk::PhysicalDeviceType::OTHER => 4,
                        _ => 5,
                    }
                })
                .ok_or_eyre("No suitable physical device found")?
        })
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: &vk::PhysicalDevice,
        transfer_queue_family: QueueFamily,
    ) -> Result<(ash::Device, Queue)> {
        let queue_priorities = [1.0];
        let queue_create_infos = [
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(transfer_queue_family.index)
                .queue_priorities(&queue_priorities),
        ];

        #[cfg(target_os = "macos")]
        let enabled_extension_names = [ash::khr::portability_subset::NAME.as_ptr()];
        #[cfg(not(target_os = "macos"))]
        let enabled_extension_names: [*const std::ffi::c_char; 0] = [];

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&enabled_extension_names);

        let device = unsafe {
            instance.create_device(*physical_device, &device_create_info, None)?
        };

        let transfer_queue = unsafe {
            let queue = device.get_device_queue(transfer_queue_family.index, 0);
            Queue::new(transfer_queue_family, queue)
        };

        Ok((device, transfer_queue))
    }
}

impl TransferDevice for VulkanDevice {
    type Staging = Buffer;

    fn device_id(&self) -> u32 {
        self.device_id
    }

    fn allocate_staging_buffer(&self, size: vk::DeviceSize) -> VkResult<Buffer> {
        Buffer::new(
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            "Transfer staging buffer",
            MemoryLocation::CpuToGpu,
            Arc::clone(&self.memory_allocator),
            self.logical.clone(),
        )
    }

    fn allocate_command_buffer(&self) -> VkResult<vk::CommandBuffer> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(self.transfer_queue.family.index)
            // Allow the pool to reset individual command buffers
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe {
            self.logical.create_command_pool(&pool_info, None)?
        };

        let command_buffer_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .command_buffer_count(1)
            .level(vk::CommandBufferLevel::PRIMARY);
        let command_buffer = match unsafe {
            self.logical.allocate_command_buffers(&command_buffer_info)
        } {
            Ok(buffers) => buffers[0],
            Err(e) => {
                unsafe { self.logical.destroy_command_pool(command_pool, None) };
                return Err(e);
            }
        };

        self.command_pools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(command_buffer, command_pool);

        Ok(command_buffer)
    }

    fn free_command_buffer(&self, command_buffer: vk::CommandBuffer) {
        let command_pool = self.command_pools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&command_buffer);
        match command_pool {
            Some(command_pool) => unsafe {
                self.logical.free_command_buffers(command_pool, &[command_buffer]);
                self.logical.destroy_command_pool(command_pool, None);
            },
            None => log::warn!("Freeing unknown command buffer {:?}", command_buffer),
        }
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        unsafe {
            self.logical.reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
        }
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        // This command buffer will be used exactly once before resetting
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.logical.begin_command_buffer(command_buffer, &begin_info) }
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.logical.end_command_buffer(command_buffer) }
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        unsafe {
            self.logical.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.logical.destroy_semaphore(semaphore, None) }
    }

    fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        unsafe { self.logical.cmd_copy_buffer(command_buffer, src, dst, regions) }
    }

    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.logical.cmd_copy_buffer_to_image(command_buffer, src, dst, dst_layout, regions)
        }
    }

    fn cmd_image_barriers(
        &self,
        command_buffer: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barriers: &[vk::ImageMemoryBarrier<'_>],
    ) {
        unsafe {
            self.logical.cmd_pipeline_barrier(
                command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                barriers,
            );
        }
    }

    fn cmd_blit_image(
        &self,
        command_buffer: vk::CommandBuffer,
        image: vk::Image,
        regions: &[vk::ImageBlit],
        filter: vk::Filter,
    ) {
        unsafe {
            self.logical.cmd_blit_image(
                command_buffer,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                regions,
                filter,
            );
        }
    }

    fn submit(&self, submission: &Submission<'_>) -> VkResult<()> {
        let wait_semaphores: SmallVec<[vk::Semaphore; 2]> = submission.wait_semaphores
            .iter()
            .map(|semaphore| semaphore.handle)
            .collect();
        let wait_stages: SmallVec<[vk::PipelineStageFlags; 2]> = submission.wait_semaphores
            .iter()
            .map(|semaphore| semaphore.wait_stage)
            .collect();
        let command_buffers = [submission.command_buffer];

        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(submission.signal_semaphores);

        self.transfer_queue.submit(&self.logical, &[submit], vk::Fence::null())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        if let Err(e) = self.wait_idle() {
            log::error!("Failed to wait for device idle: {e}");
        }

        let command_pools = self.command_pools
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect::<Vec<_>>();
        unsafe {
            for (command_buffer, command_pool) in command_pools {
                self.logical.free_command_buffers(command_pool, &[command_buffer]);
                self.logical.destroy_command_pool(command_pool, None);
            }
            self.logical.destroy_fence(self.wait_fence, None);
            ManuallyDrop::drop(&mut self.memory_allocator);
        }
        // Buffers and images hold the device through `Arc`; the device is only
        // destroyed once the last of them is gone.
        if Arc::strong_count(&self.logical) == 1 {
            unsafe { self.logical.destroy_device(None) };
        } else {
            log::warn!("VulkanDevice dropped while buffers or images are still alive");
        }
    }
}
