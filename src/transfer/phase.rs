use std::collections::BTreeMap;
use std::sync::Arc;
use ash::vk;
use smallvec::SmallVec;
use crate::device::{Semaphore, StagingMemory, Submission, TransferDevice};
use crate::resources::buffer_info::BufferInfo;
use crate::resources::image_info::ImageInfo;
use crate::transfer::block::TransferBlock;
use crate::transfer::config::TransferConfig;
use crate::transfer::image_copy;
use crate::transfer::mask::TransferResult;
use crate::util::align;

/// Staging regions are packed on this boundary
pub const STAGING_ALIGNMENT: vk::DeviceSize = 4;

/// Pending work for one point in the frame, either before or after record traversal.
pub struct TransferPhase<S> {
    name: &'static str,

    /// Destination buffer -> destination offset -> region
    data_map: BTreeMap<vk::Buffer, BTreeMap<vk::DeviceSize, Arc<BufferInfo>>>,
    /// Keyed by the address of the shared record
    image_infos: BTreeMap<usize, Arc<ImageInfo>>,

    pub(crate) image_total_size: vk::DeviceSize,
    pub(crate) data_total_size: vk::DeviceSize,
    pub(crate) data_total_regions: usize,

    pub(crate) frames: Vec<TransferBlock<S>>,

    transfer_complete_semaphore: Option<vk::Semaphore>,
    consumer_completed_semaphore: Option<Semaphore>,
}

impl<S: StagingMemory> TransferPhase<S> {
    pub fn new(name: &'static str, buffer_count: u32) -> Self {
        Self {
            name,
            data_map: BTreeMap::new(),
            image_infos: BTreeMap::new(),
            image_total_size: 0,
            data_total_size: 0,
            data_total_regions: 0,
            frames: (0..buffer_count).map(|_| TransferBlock::default()).collect(),
            transfer_complete_semaphore: None,
            consumer_completed_semaphore: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn add_buffer_info(&mut self, buffer_info: Arc<BufferInfo>) {
        self.data_map
            .entry(buffer_info.buffer)
            .or_default()
            .insert(buffer_info.offset, buffer_info);
    }

    pub fn add_image_info(&mut self, image_info: Arc<ImageInfo>) {
        let key = Arc::as_ptr(&image_info) as usize;
        self.image_infos.insert(key, image_info);
    }

    pub fn contains_data_to_transfer(&self) -> bool {
        !self.data_map.is_empty() || !self.image_infos.is_empty()
    }

    pub fn pending_buffer_regions(&self) -> usize {
        self.data_map.values().map(BTreeMap::len).sum()
    }

    pub fn pending_images(&self) -> usize {
        self.image_infos.len()
    }

    pub fn set_consumer_completed_semaphore(&mut self, semaphore: Option<Semaphore>) {
        self.consumer_completed_semaphore = semaphore;
    }

    /// Semaphore signaled by this phase's submissions, once one has been made
    pub fn transfer_complete_semaphore(&self) -> Option<vk::Semaphore> {
        self.transfer_complete_semaphore
    }

    /// Recomputes the staging bytes every pending region could need. Buffer regions
    /// are packed first, images follow, each starting on its texel boundary.
    fn compute_totals(&mut self) -> vk::DeviceSize {
        let mut offset = 0;
        let mut regions = 0;
        for buffer_info in self.data_map.values().flat_map(BTreeMap::values) {
            offset = align(offset + buffer_info.range, STAGING_ALIGNMENT);
            regions += 1;
        }
        self.data_total_size = offset;
        self.data_total_regions = regions;

        // Image data keeps its shape, an image that cannot be copied is dropped
        self.image_infos.retain(|_, image_info| has_copyable_data(image_info));
        for image_info in self.image_infos.values() {
            offset = align(offset, image_copy::staging_alignment(image_info, STAGING_ALIGNMENT));
            offset = align(offset + image_copy::staging_size(image_info), STAGING_ALIGNMENT);
        }
        self.image_total_size = offset - self.data_total_size;

        offset
    }

    /// Copies everything that changed since this device last saw it into the staging
    /// buffer of `frame_index` and submits the copies.
    ///
    /// `wait_semaphore` is waited on in addition to the consumer semaphore.
    pub fn transfer_data<D>(
        &mut self,
        device: &D,
        frame_index: usize,
        config: &TransferConfig,
        wait_semaphore: Option<Semaphore>,
    ) -> TransferResult
    where
        D: TransferDevice<Staging = S>,
    {
        let level = config.log_level;
        log::log!(level, "TransferPhase::transfer_data({}) frame_index = {}", self.name, frame_index);

        if frame_index >= self.frames.len() {
            return TransferResult::nothing_to_do();
        }

        let total_size = self.compute_totals();
        log::log!(
            level,
            "    image_total_size = {}, data_total_size = {}, data_total_regions = {}",
            self.image_total_size,
            self.data_total_size,
            self.data_total_regions,
        );
        if total_size == 0 {
            return TransferResult::nothing_to_do();
        }

        let frame = &mut self.frames[frame_index];

        let previous_size = frame.staging_size();
        match frame.ensure_staging(device, total_size, config.minimum_staging_buffer_size) {
            Ok(true) => log::log!(
                level,
                "    {} frame {} staging buffer grown from {} to {} bytes",
                self.name,
                frame_index,
                previous_size,
                frame.staging_size(),
            ),
            Ok(false) => {}
            Err(e) => {
                log::error!("Failed to allocate {total_size} bytes of staging memory: {e}");
                return TransferResult::failed(e);
            }
        }

        let signal_semaphore = match self.transfer_complete_semaphore {
            Some(semaphore) => semaphore,
            None => match device.create_semaphore() {
                Ok(semaphore) => {
                    log::log!(level, "    {} transfer complete semaphore created {:?}", self.name, semaphore);
                    self.transfer_complete_semaphore = Some(semaphore);
                    semaphore
                }
                Err(e) => {
                    log::error!("Failed to create transfer semaphore: {e}");
                    return TransferResult::failed(e);
                }
            },
        };

        let command_buffer = match frame.begin(device) {
            Ok(command_buffer) => command_buffer,
            Err(e) => {
                log::error!("Failed to begin transfer command buffer: {e}");
                return TransferResult::failed(e);
            }
        };

        let Some(staging) = frame.staging.as_mut() else {
            return TransferResult::failed(vk::Result::ERROR_MEMORY_MAP_FAILED);
        };

        let mut offset = 0;
        let buffers_copied = copy_buffer_regions(
            device,
            command_buffer,
            staging,
            &mut frame.copy_regions,
            &mut self.data_map,
            &mut offset,
            level,
        );
        let images_copied = copy_images(
            device,
            command_buffer,
            staging,
            &mut self.image_infos,
            &mut offset,
            level,
        );

        if let Err(e) = buffers_copied.and(images_copied) {
            if let Err(end_error) = device.end_command_buffer(command_buffer) {
                log::warn!("Failed to end abandoned transfer command buffer: {end_error}");
            }
            return TransferResult::failed(e);
        }

        if let Err(e) = device.end_command_buffer(command_buffer) {
            log::error!("Failed to end transfer command buffer: {e}");
            return TransferResult::failed(e);
        }

        if offset == 0 {
            log::log!(level, "    {} nothing changed, no submission", self.name);
            return TransferResult::nothing_to_do();
        }

        let wait_semaphores: SmallVec<[Semaphore; 2]> = self.consumer_completed_semaphore
            .take()
            .into_iter()
            .chain(wait_semaphore)
            .collect();
        let signal_semaphores = [signal_semaphore];
        let submitted = device.submit(&Submission {
            wait_semaphores: &wait_semaphores,
            command_buffer,
            signal_semaphores: &signal_semaphores,
        });
        log::log!(
            level,
            "    {} submitted {} bytes, waiting on {:?}, signaling {:?}: {:?}",
            self.name,
            offset,
            wait_semaphores,
            signal_semaphore,
            submitted,
        );

        match submitted {
            Ok(()) => TransferResult::submitted(Semaphore::new(
                signal_semaphore,
                vk::PipelineStageFlags::ALL_COMMANDS,
            )),
            Err(e) => {
                log::error!("Failed to submit {} transfer: {e}", self.name);
                TransferResult::failed(e)
            }
        }
    }

    /// Releases every device object the phase created
    pub fn release<D>(&mut self, device: &D)
    where
        D: TransferDevice<Staging = S>,
    {
        for frame in &mut self.frames {
            frame.free(device);
        }
        if let Some(semaphore) = self.transfer_complete_semaphore.take() {
            device.destroy_semaphore(semaphore);
        }
        self.consumer_completed_semaphore = None;
    }
}

fn has_copyable_data(image_info: &ImageInfo) -> bool {
    let image = image_info.image_view.image;
    let data = image_info.data();
    if image_copy::staging_size(image_info) == 0 {
        log::warn!("ImageInfo {:?} has no data, dropping it", image);
        false
    } else if !image_copy::holds_copied_levels(image_info) {
        log::warn!(
            "ImageInfo {:?} data holds {} elements, too few for its {} stored mip levels, dropping it",
            image,
            data.value_count(),
            data.properties().mip_levels,
        );
        false
    } else {
        true
    }
}

/// Stages and records every buffer region whose data changed. Returns the first
/// staging write failure, the regions that hit it are retried next time.
fn copy_buffer_regions<D, S>(
    device: &D,
    command_buffer: vk::CommandBuffer,
    staging: &mut S,
    copy_regions: &mut Vec<vk::BufferCopy>,
    data_map: &mut BTreeMap<vk::Buffer, BTreeMap<vk::DeviceSize, Arc<BufferInfo>>>,
    offset: &mut vk::DeviceSize,
    level: log::Level,
) -> Result<(), vk::Result>
where
    D: TransferDevice,
    S: StagingMemory,
{
    let device_id = device.device_id();
    let staging_buffer = staging.buffer();
    let mut failure = None;
    data_map.retain(|&destination, buffer_infos| {
        copy_regions.clear();
        buffer_infos.retain(|&dst_offset, buffer_info| {
            if Arc::strong_count(buffer_info) == 1 {
                log::log!(level, "    BufferInfo {:?}:{} abandoned, dropping it", destination, dst_offset);
                return false;
            }

            if buffer_info.sync_modified_counts(device_id) {
                let bytes = buffer_info.data.read();
                let available = (buffer_info.range as usize).min(bytes.len());
                if available < buffer_info.range as usize {
                    log::warn!(
                        "BufferInfo {:?}:{} range {} exceeds its {} bytes of data",
                        destination,
                        dst_offset,
                        buffer_info.range,
                        bytes.len(),
                    );
                }
                if let Err(e) = staging.write(*offset, &bytes[..available]) {
                    log::error!("Failed to stage BufferInfo {:?}:{}: {e}", destination, dst_offset);
                    buffer_info.forget_modified_count(device_id);
                    failure.get_or_insert(e);
                    return true;
                }

                copy_regions.push(vk::BufferCopy {
                    src_offset: *offset,
                    dst_offset,
                    size: buffer_info.range,
                });
                *offset = align(*offset + buffer_info.range, STAGING_ALIGNMENT);
            }

            buffer_info.data.dynamic()
        });

        if !copy_regions.is_empty() {
            log::log!(level, "    copying {} regions into {:?}", copy_regions.len(), destination);
            device.cmd_copy_buffer(command_buffer, staging_buffer, destination, &copy_regions[..]);
        }

        !buffer_infos.is_empty()
    });
    failure.map_or(Ok(()), Err)
}

fn copy_images<D, S>(
    device: &D,
    command_buffer: vk::CommandBuffer,
    staging: &mut S,
    image_infos: &mut BTreeMap<usize, Arc<ImageInfo>>,
    offset: &mut vk::DeviceSize,
    level: log::Level,
) -> Result<(), vk::Result>
where
    D: TransferDevice,
    S: StagingMemory,
{
    let device_id = device.device_id();
    let staging_buffer = staging.buffer();
    let mut failure = None;
    image_infos.retain(|_, image_info| {
        let image = image_info.image_view.image;
        if Arc::strong_count(image_info) == 1 {
            log::log!(level, "    ImageInfo {:?} abandoned, dropping it", image);
            return false;
        }

        if image_info.sync_modified_counts(device_id) {
            let start = align(*offset, image_copy::staging_alignment(image_info, STAGING_ALIGNMENT));
            match image_copy::write_image_data(image_info, staging, start) {
                Ok(written) => {
                    log::log!(level, "    copying {} bytes into image {:?}", written, image);
                    image_copy::record_image_copy(device, command_buffer, staging_buffer, start, image_info);
                    *offset = align(start + written as vk::DeviceSize, STAGING_ALIGNMENT);
                }
                Err(e) => {
                    log::error!("Failed to stage ImageInfo {:?}: {e}", image);
                    image_info.forget_modified_count(device_id);
                    failure.get_or_insert(e);
                    return true;
                }
            }
        }

        image_info.data().dynamic()
    });
    failure.map_or(Ok(()), Err)
}
