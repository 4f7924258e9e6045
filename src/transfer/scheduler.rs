use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use ash::vk;
use crate::device::{Semaphore, TransferDevice};
use crate::resources::buffer_info::BufferInfo;
use crate::resources::data::DataVariance;
use crate::resources::image_info::ImageInfo;
use crate::resources::DynamicData;
use crate::transfer::config::TransferConfig;
use crate::transfer::mask::{TransferMask, TransferResult};
use crate::transfer::phase::TransferPhase;

struct SchedulerState<S> {
    frame_count: u64,
    early: TransferPhase<S>,
    late: TransferPhase<S>,
}

impl<S> SchedulerState<S> {
    fn phases(&self, mask: TransferMask) -> impl Iterator<Item = &TransferPhase<S>> {
        let early = mask.contains(TransferMask::BEFORE_RECORD_TRAVERSAL).then_some(&self.early);
        let late = mask.contains(TransferMask::AFTER_RECORD_TRAVERSAL).then_some(&self.late);
        early.into_iter().chain(late)
    }
}

/// Uploads modified application data to one device, a frame at a time.
///
/// Records are handed over with the `assign_*` methods, which may be called from any
/// thread. Once per frame the frame driver calls [`advance`](Self::advance) followed by
/// [`transfer_data`](Self::transfer_data) for each phase, then waits on the returned
/// semaphore before using the uploaded data.
pub struct TransferScheduler<D: TransferDevice> {
    device: Arc<D>,
    config: TransferConfig,
    state: Mutex<SchedulerState<D::Staging>>,
}

impl<D: TransferDevice> TransferScheduler<D> {
    pub fn new(device: Arc<D>, config: TransferConfig) -> Self {
        log::log!(
            config.log_level,
            "TransferScheduler::new() device {} buffer_count = {}",
            device.device_id(),
            config.buffer_count,
        );
        Self {
            state: Mutex::new(SchedulerState {
                frame_count: 0,
                early: TransferPhase::new("early", config.buffer_count),
                late: TransferPhase::new("late", config.buffer_count),
            }),
            device,
            config,
        }
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, SchedulerState<D::Staging>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves on to the next frame slot
    pub fn advance(&self) {
        let mut state = self.state();
        state.frame_count += 1;
        log::log!(self.config.log_level, "TransferScheduler::advance() frame_count = {}", state.frame_count);
    }

    pub fn frame_count(&self) -> u64 {
        self.state().frame_count
    }

    pub fn buffer_count(&self) -> u32 {
        self.config.buffer_count
    }

    /// Slot used `relative_frame_index` frames ago, `buffer_count` when that frame has
    /// not happened yet.
    pub fn index(&self, relative_frame_index: u64) -> usize {
        self.index_at(self.state().frame_count, relative_frame_index)
    }

    fn index_at(&self, frame_count: u64, relative_frame_index: u64) -> usize {
        let buffer_count = self.config.buffer_count as u64;
        if buffer_count == 0 || frame_count < relative_frame_index {
            buffer_count as usize
        } else {
            ((frame_count - relative_frame_index) % buffer_count) as usize
        }
    }

    pub fn assign_buffer_infos(&self, buffer_infos: &[Arc<BufferInfo>]) {
        let mut state = self.state();
        for buffer_info in buffer_infos {
            if buffer_info.buffer == vk::Buffer::null() {
                log::warn!("Ignoring BufferInfo with no destination buffer: {:?}", buffer_info.data);
                continue;
            }

            let phase = if buffer_info.data.properties().variance >= DataVariance::DynamicDataTransferAfterRecord {
                &mut state.late
            } else {
                &mut state.early
            };
            log::log!(
                self.config.log_level,
                "    assigning BufferInfo {:?}:{} to {}",
                buffer_info.buffer,
                buffer_info.offset,
                phase.name(),
            );
            phase.add_buffer_info(buffer_info.clone());
        }
    }

    pub fn assign_image_infos(&self, image_infos: &[Arc<ImageInfo>]) {
        let mut state = self.state();
        for image_info in image_infos {
            if image_info.image_view.image == vk::Image::null() {
                log::warn!("Ignoring ImageInfo with no destination image: {:?}", image_info.data());
                continue;
            }

            let phase = if image_info.data().properties().variance >= DataVariance::DynamicDataTransferAfterRecord {
                &mut state.late
            } else {
                &mut state.early
            };
            log::log!(
                self.config.log_level,
                "    assigning ImageInfo {:?} to {}",
                image_info.image_view.image,
                phase.name(),
            );
            phase.add_image_info(image_info.clone());
        }
    }

    pub fn assign_dynamic_data(&self, dynamic_data: &DynamicData) {
        if dynamic_data.is_empty() {
            return;
        }
        self.assign_buffer_infos(&dynamic_data.buffer_infos);
        self.assign_image_infos(&dynamic_data.image_infos);
    }

    pub fn contains_data_to_transfer(&self, mask: TransferMask) -> bool {
        self.state()
            .phases(mask)
            .any(TransferPhase::contains_data_to_transfer)
    }

    /// Buffer regions still held by the selected phases
    pub fn pending_buffer_regions(&self, mask: TransferMask) -> usize {
        self.state()
            .phases(mask)
            .map(TransferPhase::pending_buffer_regions)
            .sum()
    }

    pub fn pending_images(&self, mask: TransferMask) -> usize {
        self.state()
            .phases(mask)
            .map(TransferPhase::pending_images)
            .sum()
    }

    /// The next submission of each selected phase waits on `semaphore`, once.
    pub fn set_consumer_completed_semaphore(&self, mask: TransferMask, semaphore: Option<Semaphore>) {
        let mut state = self.state();
        if mask.contains(TransferMask::BEFORE_RECORD_TRAVERSAL) {
            state.early.set_consumer_completed_semaphore(semaphore);
        }
        if mask.contains(TransferMask::AFTER_RECORD_TRAVERSAL) {
            state.late.set_consumer_completed_semaphore(semaphore);
        }
    }

    /// Uploads whatever changed in the selected phases for the current frame.
    ///
    /// When both phases are selected the late submission waits on the early one, so
    /// the returned semaphore covers every copy made by this call.
    pub fn transfer_data(&self, mask: TransferMask) -> TransferResult {
        let mut state = self.state();
        let frame_index = self.index_at(state.frame_count, 0);
        log::log!(
            self.config.log_level,
            "TransferScheduler::transfer_data({:?}) frame_count = {}, frame_index = {}",
            mask,
            state.frame_count,
            frame_index,
        );
        if frame_index >= self.config.buffer_count as usize {
            return TransferResult::nothing_to_do();
        }

        let device = self.device.as_ref();
        let mut result = TransferResult::nothing_to_do();
        if mask.contains(TransferMask::BEFORE_RECORD_TRAVERSAL) {
            result = state.early.transfer_data(device, frame_index, &self.config, None);
            if !result.is_success() {
                return result;
            }
        }
        if mask.contains(TransferMask::AFTER_RECORD_TRAVERSAL) {
            let late = state.late.transfer_data(device, frame_index, &self.config, result.semaphore);
            if !late.is_success() || late.semaphore.is_some() {
                return late;
            }
        }
        result
    }
}

impl<D: TransferDevice> Drop for TransferScheduler<D> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        state.early.release(self.device.as_ref());
        state.late.release(self.device.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;
    use super::*;
    use crate::device::recording::RecordingDevice;
    use crate::resources::data::{Data, DataProperties, Dimensions};
    use crate::resources::image_info::ImageView;

    fn scheduler(buffer_count: u32) -> TransferScheduler<RecordingDevice> {
        let config = TransferConfig::default()
            .with_buffer_count(buffer_count)
            .with_minimum_staging_buffer_size(0);
        TransferScheduler::new(Arc::new(RecordingDevice::new(0)), config)
    }

    fn buffer_info(buffer: u64, offset: u64, bytes: &[u8], variance: DataVariance) -> Arc<BufferInfo> {
        let data = Arc::new(Data::new(bytes.to_vec(), variance));
        Arc::new(BufferInfo::new(data, vk::Buffer::from_raw(buffer), offset))
    }

    fn submissions(scheduler: &TransferScheduler<RecordingDevice>) -> usize {
        scheduler.device().submissions().len()
    }

    #[test]
    fn frame_index_windows() {
        let scheduler = scheduler(3);
        assert_eq!(scheduler.index(0), 0);
        assert_eq!(scheduler.index(1), 3);

        scheduler.advance();
        assert_eq!(scheduler.frame_count(), 1);
        assert_eq!(scheduler.index(0), 1);
        assert_eq!(scheduler.index(1), 0);
        assert_eq!(scheduler.index(2), 3);

        for _ in 0..4 {
            scheduler.advance();
        }
        assert_eq!(scheduler.index(0), 2);
        assert_eq!(scheduler.index(1), 1);
        assert_eq!(scheduler.index(5), 0);
    }

    #[test]
    fn zero_buffer_count_never_transfers() {
        let scheduler = scheduler(0);
        let info = buffer_info(1, 0, &[1; 4], DataVariance::StaticData);
        scheduler.assign_buffer_infos(&[info.clone()]);
        assert_eq!(scheduler.transfer_data(TransferMask::ALL), TransferResult::nothing_to_do());
        assert_eq!(submissions(&scheduler), 0);
    }

    #[test]
    fn records_are_routed_by_variance() {
        let scheduler = scheduler(2);
        let infos = [
            buffer_info(1, 0, &[0; 4], DataVariance::StaticData),
            buffer_info(1, 4, &[0; 4], DataVariance::DynamicData),
            buffer_info(1, 8, &[0; 4], DataVariance::DynamicDataTransferAfterRecord),
            buffer_info(0, 0, &[0; 4], DataVariance::DynamicData),
        ];
        scheduler.assign_buffer_infos(&infos);

        assert_eq!(scheduler.pending_buffer_regions(TransferMask::BEFORE_RECORD_TRAVERSAL), 2);
        assert_eq!(scheduler.pending_buffer_regions(TransferMask::AFTER_RECORD_TRAVERSAL), 1);
        assert!(scheduler.contains_data_to_transfer(TransferMask::AFTER_RECORD_TRAVERSAL));
        assert!(!scheduler.contains_data_to_transfer(TransferMask::empty()));
    }

    #[test]
    fn null_image_is_ignored() {
        let scheduler = scheduler(2);
        let data = Arc::new(Data::image(
            vec![0u8; 4],
            Dimensions { width: 1, height: 1, depth: 1 },
            DataProperties {
                format: vk::Format::R8G8B8A8_UNORM,
                stride: 4,
                ..Default::default()
            },
        ));
        let info = Arc::new(ImageInfo::new(
            ImageView {
                image: vk::Image::null(),
                format: vk::Format::R8G8B8A8_UNORM,
                aspect: vk::ImageAspectFlags::COLOR,
                data,
            },
            None,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ));
        scheduler.assign_image_infos(&[info]);
        assert!(!scheduler.contains_data_to_transfer(TransferMask::ALL));
    }

    #[test]
    fn same_key_replaces_and_same_image_is_idempotent() {
        let scheduler = scheduler(2);
        let first = buffer_info(1, 16, &[1; 4], DataVariance::StaticData);
        let second = buffer_info(1, 16, &[2; 8], DataVariance::StaticData);
        scheduler.assign_buffer_infos(&[first.clone(), second.clone()]);
        assert_eq!(scheduler.pending_buffer_regions(TransferMask::ALL), 1);

        let image = Arc::new(ImageInfo::new(
            ImageView {
                image: vk::Image::from_raw(5),
                format: vk::Format::R8_UNORM,
                aspect: vk::ImageAspectFlags::COLOR,
                data: Arc::new(Data::image(
                    vec![0u8; 4],
                    Dimensions { width: 2, height: 2, depth: 1 },
                    DataProperties {
                        format: vk::Format::R8_UNORM,
                        ..Default::default()
                    },
                )),
            },
            None,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ));
        scheduler.assign_image_infos(&[image.clone(), image.clone()]);
        scheduler.assign_image_infos(&[image.clone()]);
        assert_eq!(scheduler.pending_images(TransferMask::ALL), 1);

        let result = scheduler.transfer_data(TransferMask::ALL);
        assert!(result.semaphore.is_some());
        let submission = &scheduler.device().submissions()[0];
        let copies = submission.buffer_copies();
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].1.size, 8);
        assert_eq!(submission.image_copies().len(), 1);
    }

    #[test]
    fn static_data_is_sent_once() {
        let scheduler = scheduler(3);
        let info = buffer_info(1, 0, &[9; 12], DataVariance::StaticData);
        scheduler.assign_buffer_infos(&[info.clone()]);

        assert!(scheduler.transfer_data(TransferMask::ALL).semaphore.is_some());
        for _ in 0..3 {
            scheduler.advance();
            let result = scheduler.transfer_data(TransferMask::ALL);
            assert_eq!(result, TransferResult::nothing_to_do());
        }
        assert_eq!(submissions(&scheduler), 1);
        assert!(!scheduler.contains_data_to_transfer(TransferMask::ALL));
    }

    #[test]
    fn dynamic_data_sends_latest_value_once_per_burst() {
        let scheduler = scheduler(2);
        let info = buffer_info(1, 0, &[0; 4], DataVariance::DynamicData);
        scheduler.assign_buffer_infos(&[info.clone()]);
        scheduler.transfer_data(TransferMask::BEFORE_RECORD_TRAVERSAL);

        for value in 1..=3u8 {
            info.data.modify(|bytes| bytes.fill(value));
        }
        scheduler.advance();
        assert!(scheduler.transfer_data(TransferMask::BEFORE_RECORD_TRAVERSAL).semaphore.is_some());
        scheduler.advance();
        assert!(scheduler.transfer_data(TransferMask::BEFORE_RECORD_TRAVERSAL).semaphore.is_none());
        assert_eq!(submissions(&scheduler), 2);

        let state = scheduler.state();
        let staging = state.early.frames[1].staging.as_ref().unwrap();
        assert_eq!(&staging.bytes()[..4], &[3, 3, 3, 3]);
    }

    #[test]
    fn abandoned_records_are_dropped_without_transfer() {
        let scheduler = scheduler(2);
        let kept = buffer_info(1, 0, &[1; 4], DataVariance::DynamicData);
        let abandoned = buffer_info(1, 8, &[2; 4], DataVariance::DynamicData);
        scheduler.assign_buffer_infos(&[kept.clone(), abandoned]);

        scheduler.transfer_data(TransferMask::ALL);
        let copies = scheduler.device().submissions()[0].buffer_copies();
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].1.dst_offset, 0);
        assert_eq!(scheduler.pending_buffer_regions(TransferMask::ALL), 1);

        drop(kept);
        scheduler.advance();
        scheduler.transfer_data(TransferMask::ALL);
        assert!(!scheduler.contains_data_to_transfer(TransferMask::ALL));
    }

    #[test]
    fn staging_failure_keeps_pending_work() {
        let scheduler = scheduler(2);
        let info = buffer_info(1, 0, &[1; 4], DataVariance::StaticData);
        scheduler.assign_buffer_infos(&[info.clone()]);

        scheduler.device().fail_next_staging_allocation();
        let result = scheduler.transfer_data(TransferMask::ALL);
        assert_eq!(result, TransferResult::failed(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        assert_eq!(scheduler.pending_buffer_regions(TransferMask::ALL), 1);
        assert_eq!(submissions(&scheduler), 0);

        // retried on the next frame
        scheduler.advance();
        assert!(scheduler.transfer_data(TransferMask::ALL).semaphore.is_some());
        assert_eq!(submissions(&scheduler), 1);
    }

    #[test]
    fn submission_failure_is_propagated() {
        let scheduler = scheduler(2);
        let info = buffer_info(1, 0, &[1; 4], DataVariance::DynamicData);
        scheduler.assign_buffer_infos(&[info.clone()]);

        scheduler.device().fail_next_submission(vk::Result::ERROR_DEVICE_LOST);
        let result = scheduler.transfer_data(TransferMask::BEFORE_RECORD_TRAVERSAL);
        assert_eq!(result, TransferResult::failed(vk::Result::ERROR_DEVICE_LOST));

        // already marked as synchronized, so only a new change is sent
        scheduler.advance();
        assert!(scheduler.transfer_data(TransferMask::BEFORE_RECORD_TRAVERSAL).semaphore.is_none());
        info.data.dirty();
        scheduler.advance();
        assert!(scheduler.transfer_data(TransferMask::BEFORE_RECORD_TRAVERSAL).semaphore.is_some());
    }

    #[test]
    fn semaphore_failure_keeps_pending_work() {
        let scheduler = scheduler(2);
        let info = buffer_info(1, 0, &[1; 4], DataVariance::StaticData);
        scheduler.assign_buffer_infos(&[info.clone()]);

        scheduler.device().fail_next_semaphore_creation(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        let result = scheduler.transfer_data(TransferMask::ALL);
        assert_eq!(result, TransferResult::failed(vk::Result::ERROR_OUT_OF_HOST_MEMORY));
        assert_eq!(scheduler.pending_buffer_regions(TransferMask::ALL), 1);
        assert_eq!(scheduler.device().live_semaphores(), 0);

        scheduler.advance();
        assert!(scheduler.transfer_data(TransferMask::ALL).semaphore.is_some());
        assert_eq!(scheduler.pending_buffer_regions(TransferMask::ALL), 0);
    }

    #[test]
    fn begin_failure_keeps_pending_work() {
        let scheduler = scheduler(1);
        let info = buffer_info(1, 0, &[1; 4], DataVariance::StaticData);
        scheduler.assign_buffer_infos(&[info.clone()]);

        scheduler.device().fail_next_begin(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let result = scheduler.transfer_data(TransferMask::ALL);
        assert_eq!(result, TransferResult::failed(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        assert_eq!(scheduler.pending_buffer_regions(TransferMask::ALL), 1);
        assert_eq!(submissions(&scheduler), 0);

        // the same slot's command buffer is reset and begun again
        scheduler.advance();
        assert!(scheduler.transfer_data(TransferMask::ALL).semaphore.is_some());
        assert_eq!(scheduler.device().live_command_buffers(), 1);
        assert_eq!(scheduler.device().command_buffer_resets(), 1);
        assert_eq!(scheduler.device().submissions()[0].buffer_copies().len(), 1);
    }

    #[test]
    fn end_failure_is_propagated() {
        let scheduler = scheduler(2);
        let info = buffer_info(1, 0, &[1; 4], DataVariance::DynamicData);
        scheduler.assign_buffer_infos(&[info.clone()]);

        scheduler.device().fail_next_end(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let result = scheduler.transfer_data(TransferMask::BEFORE_RECORD_TRAVERSAL);
        assert_eq!(result, TransferResult::failed(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        assert_eq!(submissions(&scheduler), 0);

        // like a failed submission, the copied contents count as synchronized
        scheduler.advance();
        assert!(scheduler.transfer_data(TransferMask::BEFORE_RECORD_TRAVERSAL).semaphore.is_none());
        info.data.dirty();
        scheduler.advance();
        assert!(scheduler.transfer_data(TransferMask::BEFORE_RECORD_TRAVERSAL).semaphore.is_some());
        assert_eq!(submissions(&scheduler), 1);
    }

    #[test]
    fn dynamic_images_are_kept_and_recopied_after_modify() {
        let scheduler = scheduler(2);
        let data = Data::image(
            vec![0x10u8; 4 * 4 * 4],
            Dimensions { width: 4, height: 4, depth: 1 },
            DataProperties {
                format: vk::Format::R8G8B8A8_UNORM,
                stride: 4,
                mip_levels: 1,
                variance: DataVariance::DynamicData,
            },
        );
        let info = Arc::new(ImageInfo::new(
            ImageView {
                image: vk::Image::from_raw(40),
                format: vk::Format::R8G8B8A8_UNORM,
                aspect: vk::ImageAspectFlags::COLOR,
                data: Arc::new(data),
            },
            None,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ));
        scheduler.assign_image_infos(&[info.clone()]);

        assert!(scheduler.transfer_data(TransferMask::ALL).semaphore.is_some());
        assert_eq!(scheduler.pending_images(TransferMask::ALL), 1);

        // unchanged, nothing to copy but still held
        scheduler.advance();
        assert!(scheduler.transfer_data(TransferMask::ALL).semaphore.is_none());
        assert_eq!(scheduler.pending_images(TransferMask::ALL), 1);

        info.data().modify(|bytes| bytes.fill(0x20));
        scheduler.advance();
        assert!(scheduler.transfer_data(TransferMask::ALL).semaphore.is_some());
        assert_eq!(submissions(&scheduler), 2);
        assert_eq!(scheduler.device().submissions()[1].image_copies().len(), 1);
        assert_eq!(scheduler.pending_images(TransferMask::ALL), 1);
    }

    #[test]
    fn empty_dynamic_data_assigns_nothing() {
        let scheduler = scheduler(2);
        let empty = DynamicData::default();
        assert!(empty.is_empty());
        scheduler.assign_dynamic_data(&empty);
        assert!(!scheduler.contains_data_to_transfer(TransferMask::ALL));

        let dynamic = DynamicData {
            buffer_infos: vec![buffer_info(1, 0, &[1; 4], DataVariance::DynamicData)],
            image_infos: Vec::new(),
        };
        assert!(!dynamic.is_empty());
        scheduler.assign_dynamic_data(&dynamic);
        assert_eq!(scheduler.pending_buffer_regions(TransferMask::BEFORE_RECORD_TRAVERSAL), 1);
    }

    #[test]
    fn consumer_semaphore_is_waited_on_once() {
        let scheduler = scheduler(2);
        let info = buffer_info(1, 0, &[1; 4], DataVariance::DynamicData);
        scheduler.assign_buffer_infos(&[info.clone()]);

        let consumer = Semaphore::new(vk::Semaphore::from_raw(0xc0), vk::PipelineStageFlags::TRANSFER);
        scheduler.set_consumer_completed_semaphore(TransferMask::BEFORE_RECORD_TRAVERSAL, Some(consumer));
        scheduler.transfer_data(TransferMask::BEFORE_RECORD_TRAVERSAL);

        info.data.dirty();
        scheduler.advance();
        scheduler.transfer_data(TransferMask::BEFORE_RECORD_TRAVERSAL);

        let submissions = scheduler.device().submissions();
        assert_eq!(submissions[0].wait_semaphores, vec![consumer]);
        assert!(submissions[1].wait_semaphores.is_empty());
    }

    #[test]
    fn signal_semaphore_is_recycled() {
        let scheduler = scheduler(3);
        let info = buffer_info(1, 0, &[1; 4], DataVariance::DynamicData);
        scheduler.assign_buffer_infos(&[info.clone()]);

        let mut semaphores = Vec::new();
        for _ in 0..5 {
            info.data.dirty();
            semaphores.push(scheduler.transfer_data(TransferMask::ALL).semaphore.unwrap().handle);
            scheduler.advance();
        }
        assert!(semaphores.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(scheduler.device().live_semaphores(), 1);
        // one command buffer per slot, reset on reuse
        assert_eq!(scheduler.device().live_command_buffers(), 3);
        assert_eq!(scheduler.device().command_buffer_resets(), 2);
    }

    #[test]
    fn staging_grows_and_never_shrinks() {
        let scheduler = scheduler(1);
        let small = buffer_info(1, 0, &[1; 8], DataVariance::StaticData);
        scheduler.assign_buffer_infos(&[small.clone()]);
        scheduler.transfer_data(TransferMask::ALL);

        let large = buffer_info(1, 0, &[2; 64], DataVariance::StaticData);
        scheduler.assign_buffer_infos(&[large.clone()]);
        scheduler.advance();
        scheduler.transfer_data(TransferMask::ALL);

        let again = buffer_info(1, 0, &[3; 8], DataVariance::StaticData);
        scheduler.assign_buffer_infos(&[again.clone()]);
        scheduler.advance();
        scheduler.transfer_data(TransferMask::ALL);

        assert_eq!(scheduler.device().staging_allocations(), vec![8, 64]);
    }

    #[test]
    fn minimum_staging_size_is_applied() {
        let config = TransferConfig::default().with_buffer_count(1);
        let scheduler = TransferScheduler::new(Arc::new(RecordingDevice::new(0)), config);
        let info = buffer_info(1, 0, &[1; 8], DataVariance::StaticData);
        scheduler.assign_buffer_infos(&[info.clone()]);
        scheduler.transfer_data(TransferMask::ALL);
        assert_eq!(
            scheduler.device().staging_allocations(),
            vec![TransferConfig::default().minimum_staging_buffer_size],
        );
    }

    #[test]
    fn late_phase_waits_on_early_phase() {
        let scheduler = scheduler(2);
        let early = buffer_info(1, 0, &[1; 4], DataVariance::DynamicData);
        let late = buffer_info(2, 0, &[2; 4], DataVariance::DynamicDataTransferAfterRecord);
        scheduler.assign_buffer_infos(&[early.clone(), late.clone()]);

        let result = scheduler.transfer_data(TransferMask::ALL);
        let submissions = scheduler.device().submissions();
        assert_eq!(submissions.len(), 2);
        let early_signal = submissions[0].signal_semaphores[0];
        let late_signal = submissions[1].signal_semaphores[0];
        assert_ne!(early_signal, late_signal);
        assert_eq!(submissions[1].wait_semaphores[0].handle, early_signal);
        assert_eq!(result.semaphore.map(|s| s.handle), Some(late_signal));

        // only the early phase has work, so its semaphore is handed back
        early.data.dirty();
        scheduler.advance();
        let result = scheduler.transfer_data(TransferMask::ALL);
        assert_eq!(result.semaphore.map(|s| s.handle), Some(early_signal));
    }

    #[test]
    fn concurrent_assign() {
        let scheduler = scheduler(2);
        let infos = (0..8)
            .map(|i| buffer_info(1 + i % 2, 16 * i, &[i as u8; 4], DataVariance::DynamicData))
            .collect::<Vec<_>>();

        std::thread::scope(|scope| {
            for chunk in infos.chunks(2) {
                let scheduler = &scheduler;
                scope.spawn(move || scheduler.assign_buffer_infos(chunk));
            }
        });

        assert_eq!(scheduler.pending_buffer_regions(TransferMask::ALL), 8);
        scheduler.transfer_data(TransferMask::ALL);
        assert_eq!(scheduler.device().submissions()[0].buffer_copies().len(), 8);
    }

    #[test]
    fn drop_releases_device_objects() {
        let device = Arc::new(RecordingDevice::new(0));
        {
            let scheduler = TransferScheduler::new(device.clone(), TransferConfig::default().with_buffer_count(2));
            let info = buffer_info(1, 0, &[1; 4], DataVariance::DynamicDataTransferAfterRecord);
            scheduler.assign_buffer_infos(&[info.clone()]);
            scheduler.transfer_data(TransferMask::ALL);
            assert_eq!(device.live_semaphores(), 1);
            assert_eq!(device.live_command_buffers(), 1);
        }
        assert_eq!(device.live_semaphores(), 0);
        assert_eq!(device.live_command_buffers(), 0);
    }
}
