use std::sync::Arc;
use ash::vk;
use crate::resources::data::{Data, ModifiedCounts};

/// A region of a destination buffer whose contents come from application [`Data`].
///
/// Shared through `Arc` between the application and the transfer scheduler. Once the
/// scheduler holds the last reference the region is considered abandoned.
#[derive(Debug)]
pub struct BufferInfo {
    /// Destination buffer on the device
    pub buffer: vk::Buffer,
    /// Byte offset into the destination buffer
    pub offset: vk::DeviceSize,
    /// Bytes copied from the start of `data`
    pub range: vk::DeviceSize,
    pub data: Arc<Data>,

    modified_counts: ModifiedCounts,
}

impl BufferInfo {
    /// Covers the whole of `data`
    pub fn new(data: Arc<Data>, buffer: vk::Buffer, offset: vk::DeviceSize) -> Self {
        let range = data.data_size() as vk::DeviceSize;
        Self::with_range(data, buffer, offset, range)
    }

    pub fn with_range(
        data: Arc<Data>,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) -> Self {
        Self {
            buffer,
            offset,
            range,
            data,
            modified_counts: ModifiedCounts::default(),
        }
    }

    /// True exactly once per modification of `data` for each device
    pub fn sync_modified_counts(&self, device_id: u32) -> bool {
        self.modified_counts.sync(device_id, self.data.modified_count())
    }

    /// Marks the current contents as not yet transferred to `device_id`
    pub fn forget_modified_count(&self, device_id: u32) {
        self.modified_counts.forget(device_id);
    }
}

pub type BufferInfoList = Vec<Arc<BufferInfo>>;
