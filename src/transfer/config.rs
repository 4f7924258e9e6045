use ash::vk;

/// Options for a [`TransferScheduler`](crate::transfer::scheduler::TransferScheduler)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferConfig {
    /// Frames of transfer state kept in flight, each with its own staging buffer
    pub buffer_count: u32,
    /// Staging buffers are never allocated smaller than this
    pub minimum_staging_buffer_size: vk::DeviceSize,
    /// Level used for per-frame transfer tracing
    pub log_level: log::Level,
}

impl TransferConfig {
    pub fn with_buffer_count(mut self, buffer_count: u32) -> Self {
        self.buffer_count = buffer_count;
        self
    }

    pub fn with_minimum_staging_buffer_size(mut self, size: vk::DeviceSize) -> Self {
        self.minimum_staging_buffer_size = size;
        self
    }

    pub fn with_log_level(mut self, log_level: log::Level) -> Self {
        self.log_level = log_level;
        self
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            buffer_count: 3,
            minimum_staging_buffer_size: 16 * 1024 * 1024,
            log_level: log::Level::Debug,
        }
    }
}
