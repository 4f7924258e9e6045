use ash::vk;
use bitflags::bitflags;
use crate::device::Semaphore;

bitflags! {
    /// Which transfer phases an operation applies to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TransferMask: u32 {
        /// Data that has to be on the device before the frame's command buffers are recorded
        const BEFORE_RECORD_TRAVERSAL = 1 << 0;
        /// Data that may be written while command buffers are recorded
        const AFTER_RECORD_TRAVERSAL = 1 << 1;
        const ALL = Self::BEFORE_RECORD_TRAVERSAL.bits() | Self::AFTER_RECORD_TRAVERSAL.bits();
    }
}

/// Outcome of [`TransferScheduler::transfer_data`](crate::transfer::scheduler::TransferScheduler::transfer_data).
///
/// `semaphore` is set when copies were submitted and the consumer has to wait on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferResult {
    pub result: vk::Result,
    pub semaphore: Option<Semaphore>,
}

impl TransferResult {
    pub fn nothing_to_do() -> Self {
        Self {
            result: vk::Result::SUCCESS,
            semaphore: None,
        }
    }

    pub fn failed(result: vk::Result) -> Self {
        Self {
            result,
            semaphore: None,
        }
    }

    pub fn submitted(semaphore: Semaphore) -> Self {
        Self {
            result: vk::Result::SUCCESS,
            semaphore: Some(semaphore),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result == vk::Result::SUCCESS
    }
}
