pub mod device;
pub mod resources;
pub mod transfer;
pub mod util;

pub use device::{Semaphore, StagingMemory, Submission, TransferDevice};
pub use resources::buffer_info::{BufferInfo, BufferInfoList};
pub use resources::data::{Data, DataProperties, DataVariance, Dimensions};
pub use resources::image_info::{ImageInfo, ImageInfoList, ImageView, SamplerInfo};
pub use resources::DynamicData;
pub use transfer::config::TransferConfig;
pub use transfer::mask::{TransferMask, TransferResult};
pub use transfer::scheduler::TransferScheduler;
