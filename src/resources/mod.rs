//! "Resources" are the application-side records the transfer scheduler reads from.
//! The application owns them and shares them with the scheduler through `Arc`.

pub mod buffer_info;
pub mod data;
pub mod format;
pub mod image_info;

use crate::resources::buffer_info::BufferInfoList;
use crate::resources::image_info::ImageInfoList;

/// Records collected while compiling a scene that need uploading every frame
#[derive(Debug, Default, Clone)]
pub struct DynamicData {
    pub buffer_infos: BufferInfoList,
    pub image_infos: ImageInfoList,
}

impl DynamicData {
    pub fn is_empty(&self) -> bool {
        self.buffer_infos.is_empty() && self.image_infos.is_empty()
    }
}
