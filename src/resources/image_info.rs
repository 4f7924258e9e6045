use std::sync::Arc;
use ash::vk;
use crate::resources::data::{Data, ModifiedCounts};

/// Sampling policy that decides how many mip levels an uploaded image gets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerInfo {
    /// Highest level of detail the sampler may select, `vk::LOD_CLAMP_NONE` for the
    /// whole chain
    pub max_lod: f32,
    /// Filter used when levels missing from the data are generated by blits
    pub mipmap_filter: vk::Filter,
}

impl Default for SamplerInfo {
    fn default() -> Self {
        Self {
            max_lod: 0.0,
            mipmap_filter: vk::Filter::LINEAR,
        }
    }
}

/// Destination image plus the data that fills it
#[derive(Debug, Clone)]
pub struct ImageView {
    pub image: vk::Image,
    /// Format of the destination image, may differ from the data's format
    pub format: vk::Format,
    pub aspect: vk::ImageAspectFlags,
    pub data: Arc<Data>,
}

#[derive(Debug)]
pub struct ImageInfo {
    pub image_view: ImageView,
    pub sampler: Option<SamplerInfo>,
    /// Layout the image is left in once the transfer completes
    pub image_layout: vk::ImageLayout,

    modified_counts: ModifiedCounts,
}

impl ImageInfo {
    pub fn new(
        image_view: ImageView,
        sampler: Option<SamplerInfo>,
        image_layout: vk::ImageLayout,
    ) -> Self {
        Self {
            image_view,
            sampler,
            image_layout,
            modified_counts: ModifiedCounts::default(),
        }
    }

    pub fn data(&self) -> &Arc<Data> {
        &self.image_view.data
    }

    pub fn sync_modified_counts(&self, device_id: u32) -> bool {
        self.modified_counts.sync(device_id, self.image_view.data.modified_count())
    }

    pub fn forget_modified_count(&self, device_id: u32) {
        self.modified_counts.forget(device_id);
    }

    pub fn mip_levels(&self) -> u32 {
        compute_num_mip_levels(&self.image_view.data, self.sampler.as_ref())
    }
}

pub type ImageInfoList = Vec<Arc<ImageInfo>>;

/// Mip levels to allocate for `data` sampled with `sampler`.
///
/// Data that carries its own mip chain always uses it. Otherwise the sampler's
/// `max_lod` picks the level count, clamped to what the largest dimension supports.
pub fn compute_num_mip_levels(data: &Data, sampler: Option<&SamplerInfo>) -> u32 {
    let data_levels = data.properties().mip_levels.max(1);
    if data_levels > 1 {
        return data_levels;
    }

    let Some(sampler) = sampler else {
        return 1;
    };
    if !(sampler.max_lod >= 1.0) {
        return 1;
    }

    let max_dimension = data.width().max(data.height()).max(data.depth()).max(1);
    let full_chain = u32::BITS - max_dimension.leading_zeros();
    (sampler.max_lod as u32).saturating_add(1).min(full_chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::data::{DataProperties, DataVariance, Dimensions};

    fn rgba_data(width: u32, height: u32, mip_levels: u32) -> Data {
        let properties = DataProperties {
            format: vk::Format::R8G8B8A8_UNORM,
            stride: 4,
            mip_levels,
            variance: DataVariance::StaticData,
        };
        let dimensions = Dimensions { width, height, depth: 1 };
        Data::image(vec![0u8; (width * height * 4) as usize], dimensions, properties)
    }

    #[test]
    fn no_sampler_means_single_level() {
        assert_eq!(compute_num_mip_levels(&rgba_data(256, 256, 1), None), 1);
    }

    #[test]
    fn unclamped_lod_gives_full_chain() {
        let sampler = SamplerInfo {
            max_lod: vk::LOD_CLAMP_NONE,
            ..Default::default()
        };
        assert_eq!(compute_num_mip_levels(&rgba_data(256, 64, 1), Some(&sampler)), 9);
        assert_eq!(compute_num_mip_levels(&rgba_data(1, 1, 1), Some(&sampler)), 1);
    }

    #[test]
    fn max_lod_limits_levels() {
        let sampler = SamplerInfo {
            max_lod: 3.0,
            ..Default::default()
        };
        assert_eq!(compute_num_mip_levels(&rgba_data(256, 256, 1), Some(&sampler)), 4);

        let zero = SamplerInfo::default();
        assert_eq!(compute_num_mip_levels(&rgba_data(256, 256, 1), Some(&zero)), 1);
    }

    #[test]
    fn data_mip_chain_wins() {
        let sampler = SamplerInfo {
            max_lod: vk::LOD_CLAMP_NONE,
            ..Default::default()
        };
        assert_eq!(compute_num_mip_levels(&rgba_data(8, 8, 2), Some(&sampler)), 2);
    }
}
