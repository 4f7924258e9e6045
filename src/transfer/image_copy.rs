use ash::prelude::VkResult;
use ash::vk;
use smallvec::SmallVec;
use crate::device::{StagingMemory, TransferDevice};
use crate::resources::format::get_format_traits;
use crate::resources::image_info::ImageInfo;
use crate::util::lcm;

/// Bytes per element in the source data and in the destination image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementSizes {
    pub source: usize,
    pub target: usize,
}

impl ElementSizes {
    pub fn of(image_info: &ImageInfo) -> Self {
        let source = image_info.data().element_size();
        let target_traits = get_format_traits(image_info.image_view.format);
        let target = if target_traits.is_known() {
            target_traits.size as usize
        } else {
            source
        };
        Self { source, target }
    }
}

/// Bytes `image_info` occupies in staging memory
pub fn staging_size(image_info: &ImageInfo) -> vk::DeviceSize {
    let sizes = ElementSizes::of(image_info);
    (sizes.target * image_info.data().value_count()) as vk::DeviceSize
}

/// Boundary the staged data of `image_info` starts on. Buffer to image copies need an
/// offset that is a multiple of the texel size as well as of `base`.
pub fn staging_alignment(image_info: &ImageInfo, base: vk::DeviceSize) -> vk::DeviceSize {
    lcm(base, ElementSizes::of(image_info).target as vk::DeviceSize)
}

/// Levels copied straight from the data, the rest are generated
pub fn copied_levels(image_info: &ImageInfo) -> u32 {
    image_info.data().properties().mip_levels.clamp(1, image_info.mip_levels())
}

/// True when the data holds every element of the levels that are copied from it
pub fn holds_copied_levels(image_info: &ImageInfo) -> bool {
    let offsets = image_info.data().compute_mipmap_offsets();
    offsets[copied_levels(image_info) as usize] <= image_info.data().value_count()
}

/// Copies every element of `source` into `target`, widening each from `source_stride`
/// to `target_stride` bytes. Bytes past the source element come from `default_value`
/// at the same position, zero where it is shorter.
pub fn translate_elements(
    source: &[u8],
    source_stride: usize,
    target: &mut [u8],
    target_stride: usize,
    default_value: &[u8],
) {
    let common = source_stride.min(target_stride);
    let source_elements = source.chunks_exact(source_stride);
    let target_elements = target.chunks_exact_mut(target_stride);
    for (src, dst) in source_elements.zip(target_elements) {
        dst[..common].copy_from_slice(&src[..common]);
        for (i, byte) in dst.iter_mut().enumerate().skip(common) {
            *byte = default_value.get(i).copied().unwrap_or(0);
        }
    }
}

/// Writes the data of `image_info` into `staging` at `offset`, translating the
/// element format if the image's differs. Returns the number of bytes written.
pub fn write_image_data<S: StagingMemory>(
    image_info: &ImageInfo,
    staging: &mut S,
    offset: vk::DeviceSize,
) -> VkResult<usize> {
    let sizes = ElementSizes::of(image_info);
    let data = image_info.data();
    let value_count = data.value_count();
    let bytes = data.read();

    let size = sizes.target * value_count;
    if sizes.source == sizes.target {
        staging.write(offset, &bytes[..size])?;
    } else {
        let mut translated = vec![0u8; size];
        translate_elements(
            &bytes[..sizes.source * value_count],
            sizes.source,
            &mut translated,
            sizes.target,
            get_format_traits(image_info.image_view.format).default_value(),
        );
        staging.write(offset, &translated)?;
    }
    Ok(size)
}

fn subresource_range(aspect: vk::ImageAspectFlags, base_mip_level: u32, level_count: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level,
        level_count,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn layout_barrier(
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_access_mask: vk::AccessFlags,
    dst_access_mask: vk::AccessFlags,
) -> vk::ImageMemoryBarrier<'static> {
    vk::ImageMemoryBarrier {
        old_layout,
        new_layout,
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        image,
        subresource_range: range,
        src_access_mask,
        dst_access_mask,
        ..Default::default()
    }
}

fn mip_extent(width: u32, height: u32, depth: u32, level: u32) -> vk::Extent3D {
    vk::Extent3D {
        width: (width >> level).max(1),
        height: (height >> level).max(1),
        depth: (depth >> level).max(1),
    }
}

fn far_corner(extent: vk::Extent3D) -> vk::Offset3D {
    vk::Offset3D {
        x: extent.width as i32,
        y: extent.height as i32,
        z: extent.depth as i32,
    }
}

const SHADER_STAGES: vk::PipelineStageFlags = vk::PipelineStageFlags::from_raw(
    vk::PipelineStageFlags::FRAGMENT_SHADER.as_raw() | vk::PipelineStageFlags::COMPUTE_SHADER.as_raw(),
);

/// Records the commands that move an image's staged data at `staging_offset` into
/// its destination and leave it in the requested layout.
///
/// Levels stored in the data are copied directly, any further levels the sampler
/// asks for are generated by blitting down from the last copied one.
pub fn record_image_copy<D: TransferDevice>(
    device: &D,
    command_buffer: vk::CommandBuffer,
    staging_buffer: vk::Buffer,
    staging_offset: vk::DeviceSize,
    image_info: &ImageInfo,
) {
    let data = image_info.data();
    let image = image_info.image_view.image;
    let aspect = image_info.image_view.aspect;
    let final_layout = image_info.image_layout;
    let (width, height, depth) = (data.width(), data.height(), data.depth());

    let mip_levels = image_info.mip_levels();
    let copied_levels = copied_levels(image_info);
    let mipmap_offsets = data.compute_mipmap_offsets();
    let element_size = ElementSizes::of(image_info).target as vk::DeviceSize;

    // Whole chain from UNDEFINED, previous contents are discarded
    device.cmd_image_barriers(
        command_buffer,
        vk::PipelineStageFlags::TOP_OF_PIPE,
        vk::PipelineStageFlags::TRANSFER,
        &[layout_barrier(
            image,
            subresource_range(aspect, 0, mip_levels),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
        )],
    );

    let regions: SmallVec<[vk::BufferImageCopy; 16]> = (0..copied_levels)
        .map(|level| vk::BufferImageCopy {
            buffer_offset: staging_offset + mipmap_offsets[level as usize] as vk::DeviceSize * element_size,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: aspect,
                mip_level: level,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D::default(),
            image_extent: mip_extent(width, height, depth, level),
        })
        .collect();
    device.cmd_copy_buffer_to_image(
        command_buffer,
        staging_buffer,
        image,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        &regions,
    );

    if copied_levels == mip_levels {
        device.cmd_image_barriers(
            command_buffer,
            vk::PipelineStageFlags::TRANSFER,
            SHADER_STAGES,
            &[layout_barrier(
                image,
                subresource_range(aspect, 0, mip_levels),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                final_layout,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::SHADER_READ,
            )],
        );
        return;
    }

    let filter = image_info
        .sampler
        .map_or(vk::Filter::LINEAR, |sampler| sampler.mipmap_filter);

    // Copied levels that no blit reads from are finished already
    if copied_levels > 1 {
        device.cmd_image_barriers(
            command_buffer,
            vk::PipelineStageFlags::TRANSFER,
            SHADER_STAGES,
            &[layout_barrier(
                image,
                subresource_range(aspect, 0, copied_levels - 1),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                final_layout,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::SHADER_READ,
            )],
        );
    }

    for level in copied_levels..mip_levels {
        let source_level = level - 1;
        device.cmd_image_barriers(
            command_buffer,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::TRANSFER,
            &[layout_barrier(
                image,
                subresource_range(aspect, source_level, 1),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::TRANSFER_READ,
            )],
        );

        let blit = vk::ImageBlit {
            src_subresource: vk::ImageSubresourceLayers {
                aspect_mask: aspect,
                mip_level: source_level,
                base_array_layer: 0,
                layer_count: 1,
            },
            src_offsets: [
                vk::Offset3D::default(),
                far_corner(mip_extent(width, height, depth, source_level)),
            ],
            dst_subresource: vk::ImageSubresourceLayers {
                aspect_mask: aspect,
                mip_level: level,
                base_array_layer: 0,
                layer_count: 1,
            },
            dst_offsets: [
                vk::Offset3D::default(),
                far_corner(mip_extent(width, height, depth, level)),
            ],
        };
        device.cmd_blit_image(command_buffer, image, &[blit], filter);

        device.cmd_image_barriers(
            command_buffer,
            vk::PipelineStageFlags::TRANSFER,
            SHADER_STAGES,
            &[layout_barrier(
                image,
                subresource_range(aspect, source_level, 1),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                final_layout,
                vk::AccessFlags::TRANSFER_READ,
                vk::AccessFlags::SHADER_READ,
            )],
        );
    }

    // The last level was only ever written to
    device.cmd_image_barriers(
        command_buffer,
        vk::PipelineStageFlags::TRANSFER,
        SHADER_STAGES,
        &[layout_barrier(
            image,
            subresource_range(aspect, mip_levels - 1, 1),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            final_layout,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
        )],
    );
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use ash::vk::Handle;
    use super::*;
    use crate::resources::data::{Data, DataProperties, DataVariance, Dimensions};
    use crate::device::recording::{RecordingDevice, RecordingStaging};
    use crate::resources::image_info::{ImageView, SamplerInfo};

    fn rgb_image(width: u32, height: u32, target: vk::Format) -> ImageInfo {
        let values = (0..width * height * 3).map(|i| i as u8).collect::<Vec<_>>();
        let data = Data::image(
            values,
            Dimensions { width, height, depth: 1 },
            DataProperties {
                format: vk::Format::R8G8B8_UNORM,
                stride: 3,
                mip_levels: 1,
                variance: DataVariance::StaticData,
            },
        );
        ImageInfo::new(
            ImageView {
                image: vk::Image::from_raw(7),
                format: target,
                aspect: vk::ImageAspectFlags::COLOR,
                data: Arc::new(data),
            },
            None,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
    }

    fn staging(size: vk::DeviceSize) -> RecordingStaging {
        RecordingDevice::new(0).allocate_staging_buffer(size).unwrap()
    }

    #[test]
    fn rgb_to_rgba_appends_opaque_alpha() {
        for count in [0u32, 1, 2, 5] {
            let info = rgb_image(count, 1, vk::Format::R8G8B8A8_UNORM);
            // `Data::image` with a zero width still stores no bytes
            let expected_size = 4 * info.data().value_count();
            assert_eq!(staging_size(&info), expected_size as u64);

            let mut staging = staging(expected_size as u64 + 8);
            staging.write(0, &[0xaa; 8]).unwrap();
            let written = write_image_data(&info, &mut staging, 8).unwrap();
            assert_eq!(written, expected_size);

            let bytes = staging.bytes();
            let source = info.data().read();
            for (i, element) in bytes[8..].chunks_exact(4).enumerate() {
                assert_eq!(&element[..3], &source[i * 3..i * 3 + 3]);
                assert_eq!(element[3], 0xff);
            }
            // bytes before the offset are untouched
            assert!(bytes[..8].iter().all(|&b| b == 0xaa));
        }
    }

    #[test]
    fn matching_formats_copy_flat() {
        let info = rgb_image(4, 2, vk::Format::R8G8B8_SRGB);
        let mut staging = staging(24);
        assert_eq!(write_image_data(&info, &mut staging, 0).unwrap(), 24);
        assert_eq!(staging.bytes(), &info.data().read()[..]);
    }

    #[test]
    fn writes_past_the_staging_end_fail() {
        let info = rgb_image(4, 2, vk::Format::R8G8B8A8_UNORM);
        let mut staging = staging(16);
        assert!(write_image_data(&info, &mut staging, 0).is_err());
    }

    #[test]
    fn element_size_follows_the_source_format() {
        // a byte stride with a three byte format is still three bytes per texel
        let data = Data::image(
            vec![7u8; 12],
            Dimensions { width: 2, height: 2, depth: 1 },
            DataProperties {
                format: vk::Format::R8G8B8_UNORM,
                stride: 1,
                mip_levels: 1,
                variance: DataVariance::StaticData,
            },
        );
        let info = ImageInfo::new(
            ImageView {
                image: vk::Image::from_raw(7),
                format: vk::Format::R8G8B8A8_UNORM,
                aspect: vk::ImageAspectFlags::COLOR,
                data: Arc::new(data),
            },
            None,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert_eq!(ElementSizes::of(&info), ElementSizes { source: 3, target: 4 });
        assert_eq!(staging_size(&info), 16);

        let mut staging = staging(16);
        assert_eq!(write_image_data(&info, &mut staging, 0).unwrap(), 16);
        assert_eq!(staging.bytes(), &[7u8, 7, 7, 0xff].repeat(4)[..]);
    }

    #[test]
    fn texel_alignment_is_a_multiple_of_both() {
        let info = rgb_image(2, 2, vk::Format::R8G8B8_UNORM);
        assert_eq!(staging_alignment(&info, 4), 12);
        let info = rgb_image(2, 2, vk::Format::R32G32B32A32_SFLOAT);
        assert_eq!(staging_alignment(&info, 4), 16);
        let info = rgb_image(2, 2, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(staging_alignment(&info, 4), 4);
    }

    #[test]
    fn short_mip_chain_is_detected() {
        let chain = |bytes: usize| {
            let data = Data::image(
                vec![0u8; bytes],
                Dimensions { width: 4, height: 4, depth: 1 },
                DataProperties {
                    format: vk::Format::R8G8B8A8_UNORM,
                    stride: 4,
                    mip_levels: 3,
                    variance: DataVariance::StaticData,
                },
            );
            ImageInfo::new(
                ImageView {
                    image: vk::Image::from_raw(9),
                    format: vk::Format::R8G8B8A8_UNORM,
                    aspect: vk::ImageAspectFlags::COLOR,
                    data: Arc::new(data),
                },
                None,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )
        };
        assert!(holds_copied_levels(&chain((16 + 4 + 1) * 4)));
        assert!(!holds_copied_levels(&chain(16 * 4)));
        assert!(!holds_copied_levels(&rgb_image(0, 0, vk::Format::R8G8B8A8_UNORM)));
    }

    #[test]
    fn translation_pads_from_default_positions() {
        let source = [1u8, 2, 3, 4, 5, 6];
        let mut target = [0u8; 8];
        translate_elements(&source, 3, &mut target, 4, &[9, 9, 9, 7]);
        assert_eq!(target, [1, 2, 3, 7, 4, 5, 6, 7]);

        // a short default value pads with zeroes
        let mut target = [0xffu8; 8];
        translate_elements(&source, 3, &mut target, 4, &[]);
        assert_eq!(target, [1, 2, 3, 0, 4, 5, 6, 0]);
    }

    #[test]
    fn sampler_levels_are_blitted() {
        use crate::device::Submission;

        let mut info = rgb_image(8, 8, vk::Format::R8G8B8A8_UNORM);
        info.sampler = Some(SamplerInfo {
            max_lod: vk::LOD_CLAMP_NONE,
            mipmap_filter: vk::Filter::NEAREST,
        });
        assert_eq!(info.mip_levels(), 4);

        let device = RecordingDevice::new(0);
        let command_buffer = device.allocate_command_buffer().unwrap();
        device.begin_command_buffer(command_buffer).unwrap();
        record_image_copy(&device, command_buffer, vk::Buffer::from_raw(3), 64, &info);
        device.end_command_buffer(command_buffer).unwrap();
        device.submit(&Submission {
            wait_semaphores: &[],
            command_buffer,
            signal_semaphores: &[],
        }).unwrap();

        let submission = &device.submissions()[0];
        let copies = submission.image_copies();
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].1.buffer_offset, 64);
        assert_eq!(copies[0].1.image_extent.width, 8);

        let blits = submission.blits();
        assert_eq!(blits.len(), 3);
        assert_eq!(blits[2].src_subresource.mip_level, 2);
        assert_eq!(blits[2].dst_offsets[1], vk::Offset3D { x: 1, y: 1, z: 1 });

        // every level ends in the requested layout exactly once
        let finished = submission
            .barriers()
            .into_iter()
            .filter(|barrier| barrier.new_layout == vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .map(|barrier| (barrier.base_mip_level, barrier.level_count))
            .collect::<Vec<_>>();
        assert_eq!(finished, vec![(0, 1), (1, 1), (2, 1), (3, 1)]);
    }

    #[test]
    fn data_mip_chain_is_copied_per_level() {
        use crate::device::Submission;

        let data = Data::image(
            vec![0u8; (16 + 4 + 1) * 4],
            Dimensions { width: 4, height: 4, depth: 1 },
            DataProperties {
                format: vk::Format::R8G8B8A8_UNORM,
                stride: 4,
                mip_levels: 3,
                variance: DataVariance::StaticData,
            },
        );
        let info = ImageInfo::new(
            ImageView {
                image: vk::Image::from_raw(9),
                format: vk::Format::R8G8B8A8_UNORM,
                aspect: vk::ImageAspectFlags::COLOR,
                data: Arc::new(data),
            },
            None,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );

        let device = RecordingDevice::new(0);
        let command_buffer = device.allocate_command_buffer().unwrap();
        device.begin_command_buffer(command_buffer).unwrap();
        record_image_copy(&device, command_buffer, vk::Buffer::from_raw(3), 0, &info);
        device.end_command_buffer(command_buffer).unwrap();
        device.submit(&Submission {
            wait_semaphores: &[],
            command_buffer,
            signal_semaphores: &[],
        }).unwrap();

        let submission = &device.submissions()[0];
        let offsets = submission
            .image_copies()
            .iter()
            .map(|(_, region)| (region.image_subresource.mip_level, region.buffer_offset))
            .collect::<Vec<_>>();
        assert_eq!(offsets, vec![(0, 0), (1, 64), (2, 80)]);
        assert!(submission.blits().is_empty());
    }
}
