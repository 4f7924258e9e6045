mod scene;

use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use glam::Mat4;
use stager::device::vulkan::VulkanDevice;
use stager::device::instance::TransferInstance;
use stager::resources::buffer_info::BufferInfo;
use stager::resources::data::{Data, DataProperties, DataVariance, Dimensions};
use stager::resources::image_info::{ImageInfo, ImageView, SamplerInfo};
use stager::transfer::config::TransferConfig;
use stager::transfer::mask::TransferMask;
use stager::transfer::scheduler::TransferScheduler;
use scene::{PerFrameData, checkerboard_rgb, quad};

const FRAME_COUNT: u32 = 8;
const TEXTURE_SIZE: u32 = 256;

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let instance = TransferInstance::new()?;
    let device = Arc::new(VulkanDevice::new(&instance)?);

    run(&device)?;

    Ok(())
}

fn run(device: &Arc<VulkanDevice>) -> Result<()> {
    let vertices = Arc::new(Data::from_values(&quad(), DataVariance::StaticData));
    let camera = Arc::new(Data::from_values(
        &[PerFrameData::new(Mat4::IDENTITY, 0.1, 100.0)],
        DataVariance::DynamicData,
    ));
    let texels = Arc::new(Data::image(
        checkerboard_rgb(TEXTURE_SIZE, 32),
        Dimensions {
            width: TEXTURE_SIZE,
            height: TEXTURE_SIZE,
            depth: 1,
        },
        DataProperties {
            format: vk::Format::R8G8B8_UNORM,
            stride: 3,
            ..Default::default()
        },
    ));

    let vertex_buffer = device.create_buffer(
        vertices.data_size() as u64,
        vk::BufferUsageFlags::VERTEX_BUFFER,
        "Quad vertices",
    )?;
    let uniform_buffer = device.create_buffer(
        camera.data_size() as u64,
        vk::BufferUsageFlags::UNIFORM_BUFFER,
        "Per frame data",
    )?;

    let sampler = SamplerInfo {
        max_lod: vk::LOD_CLAMP_NONE,
        mipmap_filter: vk::Filter::LINEAR,
    };
    let mut texture_view = ImageView {
        image: vk::Image::null(),
        format: vk::Format::R8G8B8A8_UNORM,
        aspect: vk::ImageAspectFlags::COLOR,
        data: texels.clone(),
    };
    let mip_levels = stager::resources::image_info::compute_num_mip_levels(&texels, Some(&sampler));
    let texture = device.create_color_image(
        texture_view.format,
        TEXTURE_SIZE,
        TEXTURE_SIZE,
        mip_levels,
        "Checkerboard",
    )?;
    texture_view.image = texture.image;

    let vertex_info = Arc::new(BufferInfo::new(vertices, vertex_buffer.buffer, 0));
    let camera_info = Arc::new(BufferInfo::new(camera.clone(), uniform_buffer.buffer, 0));
    let texture_info = Arc::new(ImageInfo::new(
        texture_view,
        Some(sampler),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    ));

    let scheduler = TransferScheduler::new(device.clone(), TransferConfig::default());
    scheduler.assign_buffer_infos(&[vertex_info.clone(), camera_info.clone()]);
    scheduler.assign_image_infos(&[texture_info.clone()]);

    for frame in 0..FRAME_COUNT {
        scheduler.advance();

        let viewproj = Mat4::from_rotation_y(frame as f32 * 0.25);
        camera.modify(|bytes| {
            bytes.copy_from_slice(bytemuck::bytes_of(&PerFrameData::new(viewproj, 0.1, 100.0)));
        });

        let result = scheduler.transfer_data(TransferMask::ALL);
        if !result.is_success() {
            return Err(eyre!("Transfer failed on frame {frame}: {}", result.result));
        }
        match result.semaphore {
            Some(semaphore) => {
                device.wait_for_semaphore(semaphore)?;
                log::info!("Frame {frame}: transfer complete");
            }
            None => log::info!("Frame {frame}: nothing to transfer"),
        }
    }

    log::info!(
        "Pending after {} frames: {} buffer regions, {} images",
        FRAME_COUNT,
        scheduler.pending_buffer_regions(TransferMask::ALL),
        scheduler.pending_images(TransferMask::ALL),
    );

    device.wait_idle()?;
    Ok(())
}
