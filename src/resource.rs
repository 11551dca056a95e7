//! Buffers and images, plus the geometry helpers the image cases share.

use crate::{
    device::Device,
    memory::{DeviceMemory, MemoryKind},
    DeviceSize, VulkanError,
};
use ash::vk;
use std::{cmp::max, sync::Arc};

/// The shape of a test image, covering every `VkImageType` variant together
/// with its arrayed and cube forms.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageKind {
    Dim1d,
    Dim1dArray,
    Dim2d,
    Dim2dArray,
    Cube,
    CubeArray,
    Dim3d,
}

impl ImageKind {
    pub fn image_type(self) -> vk::ImageType {
        match self {
            ImageKind::Dim1d | ImageKind::Dim1dArray => vk::ImageType::TYPE_1D,
            ImageKind::Dim2d | ImageKind::Dim2dArray | ImageKind::Cube | ImageKind::CubeArray => {
                vk::ImageType::TYPE_2D
            }
            ImageKind::Dim3d => vk::ImageType::TYPE_3D,
        }
    }

    /// The extent of a single array layer, derived from the logical grid the
    /// test iterates over.
    pub fn layer_extent(self, grid: [u32; 3]) -> [u32; 3] {
        match self.image_type() {
            vk::ImageType::TYPE_1D => [grid[0], 1, 1],
            vk::ImageType::TYPE_2D => [grid[0], grid[1], 1],
            _ => grid,
        }
    }

    /// Total array layers for the given per-kind layer count.
    pub fn layer_count(self, layers: u32) -> u32 {
        match self {
            ImageKind::Dim1d | ImageKind::Dim2d | ImageKind::Dim3d => 1,
            ImageKind::Dim1dArray | ImageKind::Dim2dArray => layers,
            ImageKind::Cube => 6,
            ImageKind::CubeArray => 6 * layers,
        }
    }

    pub fn create_flags(self) -> vk::ImageCreateFlags {
        match self {
            ImageKind::Cube | ImageKind::CubeArray => vk::ImageCreateFlags::CUBE_COMPATIBLE,
            _ => vk::ImageCreateFlags::empty(),
        }
    }

    /// Whether the device can create sparse-residency images of this shape.
    pub fn residency_feature_enabled(self, features: &vk::PhysicalDeviceFeatures) -> bool {
        match self.image_type() {
            vk::ImageType::TYPE_2D => features.sparse_residency_image2_d != 0,
            vk::ImageType::TYPE_3D => features.sparse_residency_image3_d != 0,
            _ => false,
        }
    }
}

/// Returns the extent of a mip level, or `None` when the level is out of
/// range. Each component halves per level and clamps at one.
pub fn mip_level_extent(extent: [u32; 3], level: u32, mip_levels: u32) -> Option<[u32; 3]> {
    if level >= mip_levels {
        return None;
    }

    Some(extent.map(|x| max(1, x >> level)))
}

/// The length of the full mip chain for an extent.
pub fn max_mip_levels(extent: [u32; 3]) -> u32 {
    32 - (extent[0] | extent[1] | extent[2]).leading_zeros()
}

/// Picks the per-aspect sparse requirements entry for an aspect, preferring
/// an exact single-aspect match over a combined one.
pub fn find_aspect_requirements(
    requirements: &[vk::SparseImageMemoryRequirements],
    aspect: vk::ImageAspectFlags,
) -> Option<&vk::SparseImageMemoryRequirements> {
    requirements
        .iter()
        .find(|req| req.format_properties.aspect_mask == aspect)
        .or_else(|| {
            requirements
                .iter()
                .find(|req| req.format_properties.aspect_mask.contains(aspect))
        })
}

pub struct Buffer {
    handle: vk::Buffer,
    device: Arc<Device>,
    size: DeviceSize,
}

impl Buffer {
    pub fn new(
        device: Arc<Device>,
        size: DeviceSize,
        usage: vk::BufferUsageFlags,
        flags: vk::BufferCreateFlags,
        sharing_families: &[u32],
    ) -> Result<Arc<Self>, VulkanError> {
        let mut create_info = vk::BufferCreateInfo::default()
            .flags(flags)
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        if sharing_families.len() > 1 {
            create_info = create_info
                .sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(sharing_families);
        }

        let handle = unsafe { device.handle().create_buffer(&create_info, None) }?;

        Ok(Arc::new(Buffer {
            handle,
            device,
            size,
        }))
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.handle
    }

    #[inline]
    pub fn size(&self) -> DeviceSize {
        self.size
    }

    pub fn memory_requirements(&self) -> vk::MemoryRequirements {
        unsafe { self.device.handle().get_buffer_memory_requirements(self.handle) }
    }

    pub fn bind_memory(&self, memory: &DeviceMemory) -> Result<(), VulkanError> {
        Ok(unsafe {
            self.device
                .handle()
                .bind_buffer_memory(self.handle, memory.handle(), 0)
        }?)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_buffer(self.handle, None) };
    }
}

/// Parameters for image creation; mirrors the fields of `VkImageCreateInfo`
/// the suite varies.
#[derive(Clone, Debug)]
pub struct ImageCreateParams {
    pub flags: vk::ImageCreateFlags,
    pub image_type: vk::ImageType,
    pub format: vk::Format,
    pub extent: [u32; 3],
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
    pub usage: vk::ImageUsageFlags,
    pub sharing_families: Vec<u32>,
}

pub struct Image {
    handle: vk::Image,
    device: Arc<Device>,
    params: ImageCreateParams,
}

impl Image {
    pub fn new(device: Arc<Device>, params: ImageCreateParams) -> Result<Arc<Self>, VulkanError> {
        let mut create_info = vk::ImageCreateInfo::default()
            .flags(params.flags)
            .image_type(params.image_type)
            .format(params.format)
            .extent(vk::Extent3D {
                width: params.extent[0],
                height: params.extent[1],
                depth: params.extent[2],
            })
            .mip_levels(params.mip_levels)
            .array_layers(params.array_layers)
            .samples(params.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(params.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        if params.sharing_families.len() > 1 {
            create_info = create_info
                .sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&params.sharing_families);
        }

        let handle = unsafe { device.handle().create_image(&create_info, None) }?;

        Ok(Arc::new(Image {
            handle,
            device,
            params,
        }))
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    #[inline]
    pub fn params(&self) -> &ImageCreateParams {
        &self.params
    }

    pub fn memory_requirements(&self) -> vk::MemoryRequirements {
        unsafe { self.device.handle().get_image_memory_requirements(self.handle) }
    }

    pub fn sparse_memory_requirements(&self) -> Vec<vk::SparseImageMemoryRequirements> {
        unsafe {
            self.device
                .handle()
                .get_image_sparse_memory_requirements(self.handle)
        }
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_image(self.handle, None) };
    }
}

/// A non-sparse buffer with its own host-visible allocation, used to stage
/// uploads and read back results.
pub struct HostBuffer {
    buffer: Arc<Buffer>,
    memory: Arc<DeviceMemory>,
}

impl HostBuffer {
    pub fn new(
        device: Arc<Device>,
        size: DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<Self, VulkanError> {
        let buffer = Buffer::new(
            device.clone(),
            size,
            usage,
            vk::BufferCreateFlags::empty(),
            &[],
        )?;
        let requirements = buffer.memory_requirements();
        let memory =
            DeviceMemory::allocate_matching(device, &requirements, MemoryKind::HostVisible)?;
        buffer.bind_memory(&memory)?;

        Ok(HostBuffer { buffer, memory })
    }

    #[inline]
    pub fn buffer(&self) -> &Arc<Buffer> {
        &self.buffer
    }

    pub fn write(&self, data: &[u8]) -> Result<(), VulkanError> {
        self.memory.write(data)
    }

    pub fn read(&self, data: &mut [u8]) -> Result<(), VulkanError> {
        self.memory.read(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_level_extent_halves_and_clamps() {
        assert_eq!(
            mip_level_extent([512, 256, 1], 0, 10),
            Some([512, 256, 1]),
        );
        assert_eq!(mip_level_extent([512, 256, 1], 2, 10), Some([128, 64, 1]));
        assert_eq!(mip_level_extent([512, 256, 1], 9, 10), Some([1, 1, 1]));
        assert_eq!(mip_level_extent([512, 256, 1], 10, 10), None);
    }

    #[test]
    fn max_mip_levels_matches_largest_dimension() {
        assert_eq!(max_mip_levels([1, 1, 1]), 1);
        assert_eq!(max_mip_levels([512, 256, 1]), 10);
        assert_eq!(max_mip_levels([64, 64, 64]), 7);
        assert_eq!(max_mip_levels([100, 100, 1]), 7);
    }

    #[test]
    fn kind_layer_geometry() {
        assert_eq!(ImageKind::Dim1d.layer_extent([64, 32, 8]), [64, 1, 1]);
        assert_eq!(ImageKind::Dim2dArray.layer_extent([64, 32, 8]), [64, 32, 1]);
        assert_eq!(ImageKind::Dim3d.layer_extent([64, 32, 8]), [64, 32, 8]);

        assert_eq!(ImageKind::Dim2d.layer_count(6), 1);
        assert_eq!(ImageKind::Dim2dArray.layer_count(6), 6);
        assert_eq!(ImageKind::Cube.layer_count(6), 6);
        assert_eq!(ImageKind::CubeArray.layer_count(2), 12);
    }

    #[test]
    fn aspect_lookup_prefers_exact_match() {
        let color_only = vk::SparseImageMemoryRequirements {
            format_properties: vk::SparseImageFormatProperties {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                ..Default::default()
            },
            ..Default::default()
        };
        let combined = vk::SparseImageMemoryRequirements {
            format_properties: vk::SparseImageFormatProperties {
                aspect_mask: vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
                ..Default::default()
            },
            ..Default::default()
        };
        let requirements = [combined, color_only];

        let found = find_aspect_requirements(&requirements, vk::ImageAspectFlags::COLOR).unwrap();
        assert_eq!(found.format_properties.aspect_mask, vk::ImageAspectFlags::COLOR);

        let found = find_aspect_requirements(&requirements, vk::ImageAspectFlags::DEPTH).unwrap();
        assert!(found
            .format_properties
            .aspect_mask
            .contains(vk::ImageAspectFlags::STENCIL));

        assert!(find_aspect_requirements(&requirements, vk::ImageAspectFlags::PLANE_0).is_none());
    }
}
