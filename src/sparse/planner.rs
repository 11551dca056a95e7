//! Pure planning of sparse bind regions from resource geometry.

use crate::{
    device::Device,
    memory::sparse::{SparseImageMemoryBind, SparseMemoryBind},
    memory::DeviceMemory,
    DeviceSize, VulkanError,
};
use ash::vk;
use std::sync::Arc;

/// Integer division rounding up.
#[inline]
pub fn aligned_divide(value: u32, divisor: u32) -> u32 {
    debug_assert!(divisor > 0);

    (value + divisor - 1) / divisor
}

/// How a mip level's extent decomposes into sparse blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockGrid {
    /// Block count along each axis, counting the partial boundary block.
    pub num_blocks: [u32; 3],
    /// Extent of the last block along each axis. Equals the granularity on
    /// axes the extent divides evenly.
    pub boundary_extent: [u32; 3],
}

impl BlockGrid {
    pub fn new(extent: [u32; 3], granularity: [u32; 3]) -> Self {
        let mut num_blocks = [0; 3];
        let mut boundary_extent = [0; 3];

        for axis in 0..3 {
            num_blocks[axis] = aligned_divide(extent[axis], granularity[axis]);
            let remainder = extent[axis] % granularity[axis];
            boundary_extent[axis] = if remainder != 0 {
                remainder
            } else {
                granularity[axis]
            };
        }

        BlockGrid {
            num_blocks,
            boundary_extent,
        }
    }

    pub fn block_count(&self) -> u32 {
        self.num_blocks[0] * self.num_blocks[1] * self.num_blocks[2]
    }
}

/// A contiguous opaque range of a resource to bind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpaqueBindRegion {
    pub resource_offset: DeviceSize,
    pub size: DeviceSize,
    pub metadata: bool,
}

/// One sparse block of one image subresource to bind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockBindRegion {
    pub mip_level: u32,
    pub array_layer: u32,
    /// Block origin in texels.
    pub offset: [u32; 3],
    /// Block extent in texels, clipped to the mip level's extent.
    pub extent: [u32; 3],
    /// Position in the x-then-y-then-z-then-layer walk over all blocks of
    /// the mip level, offset by the layer's block count.
    pub linear_index: u32,
}

/// Which blocks of the grid get backing memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResidencyPattern {
    /// Every block is bound.
    Full,
    /// Only blocks with an even linear index are bound, leaving a
    /// checkerboard of unbacked blocks.
    EveryOtherBlock,
}

impl ResidencyPattern {
    pub fn is_bound(self, linear_index: u32) -> bool {
        match self {
            ResidencyPattern::Full => true,
            ResidencyPattern::EveryOtherBlock => linear_index % 2 == 0,
        }
    }
}

/// Splits a fully-resident sparse buffer into one region per alignment unit.
pub fn plan_buffer_binds(size: DeviceSize, alignment: DeviceSize) -> Vec<OpaqueBindRegion> {
    debug_assert!(alignment > 0 && size % alignment == 0);

    (0..size / alignment)
        .map(|index| OpaqueBindRegion {
            resource_offset: index * alignment,
            size: alignment,
            metadata: false,
        })
        .collect()
}

/// The block and mip-tail regions of one image aspect.
#[derive(Clone, Debug, Default)]
pub struct ImageBindPlan {
    pub block_binds: Vec<BlockBindRegion>,
    pub opaque_binds: Vec<OpaqueBindRegion>,
}

/// Walks every layer and every mip level below the mip tail, emitting one
/// region per sparse block selected by `pattern`, then one opaque region per
/// mip tail instance.
pub fn plan_image_binds(
    layer_extent: [u32; 3],
    array_layers: u32,
    mip_levels: u32,
    requirements: &vk::SparseImageMemoryRequirements,
    pattern: ResidencyPattern,
) -> ImageBindPlan {
    let granularity = requirements.format_properties.image_granularity;
    let granularity = [granularity.width, granularity.height, granularity.depth];
    let mip_tail_first_lod = requirements.image_mip_tail_first_lod.min(mip_levels);

    let mut plan = ImageBindPlan::default();

    for layer in 0..array_layers {
        for mip_level in 0..mip_tail_first_lod {
            let extent =
                crate::resource::mip_level_extent(layer_extent, mip_level, mip_levels).unwrap();
            let grid = BlockGrid::new(extent, granularity);
            let [nx, ny, nz] = grid.num_blocks;
            let layer_base = layer * grid.block_count();

            for z in 0..nz {
                for y in 0..ny {
                    for x in 0..nx {
                        let linear_index = layer_base + x + y * nx + z * nx * ny;
                        if !pattern.is_bound(linear_index) {
                            continue;
                        }

                        let block = [x, y, z];
                        let mut block_extent = granularity;
                        for axis in 0..3 {
                            if block[axis] == grid.num_blocks[axis] - 1 {
                                block_extent[axis] = grid.boundary_extent[axis];
                            }
                        }

                        plan.block_binds.push(BlockBindRegion {
                            mip_level,
                            array_layer: layer,
                            offset: [
                                x * granularity[0],
                                y * granularity[1],
                                z * granularity[2],
                            ],
                            extent: block_extent,
                            linear_index,
                        });
                    }
                }
            }
        }
    }

    if mip_tail_first_lod < mip_levels && requirements.image_mip_tail_size > 0 {
        let single_miptail = requirements
            .format_properties
            .flags
            .contains(vk::SparseImageFormatFlags::SINGLE_MIPTAIL);

        if single_miptail {
            plan.opaque_binds.push(OpaqueBindRegion {
                resource_offset: requirements.image_mip_tail_offset,
                size: requirements.image_mip_tail_size,
                metadata: false,
            });
        } else {
            for layer in 0..array_layers {
                plan.opaque_binds.push(OpaqueBindRegion {
                    resource_offset: requirements.image_mip_tail_offset
                        + layer as DeviceSize * requirements.image_mip_tail_stride,
                    size: requirements.image_mip_tail_size,
                    metadata: false,
                });
            }
        }
    }

    plan
}

/// The opaque regions covering an image's metadata mip tail, flagged so
/// that materialization emits metadata binds.
pub fn plan_metadata_binds(
    requirements: &vk::SparseImageMemoryRequirements,
    array_layers: u32,
) -> Vec<OpaqueBindRegion> {
    if requirements.image_mip_tail_size == 0 {
        return Vec::new();
    }

    let single_miptail = requirements
        .format_properties
        .flags
        .contains(vk::SparseImageFormatFlags::SINGLE_MIPTAIL);
    let instances = if single_miptail { 1 } else { array_layers };

    (0..instances)
        .map(|layer| OpaqueBindRegion {
            resource_offset: requirements.image_mip_tail_offset
                + layer as DeviceSize * requirements.image_mip_tail_stride,
            size: requirements.image_mip_tail_size,
            metadata: true,
        })
        .collect()
}

/// Backs each buffer region with its own allocation.
pub fn materialize_buffer_binds(
    device: &Arc<Device>,
    regions: &[OpaqueBindRegion],
    memory_type_index: u32,
) -> Result<(Vec<SparseMemoryBind>, Vec<Arc<DeviceMemory>>), VulkanError> {
    let mut binds = Vec::with_capacity(regions.len());
    let mut allocations = Vec::with_capacity(regions.len());

    for region in regions {
        let memory = DeviceMemory::allocate(device.clone(), region.size, memory_type_index)?;
        allocations.push(memory.clone());

        let flags = if region.metadata {
            vk::SparseMemoryBindFlags::METADATA
        } else {
            vk::SparseMemoryBindFlags::empty()
        };
        binds.push(SparseMemoryBind {
            resource_offset: region.resource_offset,
            size: region.size,
            memory: Some((memory, 0)),
            flags,
        });
    }

    Ok((binds, allocations))
}

/// Backs each block region with its own allocation of `block_size` bytes.
/// `block_size` is the image's reported memory alignment, which for sparse
/// images equals the byte size of one sparse block.
pub fn materialize_block_binds(
    device: &Arc<Device>,
    aspect: vk::ImageAspectFlags,
    regions: &[BlockBindRegion],
    block_size: DeviceSize,
    memory_type_index: u32,
) -> Result<(Vec<SparseImageMemoryBind>, Vec<Arc<DeviceMemory>>), VulkanError> {
    let mut binds = Vec::with_capacity(regions.len());
    let mut allocations = Vec::with_capacity(regions.len());

    for region in regions {
        let memory = DeviceMemory::allocate(device.clone(), block_size, memory_type_index)?;
        allocations.push(memory.clone());

        binds.push(SparseImageMemoryBind {
            subresource: vk::ImageSubresource {
                aspect_mask: aspect,
                mip_level: region.mip_level,
                array_layer: region.array_layer,
            },
            offset: [
                region.offset[0] as i32,
                region.offset[1] as i32,
                region.offset[2] as i32,
            ],
            extent: region.extent,
            memory: Some((memory, 0)),
            flags: vk::SparseMemoryBindFlags::empty(),
        });
    }

    Ok((binds, allocations))
}

/// Backs opaque regions, used for mip tails and fully-opaque image binds.
pub fn materialize_opaque_binds(
    device: &Arc<Device>,
    regions: &[OpaqueBindRegion],
    memory_type_index: u32,
) -> Result<(Vec<SparseMemoryBind>, Vec<Arc<DeviceMemory>>), VulkanError> {
    materialize_buffer_binds(device, regions, memory_type_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requirements(
        granularity: [u32; 3],
        first_lod: u32,
        tail_offset: DeviceSize,
        tail_size: DeviceSize,
        tail_stride: DeviceSize,
        flags: vk::SparseImageFormatFlags,
    ) -> vk::SparseImageMemoryRequirements {
        vk::SparseImageMemoryRequirements {
            format_properties: vk::SparseImageFormatProperties {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                image_granularity: vk::Extent3D {
                    width: granularity[0],
                    height: granularity[1],
                    depth: granularity[2],
                },
                flags,
            },
            image_mip_tail_first_lod: first_lod,
            image_mip_tail_offset: tail_offset,
            image_mip_tail_size: tail_size,
            image_mip_tail_stride: tail_stride,
        }
    }

    #[test]
    fn block_grid_counts_partial_blocks() {
        let grid = BlockGrid::new([300, 128, 1], [128, 128, 1]);
        assert_eq!(grid.num_blocks, [3, 1, 1]);
        assert_eq!(grid.boundary_extent, [44, 128, 1]);
        assert_eq!(grid.block_count(), 3);
    }

    #[test]
    fn buffer_plan_tiles_the_whole_size() {
        let regions = plan_buffer_binds(4096, 1024);
        assert_eq!(regions.len(), 4);
        assert_eq!(regions[0].resource_offset, 0);
        assert_eq!(regions[3].resource_offset, 3072);
        assert!(regions.iter().all(|r| r.size == 1024 && !r.metadata));
    }

    #[test]
    fn image_plan_clips_boundary_blocks() {
        let reqs = requirements(
            [128, 128, 1],
            1,
            0,
            0,
            0,
            vk::SparseImageFormatFlags::empty(),
        );
        let plan = plan_image_binds([300, 200, 1], 1, 1, &reqs, ResidencyPattern::Full);

        // 3 x 2 grid of blocks, nothing below the mip tail.
        assert_eq!(plan.block_binds.len(), 6);
        assert!(plan.opaque_binds.is_empty());

        let corner = plan
            .block_binds
            .iter()
            .find(|b| b.offset == [256, 128, 0])
            .unwrap();
        assert_eq!(corner.extent, [44, 72, 1]);
        assert_eq!(corner.linear_index, 5);

        let interior = plan
            .block_binds
            .iter()
            .find(|b| b.offset == [0, 0, 0])
            .unwrap();
        assert_eq!(interior.extent, [128, 128, 1]);
    }

    #[test]
    fn image_plan_skips_odd_blocks() {
        let reqs = requirements(
            [64, 64, 1],
            1,
            0,
            0,
            0,
            vk::SparseImageFormatFlags::empty(),
        );
        let plan = plan_image_binds([256, 64, 1], 1, 1, &reqs, ResidencyPattern::EveryOtherBlock);

        let indices: Vec<u32> = plan.block_binds.iter().map(|b| b.linear_index).collect();
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn image_plan_offsets_linear_index_per_layer() {
        let reqs = requirements(
            [64, 64, 1],
            1,
            0,
            0,
            0,
            vk::SparseImageFormatFlags::empty(),
        );
        let plan = plan_image_binds([128, 64, 1], 2, 1, &reqs, ResidencyPattern::EveryOtherBlock);

        // Layer 0 has blocks 0 and 1, layer 1 has blocks 2 and 3. The even
        // ones span both layers.
        assert_eq!(plan.block_binds.len(), 2);
        assert_eq!(plan.block_binds[0].array_layer, 0);
        assert_eq!(plan.block_binds[0].linear_index, 0);
        assert_eq!(plan.block_binds[1].array_layer, 1);
        assert_eq!(plan.block_binds[1].linear_index, 2);
    }

    #[test]
    fn mip_tail_is_bound_per_layer_by_default() {
        let reqs = requirements(
            [128, 128, 1],
            2,
            1 << 20,
            65536,
            1 << 16,
            vk::SparseImageFormatFlags::empty(),
        );
        let plan = plan_image_binds([512, 512, 1], 3, 10, &reqs, ResidencyPattern::Full);

        assert_eq!(plan.opaque_binds.len(), 3);
        assert_eq!(plan.opaque_binds[0].resource_offset, 1 << 20);
        assert_eq!(plan.opaque_binds[1].resource_offset, (1 << 20) + (1 << 16));
        assert!(plan.opaque_binds.iter().all(|r| r.size == 65536));
    }

    #[test]
    fn single_miptail_gets_one_region() {
        let reqs = requirements(
            [128, 128, 1],
            2,
            1 << 20,
            65536,
            0,
            vk::SparseImageFormatFlags::SINGLE_MIPTAIL,
        );
        let plan = plan_image_binds([512, 512, 1], 6, 10, &reqs, ResidencyPattern::Full);

        assert_eq!(plan.opaque_binds.len(), 1);
        assert_eq!(
            plan.opaque_binds[0],
            OpaqueBindRegion {
                resource_offset: 1 << 20,
                size: 65536,
                metadata: false,
            },
        );
    }

    #[test]
    fn metadata_regions_are_flagged_and_strided_per_layer() {
        let reqs = vk::SparseImageMemoryRequirements {
            format_properties: vk::SparseImageFormatProperties {
                aspect_mask: vk::ImageAspectFlags::METADATA,
                image_granularity: vk::Extent3D {
                    width: 128,
                    height: 128,
                    depth: 1,
                },
                flags: vk::SparseImageFormatFlags::empty(),
            },
            image_mip_tail_first_lod: 0,
            image_mip_tail_offset: 1 << 20,
            image_mip_tail_size: 65536,
            image_mip_tail_stride: 1 << 16,
        };

        let regions = plan_metadata_binds(&reqs, 2);
        assert_eq!(regions.len(), 2);
        assert!(regions.iter().all(|r| r.metadata && r.size == 65536));
        assert_eq!(regions[0].resource_offset, 1 << 20);
        assert_eq!(regions[1].resource_offset, (1 << 20) + (1 << 16));

        let single = vk::SparseImageMemoryRequirements {
            format_properties: vk::SparseImageFormatProperties {
                flags: vk::SparseImageFormatFlags::SINGLE_MIPTAIL,
                ..reqs.format_properties
            },
            ..reqs
        };
        assert_eq!(plan_metadata_binds(&single, 2).len(), 1);
    }

    #[test]
    fn first_lod_zero_means_everything_is_tail() {
        let reqs = requirements(
            [128, 128, 1],
            0,
            0,
            1 << 21,
            0,
            vk::SparseImageFormatFlags::SINGLE_MIPTAIL,
        );
        let plan = plan_image_binds([512, 512, 1], 1, 10, &reqs, ResidencyPattern::Full);

        assert!(plan.block_binds.is_empty());
        assert_eq!(plan.opaque_binds.len(), 1);
    }
}
