//! Checks of reported sparse-image metadata against what the device
//! properties say it must be.

use crate::resource::mip_level_extent;
use ash::vk;

/// The standard sparse block extent mandated for a texel size, image type
/// and sample count, or `None` when no standard shape exists for the
/// combination.
pub fn standard_block_shape(
    pixel_size_bits: u32,
    image_type: vk::ImageType,
    samples: vk::SampleCountFlags,
) -> Option<[u32; 3]> {
    match image_type {
        vk::ImageType::TYPE_2D => match samples {
            vk::SampleCountFlags::TYPE_1 => match pixel_size_bits {
                8 => Some([256, 256, 1]),
                16 => Some([256, 128, 1]),
                32 => Some([128, 128, 1]),
                64 => Some([128, 64, 1]),
                128 => Some([64, 64, 1]),
                _ => None,
            },
            vk::SampleCountFlags::TYPE_2 => match pixel_size_bits {
                8 => Some([128, 256, 1]),
                16 => Some([128, 128, 1]),
                32 => Some([64, 128, 1]),
                64 => Some([64, 64, 1]),
                128 => Some([32, 64, 1]),
                _ => None,
            },
            vk::SampleCountFlags::TYPE_4 => match pixel_size_bits {
                8 => Some([128, 128, 1]),
                16 => Some([128, 64, 1]),
                32 => Some([64, 64, 1]),
                64 => Some([64, 32, 1]),
                128 => Some([32, 32, 1]),
                _ => None,
            },
            vk::SampleCountFlags::TYPE_8 => match pixel_size_bits {
                8 => Some([64, 128, 1]),
                16 => Some([64, 64, 1]),
                32 => Some([32, 64, 1]),
                64 => Some([32, 32, 1]),
                128 => Some([16, 32, 1]),
                _ => None,
            },
            vk::SampleCountFlags::TYPE_16 => match pixel_size_bits {
                8 => Some([64, 64, 1]),
                16 => Some([64, 32, 1]),
                32 => Some([32, 32, 1]),
                64 => Some([32, 16, 1]),
                128 => Some([16, 16, 1]),
                _ => None,
            },
            _ => None,
        },
        vk::ImageType::TYPE_3D if samples == vk::SampleCountFlags::TYPE_1 => {
            match pixel_size_bits {
                8 => Some([64, 32, 32]),
                16 => Some([32, 32, 32]),
                32 => Some([32, 32, 16]),
                64 => Some([32, 16, 16]),
                128 => Some([16, 16, 16]),
                _ => None,
            }
        }
        _ => None,
    }
}

/// The standard block extent for a block-compressed format, in texels.
///
/// For compressed formats the table in [`standard_block_shape`] is keyed by
/// the bits per compressed texel block and gives the block extent in
/// compressed blocks, so the texel extent scales by the block footprint.
pub fn compressed_standard_block_shape(
    block_size_bits: u32,
    block_extent: [u32; 2],
    image_type: vk::ImageType,
    samples: vk::SampleCountFlags,
) -> Option<[u32; 3]> {
    let shape = standard_block_shape(block_size_bits, image_type, samples)?;
    Some([
        shape[0] * block_extent[0],
        shape[1] * block_extent[1],
        shape[2],
    ])
}

/// Whether the device promises standard block shapes for this image type
/// and sample count.
pub fn standard_shape_mandated(
    sparse_properties: &vk::PhysicalDeviceSparseProperties,
    image_type: vk::ImageType,
    samples: vk::SampleCountFlags,
) -> bool {
    match image_type {
        vk::ImageType::TYPE_2D if samples == vk::SampleCountFlags::TYPE_1 => {
            sparse_properties.residency_standard2_d_block_shape != 0
        }
        vk::ImageType::TYPE_2D => {
            sparse_properties.residency_standard2_d_multisample_block_shape != 0
        }
        vk::ImageType::TYPE_3D => sparse_properties.residency_standard3_d_block_shape != 0,
        _ => false,
    }
}

/// Outcome of comparing a reported granularity against the standard shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShapeCheck {
    /// The device does not promise a standard shape here, so any reported
    /// granularity is acceptable.
    NotMandated,
    Matches,
    Mismatch {
        expected: [u32; 3],
        reported: [u32; 3],
    },
}

pub fn check_standard_block_shape(
    sparse_properties: &vk::PhysicalDeviceSparseProperties,
    image_type: vk::ImageType,
    samples: vk::SampleCountFlags,
    pixel_size_bits: u32,
    reported: [u32; 3],
) -> ShapeCheck {
    if !standard_shape_mandated(sparse_properties, image_type, samples) {
        return ShapeCheck::NotMandated;
    }
    let Some(expected) = standard_block_shape(pixel_size_bits, image_type, samples) else {
        return ShapeCheck::NotMandated;
    };

    if expected == reported {
        ShapeCheck::Matches
    } else {
        ShapeCheck::Mismatch { expected, reported }
    }
}

/// The level at which the mip tail must begin when mip sizes need not be
/// block aligned: the first level smaller than the block on any axis. A
/// chain that reaches 1x1x1 without such a level ends in the tail at that
/// terminal level; a chain cut short of 1x1x1 has no tail and the boundary
/// is `mip_levels`.
pub fn expected_mip_tail_first_lod(
    layer_extent: [u32; 3],
    granularity: [u32; 3],
    mip_levels: u32,
) -> u32 {
    for level in 0..mip_levels {
        let extent = mip_level_extent(layer_extent, level, mip_levels).unwrap();
        if (0..3).any(|axis| extent[axis] < granularity[axis]) {
            return level;
        }
    }

    terminal_lod(layer_extent, mip_levels)
}

/// The level the mip tail must begin at under `ALIGNED_MIP_SIZE`: the first
/// level whose extent is not a whole number of blocks, with the same
/// terminal-level rule as [`expected_mip_tail_first_lod`].
fn first_unaligned_lod(layer_extent: [u32; 3], granularity: [u32; 3], mip_levels: u32) -> u32 {
    for level in 0..mip_levels {
        let extent = mip_level_extent(layer_extent, level, mip_levels).unwrap();
        if (0..3).any(|axis| extent[axis] % granularity[axis] != 0) {
            return level;
        }
    }

    terminal_lod(layer_extent, mip_levels)
}

fn terminal_lod(layer_extent: [u32; 3], mip_levels: u32) -> u32 {
    match mip_level_extent(layer_extent, mip_levels.saturating_sub(1), mip_levels) {
        Some([1, 1, 1]) => mip_levels - 1,
        _ => mip_levels,
    }
}

/// Cross-checks one aspect's sparse requirements against the device's
/// sparse properties and the image geometry. Returns one finding per
/// violated rule; an empty list means the metadata is consistent.
pub fn validate_sparse_requirements(
    sparse_properties: &vk::PhysicalDeviceSparseProperties,
    requirements: &vk::SparseImageMemoryRequirements,
    layer_extent: [u32; 3],
    mip_levels: u32,
    array_layers: u32,
) -> Vec<String> {
    let mut findings = Vec::new();

    let granularity_vk = requirements.format_properties.image_granularity;
    let granularity = [
        granularity_vk.width,
        granularity_vk.height,
        granularity_vk.depth,
    ];
    if granularity.contains(&0) {
        findings.push(format!("image granularity has a zero component: {granularity:?}"));
        return findings;
    }

    let flags = requirements.format_properties.flags;
    let first_lod = requirements.image_mip_tail_first_lod;

    if first_lod > mip_levels {
        findings.push(format!(
            "mip tail first lod {first_lod} exceeds mip level count {mip_levels}"
        ));
    }

    let aligned_mip_size = flags.contains(vk::SparseImageFormatFlags::ALIGNED_MIP_SIZE);
    if aligned_mip_size && sparse_properties.residency_aligned_mip_size == 0 {
        findings.push(
            "ALIGNED_MIP_SIZE reported on a device that does not advertise \
             residencyAlignedMipSize"
                .to_owned(),
        );
    }

    let expected_first_lod = if aligned_mip_size {
        first_unaligned_lod(layer_extent, granularity, mip_levels)
    } else {
        expected_mip_tail_first_lod(layer_extent, granularity, mip_levels)
    };
    if first_lod != expected_first_lod {
        let boundary = if aligned_mip_size {
            "the first level that is not a whole number of blocks"
        } else {
            "the first level smaller than the block"
        };
        findings.push(format!(
            "mip tail first lod {first_lod} does not start at {boundary}, \
             expected {expected_first_lod}"
        ));
    }

    let has_tail = first_lod < mip_levels;
    if has_tail && requirements.image_mip_tail_size == 0 {
        findings.push("mip tail covers levels but has zero size".to_owned());
    }
    if has_tail
        && array_layers > 1
        && !flags.contains(vk::SparseImageFormatFlags::SINGLE_MIPTAIL)
        && requirements.image_mip_tail_stride == 0
    {
        findings.push("per-layer mip tail on an arrayed image has zero stride".to_owned());
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(
        standard_2d: bool,
        standard_2d_ms: bool,
        standard_3d: bool,
        aligned_mip: bool,
    ) -> vk::PhysicalDeviceSparseProperties {
        vk::PhysicalDeviceSparseProperties {
            residency_standard2_d_block_shape: standard_2d as u32,
            residency_standard2_d_multisample_block_shape: standard_2d_ms as u32,
            residency_standard3_d_block_shape: standard_3d as u32,
            residency_aligned_mip_size: aligned_mip as u32,
            residency_non_resident_strict: 0,
        }
    }

    fn requirements(
        granularity: [u32; 3],
        first_lod: u32,
        tail_size: u64,
        tail_stride: u64,
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
            image_mip_tail_offset: 0,
            image_mip_tail_size: tail_size,
            image_mip_tail_stride: tail_stride,
        }
    }

    #[test]
    fn standard_shapes_cover_known_texel_sizes() {
        assert_eq!(
            standard_block_shape(32, vk::ImageType::TYPE_2D, vk::SampleCountFlags::TYPE_1),
            Some([128, 128, 1]),
        );
        assert_eq!(
            standard_block_shape(128, vk::ImageType::TYPE_2D, vk::SampleCountFlags::TYPE_16),
            Some([16, 16, 1]),
        );
        assert_eq!(
            standard_block_shape(8, vk::ImageType::TYPE_3D, vk::SampleCountFlags::TYPE_1),
            Some([64, 32, 32]),
        );
        assert_eq!(
            standard_block_shape(24, vk::ImageType::TYPE_2D, vk::SampleCountFlags::TYPE_1),
            None,
        );
        assert_eq!(
            standard_block_shape(32, vk::ImageType::TYPE_3D, vk::SampleCountFlags::TYPE_4),
            None,
        );
        assert_eq!(
            standard_block_shape(32, vk::ImageType::TYPE_1D, vk::SampleCountFlags::TYPE_1),
            None,
        );
    }

    #[test]
    fn shape_check_honors_the_property_gate() {
        let without = properties(false, false, false, false);
        assert_eq!(
            check_standard_block_shape(
                &without,
                vk::ImageType::TYPE_2D,
                vk::SampleCountFlags::TYPE_1,
                32,
                [64, 64, 1],
            ),
            ShapeCheck::NotMandated,
        );

        let with = properties(true, false, false, false);
        assert_eq!(
            check_standard_block_shape(
                &with,
                vk::ImageType::TYPE_2D,
                vk::SampleCountFlags::TYPE_1,
                32,
                [128, 128, 1],
            ),
            ShapeCheck::Matches,
        );
        assert_eq!(
            check_standard_block_shape(
                &with,
                vk::ImageType::TYPE_2D,
                vk::SampleCountFlags::TYPE_1,
                32,
                [64, 64, 1],
            ),
            ShapeCheck::Mismatch {
                expected: [128, 128, 1],
                reported: [64, 64, 1],
            },
        );
    }

    #[test]
    fn expected_first_lod_finds_the_first_small_level() {
        // 512 -> 256 -> 128 -> 64: level 3 drops below a 128 block.
        assert_eq!(
            expected_mip_tail_first_lod([512, 512, 1], [128, 128, 1], 10),
            3,
        );
        // Never smaller than the block within the chain length.
        assert_eq!(
            expected_mip_tail_first_lod([512, 512, 1], [128, 128, 1], 2),
            2,
        );
        // Smaller than the block from level zero.
        assert_eq!(expected_mip_tail_first_lod([64, 64, 1], [128, 128, 1], 7), 0);
    }

    #[test]
    fn expected_first_lod_ends_at_the_terminal_level() {
        // With a 1x1x1 block no level is ever smaller, so the tail starts
        // at the 1x1x1 level the full chain ends in.
        assert_eq!(expected_mip_tail_first_lod([8, 8, 1], [1, 1, 1], 4), 3);
        // A chain cut short of 1x1x1 has no tail at all.
        assert_eq!(expected_mip_tail_first_lod([8, 8, 1], [1, 1, 1], 2), 2);
    }

    #[test]
    fn compressed_shapes_scale_by_the_block_footprint() {
        // 64 bits per 4x4 block, as in BC1.
        assert_eq!(
            compressed_standard_block_shape(
                64,
                [4, 4],
                vk::ImageType::TYPE_2D,
                vk::SampleCountFlags::TYPE_1,
            ),
            Some([512, 256, 1]),
        );
        assert_eq!(
            compressed_standard_block_shape(
                96,
                [4, 4],
                vk::ImageType::TYPE_2D,
                vk::SampleCountFlags::TYPE_1,
            ),
            None,
        );
    }

    #[test]
    fn validation_accepts_consistent_metadata() {
        let props = properties(true, false, false, false);
        let reqs = requirements(
            [128, 128, 1],
            3,
            65536,
            65536,
            vk::SparseImageFormatFlags::empty(),
        );

        let findings = validate_sparse_requirements(&props, &reqs, [512, 512, 1], 10, 1);
        assert!(findings.is_empty(), "{findings:?}");
    }

    #[test]
    fn validation_flags_aligned_mip_size_without_the_property() {
        let props = properties(true, false, false, false);
        let reqs = requirements(
            [128, 128, 1],
            2,
            65536,
            65536,
            vk::SparseImageFormatFlags::ALIGNED_MIP_SIZE,
        );

        let findings = validate_sparse_requirements(&props, &reqs, [512, 512, 1], 10, 1);
        assert!(findings
            .iter()
            .any(|f| f.contains("residencyAlignedMipSize")));
    }

    #[test]
    fn validation_requires_aligned_tail_at_the_first_partial_level() {
        // 300 is not a whole number of 128 blocks, so under ALIGNED_MIP_SIZE
        // the tail must start at level zero; a later start is a violation
        // even though level 2 is where the extent first drops below the
        // block.
        let props = properties(true, false, false, true);
        let reqs = requirements(
            [128, 128, 1],
            2,
            65536,
            65536,
            vk::SparseImageFormatFlags::ALIGNED_MIP_SIZE,
        );

        let findings = validate_sparse_requirements(&props, &reqs, [300, 300, 1], 9, 1);
        assert!(
            findings
                .iter()
                .any(|f| f.contains("whole number of blocks") && f.contains("expected 0")),
            "{findings:?}",
        );
    }

    #[test]
    fn validation_flags_a_late_mip_tail() {
        let props = properties(true, false, false, true);
        let reqs = requirements(
            [128, 128, 1],
            5,
            65536,
            65536,
            vk::SparseImageFormatFlags::empty(),
        );

        let findings = validate_sparse_requirements(&props, &reqs, [512, 512, 1], 10, 1);
        assert!(findings.iter().any(|f| f.contains("first level smaller")));
    }

    #[test]
    fn validation_flags_missing_stride_on_arrays() {
        let props = properties(true, false, false, false);
        let reqs = requirements(
            [128, 128, 1],
            3,
            65536,
            0,
            vk::SparseImageFormatFlags::empty(),
        );

        let findings = validate_sparse_requirements(&props, &reqs, [512, 512, 1], 10, 4);
        assert!(findings.iter().any(|f| f.contains("zero stride")));
    }

    #[test]
    fn validation_flags_zero_granularity() {
        let props = properties(true, false, false, false);
        let reqs = requirements(
            [128, 0, 1],
            3,
            65536,
            65536,
            vk::SparseImageFormatFlags::empty(),
        );

        let findings = validate_sparse_requirements(&props, &reqs, [512, 512, 1], 10, 1);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].contains("zero component"));
    }
}
