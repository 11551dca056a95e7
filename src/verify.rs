//! Reference data generation and readback comparison.
//!
//! Buffer contents are verified byte for byte. Image contents are verified
//! texel for texel against a coordinate-derived pattern, with non-resident
//! blocks expected to read back as zero on strictly non-resident devices.

use crate::sparse::{BlockGrid, ResidencyPattern};

/// First differing byte of a buffer readback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mismatch {
    pub offset: usize,
    pub expected: u8,
    pub actual: u8,
}

pub fn compare_bytes(expected: &[u8], actual: &[u8]) -> Option<Mismatch> {
    debug_assert_eq!(expected.len(), actual.len());

    expected
        .iter()
        .zip(actual)
        .position(|(expected, actual)| expected != actual)
        .map(|offset| Mismatch {
            offset,
            expected: expected[offset],
            actual: actual[offset],
        })
}

/// The pattern written through a sparse buffer: each byte encodes its
/// position within its alignment unit.
pub fn reference_buffer_bytes(size: usize, alignment: usize) -> Vec<u8> {
    (0..size).map(|i| ((i % alignment) + 1) as u8).collect()
}

/// The pattern written to image texels, derived from the texel coordinate
/// so that every block has distinctive contents.
#[inline]
pub fn reference_texel(x: u32, y: u32, z: u32) -> [u8; 4] {
    [(x % 127) as u8, (y % 127) as u8, (z % 127) as u8, 1]
}

/// Texel offset within a tightly-packed RGBA8 readback of one mip level.
#[inline]
fn texel_offset(extent: [u32; 3], layer: u32, x: u32, y: u32, z: u32) -> usize {
    let [width, height, depth] = extent.map(|v| v as usize);
    (((layer as usize * depth + z as usize) * height + y as usize) * width + x as usize) * 4
}

/// Builds the full RGBA8 reference contents of one mip level across all
/// its layers.
pub fn build_level_reference(extent: [u32; 3], layers: u32) -> Vec<u8> {
    let mut data =
        vec![0u8; extent[0] as usize * extent[1] as usize * extent[2] as usize * layers as usize * 4];

    for layer in 0..layers {
        for z in 0..extent[2] {
            for y in 0..extent[1] {
                for x in 0..extent[0] {
                    let offset = texel_offset(extent, layer, x, y, z);
                    data[offset..offset + 4].copy_from_slice(&reference_texel(x, y, z));
                }
            }
        }
    }

    data
}

/// Compares two normalized-format readbacks channel by channel, allowing
/// each channel to differ by up to `tolerance` quantization steps. Integer
/// formats use [`compare_bytes`] instead; this exists for formats whose
/// write path rounds, such as UNORM colors produced from float sources.
pub fn compare_bytes_with_tolerance(
    expected: &[u8],
    actual: &[u8],
    tolerance: u8,
) -> Option<Mismatch> {
    debug_assert_eq!(expected.len(), actual.len());

    expected
        .iter()
        .zip(actual)
        .position(|(&expected, &actual)| expected.abs_diff(actual) > tolerance)
        .map(|offset| Mismatch {
            offset,
            expected: expected[offset],
            actual: actual[offset],
        })
}

/// First texel of an image readback that disagrees with the residency
/// expectations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TexelMismatch {
    pub layer: u32,
    pub position: [u32; 3],
    pub expected: [u8; 4],
    pub actual: [u8; 4],
}

/// Walks one mip level's readback and checks every texel against the bind
/// pattern. Texels in bound blocks must hold the reference pattern. Texels
/// in unbound blocks must read zero when `strict` (the device reports
/// `residencyNonResidentStrict`), and are skipped otherwise because their
/// contents are undefined.
pub fn compare_residency(
    data: &[u8],
    extent: [u32; 3],
    layers: u32,
    granularity: [u32; 3],
    pattern: ResidencyPattern,
    strict: bool,
) -> Option<TexelMismatch> {
    let texels: &[[u8; 4]] = bytemuck::cast_slice(data);
    let grid = BlockGrid::new(extent, granularity);
    let [nx, ny, _] = grid.num_blocks;

    for layer in 0..layers {
        let layer_base = layer * grid.block_count();

        for z in 0..extent[2] {
            for y in 0..extent[1] {
                for x in 0..extent[0] {
                    let linear_index = layer_base
                        + x / granularity[0]
                        + (y / granularity[1]) * nx
                        + (z / granularity[2]) * nx * ny;

                    let expected = if pattern.is_bound(linear_index) {
                        reference_texel(x, y, z)
                    } else if strict {
                        [0, 0, 0, 0]
                    } else {
                        continue;
                    };

                    let actual = texels[texel_offset(extent, layer, x, y, z) / 4];
                    if actual != expected {
                        return Some(TexelMismatch {
                            layer,
                            position: [x, y, z],
                            expected,
                            actual,
                        });
                    }
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_reference_repeats_per_alignment_unit() {
        let data = reference_buffer_bytes(8, 4);
        assert_eq!(data, vec![1, 2, 3, 4, 1, 2, 3, 4]);
    }

    #[test]
    fn compare_bytes_reports_the_first_difference() {
        let expected = [1u8, 2, 3, 4];
        let mut actual = expected;
        assert_eq!(compare_bytes(&expected, &actual), None);

        actual[2] = 9;
        assert_eq!(
            compare_bytes(&expected, &actual),
            Some(Mismatch {
                offset: 2,
                expected: 3,
                actual: 9,
            }),
        );
    }

    #[test]
    fn tolerance_compare_allows_rounding_error() {
        let expected = [10u8, 200, 0];
        let actual = [11u8, 199, 1];
        assert_eq!(compare_bytes_with_tolerance(&expected, &actual, 1), None);
        assert_eq!(
            compare_bytes_with_tolerance(&expected, &actual, 0),
            Some(Mismatch {
                offset: 0,
                expected: 10,
                actual: 11,
            }),
        );
    }

    #[test]
    fn texel_pattern_wraps_at_127() {
        assert_eq!(reference_texel(0, 0, 0), [0, 0, 0, 1]);
        assert_eq!(reference_texel(126, 127, 128), [126, 0, 1, 1]);
    }

    #[test]
    fn full_residency_accepts_its_own_reference() {
        let extent = [8, 4, 2];
        let data = build_level_reference(extent, 2);

        assert_eq!(
            compare_residency(&data, extent, 2, [4, 4, 1], ResidencyPattern::Full, true),
            None,
        );
    }

    #[test]
    fn partial_residency_expects_zeros_in_unbound_blocks() {
        let extent = [8, 4, 1];
        let granularity = [4, 4, 1];
        // Block 0 holds the pattern, block 1 reads zero.
        let mut data = build_level_reference(extent, 1);
        for y in 0..4 {
            for x in 4..8 {
                let offset = (y * 8 + x) * 4;
                data[offset..offset + 4].fill(0);
            }
        }

        assert_eq!(
            compare_residency(
                &data,
                extent,
                1,
                granularity,
                ResidencyPattern::EveryOtherBlock,
                true,
            ),
            None,
        );

        // On a non-strict device the unbound block contents are ignored.
        data[4 * 4] = 0xab;
        assert_eq!(
            compare_residency(
                &data,
                extent,
                1,
                granularity,
                ResidencyPattern::EveryOtherBlock,
                false,
            ),
            None,
        );

        let mismatch = compare_residency(
            &data,
            extent,
            1,
            granularity,
            ResidencyPattern::EveryOtherBlock,
            true,
        )
        .unwrap();
        assert_eq!(mismatch.position, [4, 0, 0]);
        assert_eq!(mismatch.actual, [0xab, 0, 0, 0]);
    }

    #[test]
    fn bound_block_mismatch_is_reported_with_its_coordinate() {
        let extent = [4, 4, 1];
        let mut data = build_level_reference(extent, 1);
        let offset = (2 * 4 + 1) * 4;
        data[offset] ^= 0xff;

        let mismatch =
            compare_residency(&data, extent, 1, [4, 4, 1], ResidencyPattern::Full, true).unwrap();
        assert_eq!(mismatch.layer, 0);
        assert_eq!(mismatch.position, [1, 2, 0]);
        assert_eq!(mismatch.expected, reference_texel(1, 2, 0));
    }
}
