//! Full mip chain residency: metadata validation plus an exact round trip.
//!
//! The image carries its complete mip chain. The reported sparse metadata
//! is cross-checked against the device's sparse properties, including the
//! standard block shape when the device mandates one. Every level below the
//! mip tail is then fully backed block by block, the tail and any metadata
//! aspect are bound opaquely, and each level must round-trip byte for byte.

use crate::{
    cases::{
        image::{prepare_image, run_round_trip, ImageCaseParams},
        CASE_FORMAT_BITS,
    },
    instance::Instance,
    memory::{
        find_matching_memory_type,
        sparse::{BindSparseInfo, SparseImageMemoryBindInfo, SparseImageOpaqueMemoryBindInfo},
        MemoryKind,
    },
    resource::find_aspect_requirements,
    sparse::{
        check_standard_block_shape, materialize_block_binds, materialize_opaque_binds,
        plan_image_binds, plan_metadata_binds, validate_sparse_requirements, ResidencyPattern,
        ShapeCheck,
    },
    verify::{build_level_reference, compare_bytes},
    TestStatus, VulkanError,
};
use ash::vk;
use std::sync::Arc;

pub fn run(
    instance: &Arc<Instance>,
    case_params: &ImageCaseParams,
) -> Result<TestStatus, VulkanError> {
    let prepared = match prepare_image(instance, case_params, true)? {
        Ok(prepared) => prepared,
        Err(status) => return Ok(status),
    };
    let device = prepared.context.device();
    let params = prepared.image.params();
    let array_layers = params.array_layers;
    let mip_levels = params.mip_levels;
    let layer_extent = params.extent;

    let sparse_properties = &device.properties().sparse_properties;
    let sparse_requirements = prepared.image.sparse_memory_requirements();
    if sparse_requirements.is_empty() {
        return Ok(TestStatus::fail("no sparse memory requirements reported"));
    }

    let mut findings = Vec::new();
    for aspect_requirements in &sparse_requirements {
        findings.extend(validate_sparse_requirements(
            sparse_properties,
            aspect_requirements,
            layer_extent,
            mip_levels,
            array_layers,
        ));
    }
    if !findings.is_empty() {
        return Ok(TestStatus::fail(findings.join("; ")));
    }

    let Some(aspect_requirements) =
        find_aspect_requirements(&sparse_requirements, vk::ImageAspectFlags::COLOR)
    else {
        return Ok(TestStatus::fail(
            "no sparse requirements reported for the color aspect",
        ));
    };

    let granularity_vk = aspect_requirements.format_properties.image_granularity;
    let granularity = [
        granularity_vk.width,
        granularity_vk.height,
        granularity_vk.depth,
    ];
    if let ShapeCheck::Mismatch { expected, reported } = check_standard_block_shape(
        sparse_properties,
        params.image_type,
        params.samples,
        CASE_FORMAT_BITS,
        granularity,
    ) {
        return Ok(TestStatus::fail(format!(
            "granularity {reported:?} differs from the mandated standard block shape {expected:?}"
        )));
    }

    let memory_requirements = prepared.image.memory_requirements();
    if !crate::is_aligned(aspect_requirements.image_mip_tail_size, memory_requirements.alignment) {
        return Ok(TestStatus::fail(format!(
            "mip tail size {} is not a multiple of the image alignment {}",
            aspect_requirements.image_mip_tail_size, memory_requirements.alignment
        )));
    }
    let Some(memory_type_index) = find_matching_memory_type(
        device.memory_properties(),
        &memory_requirements,
        MemoryKind::Any,
    ) else {
        return Ok(TestStatus::fail("no memory type matches the sparse image"));
    };

    let plan = plan_image_binds(
        layer_extent,
        array_layers,
        mip_levels,
        aspect_requirements,
        ResidencyPattern::Full,
    );
    let (block_binds, block_allocations) = materialize_block_binds(
        device,
        vk::ImageAspectFlags::COLOR,
        &plan.block_binds,
        memory_requirements.alignment,
        memory_type_index,
    )?;
    let mut opaque_regions = plan.opaque_binds;
    for requirements in &sparse_requirements {
        if requirements
            .format_properties
            .aspect_mask
            .contains(vk::ImageAspectFlags::METADATA)
        {
            opaque_regions.extend(plan_metadata_binds(requirements, array_layers));
        }
    }
    let (opaque_binds, tail_allocations) =
        materialize_opaque_binds(device, &opaque_regions, memory_type_index)?;

    let mut bind_info = BindSparseInfo::default();
    if !block_binds.is_empty() {
        bind_info.image_binds.push(SparseImageMemoryBindInfo {
            image: prepared.image.clone(),
            binds: block_binds,
        });
    }
    if !opaque_binds.is_empty() {
        bind_info.image_opaque_binds.push(SparseImageOpaqueMemoryBindInfo {
            image: prepared.image.clone(),
            binds: opaque_binds,
        });
    }

    let readback = match run_round_trip(&prepared, bind_info)? {
        Ok(readback) => readback,
        Err(status) => return Ok(status),
    };
    drop(block_allocations);
    drop(tail_allocations);

    for (level, layout) in prepared.layouts.iter().enumerate() {
        let reference = build_level_reference(layout.extent, array_layers);
        let actual = &readback[layout.offset as usize..(layout.offset + layout.size) as usize];
        if let Some(mismatch) = compare_bytes(&reference, actual) {
            return Ok(TestStatus::fail(format!(
                "mip level {level} differs at byte {}: expected {:#04x}, got {:#04x}",
                mismatch.offset, mismatch.expected, mismatch.actual
            )));
        }
    }

    Ok(TestStatus::Pass)
}
