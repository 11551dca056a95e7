//! Multisampled sparse residency binding.
//!
//! Transfer commands cannot read or write multisampled images, so this case
//! stops short of a data round trip. It cross-checks the reported sparse
//! metadata, including the multisample standard block shape when the device
//! mandates one, then fully backs the single-level image and submits the
//! bind with a fence that must signal.

use crate::{
    cases::{
        require_image_extent, require_image_format_support, require_image_residency,
        require_sample_count_residency, require_sparse_format_properties, CaseContext,
        CASE_FORMAT, CASE_FORMAT_BITS,
    },
    device::QueueRequirement,
    instance::Instance,
    memory::{
        find_matching_memory_type,
        sparse::{BindSparseInfo, SparseImageMemoryBindInfo, SparseImageOpaqueMemoryBindInfo},
        MemoryKind,
    },
    resource::{find_aspect_requirements, Image, ImageCreateParams, ImageKind},
    sparse::{
        check_standard_block_shape, materialize_block_binds, materialize_opaque_binds,
        plan_image_binds, plan_metadata_binds, validate_sparse_requirements, ResidencyPattern,
        ShapeCheck,
    },
    submit::{SequenceOutcome, SubmissionSequencer},
    sync::Fence,
    TestStatus, VulkanError,
};
use ash::vk;
use std::sync::Arc;

#[derive(Clone, Copy, Debug)]
pub struct MultisampleCaseParams {
    pub kind: ImageKind,
    pub grid: [u32; 3],
    pub layers: u32,
    pub samples: vk::SampleCountFlags,
}

const IMAGE_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::COLOR_ATTACHMENT;

pub fn run(
    instance: &Arc<Instance>,
    case_params: &MultisampleCaseParams,
) -> Result<TestStatus, VulkanError> {
    let MultisampleCaseParams {
        kind,
        grid,
        layers,
        samples,
    } = *case_params;

    let requirements = [QueueRequirement {
        flags: vk::QueueFlags::SPARSE_BINDING,
        count: 1,
    }];
    let Some(context) = CaseContext::new(instance, &requirements)? else {
        return Ok(TestStatus::not_supported("no sparse binding queue available"));
    };
    let device = context.device();

    if let Some(status) = require_image_residency(device, kind) {
        return Ok(status);
    }
    if let Some(status) = require_sample_count_residency(device, samples) {
        return Ok(status);
    }

    let layer_extent = kind.layer_extent(grid);
    if let Some(status) = require_image_extent(device, kind, layer_extent) {
        return Ok(status);
    }

    let flags = vk::ImageCreateFlags::SPARSE_BINDING
        | vk::ImageCreateFlags::SPARSE_RESIDENCY
        | kind.create_flags();
    if let Some(status) = require_image_format_support(&context, kind, IMAGE_USAGE, flags, samples)?
    {
        return Ok(status);
    }
    if let Some(status) = require_sparse_format_properties(&context, kind, IMAGE_USAGE, samples) {
        return Ok(status);
    }

    // Multisampled images carry exactly one mip level.
    let array_layers = kind.layer_count(layers);
    let image = Image::new(
        device.clone(),
        ImageCreateParams {
            flags,
            image_type: kind.image_type(),
            format: CASE_FORMAT,
            extent: layer_extent,
            mip_levels: 1,
            array_layers,
            samples,
            usage: IMAGE_USAGE,
            sharing_families: context.sharing_families(),
        },
    )?;

    let sparse_properties = &device.properties().sparse_properties;
    let sparse_requirements = image.sparse_memory_requirements();
    if sparse_requirements.is_empty() {
        return Ok(TestStatus::fail("no sparse memory requirements reported"));
    }

    let mut findings = Vec::new();
    for aspect_requirements in &sparse_requirements {
        findings.extend(validate_sparse_requirements(
            sparse_properties,
            aspect_requirements,
            layer_extent,
            1,
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
        kind.image_type(),
        samples,
        CASE_FORMAT_BITS,
        granularity,
    ) {
        return Ok(TestStatus::fail(format!(
            "granularity {reported:?} differs from the mandated standard block shape {expected:?}"
        )));
    }

    let memory_requirements = image.memory_requirements();
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
        1,
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
            image: image.clone(),
            binds: block_binds,
        });
    }
    if !opaque_binds.is_empty() {
        bind_info.image_opaque_binds.push(SparseImageOpaqueMemoryBindInfo {
            image: image.clone(),
            binds: opaque_binds,
        });
    }

    let fence = Fence::new(device.clone())?;
    let mut sequencer = SubmissionSequencer::new(device.clone());
    sequencer.bind_sparse(
        context.queue(0, 0).clone(),
        vec![bind_info],
        Some(fence.clone()),
    );
    if sequencer.run()? == SequenceOutcome::FenceUnsignaled {
        return Ok(TestStatus::fail("bind fence never signaled"));
    }

    drop(block_allocations);
    drop(tail_allocations);

    Ok(TestStatus::Pass)
}
