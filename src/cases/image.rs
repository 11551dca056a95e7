//! Sparse image round trips.
//!
//! The opaque case backs an entire image through opaque binds and expects a
//! perfect round trip. The residency case backs only every other block of
//! each mip level outside the mip tail and checks that unbound blocks read
//! zero on strictly non-resident devices.

use crate::{
    cases::{
        require_image_extent, require_image_format_support, require_image_residency,
        require_sparse_binding, require_sparse_format_properties, CaseContext, CASE_FORMAT,
    },
    command::{buffer_barrier, image_barrier, CommandBuffer, CommandPool},
    device::QueueRequirement,
    instance::Instance,
    memory::{
        find_matching_memory_type,
        sparse::{BindSparseInfo, SparseImageMemoryBindInfo, SparseImageOpaqueMemoryBindInfo},
        MemoryKind,
    },
    resource::{
        find_aspect_requirements, max_mip_levels, mip_level_extent, HostBuffer, Image,
        ImageCreateParams, ImageKind,
    },
    sparse::{
        materialize_block_binds, materialize_opaque_binds, plan_buffer_binds, plan_image_binds,
        plan_metadata_binds, ResidencyPattern,
    },
    submit::{SequenceOutcome, SubmissionSequencer, SubmitInfo},
    sync::{Fence, Semaphore},
    verify::{build_level_reference, compare_bytes, compare_residency},
    DeviceSize, TestStatus, VulkanError,
};
use ash::vk;
use std::sync::Arc;

const SPARSE_QUEUE: usize = 0;
const TRANSFER_QUEUE: usize = 1;

/// Parameters shared by all image cases.
#[derive(Clone, Copy, Debug)]
pub struct ImageCaseParams {
    pub kind: ImageKind,
    /// The logical grid the image is sized from; per-layer extent and layer
    /// count derive from it through the kind.
    pub grid: [u32; 3],
    /// Requested layer count for arrayed kinds; ignored otherwise.
    pub layers: u32,
}

const IMAGE_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::TRANSFER_SRC.as_raw() | vk::ImageUsageFlags::TRANSFER_DST.as_raw(),
);

/// Byte placement of one mip level within the staging buffers.
pub(super) struct LevelLayout {
    pub extent: [u32; 3],
    pub offset: DeviceSize,
    pub size: DeviceSize,
}

pub(super) fn level_layouts(
    layer_extent: [u32; 3],
    mip_levels: u32,
    array_layers: u32,
) -> (Vec<LevelLayout>, DeviceSize) {
    let mut layouts = Vec::with_capacity(mip_levels as usize);
    let mut offset = 0;

    for level in 0..mip_levels {
        let extent = mip_level_extent(layer_extent, level, mip_levels).unwrap();
        let size = extent.iter().map(|&v| v as DeviceSize).product::<DeviceSize>()
            * array_layers as DeviceSize
            * 4;
        layouts.push(LevelLayout {
            extent,
            offset,
            size,
        });
        offset += size;
    }

    (layouts, offset)
}

fn level_copy(layout: &LevelLayout, level: u32, array_layers: u32) -> vk::BufferImageCopy {
    vk::BufferImageCopy {
        buffer_offset: layout.offset,
        buffer_row_length: 0,
        buffer_image_height: 0,
        image_subresource: vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: level,
            base_array_layer: 0,
            layer_count: array_layers,
        },
        image_offset: vk::Offset3D::default(),
        image_extent: vk::Extent3D {
            width: layout.extent[0],
            height: layout.extent[1],
            depth: layout.extent[2],
        },
    }
}

/// Records upload of every level, a transition to transfer-read, readback
/// of every level, and a host-read barrier on the output buffer.
pub(super) fn record_round_trip(
    commands: &CommandBuffer,
    image: &Image,
    layouts: &[LevelLayout],
    input: &HostBuffer,
    output: &HostBuffer,
) {
    let params = image.params();
    let whole_image = vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: params.mip_levels,
        base_array_layer: 0,
        layer_count: params.array_layers,
    };

    commands.pipeline_barrier(
        vk::PipelineStageFlags::TOP_OF_PIPE,
        vk::PipelineStageFlags::TRANSFER,
        &[],
        &[image_barrier(
            image.handle(),
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            whole_image,
        )],
    );

    let copies: Vec<vk::BufferImageCopy> = layouts
        .iter()
        .enumerate()
        .map(|(level, layout)| level_copy(layout, level as u32, params.array_layers))
        .collect();
    commands.copy_buffer_to_image(
        input.buffer(),
        image.handle(),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        &copies,
    );

    commands.pipeline_barrier(
        vk::PipelineStageFlags::TRANSFER,
        vk::PipelineStageFlags::TRANSFER,
        &[],
        &[image_barrier(
            image.handle(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::TRANSFER_READ,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            whole_image,
        )],
    );
    commands.copy_image_to_buffer(
        image.handle(),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        output.buffer(),
        &copies,
    );
    commands.pipeline_barrier(
        vk::PipelineStageFlags::TRANSFER,
        vk::PipelineStageFlags::HOST,
        &[buffer_barrier(
            output.buffer(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::HOST_READ,
        )],
        &[],
    );
}

pub(super) struct PreparedImage {
    pub(super) context: CaseContext,
    pub(super) image: Arc<Image>,
    pub(super) layouts: Vec<LevelLayout>,
    pub(super) total_size: DeviceSize,
}

pub(super) fn prepare_image(
    instance: &Arc<Instance>,
    params: &ImageCaseParams,
    residency: bool,
) -> Result<Result<PreparedImage, TestStatus>, VulkanError> {
    let ImageCaseParams { kind, grid, layers } = *params;
    let requirements = [
        QueueRequirement {
            flags: vk::QueueFlags::SPARSE_BINDING,
            count: 1,
        },
        QueueRequirement {
            flags: vk::QueueFlags::COMPUTE,
            count: 1,
        },
    ];
    let Some(context) = CaseContext::new(instance, &requirements)? else {
        return Ok(Err(TestStatus::not_supported("required queues not available")));
    };
    let device = context.device();

    let gate = if residency {
        require_image_residency(device, kind)
    } else {
        require_sparse_binding(device)
    };
    if let Some(status) = gate {
        return Ok(Err(status));
    }

    let layer_extent = kind.layer_extent(grid);
    if let Some(status) = require_image_extent(device, kind, layer_extent) {
        return Ok(Err(status));
    }

    let mut flags = vk::ImageCreateFlags::SPARSE_BINDING | kind.create_flags();
    if residency {
        flags |= vk::ImageCreateFlags::SPARSE_RESIDENCY;
    }
    if let Some(status) = require_image_format_support(
        &context,
        kind,
        IMAGE_USAGE,
        flags,
        vk::SampleCountFlags::TYPE_1,
    )? {
        return Ok(Err(status));
    }
    if residency {
        if let Some(status) = require_sparse_format_properties(
            &context,
            kind,
            IMAGE_USAGE,
            vk::SampleCountFlags::TYPE_1,
        ) {
            return Ok(Err(status));
        }
    }

    let array_layers = kind.layer_count(layers);
    let mip_levels = max_mip_levels(layer_extent);
    let image = Image::new(
        device.clone(),
        ImageCreateParams {
            flags,
            image_type: kind.image_type(),
            format: CASE_FORMAT,
            extent: layer_extent,
            mip_levels,
            array_layers,
            samples: vk::SampleCountFlags::TYPE_1,
            usage: IMAGE_USAGE,
            sharing_families: context.sharing_families(),
        },
    )?;

    let (layouts, total_size) = level_layouts(layer_extent, mip_levels, array_layers);

    Ok(Ok(PreparedImage {
        context,
        image,
        layouts,
        total_size,
    }))
}

/// Uploads the reference pattern through the image and reads it back,
/// returning the raw readback bytes.
pub(super) fn run_round_trip(
    prepared: &PreparedImage,
    bind_info: BindSparseInfo,
) -> Result<Result<Vec<u8>, TestStatus>, VulkanError> {
    let context = &prepared.context;
    let device = context.device();

    let input = HostBuffer::new(
        device.clone(),
        prepared.total_size,
        vk::BufferUsageFlags::TRANSFER_SRC,
    )?;
    let mut reference = Vec::with_capacity(prepared.total_size as usize);
    for layout in &prepared.layouts {
        reference.extend(build_level_reference(
            layout.extent,
            prepared.image.params().array_layers,
        ));
    }
    input.write(&reference)?;
    let output = HostBuffer::new(
        device.clone(),
        prepared.total_size,
        vk::BufferUsageFlags::TRANSFER_DST,
    )?;

    let transfer_queue = context.queue(TRANSFER_QUEUE, 0);
    let pool = CommandPool::new(device.clone(), transfer_queue.queue_family_index())?;
    let commands = pool.begin_one_shot()?;
    record_round_trip(&commands, &prepared.image, &prepared.layouts, &input, &output);
    commands.end()?;

    let bind_done = Semaphore::new(device.clone())?;
    let mut bind_info = bind_info;
    bind_info.signal_semaphores.push(bind_done.clone());

    let fence = Fence::new(device.clone())?;
    let submit = SubmitInfo {
        wait_semaphores: vec![(bind_done, vk::PipelineStageFlags::TRANSFER)],
        command_buffers: vec![Arc::new(commands)],
        signal_semaphores: Vec::new(),
    };

    let mut sequencer = SubmissionSequencer::new(device.clone());
    sequencer
        .bind_sparse(context.queue(SPARSE_QUEUE, 0).clone(), vec![bind_info], None)
        .execute(transfer_queue.clone(), vec![submit], Some(fence));
    if sequencer.run()? == SequenceOutcome::FenceUnsignaled {
        return Ok(Err(TestStatus::fail("transfer fence never signaled")));
    }

    let mut readback = vec![0u8; prepared.total_size as usize];
    output.read(&mut readback)?;

    Ok(Ok(readback))
}

/// Full opaque binding of a sparse image, metadata included, followed by an
/// exact round trip of every mip level.
pub fn run_opaque(
    instance: &Arc<Instance>,
    params: &ImageCaseParams,
) -> Result<TestStatus, VulkanError> {
    let prepared = match prepare_image(instance, params, false)? {
        Ok(prepared) => prepared,
        Err(status) => return Ok(status),
    };
    let device = prepared.context.device();
    let array_layers = prepared.image.params().array_layers;

    let memory_requirements = prepared.image.memory_requirements();
    if !crate::is_aligned(memory_requirements.size, memory_requirements.alignment) {
        return Ok(TestStatus::fail(format!(
            "sparse image size {} is not a multiple of its alignment {}",
            memory_requirements.size, memory_requirements.alignment
        )));
    }
    let Some(memory_type_index) = find_matching_memory_type(
        device.memory_properties(),
        &memory_requirements,
        MemoryKind::Any,
    ) else {
        return Ok(TestStatus::fail("no memory type matches the sparse image"));
    };

    let mut regions = plan_buffer_binds(memory_requirements.size, memory_requirements.alignment);
    for aspect_requirements in prepared.image.sparse_memory_requirements() {
        if aspect_requirements
            .format_properties
            .aspect_mask
            .contains(vk::ImageAspectFlags::METADATA)
        {
            regions.extend(plan_metadata_binds(&aspect_requirements, array_layers));
        }
    }
    let (binds, allocations) = materialize_opaque_binds(device, &regions, memory_type_index)?;

    let bind_info = BindSparseInfo {
        image_opaque_binds: vec![SparseImageOpaqueMemoryBindInfo {
            image: prepared.image.clone(),
            binds,
        }],
        ..Default::default()
    };

    let readback = match run_round_trip(&prepared, bind_info)? {
        Ok(readback) => readback,
        Err(status) => return Ok(status),
    };
    drop(allocations);

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

/// Partial residency: every other block of each level below the mip tail is
/// backed, the tail and any metadata aspect are fully backed, and the
/// readback must match the
/// pattern in bound blocks and zero in unbound ones when the device is
/// strictly non-resident.
pub fn run_residency(
    instance: &Arc<Instance>,
    params: &ImageCaseParams,
) -> Result<TestStatus, VulkanError> {
    let prepared = match prepare_image(instance, params, true)? {
        Ok(prepared) => prepared,
        Err(status) => return Ok(status),
    };
    let device = prepared.context.device();
    let params = prepared.image.params();
    let array_layers = params.array_layers;
    let mip_levels = params.mip_levels;
    let layer_extent = params.extent;

    let sparse_requirements = prepared.image.sparse_memory_requirements();
    let Some(aspect_requirements) =
        find_aspect_requirements(&sparse_requirements, vk::ImageAspectFlags::COLOR)
    else {
        return Ok(TestStatus::fail(
            "no sparse requirements reported for the color aspect",
        ));
    };

    let memory_requirements = prepared.image.memory_requirements();
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
        ResidencyPattern::EveryOtherBlock,
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

    let strict = device
        .properties()
        .sparse_properties
        .residency_non_resident_strict
        != 0;
    let granularity_vk = aspect_requirements.format_properties.image_granularity;
    let granularity = [
        granularity_vk.width,
        granularity_vk.height,
        granularity_vk.depth,
    ];
    let mip_tail_first_lod = aspect_requirements.image_mip_tail_first_lod.min(mip_levels);

    for (level, layout) in prepared.layouts.iter().enumerate() {
        let actual = &readback[layout.offset as usize..(layout.offset + layout.size) as usize];

        if (level as u32) < mip_tail_first_lod {
            if let Some(mismatch) = compare_residency(
                actual,
                layout.extent,
                array_layers,
                granularity,
                ResidencyPattern::EveryOtherBlock,
                strict,
            ) {
                return Ok(TestStatus::fail(format!(
                    "mip level {level} layer {} texel {:?}: expected {:?}, got {:?}",
                    mismatch.layer, mismatch.position, mismatch.expected, mismatch.actual
                )));
            }
        } else {
            // The mip tail is fully backed, so it round-trips exactly.
            let reference = build_level_reference(layout.extent, array_layers);
            if let Some(mismatch) = compare_bytes(&reference, actual) {
                return Ok(TestStatus::fail(format!(
                    "mip tail level {level} differs at byte {}: expected {:#04x}, got {:#04x}",
                    mismatch.offset, mismatch.expected, mismatch.actual
                )));
            }
        }
    }

    Ok(TestStatus::Pass)
}
