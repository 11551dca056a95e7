//! Fully-resident sparse buffer round trip.
//!
//! A sparse buffer is backed alignment unit by alignment unit on the sparse
//! queue, then a transfer-capable queue writes a reference pattern through
//! it and reads it back.

use crate::{
    cases::{require_sparse_address_space, require_sparse_binding, CaseContext},
    command::{buffer_barrier, CommandPool},
    device::QueueRequirement,
    instance::Instance,
    memory::{find_matching_memory_type, sparse::BindSparseInfo, sparse::SparseBufferMemoryBindInfo, MemoryKind},
    resource::{Buffer, HostBuffer},
    sparse::{materialize_buffer_binds, plan_buffer_binds},
    submit::{SequenceOutcome, SubmissionSequencer, SubmitInfo},
    sync::{Fence, Semaphore},
    verify::{compare_bytes, reference_buffer_bytes},
    DeviceSize, TestStatus, VulkanError,
};
use ash::vk;
use std::sync::Arc;

const SPARSE_QUEUE: usize = 0;
const TRANSFER_QUEUE: usize = 1;

#[derive(Clone, Copy, Debug)]
pub struct BufferCaseParams {
    pub size: DeviceSize,
}

pub fn run(
    instance: &Arc<Instance>,
    params: &BufferCaseParams,
) -> Result<TestStatus, VulkanError> {
    let buffer_size = params.size;
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
        return Ok(TestStatus::not_supported("required queues not available"));
    };
    let device = context.device();

    if let Some(status) = require_sparse_binding(device) {
        return Ok(status);
    }
    if let Some(status) = require_sparse_address_space(device, buffer_size) {
        return Ok(status);
    }

    let sharing_families = context.sharing_families();
    let buffer = Buffer::new(
        device.clone(),
        buffer_size,
        vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST,
        vk::BufferCreateFlags::SPARSE_BINDING,
        &sharing_families,
    )?;

    let memory_requirements = buffer.memory_requirements();
    if !crate::is_aligned(memory_requirements.size, memory_requirements.alignment) {
        return Ok(TestStatus::fail(format!(
            "sparse buffer size {} is not a multiple of its alignment {}",
            memory_requirements.size, memory_requirements.alignment
        )));
    }

    let Some(memory_type_index) =
        find_matching_memory_type(device.memory_properties(), &memory_requirements, MemoryKind::Any)
    else {
        return Ok(TestStatus::fail("no memory type matches the sparse buffer"));
    };

    let regions = plan_buffer_binds(memory_requirements.size, memory_requirements.alignment);
    let (binds, allocations) = materialize_buffer_binds(device, &regions, memory_type_index)?;

    let bind_done = Semaphore::new(device.clone())?;
    let bind_info = BindSparseInfo {
        buffer_binds: vec![SparseBufferMemoryBindInfo {
            buffer: buffer.clone(),
            binds,
        }],
        signal_semaphores: vec![bind_done.clone()],
        ..Default::default()
    };

    let reference =
        reference_buffer_bytes(buffer_size as usize, memory_requirements.alignment as usize);
    let input = HostBuffer::new(device.clone(), buffer_size, vk::BufferUsageFlags::TRANSFER_SRC)?;
    input.write(&reference)?;
    let output = HostBuffer::new(device.clone(), buffer_size, vk::BufferUsageFlags::TRANSFER_DST)?;

    let transfer_queue = context.queue(TRANSFER_QUEUE, 0);
    let pool = CommandPool::new(device.clone(), transfer_queue.queue_family_index())?;
    let commands = pool.begin_one_shot()?;
    let copy = vk::BufferCopy {
        src_offset: 0,
        dst_offset: 0,
        size: buffer_size,
    };
    commands.copy_buffer(input.buffer(), &buffer, &[copy]);
    commands.pipeline_barrier(
        vk::PipelineStageFlags::TRANSFER,
        vk::PipelineStageFlags::TRANSFER,
        &[buffer_barrier(
            &buffer,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::TRANSFER_READ,
        )],
        &[],
    );
    commands.copy_buffer(&buffer, output.buffer(), &[copy]);
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
    commands.end()?;

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
        return Ok(TestStatus::fail("transfer fence never signaled"));
    }

    let mut readback = vec![0u8; buffer_size as usize];
    output.read(&mut readback)?;

    // The device is idle, so backing allocations can now go away in bind
    // order.
    drop(allocations);

    match compare_bytes(&reference, &readback) {
        None => Ok(TestStatus::Pass),
        Some(mismatch) => Ok(TestStatus::fail(format!(
            "readback differs at byte {}: expected {:#04x}, got {:#04x}",
            mismatch.offset, mismatch.expected, mismatch.actual
        ))),
    }
}
