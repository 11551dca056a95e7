//! Sparse bind submission shapes.
//!
//! Exercises `vkQueueBindSparse` itself: chains of bind batches across one
//! or more sparse queues, linked by a configurable number of semaphores,
//! with or without resource binds in the batches and with or without a
//! fence on the final batch. The case passes when every batch completes.

use crate::{
    cases::{require_sparse_binding, CaseContext},
    device::QueueRequirement,
    instance::Instance,
    memory::{find_matching_memory_type, sparse::BindSparseInfo, sparse::SparseBufferMemoryBindInfo, MemoryKind},
    resource::Buffer,
    sparse::{materialize_buffer_binds, plan_buffer_binds},
    submit::{SequenceOutcome, SubmissionSequencer},
    sync::{Fence, Semaphore},
    TestStatus, VulkanError,
};
use ash::vk;
use std::sync::Arc;

const BUFFER_SIZE: u64 = 1 << 16;

#[derive(Clone, Copy, Debug)]
pub struct QueueBindParams {
    /// Sparse queues to spread the batches over, each batch on its own
    /// queue. The planner may map several onto one family queue.
    pub queue_count: u32,
    /// Semaphores linking each batch to the next.
    pub semaphore_count: u32,
    /// Submit batches that carry no resource binds at all. A batch that
    /// also carries no semaphores is submitted with zero bind infos.
    pub empty_bind: bool,
    /// Attach a fence to the final batch.
    pub use_fence: bool,
}

pub fn run(instance: &Arc<Instance>, params: QueueBindParams) -> Result<TestStatus, VulkanError> {
    debug_assert!(params.queue_count > 0);

    let requirements = [QueueRequirement {
        flags: vk::QueueFlags::SPARSE_BINDING,
        count: params.queue_count,
    }];
    let Some(context) = CaseContext::new(instance, &requirements)? else {
        return Ok(TestStatus::not_supported("no sparse binding queue available"));
    };
    let device = context.device();

    if let Some(status) = require_sparse_binding(device) {
        return Ok(status);
    }

    // The first batch optionally carries real buffer binds; the rest only
    // exercise the semaphore plumbing.
    let mut resources = None;
    let mut first_binds = Vec::new();
    if !params.empty_bind {
        let buffer = Buffer::new(
            device.clone(),
            BUFFER_SIZE,
            vk::BufferUsageFlags::TRANSFER_DST,
            vk::BufferCreateFlags::SPARSE_BINDING,
            &[],
        )?;
        let memory_requirements = buffer.memory_requirements();
        let Some(memory_type_index) = find_matching_memory_type(
            device.memory_properties(),
            &memory_requirements,
            MemoryKind::Any,
        ) else {
            return Ok(TestStatus::fail("no memory type matches the sparse buffer"));
        };
        let regions = plan_buffer_binds(memory_requirements.size, memory_requirements.alignment);
        let (binds, allocations) = materialize_buffer_binds(device, &regions, memory_type_index)?;

        first_binds.push(SparseBufferMemoryBindInfo {
            buffer: buffer.clone(),
            binds,
        });
        resources = Some((buffer, allocations));
    }

    let mut sequencer = SubmissionSequencer::new(device.clone());
    let mut wait_semaphores: Vec<Arc<Semaphore>> = Vec::new();
    let fence = if params.use_fence {
        Some(Fence::new(device.clone())?)
    } else {
        None
    };

    for batch in 0..params.queue_count {
        let last = batch + 1 == params.queue_count;
        let signal_semaphores = if last {
            Vec::new()
        } else {
            (0..params.semaphore_count)
                .map(|_| Semaphore::new(device.clone()))
                .collect::<Result<_, _>>()?
        };

        let bind_info = BindSparseInfo {
            wait_semaphores: std::mem::replace(&mut wait_semaphores, signal_semaphores.clone()),
            buffer_binds: if batch == 0 {
                std::mem::take(&mut first_binds)
            } else {
                Vec::new()
            },
            signal_semaphores,
            ..Default::default()
        };

        let step_fence = if last { fence.clone() } else { None };
        // A batch left with neither binds nor semaphores is submitted with
        // zero bind infos; the fence must signal regardless.
        let bind_infos = if bind_info.is_empty() {
            Vec::new()
        } else {
            vec![bind_info]
        };
        sequencer.bind_sparse(
            context.queue(0, batch as usize).clone(),
            bind_infos,
            step_fence,
        );
    }

    if sequencer.run()? == SequenceOutcome::FenceUnsignaled {
        return Ok(TestStatus::fail("bind fence never signaled"));
    }

    if let Some(fence) = &fence {
        if !fence.is_signaled()? {
            return Ok(TestStatus::fail("bind fence not signaled after idle"));
        }
    }

    drop(resources);

    Ok(TestStatus::Pass)
}
