//! Queue submission descriptions and the ordered submission sequencer.
//!
//! A test builds a list of steps mixing sparse-bind batches and command
//! buffer executions, chained by semaphores it threads through the step
//! payloads itself. The sequencer submits the steps strictly in list order,
//! then waits for the steps' fences in that same order before declaring the
//! sequence complete.

use crate::{
    command::CommandBuffer,
    device::{Device, Queue},
    memory::sparse::BindSparseInfo,
    sync::{Fence, Semaphore},
    VulkanError,
};
use ash::vk;
use smallvec::SmallVec;
use std::sync::Arc;

/// Fence waits are unbounded.
const FENCE_TIMEOUT_NS: u64 = u64::MAX;

/// One `VkSubmitInfo` worth of command-buffer work.
#[derive(Clone, Default)]
pub struct SubmitInfo {
    pub wait_semaphores: Vec<(Arc<Semaphore>, vk::PipelineStageFlags)>,
    pub command_buffers: Vec<Arc<CommandBuffer>>,
    pub signal_semaphores: Vec<Arc<Semaphore>>,
}

pub(crate) struct SubmitInfoFields1Vk {
    wait_semaphores_vk: SmallVec<[vk::Semaphore; 4]>,
    wait_stages_vk: SmallVec<[vk::PipelineStageFlags; 4]>,
    command_buffers_vk: SmallVec<[vk::CommandBuffer; 4]>,
    signal_semaphores_vk: SmallVec<[vk::Semaphore; 4]>,
}

impl SubmitInfo {
    pub(crate) fn to_vk_fields1(&self) -> SubmitInfoFields1Vk {
        let wait_semaphores_vk = self
            .wait_semaphores
            .iter()
            .map(|(semaphore, _)| semaphore.handle())
            .collect();
        let wait_stages_vk = self
            .wait_semaphores
            .iter()
            .map(|&(_, stages)| stages)
            .collect();
        let command_buffers_vk = self
            .command_buffers
            .iter()
            .map(|command_buffer| command_buffer.handle())
            .collect();
        let signal_semaphores_vk = self
            .signal_semaphores
            .iter()
            .map(|semaphore| semaphore.handle())
            .collect();

        SubmitInfoFields1Vk {
            wait_semaphores_vk,
            wait_stages_vk,
            command_buffers_vk,
            signal_semaphores_vk,
        }
    }

    pub(crate) fn to_vk<'a>(&self, fields1_vk: &'a SubmitInfoFields1Vk) -> vk::SubmitInfo<'a> {
        vk::SubmitInfo::default()
            .wait_semaphores(&fields1_vk.wait_semaphores_vk)
            .wait_dst_stage_mask(&fields1_vk.wait_stages_vk)
            .command_buffers(&fields1_vk.command_buffers_vk)
            .signal_semaphores(&fields1_vk.signal_semaphores_vk)
    }
}

/// One step of an ordered submission sequence.
pub enum Step {
    BindSparse {
        queue: Arc<Queue>,
        bind_infos: Vec<BindSparseInfo>,
        fence: Option<Arc<Fence>>,
    },
    Execute {
        queue: Arc<Queue>,
        submits: Vec<SubmitInfo>,
        fence: Option<Arc<Fence>>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequenceOutcome {
    Completed,
    /// A wait returned without its fence signaling. This is a test failure,
    /// not a Vulkan error.
    FenceUnsignaled,
}

/// Submits steps in list order and waits for their fences in that order.
pub struct SubmissionSequencer {
    device: Arc<Device>,
    steps: Vec<Step>,
}

impl SubmissionSequencer {
    pub fn new(device: Arc<Device>) -> Self {
        SubmissionSequencer {
            device,
            steps: Vec::new(),
        }
    }

    pub fn bind_sparse(
        &mut self,
        queue: Arc<Queue>,
        bind_infos: Vec<BindSparseInfo>,
        fence: Option<Arc<Fence>>,
    ) -> &mut Self {
        self.steps.push(Step::BindSparse {
            queue,
            bind_infos,
            fence,
        });
        self
    }

    pub fn execute(
        &mut self,
        queue: Arc<Queue>,
        submits: Vec<SubmitInfo>,
        fence: Option<Arc<Fence>>,
    ) -> &mut Self {
        self.steps.push(Step::Execute {
            queue,
            submits,
            fence,
        });
        self
    }

    /// Runs all recorded steps. On success the device is idle, so every
    /// allocation referenced by a step can be released afterwards in the
    /// order the caller chooses.
    pub fn run(&mut self) -> Result<SequenceOutcome, VulkanError> {
        let mut fences: Vec<Arc<Fence>> = Vec::new();

        for step in &self.steps {
            match step {
                Step::BindSparse {
                    queue,
                    bind_infos,
                    fence,
                } => {
                    queue.with(|mut guard| guard.bind_sparse(bind_infos, fence.as_deref()))?;
                    fences.extend(fence.clone());
                }
                Step::Execute {
                    queue,
                    submits,
                    fence,
                } => {
                    queue.with(|mut guard| guard.submit(submits, fence.as_deref()))?;
                    fences.extend(fence.clone());
                }
            }
        }

        for fence in &fences {
            if !fence.wait_timeout(FENCE_TIMEOUT_NS)? {
                log::error!("fence wait returned without the fence signaling");
                return Ok(SequenceOutcome::FenceUnsignaled);
            }
        }

        self.device.wait_idle()?;

        Ok(SequenceOutcome::Completed)
    }
}
