use crate::{
    device::Device,
    memory::sparse::BindSparseInfo,
    submit::SubmitInfo,
    sync::Fence,
    VulkanError,
};
use ash::vk;
use parking_lot::{Mutex, MutexGuard};
use smallvec::SmallVec;
use std::sync::Arc;

/// A queue retrieved from the device.
///
/// Access to the underlying handle is serialized through [`Queue::with`],
/// since queue operations must be externally synchronized.
pub struct Queue {
    handle: vk::Queue,
    device: Arc<Device>,
    queue_family_index: u32,
    queue_index: u32,
    state: Mutex<()>,
}

impl Queue {
    pub fn get(device: Arc<Device>, queue_family_index: u32, queue_index: u32) -> Arc<Self> {
        let handle = unsafe {
            device
                .handle()
                .get_device_queue(queue_family_index, queue_index)
        };

        Arc::new(Queue {
            handle,
            device,
            queue_family_index,
            queue_index,
            state: Mutex::new(()),
        })
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    #[inline]
    pub fn queue_index(&self) -> u32 {
        self.queue_index
    }

    /// Locks the queue and runs `func` with exclusive access to it.
    pub fn with<R>(&self, func: impl FnOnce(QueueGuard<'_>) -> R) -> R {
        let guard = self.state.lock();

        func(QueueGuard {
            queue: self,
            _guard: guard,
        })
    }
}

pub struct QueueGuard<'a> {
    queue: &'a Queue,
    _guard: MutexGuard<'a, ()>,
}

impl QueueGuard<'_> {
    pub fn wait_idle(&mut self) -> Result<(), VulkanError> {
        Ok(unsafe { self.queue.device.handle().queue_wait_idle(self.queue.handle) }?)
    }

    /// Submits one or more sparse-bind batches, optionally signaling `fence`
    /// when the last batch completes.
    pub fn bind_sparse(
        &mut self,
        bind_infos: &[BindSparseInfo],
        fence: Option<&Fence>,
    ) -> Result<(), VulkanError> {
        let fields2_vk: SmallVec<[_; 4]> = bind_infos
            .iter()
            .map(BindSparseInfo::to_vk_fields2)
            .collect();
        let fields1_vk: SmallVec<[_; 4]> = bind_infos
            .iter()
            .zip(&fields2_vk)
            .map(|(bind_info, fields2)| bind_info.to_vk_fields1(fields2))
            .collect();
        let bind_infos_vk: SmallVec<[_; 4]> = bind_infos
            .iter()
            .zip(&fields1_vk)
            .map(|(bind_info, fields1)| bind_info.to_vk(fields1))
            .collect();

        let fence_vk = fence.map_or(vk::Fence::null(), Fence::handle);

        Ok(unsafe {
            self.queue.device.handle().queue_bind_sparse(
                self.queue.handle,
                &bind_infos_vk,
                fence_vk,
            )
        }?)
    }

    /// Submits command-buffer work, optionally signaling `fence`.
    pub fn submit(
        &mut self,
        submits: &[SubmitInfo],
        fence: Option<&Fence>,
    ) -> Result<(), VulkanError> {
        let fields1_vk: SmallVec<[_; 4]> =
            submits.iter().map(SubmitInfo::to_vk_fields1).collect();
        let submits_vk: SmallVec<[_; 4]> = submits
            .iter()
            .zip(&fields1_vk)
            .map(|(submit, fields1)| submit.to_vk(fields1))
            .collect();

        let fence_vk = fence.map_or(vk::Fence::null(), Fence::handle);

        Ok(unsafe {
            self.queue
                .device
                .handle()
                .queue_submit(self.queue.handle, &submits_vk, fence_vk)
        }?)
    }
}
