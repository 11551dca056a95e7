//! Semaphores and fences used to order sparse-bind and transfer work.

use crate::{device::Device, VulkanError};
use ash::vk;
use std::sync::Arc;

pub struct Semaphore {
    handle: vk::Semaphore,
    device: Arc<Device>,
}

impl Semaphore {
    pub fn new(device: Arc<Device>) -> Result<Arc<Self>, VulkanError> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let handle = unsafe { device.handle().create_semaphore(&create_info, None) }?;

        Ok(Arc::new(Semaphore { handle, device }))
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.handle
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_semaphore(self.handle, None) };
    }
}

pub struct Fence {
    handle: vk::Fence,
    device: Arc<Device>,
}

impl Fence {
    pub fn new(device: Arc<Device>) -> Result<Arc<Self>, VulkanError> {
        let create_info = vk::FenceCreateInfo::default();
        let handle = unsafe { device.handle().create_fence(&create_info, None) }?;

        Ok(Arc::new(Fence { handle, device }))
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.handle
    }

    /// Waits up to `timeout_ns`. Returns `false` when the timeout elapsed
    /// with the fence still unsignaled. A timeout of `u64::MAX` blocks
    /// until the fence signals.
    pub fn wait_timeout(&self, timeout_ns: u64) -> Result<bool, VulkanError> {
        match unsafe {
            self.device
                .handle()
                .wait_for_fences(&[self.handle], true, timeout_ns)
        } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    pub fn is_signaled(&self) -> Result<bool, VulkanError> {
        Ok(unsafe { self.device.handle().get_fence_status(self.handle) }?)
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_fence(self.handle, None) };
    }
}
