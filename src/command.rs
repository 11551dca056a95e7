//! Command pools and one-shot transfer command buffers.

use crate::{device::Device, resource::Buffer, VulkanError};
use ash::vk;
use std::sync::Arc;

pub struct CommandPool {
    handle: vk::CommandPool,
    device: Arc<Device>,
}

impl CommandPool {
    pub fn new(device: Arc<Device>, queue_family_index: u32) -> Result<Arc<Self>, VulkanError> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(queue_family_index);
        let handle = unsafe { device.handle().create_command_pool(&create_info, None) }?;

        Ok(Arc::new(CommandPool { handle, device }))
    }

    /// Allocates a primary command buffer and begins it for one-time use.
    pub fn begin_one_shot(self: &Arc<Self>) -> Result<CommandBuffer, VulkanError> {
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.handle)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let handle = unsafe { self.device.handle().allocate_command_buffers(&allocate_info) }?[0];

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.handle().begin_command_buffer(handle, &begin_info) }?;

        Ok(CommandBuffer {
            handle,
            pool: self.clone(),
        })
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_command_pool(self.handle, None) };
    }
}

/// A primary command buffer in the recording state until [`end`] is called.
///
/// [`end`]: CommandBuffer::end
pub struct CommandBuffer {
    handle: vk::CommandBuffer,
    pool: Arc<CommandPool>,
}

impl CommandBuffer {
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    fn device(&self) -> &ash::Device {
        self.pool.device.handle()
    }

    pub fn end(&self) -> Result<(), VulkanError> {
        Ok(unsafe { self.device().end_command_buffer(self.handle) }?)
    }

    pub fn pipeline_barrier(
        &self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        buffer_barriers: &[vk::BufferMemoryBarrier<'_>],
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    ) {
        unsafe {
            self.device().cmd_pipeline_barrier(
                self.handle,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                buffer_barriers,
                image_barriers,
            )
        };
    }

    pub fn copy_buffer(&self, src: &Buffer, dst: &Buffer, regions: &[vk::BufferCopy]) {
        unsafe {
            self.device()
                .cmd_copy_buffer(self.handle, src.handle(), dst.handle(), regions)
        };
    }

    pub fn copy_buffer_to_image(
        &self,
        src: &Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device().cmd_copy_buffer_to_image(
                self.handle,
                src.handle(),
                dst,
                dst_layout,
                regions,
            )
        };
    }

    pub fn copy_image_to_buffer(
        &self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: &Buffer,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device().cmd_copy_image_to_buffer(
                self.handle,
                src,
                src_layout,
                dst.handle(),
                regions,
            )
        };
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        unsafe {
            self.pool
                .device
                .handle()
                .free_command_buffers(self.pool.handle, &[self.handle])
        };
    }
}

/// A whole-buffer memory barrier.
pub fn buffer_barrier<'a>(
    buffer: &Buffer,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
) -> vk::BufferMemoryBarrier<'a> {
    vk::BufferMemoryBarrier::default()
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .buffer(buffer.handle())
        .offset(0)
        .size(vk::WHOLE_SIZE)
}

/// An image layout transition covering `subresource_range`.
pub fn image_barrier<'a>(
    image: vk::Image,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    subresource_range: vk::ImageSubresourceRange,
) -> vk::ImageMemoryBarrier<'a> {
    vk::ImageMemoryBarrier::default()
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(subresource_range)
}
