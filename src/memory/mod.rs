//! Device memory allocation and memory-type matching.

pub mod sparse;

use crate::{device::Device, DeviceSize, VulkanError};
use ash::vk;
use std::{ptr, sync::Arc};

/// The property-flag class a test wants its allocations to come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryKind {
    /// Any memory type whose bit is set in the requirements.
    Any,
    /// Host visible and host coherent, for upload and readback buffers.
    HostVisible,
    /// Device local, preferred for the sparse backing allocations.
    DeviceLocal,
}

impl MemoryKind {
    fn flags(self) -> vk::MemoryPropertyFlags {
        match self {
            MemoryKind::Any => vk::MemoryPropertyFlags::empty(),
            MemoryKind::HostVisible => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            }
            MemoryKind::DeviceLocal => vk::MemoryPropertyFlags::DEVICE_LOCAL,
        }
    }
}

/// Finds the lowest-index memory type that is allowed by `requirements` and
/// carries the properties of `kind`.
pub fn find_matching_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    requirements: &vk::MemoryRequirements,
    kind: MemoryKind,
) -> Option<u32> {
    let required_flags = kind.flags();

    (0..memory_properties.memory_type_count).find(|&index| {
        requirements.memory_type_bits & (1 << index) != 0
            && memory_properties.memory_types[index as usize]
                .property_flags
                .contains(required_flags)
    })
}

/// A raw device memory allocation.
///
/// Sparse binds reference these by `Arc`, so an allocation stays alive for
/// as long as any plan or bind structure still points at it.
pub struct DeviceMemory {
    handle: vk::DeviceMemory,
    device: Arc<Device>,
    allocation_size: DeviceSize,
    memory_type_index: u32,
}

impl DeviceMemory {
    pub fn allocate(
        device: Arc<Device>,
        allocation_size: DeviceSize,
        memory_type_index: u32,
    ) -> Result<Arc<Self>, VulkanError> {
        debug_assert!(allocation_size > 0);

        let allocate_info = vk::MemoryAllocateInfo::default()
            .allocation_size(allocation_size)
            .memory_type_index(memory_type_index);
        let handle = unsafe { device.handle().allocate_memory(&allocate_info, None) }?;

        Ok(Arc::new(DeviceMemory {
            handle,
            device,
            allocation_size,
            memory_type_index,
        }))
    }

    /// Allocates memory matching the requirements of a single resource.
    pub fn allocate_matching(
        device: Arc<Device>,
        requirements: &vk::MemoryRequirements,
        kind: MemoryKind,
    ) -> Result<Arc<Self>, VulkanError> {
        let memory_type_index =
            find_matching_memory_type(device.memory_properties(), requirements, kind)
                .ok_or(VulkanError::NoSuitableMemoryType)?;

        Self::allocate(device, requirements.size, memory_type_index)
    }

    #[inline]
    pub fn handle(&self) -> vk::DeviceMemory {
        self.handle
    }

    #[inline]
    pub fn allocation_size(&self) -> DeviceSize {
        self.allocation_size
    }

    #[inline]
    pub fn memory_type_index(&self) -> u32 {
        self.memory_type_index
    }

    /// Copies `data` into the start of the allocation. The memory type must
    /// be host visible and host coherent.
    pub fn write(&self, data: &[u8]) -> Result<(), VulkanError> {
        debug_assert!(data.len() as DeviceSize <= self.allocation_size);

        unsafe {
            let mapped = self.device.handle().map_memory(
                self.handle,
                0,
                vk::WHOLE_SIZE,
                vk::MemoryMapFlags::empty(),
            )?;
            ptr::copy_nonoverlapping(data.as_ptr(), mapped.cast(), data.len());
            self.device.handle().unmap_memory(self.handle);
        }

        Ok(())
    }

    /// Copies the start of the allocation into `data`. The memory type must
    /// be host visible and host coherent.
    pub fn read(&self, data: &mut [u8]) -> Result<(), VulkanError> {
        debug_assert!(data.len() as DeviceSize <= self.allocation_size);

        unsafe {
            let mapped = self.device.handle().map_memory(
                self.handle,
                0,
                vk::WHOLE_SIZE,
                vk::MemoryMapFlags::empty(),
            )?;
            ptr::copy_nonoverlapping(mapped.cast(), data.as_mut_ptr(), data.len());
            self.device.handle().unmap_memory(self.handle);
        }

        Ok(())
    }
}

impl Drop for DeviceMemory {
    fn drop(&mut self) {
        unsafe { self.device.handle().free_memory(self.handle, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(
        types: &[vk::MemoryPropertyFlags],
    ) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (index, &flags) in types.iter().enumerate() {
            properties.memory_types[index].property_flags = flags;
        }
        properties
    }

    #[test]
    fn matching_respects_type_bits() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);
        let requirements = vk::MemoryRequirements {
            size: 1024,
            alignment: 256,
            memory_type_bits: 0b10,
        };

        assert_eq!(
            find_matching_memory_type(&properties, &requirements, MemoryKind::DeviceLocal),
            Some(1),
        );
    }

    #[test]
    fn matching_requires_all_property_flags() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let requirements = vk::MemoryRequirements {
            size: 64,
            alignment: 64,
            memory_type_bits: 0b11,
        };

        assert_eq!(
            find_matching_memory_type(&properties, &requirements, MemoryKind::HostVisible),
            Some(1),
        );
    }

    #[test]
    fn matching_any_takes_lowest_allowed_index() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);
        let requirements = vk::MemoryRequirements {
            size: 64,
            alignment: 64,
            memory_type_bits: 0b11,
        };

        assert_eq!(
            find_matching_memory_type(&properties, &requirements, MemoryKind::Any),
            Some(0),
        );
    }

    #[test]
    fn matching_fails_when_nothing_fits() {
        let properties = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let requirements = vk::MemoryRequirements {
            size: 64,
            alignment: 64,
            memory_type_bits: 0b1,
        };

        assert_eq!(
            find_matching_memory_type(&properties, &requirements, MemoryKind::HostVisible),
            None,
        );
    }
}
