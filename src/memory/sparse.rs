//! Owned descriptions of `vkQueueBindSparse` batches.
//!
//! Each batch keeps `Arc` references to every resource, allocation and
//! semaphore it names, so a recorded batch cannot outlive its inputs. The
//! raw `ash` structures borrow arrays that have to stay alive until the
//! call returns, which is why conversion happens in two staging steps
//! before the final `vk::BindSparseInfo` is produced.

use crate::{
    memory::DeviceMemory,
    resource::{Buffer, Image},
    sync::Semaphore,
    DeviceSize,
};
use ash::vk;
use smallvec::SmallVec;
use std::sync::Arc;

/// One `VkBindSparseInfo` worth of work.
#[derive(Clone, Default)]
pub struct BindSparseInfo {
    pub wait_semaphores: Vec<Arc<Semaphore>>,
    pub buffer_binds: Vec<SparseBufferMemoryBindInfo>,
    pub image_opaque_binds: Vec<SparseImageOpaqueMemoryBindInfo>,
    pub image_binds: Vec<SparseImageMemoryBindInfo>,
    pub signal_semaphores: Vec<Arc<Semaphore>>,
}

/// Binds for one sparse buffer.
#[derive(Clone)]
pub struct SparseBufferMemoryBindInfo {
    pub buffer: Arc<Buffer>,
    pub binds: Vec<SparseMemoryBind>,
}

/// Opaque binds for one sparse image, including any mip tail region.
#[derive(Clone)]
pub struct SparseImageOpaqueMemoryBindInfo {
    pub image: Arc<Image>,
    pub binds: Vec<SparseMemoryBind>,
}

/// Per-subresource block binds for one sparse image.
#[derive(Clone)]
pub struct SparseImageMemoryBindInfo {
    pub image: Arc<Image>,
    pub binds: Vec<SparseImageMemoryBind>,
}

/// A single range bind. `memory` of `None` unbinds the range.
#[derive(Clone)]
pub struct SparseMemoryBind {
    pub resource_offset: DeviceSize,
    pub size: DeviceSize,
    /// The allocation and the offset within it.
    pub memory: Option<(Arc<DeviceMemory>, DeviceSize)>,
    pub flags: vk::SparseMemoryBindFlags,
}

impl SparseMemoryBind {
    pub(crate) fn to_vk(&self) -> vk::SparseMemoryBind {
        let &SparseMemoryBind {
            resource_offset,
            size,
            ref memory,
            flags,
        } = self;
        debug_assert!(size > 0);

        let (memory_vk, memory_offset) = match memory {
            Some((memory, offset)) => {
                debug_assert!(offset + size <= memory.allocation_size());
                (memory.handle(), *offset)
            }
            None => (vk::DeviceMemory::null(), 0),
        };

        vk::SparseMemoryBind {
            resource_offset,
            size,
            memory: memory_vk,
            memory_offset,
            flags,
        }
    }
}

/// A single image-block bind. `offset` and `extent` are in texels and must
/// respect the image's sparse block granularity.
#[derive(Clone)]
pub struct SparseImageMemoryBind {
    pub subresource: vk::ImageSubresource,
    pub offset: [i32; 3],
    pub extent: [u32; 3],
    pub memory: Option<(Arc<DeviceMemory>, DeviceSize)>,
    pub flags: vk::SparseMemoryBindFlags,
}

impl SparseImageMemoryBind {
    pub(crate) fn to_vk(&self) -> vk::SparseImageMemoryBind {
        let &SparseImageMemoryBind {
            subresource,
            offset,
            extent,
            ref memory,
            flags,
        } = self;

        let (memory_vk, memory_offset) = match memory {
            Some((memory, offset)) => (memory.handle(), *offset),
            None => (vk::DeviceMemory::null(), 0),
        };

        vk::SparseImageMemoryBind {
            subresource,
            offset: vk::Offset3D {
                x: offset[0],
                y: offset[1],
                z: offset[2],
            },
            extent: vk::Extent3D {
                width: extent[0],
                height: extent[1],
                depth: extent[2],
            },
            memory: memory_vk,
            memory_offset,
            flags,
        }
    }
}

/// First staging step: the inner bind arrays the per-resource structures
/// borrow.
pub(crate) struct BindSparseInfoFields2Vk {
    buffer_binds_vk: SmallVec<[SmallVec<[vk::SparseMemoryBind; 4]>; 4]>,
    image_opaque_binds_vk: SmallVec<[SmallVec<[vk::SparseMemoryBind; 4]>; 4]>,
    image_binds_vk: SmallVec<[SmallVec<[vk::SparseImageMemoryBind; 4]>; 4]>,
}

/// Second staging step: the per-resource structures and semaphore arrays
/// the final `vk::BindSparseInfo` borrows.
pub(crate) struct BindSparseInfoFields1Vk<'a> {
    wait_semaphores_vk: SmallVec<[vk::Semaphore; 4]>,
    buffer_bind_infos_vk: SmallVec<[vk::SparseBufferMemoryBindInfo<'a>; 4]>,
    image_opaque_bind_infos_vk: SmallVec<[vk::SparseImageOpaqueMemoryBindInfo<'a>; 4]>,
    image_bind_infos_vk: SmallVec<[vk::SparseImageMemoryBindInfo<'a>; 4]>,
    signal_semaphores_vk: SmallVec<[vk::Semaphore; 4]>,
}

impl BindSparseInfo {
    /// Whether the batch carries no binds and no semaphores. Such a batch
    /// can be dropped from the submission without changing its meaning.
    pub fn is_empty(&self) -> bool {
        self.wait_semaphores.is_empty()
            && self.buffer_binds.is_empty()
            && self.image_opaque_binds.is_empty()
            && self.image_binds.is_empty()
            && self.signal_semaphores.is_empty()
    }

    pub(crate) fn to_vk_fields2(&self) -> BindSparseInfoFields2Vk {
        let buffer_binds_vk = self
            .buffer_binds
            .iter()
            .map(|bind_info| bind_info.binds.iter().map(SparseMemoryBind::to_vk).collect())
            .collect();
        let image_opaque_binds_vk = self
            .image_opaque_binds
            .iter()
            .map(|bind_info| bind_info.binds.iter().map(SparseMemoryBind::to_vk).collect())
            .collect();
        let image_binds_vk = self
            .image_binds
            .iter()
            .map(|bind_info| {
                bind_info
                    .binds
                    .iter()
                    .map(SparseImageMemoryBind::to_vk)
                    .collect()
            })
            .collect();

        BindSparseInfoFields2Vk {
            buffer_binds_vk,
            image_opaque_binds_vk,
            image_binds_vk,
        }
    }

    pub(crate) fn to_vk_fields1<'a>(
        &self,
        fields2_vk: &'a BindSparseInfoFields2Vk,
    ) -> BindSparseInfoFields1Vk<'a> {
        let wait_semaphores_vk = self
            .wait_semaphores
            .iter()
            .map(|semaphore| semaphore.handle())
            .collect();
        let buffer_bind_infos_vk = self
            .buffer_binds
            .iter()
            .zip(&fields2_vk.buffer_binds_vk)
            .map(|(bind_info, binds_vk)| {
                vk::SparseBufferMemoryBindInfo::default()
                    .buffer(bind_info.buffer.handle())
                    .binds(binds_vk)
            })
            .collect();
        let image_opaque_bind_infos_vk = self
            .image_opaque_binds
            .iter()
            .zip(&fields2_vk.image_opaque_binds_vk)
            .map(|(bind_info, binds_vk)| {
                vk::SparseImageOpaqueMemoryBindInfo::default()
                    .image(bind_info.image.handle())
                    .binds(binds_vk)
            })
            .collect();
        let image_bind_infos_vk = self
            .image_binds
            .iter()
            .zip(&fields2_vk.image_binds_vk)
            .map(|(bind_info, binds_vk)| {
                vk::SparseImageMemoryBindInfo::default()
                    .image(bind_info.image.handle())
                    .binds(binds_vk)
            })
            .collect();
        let signal_semaphores_vk = self
            .signal_semaphores
            .iter()
            .map(|semaphore| semaphore.handle())
            .collect();

        BindSparseInfoFields1Vk {
            wait_semaphores_vk,
            buffer_bind_infos_vk,
            image_opaque_bind_infos_vk,
            image_bind_infos_vk,
            signal_semaphores_vk,
        }
    }

    pub(crate) fn to_vk<'a>(
        &self,
        fields1_vk: &'a BindSparseInfoFields1Vk<'_>,
    ) -> vk::BindSparseInfo<'a> {
        vk::BindSparseInfo::default()
            .wait_semaphores(&fields1_vk.wait_semaphores_vk)
            .buffer_binds(&fields1_vk.buffer_bind_infos_vk)
            .image_opaque_binds(&fields1_vk.image_opaque_bind_infos_vk)
            .image_binds(&fields1_vk.image_bind_infos_vk)
            .signal_semaphores(&fields1_vk.signal_semaphores_vk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_batch_is_empty() {
        assert!(BindSparseInfo::default().is_empty());
    }
}
