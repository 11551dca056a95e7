//! Conformance tests for the Vulkan sparse-resource binding and residency model.
//!
//! Sparse resources are buffers and images that are created without backing
//! memory and bound to device memory afterwards, through [`queue_bind_sparse`]
//! operations that are synchronized with regular queue submissions using
//! semaphores and fences. This crate exercises that model the way the Khronos
//! conformance suite does:
//!
//! - [`device`] selects queue families for a set of capability requirements
//!   and creates a logical device exposing exactly those queues.
//! - [`memory`] picks compatible memory types and owns the per-bind device
//!   memory allocations, including the sparse bind descriptor types.
//! - [`sparse`] computes bind plans (buffer chunking, per-mip block grids,
//!   mip-tail regions) and validates driver-reported residency metadata
//!   against the shapes the Vulkan specification mandates.
//! - [`submit`] sequences sparse-bind operations against command-buffer
//!   submissions across queues, and [`verify`] compares read-back results
//!   against host-computed references.
//! - [`cases`] contains the runnable conformance cases built from the above.
//!
//! Every case reports a [`TestStatus`]: `Pass`, `Fail` with a message, or
//! `NotSupported` when the implementation lacks a required feature. A missing
//! feature is never an error; an unexpected non-success result from a Vulkan
//! command is (see [`VulkanError`]).
//!
//! [`queue_bind_sparse`]: crate::device::QueueGuard::bind_sparse

pub mod cases;
pub mod command;
pub mod device;
mod error;
pub mod instance;
pub mod memory;
pub mod resource;
pub mod sparse;
pub mod submit;
pub mod sync;
pub mod verify;

pub use error::{TestStatus, VulkanError};

/// Alias for `vk::DeviceSize`, used for byte offsets and sizes on the device.
pub type DeviceSize = u64;

/// Returns whether `value` is a multiple of `alignment`.
///
/// `alignment` must be a power of two, as all Vulkan-reported alignments are.
#[inline]
pub(crate) fn is_aligned(value: DeviceSize, alignment: DeviceSize) -> bool {
    debug_assert!(alignment.is_power_of_two());
    value & (alignment - 1) == 0
}

#[cfg(test)]
mod tests {
    #[test]
    fn alignment_helper() {
        assert!(super::is_aligned(0, 256));
        assert!(super::is_aligned(4096, 256));
        assert!(!super::is_aligned(4097, 256));
    }
}
