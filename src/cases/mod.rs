//! The conformance cases and the per-case device context they share.

pub mod buffer;
pub mod image;
pub mod mipmap;
pub mod multisample;
pub mod queue_bind;

use crate::{
    device::{Device, Queue, QueueRequirement, QueueSelection},
    instance::Instance,
    resource::ImageKind,
    TestStatus, VulkanError,
};
use ash::vk;
use std::sync::Arc;

/// The color format every image case reads and writes. An integer format
/// keeps verification an exact byte compare.
pub const CASE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UINT;
pub const CASE_FORMAT_BITS: u32 = 32;

/// A device created for one case, with the queues its requirements
/// resolved to.
pub struct CaseContext {
    instance: Arc<Instance>,
    device: Arc<Device>,
    queues: Vec<(QueueSelection, Arc<Queue>)>,
}

impl CaseContext {
    /// Picks the first physical device and creates a logical device with
    /// the requested queues. Returns `Ok(None)` when there is no physical
    /// device or the queue requirements cannot be met.
    pub fn new(
        instance: &Arc<Instance>,
        requirements: &[QueueRequirement],
    ) -> Result<Option<Self>, VulkanError> {
        let Some(physical_device) = instance.first_physical_device() else {
            return Ok(None);
        };

        let Some((device, plan)) =
            Device::create_with_queues(instance.clone(), physical_device, requirements)?
        else {
            return Ok(None);
        };

        let queues = plan
            .selections
            .iter()
            .map(|&selection| {
                let queue = Queue::get(device.clone(), selection.family_index, selection.queue_index);
                (selection, queue)
            })
            .collect();

        Ok(Some(CaseContext {
            instance: instance.clone(),
            device,
            queues,
        }))
    }

    #[inline]
    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// The `occurrence`-th queue granted for requirement `requirement`.
    pub fn queue(&self, requirement: usize, occurrence: usize) -> &Arc<Queue> {
        self.queues
            .iter()
            .filter(|(selection, _)| selection.requirement == requirement)
            .map(|(_, queue)| queue)
            .nth(occurrence)
            .unwrap()
    }

    /// Distinct queue family indices across all granted queues, for
    /// concurrent-sharing resource creation.
    pub fn sharing_families(&self) -> Vec<u32> {
        let mut families: Vec<u32> = self
            .queues
            .iter()
            .map(|(selection, _)| selection.family_index)
            .collect();
        families.sort_unstable();
        families.dedup();
        families
    }
}

/// Gate: the device must support sparse binding at all.
pub fn require_sparse_binding(device: &Device) -> Option<TestStatus> {
    if device.features().sparse_binding == 0 {
        return Some(TestStatus::not_supported("sparseBinding feature not present"));
    }

    None
}

/// Gate: the device must support sparse residency for this image shape.
pub fn require_image_residency(device: &Device, kind: ImageKind) -> Option<TestStatus> {
    if let Some(status) = require_sparse_binding(device) {
        return Some(status);
    }
    if !kind.residency_feature_enabled(device.features()) {
        return Some(TestStatus::not_supported(format!(
            "sparse residency not supported for {:?} images",
            kind.image_type()
        )));
    }

    None
}

/// Gate: the device must support sparse residency at this sample count.
pub fn require_sample_count_residency(
    device: &Device,
    samples: vk::SampleCountFlags,
) -> Option<TestStatus> {
    let features = device.features();
    let supported = if samples == vk::SampleCountFlags::TYPE_2 {
        features.sparse_residency2_samples != 0
    } else if samples == vk::SampleCountFlags::TYPE_4 {
        features.sparse_residency4_samples != 0
    } else if samples == vk::SampleCountFlags::TYPE_8 {
        features.sparse_residency8_samples != 0
    } else if samples == vk::SampleCountFlags::TYPE_16 {
        features.sparse_residency16_samples != 0
    } else {
        false
    };

    if !supported {
        return Some(TestStatus::not_supported(format!(
            "sparse residency not supported at {samples:?}"
        )));
    }

    None
}

/// Gate: a sparse buffer of this size must fit the sparse address space.
pub fn require_sparse_address_space(device: &Device, size: u64) -> Option<TestStatus> {
    if size > device.properties().limits.sparse_address_space_size {
        return Some(TestStatus::not_supported(format!(
            "buffer size {size} exceeds sparseAddressSpaceSize"
        )));
    }

    None
}

/// Gate: the extent must fit the device's image dimension limits.
pub fn require_image_extent(device: &Device, kind: ImageKind, extent: [u32; 3]) -> Option<TestStatus> {
    let limits = &device.properties().limits;
    let supported = match kind.image_type() {
        vk::ImageType::TYPE_1D => extent[0] <= limits.max_image_dimension1_d,
        vk::ImageType::TYPE_2D => {
            extent[0].max(extent[1]) <= limits.max_image_dimension2_d
        }
        _ => extent.iter().copied().max().unwrap() <= limits.max_image_dimension3_d,
    };

    if !supported {
        return Some(TestStatus::not_supported(format!(
            "extent {extent:?} exceeds the image dimension limit"
        )));
    }

    None
}

/// Gate: image creation with these parameters must be supported.
pub fn require_image_format_support(
    context: &CaseContext,
    kind: ImageKind,
    usage: vk::ImageUsageFlags,
    flags: vk::ImageCreateFlags,
    samples: vk::SampleCountFlags,
) -> Result<Option<TestStatus>, VulkanError> {
    let Some(properties) = context.instance().image_format_properties(
        context.device().physical_device(),
        CASE_FORMAT,
        kind.image_type(),
        vk::ImageTiling::OPTIMAL,
        usage,
        flags,
    )?
    else {
        return Ok(Some(TestStatus::not_supported(
            "image format not supported with sparse creation flags",
        )));
    };
    if !properties.sample_counts.contains(samples) {
        return Ok(Some(TestStatus::not_supported(format!(
            "sample count {samples:?} not supported for this image"
        ))));
    }

    Ok(None)
}

/// Gate: the sparse-format query must report at least one aspect. Only
/// meaningful for sparse-residency images; binding-only sparse images have
/// no sparse format properties.
pub fn require_sparse_format_properties(
    context: &CaseContext,
    kind: ImageKind,
    usage: vk::ImageUsageFlags,
    samples: vk::SampleCountFlags,
) -> Option<TestStatus> {
    let sparse_properties = context.instance().sparse_image_format_properties(
        context.device().physical_device(),
        CASE_FORMAT,
        kind.image_type(),
        samples,
        usage,
        vk::ImageTiling::OPTIMAL,
    );
    if sparse_properties.is_empty() {
        return Some(TestStatus::not_supported(
            "no sparse image format properties reported",
        ));
    }

    None
}
