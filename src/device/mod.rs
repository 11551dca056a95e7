//! Logical device creation and queue planning.
//!
//! Tests describe the queues they need as a list of [`QueueRequirement`]s.
//! [`plan_queues`] resolves those requirements against the physical device's
//! queue families before the device is created, so that creation either
//! enables every queue a test will use or the test is skipped up front.

pub mod queue;

use crate::{instance::Instance, VulkanError};
use ash::vk;
use foldhash::HashMap;
use smallvec::SmallVec;
use std::sync::Arc;

pub use queue::{Queue, QueueGuard};

/// A request for a number of queues whose family supports the given flags.
#[derive(Clone, Copy, Debug)]
pub struct QueueRequirement {
    pub flags: vk::QueueFlags,
    pub count: u32,
}

/// Where one requested queue ended up after planning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueSelection {
    /// Index of the originating requirement in the input slice.
    pub requirement: usize,
    pub family_index: u32,
    pub queue_index: u32,
}

/// The resolved queue layout for device creation.
#[derive(Clone, Debug)]
pub struct QueuePlan {
    /// `(family_index, queue_count)` pairs, in first-use order. Each family
    /// appears at most once.
    pub families: Vec<(u32, u32)>,
    /// One entry per requested queue, in requirement order.
    pub selections: Vec<QueueSelection>,
}

/// Resolves queue requirements against the reported queue families.
///
/// Each requirement is served by the first family whose flags contain the
/// requested flags. Requirements landing in the same family accumulate: the
/// family is created with the sum of their counts, clamped to its
/// `queue_count`, and later requirements continue from where earlier ones
/// stopped so they receive distinct queues whenever the family has enough.
/// When the clamp kicks in, the available queues are reused round-robin, so
/// two requested queues may map to the same `(family_index, queue_index)`
/// pair. Returns `None` when some requirement matches no family at all.
pub fn plan_queues(
    families: &[vk::QueueFamilyProperties],
    requirements: &[QueueRequirement],
) -> Option<QueuePlan> {
    // Per family: (created queue count, next index to hand out).
    let mut used: HashMap<u32, (u32, u32)> = HashMap::default();
    let mut order: Vec<u32> = Vec::new();
    let mut selections = Vec::new();

    for (requirement_index, requirement) in requirements.iter().enumerate() {
        let (family_index, family) = families
            .iter()
            .enumerate()
            .find(|(_, family)| family.queue_flags.contains(requirement.flags))?;
        let family_index = family_index as u32;

        let entry = used.entry(family_index).or_insert_with(|| {
            order.push(family_index);
            (0, 0)
        });
        entry.0 = (entry.0 + requirement.count).min(family.queue_count);
        let created = entry.0;

        for _ in 0..requirement.count {
            let queue_index = entry.1 % created;
            entry.1 += 1;
            selections.push(QueueSelection {
                requirement: requirement_index,
                family_index,
                queue_index,
            });
        }
    }

    let families = order
        .into_iter()
        .map(|family_index| (family_index, used[&family_index].0))
        .collect();

    Some(QueuePlan {
        families,
        selections,
    })
}

/// A logical device together with the physical-device data that created it.
pub struct Device {
    handle: ash::Device,
    instance: Arc<Instance>,
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    features: vk::PhysicalDeviceFeatures,
}

impl Device {
    /// Creates a logical device with the queues resolved by [`plan_queues`].
    ///
    /// All features the physical device reports are enabled, so sparse
    /// feature bits can be checked against [`Device::features`] after
    /// creation. Returns `Ok(None)` when the queue requirements cannot be
    /// satisfied.
    pub fn create_with_queues(
        instance: Arc<Instance>,
        physical_device: vk::PhysicalDevice,
        requirements: &[QueueRequirement],
    ) -> Result<Option<(Arc<Self>, QueuePlan)>, VulkanError> {
        let families = instance.queue_family_properties(physical_device);
        let Some(plan) = plan_queues(&families, requirements) else {
            return Ok(None);
        };

        let max_count = plan
            .families
            .iter()
            .map(|&(_, count)| count)
            .max()
            .unwrap_or(0) as usize;
        let priorities = vec![1.0f32; max_count];

        let queue_create_infos: SmallVec<[_; 4]> = plan
            .families
            .iter()
            .map(|&(family_index, count)| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family_index)
                    .queue_priorities(&priorities[..count as usize])
            })
            .collect();

        let features = instance.features(physical_device);
        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_features(&features);

        let handle = unsafe {
            instance
                .handle()
                .create_device(physical_device, &create_info, None)
        }?;

        let properties = instance.properties(physical_device);
        let memory_properties = instance.memory_properties(physical_device);

        let device = Arc::new(Device {
            handle,
            instance,
            physical_device,
            properties,
            memory_properties,
            features,
        });

        Ok(Some((device, plan)))
    }

    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.handle
    }

    #[inline]
    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    #[inline]
    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    #[inline]
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    #[inline]
    pub fn features(&self) -> &vk::PhysicalDeviceFeatures {
        &self.features
    }

    pub fn wait_idle(&self) -> Result<(), VulkanError> {
        Ok(unsafe { self.handle.device_wait_idle() }?)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe { self.handle.destroy_device(None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, queue_count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count,
            ..Default::default()
        }
    }

    #[test]
    fn plan_picks_first_matching_family() {
        let families = [
            family(vk::QueueFlags::TRANSFER, 1),
            family(
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::SPARSE_BINDING,
                4,
            ),
        ];
        let plan = plan_queues(
            &families,
            &[QueueRequirement {
                flags: vk::QueueFlags::SPARSE_BINDING,
                count: 1,
            }],
        )
        .unwrap();

        assert_eq!(plan.families, vec![(1, 1)]);
        assert_eq!(
            plan.selections,
            vec![QueueSelection {
                requirement: 0,
                family_index: 1,
                queue_index: 0,
            }],
        );
    }

    #[test]
    fn plan_reuses_queues_when_family_is_small() {
        let families = [family(
            vk::QueueFlags::COMPUTE | vk::QueueFlags::SPARSE_BINDING,
            2,
        )];
        let plan = plan_queues(
            &families,
            &[QueueRequirement {
                flags: vk::QueueFlags::SPARSE_BINDING,
                count: 3,
            }],
        )
        .unwrap();

        assert_eq!(plan.families, vec![(0, 2)]);
        let indices: Vec<u32> = plan.selections.iter().map(|s| s.queue_index).collect();
        assert_eq!(indices, vec![0, 1, 0]);
    }

    #[test]
    fn plan_merges_requirements_served_by_one_family() {
        let families = [family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::SPARSE_BINDING,
            8,
        )];
        let plan = plan_queues(
            &families,
            &[
                QueueRequirement {
                    flags: vk::QueueFlags::SPARSE_BINDING,
                    count: 1,
                },
                QueueRequirement {
                    flags: vk::QueueFlags::COMPUTE,
                    count: 2,
                },
            ],
        )
        .unwrap();

        // One family entry sized for both requirements, distinct queue
        // indices throughout.
        assert_eq!(plan.families, vec![(0, 3)]);
        assert_eq!(plan.selections.len(), 3);
        assert_eq!(plan.selections[0].queue_index, 0);
        assert_eq!(plan.selections[1].queue_index, 1);
        assert_eq!(plan.selections[2].queue_index, 2);
    }

    #[test]
    fn plan_gives_aliasing_requirements_separate_queues() {
        // A sparse queue and a transfer queue resolved to the same family
        // must not alias onto one queue index.
        let families = [family(
            vk::QueueFlags::TRANSFER | vk::QueueFlags::SPARSE_BINDING,
            4,
        )];
        let plan = plan_queues(
            &families,
            &[
                QueueRequirement {
                    flags: vk::QueueFlags::SPARSE_BINDING,
                    count: 1,
                },
                QueueRequirement {
                    flags: vk::QueueFlags::TRANSFER,
                    count: 1,
                },
            ],
        )
        .unwrap();

        assert_eq!(plan.families, vec![(0, 2)]);
        assert_eq!(plan.selections[0].queue_index, 0);
        assert_eq!(plan.selections[1].queue_index, 1);
    }

    #[test]
    fn plan_fails_when_no_family_matches() {
        let families = [family(vk::QueueFlags::TRANSFER, 1)];
        assert!(plan_queues(
            &families,
            &[QueueRequirement {
                flags: vk::QueueFlags::SPARSE_BINDING,
                count: 1,
            }],
        )
        .is_none());
    }
}
