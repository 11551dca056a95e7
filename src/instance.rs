use crate::VulkanError;
use ash::vk;
use std::sync::Arc;

/// A loaded Vulkan library together with an instance created from it.
///
/// The instance is created with no layers and no extensions; everything the
/// suite needs is core Vulkan 1.0. Physical-device queries go through this
/// object so that callers never touch the raw entry points directly.
pub struct Instance {
    handle: ash::Instance,
    _entry: ash::Entry,
}

impl Instance {
    /// Loads the system Vulkan library and creates an instance.
    ///
    /// Returns `None` when no Vulkan implementation is present or instance
    /// creation fails; callers treat that as "nothing to test here".
    pub fn new() -> Option<Arc<Self>> {
        let entry = match unsafe { ash::Entry::load() } {
            Ok(entry) => entry,
            Err(err) => {
                log::debug!("no Vulkan library could be loaded: {:?}", err);
                return None;
            }
        };

        let application_info = vk::ApplicationInfo::default()
            .application_name(c"sparse-cts")
            .api_version(vk::API_VERSION_1_0);
        let create_info = vk::InstanceCreateInfo::default().application_info(&application_info);

        let handle = match unsafe { entry.create_instance(&create_info, None) } {
            Ok(handle) => handle,
            Err(err) => {
                log::debug!("instance creation failed: {:?}", err);
                return None;
            }
        };

        Some(Arc::new(Instance {
            handle,
            _entry: entry,
        }))
    }

    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.handle
    }

    pub fn enumerate_physical_devices(&self) -> Result<Vec<vk::PhysicalDevice>, VulkanError> {
        Ok(unsafe { self.handle.enumerate_physical_devices() }?)
    }

    /// Returns the first reported physical device, if any.
    pub fn first_physical_device(&self) -> Option<vk::PhysicalDevice> {
        self.enumerate_physical_devices()
            .ok()?
            .into_iter()
            .next()
    }

    pub fn queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Vec<vk::QueueFamilyProperties> {
        unsafe {
            self.handle
                .get_physical_device_queue_family_properties(physical_device)
        }
    }

    pub fn properties(&self, physical_device: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties {
        unsafe { self.handle.get_physical_device_properties(physical_device) }
    }

    pub fn features(&self, physical_device: vk::PhysicalDevice) -> vk::PhysicalDeviceFeatures {
        unsafe { self.handle.get_physical_device_features(physical_device) }
    }

    pub fn memory_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceMemoryProperties {
        unsafe {
            self.handle
                .get_physical_device_memory_properties(physical_device)
        }
    }

    /// Sparse format properties for the given image parameters.
    ///
    /// An empty vector means the implementation does not support sparse
    /// operations for this combination at all.
    pub fn sparse_image_format_properties(
        &self,
        physical_device: vk::PhysicalDevice,
        format: vk::Format,
        image_type: vk::ImageType,
        samples: vk::SampleCountFlags,
        usage: vk::ImageUsageFlags,
        tiling: vk::ImageTiling,
    ) -> Vec<vk::SparseImageFormatProperties> {
        unsafe {
            self.handle.get_physical_device_sparse_image_format_properties(
                physical_device,
                format,
                image_type,
                samples,
                usage,
                tiling,
            )
        }
    }

    /// Returns `None` when the format/usage combination is unsupported, which
    /// is a "not supported" outcome rather than an error.
    pub fn image_format_properties(
        &self,
        physical_device: vk::PhysicalDevice,
        format: vk::Format,
        image_type: vk::ImageType,
        tiling: vk::ImageTiling,
        usage: vk::ImageUsageFlags,
        flags: vk::ImageCreateFlags,
    ) -> Result<Option<vk::ImageFormatProperties>, VulkanError> {
        match unsafe {
            self.handle.get_physical_device_image_format_properties(
                physical_device,
                format,
                image_type,
                tiling,
                usage,
                flags,
            )
        } {
            Ok(properties) => Ok(Some(properties)),
            Err(vk::Result::ERROR_FORMAT_NOT_SUPPORTED) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe { self.handle.destroy_instance(None) };
    }
}
