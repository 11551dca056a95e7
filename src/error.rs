use ash::vk;
use std::{
    error::Error,
    fmt::{Display, Formatter},
};

/// An unexpected, non-recoverable error reported by the Vulkan implementation.
///
/// A conformant driver is assumed never to return these in the code paths the
/// suite exercises, so they abort the running case instead of being retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VulkanError {
    /// A Vulkan command returned a non-success result code.
    Result(vk::Result),

    /// No memory type satisfied a request that the Vulkan specification
    /// guarantees to be satisfiable (such as host-visible coherent memory).
    NoSuitableMemoryType,
}

impl From<vk::Result> for VulkanError {
    fn from(result: vk::Result) -> Self {
        debug_assert_ne!(result, vk::Result::SUCCESS);
        VulkanError::Result(result)
    }
}

impl Display for VulkanError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            VulkanError::Result(result) => write!(f, "Vulkan command returned {:?}", result),
            VulkanError::NoSuitableMemoryType => {
                write!(f, "no memory type satisfies a mandatory requirement")
            }
        }
    }
}

impl Error for VulkanError {}

/// The outcome of one conformance case.
///
/// A case reports exactly one of these. `NotSupported` is an ordinary,
/// non-failing outcome used when a required feature, format or limit is
/// absent on the implementation under test.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TestStatus {
    Pass,
    Fail(String),
    NotSupported(String),
}

impl TestStatus {
    /// Returns a failing status, logging the message first.
    pub fn fail(message: impl Into<String>) -> Self {
        let message = message.into();
        log::error!("verification failed: {}", message);
        TestStatus::Fail(message)
    }

    /// Returns a not-supported status with the reason.
    pub fn not_supported(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        log::debug!("not supported: {}", reason);
        TestStatus::NotSupported(reason)
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, TestStatus::Pass)
    }
}

impl Display for TestStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TestStatus::Pass => write!(f, "pass"),
            TestStatus::Fail(message) => write!(f, "fail: {}", message),
            TestStatus::NotSupported(reason) => write!(f, "not supported: {}", reason),
        }
    }
}
