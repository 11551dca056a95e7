//! Device conformance runs. Every test returns early when no Vulkan
//! implementation or no suitable queue configuration is present, so the
//! suite is safe to run on machines without a GPU.

use sparse_cts::{
    cases::{
        buffer::{self, BufferCaseParams},
        image::{self, ImageCaseParams},
        mipmap, multisample,
        multisample::MultisampleCaseParams,
        queue_bind,
        queue_bind::QueueBindParams,
    },
    instance::Instance,
    resource::ImageKind,
    TestStatus,
};
use ash::vk;
use std::sync::Arc;

fn check(name: &str, status: TestStatus) {
    match status {
        TestStatus::Pass => {}
        TestStatus::NotSupported(reason) => {
            log::info!("{name}: not supported: {reason}");
        }
        TestStatus::Fail(reason) => panic!("{name} failed: {reason}"),
    }
}

fn instance() -> Option<Arc<Instance>> {
    let _ = pretty_env_logger::try_init();
    Instance::new()
}

#[test]
fn buffer_binding_small() {
    let Some(instance) = instance() else { return };
    let status = buffer::run(&instance, &BufferCaseParams { size: 1 << 10 }).unwrap();
    check("buffer 1 KiB", status);
}

#[test]
fn buffer_binding_medium() {
    let Some(instance) = instance() else { return };
    let status = buffer::run(&instance, &BufferCaseParams { size: 1 << 17 }).unwrap();
    check("buffer 128 KiB", status);
}

#[test]
fn buffer_binding_large() {
    let Some(instance) = instance() else { return };
    let status = buffer::run(&instance, &BufferCaseParams { size: 1 << 24 }).unwrap();
    check("buffer 16 MiB", status);
}

#[test]
fn image_opaque_2d() {
    let Some(instance) = instance() else { return };
    let params = ImageCaseParams {
        kind: ImageKind::Dim2d,
        grid: [512, 256, 1],
        layers: 1,
    };
    let status = image::run_opaque(&instance, &params).unwrap();
    check("opaque 2d", status);
}

#[test]
fn image_opaque_2d_array() {
    let Some(instance) = instance() else { return };
    let params = ImageCaseParams {
        kind: ImageKind::Dim2dArray,
        grid: [512, 256, 1],
        layers: 4,
    };
    let status = image::run_opaque(&instance, &params).unwrap();
    check("opaque 2d array", status);
}

#[test]
fn image_opaque_cube() {
    let Some(instance) = instance() else { return };
    let params = ImageCaseParams {
        kind: ImageKind::Cube,
        grid: [256, 256, 1],
        layers: 1,
    };
    let status = image::run_opaque(&instance, &params).unwrap();
    check("opaque cube", status);
}

#[test]
fn image_opaque_3d() {
    let Some(instance) = instance() else { return };
    let params = ImageCaseParams {
        kind: ImageKind::Dim3d,
        grid: [128, 64, 32],
        layers: 1,
    };
    let status = image::run_opaque(&instance, &params).unwrap();
    check("opaque 3d", status);
}

#[test]
fn image_residency_2d() {
    let Some(instance) = instance() else { return };
    let params = ImageCaseParams {
        kind: ImageKind::Dim2d,
        grid: [512, 256, 1],
        layers: 1,
    };
    let status = image::run_residency(&instance, &params).unwrap();
    check("residency 2d", status);
}

#[test]
fn image_residency_2d_unaligned() {
    let Some(instance) = instance() else { return };
    // Not a multiple of any standard block shape, so boundary blocks are
    // partial on both axes.
    let params = ImageCaseParams {
        kind: ImageKind::Dim2d,
        grid: [509, 275, 1],
        layers: 1,
    };
    let status = image::run_residency(&instance, &params).unwrap();
    check("residency 2d unaligned", status);
}

#[test]
fn image_residency_2d_array() {
    let Some(instance) = instance() else { return };
    let params = ImageCaseParams {
        kind: ImageKind::Dim2dArray,
        grid: [256, 256, 1],
        layers: 3,
    };
    let status = image::run_residency(&instance, &params).unwrap();
    check("residency 2d array", status);
}

#[test]
fn image_residency_3d() {
    let Some(instance) = instance() else { return };
    let params = ImageCaseParams {
        kind: ImageKind::Dim3d,
        grid: [64, 64, 16],
        layers: 1,
    };
    let status = image::run_residency(&instance, &params).unwrap();
    check("residency 3d", status);
}

#[test]
fn mipmap_residency_2d() {
    let Some(instance) = instance() else { return };
    let params = ImageCaseParams {
        kind: ImageKind::Dim2d,
        grid: [512, 512, 1],
        layers: 1,
    };
    let status = mipmap::run(&instance, &params).unwrap();
    check("mipmap 2d", status);
}

#[test]
fn mipmap_residency_2d_array() {
    let Some(instance) = instance() else { return };
    let params = ImageCaseParams {
        kind: ImageKind::Dim2dArray,
        grid: [256, 256, 1],
        layers: 2,
    };
    let status = mipmap::run(&instance, &params).unwrap();
    check("mipmap 2d array", status);
}

#[test]
fn multisample_residency_2d_2_samples() {
    let Some(instance) = instance() else { return };
    let params = MultisampleCaseParams {
        kind: ImageKind::Dim2d,
        grid: [512, 256, 1],
        layers: 1,
        samples: vk::SampleCountFlags::TYPE_2,
    };
    let status = multisample::run(&instance, &params).unwrap();
    check("multisample 2d 2x", status);
}

#[test]
fn multisample_residency_2d_4_samples() {
    let Some(instance) = instance() else { return };
    let params = MultisampleCaseParams {
        kind: ImageKind::Dim2d,
        grid: [503, 137, 1],
        layers: 1,
        samples: vk::SampleCountFlags::TYPE_4,
    };
    let status = multisample::run(&instance, &params).unwrap();
    check("multisample 2d 4x", status);
}

#[test]
fn multisample_residency_2d_array_8_samples() {
    let Some(instance) = instance() else { return };
    let params = MultisampleCaseParams {
        kind: ImageKind::Dim2dArray,
        grid: [256, 256, 1],
        layers: 2,
        samples: vk::SampleCountFlags::TYPE_8,
    };
    let status = multisample::run(&instance, &params).unwrap();
    check("multisample 2d array 8x", status);
}

#[test]
fn queue_bind_single_with_fence() {
    let Some(instance) = instance() else { return };
    let params = QueueBindParams {
        queue_count: 1,
        semaphore_count: 0,
        empty_bind: true,
        use_fence: true,
    };
    check("queue bind single", queue_bind::run(&instance, params).unwrap());
}

#[test]
fn queue_bind_zero_bind_infos_signal_fence() {
    let Some(instance) = instance() else { return };
    // No binds and no semaphores, so every batch goes down with zero bind
    // infos and the trailing fence must still signal.
    let params = QueueBindParams {
        queue_count: 2,
        semaphore_count: 0,
        empty_bind: true,
        use_fence: true,
    };
    check("queue bind empty", queue_bind::run(&instance, params).unwrap());
}

#[test]
fn queue_bind_chained_pair() {
    let Some(instance) = instance() else { return };
    let params = QueueBindParams {
        queue_count: 2,
        semaphore_count: 1,
        empty_bind: false,
        use_fence: true,
    };
    check("queue bind pair", queue_bind::run(&instance, params).unwrap());
}

#[test]
fn queue_bind_chain_of_three_no_fence() {
    let Some(instance) = instance() else { return };
    let params = QueueBindParams {
        queue_count: 3,
        semaphore_count: 2,
        empty_bind: true,
        use_fence: false,
    };
    check("queue bind chain", queue_bind::run(&instance, params).unwrap());
}

#[test]
fn queue_bind_wide_semaphores() {
    let Some(instance) = instance() else { return };
    let params = QueueBindParams {
        queue_count: 2,
        semaphore_count: 3,
        empty_bind: false,
        use_fence: true,
    };
    check("queue bind wide", queue_bind::run(&instance, params).unwrap());
}
