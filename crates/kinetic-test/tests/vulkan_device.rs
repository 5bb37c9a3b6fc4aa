//! Builds and refits on a real ray tracing device.
//!
//! Each test returns early when no Vulkan device with ray tracing support is
//! available.

use std::sync::Arc;

use kinetic_core::constants::FRAME_COUNT;
use kinetic_core::{SceneConfig, UpdateMode};
use kinetic_gpu::{GpuContext, GpuContextBuilder};
use kinetic_rt::{
    AccelerationDevice, AccelerationStructureManager, BuildMode, FrameScheduler, VulkanDevice,
};
use kinetic_test::FixtureMeshes;

fn ray_tracing_context() -> Option<Arc<GpuContext>> {
    match GpuContextBuilder::new()
        .app_name("kinetic-test")
        .validation(false)
        .build()
    {
        Ok(context) => Some(Arc::new(context)),
        Err(err) => {
            eprintln!("no ray tracing device, skipping: {err}");
            None
        }
    }
}

#[test]
fn context_reports_ray_tracing_limits() {
    let Some(context) = ray_tracing_context() else {
        return;
    };
    let rt = context.ray_tracing();
    assert!(rt.shader_group_handle_size > 0);
    assert!(rt.shader_group_base_alignment >= rt.shader_group_handle_alignment);
    assert!(context.capabilities().ray_tracing.is_some());
}

#[test]
fn frames_build_and_refit() {
    let Some(context) = ray_tracing_context() else {
        return;
    };
    let mut device = VulkanDevice::new(context, FRAME_COUNT).unwrap();
    let config = SceneConfig::default()
        .with_update_mode(UpdateMode::UpdateBuildEveryXFrames)
        .with_build_frequency(3)
        .with_group_count(2)
        .with_geometries_per_group(4)
        .with_tessellation_factor(4);
    let mut manager = AccelerationStructureManager::new(config);
    let mut scheduler = FrameScheduler::default();
    let mut meshes = FixtureMeshes::new();

    let reports: Vec<_> = (0..5)
        .map(|_| {
            scheduler
                .run_frame(&mut device, &mut manager, &mut meshes, None)
                .unwrap()
        })
        .collect();
    device.wait_idle().unwrap();

    assert!(reports[0].reinitialized);
    let modes: Vec<_> = reports.iter().map(|r| r.builds.mode).collect();
    assert_eq!(
        modes,
        vec![
            Some(BuildMode::Build),
            Some(BuildMode::Update),
            Some(BuildMode::Update),
            Some(BuildMode::Build),
            Some(BuildMode::Update),
        ]
    );
    assert!(reports.iter().all(|r| !r.traced));
    assert_ne!(manager.top_level_address(&device).unwrap(), 0);
    assert!(manager.stats().memory_footprint > 0);

    manager.release_device_resources(&mut device).unwrap();
    assert_eq!(device.context().allocator().lock().live_buffers(), 0);
}
