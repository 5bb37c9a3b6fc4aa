//! Shader dispatch table layout and contents.

use kinetic_core::{GeometryKind, MaterialConstants, RayType, SceneConfig};
use kinetic_rt::{hit_group_index, DeviceLimits, ShaderDispatchTable};
use kinetic_test::recording::HANDLE_SIZE;
use kinetic_test::{RecordingDevice, SceneHarness};

#[test]
fn layout_strides_and_offsets() {
    let harness = SceneHarness::new(SceneConfig::default()).unwrap();
    let layout = harness.table().layout();

    assert_eq!(layout.ray_generation.stride(), 32);
    assert_eq!(layout.miss.stride(), 32);
    // Identifier plus 48 bytes of material constants
    assert_eq!(layout.hit_group.stride(), 96);
    assert_eq!(layout.miss_offset, 64);
    assert_eq!(layout.hit_group_offset, 128);
    assert_eq!(layout.hit_group.len(), GeometryKind::COUNT * RayType::COUNT);
    assert_eq!(layout.total_size, 128 + 4 * 96);
}

#[test]
fn ray_generation_region_is_one_record() {
    let harness = SceneHarness::new(SceneConfig::default()).unwrap();
    let region = harness.table().ray_generation_region();
    assert_eq!(region.size, region.stride);

    let miss = harness.table().miss_region();
    assert_eq!(miss.address - region.address, 64);
    assert_eq!(miss.size, 2 * 32);
}

#[test]
fn hit_records_carry_material_constants() {
    let harness = SceneHarness::new(SceneConfig::default()).unwrap();
    let region = harness.table().hit_group_region();

    for kind in GeometryKind::ALL {
        for ray in RayType::ALL {
            let record = region.address + u64::from(hit_group_index(kind, ray)) * region.stride;
            let identifier = harness.device.read(record, u64::from(HANDLE_SIZE)).unwrap();
            // Handles 4 and 5 are the hit groups
            let expected = 4 + ray.index() as u8;
            assert!(identifier.iter().all(|&b| b == expected));

            let constants = harness
                .device
                .read(record + u64::from(HANDLE_SIZE), 48)
                .unwrap();
            assert_eq!(
                constants,
                bytemuck::bytes_of(&MaterialConstants::for_kind(kind))
            );
        }
    }
}

#[test]
fn hit_group_indices() {
    assert_eq!(hit_group_index(GeometryKind::Plane, RayType::Primary), 0);
    assert_eq!(hit_group_index(GeometryKind::Plane, RayType::Shadow), 1);
    assert_eq!(hit_group_index(GeometryKind::Sphere, RayType::Primary), 2);
    assert_eq!(hit_group_index(GeometryKind::Sphere, RayType::Shadow), 3);
}

#[test]
fn larger_handles_widen_every_stride() {
    let limits = DeviceLimits {
        shader_group_handle_size: 64,
        shader_group_handle_alignment: 64,
        shader_group_base_alignment: 64,
        scratch_alignment: 256,
    };
    let mut device = RecordingDevice::new().with_limits(limits);
    let identifiers = device.shader_identifiers().unwrap();
    let mut table = ShaderDispatchTable::upload(&mut device, &identifiers).unwrap();

    let layout = table.layout();
    assert_eq!(layout.ray_generation.stride(), 64);
    assert_eq!(layout.hit_group.stride(), 128);
    assert_eq!(layout.miss_offset, 64);
    assert_eq!(layout.hit_group_offset, 192);

    table.release(&mut device).unwrap();
    table.release(&mut device).unwrap();
    assert_eq!(device.live_buffers(), 0);
}

#[test]
fn mismatched_identifiers_are_rejected() {
    let mut device = RecordingDevice::new();
    let mut identifiers = device.shader_identifiers().unwrap();
    identifiers.miss[1].truncate(16);
    assert!(ShaderDispatchTable::upload(&mut device, &identifiers).is_err());
    assert_eq!(device.live_buffers(), 0);
}
