//! Headless [`AccelerationDevice`] that records every command and checks
//! ordering rules as they are recorded.
//!
//! Sizes are deterministic functions of the build inputs so that tests can
//! reason about scratch and result requirements exactly. Host-visible
//! buffers keep their bytes, which lets tests read back instance descriptors
//! and transforms.

use std::collections::HashMap;
use std::fmt;

use ash::vk;
use kinetic_core::math::align_up;
use kinetic_gpu::{DescriptorHandle, GpuError};
use kinetic_rt::{
    AccelerationDevice, BufferDesc, BufferKind, BuildFlags, BuildInputs, BuildMode, BuildSizes,
    DeviceLimits, DispatchRays, InstanceDescriptor, ShaderIdentifiers, StructureLevel,
};

pub const HANDLE_SIZE: u32 = 32;
pub const HANDLE_ALIGNMENT: u32 = 32;
pub const BASE_ALIGNMENT: u32 = 64;
pub const SCRATCH_ALIGNMENT: u32 = 128;

const ADDRESS_BASE: u64 = 0x10_0000;
const ADDRESS_ALIGNMENT: u64 = 256;
const TRANSFORM_SIZE: u64 = 48;

type RtResult<T> = kinetic_rt::Result<T>;

/// Buffer handed out by [`RecordingDevice`].
#[derive(Debug)]
pub struct RecordedBuffer {
    id: u32,
    address: u64,
    size: u64,
    kind: BufferKind,
}

impl RecordedBuffer {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }
}

/// Structure handed out by [`RecordingDevice`].
#[derive(Debug)]
pub struct RecordedStructure {
    id: u32,
    level: StructureLevel,
    size: u64,
    address: u64,
}

impl RecordedStructure {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn level(&self) -> StructureLevel {
        self.level
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// One recorded command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Build {
        structure: u32,
        level: StructureLevel,
        mode: BuildMode,
        flags: BuildFlags,
        geometries: u32,
        primitives: u32,
        scratch_address: u64,
    },
    PreBuildBarrier,
    BuildBarrier,
    TraceBarrier,
    TraceRays(DispatchRays),
}

impl Command {
    pub fn is_build(&self) -> bool {
        matches!(self, Self::Build { .. })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Build {
                level: StructureLevel::Bottom,
                mode,
                geometries,
                primitives,
                ..
            } => write!(f, "build bottom x{geometries} triangles={primitives} {mode:?}"),
            Self::Build {
                level: StructureLevel::Top,
                mode,
                primitives,
                ..
            } => write!(f, "build top instances={primitives} {mode:?}"),
            Self::PreBuildBarrier => f.write_str("barrier pre-build"),
            Self::BuildBarrier => f.write_str("barrier build"),
            Self::TraceBarrier => f.write_str("barrier trace"),
            Self::TraceRays(dispatch) => write!(f, "trace {}x{}", dispatch.width, dispatch.height),
        }
    }
}

/// Commands of one submitted frame.
#[derive(Clone, Debug)]
pub struct RecordedFrame {
    pub frame_index: usize,
    pub commands: Vec<Command>,
}

impl RecordedFrame {
    /// Build commands in recording order.
    pub fn builds(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter().filter(|c| c.is_build())
    }

    pub fn build_count(&self, level: StructureLevel) -> usize {
        self.builds()
            .filter(|c| matches!(c, Command::Build { level: l, .. } if *l == level))
            .count()
    }

    /// Mode of every build, `None` when the frame mixes modes or has none.
    pub fn uniform_mode(&self) -> Option<BuildMode> {
        let mut modes = self.commands.iter().filter_map(|c| match c {
            Command::Build { mode, .. } => Some(*mode),
            _ => None,
        });
        let first = modes.next()?;
        modes.all(|m| m == first).then_some(first)
    }

    pub fn traced(&self) -> bool {
        self.commands
            .iter()
            .any(|c| matches!(c, Command::TraceRays(_)))
    }

    /// One command per line, as rendered by [`Command`]'s `Display`.
    pub fn transcript(&self) -> String {
        self.commands
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

struct BufferState {
    address: u64,
    size: u64,
    kind: BufferKind,
    name: String,
    data: Option<Vec<u8>>,
}

struct StructureState {
    level: StructureLevel,
    size: u64,
    address: u64,
    last_build_flags: Option<BuildFlags>,
}

/// Device double recording commands per frame.
pub struct RecordingDevice {
    limits: DeviceLimits,
    next_id: u32,
    next_address: u64,
    buffers: HashMap<u32, BufferState>,
    structures: HashMap<u32, StructureState>,
    recording: Option<(usize, Vec<Command>)>,
    frames: Vec<RecordedFrame>,
    exposed_views: HashMap<u32, u32>,
    exposed_top_level: Option<u32>,
    violations: Vec<String>,
    /// A submitted frame traced and no later barrier has ordered it before builds.
    unordered_trace: bool,
    buffers_created: u32,
    structures_created: u32,
    wait_idle_calls: u32,
    device_lost: bool,
}

impl Default for RecordingDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self {
            limits: DeviceLimits {
                shader_group_handle_size: HANDLE_SIZE,
                shader_group_handle_alignment: HANDLE_ALIGNMENT,
                shader_group_base_alignment: BASE_ALIGNMENT,
                scratch_alignment: SCRATCH_ALIGNMENT,
            },
            next_id: 1,
            next_address: ADDRESS_BASE,
            buffers: HashMap::new(),
            structures: HashMap::new(),
            recording: None,
            frames: Vec::new(),
            exposed_views: HashMap::new(),
            exposed_top_level: None,
            violations: Vec::new(),
            unordered_trace: false,
            buffers_created: 0,
            structures_created: 0,
            wait_idle_calls: 0,
            device_lost: false,
        }
    }

    pub fn with_limits(mut self, limits: DeviceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Shader identifiers for a pipeline with ray generation, miss per ray
    /// type and hit group per ray type; handle `i` is filled with byte `i + 1`.
    pub fn shader_identifiers(&self) -> RtResult<ShaderIdentifiers> {
        let handle_size = self.limits.shader_group_handle_size as usize;
        let handles: Vec<u8> = (1..=5u8)
            .flat_map(|group| std::iter::repeat(group).take(handle_size))
            .collect();
        ShaderIdentifiers::from_group_handles(&handles, handle_size)
    }

    /// Make every subsequent device call fail as a lost device would.
    pub fn set_device_lost(&mut self, lost: bool) {
        self.device_lost = lost;
        if lost {
            self.recording = None;
        }
    }

    pub fn frames(&self) -> &[RecordedFrame] {
        &self.frames
    }

    pub fn last_frame(&self) -> Option<&RecordedFrame> {
        self.frames.last()
    }

    pub fn clear_frames(&mut self) {
        self.frames.clear();
    }

    /// Ordering or sizing rules broken so far.
    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    pub fn assert_no_violations(&self) {
        assert!(
            self.violations.is_empty(),
            "device rule violations:\n{}",
            self.violations.join("\n")
        );
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_buffers_of(&self, kind: BufferKind) -> usize {
        self.buffers.values().filter(|b| b.kind == kind).count()
    }

    /// Sizes of live buffers of `kind`, sorted.
    pub fn buffer_sizes_of(&self, kind: BufferKind) -> Vec<u64> {
        let mut sizes: Vec<u64> = self
            .buffers
            .values()
            .filter(|b| b.kind == kind)
            .map(|b| b.size)
            .collect();
        sizes.sort_unstable();
        sizes
    }

    pub fn buffer_names(&self) -> Vec<&str> {
        self.buffers.values().map(|b| b.name.as_str()).collect()
    }

    pub fn live_structures(&self) -> usize {
        self.structures.len()
    }

    /// Sizes of live structures of `level`, sorted.
    pub fn structure_sizes(&self, level: StructureLevel) -> Vec<u64> {
        let mut sizes: Vec<u64> = self
            .structures
            .values()
            .filter(|s| s.level == level)
            .map(|s| s.size)
            .collect();
        sizes.sort_unstable();
        sizes
    }

    pub fn buffers_created(&self) -> u32 {
        self.buffers_created
    }

    pub fn structures_created(&self) -> u32 {
        self.structures_created
    }

    pub fn wait_idle_calls(&self) -> u32 {
        self.wait_idle_calls
    }

    /// Buffer id exposed at `slot`.
    pub fn exposed_view(&self, slot: DescriptorHandle) -> Option<u32> {
        self.exposed_views.get(&slot.index()).copied()
    }

    pub fn exposed_top_level(&self) -> Option<u32> {
        self.exposed_top_level
    }

    /// Bytes of a host-visible buffer.
    pub fn buffer_bytes(&self, buffer: &RecordedBuffer) -> Option<&[u8]> {
        self.buffers.get(&buffer.id)?.data.as_deref()
    }

    /// `len` bytes at a device address inside a host-visible buffer.
    pub fn read(&self, address: u64, len: u64) -> Option<&[u8]> {
        let (_, state) = self.buffer_containing(address, len)?;
        let data = state.data.as_deref()?;
        let start = (address - state.address) as usize;
        data.get(start..start + len as usize)
    }

    /// Instance descriptors at `address`.
    pub fn read_instances(&self, address: u64, count: u32) -> Option<Vec<InstanceDescriptor>> {
        let bytes = self.read(address, u64::from(count) * InstanceDescriptor::SIZE)?;
        Some(
            bytes
                .chunks_exact(InstanceDescriptor::SIZE as usize)
                .map(bytemuck::pod_read_unaligned)
                .collect(),
        )
    }

    /// Address of structure `id`, if live.
    pub fn structure_address_of(&self, id: u32) -> Option<u64> {
        self.structures.get(&id).map(|s| s.address)
    }

    /// Whether the live structure `id` has been built at least once.
    pub fn is_built(&self, id: u32) -> bool {
        self.structures
            .get(&id)
            .is_some_and(|s| s.last_build_flags.is_some())
    }

    fn check_alive(&self) -> RtResult<()> {
        if self.device_lost {
            return Err(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST).into());
        }
        Ok(())
    }

    fn allocate_address(&mut self, size: u64, alignment: u64) -> u64 {
        let address = align_up(self.next_address, alignment.max(ADDRESS_ALIGNMENT));
        self.next_address = address + size.max(1);
        address
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn buffer_containing(&self, address: u64, len: u64) -> Option<(u32, &BufferState)> {
        self.buffers
            .iter()
            .find(|(_, b)| address >= b.address && address + len <= b.address + b.size)
            .map(|(id, b)| (*id, b))
    }

    fn violation(&mut self, message: String) {
        tracing::error!(%message, "device rule violated");
        self.violations.push(message);
    }

    fn push(&mut self, cmd: usize, command: Command) {
        match &mut self.recording {
            Some((frame, commands)) if *frame == cmd => commands.push(command),
            _ => self.violation(format!("{command} recorded outside frame {cmd}")),
        }
    }

    fn last_command(&self) -> Option<&Command> {
        self.recording.as_ref().and_then(|(_, c)| c.last())
    }

    fn check_buffer_range(&mut self, what: &str, address: u64, len: u64, kind: BufferKind) {
        match self.buffer_containing(address, len) {
            Some((_, b)) if b.kind == kind => {}
            Some((_, b)) => {
                let found = b.kind;
                self.violation(format!("{what} at {address:#x} is in a {found:?} buffer"));
            }
            None => self.violation(format!("{what} at {address:#x}+{len} is not in a live buffer")),
        }
    }

    /// Mark `id` as built with `flags`, returning the rules the build breaks.
    fn apply_build(
        &mut self,
        id: u32,
        level: StructureLevel,
        flags: BuildFlags,
        mode: BuildMode,
        required: u64,
    ) -> Vec<String> {
        let Some(state) = self.structures.get_mut(&id) else {
            return vec![format!("build into released structure {id}")];
        };

        let mut problems = Vec::new();
        if state.level != level {
            problems.push(format!("{level:?} build into {:?} structure", state.level));
        }
        if state.size < required {
            problems.push(format!(
                "structure {id} holds {} bytes, build needs {required}",
                state.size
            ));
        }
        if mode == BuildMode::Update {
            match state.last_build_flags {
                None => problems.push(format!("refit of unbuilt structure {id}")),
                Some(previous) if !previous.contains(BuildFlags::ALLOW_UPDATE) => {
                    problems.push(format!("refit of structure {id} built without ALLOW_UPDATE"));
                }
                Some(previous) if previous != flags => {
                    problems.push(format!("refit of structure {id} with different flags"));
                }
                Some(_) => {}
            }
        }
        state.last_build_flags = Some(flags);
        problems
    }

    fn check_build_inputs(&mut self, inputs: &BuildInputs<'_>) {
        match inputs {
            BuildInputs::Bottom { geometries, .. } => {
                for g in *geometries {
                    self.check_buffer_range(
                        "vertex data",
                        g.vertex_address,
                        u64::from(g.vertex_count) * g.vertex_stride,
                        BufferKind::Geometry,
                    );
                    self.check_buffer_range(
                        "index data",
                        g.index_address,
                        u64::from(g.index_count) * 2,
                        BufferKind::Geometry,
                    );
                    if g.transform_address != 0 {
                        self.check_buffer_range(
                            "geometry transform",
                            g.transform_address,
                            TRANSFORM_SIZE,
                            BufferKind::FrameRing,
                        );
                    }
                }
            }
            BuildInputs::Top {
                instances_address,
                instance_count,
                ..
            } => {
                let Some(instances) = self.read_instances(*instances_address, *instance_count)
                else {
                    self.violation(format!(
                        "{instance_count} instances at {instances_address:#x} are not readable"
                    ));
                    return;
                };
                for (i, instance) in instances.iter().enumerate() {
                    let referenced = self
                        .structures
                        .iter()
                        .find(|(_, s)| s.address == instance.bottom_level_address)
                        .map(|(id, s)| (*id, s.level, s.last_build_flags.is_some()));
                    match referenced {
                        Some((_, StructureLevel::Bottom, true)) => {}
                        Some((id, _, false)) => self.violation(format!(
                            "instance {i} references structure {id} before it was built"
                        )),
                        _ => self.violation(format!(
                            "instance {i} references {:#x}, not a bottom-level structure",
                            instance.bottom_level_address
                        )),
                    }
                }
            }
        }
    }
}

impl AccelerationDevice for RecordingDevice {
    type Buffer = RecordedBuffer;
    type Structure = RecordedStructure;
    type CommandBuffer = usize;

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn query_build_sizes(&self, inputs: &BuildInputs<'_>) -> RtResult<BuildSizes> {
        Ok(sizes_for(inputs))
    }

    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> RtResult<RecordedBuffer> {
        self.check_alive()?;
        if desc.size == 0 {
            return Err(GpuError::InvalidState(format!(
                "zero-sized buffer requested: {}",
                desc.name
            ))
            .into());
        }

        let alignment = match desc.kind {
            BufferKind::Scratch => u64::from(self.limits.scratch_alignment),
            BufferKind::ShaderTable => u64::from(self.limits.shader_group_base_alignment),
            _ => 1,
        };
        let id = self.next_id();
        let address = self.allocate_address(desc.size, alignment);
        self.buffers.insert(
            id,
            BufferState {
                address,
                size: desc.size,
                kind: desc.kind,
                name: desc.name.to_string(),
                data: desc
                    .kind
                    .is_host_visible()
                    .then(|| vec![0; desc.size as usize]),
            },
        );
        self.buffers_created += 1;

        Ok(RecordedBuffer {
            id,
            address,
            size: desc.size,
            kind: desc.kind,
        })
    }

    fn write_buffer(&mut self, buffer: &RecordedBuffer, offset: u64, data: &[u8]) -> RtResult<()> {
        self.check_alive()?;
        let state = self
            .buffers
            .get_mut(&buffer.id)
            .ok_or_else(|| GpuError::ResourceNotFound(format!("buffer {}", buffer.id)))?;
        let bytes = state
            .data
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState(format!("{} is not host visible", state.name)))?;

        let start = offset as usize;
        let end = start + data.len();
        if end > bytes.len() {
            return Err(GpuError::InvalidState(format!(
                "write of {} bytes at {offset} exceeds {} ({} bytes)",
                data.len(),
                state.name,
                state.size
            ))
            .into());
        }
        bytes[start..end].copy_from_slice(data);
        Ok(())
    }

    fn buffer_address(&self, buffer: &RecordedBuffer) -> u64 {
        buffer.address
    }

    fn destroy_buffer(&mut self, buffer: RecordedBuffer) -> RtResult<()> {
        self.buffers
            .remove(&buffer.id)
            .map(|_| ())
            .ok_or_else(|| GpuError::ResourceNotFound(format!("buffer {}", buffer.id)).into())
    }

    fn create_structure(
        &mut self,
        level: StructureLevel,
        size: u64,
        _name: &str,
    ) -> RtResult<RecordedStructure> {
        self.check_alive()?;
        let id = self.next_id();
        let address = self.allocate_address(size, ADDRESS_ALIGNMENT);
        self.structures.insert(
            id,
            StructureState {
                level,
                size,
                address,
                last_build_flags: None,
            },
        );
        self.structures_created += 1;
        Ok(RecordedStructure {
            id,
            level,
            size,
            address,
        })
    }

    fn structure_address(&self, structure: &RecordedStructure) -> u64 {
        structure.address
    }

    fn destroy_structure(&mut self, structure: RecordedStructure) -> RtResult<()> {
        if self.exposed_top_level == Some(structure.id) {
            self.exposed_top_level = None;
        }
        self.structures
            .remove(&structure.id)
            .map(|_| ())
            .ok_or_else(|| GpuError::ResourceNotFound(format!("structure {}", structure.id)).into())
    }

    fn record_build(
        &mut self,
        cmd: usize,
        inputs: &BuildInputs<'_>,
        destination: &RecordedStructure,
        mode: BuildMode,
        scratch_address: u64,
    ) -> RtResult<()> {
        self.check_alive()?;
        let command = Command::Build {
            structure: destination.id,
            level: inputs.level(),
            mode,
            flags: inputs.flags(),
            geometries: match inputs {
                BuildInputs::Bottom { geometries, .. } => geometries.len() as u32,
                BuildInputs::Top { .. } => 1,
            },
            primitives: inputs.primitive_counts().iter().sum(),
            scratch_address,
        };

        if let Some(Command::Build { structure, .. }) = self.last_command() {
            let previous = *structure;
            self.violation(format!(
                "builds of {previous} and {} share scratch without a barrier",
                destination.id
            ));
        }
        if self.unordered_trace {
            self.violation(format!(
                "build of {} may overwrite a structure an earlier frame still traces",
                destination.id
            ));
        }

        let sizes = sizes_for(inputs);
        let required_scratch = match mode {
            BuildMode::Build => sizes.build_scratch,
            BuildMode::Update => sizes.update_scratch,
        };
        if scratch_address % u64::from(self.limits.scratch_alignment) != 0 {
            self.violation(format!("scratch address {scratch_address:#x} is misaligned"));
        }
        self.check_buffer_range("scratch", scratch_address, required_scratch, BufferKind::Scratch);
        self.check_build_inputs(inputs);

        let problems = self.apply_build(
            destination.id,
            inputs.level(),
            inputs.flags(),
            mode,
            sizes.result,
        );
        for problem in problems {
            self.violation(problem);
        }

        tracing::trace!(%command, "recorded");
        self.push(cmd, command);
        Ok(())
    }

    fn record_pre_build_barrier(&mut self, cmd: usize) {
        if self.recording.as_ref().is_some_and(|(open, _)| *open == cmd) {
            self.unordered_trace = false;
        }
        self.push(cmd, Command::PreBuildBarrier);
    }

    fn record_build_barrier(&mut self, cmd: usize) {
        self.push(cmd, Command::BuildBarrier);
    }

    fn record_trace_barrier(&mut self, cmd: usize) {
        self.push(cmd, Command::TraceBarrier);
    }

    fn record_trace_rays(&mut self, cmd: usize, dispatch: &DispatchRays) -> RtResult<()> {
        self.check_alive()?;
        if self.last_command() != Some(&Command::TraceBarrier) {
            self.violation("trace_rays without a preceding trace barrier".to_string());
        }
        match self.exposed_top_level {
            Some(id) if self.is_built(id) => {}
            Some(id) => self.violation(format!("trace against unbuilt top level {id}")),
            None => self.violation("trace without an exposed top level".to_string()),
        }
        if dispatch.ray_generation.size != dispatch.ray_generation.stride {
            self.violation("ray generation region size differs from its stride".to_string());
        }
        for (name, region) in [
            ("ray generation", dispatch.ray_generation),
            ("miss", dispatch.miss),
            ("hit group", dispatch.hit_group),
        ] {
            if region.address % u64::from(self.limits.shader_group_base_alignment) != 0 {
                self.violation(format!("{name} table at {:#x} is misaligned", region.address));
            }
            self.check_buffer_range(name, region.address, region.size, BufferKind::ShaderTable);
        }

        self.push(cmd, Command::TraceRays(*dispatch));
        Ok(())
    }

    fn expose_buffer(&mut self, slot: DescriptorHandle, buffer: &RecordedBuffer) -> RtResult<()> {
        self.exposed_views.insert(slot.index(), buffer.id);
        Ok(())
    }

    fn expose_top_level(&mut self, structure: &RecordedStructure) -> RtResult<()> {
        self.exposed_top_level = Some(structure.id);
        Ok(())
    }

    fn begin_frame(&mut self, frame_index: usize) -> RtResult<usize> {
        self.check_alive()?;
        if let Some((open, _)) = &self.recording {
            let open = *open;
            self.violation(format!("frame {frame_index} begun while frame {open} is recording"));
        }
        self.recording = Some((frame_index, Vec::new()));
        Ok(frame_index)
    }

    fn submit_frame(&mut self, frame_index: usize, cmd: usize) -> RtResult<()> {
        self.check_alive()?;
        match self.recording.take() {
            Some((open, commands)) if open == frame_index && open == cmd => {
                if commands.iter().any(|c| matches!(c, Command::TraceRays(_))) {
                    self.unordered_trace = true;
                }
                self.frames.push(RecordedFrame {
                    frame_index,
                    commands,
                });
            }
            _ => self.violation(format!("submit of frame {frame_index} that is not recording")),
        }
        Ok(())
    }

    fn wait_idle(&mut self) -> RtResult<()> {
        self.wait_idle_calls += 1;
        self.check_alive()?;
        self.unordered_trace = false;
        Ok(())
    }
}

/// Deterministic sizes: proportional to the primitive count, rounded to 256.
pub fn sizes_for(inputs: &BuildInputs<'_>) -> BuildSizes {
    let primitives: u64 = inputs.primitive_counts().iter().map(|&c| u64::from(c)).sum();
    let round = |v: u64| align_up(v, ADDRESS_ALIGNMENT);
    match inputs {
        BuildInputs::Bottom { geometries, flags } => {
            let per_triangle = if flags.contains(BuildFlags::LOW_MEMORY) {
                48
            } else {
                64
            };
            BuildSizes {
                result: round(256 + per_triangle * primitives + 32 * geometries.len() as u64),
                build_scratch: round(128 + 32 * primitives),
                update_scratch: round(64 + 8 * primitives),
            }
        }
        BuildInputs::Top { .. } => BuildSizes {
            result: round(256 + 128 * primitives),
            build_scratch: round(128 + 64 * primitives),
            update_scratch: round(64 + 16 * primitives),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kinetic_rt::TriangleGeometry;

    fn desc(size: u64, kind: BufferKind) -> BufferDesc<'static> {
        BufferDesc {
            size,
            kind,
            name: "test",
        }
    }

    #[test]
    fn addresses_are_aligned_and_disjoint() {
        let mut device = RecordingDevice::new();
        let a = device.create_buffer(&desc(100, BufferKind::Geometry)).unwrap();
        let b = device.create_buffer(&desc(100, BufferKind::Scratch)).unwrap();
        assert_ne!(a.address(), 0);
        assert_eq!(b.address() % u64::from(SCRATCH_ALIGNMENT), 0);
        assert!(b.address() >= a.address() + a.size());
    }

    #[test]
    fn scratch_is_not_writable() {
        let mut device = RecordingDevice::new();
        let scratch = device.create_buffer(&desc(256, BufferKind::Scratch)).unwrap();
        assert!(device.write_buffer(&scratch, 0, &[1, 2, 3]).is_err());
    }

    #[test]
    fn writes_are_read_back_by_address() {
        let mut device = RecordingDevice::new();
        let ring = device.create_buffer(&desc(64, BufferKind::FrameRing)).unwrap();
        device.write_buffer(&ring, 8, &[7, 8]).unwrap();
        assert_eq!(device.read(ring.address() + 8, 2), Some(&[7u8, 8][..]));
        assert!(device.write_buffer(&ring, 63, &[1, 2]).is_err());
    }

    /// One triangle, its scratch and an unbuilt bottom-level structure.
    fn single_triangle(
        device: &mut RecordingDevice,
    ) -> ([TriangleGeometry; 1], RecordedBuffer, RecordedStructure) {
        let vertices = device.create_buffer(&desc(24 * 3, BufferKind::Geometry)).unwrap();
        let indices = device.create_buffer(&desc(8, BufferKind::Geometry)).unwrap();
        let geometry = [TriangleGeometry {
            vertex_address: vertices.address(),
            vertex_stride: 24,
            vertex_count: 3,
            index_address: indices.address(),
            index_count: 3,
            transform_address: 0,
        }];
        let sizes = sizes_for(&BuildInputs::Bottom {
            geometries: &geometry,
            flags: BuildFlags::empty(),
        });
        let scratch = device
            .create_buffer(&desc(sizes.build_scratch, BufferKind::Scratch))
            .unwrap();
        let blas = device
            .create_structure(StructureLevel::Bottom, sizes.result, "blas")
            .unwrap();
        (geometry, scratch, blas)
    }

    #[test]
    fn consecutive_builds_without_barrier_are_flagged() {
        let mut device = RecordingDevice::new();
        let (geometry, scratch, blas) = single_triangle(&mut device);
        let inputs = BuildInputs::Bottom {
            geometries: &geometry,
            flags: BuildFlags::empty(),
        };

        let cmd = device.begin_frame(0).unwrap();
        device
            .record_build(cmd, &inputs, &blas, BuildMode::Build, scratch.address())
            .unwrap();
        device.assert_no_violations();
        device
            .record_build(cmd, &inputs, &blas, BuildMode::Build, scratch.address())
            .unwrap();
        assert_eq!(device.violations().len(), 1);
    }

    fn traced_frame(device: &mut RecordingDevice, frame_index: usize) {
        let cmd = device.begin_frame(frame_index).unwrap();
        device.record_trace_barrier(cmd);
        device
            .record_trace_rays(
                cmd,
                &DispatchRays {
                    ray_generation: Default::default(),
                    miss: Default::default(),
                    hit_group: Default::default(),
                    width: 1,
                    height: 1,
                },
            )
            .unwrap();
        device.submit_frame(frame_index, cmd).unwrap();
    }

    fn rewrites_traced_structure(violations: &[String]) -> bool {
        violations.iter().any(|v| v.contains("earlier frame still traces"))
    }

    #[test]
    fn build_after_an_earlier_trace_needs_a_pre_build_barrier() {
        let mut device = RecordingDevice::new();
        let (geometry, scratch, blas) = single_triangle(&mut device);
        let inputs = BuildInputs::Bottom {
            geometries: &geometry,
            flags: BuildFlags::empty(),
        };
        traced_frame(&mut device, 0);

        let cmd = device.begin_frame(1).unwrap();
        device
            .record_build(cmd, &inputs, &blas, BuildMode::Build, scratch.address())
            .unwrap();
        assert!(rewrites_traced_structure(device.violations()));
    }

    #[test]
    fn pre_build_barrier_orders_earlier_traces() {
        let mut device = RecordingDevice::new();
        let (geometry, scratch, blas) = single_triangle(&mut device);
        let inputs = BuildInputs::Bottom {
            geometries: &geometry,
            flags: BuildFlags::empty(),
        };
        traced_frame(&mut device, 0);

        let cmd = device.begin_frame(1).unwrap();
        device.record_pre_build_barrier(cmd);
        device
            .record_build(cmd, &inputs, &blas, BuildMode::Build, scratch.address())
            .unwrap();
        device.record_build_barrier(cmd);
        device.submit_frame(1, cmd).unwrap();
        assert!(!rewrites_traced_structure(device.violations()));

        // Waiting for the device orders everything as well
        traced_frame(&mut device, 2);
        device.wait_idle().unwrap();
        let cmd = device.begin_frame(0).unwrap();
        device
            .record_build(cmd, &inputs, &blas, BuildMode::Build, scratch.address())
            .unwrap();
        assert!(!rewrites_traced_structure(device.violations()));
    }

    #[test]
    fn refit_of_unbuilt_structure_is_flagged() {
        let mut device = RecordingDevice::new();
        let instances = device.create_buffer(&desc(64, BufferKind::Instances)).unwrap();
        let inputs = BuildInputs::Top {
            instances_address: instances.address(),
            instance_count: 0,
            flags: BuildFlags::ALLOW_UPDATE,
        };
        let sizes = sizes_for(&inputs);
        let scratch = device
            .create_buffer(&desc(sizes.build_scratch, BufferKind::Scratch))
            .unwrap();
        let tlas = device
            .create_structure(StructureLevel::Top, sizes.result, "tlas")
            .unwrap();

        let cmd = device.begin_frame(0).unwrap();
        device
            .record_build(cmd, &inputs, &tlas, BuildMode::Update, scratch.address())
            .unwrap();
        assert!(device.violations()[0].contains("unbuilt"));
    }

    #[test]
    fn lost_device_fails_calls() {
        let mut device = RecordingDevice::new();
        device.set_device_lost(true);
        assert!(device.begin_frame(0).is_err());
        assert!(device.wait_idle().is_err());
        device.set_device_lost(false);
        assert!(device.begin_frame(0).is_ok());
    }

    #[test]
    fn identifiers_are_distinct() {
        let ids = RecordingDevice::new().shader_identifiers().unwrap();
        assert_eq!(ids.ray_generation, vec![1; HANDLE_SIZE as usize]);
        assert_ne!(ids.miss[0], ids.miss[1]);
        assert_ne!(ids.hit_groups[0], ids.hit_groups[1]);
    }
}
