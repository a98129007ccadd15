//! Backend agnostic API to native device backends.
//! Contains enums that dispatch operations to the appropriate backend.
//! Interfaces use events independent from the underlying implementation,
//! the runtime layer above maps them to integer event ids.

use nanoserde::DeJson;

use crate::artifact::KernelArtifact;
use crate::error::{BackendError, VortexError};
use crate::slab::Id;
use crate::stack::CallStack;
use crate::Dim;

use cuda::{CUDADevice, CUDAEvent};
use opencl::{OpenCLDevice, OpenCLEvent};
use virt::{VirtDevice, VirtEvent};

pub(crate) mod cuda;
pub(crate) mod opencl;
pub(crate) mod virt;

pub use cuda::CUDAConfig;
pub use opencl::OpenCLConfig;
pub use virt::VirtConfig;

/// Handle of one device buffer, owned by the device that allocated it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferId(pub(crate) Id);

/// Handle of one built program, owned by the device that built it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProgramId(pub(crate) Id);

/// Address and extent of a live device buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescriptor {
    /// Absolute device address, stable for the buffer lifetime
    pub address: u64,
    /// Offset relative to the owning allocation region
    pub offset: u64,
    pub bytes: Dim,
}

/// Hardware information captured at initialization
#[derive(Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceInfo {
    /// Device compute in flops
    pub compute: u128,
    /// Biggest kernel dimensions
    pub max_global_work_dims: [Dim; 3],
    /// Maximum work group threads
    pub max_local_threads: Dim,
    /// Work group size used when the kernel does not request one
    pub preferred_block_size: Dim,
    /// Local memory size in bytes
    pub local_mem_size: Dim,
    /// Global memory size in bytes
    pub global_mem_size: Dim,
}

impl DeviceInfo {
    /// Largest work size of a single physical launch, bigger requests are batched
    #[must_use]
    pub const fn max_batch_threads(&self) -> Dim {
        self.max_global_work_dims[0]
    }
}

/// Backend configuration, usually parsed from the config file
#[derive(DeJson, Debug, Default)]
pub struct Config {
    /// CUDA configuration
    pub cuda: CUDAConfig,
    /// `OpenCL` configuration
    pub opencl: OpenCLConfig,
    /// Configuration of the virtual device used for testing and debugging
    pub virt: VirtConfig,
}

impl Config {
    /// Reads `device_config.json` from the xdg config directory,
    /// falling back to the default configuration if the file is absent.
    pub fn from_config_dir() -> Result<Config, VortexError> {
        let Ok(dirs) = xdg::BaseDirectories::with_prefix("vortex") else {
            return Ok(Config::default());
        };
        let Some(path) = dirs.find_config_file("device_config.json") else {
            return Ok(Config::default());
        };
        let text = std::fs::read_to_string(path)?;
        DeJson::deserialize_json(&text)
            .map_err(|e| VortexError::parse_error(format!("device_config.json: {e}").into()))
    }
}

#[derive(Debug, Clone)]
#[allow(clippy::upper_case_acronyms)]
pub(crate) enum Event {
    CUDA(CUDAEvent),
    OpenCL(OpenCLEvent),
    Virt(VirtEvent),
}

#[allow(clippy::upper_case_acronyms)]
#[derive(Debug)]
pub(crate) enum Device {
    CUDA(CUDADevice),
    OpenCL(OpenCLDevice),
    Virt(VirtDevice),
}

pub(crate) fn initialize_backends(
    config: &Config,
    devices: &mut Vec<Device>,
    debug_backends: bool,
) -> Result<(), VortexError> {
    if let Err(err) = cuda::initialize_devices(&config.cuda, devices, debug_backends) {
        if debug_backends {
            println!("{err}");
        }
    }
    if let Err(err) = opencl::initialize_devices(&config.opencl, devices, debug_backends) {
        if debug_backends {
            println!("{err}");
        }
    }
    if let Err(err) = virt::initialize_devices(&config.virt, devices, debug_backends) {
        if debug_backends {
            println!("{err}");
        }
    }

    if devices.is_empty() {
        return Err(VortexError::NoBackendAvailable);
    }
    Ok(())
}

impl Device {
    pub(crate) fn deinitialize(&mut self) {
        match self {
            Device::CUDA(dev) => dev.deinitialize(),
            Device::OpenCL(dev) => dev.deinitialize(),
            Device::Virt(dev) => dev.deinitialize(),
        }
    }

    pub(crate) const fn info(&self) -> &DeviceInfo {
        match self {
            Device::CUDA(dev) => dev.info(),
            Device::OpenCL(dev) => dev.info(),
            Device::Virt(dev) => dev.info(),
        }
    }

    pub(crate) fn alloc(&mut self, bytes: Dim) -> Result<BufferId, BackendError> {
        match self {
            Device::CUDA(dev) => dev.alloc(bytes),
            Device::OpenCL(dev) => dev.alloc(bytes),
            Device::Virt(dev) => dev.alloc(bytes),
        }
    }

    pub(crate) fn dealloc(&mut self, buffer: BufferId) -> Result<(), BackendError> {
        match self {
            Device::CUDA(dev) => dev.dealloc(buffer),
            Device::OpenCL(dev) => dev.dealloc(buffer),
            Device::Virt(dev) => dev.dealloc(buffer),
        }
    }

    pub(crate) fn buffer_desc(&self, buffer: BufferId) -> Option<BufferDescriptor> {
        match self {
            Device::CUDA(dev) => dev.buffer_desc(buffer),
            Device::OpenCL(dev) => dev.buffer_desc(buffer),
            Device::Virt(dev) => dev.buffer_desc(buffer),
        }
    }

    /// Copy bytes from host memory into a device buffer.
    /// Wait events must belong to this device's backend.
    pub(crate) fn write(
        &mut self,
        dst: BufferId,
        dst_offset: Dim,
        src: &[u8],
        wait: &[Event],
        blocking: bool,
    ) -> Result<Event, BackendError> {
        match self {
            Device::CUDA(dev) => dev.write(dst, dst_offset, src, wait, blocking),
            Device::OpenCL(dev) => dev.write(dst, dst_offset, src, wait, blocking),
            Device::Virt(dev) => dev.write(dst, dst_offset, src, wait, blocking),
        }
    }

    /// Copy bytes from a device buffer into host memory.
    /// The destination must stay alive until the returned event completes.
    pub(crate) fn read(
        &mut self,
        src: BufferId,
        src_offset: Dim,
        dst: &mut [u8],
        wait: &[Event],
        blocking: bool,
    ) -> Result<Event, BackendError> {
        match self {
            Device::CUDA(dev) => dev.read(src, src_offset, dst, wait, blocking),
            Device::OpenCL(dev) => dev.read(src, src_offset, dst, wait, blocking),
            Device::Virt(dev) => dev.read(src, src_offset, dst, wait, blocking),
        }
    }

    pub(crate) fn build(
        &mut self,
        artifact: &KernelArtifact,
        debug_asm: bool,
    ) -> Result<ProgramId, BackendError> {
        match self {
            Device::CUDA(dev) => dev.build(artifact, debug_asm),
            Device::OpenCL(dev) => dev.build(artifact, debug_asm),
            Device::Virt(dev) => dev.build(artifact, debug_asm),
        }
    }

    pub(crate) fn release_program(&mut self, program: ProgramId) {
        match self {
            Device::CUDA(dev) => dev.release_program(program),
            Device::OpenCL(dev) => dev.release_program(program),
            Device::Virt(dev) => dev.release_program(program),
        }
    }

    pub(crate) fn launch(
        &mut self,
        program: ProgramId,
        stack: &CallStack,
        grid: [Dim; 3],
        block: [Dim; 3],
        global_offset: Dim,
        wait: &[Event],
    ) -> Result<Event, BackendError> {
        match self {
            Device::CUDA(dev) => dev.launch(program, stack, grid, block, global_offset, wait),
            Device::OpenCL(dev) => dev.launch(program, stack, grid, block, global_offset, wait),
            Device::Virt(dev) => dev.launch(program, stack, grid, block, global_offset, wait),
        }
    }

    /// Whether kernel launches on this backend accept a wait list.
    /// Transfers accept wait lists on every backend.
    pub(crate) const fn supports_launch_wait_list(&self) -> bool {
        match self {
            Device::CUDA(_) => false,
            Device::OpenCL(_) | Device::Virt(_) => true,
        }
    }

    /// Block until every operation issued on this device's queues completed
    pub(crate) fn sync_queues(&mut self) -> Result<(), BackendError> {
        match self {
            Device::CUDA(dev) => dev.sync_queues(),
            Device::OpenCL(dev) => dev.sync_queues(),
            Device::Virt(dev) => dev.sync_queues(),
        }
    }

    /// Release the native queues, the device accepts no further work
    pub(crate) fn destroy_queues(&mut self) -> Result<(), BackendError> {
        match self {
            Device::CUDA(dev) => dev.destroy_queues(),
            Device::OpenCL(dev) => dev.destroy_queues(),
            Device::Virt(dev) => dev.destroy_queues(),
        }
    }

    /// Block until the given events completed
    pub(crate) fn sync_events(&mut self, events: &[Event]) -> Result<(), BackendError> {
        match self {
            Device::CUDA(dev) => dev.sync_events(events),
            Device::OpenCL(dev) => dev.sync_events(events),
            Device::Virt(dev) => dev.sync_events(events),
        }
    }

    /// Drop events without synchronization, non-blocking
    pub(crate) fn release_events(&mut self, events: Vec<Event>) {
        match self {
            Device::CUDA(dev) => dev.release_events(events),
            Device::OpenCL(dev) => dev.release_events(events),
            Device::Virt(dev) => dev.release_events(events),
        }
    }
}
