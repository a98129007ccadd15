//! # vortex
//!
//! vortex is a device execution runtime for heterogeneous accelerators.
//! It caches compiled device kernels, tracks host/device memory consistency
//! per buffer per device, issues asynchronous transfer and kernel launch
//! commands on ordered per device command streams, and enforces cross
//! operation ordering through explicit event wait lists rather than global
//! barriers. Backends exist for CUDA and `OpenCL`, loaded at runtime, plus
//! a virtual host device for tests and debugging.
//!
//! Compilation is not part of this crate, kernels arrive as immutable
//! [artifacts](KernelArtifact) with a binary, an entry point and argument
//! metadata, produced by an external compiler.
//!
//! ```no_run
//! use vortex::{
//!     Access, Config, DType, HostData, HostDataMut, KernelArtifact, KernelMeta, Param, Runtime,
//! };
//!
//! # fn main() -> Result<(), vortex::VortexError> {
//! let mut config = Config::from_config_dir()?;
//! config.virt.enabled = true;
//! let mut runtime = Runtime::initialize(&config)?;
//! let dev = runtime.device_mut(0).unwrap();
//!
//! let host = vec![1f32; 1024];
//! let buffer = dev.allocate(4096)?;
//! let e1 = dev.enqueue_write_async(buffer, 0, &HostData::from(host.as_slice()), 0, 1024, &[])?;
//!
//! let artifact = KernelArtifact::new(
//!     "scale2x",
//!     b"ld.f32 r0, g0\nmov.f32 r1, 2.0\nmul.f32 r2, r0, r1\nst.f32 g0, r2".to_vec(),
//!     "scale2x",
//!     KernelMeta {
//!         params: vec![Param::Buffer { dtype: DType::F32, access: Access::ReadWrite }],
//!         local_size_hint: None,
//!     },
//! );
//! let kernel = dev.install_or_get(&artifact)?;
//! let mut stack = vortex::CallStack::new();
//! stack.push_buffer(buffer);
//! let launched = dev.launch(&kernel, &stack, 1024, &[e1])?;
//!
//! let mut out = vec![0f32; 1024];
//! dev.enqueue_read(buffer, 0, &mut HostDataMut::from(out.as_mut_slice()), 0, 1024, &launched)?;
//! assert_eq!(out[0], 2.0);
//! # Ok(())
//! # }
//! ```

mod artifact;
mod backend;
mod cache;
mod device;
mod dtype;
mod error;
mod mutex;
mod scalar;
mod slab;
mod stack;
mod state;
mod stream;

pub use artifact::{Access, KernelArtifact, KernelMeta, Param};
pub use backend::{
    BufferDescriptor, BufferId, CUDAConfig, Config, DeviceInfo, OpenCLConfig, ProgramId,
    VirtConfig,
};
pub use cache::InstalledKernel;
pub use device::{DeviceRuntime, TaskArg};
pub use dtype::{Constant, DType};
pub use error::{BackendError, ErrorStatus, VortexError};
pub use mutex::Mutex;
pub use scalar::{HostData, HostDataMut, Scalar};
pub use stack::{ArgValue, CallStack};
pub use state::{ObjectId, ObjectState};
pub use stream::EventId;

/// Work size and byte size dimension
pub type Dim = usize;

/// All initialized devices. One [DeviceRuntime] per device, each with its
/// own command stream and kernel cache. Constructed from an explicit
/// [Config], there is no process wide state. Share across threads by
/// wrapping in the crate [Mutex].
#[derive(Debug)]
pub struct Runtime {
    devices: Vec<DeviceRuntime>,
}

impl Runtime {
    /// Initializes every configured backend. Devices that fail to
    /// initialize are skipped, failing only when no device at all is
    /// available. Set the `VORTEX_DEBUG` environment variable to print
    /// backend diagnostics.
    pub fn initialize(config: &Config) -> Result<Runtime, VortexError> {
        let debug = std::env::var("VORTEX_DEBUG").is_ok_and(|v| !v.is_empty() && v != "0");
        let mut backends = Vec::new();
        backend::initialize_backends(config, &mut backends, debug)?;
        Ok(Runtime {
            devices: backends
                .into_iter()
                .map(|backend| DeviceRuntime::new(backend, debug))
                .collect(),
        })
    }

    #[must_use]
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn device(&self, id: usize) -> Option<&DeviceRuntime> {
        self.devices.get(id)
    }

    #[must_use]
    pub fn device_mut(&mut self, id: usize) -> Option<&mut DeviceRuntime> {
        self.devices.get_mut(id)
    }

    /// Releases every device, native queues, buffers and programs included
    pub fn deinitialize(&mut self) {
        for device in &mut self.devices {
            device.deinitialize();
        }
        self.devices.clear();
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.deinitialize();
    }
}
