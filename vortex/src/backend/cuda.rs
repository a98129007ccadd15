//! CUDA backend using the driver API.
//!
//! Kernel binaries are PTX images loaded with `cuModuleLoadDataEx`.
//! Transfers honor wait lists through `cuStreamWaitEvent`, kernel launches
//! do not accept a wait list at this boundary, the runtime surfaces a
//! dependency-carrying launch as an unsupported operation instead of
//! silently dropping the ordering. Batched launches receive the chunk base
//! index as a trailing kernel parameter.

#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use std::{
    ffi::{c_char, c_int, c_uint, c_void, CString},
    ptr,
    sync::Arc,
};

use libloading::Library;
use nanoserde::DeJson;

use super::{BufferDescriptor, BufferId, Device, DeviceInfo, Event, ProgramId};
use crate::artifact::KernelArtifact;
use crate::error::{BackendError, ErrorStatus};
use crate::slab::Slab;
use crate::stack::{ArgValue, CallStack};
use crate::Dim;

/// CUDA configuration
#[derive(Debug, Default, DeJson)]
pub struct CUDAConfig {
    /// Select which devices will be used by the CUDA backend.
    /// If set to None, uses all available devices.
    pub device_ids: Option<Vec<i32>>,
}

#[derive(Debug, Clone)]
pub struct CUDAEvent {
    pub(crate) event: *mut c_void,
}

#[derive(Debug)]
pub(crate) struct CUDABuffer {
    ptr: CUdeviceptr,
    bytes: Dim,
}

#[derive(Debug)]
pub(crate) struct CUDAProgram {
    module: CUmodule,
    function: CUfunction,
}

#[derive(Debug)]
pub(crate) struct CUDADevice {
    // Just to keep the connection open
    #[allow(unused)]
    library: Arc<Library>,
    device: CUdevice,
    context: CUcontext,
    stream: CUstream,
    dev_info: DeviceInfo,
    free_bytes: Dim,
    buffers: Slab<CUDABuffer>,
    programs: Slab<CUDAProgram>,
    // Functions
    cuCtxSetCurrent: unsafe extern "C" fn(CUcontext) -> CUDAStatus,
    cuCtxDestroy: unsafe extern "C" fn(CUcontext) -> CUDAStatus,
    cuStreamSynchronize: unsafe extern "C" fn(CUstream) -> CUDAStatus,
    cuStreamDestroy: unsafe extern "C" fn(CUstream) -> CUDAStatus,
    cuStreamWaitEvent: unsafe extern "C" fn(CUstream, *mut c_void, c_uint) -> CUDAStatus,
    cuEventCreate: unsafe extern "C" fn(*mut *mut c_void, c_uint) -> CUDAStatus,
    cuEventRecord: unsafe extern "C" fn(*mut c_void, CUstream) -> CUDAStatus,
    cuEventSynchronize: unsafe extern "C" fn(*mut c_void) -> CUDAStatus,
    cuEventDestroy: unsafe extern "C" fn(*mut c_void) -> CUDAStatus,
    cuMemAlloc: unsafe extern "C" fn(*mut CUdeviceptr, usize) -> CUDAStatus,
    cuMemFree: unsafe extern "C" fn(CUdeviceptr) -> CUDAStatus,
    cuMemcpyHtoD: unsafe extern "C" fn(CUdeviceptr, *const c_void, usize) -> CUDAStatus,
    cuMemcpyDtoH: unsafe extern "C" fn(*mut c_void, CUdeviceptr, usize) -> CUDAStatus,
    cuMemcpyHtoDAsync:
        unsafe extern "C" fn(CUdeviceptr, *const c_void, usize, CUstream) -> CUDAStatus,
    cuMemcpyDtoHAsync:
        unsafe extern "C" fn(*mut c_void, CUdeviceptr, usize, CUstream) -> CUDAStatus,
    cuModuleLoadDataEx: unsafe extern "C" fn(
        *mut CUmodule,
        *const c_void,
        c_uint,
        *mut c_void,
        *mut *mut c_void,
    ) -> CUDAStatus,
    cuModuleGetFunction: unsafe extern "C" fn(*mut CUfunction, CUmodule, *const c_char) -> CUDAStatus,
    cuModuleUnload: unsafe extern "C" fn(CUmodule) -> CUDAStatus,
    cuLaunchKernel: unsafe extern "C" fn(
        CUfunction,
        c_uint,
        c_uint,
        c_uint,
        c_uint,
        c_uint,
        c_uint,
        c_uint,
        CUstream,
        *mut *mut c_void,
        *mut *mut c_void,
    ) -> CUDAStatus,
}

// This definitely isn't correct, but the runtime is externally synchronized
unsafe impl Send for CUDAEvent {}
unsafe impl Send for CUDABuffer {}
unsafe impl Send for CUDAProgram {}
unsafe impl Send for CUDADevice {}

pub(crate) fn initialize_devices(
    config: &CUDAConfig,
    devices: &mut Vec<Device>,
    debug_dev: bool,
) -> Result<(), BackendError> {
    if let Some(device_ids) = &config.device_ids {
        if device_ids.is_empty() {
            return Err(BackendError {
                status: ErrorStatus::Initialization,
                context: "CUDA won't be used, as it was configured out.".into(),
            });
        }
    }
    let cuda_paths = [
        "/lib/libcuda.so",
        "/lib64/libcuda.so",
        "/lib/x86_64-linux-gnu/libcuda.so",
        "/lib64/x86_64-linux-gnu/libcuda.so",
        "/usr/lib/libcuda.so",
        "/usr/lib64/libcuda.so",
        "/usr/lib/x86_64-linux-gnu/libcuda.so",
        "/usr/lib/x86_64-linux-gnu/libcuda.so.1",
    ];
    let cuda = cuda_paths.iter().find_map(|path| unsafe { Library::new(path) }.ok());
    let Some(cuda) = cuda else {
        return Err(BackendError {
            status: ErrorStatus::DyLibNotFound,
            context: "CUDA runtime not found.".into(),
        });
    };
    let cuInit: unsafe extern "C" fn(c_uint) -> CUDAStatus =
        *unsafe { cuda.get(b"cuInit\0") }.unwrap();
    let cuDeviceGetCount: unsafe extern "C" fn(*mut c_int) -> CUDAStatus =
        *unsafe { cuda.get(b"cuDeviceGetCount\0") }.unwrap();
    let cuDeviceGet: unsafe extern "C" fn(*mut CUdevice, c_int) -> CUDAStatus =
        *unsafe { cuda.get(b"cuDeviceGet\0") }.unwrap();
    let cuDeviceGetName: unsafe extern "C" fn(*mut c_char, c_int, CUdevice) -> CUDAStatus =
        *unsafe { cuda.get(b"cuDeviceGetName\0") }.unwrap();
    let cuDeviceGetAttribute: unsafe extern "C" fn(*mut c_int, CUdevice_attribute, CUdevice)
        -> CUDAStatus = *unsafe { cuda.get(b"cuDeviceGetAttribute\0") }.unwrap();
    let cuDeviceTotalMem: unsafe extern "C" fn(*mut usize, CUdevice) -> CUDAStatus =
        *unsafe { cuda.get(b"cuDeviceTotalMem\0") }.unwrap();
    let cuCtxCreate: unsafe extern "C" fn(*mut CUcontext, c_uint, CUdevice) -> CUDAStatus =
        *unsafe { cuda.get(b"cuCtxCreate\0") }.unwrap();
    let cuStreamCreate: unsafe extern "C" fn(*mut CUstream, c_uint) -> CUDAStatus =
        *unsafe { cuda.get(b"cuStreamCreate\0") }.unwrap();
    let cuCtxSetCurrent = *unsafe { cuda.get(b"cuCtxSetCurrent\0") }.unwrap();
    let cuCtxDestroy: unsafe extern "C" fn(CUcontext) -> CUDAStatus =
        *unsafe { cuda.get(b"cuCtxDestroy\0") }.unwrap();
    let cuStreamSynchronize = *unsafe { cuda.get(b"cuStreamSynchronize\0") }.unwrap();
    let cuStreamDestroy = *unsafe { cuda.get(b"cuStreamDestroy\0") }.unwrap();
    let cuStreamWaitEvent = *unsafe { cuda.get(b"cuStreamWaitEvent\0") }.unwrap();
    let cuEventCreate = *unsafe { cuda.get(b"cuEventCreate\0") }.unwrap();
    let cuEventRecord = *unsafe { cuda.get(b"cuEventRecord\0") }.unwrap();
    let cuEventSynchronize = *unsafe { cuda.get(b"cuEventSynchronize\0") }.unwrap();
    let cuEventDestroy = *unsafe { cuda.get(b"cuEventDestroy\0") }.unwrap();
    let cuMemAlloc = *unsafe { cuda.get(b"cuMemAlloc\0") }.unwrap();
    let cuMemFree = *unsafe { cuda.get(b"cuMemFree\0") }.unwrap();
    let cuMemcpyHtoD = *unsafe { cuda.get(b"cuMemcpyHtoD\0") }.unwrap();
    let cuMemcpyDtoH = *unsafe { cuda.get(b"cuMemcpyDtoH\0") }.unwrap();
    let cuMemcpyHtoDAsync = *unsafe { cuda.get(b"cuMemcpyHtoDAsync\0") }.unwrap();
    let cuMemcpyDtoHAsync = *unsafe { cuda.get(b"cuMemcpyDtoHAsync\0") }.unwrap();
    let cuModuleLoadDataEx = *unsafe { cuda.get(b"cuModuleLoadDataEx\0") }.unwrap();
    let cuModuleGetFunction = *unsafe { cuda.get(b"cuModuleGetFunction\0") }.unwrap();
    let cuModuleUnload = *unsafe { cuda.get(b"cuModuleUnload\0") }.unwrap();
    let cuLaunchKernel = *unsafe { cuda.get(b"cuLaunchKernel\0") }.unwrap();

    let library = Arc::new(cuda);
    let known_devices = devices.len();
    unsafe { cuInit(0) }.check(ErrorStatus::Initialization)?;
    let mut count = 0;
    unsafe { cuDeviceGetCount(&mut count) }.check(ErrorStatus::DeviceEnumeration)?;
    for device_id in (0..count)
        .filter(|id| config.device_ids.as_ref().map_or(true, |ids| ids.contains(id)))
    {
        let mut device = 0;
        let Ok(()) = unsafe { cuDeviceGet(&mut device, device_id) }
            .check(ErrorStatus::DeviceEnumeration)
        else {
            continue;
        };
        if debug_dev {
            let mut name = [0 as c_char; 256];
            let _ = unsafe { cuDeviceGetName(name.as_mut_ptr(), 256, device) };
            let name = unsafe { std::ffi::CStr::from_ptr(name.as_ptr()) };
            println!("Using CUDA device {device_id}, name {}", name.to_string_lossy());
        }
        let mut attr = |attribute: CUdevice_attribute| -> c_int {
            let mut value = 0;
            let _ = unsafe { cuDeviceGetAttribute(&mut value, attribute, device) };
            value
        };
        let max_local_threads =
            attr(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_BLOCK) as Dim;
        let max_grid = [
            attr(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_GRID_DIM_X) as Dim,
            attr(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_GRID_DIM_Y) as Dim,
            attr(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_GRID_DIM_Z) as Dim,
        ];
        let local_mem_size =
            attr(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_SHARED_MEMORY_PER_BLOCK) as Dim;
        let mut global_mem_size = 0;
        let Ok(()) = unsafe { cuDeviceTotalMem(&mut global_mem_size, device) }
            .check(ErrorStatus::DeviceQuery)
        else {
            continue;
        };
        let mut context = ptr::null_mut();
        let Ok(()) =
            unsafe { cuCtxCreate(&mut context, 0, device) }.check(ErrorStatus::Initialization)
        else {
            continue;
        };
        let mut stream = ptr::null_mut();
        let Ok(()) = unsafe { cuStreamCreate(&mut stream, 0) }.check(ErrorStatus::Initialization)
        else {
            let _ = unsafe { cuCtxDestroy(context) };
            continue;
        };
        devices.push(Device::CUDA(CUDADevice {
            library: library.clone(),
            device,
            context,
            stream,
            dev_info: DeviceInfo {
                compute: 1024 * 1024 * 1024 * 1024,
                max_global_work_dims: max_grid,
                max_local_threads,
                preferred_block_size: max_local_threads.min(128),
                local_mem_size,
                global_mem_size,
            },
            free_bytes: global_mem_size,
            buffers: Slab::new(),
            programs: Slab::new(),
            cuCtxSetCurrent,
            cuCtxDestroy,
            cuStreamSynchronize,
            cuStreamDestroy,
            cuStreamWaitEvent,
            cuEventCreate,
            cuEventRecord,
            cuEventSynchronize,
            cuEventDestroy,
            cuMemAlloc,
            cuMemFree,
            cuMemcpyHtoD,
            cuMemcpyDtoH,
            cuMemcpyHtoDAsync,
            cuMemcpyDtoHAsync,
            cuModuleLoadDataEx,
            cuModuleGetFunction,
            cuModuleUnload,
            cuLaunchKernel,
        }));
    }
    if devices.len() == known_devices {
        return Err(BackendError {
            status: ErrorStatus::DeviceEnumeration,
            context: "No CUDA devices found.".into(),
        });
    }
    Ok(())
}

impl CUDADevice {
    pub(crate) fn deinitialize(&mut self) {
        let _ = unsafe { (self.cuCtxSetCurrent)(self.context) };
        for program in self.programs.drain_all() {
            let _ = unsafe { (self.cuModuleUnload)(program.module) };
        }
        for buffer in self.buffers.drain_all() {
            let _ = unsafe { (self.cuMemFree)(buffer.ptr) };
        }
        if !self.stream.is_null() {
            let _ = unsafe { (self.cuStreamDestroy)(self.stream) };
            self.stream = ptr::null_mut();
        }
        let _ = unsafe { (self.cuCtxDestroy)(self.context) };
    }

    pub(crate) const fn info(&self) -> &DeviceInfo {
        &self.dev_info
    }

    fn make_current(&self) -> Result<(), BackendError> {
        unsafe { (self.cuCtxSetCurrent)(self.context) }.check(ErrorStatus::DeviceQuery)
    }

    fn live_stream(&self, status: ErrorStatus) -> Result<CUstream, BackendError> {
        if self.stream.is_null() {
            Err(BackendError { status, context: "Device stream was destroyed".into() })
        } else {
            Ok(self.stream)
        }
    }

    fn record_event(&self, stream: CUstream) -> Result<Event, BackendError> {
        let mut event = ptr::null_mut();
        unsafe { (self.cuEventCreate)(&mut event, 0) }.check(ErrorStatus::KernelSync)?;
        unsafe { (self.cuEventRecord)(event, stream) }.check(ErrorStatus::KernelSync)?;
        Ok(Event::CUDA(CUDAEvent { event }))
    }

    fn wait_events(&self, stream: CUstream, wait: &[Event]) -> Result<(), BackendError> {
        for event in native_events(wait) {
            unsafe { (self.cuStreamWaitEvent)(stream, event, 0) }
                .check(ErrorStatus::KernelSync)?;
        }
        Ok(())
    }

    pub(crate) fn alloc(&mut self, bytes: Dim) -> Result<BufferId, BackendError> {
        if bytes > self.free_bytes {
            return Err(BackendError {
                status: ErrorStatus::MemoryAllocation,
                context: "Allocation failure".into(),
            });
        }
        self.make_current()?;
        let mut ptr = 0;
        unsafe { (self.cuMemAlloc)(&mut ptr, bytes) }.check(ErrorStatus::MemoryAllocation)?;
        self.free_bytes = self.free_bytes.checked_sub(bytes).unwrap();
        Ok(BufferId(self.buffers.push(CUDABuffer { ptr, bytes })))
    }

    pub(crate) fn dealloc(&mut self, buffer: BufferId) -> Result<(), BackendError> {
        match self.buffers.remove(buffer.0) {
            Some(entry) => {
                self.make_current()?;
                unsafe { (self.cuMemFree)(entry.ptr) }.check(ErrorStatus::MemoryDeallocation)?;
                self.free_bytes += entry.bytes;
                Ok(())
            }
            None => Err(BackendError {
                status: ErrorStatus::MemoryDeallocation,
                context: "Deallocating unknown buffer".into(),
            }),
        }
    }

    pub(crate) fn buffer_desc(&self, buffer: BufferId) -> Option<BufferDescriptor> {
        self.buffers.get(buffer.0).map(|entry| BufferDescriptor {
            address: entry.ptr,
            offset: 0,
            bytes: entry.bytes,
        })
    }

    pub(crate) fn write(
        &mut self,
        dst: BufferId,
        dst_offset: Dim,
        src: &[u8],
        wait: &[Event],
        blocking: bool,
    ) -> Result<Event, BackendError> {
        self.make_current()?;
        let stream = self.live_stream(ErrorStatus::MemoryCopyH2D)?;
        let Some(entry) = self.buffers.get(dst.0) else {
            return Err(BackendError {
                status: ErrorStatus::MemoryCopyH2D,
                context: "Writing unknown buffer".into(),
            });
        };
        self.wait_events(stream, wait)?;
        let dst_ptr = entry.ptr + dst_offset as CUdeviceptr;
        if blocking {
            unsafe { (self.cuMemcpyHtoD)(dst_ptr, src.as_ptr().cast(), src.len()) }
                .check(ErrorStatus::MemoryCopyH2D)?;
        } else {
            unsafe { (self.cuMemcpyHtoDAsync)(dst_ptr, src.as_ptr().cast(), src.len(), stream) }
                .check(ErrorStatus::MemoryCopyH2D)?;
        }
        self.record_event(stream)
    }

    pub(crate) fn read(
        &mut self,
        src: BufferId,
        src_offset: Dim,
        dst: &mut [u8],
        wait: &[Event],
        blocking: bool,
    ) -> Result<Event, BackendError> {
        self.make_current()?;
        let stream = self.live_stream(ErrorStatus::MemoryCopyD2H)?;
        let Some(entry) = self.buffers.get(src.0) else {
            return Err(BackendError {
                status: ErrorStatus::MemoryCopyD2H,
                context: "Reading unknown buffer".into(),
            });
        };
        self.wait_events(stream, wait)?;
        let src_ptr = entry.ptr + src_offset as CUdeviceptr;
        if blocking {
            unsafe { (self.cuStreamSynchronize)(stream) }.check(ErrorStatus::MemoryCopyD2H)?;
            unsafe { (self.cuMemcpyDtoH)(dst.as_mut_ptr().cast(), src_ptr, dst.len()) }
                .check(ErrorStatus::MemoryCopyD2H)?;
        } else {
            unsafe { (self.cuMemcpyDtoHAsync)(dst.as_mut_ptr().cast(), src_ptr, dst.len(), stream) }
                .check(ErrorStatus::MemoryCopyD2H)?;
        }
        self.record_event(stream)
    }

    pub(crate) fn build(
        &mut self,
        artifact: &KernelArtifact,
        debug_asm: bool,
    ) -> Result<ProgramId, BackendError> {
        self.make_current()?;
        if debug_asm {
            println!("{}", String::from_utf8_lossy(&artifact.binary));
        }
        // PTX images must be null terminated
        let image = CString::new(artifact.binary.as_ref()).map_err(|_| BackendError {
            status: ErrorStatus::KernelBuild,
            context: "PTX image contains a null byte".into(),
        })?;
        let mut module = ptr::null_mut();
        unsafe {
            (self.cuModuleLoadDataEx)(
                &mut module,
                image.as_ptr().cast(),
                0,
                ptr::null_mut(),
                ptr::null_mut(),
            )
        }
        .check(ErrorStatus::KernelBuild)?;
        let name = CString::new(artifact.entry_point.as_ref()).unwrap();
        let mut function = ptr::null_mut();
        if let Err(e) = unsafe { (self.cuModuleGetFunction)(&mut function, module, name.as_ptr()) }
            .check(ErrorStatus::KernelBuild)
        {
            let _ = unsafe { (self.cuModuleUnload)(module) };
            return Err(e);
        }
        Ok(ProgramId(self.programs.push(CUDAProgram { module, function })))
    }

    pub(crate) fn release_program(&mut self, program: ProgramId) {
        if let Some(entry) = self.programs.remove(program.0) {
            let _ = unsafe { (self.cuModuleUnload)(entry.module) };
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
        debug_assert!(wait.is_empty(), "launch wait lists are rejected by the runtime layer");
        let _ = wait;
        self.make_current()?;
        let stream = self.live_stream(ErrorStatus::KernelLaunch)?;
        let Some(entry) = self.programs.get(program.0) else {
            return Err(BackendError {
                status: ErrorStatus::KernelLaunch,
                context: "Launching unknown program".into(),
            });
        };
        // Marshal argument values first so their addresses stay stable
        let mut values: Vec<u64> = Vec::with_capacity(stack.len() + 1);
        for arg in stack.args() {
            match arg {
                ArgValue::Buffer(id) => {
                    let Some(buffer) = self.buffers.get(id.0) else {
                        return Err(BackendError {
                            status: ErrorStatus::IncorrectKernelArg,
                            context: "Kernel argument is not a live buffer".into(),
                        });
                    };
                    values.push(buffer.ptr);
                }
                ArgValue::Scalar(c) => {
                    let (bytes, _) = c.le_bytes();
                    values.push(u64::from_le_bytes(bytes));
                }
            }
        }
        values.push(global_offset as u64);
        let mut kernel_params: Vec<*mut c_void> =
            values.iter().map(|value| ptr::from_ref(value).cast_mut().cast()).collect();
        unsafe {
            (self.cuLaunchKernel)(
                entry.function,
                c_uint::try_from(grid[0]).unwrap(),
                c_uint::try_from(grid[1]).unwrap(),
                c_uint::try_from(grid[2]).unwrap(),
                c_uint::try_from(block[0]).unwrap(),
                c_uint::try_from(block[1]).unwrap(),
                c_uint::try_from(block[2]).unwrap(),
                0,
                stream,
                kernel_params.as_mut_ptr(),
                ptr::null_mut(),
            )
        }
        .check(ErrorStatus::KernelLaunch)?;
        self.record_event(stream)
    }

    pub(crate) fn sync_queues(&mut self) -> Result<(), BackendError> {
        self.make_current()?;
        let stream = self.live_stream(ErrorStatus::KernelSync)?;
        unsafe { (self.cuStreamSynchronize)(stream) }.check(ErrorStatus::KernelSync)
    }

    pub(crate) fn destroy_queues(&mut self) -> Result<(), BackendError> {
        if !self.stream.is_null() {
            let stream = self.stream;
            self.stream = ptr::null_mut();
            unsafe { (self.cuStreamDestroy)(stream) }.check(ErrorStatus::Deinitialization)?;
        }
        Ok(())
    }

    pub(crate) fn sync_events(&mut self, events: &[Event]) -> Result<(), BackendError> {
        for event in native_events(events) {
            unsafe { (self.cuEventSynchronize)(event) }.check(ErrorStatus::KernelSync)?;
        }
        Ok(())
    }

    pub(crate) fn release_events(&mut self, events: Vec<Event>) {
        for event in native_events(&events) {
            let _ = unsafe { (self.cuEventDestroy)(event) };
        }
    }
}

fn native_events(events: &[Event]) -> Vec<*mut c_void> {
    events
        .iter()
        .map(|event| {
            let Event::CUDA(CUDAEvent { event }) = event else { unreachable!() };
            *event
        })
        .filter(|event| !event.is_null())
        .collect()
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
struct CUctx_st {
    _unused: [u8; 0],
}
type CUcontext = *mut CUctx_st;
type CUdevice = c_int;
type CUdeviceptr = u64;
#[repr(C)]
#[derive(Debug, Copy, Clone)]
struct CUmod_st {
    _unused: [u8; 0],
}
type CUmodule = *mut CUmod_st;
#[repr(C)]
#[derive(Debug, Copy, Clone)]
struct CUfunc_st {
    _unused: [u8; 0],
}
type CUfunction = *mut CUfunc_st;
#[repr(C)]
#[derive(Debug, Copy, Clone)]
struct CUstream_st {
    _unused: [u8; 0],
}
type CUstream = *mut CUstream_st;

#[allow(unused)]
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum CUdevice_attribute {
    CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_BLOCK = 1,
    CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_X = 2,
    CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_Y = 3,
    CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_Z = 4,
    CU_DEVICE_ATTRIBUTE_MAX_GRID_DIM_X = 5,
    CU_DEVICE_ATTRIBUTE_MAX_GRID_DIM_Y = 6,
    CU_DEVICE_ATTRIBUTE_MAX_GRID_DIM_Z = 7,
    CU_DEVICE_ATTRIBUTE_MAX_SHARED_MEMORY_PER_BLOCK = 8,
    CU_DEVICE_ATTRIBUTE_TOTAL_CONSTANT_MEMORY = 9,
    CU_DEVICE_ATTRIBUTE_WARP_SIZE = 10,
    CU_DEVICE_ATTRIBUTE_MAX_REGISTERS_PER_BLOCK = 12,
    CU_DEVICE_ATTRIBUTE_CLOCK_RATE = 13,
    CU_DEVICE_ATTRIBUTE_MULTIPROCESSOR_COUNT = 16,
    CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR = 75,
    CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR = 76,
}

#[allow(unused)]
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum CUDAStatus {
    CUDA_SUCCESS = 0,
    CUDA_ERROR_INVALID_VALUE = 1,
    CUDA_ERROR_OUT_OF_MEMORY = 2,
    CUDA_ERROR_NOT_INITIALIZED = 3,
    CUDA_ERROR_DEINITIALIZED = 4,
    CUDA_ERROR_NO_DEVICE = 100,
    CUDA_ERROR_INVALID_DEVICE = 101,
    CUDA_ERROR_INVALID_IMAGE = 200,
    CUDA_ERROR_INVALID_CONTEXT = 201,
    CUDA_ERROR_MAP_FAILED = 205,
    CUDA_ERROR_UNMAP_FAILED = 206,
    CUDA_ERROR_NO_BINARY_FOR_GPU = 209,
    CUDA_ERROR_INVALID_PTX = 218,
    CUDA_ERROR_JIT_COMPILER_NOT_FOUND = 221,
    CUDA_ERROR_INVALID_SOURCE = 300,
    CUDA_ERROR_FILE_NOT_FOUND = 301,
    CUDA_ERROR_SHARED_OBJECT_SYMBOL_NOT_FOUND = 302,
    CUDA_ERROR_OPERATING_SYSTEM = 304,
    CUDA_ERROR_INVALID_HANDLE = 400,
    CUDA_ERROR_NOT_FOUND = 500,
    CUDA_ERROR_NOT_READY = 600,
    CUDA_ERROR_ILLEGAL_ADDRESS = 700,
    CUDA_ERROR_LAUNCH_OUT_OF_RESOURCES = 701,
    CUDA_ERROR_LAUNCH_TIMEOUT = 702,
    CUDA_ERROR_LAUNCH_FAILED = 719,
    CUDA_ERROR_NOT_PERMITTED = 800,
    CUDA_ERROR_NOT_SUPPORTED = 801,
    CUDA_ERROR_UNKNOWN = 999,
}

impl CUDAStatus {
    fn check(self, status: ErrorStatus) -> Result<(), BackendError> {
        if self == Self::CUDA_SUCCESS {
            Ok(())
        } else {
            Err(BackendError { status, context: format!("{self:?}").into() })
        }
    }
}
