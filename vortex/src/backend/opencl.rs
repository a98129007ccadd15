//! `OpenCL` backend
//!
//! Dependency aware on every path: wait lists are passed natively to
//! writes, reads and kernel launches.

#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use std::{
    ffi::{c_void, CString},
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

#[derive(Debug, Default, DeJson)]
pub struct OpenCLConfig {
    /// Select which platforms will be used by the `OpenCL` backend.
    /// If set to None, uses all available platforms.
    pub platform_ids: Option<Vec<usize>>,
}

#[derive(Debug)]
pub(crate) struct OpenCLBuffer {
    buffer: *mut c_void,
    bytes: Dim,
}

#[derive(Debug)]
pub(crate) struct OpenCLProgram {
    program: *mut c_void,
    kernel: *mut c_void,
}

#[derive(Debug, Clone)]
pub struct OpenCLEvent {
    pub(crate) event: *mut c_void,
}

#[derive(Debug)]
pub(crate) struct OpenCLDevice {
    // Just to keep the connection open
    #[allow(unused)]
    library: Arc<Library>,
    ptr: *mut c_void,
    context: *mut c_void,
    dev_info: DeviceInfo,
    free_bytes: Dim,
    buffers: Slab<OpenCLBuffer>,
    programs: Slab<OpenCLProgram>,
    queue: *mut c_void,
    // Functions
    clWaitForEvents: unsafe extern "C" fn(cl_uint, *const *mut c_void) -> OpenCLStatus,
    clReleaseCommandQueue: unsafe extern "C" fn(*mut c_void) -> OpenCLStatus,
    clReleaseContext: unsafe extern "C" fn(*mut c_void) -> OpenCLStatus,
    clReleaseMemObject: unsafe extern "C" fn(*mut c_void) -> OpenCLStatus,
    clEnqueueReadBuffer: unsafe extern "C" fn(
        *mut c_void,
        *mut c_void,
        cl_uint,
        usize,
        usize,
        *mut c_void,
        cl_uint,
        *const *mut c_void,
        *mut *mut c_void,
    ) -> OpenCLStatus,
    clEnqueueWriteBuffer: unsafe extern "C" fn(
        *mut c_void,
        *mut c_void,
        cl_uint,
        usize,
        usize,
        *const c_void,
        cl_uint,
        *const *mut c_void,
        *mut *mut c_void,
    ) -> OpenCLStatus,
    clCreateBuffer: unsafe extern "C" fn(
        *mut c_void,
        cl_bitfield,
        usize,
        *mut c_void,
        *mut OpenCLStatus,
    ) -> *mut c_void,
    clGetProgramBuildInfo: unsafe extern "C" fn(
        *mut c_void,
        *mut c_void,
        cl_uint,
        usize,
        *mut c_void,
        *mut usize,
    ) -> OpenCLStatus,
    clBuildProgram: unsafe extern "C" fn(
        *mut c_void,
        cl_uint,
        *const *mut c_void,
        *const i8,
        Option<unsafe extern "C" fn(*mut c_void, *mut c_void)>,
        *mut c_void,
    ) -> OpenCLStatus,
    clReleaseProgram: unsafe extern "C" fn(*mut c_void) -> OpenCLStatus,
    clCreateKernel: unsafe extern "C" fn(*mut c_void, *const i8, *mut OpenCLStatus) -> *mut c_void,
    clGetDeviceInfo:
        unsafe extern "C" fn(*mut c_void, cl_uint, usize, *mut c_void, *mut usize) -> OpenCLStatus,
    clSetKernelArg:
        unsafe extern "C" fn(*mut c_void, cl_uint, usize, *const c_void) -> OpenCLStatus,
    clCreateProgramWithSource: unsafe extern "C" fn(
        *mut c_void,
        cl_uint,
        *const *const i8,
        *const usize,
        *mut OpenCLStatus,
    ) -> *mut c_void,
    clEnqueueNDRangeKernel: unsafe extern "C" fn(
        *mut c_void,
        *mut c_void,
        cl_uint,
        *const usize,
        *const usize,
        *const usize,
        cl_uint,
        *const *mut c_void,
        *mut *mut c_void,
    ) -> OpenCLStatus,
    clFinish: unsafe extern "C" fn(*mut c_void) -> OpenCLStatus,
}

// This definitely isn't correct, but the runtime is externally synchronized
unsafe impl Send for OpenCLBuffer {}
unsafe impl Send for OpenCLProgram {}
unsafe impl Send for OpenCLEvent {}
unsafe impl Send for OpenCLDevice {}

pub(crate) fn initialize_devices(
    config: &OpenCLConfig,
    devices: &mut Vec<Device>,
    debug_dev: bool,
) -> Result<(), BackendError> {
    if let Some(platform_ids) = &config.platform_ids {
        if platform_ids.is_empty() {
            return Err(BackendError {
                status: ErrorStatus::Initialization,
                context: "OpenCL won't be used, as it was configured out.".into(),
            });
        }
    }
    let opencl_paths = [
        "/lib/libOpenCL.so",
        "/lib64/libOpenCL.so",
        "/lib/x86_64-linux-gnu/libOpenCL.so",
        "/lib64/x86_64-linux-gnu/libOpenCL.so",
        "/usr/lib/libOpenCL.so",
        "/usr/lib64/libOpenCL.so",
        "/usr/lib/x86_64-linux-gnu/libOpenCL.so",
        "/usr/lib64/x86_64-linux-gnu/libOpenCL.so",
    ];
    let opencl = opencl_paths.iter().find_map(|path| unsafe { Library::new(path) }.ok());
    let Some(opencl) = opencl else {
        return Err(BackendError {
            status: ErrorStatus::DyLibNotFound,
            context: "OpenCL runtime not found.".into(),
        });
    };
    let clGetPlatformIDs: unsafe extern "C" fn(
        cl_uint,
        *mut *mut c_void,
        *mut cl_uint,
    ) -> OpenCLStatus = *unsafe { opencl.get(b"clGetPlatformIDs\0") }.unwrap();
    let clCreateContext: unsafe extern "C" fn(
        *const isize,
        cl_uint,
        *const *mut c_void,
        Option<unsafe extern "C" fn(*const i8, *const c_void, usize, *mut c_void)>,
        *mut c_void,
        *mut OpenCLStatus,
    ) -> *mut c_void = *unsafe { opencl.get(b"clCreateContext\0") }.unwrap();
    let clCreateCommandQueue: unsafe extern "C" fn(
        *mut c_void,
        *mut c_void,
        cl_bitfield,
        *mut OpenCLStatus,
    ) -> *mut c_void = *unsafe { opencl.get(b"clCreateCommandQueue\0") }.unwrap();
    let clGetDeviceIDs: unsafe extern "C" fn(
        *mut c_void,
        cl_bitfield,
        cl_uint,
        *mut *mut c_void,
        *mut cl_uint,
    ) -> OpenCLStatus = *unsafe { opencl.get(b"clGetDeviceIDs\0") }.unwrap();
    let clGetPlatformInfo: unsafe extern "C" fn(
        *mut c_void,
        cl_uint,
        usize,
        *mut c_void,
        *mut usize,
    ) -> OpenCLStatus = *unsafe { opencl.get(b"clGetPlatformInfo\0") }.unwrap();
    let clWaitForEvents = *unsafe { opencl.get(b"clWaitForEvents\0") }.unwrap();
    let clReleaseCommandQueue = *unsafe { opencl.get(b"clReleaseCommandQueue\0") }.unwrap();
    let clReleaseContext = *unsafe { opencl.get(b"clReleaseContext\0") }.unwrap();
    let clReleaseMemObject = *unsafe { opencl.get(b"clReleaseMemObject\0") }.unwrap();
    let clEnqueueReadBuffer = *unsafe { opencl.get(b"clEnqueueReadBuffer\0") }.unwrap();
    let clEnqueueWriteBuffer = *unsafe { opencl.get(b"clEnqueueWriteBuffer\0") }.unwrap();
    let clCreateBuffer = *unsafe { opencl.get(b"clCreateBuffer\0") }.unwrap();
    let clGetProgramBuildInfo = *unsafe { opencl.get(b"clGetProgramBuildInfo\0") }.unwrap();
    let clBuildProgram = *unsafe { opencl.get(b"clBuildProgram\0") }.unwrap();
    let clReleaseProgram = *unsafe { opencl.get(b"clReleaseProgram\0") }.unwrap();
    let clCreateKernel = *unsafe { opencl.get(b"clCreateKernel\0") }.unwrap();
    let clGetDeviceInfo = *unsafe { opencl.get(b"clGetDeviceInfo\0") }.unwrap();
    let clSetKernelArg = *unsafe { opencl.get(b"clSetKernelArg\0") }.unwrap();
    let clCreateProgramWithSource = *unsafe { opencl.get(b"clCreateProgramWithSource\0") }.unwrap();
    let clEnqueueNDRangeKernel = *unsafe { opencl.get(b"clEnqueueNDRangeKernel\0") }.unwrap();
    let clFinish = *unsafe { opencl.get(b"clFinish\0") }.unwrap();

    let library = Arc::new(opencl);
    let known_devices = devices.len();
    let platform_ids = {
        // Get the number of platforms
        let mut count: cl_uint = 0;
        unsafe { clGetPlatformIDs(0, ptr::null_mut(), &mut count) }
            .check(ErrorStatus::DeviceEnumeration)?;
        if count > 0 {
            let len = count as usize;
            let mut ids: Vec<*mut c_void> = Vec::with_capacity(len);
            unsafe { clGetPlatformIDs(count, ids.as_mut_ptr(), ptr::null_mut()) }
                .check(ErrorStatus::DeviceEnumeration)?;
            unsafe { ids.set_len(len) };
            ids
        } else {
            Vec::new()
        }
    };
    for (platform_id, platform) in platform_ids.iter().copied().enumerate().filter(|(id, _)| {
        config.platform_ids.as_ref().map_or(true, |ids| ids.contains(id))
    }) {
        let device_ids = {
            let mut count: cl_uint = 0;
            let status = unsafe {
                clGetDeviceIDs(platform, CL_DEVICE_TYPE_ALL, 0, ptr::null_mut(), &mut count)
            };
            if (OpenCLStatus::CL_SUCCESS != status && OpenCLStatus::CL_DEVICE_NOT_FOUND != status)
                || count == 0
            {
                continue;
            }
            let len = count as usize;
            let mut ids: Vec<*mut c_void> = Vec::with_capacity(len);
            let status = unsafe {
                clGetDeviceIDs(platform, CL_DEVICE_TYPE_ALL, count, ids.as_mut_ptr(), ptr::null_mut())
            };
            if OpenCLStatus::CL_SUCCESS != status {
                continue;
            }
            unsafe { ids.set_len(len) };
            ids
        };
        if debug_dev {
            let mut size: usize = 0;
            let _ = unsafe {
                clGetPlatformInfo(platform, CL_PLATFORM_NAME, 0, ptr::null_mut(), &mut size)
            };
            let mut name = vec![0u8; size];
            let _ = unsafe {
                clGetPlatformInfo(platform, CL_PLATFORM_NAME, size, name.as_mut_ptr().cast(), ptr::null_mut())
            };
            println!(
                "Using OpenCL platform, platform id {platform_id}, name {} on devices:",
                String::from_utf8_lossy(&name)
            );
        }
        for dev in device_ids {
            let mut status = OpenCLStatus::CL_SUCCESS;
            let context = unsafe {
                clCreateContext(ptr::null(), 1, [dev].as_ptr(), None, ptr::null_mut(), &mut status)
            };
            let Ok(()) = status.check(ErrorStatus::Initialization) else {
                continue;
            };
            // One in-order queue per device, the command stream above maps onto it
            let queue = unsafe { clCreateCommandQueue(context, dev, 0, &mut status) };
            let Ok(()) = status.check(ErrorStatus::Initialization) else {
                continue;
            };
            let mut device = OpenCLDevice {
                library: library.clone(),
                ptr: dev,
                context,
                dev_info: DeviceInfo::default(),
                free_bytes: 0,
                buffers: Slab::new(),
                programs: Slab::new(),
                queue,
                clWaitForEvents,
                clReleaseCommandQueue,
                clReleaseContext,
                clReleaseMemObject,
                clEnqueueReadBuffer,
                clEnqueueWriteBuffer,
                clCreateBuffer,
                clGetProgramBuildInfo,
                clBuildProgram,
                clReleaseProgram,
                clCreateKernel,
                clGetDeviceInfo,
                clSetKernelArg,
                clCreateProgramWithSource,
                clEnqueueNDRangeKernel,
                clFinish,
            };
            let Ok(()) = device.set_info(debug_dev) else {
                continue;
            };
            devices.push(Device::OpenCL(device));
        }
    }
    if devices.len() == known_devices {
        return Err(BackendError {
            status: ErrorStatus::DeviceEnumeration,
            context: "No OpenCL devices found.".into(),
        });
    }
    Ok(())
}

impl OpenCLDevice {
    pub(crate) fn deinitialize(&mut self) {
        for program in self.programs.drain_all() {
            let _ = unsafe { (self.clReleaseProgram)(program.program) };
        }
        for buffer in self.buffers.drain_all() {
            let _ = unsafe { (self.clReleaseMemObject)(buffer.buffer) };
        }
        if !self.queue.is_null() {
            let _ = unsafe { (self.clReleaseCommandQueue)(self.queue) };
            self.queue = ptr::null_mut();
        }
        let _ = unsafe { (self.clReleaseContext)(self.context) };
    }

    pub(crate) const fn info(&self) -> &DeviceInfo {
        &self.dev_info
    }

    pub(crate) fn alloc(&mut self, bytes: Dim) -> Result<BufferId, BackendError> {
        if bytes > self.free_bytes {
            return Err(BackendError {
                status: ErrorStatus::MemoryAllocation,
                context: "Allocation failure".into(),
            });
        }
        let mut status = OpenCLStatus::CL_SUCCESS;
        let buffer = unsafe {
            (self.clCreateBuffer)(self.context, CL_MEM_READ_WRITE, bytes, ptr::null_mut(), &mut status)
        };
        status.check(ErrorStatus::MemoryAllocation)?;
        self.free_bytes = self.free_bytes.checked_sub(bytes).unwrap();
        Ok(BufferId(self.buffers.push(OpenCLBuffer { buffer, bytes })))
    }

    pub(crate) fn dealloc(&mut self, buffer: BufferId) -> Result<(), BackendError> {
        match self.buffers.remove(buffer.0) {
            Some(entry) => {
                unsafe { (self.clReleaseMemObject)(entry.buffer) }
                    .check(ErrorStatus::MemoryDeallocation)?;
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
            address: entry.buffer as u64,
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
        let queue = self.live_queue(ErrorStatus::MemoryCopyH2D)?;
        let Some(entry) = self.buffers.get(dst.0) else {
            return Err(BackendError {
                status: ErrorStatus::MemoryCopyH2D,
                context: "Writing unknown buffer".into(),
            });
        };
        let event_wait_list = native_events(wait);
        let event_wait_list_ptr =
            if event_wait_list.is_empty() { ptr::null() } else { event_wait_list.as_ptr() };
        let mut event = ptr::null_mut();
        unsafe {
            (self.clEnqueueWriteBuffer)(
                queue,
                entry.buffer,
                if blocking { CL_BLOCKING } else { CL_NON_BLOCKING },
                dst_offset,
                src.len(),
                src.as_ptr().cast(),
                event_wait_list.len().try_into().unwrap(),
                event_wait_list_ptr,
                &mut event,
            )
        }
        .check(ErrorStatus::MemoryCopyH2D)?;
        Ok(Event::OpenCL(OpenCLEvent { event }))
    }

    pub(crate) fn read(
        &mut self,
        src: BufferId,
        src_offset: Dim,
        dst: &mut [u8],
        wait: &[Event],
        blocking: bool,
    ) -> Result<Event, BackendError> {
        let queue = self.live_queue(ErrorStatus::MemoryCopyD2H)?;
        let Some(entry) = self.buffers.get(src.0) else {
            return Err(BackendError {
                status: ErrorStatus::MemoryCopyD2H,
                context: "Reading unknown buffer".into(),
            });
        };
        let event_wait_list = native_events(wait);
        let event_wait_list_ptr =
            if event_wait_list.is_empty() { ptr::null() } else { event_wait_list.as_ptr() };
        let mut event: *mut c_void = ptr::null_mut();
        unsafe {
            (self.clEnqueueReadBuffer)(
                queue,
                entry.buffer,
                if blocking { CL_BLOCKING } else { CL_NON_BLOCKING },
                src_offset,
                dst.len(),
                dst.as_mut_ptr().cast(),
                event_wait_list.len().try_into().unwrap(),
                event_wait_list_ptr,
                &mut event,
            )
        }
        .check(ErrorStatus::MemoryCopyD2H)?;
        Ok(Event::OpenCL(OpenCLEvent { event }))
    }

    pub(crate) fn build(
        &mut self,
        artifact: &KernelArtifact,
        debug_asm: bool,
    ) -> Result<ProgramId, BackendError> {
        let source = core::str::from_utf8(&artifact.binary).map_err(|_| BackendError {
            status: ErrorStatus::KernelBuild,
            context: "Kernel binary is not valid OpenCL C source".into(),
        })?;
        if debug_asm {
            println!("{source}");
        }
        let sources: &[&str] = &[source];
        let mut status = OpenCLStatus::CL_SUCCESS;
        let program = unsafe {
            (self.clCreateProgramWithSource)(
                self.context,
                1,
                sources.as_ptr().cast(),
                [source.len()].as_ptr(),
                &mut status,
            )
        };
        status.check(ErrorStatus::KernelBuild)?;
        if let Err(e) = unsafe {
            (self.clBuildProgram)(
                program,
                1,
                [self.ptr].as_ptr(),
                c"-cl-fast-relaxed-math".as_ptr().cast(),
                None,
                ptr::null_mut(),
            )
        }
        .check(ErrorStatus::KernelBuild)
        {
            let build_log = self.get_program_build_data(program, CL_PROGRAM_BUILD_LOG);
            let _ = unsafe { (self.clReleaseProgram)(program) };
            return Err(match build_log {
                Ok(log) => BackendError {
                    status: ErrorStatus::KernelBuild,
                    context: format!("{e}\n{}", String::from_utf8_lossy(&log)).into(),
                },
                Err(_) => e,
            });
        }
        let program_name = CString::new(artifact.entry_point.as_ref()).unwrap();
        let mut status = OpenCLStatus::CL_SUCCESS;
        let kernel =
            unsafe { (self.clCreateKernel)(program, program_name.as_ptr().cast(), &mut status) };
        if let Err(e) = status.check(ErrorStatus::KernelBuild) {
            let _ = unsafe { (self.clReleaseProgram)(program) };
            return Err(e);
        }
        Ok(ProgramId(self.programs.push(OpenCLProgram { program, kernel })))
    }

    pub(crate) fn release_program(&mut self, program: ProgramId) {
        if let Some(entry) = self.programs.remove(program.0) {
            let _ = unsafe { (self.clReleaseProgram)(entry.program) };
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
        let queue = self.live_queue(ErrorStatus::KernelLaunch)?;
        let Some(entry) = self.programs.get(program.0) else {
            return Err(BackendError {
                status: ErrorStatus::KernelLaunch,
                context: "Launching unknown program".into(),
            });
        };
        // Scalar byte images must stay alive until the enqueue returns
        let mut scalar_bytes = Vec::new();
        for (i, arg) in stack.args().iter().enumerate() {
            let i = cl_uint::try_from(i).unwrap();
            match arg {
                ArgValue::Buffer(id) => {
                    let Some(buffer) = self.buffers.get(id.0) else {
                        return Err(BackendError {
                            status: ErrorStatus::IncorrectKernelArg,
                            context: "Kernel argument is not a live buffer".into(),
                        });
                    };
                    let ptr: *const _ = &buffer.buffer;
                    unsafe {
                        (self.clSetKernelArg)(
                            entry.kernel,
                            i,
                            core::mem::size_of::<*mut c_void>(),
                            ptr.cast(),
                        )
                    }
                    .check(ErrorStatus::IncorrectKernelArg)?;
                }
                ArgValue::Scalar(c) => {
                    let (bytes, len) = c.le_bytes();
                    scalar_bytes.push(bytes);
                    let ptr: *const u8 = scalar_bytes.last().unwrap().as_ptr();
                    unsafe { (self.clSetKernelArg)(entry.kernel, i, len, ptr.cast()) }
                        .check(ErrorStatus::IncorrectKernelArg)?;
                }
            }
        }
        let global_work_offset = [global_offset, 0, 0];
        let global_work_size = [grid[0] * block[0], grid[1] * block[1], grid[2] * block[2]];
        let local_work_size = block;
        let event_wait_list = native_events(wait);
        let event_wait_list_ptr =
            if event_wait_list.is_empty() { ptr::null() } else { event_wait_list.as_ptr() };
        let mut event: *mut c_void = ptr::null_mut();
        unsafe {
            (self.clEnqueueNDRangeKernel)(
                queue,
                entry.kernel,
                3,
                global_work_offset.as_ptr(),
                global_work_size.as_ptr(),
                local_work_size.as_ptr(),
                event_wait_list.len().try_into().unwrap(),
                event_wait_list_ptr,
                &mut event,
            )
        }
        .check(ErrorStatus::KernelLaunch)?;
        Ok(Event::OpenCL(OpenCLEvent { event }))
    }

    pub(crate) fn sync_queues(&mut self) -> Result<(), BackendError> {
        let queue = self.live_queue(ErrorStatus::KernelSync)?;
        unsafe { (self.clFinish)(queue) }.check(ErrorStatus::KernelSync)
    }

    pub(crate) fn destroy_queues(&mut self) -> Result<(), BackendError> {
        if !self.queue.is_null() {
            let queue = self.queue;
            self.queue = ptr::null_mut();
            unsafe { (self.clReleaseCommandQueue)(queue) }
                .check(ErrorStatus::Deinitialization)?;
        }
        Ok(())
    }

    pub(crate) fn sync_events(&mut self, events: &[Event]) -> Result<(), BackendError> {
        let events = native_events(events);
        if !events.is_empty() {
            unsafe { (self.clWaitForEvents)(events.len().try_into().unwrap(), events.as_ptr()) }
                .check(ErrorStatus::KernelSync)?;
        }
        Ok(())
    }

    #[allow(clippy::needless_pass_by_value)]
    pub(crate) fn release_events(&mut self, events: Vec<Event>) {
        // clReleaseEvent segfaults on some implementations, leak them instead
        let _ = self;
        let _ = events;
    }

    fn live_queue(&self, status: ErrorStatus) -> Result<*mut c_void, BackendError> {
        if self.queue.is_null() {
            Err(BackendError { status, context: "Device queue was destroyed".into() })
        } else {
            Ok(self.queue)
        }
    }

    fn set_info(&mut self, debug_dev: bool) -> Result<(), BackendError> {
        let device_name = self.get_device_data(CL_DEVICE_NAME)?;
        if debug_dev {
            println!("{}", String::from_utf8_lossy(&device_name));
        }
        let mwis = self.get_device_data(CL_DEVICE_MAX_WORK_ITEM_SIZES)?;
        let mut max_global_work_dims: [Dim; 3] = [1; 3];
        for (i, dim) in max_global_work_dims.iter_mut().enumerate() {
            let offset = i * core::mem::size_of::<usize>();
            if offset + 8 <= mwis.len() {
                *dim = usize::from_ne_bytes(mwis[offset..offset + 8].try_into().unwrap());
            }
        }
        let max_local_threads = usize::from_ne_bytes(
            self.get_device_data(CL_DEVICE_MAX_WORK_GROUP_SIZE)?.try_into().map_err(|_| {
                BackendError {
                    status: ErrorStatus::DeviceQuery,
                    context: "Unexpected work group size field width".into(),
                }
            })?,
        );
        let local_mem_size = u64::from_ne_bytes(
            self.get_device_data(CL_DEVICE_LOCAL_MEM_SIZE)?.try_into().map_err(|_| {
                BackendError {
                    status: ErrorStatus::DeviceQuery,
                    context: "Unexpected local mem size field width".into(),
                }
            })?,
        ) as Dim;
        let global_mem_size = u64::from_ne_bytes(
            self.get_device_data(CL_DEVICE_GLOBAL_MEM_SIZE)?.try_into().map_err(|_| {
                BackendError {
                    status: ErrorStatus::DeviceQuery,
                    context: "Unexpected global mem size field width".into(),
                }
            })?,
        ) as Dim;
        self.dev_info = DeviceInfo {
            compute: 1024 * 1024 * 1024 * 1024,
            max_global_work_dims,
            max_local_threads,
            preferred_block_size: max_local_threads.min(256),
            local_mem_size,
            global_mem_size,
        };
        self.free_bytes = global_mem_size;
        Ok(())
    }

    fn get_device_data(&mut self, param_name: cl_uint) -> Result<Vec<u8>, BackendError> {
        let mut size: usize = 0;
        unsafe { (self.clGetDeviceInfo)(self.ptr, param_name, 0, ptr::null_mut(), &mut size) }
            .check(ErrorStatus::DeviceQuery)?;
        if size == 0 {
            return Ok(Vec::new());
        }
        let mut data: Vec<u8> = Vec::with_capacity(size);
        unsafe {
            data.set_len(size);
            (self.clGetDeviceInfo)(
                self.ptr,
                param_name,
                size,
                data.as_mut_ptr().cast(),
                ptr::null_mut(),
            )
        }
        .check(ErrorStatus::DeviceQuery)?;
        Ok(data)
    }

    fn get_program_build_data(
        &mut self,
        program: *mut c_void,
        param_name: cl_uint,
    ) -> Result<Vec<u8>, OpenCLStatus> {
        let mut size: usize = 0;
        let status = unsafe {
            (self.clGetProgramBuildInfo)(program, self.ptr, param_name, 0, ptr::null_mut(), &mut size)
        };
        if OpenCLStatus::CL_SUCCESS != status {
            return Err(status);
        }
        if size == 0 {
            return Ok(Vec::new());
        }
        let mut data: Vec<u8> = Vec::with_capacity(size);
        let status = unsafe {
            data.set_len(size);
            (self.clGetProgramBuildInfo)(
                program,
                self.ptr,
                param_name,
                size,
                data.as_mut_ptr().cast(),
                ptr::null_mut(),
            )
        };
        if OpenCLStatus::CL_SUCCESS == status {
            Ok(data)
        } else {
            Err(status)
        }
    }
}

fn native_events(events: &[Event]) -> Vec<*mut c_void> {
    events
        .iter()
        .map(|event| {
            let Event::OpenCL(OpenCLEvent { event }) = event else { unreachable!() };
            *event
        })
        .filter(|event| !event.is_null())
        .collect()
}

type cl_int = i32;
type cl_uint = u32;
type cl_bitfield = u64;

const CL_PLATFORM_NAME: cl_uint = 0x0902;
const CL_DEVICE_NAME: cl_uint = 0x102B;
const CL_DEVICE_GLOBAL_MEM_SIZE: cl_uint = 0x101F;
const CL_DEVICE_LOCAL_MEM_SIZE: cl_uint = 0x1023;
const CL_DEVICE_MAX_WORK_GROUP_SIZE: cl_uint = 0x1004;
const CL_DEVICE_MAX_WORK_ITEM_SIZES: cl_uint = 0x1005;
const CL_DEVICE_TYPE_ALL: cl_bitfield = 0xFFFF_FFFF;
const CL_MEM_READ_WRITE: cl_bitfield = 1;
const CL_BLOCKING: cl_uint = 1;
const CL_NON_BLOCKING: cl_uint = 0;
const CL_PROGRAM_BUILD_LOG: cl_uint = 0x1183;

#[allow(clippy::upper_case_acronyms)]
#[derive(Copy, Clone, PartialEq, Debug, Eq)]
#[repr(C)]
enum OpenCLStatus {
    CL_DEVICE_NOT_FOUND = -1,
    CL_SUCCESS = 0,
    CL_MEM_OBJECT_ALLOCATION_FAILURE = -4,
    CL_OUT_OF_RESOURCES = -5,
    CL_OUT_OF_HOST_MEMORY = -6,
    CL_MISALIGNED_SUB_BUFFER_OFFSET = -13,
    CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST = -14,
    CL_INVALID_VALUE = -30,
    CL_INVALID_DEVICE_QUEUE = -33,
    CL_INVALID_CONTEXT = -34,
    CL_INVALID_COMMAND_QUEUE = -36,
    CL_INVALID_MEM_OBJECT = -38,
    CL_INVALID_PROGRAM = -44,
    CL_INVALID_PROGRAM_EXECUTABLE = -45,
    CL_INVALID_KERNEL_NAME = -46,
    CL_INVALID_KERNEL_DEFINITION = -47,
    CL_INVALID_KERNEL = -48,
    CL_INVALID_ARG_INDEX = -49,
    CL_INVALID_ARG_VALUE = -50,
    CL_INVALID_ARG_SIZE = -51,
    CL_INVALID_KERNEL_ARGS = -52,
    CL_INVALID_WORK_DIMENSION = -53,
    CL_INVALID_WORK_GROUP_SIZE = -54,
    CL_INVALID_WORK_ITEM_SIZE = -55,
    CL_INVALID_GLOBAL_OFFSET = -56,
    CL_INVALID_EVENT_WAIT_LIST = -57,
    CL_INVALID_EVENT = -58,
    CL_INVALID_OPERATION = -59,
    CL_INVALID_BUFFER_SIZE = -61,
    CL_INVALID_GLOBAL_WORK_SIZE = -63,
    CL_INVALID_PROPERTY = -64,
    CL_MAX_SIZE_RESTRICTION_EXCEEDED = -72,
    UNKNOWN,
}

impl From<cl_int> for OpenCLStatus {
    fn from(status: cl_int) -> Self {
        match status {
            -4 => Self::CL_MEM_OBJECT_ALLOCATION_FAILURE,
            -5 => Self::CL_OUT_OF_RESOURCES,
            -6 => Self::CL_OUT_OF_HOST_MEMORY,
            -13 => Self::CL_MISALIGNED_SUB_BUFFER_OFFSET,
            -14 => Self::CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST,
            -30 => Self::CL_INVALID_VALUE,
            -33 => Self::CL_INVALID_DEVICE_QUEUE,
            -34 => Self::CL_INVALID_CONTEXT,
            -36 => Self::CL_INVALID_COMMAND_QUEUE,
            -38 => Self::CL_INVALID_MEM_OBJECT,
            -44 => Self::CL_INVALID_PROGRAM,
            -45 => Self::CL_INVALID_PROGRAM_EXECUTABLE,
            -46 => Self::CL_INVALID_KERNEL_NAME,
            -47 => Self::CL_INVALID_KERNEL_DEFINITION,
            -48 => Self::CL_INVALID_KERNEL,
            -49 => Self::CL_INVALID_ARG_INDEX,
            -50 => Self::CL_INVALID_ARG_VALUE,
            -51 => Self::CL_INVALID_ARG_SIZE,
            -52 => Self::CL_INVALID_KERNEL_ARGS,
            -53 => Self::CL_INVALID_WORK_DIMENSION,
            -54 => Self::CL_INVALID_WORK_GROUP_SIZE,
            -55 => Self::CL_INVALID_WORK_ITEM_SIZE,
            -56 => Self::CL_INVALID_GLOBAL_OFFSET,
            -57 => Self::CL_INVALID_EVENT_WAIT_LIST,
            -58 => Self::CL_INVALID_EVENT,
            -59 => Self::CL_INVALID_OPERATION,
            -61 => Self::CL_INVALID_BUFFER_SIZE,
            -63 => Self::CL_INVALID_GLOBAL_WORK_SIZE,
            -64 => Self::CL_INVALID_PROPERTY,
            -72 => Self::CL_MAX_SIZE_RESTRICTION_EXCEEDED,
            _ => Self::UNKNOWN,
        }
    }
}

impl OpenCLStatus {
    fn check(self, status: ErrorStatus) -> Result<(), BackendError> {
        if self == Self::CL_SUCCESS {
            Ok(())
        } else {
            Err(BackendError { status, context: format!("{self:?}").into() })
        }
    }
}
