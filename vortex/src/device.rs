//! Per device runtime: one command stream, one kernel cache, one set of
//! object consistency states, all above one backend device.
//!
//! This is the exposed boundary of the crate. The scheduling layer either
//! drives the pieces directly (allocate, enqueue, launch, sync) or goes
//! through [run](DeviceRuntime::run) which performs the whole transfer
//! decision dance: upload what is not valid on device, launch with the
//! uploads as dependencies, mark declared outputs as written.

use std::collections::BTreeMap;

use crate::artifact::{KernelArtifact, KernelMeta, Param};
use crate::backend::{BufferDescriptor, BufferId, Device, DeviceInfo};
use crate::cache::{CodeCache, InstalledKernel};
use crate::dtype::{Constant, DType};
use crate::error::{BackendError, ErrorStatus, VortexError};
use crate::scalar::{HostData, HostDataMut};
use crate::stack::{ArgValue, CallStack};
use crate::state::{ObjectId, ObjectState};
use crate::stream::{EventId, StreamState};
use crate::Dim;

/// One argument of an orchestrated kernel execution
#[derive(Debug)]
pub enum TaskArg<'a> {
    /// Host visible object bound to a buffer parameter
    Buffer { object: ObjectId, data: HostData<'a> },
    /// Scalar immediate bound to a scalar parameter
    Scalar(Constant),
}

#[derive(Debug)]
pub struct DeviceRuntime {
    backend: Device,
    stream: StreamState,
    cache: CodeCache,
    objects: BTreeMap<ObjectId, ObjectState>,
    debug: bool,
}

fn incorrect_arg(context: &str) -> VortexError {
    VortexError::BackendFailure(BackendError {
        status: ErrorStatus::IncorrectKernelArg,
        context: context.into(),
    })
}

impl DeviceRuntime {
    pub(crate) fn new(backend: Device, debug: bool) -> DeviceRuntime {
        DeviceRuntime {
            backend,
            stream: StreamState::new(),
            cache: CodeCache::new(),
            objects: BTreeMap::new(),
            debug,
        }
    }

    #[must_use]
    pub const fn info(&self) -> &DeviceInfo {
        self.backend.info()
    }

    /// Allocate a device buffer. The buffer is exclusively owned by this
    /// device and must be released through this runtime.
    pub fn allocate(&mut self, bytes: Dim) -> Result<BufferId, VortexError> {
        Ok(self.backend.alloc(bytes)?)
    }

    /// Release a device buffer. Releasing twice surfaces an error and does
    /// not corrupt the allocator.
    pub fn release(&mut self, buffer: BufferId) -> Result<(), VortexError> {
        if self.backend.buffer_desc(buffer).is_none() {
            return Err(VortexError::invalid_buffer(
                format!("{buffer:?} was already released or is foreign to this device").into(),
            ));
        }
        for state in self.objects.values_mut() {
            if state.buffer() == Some(buffer) {
                state.clear_buffer();
            }
        }
        self.backend.dealloc(buffer)?;
        Ok(())
    }

    pub fn buffer_desc(&self, buffer: BufferId) -> Result<BufferDescriptor, VortexError> {
        self.backend.buffer_desc(buffer).ok_or_else(|| {
            VortexError::invalid_buffer(
                format!("{buffer:?} was already released or is foreign to this device").into(),
            )
        })
    }

    /// Install the artifact or return the already installed kernel.
    /// At most one build wins per identity, a hit ignores the binary.
    pub fn install_or_get(
        &mut self,
        artifact: &KernelArtifact,
    ) -> Result<InstalledKernel, VortexError> {
        if self.debug && !self.cache.is_cached(&artifact.identity) {
            println!("Installing kernel {}", artifact.identity);
        }
        self.cache.install_or_get(&mut self.backend, artifact, self.debug)
    }

    #[must_use]
    pub fn is_cached(&self, identity: &str) -> bool {
        self.cache.is_cached(identity)
    }

    /// Clears the kernel cache. Installed kernels in flight remain usable,
    /// later installs compile again.
    pub fn reset_cache(&mut self) {
        self.cache.reset();
    }

    /// Number of kernel build attempts on this device so far
    #[must_use]
    pub const fn build_count(&self) -> usize {
        self.cache.build_count()
    }

    /// Blocking host to device copy of `len` elements
    pub fn enqueue_write(
        &mut self,
        dst: BufferId,
        dst_offset: Dim,
        src: &HostData,
        src_offset: Dim,
        len: Dim,
        wait: &[EventId],
    ) -> Result<(), VortexError> {
        self.write_inner(dst, dst_offset, src, src_offset, len, wait, true).map(|_| ())
    }

    /// Asynchronous host to device copy of `len` elements. The source is
    /// captured as its byte image before the call returns.
    pub fn enqueue_write_async(
        &mut self,
        dst: BufferId,
        dst_offset: Dim,
        src: &HostData,
        src_offset: Dim,
        len: Dim,
        wait: &[EventId],
    ) -> Result<EventId, VortexError> {
        self.write_inner(dst, dst_offset, src, src_offset, len, wait, false)
    }

    fn write_inner(
        &mut self,
        dst: BufferId,
        dst_offset: Dim,
        src: &HostData,
        src_offset: Dim,
        len: Dim,
        wait: &[EventId],
        blocking: bool,
    ) -> Result<EventId, VortexError> {
        self.stream.ensure_open()?;
        let desc = self.buffer_desc(dst)?;
        let width = src.dtype().byte_size();
        if (dst_offset + len) * width > desc.bytes {
            return Err(VortexError::invalid_buffer(
                format!("write of {len} elements at {dst_offset} exceeds {desc:?}").into(),
            ));
        }
        let bytes = src.as_bytes();
        let Some(chunk) = bytes.get(src_offset * width..(src_offset + len) * width) else {
            return Err(incorrect_arg("host range exceeds the source view"));
        };
        let wait_events = self.stream.resolve_waits(wait)?;
        let event = self
            .backend
            .write(dst, dst_offset * width, chunk, &wait_events, blocking)
            .map_err(VortexError::NativeTransferFailure)?;
        Ok(self.stream.record(event, None))
    }

    /// Blocking device to host copy of `len` elements into `dst`
    pub fn enqueue_read(
        &mut self,
        src: BufferId,
        src_offset: Dim,
        dst: &mut HostDataMut,
        dst_offset: Dim,
        len: Dim,
        wait: &[EventId],
    ) -> Result<(), VortexError> {
        self.stream.ensure_open()?;
        let desc = self.buffer_desc(src)?;
        let width = dst.dtype().byte_size();
        if (src_offset + len) * width > desc.bytes {
            return Err(VortexError::invalid_buffer(
                format!("read of {len} elements at {src_offset} exceeds {desc:?}").into(),
            ));
        }
        let wait_events = self.stream.resolve_waits(wait)?;
        let bytes = dst.as_bytes_mut();
        let Some(chunk) = bytes.get_mut(dst_offset * width..(dst_offset + len) * width) else {
            return Err(incorrect_arg("host range exceeds the destination view"));
        };
        let event = self
            .backend
            .read(src, src_offset * width, chunk, &wait_events, true)
            .map_err(VortexError::NativeTransferFailure)?;
        let id = self.stream.record(event, None);
        // Blocking semantics, the data is in place when we return
        let entry = self.stream.take_entry(id).unwrap();
        self.backend.sync_events(std::slice::from_ref(&entry.event))?;
        self.backend.release_events(vec![entry.event]);
        Ok(())
    }

    /// Asynchronous device to host copy of `len` elements into a runtime
    /// owned landing area, retrieved with [read_result](Self::read_result).
    pub fn enqueue_read_async(
        &mut self,
        src: BufferId,
        src_offset: Dim,
        len: Dim,
        dtype: DType,
        wait: &[EventId],
    ) -> Result<EventId, VortexError> {
        self.stream.ensure_open()?;
        let desc = self.buffer_desc(src)?;
        let width = dtype.byte_size();
        if (src_offset + len) * width > desc.bytes {
            return Err(VortexError::invalid_buffer(
                format!("read of {len} elements at {src_offset} exceeds {desc:?}").into(),
            ));
        }
        let wait_events = self.stream.resolve_waits(wait)?;
        let mut staging = vec![0u8; len * width].into_boxed_slice();
        let event = self
            .backend
            .read(src, src_offset * width, &mut staging, &wait_events, false)
            .map_err(VortexError::NativeTransferFailure)?;
        Ok(self.stream.record(event, Some(staging)))
    }

    /// Wait for an asynchronous read and copy its data into `dst`.
    /// The event retires in the process.
    pub fn read_result(&mut self, event: EventId, dst: &mut HostDataMut) -> Result<(), VortexError> {
        let entry = self.stream.take_read_entry(event)?;
        self.backend.sync_events(std::slice::from_ref(&entry.event))?;
        let staging = entry.staging.unwrap();
        let bytes = dst.as_bytes_mut();
        if bytes.len() != staging.len() {
            return Err(incorrect_arg("destination view does not match the read size"));
        }
        bytes.copy_from_slice(&staging);
        self.backend.release_events(vec![entry.event]);
        Ok(())
    }

    /// Launch an installed kernel over `batch_threads` work items.
    ///
    /// Work sizes beyond the device batch capacity split into multiple
    /// sub-launches, one completion handle each, every sub-launch carrying
    /// the supplied wait list and its chunk base as global offset. A
    /// non-empty wait list on a backend without dependency-aware launch
    /// surfaces [UnsupportedOperation](VortexError::UnsupportedOperation).
    pub fn launch(
        &mut self,
        kernel: &InstalledKernel,
        stack: &CallStack,
        batch_threads: Dim,
        wait: &[EventId],
    ) -> Result<Vec<EventId>, VortexError> {
        self.stream.ensure_open()?;
        self.validate_stack(kernel.meta(), stack)?;
        if batch_threads == 0 {
            return Err(VortexError::BackendFailure(BackendError {
                status: ErrorStatus::KernelLaunch,
                context: "Launch over zero work items".into(),
            }));
        }
        if !wait.is_empty() && !self.backend.supports_launch_wait_list() {
            return Err(VortexError::UnsupportedOperation(
                format!("backend cannot honor a dependency-aware launch of {}", kernel.identity())
                    .into(),
            ));
        }
        let wait_events = self.stream.resolve_waits(wait)?;
        let info = self.backend.info();
        let max_batch = info.max_batch_threads().max(1);
        let block = kernel
            .meta()
            .local_size_hint
            .unwrap_or(info.preferred_block_size)
            .clamp(1, info.max_local_threads.max(1));
        let mut launches = Vec::new();
        let mut offset = 0;
        while offset < batch_threads {
            let chunk = (batch_threads - offset).min(max_batch);
            // The work group must divide the chunk, shrink until it does
            let mut block_dim = block.min(chunk);
            while chunk % block_dim != 0 {
                block_dim -= 1;
            }
            let grid = [chunk / block_dim, 1, 1];
            let event = self.backend.launch(
                kernel.program(),
                stack,
                grid,
                [block_dim, 1, 1],
                offset,
                &wait_events,
            )?;
            launches.push(self.stream.record(event, None));
            offset += chunk;
        }
        if self.debug {
            println!("Launched {} as {} sub-launches", kernel.identity(), launches.len());
        }
        Ok(launches)
    }

    /// Block until every operation enqueued on this stream completed.
    /// Retires all live events.
    pub fn sync(&mut self) -> Result<(), VortexError> {
        if self.stream.is_closed() {
            return Ok(());
        }
        self.backend.sync_queues()?;
        let events = self.stream.retire_all();
        self.backend.release_events(events);
        Ok(())
    }

    /// Destroy the underlying native queue. In-flight work is abandoned,
    /// not rolled back. Further enqueues fail.
    pub fn cleanup(&mut self) -> Result<(), VortexError> {
        if self.stream.is_closed() {
            return Ok(());
        }
        self.stream.close();
        let events = self.stream.retire_all();
        self.backend.release_events(events);
        self.backend.destroy_queues()?;
        Ok(())
    }

    /// Return the buffer attached to the object, allocating and attaching
    /// one of the given size on first use
    pub fn ensure_buffer(&mut self, object: ObjectId, bytes: Dim) -> Result<BufferId, VortexError> {
        if let Some(buffer) = self.objects.get(&object).and_then(ObjectState::buffer) {
            if self.objects[&object].bytes() != bytes {
                return Err(VortexError::invalid_buffer(
                    format!("object {object} changed size since its buffer was attached").into(),
                ));
            }
            return Ok(buffer);
        }
        let buffer = self.backend.alloc(bytes)?;
        self.objects.entry(object).or_default().set_buffer(buffer, bytes);
        Ok(buffer)
    }

    /// Consistency state of an object on this device, if any transfer or
    /// execution has touched it
    #[must_use]
    pub fn object_state(&self, object: ObjectId) -> Option<&ObjectState> {
        self.objects.get(&object)
    }

    /// The host copy of the object changed out of band, force a re-upload
    /// before the next launch reading it
    pub fn invalidate(&mut self, object: ObjectId) {
        if let Some(state) = self.objects.get_mut(&object) {
            state.invalidate();
        }
    }

    /// Execute a kernel over host visible objects.
    ///
    /// Installs the artifact through the cache, uploads every declared
    /// read parameter whose device copy is not valid, launches with those
    /// uploads as dependencies and marks every declared output as written
    /// by the kernel once the final sub-launch was issued. Returns the
    /// completion handle of the last sub-launch.
    pub fn run(
        &mut self,
        artifact: &KernelArtifact,
        args: &[TaskArg],
        batch_threads: Dim,
    ) -> Result<EventId, VortexError> {
        self.stream.ensure_open()?;
        let kernel = self.install_or_get(artifact)?;
        if kernel.meta().params.len() != args.len() {
            return Err(incorrect_arg("argument count does not match the kernel metadata"));
        }
        let mut stack = CallStack::new();
        let mut wait = Vec::new();
        let mut outputs = Vec::new();
        for (param, arg) in kernel.meta().params.iter().zip(args) {
            match (param, arg) {
                (Param::Buffer { dtype, access }, TaskArg::Buffer { object, data }) => {
                    if data.dtype() != *dtype {
                        return Err(incorrect_arg("argument dtype does not match the kernel metadata"));
                    }
                    let buffer = self.ensure_buffer(*object, data.byte_len())?;
                    let needs_upload = access.is_read()
                        && !self.objects.get(object).is_some_and(ObjectState::is_valid);
                    if needs_upload {
                        let event = self
                            .backend
                            .write(buffer, 0, data.as_bytes(), &[], false)
                            .map_err(VortexError::NativeTransferFailure)?;
                        wait.push(self.stream.record(event, None));
                        if let Some(state) = self.objects.get_mut(object) {
                            state.mark_transferred_to_device();
                        }
                    }
                    if access.is_write() {
                        outputs.push(*object);
                    }
                    stack.push_buffer(buffer);
                }
                (Param::Scalar { dtype }, TaskArg::Scalar(c)) => {
                    if c.dtype() != *dtype {
                        return Err(incorrect_arg("scalar dtype does not match the kernel metadata"));
                    }
                    stack.push_constant(*c);
                }
                _ => return Err(incorrect_arg("argument kind does not match the kernel metadata")),
            }
        }
        let launches = match self.launch(&kernel, &stack, batch_threads, &wait) {
            // The backend cannot order the launch after the uploads, wait for
            // them on the host and launch without dependencies
            Err(VortexError::UnsupportedOperation(_)) if !wait.is_empty() => {
                let events = self.stream.resolve_waits(&wait)?;
                self.backend.sync_events(&events)?;
                self.launch(&kernel, &stack, batch_threads, &[])?
            }
            other => other?,
        };
        // State changes only after the final sub-launch was issued successfully
        for object in outputs {
            if let Some(state) = self.objects.get_mut(&object) {
                state.mark_written_by_kernel();
            }
        }
        Ok(*launches.last().unwrap())
    }

    /// Transfer an object back to the host if a kernel modified it.
    /// No-op when the device copy is not ahead of the host.
    pub fn read_back(&mut self, object: ObjectId, dst: &mut HostDataMut) -> Result<(), VortexError> {
        let Some(state) = self.objects.get(&object) else {
            return Err(VortexError::invalid_buffer(
                format!("object {object} has no state on this device").into(),
            ));
        };
        if !state.is_modified() {
            return Ok(());
        }
        let Some(buffer) = state.buffer() else {
            return Err(VortexError::invalid_buffer(
                format!("object {object} has no attached buffer").into(),
            ));
        };
        let len = dst.len();
        // The queue is in-order, a blocking read lands after the launches
        self.enqueue_read(buffer, 0, dst, 0, len, &[])?;
        if let Some(state) = self.objects.get_mut(&object) {
            state.mark_transferred_to_host();
        }
        Ok(())
    }

    fn validate_stack(&self, meta: &KernelMeta, stack: &CallStack) -> Result<(), VortexError> {
        if meta.params.len() != stack.len() {
            return Err(incorrect_arg("call stack length does not match the kernel metadata"));
        }
        for (param, arg) in meta.params.iter().zip(stack.args()) {
            match (param, arg) {
                (Param::Buffer { .. }, ArgValue::Buffer(id)) => {
                    if self.backend.buffer_desc(*id).is_none() {
                        return Err(VortexError::invalid_buffer(
                            format!("{id:?} in the call stack was already released").into(),
                        ));
                    }
                }
                (Param::Scalar { dtype }, ArgValue::Scalar(c)) => {
                    if c.dtype() != *dtype {
                        return Err(incorrect_arg("scalar dtype does not match the kernel metadata"));
                    }
                }
                _ => {
                    return Err(incorrect_arg("call stack entry kind does not match the kernel metadata"))
                }
            }
        }
        Ok(())
    }

    /// Number of live, not yet retired events on this stream
    #[must_use]
    pub fn live_events(&self) -> usize {
        self.stream.live_events()
    }

    pub(crate) fn deinitialize(&mut self) {
        let events = self.stream.retire_all();
        self.backend.release_events(events);
        self.stream.close();
        self.cache.reset();
        self.objects.clear();
        self.backend.deinitialize();
    }
}
