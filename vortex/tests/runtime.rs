//! Runtime scenarios exercised against the virtual backend.

use std::sync::Arc;

use vortex::{
    Access, CallStack, Config, Constant, DType, ErrorStatus, HostData, HostDataMut,
    KernelArtifact, KernelMeta, Param, Runtime, TaskArg, VortexError,
};

fn runtime_with(f: impl FnOnce(&mut Config)) -> Runtime {
    let mut config = Config::default();
    config.virt.enabled = true;
    f(&mut config);
    Runtime::initialize(&config).unwrap()
}

fn runtime() -> Runtime {
    runtime_with(|_| {})
}

const SCALE2X: &str = "ld.f32 r0, g0\nmov.f32 r1, 2.0\nmul.f32 r2, r0, r1\nst.f32 g0, r2";

fn scale2x() -> KernelArtifact {
    KernelArtifact::new(
        "scale2x",
        SCALE2X.as_bytes().to_vec(),
        "scale2x",
        KernelMeta {
            params: vec![Param::Buffer { dtype: DType::F32, access: Access::ReadWrite }],
            local_size_hint: None,
        },
    )
}

#[test]
fn write_launch_read_chain() {
    let mut rt = runtime();
    let dev = rt.device_mut(0).unwrap();

    let host = vec![1f32; 1024];
    let buffer = dev.allocate(1024 * 4).unwrap();
    let e1 = dev
        .enqueue_write_async(buffer, 0, &HostData::from(host.as_slice()), 0, 1024, &[])
        .unwrap();

    let kernel = dev.install_or_get(&scale2x()).unwrap();
    let mut stack = CallStack::new();
    stack.push_buffer(buffer);
    let launched = dev.launch(&kernel, &stack, 1024, &[e1]).unwrap();
    assert_eq!(launched.len(), 1);

    let mut out = vec![0f32; 1024];
    dev.enqueue_read(buffer, 0, &mut HostDataMut::from(out.as_mut_slice()), 0, 1024, &launched)
        .unwrap();
    assert!(out.iter().all(|x| *x == 2.0));
}

#[test]
fn install_ignores_binary_on_hit() {
    let mut rt = runtime();
    let dev = rt.device_mut(0).unwrap();

    let first = dev.install_or_get(&scale2x()).unwrap();
    // Same identity, different binary: the second binary is never built
    let other = KernelArtifact::new(
        "scale2x",
        b"this would not even parse".to_vec(),
        "scale2x",
        KernelMeta::default(),
    );
    let second = dev.install_or_get(&other).unwrap();
    assert_eq!(first.program(), second.program());
    assert_eq!(dev.build_count(), 1);
}

#[test]
fn concurrent_installs_build_once() {
    let rt = Arc::new(vortex::Mutex::<Runtime, 1_000_000>::new(runtime()));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let rt = rt.clone();
        handles.push(std::thread::spawn(move || {
            let mut guard = rt.lock();
            let dev = guard.device_mut(0).unwrap();
            dev.install_or_get(&scale2x()).unwrap().program()
        }));
    }
    let programs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let mut guard = rt.lock();
    let dev = guard.device_mut(0).unwrap();
    assert_eq!(dev.build_count(), 1);
    assert!(programs.iter().all(|p| *p == programs[0]));
}

#[test]
fn batch_splitting_produces_independent_launches() {
    let mut rt = runtime_with(|config| {
        config.virt.max_batch_threads = Some(256);
        config.virt.preferred_block_size = Some(64);
    });
    let dev = rt.device_mut(0).unwrap();

    let host = vec![1f32; 768];
    let buffer = dev.allocate(768 * 4).unwrap();
    let e1 = dev
        .enqueue_write_async(buffer, 0, &HostData::from(host.as_slice()), 0, 768, &[])
        .unwrap();
    let kernel = dev.install_or_get(&scale2x()).unwrap();
    let mut stack = CallStack::new();
    stack.push_buffer(buffer);

    // 3 x max batch, one completion handle per sub-launch
    let launched = dev.launch(&kernel, &stack, 768, &[e1]).unwrap();
    assert_eq!(launched.len(), 3);
    for (i, a) in launched.iter().enumerate() {
        for b in &launched[i + 1..] {
            assert_ne!(a, b);
        }
    }

    let mut out = vec![0f32; 768];
    dev.enqueue_read(buffer, 0, &mut HostDataMut::from(out.as_mut_slice()), 0, 768, &launched)
        .unwrap();
    assert!(out.iter().all(|x| *x == 2.0), "every chunk saw the launch");
}

#[test]
fn run_tracks_consistency_state() {
    let mut rt = runtime();
    let dev = rt.device_mut(0).unwrap();
    let object = 1;
    let host = vec![1f32; 512];

    assert!(dev.object_state(object).is_none());
    dev.run(&scale2x(), &[TaskArg::Buffer { object, data: HostData::from(host.as_slice()) }], 512)
        .unwrap();
    let state = dev.object_state(object).unwrap();
    assert!(state.is_valid());
    assert!(state.is_modified());
    assert!(state.has_contents());

    let mut out = vec![0f32; 512];
    dev.read_back(object, &mut HostDataMut::from(out.as_mut_slice())).unwrap();
    assert!(out.iter().all(|x| *x == 2.0));
    assert!(!dev.object_state(object).unwrap().is_modified());

    // The device copy is still valid, the second run does not re-upload,
    // it scales the previous device result again
    dev.run(&scale2x(), &[TaskArg::Buffer { object, data: HostData::from(host.as_slice()) }], 512)
        .unwrap();
    dev.read_back(object, &mut HostDataMut::from(out.as_mut_slice())).unwrap();
    assert!(out.iter().all(|x| *x == 4.0));

    // Invalidation forces the host copy up again
    dev.invalidate(object);
    dev.run(&scale2x(), &[TaskArg::Buffer { object, data: HostData::from(host.as_slice()) }], 512)
        .unwrap();
    dev.read_back(object, &mut HostDataMut::from(out.as_mut_slice())).unwrap();
    assert!(out.iter().all(|x| *x == 2.0));
}

#[test]
fn run_with_scalar_and_output_params() {
    let mut rt = runtime();
    let dev = rt.device_mut(0).unwrap();
    let source = "ld.f32 r0, g0\nlds.f32 r1, s2\nmul.f32 r2, r0, r1\nst.f32 g1, r2";
    let artifact = KernelArtifact::new(
        "scale_by",
        source.as_bytes().to_vec(),
        "scale_by",
        KernelMeta {
            params: vec![
                Param::Buffer { dtype: DType::F32, access: Access::Read },
                Param::Buffer { dtype: DType::F32, access: Access::Write },
                Param::Scalar { dtype: DType::F32 },
            ],
            local_size_hint: None,
        },
    );
    let x = vec![2f32; 256];
    let y = vec![0f32; 256];
    dev.run(
        &artifact,
        &[
            TaskArg::Buffer { object: 10, data: HostData::from(x.as_slice()) },
            TaskArg::Buffer { object: 11, data: HostData::from(y.as_slice()) },
            TaskArg::Scalar(Constant::new(3f32)),
        ],
        256,
    )
    .unwrap();

    assert!(!dev.object_state(10).unwrap().is_modified(), "input is not written");
    assert!(dev.object_state(11).unwrap().is_modified());
    let mut out = vec![0f32; 256];
    dev.read_back(11, &mut HostDataMut::from(out.as_mut_slice())).unwrap();
    assert!(out.iter().all(|v| *v == 6.0));
}

#[test]
fn ensure_buffer_attaches_once() {
    let mut rt = runtime();
    let dev = rt.device_mut(0).unwrap();
    let a = dev.ensure_buffer(42, 1024).unwrap();
    let b = dev.ensure_buffer(42, 1024).unwrap();
    assert_eq!(a, b);
    assert!(matches!(dev.ensure_buffer(42, 2048), Err(VortexError::InvalidBufferUse(_))));
    let state = dev.object_state(42).unwrap();
    assert!(state.has_buffer());
    assert!(!state.is_valid());
}

#[test]
fn retired_events_are_unknown() {
    let mut rt = runtime();
    let dev = rt.device_mut(0).unwrap();
    let host = vec![1f32; 16];
    let buffer = dev.allocate(64).unwrap();
    let e1 = dev
        .enqueue_write_async(buffer, 0, &HostData::from(host.as_slice()), 0, 16, &[])
        .unwrap();
    dev.sync().unwrap();

    let kernel = dev.install_or_get(&scale2x()).unwrap();
    let mut stack = CallStack::new();
    stack.push_buffer(buffer);
    let err = dev.launch(&kernel, &stack, 16, &[e1]).unwrap_err();
    assert!(matches!(err, VortexError::UnknownEvent(id) if id == e1));
}

#[test]
fn cleanup_rejects_further_enqueues() {
    let mut rt = runtime();
    let dev = rt.device_mut(0).unwrap();
    let host = vec![1f32; 16];
    let buffer = dev.allocate(64).unwrap();
    dev.cleanup().unwrap();

    let err = dev
        .enqueue_write_async(buffer, 0, &HostData::from(host.as_slice()), 0, 16, &[])
        .unwrap_err();
    assert!(matches!(err, VortexError::EnqueueAfterCleanup));
    // sync after cleanup has nothing to wait for
    dev.sync().unwrap();
    // cleanup is safe to call from cleanup paths twice
    dev.cleanup().unwrap();
}

#[test]
fn double_release_is_invalid_buffer_use() {
    let mut rt = runtime();
    let dev = rt.device_mut(0).unwrap();
    let buffer = dev.allocate(256).unwrap();
    dev.release(buffer).unwrap();
    assert!(matches!(dev.release(buffer), Err(VortexError::InvalidBufferUse(_))));

    let host = vec![0f32; 16];
    let err = dev
        .enqueue_write_async(buffer, 0, &HostData::from(host.as_slice()), 0, 16, &[])
        .unwrap_err();
    assert!(matches!(err, VortexError::InvalidBufferUse(_)));
}

#[test]
fn failed_build_surfaces_and_is_not_cached() {
    let mut rt = runtime();
    let dev = rt.device_mut(0).unwrap();
    let broken = KernelArtifact::new(
        "broken",
        b"definitely not assembly".to_vec(),
        "broken",
        KernelMeta::default(),
    );
    let err = dev.install_or_get(&broken).unwrap_err();
    assert!(matches!(err, VortexError::KernelBuildFailure(_)));
    assert!(!dev.is_cached("broken"));
}

#[test]
fn call_stack_is_validated_against_metadata() {
    let mut rt = runtime();
    let dev = rt.device_mut(0).unwrap();
    let kernel = dev.install_or_get(&scale2x()).unwrap();

    // Wrong arity
    let err = dev.launch(&kernel, &CallStack::new(), 16, &[]).unwrap_err();
    assert!(
        matches!(err, VortexError::BackendFailure(e) if e.status == ErrorStatus::IncorrectKernelArg)
    );

    // Scalar where a buffer is declared
    let mut stack = CallStack::new();
    stack.push_scalar(1f32);
    let err = dev.launch(&kernel, &stack, 16, &[]).unwrap_err();
    assert!(
        matches!(err, VortexError::BackendFailure(e) if e.status == ErrorStatus::IncorrectKernelArg)
    );
}

#[test]
fn async_read_resolves_through_staging() {
    let mut rt = runtime();
    let dev = rt.device_mut(0).unwrap();
    let host: Vec<i32> = (0..64).collect();
    let buffer = dev.allocate(64 * 4).unwrap();
    let e1 = dev
        .enqueue_write_async(buffer, 0, &HostData::from(host.as_slice()), 0, 64, &[])
        .unwrap();
    let read = dev.enqueue_read_async(buffer, 0, 64, DType::I32, &[e1]).unwrap();

    // A write event is not a read result
    let err = dev.read_result(e1, &mut HostDataMut::from(vec![0i32; 64].as_mut_slice()));
    assert!(matches!(err, Err(VortexError::UnsupportedOperation(_))));

    let mut out = vec![0i32; 64];
    dev.read_result(read, &mut HostDataMut::from(out.as_mut_slice())).unwrap();
    assert_eq!(out, host);

    // The handle retired with the first resolve
    let err = dev.read_result(read, &mut HostDataMut::from(out.as_mut_slice()));
    assert!(matches!(err, Err(VortexError::UnknownEvent(_))));
}

#[test]
fn partial_transfers_respect_offsets() {
    let mut rt = runtime();
    let dev = rt.device_mut(0).unwrap();
    let host: Vec<u16> = (0..32).collect();
    let buffer = dev.allocate(64 * 2).unwrap();
    // Second half of the host view lands in the middle of the buffer
    dev.enqueue_write(buffer, 8, &HostData::from(host.as_slice()), 16, 16, &[]).unwrap();

    let mut out = vec![0u16; 16];
    dev.enqueue_read(buffer, 8, &mut HostDataMut::from(out.as_mut_slice()), 0, 16, &[]).unwrap();
    assert_eq!(out, (16..32).collect::<Vec<u16>>());

    // Out of range transfers are rejected
    let err = dev.enqueue_write(buffer, 60, &HostData::from(host.as_slice()), 0, 32, &[]);
    assert!(matches!(err, Err(VortexError::InvalidBufferUse(_))));
}

#[test]
fn transfers_preserve_random_payloads() {
    use rand::{rngs::SmallRng, Rng, SeedableRng};
    let mut rt = runtime();
    let dev = rt.device_mut(0).unwrap();
    let mut rng = SmallRng::seed_from_u64(69420);
    let host: Vec<f64> = (0..257).map(|_| rng.gen::<f64>()).collect();
    let buffer = dev.allocate(257 * 8).unwrap();
    let e = dev
        .enqueue_write_async(buffer, 0, &HostData::from(host.as_slice()), 0, 257, &[])
        .unwrap();
    let mut out = vec![0f64; 257];
    dev.enqueue_read(buffer, 0, &mut HostDataMut::from(out.as_mut_slice()), 0, 257, &[e])
        .unwrap();
    assert_eq!(out, host);
}

#[test]
fn buffer_descriptor_is_stable() {
    let mut rt = runtime();
    let dev = rt.device_mut(0).unwrap();
    let buffer = dev.allocate(4096).unwrap();
    let desc = dev.buffer_desc(buffer).unwrap();
    assert_eq!(desc.bytes, 4096);
    assert_ne!(desc.address, 0);
    assert_eq!(dev.buffer_desc(buffer).unwrap().address, desc.address);
    dev.release(buffer).unwrap();
    assert!(dev.buffer_desc(buffer).is_err());
}

#[test]
fn cache_reset_recompiles() {
    let mut rt = runtime();
    let dev = rt.device_mut(0).unwrap();
    let kernel = dev.install_or_get(&scale2x()).unwrap();
    dev.reset_cache();
    assert!(!dev.is_cached("scale2x"));

    // The installed kernel handed out before the reset stays launchable
    let buffer = dev.allocate(16 * 4).unwrap();
    let host = vec![1f32; 16];
    dev.enqueue_write(buffer, 0, &HostData::from(host.as_slice()), 0, 16, &[]).unwrap();
    let mut stack = CallStack::new();
    stack.push_buffer(buffer);
    dev.launch(&kernel, &stack, 16, &[]).unwrap();

    dev.install_or_get(&scale2x()).unwrap();
    assert_eq!(dev.build_count(), 2);
}
