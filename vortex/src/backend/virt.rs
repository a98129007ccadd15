//! Virtual backend executing kernels on host memory.
//!
//! Exists so that runtime behavior is testable and debuggable without any
//! accelerator hardware. Buffers live in host vectors, execution is
//! synchronous, every event is complete the moment it is returned.
//! Kernel binaries use a small line-oriented assembly, one op per line:
//!
//! ```text
//! # scale elements of the first stack argument by an immediate
//! ld.f32 r0, g0
//! mov.f32 r1, 2.0
//! mul.f32 r2, r0, r1
//! st.f32 g0, r2
//! ```
//!
//! `g<i>` is the buffer at call stack position i, `s<i>` the scalar at
//! position i, `r<n>` one of 32 registers. Each work item runs the program
//! once with its global index as the element index. Work items whose index
//! falls outside a touched buffer are skipped, matching the bound guard
//! compiled into real kernels.

use nanoserde::DeJson;

use super::{BufferDescriptor, BufferId, Device, DeviceInfo, ProgramId};
use crate::artifact::KernelArtifact;
use crate::dtype::{Constant, DType};
use crate::error::{BackendError, ErrorStatus};
use crate::slab::Slab;
use crate::stack::{ArgValue, CallStack};
use crate::Dim;

#[derive(Debug, Default, DeJson)]
pub struct VirtConfig {
    /// The virtual device is only registered when enabled
    pub enabled: bool,
    /// Largest work size of one physical launch, default 1M threads.
    /// Tests lower this to force batch splitting.
    pub max_batch_threads: Option<Dim>,
    /// Work group size reported to the launch protocol, default 64
    pub preferred_block_size: Option<Dim>,
}

#[derive(Debug, Clone)]
pub struct VirtEvent {}

#[derive(Debug, Clone, Copy)]
enum BOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy)]
enum VirtOp {
    /// Load element at the work item index from the buffer at stack position arg
    Ld { dtype: DType, dst: u8, arg: u8 },
    /// Load the scalar at stack position arg
    Lds { dtype: DType, dst: u8, arg: u8 },
    /// Store a register to the buffer at stack position arg
    St { dtype: DType, arg: u8, src: u8 },
    /// Set a register to an immediate
    Mov { dst: u8, value: Constant },
    Binary { op: BOp, dtype: DType, dst: u8, a: u8, b: u8 },
}

const NUM_REGISTERS: usize = 32;

#[derive(Debug)]
struct VirtProgram {
    ops: Vec<VirtOp>,
}

#[derive(Debug)]
pub(crate) struct VirtDevice {
    dev_info: DeviceInfo,
    free_bytes: Dim,
    buffers: Slab<Vec<u8>>,
    programs: Slab<VirtProgram>,
}

pub(crate) fn initialize_devices(
    config: &VirtConfig,
    devices: &mut Vec<Device>,
    debug_dev: bool,
) -> Result<(), BackendError> {
    if !config.enabled {
        return Err(BackendError {
            status: ErrorStatus::Initialization,
            context: "Virtual device won't be used, as it was configured out.".into(),
        });
    }
    if debug_dev {
        println!("Using virtual backend");
    }
    let max_batch = config.max_batch_threads.unwrap_or(1024 * 1024);
    let global_mem_size = 1024 * 1024 * 1024;
    devices.push(Device::Virt(VirtDevice {
        dev_info: DeviceInfo {
            compute: 1024 * 1024 * 1024 * 1024,
            max_global_work_dims: [max_batch, 1, 1],
            max_local_threads: 256,
            preferred_block_size: config.preferred_block_size.unwrap_or(64),
            local_mem_size: 64 * 1024,
            global_mem_size,
        },
        free_bytes: global_mem_size,
        buffers: Slab::new(),
        programs: Slab::new(),
    }));
    Ok(())
}

impl VirtDevice {
    pub(crate) fn deinitialize(&mut self) {
        self.buffers.drain_all();
        self.programs.drain_all();
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
        self.free_bytes -= bytes;
        Ok(BufferId(self.buffers.push(vec![0; bytes])))
    }

    pub(crate) fn dealloc(&mut self, buffer: BufferId) -> Result<(), BackendError> {
        match self.buffers.remove(buffer.0) {
            Some(data) => {
                self.free_bytes += data.len();
                Ok(())
            }
            None => Err(BackendError {
                status: ErrorStatus::MemoryDeallocation,
                context: "Deallocating unknown buffer".into(),
            }),
        }
    }

    pub(crate) fn buffer_desc(&self, buffer: BufferId) -> Option<BufferDescriptor> {
        self.buffers.get(buffer.0).map(|data| BufferDescriptor {
            address: data.as_ptr() as u64,
            offset: 0,
            bytes: data.len(),
        })
    }

    pub(crate) fn write(
        &mut self,
        dst: BufferId,
        dst_offset: Dim,
        src: &[u8],
        _wait: &[super::Event],
        _blocking: bool,
    ) -> Result<super::Event, BackendError> {
        let Some(buffer) = self.buffers.get_mut(dst.0) else {
            return Err(BackendError {
                status: ErrorStatus::MemoryCopyH2D,
                context: "Writing unknown buffer".into(),
            });
        };
        let end = dst_offset + src.len();
        if end > buffer.len() {
            return Err(BackendError {
                status: ErrorStatus::MemoryCopyH2D,
                context: format!("Write of {} bytes at {dst_offset} exceeds buffer of {} bytes", src.len(), buffer.len()).into(),
            });
        }
        buffer[dst_offset..end].copy_from_slice(src);
        Ok(super::Event::Virt(VirtEvent {}))
    }

    pub(crate) fn read(
        &mut self,
        src: BufferId,
        src_offset: Dim,
        dst: &mut [u8],
        _wait: &[super::Event],
        _blocking: bool,
    ) -> Result<super::Event, BackendError> {
        let Some(buffer) = self.buffers.get(src.0) else {
            return Err(BackendError {
                status: ErrorStatus::MemoryCopyD2H,
                context: "Reading unknown buffer".into(),
            });
        };
        let end = src_offset + dst.len();
        if end > buffer.len() {
            return Err(BackendError {
                status: ErrorStatus::MemoryCopyD2H,
                context: format!("Read of {} bytes at {src_offset} exceeds buffer of {} bytes", dst.len(), buffer.len()).into(),
            });
        }
        dst.copy_from_slice(&buffer[src_offset..end]);
        Ok(super::Event::Virt(VirtEvent {}))
    }

    pub(crate) fn build(
        &mut self,
        artifact: &KernelArtifact,
        debug_asm: bool,
    ) -> Result<ProgramId, BackendError> {
        let source = core::str::from_utf8(&artifact.binary).map_err(|_| BackendError {
            status: ErrorStatus::KernelBuild,
            context: "Kernel binary is not valid assembly text".into(),
        })?;
        if debug_asm {
            println!("{source}");
        }
        let ops = parse_program(source)?;
        Ok(ProgramId(self.programs.push(VirtProgram { ops })))
    }

    pub(crate) fn release_program(&mut self, program: ProgramId) {
        self.programs.remove(program.0);
    }

    pub(crate) fn launch(
        &mut self,
        program: ProgramId,
        stack: &CallStack,
        grid: [Dim; 3],
        block: [Dim; 3],
        global_offset: Dim,
        _wait: &[super::Event],
    ) -> Result<super::Event, BackendError> {
        let Some(program) = self.programs.get(program.0) else {
            return Err(BackendError {
                status: ErrorStatus::KernelLaunch,
                context: "Launching unknown program".into(),
            });
        };
        let threads = grid[0] * grid[1] * grid[2] * block[0] * block[1] * block[2];
        for tid in 0..threads {
            let idx = global_offset + tid;
            execute_item(program, stack, &mut self.buffers, idx)?;
        }
        Ok(super::Event::Virt(VirtEvent {}))
    }

    pub(crate) fn sync_queues(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    pub(crate) fn destroy_queues(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    pub(crate) fn sync_events(&mut self, _events: &[super::Event]) -> Result<(), BackendError> {
        Ok(())
    }

    pub(crate) fn release_events(&mut self, events: Vec<super::Event>) {
        let _ = events;
    }
}

#[derive(Debug, Clone, Copy)]
enum RegVal {
    F(f64),
    I(i64),
}

fn execute_item(
    program: &VirtProgram,
    stack: &CallStack,
    buffers: &mut Slab<Vec<u8>>,
    idx: Dim,
) -> Result<(), BackendError> {
    let mut regs = [RegVal::I(0); NUM_REGISTERS];
    for op in &program.ops {
        match *op {
            VirtOp::Ld { dtype, dst, arg } => {
                let buffer = stack_buffer(stack, arg, buffers)?;
                let Some(value) = load_elem(buffer, dtype, idx) else {
                    return Ok(());
                };
                regs[dst as usize] = value;
            }
            VirtOp::Lds { dtype, dst, arg } => {
                let c = stack_scalar(stack, arg)?;
                regs[dst as usize] = if dtype.is_float() {
                    RegVal::F(c.as_f64().ok_or_else(|| arg_error(arg, "float scalar"))?)
                } else {
                    RegVal::I(c.as_i64().ok_or_else(|| arg_error(arg, "integer scalar"))?)
                };
            }
            VirtOp::St { dtype, arg, src } => {
                let value = regs[src as usize];
                let buffer = stack_buffer_mut(stack, arg, buffers)?;
                if !store_elem(buffer, dtype, idx, value) {
                    return Ok(());
                }
            }
            VirtOp::Mov { dst, value } => {
                regs[dst as usize] = match value.as_f64() {
                    Some(x) => RegVal::F(x),
                    None => RegVal::I(value.as_i64().unwrap_or(0)),
                };
            }
            VirtOp::Binary { op, dtype, dst, a, b } => {
                regs[dst as usize] = binary(op, dtype, regs[a as usize], regs[b as usize]);
            }
        }
    }
    Ok(())
}

fn arg_error(arg: u8, expected: &str) -> BackendError {
    BackendError {
        status: ErrorStatus::IncorrectKernelArg,
        context: format!("Call stack position {arg} is not a {expected}").into(),
    }
}

fn stack_buffer<'a>(
    stack: &CallStack,
    arg: u8,
    buffers: &'a Slab<Vec<u8>>,
) -> Result<&'a [u8], BackendError> {
    match stack.args().get(arg as usize) {
        Some(ArgValue::Buffer(id)) => match buffers.get(id.0) {
            Some(data) => Ok(data),
            None => Err(arg_error(arg, "live buffer")),
        },
        _ => Err(arg_error(arg, "buffer")),
    }
}

fn stack_buffer_mut<'a>(
    stack: &CallStack,
    arg: u8,
    buffers: &'a mut Slab<Vec<u8>>,
) -> Result<&'a mut Vec<u8>, BackendError> {
    match stack.args().get(arg as usize) {
        Some(ArgValue::Buffer(id)) => match buffers.get_mut(id.0) {
            Some(data) => Ok(data),
            None => Err(arg_error(arg, "live buffer")),
        },
        _ => Err(arg_error(arg, "buffer")),
    }
}

fn stack_scalar(stack: &CallStack, arg: u8) -> Result<Constant, BackendError> {
    match stack.args().get(arg as usize) {
        Some(ArgValue::Scalar(c)) => Ok(*c),
        _ => Err(arg_error(arg, "scalar")),
    }
}

fn load_elem(bytes: &[u8], dtype: DType, idx: Dim) -> Option<RegVal> {
    let width = dtype.byte_size();
    let offset = idx * width;
    let chunk = bytes.get(offset..offset + width)?;
    Some(match dtype {
        DType::BF16 => RegVal::F(f64::from(half::bf16::from_le_bytes([chunk[0], chunk[1]]))),
        DType::F16 => RegVal::F(f64::from(half::f16::from_le_bytes([chunk[0], chunk[1]]))),
        DType::F32 => RegVal::F(f64::from(f32::from_le_bytes(chunk.try_into().unwrap()))),
        DType::F64 => RegVal::F(f64::from_le_bytes(chunk.try_into().unwrap())),
        DType::U8 => RegVal::I(i64::from(chunk[0])),
        DType::U16 => RegVal::I(i64::from(u16::from_le_bytes(chunk.try_into().unwrap()))),
        DType::U32 => RegVal::I(i64::from(u32::from_le_bytes(chunk.try_into().unwrap()))),
        DType::U64 => RegVal::I(u64::from_le_bytes(chunk.try_into().unwrap()) as i64),
        DType::I8 => RegVal::I(i64::from(chunk[0] as i8)),
        DType::I16 => RegVal::I(i64::from(i16::from_le_bytes(chunk.try_into().unwrap()))),
        DType::I32 => RegVal::I(i64::from(i32::from_le_bytes(chunk.try_into().unwrap()))),
        DType::I64 => RegVal::I(i64::from_le_bytes(chunk.try_into().unwrap())),
    })
}

fn store_elem(bytes: &mut [u8], dtype: DType, idx: Dim, value: RegVal) -> bool {
    let width = dtype.byte_size();
    let offset = idx * width;
    let Some(chunk) = bytes.get_mut(offset..offset + width) else {
        return false;
    };
    let f = match value {
        RegVal::F(x) => x,
        RegVal::I(x) => x as f64,
    };
    let i = match value {
        RegVal::F(x) => x as i64,
        RegVal::I(x) => x,
    };
    match dtype {
        DType::BF16 => chunk.copy_from_slice(&half::bf16::from_f64(f).to_le_bytes()),
        DType::F16 => chunk.copy_from_slice(&half::f16::from_f64(f).to_le_bytes()),
        DType::F32 => chunk.copy_from_slice(&(f as f32).to_le_bytes()),
        DType::F64 => chunk.copy_from_slice(&f.to_le_bytes()),
        DType::U8 => chunk[0] = i as u8,
        DType::U16 => chunk.copy_from_slice(&(i as u16).to_le_bytes()),
        DType::U32 => chunk.copy_from_slice(&(i as u32).to_le_bytes()),
        DType::U64 => chunk.copy_from_slice(&(i as u64).to_le_bytes()),
        DType::I8 => chunk[0] = i as i8 as u8,
        DType::I16 => chunk.copy_from_slice(&(i as i16).to_le_bytes()),
        DType::I32 => chunk.copy_from_slice(&(i as i32).to_le_bytes()),
        DType::I64 => chunk.copy_from_slice(&i.to_le_bytes()),
    }
    true
}

fn binary(op: BOp, dtype: DType, a: RegVal, b: RegVal) -> RegVal {
    if dtype.is_float() {
        let x = match a {
            RegVal::F(x) => x,
            RegVal::I(x) => x as f64,
        };
        let y = match b {
            RegVal::F(y) => y,
            RegVal::I(y) => y as f64,
        };
        RegVal::F(match op {
            BOp::Add => x + y,
            BOp::Sub => x - y,
            BOp::Mul => x * y,
            BOp::Div => x / y,
            BOp::Min => x.min(y),
            BOp::Max => x.max(y),
        })
    } else {
        let x = match a {
            RegVal::F(x) => x as i64,
            RegVal::I(x) => x,
        };
        let y = match b {
            RegVal::F(y) => y as i64,
            RegVal::I(y) => y,
        };
        RegVal::I(match op {
            BOp::Add => x.wrapping_add(y),
            BOp::Sub => x.wrapping_sub(y),
            BOp::Mul => x.wrapping_mul(y),
            BOp::Div => {
                if y == 0 {
                    0
                } else {
                    x / y
                }
            }
            BOp::Min => x.min(y),
            BOp::Max => x.max(y),
        })
    }
}

fn build_error(line: usize, context: &str) -> BackendError {
    BackendError {
        status: ErrorStatus::KernelBuild,
        context: format!("line {line}: {context}").into(),
    }
}

fn parse_register(token: &str, line: usize) -> Result<u8, BackendError> {
    let Some(n) = token.strip_prefix('r') else {
        return Err(build_error(line, "expected register operand"));
    };
    let n: usize = n.parse().map_err(|_| build_error(line, "malformed register index"))?;
    if n >= NUM_REGISTERS {
        return Err(build_error(line, "register index out of range"));
    }
    Ok(n as u8)
}

fn parse_stack_position(token: &str, prefix: char, line: usize) -> Result<u8, BackendError> {
    let Some(n) = token.strip_prefix(prefix) else {
        return Err(build_error(line, "expected call stack operand"));
    };
    n.parse().map_err(|_| build_error(line, "malformed call stack position"))
}

fn parse_immediate(token: &str, dtype: DType, line: usize) -> Result<Constant, BackendError> {
    if dtype.is_float() {
        let x: f64 =
            token.parse().map_err(|_| build_error(line, "malformed float immediate"))?;
        Ok(match dtype {
            DType::BF16 => Constant::BF16(half::bf16::from_f64(x).to_bits()),
            DType::F16 => Constant::F16(half::f16::from_f64(x).to_bits()),
            DType::F32 => Constant::F32((x as f32).to_bits()),
            _ => Constant::F64(x.to_bits()),
        })
    } else {
        let x: i64 =
            token.parse().map_err(|_| build_error(line, "malformed integer immediate"))?;
        Ok(match dtype {
            DType::U8 => Constant::U8(x as u8),
            DType::U16 => Constant::U16(x as u16),
            DType::U32 => Constant::U32(x as u32),
            DType::U64 => Constant::U64(x as u64),
            DType::I8 => Constant::I8(x as i8),
            DType::I16 => Constant::I16(x as i16),
            DType::I32 => Constant::I32(x as i32),
            _ => Constant::I64(x),
        })
    }
}

fn parse_program(source: &str) -> Result<Vec<VirtOp>, BackendError> {
    let mut ops = Vec::new();
    for (i, raw_line) in source.lines().enumerate() {
        let line_no = i + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let head = line.split_whitespace().next().unwrap();
        let operands: Vec<String> = line
            .split_once(char::is_whitespace)
            .map(|(_, rest)| rest.split(',').map(|s| s.trim().to_owned()).collect())
            .unwrap_or_default();
        let (mnemonic, dtype) = match head.split_once('.') {
            Some((m, dt)) => {
                let Some(dtype) = DType::from_str(dt) else {
                    return Err(build_error(line_no, "unknown dtype suffix"));
                };
                (m, dtype)
            }
            None => return Err(build_error(line_no, "missing dtype suffix")),
        };
        let expect = |n: usize| -> Result<(), BackendError> {
            if operands.len() == n {
                Ok(())
            } else {
                Err(build_error(line_no, "wrong operand count"))
            }
        };
        let op = match mnemonic {
            "ld" => {
                expect(2)?;
                VirtOp::Ld {
                    dtype,
                    dst: parse_register(&operands[0], line_no)?,
                    arg: parse_stack_position(&operands[1], 'g', line_no)?,
                }
            }
            "lds" => {
                expect(2)?;
                VirtOp::Lds {
                    dtype,
                    dst: parse_register(&operands[0], line_no)?,
                    arg: parse_stack_position(&operands[1], 's', line_no)?,
                }
            }
            "st" => {
                expect(2)?;
                VirtOp::St {
                    dtype,
                    arg: parse_stack_position(&operands[0], 'g', line_no)?,
                    src: parse_register(&operands[1], line_no)?,
                }
            }
            "mov" => {
                expect(2)?;
                VirtOp::Mov {
                    dst: parse_register(&operands[0], line_no)?,
                    value: parse_immediate(&operands[1], dtype, line_no)?,
                }
            }
            "add" | "sub" | "mul" | "div" | "min" | "max" => {
                expect(3)?;
                let op = match mnemonic {
                    "add" => BOp::Add,
                    "sub" => BOp::Sub,
                    "mul" => BOp::Mul,
                    "div" => BOp::Div,
                    "min" => BOp::Min,
                    _ => BOp::Max,
                };
                VirtOp::Binary {
                    op,
                    dtype,
                    dst: parse_register(&operands[0], line_no)?,
                    a: parse_register(&operands[1], line_no)?,
                    b: parse_register(&operands[2], line_no)?,
                }
            }
            _ => return Err(build_error(line_no, "unknown mnemonic")),
        };
        ops.push(op);
    }
    if ops.is_empty() {
        return Err(build_error(0, "empty program"));
    }
    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_scale_kernel() {
        let ops = parse_program("ld.f32 r0, g0\nmov.f32 r1, 2.0\nmul.f32 r2, r0, r1\nst.f32 g0, r2").unwrap();
        assert_eq!(ops.len(), 4);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_program("definitely not ptx").is_err());
        assert!(parse_program("ld.f99 r0, g0").is_err());
        assert!(parse_program("ld.f32 r99, g0").is_err());
        assert!(parse_program("").is_err());
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let ops = parse_program("# header\n\nld.i32 r0, g0\nst.i32 g1, r0\n").unwrap();
        assert_eq!(ops.len(), 2);
    }
}
