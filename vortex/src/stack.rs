//! Call stack, the flat typed argument buffer marshaled for a single
//! kernel invocation. Built fresh per launch, never shared across launches.

use crate::backend::BufferId;
use crate::dtype::Constant;
use crate::scalar::Scalar;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgValue {
    /// Device buffer argument, marshaled as the native buffer handle
    Buffer(BufferId),
    /// Scalar immediate, marshaled by value
    Scalar(Constant),
}

#[derive(Debug, Clone, Default)]
pub struct CallStack {
    args: Vec<ArgValue>,
}

impl CallStack {
    #[must_use]
    pub const fn new() -> CallStack {
        CallStack { args: Vec::new() }
    }

    pub fn push_buffer(&mut self, buffer: BufferId) -> &mut Self {
        self.args.push(ArgValue::Buffer(buffer));
        self
    }

    pub fn push_scalar<T: Scalar>(&mut self, value: T) -> &mut Self {
        self.args.push(ArgValue::Scalar(Constant::new(value)));
        self
    }

    pub fn push_constant(&mut self, value: Constant) -> &mut Self {
        self.args.push(ArgValue::Scalar(value));
        self
    }

    #[must_use]
    pub fn args(&self) -> &[ArgValue] {
        &self.args
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.args.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Byte size of the marshaled stack, handles count as native pointers
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.args
            .iter()
            .map(|arg| match arg {
                ArgValue::Buffer(_) => core::mem::size_of::<*mut core::ffi::c_void>(),
                ArgValue::Scalar(c) => c.dtype().byte_size(),
            })
            .sum()
    }
}

#[test]
fn stack_marshaling_order() {
    let mut stack = CallStack::new();
    stack.push_buffer(BufferId(0)).push_scalar(2.0f32).push_scalar(7i64);
    assert_eq!(stack.len(), 3);
    assert_eq!(stack.byte_size(), core::mem::size_of::<*mut core::ffi::c_void>() + 4 + 8);
    let ArgValue::Scalar(c) = stack.args()[1] else { panic!() };
    assert_eq!(c, Constant::F32(2.0f32.to_bits()));
}
