//! Compiled kernel artifact, the boundary consumed from the compiler.
//!
//! The runtime never inspects the binary beyond handing it to a backend:
//! OpenCL devices receive kernel source, CUDA devices receive PTX, the
//! virtual device receives its own assembly. The artifact is immutable
//! once produced.

use crate::dtype::DType;
use crate::Dim;

/// How a kernel accesses one of its buffer parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    ReadWrite,
}

impl Access {
    /// Kernel reads the buffer, host data must be valid on device before launch
    #[must_use]
    pub const fn is_read(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    /// Kernel writes the buffer, device copy is ahead of host after launch
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

/// Declared kernel parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    Buffer { dtype: DType, access: Access },
    Scalar { dtype: DType },
}

/// Argument layout and parallel dimension metadata attached to an artifact
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KernelMeta {
    /// Declared parameters in call stack order
    pub params: Vec<Param>,
    /// Requested work group size, overrides the device preference when set
    pub local_size_hint: Option<Dim>,
}

/// Immutable compiled kernel produced by the compiler
#[derive(Debug, Clone)]
pub struct KernelArtifact {
    /// Cache identity, unique per compiled task
    pub identity: Box<str>,
    /// Backend specific binary or source image
    pub binary: Box<[u8]>,
    /// Entry point symbol resolved inside the binary
    pub entry_point: Box<str>,
    pub meta: KernelMeta,
}

impl KernelArtifact {
    #[must_use]
    pub fn new(
        identity: impl Into<Box<str>>,
        binary: impl Into<Box<[u8]>>,
        entry_point: impl Into<Box<str>>,
        meta: KernelMeta,
    ) -> KernelArtifact {
        KernelArtifact {
            identity: identity.into(),
            binary: binary.into(),
            entry_point: entry_point.into(),
            meta,
        }
    }
}
