//! Scalar trait for host element types and tagged views over host memory.
//!
//! Transfers are generic over element width: a [`HostData`] view carries the
//! element kind, everything below it works on the byte image. One code path
//! replaces per-width entry points at the native boundary.

use crate::dtype::DType;
use half::{bf16, f16};

/// Implemented for every host element type with a [DType] counterpart
pub trait Scalar:
    Copy + Clone + Sized + core::fmt::Debug + 'static + PartialEq + Send + Sync
{
    /// Get dtype of Self
    #[must_use]
    fn dtype() -> DType;
    /// Byte size of Self
    #[must_use]
    fn byte_size() -> usize;
    /// Get zero of Self
    #[must_use]
    fn zero() -> Self;
    /// From little endian bytes
    #[must_use]
    fn from_le_bytes(bytes: &[u8]) -> Self;
}

macro_rules! impl_scalar {
    ($t:ty, $dtype:ident, $zero:expr) => {
        impl Scalar for $t {
            fn dtype() -> DType {
                DType::$dtype
            }

            fn byte_size() -> usize {
                core::mem::size_of::<$t>()
            }

            fn zero() -> Self {
                $zero
            }

            fn from_le_bytes(bytes: &[u8]) -> Self {
                <$t>::from_le_bytes(bytes.try_into().unwrap())
            }
        }
    };
}

impl_scalar!(bf16, BF16, bf16::ZERO);
impl_scalar!(f16, F16, f16::ZERO);
impl_scalar!(f32, F32, 0.);
impl_scalar!(f64, F64, 0.);
impl_scalar!(u8, U8, 0);
impl_scalar!(u16, U16, 0);
impl_scalar!(u32, U32, 0);
impl_scalar!(u64, U64, 0);
impl_scalar!(i8, I8, 0);
impl_scalar!(i16, I16, 0);
impl_scalar!(i32, I32, 0);
impl_scalar!(i64, I64, 0);

/// Read-only typed view of host memory, tagged by element kind
#[derive(Debug, Clone, Copy)]
pub enum HostData<'a> {
    BF16(&'a [bf16]),
    F16(&'a [f16]),
    F32(&'a [f32]),
    F64(&'a [f64]),
    U8(&'a [u8]),
    U16(&'a [u16]),
    U32(&'a [u32]),
    U64(&'a [u64]),
    I8(&'a [i8]),
    I16(&'a [i16]),
    I32(&'a [i32]),
    I64(&'a [i64]),
}

macro_rules! host_data_dispatch {
    ($self:expr, $slice:ident => $body:expr) => {
        match $self {
            HostData::BF16($slice) => $body,
            HostData::F16($slice) => $body,
            HostData::F32($slice) => $body,
            HostData::F64($slice) => $body,
            HostData::U8($slice) => $body,
            HostData::U16($slice) => $body,
            HostData::U32($slice) => $body,
            HostData::U64($slice) => $body,
            HostData::I8($slice) => $body,
            HostData::I16($slice) => $body,
            HostData::I32($slice) => $body,
            HostData::I64($slice) => $body,
        }
    };
}

impl HostData<'_> {
    #[must_use]
    pub const fn dtype(&self) -> DType {
        match self {
            HostData::BF16(_) => DType::BF16,
            HostData::F16(_) => DType::F16,
            HostData::F32(_) => DType::F32,
            HostData::F64(_) => DType::F64,
            HostData::U8(_) => DType::U8,
            HostData::U16(_) => DType::U16,
            HostData::U32(_) => DType::U32,
            HostData::U64(_) => DType::U64,
            HostData::I8(_) => DType::I8,
            HostData::I16(_) => DType::I16,
            HostData::I32(_) => DType::I32,
            HostData::I64(_) => DType::I64,
        }
    }

    /// Number of elements in the view
    #[must_use]
    pub fn len(&self) -> usize {
        host_data_dispatch!(self, s => s.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Byte length of the view
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.len() * self.dtype().byte_size()
    }

    /// Byte image of the elements
    pub(crate) fn as_bytes(&self) -> &[u8] {
        host_data_dispatch!(self, s => unsafe {
            core::slice::from_raw_parts(s.as_ptr().cast::<u8>(), core::mem::size_of_val(*s))
        })
    }
}

macro_rules! impl_host_from {
    ($t:ty, $variant:ident) => {
        impl<'a> From<&'a [$t]> for HostData<'a> {
            fn from(value: &'a [$t]) -> Self {
                HostData::$variant(value)
            }
        }

        impl<'a> From<&'a mut [$t]> for HostDataMut<'a> {
            fn from(value: &'a mut [$t]) -> Self {
                HostDataMut::$variant(value)
            }
        }
    };
}

impl_host_from!(bf16, BF16);
impl_host_from!(f16, F16);
impl_host_from!(f32, F32);
impl_host_from!(f64, F64);
impl_host_from!(u8, U8);
impl_host_from!(u16, U16);
impl_host_from!(u32, U32);
impl_host_from!(u64, U64);
impl_host_from!(i8, I8);
impl_host_from!(i16, I16);
impl_host_from!(i32, I32);
impl_host_from!(i64, I64);

/// Mutable typed view of host memory, destination of device to host reads
#[derive(Debug)]
pub enum HostDataMut<'a> {
    BF16(&'a mut [bf16]),
    F16(&'a mut [f16]),
    F32(&'a mut [f32]),
    F64(&'a mut [f64]),
    U8(&'a mut [u8]),
    U16(&'a mut [u16]),
    U32(&'a mut [u32]),
    U64(&'a mut [u64]),
    I8(&'a mut [i8]),
    I16(&'a mut [i16]),
    I32(&'a mut [i32]),
    I64(&'a mut [i64]),
}

macro_rules! host_data_mut_dispatch {
    ($self:expr, $slice:ident => $body:expr) => {
        match $self {
            HostDataMut::BF16($slice) => $body,
            HostDataMut::F16($slice) => $body,
            HostDataMut::F32($slice) => $body,
            HostDataMut::F64($slice) => $body,
            HostDataMut::U8($slice) => $body,
            HostDataMut::U16($slice) => $body,
            HostDataMut::U32($slice) => $body,
            HostDataMut::U64($slice) => $body,
            HostDataMut::I8($slice) => $body,
            HostDataMut::I16($slice) => $body,
            HostDataMut::I32($slice) => $body,
            HostDataMut::I64($slice) => $body,
        }
    };
}

impl HostDataMut<'_> {
    #[must_use]
    pub const fn dtype(&self) -> DType {
        match self {
            HostDataMut::BF16(_) => DType::BF16,
            HostDataMut::F16(_) => DType::F16,
            HostDataMut::F32(_) => DType::F32,
            HostDataMut::F64(_) => DType::F64,
            HostDataMut::U8(_) => DType::U8,
            HostDataMut::U16(_) => DType::U16,
            HostDataMut::U32(_) => DType::U32,
            HostDataMut::U64(_) => DType::U64,
            HostDataMut::I8(_) => DType::I8,
            HostDataMut::I16(_) => DType::I16,
            HostDataMut::I32(_) => DType::I32,
            HostDataMut::I64(_) => DType::I64,
        }
    }

    /// Number of elements in the view
    #[must_use]
    pub fn len(&self) -> usize {
        host_data_mut_dispatch!(self, s => s.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Byte length of the view
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.len() * self.dtype().byte_size()
    }

    /// Mutable byte image of the elements
    pub(crate) fn as_bytes_mut(&mut self) -> &mut [u8] {
        host_data_mut_dispatch!(self, s => unsafe {
            core::slice::from_raw_parts_mut(s.as_mut_ptr().cast::<u8>(), core::mem::size_of_val(&**s))
        })
    }
}

#[test]
fn host_data_byte_image() {
    let x = [1f32, 2., 3.];
    let data = HostData::from(x.as_slice());
    assert_eq!(data.dtype(), DType::F32);
    assert_eq!(data.len(), 3);
    assert_eq!(data.byte_len(), 12);
    assert_eq!(&data.as_bytes()[..4], &1f32.to_le_bytes());
}

#[test]
fn host_data_mut_roundtrip() {
    let mut x = [0u16; 4];
    let mut data = HostDataMut::from(x.as_mut_slice());
    data.as_bytes_mut()[0] = 7;
    assert_eq!(x[0], u16::from_le(7));
}
