//! Bounds-checked big-endian reads and writes.
//!
//! The class file format stores every multi-byte quantity in big-endian order. The
//! [`ClassIO`] trait describes the primitive types that can be encoded and decoded,
//! [`read_be_at`] reads one of them at an offset, advancing the offset on success, and
//! [`write_be`] appends one to an output buffer.
//!
//! ```rust
//! use dekotlin::file::io::read_be_at;
//!
//! let data = [0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x34];
//! let mut offset = 0;
//! let magic: u32 = read_be_at(&data, &mut offset)?;
//! let major: u16 = read_be_at(&data, &mut offset)?;
//! assert_eq!(magic, 0xCAFE_BABE);
//! assert_eq!(major, 52);
//! assert_eq!(offset, 6);
//! # Ok::<(), dekotlin::Error>(())
//! ```

use crate::{Error::OutOfBounds, Result};

/// A primitive that can be encoded to and decoded from big-endian bytes.
pub trait ClassIO: Sized {
    /// Byte array holding one encoded value.
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Decodes a value from big-endian bytes.
    fn from_be_bytes(bytes: Self::Bytes) -> Self;

    /// Encodes a value as big-endian bytes.
    fn to_be_bytes(self) -> Self::Bytes;
}

macro_rules! impl_class_io {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ClassIO for $ty {
                type Bytes = [u8; std::mem::size_of::<$ty>()];

                fn from_be_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_be_bytes(bytes)
                }

                fn to_be_bytes(self) -> Self::Bytes {
                    <$ty>::to_be_bytes(self)
                }
            }
        )*
    };
}

impl_class_io!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

/// Reads a `T` from the start of `data`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if `data` is too short.
pub fn read_be<T: ClassIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_be_at(data, &mut offset)
}

/// Reads a `T` at `offset` and advances `offset` past it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if fewer than `size_of::<T>()` bytes remain;
/// `offset` is left unchanged in that case.
pub fn read_be_at<T: ClassIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let end = offset.checked_add(type_len).ok_or(OutOfBounds)?;
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(OutOfBounds);
    };

    *offset = end;
    Ok(T::from_be_bytes(read))
}

/// Appends `value` to `out` in big-endian byte order.
///
/// ```rust
/// use dekotlin::file::io::write_be;
///
/// let mut out = Vec::new();
/// write_be(&mut out, 0xCAFE_u16);
/// write_be(&mut out, -1_i8);
/// assert_eq!(out, [0xCA, 0xFE, 0xFF]);
/// ```
pub fn write_be<T: ClassIO>(out: &mut Vec<u8>, value: T) {
    out.extend_from_slice(value.to_be_bytes().as_ref());
}

/// Overwrites the `T` at `offset` in `data` and advances `offset` past it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if fewer than `size_of::<T>()` bytes remain;
/// `offset` is left unchanged in that case.
pub fn write_be_at<T: ClassIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let bytes = value.to_be_bytes();
    let bytes = bytes.as_ref();
    let end = offset.checked_add(bytes.len()).ok_or(OutOfBounds)?;
    let Some(slot) = data.get_mut(*offset..end) else {
        return Err(OutOfBounds);
    };

    slot.copy_from_slice(bytes);
    *offset = end;
    Ok(())
}
