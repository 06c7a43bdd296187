//! Cursor over class file bytes.
//!
//! [`Parser`] keeps a position within a byte slice and offers bounds-checked
//! big-endian reads. Every read either succeeds and advances the cursor, or fails with
//! [`crate::Error::OutOfBounds`] and leaves it where it was.
//!
//! ```rust
//! use dekotlin::file::Parser;
//!
//! let data = [0x00, 0x03, b'a', b'b', b'c'];
//! let mut parser = Parser::new(&data);
//! let len = parser.read_be::<u16>()?;
//! assert_eq!(parser.read_bytes(len as usize)?, b"abc");
//! assert!(!parser.has_more_data());
//! # Ok::<(), dekotlin::Error>(())
//! ```

use crate::{
    file::io::{read_be_at, ClassIO},
    Result,
};

/// Big-endian reader over a byte slice.
pub struct Parser<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Parser<'a> {
    /// Creates a parser positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Length of the underlying data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` for empty input.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether unread bytes remain.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Moves the cursor to `pos`. Seeking to the very end is allowed.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] past the end of the data.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(out_of_bounds_error!());
        }
        self.position = pos;
        Ok(())
    }

    /// Skips `step` bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer bytes remain.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        let target = self
            .position
            .checked_add(step)
            .ok_or(out_of_bounds_error!())?;
        self.seek(target)
    }

    /// Current position.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// The whole underlying slice.
    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// The byte at the cursor, without advancing.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] at the end of the data.
    pub fn peek_byte(&self) -> Result<u8> {
        self.data
            .get(self.position)
            .copied()
            .ok_or(out_of_bounds_error!())
    }

    /// Reads a big-endian `T`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the value does not fit.
    pub fn read_be<T: ClassIO>(&mut self) -> Result<T> {
        read_be_at(self.data, &mut self.position)
    }

    /// Reads `len` raw bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer bytes remain.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(out_of_bounds_error!())?;
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    /// Skips to the next multiple of `alignment`, measured from the start of the data.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the padding runs past the end.
    pub fn align(&mut self, alignment: usize) -> Result<()> {
        let padding = (alignment - self.position % alignment) % alignment;
        self.advance_by(padding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_reads() {
        let data = [0x12, 0x34, 0x56, 0x78, 0x9A];
        let mut parser = Parser::new(&data);
        assert_eq!(parser.read_be::<u16>().unwrap(), 0x1234);
        assert_eq!(parser.peek_byte().unwrap(), 0x56);
        assert_eq!(parser.read_be::<u8>().unwrap(), 0x56);
        assert_eq!(parser.pos(), 3);
        assert!(parser.read_be::<u32>().is_err());
        assert_eq!(parser.pos(), 3);
    }

    #[test]
    fn test_align_and_bounds() {
        let data = [0u8; 8];
        let mut parser = Parser::new(&data);
        parser.advance_by(1).unwrap();
        parser.align(4).unwrap();
        assert_eq!(parser.pos(), 4);
        parser.align(4).unwrap();
        assert_eq!(parser.pos(), 4);
        assert!(parser.read_bytes(5).is_err());
        assert_eq!(parser.read_bytes(4).unwrap().len(), 4);
        assert!(!parser.has_more_data());
        assert!(parser.seek(9).is_err());
    }
}
