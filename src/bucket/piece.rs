//! Pieces: the 64-byte record slots of a bucket.
//!
//! ```text
//! byte 0        bytes 1..64
//! [header]      [packed records ........ | unused]
//!  bit 7    overflowed
//!  bits 0-6 bytes_used (0..=63)
//! ```
//!
//! Records are `(varint key, varint value)` pairs packed back to back from
//! the start of the buffer; `bytes_used` marks the end of the last one.

use tracing::error;

use crate::layout::{PIECE_CAPACITY, PIECE_SIZE};
use crate::varint;

// ------------------------------------------------------------------------------------------------
// Header
// ------------------------------------------------------------------------------------------------

/// Decoded form of a piece header byte.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PieceHeader {
    /// The probe chain continues into the next piece.
    pub overflowed: bool,
    /// Bytes of `data` holding records, at most [`PIECE_CAPACITY`].
    pub bytes_used: u8,
}

impl PieceHeader {
    const OVERFLOW_BIT: u8 = 0x80;
    const LEN_MASK: u8 = 0x7f;

    pub fn unpack(byte: u8) -> Self {
        Self {
            overflowed: byte & Self::OVERFLOW_BIT != 0,
            bytes_used: byte & Self::LEN_MASK,
        }
    }

    pub fn pack(self) -> u8 {
        debug_assert!(
            self.bytes_used as usize <= PIECE_CAPACITY,
            "bytes_used {} exceeds piece capacity",
            self.bytes_used
        );
        let len = self.bytes_used.min(PIECE_CAPACITY as u8);
        if self.overflowed {
            len | Self::OVERFLOW_BIT
        } else {
            len
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Records
// ------------------------------------------------------------------------------------------------

/// A record decoded from a piece, with its position inside the piece buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    pub key: u64,
    pub value: u64,
    /// Offset of the first key byte within the piece's data buffer.
    pub offset: usize,
    /// Encoded length of key and value together.
    pub len: usize,
}

/// Iterator over the records packed into one piece.
///
/// A record that fails to decode ends the iteration; the engine only ever
/// decodes bytes it wrote, so this indicates memory corruption.
pub struct PieceRecords<'a> {
    data: &'a [u8],
    offset: usize,
}

impl Iterator for PieceRecords<'_> {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        if self.offset >= self.data.len() {
            return None;
        }
        match varint::decode_record(&self.data[self.offset..]) {
            Ok((key, value, len)) => {
                let record = Record {
                    key,
                    value,
                    offset: self.offset,
                    len,
                };
                self.offset += len;
                Some(record)
            }
            Err(e) => {
                error!(offset = self.offset, error = %e, "undecodable record in piece");
                self.offset = self.data.len();
                None
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Views
// ------------------------------------------------------------------------------------------------

/// Read-only view of a piece.
#[derive(Clone, Copy)]
pub struct Piece<'a> {
    raw: &'a [u8],
}

impl<'a> Piece<'a> {
    pub(crate) fn new(raw: &'a [u8]) -> Self {
        debug_assert_eq!(raw.len(), PIECE_SIZE);
        Self { raw }
    }

    pub fn header(&self) -> PieceHeader {
        PieceHeader::unpack(self.raw[0])
    }

    pub fn overflowed(&self) -> bool {
        self.header().overflowed
    }

    pub fn bytes_used(&self) -> usize {
        (self.header().bytes_used as usize).min(PIECE_CAPACITY)
    }

    pub fn is_empty(&self) -> bool {
        self.bytes_used() == 0
    }

    /// Bytes still available for records.
    pub fn free(&self) -> usize {
        PIECE_CAPACITY - self.bytes_used()
    }

    /// The packed records.
    pub fn data(&self) -> &'a [u8] {
        &self.raw[1..1 + self.bytes_used()]
    }

    pub fn records(&self) -> PieceRecords<'a> {
        PieceRecords {
            data: self.data(),
            offset: 0,
        }
    }

    pub fn find(&self, key: u64) -> Option<Record> {
        self.records().find(|r| r.key == key)
    }

    /// The record starting at `offset`, or `None` past the last record.
    pub fn record_at(&self, offset: usize) -> Option<Record> {
        PieceRecords {
            data: self.data(),
            offset,
        }
        .next()
    }
}

/// Mutable view of a piece.
pub struct PieceMut<'a> {
    raw: &'a mut [u8],
}

impl<'a> PieceMut<'a> {
    pub(crate) fn new(raw: &'a mut [u8]) -> Self {
        debug_assert_eq!(raw.len(), PIECE_SIZE);
        Self { raw }
    }

    pub fn as_piece(&self) -> Piece<'_> {
        Piece::new(self.raw)
    }

    fn set_header(&mut self, header: PieceHeader) {
        self.raw[0] = header.pack();
    }

    pub fn set_overflowed(&mut self, overflowed: bool) {
        let mut header = PieceHeader::unpack(self.raw[0]);
        header.overflowed = overflowed;
        self.set_header(header);
    }

    /// Appends `record` after the existing records.
    ///
    /// Returns `false`, leaving the piece untouched, when it does not fit.
    pub fn append(&mut self, record: &[u8]) -> bool {
        let mut header = PieceHeader::unpack(self.raw[0]);
        let used = header.bytes_used as usize;
        if used + record.len() > PIECE_CAPACITY {
            return false;
        }
        self.raw[1 + used..1 + used + record.len()].copy_from_slice(record);
        header.bytes_used = (used + record.len()) as u8;
        self.set_header(header);
        true
    }

    /// Removes `len` bytes at `offset`, shifting the remaining records left.
    pub fn remove(&mut self, offset: usize, len: usize) {
        let mut header = PieceHeader::unpack(self.raw[0]);
        let used = header.bytes_used as usize;
        debug_assert!(offset + len <= used, "removal past end of piece");
        let data = &mut self.raw[1..1 + PIECE_CAPACITY];
        data.copy_within(offset + len..used, offset);
        data[used - len..used].fill(0);
        header.bytes_used = (used - len) as u8;
        self.set_header(header);
    }

    /// Overwrites bytes in place; the record length must not change.
    pub fn overwrite(&mut self, offset: usize, record: &[u8]) {
        debug_assert!(offset + record.len() <= self.as_piece().bytes_used());
        self.raw[1 + offset..1 + offset + record.len()].copy_from_slice(record);
    }
}
