//! Byte-level memory model.
//!
//! A [`MemoryBlock`] is a contiguous, addressable byte range handed out by a
//! heap allocator. It knows its address and size and nothing about what the
//! bytes mean; typed accessors honour the configured [`ByteOrder`].
//!
//! Blocks are reference counted. The allocator keeps one handle for as long as
//! the block is live; every other holder (values, frames, handles) shares it.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Byte order used for multi-byte reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    /// Least significant byte first
    #[default]
    Little,
    /// Most significant byte first
    Big,
}

/// Width of a reference stored inside an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AddressWidth {
    /// 4-byte references
    #[serde(rename = "32")]
    W32,
    /// 8-byte references
    #[default]
    #[serde(rename = "64")]
    W64,
}

impl AddressWidth {
    /// Size of a stored reference in bytes.
    pub fn bytes(self) -> usize {
        match self {
            AddressWidth::W32 => 4,
            AddressWidth::W64 => 8,
        }
    }

    /// Largest address representable with this width.
    pub fn max_address(self) -> u64 {
        match self {
            AddressWidth::W32 => u32::MAX as u64,
            AddressWidth::W64 => u64::MAX,
        }
    }
}

/// Raw storage of a block plus its byte order.
pub struct MemoryData {
    bytes: RwLock<Box<[u8]>>,
    order: ByteOrder,
}

macro_rules! scalar_accessors {
    ($($read:ident, $write:ident, $ty:ty);* $(;)?) => {
        $(
            #[doc = concat!("Reads a `", stringify!($ty), "` at `offset`.")]
            pub fn $read(&self, offset: usize) -> $ty {
                const LEN: usize = std::mem::size_of::<$ty>();
                let mut raw = [0u8; LEN];
                raw.copy_from_slice(&self.bytes.read()[offset..offset + LEN]);
                match self.order {
                    ByteOrder::Little => <$ty>::from_le_bytes(raw),
                    ByteOrder::Big => <$ty>::from_be_bytes(raw),
                }
            }

            #[doc = concat!("Writes a `", stringify!($ty), "` at `offset`.")]
            pub fn $write(&self, offset: usize, value: $ty) {
                let raw = match self.order {
                    ByteOrder::Little => value.to_le_bytes(),
                    ByteOrder::Big => value.to_be_bytes(),
                };
                self.bytes.write()[offset..offset + raw.len()].copy_from_slice(&raw);
            }
        )*
    };
}

impl MemoryData {
    /// Creates zero-filled storage of `size` bytes.
    pub fn zeroed(size: usize, order: ByteOrder) -> Self {
        MemoryData {
            bytes: RwLock::new(vec![0u8; size].into_boxed_slice()),
            order,
        }
    }

    /// Number of bytes in this storage.
    pub fn len(&self) -> usize {
        self.bytes.read().len()
    }

    /// True for zero-sized storage.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Byte order of multi-byte accessors.
    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    /// Reads one byte.
    pub fn read_u8(&self, offset: usize) -> u8 {
        self.bytes.read()[offset]
    }

    /// Writes one byte.
    pub fn write_u8(&self, offset: usize, value: u8) {
        self.bytes.write()[offset] = value;
    }

    /// Reads a signed byte.
    pub fn read_i8(&self, offset: usize) -> i8 {
        self.read_u8(offset) as i8
    }

    /// Writes a signed byte.
    pub fn write_i8(&self, offset: usize, value: i8) {
        self.write_u8(offset, value as u8);
    }

    /// Reads a boolean stored as a single byte.
    pub fn read_bool(&self, offset: usize) -> bool {
        self.read_u8(offset) != 0
    }

    /// Writes a boolean as a single byte.
    pub fn write_bool(&self, offset: usize, value: bool) {
        self.write_u8(offset, value as u8);
    }

    scalar_accessors! {
        read_u16, write_u16, u16;
        read_i16, write_i16, i16;
        read_u32, write_u32, u32;
        read_i32, write_i32, i32;
        read_u64, write_u64, u64;
        read_i64, write_i64, i64;
        read_f32, write_f32, f32;
        read_f64, write_f64, f64;
    }

    /// Reads a reference-sized address.
    pub fn read_address(&self, offset: usize, width: AddressWidth) -> u64 {
        match width {
            AddressWidth::W32 => self.read_u32(offset) as u64,
            AddressWidth::W64 => self.read_u64(offset),
        }
    }

    /// Writes a reference-sized address. Addresses wider than `width` are truncated.
    pub fn write_address(&self, offset: usize, address: u64, width: AddressWidth) {
        match width {
            AddressWidth::W32 => self.write_u32(offset, address as u32),
            AddressWidth::W64 => self.write_u64(offset, address),
        }
    }

    /// Copies `len` bytes from `src` starting at `src_offset` into this storage.
    ///
    /// Overlapping copies within the same storage behave like `memmove`.
    pub fn copy_from(&self, dst_offset: usize, src: &MemoryData, src_offset: usize, len: usize) {
        if std::ptr::eq(self, src) {
            self.bytes
                .write()
                .copy_within(src_offset..src_offset + len, dst_offset);
            return;
        }
        let source = src.bytes.read();
        self.bytes.write()[dst_offset..dst_offset + len]
            .copy_from_slice(&source[src_offset..src_offset + len]);
    }

    /// Fills `len` bytes starting at `offset` with `value`.
    pub fn fill(&self, offset: usize, len: usize, value: u8) {
        self.bytes.write()[offset..offset + len].fill(value);
    }
}

struct BlockInner {
    address: u64,
    data: MemoryData,
}

/// An addressable heap block.
///
/// Cloning a block shares it; equality and hashing use the address only.
#[derive(Clone)]
pub struct MemoryBlock {
    inner: Arc<BlockInner>,
}

impl MemoryBlock {
    /// Creates a zero-filled block at `address`.
    pub fn new(address: u64, size: usize, order: ByteOrder) -> Self {
        MemoryBlock {
            inner: Arc::new(BlockInner {
                address,
                data: MemoryData::zeroed(size, order),
            }),
        }
    }

    /// Address of the first byte.
    pub fn address(&self) -> u64 {
        self.inner.address
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.inner.data.len()
    }

    /// Byte-level accessors for this block.
    pub fn data(&self) -> &MemoryData {
        &self.inner.data
    }
}

impl PartialEq for MemoryBlock {
    fn eq(&self, other: &Self) -> bool {
        self.address() == other.address()
    }
}

impl Eq for MemoryBlock {}

impl std::hash::Hash for MemoryBlock {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.address().hash(state);
    }
}

impl fmt::Debug for MemoryBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryBlock({:#x}, {} bytes)", self.address(), self.size())
    }
}
