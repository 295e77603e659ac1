//! Fixed-size page layout.
//!
//! A page is 4096 bytes: a 64-byte header followed by a data area holding
//! length-prefixed records. The header packs eight little-endian `u32`s at
//! offsets 0..32 (page id, kind discriminator, record count, free space,
//! next/prev links, checksum, timestamp); the rest is zero padding.

use common::{DbError, DbResult, PageId};
use tracing::warn;

pub const PAGE_SIZE: usize = 4096;
pub const HEADER_SIZE: usize = 64;
pub const DATA_SIZE: usize = PAGE_SIZE - HEADER_SIZE;

/// Bytes of the `u32` length prefix in front of every record.
pub const RECORD_PREFIX: usize = 4;

/// Sentinel for an absent next/prev page link.
const LINK_NONE: u32 = u32::MAX;

/// What a page stores, persisted as a 32-bit discriminator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageKind {
    Data,
    Index,
    Header,
    Free,
}

impl PageKind {
    fn discriminator(self) -> u32 {
        match self {
            PageKind::Data => 0,
            PageKind::Index => 1,
            PageKind::Header => 2,
            PageKind::Free => 3,
        }
    }

    /// Unknown discriminators decode as `Data`.
    fn from_discriminator(raw: u32) -> Self {
        match raw {
            1 => PageKind::Index,
            2 => PageKind::Header,
            3 => PageKind::Free,
            _ => PageKind::Data,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PageHeader {
    pub page_id: PageId,
    pub kind: PageKind,
    pub record_count: u32,
    pub free_space: u32,
    pub next_page_id: Option<PageId>,
    pub prev_page_id: Option<PageId>,
    pub checksum: u32,
    pub timestamp: u32,
}

impl PageHeader {
    fn new(page_id: PageId, kind: PageKind) -> Self {
        Self {
            page_id,
            kind,
            record_count: 0,
            free_space: DATA_SIZE as u32,
            next_page_id: None,
            prev_page_id: None,
            checksum: 0,
            timestamp: 0,
        }
    }

    fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        let fields = [
            self.page_id.0,
            self.kind.discriminator(),
            self.record_count,
            self.free_space,
            self.next_page_id.map_or(LINK_NONE, |p| p.0),
            self.prev_page_id.map_or(LINK_NONE, |p| p.0),
            self.checksum,
            self.timestamp,
        ];
        for (i, field) in fields.iter().enumerate() {
            buf[i * 4..i * 4 + 4].copy_from_slice(&field.to_le_bytes());
        }
        buf
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let field = |i: usize| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&bytes[i * 4..i * 4 + 4]);
            u32::from_le_bytes(raw)
        };
        let link = |raw: u32| (raw != LINK_NONE).then_some(PageId(raw));
        Self {
            page_id: PageId(field(0)),
            kind: PageKind::from_discriminator(field(1)),
            record_count: field(2),
            free_space: field(3),
            next_page_id: link(field(4)),
            prev_page_id: link(field(5)),
            checksum: field(6),
            timestamp: field(7),
        }
    }
}

/// The unit of I/O and caching: a header plus a data area of
/// length-prefixed records.
#[derive(Clone, Debug)]
pub struct Page {
    pub header: PageHeader,
    data: Vec<u8>,
}

impl Page {
    pub fn new(page_id: PageId, kind: PageKind) -> Self {
        Self {
            header: PageHeader::new(page_id, kind),
            data: vec![0u8; DATA_SIZE],
        }
    }

    pub fn id(&self) -> PageId {
        self.header.page_id
    }

    pub fn kind(&self) -> PageKind {
        self.header.kind
    }

    pub fn record_count(&self) -> usize {
        self.header.record_count as usize
    }

    pub fn free_space(&self) -> usize {
        self.header.free_space as usize
    }

    pub fn used_bytes(&self) -> usize {
        DATA_SIZE - self.free_space()
    }

    /// Appends one length-prefixed record; returns false when it does not
    /// fit in the remaining free space.
    pub fn add_record(&mut self, bytes: &[u8]) -> bool {
        let needed = bytes.len() + RECORD_PREFIX;
        if needed > self.free_space() {
            return false;
        }
        let offset = self.used_bytes();
        let len = bytes.len() as u32;
        self.data[offset..offset + RECORD_PREFIX].copy_from_slice(&len.to_le_bytes());
        self.data[offset + RECORD_PREFIX..offset + needed].copy_from_slice(bytes);
        self.header.record_count += 1;
        self.header.free_space -= needed as u32;
        true
    }

    /// Decodes the length-prefixed records in the data area.
    ///
    /// Framing that disagrees with `record_count` is logged and the records
    /// decoded so far are returned (best-effort, per the corruption policy).
    pub fn records(&self) -> Vec<&[u8]> {
        let mut out = Vec::with_capacity(self.record_count());
        let mut offset = 0usize;
        for _ in 0..self.header.record_count {
            if offset + RECORD_PREFIX > DATA_SIZE {
                warn!(page = self.header.page_id.0, "record framing truncated");
                break;
            }
            let mut raw = [0u8; RECORD_PREFIX];
            raw.copy_from_slice(&self.data[offset..offset + RECORD_PREFIX]);
            let len = u32::from_le_bytes(raw) as usize;
            if offset + RECORD_PREFIX + len > DATA_SIZE {
                warn!(
                    page = self.header.page_id.0,
                    len, "record length exceeds data area"
                );
                break;
            }
            out.push(&self.data[offset + RECORD_PREFIX..offset + RECORD_PREFIX + len]);
            offset += RECORD_PREFIX + len;
        }
        out
    }

    /// Resets the data area so the page can be repacked from scratch.
    pub fn clear_records(&mut self) {
        self.data.fill(0);
        self.header.record_count = 0;
        self.header.free_space = DATA_SIZE as u32;
    }

    pub fn compute_checksum(&self) -> u32 {
        crc32fast::hash(&self.data)
    }

    pub fn update_checksum(&mut self) {
        self.header.checksum = self.compute_checksum();
    }

    pub fn verify_checksum(&self) -> bool {
        self.header.checksum == self.compute_checksum()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PAGE_SIZE);
        buf.extend_from_slice(&self.header.to_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> DbResult<Self> {
        if bytes.len() != PAGE_SIZE {
            return Err(DbError::Corruption(format!(
                "page buffer has {} bytes, expected {PAGE_SIZE}",
                bytes.len()
            )));
        }
        Ok(Self {
            header: PageHeader::from_bytes(&bytes[..HEADER_SIZE]),
            data: bytes[HEADER_SIZE..].to_vec(),
        })
    }
}
