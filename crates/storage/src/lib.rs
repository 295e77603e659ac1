//! On-disk page store: one file per page under a single data directory.
//!
//! The store maps `PageId`s to `page_NNNNNN.dat` files and hands out fresh
//! ids from a counter persisted in `metadata.json`. Pages become persistent
//! on `save_page`; a completed write always leaves a self-consistent file
//! because the whole page is rewritten at once.

mod page;


pub use page::{Page, PageHeader, PageKind, DATA_SIZE, HEADER_SIZE, PAGE_SIZE, RECORD_PREFIX};

use common::{DbResult, PageId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Serialize, Deserialize)]
struct Metadata {
    next_page_id: u32,
}

/// Maps `PageId`s to bytes on disk and back, and assigns fresh ids.
#[derive(Debug)]
pub struct PageStore {
    data_dir: PathBuf,
    next_page_id: u32,
}

impl PageStore {
    /// Opens a store rooted at `data_dir`, creating the directory and
    /// loading the persisted id counter when present.
    pub fn open(data_dir: impl Into<PathBuf>) -> DbResult<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;

        let mut next_page_id = 1;
        let metadata_path = data_dir.join(METADATA_FILE);
        if metadata_path.exists() {
            match fs::read_to_string(&metadata_path) {
                Ok(raw) => match serde_json::from_str::<Metadata>(&raw) {
                    Ok(meta) => next_page_id = meta.next_page_id,
                    Err(err) => warn!(%err, "metadata file is invalid, restarting id counter"),
                },
                Err(err) => warn!(%err, "metadata file is unreadable, restarting id counter"),
            }
        }

        Ok(Self {
            data_dir,
            next_page_id,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// The id the next `create_page` will assign.
    pub fn next_page_id(&self) -> u32 {
        self.next_page_id
    }

    fn page_path(&self, id: PageId) -> PathBuf {
        self.data_dir.join(format!("page_{:06}.dat", id.0))
    }

    fn save_metadata(&self) -> DbResult<()> {
        let meta = Metadata {
            next_page_id: self.next_page_id,
        };
        let raw = serde_json::to_string_pretty(&meta)
            .expect("metadata serialization cannot fail");
        fs::write(self.data_dir.join(METADATA_FILE), raw)?;
        Ok(())
    }

    /// Assigns the next id and returns a fresh in-memory page. The id
    /// counter is persisted immediately; the page itself is not written
    /// until `save_page`.
    pub fn create_page(&mut self, kind: PageKind) -> DbResult<Page> {
        let id = PageId(self.next_page_id);
        self.next_page_id += 1;
        self.save_metadata()?;
        debug!(page = id.0, ?kind, "created page");
        Ok(Page::new(id, kind))
    }

    /// Reads a page file. Absent or wrong-sized files yield `None`; a
    /// checksum mismatch is logged but the page is still returned.
    pub fn load_page(&self, id: PageId) -> DbResult<Option<Page>> {
        let path = self.page_path(id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if bytes.len() != PAGE_SIZE {
            warn!(page = id.0, len = bytes.len(), "page file has wrong size");
            return Ok(None);
        }
        let page = Page::from_bytes(&bytes)?;
        if !page.verify_checksum() {
            warn!(page = id.0, "checksum mismatch on load");
        }
        Ok(Some(page))
    }

    /// Recomputes the checksum, stamps the write time, and rewrites the
    /// whole page file.
    pub fn save_page(&self, page: &mut Page) -> DbResult<()> {
        page.update_checksum();
        page.header.timestamp = unix_now();
        fs::write(self.page_path(page.id()), page.to_bytes())?;
        Ok(())
    }
}

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}
