//! File-backed page store.
//!
//! Block 0 is the header; block `1 + id` holds the page with id `id`. Each
//! page is read and written individually with one seek. Free pages form a
//! singly linked list threaded through their first four bytes, headed by a
//! field in the header.
//!
//! Header layout (little-endian):
//! `[magic "MTRE"][version u32][page_size u32][dir_capacity u32]
//! [leaf_capacity u32][free_list_head u32][crc32 u32]`

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::Path;

use crate::distance::Distance;
use crate::entry::read_u32;
use crate::error::{MTreeError, Result};
use crate::node::Node;
use crate::page::{PageId, PageLayout, PageStore, NO_PAGE};

const MAGIC: [u8; 4] = *b"MTRE";
const FORMAT_VERSION: u32 = 1;
const HEADER_SIZE: usize = 28;

/// A page store backed by a single file.
pub struct FileStore<D: Distance> {
    file: File,
    layout: PageLayout,
    free_list_head: PageId,
    next_page_id: PageId,
    _distance: PhantomData<D>,
}

impl<D: Distance> FileStore<D> {
    /// Create a fresh page file at `path`, truncating anything there.
    pub fn create(path: impl AsRef<Path>, layout: PageLayout) -> Result<Self> {
        if layout.page_size < HEADER_SIZE {
            return Err(MTreeError::InvalidCapacity(format!(
                "page size of {} bytes cannot hold the file header",
                layout.page_size
            )));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let mut store = Self {
            file,
            layout,
            free_list_head: NO_PAGE,
            next_page_id: 0,
            _distance: PhantomData,
        };
        store.write_header()?;
        Ok(store)
    }

    /// Open an existing page file, validating its header against the
    /// distance type `D`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut header = [0u8; HEADER_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header).map_err(|_| {
            MTreeError::Corrupted("file is too small for a header".to_string())
        })?;

        if header[0..4] != MAGIC {
            return Err(MTreeError::Corrupted(
                "bad magic bytes; not a metric tree file".to_string(),
            ));
        }
        let version = read_u32(&header, 4);
        if version != FORMAT_VERSION {
            return Err(MTreeError::Corrupted(format!(
                "unsupported format version {}",
                version
            )));
        }
        let expected_crc = read_u32(&header, 24);
        if crc32fast::hash(&header[..24]) != expected_crc {
            return Err(MTreeError::Corrupted(
                "header checksum mismatch".to_string(),
            ));
        }

        let page_size = read_u32(&header, 8) as usize;
        let dir_capacity = read_u32(&header, 12) as usize;
        let leaf_capacity = read_u32(&header, 16) as usize;
        let free_list_head = read_u32(&header, 20);

        // the stored capacities must match what this distance type derives;
        // a mismatch means the file was built against a different metric
        let layout = PageLayout::derive::<D>(page_size)?;
        if layout.dir_capacity != dir_capacity || layout.leaf_capacity != leaf_capacity {
            return Err(MTreeError::Corrupted(format!(
                "stored capacities ({}, {}) do not match the distance type ({}, {})",
                dir_capacity, leaf_capacity, layout.dir_capacity, layout.leaf_capacity
            )));
        }

        let file_len = file.metadata()?.len() as usize;
        if file_len < page_size || file_len % page_size != 0 {
            return Err(MTreeError::Corrupted(format!(
                "file length {} is not a whole number of {}-byte pages",
                file_len, page_size
            )));
        }
        let next_page_id = (file_len / page_size - 1) as PageId;

        Ok(Self {
            file,
            layout,
            free_list_head,
            next_page_id,
            _distance: PhantomData,
        })
    }

    pub fn layout(&self) -> PageLayout {
        self.layout
    }

    fn offset(&self, id: PageId) -> u64 {
        (1 + id as u64) * self.layout.page_size as u64
    }

    fn write_header(&mut self) -> Result<()> {
        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(&MAGIC);
        header[4..8].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        header[8..12].copy_from_slice(&(self.layout.page_size as u32).to_le_bytes());
        header[12..16].copy_from_slice(&(self.layout.dir_capacity as u32).to_le_bytes());
        header[16..20].copy_from_slice(&(self.layout.leaf_capacity as u32).to_le_bytes());
        header[20..24].copy_from_slice(&self.free_list_head.to_le_bytes());
        let crc = crc32fast::hash(&header[..24]);
        header[24..28].copy_from_slice(&crc.to_le_bytes());

        let mut block = vec![0u8; self.layout.page_size];
        block[..HEADER_SIZE].copy_from_slice(&header);
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&block)?;
        Ok(())
    }
}

impl<D: Distance> PageStore<D> for FileStore<D> {
    fn load(&mut self, id: PageId) -> Result<Node<D>> {
        let mut buf = vec![0u8; self.layout.page_size];
        self.file.seek(SeekFrom::Start(self.offset(id)))?;
        self.file.read_exact(&mut buf)?;
        Node::decode(&buf, &self.layout)
    }

    fn store(&mut self, id: PageId, node: &Node<D>) -> Result<()> {
        let buf = node.encode(id, &self.layout);
        self.file.seek(SeekFrom::Start(self.offset(id)))?;
        self.file.write_all(&buf)?;
        Ok(())
    }

    fn allocate(&mut self) -> Result<PageId> {
        if self.free_list_head != NO_PAGE {
            let id = self.free_list_head;
            let mut link = [0u8; 4];
            self.file.seek(SeekFrom::Start(self.offset(id)))?;
            self.file.read_exact(&mut link)?;
            self.free_list_head = u32::from_le_bytes(link);
            return Ok(id);
        }
        let id = self.next_page_id;
        self.next_page_id += 1;
        Ok(id)
    }

    fn free(&mut self, id: PageId) -> Result<()> {
        // thread the page into the free list via its first four bytes
        self.file.seek(SeekFrom::Start(self.offset(id)))?;
        self.file.write_all(&self.free_list_head.to_le_bytes())?;
        self.free_list_head = id;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.write_header()?;
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Entry;
    use tempfile::TempDir;

    fn layout() -> PageLayout {
        PageLayout::derive::<f32>(128).unwrap()
    }

    fn leaf(id: PageId, object_id: u32) -> Node<f32> {
        let mut node = Node::new_leaf(layout().leaf_capacity);
        node.node_id = Some(id);
        node.add_leaf_entry(Entry::Leaf {
            object_id,
            parent_distance: Some(1.5),
        });
        node
    }

    #[test]
    fn test_create_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tree.idx");

        {
            let mut store: FileStore<f32> = FileStore::create(&path, layout()).unwrap();
            store.store(0, &leaf(0, 42)).unwrap();
            store.close().unwrap();
        }

        let mut store: FileStore<f32> = FileStore::open(&path).unwrap();
        assert_eq!(store.layout(), layout());
        let node = store.load(0).unwrap();
        assert_eq!(node.entry(0).object_id(), 42);
    }

    #[test]
    fn test_open_rejects_bad_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tree.idx");
        {
            let mut store: FileStore<f32> = FileStore::create(&path, layout()).unwrap();
            store.close().unwrap();
        }
        {
            let mut file = OpenOptions::new().write(true).open(&path).unwrap();
            file.write_all(b"NOPE").unwrap();
        }
        assert!(matches!(
            FileStore::<f32>::open(&path),
            Err(MTreeError::Corrupted(_))
        ));
    }

    #[test]
    fn test_open_rejects_checksum_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tree.idx");
        {
            let mut store: FileStore<f32> = FileStore::create(&path, layout()).unwrap();
            store.close().unwrap();
        }
        {
            // flip a header field without fixing the checksum
            let mut file = OpenOptions::new().write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(20)).unwrap();
            file.write_all(&7u32.to_le_bytes()).unwrap();
        }
        assert!(matches!(
            FileStore::<f32>::open(&path),
            Err(MTreeError::Corrupted(_))
        ));
    }

    #[test]
    fn test_open_rejects_wrong_distance_type() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tree.idx");
        {
            let mut store: FileStore<f32> = FileStore::create(&path, layout()).unwrap();
            store.close().unwrap();
        }
        assert!(matches!(
            FileStore::<f64>::open(&path),
            Err(MTreeError::Corrupted(_))
        ));
    }

    #[test]
    fn test_allocation_is_sequential() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tree.idx");
        let mut store: FileStore<f32> = FileStore::create(&path, layout()).unwrap();
        assert_eq!(store.allocate().unwrap(), 0);
        assert_eq!(store.allocate().unwrap(), 1);
        assert_eq!(store.allocate().unwrap(), 2);
    }

    #[test]
    fn test_free_list_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tree.idx");

        {
            let mut store: FileStore<f32> = FileStore::create(&path, layout()).unwrap();
            for id in 0..3 {
                let allocated = store.allocate().unwrap();
                store.store(allocated, &leaf(allocated, id)).unwrap();
            }
            store.free(1).unwrap();
            store.close().unwrap();
        }

        let mut store: FileStore<f32> = FileStore::open(&path).unwrap();
        // the freed page comes back first, then fresh ids resume
        assert_eq!(store.allocate().unwrap(), 1);
        assert_eq!(store.allocate().unwrap(), 3);
    }

    #[test]
    fn test_next_page_id_recomputed_from_length() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tree.idx");

        {
            let mut store: FileStore<f32> = FileStore::create(&path, layout()).unwrap();
            for id in 0..4 {
                let allocated = store.allocate().unwrap();
                store.store(allocated, &leaf(allocated, id)).unwrap();
            }
            store.close().unwrap();
        }

        let mut store: FileStore<f32> = FileStore::open(&path).unwrap();
        assert_eq!(store.allocate().unwrap(), 4);
    }
}
