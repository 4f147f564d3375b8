//! Table file manager for MiniDB
//!
//! Row-level API over the buffer pool: append a row to the first page with
//! room, scan all live rows lazily, update in place when the new bytes fit,
//! tombstone otherwise. Every page access happens under a scoped pin that
//! is released before the call returns, so a scan holds at most one pinned
//! page at a time.

use std::sync::{Arc, Mutex};

use super::buffer_pool::{BufferPool, FrameKey};
use super::page::PageId;
use super::tuple::{decode_row, encode_row, Row, Value};
use crate::error::{Error, Result};

/// A row's physical address: page id plus slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowId {
    pub page_id: PageId,
    pub slot: u16,
}

impl RowId {
    pub fn new(page_id: PageId, slot: u16) -> Self {
        Self { page_id, slot }
    }
}

/// Row-level view of one table's pages.
#[derive(Debug)]
pub struct TableFile {
    table: String,
    pages: Vec<PageId>,
    pool: Arc<Mutex<BufferPool>>,
}

impl TableFile {
    /// Open a table file over its catalog-recorded page list.
    pub fn new(table: impl Into<String>, pages: Vec<PageId>, pool: Arc<Mutex<BufferPool>>) -> Self {
        Self {
            table: table.into(),
            pages,
            pool,
        }
    }

    /// Page ids in scan order. The engine writes this back to the catalog
    /// after a mutating statement.
    pub fn pages(&self) -> &[PageId] {
        &self.pages
    }

    /// Run a closure against a pinned page, read-only. The pin is released
    /// on every exit path.
    fn with_page<R>(&self, page_id: PageId, f: impl FnOnce(&super::page::Page) -> R) -> Result<R> {
        let mut pool = self.pool.lock().unwrap();
        let key = FrameKey::new(self.table.clone(), page_id);
        let index = pool.fetch(&key)?;
        let out = f(pool.page(index));
        pool.unpin(index, false);
        Ok(out)
    }

    /// Run a closure against a pinned page, marking the frame dirty.
    fn with_page_mut<R>(
        &self,
        page_id: PageId,
        f: impl FnOnce(&mut super::page::Page) -> R,
    ) -> Result<R> {
        let mut pool = self.pool.lock().unwrap();
        let key = FrameKey::new(self.table.clone(), page_id);
        let index = pool.fetch(&key)?;
        let out = f(pool.page_mut(index));
        pool.unpin(index, true);
        Ok(out)
    }

    /// Append a row, walking the page list for the first page with enough
    /// free space and allocating a new page when none has room.
    pub fn append(&mut self, row: &[Value]) -> Result<RowId> {
        let bytes = encode_row(row);

        for &page_id in &self.pages {
            let inserted = self.with_page_mut(page_id, |page| page.insert_row(&bytes))?;
            if let Some(slot) = inserted {
                return Ok(RowId::new(page_id, slot));
            }
        }

        // No existing page has room; extend the table.
        let mut pool = self.pool.lock().unwrap();
        let (page_id, index) = pool.allocate(&self.table)?;
        let inserted = pool.page_mut(index).insert_row(&bytes);
        pool.unpin(index, true);
        drop(pool);

        let slot = inserted.ok_or_else(|| {
            Error::Runtime(format!(
                "row of {} bytes does not fit in an empty page",
                bytes.len()
            ))
        })?;
        self.pages.push(page_id);
        Ok(RowId::new(page_id, slot))
    }

    /// Read one row by its address. Tombstoned slots read as `None`.
    pub fn read(&self, id: RowId) -> Result<Option<Row>> {
        let bytes = self.with_page(id.page_id, |page| page.read_row(id.slot).map(|b| b.to_vec()))?;
        bytes.map(|b| decode_row(&b)).transpose()
    }

    /// Overwrite a row in place when the new serialization fits; otherwise
    /// tombstone the old slot and append the row elsewhere.
    pub fn update_in_place(&mut self, id: RowId, row: &[Value]) -> Result<RowId> {
        let bytes = encode_row(row);
        let fitted =
            self.with_page_mut(id.page_id, |page| page.overwrite_row(id.slot, &bytes))?;
        if fitted {
            return Ok(id);
        }

        self.delete(id)?;
        self.append(row)
    }

    /// Tombstone a row.
    pub fn delete(&mut self, id: RowId) -> Result<()> {
        let removed = self.with_page_mut(id.page_id, |page| page.tombstone_row(id.slot))?;
        if removed {
            Ok(())
        } else {
            Err(Error::Runtime(format!(
                "no live row at page {} slot {} in table '{}'",
                id.page_id, id.slot, self.table
            )))
        }
    }

    /// Lazily scan all live rows in page-list order.
    pub fn scan(&self) -> ScanIter {
        ScanIter {
            table: self.table.clone(),
            pages: self.pages.clone(),
            pool: Arc::clone(&self.pool),
            page_index: 0,
            next_slot: 0,
        }
    }
}

/// Lazy row iterator. Each step pins exactly one page for the duration of
/// the call and unpins it before returning.
pub struct ScanIter {
    table: String,
    pages: Vec<PageId>,
    pool: Arc<Mutex<BufferPool>>,
    page_index: usize,
    next_slot: u16,
}

impl Iterator for ScanIter {
    type Item = Result<(RowId, Row)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let page_id = *self.pages.get(self.page_index)?;

            let mut pool = self.pool.lock().unwrap();
            let key = FrameKey::new(self.table.clone(), page_id);
            let index = match pool.fetch(&key) {
                Ok(i) => i,
                Err(e) => return Some(Err(e)),
            };

            let page = pool.page(index);
            let slot_count = page.slot_count() as u16;
            let mut found = None;
            while self.next_slot < slot_count {
                let slot = self.next_slot;
                self.next_slot += 1;
                if let Some(bytes) = page.read_row(slot) {
                    found = Some((slot, bytes.to_vec()));
                    break;
                }
            }
            pool.unpin(index, false);
            drop(pool);

            match found {
                Some((slot, bytes)) => {
                    return Some(
                        decode_row(&bytes).map(|row| (RowId::new(page_id, slot), row)),
                    );
                }
                None => {
                    self.page_index += 1;
                    self.next_slot = 0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::buffer_pool::EvictionPolicy;
    use crate::storage::disk::PageManager;

    fn setup(capacity: usize) -> (tempfile::TempDir, Arc<Mutex<BufferPool>>) {
        let dir = tempfile::tempdir().unwrap();
        let disk = PageManager::new(dir.path());
        let pool = Arc::new(Mutex::new(BufferPool::new(
            capacity,
            EvictionPolicy::Lru,
            disk,
        )));
        (dir, pool)
    }

    fn collect(file: &TableFile) -> Vec<Row> {
        file.scan().map(|r| r.unwrap().1).collect()
    }

    #[test]
    fn test_append_and_scan() {
        let (_dir, pool) = setup(4);
        let mut file = TableFile::new("t", vec![], pool);

        for i in 0..5 {
            file.append(&[Value::Int(i), Value::from("row")]).unwrap();
        }

        let rows = collect(&file);
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0][0], Value::Int(0));
        assert_eq!(rows[4][0], Value::Int(4));
    }

    #[test]
    fn test_append_spills_to_new_pages() {
        let (_dir, pool) = setup(4);
        let mut file = TableFile::new("t", vec![], pool);

        // Each row is ~1 KB, so a 4 KB page holds at most three.
        let big = "x".repeat(1000);
        for i in 0..10 {
            file.append(&[Value::Int(i), Value::from(big.as_str())])
                .unwrap();
        }

        assert!(file.pages().len() > 2);
        let rows = collect(&file);
        assert_eq!(rows.len(), 10);
        // Page-list order preserves insertion order.
        for (i, row) in rows.iter().enumerate() {
            assert_eq!(row[0], Value::Int(i as i64));
        }
    }

    #[test]
    fn test_delete_tombstones_row() {
        let (_dir, pool) = setup(4);
        let mut file = TableFile::new("t", vec![], pool);

        let a = file.append(&[Value::Int(1)]).unwrap();
        file.append(&[Value::Int(2)]).unwrap();

        file.delete(a).unwrap();
        let rows = collect(&file);
        assert_eq!(rows, vec![vec![Value::Int(2)]]);
        assert!(file.read(a).unwrap().is_none());
        assert!(file.delete(a).is_err());
    }

    #[test]
    fn test_update_in_place_when_it_fits() {
        let (_dir, pool) = setup(4);
        let mut file = TableFile::new("t", vec![], pool);

        let id = file.append(&[Value::Int(1), Value::from("abcdef")]).unwrap();
        let new_id = file
            .update_in_place(id, &[Value::Int(1), Value::from("abc")])
            .unwrap();

        assert_eq!(new_id, id);
        assert_eq!(
            file.read(id).unwrap().unwrap(),
            vec![Value::Int(1), Value::from("abc")]
        );
    }

    #[test]
    fn test_update_relocates_when_it_grows() {
        let (_dir, pool) = setup(4);
        let mut file = TableFile::new("t", vec![], pool);

        let id = file.append(&[Value::Int(1), Value::from("tiny")]).unwrap();
        file.append(&[Value::Int(2)]).unwrap();

        let grown = "much much longer than before".to_string();
        let new_id = file
            .update_in_place(id, &[Value::Int(1), Value::from(grown.as_str())])
            .unwrap();

        assert_ne!(new_id, id);
        assert!(file.read(id).unwrap().is_none());
        let rows = collect(&file);
        assert_eq!(rows.len(), 2);
        assert!(rows
            .iter()
            .any(|r| r == &vec![Value::Int(1), Value::from(grown.as_str())]));
    }

    #[test]
    fn test_scan_works_with_a_single_frame() {
        // A capacity-1 pool forces the scan to re-fetch pages as it goes.
        let (_dir, pool) = setup(1);
        let mut file = TableFile::new("t", vec![], pool);

        let big = "y".repeat(1500);
        for i in 0..6 {
            file.append(&[Value::Int(i), Value::from(big.as_str())])
                .unwrap();
        }

        let rows = collect(&file);
        assert_eq!(rows.len(), 6);
    }
}
