use std::marker::PhantomData;
use std::sync::Arc;
use log::debug;
use parking_lot::RwLock;
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

use crate::common::types::PageId;
use crate::index::hash::block_page::HashBlockPage;
use crate::index::hash::codec::SlotValue;
use crate::index::hash::header_page::HashHeaderPage;
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};

/// Error type for hash table operations
#[derive(Error, Debug)]
pub enum HashTableError {
    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),

    #[error("Hash table corrupted: {0}")]
    Corrupted(String),
}

/// Result type for hash table operations
pub type Result<T> = std::result::Result<T, HashTableError>;

enum InsertOutcome {
    Done(bool),
    TableFull(usize),
}

/// Disk-backed linear-probing hash table
///
/// A header page lists the block pages; every `(key, value)` pair lives in
/// a block slot. Probing walks slots in a fixed circular order: next slot,
/// then next block, wrapping at the end of the directory. Removal leaves a
/// tombstone so chains stay connected; a table with no free slot doubles
/// its block count and rehashes.
///
/// The table-wide reader/writer latch is held shared by `get`, `insert`
/// and `remove`, and exclusively by `resize`; it also guards the header
/// page ID that resize swaps.
pub struct LinearProbeHashTable<K, V> {
    buffer_pool: Arc<BufferPoolManager>,
    header_page_id: RwLock<PageId>,
    _marker: PhantomData<(K, V)>,
}

impl<K: SlotValue, V: SlotValue> LinearProbeHashTable<K, V> {
    /// Create a new table with `num_blocks` block pages of `block_size`
    /// slots each
    ///
    /// `block_size` is capped at what physically fits in a block page.
    pub fn new(
        buffer_pool: Arc<BufferPoolManager>,
        num_blocks: usize,
        block_size: usize,
    ) -> Result<Self> {
        let block_size = block_size.clamp(1, HashBlockPage::<K, V>::capacity());
        let header_page_id = Self::build_table(&buffer_pool, num_blocks, block_size)?;
        Ok(Self {
            buffer_pool,
            header_page_id: RwLock::new(header_page_id),
            _marker: PhantomData,
        })
    }

    /// Reattach to a table persisted under an existing header page
    pub fn open(buffer_pool: Arc<BufferPoolManager>, header_page_id: PageId) -> Self {
        Self {
            buffer_pool,
            header_page_id: RwLock::new(header_page_id),
            _marker: PhantomData,
        }
    }

    pub fn header_page_id(&self) -> PageId {
        *self.header_page_id.read()
    }

    /// Current number of block pages
    pub fn num_blocks(&self) -> Result<usize> {
        let header_guard = self.header_page_id.read();
        let (block_ids, _) = self.read_directory(*header_guard)?;
        Ok(block_ids.len())
    }

    /// Collect every value stored under `key`
    pub fn get(&self, key: &K) -> Result<Vec<V>> {
        let header_guard = self.header_page_id.read();
        let (block_ids, block_size) = self.read_directory(*header_guard)?;
        self.probe_collect(&block_ids, block_size, key)
    }

    /// Insert a `(key, value)` pair
    ///
    /// Duplicate pairs are rejected with `Ok(false)`. A completely full
    /// table is resized and the insert retried.
    pub fn insert(&self, key: &K, value: &V) -> Result<bool> {
        loop {
            let outcome = {
                let header_guard = self.header_page_id.read();
                self.try_insert(*header_guard, key, value)?
            };
            // The table latch is released before resizing
            match outcome {
                InsertOutcome::Done(inserted) => return Ok(inserted),
                InsertOutcome::TableFull(num_blocks) => self.resize(num_blocks)?,
            }
        }
    }

    /// Remove the exact `(key, value)` pair, leaving a tombstone
    pub fn remove(&self, key: &K, value: &V) -> Result<bool> {
        let header_guard = self.header_page_id.read();
        let (block_ids, block_size) = self.read_directory(*header_guard)?;

        let total = block_ids.len() * block_size;
        let start = Self::start_position(key, block_ids.len(), block_size);

        let mut pos = 0;
        let mut removed = false;
        let mut done = false;
        while pos < total && !done {
            let global = (start + pos) % total;
            let first_slot = global % block_size;
            let span = (block_size - first_slot).min(total - pos);
            let block_page_id = block_ids[global / block_size];

            let block = self.buffer_pool.fetch_page(block_page_id)?;
            let mut dirtied = false;
            {
                let mut page = block.write();
                for i in 0..span {
                    let slot = first_slot + i;
                    if !HashBlockPage::<K, V>::is_occupied(&page, slot) {
                        done = true;
                        break;
                    }
                    if HashBlockPage::<K, V>::is_readable(&page, slot)
                        && HashBlockPage::<K, V>::key_at(&page, slot) == *key
                        && HashBlockPage::<K, V>::value_at(&page, slot) == *value
                    {
                        HashBlockPage::<K, V>::remove(&mut page, slot);
                        dirtied = true;
                        removed = true;
                        done = true;
                        break;
                    }
                }
            }
            self.buffer_pool.unpin_page(block_page_id, dirtied)?;
            pos += span;
        }

        Ok(removed)
    }

    /// Double the block count and rehash every live entry
    ///
    /// `current_num_blocks` is the directory size the caller saw; if the
    /// table already grew past it another thread won the race and this
    /// call is a no-op.
    pub fn resize(&self, current_num_blocks: usize) -> Result<()> {
        let mut header_guard = self.header_page_id.write();
        let old_header_page_id = *header_guard;
        let (old_ids, block_size) = self.read_directory(old_header_page_id)?;

        if old_ids.len() >= 2 * current_num_blocks {
            return Ok(());
        }

        debug!(
            "resizing hash table {}: {} -> {} blocks",
            old_header_page_id,
            old_ids.len(),
            2 * current_num_blocks
        );

        let new_header_page_id =
            Self::build_table(&self.buffer_pool, 2 * current_num_blocks, block_size)?;
        let (new_ids, _) = self.read_directory(new_header_page_id)?;

        for &old_block_id in &old_ids {
            let block = self.buffer_pool.fetch_page(old_block_id)?;
            let entries: Vec<(K, V)> = {
                let page = block.read();
                (0..block_size)
                    .filter(|&slot| HashBlockPage::<K, V>::is_readable(&page, slot))
                    .map(|slot| {
                        (
                            HashBlockPage::<K, V>::key_at(&page, slot),
                            HashBlockPage::<K, V>::value_at(&page, slot),
                        )
                    })
                    .collect()
            };
            self.buffer_pool.unpin_page(old_block_id, false)?;

            for (key, value) in entries {
                if !self.probe_insert(&new_ids, block_size, &key, &value)? {
                    return Err(HashTableError::Corrupted(
                        "rebuilt table ran out of slots".to_string(),
                    ));
                }
            }
        }

        // Release the old pages only once the new table holds everything
        for &old_block_id in &old_ids {
            self.buffer_pool.delete_page(old_block_id)?;
        }
        self.buffer_pool.delete_page(old_header_page_id)?;

        *header_guard = new_header_page_id;
        Ok(())
    }

    /// Allocate and link a header page plus `num_blocks` empty block pages
    fn build_table(
        buffer_pool: &Arc<BufferPoolManager>,
        num_blocks: usize,
        block_size: usize,
    ) -> Result<PageId> {
        let (header, header_page_id) = buffer_pool.new_page()?;
        {
            let mut page = header.write();
            HashHeaderPage::init(&mut page, header_page_id, block_size);
        }

        for _ in 0..num_blocks {
            let (_block, block_page_id) = buffer_pool.new_page()?;
            {
                let mut page = header.write();
                HashHeaderPage::add_block_page_id(&mut page, block_page_id);
            }
            // A zeroed page is a valid empty block; both bitmaps are clear
            buffer_pool.unpin_page(block_page_id, true)?;
        }

        buffer_pool.unpin_page(header_page_id, true)?;
        Ok(header_page_id)
    }

    fn try_insert(&self, header_page_id: PageId, key: &K, value: &V) -> Result<InsertOutcome> {
        let (block_ids, block_size) = self.read_directory(header_page_id)?;

        // Duplicate (key, value) pairs are not allowed
        let existing = self.probe_collect(&block_ids, block_size, key)?;
        if existing.iter().any(|v| v == value) {
            return Ok(InsertOutcome::Done(false));
        }

        if self.probe_insert(&block_ids, block_size, key, value)? {
            Ok(InsertOutcome::Done(true))
        } else {
            Ok(InsertOutcome::TableFull(block_ids.len()))
        }
    }

    /// Walk the probe order and collect values for `key`, stopping at the
    /// first never-used slot or after a full wrap
    fn probe_collect(
        &self,
        block_ids: &[PageId],
        block_size: usize,
        key: &K,
    ) -> Result<Vec<V>> {
        let total = block_ids.len() * block_size;
        let start = Self::start_position(key, block_ids.len(), block_size);

        let mut result = Vec::new();
        let mut pos = 0;
        let mut done = false;
        while pos < total && !done {
            let global = (start + pos) % total;
            let first_slot = global % block_size;
            let span = (block_size - first_slot).min(total - pos);
            let block_page_id = block_ids[global / block_size];

            let block = self.buffer_pool.fetch_page(block_page_id)?;
            {
                let page = block.read();
                for i in 0..span {
                    let slot = first_slot + i;
                    if !HashBlockPage::<K, V>::is_occupied(&page, slot) {
                        done = true;
                        break;
                    }
                    if HashBlockPage::<K, V>::is_readable(&page, slot)
                        && HashBlockPage::<K, V>::key_at(&page, slot) == *key
                    {
                        result.push(HashBlockPage::<K, V>::value_at(&page, slot));
                    }
                }
            }
            self.buffer_pool.unpin_page(block_page_id, false)?;
            pos += span;
        }

        Ok(result)
    }

    /// Walk the probe order and store the pair in the first slot without a
    /// live entry; `false` means a full wrap found none
    fn probe_insert(
        &self,
        block_ids: &[PageId],
        block_size: usize,
        key: &K,
        value: &V,
    ) -> Result<bool> {
        let total = block_ids.len() * block_size;
        let start = Self::start_position(key, block_ids.len(), block_size);

        let mut pos = 0;
        while pos < total {
            let global = (start + pos) % total;
            let first_slot = global % block_size;
            let span = (block_size - first_slot).min(total - pos);
            let block_page_id = block_ids[global / block_size];

            let block = self.buffer_pool.fetch_page(block_page_id)?;
            let mut inserted = false;
            {
                let mut page = block.write();
                for i in 0..span {
                    let slot = first_slot + i;
                    if !HashBlockPage::<K, V>::is_readable(&page, slot) {
                        // Tombstones are reused here
                        inserted = HashBlockPage::<K, V>::insert(&mut page, slot, key, value);
                        break;
                    }
                }
            }
            self.buffer_pool.unpin_page(block_page_id, inserted)?;
            if inserted {
                return Ok(true);
            }
            pos += span;
        }

        Ok(false)
    }

    /// Fetch the header and copy the directory out
    fn read_directory(&self, header_page_id: PageId) -> Result<(Vec<PageId>, usize)> {
        let header = self.buffer_pool.fetch_page(header_page_id)?;
        let (block_ids, block_size) = {
            let page = header.read();
            let num_blocks = HashHeaderPage::num_blocks(&page);
            let block_ids = (0..num_blocks)
                .map(|i| HashHeaderPage::block_page_id(&page, i))
                .collect();
            (block_ids, HashHeaderPage::block_size(&page))
        };
        self.buffer_pool.unpin_page(header_page_id, false)?;
        Ok((block_ids, block_size))
    }

    /// First probe position: `hash mod num_blocks` picks the block,
    /// `hash mod block_size` the slot within it
    fn start_position(key: &K, num_blocks: usize, block_size: usize) -> usize {
        let hash = Self::hash_of(key);
        let block = (hash % num_blocks as u64) as usize;
        let slot = (hash % block_size as u64) as usize;
        block * block_size + slot
    }

    fn hash_of(key: &K) -> u64 {
        let mut buf = vec![0u8; K::ENCODED_SIZE];
        key.encode_into(&mut buf);
        xxh3_64(&buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::TempDir;
    use crate::storage::disk::DiskManager;

    fn create_pool(pool_size: usize) -> (Arc<BufferPoolManager>, TempDir) {
        let dir = TempDir::new().unwrap();
        let disk = Arc::new(
            DiskManager::new(dir.path().join("test.db"), dir.path().join("test.log")).unwrap(),
        );
        (Arc::new(BufferPoolManager::new(pool_size, disk)), dir)
    }

    #[test]
    fn test_insert_get_remove_with_duplicates() {
        let (pool, _dir) = create_pool(16);
        let table: LinearProbeHashTable<i32, i32> =
            LinearProbeHashTable::new(pool, 4, 64).unwrap();

        for i in 0..5 {
            assert!(table.insert(&i, &i).unwrap());
            assert_eq!(table.get(&i).unwrap(), vec![i]);
        }

        // A second value under the same key is fine; the same pair is not
        for i in 0..5 {
            if i == 0 {
                assert!(!table.insert(&i, &(2 * i)).unwrap());
                assert_eq!(table.get(&i).unwrap(), vec![0]);
            } else {
                assert!(table.insert(&i, &(2 * i)).unwrap());
                let mut values = table.get(&i).unwrap();
                values.sort_unstable();
                assert_eq!(values, vec![i, 2 * i]);
            }
        }

        // Unknown key
        assert!(table.get(&20).unwrap().is_empty());

        // Remove the first value of each key
        for i in 0..5 {
            assert!(table.remove(&i, &i).unwrap());
            let values = table.get(&i).unwrap();
            if i == 0 {
                assert!(values.is_empty());
            } else {
                assert_eq!(values, vec![2 * i]);
            }
        }

        // Removing an absent pair reports false
        assert!(!table.remove(&0, &0).unwrap());
    }

    #[test]
    fn test_full_table_triggers_exactly_one_resize() {
        let (pool, _dir) = create_pool(16);
        let table: LinearProbeHashTable<i32, i32> =
            LinearProbeHashTable::new(pool, 1, 4).unwrap();
        assert_eq!(table.num_blocks().unwrap(), 1);

        // Four pairs fill the single block; the fifth forces a doubling
        for i in 0..5 {
            assert!(table.insert(&i, &(i * 10)).unwrap());
        }
        assert_eq!(table.num_blocks().unwrap(), 2);

        for i in 0..5 {
            assert_eq!(table.get(&i).unwrap(), vec![i * 10]);
        }
    }

    #[test]
    fn test_tombstone_preserves_probe_chain() {
        let (pool, _dir) = create_pool(16);
        let table: LinearProbeHashTable<i32, i32> =
            LinearProbeHashTable::new(pool, 1, 4).unwrap();

        for i in 0..4 {
            assert!(table.insert(&i, &i).unwrap());
        }

        // Deleting from a full block leaves the chain walkable
        assert!(table.remove(&1, &1).unwrap());
        for i in [0, 2, 3] {
            assert_eq!(table.get(&i).unwrap(), vec![i]);
        }
        assert!(table.get(&1).unwrap().is_empty());

        // The tombstone is reused without growing the table
        assert!(table.insert(&9, &90).unwrap());
        assert_eq!(table.num_blocks().unwrap(), 1);
        assert_eq!(table.get(&9).unwrap(), vec![90]);
    }

    #[test]
    fn test_many_inserts_through_repeated_resizes() {
        let (pool, _dir) = create_pool(32);
        let table: LinearProbeHashTable<i32, i32> =
            LinearProbeHashTable::new(pool, 1, 8).unwrap();

        for i in 0..200 {
            assert!(table.insert(&i, &i).unwrap(), "failed to insert {}", i);
        }
        for i in 0..200 {
            assert_eq!(table.get(&i).unwrap(), vec![i], "failed to keep {}", i);
        }
        assert!(table.num_blocks().unwrap() >= 200 / 8);
    }

    #[test]
    fn test_concurrent_disjoint_inserts() {
        let (pool, _dir) = create_pool(32);
        let table: Arc<LinearProbeHashTable<i32, i32>> =
            Arc::new(LinearProbeHashTable::new(pool, 2, 64).unwrap());

        let mut handles = Vec::new();
        for t in 0..4 {
            let table = Arc::clone(&table);
            handles.push(thread::spawn(move || {
                for i in 0..50 {
                    let key = t * 1000 + i;
                    assert!(table.insert(&key, &key).unwrap());
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        for t in 0..4 {
            for i in 0..50 {
                let key = t * 1000 + i;
                assert_eq!(table.get(&key).unwrap(), vec![key]);
            }
        }
    }
}
