use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use isaac_rs::{
    pluggables::{BlockStorage, StorageError},
    types::{block::Block, data_types::Height},
};

/// An in-memory block storage. Clones share the same blocks.
#[derive(Clone, Default)]
pub(crate) struct MemStorage(Arc<Mutex<BTreeMap<Height, Block>>>);

impl MemStorage {
    pub(crate) fn new() -> MemStorage {
        MemStorage::default()
    }

    pub(crate) fn with_blocks(blocks: &[Block]) -> MemStorage {
        let storage = MemStorage::new();
        for block in blocks {
            storage.store_block(block.clone()).unwrap();
        }
        storage
    }

    pub(crate) fn last_height(&self) -> Height {
        self.0
            .lock()
            .unwrap()
            .keys()
            .next_back()
            .copied()
            .unwrap_or(Height::PRE_GENESIS)
    }
}

impl BlockStorage for MemStorage {
    fn last_block(&self) -> Result<Option<Block>, StorageError> {
        Ok(self.0.lock().unwrap().values().next_back().cloned())
    }

    fn block(&self, height: Height) -> Result<Option<Block>, StorageError> {
        Ok(self.0.lock().unwrap().get(&height).cloned())
    }

    fn store_block(&self, block: Block) -> Result<(), StorageError> {
        let mut blocks = self.0.lock().unwrap();
        let expected = blocks
            .keys()
            .next_back()
            .map(|last| *last + 1)
            .unwrap_or(Height::GENESIS);
        if block.height() != expected {
            return Err(StorageError::NotContinuous {
                expected,
                got: block.height(),
            });
        }
        blocks.insert(block.height(), block);
        Ok(())
    }
}
