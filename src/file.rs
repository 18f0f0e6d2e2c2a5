use std::{cell::RefCell, fs::File};

use crate::{error::Result, Error};
use binary_layout::prelude::*;
use linked_hash_map::LinkedHashMap;
use memmap2::MmapMut;
use serde::{de::DeserializeOwned, Serialize};

define_layout!(block_header, LittleEndian, {
    used_size: u64,
    next_free: u64,
});

const BLOCK_HEADER_SIZE: usize = 16;

/// Marker in the `next_free` header field for blocks that have been handed
/// out by an allocation but not written yet. Freed blocks store their free
/// list link in the same field, so the two states stay distinguishable.
const UNWRITTEN: u64 = u64::MAX;

/// A temporary file divided into equal-sized blocks, each holding one
/// bincode-serialized value of type `B`.
///
/// Blocks are addressed by their index. Deleted blocks are linked into a free
/// list (threaded through the block headers) and reused by later allocations.
/// A small LRU cache of decoded values avoids re-parsing hot blocks.
pub struct TemporaryBlockFile<B> {
    file: File,
    mmap: MmapMut,
    block_size: usize,
    used_blocks: u64,
    free_head: Option<u64>,
    cache: RefCell<LinkedHashMap<u64, B>>,
    cache_capacity: usize,
}

struct BlockHeader {
    used_size: u64,
    next_free: u64,
}

impl BlockHeader {
    fn read(buffer: &[u8]) -> BlockHeader {
        let view = block_header::View::new(buffer);
        BlockHeader {
            used_size: view.used_size().read(),
            next_free: view.next_free().read(),
        }
    }

    fn write(&self, buffer: &mut [u8]) {
        let mut view = block_header::View::new(buffer);
        view.used_size_mut().write(self.used_size);
        view.next_free_mut().write(self.next_free);
    }
}

impl<B> TemporaryBlockFile<B>
where
    B: Serialize + DeserializeOwned + Clone,
{
    /// Create a new temporary file with space for the given number of blocks,
    /// each of which can hold `payload_size` bytes of serialized content.
    pub fn with_capacity(
        capacity: usize,
        payload_size: usize,
        block_cache_size: usize,
    ) -> Result<TemporaryBlockFile<B>> {
        let block_size = BLOCK_HEADER_SIZE + payload_size;
        // The mapped file must have a non-zero length
        let capacity = capacity.max(1);
        let file = tempfile::tempfile()?;
        file.set_len((capacity * block_size).try_into()?)?;
        // Safety: the file is an unnamed temporary owned by this struct, so no
        // other process can truncate it while it is mapped.
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        Ok(TemporaryBlockFile {
            file,
            mmap,
            block_size,
            used_blocks: 0,
            free_head: None,
            cache: RefCell::new(LinkedHashMap::new()),
            cache_capacity: block_cache_size,
        })
    }

    pub fn get(&self, block_index: u64) -> Result<B> {
        // Read the size of the stored content, this also checks the block exists
        let header = self.block_header(block_index)?;
        let used_size: usize = header.used_size.try_into()?;
        if used_size == 0 {
            // Allocated but never written, or already freed
            return Err(Error::UnknownBlock { block: block_index });
        }

        if let Some(cached) = self.cache.borrow_mut().get_refresh(&block_index) {
            return Ok(cached.clone());
        }

        // Deserialize and return
        let offset = self.block_offset(block_index)?;
        let block_start = offset + BLOCK_HEADER_SIZE;
        let block_end = block_start + used_size;
        let result: B = bincode::deserialize(&self.mmap[block_start..block_end])?;
        self.insert_into_cache(block_index, result.clone());
        Ok(result)
    }

    pub fn can_update(&self, block_index: u64, block: &B) -> Result<u64> {
        if block_index >= self.used_blocks {
            return Err(Error::UnknownBlock { block: block_index });
        }

        // Get the new size and check it still fits into the uniform block payload
        let new_size = bincode::serialized_size(block)?;
        if new_size <= (self.block_size - BLOCK_HEADER_SIZE) as u64 {
            Ok(new_size)
        } else {
            Err(Error::ExistingBlockTooSmall { block: block_index })
        }
    }

    pub fn put(&mut self, block_index: u64, block: &B) -> Result<()> {
        // Check the serialized content fits into the block
        let new_used_size = self.can_update(block_index, block)?;

        // Update the header with the new size
        let offset = self.block_offset(block_index)?;
        let header = BlockHeader {
            used_size: new_used_size,
            next_free: 0,
        };
        header.write(&mut self.mmap[offset..offset + BLOCK_HEADER_SIZE]);

        // Serialize the block and write it at the proper location in the file
        let block_start = offset + BLOCK_HEADER_SIZE;
        let block_end = offset + self.block_size;
        bincode::serialize_into(&mut self.mmap[block_start..block_end], block)?;

        self.insert_into_cache(block_index, block.clone());
        Ok(())
    }

    /// Allocate a new block, either by reusing a freed one or by growing the file.
    ///
    /// The block starts out empty: it has to be written with [`put`](Self::put)
    /// before it can be read back.
    pub fn allocate_block(&mut self) -> Result<u64> {
        let block_index = if let Some(free) = self.free_head {
            // Reuse the first block of the free list and unlink it
            let header = self.block_header(free)?;
            self.free_head = if header.next_free == 0 {
                None
            } else {
                Some(header.next_free - 1)
            };
            free
        } else {
            // Make sure we still have enough space left
            let block_index = self.used_blocks;
            let new_size = usize::try_from(block_index + 1)? * self.block_size;
            self.grow(new_size)?;
            self.used_blocks += 1;
            block_index
        };

        let offset = self.block_offset(block_index)?;
        let header = BlockHeader {
            used_size: 0,
            next_free: UNWRITTEN,
        };
        header.write(&mut self.mmap[offset..offset + BLOCK_HEADER_SIZE]);
        Ok(block_index)
    }

    /// Give the storage of a block back so it can be reused.
    ///
    /// Any allocated block can be deleted, whether it has been written or
    /// not. Deleting a block that does not exist (anymore) has no effect. A
    /// deleted block must not be written again before it has been handed out
    /// by a new allocation, its header now links the free list.
    pub fn delete(&mut self, block_index: u64) -> Result<()> {
        if block_index >= self.used_blocks {
            return Ok(());
        }
        let offset = self.block_offset(block_index)?;
        let mut header = BlockHeader::read(&self.mmap[offset..offset + BLOCK_HEADER_SIZE]);
        if header.used_size == 0 && header.next_free != UNWRITTEN {
            // Already on the free list
            return Ok(());
        }

        // Link the block into the free list, the index is stored off by one so
        // that zero can mark the end of the list
        header.used_size = 0;
        header.next_free = self.free_head.map_or(0, |f| f + 1);
        header.write(&mut self.mmap[offset..offset + BLOCK_HEADER_SIZE]);
        self.free_head = Some(block_index);

        self.cache.borrow_mut().remove(&block_index);
        Ok(())
    }

    fn block_header(&self, block_index: u64) -> Result<BlockHeader> {
        if block_index >= self.used_blocks {
            return Err(Error::UnknownBlock { block: block_index });
        }
        let offset = self.block_offset(block_index)?;
        Ok(BlockHeader::read(
            &self.mmap[offset..offset + BLOCK_HEADER_SIZE],
        ))
    }

    fn block_offset(&self, block_index: u64) -> Result<usize> {
        let block_index: usize = block_index.try_into()?;
        Ok(block_index * self.block_size)
    }

    fn insert_into_cache(&self, block_index: u64, block: B) {
        if self.cache_capacity == 0 {
            return;
        }
        let mut cache = self.cache.borrow_mut();
        cache.insert(block_index, block);
        if cache.len() > self.cache_capacity {
            cache.pop_front();
        }
    }

    /// Grows the file to contain at least the requested number of bytes.
    /// To avoid re-mapping too often, the file size is at least doubled.
    fn grow(&mut self, requested_size: usize) -> Result<()> {
        if requested_size <= self.mmap.len() {
            // Still enough space, no action required
            return Ok(());
        }

        // Allocate at least twice the old file size so we don't need to grow too often
        let new_size = requested_size.max(self.mmap.len() * 2);
        self.file.set_len(new_size.try_into()?)?;
        // Safety: see with_capacity, the mapped file is private to this struct.
        self.mmap = unsafe { MmapMut::map_mut(&self.file)? };
        Ok(())
    }
}
