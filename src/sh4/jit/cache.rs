//! Hash-indexed JIT block cache.
//!
//! Invalidation is wholesale, matching the real hardware's only observable
//! cache-flush knob (an SH-4 instruction-cache address-array write):
//! `invalidate_all` drops every compiled block rather than tracking which
//! guest addresses each block actually read from.

use std::collections::HashMap;

use log::debug;

use super::il::{IlBuilder, ResidencyMap};

pub enum CompiledBody {
    TreeWalker(IlBuilder),
    #[allow(dead_code)]
    Native(super::x86_64::NativeBlock),
}

pub struct JitBlock {
    pub hash: u32,
    pub guest_pc: u32,
    pub body: CompiledBody,
    pub profile_count: u64,
}

pub struct CodeCache {
    blocks: HashMap<u32, JitBlock>,
}

impl CodeCache {
    pub fn new() -> Self {
        CodeCache { blocks: HashMap::new() }
    }

    pub fn lookup(&mut self, hash: u32) -> Option<&mut JitBlock> {
        if let Some(b) = self.blocks.get_mut(&hash) {
            b.profile_count += 1;
            Some(b)
        } else {
            None
        }
    }

    pub fn insert(&mut self, block: JitBlock) {
        debug_assert_eq!(block.hash & 0x1fff_ffff, block.guest_pc & 0x1fff_ffff);
        self.blocks.insert(block.hash, block);
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Wholesale invalidation: the only mutation a compiled block is ever
    /// subjected to after it's built, since blocks are otherwise immutable.
    pub fn invalidate_all(&mut self) {
        debug!("jit: invalidating code cache ({} blocks)", self.blocks.len());
        self.blocks.clear();
    }
}

impl Default for CodeCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-cache-lifetime-but-not-per-block scratch state a compiler needs while
/// building one block: the IL builder and its residency map. Kept as a
/// separate type (rather than folded into `JitBlock`) because it is
/// reconstructed fresh for each compile and discarded once the block is
/// committed to the cache.
pub struct BlockBuilder {
    pub il: IlBuilder,
    pub residency: ResidencyMap,
}

impl BlockBuilder {
    pub fn new() -> Self {
        BlockBuilder { il: IlBuilder::new(), residency: ResidencyMap::new() }
    }
}

impl Default for BlockBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sh4::jit::il::block_hash;

    #[test]
    fn insert_and_lookup_by_hash() {
        let mut cache = CodeCache::new();
        let pc = 0x8c00_1000;
        let hash = block_hash(pc, false, false);
        cache.insert(JitBlock { hash, guest_pc: pc, body: CompiledBody::TreeWalker(IlBuilder::new()), profile_count: 0 });
        assert!(cache.lookup(hash).is_some());
        assert!(cache.lookup(hash ^ 1).is_none());
    }

    #[test]
    fn fpscr_split_keeps_two_independent_blocks() {
        let mut cache = CodeCache::new();
        let pc = 0x8c00_0000;
        let hash_sz0 = block_hash(pc, false, false);
        let hash_sz1 = block_hash(pc, false, true);
        assert_ne!(hash_sz0, hash_sz1);
        cache.insert(JitBlock { hash: hash_sz0, guest_pc: pc, body: CompiledBody::TreeWalker(IlBuilder::new()), profile_count: 0 });
        cache.insert(JitBlock { hash: hash_sz1, guest_pc: pc, body: CompiledBody::TreeWalker(IlBuilder::new()), profile_count: 0 });
        assert_eq!(cache.len(), 2);
        assert!(cache.lookup(hash_sz0).is_some());
        assert!(cache.lookup(hash_sz1).is_some());
    }

    #[test]
    fn invalidate_all_clears_everything() {
        let mut cache = CodeCache::new();
        let hash = block_hash(0x8c00_2000, false, false);
        cache.insert(JitBlock { hash, guest_pc: 0x8c00_2000, body: CompiledBody::TreeWalker(IlBuilder::new()), profile_count: 0 });
        cache.invalidate_all();
        assert!(cache.is_empty());
    }
}
