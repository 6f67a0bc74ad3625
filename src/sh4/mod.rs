//! SH-4 core: register file, interrupt controller, MMU, interpreter, and
//! JIT compiler tied together behind one `Sh4` driven one step at a time by
//! the owning system.

pub mod interp;
pub mod interrupt;
pub mod jit;
pub mod mmu;
pub mod regs;

use crate::error::CoreResult;
use crate::memmap::MemMap;
use interp::{DecodeTable, Interp, IssueGroup};
use interrupt::{enter_exception, InterruptController};
use jit::cache::{CodeCache, CompiledBody, JitBlock};
use jit::il::{block_hash, CompileCtx};
use jit::tree_walker::{self, HostCallTable};
use jit::{ineligible_for_jit, JitCompiler};
use mmu::Mmu;
use regs::{Fpscr, RegFile};

pub struct Sh4 {
    pub regs: RegFile,
    pub mmu: Mmu,
    pub interrupts: InterruptController,
    table: DecodeTable,
    cache: CodeCache,
    last_group: IssueGroup,
}

impl Sh4 {
    pub fn new() -> Self {
        Sh4 {
            regs: RegFile::new(),
            mmu: Mmu::new(),
            interrupts: InterruptController::new(),
            table: DecodeTable::build(),
            cache: CodeCache::new(),
            last_group: IssueGroup::None,
        }
    }

    /// Enters the highest-priority pending interrupt's exception vector, if
    /// any. No-op otherwise.
    pub fn service_interrupts(&mut self) {
        if let Some((_, code)) = self.interrupts.pending(self.regs.sr) {
            enter_exception(&mut self.regs, code, true);
            self.interrupts.invalidate();
        }
    }

    fn compile_ctx(&self) -> CompileCtx {
        CompileCtx { pr: self.regs.fpscr.contains(Fpscr::PR), sz: self.regs.fpscr.contains(Fpscr::SZ), in_delay_slot: false }
    }

    /// Runs one unit of execution — a cached or freshly-compiled JIT block
    /// of straight-line instructions, or (for branch-adjacent and
    /// MMU-sensitive PCs) a single interpreted instruction — and returns
    /// the scheduler-chargeable SH-4 cycle count.
    pub fn step(&mut self, mem: &mut MemMap) -> CoreResult<u64> {
        self.service_interrupts();
        let pc = self.regs.pc;

        if ineligible_for_jit(pc, &self.mmu) {
            let mut interp = Interp::new(&mut self.regs, mem, &mut self.mmu);
            return interp.step(&self.table, &mut self.last_group).map(|c| c as u64);
        }

        let ctx = self.compile_ctx();
        let hash = block_hash(pc, ctx.pr, ctx.sz);
        if self.cache.lookup(hash).is_none() {
            let compiler = JitCompiler::new(&self.table);
            let il = compiler.compile(mem, pc, ctx)?;
            self.cache.insert(JitBlock { hash, guest_pc: pc, body: CompiledBody::TreeWalker(il), profile_count: 0 });
        }
        let block = self.cache.lookup(hash).expect("just inserted");
        let il = match &block.body {
            CompiledBody::TreeWalker(il) => il,
            CompiledBody::Native(_) => unreachable!("native backend selection happens at insert time, not lookup"),
        };

        if il.ops.is_empty() {
            // The block at this PC is a single branch/Co-group instruction;
            // nothing was compiled. Step it directly.
            let mut interp = Interp::new(&mut self.regs, mem, &mut self.mmu);
            return interp.step(&self.table, &mut self.last_group).map(|c| c as u64);
        }

        let hosts = HostCallTable { funcs0: &[], funcs1: &[] };
        let result = tree_walker::run_block(il, &mut self.regs, mem, &mut self.mmu, &self.table, &hosts)?;
        self.regs.pc = result.next_pc;
        Ok(result.cycles.max(1))
    }

    pub fn invalidate_code_cache(&mut self) {
        self.cache.invalidate_all();
    }

    /// Number of blocks currently resident in the JIT code cache.
    pub fn code_cache_len(&self) -> usize {
        self.cache.len()
    }
}

impl Default for Sh4 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memmap::{MemMapBuilder, Ram, RAM_SIZE};

    fn make_map() -> MemMap {
        MemMapBuilder::new()
            .ram("ram", 0x0c00_0000, 0x0cff_ffff, 0x1fff_ffff, 0x00ff_ffff, Ram::new(RAM_SIZE))
            .build()
    }

    #[test]
    fn jit_block_runs_then_interpreter_handles_the_branch() {
        let mut mem = make_map();
        let base = 0x8c01_0000u32;
        // MOV #5,R1 ; ADD #3,R1 ; RTS ; NOP
        let words = [0xe105u16, 0x7103, 0x000b, 0x0009];
        for (i, w) in words.iter().enumerate() {
            mem.write16(base + (i as u32) * 2, *w).unwrap();
        }
        let mut sh4 = Sh4::new();
        sh4.regs.pc = base;
        sh4.regs.pr = 0x8c02_0000;
        for _ in 0..8 {
            if sh4.regs.pc == 0x8c02_0000 {
                break;
            }
            sh4.step(&mut mem).unwrap();
        }
        assert_eq!(sh4.regs.pc, 0x8c02_0000);
        assert_eq!(sh4.regs.r[1], 8);
    }

    #[test]
    fn recompiling_the_same_pc_reuses_the_cached_block() {
        let mut mem = make_map();
        let base = 0x8c00_2000u32;
        let words = [0xe001u16, 0x000b, 0x0009]; // MOV #1,R0 ; RTS ; NOP
        for (i, w) in words.iter().enumerate() {
            mem.write16(base + (i as u32) * 2, *w).unwrap();
        }
        let mut sh4 = Sh4::new();
        sh4.regs.pc = base;
        sh4.regs.pr = base;
        sh4.step(&mut mem).unwrap(); // compiles + runs the MOV block
        sh4.regs.pc = base; // re-enter the same block
        sh4.regs.r[0] = 0;
        sh4.step(&mut mem).unwrap();
        assert_eq!(sh4.regs.r[0], 1);
    }
}
