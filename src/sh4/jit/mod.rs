//! Per-instruction JIT block compiler.
//!
//! Translates the small set of pure-register arithmetic/logic forms
//! directly into IL slots via `ResidencyMap`; routes everything else
//! (condition-setting compares, loads/stores, `SETT`/`CLRT`) through
//! `Fallback`, since none of those read the program counter or take a
//! delay slot, so the interpreter's semantics function can run standalone
//! with no block-local PC tracking. Branch-group instructions are never
//! compiled into a block at all — the block ends one instruction short of
//! them, and the driving loop steps the branch (and its delay slot, if
//! any) through the interpreter directly, which already gets delay-slot
//! sequencing right.

pub mod cache;
pub mod il;
pub mod tree_walker;
pub mod x86_64;

use crate::error::CoreResult;
use crate::memmap::MemMap;
use crate::sh4::interp::{count_inst_cycles, DecodeTable, IssueGroup};
use crate::sh4::mmu::Mmu;
use il::{block_hash, CompileCtx, IlBuilder, IlOp, ResidencyMap, SlotTy};

const MAX_BLOCK_INSTS: usize = 32;

/// Operand-cache RAM window. When `MMUCR.AT` is set, the guest may have
/// remapped this range to plain scratch RAM via the address-array
/// interface; compiling code there would let a stale block survive a
/// remap that never touches the code cache. PCs in this window always run
/// through the interpreter instead.
const OC_RAM_BASE: u32 = 0x7c00_0000;
const OC_RAM_END: u32 = 0x7fff_ffff;

pub fn ineligible_for_jit(pc: u32, mmu: &Mmu) -> bool {
    mmu.enabled() && (OC_RAM_BASE..=OC_RAM_END).contains(&pc)
}

fn n_field(w: u16) -> usize {
    ((w >> 8) & 0xf) as usize
}
fn m_field(w: u16) -> usize {
    ((w >> 4) & 0xf) as usize
}
fn imm8_sext(w: u16) -> u32 {
    (((w & 0xff) as u8 as i8) as i32) as u32
}

pub struct JitCompiler<'t> {
    table: &'t DecodeTable,
}

impl<'t> JitCompiler<'t> {
    pub fn new(table: &'t DecodeTable) -> Self {
        JitCompiler { table }
    }

    /// Compiles one block starting at `pc`, returning its IL. Always
    /// terminates in a `Jump`.
    pub fn compile(&self, mem: &mut MemMap, pc: u32, ctx: CompileCtx) -> CoreResult<IlBuilder> {
        let mut b = IlBuilder::new();
        let mut residency = ResidencyMap::new();
        let mut cur = pc;
        let mut last_group = IssueGroup::None;

        for _ in 0..MAX_BLOCK_INSTS {
            let word = mem.read16(cur)?;
            let op = self.table.decode(word);
            if op.group == IssueGroup::Br || op.group == IssueGroup::Co || op.pc_relative {
                break;
            }
            b.cycles += count_inst_cycles(&op, &mut last_group) as u64;
            if !self.translate_one(&mut b, &mut residency, word) {
                drain_and_fallback(&mut b, &mut residency, word);
            }
            cur = cur.wrapping_add(2);
        }

        if cur == pc {
            // The first instruction in the block is itself branch/Co-group
            // (RTS, BRA, RTE, FSCHG, FRCHG, ...): nothing was translated.
            // Leave the IL genuinely empty so the caller falls back to the
            // interpreter instead of compiling a self-referential jump.
            return Ok(b);
        }

        finish_block(&mut b, &mut residency, cur, ctx);
        b.optimize();
        Ok(b)
    }

    /// Attempts to translate `word` directly into register-slot IL.
    /// Returns `false` if `word` isn't in the hand-translated subset.
    fn translate_one(&self, b: &mut IlBuilder, residency: &mut ResidencyMap, word: u16) -> bool {
        match word {
            w if w == 0x0009 => true, // NOP
            w if w & 0xf000 == 0xe000 => {
                let n = n_field(w);
                let dst = residency.reg_slot_noload(n, SlotTy::Gen32, b);
                b.push(IlOp::LiteralSet { dst, val: imm8_sext(w) });
                true
            }
            w if w & 0xf000 == 0x7000 => {
                let n = n_field(w);
                let rn = residency.reg_slot(n, b, |b| load_reg(b, n));
                let dst = residency.reg_slot_noload(n, SlotTy::Gen32, b);
                b.push(IlOp::AddConst { dst, a: rn, imm: imm8_sext(w) });
                true
            }
            w if w & 0xf00f == 0x300c => {
                let (n, m) = (n_field(w), m_field(w));
                let rn = residency.reg_slot(n, b, |b| load_reg(b, n));
                let rm = residency.reg_slot(m, b, |b| load_reg(b, m));
                let dst = residency.reg_slot_noload(n, SlotTy::Gen32, b);
                b.push(IlOp::Add { dst, a: rn, b: rm });
                true
            }
            w if w & 0xf00f == 0x3008 => {
                let (n, m) = (n_field(w), m_field(w));
                let rn = residency.reg_slot(n, b, |b| load_reg(b, n));
                let rm = residency.reg_slot(m, b, |b| load_reg(b, m));
                let dst = residency.reg_slot_noload(n, SlotTy::Gen32, b);
                b.push(IlOp::Sub { dst, a: rn, b: rm });
                true
            }
            w if w & 0xf00f == 0x6003 => {
                let (n, m) = (n_field(w), m_field(w));
                let rm = residency.reg_slot(m, b, |b| load_reg(b, m));
                let dst = residency.reg_slot_noload(n, SlotTy::Gen32, b);
                b.push(IlOp::AddConst { dst, a: rm, imm: 0 }); // plain copy
                true
            }
            w if w & 0xf00f == 0x2009 => {
                let (n, m) = (n_field(w), m_field(w));
                let rn = residency.reg_slot(n, b, |b| load_reg(b, n));
                let rm = residency.reg_slot(m, b, |b| load_reg(b, m));
                let dst = residency.reg_slot_noload(n, SlotTy::Gen32, b);
                b.push(IlOp::And { dst, a: rn, b: rm });
                true
            }
            w if w & 0xf00f == 0x200a => {
                let (n, m) = (n_field(w), m_field(w));
                let rn = residency.reg_slot(n, b, |b| load_reg(b, n));
                let rm = residency.reg_slot(m, b, |b| load_reg(b, m));
                let dst = residency.reg_slot_noload(n, SlotTy::Gen32, b);
                b.push(IlOp::Xor { dst, a: rn, b: rm });
                true
            }
            w if w & 0xf00f == 0x200b => {
                let (n, m) = (n_field(w), m_field(w));
                let rn = residency.reg_slot(n, b, |b| load_reg(b, n));
                let rm = residency.reg_slot(m, b, |b| load_reg(b, m));
                let dst = residency.reg_slot_noload(n, SlotTy::Gen32, b);
                b.push(IlOp::Or { dst, a: rn, b: rm });
                true
            }
            _ => false,
        }
    }
}

fn load_reg(b: &mut IlBuilder, r: usize) -> il::SlotId {
    let s = b.alloc_slot(SlotTy::Gen32);
    b.push(IlOp::LoadReg { dst: s, reg: r });
    s
}

/// Non-branch, non-pc-relative instruction outside the translated subset:
/// drain live slots to the register array, mark the map clean, and drop to
/// the interpreter for just this one word.
fn drain_and_fallback(b: &mut IlBuilder, residency: &mut ResidencyMap, word: u16) {
    residency.drain_all(b, |b, r, slot| b.push(IlOp::StoreReg { reg: r, src: slot }));
    b.push(IlOp::DrainAll);
    b.push(IlOp::InvalidateAll);
    residency.invalidate_all();
    b.push(IlOp::Fallback { inst_word: word });
}

fn finish_block(b: &mut IlBuilder, residency: &mut ResidencyMap, next_pc: u32, ctx: CompileCtx) {
    residency.drain_all(b, |b, r, slot| b.push(IlOp::StoreReg { reg: r, src: slot }));
    let addr = b.alloc_slot(SlotTy::Gen32);
    b.push(IlOp::LiteralSet { dst: addr, val: next_pc });
    b.push(IlOp::Jump { addr_slot: addr, hash_slot: None, const_hash: Some(block_hash(next_pc, ctx.pr, ctx.sz)) });
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
    fn compiles_straight_line_arithmetic_and_stops_before_branch() {
        let mut mem = make_map();
        let base = 0x8c00_0000u32;
        // MOV #5,R1 ; ADD #3,R1 ; RTS (stops here) ; NOP
        let words = [0xe105u16, 0x7103, 0x000b, 0x0009];
        for (i, w) in words.iter().enumerate() {
            mem.write16(base + (i as u32) * 2, *w).unwrap();
        }
        let table = DecodeTable::build();
        let compiler = JitCompiler::new(&table);
        let ctx = CompileCtx { pr: false, sz: false, in_delay_slot: false };
        let il = compiler.compile(&mut mem, base, ctx).unwrap();

        let fallback_count = il.ops.iter().filter(|op| matches!(op, IlOp::Fallback { .. })).count();
        assert_eq!(fallback_count, 0, "RTS must not be compiled into the block");
        assert!(matches!(il.ops.last(), Some(IlOp::Jump { const_hash: Some(_), .. })));
    }

    #[test]
    fn routes_cmp_through_fallback_without_terminating() {
        let mut mem = make_map();
        let base = 0x8c00_1000u32;
        // CMP/EQ R1,R0 ; MOV #1,R2 ; RTS ; NOP
        let words = [0x3010u16, 0xe201, 0x000b, 0x0009];
        for (i, w) in words.iter().enumerate() {
            mem.write16(base + (i as u32) * 2, *w).unwrap();
        }
        let table = DecodeTable::build();
        let compiler = JitCompiler::new(&table);
        let ctx = CompileCtx { pr: false, sz: false, in_delay_slot: false };
        let il = compiler.compile(&mut mem, base, ctx).unwrap();
        let fallback_count = il.ops.iter().filter(|op| matches!(op, IlOp::Fallback { .. })).count();
        assert_eq!(fallback_count, 1);
        let literal_count = il.ops.iter().filter(|op| matches!(op, IlOp::LiteralSet { val: 1, .. })).count();
        assert_eq!(literal_count, 1, "MOV #1,R2 after the fallback must still be compiled");
    }
}
