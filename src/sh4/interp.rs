//! SH-4 interpreter: decode table + per-opcode semantics.
//!
//! Rather than pattern-matching the raw opcode word at execute time, the
//! SH-4's fixed 16-bit instruction width makes a precomputed LUT over all
//! 65536 encodings practical: built once at init, so decode is O(1) per
//! fetch. This file builds that LUT from a table of
//! `(mask, pattern, semantics)` entries, matched against the opcode word
//! once at startup instead of on every fetch.
//!
//! Coverage: the common arithmetic/logic/load-store/branch forms are
//! implemented with full semantics. Every other encoding decodes to
//! `Unimplemented` rather than panicking — a recoverable error kind
//! distinct from `Integrity`, since an unimplemented opcode is a coverage
//! gap rather than a corrupted invariant.

use log::trace;

use crate::error::{CoreError, CoreResult};
use crate::memmap::MemMap;
use crate::sh4::mmu::{Mmu, TranslateOutcome};
use crate::sh4::regs::{Fpscr, RegFile, Sr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueGroup {
    Mt,
    Ex,
    Br,
    Ls,
    Fe,
    Co,
    None,
}

pub type SemanticFn = fn(&mut Interp, u16) -> CoreResult<()>;

#[derive(Clone, Copy)]
pub struct InstOpcode {
    pub name: &'static str,
    pub semantics: SemanticFn,
    pub group: IssueGroup,
    pub cycles: u8,
    /// True for instructions that read PC relatively (illegal in a delay
    /// slot, since the delay slot's own PC is ambiguous).
    pub pc_relative: bool,
}

fn unimplemented(_interp: &mut Interp, word: u16) -> CoreResult<()> {
    Err(CoreError::Unimplemented(format!("opcode {word:#06x}")))
}

const UNIMPLEMENTED: InstOpcode =
    InstOpcode { name: "unimplemented", semantics: unimplemented, group: IssueGroup::None, cycles: 0, pc_relative: false };

/// One entry of the hand-authored pattern table: bit-pattern strings where
/// `1`/`0` are fixed bits and anything else (`n`, `m`, `i`, `d`) is a
/// don't-care operand field.
struct Pattern {
    mask: u16,
    bits: u16,
    op: InstOpcode,
}

macro_rules! pattern {
    ($fmt:expr, $name:expr, $f:expr, $group:expr, $cycles:expr, $pcrel:expr) => {{
        let (mask, bits) = compile_pattern($fmt);
        Pattern { mask, bits, op: InstOpcode { name: $name, semantics: $f, group: $group, cycles: $cycles, pc_relative: $pcrel } }
    }};
}

const fn compile_pattern(fmt: &str) -> (u16, u16) {
    let bytes = fmt.as_bytes();
    let mut mask = 0u16;
    let mut bits = 0u16;
    let mut i = 0;
    // fmt is 16 chars of '1'/'0'/other, MSB first.
    while i < 16 {
        let c = bytes[i];
        mask <<= 1;
        bits <<= 1;
        if c == b'1' {
            mask |= 1;
            bits |= 1;
        } else if c == b'0' {
            mask |= 1;
        }
        i += 1;
    }
    (mask, bits)
}

fn patterns() -> Vec<Pattern> {
    use IssueGroup::*;
    vec![
        pattern!("0000000000001001", "NOP", op_nop, Mt, 1, false),
        pattern!("0000nnnn00101011", "RTE", op_rte, Co, 5, false),
        pattern!("0000nnnn00001011", "RTS", op_rts, Br, 2, false),
        pattern!("1110nnnniiiiiiii", "MOV #imm,Rn", op_mov_imm, Ex, 1, false),
        pattern!("0111nnnniiiiiiii", "ADD #imm,Rn", op_add_imm, Ex, 1, false),
        pattern!("0011nnnnmmmm1100", "ADD Rm,Rn", op_add_rm_rn, Ex, 1, false),
        pattern!("0011nnnnmmmm1000", "SUB Rm,Rn", op_sub_rm_rn, Ex, 1, false),
        pattern!("0110nnnnmmmm0011", "MOV Rm,Rn", op_mov_rm_rn, Mt, 1, false),
        pattern!("0010nnnnmmmm1001", "AND Rm,Rn", op_and_rm_rn, Ex, 1, false),
        pattern!("0010nnnnmmmm1010", "XOR Rm,Rn", op_xor_rm_rn, Ex, 1, false),
        pattern!("0010nnnnmmmm1011", "OR Rm,Rn", op_or_rm_rn, Ex, 1, false),
        pattern!("0011nnnnmmmm0000", "CMP/EQ Rm,Rn", op_cmp_eq_rm_rn, Mt, 1, false),
        pattern!("1000100011dddddd", "CMP/EQ #imm,R0", op_cmp_eq_imm, Ex, 1, false),
        pattern!("1010dddddddddddd", "BRA disp", op_bra, Br, 2, true),
        pattern!("1000101ddddddddd", "BT disp", op_bt, Br, 1, true),
        pattern!("1000100111dddddd", "BF disp", op_bf_s, Br, 1, true),
        pattern!("0110nnnnmmmm0010", "MOV.L @Rm,Rn", op_movl_load, Ls, 1, false),
        pattern!("0010nnnnmmmm0010", "MOV.L Rm,@Rn", op_movl_store, Ls, 1, false),
        pattern!("0000000000011000", "SETT", op_sett, Mt, 1, false),
        pattern!("0000000000001000", "CLRT", op_clrt, Mt, 1, false),
        pattern!("0100nnnn00101011", "JMP @Rn", op_jmp, Br, 2, false),
        pattern!("0100nnnn00001011", "JSR @Rn", op_jsr, Br, 2, false),
        pattern!("1111001111111101", "FSCHG", op_fschg, Co, 1, false),
        pattern!("1111101111111101", "FRCHG", op_frchg, Co, 1, false),
    ]
}

pub struct DecodeTable {
    table: Vec<InstOpcode>,
}

impl DecodeTable {
    pub fn build() -> Self {
        let mut table = vec![UNIMPLEMENTED; 65536];
        for p in patterns() {
            for word in 0..=0xffffu32 {
                if (word as u16) & p.mask == p.bits {
                    table[word as usize] = p.op;
                }
            }
        }
        DecodeTable { table }
    }

    pub fn decode(&self, word: u16) -> InstOpcode {
        self.table[word as usize]
    }
}

fn n_field(word: u16) -> usize {
    ((word >> 8) & 0xf) as usize
}
fn m_field(word: u16) -> usize {
    ((word >> 4) & 0xf) as usize
}
fn imm8(word: u16) -> u8 {
    (word & 0xff) as u8
}
fn disp8(word: u16) -> i32 {
    ((word & 0xff) as i8) as i32
}
fn disp12(word: u16) -> i32 {
    let raw = word & 0xfff;
    if raw & 0x800 != 0 {
        (raw as i32) - 0x1000
    } else {
        raw as i32
    }
}

/// Dual-issue cycle-group approximation: an instruction is
/// "free" when the previous instruction was non-CO, this one is non-CO, and
/// the groups differ (MT-after-MT is still charged).
pub fn count_inst_cycles(op: &InstOpcode, last_group: &mut IssueGroup) -> u8 {
    let free = *last_group != IssueGroup::Co
        && op.group != IssueGroup::Co
        && op.group != *last_group;
    let charge = if free { 0 } else { op.cycles };
    *last_group = op.group;
    charge
}

/// Borrowed CPU context the semantic functions operate on: register file,
/// memory map, delay-slot state, and execution-state machine.
pub struct Interp<'a> {
    pub regs: &'a mut RegFile,
    pub mem: &'a mut MemMap,
    pub mmu: &'a mut Mmu,
    pub delayed_branch: bool,
    pub delayed_branch_addr: u32,
    pub halted: bool,
}

impl<'a> Interp<'a> {
    pub fn new(regs: &'a mut RegFile, mem: &'a mut MemMap, mmu: &'a mut Mmu) -> Self {
        Interp { regs, mem, mmu, delayed_branch: false, delayed_branch_addr: 0, halted: false }
    }

    fn set_t(&mut self, val: bool) {
        let sr = if val { self.regs.sr | Sr::T } else { self.regs.sr & !Sr::T };
        self.regs.set_sr(sr);
    }

    fn branch_to(&mut self, target: u32) {
        self.delayed_branch = true;
        self.delayed_branch_addr = target;
    }

    /// Runs `vaddr` through the ITLB when address translation is enabled,
    /// returning the physical address to actually fetch from.
    fn translate_inst_addr(&mut self, vaddr: u32) -> CoreResult<u32> {
        if !self.mmu.enabled() {
            return Ok(vaddr);
        }
        match self.mmu.translate_inst(vaddr) {
            TranslateOutcome::Success(ppn) => Ok(ppn),
            TranslateOutcome::Miss => Err(CoreError::Integrity(format!("ITLB miss fetching {vaddr:#010x}"))),
            TranslateOutcome::ProtViol => Err(CoreError::Integrity(format!("ITLB protection violation fetching {vaddr:#010x}"))),
            TranslateOutcome::InitialWrite => Err(CoreError::Integrity(format!("ITLB initial-write fault fetching {vaddr:#010x}"))),
        }
    }

    /// Runs `vaddr` through the UTLB when address translation is enabled,
    /// returning the physical address a load/store should actually touch.
    fn translate_data_addr(&mut self, vaddr: u32, is_write: bool) -> CoreResult<u32> {
        if !self.mmu.enabled() {
            return Ok(vaddr);
        }
        match self.mmu.translate_data(vaddr, is_write) {
            TranslateOutcome::Success(ppn) => Ok(ppn),
            TranslateOutcome::Miss => Err(CoreError::Integrity(format!("UTLB miss accessing {vaddr:#010x}"))),
            TranslateOutcome::ProtViol => Err(CoreError::Integrity(format!("UTLB protection violation accessing {vaddr:#010x}"))),
            TranslateOutcome::InitialWrite => Err(CoreError::Integrity(format!("UTLB initial-write fault accessing {vaddr:#010x}"))),
        }
    }

    /// Runs one fetch-decode-execute step, including delay-slot follow-up.
    /// Returns the number of scheduler-chargeable cycles consumed.
    pub fn step(&mut self, table: &DecodeTable, last_group: &mut IssueGroup) -> CoreResult<u8> {
        let pc = self.regs.pc;
        let fetch_addr = self.translate_inst_addr(pc)?;
        let word = self.mem.read16(fetch_addr)?;
        let op = table.decode(word);
        trace!("{:#010x}: {:04x} {}", pc, word, op.name);
        self.regs.pc = pc.wrapping_add(2);
        (op.semantics)(self, word)?;
        let cycles = count_inst_cycles(&op, last_group);

        if self.delayed_branch {
            let slot_pc = self.regs.pc;
            let slot_fetch_addr = self.translate_inst_addr(slot_pc)?;
            let slot_word = self.mem.read16(slot_fetch_addr)?;
            let slot_op = table.decode(slot_word);
            if slot_op.pc_relative {
                return Err(CoreError::Integrity(
                    "SLOT_ILLEGAL_INST: pc-relative instruction in delay slot".into(),
                ));
            }
            self.regs.pc = slot_pc.wrapping_add(2);
            (slot_op.semantics)(self, slot_word)?;
            let slot_cycles = count_inst_cycles(&slot_op, last_group);
            self.regs.pc = self.delayed_branch_addr;
            self.delayed_branch = false;
            return Ok(cycles + slot_cycles);
        }
        Ok(cycles)
    }
}

// ---- semantics -------------------------------------------------------

fn op_nop(_i: &mut Interp, _w: u16) -> CoreResult<()> {
    Ok(())
}

fn op_rte(i: &mut Interp, _w: u16) -> CoreResult<()> {
    super::interrupt::rte(i.regs);
    // RTE's own jump takes effect via the delay slot mechanism too, on real
    // hardware; for the interpreter's purposes the PC is already set, so we
    // mark no further delayed branch.
    Ok(())
}

fn op_rts(i: &mut Interp, _w: u16) -> CoreResult<()> {
    let target = i.regs.pr;
    i.branch_to(target);
    Ok(())
}

fn op_mov_imm(i: &mut Interp, w: u16) -> CoreResult<()> {
    let n = n_field(w);
    let imm = (imm8(w) as i8) as i32; // sign-extended 8-bit imm
    i.regs.r[n] = imm as u32;
    Ok(())
}

fn op_add_imm(i: &mut Interp, w: u16) -> CoreResult<()> {
    let n = n_field(w);
    let imm = (imm8(w) as i8) as i32;
    i.regs.r[n] = (i.regs.r[n] as i32).wrapping_add(imm) as u32;
    Ok(())
}

fn op_add_rm_rn(i: &mut Interp, w: u16) -> CoreResult<()> {
    let n = n_field(w);
    let m = m_field(w);
    i.regs.r[n] = i.regs.r[n].wrapping_add(i.regs.r[m]);
    Ok(())
}

fn op_sub_rm_rn(i: &mut Interp, w: u16) -> CoreResult<()> {
    let n = n_field(w);
    let m = m_field(w);
    i.regs.r[n] = i.regs.r[n].wrapping_sub(i.regs.r[m]);
    Ok(())
}

fn op_mov_rm_rn(i: &mut Interp, w: u16) -> CoreResult<()> {
    let n = n_field(w);
    let m = m_field(w);
    i.regs.r[n] = i.regs.r[m];
    Ok(())
}

fn op_and_rm_rn(i: &mut Interp, w: u16) -> CoreResult<()> {
    let n = n_field(w);
    let m = m_field(w);
    i.regs.r[n] &= i.regs.r[m];
    Ok(())
}

fn op_xor_rm_rn(i: &mut Interp, w: u16) -> CoreResult<()> {
    let n = n_field(w);
    let m = m_field(w);
    i.regs.r[n] ^= i.regs.r[m];
    Ok(())
}

fn op_or_rm_rn(i: &mut Interp, w: u16) -> CoreResult<()> {
    let n = n_field(w);
    let m = m_field(w);
    i.regs.r[n] |= i.regs.r[m];
    Ok(())
}

fn op_cmp_eq_rm_rn(i: &mut Interp, w: u16) -> CoreResult<()> {
    let n = n_field(w);
    let m = m_field(w);
    let eq = i.regs.r[n] == i.regs.r[m];
    i.set_t(eq);
    Ok(())
}

fn op_cmp_eq_imm(i: &mut Interp, w: u16) -> CoreResult<()> {
    let imm = (imm8(w) as i8) as i32;
    let eq = (i.regs.r[0] as i32) == imm;
    i.set_t(eq);
    Ok(())
}

fn op_bra(i: &mut Interp, w: u16) -> CoreResult<()> {
    let disp = disp12(w) * 2 + 4;
    let target = (i.regs.pc.wrapping_sub(2) as i32 + disp) as u32;
    i.branch_to(target);
    Ok(())
}

fn op_bt(i: &mut Interp, w: u16) -> CoreResult<()> {
    if i.regs.sr.contains(Sr::T) {
        let raw = w & 0x1ff;
        let disp = if raw & 0x100 != 0 { (raw as i32) - 0x200 } else { raw as i32 };
        let target = (i.regs.pc.wrapping_sub(2) as i32 + disp * 2 + 4) as u32;
        i.regs.pc = target; // BT has no delay slot
    }
    Ok(())
}

fn op_bf_s(i: &mut Interp, w: u16) -> CoreResult<()> {
    if !i.regs.sr.contains(Sr::T) {
        let disp = disp8(w);
        let target = (i.regs.pc.wrapping_sub(2) as i32 + disp * 2 + 4) as u32;
        i.branch_to(target); // BF/S has a delay slot
    }
    Ok(())
}

fn op_movl_load(i: &mut Interp, w: u16) -> CoreResult<()> {
    let n = n_field(w);
    let m = m_field(w);
    let addr = i.regs.r[m];
    let phys = i.translate_data_addr(addr, false)?;
    i.regs.r[n] = i.mem.read32(phys)?;
    Ok(())
}

fn op_movl_store(i: &mut Interp, w: u16) -> CoreResult<()> {
    let n = n_field(w);
    let m = m_field(w);
    let addr = i.regs.r[n];
    let phys = i.translate_data_addr(addr, true)?;
    i.mem.write32(phys, i.regs.r[m])?;
    Ok(())
}

fn op_sett(i: &mut Interp, _w: u16) -> CoreResult<()> {
    i.set_t(true);
    Ok(())
}

fn op_clrt(i: &mut Interp, _w: u16) -> CoreResult<()> {
    i.set_t(false);
    Ok(())
}

fn op_jmp(i: &mut Interp, w: u16) -> CoreResult<()> {
    let n = n_field(w);
    let target = i.regs.r[n];
    i.branch_to(target);
    Ok(())
}

fn op_jsr(i: &mut Interp, w: u16) -> CoreResult<()> {
    let n = n_field(w);
    let target = i.regs.r[n];
    i.regs.pr = i.regs.pc.wrapping_add(2);
    i.branch_to(target);
    Ok(())
}

/// Toggles `FPSCR.SZ`, flipping the operand size `FMOV` uses for the
/// current block. Issued `Co` so the JIT never compiles past it.
fn op_fschg(i: &mut Interp, _w: u16) -> CoreResult<()> {
    let fpscr = i.regs.fpscr ^ Fpscr::SZ;
    i.regs.set_fpscr(fpscr);
    Ok(())
}

/// Toggles `FPSCR.FR`, bank-swapping the `FR`/`XF` register files. Issued
/// `Co` so the JIT never compiles past it.
fn op_frchg(i: &mut Interp, _w: u16) -> CoreResult<()> {
    let fpscr = i.regs.fpscr ^ Fpscr::FR;
    i.regs.set_fpscr(fpscr);
    Ok(())
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

    fn assemble(mem: &mut MemMap, addr: u32, words: &[u16]) {
        for (i, w) in words.iter().enumerate() {
            mem.write16(addr + (i as u32) * 2, *w).unwrap();
        }
    }

    #[test]
    fn hello_world_block() {
        // MOV #0x10, R6 ; RTS ; NOP
        let mut mem = make_map();
        let base = 0x8c01_0000u32;
        assemble(&mut mem, base, &[0xe610, 0x000b, 0x0009]);
        let mut regs = RegFile::new();
        regs.pc = base;
        regs.pr = 0x8c02_0000;
        let mut mmu = crate::sh4::mmu::Mmu::new();
        let table = DecodeTable::build();
        let mut last_group = IssueGroup::None;
        let mut interp = Interp::new(&mut regs, &mut mem, &mut mmu);
        loop {
            interp.step(&table, &mut last_group).unwrap();
            if interp.regs.pc == 0x8c02_0000 {
                break;
            }
        }
        assert_eq!(regs.pc, 0x8c02_0000);
        assert_eq!(regs.r[6], 0x10);
    }

    #[test]
    fn delay_slot_branch_executes_before_target() {
        // BRA disp=3 (target = base + 4 + 3*2 = base + 0xa) ; ADD #1,R0
        let mut mem = make_map();
        let base = 0x8c00_0000u32;
        assemble(&mut mem, base, &[0xa003, 0x7001]);
        let mut regs = RegFile::new();
        regs.pc = base;
        regs.r[0] = 0;
        let mut mmu = crate::sh4::mmu::Mmu::new();
        let table = DecodeTable::build();
        let mut last_group = IssueGroup::None;
        let mut interp = Interp::new(&mut regs, &mut mem, &mut mmu);
        interp.step(&table, &mut last_group).unwrap();
        assert_eq!(regs.r[0], 1);
        assert_eq!(regs.pc, 0x8c00_000a);
    }

    #[test]
    fn fschg_toggles_sz_without_touching_fr() {
        let mut mem = make_map();
        let base = 0x8c00_3000u32;
        assemble(&mut mem, base, &[0xf3fd]); // FSCHG
        let mut regs = RegFile::new();
        regs.pc = base;
        let mut mmu = crate::sh4::mmu::Mmu::new();
        let table = DecodeTable::build();
        let mut last_group = IssueGroup::None;
        let mut interp = Interp::new(&mut regs, &mut mem, &mut mmu);
        assert!(!interp.regs.fpscr.contains(Fpscr::SZ));
        interp.step(&table, &mut last_group).unwrap();
        assert!(regs.fpscr.contains(Fpscr::SZ));
        assert!(!regs.fpscr.contains(Fpscr::FR));
    }

    #[test]
    fn frchg_swaps_fr_and_xf_banks() {
        let mut mem = make_map();
        let base = 0x8c00_3100u32;
        assemble(&mut mem, base, &[0xfbfd, 0xfbfd]); // FRCHG ; FRCHG
        let mut regs = RegFile::new();
        regs.pc = base;
        regs.fr[0] = 0xdead;
        let mut mmu = crate::sh4::mmu::Mmu::new();
        let table = DecodeTable::build();
        let mut last_group = IssueGroup::None;
        let mut interp = Interp::new(&mut regs, &mut mem, &mut mmu);
        interp.step(&table, &mut last_group).unwrap();
        assert!(interp.regs.fpscr.contains(Fpscr::FR));
        assert_eq!(interp.regs.fr[0], 0, "FR0 must now read through to the XF bank");
        interp.step(&table, &mut last_group).unwrap();
        assert!(!interp.regs.fpscr.contains(Fpscr::FR));
        assert_eq!(interp.regs.fr[0], 0xdead, "toggling back restores the original FR bank");
    }
}
