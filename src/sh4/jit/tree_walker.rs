//! Portable tree-walker JIT backend : executes each IL op in
//! a switch over a slot array sized from the `IlBuilder`. Slower than the
//! native backend but requires no executable memory arena, so it is the
//! fallback on platforms that can't or shouldn't emit machine code, and the
//! reference the native backend is checked against.

use crate::error::CoreResult;
use crate::memmap::MemMap;
use crate::sh4::interp::{DecodeTable, Interp};
use crate::sh4::jit::il::{IlBuilder, IlOp};
use crate::sh4::mmu::Mmu;
use crate::sh4::regs::RegFile;

#[derive(Clone, Copy)]
union SlotVal {
    i: u32,
    f: f32,
}

pub struct HostCallTable<'a> {
    pub funcs0: &'a [fn(&mut RegFile)],
    pub funcs1: &'a [fn(&mut RegFile, u32)],
}

/// Outcome of running one block to completion: the guest PC the block
/// jumped to, and the total cycles it charged, batched and reported once
/// per block rather than per instruction.
pub struct BlockResult {
    pub next_pc: u32,
    pub cycles: u64,
}

pub fn run_block(
    il: &IlBuilder,
    regs: &mut RegFile,
    mem: &mut MemMap,
    mmu: &mut Mmu,
    table: &DecodeTable,
    hosts: &HostCallTable,
) -> CoreResult<BlockResult> {
    let mut slots = vec![SlotVal { i: 0 }; il.slot_count()];
    let mut cycles: u64 = il.cycles;

    macro_rules! geti {
        ($s:expr) => {
            unsafe { slots[$s as usize].i }
        };
    }
    macro_rules! setf {
        ($s:expr, $v:expr) => {
            slots[$s as usize] = SlotVal { f: $v }
        };
    }
    macro_rules! getf {
        ($s:expr) => {
            unsafe { slots[$s as usize].f }
        };
    }
    macro_rules! seti {
        ($s:expr, $v:expr) => {
            slots[$s as usize] = SlotVal { i: $v }
        };
    }

    for op in &il.ops {
        match *op {
            IlOp::LiteralSet { dst, val } => seti!(dst, val),
            IlOp::Add { dst, a, b } => seti!(dst, geti!(a).wrapping_add(geti!(b))),
            IlOp::AddConst { dst, a, imm } => seti!(dst, geti!(a).wrapping_add(imm)),
            IlOp::Sub { dst, a, b } => seti!(dst, geti!(a).wrapping_sub(geti!(b))),
            IlOp::Mul { dst, a, b } => seti!(dst, geti!(a).wrapping_mul(geti!(b))),
            IlOp::AddFloat { dst, a, b } => setf!(dst, getf!(a) + getf!(b)),
            IlOp::SubFloat { dst, a, b } => setf!(dst, getf!(a) - getf!(b)),
            IlOp::MulFloat { dst, a, b } => setf!(dst, getf!(a) * getf!(b)),
            IlOp::And { dst, a, b } => seti!(dst, geti!(a) & geti!(b)),
            IlOp::Or { dst, a, b } => seti!(dst, geti!(a) | geti!(b)),
            IlOp::Xor { dst, a, b } => seti!(dst, geti!(a) ^ geti!(b)),
            IlOp::Not { dst, a } => seti!(dst, !geti!(a)),
            IlOp::Shll { dst, a, n } => seti!(dst, geti!(a).wrapping_shl(n)),
            IlOp::Shlr { dst, a, n } => seti!(dst, geti!(a).wrapping_shr(n)),
            IlOp::Shar { dst, a, n } => seti!(dst, ((geti!(a) as i32) >> n.min(31)) as u32),
            IlOp::Shad { dst, a, amount } => {
                let amt = geti!(amount) as i32;
                let v = geti!(a) as i32;
                let result = if amt >= 0 {
                    ((v as i64) << amt.min(31)) as i32
                } else if amt <= -32 {
                    v >> 31
                } else {
                    v >> (-amt)
                };
                seti!(dst, result as u32);
            }
            IlOp::SetGtUnsigned { dst, a, b } => seti!(dst, (geti!(a) > geti!(b)) as u32),
            IlOp::SetGtSigned { dst, a, b } => seti!(dst, ((geti!(a) as i32) > (geti!(b) as i32)) as u32),
            IlOp::SetGtSignedConst { dst, a, imm } => seti!(dst, ((geti!(a) as i32) > imm) as u32),
            IlOp::SetEq { dst, a, b } => seti!(dst, (geti!(a) == geti!(b)) as u32),
            IlOp::SetGeUnsigned { dst, a, b } => seti!(dst, (geti!(a) >= geti!(b)) as u32),
            IlOp::SetGeSigned { dst, a, b } => seti!(dst, ((geti!(a) as i32) >= (geti!(b) as i32)) as u32),
            IlOp::SetGeSignedConst { dst, a, imm } => seti!(dst, ((geti!(a) as i32) >= imm) as u32),
            IlOp::SetGtFloat { dst, a, b } => seti!(dst, (getf!(a) > getf!(b)) as u32),

            IlOp::Read8Slot { dst, addr } => seti!(dst, mem.read8(geti!(addr))? as u32),
            IlOp::Read16Slot { dst, addr } => seti!(dst, mem.read16(geti!(addr))? as u32),
            IlOp::Read32Slot { dst, addr } => seti!(dst, mem.read32(geti!(addr))?),
            IlOp::ReadFloatSlot { dst, addr } => setf!(dst, mem.read_float(geti!(addr))?),
            IlOp::Write8Slot { addr, val } => mem.write8(geti!(addr), geti!(val) as u8)?,
            IlOp::Write16Slot { addr, val } => mem.write16(geti!(addr), geti!(val) as u16)?,
            IlOp::Write32Slot { addr, val } => mem.write32(geti!(addr), geti!(val))?,
            IlOp::WriteFloatSlot { addr, val } => mem.write_float(geti!(addr), getf!(val))?,
            IlOp::Read32ConstAddr { dst, addr } => seti!(dst, mem.read32(addr)?),
            IlOp::Write32ConstAddr { addr, val } => mem.write32(addr, geti!(val))?,

            IlOp::LoadSlot { .. } | IlOp::StoreSlot { .. } => {
                // Host-pointer load/store is a native-backend-only
                // optimization in this design; the tree-walker always goes
                // through the memory map instead, which is semantically
                // equivalent for every guest-visible effect.
            }

            IlOp::LoadReg { dst, reg } => seti!(dst, regs.r[reg]),
            IlOp::StoreReg { reg, src } => regs.r[reg] = geti!(src),

            IlOp::SignExtend8 { dst, a } => seti!(dst, ((geti!(a) as u8) as i8) as i32 as u32),
            IlOp::SignExtend16 { dst, a } => seti!(dst, ((geti!(a) as u16) as i16) as i32 as u32),

            IlOp::Cset { flag, expect_true, const_val, dst } => {
                if (geti!(flag) != 0) == expect_true {
                    seti!(dst, const_val);
                }
            }

            IlOp::CallHost0 { func_id } => (hosts.funcs0[func_id as usize])(regs),
            IlOp::CallHost1 { func_id, arg } => (hosts.funcs1[func_id as usize])(regs, geti!(arg)),

            IlOp::Fallback { inst_word } => {
                let mut interp = Interp::new(regs, mem, mmu);
                let decoded = table.decode(inst_word);
                (decoded.semantics)(&mut interp, inst_word)?;
            }

            IlOp::DrainAll | IlOp::InvalidateAll => {}

            IlOp::Jump { addr_slot, hash_slot: _, const_hash: _ } => {
                return Ok(BlockResult { next_pc: geti!(addr_slot), cycles });
            }
        }
    }
    Err(crate::error::CoreError::Integrity("JIT block fell off the end without a Jump".into()))
}
