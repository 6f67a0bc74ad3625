//! Optional SH-4 MMU: ITLB (4 entries) and UTLB (64 entries) with
//! associative lookup by (vpn, asid, page size).

use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, Debug, Default)]
    pub struct Mmucr: u32 {
        const AT   = 1 << 0;  // address translation enable
        const TI   = 1 << 2;  // TLB invalidate
        const SV   = 1 << 8;  // single virtual memory mode
        const SQMD = 1 << 9;  // store-queue mode (privileged access only)
        const URC_MASK = 0x3f << 10;
        const URB_MASK = 0x3f << 18;
        const LRUI_MASK = 0x3f << 26;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageSize {
    OneK,
    FourK,
    SixtyFourK,
    OneM,
}

impl PageSize {
    pub fn from_bits(sz1: bool, sz0: bool) -> Self {
        match (sz1, sz0) {
            (false, false) => PageSize::OneK,
            (false, true) => PageSize::FourK,
            (true, false) => PageSize::SixtyFourK,
            (true, true) => PageSize::OneM,
        }
    }
    pub fn mask(self) -> u32 {
        match self {
            PageSize::OneK => 0x3ff,
            PageSize::FourK => 0xfff,
            PageSize::SixtyFourK => 0xffff,
            PageSize::OneM => 0xf_ffff,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protection {
    PrivReadOnly,
    PrivReadWrite,
    AnyReadOnly,
    AnyReadWrite,
}

impl Protection {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Protection::PrivReadOnly,
            0b01 => Protection::PrivReadWrite,
            0b10 => Protection::AnyReadOnly,
            _ => Protection::AnyReadWrite,
        }
    }
    pub fn writable(self) -> bool {
        matches!(self, Protection::PrivReadWrite | Protection::AnyReadWrite)
    }
    pub fn user_accessible(self) -> bool {
        matches!(self, Protection::AnyReadOnly | Protection::AnyReadWrite)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct TlbEntry {
    pub valid: bool,
    pub shared: bool,
    pub asid: u8,
    pub vpn: u32,
    pub ppn: u32,
    pub protection: Protection,
    pub cacheable: bool,
    pub dirty: bool,
    pub size: PageSize,
    pub write_through: bool,
    pub timing_control: bool,
}

impl Default for TlbEntry {
    fn default() -> Self {
        TlbEntry {
            valid: false,
            shared: false,
            asid: 0,
            vpn: 0,
            ppn: 0,
            protection: Protection::PrivReadOnly,
            cacheable: false,
            dirty: false,
            size: PageSize::OneK,
            write_through: false,
            timing_control: false,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum TranslateOutcome {
    Success(u32),
    Miss,
    ProtViol,
    InitialWrite,
}

pub struct Tlb<const N: usize> {
    pub entries: [TlbEntry; N],
}

impl<const N: usize> Tlb<N> {
    pub fn new() -> Self {
        Tlb { entries: [TlbEntry::default(); N] }
    }

    /// Associative lookup by (vpn, asid-if-not-shared, page-size).
    fn lookup(&self, vaddr: u32, asid: u8) -> Option<usize> {
        self.entries.iter().position(|e| {
            if !e.valid {
                return false;
            }
            if !e.shared && e.asid != asid {
                return false;
            }
            let mask = e.size.mask();
            (e.vpn & !mask) == (vaddr & !mask)
        })
    }

    pub fn translate(&self, vaddr: u32, asid: u8, is_write: bool) -> TranslateOutcome {
        match self.lookup(vaddr, asid) {
            None => TranslateOutcome::Miss,
            Some(idx) => {
                let e = &self.entries[idx];
                if is_write && !e.protection.writable() {
                    return TranslateOutcome::ProtViol;
                }
                if is_write && !e.dirty {
                    return TranslateOutcome::InitialWrite;
                }
                let mask = e.size.mask();
                let ppn = (e.ppn & !mask) | (vaddr & mask);
                TranslateOutcome::Success(ppn)
            }
        }
    }
}

impl<const N: usize> Default for Tlb<N> {
    fn default() -> Self {
        Self::new()
    }
}

pub type Itlb = Tlb<4>;
pub type Utlb = Tlb<64>;

/// PTEH/PTEL/PTEA staging registers, written by guest code before `LDTLB`.
#[derive(Default, Clone, Copy)]
pub struct PteStaging {
    pub pteh_vpn: u32,
    pub pteh_asid: u8,
    pub ptel: u32,
    pub ptea_tc: bool,
}

pub struct Mmu {
    pub itlb: Itlb,
    pub utlb: Utlb,
    pub mmucr: Mmucr,
    pub pte: PteStaging,
    pub tea: u32,
}

impl Mmu {
    pub fn new() -> Self {
        Mmu { itlb: Itlb::new(), utlb: Utlb::new(), mmucr: Mmucr::default(), pte: PteStaging::default(), tea: 0 }
    }

    pub fn enabled(&self) -> bool {
        self.mmucr.contains(Mmucr::AT)
    }

    /// `LDTLB`: moves PTEH/PTEL/PTEA into the UTLB slot chosen by
    /// `MMUCR.URC`.
    pub fn ldtlb(&mut self) {
        let urc = ((self.mmucr.bits() & Mmucr::URC_MASK.bits()) >> 10) as usize % 64;
        let ptel = self.pte.ptel;
        self.utlb.entries[urc] = TlbEntry {
            valid: ptel & 1 != 0,
            shared: (ptel >> 1) & 1 != 0,
            asid: self.pte.pteh_asid,
            vpn: self.pte.pteh_vpn,
            ppn: ptel & 0x1fff_fc00,
            protection: Protection::from_bits(((ptel >> 5) & 0b11) as u8),
            cacheable: (ptel >> 3) & 1 != 0,
            dirty: (ptel >> 2) & 1 != 0,
            size: PageSize::from_bits((ptel >> 7) & 1 != 0, (ptel >> 4) & 1 != 0),
            write_through: (ptel >> 9) & 1 != 0,
            timing_control: self.pte.ptea_tc,
        };
    }

    pub fn translate_data(&mut self, vaddr: u32, is_write: bool) -> TranslateOutcome {
        let outcome = self.utlb.translate(vaddr, self.pte.pteh_asid, is_write);
        if !matches!(outcome, TranslateOutcome::Success(_)) {
            self.pte.pteh_vpn = vaddr & !0x3ff;
            self.tea = vaddr;
        }
        outcome
    }

    pub fn translate_inst(&mut self, vaddr: u32) -> TranslateOutcome {
        let outcome = self.itlb.translate(vaddr, self.pte.pteh_asid, false);
        if !matches!(outcome, TranslateOutcome::Success(_)) {
            self.pte.pteh_vpn = vaddr & !0x3ff;
            self.tea = vaddr;
        }
        outcome
    }
}

impl Default for Mmu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapped_entry(vpn: u32, ppn: u32, writable: bool, dirty: bool) -> TlbEntry {
        TlbEntry {
            valid: true,
            shared: true,
            asid: 0,
            vpn,
            ppn,
            protection: if writable { Protection::AnyReadWrite } else { Protection::AnyReadOnly },
            cacheable: true,
            dirty,
            size: PageSize::FourK,
            write_through: false,
            timing_control: false,
        }
    }

    #[test]
    fn translate_hit() {
        let mut utlb: Utlb = Tlb::new();
        utlb.entries[0] = mapped_entry(0x1000_0000, 0x0c00_0000, true, true);
        match utlb.translate(0x1000_0123, 0, false) {
            TranslateOutcome::Success(ppn) => assert_eq!(ppn, 0x0c00_0123),
            other => panic!("expected hit, got {other:?}"),
        }
    }

    #[test]
    fn translate_miss_when_unmapped() {
        let utlb: Utlb = Tlb::new();
        assert_eq!(utlb.translate(0x1000_0000, 0, false), TranslateOutcome::Miss);
    }

    #[test]
    fn write_to_clean_page_is_initial_write() {
        let mut utlb: Utlb = Tlb::new();
        utlb.entries[0] = mapped_entry(0x2000_0000, 0x0c00_0000, true, false);
        assert_eq!(utlb.translate(0x2000_0000, 0, true), TranslateOutcome::InitialWrite);
    }

    #[test]
    fn write_to_readonly_page_is_prot_viol() {
        let mut utlb: Utlb = Tlb::new();
        utlb.entries[0] = mapped_entry(0x3000_0000, 0x0c00_0000, false, true);
        assert_eq!(utlb.translate(0x3000_0000, 0, true), TranslateOutcome::ProtViol);
    }

    #[test]
    fn ldtlb_uses_urc_slot() {
        let mut mmu = Mmu::new();
        mmu.pte.pteh_vpn = 0x1234_0000;
        mmu.pte.pteh_asid = 3;
        mmu.pte.ptel = 0x0c00_0000 | 0b1 | (0b11 << 5); // valid, any-rw
        mmu.ldtlb();
        assert!(mmu.utlb.entries[0].valid);
        assert_eq!(mmu.utlb.entries[0].asid, 3);
    }
}
