//! Top-level owner: wires the scheduler, memory map, SH-4, PVR2 tile
//! accelerator, and Maple bus into one runnable console instance.
//!
//! PVR2 and Maple are driven through small memory-mapped register blocks
//! rather than a full per-register decode of the real hardware's layout
//! (out of scope per the TA module's own rationale: a faithful low-level
//! rebuild of the register file buys nothing once the TA/maple front ends
//! already expose direct method APIs). The Maple register block folds the
//! frame's command/address/packet bytes into its own small buffer instead
//! of having the handler reach across the bus to read a separate DMA
//! source address, since `MapleBus::handle_frame` never needed the raw
//! packet payload in the first place.

use std::cell::RefCell;
use std::rc::Rc;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::warn;

use crate::error::{CoreError, CoreResult};
use crate::maple::{ControllerState, MapleBus, MapleDeviceKind};
use crate::memmap::{MemMap, MemMapBuilder, RegionHandler};
use crate::pvr2::gfxil::GfxIlCommand;
use crate::pvr2::Pvr2;
use crate::scheduler::{Clock, EventId, SH4_CLOCK_SCALE};
use crate::sh4::interrupt::ExceptionCode;
use crate::sh4::Sh4;

const PVR_REG_BASE: u32 = 0x005f_8000;
const PVR_REG_SIZE: u32 = 0x1000;
const PVR_REG_MASK: u32 = PVR_REG_SIZE - 1;

const PVR_SOFTRESET: u32 = 0x008;
const PVR_STARTRENDER: u32 = 0x014;
const PVR_REGION_BASE: u32 = 0x02c;
const PVR_TA_OL_BASE: u32 = 0x124;
const PVR_TA_ISP_BASE: u32 = 0x128;
const PVR_TA_OL_LIMIT: u32 = 0x12c;
const PVR_TA_ISP_LIMIT: u32 = 0x130;
const PVR_TA_VERTBUF_POS: u32 = 0x134;
const PVR_TA_LIST_INIT: u32 = 0x138;

const DEFAULT_FB_WIDTH: u32 = 640;
const DEFAULT_FB_HEIGHT: u32 = 480;
const DEFAULT_RENDER_TARGET: u32 = 0;

const MAPLE_REG_BASE: u32 = 0x005f_6c00;
const MAPLE_REG_SIZE: u32 = 0x0200;
const MAPLE_REG_MASK: u32 = MAPLE_REG_SIZE - 1;
const MAPLE_CMD: u32 = 0x000;
const MAPLE_ADDR: u32 = 0x004;
const MAPLE_TRIGGER: u32 = 0x008;
const MAPLE_RESPONSE_CODE: u32 = 0x010;
const MAPLE_RESPONSE_LEN: u32 = 0x014;
const MAPLE_RESPONSE_DATA: u32 = 0x020;
const MAPLE_RESPONSE_CAP: usize = (MAPLE_REG_SIZE - MAPLE_RESPONSE_DATA) as usize;

/// The two software-visible completion interrupts this core models. Real
/// hardware routes both through Holly's own interrupt-status registers;
/// this simplified controller only has the 16 SH-4-side lines from
/// `sh4::interrupt`, so render-complete and DMA-complete are folded onto
/// `IRL0`/`IRL1`.
const RENDER_COMPLETE_LINE: usize = 11;
const MAPLE_DMA_COMPLETE_LINE: usize = 12;

const RENDER_COMPLETE_EVENT: EventId = 1;
const MAPLE_DMA_COMPLETE_EVENT: EventId = 2;

pub struct SystemConfig {
    pub maple_completion_delay: u64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        SystemConfig { maple_completion_delay: crate::maple::DEFAULT_MAPLE_COMPLETION_DELAY }
    }
}

struct PvrRegs {
    pvr2: Rc<RefCell<Pvr2>>,
    clock: Rc<RefCell<Clock>>,
    gfx_tx: Sender<Vec<GfxIlCommand>>,
    raw: Vec<u8>,
}

impl PvrRegs {
    fn new(pvr2: Rc<RefCell<Pvr2>>, clock: Rc<RefCell<Clock>>, gfx_tx: Sender<Vec<GfxIlCommand>>) -> Self {
        PvrRegs { pvr2, clock, gfx_tx, raw: vec![0; PVR_REG_SIZE as usize] }
    }

    fn get32(&self, off: u32) -> u32 {
        let o = off as usize;
        u32::from_le_bytes([self.raw[o], self.raw[o + 1], self.raw[o + 2], self.raw[o + 3]])
    }

    fn on_write(&mut self, off: u32) {
        match off {
            PVR_TA_ISP_BASE | PVR_TA_OL_BASE | PVR_TA_ISP_LIMIT | PVR_TA_OL_LIMIT => {
                let isp_base = self.get32(PVR_TA_ISP_BASE);
                let ol_base = self.get32(PVR_TA_OL_BASE);
                let isp_size = self.get32(PVR_TA_ISP_LIMIT).saturating_sub(isp_base);
                let ol_size = self.get32(PVR_TA_OL_LIMIT).saturating_sub(ol_base);
                if let Err(e) = self.pvr2.borrow_mut().set_region_bases(isp_base, ol_base, isp_size, ol_size) {
                    warn!("pvr2: {e}");
                }
            }
            PVR_TA_VERTBUF_POS => {
                self.pvr2.borrow_mut().set_vertbuf_pos(self.get32(off));
            }
            PVR_TA_LIST_INIT | PVR_SOFTRESET => {
                self.pvr2.borrow_mut().begin_session();
            }
            PVR_STARTRENDER => {
                let region_base = self.get32(PVR_REGION_BASE);
                let cmds = self.pvr2.borrow_mut().startrender(
                    region_base,
                    DEFAULT_RENDER_TARGET,
                    DEFAULT_FB_WIDTH,
                    DEFAULT_FB_HEIGHT,
                );
                if let Some(cmds) = cmds {
                    if self.gfx_tx.try_send(cmds).is_err() {
                        warn!("pvr2: gfx-il queue full or disconnected, dropping frame");
                    }
                    let mut clock = self.clock.borrow_mut();
                    let when = clock.stamp();
                    clock.schedule(RENDER_COMPLETE_EVENT, when);
                }
            }
            _ => {}
        }
    }
}

impl RegionHandler for PvrRegs {
    fn read8(&mut self, offset: usize) -> u8 {
        self.raw[offset]
    }
    fn read16(&mut self, offset: usize) -> u16 {
        u16::from_le_bytes([self.raw[offset], self.raw[offset + 1]])
    }
    fn read32(&mut self, offset: usize) -> u32 {
        self.get32(offset as u32)
    }
    fn write8(&mut self, offset: usize, val: u8) {
        self.raw[offset] = val;
        self.on_write((offset as u32) & !0x3);
    }
    fn write16(&mut self, offset: usize, val: u16) {
        self.raw[offset..offset + 2].copy_from_slice(&val.to_le_bytes());
        self.on_write((offset as u32) & !0x3);
    }
    fn write32(&mut self, offset: usize, val: u32) {
        self.raw[offset..offset + 4].copy_from_slice(&val.to_le_bytes());
        self.on_write(offset as u32);
    }
}

struct MapleRegs {
    maple: Rc<RefCell<MapleBus>>,
    clock: Rc<RefCell<Clock>>,
    controller: Rc<RefCell<ControllerState>>,
    raw: Vec<u8>,
}

impl MapleRegs {
    fn new(maple: Rc<RefCell<MapleBus>>, clock: Rc<RefCell<Clock>>, controller: Rc<RefCell<ControllerState>>) -> Self {
        MapleRegs { maple, clock, controller, raw: vec![0; MAPLE_REG_SIZE as usize] }
    }

    fn trigger(&mut self) {
        let command_code = self.raw[MAPLE_CMD as usize];
        let maple_addr = self.raw[MAPLE_ADDR as usize];
        let state = *self.controller.borrow();
        let (code, payload) = match self.maple.borrow().handle_frame(command_code, maple_addr, &state) {
            Ok(r) => r,
            Err(e) => {
                warn!("maple: {e}");
                (crate::maple::MapleResponseCode::None, Vec::new())
            }
        };
        self.raw[MAPLE_RESPONSE_CODE as usize] = response_code_byte(code);
        let len = payload.len().min(MAPLE_RESPONSE_CAP);
        self.raw[MAPLE_RESPONSE_LEN as usize..MAPLE_RESPONSE_LEN as usize + 4]
            .copy_from_slice(&(len as u32).to_le_bytes());
        let base = MAPLE_RESPONSE_DATA as usize;
        self.raw[base..base + len].copy_from_slice(&payload[..len]);

        let delay = self.maple.borrow().completion_delay();
        let mut clock = self.clock.borrow_mut();
        let when = clock.stamp() + delay;
        clock.schedule(MAPLE_DMA_COMPLETE_EVENT, when);
    }
}

fn response_code_byte(code: crate::maple::MapleResponseCode) -> u8 {
    use crate::maple::MapleResponseCode::*;
    match code {
        DeviceInfo => 0x05,
        DataTransfer => 0x08,
        None => 0xff,
    }
}

impl RegionHandler for MapleRegs {
    fn read8(&mut self, offset: usize) -> u8 {
        self.raw[offset]
    }
    fn read16(&mut self, offset: usize) -> u16 {
        u16::from_le_bytes([self.raw[offset], self.raw[offset + 1]])
    }
    fn read32(&mut self, offset: usize) -> u32 {
        u32::from_le_bytes([self.raw[offset], self.raw[offset + 1], self.raw[offset + 2], self.raw[offset + 3]])
    }
    fn write8(&mut self, offset: usize, val: u8) {
        self.raw[offset] = val;
        if offset as u32 == MAPLE_TRIGGER {
            self.trigger();
        }
    }
    fn write16(&mut self, offset: usize, val: u16) {
        self.raw[offset..offset + 2].copy_from_slice(&val.to_le_bytes());
        if offset as u32 == MAPLE_TRIGGER {
            self.trigger();
        }
    }
    fn write32(&mut self, offset: usize, val: u32) {
        self.raw[offset..offset + 4].copy_from_slice(&val.to_le_bytes());
        if offset as u32 == MAPLE_TRIGGER {
            self.trigger();
        }
    }
}

pub struct System {
    pub sh4: Sh4,
    pub mem: MemMap,
    pub clock: Rc<RefCell<Clock>>,
    pvr2: Rc<RefCell<Pvr2>>,
    maple: Rc<RefCell<MapleBus>>,
    controller: Rc<RefCell<ControllerState>>,
    gfx_rx: Receiver<Vec<GfxIlCommand>>,
    /// The other half of `fb_rx`'s rendezvous. Held as `Option` and handed
    /// out exactly once via `take_framebuffer_sender`, rather than kept
    /// alive here too: `read_framebuffer` needs the channel to actually
    /// disconnect once the graphics thread drops its clone, so `System`
    /// itself must not hold a second live sender.
    fb_tx: Option<Sender<Vec<u8>>>,
    fb_rx: Receiver<Vec<u8>>,
}

impl System {
    /// Builds the console from a memory map builder already populated with
    /// RAM/BIOS ROM regions; `System` adds its own MMIO regions and owns
    /// the result. Disc-image loading and BIOS selection are a host
    /// concern and happen before this call.
    pub fn new(builder: MemMapBuilder, config: SystemConfig) -> Self {
        let clock = Rc::new(RefCell::new(Clock::new()));
        let pvr2 = Rc::new(RefCell::new(Pvr2::new()));
        let maple = Rc::new(RefCell::new(MapleBus::with_completion_delay(config.maple_completion_delay)));
        let controller = Rc::new(RefCell::new(ControllerState::default()));
        let (gfx_tx, gfx_rx) = bounded(4);
        let (fb_tx, fb_rx) = bounded(0);

        let pvr_regs = PvrRegs::new(Rc::clone(&pvr2), Rc::clone(&clock), gfx_tx);
        let maple_regs = MapleRegs::new(Rc::clone(&maple), Rc::clone(&clock), Rc::clone(&controller));

        let mem = builder
            .mmio("pvr2_regs", PVR_REG_BASE, PVR_REG_BASE + PVR_REG_SIZE - 1, 0x1fff_ffff, PVR_REG_MASK, Box::new(pvr_regs))
            .mmio("maple_regs", MAPLE_REG_BASE, MAPLE_REG_BASE + MAPLE_REG_SIZE - 1, 0x1fff_ffff, MAPLE_REG_MASK, Box::new(maple_regs))
            .build();

        System { sh4: Sh4::new(), mem, clock, pvr2, maple, controller, gfx_rx, fb_tx: Some(fb_tx), fb_rx }
    }

    pub fn plug_in_controller(&mut self, port: u8, unit: u8, kind: MapleDeviceKind) {
        self.maple.borrow_mut().plug_in(port, unit, kind);
    }

    pub fn set_controller_state(&mut self, state: ControllerState) {
        *self.controller.borrow_mut() = state;
    }

    pub fn display_list_count(&self) -> usize {
        self.pvr2.borrow().display_list_count()
    }

    pub fn gfx_receiver(&self) -> &Receiver<Vec<GfxIlCommand>> {
        &self.gfx_rx
    }

    /// Hands the caller the sender the graphics thread uses to deliver a
    /// captured framebuffer back to `read_framebuffer`, in response to a
    /// `GrabFramebuffer` command pulled off `gfx_receiver`. Returns `None`
    /// on a second call — there is only one graphics thread per `System`.
    pub fn take_framebuffer_sender(&mut self) -> Option<Sender<Vec<u8>>> {
        self.fb_tx.take()
    }

    /// Blocks the calling (emulation) thread until the graphics thread
    /// delivers a grabbed framebuffer on a `bounded(0)` rendezvous: the
    /// send only completes once this call is actually waiting, so no frame
    /// is silently dropped and none is buffered ahead of the caller needing
    /// it. If the graphics thread has shut down and dropped its sender
    /// (via `take_framebuffer_sender`) without ever grabbing a frame, the
    /// channel disconnects and this returns an error immediately instead
    /// of blocking forever.
    pub fn read_framebuffer(&self) -> CoreResult<Vec<u8>> {
        self.fb_rx
            .recv()
            .map_err(|_| CoreError::Protocol("graphics thread exited without delivering a framebuffer".into()))
    }

    fn dispatch_event(&mut self, id: EventId) {
        match id {
            RENDER_COMPLETE_EVENT => self.sh4.interrupts.set_line(RENDER_COMPLETE_LINE, true),
            MAPLE_DMA_COMPLETE_EVENT => self.sh4.interrupts.set_line(MAPLE_DMA_COMPLETE_LINE, true),
            _ => {}
        }
    }

    /// Runs up to one scheduler timeslice (`DC_TIMESLICE` cycles), stepping
    /// the SH-4 between due events. Cycle accounting is a lump-sum
    /// approximation: each `Sh4::step` charges its whole block at once
    /// rather than being interruptible mid-block, matching the
    /// block-boundary-only interrupt check this core uses throughout.
    pub fn run_timeslice(&mut self) -> CoreResult<()> {
        let slice_end = self.clock.borrow().stamp() + crate::scheduler::DC_TIMESLICE;
        while self.clock.borrow().stamp() < slice_end {
            let sh4_cycles = self.sh4.step(&mut self.mem)?.max(1);
            let sched_cycles = sh4_cycles.saturating_mul(SH4_CLOCK_SCALE);
            let due = {
                let mut clock = self.clock.borrow_mut();
                let countdown = clock.countdown();
                let advance_by = if countdown > 0 { sched_cycles.min(countdown as u64) } else { sched_cycles };
                if advance_by > 0 {
                    clock.advance(advance_by);
                }
                clock.pop_due()
            };
            for id in due {
                self.dispatch_event(id);
            }
        }
        Ok(())
    }

    pub fn service_exception(&mut self, code: ExceptionCode) {
        crate::sh4::interrupt::enter_exception(&mut self.sh4.regs, code, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memmap::{Ram, RAM_SIZE};

    fn builder() -> MemMapBuilder {
        MemMapBuilder::new().ram("ram", 0x0c00_0000, 0x0cff_ffff, 0x1fff_ffff, 0x00ff_ffff, Ram::new(RAM_SIZE))
    }

    #[test]
    fn maple_trigger_register_round_trips_devinfo() {
        let mut sys = System::new(builder(), SystemConfig::default());
        sys.plug_in_controller(0, 0, MapleDeviceKind::Controller);
        sys.mem.write8(MAPLE_REG_BASE + MAPLE_CMD, 0x01).unwrap(); // DEVICE_INFO
        sys.mem.write8(MAPLE_REG_BASE + MAPLE_ADDR, 0x20).unwrap(); // port0/unit0
        sys.mem.write32(MAPLE_REG_BASE + MAPLE_TRIGGER, 1).unwrap();
        assert_eq!(sys.mem.read8(MAPLE_REG_BASE + MAPLE_RESPONSE_CODE).unwrap(), 0x05);
        let len = sys.mem.read32(MAPLE_REG_BASE + MAPLE_RESPONSE_LEN).unwrap();
        assert!(len > 0);
    }

    #[test]
    fn startrender_with_no_list_sends_nothing() {
        let sys = System::new(builder(), SystemConfig::default());
        assert_eq!(sys.display_list_count(), 0);
        assert!(sys.gfx_receiver().try_recv().is_err());
    }

    /// If the graphics thread shuts down (drops its sender) without ever
    /// grabbing a frame, `read_framebuffer` must return an error rather
    /// than block forever waiting on a rendezvous partner that no longer
    /// exists.
    #[test]
    fn read_framebuffer_does_not_deadlock_after_graphics_thread_shuts_down() {
        let mut sys = System::new(builder(), SystemConfig::default());
        let sender = sys.take_framebuffer_sender().expect("sender available exactly once");
        assert!(sys.take_framebuffer_sender().is_none());
        drop(sender);
        assert!(sys.read_framebuffer().is_err());
    }

    #[test]
    fn ta_fifo_register_writes_reach_pvr2() {
        let mut sys = System::new(builder(), SystemConfig::default());
        sys.mem.write32(PVR_REG_BASE + PVR_TA_VERTBUF_POS, 0x1234).unwrap();
        sys.mem.write32(PVR_REG_BASE + PVR_TA_LIST_INIT, 1).unwrap();
        assert_eq!(sys.display_list_count(), 0); // nothing published yet
    }
}
