//! Black-box integration tests against `tileforge_core`'s public API.

use tileforge_core::config::Config;
use tileforge_core::maple::{pack, ControllerState, MapleBus, MapleDeviceKind, MapleResponseCode};
use tileforge_core::pvr2::gfxil::GfxIlCommand;
use tileforge_core::pvr2::Pvr2;
use tileforge_core::sh4::regs::Fpscr;
use tileforge_core::sh4::Sh4;
use tileforge_core::memmap::{MemMap, MemMapBuilder, Ram, RAM_SIZE};

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

/// A JIT block reaching an `RTS` falls back to the interpreter one
/// instruction early, runs the delay slot, and lands exactly on `PR`.
#[test]
fn hello_world_block_reaches_pr_with_expected_register_state() {
    let mut mem = make_map();
    let base = 0x8c01_0000u32;
    // MOV #0x10,R6 ; RTS ; NOP
    assemble(&mut mem, base, &[0xe610, 0x000b, 0x0009]);

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
    assert_eq!(sh4.regs.r[6], 0x10);
}

/// `BRA` takes its delay slot's effect before the branch lands.
#[test]
fn delay_slot_branch_executes_before_landing() {
    let mut mem = make_map();
    let base = 0x8c00_0000u32;
    // BRA disp=3 (target = base + 4 + 3*2 = base + 0xa) ; ADD #1,R0
    assemble(&mut mem, base, &[0xa003, 0x7001]);

    let mut sh4 = Sh4::new();
    sh4.regs.pc = base;
    sh4.regs.r[0] = 0;
    sh4.step(&mut mem).unwrap();

    assert_eq!(sh4.regs.r[0], 1);
    assert_eq!(sh4.regs.pc, 0x8c00_000a);
}

/// Executing a real `FSCHG` inside the guest program must split the JIT
/// code cache for the block's own PC into independent entries per `SZ`,
/// not just differ in `block_hash` arithmetic computed by hand.
#[test]
fn fschg_execution_splits_the_code_cache_by_sz() {
    let mut mem = make_map();
    let base = 0x8c00_6000u32;
    // FSCHG ; BRA -3 (loops back to `base`) ; NOP (delay slot)
    assemble(&mut mem, base, &[0xf3fd, 0xaffd, 0x0009]);

    let mut sh4 = Sh4::new();
    sh4.regs.pc = base;

    assert!(!sh4.regs.fpscr.contains(Fpscr::SZ));
    sh4.step(&mut mem).unwrap(); // FSCHG: SZ false -> true, falls back to the interpreter
    assert!(sh4.regs.fpscr.contains(Fpscr::SZ));
    assert_eq!(sh4.regs.pc, base + 2);
    assert_eq!(sh4.code_cache_len(), 1);

    sh4.step(&mut mem).unwrap(); // BRA -3 plus its delay slot, lands back on `base`
    assert_eq!(sh4.regs.pc, base);
    assert_eq!(sh4.code_cache_len(), 2);

    sh4.step(&mut mem).unwrap(); // same PC, but SZ=1 now: a third, independent entry
    assert!(!sh4.regs.fpscr.contains(Fpscr::SZ));
    assert_eq!(sh4.regs.pc, base + 2);
    assert_eq!(sh4.code_cache_len(), 3, "FSCHG at the same PC under a different SZ must not reuse the SZ=0 block");
}

/// `DEVICE_INFO` against a plugged-in controller returns the controller's
/// function mask and power figures; the same command against an unplugged
/// expansion unit on the same port returns `NONE` with no payload.
#[test]
fn maple_devinfo_distinguishes_plugged_and_unplugged_units() {
    let mut bus = MapleBus::new();
    bus.plug_in(0, 0, MapleDeviceKind::Controller);

    let (code, payload) = bus.handle_frame(0x01, 0x20, &ControllerState::default()).unwrap();
    assert_eq!(code, MapleResponseCode::DeviceInfo);
    assert_eq!(&payload[0..4], &0x0100_0000u32.to_le_bytes());
    let standby = u16::from_le_bytes([payload[payload.len() - 4], payload[payload.len() - 3]]);
    let max_power = u16::from_le_bytes([payload[payload.len() - 2], payload[payload.len() - 1]]);
    assert_eq!(standby, 0x01f4);
    assert_eq!(max_power, 0x01f4);

    let (code, payload) = bus.handle_frame(0x01, pack(0, 1), &ControllerState::default()).unwrap();
    assert_eq!(code, MapleResponseCode::None);
    assert!(payload.is_empty());
}

/// A header plus a three-vertex triangle strip plus end-of-list, replayed
/// through `STARTRENDER`, produces exactly one `DRAW_ARRAY` of three
/// vertices in the opaque group, bracketed by a render-parameter set and a
/// framebuffer post.
#[test]
fn display_list_replay_emits_one_draw_array_in_order() {
    let mut pvr2 = Pvr2::new();
    pvr2.set_region_bases(0x1000, 0x3000, 0x1000, 0x1000).unwrap();
    pvr2.set_vertbuf_pos(0x1000);

    // Opaque header, 8 dwords, no texture.
    let header_word = 3u32 << 29;
    for w in [header_word, 0, 0, 0, 0, 0, 0, 0] {
        pvr2.write_ta_fifo(w).unwrap();
    }
    for i in 0..3u32 {
        let end_of_strip = i == 2;
        let control = (7u32 << 29) | if end_of_strip { 1 << 28 } else { 0 };
        let pos = [f32::to_bits(i as f32), f32::to_bits(0.0), f32::to_bits(0.0)];
        let uv = [f32::to_bits(0.0), f32::to_bits(0.0)];
        for w in [control, pos[0], pos[1], pos[2], uv[0], uv[1]] {
            pvr2.write_ta_fifo(w).unwrap();
        }
    }
    pvr2.write_ta_fifo(0).unwrap(); // end-of-list

    pvr2.begin_session();
    assert_eq!(pvr2.display_list_count(), 1);

    let cmds = pvr2.startrender(0x1000, 0, 640, 480).expect("a list was published under 0x1000");

    let draw_calls: Vec<&GfxIlCommand> = cmds.iter().filter(|c| matches!(c, GfxIlCommand::DrawArray { .. })).collect();
    assert_eq!(draw_calls.len(), 1);
    if let GfxIlCommand::DrawArray { verts } = draw_calls[0] {
        assert_eq!(verts.len(), 3);
    }

    let rend_idx = cmds.iter().position(|c| matches!(c, GfxIlCommand::SetRendParam { .. })).unwrap();
    let draw_idx = cmds.iter().position(|c| matches!(c, GfxIlCommand::DrawArray { .. })).unwrap();
    assert!(rend_idx < draw_idx);
    assert!(matches!(cmds.last(), Some(GfxIlCommand::PostFramebuffer { .. })));
}

/// The config parser's documented example round-trips through the RGB and
/// bool accessors.
#[test]
fn config_parses_documented_example() {
    let cfg = Config::parse("ui.bgcolor #3d77c0\nwin.vsync false\n");
    assert_eq!(cfg.get_rgb("ui.bgcolor"), Some((0x3d, 0x77, 0xc0)));
    assert_eq!(cfg.get_bool("win.vsync"), Some(false));
}

/// Two independently constructed cores don't share any cached or register
/// state.
#[test]
fn independent_cores_do_not_share_state() {
    let mut mem = make_map();
    let base = 0x8c00_5000u32;
    assemble(&mut mem, base, &[0xe007, 0x000b, 0x0009]); // MOV #7,R0 ; RTS ; NOP

    let mut a = Sh4::new();
    a.regs.pc = base;
    a.regs.pr = base;
    a.step(&mut mem).unwrap();
    assert_eq!(a.regs.r[0], 7);

    let b = Sh4::new();
    assert_eq!(b.regs.r[0], 0);
}
