//! Command-line front end: loads a config file and an optional BIOS image,
//! wires up a `System`, and drives it either headless (a fixed number of
//! timeslices, graphics commands sunk into `NullBackend`) or — once a real
//! windowing backend exists — interactively. This crate never owns a
//! window or a GPU context itself; see `gfx::GfxBackend`.

use std::path::PathBuf;
use std::process::ExitCode;

use log::{error, info};

use tileforge_core::config::Config;
use tileforge_core::gfx::null::NullBackend;
use tileforge_core::gfx::dispatch;
use tileforge_core::maple::MapleDeviceKind;
use tileforge_core::memmap::{MemMapBuilder, Ram};
use tileforge_core::{System, SystemConfig};

const RAM_SIZE: usize = 16 * 1024 * 1024;
const RAM_BASE: u32 = 0x0c00_0000;
const RAM_END: u32 = 0x0cff_ffff;

const BIOS_SIZE: usize = 2 * 1024 * 1024;
const BIOS_BASE: u32 = 0x0000_0000;
const BIOS_END: u32 = 0x001f_ffff;

const P0_P3_MASK: u32 = 0x1fff_ffff;

/// Headless runs for a fixed number of timeslices rather than forever,
/// since without a real windowing backend there's no user input to wait
/// on and no display to refresh.
const HEADLESS_TIMESLICES: u32 = 60;

struct Args {
    config: Option<PathBuf>,
    bios: Option<PathBuf>,
    headless: bool,
    debug: bool,
}

fn parse_args() -> Args {
    let mut args = Args { config: None, bios: None, headless: false, debug: false };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => args.config = it.next().map(PathBuf::from),
            "--bios" => args.bios = it.next().map(PathBuf::from),
            "--headless" => args.headless = true,
            "--debug" => args.debug = true,
            other => eprintln!("tileforge: ignoring unrecognized argument {other:?}"),
        }
    }
    args
}

fn load_config(args: &Args) -> Config {
    let path = args.config.clone().or_else(Config::default_path);
    match path {
        Some(path) if path.exists() => match Config::load_file(&path) {
            Ok(cfg) => {
                info!("loaded config from {}", path.display());
                cfg
            }
            Err(e) => {
                error!("failed to load config {}: {e}", path.display());
                Config::new()
            }
        },
        _ => Config::new(),
    }
}

fn build_memory(args: &Args) -> anyhow::Result<MemMapBuilder> {
    let mut builder = MemMapBuilder::new()
        .ram("ram", RAM_BASE, RAM_END, P0_P3_MASK, RAM_SIZE as u32 - 1, Ram::new(RAM_SIZE));

    let mut bios = Ram::new(BIOS_SIZE);
    if let Some(path) = &args.bios {
        let bytes = std::fs::read(path)
            .map_err(|e| anyhow::anyhow!("reading BIOS image {}: {e}", path.display()))?;
        if bytes.len() > BIOS_SIZE {
            anyhow::bail!("BIOS image {} is {} bytes, larger than the {BIOS_SIZE}-byte window", path.display(), bytes.len());
        }
        bios.as_mut_slice()[..bytes.len()].copy_from_slice(&bytes);
        info!("loaded BIOS image {} ({} bytes)", path.display(), bytes.len());
    } else {
        info!("no --bios given, running with an empty BIOS window");
    }
    builder = builder.ram("bios", BIOS_BASE, BIOS_END, P0_P3_MASK, BIOS_SIZE as u32 - 1, bios);

    Ok(builder)
}

fn run() -> anyhow::Result<()> {
    let args = parse_args();

    let level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = load_config(&args);
    let bgcolor = config.get_rgb("ui.bgcolor").unwrap_or((0, 0, 0));
    info!("background color {bgcolor:?}");

    let builder = build_memory(&args)?;
    let mut system = System::new(builder, SystemConfig::default());
    system.plug_in_controller(0, 0, MapleDeviceKind::Controller);

    let mut backend = NullBackend::new();

    if !args.headless {
        info!("no windowing backend is built into this crate; falling back to headless mode");
    }

    for tick in 0..HEADLESS_TIMESLICES {
        system.run_timeslice()?;
        while let Ok(cmds) = system.gfx_receiver().try_recv() {
            for cmd in cmds {
                dispatch(&mut backend, cmd)?;
            }
        }
        if tick % 10 == 0 {
            info!("timeslice {tick}: {} draw calls so far, {} display lists cached", backend.draw_calls, system.display_list_count());
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("tileforge: {e:#}");
            ExitCode::FAILURE
        }
    }
}
