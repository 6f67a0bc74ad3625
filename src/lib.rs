//! `tileforge_core`: the guest execution engine for a Sega Dreamcast
//! emulator — SH-4 interpreter/JIT, memory map, PowerVR2 tile accelerator,
//! Maple peripheral bus, and the event scheduler tying them together.
//!
//! Graphics presentation, disc-image parsing, windowing, and audio are
//! host concerns this crate never touches; see [`gfx::GfxBackend`] for the
//! one seam it exposes to the outside world.

pub mod config;
pub mod error;
pub mod fifo;
pub mod gfx;
pub mod maple;
pub mod memmap;
pub mod pvr2;
pub mod scheduler;
pub mod sh4;
pub mod system;

pub use error::{CoreError, CoreResult};
pub use system::{System, SystemConfig};
