//! PowerVR2 tile accelerator: command ingest, display-list cache, and
//! STARTRENDER replay into GFX-IL.

pub mod gfxil;
pub mod ta;

use crate::error::CoreResult;
use self::gfxil::GfxIlCommand;
use self::ta::{DisplayListCache, PolyGroupKind, TaParser};

pub struct Pvr2 {
    parser: TaParser,
    cache: DisplayListCache,
}

impl Pvr2 {
    pub fn new() -> Self {
        Pvr2 { parser: TaParser::new(), cache: DisplayListCache::new() }
    }

    pub fn set_vertbuf_pos(&mut self, pos: u32) {
        self.parser.set_vertbuf_pos(pos);
    }

    pub fn set_region_bases(&mut self, isp_base: u32, ol_base: u32, isp_size: u32, ol_size: u32) -> CoreResult<()> {
        self.parser.set_region_bases(isp_base, ol_base, isp_size, ol_size)
    }

    pub fn request_continuation(&mut self, group: PolyGroupKind) {
        self.parser.request_continuation(group);
    }

    /// Feeds one TAFIFO word, typically from a 32-byte-burst store to the
    /// TA polygon-converter address window.
    pub fn write_ta_fifo(&mut self, word: u32) -> CoreResult<()> {
        self.parser.push_word(word)
    }

    /// Call before the first TAFIFO word of a new session, to re-open any
    /// group left in `Continuation` state by a prior session and publish
    /// the list being built under the current `TA_VERTBUF_POS`.
    pub fn begin_session(&mut self) {
        self.parser.publish(&mut self.cache);
        self.parser.begin_session();
    }

    /// STARTRENDER: replays the display list keyed by `region_base` into a
    /// flat GFX-IL command stream, or `None` if no list was ever published
    /// under that key.
    pub fn startrender(&mut self, region_base: u32, target: u32, width: u32, height: u32) -> Option<Vec<GfxIlCommand>> {
        ta::display_list_exec(&mut self.cache, region_base, target, width, height)
    }

    pub fn display_list_count(&self) -> usize {
        self.cache.len()
    }
}

impl Default for Pvr2 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startrender_before_any_session_returns_none() {
        let mut pvr2 = Pvr2::new();
        assert!(pvr2.startrender(0x1000, 7, 640, 480).is_none());
    }
}
