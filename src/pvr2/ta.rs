//! Tile Accelerator front-end: ingests the TAFIFO command stream, builds
//! per-poly-type display lists keyed by the vertex-buffer base pointer in
//! effect when the list was built, and replays a list into GFX-IL on
//! STARTRENDER.
//!
//! A faithful low-level rebuild of the tile-array binary format real
//! hardware produces isn't attempted; keying a display list on
//! `TA_VERTBUF_POS` at list-open time and replaying by `REGION_BASE` at
//! STARTRENDER is valid as long as every guest uses the TA to lay out its
//! lists, which every shipped title does.

use std::collections::HashMap;

use log::{debug, trace};

use crate::error::{CoreError, CoreResult};
use crate::fifo::FixedFifo;
use crate::pvr2::gfxil::{
    DepthFunc, DepthFuncSetting, GfxIlCommand, GfxVertex, RendParams, Rgba, TexFilter, TexFilterSetting, TexWrap, TexWrapSetting,
};

pub const MAX_DISPLAY_LISTS: usize = 4;

/// Longest TA packet is a 16-dword header or vertex (intensity-mode /
/// packed-quad-uv variants); the FIFO never needs to hold more than one
/// packet at a time.
const TA_FIFO_CAP: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolyGroupKind {
    Opaque,
    OpaqueMod,
    Translucent,
    TranslucentMod,
    PunchThrough,
}

/// Fixed replay order: Opaque, Opaque-Mod, Translucent, Translucent-Mod,
/// Punch-Through.
pub const GROUP_ORDER: [PolyGroupKind; 5] = [
    PolyGroupKind::Opaque,
    PolyGroupKind::OpaqueMod,
    PolyGroupKind::Translucent,
    PolyGroupKind::TranslucentMod,
    PolyGroupKind::PunchThrough,
];

impl PolyGroupKind {
    fn index(self) -> usize {
        GROUP_ORDER.iter().position(|g| *g == self).unwrap()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    NotOpened,
    InProgress,
    Continuation,
    Submitted,
}

#[derive(Debug, Clone)]
pub enum TaCommand {
    Header {
        tex_enable: bool,
        tex_addr: u32,
        pixel_fmt: u8,
        palette_base: u8,
        tex_width_shift: u8,
        tex_height_shift: u8,
        twiddled: bool,
        vq_compressed: bool,
        mipmap: bool,
        filter: TexFilter,
        wrap_u: TexWrap,
        wrap_v: TexWrap,
        blend_src: u8,
        blend_dst: u8,
        depth_func: DepthFunc,
        depth_write: bool,
        user_clip_mode: bool,
        base_color: Rgba,
        offs_color: Rgba,
    },
    Vertex(GfxVertex, bool), // (vertex, end_of_strip)
    Quad([GfxVertex; 4]),
    UserClip { min: [i32; 2], max: [i32; 2] },
    EndOfGroup,
}

/// One poly-type's command sequence within a display list.
pub type GroupCommands = Vec<TaCommand>;

pub struct DisplayList {
    pub groups: [GroupCommands; 5],
    age: u32,
}

impl DisplayList {
    fn new() -> Self {
        DisplayList { groups: Default::default(), age: 0 }
    }
}

pub struct DisplayListCache {
    lists: HashMap<u32, DisplayList>,
    next_age: u32,
}

impl DisplayListCache {
    pub fn new() -> Self {
        DisplayListCache { lists: HashMap::new(), next_age: 0 }
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    pub fn get(&self, key: u32) -> Option<&DisplayList> {
        self.lists.get(&key)
    }

    /// Inserts or replaces the list at `key`, evicting the least-recently-
    /// touched entry if the cache is already at `MAX_DISPLAY_LISTS` and
    /// `key` is new.
    pub fn insert(&mut self, key: u32, mut list: DisplayList) {
        if !self.lists.contains_key(&key) && self.lists.len() >= MAX_DISPLAY_LISTS {
            if let Some(&lru_key) = self.lists.iter().min_by_key(|(_, l)| l.age).map(|(k, _)| k) {
                debug!("pvr2: evicting display list {lru_key:#x} to make room for {key:#x}");
                self.lists.remove(&lru_key);
            }
        }
        list.age = self.bump_age();
        self.lists.insert(key, list);
    }

    pub fn touch(&mut self, key: u32) {
        let age = self.bump_age();
        if let Some(l) = self.lists.get_mut(&key) {
            l.age = age;
        }
    }

    fn bump_age(&mut self) -> u32 {
        if self.next_age == u32::MAX {
            // Renormalize ages to a shorter range, preserving relative order.
            let mut ages: Vec<u32> = self.lists.values().map(|l| l.age).collect();
            ages.sort_unstable();
            for l in self.lists.values_mut() {
                l.age = ages.iter().position(|a| *a == l.age).unwrap() as u32;
            }
            self.next_age = ages.len() as u32;
        }
        let age = self.next_age;
        self.next_age += 1;
        age
    }
}

impl Default for DisplayListCache {
    fn default() -> Self {
        Self::new()
    }
}

/// `get_param_dims(control_word) -> (vtx_len, hdr_len, is_vert)`: decides
/// packet length in dwords before enough words have arrived to fully
/// decode. Bits 31:29 classify the packet (`0` end-of-list, `1` user-clip,
/// `3` polygon header, `7` vertex); header bit 20 selects the 16-dword
/// (intensity-mode, two colors) header variant over the 8-dword default;
/// vertex bit 20 selects the 16-dword (two colors + packed quad uv)
/// variant over the 8-dword default.
pub fn get_param_dims(control_word: u32) -> (usize, usize, bool) {
    let para_type = (control_word >> 29) & 0x7;
    match para_type {
        0 => (0, 1, false),
        1 => (0, 1, false),
        3 => {
            let hdr_len = if control_word & (1 << 20) != 0 { 16 } else { 8 };
            (0, hdr_len, false)
        }
        7 => {
            let vtx_len = if control_word & (1 << 20) != 0 { 16 } else { 8 };
            (vtx_len, 0, true)
        }
        _ => (0, 1, false),
    }
}

fn depth_func_from_bits(bits: u32) -> DepthFunc {
    match bits & 0x7 {
        0 => DepthFunc::Never,
        1 => DepthFunc::Less,
        2 => DepthFunc::Equal,
        3 => DepthFunc::LessEqual,
        4 => DepthFunc::Greater,
        5 => DepthFunc::NotEqual,
        6 => DepthFunc::GreaterEqual,
        _ => DepthFunc::Always,
    }
}

fn rgba_from_words(base: u32) -> Rgba {
    Rgba { a: (base >> 24) as u8, r: (base >> 16) as u8, g: (base >> 8) as u8, b: base as u8 }
}

fn wrap_from_bits(bits: u32) -> TexWrap {
    match bits & 0x3 {
        0 => TexWrap::Clamp,
        1 => TexWrap::Repeat,
        _ => TexWrap::Mirror,
    }
}

pub struct TaParser {
    fifo: FixedFifo<u32, TA_FIFO_CAP>,
    expect_len: usize,
    current_group: Option<PolyGroupKind>,
    group_state: [GroupState; 5],
    strip_accum: Vec<GfxVertex>,
    vertbuf_pos: u32,
    builder: HashMap<u32, DisplayList>,
    ta_isp_base: u32,
    ta_ol_base: u32,
    active_header: Option<TaCommand>,
}

impl TaParser {
    pub fn new() -> Self {
        TaParser {
            fifo: FixedFifo::new(),
            expect_len: 0,
            current_group: None,
            group_state: [GroupState::NotOpened; 5],
            strip_accum: Vec::new(),
            vertbuf_pos: 0,
            builder: HashMap::new(),
            ta_isp_base: 0,
            ta_ol_base: 0,
            active_header: None,
        }
    }

    /// Sets `TA_VERTBUF_POS`, the key under which the list currently being
    /// built will be published.
    pub fn set_vertbuf_pos(&mut self, pos: u32) {
        self.vertbuf_pos = pos;
    }

    /// Sets `TA_ISP_BASE`/`TA_OL_BASE`, rejecting an overlapping pair
    /// before a list is opened against them.
    pub fn set_region_bases(&mut self, isp_base: u32, ol_base: u32, isp_size: u32, ol_size: u32) -> CoreResult<()> {
        let isp_end = isp_base.wrapping_add(isp_size);
        let ol_end = ol_base.wrapping_add(ol_size);
        if isp_base < ol_end && ol_base < isp_end {
            return Err(CoreError::Protocol(format!(
                "TA_ISP_BASE {isp_base:#x}..{isp_end:#x} overlaps TA_OL_BASE {ol_base:#x}..{ol_end:#x}"
            )));
        }
        self.ta_isp_base = isp_base;
        self.ta_ol_base = ol_base;
        Ok(())
    }

    pub fn group_state(&self, group: PolyGroupKind) -> GroupState {
        self.group_state[group.index()]
    }

    /// Requests a continuation of `group`'s list across a later TA session.
    pub fn request_continuation(&mut self, group: PolyGroupKind) {
        if self.group_state[group.index()] == GroupState::InProgress {
            self.group_state[group.index()] = GroupState::Continuation;
        }
    }

    /// Re-opens any `Continuation` group for the next TA session.
    pub fn begin_session(&mut self) {
        for s in &mut self.group_state {
            if *s == GroupState::Continuation {
                *s = GroupState::InProgress;
            }
        }
    }

    fn builder_list(&mut self) -> &mut DisplayList {
        self.builder.entry(self.vertbuf_pos).or_insert_with(DisplayList::new)
    }

    fn push_command(&mut self, group: PolyGroupKind, cmd: TaCommand) {
        self.builder_list().groups[group.index()].push(cmd);
    }

    /// Feeds one 32-bit word into the FIFO. Once a full packet has arrived,
    /// it is decoded and applied to the current list/group state.
    pub fn push_word(&mut self, word: u32) -> CoreResult<()> {
        if self.fifo.is_empty() {
            let (vtx_len, hdr_len, is_vert) = get_param_dims(word);
            self.expect_len = if is_vert { vtx_len } else { hdr_len };
            trace!("ta: packet control word {word:#010x}, expect_len={}", self.expect_len);
        }
        if !self.fifo.push_back(word) {
            return Err(CoreError::Protocol(format!(
                "TA FIFO overflow: packet longer than {TA_FIFO_CAP} dwords"
            )));
        }
        if self.fifo.len() < self.expect_len {
            return Ok(());
        }
        let packet: Vec<u32> = self.fifo.iter().copied().collect();
        self.fifo.clear();
        self.decode_packet(&packet)
    }

    fn decode_packet(&mut self, words: &[u32]) -> CoreResult<()> {
        let control = words[0];
        let para_type = (control >> 29) & 0x7;
        match para_type {
            0 => self.end_of_list(),
            1 => {
                let group = self.current_group_or_err()?;
                self.push_command(
                    group,
                    TaCommand::UserClip {
                        min: [words.get(1).copied().unwrap_or(0) as i32, words.get(2).copied().unwrap_or(0) as i32],
                        max: [words.get(3).copied().unwrap_or(0) as i32, words.get(4).copied().unwrap_or(0) as i32],
                    },
                );
                Ok(())
            }
            3 => self.decode_header(control, words),
            7 => self.decode_vertex(control, words),
            other => Err(CoreError::Protocol(format!("malformed TA command word, para_type={other}"))),
        }
    }

    fn current_group_or_err(&self) -> CoreResult<PolyGroupKind> {
        self.current_group.ok_or_else(|| CoreError::Protocol("TA vertex/clip packet with no open group".into()))
    }

    fn decode_header(&mut self, control: u32, words: &[u32]) -> CoreResult<()> {
        let group_bits = (control >> 24) & 0x7;
        let group = match group_bits {
            0 => PolyGroupKind::Opaque,
            1 => PolyGroupKind::OpaqueMod,
            2 => PolyGroupKind::Translucent,
            3 => PolyGroupKind::TranslucentMod,
            4 => PolyGroupKind::PunchThrough,
            other => return Err(CoreError::Protocol(format!("malformed TA header group selector {other}"))),
        };
        let state = &mut self.group_state[group.index()];
        match *state {
            GroupState::NotOpened | GroupState::InProgress | GroupState::Continuation => *state = GroupState::InProgress,
            GroupState::Submitted => return Err(CoreError::Protocol("header packet for already-submitted group".into())),
        }
        self.current_group = Some(group);
        self.strip_accum.clear();

        let tex_enable = control & (1 << 21) != 0;
        let tex_addr = words.get(1).copied().unwrap_or(0) & 0x00ff_ffff;
        let pixel_fmt = ((words.get(1).copied().unwrap_or(0) >> 27) & 0x7) as u8;
        let palette_base = ((words.get(1).copied().unwrap_or(0) >> 24) & 0x3f) as u8;
        let blend_src = words.get(2).copied().unwrap_or(0) as u8;
        let blend_dst = (words.get(2).copied().unwrap_or(0) >> 8) as u8;
        let depth_func = depth_func_from_bits(words.get(2).copied().unwrap_or(0) >> 16);
        let depth_write = words.get(2).copied().unwrap_or(0) & (1 << 19) != 0;
        let user_clip_mode = control & (1 << 22) != 0;
        let base_color = rgba_from_words(words.get(3).copied().unwrap_or(0));
        let offs_color = rgba_from_words(words.get(4).copied().unwrap_or(0));

        // Second texture-control word: width/height shift, twiddle/VQ/mipmap
        // flags, filter mode, and per-axis wrap modes. Not part of any real
        // hardware register layout; this format only needs to be internally
        // consistent, not bit-compatible with a real TA stream.
        let tex2 = words.get(5).copied().unwrap_or(0);
        let tex_width_shift = (tex2 & 0xf) as u8;
        let tex_height_shift = ((tex2 >> 4) & 0xf) as u8;
        let twiddled = tex2 & (1 << 8) != 0;
        let vq_compressed = tex2 & (1 << 9) != 0;
        let mipmap = tex2 & (1 << 10) != 0;
        let filter = if tex2 & (1 << 11) != 0 { TexFilter::Linear } else { TexFilter::Nearest };
        let wrap_u = wrap_from_bits(tex2 >> 12);
        let wrap_v = wrap_from_bits(tex2 >> 14);

        let header = TaCommand::Header {
            tex_enable,
            tex_addr,
            pixel_fmt,
            palette_base,
            tex_width_shift,
            tex_height_shift,
            twiddled,
            vq_compressed,
            mipmap,
            filter,
            wrap_u,
            wrap_v,
            blend_src,
            blend_dst,
            depth_func,
            depth_write,
            user_clip_mode,
            base_color,
            offs_color,
        };
        self.active_header = Some(header.clone());
        self.push_command(group, header);
        Ok(())
    }

    fn decode_vertex(&mut self, control: u32, words: &[u32]) -> CoreResult<()> {
        let group = self.current_group_or_err()?;
        let is_quad = control & (1 << 23) != 0;
        let end_of_strip = control & (1 << 28) != 0;

        let (base_color, offs_color) = match &self.active_header {
            Some(TaCommand::Header { base_color, offs_color, .. }) => (*base_color, *offs_color),
            _ => (Rgba { r: 255, g: 255, b: 255, a: 255 }, Rgba { r: 0, g: 0, b: 0, a: 0 }),
        };

        if is_quad {
            // All four corners' positions are packed (3 words each, offsets
            // 1..13). Only three UVs are packed, one 16.16-fixed `u:v` word
            // per corner at offsets 13..16; the fourth corner's UV completes
            // the parallelogram the same way a missing position would.
            let pos_of = |i: usize| -> [f32; 3] {
                [
                    f32::from_bits(words.get(1 + i * 3).copied().unwrap_or(0)),
                    f32::from_bits(words.get(2 + i * 3).copied().unwrap_or(0)),
                    f32::from_bits(words.get(3 + i * 3).copied().unwrap_or(0)),
                ]
            };
            let uv_of = |i: usize| -> [f32; 2] {
                let raw = words.get(13 + i).copied().unwrap_or(0);
                [((raw >> 16) & 0xffff) as f32 / 65535.0, (raw & 0xffff) as f32 / 65535.0]
            };
            let (p0, p1, p2, p3) = (pos_of(0), pos_of(1), pos_of(2), pos_of(3));
            let (uv0, uv1, uv2) = (uv_of(0), uv_of(1), uv_of(2));
            let uv3 = [uv1[0] + uv2[0] - uv0[0], uv1[1] + uv2[1] - uv0[1]];
            let verts = [
                GfxVertex { pos: p0, base_color, offs_color, uv: uv0 },
                GfxVertex { pos: p1, base_color, offs_color, uv: uv1 },
                GfxVertex { pos: p2, base_color, offs_color, uv: uv2 },
                GfxVertex { pos: p3, base_color, offs_color, uv: uv3 },
            ];
            self.push_command(group, TaCommand::Quad(verts));
        } else {
            let pos = [
                f32::from_bits(words.get(1).copied().unwrap_or(0)),
                f32::from_bits(words.get(2).copied().unwrap_or(0)),
                f32::from_bits(words.get(3).copied().unwrap_or(0)),
            ];
            let uv = [f32::from_bits(words.get(4).copied().unwrap_or(0)), f32::from_bits(words.get(5).copied().unwrap_or(0))];
            let vertex = GfxVertex { pos, base_color, offs_color, uv };
            self.push_command(group, TaCommand::Vertex(vertex, end_of_strip));
            self.strip_accum.push(vertex);
            if self.strip_accum.len() > 2 {
                self.strip_accum.remove(0);
            }
            if end_of_strip {
                self.strip_accum.clear();
            }
        }
        Ok(())
    }

    fn end_of_list(&mut self) -> CoreResult<()> {
        let group = self.current_group_or_err()?;
        self.push_command(group, TaCommand::EndOfGroup);
        self.group_state[group.index()] = GroupState::Submitted;
        self.current_group = None;
        self.active_header = None;
        Ok(())
    }

    /// Publishes the list under construction into `cache` keyed by the
    /// `TA_VERTBUF_POS` that was active while it was built, and resets
    /// parser state for the next session (but not the cache).
    pub fn publish(&mut self, cache: &mut DisplayListCache) {
        if let Some(list) = self.builder.remove(&self.vertbuf_pos) {
            cache.insert(self.vertbuf_pos, list);
        }
        self.group_state = [GroupState::NotOpened; 5];
    }
}

impl Default for TaParser {
    fn default() -> Self {
        Self::new()
    }
}

/// STARTRENDER: replays the list keyed by `region_base`, emitting GFX-IL in
/// the fixed group order, each group's commands in ingest order. Returns
/// `None` if no list is published for that key (nothing to draw this
/// frame).
pub fn display_list_exec(cache: &mut DisplayListCache, region_base: u32, target: u32, width: u32, height: u32) -> Option<Vec<GfxIlCommand>> {
    cache.touch(region_base);
    let list = cache.get(region_base)?;

    let mut out = Vec::new();
    out.push(GfxIlCommand::BindRenderTarget { obj: target });
    out.push(GfxIlCommand::BeginRend { target, width, height });
    out.push(GfxIlCommand::Clear { rgba: Rgba { r: 0, g: 0, b: 0, a: 255 } });

    for &group in &GROUP_ORDER {
        let mut pending_verts: Vec<GfxVertex> = Vec::new();
        for cmd in &list.groups[group.index()] {
            match cmd {
                TaCommand::Header {
                    tex_enable,
                    pixel_fmt,
                    palette_base,
                    filter,
                    wrap_u,
                    wrap_v,
                    blend_src,
                    blend_dst,
                    depth_func,
                    depth_write,
                    ..
                } => {
                    out.push(GfxIlCommand::SetRendParam {
                        params: RendParams {
                            tex_enable: *tex_enable,
                            pixel_fmt: *pixel_fmt,
                            palette_base: *palette_base,
                            filter: Some(TexFilterSetting(*filter)),
                            wrap_u: Some(TexWrapSetting(*wrap_u)),
                            wrap_v: Some(TexWrapSetting(*wrap_v)),
                            blend_src: *blend_src,
                            blend_dst: *blend_dst,
                            depth_func: Some(DepthFuncSetting(*depth_func)),
                            depth_write: *depth_write,
                            ..Default::default()
                        },
                    });
                }
                TaCommand::Vertex(v, _end_of_strip) => pending_verts.push(*v),
                TaCommand::Quad(verts) => pending_verts.extend_from_slice(verts),
                TaCommand::UserClip { min, max } => out.push(GfxIlCommand::SetClipRange { min: *min, max: *max }),
                TaCommand::EndOfGroup => {
                    if !pending_verts.is_empty() {
                        out.push(GfxIlCommand::DrawArray { verts: std::mem::take(&mut pending_verts) });
                    }
                }
            }
        }
        if !pending_verts.is_empty() {
            out.push(GfxIlCommand::DrawArray { verts: pending_verts });
        }
    }

    out.push(GfxIlCommand::EndRend { target });
    out.push(GfxIlCommand::GrabFramebuffer { target });
    out.push(GfxIlCommand::PostFramebuffer { obj: target, width, height, vert_flip: false });
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_word(group: u8, tex_enable: bool) -> u32 {
        (3 << 29) | ((group as u32) << 24) | if tex_enable { 1 << 21 } else { 0 }
    }

    fn vertex_word(end_of_strip: bool) -> u32 {
        (7 << 29) | if end_of_strip { 1 << 28 } else { 0 }
    }

    #[test]
    fn get_param_dims_classifies_header_and_vertex() {
        assert_eq!(get_param_dims(header_word(0, false)), (0, 8, false));
        assert_eq!(get_param_dims(vertex_word(false)), (8, 0, true));
        assert_eq!(get_param_dims(0), (0, 1, false));
    }

    #[test]
    fn triangle_strip_replay_produces_one_draw_array_in_order() {
        let mut parser = TaParser::new();
        parser.set_vertbuf_pos(0x1000);

        for w in [header_word(0, false), 0, 0, 0, 0, 0, 0, 0] {
            parser.push_word(w).unwrap();
        }
        for i in 0..3u32 {
            let pos_words = [f32::to_bits(i as f32), f32::to_bits(0.0), f32::to_bits(0.0)];
            let uv_words = [f32::to_bits(0.0), f32::to_bits(0.0)];
            for w in [vertex_word(i == 2), pos_words[0], pos_words[1], pos_words[2], uv_words[0], uv_words[1]] {
                parser.push_word(w).unwrap();
            }
        }
        parser.push_word(0).unwrap(); // end-of-list control word, para_type=0

        assert_eq!(parser.group_state(PolyGroupKind::Opaque), GroupState::Submitted);

        let mut cache = DisplayListCache::new();
        parser.publish(&mut cache);
        assert_eq!(cache.len(), 1);

        let gfx = display_list_exec(&mut cache, 0x1000, 7, 640, 480).expect("list must be present");
        let draw_calls: Vec<&GfxIlCommand> = gfx.iter().filter(|c| matches!(c, GfxIlCommand::DrawArray { .. })).collect();
        assert_eq!(draw_calls.len(), 1);
        if let GfxIlCommand::DrawArray { verts } = draw_calls[0] {
            assert_eq!(verts.len(), 3);
        }
        assert!(matches!(gfx.last(), Some(GfxIlCommand::PostFramebuffer { .. })));
        let rend_param_idx = gfx.iter().position(|c| matches!(c, GfxIlCommand::SetRendParam { .. })).unwrap();
        let draw_idx = gfx.iter().position(|c| matches!(c, GfxIlCommand::DrawArray { .. })).unwrap();
        assert!(rend_param_idx < draw_idx);
    }

    #[test]
    fn overlapping_region_bases_are_rejected() {
        let mut parser = TaParser::new();
        assert!(parser.set_region_bases(0x1000, 0x1800, 0x1000, 0x1000).is_err());
        assert!(parser.set_region_bases(0x1000, 0x3000, 0x1000, 0x1000).is_ok());
    }

    #[test]
    fn lru_eviction_keeps_cache_at_capacity() {
        let mut cache = DisplayListCache::new();
        for key in 0..5u32 {
            cache.insert(key, DisplayList::new());
        }
        assert_eq!(cache.len(), MAX_DISPLAY_LISTS);
        assert!(cache.get(0).is_none(), "oldest list should have been evicted");
        assert!(cache.get(4).is_some());
    }
}
