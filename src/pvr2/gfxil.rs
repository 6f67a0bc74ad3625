//! Backend-agnostic graphics command buffer: the closed set of commands the
//! emulation thread emits and a `GfxBackend` consumes.
//!
//! Mirrors the interpreter's closed-enum-plus-semantics shape one more
//! level removed from the guest: each variant here is a single graphics
//! operation, carrying exactly the operands a backend needs and nothing
//! about how the operation was produced.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthFunc {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TexFilter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TexWrap {
    Clamp,
    Repeat,
    Mirror,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RendParams {
    pub tex_enable: bool,
    pub tex_obj: u32,
    /// Raw PVR2 pixel-format selector (0-7: ARGB1555, RGB565, ARGB4444,
    /// YUV422, bump map, 4bpp/8bpp palette, reserved).
    pub pixel_fmt: u8,
    /// For the 4bpp/8bpp palette formats, ORed with each pixel's raw value
    /// to form the index into the palette table.
    pub palette_base: u8,
    pub filter: Option<TexFilterSetting>,
    pub wrap_u: Option<TexWrapSetting>,
    pub wrap_v: Option<TexWrapSetting>,
    pub blend_src: u8,
    pub blend_dst: u8,
    pub depth_func: Option<DepthFuncSetting>,
    pub depth_write: bool,
    pub alpha_ref: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TexFilterSetting(pub TexFilter);
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TexWrapSetting(pub TexWrap);
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthFuncSetting(pub DepthFunc);

impl Default for TexFilterSetting {
    fn default() -> Self {
        TexFilterSetting(TexFilter::Nearest)
    }
}
impl Default for TexWrapSetting {
    fn default() -> Self {
        TexWrapSetting(TexWrap::Clamp)
    }
}
impl Default for DepthFuncSetting {
    fn default() -> Self {
        DepthFuncSetting(DepthFunc::Less)
    }
}

/// One interleaved vertex: position, color, offset color, and uv. Kept flat
/// (no indirection through a separate attribute table) since `DRAW_ARRAY`
/// always consumes a contiguous run of these.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GfxVertex {
    pub pos: [f32; 3],
    pub base_color: Rgba,
    pub offs_color: Rgba,
    pub uv: [f32; 2],
}

#[derive(Debug, Clone)]
pub enum GfxIlCommand {
    BindTex { obj: u32, slot: u32 },
    UnbindTex { slot: u32 },
    BindRenderTarget { obj: u32 },
    UnbindRenderTarget { obj: u32 },
    BeginRend { target: u32, width: u32, height: u32 },
    EndRend { target: u32 },
    Clear { rgba: Rgba },
    SetBlendEnable { enable: bool },
    SetRendParam { params: RendParams },
    SetClipRange { min: [i32; 2], max: [i32; 2] },
    DrawArray { verts: Vec<GfxVertex> },
    InitObj { obj: u32, bytes: usize },
    WriteObj { obj: u32, data: Vec<u8>, offset: usize },
    ReadObj { obj: u32, bytes: usize },
    FreeObj { obj: u32 },
    PostFramebuffer { obj: u32, width: u32, height: u32, vert_flip: bool },
    GrabFramebuffer { target: u32 },
    BeginDepthSort,
    EndDepthSort,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_round_trips_through_clone() {
        let v = GfxVertex {
            pos: [1.0, 2.0, 3.0],
            base_color: Rgba { r: 255, g: 0, b: 0, a: 255 },
            offs_color: Rgba { r: 0, g: 0, b: 0, a: 0 },
            uv: [0.5, 0.25],
        };
        let v2 = v;
        assert_eq!(v, v2);
    }
}
