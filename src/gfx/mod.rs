//! `GfxBackend`: the trait a graphics backend implements to consume GFX-IL.
//!
//! This core never talks to a window system or a GPU API directly; it only
//! ever calls through this trait, which is exactly the `out of scope`
//! boundary the rest of the crate is built against.

pub mod null;

use crate::error::CoreResult;
use crate::pvr2::gfxil::{GfxIlCommand, GfxVertex, Rgba, RendParams};

pub trait GfxBackend {
    fn bind_tex(&mut self, obj: u32, slot: u32) -> CoreResult<()>;
    fn unbind_tex(&mut self, slot: u32) -> CoreResult<()>;
    fn bind_render_target(&mut self, obj: u32) -> CoreResult<()>;
    fn unbind_render_target(&mut self, obj: u32) -> CoreResult<()>;
    fn begin_rend(&mut self, target: u32, width: u32, height: u32) -> CoreResult<()>;
    fn end_rend(&mut self, target: u32) -> CoreResult<()>;
    fn clear(&mut self, rgba: Rgba) -> CoreResult<()>;
    fn set_blend_enable(&mut self, enable: bool) -> CoreResult<()>;
    fn set_rend_param(&mut self, params: RendParams) -> CoreResult<()>;
    fn set_clip_range(&mut self, min: [i32; 2], max: [i32; 2]) -> CoreResult<()>;
    fn draw_array(&mut self, verts: &[GfxVertex]) -> CoreResult<()>;
    fn init_obj(&mut self, obj: u32, bytes: usize) -> CoreResult<()>;
    fn write_obj(&mut self, obj: u32, data: &[u8], offset: usize) -> CoreResult<()>;
    fn read_obj(&mut self, obj: u32, bytes: usize) -> CoreResult<Vec<u8>>;
    fn free_obj(&mut self, obj: u32) -> CoreResult<()>;
    fn post_framebuffer(&mut self, obj: u32, width: u32, height: u32, vert_flip: bool) -> CoreResult<()>;
    fn grab_framebuffer(&mut self, target: u32) -> CoreResult<Vec<u8>>;
    fn begin_depth_sort(&mut self) -> CoreResult<()>;
    fn end_depth_sort(&mut self) -> CoreResult<()>;
}

/// Applies one GFX-IL command to a backend. The host graphics thread drains
/// `System::gfx_receiver()` and feeds each command batch through this one
/// at a time, in order.
pub fn dispatch(backend: &mut dyn GfxBackend, cmd: GfxIlCommand) -> CoreResult<()> {
    match cmd {
        GfxIlCommand::BindTex { obj, slot } => backend.bind_tex(obj, slot),
        GfxIlCommand::UnbindTex { slot } => backend.unbind_tex(slot),
        GfxIlCommand::BindRenderTarget { obj } => backend.bind_render_target(obj),
        GfxIlCommand::UnbindRenderTarget { obj } => backend.unbind_render_target(obj),
        GfxIlCommand::BeginRend { target, width, height } => backend.begin_rend(target, width, height),
        GfxIlCommand::EndRend { target } => backend.end_rend(target),
        GfxIlCommand::Clear { rgba } => backend.clear(rgba),
        GfxIlCommand::SetBlendEnable { enable } => backend.set_blend_enable(enable),
        GfxIlCommand::SetRendParam { params } => backend.set_rend_param(params),
        GfxIlCommand::SetClipRange { min, max } => backend.set_clip_range(min, max),
        GfxIlCommand::DrawArray { verts } => backend.draw_array(&verts),
        GfxIlCommand::InitObj { obj, bytes } => backend.init_obj(obj, bytes),
        GfxIlCommand::WriteObj { obj, data, offset } => backend.write_obj(obj, &data, offset),
        GfxIlCommand::ReadObj { obj, bytes } => backend.read_obj(obj, bytes).map(|_| ()),
        GfxIlCommand::FreeObj { obj } => backend.free_obj(obj),
        GfxIlCommand::PostFramebuffer { obj, width, height, vert_flip } => {
            backend.post_framebuffer(obj, width, height, vert_flip)
        }
        GfxIlCommand::GrabFramebuffer { target } => backend.grab_framebuffer(target).map(|_| ()),
        GfxIlCommand::BeginDepthSort => backend.begin_depth_sort(),
        GfxIlCommand::EndDepthSort => backend.end_depth_sort(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use null::NullBackend;

    #[test]
    fn dispatch_draw_array_reaches_the_backend() {
        let mut backend = NullBackend::new();
        dispatch(&mut backend, GfxIlCommand::DrawArray { verts: Vec::new() }).unwrap();
        assert_eq!(backend.draw_calls, 1);
    }
}
