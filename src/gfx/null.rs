//! No-op graphics backend used by headless mode and by tests. No-ops
//! everything except object storage, which it tracks faithfully so a
//! `READ_OBJ` after `WRITE_OBJ` returns what was written.

use std::collections::HashMap;

use crate::error::{CoreError, CoreResult};
use crate::pvr2::gfxil::{GfxVertex, Rgba, RendParams};

use super::GfxBackend;

#[derive(Default)]
pub struct NullBackend {
    objects: HashMap<u32, Vec<u8>>,
    pub draw_calls: usize,
    pub last_clear: Option<Rgba>,
}

impl NullBackend {
    pub fn new() -> Self {
        NullBackend::default()
    }
}

impl GfxBackend for NullBackend {
    fn bind_tex(&mut self, _obj: u32, _slot: u32) -> CoreResult<()> {
        Ok(())
    }
    fn unbind_tex(&mut self, _slot: u32) -> CoreResult<()> {
        Ok(())
    }
    fn bind_render_target(&mut self, _obj: u32) -> CoreResult<()> {
        Ok(())
    }
    fn unbind_render_target(&mut self, _obj: u32) -> CoreResult<()> {
        Ok(())
    }
    fn begin_rend(&mut self, _target: u32, _width: u32, _height: u32) -> CoreResult<()> {
        Ok(())
    }
    fn end_rend(&mut self, _target: u32) -> CoreResult<()> {
        Ok(())
    }
    fn clear(&mut self, rgba: Rgba) -> CoreResult<()> {
        self.last_clear = Some(rgba);
        Ok(())
    }
    fn set_blend_enable(&mut self, _enable: bool) -> CoreResult<()> {
        Ok(())
    }
    fn set_rend_param(&mut self, _params: RendParams) -> CoreResult<()> {
        Ok(())
    }
    fn set_clip_range(&mut self, _min: [i32; 2], _max: [i32; 2]) -> CoreResult<()> {
        Ok(())
    }
    fn draw_array(&mut self, _verts: &[GfxVertex]) -> CoreResult<()> {
        self.draw_calls += 1;
        Ok(())
    }
    fn init_obj(&mut self, obj: u32, bytes: usize) -> CoreResult<()> {
        self.objects.insert(obj, vec![0u8; bytes]);
        Ok(())
    }
    fn write_obj(&mut self, obj: u32, data: &[u8], offset: usize) -> CoreResult<()> {
        let buf = self
            .objects
            .get_mut(&obj)
            .ok_or_else(|| CoreError::Integrity(format!("write_obj: unknown object {obj}")))?;
        let end = offset + data.len();
        if end > buf.len() {
            return Err(CoreError::Integrity(format!(
                "write_obj: object {obj} overflow ({end} > {})",
                buf.len()
            )));
        }
        buf[offset..end].copy_from_slice(data);
        Ok(())
    }
    fn read_obj(&mut self, obj: u32, bytes: usize) -> CoreResult<Vec<u8>> {
        let buf = self
            .objects
            .get(&obj)
            .ok_or_else(|| CoreError::Integrity(format!("read_obj: unknown object {obj}")))?;
        Ok(buf[..bytes.min(buf.len())].to_vec())
    }
    fn free_obj(&mut self, obj: u32) -> CoreResult<()> {
        self.objects.remove(&obj);
        Ok(())
    }
    fn post_framebuffer(&mut self, _obj: u32, _width: u32, _height: u32, _vert_flip: bool) -> CoreResult<()> {
        Ok(())
    }
    fn grab_framebuffer(&mut self, _target: u32) -> CoreResult<Vec<u8>> {
        Ok(Vec::new())
    }
    fn begin_depth_sort(&mut self) -> CoreResult<()> {
        Ok(())
    }
    fn end_depth_sort(&mut self) -> CoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_write_read_round_trips() {
        let mut be = NullBackend::new();
        be.init_obj(1, 8).unwrap();
        be.write_obj(1, &[1, 2, 3, 4], 2).unwrap();
        let data = be.read_obj(1, 8).unwrap();
        assert_eq!(data, vec![0, 0, 1, 2, 3, 4, 0, 0]);
    }

    #[test]
    fn read_after_free_is_an_error() {
        let mut be = NullBackend::new();
        be.init_obj(1, 4).unwrap();
        be.free_obj(1).unwrap();
        assert!(be.read_obj(1, 4).is_err());
    }

    #[test]
    fn draw_array_is_counted_but_otherwise_a_no_op() {
        let mut be = NullBackend::new();
        be.draw_array(&[]).unwrap();
        be.draw_array(&[]).unwrap();
        assert_eq!(be.draw_calls, 2);
    }
}
