//! A single drawing surface: an RGBA raster with modified-region tracking
//! and a pending rectangle path.
//!
//! Layers come in two kinds. **Buffers** are off-screen scratch surfaces
//! that start at 0×0 and grow automatically when drawn beyond their bounds
//! (`autosize`). **Visible layers** are sized up front and participate in the
//! final composition. The default layer (id 0) is a visible surface that
//! also autosizes, so a recording that never sends an explicit `size` still
//! produces a screen.

use image::RgbaImage;

use crate::display::compose::{blend, CompositeOp};
use crate::display::geometry::Rect;

pub struct Layer {
    image: RgbaImage,
    visible: bool,
    autosize: bool,
    modified: bool,
    modified_rect: Rect,
    path_open: bool,
    path: Vec<Rect>,
    path_rect: Rect,
    offset: (i32, i32),
    z: i32,
}

impl Layer {
    /// An off-screen buffer: invisible, 0×0, growing on demand.
    pub(crate) fn buffer() -> Self {
        Self {
            image: RgbaImage::new(0, 0),
            visible: false,
            autosize: true,
            modified: false,
            modified_rect: Rect::ZERO,
            path_open: false,
            path: Vec::new(),
            path_rect: Rect::ZERO,
            offset: (0, 0),
            z: 0,
        }
    }

    /// The screen surface for layer id 0.
    pub(crate) fn default_layer() -> Self {
        let mut layer = Self::buffer();
        layer.visible = true;
        layer
    }

    /// A visible layer created at the given size (the default layer's size
    /// at creation time).
    pub(crate) fn visible_layer(width: i32, height: i32) -> Self {
        Self {
            image: RgbaImage::new(width.max(0) as u32, height.max(0) as u32),
            visible: true,
            autosize: false,
            modified: false,
            modified_rect: Rect::ZERO,
            path_open: false,
            path: Vec::new(),
            path_rect: Rect::ZERO,
            offset: (0, 0),
            z: 0,
        }
    }

    pub fn width(&self) -> i32 {
        self.image.width() as i32
    }

    pub fn height(&self) -> i32 {
        self.image.height() as i32
    }

    pub fn bounds(&self) -> Rect {
        Rect::from_size(0, 0, self.width(), self.height())
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn modified_rect(&self) -> Rect {
        self.modified_rect
    }

    pub fn offset(&self) -> (i32, i32) {
        self.offset
    }

    pub fn z(&self) -> i32 {
        self.z
    }

    pub(crate) fn update_modified(&mut self, area: Rect) {
        let before = self.modified_rect;
        self.modified_rect = before.union(area);
        if self.modified_rect != before {
            self.modified = true;
        }
    }

    pub(crate) fn reset_modified(&mut self) {
        self.modified_rect = Rect::ZERO;
        self.modified = false;
    }

    /// Reallocates the surface at the new size, keeping the old content
    /// anchored at the origin with replace semantics.
    pub fn resize(&mut self, width: i32, height: i32) {
        let width = width.max(0);
        let height = height.max(0);
        if width == self.width() && height == self.height() {
            return;
        }

        let original = self.bounds();
        let mut next = RgbaImage::new(width as u32, height as u32);
        image::imageops::replace(&mut next, &self.image, 0, 0);
        self.image = next;

        self.update_modified(original.union(self.bounds()));
    }

    /// Grows the surface, if needed, to contain the given rectangle.
    fn fit_rect(&mut self, x: i32, y: i32, w: i32, h: i32) {
        let target = self.bounds().union(Rect::from_size(x, y, w, h));
        self.resize(target.x1, target.y1);
    }

    /// Composites `src` into the surface at `(x, y)` under the operator.
    pub fn draw(&mut self, x: i32, y: i32, src: &RgbaImage, op: CompositeOp) {
        let (sw, sh) = (src.width() as i32, src.height() as i32);
        if self.autosize {
            self.fit_rect(x, y, sw, sh);
        }

        let target = Rect::from_size(x, y, sw, sh).intersect(self.bounds());
        if target.is_empty() {
            return;
        }

        for ty in target.y0..target.y1 {
            for tx in target.x0..target.x1 {
                let sp = src.get_pixel((tx - x) as u32, (ty - y) as u32).0;
                let dp = self.image.get_pixel(tx as u32, ty as u32).0;
                self.image
                    .put_pixel(tx as u32, ty as u32, image::Rgba(blend(op, dp, sp)));
            }
        }
        self.update_modified(target);
    }

    /// Extracts a clipped copy of the given source rectangle.
    ///
    /// Returns `None` when the rectangle starts outside the surface or is
    /// empty after clipping, which callers treat as "nothing to copy".
    pub fn copy_region(&self, sx: i32, sy: i32, mut sw: i32, mut sh: i32) -> Option<RgbaImage> {
        if sx >= self.width() || sy >= self.height() {
            return None;
        }

        let (mut sx, mut sy) = (sx, sy);
        if sx < 0 {
            sw += sx;
            sx = 0;
        }
        if sy < 0 {
            sh += sy;
            sy = 0;
        }
        sw = sw.min(self.width() - sx);
        sh = sh.min(self.height() - sy);
        if sw <= 0 || sh <= 0 {
            return None;
        }

        let mut out = RgbaImage::new(sw as u32, sh as u32);
        for y in 0..sh {
            for x in 0..sw {
                let px = self.image.get_pixel((sx + x) as u32, (sy + y) as u32);
                out.put_pixel(x as u32, y as u32, *px);
            }
        }
        Some(out)
    }

    /// Appends a rectangle to the pending path, opening it if necessary.
    pub fn rect(&mut self, x: i32, y: i32, w: i32, h: i32) {
        if !self.path_open {
            self.path_open = true;
            self.path.clear();
            self.path_rect = Rect::ZERO;
        }
        let r = Rect::from_size(x, y, w, h);
        self.path.push(r);
        self.path_rect = self.path_rect.union(r);
    }

    /// Paints every pixel of the pending path with the colour under the
    /// operator, then closes the path.
    pub fn fill(&mut self, color: [u8; 4], op: CompositeOp) {
        let rects = std::mem::take(&mut self.path);
        for r in &rects {
            self.blend_rect(r.intersect(self.bounds()), color, op);
        }
        self.path = rects;
        self.end_path();
    }

    /// Paints the border of every pending rectangle at the given thickness,
    /// then closes the path. This is the rectangle-only rendition of a path
    /// stroke; recordings do not use general vector strokes.
    pub fn stroke(&mut self, color: [u8; 4], thickness: i32, op: CompositeOp) {
        let thickness = thickness.max(1);
        let rects = std::mem::take(&mut self.path);
        for r in &rects {
            let outer = r.intersect(self.bounds());
            let inner = Rect::new(
                r.x0 + thickness,
                r.y0 + thickness,
                r.x1 - thickness,
                r.y1 - thickness,
            );
            for y in outer.y0..outer.y1 {
                for x in outer.x0..outer.x1 {
                    if !inner.contains(x, y) {
                        self.blend_pixel(x, y, color, op);
                    }
                }
            }
        }
        self.path = rects;
        self.end_path();
    }

    fn blend_rect(&mut self, r: Rect, color: [u8; 4], op: CompositeOp) {
        for y in r.y0..r.y1 {
            for x in r.x0..r.x1 {
                self.blend_pixel(x, y, color, op);
            }
        }
    }

    fn blend_pixel(&mut self, x: i32, y: i32, color: [u8; 4], op: CompositeOp) {
        let dp = self.image.get_pixel(x as u32, y as u32).0;
        self.image
            .put_pixel(x as u32, y as u32, image::Rgba(blend(op, dp, color)));
    }

    fn end_path(&mut self) {
        let path_rect = self.path_rect;
        self.update_modified(path_rect);
        self.path_open = false;
        self.path.clear();
        self.path_rect = Rect::ZERO;
    }

    /// Records the layer's translation and z hint. Pixels are untouched;
    /// both only matter when the display composes its visible layers.
    pub fn move_to(&mut self, x: i32, y: i32, z: i32) {
        self.offset = (x, y);
        self.z = z;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const BLUE: [u8; 4] = [0, 0, 255, 255];

    fn solid(w: u32, h: u32, px: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(w, h, image::Rgba(px))
    }

    #[test]
    fn test_buffer_starts_empty_with_autosize() {
        let layer = Layer::buffer();
        assert_eq!(layer.width(), 0);
        assert_eq!(layer.height(), 0);
        assert!(!layer.is_visible());
        assert!(!layer.is_modified());
    }

    #[test]
    fn test_resize_to_same_size_is_a_noop() {
        let mut layer = Layer::visible_layer(10, 10);
        layer.resize(10, 10);
        assert!(!layer.is_modified());
    }

    #[test]
    fn test_resize_preserves_content_at_origin() {
        let mut layer = Layer::visible_layer(4, 4);
        layer.draw(0, 0, &solid(4, 4, BLUE), CompositeOp::Src);
        layer.resize(8, 8);
        assert_eq!(layer.image().get_pixel(3, 3).0, BLUE);
        assert_eq!(layer.image().get_pixel(7, 7).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_resize_dirties_union_of_old_and_new_bounds() {
        let mut layer = Layer::visible_layer(10, 10);
        layer.reset_modified();
        layer.resize(4, 4);
        assert!(layer.is_modified());
        assert_eq!(layer.modified_rect(), Rect::from_size(0, 0, 10, 10));
    }

    #[test]
    fn test_draw_dirties_the_written_region() {
        let mut layer = Layer::visible_layer(100, 100);
        layer.draw(10, 20, &solid(30, 30, BLUE), CompositeOp::Over);
        assert!(layer.is_modified());
        assert_eq!(layer.modified_rect(), Rect::new(10, 20, 40, 50));
    }

    #[test]
    fn test_draw_clips_to_bounds() {
        let mut layer = Layer::visible_layer(10, 10);
        layer.draw(8, 8, &solid(5, 5, BLUE), CompositeOp::Src);
        assert_eq!(layer.image().get_pixel(9, 9).0, BLUE);
        assert_eq!(layer.modified_rect(), Rect::new(8, 8, 10, 10));
    }

    #[test]
    fn test_autosize_grows_layer_to_fit_draw() {
        let mut layer = Layer::buffer();
        layer.draw(10, 5, &solid(6, 6, BLUE), CompositeOp::Over);
        assert_eq!(layer.width(), 16);
        assert_eq!(layer.height(), 11);
        assert_eq!(layer.image().get_pixel(15, 10).0, BLUE);
    }

    #[test]
    fn test_copy_region_outside_source_returns_none() {
        let layer = Layer::visible_layer(10, 10);
        assert!(layer.copy_region(10, 0, 4, 4).is_none());
        assert!(layer.copy_region(0, 12, 4, 4).is_none());
    }

    #[test]
    fn test_copy_region_clips_to_source_bounds() {
        let mut layer = Layer::visible_layer(10, 10);
        layer.draw(0, 0, &solid(10, 10, BLUE), CompositeOp::Src);
        let region = layer.copy_region(6, 6, 10, 10).unwrap();
        assert_eq!(region.dimensions(), (4, 4));
        assert_eq!(region.get_pixel(0, 0).0, BLUE);
    }

    #[test]
    fn test_copy_region_empty_after_clip_returns_none() {
        let layer = Layer::visible_layer(10, 10);
        assert!(layer.copy_region(4, 4, 0, 5).is_none());
        assert!(layer.copy_region(-10, 0, 5, 5).is_none());
    }

    #[test]
    fn test_rect_then_fill_paints_and_dirties_path_bbox() {
        let mut layer = Layer::visible_layer(100, 100);
        layer.reset_modified();
        layer.rect(10, 20, 30, 30);
        layer.fill(BLUE, CompositeOp::Over);

        assert_eq!(layer.modified_rect(), Rect::new(10, 20, 40, 50));
        assert_eq!(layer.image().get_pixel(10, 20).0, BLUE);
        assert_eq!(layer.image().get_pixel(39, 49).0, BLUE);
        assert_eq!(layer.image().get_pixel(40, 50).0, [0, 0, 0, 0]);
        assert_eq!(layer.image().get_pixel(9, 19).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_fill_paints_every_pending_rect() {
        let mut layer = Layer::visible_layer(50, 50);
        layer.rect(0, 0, 5, 5);
        layer.rect(20, 20, 5, 5);
        layer.fill(BLUE, CompositeOp::Over);

        assert_eq!(layer.image().get_pixel(2, 2).0, BLUE);
        assert_eq!(layer.image().get_pixel(22, 22).0, BLUE);
        // The gap between the two rects stays untouched even though it lies
        // inside the path bounding box.
        assert_eq!(layer.image().get_pixel(10, 10).0, [0, 0, 0, 0]);
        assert_eq!(layer.modified_rect(), Rect::new(0, 0, 25, 25));
    }

    #[test]
    fn test_fill_closes_the_path() {
        let mut layer = Layer::visible_layer(50, 50);
        layer.rect(0, 0, 5, 5);
        layer.fill(BLUE, CompositeOp::Over);
        layer.reset_modified();

        // A second fill with no new rects paints nothing.
        layer.fill([255, 0, 0, 255], CompositeOp::Over);
        assert_eq!(layer.image().get_pixel(2, 2).0, BLUE);
    }

    #[test]
    fn test_fill_honours_the_operator() {
        let mut layer = Layer::visible_layer(10, 10);
        layer.draw(0, 0, &solid(10, 10, BLUE), CompositeOp::Src);
        layer.rect(0, 0, 10, 10);
        // Rin keeps the destination wherever the (opaque) fill colour lands.
        layer.fill([255, 0, 0, 255], CompositeOp::Rin);
        assert_eq!(layer.image().get_pixel(5, 5).0, BLUE);
    }

    #[test]
    fn test_stroke_paints_border_only() {
        let mut layer = Layer::visible_layer(50, 50);
        layer.rect(10, 10, 20, 20);
        layer.stroke(BLUE, 2, CompositeOp::Over);

        assert_eq!(layer.image().get_pixel(10, 10).0, BLUE);
        assert_eq!(layer.image().get_pixel(11, 29).0, BLUE);
        // Interior stays clear.
        assert_eq!(layer.image().get_pixel(20, 20).0, [0, 0, 0, 0]);
        assert_eq!(layer.modified_rect(), Rect::new(10, 10, 30, 30));
    }

    #[test]
    fn test_move_records_offset_and_z_without_pixels() {
        let mut layer = Layer::visible_layer(10, 10);
        layer.reset_modified();
        layer.move_to(5, 7, 3);
        assert_eq!(layer.offset(), (5, 7));
        assert_eq!(layer.z(), 3);
        assert!(!layer.is_modified());
    }
}
