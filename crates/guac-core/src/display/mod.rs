//! The display compositor: a registry of layers plus the machinery that
//! flattens them into screen snapshots.
//!
//! Layer ids are signed integers. Id 0 is the default visible layer (the
//! screen target); positive ids are additional visible layers; negative ids
//! are off-screen buffers. Lookups create missing layers lazily with the
//! kind implied by the id.

use std::collections::HashMap;

use image::RgbaImage;
use tracing::debug;

use crate::display::compose::{blend, CompositeOp};
use crate::display::geometry::Rect;
use crate::display::layer::Layer;

pub mod client;
pub mod compose;
pub mod geometry;
pub mod handlers;
pub mod layer;
pub mod streams;

/// A cursor sprite captured from a layer region.
struct Cursor {
    image: RgbaImage,
    hotspot: (i32, i32),
}

/// All pixel state of one session.
pub struct Display {
    layers: HashMap<i32, Layer>,
    /// Layer ids in creation order; the z-sort tie-breaker.
    order: Vec<i32>,
    cursor: Option<Cursor>,
    pointer: (i32, i32),
    last_sync_ms: i64,
}

impl Display {
    pub fn new() -> Self {
        let mut layers = HashMap::new();
        layers.insert(0, Layer::default_layer());
        Self {
            layers,
            order: vec![0],
            cursor: None,
            pointer: (0, 0),
            last_sync_ms: 0,
        }
    }

    /// Returns the layer for `id`, creating it lazily: positive ids become
    /// visible layers sized to the default layer, negative ids become
    /// off-screen buffers.
    pub fn layer(&mut self, id: i32) -> &mut Layer {
        if !self.layers.contains_key(&id) {
            self.order.push(id);
        }
        let (dw, dh) = self.default_size();
        self.layers.entry(id).or_insert_with(|| {
            if id > 0 {
                Layer::visible_layer(dw, dh)
            } else {
                Layer::buffer()
            }
        })
    }

    /// The default (screen) layer.
    pub fn default_layer(&mut self) -> &mut Layer {
        self.layer(0)
    }

    fn default_size(&self) -> (i32, i32) {
        self.layers
            .get(&0)
            .map(|l| (l.width(), l.height()))
            .unwrap_or((0, 0))
    }

    /// Deletes a layer. Deleting the default layer is a no-op; any other
    /// deletion dirties the default layer with the deleted layer's former
    /// bounds so the next sync repaints that area.
    pub fn dispose(&mut self, id: i32) {
        if id == 0 {
            return;
        }
        if let Some(removed) = self.layers.remove(&id) {
            self.order.retain(|&other| other != id);
            let bounds = removed.bounds();
            self.default_layer().update_modified(bounds);
            debug!(layer = id, "layer disposed");
        }
    }

    /// Installs the cursor sprite and its hotspot.
    pub fn set_cursor(&mut self, image: RgbaImage, hotspot: (i32, i32)) {
        self.invalidate_pointer_area();
        self.cursor = Some(Cursor { image, hotspot });
        self.invalidate_pointer_area();
    }

    /// Moves the pointer, dirtying the sprite's old and new footprint.
    pub fn set_pointer(&mut self, x: i32, y: i32) {
        self.invalidate_pointer_area();
        self.pointer = (x, y);
        self.invalidate_pointer_area();
    }

    fn invalidate_pointer_area(&mut self) {
        let Some(cursor) = &self.cursor else { return };
        let (w, h) = (cursor.image.width() as i32, cursor.image.height() as i32);
        let (hx, hy) = cursor.hotspot;
        let area = Rect::from_size(self.pointer.0 - hx, self.pointer.1 - hy, w, h);
        self.default_layer().update_modified(area);
    }

    /// Visible non-default layer ids, in composition order: by z, then
    /// creation order, then id.
    fn stacking_order(&self) -> Vec<i32> {
        let mut stacked: Vec<(usize, i32)> = self
            .order
            .iter()
            .enumerate()
            .filter(|(_, id)| **id != 0)
            .filter(|(_, id)| self.layers.get(*id).is_some_and(Layer::is_visible))
            .map(|(created, id)| (created, *id))
            .collect();
        stacked.sort_by_key(|&(created, id)| {
            let z = self.layers.get(&id).map(Layer::z).unwrap_or(0);
            (z, created, id)
        });
        stacked.into_iter().map(|(_, id)| id).collect()
    }

    /// Flattens the visible layers into one screen-sized RGBA image.
    pub fn compose(&self) -> RgbaImage {
        let (width, height) = self.default_size();
        let mut screen = RgbaImage::new(width.max(0) as u32, height.max(0) as u32);

        if let Some(base) = self.layers.get(&0) {
            overlay(&mut screen, base.image(), 0, 0);
        }

        for id in self.stacking_order() {
            let Some(layer) = self.layers.get(&id) else { continue };
            let (ox, oy) = layer.offset();
            overlay(&mut screen, layer.image(), ox, oy);
        }

        if let Some(cursor) = &self.cursor {
            let (hx, hy) = cursor.hotspot;
            overlay(
                &mut screen,
                &cursor.image,
                self.pointer.0 - hx,
                self.pointer.1 - hy,
            );
        }

        screen
    }

    /// Composes the current screen and clears every layer's modified flag —
    /// the sync barrier.
    pub fn sync(&mut self, timestamp_ms: i64) -> RgbaImage {
        let screen = self.compose();
        for layer in self.layers.values_mut() {
            layer.reset_modified();
        }
        self.last_sync_ms = timestamp_ms;
        screen
    }

    /// Timestamp of the last sync, in server milliseconds.
    pub fn last_sync_ms(&self) -> i64 {
        self.last_sync_ms
    }

    /// Whether any layer changed since the last sync.
    pub fn is_modified(&self) -> bool {
        self.layers.values().any(Layer::is_modified)
    }

    /// Number of live layers, default layer included.
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }
}

impl Default for Display {
    fn default() -> Self {
        Self::new()
    }
}

/// Draws `src` over `dst` at the given position, clipping to `dst`.
fn overlay(dst: &mut RgbaImage, src: &RgbaImage, x: i32, y: i32) {
    let dst_bounds = Rect::from_size(0, 0, dst.width() as i32, dst.height() as i32);
    let target =
        Rect::from_size(x, y, src.width() as i32, src.height() as i32).intersect(dst_bounds);

    for ty in target.y0..target.y1 {
        for tx in target.x0..target.x1 {
            let sp = src.get_pixel((tx - x) as u32, (ty - y) as u32).0;
            let dp = dst.get_pixel(tx as u32, ty as u32).0;
            dst.put_pixel(tx as u32, ty as u32, image::Rgba(blend(CompositeOp::Over, dp, sp)));
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
