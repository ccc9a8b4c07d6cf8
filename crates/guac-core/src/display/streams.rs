//! Reassembly of image streams.
//!
//! An `img` instruction opens a stream addressed by an opaque string id and
//! names a destination (layer, position, operator). `blob` instructions carry
//! base64 chunks; `end` finalises the stream, at which point the accumulated
//! payload is decoded according to its mimetype and handed back to the
//! caller for drawing. Orphan chunks referencing an unknown stream are a
//! warning, never a fault — guacd occasionally ends streams the client
//! already discarded.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use image::RgbaImage;
use thiserror::Error;
use tracing::warn;

use crate::display::compose::CompositeOp;

/// Errors raised while reassembling or decoding a stream.
#[derive(Debug, Error)]
pub enum StreamError {
    /// A blob chunk was not valid base64.
    #[error("invalid base64 in blob: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The accumulated payload could not be decoded as an image.
    #[error("could not decode \"{mimetype}\" stream: {source}")]
    Decode {
        mimetype: String,
        #[source]
        source: image::ImageError,
    },
}

/// One in-flight image stream.
struct ImageStream {
    mimetype: String,
    buf: Vec<u8>,
    layer: i32,
    x: i32,
    y: i32,
    op: CompositeOp,
}

/// A finalised stream: the decoded image plus its destination.
pub struct FinishedImage {
    pub image: RgbaImage,
    pub layer: i32,
    pub x: i32,
    pub y: i32,
    pub op: CompositeOp,
}

/// The table of open image streams, keyed by opaque stream id.
#[derive(Default)]
pub struct Streams {
    open: HashMap<String, ImageStream>,
}

impl Streams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new stream. Re-opening an id silently replaces the
    /// previous stream, matching the server's authority over ids.
    pub fn open(
        &mut self,
        stream_id: &str,
        mimetype: &str,
        layer: i32,
        x: i32,
        y: i32,
        op: CompositeOp,
    ) {
        if self.open.contains_key(stream_id) {
            warn!(stream = stream_id, "stream re-opened before end; discarding previous data");
        }
        self.open.insert(
            stream_id.to_string(),
            ImageStream {
                mimetype: mimetype.to_string(),
                buf: Vec::new(),
                layer,
                x,
                y,
                op,
            },
        );
    }

    /// Appends a base64-encoded chunk to a stream.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Base64`] when the chunk is not valid base64.
    /// A chunk for an unknown stream is dropped with a warning.
    pub fn append(&mut self, stream_id: &str, data: &str) -> Result<(), StreamError> {
        let Some(stream) = self.open.get_mut(stream_id) else {
            warn!(stream = stream_id, "blob for unknown stream dropped");
            return Ok(());
        };
        let bytes = BASE64_STANDARD.decode(data)?;
        stream.buf.extend_from_slice(&bytes);
        Ok(())
    }

    /// Finalises a stream: decodes the payload and returns the image with
    /// its destination. An `end` for an unknown stream returns `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Decode`] when the payload is not a valid image
    /// of the declared mimetype.
    pub fn end(&mut self, stream_id: &str) -> Result<Option<FinishedImage>, StreamError> {
        let Some(stream) = self.open.remove(stream_id) else {
            warn!(stream = stream_id, "end for unknown stream ignored");
            return Ok(None);
        };

        let image = decode_image(&stream.mimetype, &stream.buf)?;
        Ok(Some(FinishedImage {
            image,
            layer: stream.layer,
            x: stream.x,
            y: stream.y,
            op: stream.op,
        }))
    }

    /// Number of streams currently open.
    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}

/// Decodes an accumulated payload into straight RGBA.
///
/// PNG and JPEG are decoded by declared mimetype; anything else falls back
/// to content sniffing so that servers advertising exotic mimetypes still
/// render when the payload is a format we know.
pub(crate) fn decode_image(mimetype: &str, bytes: &[u8]) -> Result<RgbaImage, StreamError> {
    let decoded = match mimetype {
        "image/png" => image::load_from_memory_with_format(bytes, image::ImageFormat::Png),
        "image/jpeg" | "image/jpg" => {
            image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg)
        }
        _ => image::load_from_memory(bytes),
    };
    decoded
        .map(|img| img.to_rgba8())
        .map_err(|source| StreamError::Decode {
            mimetype: mimetype.to_string(),
            source,
        })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
