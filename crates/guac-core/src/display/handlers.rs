//! Opcode dispatch: the table mapping drawing instructions onto compositor
//! mutations.
//!
//! Dispatch is a static `match`; handlers parse their arguments positionally
//! and numerically as the wire protocol lays them out. A malformed argument
//! is a handler failure and therefore fatal to the session. An *unknown*
//! opcode is not: it is reported and skipped so recordings produced by newer
//! servers stay playable.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use thiserror::Error;
use tracing::{debug, warn};

use crate::display::client::Client;
use crate::display::compose::CompositeOp;
use crate::display::streams::{self, StreamError};
use crate::protocol::Instruction;

/// Errors raised by opcode handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("\"{opcode}\" is missing argument {index}")]
    MissingArgument { opcode: &'static str, index: usize },

    #[error("\"{opcode}\" argument {index} is not a number: {value:?}")]
    InvalidArgument {
        opcode: &'static str,
        index: usize,
        value: String,
    },

    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// Applies one instruction to the client's compositor state.
///
/// # Errors
///
/// Returns [`HandlerError`] when a handler cannot apply its effect; the
/// pump terminates the session in response.
pub(crate) fn dispatch(client: &mut Client, ins: &Instruction) -> Result<(), HandlerError> {
    let args = ins.args();
    match ins.opcode() {
        "size" => size(client, args),
        "rect" => rect(client, args),
        "cfill" => cfill(client, args),
        "cstroke" => cstroke(client, args),
        "img" => img(client, args),
        "png" => png(client, args),
        "blob" => blob(client, args),
        "end" => end(client, args),
        "copy" => copy(client, args),
        "move" => move_layer(client, args),
        "dispose" => dispose(client, args),
        "cursor" => cursor(client, args),
        "mouse" => mouse(client, args),
        "sync" => sync(client, args),
        "audio" => {
            debug!("audio stream ignored");
            Ok(())
        }
        "error" => {
            warn!(
                reason = args.first().map(String::as_str).unwrap_or(""),
                code = args.get(1).map(String::as_str).unwrap_or(""),
                "server reported an error"
            );
            Ok(())
        }
        "disconnect" => {
            debug!("server requested disconnect");
            client.terminate();
            Ok(())
        }
        "nop" => Ok(()),
        other => {
            warn!(opcode = other, "instruction not implemented");
            Ok(())
        }
    }
}

// ── Argument parsing helpers ──────────────────────────────────────────────────

fn text<'a>(
    opcode: &'static str,
    args: &'a [String],
    index: usize,
) -> Result<&'a str, HandlerError> {
    args.get(index)
        .map(String::as_str)
        .ok_or(HandlerError::MissingArgument { opcode, index })
}

fn int(opcode: &'static str, args: &[String], index: usize) -> Result<i32, HandlerError> {
    let value = text(opcode, args, index)?;
    value.parse().map_err(|_| HandlerError::InvalidArgument {
        opcode,
        index,
        value: value.to_string(),
    })
}

fn long(opcode: &'static str, args: &[String], index: usize) -> Result<i64, HandlerError> {
    let value = text(opcode, args, index)?;
    value.parse().map_err(|_| HandlerError::InvalidArgument {
        opcode,
        index,
        value: value.to_string(),
    })
}

fn channel(opcode: &'static str, args: &[String], index: usize) -> Result<u8, HandlerError> {
    Ok(int(opcode, args, index)?.clamp(0, 255) as u8)
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// `size layer w h`
fn size(client: &mut Client, args: &[String]) -> Result<(), HandlerError> {
    let layer = int("size", args, 0)?;
    let w = int("size", args, 1)?;
    let h = int("size", args, 2)?;
    client.display.layer(layer).resize(w, h);
    Ok(())
}

/// `rect layer x y w h`
fn rect(client: &mut Client, args: &[String]) -> Result<(), HandlerError> {
    let layer = int("rect", args, 0)?;
    let x = int("rect", args, 1)?;
    let y = int("rect", args, 2)?;
    let w = int("rect", args, 3)?;
    let h = int("rect", args, 4)?;
    client.display.layer(layer).rect(x, y, w, h);
    Ok(())
}

/// `cfill mask layer r g b a`
fn cfill(client: &mut Client, args: &[String]) -> Result<(), HandlerError> {
    let op = CompositeOp::from_mask(int("cfill", args, 0)?);
    let layer = int("cfill", args, 1)?;
    let color = [
        channel("cfill", args, 2)?,
        channel("cfill", args, 3)?,
        channel("cfill", args, 4)?,
        channel("cfill", args, 5)?,
    ];
    client.display.layer(layer).fill(color, op);
    Ok(())
}

/// `cstroke mask layer cap join thickness r g b a`
fn cstroke(client: &mut Client, args: &[String]) -> Result<(), HandlerError> {
    let op = CompositeOp::from_mask(int("cstroke", args, 0)?);
    let layer = int("cstroke", args, 1)?;
    // Cap and join styles only matter for curved paths; the rectangle-only
    // path model has no use for them beyond validating their presence.
    let _cap = int("cstroke", args, 2)?;
    let _join = int("cstroke", args, 3)?;
    let thickness = int("cstroke", args, 4)?;
    let color = [
        channel("cstroke", args, 5)?,
        channel("cstroke", args, 6)?,
        channel("cstroke", args, 7)?,
        channel("cstroke", args, 8)?,
    ];
    client.display.layer(layer).stroke(color, thickness, op);
    Ok(())
}

/// `img stream mask layer mimetype x y`
fn img(client: &mut Client, args: &[String]) -> Result<(), HandlerError> {
    let stream = text("img", args, 0)?.to_string();
    let op = CompositeOp::from_mask(int("img", args, 1)?);
    let layer = int("img", args, 2)?;
    let mimetype = text("img", args, 3)?.to_string();
    let x = int("img", args, 4)?;
    let y = int("img", args, 5)?;
    client.streams.open(&stream, &mimetype, layer, x, y, op);
    Ok(())
}

/// `png mask layer x y data` — the pre-streaming image instruction; the
/// whole payload arrives inline.
fn png(client: &mut Client, args: &[String]) -> Result<(), HandlerError> {
    let op = CompositeOp::from_mask(int("png", args, 0)?);
    let layer = int("png", args, 1)?;
    let x = int("png", args, 2)?;
    let y = int("png", args, 3)?;
    let data = text("png", args, 4)?;

    let bytes = BASE64_STANDARD.decode(data).map_err(StreamError::Base64)?;
    let image = streams::decode_image("image/png", &bytes)?;
    client.display.layer(layer).draw(x, y, &image, op);
    Ok(())
}

/// `blob stream data`
fn blob(client: &mut Client, args: &[String]) -> Result<(), HandlerError> {
    let stream = text("blob", args, 0)?.to_string();
    let data = text("blob", args, 1)?;
    client.streams.append(&stream, data)?;
    Ok(())
}

/// `end stream`
fn end(client: &mut Client, args: &[String]) -> Result<(), HandlerError> {
    let stream = text("end", args, 0)?.to_string();
    if let Some(done) = client.streams.end(&stream)? {
        client
            .display
            .layer(done.layer)
            .draw(done.x, done.y, &done.image, done.op);
    }
    Ok(())
}

/// `copy srclayer sx sy w h mask dstlayer dx dy`
fn copy(client: &mut Client, args: &[String]) -> Result<(), HandlerError> {
    let src_layer = int("copy", args, 0)?;
    let sx = int("copy", args, 1)?;
    let sy = int("copy", args, 2)?;
    let w = int("copy", args, 3)?;
    let h = int("copy", args, 4)?;
    let op = CompositeOp::from_mask(int("copy", args, 5)?);
    let dst_layer = int("copy", args, 6)?;
    let dx = int("copy", args, 7)?;
    let dy = int("copy", args, 8)?;

    // Snapshotting the source region first makes same-layer copies (guacd
    // scrolling) read the pre-copy pixels.
    let Some(region) = client.display.layer(src_layer).copy_region(sx, sy, w, h) else {
        return Ok(());
    };
    client.display.layer(dst_layer).draw(dx, dy, &region, op);
    Ok(())
}

/// `move layer parent x y z`
fn move_layer(client: &mut Client, args: &[String]) -> Result<(), HandlerError> {
    let layer = int("move", args, 0)?;
    let _parent = int("move", args, 1)?;
    let x = int("move", args, 2)?;
    let y = int("move", args, 3)?;
    let z = int("move", args, 4)?;
    client.display.layer(layer).move_to(x, y, z);
    Ok(())
}

/// `dispose layer`
fn dispose(client: &mut Client, args: &[String]) -> Result<(), HandlerError> {
    let layer = int("dispose", args, 0)?;
    client.display.dispose(layer);
    Ok(())
}

/// `cursor hx hy srclayer sx sy w h`
fn cursor(client: &mut Client, args: &[String]) -> Result<(), HandlerError> {
    let hx = int("cursor", args, 0)?;
    let hy = int("cursor", args, 1)?;
    let src_layer = int("cursor", args, 2)?;
    let sx = int("cursor", args, 3)?;
    let sy = int("cursor", args, 4)?;
    let w = int("cursor", args, 5)?;
    let h = int("cursor", args, 6)?;

    if let Some(sprite) = client.display.layer(src_layer).copy_region(sx, sy, w, h) {
        client.display.set_cursor(sprite, (hx, hy));
    }
    Ok(())
}

/// `mouse x y ...` — trailing button-mask and timestamp arguments are
/// irrelevant to rendering.
fn mouse(client: &mut Client, args: &[String]) -> Result<(), HandlerError> {
    let x = int("mouse", args, 0)?;
    let y = int("mouse", args, 1)?;
    client.display.set_pointer(x, y);
    Ok(())
}

/// `sync timestamp`
fn sync(client: &mut Client, args: &[String]) -> Result<(), HandlerError> {
    let timestamp = long("sync", args, 0)?;
    client.finish_frame(timestamp);
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::geometry::Rect;

    fn apply(client: &mut Client, opcode: &str, args: &[&str]) -> Result<(), HandlerError> {
        let ins = Instruction::new(opcode, args.iter().copied());
        dispatch(client, &ins)
    }

    #[test]
    fn test_size_resizes_the_layer() {
        let mut client = Client::detached();
        apply(&mut client, "size", &["0", "640", "480"]).unwrap();
        assert_eq!(client.display.layer(0).width(), 640);
        assert_eq!(client.display.layer(0).height(), 480);
    }

    #[test]
    fn test_rect_cfill_paints_and_tracks_modified_region() {
        let mut client = Client::detached();
        apply(&mut client, "size", &["0", "100", "100"]).unwrap();
        client.display.layer(0).reset_modified();

        apply(&mut client, "rect", &["0", "10", "20", "30", "30"]).unwrap();
        apply(&mut client, "cfill", &["14", "0", "0", "0", "255", "255"]).unwrap();

        let layer = client.display.layer(0);
        assert_eq!(layer.modified_rect(), Rect::new(10, 20, 40, 50));
        assert_eq!(layer.image().get_pixel(15, 25).0, [0, 0, 255, 255]);
        assert_eq!(layer.image().get_pixel(5, 5).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_copy_between_layers() {
        let mut client = Client::detached();
        apply(&mut client, "size", &["0", "50", "50"]).unwrap();
        // Paint a buffer, then copy a corner of it onto the screen.
        apply(&mut client, "rect", &["-1", "0", "0", "10", "10"]).unwrap();
        apply(&mut client, "cfill", &["14", "-1", "255", "0", "0", "255"]).unwrap();
        apply(
            &mut client,
            "copy",
            &["-1", "0", "0", "10", "10", "14", "0", "30", "30"],
        )
        .unwrap();

        let screen = client.display.layer(0);
        assert_eq!(screen.image().get_pixel(35, 35).0, [255, 0, 0, 255]);
        assert_eq!(screen.image().get_pixel(10, 10).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_copy_from_missing_region_is_a_noop() {
        let mut client = Client::detached();
        apply(&mut client, "size", &["0", "50", "50"]).unwrap();
        let result = apply(
            &mut client,
            "copy",
            &["-1", "90", "90", "10", "10", "14", "0", "0", "0"],
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_move_records_offset_and_z() {
        let mut client = Client::detached();
        apply(&mut client, "move", &["3", "0", "12", "34", "5"]).unwrap();
        let layer = client.display.layer(3);
        assert_eq!(layer.offset(), (12, 34));
        assert_eq!(layer.z(), 5);
    }

    #[test]
    fn test_dispose_removes_layer() {
        let mut client = Client::detached();
        apply(&mut client, "size", &["2", "10", "10"]).unwrap();
        let before = client.display.layer_count();
        apply(&mut client, "dispose", &["2"]).unwrap();
        assert_eq!(client.display.layer_count(), before - 1);
    }

    #[test]
    fn test_unknown_opcode_is_skipped_without_error() {
        let mut client = Client::detached();
        let result = apply(&mut client, "argv", &["1", "text/plain", "name"]);
        assert!(result.is_ok());
    }

    #[test]
    fn test_malformed_numeric_argument_is_a_handler_error() {
        let mut client = Client::detached();
        let result = apply(&mut client, "size", &["0", "wide", "480"]);
        assert!(matches!(
            result,
            Err(HandlerError::InvalidArgument { opcode: "size", index: 1, .. })
        ));
    }

    #[test]
    fn test_missing_argument_is_a_handler_error() {
        let mut client = Client::detached();
        let result = apply(&mut client, "rect", &["0", "1", "2"]);
        assert!(matches!(result, Err(HandlerError::MissingArgument { .. })));
    }

    #[test]
    fn test_orphan_blob_and_end_are_tolerated() {
        let mut client = Client::detached();
        apply(&mut client, "blob", &["99", "QUJD"]).unwrap();
        apply(&mut client, "end", &["99"]).unwrap();
    }

    #[test]
    fn test_error_and_audio_are_nonfatal() {
        let mut client = Client::detached();
        apply(&mut client, "error", &["upstream gone", "512"]).unwrap();
        apply(&mut client, "audio", &["1", "audio/L16"]).unwrap();
    }

    #[test]
    fn test_sync_invokes_callback_with_timestamp() {
        use std::sync::{Arc, Mutex};

        let mut client = Client::detached();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        client.on_sync(move |_, ts| sink.lock().unwrap().push(ts));

        apply(&mut client, "size", &["0", "10", "10"]).unwrap();
        apply(&mut client, "sync", &["123456789012"]).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![123456789012]);
    }
}
