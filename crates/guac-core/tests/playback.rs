//! Integration tests for offline session reconstruction.
//!
//! These tests exercise only the public API: a recording file is written to
//! disk, replayed through [`Client`], and the frames delivered to the
//! on-sync callback are inspected pixel by pixel. This covers the codec, the
//! file session's reader/queue machinery, opcode dispatch, the compositor,
//! and the stream table end to end.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use guac_core::{Client, Instruction, SessionState};
use image::RgbaImage;

const BLUE: [u8; 4] = [0, 0, 255, 255];
const CLEAR: [u8; 4] = [0, 0, 0, 0];

static RECORDING_SEQ: AtomicU64 = AtomicU64::new(0);

/// Writes instructions as a recording file (raw concatenated wire frames)
/// and returns its path.
fn write_recording(instructions: &[Instruction]) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!(
        "guac-playback-{}-{}.rec",
        std::process::id(),
        RECORDING_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    let frames: String = instructions.iter().map(|i| i.encode().to_string()).collect();
    std::fs::write(&path, frames).expect("write recording");
    path
}

/// Replays a recording and collects every frame handed to the on-sync
/// callback together with its timestamp.
async fn replay(instructions: &[Instruction]) -> Vec<(RgbaImage, i64)> {
    let path = write_recording(instructions);
    let mut client = Client::from_recording(&path).await.expect("open recording");

    let frames = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&frames);
    client.on_sync(move |image, ts| sink.lock().unwrap().push((image.clone(), ts)));

    client.run().await;
    let _ = std::fs::remove_file(path);

    let collected = frames.lock().unwrap().clone();
    collected
}

/// Encodes a solid-colour PNG and returns its base64 form.
fn png_base64(w: u32, h: u32, px: [u8; 4]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    let img = RgbaImage::from_pixel(w, h, image::Rgba(px));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
        .expect("png encode");
    STANDARD.encode(bytes)
}

// ── Raster playback ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_fill_sequence_produces_solid_rectangle() {
    let frames = replay(&[
        Instruction::new("size", ["0", "100", "100"]),
        Instruction::new("rect", ["0", "10", "20", "30", "30"]),
        Instruction::new("cfill", ["14", "0", "0", "0", "255", "255"]),
        Instruction::new("sync", ["1000"]),
    ])
    .await;

    assert_eq!(frames.len(), 1);
    let (frame, ts) = &frames[0];
    assert_eq!(*ts, 1000);
    assert_eq!(frame.dimensions(), (100, 100));

    // Every pixel inside (10,20)-(40,50) is solid blue; everything else is
    // untouched.
    for y in 0..100u32 {
        for x in 0..100u32 {
            let expected = if (10..40).contains(&x) && (20..50).contains(&y) {
                BLUE
            } else {
                CLEAR
            };
            assert_eq!(frame.get_pixel(x, y).0, expected, "pixel ({x},{y})");
        }
    }
}

#[tokio::test]
async fn test_image_stream_draws_at_destination() {
    let red_png = png_base64(8, 8, [255, 0, 0, 255]);
    let frames = replay(&[
        Instruction::new("size", ["0", "100", "100"]),
        Instruction::new("img", ["14", "14", "0", "image/png", "50", "60"]),
        Instruction::new("blob", ["14", red_png.as_str()]),
        Instruction::new("end", ["14"]),
        Instruction::new("sync", ["2000"]),
    ])
    .await;

    assert_eq!(frames.len(), 1);
    let (frame, ts) = &frames[0];
    assert_eq!(*ts, 2000);
    assert_eq!(frame.get_pixel(50, 60).0, [255, 0, 0, 255]);
    assert_eq!(frame.get_pixel(57, 67).0, [255, 0, 0, 255]);
    assert_eq!(frame.get_pixel(58, 68).0, CLEAR);
    assert_eq!(frame.get_pixel(49, 59).0, CLEAR);
}

#[tokio::test]
async fn test_buffer_copy_reaches_the_screen() {
    let blue_png = png_base64(16, 16, BLUE);
    let frames = replay(&[
        Instruction::new("size", ["0", "64", "64"]),
        // Paint an off-screen buffer, then copy it onto the screen.
        Instruction::new("img", ["1", "14", "-1", "image/png", "0", "0"]),
        Instruction::new("blob", ["1", blue_png.as_str()]),
        Instruction::new("end", ["1"]),
        Instruction::new("copy", ["-1", "0", "0", "16", "16", "14", "0", "24", "24"]),
        Instruction::new("sync", ["10"]),
    ])
    .await;

    let (frame, _) = &frames[0];
    assert_eq!(frame.get_pixel(24, 24).0, BLUE);
    assert_eq!(frame.get_pixel(39, 39).0, BLUE);
    assert_eq!(frame.get_pixel(40, 40).0, CLEAR);
    // The buffer itself never composes into the screen.
    assert_eq!(frame.get_pixel(0, 0).0, CLEAR);
}

#[tokio::test]
async fn test_sync_barrier_frames_are_independent() {
    let frames = replay(&[
        Instruction::new("size", ["0", "32", "32"]),
        Instruction::new("rect", ["0", "0", "0", "8", "8"]),
        Instruction::new("cfill", ["14", "0", "0", "0", "255", "255"]),
        Instruction::new("sync", ["100"]),
        // Everything after the first sync must not appear in frame one.
        Instruction::new("rect", ["0", "16", "16", "8", "8"]),
        Instruction::new("cfill", ["14", "0", "255", "0", "0", "255"]),
        Instruction::new("sync", ["200"]),
    ])
    .await;

    assert_eq!(frames.len(), 2);
    let (first, first_ts) = &frames[0];
    let (second, second_ts) = &frames[1];
    assert_eq!((*first_ts, *second_ts), (100, 200));

    assert_eq!(first.get_pixel(4, 4).0, BLUE);
    assert_eq!(first.get_pixel(20, 20).0, CLEAR, "frame 1 must predate fill 2");
    assert_eq!(second.get_pixel(4, 4).0, BLUE);
    assert_eq!(second.get_pixel(20, 20).0, [255, 0, 0, 255]);
}

#[tokio::test]
async fn test_dispose_of_visible_layer_removes_it_from_composition() {
    let frames = replay(&[
        Instruction::new("size", ["0", "32", "32"]),
        Instruction::new("size", ["1", "32", "32"]),
        Instruction::new("rect", ["1", "0", "0", "32", "32"]),
        Instruction::new("cfill", ["14", "1", "255", "0", "0", "255"]),
        Instruction::new("sync", ["1"]),
        Instruction::new("dispose", ["1"]),
        Instruction::new("sync", ["2"]),
    ])
    .await;

    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].0.get_pixel(10, 10).0, [255, 0, 0, 255]);
    assert_eq!(frames[1].0.get_pixel(10, 10).0, CLEAR);
}

#[tokio::test]
async fn test_cursor_overlays_snapshot_at_pointer() {
    let white_png = png_base64(4, 4, [255, 255, 255, 255]);
    let frames = replay(&[
        Instruction::new("size", ["0", "64", "64"]),
        // Stage the cursor sprite in a buffer, install it, move the pointer.
        Instruction::new("img", ["c", "14", "-1", "image/png", "0", "0"]),
        Instruction::new("blob", ["c", white_png.as_str()]),
        Instruction::new("end", ["c"]),
        Instruction::new("cursor", ["0", "0", "-1", "0", "0", "4", "4"]),
        Instruction::new("mouse", ["30", "30", "0"]),
        Instruction::new("sync", ["5"]),
    ])
    .await;

    let (frame, _) = &frames[0];
    assert_eq!(frame.get_pixel(30, 30).0, [255, 255, 255, 255]);
    assert_eq!(frame.get_pixel(33, 33).0, [255, 255, 255, 255]);
    assert_eq!(frame.get_pixel(34, 34).0, CLEAR);
}

// ── Robustness ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unknown_opcodes_do_not_abort_playback() {
    let frames = replay(&[
        Instruction::new("size", ["0", "16", "16"]),
        Instruction::new("argv", ["7", "text/plain", "name"]),
        Instruction::new("clipboard", ["7", "text/plain"]),
        Instruction::new("sync", ["9"]),
    ])
    .await;
    assert_eq!(frames.len(), 1);
}

#[tokio::test]
async fn test_orphan_stream_chunks_do_not_abort_playback() {
    let frames = replay(&[
        Instruction::new("size", ["0", "16", "16"]),
        Instruction::new("blob", ["77", "QUJD"]),
        Instruction::new("end", ["77"]),
        Instruction::new("sync", ["9"]),
    ])
    .await;
    assert_eq!(frames.len(), 1);
}

#[tokio::test]
async fn test_empty_recording_completes_without_frames() {
    let frames = replay(&[]).await;
    assert!(frames.is_empty());
}

#[tokio::test]
async fn test_handler_failure_stops_the_session() {
    let path = write_recording(&[
        Instruction::new("size", ["0", "16", "16"]),
        Instruction::new("size", ["0", "not-a-number", "16"]),
        Instruction::new("sync", ["9"]),
    ]);
    let mut client = Client::from_recording(&path).await.unwrap();

    let frames = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&frames);
    client.on_sync(move |image, ts| sink.lock().unwrap().push((image.clone(), ts)));

    client.run().await;
    let _ = std::fs::remove_file(path);

    // The bad size terminates the session before the trailing sync.
    assert!(frames.lock().unwrap().is_empty());
    assert_eq!(client.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_terminate_is_idempotent_through_the_client() {
    let path = write_recording(&[Instruction::new("sync", ["1"])]);
    let client = Client::from_recording(&path).await.unwrap();

    client.terminate();
    client.terminate();
    client.terminate();
    assert_eq!(client.state(), SessionState::Closed);
    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn test_screen_polling_matches_last_sync() {
    let path = write_recording(&[
        Instruction::new("size", ["0", "20", "20"]),
        Instruction::new("rect", ["0", "0", "0", "20", "20"]),
        Instruction::new("cfill", ["14", "0", "0", "0", "255", "255"]),
        Instruction::new("sync", ["777"]),
    ]);
    let mut client = Client::from_recording(&path).await.unwrap();
    client.run().await;
    let _ = std::fs::remove_file(path);

    let (screen, last_sync) = client.screen();
    assert_eq!(last_sync, 777);
    assert_eq!(screen.get_pixel(10, 10).0, BLUE);
}
