use std::io::Cursor;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, ImageFormat, RgbaImage};
use serde::Serialize;

use crate::components::history::{Description, HistoryStep};
use crate::error::{EngineError, ExportError};
use crate::geometry::Rect;

/// Minimum frame delay in centiseconds for animated output.
const MIN_FRAME_DELAY_CS: u16 = 2;

// ============================================================================
// INGESTION
// ============================================================================

/// Formats accepted on load.
const SUPPORTED_FORMATS: &[ImageFormat] = &[
    ImageFormat::Png,
    ImageFormat::Jpeg,
    ImageFormat::WebP,
    ImageFormat::Bmp,
    ImageFormat::Gif,
];

/// True for `image/*` MIME types. Anything else is dropped without touching
/// engine state.
pub fn is_image_mime(mime: &str) -> bool {
    mime.trim().to_ascii_lowercase().starts_with("image/")
}

/// MIME type for a file path based on its extension.
pub fn mime_for_path(path: &std::path::Path) -> String {
    match ImageFormat::from_path(path) {
        Ok(format) => format!("image/{}", format.extensions_str().first().copied().unwrap_or("unknown")),
        Err(_) => "application/octet-stream".to_string(),
    }
}

/// Decode an image blob to RGBA. The format is sniffed from the bytes.
pub fn decode_image(bytes: &[u8]) -> Result<RgbaImage, EngineError> {
    let format = image::guess_format(bytes)?;
    if !SUPPORTED_FORMATS.contains(&format) {
        return Err(EngineError::UnsupportedMedia(format!("{:?}", format)));
    }
    let img = image::load_from_memory_with_format(bytes, format)?;
    let rgba = img.into_rgba8();
    if rgba.width() == 0 || rgba.height() == 0 {
        return Err(EngineError::Raster("image has zero area".to_string()));
    }
    Ok(rgba)
}

// ============================================================================
// PAYLOAD HELPERS
// ============================================================================

/// Encode an RGBA image as PNG bytes.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, image::ImageError> {
    let mut bytes = Vec::new();
    PngEncoder::new(Cursor::new(&mut bytes)).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ColorType::Rgba8,
    )?;
    Ok(bytes)
}

/// PNG-encode and base64 an image for JSON payloads.
pub fn png_base64(image: &RgbaImage) -> Result<String, image::ImageError> {
    Ok(STANDARD.encode(encode_png(image)?))
}

/// Inverse of `png_base64`; accepts any supported format and an optional
/// `data:` URL prefix.
pub fn image_from_base64(data: &str) -> Result<RgbaImage, crate::error::ServiceError> {
    let payload = match data.split_once("base64,") {
        Some((_, rest)) => rest,
        None => data,
    };
    let bytes = STANDARD.decode(payload.trim())?;
    Ok(image::load_from_memory(&bytes)?.into_rgba8())
}

// ============================================================================
// STATE EXPORT
// ============================================================================

/// Serializable view of a single history step.
#[derive(Serialize)]
pub struct StepState<'a> {
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub description: Option<&'a Description>,
    pub selection: Option<Rect>,
    /// Base64 PNG of the step's image.
    pub image: String,
}

/// JSON for one history step (save/share).
pub fn step_to_json(index: usize, step: &HistoryStep) -> Result<String, EngineError> {
    let state = StepState {
        index,
        width: step.image.width(),
        height: step.image.height(),
        description: step.description.as_ref(),
        selection: step.selection,
        image: png_base64(&step.image)?,
    };
    Ok(serde_json::to_string_pretty(&state)?)
}

// ============================================================================
// ANIMATION ENCODING
// ============================================================================

/// Encode frames as an infinitely looping animated GIF held in memory.
/// Every frame is quantized to its own local palette. Any failure returns an
/// error and the partial buffer is dropped.
pub fn encode_animated_gif(frames: &[RgbaImage], fps: f32, max_colors: u16) -> Result<Vec<u8>, ExportError> {
    let Some(first) = frames.first() else {
        return Err(ExportError::NoFrames);
    };
    if first.width() > u16::MAX as u32 || first.height() > u16::MAX as u32 {
        return Err(ExportError::FrameTooLarge {
            width: first.width(),
            height: first.height(),
        });
    }
    let (w, h) = (first.width() as u16, first.height() as u16);
    let delay_cs = ((100.0 / fps.max(0.1)).round() as u16).max(MIN_FRAME_DELAY_CS);
    let colors = (max_colors as usize).clamp(2, 256);

    // Global palette from the first frame; every frame also carries a local one.
    let (global_palette, _) = quantize_rgba(first, colors);

    let mut out = Vec::new();
    {
        let mut encoder = gif::Encoder::new(&mut out, w, h, &global_palette)?;
        encoder.set_repeat(gif::Repeat::Infinite)?;

        for frame_img in frames {
            if frame_img.dimensions() != first.dimensions() {
                return Err(ExportError::FrameSizeMismatch {
                    expected: first.dimensions(),
                    got: frame_img.dimensions(),
                });
            }
            let (local_palette, local_indexed) = quantize_rgba(frame_img, colors);
            let frame = gif::Frame {
                width: w,
                height: h,
                delay: delay_cs,
                palette: Some(local_palette),
                buffer: std::borrow::Cow::Owned(local_indexed),
                ..Default::default()
            };
            encoder.write_frame(&frame)?;
        }
        encoder.into_inner()?;
    }
    Ok(out)
}

/// Quantize an RGBA image to indexed color (palette + indices).
/// Returns (flat_palette_rgb: Vec<u8>, indices: Vec<u8>).
/// The palette is in [R,G,B, R,G,B, ...] format as required by the gif crate.
fn quantize_rgba(image: &RgbaImage, max_colors: usize) -> (Vec<u8>, Vec<u8>) {
    let nq = color_quant::NeuQuant::new(10, max_colors, image.as_raw());

    let mut palette = Vec::with_capacity(max_colors * 3);
    for i in 0..max_colors {
        match nq.lookup(i) {
            Some(color) => palette.extend_from_slice(&color[..3]),
            None => palette.extend_from_slice(&[0, 0, 0]),
        }
    }

    let indices = image
        .pixels()
        .map(|p| nq.index_of(&p.0) as u8)
        .collect();

    (palette, indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use std::sync::Arc;

    fn gradient(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| Rgba([(x * 8) as u8, (y * 8) as u8, 128, 255]))
    }

    #[test]
    fn test_mime_gate() {
        assert!(is_image_mime("image/png"));
        assert!(is_image_mime(" IMAGE/JPEG"));
        assert!(!is_image_mime("text/plain"));
        assert!(!is_image_mime("application/pdf"));
    }

    #[test]
    fn test_png_round_trip_through_base64() {
        let img = gradient(16, 9);
        let b64 = png_base64(&img).unwrap();
        let back = image_from_base64(&format!("data:image/png;base64,{}", b64)).unwrap();
        assert_eq!(back, img);
        assert_eq!(decode_image(&encode_png(&img).unwrap()).unwrap(), img);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_image(b"definitely not an image").is_err());
    }

    #[test]
    fn test_gif_has_header_trailer_and_frames() {
        let frames = vec![gradient(16, 16), gradient(16, 16), RgbaImage::from_pixel(16, 16, Rgba([0, 0, 0, 255]))];
        let bytes = encode_animated_gif(&frames, 30.0, 64).unwrap();
        assert_eq!(&bytes[..6], b"GIF89a");
        assert_eq!(*bytes.last().unwrap(), 0x3B);

        let mut decoder = gif::DecodeOptions::new();
        decoder.set_color_output(gif::ColorOutput::RGBA);
        let mut decoder = decoder.read_info(Cursor::new(bytes)).unwrap();
        let mut count = 0;
        while decoder.read_next_frame().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[test]
    fn test_gif_rejects_mismatched_frames() {
        let frames = vec![gradient(8, 8), gradient(9, 8)];
        assert!(matches!(
            encode_animated_gif(&frames, 30.0, 256),
            Err(ExportError::FrameSizeMismatch { expected: (8, 8), got: (9, 8) })
        ));
    }

    #[test]
    fn test_gif_rejects_empty_frame_list() {
        assert!(matches!(encode_animated_gif(&[], 30.0, 256), Err(ExportError::NoFrames)));
    }

    #[test]
    fn test_step_json_contains_description_and_selection() {
        let step = HistoryStep {
            image: Arc::new(gradient(4, 4)),
            description: Some(Description::fallback()),
            selection: Some(Rect::new(1.0, 2.0, 3.0, 4.0)),
        };
        let json = step_to_json(1, &step).unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["index"], 1);
        assert_eq!(v["width"], 4);
        assert_eq!(v["selection"]["w"], 3.0);
        assert_eq!(v["description"]["selection_description"], "a detailed region of the image");
        assert!(v["image"].as_str().unwrap().len() > 10);
    }
}
