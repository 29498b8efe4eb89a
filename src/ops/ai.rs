// ============================================================================
// AI SERVICES — description / enhancement seam and offline implementations
// ============================================================================
//
// The engine never decides *how* a crop is enhanced. It talks to two
// services behind traits; `ops::http` provides the networked client, and the
// local implementations below keep the engine usable offline and in tests.
// Callers go through `describe_or_fallback` / `enhance_or_passthrough`, which
// turn every service error into a usable value.

use async_trait::async_trait;
use image::{RgbaImage, imageops};

use crate::components::history::Description;
use crate::error::ServiceError;

/// Produces a semantic description of a selection.
#[async_trait]
pub trait DescriptionService: Send + Sync {
    /// `selection` is the working crop with the selection box drawn in;
    /// `prior` lists the descriptions along the current history path.
    async fn describe(
        &self,
        selection: &RgbaImage,
        prior: &[Description],
    ) -> Result<Description, ServiceError>;
}

/// Result of one enhancement call.
#[derive(Clone, Debug)]
pub struct Enhanced {
    pub image: RgbaImage,
    /// Opaque flag raised by the service (an easter-egg discovery). Passed
    /// through to the caller, never used for control flow.
    pub side_signal: bool,
}

/// Re-renders a working crop with more detail.
#[async_trait]
pub trait EnhancementService: Send + Sync {
    /// `prompts` holds every prior prompt along the history path, in order,
    /// followed by the new one.
    async fn enhance(
        &self,
        crop: &RgbaImage,
        prompts: &[String],
    ) -> Result<Enhanced, ServiceError>;
}

/// Describe, or fall back to a generic description. The flag is `true` when
/// the fallback was used.
pub async fn describe_or_fallback(
    service: &dyn DescriptionService,
    selection: &RgbaImage,
    prior: &[Description],
) -> (Description, bool) {
    match service.describe(selection, prior).await {
        Ok(d) if !d.selection_description.trim().is_empty() => (d, false),
        Ok(_) => {
            tracing::warn!("description service returned an empty description, using fallback");
            (Description::fallback(), true)
        }
        Err(e) => {
            tracing::warn!(error = %e, "description service failed, using fallback");
            (Description::fallback(), true)
        }
    }
}

/// Enhance, or return the input unchanged. The flag is `true` when the
/// input was passed through.
pub async fn enhance_or_passthrough(
    service: &dyn EnhancementService,
    crop: &RgbaImage,
    prompts: &[String],
) -> (Enhanced, bool) {
    match service.enhance(crop, prompts).await {
        Ok(e) if e.image.width() > 0 && e.image.height() > 0 => (e, false),
        Ok(_) => {
            tracing::warn!("enhancement service returned an empty image, passing input through");
            (passthrough(crop), true)
        }
        Err(e) => {
            tracing::warn!(error = %e, "enhancement service failed, passing input through");
            (passthrough(crop), true)
        }
    }
}

fn passthrough(crop: &RgbaImage) -> Enhanced {
    Enhanced {
        image: crop.clone(),
        side_signal: false,
    }
}

// ============================================================================
// LOCAL SERVICES — deterministic, no network
// ============================================================================

/// Describes a crop from its colour statistics.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalDescriber;

#[async_trait]
impl DescriptionService for LocalDescriber {
    async fn describe(
        &self,
        selection: &RgbaImage,
        prior: &[Description],
    ) -> Result<Description, ServiceError> {
        if selection.width() == 0 || selection.height() == 0 {
            return Err(ServiceError::Malformed("empty selection image".to_string()));
        }
        let [r, g, b] = mean_rgb(selection);
        let luma = 0.299 * r + 0.587 * g + 0.114 * b;
        let tone = match luma {
            l if l < 64.0 => "dark",
            l if l < 160.0 => "mid-toned",
            _ => "bright",
        };
        let hue = dominant_channel(r, g, b);
        let depth = prior.len() + 1;
        Ok(Description {
            selection_description: format!("a {} region with {} tones (zoom level {})", tone, hue, depth),
            prompt: Some(format!("{} {} detail, crisp texture", tone, hue)),
        })
    }
}

/// Upsamples by `scale` (Lanczos3) and sharpens with an unsharp mask.
#[derive(Clone, Copy, Debug)]
pub struct LocalEnhancer {
    pub scale: f32,
    pub sharpen_sigma: f32,
    pub sharpen_threshold: i32,
}

impl Default for LocalEnhancer {
    fn default() -> Self {
        Self {
            scale: 2.0,
            sharpen_sigma: 1.0,
            sharpen_threshold: 2,
        }
    }
}

#[async_trait]
impl EnhancementService for LocalEnhancer {
    async fn enhance(
        &self,
        crop: &RgbaImage,
        _prompts: &[String],
    ) -> Result<Enhanced, ServiceError> {
        if crop.width() == 0 || crop.height() == 0 {
            return Err(ServiceError::Malformed("empty crop".to_string()));
        }
        let w = ((crop.width() as f32 * self.scale).round() as u32).max(1);
        let h = ((crop.height() as f32 * self.scale).round() as u32).max(1);
        let upscaled = imageops::resize(crop, w, h, imageops::FilterType::Lanczos3);
        let image = if self.sharpen_sigma > 0.0 {
            imageops::unsharpen(&upscaled, self.sharpen_sigma, self.sharpen_threshold)
        } else {
            upscaled
        };
        Ok(Enhanced {
            image,
            side_signal: false,
        })
    }
}

fn mean_rgb(img: &RgbaImage) -> [f32; 3] {
    let mut sum = [0u64; 3];
    for p in img.pixels() {
        sum[0] += p[0] as u64;
        sum[1] += p[1] as u64;
        sum[2] += p[2] as u64;
    }
    let n = (img.width() as u64 * img.height() as u64).max(1) as f32;
    [sum[0] as f32 / n, sum[1] as f32 / n, sum[2] as f32 / n]
}

fn dominant_channel(r: f32, g: f32, b: f32) -> &'static str {
    let spread = r.max(g).max(b) - r.min(g).min(b);
    if spread < 24.0 {
        "neutral"
    } else if r >= g && r >= b {
        "warm red"
    } else if g >= b {
        "green"
    } else {
        "cool blue"
    }
}
