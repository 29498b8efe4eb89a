use image::RgbaImage;
use rand::Rng;

use crate::animation::{FrameClock, Surface};
use crate::components::history::ImageHandle;
use crate::error::EngineError;

/// Callback run when every pixel has been revealed.
pub type DissolveDone = Box<dyn FnOnce() + Send>;

/// Where a dissolve stands after a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DissolveStatus {
    Running,
    Finished,
    Cancelled,
}

/// Randomized per-pixel reveal from a low-resolution placeholder to the
/// final image.
///
/// Pixel indices are shuffled once (uniform Fisher–Yates) and consumed in
/// equal batches, one batch per frame, so the transition takes the same
/// number of frames at any resolution. The last frame presents `high`
/// itself, and the completion callback is taken out of its slot the first
/// time it runs.
pub struct Dissolve {
    low: RgbaImage,
    high: ImageHandle,
    order: Vec<u32>,
    batch: usize,
    cursor: usize,
    on_complete: Option<DissolveDone>,
    status: DissolveStatus,
}

impl Dissolve {
    pub fn new<R: Rng>(
        low: RgbaImage,
        high: ImageHandle,
        target_frames: u32,
        rng: &mut R,
        on_complete: Option<DissolveDone>,
    ) -> Result<Self, EngineError> {
        if low.dimensions() != high.dimensions() {
            return Err(EngineError::Dissolve(format!(
                "buffer sizes differ: {:?} vs {:?}",
                low.dimensions(),
                high.dimensions()
            )));
        }
        let total = low.width() as usize * low.height() as usize;
        let order = shuffled_indices(total, rng);
        let batch = total.div_ceil(target_frames.max(1) as usize).max(1);
        Ok(Self {
            low,
            high,
            order,
            batch,
            cursor: 0,
            on_complete,
            status: DissolveStatus::Running,
        })
    }

    /// Frames needed for a `duration_ms` transition at `fps`.
    pub fn frames_for(duration_ms: u32, fps: u32) -> u32 {
        ((duration_ms as u64 * fps as u64).div_ceil(1000) as u32).max(1)
    }

    pub fn status(&self) -> DissolveStatus {
        self.status
    }

    pub fn batch_size(&self) -> usize {
        self.batch
    }

    /// Fraction of pixels revealed so far.
    pub fn progress(&self) -> f32 {
        if self.order.is_empty() {
            1.0
        } else {
            self.cursor as f32 / self.order.len() as f32
        }
    }

    /// Reveal the next batch and present it. Once all pixels are consumed
    /// the untouched `high` buffer is presented and the callback runs.
    pub fn step(&mut self, surface: &mut dyn Surface) -> DissolveStatus {
        if self.status != DissolveStatus::Running {
            return self.status;
        }
        let end = (self.cursor + self.batch).min(self.order.len());
        {
            let high = self.high.as_raw();
            let low = &mut *self.low;
            for &idx in &self.order[self.cursor..end] {
                let i = idx as usize * 4;
                low[i..i + 4].copy_from_slice(&high[i..i + 4]);
            }
        }
        self.cursor = end;

        if self.cursor >= self.order.len() {
            surface.present(&self.high);
            self.status = DissolveStatus::Finished;
            if let Some(done) = self.on_complete.take() {
                done();
            }
        } else {
            surface.present(&self.low);
        }
        self.status
    }

    /// Stop without ever running the completion callback.
    pub fn cancel(&mut self) {
        if self.status == DissolveStatus::Running {
            self.on_complete = None;
            self.status = DissolveStatus::Cancelled;
        }
    }

    /// Drive the dissolve on `clock` until it finishes or is cancelled.
    pub async fn run<C: FrameClock + ?Sized>(
        &mut self,
        clock: &mut C,
        surface: &mut dyn Surface,
    ) -> DissolveStatus {
        loop {
            match self.step(surface) {
                DissolveStatus::Running => clock.next_frame().await,
                other => return other,
            }
        }
    }
}

/// Identity permutation of `0..n` shuffled uniformly (Fisher–Yates).
fn shuffled_indices<R: Rng>(n: usize, rng: &mut R) -> Vec<u32> {
    let mut indices: Vec<u32> = (0..n as u32).collect();
    for i in (1..n).rev() {
        let j = rng.gen_range(0..=i);
        indices.swap(i, j);
    }
    indices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::{ImmediateClock, NullSurface, RecordingSurface};
    use image::Rgba;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pair(w: u32, h: u32) -> (RgbaImage, ImageHandle) {
        let low = RgbaImage::from_pixel(w, h, Rgba([0, 0, 0, 255]));
        let high = RgbaImage::from_fn(w, h, |x, y| Rgba([x as u8, y as u8, 200, 255]));
        (low, Arc::new(high))
    }

    fn counter() -> (Arc<AtomicUsize>, DissolveDone) {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let done: DissolveDone = Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (calls, done)
    }

    #[test]
    fn test_shuffle_is_a_permutation() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut order = shuffled_indices(1000, &mut rng);
        assert_ne!(order, (0..1000).collect::<Vec<u32>>());
        order.sort_unstable();
        assert_eq!(order, (0..1000).collect::<Vec<u32>>());
    }

    #[test]
    fn test_batch_size_targets_frame_count() {
        let (low, high) = pair(30, 20);
        let mut rng = StdRng::seed_from_u64(1);
        let d = Dissolve::new(low, high, 60, &mut rng, None).unwrap();
        assert_eq!(d.batch_size(), 10);
        assert_eq!(Dissolve::frames_for(1000, 60), 60);
        assert_eq!(Dissolve::frames_for(1, 60), 1);
    }

    #[test]
    fn test_mismatched_buffers_are_rejected() {
        let mut rng = StdRng::seed_from_u64(1);
        let high = Arc::new(RgbaImage::new(4, 4));
        assert!(Dissolve::new(RgbaImage::new(4, 5), high, 10, &mut rng, None).is_err());
    }

    #[test]
    fn test_dissolve_completes_with_exact_pixels_and_single_callback() {
        let (low, high) = pair(37, 23);
        let mut rng = StdRng::seed_from_u64(42);
        let (calls, done) = counter();
        let mut d = Dissolve::new(low, high.clone(), 60, &mut rng, Some(done)).unwrap();
        let mut surface = RecordingSurface::default();

        let mut frames = 0;
        while d.step(&mut surface) == DissolveStatus::Running {
            frames += 1;
        }
        // Rapid re-invocation after the end must not re-fire.
        for _ in 0..5 {
            assert_eq!(d.step(&mut surface), DissolveStatus::Finished);
        }
        assert!(frames <= 60);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(surface.frames.last().unwrap().as_raw(), high.as_raw());
        assert_eq!(d.low.as_raw(), high.as_raw());
        assert_eq!(d.progress(), 1.0);
    }

    #[test]
    fn test_intermediate_frames_mix_both_buffers() {
        let (low, high) = pair(40, 40);
        let mut rng = StdRng::seed_from_u64(3);
        let mut d = Dissolve::new(low, high.clone(), 4, &mut rng, None).unwrap();
        let mut surface = RecordingSurface::default();
        d.step(&mut surface);
        let first = &surface.frames[0];
        let revealed = first
            .pixels()
            .zip(high.pixels())
            .filter(|(a, b)| a == b)
            .count();
        assert_eq!(revealed, 400);
    }

    #[test]
    fn test_cancel_suppresses_callback() {
        let (low, high) = pair(10, 10);
        let mut rng = StdRng::seed_from_u64(5);
        let (calls, done) = counter();
        let mut d = Dissolve::new(low, high, 10, &mut rng, Some(done)).unwrap();
        let mut surface = NullSurface;
        d.step(&mut surface);
        d.cancel();
        assert_eq!(d.step(&mut surface), DissolveStatus::Cancelled);
        drop(d);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_drives_to_completion() {
        let (low, high) = pair(16, 16);
        let mut rng = StdRng::seed_from_u64(9);
        let (calls, done) = counter();
        let mut d = Dissolve::new(low, high, 8, &mut rng, Some(done)).unwrap();
        let mut clock = ImmediateClock::default();
        let mut surface = RecordingSurface::default();
        assert_eq!(d.run(&mut clock, &mut surface).await, DissolveStatus::Finished);
        assert_eq!(surface.frames.len(), 8);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
