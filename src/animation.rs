// ============================================================================
// ANIMATION — easing, frame clocks, one-shot completion signals
// ============================================================================
//
// Animations advance one step per frame of a `FrameClock`. Completion is an
// awaitable (`Completion`) rather than an end-of-animation callback, and the
// sender side is consumed on first use so it can only fire once.

use std::time::Duration;

use async_trait::async_trait;
use image::RgbaImage;
use tokio::sync::oneshot;
use tokio::time::{Interval, MissedTickBehavior};

use crate::geometry::Rect;

/// Cubic ease-in-out: slow start, fast middle, slow end. `t` is clamped to [0, 1].
pub fn ease_in_out_cubic(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    if t < 0.5 {
        4.0 * t * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
    }
}

/// Linear interpolation between two rects (apply easing to `t` first).
pub fn lerp_rect(a: Rect, b: Rect, t: f32) -> Rect {
    let lerp = |p: f32, q: f32| p + (q - p) * t;
    Rect::new(lerp(a.x, b.x), lerp(a.y, b.y), lerp(a.w, b.w), lerp(a.h, b.h))
}

/// Source of frame ticks for on-screen animations.
#[async_trait]
pub trait FrameClock: Send {
    /// Suspend until the next frame should be rendered.
    async fn next_frame(&mut self);
}

/// Ticks at a fixed frame rate using a tokio interval.
pub struct IntervalClock {
    interval: Interval,
}

impl IntervalClock {
    pub fn new(fps: u32) -> Self {
        let period = Duration::from_secs_f64(1.0 / fps.max(1) as f64);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }
}

#[async_trait]
impl FrameClock for IntervalClock {
    async fn next_frame(&mut self) {
        self.interval.tick().await;
    }
}

/// Yields to the scheduler without waiting; used headless and in tests.
#[derive(Default)]
pub struct ImmediateClock {
    pub frames: u64,
}

#[async_trait]
impl FrameClock for ImmediateClock {
    async fn next_frame(&mut self) {
        self.frames += 1;
        tokio::task::yield_now().await;
    }
}

/// Receives presented frames (the visible drawing surface).
pub trait Surface: Send {
    fn present(&mut self, frame: &RgbaImage);
}

/// Discards every frame.
#[derive(Default)]
pub struct NullSurface;

impl Surface for NullSurface {
    fn present(&mut self, _frame: &RgbaImage) {}
}

/// Keeps a copy of every presented frame.
#[derive(Default)]
pub struct RecordingSurface {
    pub frames: Vec<RgbaImage>,
}

impl Surface for RecordingSurface {
    fn present(&mut self, frame: &RgbaImage) {
        self.frames.push(frame.clone());
    }
}

/// Awaitable end of an animation.
pub struct Completion {
    rx: oneshot::Receiver<()>,
}

impl Completion {
    /// A completion that has already fired.
    pub fn ready() -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(());
        Self { rx }
    }

    /// `true` when the animation reached its end, `false` when it was torn
    /// down first.
    pub async fn wait(self) -> bool {
        self.rx.await.is_ok()
    }
}

/// Eased rect interpolation over a fixed number of frames.
pub struct Tween {
    start: Rect,
    end: Rect,
    frames: u32,
    frame: u32,
    done: Option<oneshot::Sender<()>>,
}

impl Tween {
    pub fn new(start: Rect, end: Rect, frames: u32) -> (Self, Completion) {
        let (tx, rx) = oneshot::channel();
        let tween = Self {
            start,
            end,
            frames: frames.max(1),
            frame: 0,
            done: Some(tx),
        };
        (tween, Completion { rx })
    }

    /// Advance one frame and return the rect to draw, or `None` once finished.
    /// Reaching t = 1.0 fires the completion; later ticks never fire it again.
    pub fn tick(&mut self) -> Option<Rect> {
        if self.frame >= self.frames {
            return None;
        }
        self.frame += 1;
        let t = self.frame as f32 / self.frames as f32;
        let rect = if self.frame == self.frames {
            self.end
        } else {
            lerp_rect(self.start, self.end, ease_in_out_cubic(t))
        };
        if self.frame == self.frames
            && let Some(tx) = self.done.take()
        {
            let _ = tx.send(());
        }
        Some(rect)
    }

    pub fn is_finished(&self) -> bool {
        self.frame >= self.frames
    }

    /// Run to the end on `clock`, handing each frame's rect to `on_frame`.
    pub async fn play<C, F>(mut self, clock: &mut C, mut on_frame: F)
    where
        C: FrameClock + ?Sized,
        F: FnMut(Rect) + Send,
    {
        while let Some(rect) = self.tick() {
            on_frame(rect);
            clock.next_frame().await;
        }
    }
}
