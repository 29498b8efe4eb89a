// ============================================================================
// REFINER — the select / enhance / reveal / commit state machine
// ============================================================================
//
//   Idle ──load──▶ Loading ──ok──▶ Loaded ──select/regenerate──▶ Enhancing
//     ▲               │                ▲                              │
//     └───decode err──┘                └────commit──── Enhanced ◀─run_job
//
// Only `Loaded` accepts selection, undo, redo, regenerate and export; every
// other state rejects them with `EngineError::Busy` and leaves state alone.
// History is mutated in exactly one place (`commit`).

use std::sync::Arc;

use image::{RgbaImage, imageops};
use rand::SeedableRng;
use rand::rngs::StdRng;
use uuid::Uuid;

use crate::animation::{Completion, FrameClock, Surface, Tween};
use crate::components::dissolve::{Dissolve, DissolveDone, DissolveStatus};
use crate::components::history::{Description, HistoryStep, HistoryStore, ImageHandle};
use crate::components::selection::{SelectionController, SelectionOutput};
use crate::error::{EngineError, ServiceError};
use crate::geometry::{
    Point, Rect, Size, compute_display_mapping, compute_padded_rect, fit_rect, map_inner_rect,
    scaled_dimensions, to_display_rect,
};
use crate::io::{decode_image, is_image_mime, step_to_json};
use crate::ops::ai::{
    DescriptionService, EnhancementService, LocalDescriber, LocalEnhancer, describe_or_fallback,
    enhance_or_passthrough,
};
use crate::ops::http::HttpModelClient;
use crate::ops::shapes::{LinePattern, SELECTION_COLOR, stroke_rect};
use crate::ops::transform::{
    Interpolation, crop_resampled, fallback_crop, pixelated_crop, render_letterboxed, scale_nearest,
};
use crate::settings::EngineSettings;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefineState {
    Idle,
    Loading,
    Loaded,
    Enhancing,
    Enhanced,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobKind {
    /// Append a new step after the cursor.
    New,
    /// Re-run the step under the cursor and replace it.
    Regenerate,
}

/// The single in-flight enhancement.
#[derive(Debug)]
pub struct EnhancementJob {
    pub kind: JobKind,
    /// Selection in `source_image` pixels.
    pub source_selection: Rect,
    pub source_image: ImageHandle,
    pub padding: f32,
    /// Descriptions of `history[..context_end]` are sent as context.
    pub context_end: usize,
    /// Nearest-neighbour crop of the raw selection.
    pub preview: ImageHandle,
    pub animation_start_rect: Rect,
    pub animation_end_rect: Rect,
    /// Display canvas with the selection box drawn in.
    pub snapshot: RgbaImage,
}

/// How the committed image was produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Both services answered.
    Enhanced,
    /// The description service failed; a generic description was used.
    Degraded,
    /// The enhancement could not be used; the selection was upscaled 2× locally.
    Fallback,
}

#[derive(Clone, Debug)]
pub struct EnhancementReport {
    pub outcome: Outcome,
    /// Passed through from the enhancement service.
    pub side_signal: bool,
    pub description: Description,
    pub final_size: (u32, u32),
}

/// A finished job waiting for its reveal and commit.
struct PendingResult {
    kind: JobKind,
    step: HistoryStep,
    preview: ImageHandle,
    /// Display canvas the zoom-in played over.
    backdrop: RgbaImage,
    /// Where the zoom-in came to rest on `backdrop`.
    stage: Rect,
}

struct PipelineOutput {
    image: RgbaImage,
    description: Description,
    outcome: Outcome,
    side_signal: bool,
}

pub struct Refiner {
    settings: EngineSettings,
    describer: Arc<dyn DescriptionService>,
    enhancer: Arc<dyn EnhancementService>,
    state: RefineState,
    history: Option<HistoryStore>,
    selector: Option<SelectionController>,
    job: Option<EnhancementJob>,
    pending: Option<PendingResult>,
    rng: StdRng,
    session: Uuid,
}

impl Refiner {
    pub fn new(
        settings: EngineSettings,
        describer: Arc<dyn DescriptionService>,
        enhancer: Arc<dyn EnhancementService>,
    ) -> Self {
        let session = Uuid::new_v4();
        tracing::info!(%session, mode = ?settings.selection_mode, "refiner created");
        Self {
            settings,
            describer,
            enhancer,
            state: RefineState::Idle,
            history: None,
            selector: None,
            job: None,
            pending: None,
            rng: StdRng::from_entropy(),
            session,
        }
    }

    /// Remote services when `service_endpoint` is set, local ones otherwise.
    pub fn from_settings(settings: EngineSettings) -> Result<Self, ServiceError> {
        let describer: Arc<dyn DescriptionService>;
        let enhancer: Arc<dyn EnhancementService>;
        match settings.service_endpoint.as_deref() {
            Some(endpoint) => {
                let client = Arc::new(HttpModelClient::from_env(
                    endpoint,
                    &settings.service_api_key_env,
                    settings.request_timeout(),
                )?);
                tracing::info!(endpoint, "using remote model service");
                describer = client.clone();
                enhancer = client;
            }
            None => {
                tracing::info!("no service endpoint configured, using local services");
                describer = Arc::new(LocalDescriber);
                enhancer = Arc::new(LocalEnhancer::default());
            }
        }
        Ok(Self::new(settings, describer, enhancer))
    }

    /// Fix the dissolve shuffle for reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn state(&self) -> RefineState {
        self.state
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn history(&self) -> Option<&HistoryStore> {
        self.history.as_ref()
    }

    pub fn current_image(&self) -> Option<&ImageHandle> {
        self.history.as_ref().map(|h| &h.current().image)
    }

    pub fn job(&self) -> Option<&EnhancementJob> {
        self.job.as_ref()
    }

    pub fn selection_controller(&self) -> Option<&SelectionController> {
        self.selector.as_ref()
    }

    fn set_state(&mut self, next: RefineState) {
        if self.state != next {
            tracing::info!(session = %self.session, from = ?self.state, to = ?next, "state");
            self.state = next;
        }
    }

    /// Entry-point guard: only `Loaded` proceeds.
    fn ensure_loaded(&self, op: &str) -> Result<(), EngineError> {
        match self.state {
            RefineState::Loaded => Ok(()),
            RefineState::Idle => Err(EngineError::NoImage),
            state => {
                tracing::warn!(session = %self.session, op, ?state, "rejected while busy");
                Err(EngineError::Busy { state })
            }
        }
    }

    fn loaded_parts(&self) -> Result<(&HistoryStore, &SelectionController), EngineError> {
        match (&self.history, &self.selector) {
            (Some(h), Some(s)) => Ok((h, s)),
            _ => Err(EngineError::NoImage),
        }
    }

    // ========================================================================
    // LOADING
    // ========================================================================

    /// Load an image blob. Non-image MIME types are ignored (`Ok(false)`)
    /// without touching state. A decode failure leaves the engine `Idle`.
    pub fn load_bytes(&mut self, bytes: &[u8], mime: &str) -> Result<bool, EngineError> {
        if !is_image_mime(mime) {
            tracing::info!(mime, "ignored non-image input");
            return Ok(false);
        }
        self.begin_load()?;
        match decode_image(bytes) {
            Ok(image) => {
                self.finish_load(image);
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(error = %e, "image decode failed");
                self.reset();
                Err(e)
            }
        }
    }

    /// Load an already-decoded image.
    pub fn load_image(&mut self, image: RgbaImage) -> Result<(), EngineError> {
        self.begin_load()?;
        if image.width() == 0 || image.height() == 0 {
            self.reset();
            return Err(EngineError::Raster("image has zero area".to_string()));
        }
        self.finish_load(image);
        Ok(())
    }

    fn begin_load(&mut self) -> Result<(), EngineError> {
        if matches!(self.state, RefineState::Enhancing | RefineState::Enhanced) {
            tracing::warn!(session = %self.session, state = ?self.state, "load rejected while busy");
            return Err(EngineError::Busy { state: self.state });
        }
        self.job = None;
        self.pending = None;
        self.selector = None;
        self.set_state(RefineState::Loading);
        Ok(())
    }

    fn finish_load(&mut self, image: RgbaImage) {
        let (w, h) = image.dimensions();
        let handle: ImageHandle = Arc::new(image);
        self.selector = Some(SelectionController::new(
            self.settings.selection_mode(),
            handle.clone(),
            self.settings.viewport(),
        ));
        match self.history.as_mut() {
            Some(history) => history.reset(handle),
            None => self.history = Some(HistoryStore::new(handle)),
        }
        tracing::info!(session = %self.session, width = w, height = h, "image loaded");
        self.set_state(RefineState::Loaded);
    }

    /// Drop every raster handle and return to `Idle`.
    pub fn reset(&mut self) {
        self.job = None;
        self.pending = None;
        self.selector = None;
        self.history = None;
        self.set_state(RefineState::Idle);
    }

    pub fn set_viewport(&mut self, container: Size) {
        self.settings.viewport_width = container.w;
        self.settings.viewport_height = container.h;
        if let Some(selector) = self.selector.as_mut() {
            selector.set_viewport(self.settings.viewport());
        }
    }

    // ========================================================================
    // SELECTION
    // ========================================================================

    /// Fixed-box click. Returns `true` when a job was started.
    pub fn click(&mut self, point: Point) -> Result<bool, EngineError> {
        self.ensure_loaded("click")?;
        let output = match self.selector.as_mut() {
            Some(selector) => selector.click(point)?,
            None => return Err(EngineError::NoImage),
        };
        self.start_from_selector(output)
    }

    pub fn pointer_down(&mut self, point: Point) -> Result<(), EngineError> {
        self.ensure_loaded("pointer_down")?;
        if let Some(selector) = self.selector.as_mut() {
            selector.pointer_down(point);
        }
        Ok(())
    }

    /// The rubber-band rect (display space) while a drag is active.
    pub fn pointer_move(&mut self, point: Point) -> Option<Rect> {
        if self.state != RefineState::Loaded {
            return None;
        }
        self.selector.as_mut()?.pointer_move(point)
    }

    /// Finish a drag. Returns `true` when a job was started.
    pub fn pointer_up(&mut self, point: Point) -> Result<bool, EngineError> {
        self.ensure_loaded("pointer_up")?;
        let output = match self.selector.as_mut() {
            Some(selector) => selector.pointer_up(point)?,
            None => return Err(EngineError::NoImage),
        };
        self.start_from_selector(output)
    }

    fn start_from_selector(&mut self, output: Option<SelectionOutput>) -> Result<bool, EngineError> {
        let Some(output) = output else { return Ok(false) };
        if let Err(e) = self.select(output) {
            if let Some(selector) = self.selector.as_mut() {
                selector.unlock();
            }
            return Err(e);
        }
        Ok(true)
    }

    /// Start a new-selection job: `Loaded` → `Enhancing`.
    pub fn select(&mut self, output: SelectionOutput) -> Result<(), EngineError> {
        self.ensure_loaded("select")?;
        if output.source.is_degenerate() {
            return Err(EngineError::InvalidSelection(format!("{:?}", output.source)));
        }
        let (history, _) = self.loaded_parts()?;
        let source_image = history.current().image.clone();
        let preview = pixelated_crop(&source_image, output.source)?;

        self.job = Some(EnhancementJob {
            kind: JobKind::New,
            source_selection: output.source,
            source_image,
            padding: self.settings.new_selection_padding,
            context_end: history.index() + 1,
            preview: Arc::new(preview),
            animation_start_rect: output.display,
            animation_end_rect: fit_rect(output.source.size(), self.settings.viewport()),
            snapshot: output.snapshot,
        });
        tracing::info!(session = %self.session, selection = ?output.source, "selection confirmed");
        self.set_state(RefineState::Enhancing);
        Ok(())
    }

    /// Re-run the step under the cursor with wider context: `Loaded` → `Enhancing`.
    pub fn regenerate(&mut self) -> Result<(), EngineError> {
        self.ensure_loaded("regenerate")?;
        let (history, _) = self.loaded_parts()?;
        let index = history.index();
        if index == 0 {
            return Err(EngineError::NothingToRegenerate);
        }
        let selection = history
            .current()
            .selection
            .ok_or(EngineError::NothingToRegenerate)?;
        let source_image = history.steps()[index - 1].image.clone();

        let viewport = self.settings.viewport();
        let mapping = compute_display_mapping(viewport, Size::of_image(&source_image));
        let display = to_display_rect(selection, &mapping);
        let mut snapshot = render_letterboxed(&source_image, viewport, &mapping);
        stroke_rect(&mut snapshot, display, 2, SELECTION_COLOR, LinePattern::Solid);
        let preview = pixelated_crop(&source_image, selection)?;

        self.job = Some(EnhancementJob {
            kind: JobKind::Regenerate,
            source_selection: selection,
            source_image,
            padding: self.settings.regenerate_padding,
            context_end: index,
            preview: Arc::new(preview),
            animation_start_rect: display,
            animation_end_rect: fit_rect(selection.size(), viewport),
            snapshot,
        });
        tracing::info!(session = %self.session, index, "regenerating step");
        self.set_state(RefineState::Enhancing);
        Ok(())
    }

    // ========================================================================
    // JOB
    // ========================================================================

    /// The eased camera move for the pending job, plus its completion.
    pub fn zoom_in_tween(&self) -> Result<(Tween, Completion), EngineError> {
        let job = self.job.as_ref().ok_or(EngineError::NoJob)?;
        Ok(Tween::new(
            job.animation_start_rect,
            job.animation_end_rect,
            self.settings.zoom_in_frames,
        ))
    }

    /// Wait for the zoom-in, then enhance: `Enhancing` → `Enhanced`.
    /// Never fails once started; every pipeline error becomes a fallback.
    pub async fn run_job(&mut self, zoom_in: Completion) -> Result<EnhancementReport, EngineError> {
        if self.state != RefineState::Enhancing {
            return Err(EngineError::NoJob);
        }
        let job = self.job.take().ok_or(EngineError::NoJob)?;

        if !zoom_in.wait().await {
            tracing::warn!(session = %self.session, "zoom-in ended early, continuing job");
        }

        let output = match self.enhance_selection(&job).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(session = %self.session, error = %e, "pipeline failed, using fallback crop");
                PipelineOutput {
                    image: self.fallback_image(&job),
                    description: Description::fallback(),
                    outcome: Outcome::Fallback,
                    side_signal: false,
                }
            }
        };

        let report = EnhancementReport {
            outcome: output.outcome,
            side_signal: output.side_signal,
            description: output.description.clone(),
            final_size: output.image.dimensions(),
        };
        self.pending = Some(PendingResult {
            kind: job.kind,
            step: HistoryStep {
                image: Arc::new(output.image),
                description: Some(output.description),
                selection: Some(job.source_selection),
            },
            preview: job.preview,
            backdrop: job.snapshot,
            stage: job.animation_end_rect,
        });
        tracing::info!(
            session = %self.session,
            outcome = ?report.outcome,
            side_signal = report.side_signal,
            size = ?report.final_size,
            "job finished"
        );
        self.set_state(RefineState::Enhanced);
        Ok(report)
    }

    async fn enhance_selection(&self, job: &EnhancementJob) -> Result<PipelineOutput, EngineError> {
        let history = self.history.as_ref().ok_or(EngineError::NoImage)?;
        let source = &job.source_image;
        let selection = job.source_selection;

        let padded = compute_padded_rect(selection, Size::of_image(source), job.padding);
        let working_width = (self.settings.working_width as f32 * (1.0 + job.padding)).round() as u32;
        let (ww, wh) = scaled_dimensions(padded, working_width);
        let working = crop_resampled(source, padded, ww, wh, Interpolation::Bilinear)?;

        let mut overlay = working.clone();
        let inner = map_inner_rect(Rect::full(Size::of_image(&working)), selection, padded);
        stroke_rect(&mut overlay, inner, 2, SELECTION_COLOR, LinePattern::Solid);

        let prior = history.descriptions_before(job.context_end);
        let (description, description_degraded) =
            describe_or_fallback(self.describer.as_ref(), &overlay, &prior).await;

        let mut prompts: Vec<String> = prior.iter().filter_map(|d| d.prompt.clone()).collect();
        prompts.push(
            description
                .prompt
                .clone()
                .unwrap_or_else(|| description.selection_description.clone()),
        );
        tracing::debug!(padded = ?padded, working = ?(ww, wh), prompts = prompts.len(), "calling enhancement service");

        let (enhanced, passed_through) =
            enhance_or_passthrough(self.enhancer.as_ref(), &working, &prompts).await;
        if passed_through {
            return Ok(PipelineOutput {
                image: fallback_crop(source, selection)?,
                description,
                outcome: Outcome::Fallback,
                side_signal: false,
            });
        }

        // Against the size actually returned, not the size requested.
        let final_rect = map_inner_rect(Rect::full(Size::of_image(&enhanced.image)), selection, padded);
        let (fw, fh) = scaled_dimensions(selection, self.settings.output_width);
        let image = crop_resampled(&enhanced.image, final_rect, fw, fh, Interpolation::Bilinear)?;

        Ok(PipelineOutput {
            image,
            description,
            outcome: if description_degraded { Outcome::Degraded } else { Outcome::Enhanced },
            side_signal: enhanced.side_signal,
        })
    }

    fn fallback_image(&self, job: &EnhancementJob) -> RgbaImage {
        match fallback_crop(&job.source_image, job.source_selection) {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!(error = %e, "fallback crop failed, keeping preview");
                (*job.preview).clone()
            }
        }
    }

    // ========================================================================
    // REVEAL + COMMIT
    // ========================================================================

    /// Dissolve from the pixelated preview to the pending result.
    pub fn dissolve(&self, rng: &mut StdRng, on_complete: Option<DissolveDone>) -> Result<Dissolve, EngineError> {
        let pending = self.pending.as_ref().ok_or(EngineError::NoJob)?;
        build_dissolve(pending, &self.settings, rng, on_complete)
    }

    /// Commit the pending result: `Enhanced` → `Loaded`.
    pub fn commit(&mut self) -> Result<(), EngineError> {
        if self.state != RefineState::Enhanced {
            return Err(EngineError::NoJob);
        }
        let pending = self.pending.take().ok_or(EngineError::NoJob)?;
        let history = self.history.as_mut().ok_or(EngineError::NoImage)?;
        match pending.kind {
            JobKind::New => history.commit_new_step(pending.step),
            JobKind::Regenerate => history.replace_current_step(pending.step),
        }
        let current = history.current().image.clone();
        let (index, len, bytes) = (history.index(), history.len(), history.memory_usage());
        if let Some(selector) = self.selector.as_mut() {
            selector.set_image(current);
            selector.unlock();
        }
        tracing::info!(session = %self.session, kind = ?pending.kind, index, len, bytes, "step committed");
        self.set_state(RefineState::Loaded);
        Ok(())
    }

    /// Run the dissolve to its end on `clock`, then commit. Frames are
    /// presented on the zoom-in's canvas, inside the rect it ended on.
    pub async fn reveal(
        &mut self,
        clock: &mut dyn FrameClock,
        surface: &mut dyn Surface,
    ) -> Result<DissolveStatus, EngineError> {
        if self.state != RefineState::Enhanced {
            return Err(EngineError::NoJob);
        }
        let status = {
            let pending = self.pending.as_ref().ok_or(EngineError::NoJob)?;
            let mut dissolve = build_dissolve(pending, &self.settings, &mut self.rng, None)?;
            let mut staged = StagedSurface {
                inner: surface,
                backdrop: &pending.backdrop,
                stage: pending.stage,
            };
            dissolve.run(clock, &mut staged).await
        };
        if status == DissolveStatus::Finished {
            self.commit()?;
        }
        Ok(status)
    }

    /// Zoom-in, enhancement, dissolve and commit for the pending job.
    pub async fn process(
        &mut self,
        clock: &mut dyn FrameClock,
        surface: &mut dyn Surface,
    ) -> Result<EnhancementReport, EngineError> {
        let (tween, completion) = self.zoom_in_tween()?;
        if let Some(job) = self.job.as_ref() {
            tween
                .play(clock, |rect| surface.present(&zoom_frame(job, rect)))
                .await;
        }
        let report = self.run_job(completion).await?;
        self.reveal(clock, surface).await?;
        Ok(report)
    }

    /// `select` followed by `process`.
    pub async fn enhance(
        &mut self,
        output: SelectionOutput,
        clock: &mut dyn FrameClock,
        surface: &mut dyn Surface,
    ) -> Result<EnhancementReport, EngineError> {
        self.select(output)?;
        self.process(clock, surface).await
    }

    // ========================================================================
    // NAVIGATION + EXPORT
    // ========================================================================

    /// Returns `true` if the cursor moved.
    pub fn undo(&mut self) -> Result<bool, EngineError> {
        self.ensure_loaded("undo")?;
        self.move_cursor(HistoryStore::undo)
    }

    /// Returns `true` if the cursor moved.
    pub fn redo(&mut self) -> Result<bool, EngineError> {
        self.ensure_loaded("redo")?;
        self.move_cursor(HistoryStore::redo)
    }

    fn move_cursor(&mut self, step: fn(&mut HistoryStore) -> bool) -> Result<bool, EngineError> {
        let history = self.history.as_mut().ok_or(EngineError::NoImage)?;
        if !step(history) {
            return Ok(false);
        }
        let current = history.current().image.clone();
        let index = history.index();
        if let Some(selector) = self.selector.as_mut() {
            selector.set_image(current);
        }
        tracing::info!(session = %self.session, index, "cursor moved");
        Ok(true)
    }

    /// Animated GIF of the history from the root to the cursor.
    pub fn export_zoom(&self) -> Result<Vec<u8>, EngineError> {
        self.ensure_loaded("export_zoom")?;
        let (history, _) = self.loaded_parts()?;
        Ok(crate::export::export_zoom(history.path_to_cursor(), &self.settings.export)?)
    }

    /// JSON of the step under the cursor.
    pub fn download_state(&self) -> Result<String, EngineError> {
        let history = self.history.as_ref().ok_or(EngineError::NoImage)?;
        step_to_json(history.index(), history.current())
    }
}

fn build_dissolve(
    pending: &PendingResult,
    settings: &EngineSettings,
    rng: &mut StdRng,
    on_complete: Option<DissolveDone>,
) -> Result<Dissolve, EngineError> {
    let (w, h) = pending.step.image.dimensions();
    let low = scale_nearest(&pending.preview, w, h);
    let frames = Dissolve::frames_for(settings.dissolve_duration_ms, settings.frame_rate);
    Dissolve::new(low, pending.step.image.clone(), frames, rng, on_complete)
}

/// One zoom-in frame: the preview stretched over `rect` on top of the snapshot.
fn zoom_frame(job: &EnhancementJob, rect: Rect) -> RgbaImage {
    stage_frame(&job.snapshot, &job.preview, rect)
}

/// `image` stretched (nearest) over `rect` on a copy of `backdrop`.
fn stage_frame(backdrop: &RgbaImage, image: &RgbaImage, rect: Rect) -> RgbaImage {
    let mut frame = backdrop.clone();
    let w = rect.w.round().max(1.0) as u32;
    let h = rect.h.round().max(1.0) as u32;
    let scaled = scale_nearest(image, w, h);
    imageops::overlay(&mut frame, &scaled, rect.x.round() as i64, rect.y.round() as i64);
    frame
}

/// Forwards dissolve frames to `inner` composed onto the display canvas,
/// so a reveal continues at the size and place the zoom-in ended.
struct StagedSurface<'a> {
    inner: &'a mut dyn Surface,
    backdrop: &'a RgbaImage,
    stage: Rect,
}

impl Surface for StagedSurface<'_> {
    fn present(&mut self, frame: &RgbaImage) {
        self.inner.present(&stage_frame(self.backdrop, frame, self.stage));
    }
}
