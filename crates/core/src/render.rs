//! Page rendering through the render cache
//!
//! The cache is the only synchronization point for renders: a lookup either
//! returns a finished buffer, joins a render already in flight, or hands the
//! caller a claim it must complete. Lookups happen under the document read
//! lock so the claimed key matches the page order at that moment; the
//! rasterizer itself always runs with no document lock held.

use crate::document::DocumentHandle;
use crate::error::{DocumentError, DocumentResult};
use crate::pages::PageId;
use folio_cache::{
    CacheStats, IndexChange, Lookup, PageBuffer, PendingRender, RenderCache, RenderClaim, RenderError,
    RenderKey,
};
use folio_engine::{EngineHandle, PageRef, PdfEngine, RgbaImage, Rotation};
use folio_scheduler::{
    CancellationToken, Job, JobExecutor, JobId, JobPriority, JobScheduler, JobType, WorkerPool,
    WorkerPoolConfig,
};
use image::Rgba;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Consumer of page index changes.
///
/// Observers are called with the document write lock held, after the
/// mutation succeeded and before any reader can see the new page order.
pub trait IndexObserver: Send + Sync {
    fn on_index_change(&self, change: &IndexChange);
}

impl IndexObserver for RenderCache {
    fn on_index_change(&self, change: &IndexChange) {
        self.apply(change);
    }
}

/// Everything needed to rasterize one page outside the document lock.
struct RenderTarget {
    engine: Arc<dyn PdfEngine>,
    handle: EngineHandle,
    page_ref: PageRef,
    zoom: f32,
    rotation: Rotation,
}

impl RenderTarget {
    fn rasterize(&self) -> Result<RgbaImage, String> {
        self.engine
            .rasterize(self.handle, self.page_ref, self.zoom, self.rotation)
            .map_err(|err| err.to_string())
    }
}

/// A rendered page, or a blank placeholder when rendering failed.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub buffer: PageBuffer,
    /// Why the placeholder was used. The next request retries the render.
    pub error: Option<String>,
}

impl RenderedPage {
    pub fn is_placeholder(&self) -> bool {
        self.error.is_some()
    }
}

enum TicketState {
    Ready(Result<PageBuffer, RenderError>),
    Pending(Arc<PendingRender>),
}

/// Handle to a render requested with [`DocumentHandle::request_render`].
pub struct RenderTicket {
    state: TicketState,
    job: Option<JobId>,
}

impl RenderTicket {
    fn ready(result: Result<PageBuffer, RenderError>) -> Self {
        Self { state: TicketState::Ready(result), job: None }
    }

    fn pending(pending: Arc<PendingRender>, job: Option<JobId>) -> Self {
        Self { state: TicketState::Pending(pending), job }
    }

    /// Scheduler job running the render, if this request queued one.
    pub fn job_id(&self) -> Option<JobId> {
        self.job
    }

    /// Block until the render finishes.
    pub fn wait(self) -> DocumentResult<PageBuffer> {
        match self.state {
            TicketState::Ready(result) => Ok(result?),
            TicketState::Pending(pending) => Ok(pending.wait()?),
        }
    }

    /// The result if the render has finished.
    pub fn poll(&self) -> Option<DocumentResult<PageBuffer>> {
        match &self.state {
            TicketState::Ready(result) => Some(result.clone().map_err(DocumentError::from)),
            TicketState::Pending(pending) => pending.poll().map(|result| result.map_err(DocumentError::from)),
        }
    }

    pub fn is_ready(&self) -> bool {
        match &self.state {
            TicketState::Ready(_) => true,
            TicketState::Pending(pending) => pending.is_finished(),
        }
    }
}

impl std::fmt::Debug for RenderTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTicket").field("job", &self.job).field("ready", &self.is_ready()).finish()
    }
}

struct RenderWork {
    claim: RenderClaim,
    target: RenderTarget,
}

/// Worker pool draining queued renders for one document handle.
///
/// Claims for queued jobs live in `work` until a worker picks them up.
/// Removing a claim from the map without completing it abandons the render.
pub(crate) struct RenderDispatcher {
    scheduler: Arc<JobScheduler>,
    work: Arc<Mutex<HashMap<JobId, RenderWork>>>,
    _pool: WorkerPool,
}

impl RenderDispatcher {
    pub fn start(workers: usize) -> DocumentResult<Self> {
        let scheduler = Arc::new(JobScheduler::new());
        let work: Arc<Mutex<HashMap<JobId, RenderWork>>> = Arc::new(Mutex::new(HashMap::new()));

        let queued = Arc::clone(&work);
        let executor: JobExecutor = Arc::new(move |job: &Job, token: &CancellationToken| {
            let Some(work) = queued.lock().unwrap().remove(&job.id) else {
                return;
            };
            if token.is_cancelled() {
                log::debug!("render job {} cancelled before start", job.id);
                return;
            }
            let result = work.target.rasterize();
            if let Err(err) = work.claim.complete(result) {
                log::warn!("background render job {} failed: {err}", job.id);
            }
        });

        let pool = WorkerPool::new(Arc::clone(&scheduler), executor, WorkerPoolConfig::new(workers))?;
        Ok(Self { scheduler, work, _pool: pool })
    }

    fn submit(&self, priority: JobPriority, page_id: PageId, claim: RenderClaim, target: RenderTarget) -> JobId {
        let key = claim.key();
        let job_type = JobType::RenderPage {
            page_id,
            zoom_permille: key.zoom_permille,
            rotation: key.rotation.degrees(),
        };
        // Hold the map while submitting so a worker cannot pop the job first.
        let mut work = self.work.lock().unwrap();
        let (job_id, _token) = self.scheduler.submit(priority, job_type);
        work.insert(job_id, RenderWork { claim, target });
        job_id
    }

    /// Drop queued renders of pages that no longer exist. Waiters see the
    /// render abandoned.
    pub fn cancel_pages(&self, pages: &[PageId]) {
        let cancelled: Vec<JobId> =
            pages.iter().flat_map(|&page| self.scheduler.cancel_page_jobs(page)).collect();
        if cancelled.is_empty() {
            return;
        }
        let mut work = self.work.lock().unwrap();
        for job_id in &cancelled {
            work.remove(job_id);
        }
        log::debug!("cancelled {} queued renders for removed pages", cancelled.len());
    }

    pub fn cancel_all(&self) {
        self.scheduler.clear();
        self.work.lock().unwrap().clear();
    }

    pub fn queued(&self) -> usize {
        self.scheduler.pending_jobs()
    }
}

/// Pixel size of a page rendered at `zoom`, before view rotation.
fn raster_size(width: f32, height: f32, zoom: f32) -> (u32, u32) {
    ((width * zoom).round().max(1.0) as u32, (height * zoom).round().max(1.0) as u32)
}

/// Reject zoom factors the rasterizer cannot honour and rasters larger
/// than `max_pixels`.
fn check_raster(width: f32, height: f32, zoom: f32, max_pixels: u64) -> DocumentResult<()> {
    if !(zoom.is_finite() && zoom > 0.0) {
        return Err(DocumentError::InvalidArgument(format!("zoom must be finite and positive, got {zoom}")));
    }
    let pixels = f64::from(width * zoom).round().max(1.0) * f64::from(height * zoom).round().max(1.0);
    if !pixels.is_finite() || pixels > max_pixels as f64 {
        return Err(DocumentError::InvalidArgument(format!(
            "render of {width}x{height} at zoom {zoom} exceeds {max_pixels} pixels"
        )));
    }
    Ok(())
}

fn placeholder(width: f32, height: f32, zoom: f32, sideways: bool) -> RgbaImage {
    let mut size = raster_size(width, height, zoom);
    if sideways {
        size = (size.1, size.0);
    }
    RgbaImage::from_pixel(size.0, size.1, Rgba([255, 255, 255, 255]))
}

impl DocumentHandle {
    /// Claim or join a render for `index` under the read lock.
    fn lookup_render(
        &self,
        index: usize,
        zoom: f32,
        rotation: Rotation,
    ) -> DocumentResult<(Lookup, PageId, RenderTarget)> {
        self.read(|doc| {
            let page_id = doc.pages.id_at(index)?;
            let page = doc.pages.at(index)?;
            check_raster(page.geometry.width, page.geometry.height, zoom, self.config.max_render_pixels)?;
            let page_ref = page.page_ref;
            let lookup = self.cache.lookup(RenderKey::new(index, zoom, rotation));
            let target = RenderTarget {
                engine: Arc::clone(&doc.engine),
                handle: doc.handle,
                page_ref,
                zoom,
                rotation,
            };
            Ok((lookup, page_id, target))
        })
    }

    /// Render a page on this thread, or wait for a render of the same key
    /// already in flight. `rotation` is applied on top of the page's own
    /// rotation.
    pub fn render(&self, index: usize, zoom: f32, rotation: Rotation) -> DocumentResult<PageBuffer> {
        let (lookup, _, target) = self.lookup_render(index, zoom, rotation)?;
        match lookup {
            Lookup::Hit(buffer) => Ok(buffer),
            Lookup::Pending(pending) => Ok(pending.wait()?),
            Lookup::Miss(claim) => Ok(claim.complete(target.rasterize())?),
        }
    }

    /// Render a page at the configured `render_dpi` with no view rotation.
    pub fn render_default(&self, index: usize) -> DocumentResult<PageBuffer> {
        self.render(index, self.config.render_zoom(), Rotation::Deg0)
    }

    /// Like [`render`](Self::render), but a failed render yields a blank
    /// page-sized placeholder carrying the error instead of failing.
    pub fn render_or_placeholder(
        &self,
        index: usize,
        zoom: f32,
        rotation: Rotation,
    ) -> DocumentResult<RenderedPage> {
        match self.render(index, zoom, rotation) {
            Ok(buffer) => Ok(RenderedPage { buffer, error: None }),
            Err(DocumentError::CacheRenderFailed(message)) => {
                log::warn!("page {index} shown as placeholder: {message}");
                let image = self.read(|doc| {
                    let geometry = doc.pages.at(index)?.geometry;
                    let sideways = geometry.rotation.rotate_by(rotation).is_sideways();
                    Ok(placeholder(geometry.width, geometry.height, zoom, sideways))
                })?;
                Ok(RenderedPage { buffer: Arc::new(image), error: Some(message) })
            }
            Err(err) => Err(err),
        }
    }

    /// Queue a render on the worker pool and return immediately.
    ///
    /// With `render_workers` set to 0 the render runs on this thread and
    /// the ticket is already finished.
    pub fn request_render(
        &self,
        index: usize,
        zoom: f32,
        rotation: Rotation,
        priority: JobPriority,
    ) -> DocumentResult<RenderTicket> {
        let workers = self.config.render_workers;
        let dispatcher = if workers > 0 { Some(self.dispatcher(workers)?) } else { None };

        let (lookup, page_id, target) = self.lookup_render(index, zoom, rotation)?;
        let ticket = match lookup {
            Lookup::Hit(buffer) => RenderTicket::ready(Ok(buffer)),
            Lookup::Pending(pending) => RenderTicket::pending(pending, None),
            Lookup::Miss(claim) => match dispatcher {
                Some(dispatcher) => {
                    let pending = claim.pending();
                    let job = dispatcher.submit(priority, page_id, claim, target);
                    log::debug!("queued render of page {index} as job {job} ({priority:?})");
                    RenderTicket::pending(pending, Some(job))
                }
                None => RenderTicket::ready(claim.complete(target.rasterize())),
            },
        };
        Ok(ticket)
    }

    pub fn render_cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Renders queued on the worker pool and not yet started.
    pub fn queued_renders(&self) -> usize {
        self.renderer.lock().unwrap().as_ref().map_or(0, |renderer| renderer.queued())
    }

    fn dispatcher(&self, workers: usize) -> DocumentResult<Arc<RenderDispatcher>> {
        let mut renderer = self.renderer.lock().unwrap();
        if let Some(dispatcher) = renderer.as_ref() {
            return Ok(Arc::clone(dispatcher));
        }
        let dispatcher = Arc::new(RenderDispatcher::start(workers)?);
        *renderer = Some(Arc::clone(&dispatcher));
        Ok(dispatcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EditorConfig, InsertPosition};
    use folio_engine::LopdfEngine;

    fn handle(workers: usize) -> DocumentHandle {
        let handle = DocumentHandle::with_config(EditorConfig::new().with_render_workers(workers));
        handle.create_new().unwrap();
        handle.insert_blank(InsertPosition::End, 100.0, 50.0).unwrap();
        handle.insert_blank(InsertPosition::End, 200.0, 50.0).unwrap();
        handle
    }

    #[test]
    fn test_render_is_cached() {
        let handle = handle(0);
        let first = handle.render(1, 1.0, Rotation::Deg0).unwrap();
        assert_eq!((first.width(), first.height()), (200, 50));

        let second = handle.render(1, 1.0, Rotation::Deg0).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        let stats = handle.render_cache_stats();
        assert_eq!((stats.renders, stats.hits, stats.entries), (1, 1, 1));
    }

    #[test]
    fn test_render_applies_view_rotation() {
        let handle = handle(0);
        let buffer = handle.render(0, 2.0, Rotation::Deg90).unwrap();
        assert_eq!((buffer.width(), buffer.height()), (100, 200));
    }

    #[test]
    fn test_cached_render_follows_its_page() {
        let handle = handle(0);
        let before = handle.render(1, 1.0, Rotation::Deg0).unwrap();
        handle.insert_blank(InsertPosition::At(0), 10.0, 10.0).unwrap();

        let after = handle.render(2, 1.0, Rotation::Deg0).unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(handle.render_cache_stats().renders, 1);
    }

    #[test]
    fn test_rotation_evicts_cached_render() {
        let handle = handle(0);
        handle.render(0, 1.0, Rotation::Deg0).unwrap();
        handle.rotate(0, 90).unwrap();

        let buffer = handle.render(0, 1.0, Rotation::Deg0).unwrap();
        assert_eq!((buffer.width(), buffer.height()), (50, 100));
        assert_eq!(handle.render_cache_stats().renders, 2);
    }

    #[test]
    fn test_delete_drops_cached_render() {
        let handle = handle(0);
        handle.render(0, 1.0, Rotation::Deg0).unwrap();
        handle.render(1, 1.0, Rotation::Deg0).unwrap();
        handle.delete(0).unwrap();

        let stats = handle.render_cache_stats();
        assert_eq!(stats.entries, 1);
        assert!(handle.render(1, 1.0, Rotation::Deg0).is_err());
    }

    #[test]
    fn test_request_render_on_workers() {
        let handle = handle(2);
        let ticket = handle.request_render(0, 1.0, Rotation::Deg0, JobPriority::Visible).unwrap();
        let buffer = ticket.wait().unwrap();
        assert_eq!(buffer.width(), 100);

        let cached = handle.request_render(0, 1.0, Rotation::Deg0, JobPriority::Visible).unwrap();
        assert!(cached.is_ready());
        assert!(cached.job_id().is_none());
        assert!(Arc::ptr_eq(&cached.poll().unwrap().unwrap(), &buffer));
    }

    #[test]
    fn test_request_render_without_workers_is_synchronous() {
        let handle = handle(0);
        let ticket = handle.request_render(1, 0.5, Rotation::Deg0, JobPriority::Background).unwrap();
        assert!(ticket.is_ready());
        assert_eq!(ticket.wait().unwrap().width(), 100);
        assert_eq!(handle.queued_renders(), 0);
    }

    #[test]
    fn test_cancelled_render_is_abandoned() {
        let engine: Arc<dyn PdfEngine> = Arc::new(LopdfEngine::new());
        let doc = engine.create().unwrap();
        let page_ref = engine.insert_page(doc, 0, &folio_engine::PageSpec::Blank { width: 10.0, height: 10.0 }).unwrap();

        // No workers: the job stays queued until cancelled.
        let dispatcher = RenderDispatcher::start(0).unwrap();
        let cache = RenderCache::new(4);
        let Lookup::Miss(claim) = cache.lookup(RenderKey::new(0, 1.0, Rotation::Deg0)) else {
            panic!("expected a miss");
        };
        let pending = claim.pending();
        let target = RenderTarget { engine, handle: doc, page_ref, zoom: 1.0, rotation: Rotation::Deg0 };
        dispatcher.submit(JobPriority::Visible, 7, claim, target);
        assert_eq!(dispatcher.queued(), 1);

        dispatcher.cancel_pages(&[3]);
        assert_eq!(dispatcher.queued(), 1);
        dispatcher.cancel_pages(&[7]);
        assert_eq!(dispatcher.queued(), 0);
        assert!(matches!(pending.wait(), Err(RenderError::Abandoned)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_unusable_zoom_is_rejected_before_rendering() {
        let handle = handle(0);
        for zoom in [0.0, -2.0, f32::NAN, f32::INFINITY, 100_000.0] {
            assert!(
                matches!(handle.render(0, zoom, Rotation::Deg0), Err(DocumentError::InvalidArgument(_))),
                "zoom {zoom}"
            );
            assert!(matches!(
                handle.render_or_placeholder(0, zoom, Rotation::Deg0),
                Err(DocumentError::InvalidArgument(_))
            ));
            assert!(matches!(
                handle.request_render(0, zoom, Rotation::Deg0, JobPriority::Visible),
                Err(DocumentError::InvalidArgument(_))
            ));
        }
        assert_eq!(handle.render_cache_stats().renders, 0);
    }

    #[test]
    fn test_render_respects_configured_pixel_limit() {
        let handle = DocumentHandle::with_config(
            EditorConfig::new().with_render_workers(0).with_max_render_pixels(100 * 50),
        );
        handle.create_new().unwrap();
        handle.insert_blank(InsertPosition::End, 100.0, 50.0).unwrap();

        assert!(handle.render(0, 1.0, Rotation::Deg0).is_ok());
        assert!(matches!(handle.render(0, 1.5, Rotation::Deg0), Err(DocumentError::InvalidArgument(_))));
    }

    #[test]
    fn test_render_default_uses_render_dpi() {
        let handle = DocumentHandle::with_config(EditorConfig::new().with_render_workers(0).with_render_dpi(144));
        handle.create_new().unwrap();
        handle.insert_blank(InsertPosition::End, 100.0, 50.0).unwrap();

        let buffer = handle.render_default(0).unwrap();
        assert_eq!((buffer.width(), buffer.height()), (200, 100));
    }

    #[test]
    fn test_placeholder_size() {
        let image = placeholder(100.0, 40.0, 0.5, false);
        assert_eq!((image.width(), image.height()), (50, 20));
        let image = placeholder(100.0, 40.0, 1.0, true);
        assert_eq!((image.width(), image.height()), (40, 100));
        assert_eq!(image.get_pixel(0, 0), &Rgba([255, 255, 255, 255]));
    }
}
