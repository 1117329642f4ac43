//! Request/response boundary around the synchronous engine.
//!
//! A worker is one engine instance: a tokio task that takes [`TransformRequest`]s from
//! its queue one at a time, runs the pipeline on the blocking pool and posts exactly one
//! [`TransformResponse`] per request, tagged with the caller's correlation id. The
//! [`Dispatcher`] fans requests out over several workers and hands each response back
//! to whoever is awaiting that id.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinError;

use crate::error::EngineError;
use crate::options::DitheringOptions;
use crate::pipeline;
use crate::raster::RasterImage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformRequest {
    pub id: String,
    pub image: RasterImage,
    pub options: DitheringOptions,
}

/// Outcome of one request. On failure `image` is the caller's original image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformResponse {
    pub id: String,
    pub image: RasterImage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TransformResponse {
    pub fn success(id: String, image: RasterImage) -> Self {
        Self {
            id,
            image,
            error: None,
        }
    }

    pub fn failure(id: String, original: RasterImage, error: impl Into<String>) -> Self {
        Self {
            id,
            image: original,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum DispatchError {
    #[error("worker pool is shut down")]
    Closed,
    #[error("request id `{0}` is already in flight")]
    DuplicateId(String),
}

/// Process one request synchronously. Never panics; any fault becomes a failure response.
pub fn handle(request: TransformRequest) -> TransformResponse {
    let TransformRequest { id, image, options } = request;
    run_guarded(id, image, |img| pipeline::process(img, &options))
}

fn run_guarded<F>(id: String, image: RasterImage, f: F) -> TransformResponse
where
    F: FnOnce(&RasterImage) -> Result<RasterImage, EngineError>,
{
    match panic::catch_unwind(AssertUnwindSafe(|| f(&image))) {
        Ok(Ok(out)) => TransformResponse::success(id, out),
        Ok(Err(e)) => {
            tracing::warn!(id = %id, error = %e, "transformation rejected");
            TransformResponse::failure(id, image, e.to_string())
        }
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            tracing::error!(id = %id, error = %msg, "transformation panicked");
            TransformResponse::failure(id, image, format!("processing failed: {msg}"))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Start one engine instance. Responses go to `responses`; the returned sender is the
/// instance's request queue. The task ends when every request sender is dropped.
pub fn spawn(
    responses: mpsc::Sender<TransformResponse>,
    capacity: usize,
) -> mpsc::Sender<TransformRequest> {
    let (tx, mut rx) = mpsc::channel::<TransformRequest>(capacity.max(1));
    tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            let id = request.id.clone();
            let joined = tokio::task::spawn_blocking(move || handle(request)).await;
            let response = completed(id.clone(), joined);
            if responses.send(response).await.is_err() {
                tracing::debug!(id = %id, "response receiver gone; stopping worker");
                break;
            }
        }
    });
    tx
}

/// Response for a finished blocking task. The request was moved into the task, so a
/// task that never completed answers with an empty image.
fn completed(id: String, joined: Result<TransformResponse, JoinError>) -> TransformResponse {
    match joined {
        Ok(r) => r,
        Err(e) => {
            // handle() catches panics, so this only happens while the runtime shuts down
            tracing::error!(id = %id, error = %e, "engine task did not complete");
            TransformResponse::failure(
                id,
                RasterImage::new(0, 0, Vec::new()),
                format!("processing failed: {e}"),
            )
        }
    }
}

/// Waiters keyed by correlation id; the ticket tells submissions sharing an id apart.
type Pending = Arc<Mutex<HashMap<String, (u64, oneshot::Sender<TransformResponse>)>>>;

/// Removes a submission's waiter when `submit` ends without a routed response,
/// including when the caller drops the future mid-flight.
struct PendingGuard<'a> {
    pending: &'a Pending,
    id: String,
    ticket: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut pending = self.pending.lock();
        if pending
            .get(&self.id)
            .is_some_and(|(ticket, _)| *ticket == self.ticket)
        {
            pending.remove(&self.id);
        }
    }
}

/// Pool of engine instances with correlation-id based response routing.
#[derive(Clone)]
pub struct Dispatcher {
    workers: Arc<Vec<mpsc::Sender<TransformRequest>>>,
    pending: Pending,
    next_worker: Arc<AtomicUsize>,
    next_id: Arc<AtomicU64>,
    next_ticket: Arc<AtomicU64>,
}

impl Dispatcher {
    pub fn start(workers: usize, queue_capacity: usize) -> Self {
        let workers = workers.max(1);
        let capacity = queue_capacity.max(1);
        let (resp_tx, mut resp_rx) = mpsc::channel::<TransformResponse>(capacity * workers);
        let senders: Vec<_> = (0..workers)
            .map(|_| spawn(resp_tx.clone(), capacity))
            .collect();
        drop(resp_tx);

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let routes = Arc::clone(&pending);
        tokio::spawn(async move {
            while let Some(response) = resp_rx.recv().await {
                let waiter = routes.lock().remove(&response.id);
                match waiter {
                    Some((_, tx)) => {
                        // caller may have given up; nothing left to do then
                        let _ = tx.send(response);
                    }
                    None => {
                        tracing::warn!(id = %response.id, "response for unknown request id")
                    }
                }
            }
            tracing::debug!("all workers stopped");
        });
        tracing::info!(workers, queue_capacity = capacity, "dither workers started");

        Self {
            workers: Arc::new(senders),
            pending,
            next_worker: Arc::new(AtomicUsize::new(0)),
            next_id: Arc::new(AtomicU64::new(1)),
            next_ticket: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Fresh correlation id for callers that do not bring their own.
    pub fn next_id(&self) -> String {
        format!("req-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    pub fn in_flight(&self) -> usize {
        self.pending.lock().len()
    }

    /// Queue a request and wait for the response carrying the same id.
    pub async fn submit(&self, request: TransformRequest) -> Result<TransformResponse, DispatchError> {
        let id = request.id.clone();
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if pending.contains_key(&id) {
                return Err(DispatchError::DuplicateId(id));
            }
            pending.insert(id.clone(), (ticket, tx));
        }
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
            ticket,
        };
        let idx = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        if self.workers[idx].send(request).await.is_err() {
            return Err(DispatchError::Closed);
        }
        rx.await.map_err(|_| DispatchError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: &str, image: RasterImage, algorithm: &str) -> TransformRequest {
        TransformRequest {
            id: id.to_string(),
            image,
            options: DitheringOptions::with_algorithm(algorithm),
        }
    }

    #[test]
    fn handle_success_keeps_id() {
        let img = RasterImage::filled(4, 4, [255, 0, 0, 255]);
        let mut req = request("abc", img, "atkinson");
        req.options.palette = Some(vec![[255, 0, 0], [0, 0, 0]]);
        let resp = handle(req);
        assert!(resp.is_success());
        assert_eq!(resp.id, "abc");
        assert!(resp.image.data.chunks_exact(4).all(|p| p == [255, 0, 0, 255]));
    }

    #[test]
    fn bad_dimensions_return_original_image() {
        let img = RasterImage::new(4, 4, vec![9; 10]);
        let resp = handle(request("bad", img.clone(), "floyd-steinberg"));
        assert_eq!(resp.id, "bad");
        assert_eq!(resp.image, img);
        assert!(resp.error.unwrap().contains("invalid image dimensions"));
    }

    #[test]
    fn panics_become_failure_responses() {
        let img = RasterImage::filled(2, 2, [1, 2, 3, 4]);
        let resp = run_guarded("boom".into(), img.clone(), |_| panic!("kernel exploded"));
        assert_eq!(resp.id, "boom");
        assert_eq!(resp.image, img);
        assert_eq!(resp.error.as_deref(), Some("processing failed: kernel exploded"));
    }

    #[test]
    fn response_json_shape() {
        let ok = TransformResponse::success("1".into(), RasterImage::filled(1, 1, [0, 0, 0, 255]));
        let v = serde_json::to_value(&ok).unwrap();
        assert!(v.get("error").is_none());
        assert_eq!(v["image"]["data"], serde_json::json!([0, 0, 0, 255]));
        let err = TransformResponse::failure("2".into(), RasterImage::new(0, 0, vec![]), "nope");
        let v = serde_json::to_value(&err).unwrap();
        assert_eq!(v["error"], "nope");
        assert_eq!(v["id"], "2");
    }

    #[tokio::test]
    async fn worker_answers_every_request_with_its_id() {
        let (resp_tx, mut resp_rx) = mpsc::channel(8);
        let requests = spawn(resp_tx, 4);
        let gray = RasterImage::filled(6, 6, [128, 128, 128, 255]);
        requests.send(request("a", gray.clone(), "bayer-4")).await.unwrap();
        requests
            .send(request("b", RasterImage::new(6, 6, vec![0; 3]), "atkinson"))
            .await
            .unwrap();
        requests.send(request("c", gray.clone(), "halftone")).await.unwrap();
        drop(requests);

        let mut got = Vec::new();
        while let Some(resp) = resp_rx.recv().await {
            got.push(resp);
        }
        let ids: Vec<&str> = got.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(got[0].is_success());
        assert!(!got[1].is_success());
        assert_eq!(got[1].image.data, vec![0; 3]);
        assert!(got[2].is_success());
    }

    #[tokio::test]
    async fn dispatcher_routes_concurrent_requests() {
        let dispatcher = Dispatcher::start(3, 2);
        let mut handles = Vec::new();
        for n in 0..12u32 {
            let d = dispatcher.clone();
            handles.push(tokio::spawn(async move {
                let shade = (n * 20) as u8;
                let img = RasterImage::filled(8, 8, [shade, shade, shade, 255]);
                let id = d.next_id();
                let resp = d.submit(request(&id, img, "floyd-steinberg")).await.unwrap();
                (id, resp)
            }));
        }
        for h in handles {
            let (id, resp) = h.await.unwrap();
            assert_eq!(resp.id, id);
            assert!(resp.is_success());
        }
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn unfinished_task_still_answers() {
        let joined = tokio::task::spawn_blocking(|| -> TransformResponse { panic!("lost") }).await;
        assert!(joined.is_err());
        let resp = completed("gone".into(), joined);
        assert_eq!(resp.id, "gone");
        assert!(resp.error.unwrap().starts_with("processing failed"));
        assert!(resp.image.data.is_empty());
    }

    #[tokio::test]
    async fn abandoned_submit_releases_its_id() {
        let dispatcher = Dispatcher::start(1, 1);
        let big = RasterImage::filled(600, 600, [90, 90, 90, 255]);
        let mut busy = Vec::new();
        for n in 0..3 {
            let d = dispatcher.clone();
            let img = big.clone();
            busy.push(tokio::spawn(async move {
                d.submit(request(&format!("busy-{n}"), img, "stucki")).await
            }));
        }
        tokio::task::yield_now().await;

        let small = RasterImage::filled(2, 2, [0, 0, 0, 255]);
        let abandoned = tokio::time::timeout(
            std::time::Duration::from_millis(1),
            dispatcher.submit(request("x", small.clone(), "atkinson")),
        )
        .await;
        assert!(abandoned.is_err());

        for h in busy {
            assert!(h.await.unwrap().unwrap().is_success());
        }
        // single FIFO worker: once this answers, everything queued before it has too
        let last = dispatcher
            .submit(request("last", small.clone(), "atkinson"))
            .await
            .unwrap();
        assert!(last.is_success());
        assert_eq!(dispatcher.in_flight(), 0);

        let again = dispatcher.submit(request("x", small, "atkinson")).await.unwrap();
        assert_eq!(again.id, "x");
        assert!(again.is_success());
    }

    #[tokio::test]
    async fn duplicate_in_flight_id_is_rejected() {
        let dispatcher = Dispatcher::start(1, 1);
        let d = dispatcher.clone();
        let first = tokio::spawn(async move {
            d.submit(request("dup", RasterImage::filled(600, 600, [90, 90, 90, 255]), "stucki"))
                .await
        });
        while dispatcher.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        let second = dispatcher
            .submit(request("dup", RasterImage::filled(1, 1, [0, 0, 0, 255]), "atkinson"))
            .await;
        assert_eq!(second, Err(DispatchError::DuplicateId("dup".into())));
        assert!(first.await.unwrap().unwrap().is_success());
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn dispatcher_matches_direct_processing() {
        let dispatcher = Dispatcher::start(1, 1);
        let img = RasterImage::filled(5, 3, [90, 140, 200, 255]);
        let req = request("same", img.clone(), "stucki");
        let expected = pipeline::process(&img, &req.options).unwrap();
        let resp = dispatcher.submit(req).await.unwrap();
        assert_eq!(resp.image, expected);
    }
}
