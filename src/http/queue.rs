/*!
 * HttpQueryQueue: a bounded producer/consumer FIFO of `HttpQuery` plus the
 * bookkeeping the runner and job state machines read for progress.
 */

use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::http::query::HttpQuery;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    Running,
    Success,
    Failure,
}

pub struct HttpQueryQueue {
    sender: Sender<Box<dyn HttpQuery>>,
    receiver: Receiver<Box<dyn HttpQuery>>,
    scheduled: AtomicU64,
    completed: AtomicU64,
    failed: AtomicBool,
    uploaded_bytes: AtomicU64,
    downloaded_bytes: AtomicU64,
    max_retries: AtomicU64,
    stopped: AtomicBool,
    /// Harvested from the first successful response of the job; pinned
    /// onto every subsequent request as the `Cookie` header (§4.3).
    pinned_cookie: Mutex<Option<String>>,
}

impl HttpQueryQueue {
    pub fn new(capacity: usize, max_retries: u32) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        Self {
            sender,
            receiver,
            scheduled: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicBool::new(false),
            uploaded_bytes: AtomicU64::new(0),
            downloaded_bytes: AtomicU64::new(0),
            max_retries: AtomicU64::new(max_retries as u64),
            stopped: AtomicBool::new(false),
            pinned_cookie: Mutex::new(None),
        }
    }

    pub fn enqueue(&self, query: Box<dyn HttpQuery>) {
        self.scheduled.fetch_add(1, Ordering::SeqCst);
        // A full channel would mean capacity was under-reserved; block
        // rather than drop, matching "bounded FIFO" semantics.
        let _ = self.sender.send(query);
    }

    pub fn set_max_retries(&self, max_retries: u32) {
        self.max_retries.store(max_retries as u64, Ordering::SeqCst);
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries.load(Ordering::SeqCst) as u32
    }

    pub(crate) fn try_dequeue(&self) -> Option<Box<dyn HttpQuery>> {
        self.receiver.try_recv().ok()
    }

    pub(crate) fn dequeue_timeout(&self, timeout: std::time::Duration) -> Option<Box<dyn HttpQuery>> {
        self.receiver.recv_timeout(timeout).ok()
    }

    pub fn record_completion(&self, success: bool, uploaded: u64, downloaded: u64) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.uploaded_bytes.fetch_add(uploaded, Ordering::SeqCst);
        self.downloaded_bytes.fetch_add(downloaded, Ordering::SeqCst);
        if !success {
            self.failed.store(true, Ordering::SeqCst);
        }
    }

    pub fn scheduled(&self) -> u64 {
        self.scheduled.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.uploaded_bytes.load(Ordering::SeqCst)
    }

    pub fn downloaded_bytes(&self) -> u64 {
        self.downloaded_bytes.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> QueueStatus {
        if self.failed.load(Ordering::SeqCst) {
            QueueStatus::Failure
        } else if self.completed.load(Ordering::SeqCst) >= self.scheduled.load(Ordering::SeqCst) {
            QueueStatus::Success
        } else {
            QueueStatus::Running
        }
    }

    pub fn is_done(&self) -> bool {
        !matches!(self.status(), QueueStatus::Running)
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn pin_cookie_if_absent(&self, cookie: String) {
        let mut guard = self.pinned_cookie.lock().unwrap();
        if guard.is_none() {
            *guard = Some(cookie);
        }
    }

    pub fn pinned_cookie(&self) -> Option<String> {
        self.pinned_cookie.lock().unwrap().clone()
    }
}
