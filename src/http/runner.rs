/*!
 * HttpQueriesRunner: the worker pool that drains an `HttpQueryQueue`.
 *
 * Workers dequeue one query at a time, execute it against its peer with
 * the peer's configured timeout, retry `Transport`-class failures with
 * capped exponential backoff, and otherwise fail the query permanently.
 * Session pinning and throughput sampling live here since both are
 * properties of *running* a queue, not of the queue itself.
 */

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;

use crate::error::TransferError;
use crate::http::query::{HttpQuery, Method};
use crate::http::queue::HttpQueryQueue;
use crate::http::speed::SpeedEstimator;
use crate::peers::PeerDirectory;

const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_CEILING: Duration = Duration::from_secs(30);
const DEQUEUE_POLL: Duration = Duration::from_millis(200);

/// Runs `threads_count` worker threads against a queue until every query
/// has finished (`Done` or permanently `Failed`) or the queue is
/// externally stopped. Construct one per job/detection sweep; it owns
/// its worker threads and joins them in `wait_complete`.
pub struct HttpQueriesRunner {
    queue: Arc<HttpQueryQueue>,
    speed: Arc<Mutex<SpeedEstimator>>,
    handles: Vec<std::thread::JoinHandle<()>>,
}

impl HttpQueriesRunner {
    pub fn new(
        queue: HttpQueryQueue,
        peers: Arc<PeerDirectory>,
        threads_count: usize,
        client: reqwest::blocking::Client,
    ) -> Self {
        let queue = Arc::new(queue);
        let speed = Arc::new(Mutex::new(SpeedEstimator::new()));
        let threads_count = threads_count.max(1);
        let mut handles = Vec::with_capacity(threads_count);

        for _ in 0..threads_count {
            let queue = queue.clone();
            let peers = peers.clone();
            let client = client.clone();
            let speed = speed.clone();
            handles.push(std::thread::spawn(move || worker_loop(queue, peers, client, speed)));
        }

        Self {
            queue,
            speed,
            handles,
        }
    }

    pub fn queue(&self) -> &HttpQueryQueue {
        &self.queue
    }

    pub fn kilobytes_per_sec(&self) -> f64 {
        self.speed.lock().unwrap().kilobytes_per_sec()
    }

    /// Block until every query has terminated (or the queue was
    /// stopped), then join the worker threads. Returns the queue's
    /// final status.
    pub fn wait_complete(self) -> crate::http::queue::QueueStatus {
        for handle in self.handles {
            let _ = handle.join();
        }
        self.queue.status()
    }

    /// Cooperative cancel (§4.3, §5): stop accepting new work. Workers
    /// observe this between requests, not mid-request, and are still
    /// joined by `wait_complete`.
    pub fn stop(&self) {
        self.queue.stop();
    }
}

fn worker_loop(
    queue: Arc<HttpQueryQueue>,
    peers: Arc<PeerDirectory>,
    client: reqwest::blocking::Client,
    speed: Arc<Mutex<SpeedEstimator>>,
) {
    loop {
        if queue.is_stopped() || queue.is_done() {
            break;
        }
        match queue.dequeue_timeout(DEQUEUE_POLL) {
            Some(mut query) => {
                execute_with_retry(&client, &peers, query.as_mut(), &queue);
                speed
                    .lock()
                    .unwrap()
                    .sample(queue.uploaded_bytes() + queue.downloaded_bytes());
            }
            None => continue,
        }
    }
}

fn execute_with_retry(
    client: &reqwest::blocking::Client,
    peers: &PeerDirectory,
    query: &mut dyn HttpQuery,
    queue: &HttpQueryQueue,
) {
    let peer = match peers.get(query.peer()) {
        Ok(peer) => peer.clone(),
        Err(_) => {
            // An unknown peer never resolves on retry; for a best-effort
            // query (e.g. peer detection) this is indistinguishable from
            // "not installed", so it must not poison the shared queue.
            queue.record_completion(query.best_effort(), 0, 0);
            return;
        }
    };

    let mut attempt: u32 = 0;
    let max_retries = queue.max_retries();

    loop {
        match send_once(client, &peer, query, queue) {
            Ok((uploaded, downloaded)) => {
                queue.record_completion(true, uploaded, downloaded);
                return;
            }
            Err(e) if e.is_transient() && attempt < max_retries => {
                attempt += 1;
                std::thread::sleep(backoff_delay(attempt));
                continue;
            }
            Err(_) => {
                queue.record_completion(query.best_effort(), 0, 0);
                return;
            }
        }
    }
}

/// One HTTP round trip. Returns `(uploaded_bytes, downloaded_bytes)` on
/// success. A non-2xx status or transport failure yields `Transport`
/// (retried by the caller); a `handle_answer` error surfaces as-is and
/// is never retried, since the bytes arrived fine and retrying would
/// reproduce the same malformed answer.
fn send_once(
    client: &reqwest::blocking::Client,
    peer: &crate::peers::Peer,
    query: &mut dyn HttpQuery,
    queue: &HttpQueryQueue,
) -> crate::error::Result<(u64, u64)> {
    let url = format!("{}{}", peer.base_url, query.uri());
    let mut request = match query.method() {
        Method::Get => client.get(&url),
        Method::Post => client.post(&url),
        Method::Put => client.put(&url),
        Method::Delete => client.delete(&url),
    };
    request = request.timeout(peer.timeout);

    for (name, value) in query.headers() {
        request = request.header(name, value);
    }
    if let Some(cookie) = queue.pinned_cookie() {
        request = request.header("Cookie", cookie);
    }
    if let (Some(user), Some(pass)) = (&peer.username, &peer.password) {
        request = request.basic_auth(user, Some(pass));
    }

    let uploaded = if let Some(body) = query.read_body() {
        let len = body.len() as u64;
        request = request.body(body);
        len
    } else {
        0
    };

    let response = request.send()?;
    let status = response.status();

    // Only the last Set-Cookie survives this client's header map, which
    // matches the legacy behavior this protocol quirk is named after
    // (§9 Design Notes).
    if let Some(cookie) = response
        .headers()
        .get(reqwest::header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
    {
        queue.pin_cookie_if_absent(cookie.to_string());
    }

    if !status.is_success() {
        return Err(TransferError::Transport(format!(
            "{} answered {} for {}",
            peer.name,
            status.as_u16(),
            url
        )));
    }

    let headers: Vec<(String, String)> = response
        .headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect();
    let status_code = status.as_u16();
    let body = response.bytes()?.to_vec();
    let downloaded = body.len() as u64;

    query.handle_answer(status_code, &headers, &body)?;

    Ok((uploaded, downloaded))
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE.saturating_mul(1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX));
    let capped = exp.min(BACKOFF_CEILING);
    let jitter_ms = rand::rng().random_range(0..=(capped.as_millis() as u64 / 4).max(1));
    capped + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_capped() {
        for attempt in 0..30 {
            let delay = backoff_delay(attempt);
            assert!(delay <= BACKOFF_CEILING + Duration::from_millis(BACKOFF_CEILING.as_millis() as u64 / 4));
        }
    }

    #[test]
    fn backoff_grows_with_attempt_before_capping() {
        assert!(backoff_delay(1) >= BACKOFF_BASE);
        assert!(backoff_delay(5) > backoff_delay(1));
    }

    struct NoopQuery {
        peer: &'static str,
        best_effort: bool,
    }

    impl HttpQuery for NoopQuery {
        fn method(&self) -> Method {
            Method::Get
        }
        fn peer(&self) -> &str {
            self.peer
        }
        fn uri(&self) -> String {
            "/x".into()
        }
        fn headers(&self) -> Vec<(String, String)> {
            Vec::new()
        }
        fn read_body(&self) -> Option<Vec<u8>> {
            None
        }
        fn handle_answer(&mut self, _s: u16, _h: &[(String, String)], _b: &[u8]) -> crate::error::Result<()> {
            Ok(())
        }
        fn best_effort(&self) -> bool {
            self.best_effort
        }
    }

    #[test]
    fn best_effort_query_against_unknown_peer_does_not_fail_queue() {
        let queue = HttpQueryQueue::new(1, 0);
        let peers = PeerDirectory::new();
        let client = reqwest::blocking::Client::new();
        let mut query = NoopQuery {
            peer: "ghost",
            best_effort: true,
        };

        execute_with_retry(&client, &peers, &mut query, &queue);

        assert_eq!(queue.completed(), 1);
        assert_ne!(queue.status(), crate::http::queue::QueueStatus::Failure);
    }

    #[test]
    fn non_best_effort_query_against_unknown_peer_fails_queue() {
        let queue = HttpQueryQueue::new(1, 0);
        let peers = PeerDirectory::new();
        let client = reqwest::blocking::Client::new();
        let mut query = NoopQuery {
            peer: "ghost",
            best_effort: false,
        };

        execute_with_retry(&client, &peers, &mut query, &queue);

        assert_eq!(queue.completed(), 1);
        assert_eq!(queue.status(), crate::http::queue::QueueStatus::Failure);
    }
}
