/*!
 * The read-only peer directory (`OrthancPeers`) and the bidirectional
 * peer detector (§4.8).
 */

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, TransferError};
use crate::http::queue::HttpQueryQueue;
use crate::http::runner::HttpQueriesRunner;
use crate::toolbox::{PLUGIN_NAME, URI_PLUGINS};

#[derive(Debug, Clone)]
pub struct Peer {
    pub name: String,
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
}

/// Read-only directory mapping peer name to its connection coordinates.
#[derive(Debug, Clone, Default)]
pub struct PeerDirectory {
    peers: HashMap<String, Peer>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self {
            peers: HashMap::new(),
        }
    }

    pub fn insert(&mut self, peer: Peer) {
        self.peers.insert(peer.name.clone(), peer);
    }

    pub fn get(&self, name: &str) -> Result<&Peer> {
        self.peers
            .get(name)
            .ok_or_else(|| TransferError::Unknown(format!("peer not found: {}", name)))
    }

    pub fn names(&self) -> Vec<String> {
        self.peers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerClassification {
    Disabled,
    Installed,
    Bidirectional,
}

/// Fan-out GET to `/plugins` on every configured peer, classifying each
/// tri-state per §4.8.
pub struct PeerDetector;

impl PeerDetector {
    pub fn detect(
        peers: &PeerDirectory,
        bidirectional: &HashMap<String, String>,
        threads_count: usize,
        timeout: Duration,
        client: reqwest::blocking::Client,
    ) -> HashMap<String, PeerClassification> {
        let mut result: HashMap<String, PeerClassification> = peers
            .names()
            .into_iter()
            .map(|name| (name, PeerClassification::Disabled))
            .collect();

        if peers.is_empty() {
            return result;
        }

        // Peer detection uses its own short connectivity timeout (§5),
        // independent of whatever each peer's own `timeout` is
        // configured to, so one slow/unreachable peer can't stall the
        // whole sweep. `DetectTransferPluginQuery::best_effort` keeps an
        // unreachable/non-2xx peer from flipping the shared queue to
        // `Failure`, which would otherwise abandon every probe still
        // sitting in the channel and leave those peers `Disabled` even
        // if the plugin is installed.
        let mut detect_peers = peers.clone();
        for name in detect_peers.names() {
            if let Some(peer) = detect_peers.peers.get_mut(&name) {
                peer.timeout = timeout;
            }
        }

        let queue = HttpQueryQueue::new(peers.len(), 0);
        let mut flags: Vec<(String, Arc<AtomicBool>)> = Vec::with_capacity(peers.len());
        for name in detect_peers.names() {
            let installed = Arc::new(AtomicBool::new(false));
            queue.enqueue(Box::new(DetectTransferPluginQuery {
                peer: name.clone(),
                installed: installed.clone(),
            }));
            flags.push((name, installed));
        }

        let runner = HttpQueriesRunner::new(queue, Arc::new(detect_peers), threads_count, client);
        runner.wait_complete();

        for (name, installed) in flags {
            let classification = if installed.load(Ordering::SeqCst) {
                if bidirectional.contains_key(&name) {
                    PeerClassification::Bidirectional
                } else {
                    PeerClassification::Installed
                }
            } else {
                PeerClassification::Disabled
            };
            result.insert(name, classification);
        }

        result
    }
}

/// GET `/plugins`; success means the answer is a JSON array containing the
/// string `"transfers"`. Non-2xx, transport failure, or an unparsable
/// body all leave `installed` at its default `false` — this query never
/// fails the queue, since a peer simply not running the plugin is not
/// an error.
struct DetectTransferPluginQuery {
    peer: String,
    installed: Arc<AtomicBool>,
}

impl crate::http::query::HttpQuery for DetectTransferPluginQuery {
    fn method(&self) -> crate::http::query::Method {
        crate::http::query::Method::Get
    }

    fn peer(&self) -> &str {
        &self.peer
    }

    fn uri(&self) -> String {
        URI_PLUGINS.to_string()
    }

    fn headers(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn read_body(&self) -> Option<Vec<u8>> {
        None
    }

    fn handle_answer(&mut self, _status: u16, _headers: &[(String, String)], body: &[u8]) -> Result<()> {
        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
            if let Some(array) = value.as_array() {
                let found = array.iter().any(|v| v.as_str() == Some(PLUGIN_NAME));
                self.installed.store(found, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    fn best_effort(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_peer_lookup_fails() {
        let dir = PeerDirectory::new();
        assert!(matches!(dir.get("ghost"), Err(TransferError::Unknown(_))));
    }

    #[test]
    fn insert_and_lookup_round_trips() {
        let mut dir = PeerDirectory::new();
        dir.insert(Peer {
            name: "remote".into(),
            base_url: "http://example.test".into(),
            username: None,
            password: None,
            timeout: Duration::from_secs(10),
        });
        assert_eq!(dir.get("remote").unwrap().base_url, "http://example.test");
    }

    #[test]
    fn empty_directory_detects_nothing() {
        let dir = PeerDirectory::new();
        let client = reqwest::blocking::Client::new();
        let result = PeerDetector::detect(&dir, &HashMap::new(), 2, Duration::from_secs(2), client);
        assert!(result.is_empty());
    }
}
