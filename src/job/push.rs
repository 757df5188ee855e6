/*!
 * Push Job (§4.7): `CreateTransaction -> PushBuckets -> Finalize -> Done`,
 * with a terminal `Failed` reachable from any state. `Finalize` commits on
 * success or discards on failure; both use the configured peer-commit
 * timeout rather than the regular per-bucket one (§4.7, grounded in the
 * original `PushJob.cpp` reusing `commitTimeout_` for both).
 */

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::cache::InstanceCache;
use crate::config::{BucketCompression, TransferConfig};
use crate::error::{Result, TransferError};
use crate::host::Host;
use crate::http::query::{HttpQuery, Method};
use crate::http::queue::{HttpQueryQueue, QueueStatus};
use crate::http::runner::HttpQueriesRunner;
use crate::instance::InstanceInfo;
use crate::peers::{Peer, PeerDirectory};
use crate::scheduler::TransferScheduler;
use crate::toolbox::{HEADER_SENDER_TRANSFER_ID, URI_PUSH};
use crate::wire::{CreateTransactionRequest, CreatedResponse};

use super::{bucket_phase_progress, JobProgress};

#[derive(Debug)]
enum Phase {
    CreateTransaction,
    PushBuckets,
    Finalize { succeeded: bool },
    Done,
    Failed(String),
}

pub struct PushJob {
    pub id: Uuid,
    peer: Peer,
    instances: Vec<InstanceInfo>,
    compression: BucketCompression,
    config: TransferConfig,
    client: reqwest::blocking::Client,
    host: Arc<dyn Host>,
    cache: InstanceCache,
    phase: Phase,
    remote_id: Option<String>,
    remote_path: Option<String>,
    runner: Option<HttpQueriesRunner>,
    bytes_transferred: u64,
}

impl PushJob {
    pub fn new(
        peer: Peer,
        instances: Vec<InstanceInfo>,
        compression: BucketCompression,
        config: TransferConfig,
        client: reqwest::blocking::Client,
        host: Arc<dyn Host>,
        cache: InstanceCache,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            instances,
            compression,
            config,
            client,
            host,
            cache,
            phase: Phase::CreateTransaction,
            remote_id: None,
            remote_path: None,
            runner: None,
            bytes_transferred: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, Phase::Done | Phase::Failed(_))
    }

    /// Bytes pushed to the remote peer, for stats/reporting. Stable once
    /// the job reaches `Finalize` or later.
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    pub fn progress(&self) -> f64 {
        match (&self.phase, &self.runner) {
            (Phase::PushBuckets, Some(runner)) => {
                bucket_phase_progress(runner.queue().completed(), runner.queue().scheduled())
            }
            (Phase::CreateTransaction, _) => 0.0,
            (Phase::Done, _) => 1.0,
            _ => 0.0,
        }
    }

    pub fn run(&mut self) -> Result<()> {
        loop {
            if self.step()? == JobProgress::Terminal {
                break;
            }
        }
        match &self.phase {
            Phase::Done => Ok(()),
            Phase::Failed(msg) => Err(TransferError::Internal(msg.clone())),
            _ => unreachable!("run() only stops on a terminal phase"),
        }
    }

    pub fn step(&mut self) -> Result<JobProgress> {
        match &self.phase {
            Phase::CreateTransaction => self.step_create_transaction(),
            Phase::PushBuckets => self.step_push_buckets(),
            Phase::Finalize { succeeded } => {
                let succeeded = *succeeded;
                self.step_finalize(succeeded)
            }
            Phase::Done | Phase::Failed(_) => Ok(JobProgress::Terminal),
        }
    }

    fn step_create_transaction(&mut self) -> Result<JobProgress> {
        let scheduler = match TransferScheduler::new(self.config.bucket_size_bytes(), None) {
            Ok(s) => s,
            Err(e) => {
                self.phase = Phase::Failed(e.to_string());
                return Ok(JobProgress::Terminal);
            }
        };
        let packed = scheduler.pack(&self.instances);

        let request = CreateTransactionRequest {
            instances: self.instances.clone(),
            buckets: packed.buckets.clone(),
            compression: self.compression,
        };

        let url = format!("{}{}", self.peer.base_url, URI_PUSH);
        let result = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(self.config.peer_commit_timeout_secs))
            .header(HEADER_SENDER_TRANSFER_ID, self.id.to_string())
            .json(&request)
            .send()
            .map_err(TransferError::from)
            .and_then(|response| {
                if !response.status().is_success() {
                    return Err(TransferError::Transport(format!(
                        "create transaction answered {}",
                        response.status()
                    )));
                }
                response
                    .json::<CreatedResponse>()
                    .map_err(|e| TransferError::Protocol(format!("malformed create-transaction response: {}", e)))
            });

        match result {
            Ok(created) => {
                self.remote_id = Some(created.id);
                self.remote_path = Some(created.path);
                self.start_push_buckets(packed.buckets)?;
                Ok(JobProgress::Continue)
            }
            Err(e) => {
                self.phase = Phase::Failed(e.to_string());
                Ok(JobProgress::Terminal)
            }
        }
    }

    fn start_push_buckets(&mut self, buckets: Vec<crate::bucket::TransferBucket>) -> Result<()> {
        let path = self.remote_path.clone().expect("path set by CreateTransaction");
        let queue = HttpQueryQueue::new(buckets.len().max(1), self.config.max_http_retries);

        let host = self.host.clone();
        let loader = move |id: &str| host.load_instance(id);

        for (index, bucket) in buckets.into_iter().enumerate() {
            let payload = self.cache.assemble_bucket(&bucket, &loader, self.compression)?;
            queue.enqueue(Box::new(PushBucketQuery {
                peer: self.peer.name.clone(),
                sender_transfer_id: self.id.to_string(),
                path: path.clone(),
                index,
                payload,
            }));
        }

        let mut directory = PeerDirectory::new();
        directory.insert(self.peer.clone());

        self.runner = Some(HttpQueriesRunner::new(
            queue,
            Arc::new(directory),
            self.config.threads,
            self.client.clone(),
        ));
        self.phase = Phase::PushBuckets;
        Ok(())
    }

    fn step_push_buckets(&mut self) -> Result<JobProgress> {
        let status = self
            .runner
            .as_ref()
            .expect("runner set by start_push_buckets")
            .queue()
            .status();

        match status {
            QueueStatus::Running => {
                std::thread::sleep(super::QUEUE_POLL_INTERVAL);
                Ok(JobProgress::Continue)
            }
            QueueStatus::Success => {
                let runner = self.runner.take().expect("checked above");
                self.bytes_transferred = runner.queue().uploaded_bytes();
                runner.wait_complete();
                self.phase = Phase::Finalize { succeeded: true };
                Ok(JobProgress::Continue)
            }
            QueueStatus::Failure => {
                let runner = self.runner.take().expect("checked above");
                self.bytes_transferred = runner.queue().uploaded_bytes();
                runner.wait_complete();
                self.phase = Phase::Finalize { succeeded: false };
                Ok(JobProgress::Continue)
            }
        }
    }

    fn step_finalize(&mut self, succeeded: bool) -> Result<JobProgress> {
        let path = self.remote_path.clone().expect("path set by CreateTransaction");
        let url = if succeeded {
            format!("{}{}/commit", self.peer.base_url, path)
        } else {
            format!("{}{}", self.peer.base_url, path)
        };

        let request = if succeeded {
            self.client.post(&url)
        } else {
            self.client.delete(&url)
        };

        let result = request
            .timeout(Duration::from_secs(self.config.peer_commit_timeout_secs))
            .header(HEADER_SENDER_TRANSFER_ID, self.id.to_string())
            .send()
            .map_err(TransferError::from)
            .and_then(|response| {
                if !response.status().is_success() {
                    Err(TransferError::Transport(format!(
                        "finalize answered {}",
                        response.status()
                    )))
                } else {
                    Ok(())
                }
            });

        match (succeeded, result) {
            (true, Ok(())) => {
                self.phase = Phase::Done;
                Ok(JobProgress::Terminal)
            }
            (true, Err(e)) => {
                self.phase = Phase::Failed(format!("bucket push succeeded but commit failed: {}", e));
                Ok(JobProgress::Terminal)
            }
            (false, _) => {
                // The push itself already failed; whether the discard
                // round trip succeeds or not, the job is Failed either way.
                self.phase = Phase::Failed("one or more bucket pushes failed".into());
                Ok(JobProgress::Terminal)
            }
        }
    }
}

/// PUT `<path>/<index>`: one bucket's pre-assembled payload.
struct PushBucketQuery {
    peer: String,
    sender_transfer_id: String,
    path: String,
    index: usize,
    payload: Vec<u8>,
}

impl HttpQuery for PushBucketQuery {
    fn method(&self) -> Method {
        Method::Put
    }

    fn peer(&self) -> &str {
        &self.peer
    }

    fn uri(&self) -> String {
        format!("{}/{}", self.path, self.index)
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![
            (HEADER_SENDER_TRANSFER_ID.to_string(), self.sender_transfer_id.clone()),
            ("Content-Type".to_string(), "application/octet-stream".to_string()),
        ]
    }

    fn read_body(&self) -> Option<Vec<u8>> {
        Some(self.payload.clone())
    }

    fn handle_answer(&mut self, _status: u16, _headers: &[(String, String)], _body: &[u8]) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::test_support::MockHost;

    fn peer() -> Peer {
        Peer {
            name: "remote".into(),
            base_url: "http://example.test".into(),
            username: None,
            password: None,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn push_bucket_query_uri_is_path_slash_index() {
        let query = PushBucketQuery {
            peer: "remote".into(),
            sender_transfer_id: "tx-1".into(),
            path: "/transfers/push/abc".into(),
            index: 3,
            payload: Vec::new(),
        };
        assert_eq!(query.uri(), "/transfers/push/abc/3");
        assert_eq!(query.method(), Method::Put);
    }

    #[test]
    fn push_bucket_query_sets_octet_stream_content_type() {
        let query = PushBucketQuery {
            peer: "remote".into(),
            sender_transfer_id: "tx-1".into(),
            path: "/transfers/push/abc".into(),
            index: 0,
            payload: Vec::new(),
        };
        assert!(query
            .headers()
            .contains(&("Content-Type".to_string(), "application/octet-stream".to_string())));
    }

    #[test]
    fn new_job_starts_at_create_transaction_with_zero_progress() {
        let host: Arc<dyn Host> = Arc::new(MockHost::new().with_instance("A", b"0123456789"));
        let job = PushJob::new(
            peer(),
            vec![InstanceInfo::new("A", 10, "781e5e245d69b566979b86e28d23f2c7")],
            BucketCompression::None,
            TransferConfig::default(),
            reqwest::blocking::Client::new(),
            host,
            InstanceCache::new(1024 * 1024),
        );
        assert!(!job.is_terminal());
        assert_eq!(job.progress(), 0.0);
    }
}
