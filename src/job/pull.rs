/*!
 * Pull Job (§4.6): `Lookup -> PullBuckets -> Commit -> Done`, with a
 * terminal `Failed` reachable from any state.
 */

use std::sync::Arc;

use uuid::Uuid;

use crate::area::DownloadArea;
use crate::bucket::TransferBucket;
use crate::config::{BucketCompression, TransferConfig};
use crate::error::{Result, TransferError};
use crate::host::Host;
use crate::http::query::{HttpQuery, Method};
use crate::http::queue::{HttpQueryQueue, QueueStatus};
use crate::http::runner::HttpQueriesRunner;
use crate::peers::{Peer, PeerDirectory};
use crate::scheduler::TransferScheduler;
use crate::toolbox::{HEADER_SENDER_TRANSFER_ID, URI_LOOKUP};
use crate::wire::{LookupResponse, ResourceSet};

use super::{bucket_phase_progress, JobProgress};

#[derive(Debug)]
enum Phase {
    Lookup,
    PullBuckets,
    Commit,
    Done,
    Failed(String),
}

pub struct PullJob {
    pub id: Uuid,
    peer: Peer,
    resources: ResourceSet,
    config: TransferConfig,
    client: reqwest::blocking::Client,
    host: Arc<dyn Host>,
    phase: Phase,
    originator: Option<String>,
    area: Option<Arc<DownloadArea>>,
    runner: Option<HttpQueriesRunner>,
    bytes_transferred: u64,
}

impl PullJob {
    pub fn new(
        peer: Peer,
        resources: ResourceSet,
        config: TransferConfig,
        client: reqwest::blocking::Client,
        host: Arc<dyn Host>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            resources,
            config,
            client,
            host,
            phase: Phase::Lookup,
            originator: None,
            area: None,
            runner: None,
            bytes_transferred: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, Phase::Done | Phase::Failed(_))
    }

    /// Bytes pulled from the remote peer, for stats/reporting. Stable
    /// once the job reaches `Commit` or later.
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    /// `(1 + completed) / (2 + scheduled)` while pulling buckets;
    /// `0.0` before that phase starts, `1.0` once committed.
    pub fn progress(&self) -> f64 {
        match (&self.phase, &self.runner) {
            (Phase::PullBuckets, Some(runner)) => {
                bucket_phase_progress(runner.queue().completed(), runner.queue().scheduled())
            }
            (Phase::Lookup, _) => 0.0,
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
            Phase::Lookup => self.step_lookup(),
            Phase::PullBuckets => self.step_pull_buckets(),
            Phase::Commit => self.step_commit(),
            Phase::Done | Phase::Failed(_) => Ok(JobProgress::Terminal),
        }
    }

    fn step_lookup(&mut self) -> Result<JobProgress> {
        let url = format!("{}{}", self.peer.base_url, URI_LOOKUP);
        let result = self
            .client
            .post(&url)
            .timeout(self.peer.timeout)
            .header(HEADER_SENDER_TRANSFER_ID, self.id.to_string())
            .json(&self.resources)
            .send()
            .map_err(TransferError::from)
            .and_then(|response| {
                if !response.status().is_success() {
                    return Err(TransferError::Transport(format!(
                        "lookup answered {}",
                        response.status()
                    )));
                }
                response
                    .json::<LookupResponse>()
                    .map_err(|e| TransferError::Protocol(format!("malformed lookup response: {}", e)))
            });

        match result {
            Ok(response) => {
                self.originator = Some(response.originator.clone());
                self.area = Some(Arc::new(DownloadArea::setup(&response.instances)?));
                self.start_pull_buckets(response.instances)?;
                Ok(JobProgress::Continue)
            }
            Err(e) => {
                self.phase = Phase::Failed(e.to_string());
                Ok(JobProgress::Terminal)
            }
        }
    }

    fn start_pull_buckets(&mut self, instances: Vec<crate::instance::InstanceInfo>) -> Result<()> {
        let scheduler = TransferScheduler::new(self.config.bucket_size_bytes(), None)?;
        let packed = scheduler.pack(&instances);

        let queue = HttpQueryQueue::new(packed.buckets.len().max(1), self.config.max_http_retries);
        let area = self.area.clone().expect("area set by Lookup");
        for bucket in packed.buckets {
            queue.enqueue(Box::new(BucketPullQuery {
                peer: self.peer.name.clone(),
                sender_transfer_id: self.id.to_string(),
                bucket,
                compression: BucketCompression::None,
                area: area.clone(),
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
        self.phase = Phase::PullBuckets;
        Ok(())
    }

    fn step_pull_buckets(&mut self) -> Result<JobProgress> {
        let status = self
            .runner
            .as_ref()
            .expect("runner set by start_pull_buckets")
            .queue()
            .status();

        match status {
            QueueStatus::Running => {
                std::thread::sleep(super::QUEUE_POLL_INTERVAL);
                Ok(JobProgress::Continue)
            }
            QueueStatus::Success => {
                let runner = self.runner.take().expect("checked above");
                self.bytes_transferred = runner.queue().downloaded_bytes();
                runner.wait_complete();
                self.phase = Phase::Commit;
                Ok(JobProgress::Continue)
            }
            QueueStatus::Failure => {
                self.runner.take().expect("checked above").wait_complete();
                if let Some(area) = &self.area {
                    area.clear();
                }
                self.phase = Phase::Failed("one or more bucket pulls failed".into());
                Ok(JobProgress::Terminal)
            }
        }
    }

    fn step_commit(&mut self) -> Result<JobProgress> {
        let area = self.area.clone().expect("area set by Lookup");
        match area.commit(&self.host, self.config.commit_worker_threads_count) {
            Ok(()) => {
                self.phase = Phase::Done;
                Ok(JobProgress::Terminal)
            }
            Err(e) => {
                area.clear();
                self.phase = Phase::Failed(e.to_string());
                Ok(JobProgress::Terminal)
            }
        }
    }
}

/// GET `/transfers/chunks/<id1.id2…>?offset=&size=&compression=`: one
/// bucket's worth of bytes, streamed straight into the download area.
struct BucketPullQuery {
    peer: String,
    sender_transfer_id: String,
    bucket: TransferBucket,
    compression: BucketCompression,
    area: Arc<DownloadArea>,
}

impl HttpQuery for BucketPullQuery {
    fn method(&self) -> Method {
        Method::Get
    }

    fn peer(&self) -> &str {
        &self.peer
    }

    fn uri(&self) -> String {
        let ids: Vec<&str> = self.bucket.chunks.iter().map(|c| c.instance_id.as_str()).collect();
        let offset = self.bucket.chunks.first().map(|c| c.offset).unwrap_or(0);
        format!(
            "/transfers/chunks/{}?offset={}&size={}&compression={}",
            ids.join("."),
            offset,
            self.bucket.total_size(),
            self.compression.as_str(),
        )
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![(HEADER_SENDER_TRANSFER_ID.to_string(), self.sender_transfer_id.clone())]
    }

    fn read_body(&self) -> Option<Vec<u8>> {
        None
    }

    fn handle_answer(&mut self, _status: u16, _headers: &[(String, String)], body: &[u8]) -> Result<()> {
        self.area.write_bucket(&self.bucket, body, self.compression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::Chunk;
    use crate::instance::InstanceInfo;
    use crate::toolbox::md5_hex;

    #[test]
    fn bucket_pull_query_uri_encodes_ids_offset_size() {
        let area = Arc::new(DownloadArea::setup(&[InstanceInfo::new("A", 10, md5_hex(b"0123456789"))]).unwrap());
        let mut bucket = TransferBucket::new();
        bucket.push(Chunk::new("A", 2, 5));
        let query = BucketPullQuery {
            peer: "remote".into(),
            sender_transfer_id: "tx-1".into(),
            bucket,
            compression: BucketCompression::Gzip,
            area,
        };
        assert_eq!(
            query.uri(),
            "/transfers/chunks/A?offset=2&size=5&compression=gzip"
        );
    }

    #[test]
    fn new_job_starts_at_lookup_with_zero_progress() {
        let job = PullJob::new(
            Peer {
                name: "remote".into(),
                base_url: "http://example.test".into(),
                username: None,
                password: None,
                timeout: std::time::Duration::from_secs(5),
            },
            ResourceSet::default(),
            TransferConfig::default(),
            reqwest::blocking::Client::new(),
            Arc::new(crate::host::test_support::MockHost::new()),
        );
        assert!(!job.is_terminal());
        assert_eq!(job.progress(), 0.0);
    }
}
