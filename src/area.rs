/*!
 * DownloadArea: per-job/transaction scratch region (§4.4).
 *
 * Every expected instance gets a temporary file presized to its length.
 * Bucket payloads (optionally gzipped) are decoded and scattered into
 * the owning instances' files at their declared offsets. A small pool
 * of commit workers then reads each file back, recomputes its MD5, and
 * either hands the bytes to the host (`Commit`) or just reports the
 * comparison (`CheckMD5`).
 */

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use crate::bucket::TransferBucket;
use crate::config::BucketCompression;
use crate::error::{Result, TransferError};
use crate::host::Host;
use crate::instance::InstanceInfo;
use crate::toolbox::{gzip_decompress, md5_hex};

/// One instance's scratch slot: where to find it and what it should add
/// up to once fully written.
struct ScratchInstance {
    info: InstanceInfo,
    path: PathBuf,
}

struct AreaState {
    instances: HashMap<String, ScratchInstance>,
}

pub struct DownloadArea {
    _dir: TempDir,
    state: Mutex<AreaState>,
}

impl DownloadArea {
    /// `Setup`: presize a scratch file for every expected instance. A
    /// zero-length instance still gets an (empty) file.
    pub fn setup(instances: &[InstanceInfo]) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("transfer-area-")
            .tempdir()?;

        let mut map = HashMap::with_capacity(instances.len());
        for info in instances {
            let path = dir.path().join(&info.id);
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&path)?;
            if info.size > 0 {
                // Holes are fine: one byte at the final offset presizes
                // the file without materializing the middle.
                file.set_len(info.size)?;
            }
            map.insert(
                info.id.clone(),
                ScratchInstance {
                    info: info.clone(),
                    path,
                },
            );
        }

        Ok(Self {
            _dir: dir,
            state: Mutex::new(AreaState { instances: map }),
        })
    }

    pub fn list_instances(&self) -> Vec<InstanceInfo> {
        self.state
            .lock()
            .unwrap()
            .instances
            .values()
            .map(|s| s.info.clone())
            .collect()
    }

    pub fn total_size(&self) -> u64 {
        self.state
            .lock()
            .unwrap()
            .instances
            .values()
            .map(|s| s.info.size)
            .sum()
    }

    /// `WriteBucket`: decompress if needed, validate the decompressed
    /// length against the bucket's declared total, then scatter each
    /// chunk into its owning instance's file. Writes to distinct
    /// instances are not serialized against each other.
    pub fn write_bucket(
        &self,
        bucket: &TransferBucket,
        payload: &[u8],
        compression: BucketCompression,
    ) -> Result<()> {
        let decoded;
        let bytes: &[u8] = match compression {
            BucketCompression::None => payload,
            BucketCompression::Gzip => {
                decoded = gzip_decompress(payload)?;
                &decoded
            }
        };

        let expected = bucket.total_size();
        if bytes.len() as u64 != expected {
            return Err(TransferError::Protocol(format!(
                "bucket payload decodes to {} bytes, expected {}",
                bytes.len(),
                expected
            )));
        }

        let mut cursor: usize = 0;
        for chunk in &bucket.chunks {
            let size = chunk.size as usize;
            let slice = &bytes[cursor..cursor + size];
            self.write_chunk(&chunk.instance_id, chunk.offset, slice)?;
            cursor += size;
        }

        Ok(())
    }

    fn write_chunk(&self, instance_id: &str, offset: u64, data: &[u8]) -> Result<()> {
        let path = {
            let guard = self.state.lock().unwrap();
            let scratch = guard.instances.get(instance_id).ok_or_else(|| {
                TransferError::Unknown(format!("unknown instance in bucket: {}", instance_id))
            })?;
            if offset + data.len() as u64 > scratch.info.size {
                return Err(TransferError::OutOfRange(format!(
                    "chunk {}+{} exceeds instance {} of size {}",
                    offset,
                    data.len(),
                    instance_id,
                    scratch.info.size
                )));
            }
            scratch.path.clone()
        };

        // A fresh handle per write: the OS serializes appends within one
        // handle, but nothing here serializes across distinct instances.
        let mut file = OpenOptions::new().write(true).open(&path)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    /// `WriteInstance`: whole-instance convenience path. Verifies size
    /// and MD5 against the expected `InstanceInfo` before writing.
    pub fn write_instance(&self, id: &str, bytes: &[u8]) -> Result<()> {
        let (expected_size, expected_md5, path) = {
            let guard = self.state.lock().unwrap();
            let scratch = guard
                .instances
                .get(id)
                .ok_or_else(|| TransferError::Unknown(format!("unknown instance: {}", id)))?;
            (scratch.info.size, scratch.info.md5.clone(), scratch.path.clone())
        };

        if bytes.len() as u64 != expected_size {
            return Err(TransferError::Corrupted(format!(
                "instance {} size mismatch: got {}, expected {}",
                id,
                bytes.len(),
                expected_size
            )));
        }
        let actual_md5 = md5_hex(bytes);
        if actual_md5 != expected_md5 {
            return Err(TransferError::Corrupted(format!(
                "instance {} MD5 mismatch: got {}, expected {}",
                id, actual_md5, expected_md5
            )));
        }

        let mut file = OpenOptions::new().write(true).truncate(true).open(&path)?;
        file.write_all(bytes)?;
        Ok(())
    }

    /// `CheckMD5`: runs the commit pipeline in simulate mode — every
    /// scratch file is read back and hashed, but nothing is imported and
    /// the area is left intact, so the check is repeatable and a later
    /// `Commit` still finds every instance.
    pub fn check_md5(&self) -> Result<()> {
        self.run_commit_pipeline(None, 1, false)
    }

    /// `Commit`: on MD5 match, hand each instance's bytes to the host's
    /// `ImportInstance`. On any mismatch the whole area fails with
    /// `Corrupted`; instances already imported stay imported (§8.7:
    /// at-most-one import, not all-or-nothing).
    pub fn commit(&self, host: &Arc<dyn Host>, worker_count: usize) -> Result<()> {
        self.run_commit_pipeline(Some(host.clone()), worker_count.max(1), true)
    }

    fn run_commit_pipeline(&self, host: Option<Arc<dyn Host>>, worker_count: usize, drain: bool) -> Result<()> {
        let entries: Vec<ScratchInstance> = if drain {
            let mut guard = self.state.lock().unwrap();
            guard.instances.drain().map(|(_, v)| v).collect()
        } else {
            let guard = self.state.lock().unwrap();
            guard
                .instances
                .values()
                .map(|s| ScratchInstance {
                    info: s.info.clone(),
                    path: s.path.clone(),
                })
                .collect()
        };

        let (sender, receiver) = crossbeam_channel::unbounded::<ScratchInstance>();
        for entry in entries {
            sender.send(entry).expect("receiver outlives senders");
        }
        // Dropping the sender closes the channel once drained: workers
        // observe this as `recv()` returning `Err`, replacing the
        // null-sentinel idiom of the original implementation.
        drop(sender);

        let failed = Arc::new(AtomicBool::new(false));
        let first_error: Arc<Mutex<Option<TransferError>>> = Arc::new(Mutex::new(None));
        let receiver = Arc::new(receiver);

        std::thread::scope(|scope| {
            for _ in 0..worker_count {
                let receiver = receiver.clone();
                let failed = failed.clone();
                let first_error = first_error.clone();
                let host = host.clone();
                scope.spawn(move || {
                    loop {
                        // Stop pulling new work once the area has failed;
                        // an item already in flight is allowed to finish,
                        // which this check-before-recv naturally achieves.
                        if failed.load(Ordering::SeqCst) {
                            break;
                        }
                        let entry = match receiver.recv() {
                            Ok(entry) => entry,
                            Err(_) => break,
                        };
                        if let Err(e) = commit_one(&entry, host.as_ref()) {
                            failed.store(true, Ordering::SeqCst);
                            let mut guard = first_error.lock().unwrap();
                            if guard.is_none() {
                                *guard = Some(e);
                            }
                        }
                    }
                });
            }
        });

        if failed.load(Ordering::SeqCst) {
            let err = first_error
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| TransferError::Internal("commit failed with no error recorded".into()));
            return Err(err);
        }

        Ok(())
    }

    /// `Clear`: release the area's scratch files. Also runs implicitly
    /// when the area is dropped.
    pub fn clear(&self) {
        let mut guard = self.state.lock().unwrap();
        guard.instances.clear();
    }
}

fn commit_one(entry: &ScratchInstance, host: Option<&Arc<dyn Host>>) -> Result<()> {
    let mut file = OpenOptions::new().read(true).open(&entry.path)?;
    let mut bytes = Vec::with_capacity(entry.info.size as usize);
    file.read_to_end(&mut bytes)?;

    let actual_md5 = md5_hex(&bytes);
    if actual_md5 != entry.info.md5 {
        return Err(TransferError::Corrupted(format!(
            "instance {} MD5 mismatch at commit: got {}, expected {}",
            entry.info.id, actual_md5, entry.info.md5
        )));
    }

    if let Some(host) = host {
        host.import_instance(&bytes)?;
    }

    Ok(())
}
