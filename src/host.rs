/*!
 * The host interface (§1, §6): the three capabilities the core consumes
 * from the server that actually stores instances. Out of scope to
 * implement here — the host is always supplied by the embedding process —
 * but the core needs a stable seam to call through, so it is expressed as
 * a trait rather than a free-floating callback convention.
 */

use crate::error::Result;
use crate::instance::InstanceInfo;

/// What a Download Area commits into and what an Instance Cache reads
/// through on a miss. One implementation per embedding process; shared
/// as `Arc<dyn Host>` across jobs and transactions.
pub trait Host: Send + Sync {
    /// `GetInstanceInfo`: used by the serving side to answer `/transfers/lookup`.
    fn get_instance_info(&self, id: &str) -> Result<InstanceInfo>;

    /// `GetChunk`: the host reads the full instance once; the Instance
    /// Cache slices and hashes it. Returning the whole instance keeps
    /// this trait's surface minimal and lets the cache own chunk slicing.
    fn load_instance(&self, id: &str) -> Result<Vec<u8>>;

    /// `ImportInstance`: called exactly once per committed instance, from
    /// a Download Area commit worker, only after its MD5 has verified.
    fn import_instance(&self, bytes: &[u8]) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory `Host` for exercising Download Area / job logic in
    /// tests without a real Orthanc instance behind it.
    #[derive(Default)]
    pub struct MockHost {
        pub instances: HashMap<String, Vec<u8>>,
        pub imported: Mutex<Vec<Vec<u8>>>,
    }

    impl MockHost {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_instance(mut self, id: &str, bytes: &[u8]) -> Self {
            self.instances.insert(id.to_string(), bytes.to_vec());
            self
        }
    }

    impl Host for MockHost {
        fn get_instance_info(&self, id: &str) -> Result<InstanceInfo> {
            let bytes = self.instances.get(id).ok_or_else(|| {
                crate::error::TransferError::Unknown(format!("instance not found: {}", id))
            })?;
            Ok(InstanceInfo::new(
                id,
                bytes.len() as u64,
                crate::toolbox::md5_hex(bytes),
            ))
        }

        fn load_instance(&self, id: &str) -> Result<Vec<u8>> {
            self.instances.get(id).cloned().ok_or_else(|| {
                crate::error::TransferError::Unknown(format!("instance not found: {}", id))
            })
        }

        fn import_instance(&self, bytes: &[u8]) -> Result<()> {
            self.imported.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }
    }
}
