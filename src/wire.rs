/*!
 * Wire envelope DTOs (§6): the JSON bodies exchanged over the transfer
 * protocol's HTTP surface. Every structured payload is a JSON object
 * whose keys are listed here; `InstanceInfo` and `TransferBucket`
 * already carry their own wire-key renames (§3).
 */

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::bucket::TransferBucket;
use crate::config::BucketCompression;
use crate::instance::InstanceInfo;

/// Body of `POST /transfers/lookup`: a DICOM resource set (Patients,
/// Studies, Series, Instances — any subset, all optional since a lookup
/// can target any level of the hierarchy).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceSet {
    #[serde(default, rename = "Patients")]
    pub patients: Vec<String>,
    #[serde(default, rename = "Studies")]
    pub studies: Vec<String>,
    #[serde(default, rename = "Series")]
    pub series: Vec<String>,
    #[serde(default, rename = "Instances")]
    pub instances: Vec<String>,
}

/// Reply to `/transfers/lookup`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupResponse {
    #[serde(rename = "Instances")]
    pub instances: Vec<InstanceInfo>,
    #[serde(rename = "Originator")]
    pub originator: String,
    #[serde(rename = "CountInstances")]
    pub count_instances: usize,
    #[serde(rename = "TotalSize")]
    pub total_size: u64,
    #[serde(rename = "TotalSizeMB")]
    pub total_size_mb: f64,
}

impl LookupResponse {
    pub fn new(instances: Vec<InstanceInfo>, originator: impl Into<String>) -> Self {
        let total_size: u64 = instances.iter().map(|i| i.size).sum();
        Self {
            count_instances: instances.len(),
            total_size,
            total_size_mb: crate::toolbox::convert_to_megabytes(total_size),
            originator: originator.into(),
            instances,
        }
    }
}

/// Body of `POST /transfers/push`: the packer's output plus the
/// instance index, so the receiver can recreate a matching `DownloadArea`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTransactionRequest {
    #[serde(rename = "Instances")]
    pub instances: Vec<InstanceInfo>,
    #[serde(rename = "Buckets")]
    pub buckets: Vec<TransferBucket>,
    #[serde(rename = "Compression")]
    pub compression: BucketCompression,
}

/// Reply to both `/transfers/push` (create) and `/transfers/pull`
/// (schedule): the new transaction/job id and the path prefix for
/// follow-up requests (`<Path>/<i>`, `<Path>/commit`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedResponse {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Path")]
    pub path: String,
}

/// Body of `POST /transfers/pull`: which configured peer to pull the
/// given resources from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulePullRequest {
    #[serde(rename = "Peer")]
    pub peer: String,
    #[serde(flatten)]
    pub resources: ResourceSet,
}

/// Reply to `GET /transfers/peers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerStatus {
    pub disabled: bool,
    pub installed: bool,
    pub bidirectional: bool,
}

pub fn peer_statuses(
    classifications: &HashMap<String, crate::peers::PeerClassification>,
) -> HashMap<String, PeerStatus> {
    use crate::peers::PeerClassification;
    classifications
        .iter()
        .map(|(name, classification)| {
            let status = match classification {
                PeerClassification::Disabled => PeerStatus {
                    disabled: true,
                    installed: false,
                    bidirectional: false,
                },
                PeerClassification::Installed => PeerStatus {
                    disabled: false,
                    installed: true,
                    bidirectional: false,
                },
                PeerClassification::Bidirectional => PeerStatus {
                    disabled: false,
                    installed: true,
                    bidirectional: true,
                },
            };
            (name.clone(), status)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_response_computes_totals() {
        let instances = vec![
            InstanceInfo::new("A", 10, "a"),
            InstanceInfo::new("B", 20, "b"),
        ];
        let response = LookupResponse::new(instances, "origin-uuid");
        assert_eq!(response.count_instances, 2);
        assert_eq!(response.total_size, 30);
    }

    #[test]
    fn create_transaction_request_serializes_wire_keys() {
        let request = CreateTransactionRequest {
            instances: vec![InstanceInfo::new("A", 1, "a")],
            buckets: Vec::new(),
            compression: BucketCompression::Gzip,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"Instances\""));
        assert!(json.contains("\"Buckets\""));
        assert!(json.contains("\"Compression\":\"gzip\""));
    }

    #[test]
    fn schedule_pull_request_flattens_resources_alongside_peer() {
        let request = SchedulePullRequest {
            peer: "origin".into(),
            resources: ResourceSet {
                instances: vec!["A".into()],
                ..Default::default()
            },
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"Peer\":\"origin\""));
        assert!(json.contains("\"Instances\":[\"A\"]"));
    }

    #[test]
    fn peer_statuses_maps_classification_to_tristate() {
        use crate::peers::PeerClassification;
        let mut classifications = HashMap::new();
        classifications.insert("a".to_string(), PeerClassification::Bidirectional);
        classifications.insert("b".to_string(), PeerClassification::Disabled);
        let statuses = peer_statuses(&classifications);
        assert!(statuses["a"].bidirectional);
        assert!(statuses["b"].disabled);
    }
}
