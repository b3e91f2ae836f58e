//! Log records as emitted by the cluster's log shipper.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// The raw log line.
    #[serde(default)]
    pub log: String,
    #[serde(default)]
    pub stream: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub kubernetes: KubernetesMeta,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KubernetesMeta {
    #[serde(default)]
    pub pod_name: String,
    #[serde(default)]
    pub namespace_name: String,
    #[serde(default)]
    pub container_name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_shipper_output_and_ignores_extra_fields() {
        let raw = r#"{
            "log": "error: connection refused\n",
            "stream": "stderr",
            "docker": {"container_id": "abc"},
            "kubernetes": {
                "pod_name": "api-7d9c-x2",
                "namespace_name": "team-x",
                "container_name": "api",
                "labels": {"app": "api"},
                "pod_ip": "10.1.0.4"
            },
            "timestamp": "2024-05-01T12:00:00Z"
        }"#;
        let record: LogRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.kubernetes.pod_name, "api-7d9c-x2");
        assert_eq!(record.kubernetes.labels["app"], "api");
        assert_eq!(record.stream, "stderr");
    }
}
