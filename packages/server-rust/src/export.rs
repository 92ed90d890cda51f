//! Topic manifest exporter.
//!
//! Writes `<output_dir>/spec/topics.json` describing the service, its brokers
//! and every registered topic with its payload type.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use topicflow_core::{
    ExportRequest, KafkaBrokers, PayloadType, ServiceInfo, SpecExportError, SpecExporter,
};

const SPEC_DIR: &str = "spec";
const MANIFEST_FILE: &str = "topics.json";

#[derive(Serialize)]
struct Manifest<'a> {
    info: &'a ServiceInfo,
    servers: &'a KafkaBrokers,
    subscribe: &'a BTreeMap<String, PayloadType>,
    publish: &'a BTreeMap<String, PayloadType>,
}

/// [`SpecExporter`] writing a JSON manifest of the registered topics.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestExporter;

impl ManifestExporter {
    /// Path of the manifest written for `output_dir`.
    #[must_use]
    pub fn manifest_path(output_dir: &Path) -> PathBuf {
        output_dir.join(SPEC_DIR).join(MANIFEST_FILE)
    }
}

#[async_trait]
impl SpecExporter for ManifestExporter {
    async fn export(&self, request: &ExportRequest) -> Result<(), SpecExportError> {
        let manifest = Manifest {
            info: &request.service,
            servers: &request.brokers,
            subscribe: &request.consumers,
            publish: &request.producers,
        };
        let rendered = serde_json::to_vec_pretty(&manifest)?;

        let path = Self::manifest_path(&request.output_dir);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, rendered).await?;
        info!(path = %path.display(), "wrote topic manifest");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    #[derive(serde::Serialize)]
    struct Order;

    #[derive(serde::Serialize)]
    struct Receipt;

    fn request(output_dir: PathBuf) -> ExportRequest {
        ExportRequest {
            consumers: BTreeMap::from([("orders".to_string(), PayloadType::of::<Order>())]),
            producers: BTreeMap::from([("receipts".to_string(), PayloadType::of::<Receipt>())]),
            brokers: KafkaBrokers::default(),
            service: ServiceInfo::default(),
            output_dir,
        }
    }

    #[tokio::test]
    async fn writes_manifest_under_spec_dir() {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().join("asyncapi");

        ManifestExporter.export(&request(output_dir.clone())).await.unwrap();

        let path = ManifestExporter::manifest_path(&output_dir);
        assert!(path.ends_with("asyncapi/spec/topics.json"));
        let manifest: Value = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(manifest["info"]["title"], "topicflow");
        assert_eq!(manifest["servers"]["localhost"]["port"], "9092");
        assert!(manifest["subscribe"]["orders"]
            .as_str()
            .unwrap()
            .ends_with("Order"));
        assert!(manifest["publish"]["receipts"]
            .as_str()
            .unwrap()
            .ends_with("Receipt"));
    }

    #[tokio::test]
    async fn overwrites_previous_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().to_path_buf();
        let mut req = request(output_dir.clone());
        ManifestExporter.export(&req).await.unwrap();

        req.consumers.clear();
        ManifestExporter.export(&req).await.unwrap();

        let written = std::fs::read(ManifestExporter::manifest_path(&output_dir)).unwrap();
        let manifest: Value = serde_json::from_slice(&written).unwrap();
        assert_eq!(manifest["subscribe"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn unwritable_destination_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let err = ManifestExporter.export(&request(blocker)).await.unwrap_err();
        assert!(matches!(err, SpecExportError::Io(_)));
    }
}
