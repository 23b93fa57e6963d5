//! The helm repository `index.yaml`, regenerated after chart mutations.
//!
//! The writer sits behind a trait so the chart catalog and the index
//! implementation can be constructed independently and wired afterwards.

use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::{store::StoreLayout, PortsideResult};

use super::ChartGroup;

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Publishes the chart listing to whatever format a consumer needs.
#[async_trait]
pub trait RepoIndexWriter: Debug + Send + Sync {
    /// Publishes the given chart listing.
    async fn publish(&self, groups: &[ChartGroup]) -> PortsideResult<()>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Writes a helm `index.yaml` at the storage root.
#[derive(Debug, Clone)]
pub struct YamlRepoIndex {
    layout: StoreLayout,
}

/// The serialised form of the repository index.
#[derive(Debug, Serialize, Deserialize)]
struct HelmRepoIndex {
    #[serde(rename = "apiVersion")]
    api_version: String,
    generated: DateTime<Utc>,
    entries: BTreeMap<String, Vec<HelmRepoIndexEntry>>,
}

/// One chart version inside the repository index.
#[derive(Debug, Serialize, Deserialize)]
struct HelmRepoIndexEntry {
    name: String,
    version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(rename = "apiVersion", skip_serializing_if = "Option::is_none")]
    api_version: Option<String>,
    #[serde(rename = "appVersion", skip_serializing_if = "Option::is_none")]
    app_version: Option<String>,
    created: DateTime<Utc>,
    urls: Vec<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl YamlRepoIndex {
    /// Creates an index writer over the given layout.
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl RepoIndexWriter for YamlRepoIndex {
    async fn publish(&self, groups: &[ChartGroup]) -> PortsideResult<()> {
        let now = Utc::now();

        let entries = groups
            .iter()
            .map(|group| {
                let versions = group
                    .get_versions()
                    .iter()
                    .map(|record| HelmRepoIndexEntry {
                        name: record.get_name().clone(),
                        version: record.get_version().clone(),
                        description: record.get_description().clone(),
                        api_version: record.get_api_version().clone(),
                        app_version: record.get_app_version().clone(),
                        created: now,
                        urls: vec![format!(
                            "charts/{}-{}.tgz",
                            record.get_name(),
                            record.get_version()
                        )],
                    })
                    .collect();
                (group.get_name().clone(), versions)
            })
            .collect();

        let index = HelmRepoIndex {
            api_version: "v1".to_string(),
            generated: now,
            entries,
        };

        fs::write(
            self.layout.helm_index_path(),
            serde_yaml::to_string(&index)?,
        )
        .await?;

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helm::ChartRecord;

    #[tokio::test]
    async fn test_repo_index_publishes_yaml() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let layout = StoreLayout::create(dir.path()).await?;
        let writer = YamlRepoIndex::new(layout);

        let record: ChartRecord = serde_yaml::from_str(
            "name: web\nversion: 1.0.0\ndescription: a chart\napiVersion: v2\n",
        )?;
        let groups = vec![ChartGroup {
            name: "web".to_string(),
            versions: vec![record],
        }];

        writer.publish(&groups).await?;

        let written = tokio::fs::read_to_string(dir.path().join("index.yaml")).await?;
        assert!(written.contains("apiVersion: v1"));
        assert!(written.contains("web-1.0.0.tgz"));
        Ok(())
    }
}
