//! Reading chart metadata out of packaged `.tgz` archives.

use std::io::Read;

use flate2::read::GzDecoder;
use getset::Getters;
use serde::{Deserialize, Serialize};
use tar::Archive;

use crate::{PortsideError, PortsideResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The metadata of one chart version, as declared in its `Chart.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct ChartRecord {
    /// The chart name.
    pub(super) name: String,

    /// The chart version.
    pub(super) version: String,

    /// The chart description.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub(super) description: Option<String>,

    /// The chart API version (`v1` or `v2`).
    #[serde(rename = "apiVersion", skip_serializing_if = "Option::is_none", default)]
    pub(super) api_version: Option<String>,

    /// The version of the application the chart deploys.
    #[serde(rename = "appVersion", skip_serializing_if = "Option::is_none", default)]
    pub(super) app_version: Option<String>,

    /// The chart type (`application` or `library`).
    #[serde(rename = "type", skip_serializing_if = "Option::is_none", default)]
    pub(super) chart_type: Option<String>,

    /// Charts this chart depends on.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub(super) dependencies: Vec<ChartDependency>,
}

/// One entry of a chart's dependency list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct ChartDependency {
    /// The dependency's chart name.
    pub(super) name: String,

    /// The dependency's version constraint.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub(super) version: Option<String>,

    /// The repository the dependency comes from.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub(super) repository: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Extracts and parses `Chart.yaml` from a packaged chart archive.
pub fn extract_chart_record(tgz: &[u8]) -> PortsideResult<ChartRecord> {
    let yaml = extract_archive_file(tgz, "Chart.yaml")?.ok_or_else(|| {
        PortsideError::ChartArchive("archive contains no Chart.yaml".to_string())
    })?;
    Ok(serde_yaml::from_str(&yaml)?)
}

/// Extracts `values.yaml` from a packaged chart archive, if present.
pub fn extract_chart_values(tgz: &[u8]) -> PortsideResult<Option<String>> {
    extract_archive_file(tgz, "values.yaml")
}

/// Finds `<chart-dir>/<filename>` at the top level of a gzipped tarball and
/// returns its contents.
fn extract_archive_file(tgz: &[u8], filename: &str) -> PortsideResult<Option<String>> {
    let mut archive = Archive::new(GzDecoder::new(tgz));

    for entry in archive
        .entries()
        .map_err(|e| PortsideError::ChartArchive(e.to_string()))?
    {
        let mut entry = entry.map_err(|e| PortsideError::ChartArchive(e.to_string()))?;

        // Chart archives nest everything one directory deep: <name>/<file>
        let matched = {
            let path = entry
                .path()
                .map_err(|e| PortsideError::ChartArchive(e.to_string()))?;
            let mut components = path.components();
            components.next().is_some() && components.as_path().to_string_lossy() == filename
        };

        if matched {
            let mut contents = String::new();
            entry
                .read_to_string(&mut contents)
                .map_err(|e| PortsideError::ChartArchive(e.to_string()))?;
            return Ok(Some(contents));
        }
    }

    Ok(None)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
