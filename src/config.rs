//! Session configuration, usually loaded from YAML.
//!
//! ```yaml
//! mode: SunSpec
//! connection:
//!   slave_id: 1
//!   models:
//!     705: 40300
//!   commit:
//!     settle_delay_ms: 1000
//! ```

use std::{collections::BTreeMap, path::Path};

use fugit::MillisDurationU32;
use serde::Deserialize;

use crate::{
    commit::CommitPolicy,
    error::{Error, Result},
};

/// Adoption handshake timing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CommitConfig {
    pub settle_delay_ms: u32,
    pub max_polls: u32,
}

impl Default for CommitConfig {
    fn default() -> Self {
        let policy = CommitPolicy::default();
        Self {
            settle_delay_ms: policy.settle_delay.to_millis(),
            max_polls: policy.max_polls,
        }
    }
}

impl CommitConfig {
    pub fn policy(&self) -> CommitPolicy {
        CommitPolicy::new(MillisDurationU32::millis(self.settle_delay_ms), self.max_polls)
    }
}

/// Everything a vendor table may need to lay out its bindings. Each vendor reads only the
/// fields it cares about.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConnectionParams {
    /// Modbus unit id.
    pub slave_id: u8,
    pub timeout_ms: u32,
    /// SMA firmware version, picks the register set.
    pub firmware: Option<String>,
    /// Fronius model 123 address.
    pub base_address: Option<u16>,
    /// SunSpec model id to the address of its ID register.
    pub models: BTreeMap<u16, u16>,
    /// SunSpec `NPt`.
    pub points_per_curve: u16,
    /// SunSpec `NCrv`.
    pub curves: u8,
    /// SMA grid guard code, written at login.
    pub grid_guard_code: Option<u32>,
    /// Transport runs over TLS. Register tables are the same either way.
    pub tls: bool,
    pub commit: CommitConfig,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            slave_id: 1,
            timeout_ms: 5000,
            firmware: None,
            base_address: None,
            models: BTreeMap::new(),
            points_per_curve: 4,
            curves: 3,
            grid_guard_code: None,
            tls: false,
            commit: CommitConfig::default(),
        }
    }
}

/// Which adapter to open and how.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionConfig {
    pub mode: String,
    #[serde(default)]
    pub connection: ConnectionParams,
}

impl SessionConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_yaml_str(&yaml)
    }
}
