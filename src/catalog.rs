//! Uniform get/set entry point over every function a device supports.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::{
    adapter::DeviceAdapter,
    bitfield::{Flags, StatusFamily},
    commit::{CancelToken, CommitAttempt, CurveCommitProtocol},
    error::{Error, Result},
    function::{FunctionKind, GridSupportFunction},
    monitor::{MONITORING_FAMILIES, Monitoring, Nameplate},
};

/// Status families describing connection state.
const CONNECTION_FAMILIES: [StatusFamily; 4] = [
    StatusFamily::ConnectionState,
    StatusFamily::PvConnection,
    StatusFamily::StorageConnection,
    StatusFamily::EcpConnection,
];

pub struct FunctionCatalog<'a> {
    adapter: &'a DeviceAdapter,
    protocol: CurveCommitProtocol,
    cancel: Option<CancelToken>,
}

impl<'a> FunctionCatalog<'a> {
    pub fn new(adapter: &'a DeviceAdapter) -> Self {
        Self {
            adapter,
            protocol: CurveCommitProtocol::new(),
            cancel: None,
        }
    }

    /// Commit with `protocol` instead of the vendor defaults.
    pub fn with_protocol(mut self, protocol: CurveCommitProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Let `token` abort commits between polls.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn supported(&self) -> Vec<FunctionKind> {
        self.adapter.supported().collect()
    }

    /// Current device state of `kind`. Always read fresh.
    pub fn get(&self, kind: FunctionKind) -> Result<GridSupportFunction> {
        self.adapter.read_function(kind)
    }

    /// Apply `function`, going through the adoption handshake where the device stages writes.
    ///
    /// Returns the commit record when a handshake took place.
    pub fn set(&self, function: &GridSupportFunction) -> Result<Option<CommitAttempt>> {
        let kind = function.kind;
        let Some(adoption) = self.adapter.adoption(kind) else {
            self.adapter.write_function(function)?;
            return Ok(None);
        };

        let staged = if kind.is_curve_bearing() {
            function.curves.iter().find(|c| !c.read_only).map(|c| c.curve_index)
        } else {
            (!function.scalars.is_empty()).then_some(adoption.default_index)
        };
        let Some(curve_index) = staged else {
            // Nothing staged, e.g. only the enable flag changes.
            debug!(function = %kind, "no curve to adopt");
            self.adapter.write_function(function)?;
            return Ok(None);
        };

        let attempt = self
            .protocol
            .commit(self.adapter, function, curve_index, self.cancel.as_ref())?;
        Ok(Some(attempt))
    }

    /// Disable every supported function except enter service, curve functions first.
    ///
    /// Each function is read back afterwards. Fails with [`Error::DeactivationIncomplete`]
    /// naming the functions that still read as enabled.
    pub fn deactivate_all(&self) -> Result<()> {
        let (curves, scalars): (Vec<_>, Vec<_>) = self
            .adapter
            .supported()
            .filter(|kind| *kind != FunctionKind::EnterService)
            .partition(FunctionKind::is_curve_bearing);
        let order: Vec<_> = curves.into_iter().chain(scalars).collect();

        for kind in &order {
            self.adapter.write_function(&GridSupportFunction::new(*kind))?;
        }

        let mut remaining = Vec::new();
        for kind in order {
            if self.adapter.read_function(kind)?.enabled {
                remaining.push(kind);
            }
        }
        if !remaining.is_empty() {
            warn!(?remaining, "functions still enabled");
            return Err(Error::DeactivationIncomplete { remaining });
        }
        info!(mode = self.adapter.mode(), "all functions deactivated");
        Ok(())
    }

    /// Whether the device is permitted to enter service.
    pub fn conn(&self) -> Result<bool> {
        Ok(self.adapter.read_function(FunctionKind::EnterService)?.enabled)
    }

    /// Grant or revoke permission to enter service. Other enter service settings are left alone.
    pub fn set_conn(&self, permitted: bool) -> Result<()> {
        self.adapter
            .write_function(&GridSupportFunction::new(FunctionKind::EnterService).enabled(permitted))?;
        info!(mode = self.adapter.mode(), permitted, "permit service written");
        Ok(())
    }

    /// Stop the device energizing by revoking its permission to enter service.
    pub fn cease_to_energize(&self) -> Result<()> {
        self.set_conn(false)?;
        info!(mode = self.adapter.mode(), "ceased to energize");
        Ok(())
    }

    /// Nameplate ratings the device reports.
    pub fn nameplate(&self) -> Result<Nameplate> {
        self.adapter.read_nameplate()
    }

    /// Present measurements plus the operating state, connection state and alarm flags.
    pub fn monitoring(&self) -> Result<Monitoring> {
        let map = self.adapter.register_map();
        let status = MONITORING_FAMILIES
            .into_iter()
            .filter(|family| map.status(*family).is_some())
            .map(|family| Ok((family, self.adapter.read_flags(family)?)))
            .collect::<Result<_>>()?;
        Ok(Monitoring {
            measurements: self.adapter.read_measurements()?,
            status,
        })
    }

    /// Which control functions the device reports active.
    pub fn controls_status(&self) -> Result<Flags> {
        self.adapter.read_flags(StatusFamily::ActiveControls)
    }

    /// Every connection status family the device reports.
    pub fn connection_status(&self) -> Result<BTreeMap<StatusFamily, Flags>> {
        let map = self.adapter.register_map();
        CONNECTION_FAMILIES
            .into_iter()
            .filter(|family| map.status(*family).is_some())
            .map(|family| Ok((family, self.adapter.read_flags(family)?)))
            .collect()
    }
}
