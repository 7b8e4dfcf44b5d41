//! Static table of device modes, looked up by name.

use tracing::info;

use crate::{
    adapter::{DeviceAdapter, fronius, hil, sma, solaredge, sunspec},
    config::{ConnectionParams, SessionConfig},
    error::{Error, Result},
    register::RegisterMap,
    transport::Transport,
};

/// Builds a vendor's binding table from the connection parameters.
pub type AdapterFactory = fn(&ConnectionParams) -> Result<RegisterMap>;

#[derive(Debug, Clone, Copy)]
pub struct ModeEntry {
    pub mode: &'static str,
    pub factory: AdapterFactory,
}

static REGISTRY: [ModeEntry; 6] = [
    ModeEntry {
        mode: "SunSpec",
        factory: sunspec::register_map,
    },
    // TLS only changes the transport.
    ModeEntry {
        mode: "SunSpec TLS",
        factory: sunspec::register_map,
    },
    ModeEntry {
        mode: "Fronius",
        factory: fronius::register_map,
    },
    ModeEntry {
        mode: "SMA",
        factory: sma::register_map,
    },
    ModeEntry {
        mode: "SolarEdge",
        factory: solaredge::register_map,
    },
    ModeEntry {
        mode: "HIL",
        factory: hil::register_map,
    },
];

pub fn lookup(mode: &str) -> Result<&'static ModeEntry> {
    REGISTRY
        .iter()
        .find(|entry| entry.mode == mode)
        .ok_or_else(|| Error::UnknownMode(mode.to_string()))
}

/// Every registered mode name.
pub fn modes() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|entry| entry.mode)
}

/// Build the adapter for `mode` on top of `transport` and log in.
pub fn open(mode: &str, params: &ConnectionParams, transport: Box<dyn Transport + Send>) -> Result<DeviceAdapter> {
    let entry = lookup(mode)?;
    let map = (entry.factory)(params)?;
    let adapter = DeviceAdapter::new(entry.mode, map, transport);
    adapter.login()?;
    info!(mode = entry.mode, functions = adapter.supported().count(), "adapter opened");
    Ok(adapter)
}

/// [`open`] with the mode and parameters of a loaded session.
pub fn open_session(config: &SessionConfig, transport: Box<dyn Transport + Send>) -> Result<DeviceAdapter> {
    open(&config.mode, &config.connection, transport)
}
