//! This crate programs grid-support functions into distributed energy resources (DER):
//! inverters, PV simulators and hardware-in-the-loop models.
//!
//! Functions supported:
//! * Constant power factor
//! * Volt-var, volt-watt and watt-var curves
//! * Frequency-watt droop
//! * Active and reactive power limits
//! * Voltage and frequency ride-through, momentary cessation
//! * Enter service
//!
//! Nameplate ratings and present measurements are read through the same vendor bindings,
//! see [`monitor`].
//!
//! Devices are reached through a vendor mode:
//! * `SunSpec` / `SunSpec TLS` (2018 DER models 701-712)
//! * `Fronius`
//! * `SMA`
//! * `SolarEdge`
//! * `HIL`
//!
//! Register traffic goes through a [`transport::Transport`]. [`transport::ModbusFramed`]
//! speaks Modbus RTU or TCP over any `embedded-io` byte stream, so it works over a serial
//! port, RS485 or a socket.
//!
//! ```no_run
//! # fn demo(transport: Box<dyn der_gsf::transport::Transport + Send>) -> der_gsf::error::Result<()> {
//! use der_gsf::{catalog::FunctionCatalog, config::SessionConfig, function::FunctionKind, registry};
//!
//! let config = SessionConfig::from_yaml_str("mode: Fronius")?;
//! let adapter = registry::open_session(&config, transport)?;
//! let catalog = FunctionCatalog::new(&adapter);
//! let pf = catalog.get(FunctionKind::ConstantPf)?;
//! println!("{pf:?}");
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod bitfield;
pub mod catalog;
pub mod commit;
pub mod config;
pub mod curve;
pub mod error;
pub mod function;
pub mod ieee1547;
pub mod monitor;
pub mod register;
pub mod registry;
pub mod scaling;
pub mod transport;

#[cfg(test)]
mod mock_serial;
#[cfg(test)]
mod mock_transport;
