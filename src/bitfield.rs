//! Named boolean flags packed into status and control registers.
//!
//! Each flag family is described once as a [`FlagLayout`]; decoding and encoding are the same
//! for every family.

use std::collections::BTreeMap;

use strum_macros::{Display, EnumIter};

use crate::error::{Error, Result};

/// Decoded flags, keyed by name.
pub type Flags = BTreeMap<String, bool>;

/// An ordered list of `(bit index, name)` pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagLayout {
    pub bits: &'static [(u8, &'static str)],
}

impl FlagLayout {
    pub const fn new(bits: &'static [(u8, &'static str)]) -> Self {
        Self { bits }
    }

    fn bit_of(&self, name: &str) -> Option<u8> {
        self.bits.iter().find(|(_, n)| *n == name).map(|(bit, _)| *bit)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.bits.iter().map(|(_, name)| *name)
    }
}

/// Unpack every flag of `layout` from `raw`. Bits not in the layout are ignored.
pub fn decode(raw: u32, layout: &FlagLayout) -> Flags {
    layout
        .bits
        .iter()
        .map(|(bit, name)| (name.to_string(), raw & (1 << bit) != 0))
        .collect()
}

/// Pack `flags` into an integer. Names missing from `flags` are encoded as cleared.
pub fn encode(flags: &Flags, layout: &FlagLayout) -> Result<u32> {
    flags.iter().try_fold(0u32, |raw, (name, set)| {
        let bit = layout
            .bit_of(name)
            .ok_or_else(|| Error::UnknownFlagName(name.clone()))?;
        Ok(if *set { raw | (1 << bit) } else { raw })
    })
}

/// The flag families a device may report.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter)]
pub enum StatusFamily {
    /// Control modes the device supports.
    ModesSupported,
    /// Control modes currently active.
    ActiveControls,
    PvConnection,
    StorageConnection,
    EcpConnection,
    OperationalState,
    ConnectionState,
    Alarms,
}

/// Grid-support control modes, as in SunSpec `StActCtl` and `ModesSupported`.
pub const CONTROL_MODES: FlagLayout = FlagLayout::new(&[
    (0, "fixed_w"),
    (1, "fixed_var"),
    (2, "fixed_pf"),
    (3, "volt_var"),
    (4, "freq_watt_param"),
    (5, "freq_watt_curve"),
    (6, "dyn_reactive_power"),
    (7, "lvrt"),
    (8, "hvrt"),
    (9, "watt_pf"),
    (10, "volt_watt"),
    (12, "scheduled"),
    (13, "lfrt"),
    (14, "hfrt"),
]);

/// PV and storage connection state.
pub const SOURCE_CONNECTION: FlagLayout = FlagLayout::new(&[
    (0, "connected"),
    (1, "available"),
    (2, "operating"),
    (3, "test"),
]);

/// Electrical connection point state.
pub const ECP_CONNECTION: FlagLayout = FlagLayout::new(&[(0, "connected")]);

/// IEEE 1547 operational state.
pub const OPERATIONAL_STATE: FlagLayout = FlagLayout::new(&[
    (0, "local"),
    (1, "lockout"),
    (2, "starting"),
    (3, "stopping"),
    (4, "started"),
    (5, "stopped"),
    (6, "permission_to_start"),
    (7, "permission_to_stop"),
]);

/// IEEE 1547 connection state.
pub const CONNECTION_STATE: FlagLayout = FlagLayout::new(&[
    (0, "connected_idle"),
    (1, "connected_generating"),
    (2, "connected_charging"),
    (3, "off_available"),
    (4, "off_not_available"),
    (5, "switch_closed_status"),
    (6, "switch_closed_movement"),
]);

/// Alarm bits, as in the SunSpec DER measurement `Alrm` register.
pub const ALARMS: FlagLayout = FlagLayout::new(&[
    (0, "ground_fault"),
    (1, "dc_over_volt"),
    (2, "ac_disconnect"),
    (3, "dc_disconnect"),
    (4, "grid_disconnect"),
    (5, "cabinet_open"),
    (6, "manual_shutdown"),
    (7, "over_temp"),
    (8, "over_frequency"),
    (9, "under_frequency"),
    (10, "ac_over_volt"),
    (11, "ac_under_volt"),
    (12, "blown_string_fuse"),
    (13, "under_temp"),
    (14, "memory_loss"),
    (15, "hw_test_failure"),
]);

impl StatusFamily {
    /// The layout used for this family.
    pub const fn layout(&self) -> &'static FlagLayout {
        match self {
            Self::ModesSupported | Self::ActiveControls => &CONTROL_MODES,
            Self::PvConnection | Self::StorageConnection => &SOURCE_CONNECTION,
            Self::EcpConnection => &ECP_CONNECTION,
            Self::OperationalState => &OPERATIONAL_STATE,
            Self::ConnectionState => &CONNECTION_STATE,
            Self::Alarms => &ALARMS,
        }
    }
}
