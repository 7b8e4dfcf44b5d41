//! Nameplate ratings and present operating conditions.
//!
//! Both are read-only views over the same bindings the functions use: a vendor's
//! [`RegisterMap`](crate::register::RegisterMap) lists where each rating and measurement
//! lives, and quantities it doesn't report are simply absent.

use std::collections::BTreeMap;

use strum_macros::{Display, EnumIter, IntoStaticStr};

use crate::bitfield::{Flags, StatusFamily};

/// A nameplate rating. Power in W, var and VA, voltage in V.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter, IntoStaticStr)]
pub enum Rating {
    /// Active power at unity power factor.
    WMax,
    /// Active power at the specified over-excited power factor.
    WOverExcited,
    /// The specified over-excited power factor.
    PfOverExcited,
    /// Active power at the specified under-excited power factor.
    WUnderExcited,
    /// The specified under-excited power factor.
    PfUnderExcited,
    VaMax,
    /// Maximum reactive power injected.
    VarMaxInjected,
    /// Maximum reactive power absorbed, as a magnitude.
    VarMaxAbsorbed,
    /// Maximum active power while charging.
    WChargeMax,
    /// Maximum apparent power while charging.
    VaChargeMax,
    VNom,
    VMax,
    VMin,
}

/// A present measurement at the AC terminals.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter, IntoStaticStr)]
pub enum Measurand {
    /// Active power, W.
    W,
    /// Reactive power, var.
    Var,
    /// Line frequency, Hz.
    Hz,
    /// Phase A to neutral voltage, V.
    VL1,
    VL2,
    VL3,
}

impl Measurand {
    /// Phase voltages, in phase order.
    pub const PHASE_VOLTAGES: [Measurand; 3] = [Measurand::VL1, Measurand::VL2, Measurand::VL3];
}

pub type Nameplate = BTreeMap<Rating, f64>;

/// Flag families that describe operating conditions.
pub const MONITORING_FAMILIES: [StatusFamily; 3] = [
    StatusFamily::OperationalState,
    StatusFamily::ConnectionState,
    StatusFamily::Alarms,
];

/// Measurements and state flags read together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Monitoring {
    pub measurements: BTreeMap<Measurand, f64>,
    /// Only the [`MONITORING_FAMILIES`] the device reports.
    pub status: BTreeMap<StatusFamily, Flags>,
}

impl Monitoring {
    pub fn measurement(&self, measurand: Measurand) -> Option<f64> {
        self.measurements.get(&measurand).copied()
    }

    /// Phase voltages the device reports, in phase order.
    pub fn phase_voltages(&self) -> Vec<f64> {
        Measurand::PHASE_VOLTAGES
            .iter()
            .filter_map(|m| self.measurement(*m))
            .collect()
    }
}
