//! The abstract grid-support functions a DER can be programmed with.

use std::collections::BTreeMap;

use strum_macros::{Display, EnumCount, EnumIter, EnumString, IntoStaticStr};

use crate::{
    curve::{Axis, CurveModel, CurveShape, NOMINAL_VOLTAGE_PCT},
    error::{Error, Result},
};

/// Names of the scalar parameters functions may carry.
pub mod scalar {
    /// Power factor magnitude, `0.0 < PF <= 1.0`.
    pub const PF: &str = "PF";
    /// Volt-var reference voltage, percent of nominal.
    pub const V_REF: &str = "VRef";
    /// Over-frequency deadband in Hz.
    pub const DB_OF: &str = "DbOf";
    /// Under-frequency deadband in Hz.
    pub const DB_UF: &str = "DbUf";
    /// Over-frequency droop, per-unit frequency change for full power change.
    pub const K_OF: &str = "KOf";
    /// Under-frequency droop.
    pub const K_UF: &str = "KUf";
    /// Open loop response time in seconds.
    pub const RSP_TMS: &str = "RspTms";
    /// Active power limit, percent of maximum.
    pub const W_MAX_PCT: &str = "WMaxPct";
    /// Reactive power setpoint magnitude, percent of maximum.
    pub const VAR_PCT: &str = "VArPct";
    /// Enter service voltage band, percent of nominal.
    pub const ES_V_HI: &str = "ESVHi";
    pub const ES_V_LO: &str = "ESVLo";
    /// Enter service frequency band in Hz.
    pub const ES_HZ_HI: &str = "ESHzHi";
    pub const ES_HZ_LO: &str = "ESHzLo";
    /// Enter service delay in seconds.
    pub const ES_DLY_TMS: &str = "ESDlyTms";
    /// Enter service randomized delay in seconds.
    pub const ES_RND_TMS: &str = "ESRndTms";
    /// Enter service ramp time in seconds.
    pub const ES_RMP_TMS: &str = "ESRmpTms";
}

/// Every grid-support function this crate knows how to program.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumIter,
    EnumCount,
    EnumString,
    IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum FunctionKind {
    ConstantPf,
    VoltVar,
    VoltWatt,
    FreqWattDroop,
    WattVar,
    ActivePowerLimit,
    ReactivePowerLimit,
    HvRideThrough,
    LvRideThrough,
    HfRideThrough,
    LfRideThrough,
    MomentaryCessationHv,
    MomentaryCessationLv,
    EnterService,
}

/// Direction of reactive power exchange.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum Excitation {
    /// Over-excited, supplying reactive power to the grid.
    #[strum(serialize = "inj")]
    Injecting,
    /// Under-excited, drawing reactive power from the grid.
    #[strum(serialize = "abs")]
    Absorbing,
}

/// Parameter families whose sign convention differs between vendors.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter)]
pub enum SignFamily {
    PowerFactor,
    ReactivePower,
}

impl FunctionKind {
    /// Scalar parameters this function may carry.
    pub const fn scalar_names(&self) -> &'static [&'static str] {
        use scalar::*;
        match self {
            Self::ConstantPf => &[PF],
            Self::VoltVar => &[V_REF],
            Self::FreqWattDroop => &[DB_OF, DB_UF, K_OF, K_UF, RSP_TMS],
            Self::ActivePowerLimit => &[W_MAX_PCT],
            Self::ReactivePowerLimit => &[VAR_PCT],
            Self::EnterService => &[
                ES_V_HI, ES_V_LO, ES_HZ_HI, ES_HZ_LO, ES_DLY_TMS, ES_RND_TMS, ES_RMP_TMS,
            ],
            _ => &[],
        }
    }

    /// Axes of this function's curves, or `None` for scalar-only functions.
    pub const fn curve_shape(&self) -> Option<CurveShape> {
        let shape = match self {
            Self::VoltVar => {
                CurveShape::new(Axis::VoltagePct, Axis::VarPct).with_quadrant_pivot(NOMINAL_VOLTAGE_PCT)
            }
            Self::VoltWatt => CurveShape::new(Axis::VoltagePct, Axis::WattPct),
            Self::WattVar => CurveShape::new(Axis::WattPct, Axis::VarPct),
            Self::HvRideThrough
            | Self::LvRideThrough
            | Self::MomentaryCessationHv
            | Self::MomentaryCessationLv => CurveShape::new(Axis::Seconds, Axis::VoltagePct),
            Self::HfRideThrough | Self::LfRideThrough => CurveShape::new(Axis::Seconds, Axis::Hertz),
            _ => return None,
        };
        Some(shape)
    }

    pub const fn is_curve_bearing(&self) -> bool {
        self.curve_shape().is_some()
    }

    /// Functions whose setpoint has an injecting/absorbing direction.
    pub const fn sign_family(&self) -> Option<SignFamily> {
        match self {
            Self::ConstantPf => Some(SignFamily::PowerFactor),
            Self::ReactivePowerLimit => Some(SignFamily::ReactivePower),
            _ => None,
        }
    }

    /// The scalar that carries the magnitude for [`Self::sign_family`].
    pub const fn signed_scalar(&self) -> Option<&'static str> {
        match self {
            Self::ConstantPf => Some(scalar::PF),
            Self::ReactivePowerLimit => Some(scalar::VAR_PCT),
            _ => None,
        }
    }

    /// Functions with window, ramp and revert timers.
    pub const fn has_timers(&self) -> bool {
        matches!(
            self,
            Self::ConstantPf
                | Self::VoltVar
                | Self::VoltWatt
                | Self::WattVar
                | Self::FreqWattDroop
                | Self::ActivePowerLimit
                | Self::ReactivePowerLimit
        )
    }
}

/// The state of one grid-support function, as read from or written to a device.
///
/// Only fields declared for [`Self::kind`] may be populated. A missing field means
/// "not supported or not read", never zero.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSupportFunction {
    pub kind: FunctionKind,
    pub enabled: bool,
    pub scalars: BTreeMap<&'static str, f64>,
    pub curves: Vec<CurveModel>,
    pub excitation: Option<Excitation>,
    /// Randomized start window in seconds.
    pub window_time: Option<f64>,
    /// Ramp time in seconds.
    pub ramp_time: Option<f64>,
    /// Reversion timeout in seconds.
    pub revert_time: Option<f64>,
}

impl GridSupportFunction {
    /// A disabled function with nothing populated.
    pub fn new(kind: FunctionKind) -> Self {
        Self {
            kind,
            enabled: false,
            scalars: BTreeMap::new(),
            curves: Vec::new(),
            excitation: None,
            window_time: None,
            ramp_time: None,
            revert_time: None,
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_scalar(mut self, name: &'static str, value: f64) -> Self {
        self.scalars.insert(name, value);
        self
    }

    pub fn with_curve(mut self, curve: CurveModel) -> Self {
        self.curves.push(curve);
        self
    }

    pub fn with_excitation(mut self, excitation: Excitation) -> Self {
        self.excitation = Some(excitation);
        self
    }

    pub fn with_window_time(mut self, seconds: f64) -> Self {
        self.window_time = Some(seconds);
        self
    }

    pub fn with_ramp_time(mut self, seconds: f64) -> Self {
        self.ramp_time = Some(seconds);
        self
    }

    pub fn with_revert_time(mut self, seconds: f64) -> Self {
        self.revert_time = Some(seconds);
        self
    }

    pub fn scalar(&self, name: &str) -> Option<f64> {
        self.scalars.get(name).copied()
    }

    pub fn curve(&self, index: u8) -> Option<&CurveModel> {
        self.curves.iter().find(|c| c.curve_index == index)
    }

    /// An empty curve for this function's shape, or `None` if it has no curves.
    pub fn blank_curve(&self, curve_index: u8, max_points: usize) -> Option<CurveModel> {
        self.kind
            .curve_shape()
            .map(|shape| CurveModel::new(shape, curve_index, max_points))
    }

    /// Check that only the fields declared for this function's kind are populated.
    pub fn check_fields(&self) -> Result<()> {
        let kind = self.kind;
        if let Some(name) = self
            .scalars
            .keys()
            .find(|name| !kind.scalar_names().contains(*name))
        {
            return Err(Error::InvalidParameter(format!("{kind} has no scalar {name}")));
        }
        match kind.curve_shape() {
            None if !self.curves.is_empty() => {
                return Err(Error::InvalidParameter(format!("{kind} has no curves")));
            }
            Some(shape) => {
                if let Some(curve) = self.curves.iter().find(|c| c.shape != shape) {
                    return Err(Error::InvalidParameter(format!(
                        "curve {} has {}/{} axes, {kind} uses {}/{}",
                        curve.curve_index, curve.shape.x, curve.shape.y, shape.x, shape.y
                    )));
                }
            }
            None => {}
        }
        if self.excitation.is_some() && kind.sign_family().is_none() {
            return Err(Error::InvalidParameter(format!("{kind} has no excitation")));
        }
        let has_timer = self.window_time.is_some() || self.ramp_time.is_some() || self.revert_time.is_some();
        if has_timer && !kind.has_timers() {
            return Err(Error::InvalidParameter(format!("{kind} has no timers")));
        }
        Ok(())
    }

    /// Full local validation, run before anything is written to a device.
    pub fn validate(&self) -> Result<()> {
        self.check_fields()?;
        for curve in &self.curves {
            curve.validate()?;
            if self.enabled && !curve.read_only && curve.active_point_count() == 0 {
                return Err(Error::EmptyCurve);
            }
        }
        if let Some(pf) = self.scalar(scalar::PF) {
            if !(pf > 0.0 && pf <= 1.0) {
                return Err(Error::ValueOutOfRange(pf));
            }
        }
        if let (Some(name), None) = (self.kind.signed_scalar(), self.excitation) {
            if self.scalars.contains_key(name) {
                return Err(Error::InvalidParameter(format!("{name} needs an excitation")));
            }
        }
        if let Some(name) = self.kind.signed_scalar() {
            if self.scalar(name).is_some_and(|v| v < 0.0) {
                return Err(Error::InvalidParameter(format!(
                    "{name} is a magnitude, use the excitation for direction"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::CurvePoint;
    use strum::IntoEnumIterator;

    #[test]
    fn test_kind_names_round_trip() {
        for kind in FunctionKind::iter() {
            let name: &'static str = kind.into();
            assert_eq!(name.parse::<FunctionKind>().unwrap(), kind);
        }
        assert_eq!(FunctionKind::ConstantPf.to_string(), "constant_pf");
    }

    #[test]
    fn test_every_kind_has_something_to_program() {
        for kind in FunctionKind::iter() {
            assert!(
                !kind.scalar_names().is_empty() || kind.is_curve_bearing(),
                "{kind} declares nothing"
            );
        }
    }

    #[test]
    fn test_undeclared_scalar_rejected() {
        let f = GridSupportFunction::new(FunctionKind::VoltWatt).with_scalar(scalar::PF, 0.9);
        assert!(matches!(f.check_fields(), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_curve_on_scalar_function_rejected() {
        let curve = CurveModel::new(CurveShape::new(Axis::VoltagePct, Axis::WattPct), 1, 4);
        let f = GridSupportFunction::new(FunctionKind::ActivePowerLimit).with_curve(curve);
        assert!(f.check_fields().is_err());
    }

    #[test]
    fn test_mismatched_curve_shape_rejected() {
        let volt_watt = FunctionKind::VoltWatt.curve_shape().unwrap();
        let f = GridSupportFunction::new(FunctionKind::VoltVar).with_curve(CurveModel::new(volt_watt, 1, 4));
        assert!(f.check_fields().is_err());
    }

    #[test]
    fn test_enabled_with_empty_curve() {
        let f = GridSupportFunction::new(FunctionKind::VoltVar).enabled(true);
        let curve = f.blank_curve(2, 4).unwrap();
        let f = f.with_curve(curve);
        assert_eq!(f.validate(), Err(Error::EmptyCurve));

        // Fine while disabled.
        let f = f.enabled(false);
        assert!(f.validate().is_ok());
    }

    #[test]
    fn test_enabled_with_points() {
        let f = GridSupportFunction::new(FunctionKind::VoltVar).enabled(true);
        let mut curve = f.blank_curve(2, 4).unwrap();
        curve
            .set_points(vec![CurvePoint::new(95.0, 20.0), CurvePoint::new(105.0, -20.0)])
            .unwrap();
        assert!(f.with_curve(curve).validate().is_ok());
    }

    #[test]
    fn test_power_factor_needs_excitation() {
        let f = GridSupportFunction::new(FunctionKind::ConstantPf)
            .enabled(true)
            .with_scalar(scalar::PF, 0.95);
        assert!(matches!(f.validate(), Err(Error::InvalidParameter(_))));
        assert!(f.with_excitation(Excitation::Injecting).validate().is_ok());
    }

    #[test]
    fn test_power_factor_range() {
        let f = GridSupportFunction::new(FunctionKind::ConstantPf)
            .with_scalar(scalar::PF, 1.2)
            .with_excitation(Excitation::Absorbing);
        assert_eq!(f.validate(), Err(Error::ValueOutOfRange(1.2)));
    }

    #[test]
    fn test_timers_only_where_declared() {
        let f = GridSupportFunction::new(FunctionKind::HvRideThrough).with_revert_time(10.0);
        assert!(f.check_fields().is_err());
        let f = GridSupportFunction::new(FunctionKind::ConstantPf).with_revert_time(10.0);
        assert!(f.check_fields().is_ok());
    }
}
