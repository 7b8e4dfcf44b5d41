//! IEEE 1547-2018 parameter names for the function model.
//!
//! Every function maps through a static [`Mapping`]. Percent quantities become per-unit,
//! curves become parallel `*_pts` lists. The two directional setpoints follow their own
//! rules:
//!
//! | function | standard keys | sign |
//! |---|---|---|
//! | constant PF | `const_pf_excitation`, `const_pf_inj` / `const_pf_abs` | magnitude only, key picks the direction |
//! | constant Q | `const_q_mode_excitation`, `const_q` | positive is injecting |
//!
//! Fields IEEE 1547 has no name for are listed in [`Mapping::drops`]. A mapping without
//! drops is total: `from_standard(to_standard(f)) == f`.
//!
//! Nameplate ratings use `np_*` keys and monitoring data `mn_*` keys, with power in kW,
//! kVAr and kVA. Status flags are flattened into one boolean per flag, e.g.
//! `mn_alm_over_temp`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    adapter::DeviceAdapter,
    catalog::FunctionCatalog,
    commit::CommitAttempt,
    curve::{Axis, CurveModel, CurvePoint},
    bitfield::StatusFamily,
    error::{Error, Result},
    function::{Excitation, FunctionKind, GridSupportFunction, scalar},
    monitor::{Measurand, Monitoring, Nameplate, Rating},
    scaling::{per_unit_to_percent, percent_to_per_unit},
};

/// One value of a standard parameter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StandardValue {
    Bool(bool),
    Float(f64),
    Text(String),
    Floats(Vec<f64>),
}

/// Standard parameter name to value.
pub type StandardParams = BTreeMap<String, StandardValue>;

/// How a scalar is expressed on the standard side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    /// Same number on both sides.
    Native,
    /// Percent internally, per-unit in the standard.
    Percent,
    /// Ramp time in seconds internally, percent of rated power per second in the standard.
    RampRate,
}

impl Unit {
    fn to_standard(self, value: f64) -> f64 {
        match self {
            Unit::Native => value,
            Unit::Percent => percent_to_per_unit(value),
            Unit::RampRate => 100.0 / value,
        }
    }

    fn from_standard(self, value: f64) -> f64 {
        match self {
            Unit::Native => value,
            Unit::Percent => per_unit_to_percent(value),
            Unit::RampRate => 100.0 / value,
        }
    }

    fn of_axis(axis: Axis) -> Self {
        match axis {
            Axis::VoltagePct | Axis::VarPct | Axis::WattPct => Unit::Percent,
            Axis::Hertz | Axis::Seconds => Unit::Native,
        }
    }
}

/// Standard keys of a function's curve.
#[derive(Debug, Clone, Copy)]
pub struct CurveKeys {
    pub x: &'static str,
    pub y: &'static str,
    pub response_time: Option<&'static str>,
}

/// Standard keys of a directional setpoint.
#[derive(Debug, Clone, Copy)]
pub enum SignKeys {
    /// Unsigned magnitude stored under the key of its direction.
    SplitMagnitude {
        excitation: &'static str,
        injecting: &'static str,
        absorbing: &'static str,
        unit: Unit,
    },
    /// One signed value, positive when injecting.
    Signed {
        excitation: &'static str,
        value: &'static str,
        unit: Unit,
    },
}

/// Field table of one function.
#[derive(Debug, Clone, Copy)]
pub struct Mapping {
    pub kind: FunctionKind,
    /// `None` for protection settings, which are always in force.
    pub enable: Option<&'static str>,
    pub scalars: &'static [(&'static str, &'static str, Unit)],
    pub sign: Option<SignKeys>,
    pub curve: Option<CurveKeys>,
    pub revert_time: Option<&'static str>,
    /// Internal fields with no standard name, lost on the way out.
    pub drops: &'static [&'static str],
}

impl Mapping {
    pub const fn is_total(&self) -> bool {
        self.drops.is_empty()
    }
}

const TIMERS: &[&str] = &["window_time", "ramp_time", "revert_time"];
const WINDOW_RAMP: &[&str] = &["window_time", "ramp_time"];
const CURVE_DROPS: &[&str] = &["dependent_ref", "window_time", "ramp_time", "revert_time", "other_curves"];
const TRIP_DROPS: &[&str] = &["enabled", "other_curves"];

const fn trip(kind: FunctionKind, x: &'static str, y: &'static str) -> Mapping {
    Mapping {
        kind,
        enable: None,
        scalars: &[],
        sign: None,
        curve: Some(CurveKeys {
            x,
            y,
            response_time: None,
        }),
        revert_time: None,
        drops: TRIP_DROPS,
    }
}

static MAPPINGS: [Mapping; 14] = [
    Mapping {
        kind: FunctionKind::ConstantPf,
        enable: Some("const_pf_mode_enable"),
        scalars: &[],
        sign: Some(SignKeys::SplitMagnitude {
            excitation: "const_pf_excitation",
            injecting: "const_pf_inj",
            absorbing: "const_pf_abs",
            unit: Unit::Native,
        }),
        curve: None,
        revert_time: Some("const_pf_olrt"),
        drops: WINDOW_RAMP,
    },
    Mapping {
        kind: FunctionKind::VoltVar,
        enable: Some("qv_mode_enable"),
        scalars: &[(scalar::V_REF, "qv_vref", Unit::Percent)],
        sign: None,
        curve: Some(CurveKeys {
            x: "qv_curve_v_pts",
            y: "qv_curve_q_pts",
            response_time: Some("qv_olrt"),
        }),
        revert_time: None,
        drops: CURVE_DROPS,
    },
    Mapping {
        kind: FunctionKind::VoltWatt,
        enable: Some("pv_mode_enable"),
        scalars: &[],
        sign: None,
        curve: Some(CurveKeys {
            x: "pv_curve_v_pts",
            y: "pv_curve_p_pts",
            response_time: Some("pv_olrt"),
        }),
        revert_time: None,
        drops: CURVE_DROPS,
    },
    Mapping {
        kind: FunctionKind::FreqWattDroop,
        enable: Some("pf_mode_enable"),
        scalars: &[
            (scalar::DB_OF, "pf_dbof", Unit::Native),
            (scalar::DB_UF, "pf_dbuf", Unit::Native),
            (scalar::K_OF, "pf_kof", Unit::Native),
            (scalar::K_UF, "pf_kuf", Unit::Native),
            (scalar::RSP_TMS, "pf_olrt", Unit::Native),
        ],
        sign: None,
        curve: None,
        revert_time: None,
        drops: TIMERS,
    },
    Mapping {
        kind: FunctionKind::WattVar,
        enable: Some("qp_mode_enable"),
        scalars: &[],
        sign: None,
        // Generation side only.
        curve: Some(CurveKeys {
            x: "qp_curve_p_gen_pts",
            y: "qp_curve_q_gen_pts",
            response_time: Some("qp_olrt"),
        }),
        revert_time: None,
        drops: CURVE_DROPS,
    },
    Mapping {
        kind: FunctionKind::ActivePowerLimit,
        enable: Some("p_lim_mode_enable"),
        scalars: &[(scalar::W_MAX_PCT, "p_lim_w", Unit::Percent)],
        sign: None,
        curve: None,
        revert_time: None,
        drops: TIMERS,
    },
    Mapping {
        kind: FunctionKind::ReactivePowerLimit,
        enable: Some("const_q_mode_enable"),
        scalars: &[],
        sign: Some(SignKeys::Signed {
            excitation: "const_q_mode_excitation",
            value: "const_q",
            unit: Unit::Percent,
        }),
        curve: None,
        revert_time: Some("const_q_olrt"),
        drops: WINDOW_RAMP,
    },
    trip(FunctionKind::HvRideThrough, "ov_trip_t_pts", "ov_trip_v_pts"),
    trip(FunctionKind::LvRideThrough, "uv_trip_t_pts", "uv_trip_v_pts"),
    trip(FunctionKind::HfRideThrough, "of_trip_t_pts", "of_trip_f_pts"),
    trip(FunctionKind::LfRideThrough, "uf_trip_t_pts", "uf_trip_f_pts"),
    trip(FunctionKind::MomentaryCessationHv, "ov_mc_t_pts", "ov_mc_v_pts"),
    trip(FunctionKind::MomentaryCessationLv, "uv_mc_t_pts", "uv_mc_v_pts"),
    Mapping {
        kind: FunctionKind::EnterService,
        enable: Some("es_permit_service"),
        scalars: &[
            (scalar::ES_V_HI, "es_v_high", Unit::Percent),
            (scalar::ES_V_LO, "es_v_low", Unit::Percent),
            (scalar::ES_HZ_HI, "es_f_high", Unit::Native),
            (scalar::ES_HZ_LO, "es_f_low", Unit::Native),
            (scalar::ES_DLY_TMS, "es_delay", Unit::Native),
            (scalar::ES_RND_TMS, "es_randomized_delay", Unit::Native),
            (scalar::ES_RMP_TMS, "es_ramp_rate", Unit::RampRate),
        ],
        sign: None,
        curve: None,
        revert_time: None,
        drops: &[],
    },
];

/// The field table of `kind`.
/// Nameplate key and divisor from device units.
const fn rating_key(rating: Rating) -> (&'static str, f64) {
    match rating {
        Rating::WMax => ("np_p_max", 1000.0),
        Rating::WOverExcited => ("np_p_max_over_pf", 1000.0),
        Rating::PfOverExcited => ("np_over_pf", 1.0),
        Rating::WUnderExcited => ("np_p_max_under_pf", 1000.0),
        Rating::PfUnderExcited => ("np_under_pf", 1.0),
        Rating::VaMax => ("np_va_max", 1000.0),
        Rating::VarMaxInjected => ("np_q_max_inj", 1000.0),
        Rating::VarMaxAbsorbed => ("np_q_max_abs", 1000.0),
        Rating::WChargeMax => ("np_p_max_charge", 1000.0),
        Rating::VaChargeMax => ("np_apparent_power_charge_max", 1000.0),
        Rating::VNom => ("np_ac_v_nom", 1.0),
        Rating::VMax => ("np_ac_v_max_er_max", 1.0),
        Rating::VMin => ("np_ac_v_min_er_min", 1.0),
    }
}

/// Key of a flag family flattened into monitoring data.
const fn flag_prefix(family: StatusFamily) -> Option<&'static str> {
    match family {
        StatusFamily::OperationalState => Some("mn_op_"),
        StatusFamily::ConnectionState => Some("mn_conn_"),
        StatusFamily::Alarms => Some("mn_alm_"),
        _ => None,
    }
}

/// Power factor ratings stay magnitudes, the quadrant is in the key.
pub fn nameplate_to_standard(nameplate: &Nameplate) -> StandardParams {
    nameplate
        .iter()
        .map(|(rating, value)| {
            let (key, divisor) = rating_key(*rating);
            let value = match rating {
                Rating::VarMaxAbsorbed | Rating::PfOverExcited | Rating::PfUnderExcited => value.abs(),
                _ => *value,
            };
            (key.to_string(), StandardValue::Float(value / divisor))
        })
        .collect()
}

pub fn monitoring_to_standard(monitoring: &Monitoring) -> StandardParams {
    let mut standard = StandardParams::new();
    let kilo = [(Measurand::W, "mn_w"), (Measurand::Var, "mn_var")];
    for (measurand, key) in kilo {
        if let Some(value) = monitoring.measurement(measurand) {
            standard.insert(key.to_string(), StandardValue::Float(value / 1000.0));
        }
    }
    if let Some(hz) = monitoring.measurement(Measurand::Hz) {
        standard.insert("mn_hz".to_string(), StandardValue::Float(hz));
    }
    let voltages = monitoring.phase_voltages();
    if !voltages.is_empty() {
        standard.insert("mn_v".to_string(), StandardValue::Floats(voltages));
    }
    for (family, flags) in &monitoring.status {
        let Some(prefix) = flag_prefix(*family) else {
            continue;
        };
        for (name, value) in flags {
            standard.insert(format!("{prefix}{name}"), StandardValue::Bool(*value));
        }
    }
    standard
}

pub fn mapping(kind: FunctionKind) -> &'static Mapping {
    // Every kind has an entry, checked by the tests.
    let index = MAPPINGS.iter().position(|m| m.kind == kind).unwrap_or_default();
    &MAPPINGS[index]
}

fn float(params: &StandardParams, key: &str) -> Result<Option<f64>> {
    match params.get(key) {
        None => Ok(None),
        Some(StandardValue::Float(value)) => Ok(Some(*value)),
        Some(other) => Err(Error::InvalidParameter(format!("{key} must be a number, got {other:?}"))),
    }
}

fn flag(params: &StandardParams, key: &str) -> Result<Option<bool>> {
    match params.get(key) {
        None => Ok(None),
        Some(StandardValue::Bool(value)) => Ok(Some(*value)),
        Some(other) => Err(Error::InvalidParameter(format!("{key} must be a bool, got {other:?}"))),
    }
}

fn floats<'p>(params: &'p StandardParams, key: &str) -> Result<Option<&'p [f64]>> {
    match params.get(key) {
        None => Ok(None),
        Some(StandardValue::Floats(values)) => Ok(Some(values)),
        Some(other) => Err(Error::InvalidParameter(format!("{key} must be a list, got {other:?}"))),
    }
}

fn excitation(params: &StandardParams, key: &str) -> Result<Option<Excitation>> {
    match params.get(key) {
        None => Ok(None),
        Some(StandardValue::Text(text)) => text
            .parse()
            .map(Some)
            .map_err(|_| Error::InvalidParameter(format!("{key} must be 'inj' or 'abs', got '{text}'"))),
        Some(other) => Err(Error::InvalidParameter(format!("{key} must be text, got {other:?}"))),
    }
}

/// Translates between [`GridSupportFunction`] and IEEE 1547 parameter sets.
///
/// A standard parameter set carries a single curve. The translator reads it from, and
/// creates it in, slot `curve_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ieee1547Translator {
    pub curve_index: u8,
    pub max_points: usize,
}

impl Default for Ieee1547Translator {
    fn default() -> Self {
        Self {
            curve_index: 1,
            max_points: 10,
        }
    }
}

impl Ieee1547Translator {
    pub const fn new(curve_index: u8, max_points: usize) -> Self {
        Self {
            curve_index,
            max_points,
        }
    }

    /// Target the first writable curve slot `adapter` has for `kind`.
    pub fn for_adapter(adapter: &DeviceAdapter, kind: FunctionKind) -> Self {
        adapter
            .register_map()
            .function(kind)
            .and_then(|bindings| bindings.first_writable_curve())
            .map(|slot| Self::new(slot.index, slot.points.max_points()))
            .unwrap_or_default()
    }

    pub fn to_standard(&self, function: &GridSupportFunction) -> StandardParams {
        let m = mapping(function.kind);
        let mut params = StandardParams::new();
        let mut put = |key: &str, value| {
            params.insert(key.to_string(), value);
        };

        if let Some(key) = m.enable {
            put(key, StandardValue::Bool(function.enabled));
        }
        for &(name, key, unit) in m.scalars {
            if let Some(value) = function.scalar(name) {
                put(key, StandardValue::Float(unit.to_standard(value)));
            }
        }

        if let (Some(sign), Some(name)) = (m.sign, function.kind.signed_scalar()) {
            match (function.scalar(name), function.excitation) {
                (Some(magnitude), Some(direction)) => match sign {
                    SignKeys::SplitMagnitude {
                        excitation,
                        injecting,
                        absorbing,
                        unit,
                    } => {
                        put(excitation, StandardValue::Text(direction.to_string()));
                        let key = match direction {
                            Excitation::Injecting => injecting,
                            Excitation::Absorbing => absorbing,
                        };
                        put(key, StandardValue::Float(unit.to_standard(magnitude)));
                    }
                    SignKeys::Signed { excitation, value, unit } => {
                        put(excitation, StandardValue::Text(direction.to_string()));
                        let signed = match direction {
                            Excitation::Injecting => magnitude,
                            Excitation::Absorbing => -magnitude,
                        };
                        put(value, StandardValue::Float(unit.to_standard(signed)));
                    }
                },
                (Some(_), None) => {
                    warn!(function = %function.kind, "setpoint direction unknown, setpoint left out");
                }
                (None, _) => {}
            }
        }

        if let Some(keys) = m.curve {
            let curve = function.curve(self.curve_index).or(function.curves.first());
            if let Some(curve) = curve {
                let (x_unit, y_unit) = (Unit::of_axis(curve.shape.x), Unit::of_axis(curve.shape.y));
                let xs = curve.points().iter().map(|p| x_unit.to_standard(p.x)).collect();
                let ys = curve.points().iter().map(|p| y_unit.to_standard(p.y)).collect();
                put(keys.x, StandardValue::Floats(xs));
                put(keys.y, StandardValue::Floats(ys));
                if let (Some(key), Some(seconds)) = (keys.response_time, curve.open_loop_response_time) {
                    put(key, StandardValue::Float(seconds));
                }
            }
        }

        if let (Some(key), Some(seconds)) = (m.revert_time, function.revert_time) {
            put(key, StandardValue::Float(seconds));
        }
        params
    }

    /// Build a `kind` function from standard parameters. Keys of other functions are ignored.
    pub fn from_standard(&self, kind: FunctionKind, params: &StandardParams) -> Result<GridSupportFunction> {
        let m = mapping(kind);
        let mut function = GridSupportFunction::new(kind);

        function.enabled = match m.enable {
            Some(key) => flag(params, key)?.unwrap_or(false),
            None => true,
        };
        for &(name, key, unit) in m.scalars {
            if let Some(value) = float(params, key)? {
                function.scalars.insert(name, unit.from_standard(value));
            }
        }

        if let (Some(sign), Some(name)) = (m.sign, kind.signed_scalar()) {
            let (direction, magnitude) = match sign {
                SignKeys::SplitMagnitude {
                    excitation: excitation_key,
                    injecting,
                    absorbing,
                    unit,
                } => match excitation(params, excitation_key)? {
                    Some(direction) => {
                        let key = match direction {
                            Excitation::Injecting => injecting,
                            Excitation::Absorbing => absorbing,
                        };
                        let value = float(params, key)?
                            .ok_or_else(|| Error::InvalidParameter(format!("{excitation_key} needs {key}")))?;
                        (Some(direction), Some(unit.from_standard(value.abs())))
                    }
                    None if params.contains_key(injecting) || params.contains_key(absorbing) => {
                        return Err(Error::InvalidParameter(format!("missing {excitation_key}")));
                    }
                    None => (None, None),
                },
                SignKeys::Signed {
                    excitation: excitation_key,
                    value,
                    unit,
                } => match float(params, value)? {
                    Some(signed) => {
                        // The excitation key wins over the sign of the value.
                        let direction = excitation(params, excitation_key)?.unwrap_or(if signed < 0.0 {
                            Excitation::Absorbing
                        } else {
                            Excitation::Injecting
                        });
                        (Some(direction), Some(unit.from_standard(signed.abs())))
                    }
                    None => (excitation(params, excitation_key)?, None),
                },
            };
            function.excitation = direction;
            if let Some(magnitude) = magnitude {
                function.scalars.insert(name, magnitude);
            }
        }

        if let Some(keys) = m.curve {
            if let Some(curve) = self.curve_from_standard(kind, keys, params)? {
                function.curves.push(curve);
            }
        }

        if let Some(key) = m.revert_time {
            function.revert_time = float(params, key)?;
        }

        debug!(function = %kind, keys = params.len(), "translated from IEEE 1547");
        Ok(function)
    }

    fn curve_from_standard(
        &self,
        kind: FunctionKind,
        keys: CurveKeys,
        params: &StandardParams,
    ) -> Result<Option<CurveModel>> {
        let response_time = match keys.response_time {
            Some(key) => float(params, key)?,
            None => None,
        };
        let (xs, ys) = match (floats(params, keys.x)?, floats(params, keys.y)?) {
            (None, None) if response_time.is_none() => return Ok(None),
            (Some(xs), Some(ys)) if xs.len() == ys.len() => (xs, ys),
            _ => {
                return Err(Error::InvalidParameter(format!(
                    "{} and {} must be given together, with equal lengths",
                    keys.x, keys.y
                )));
            }
        };

        let Some(mut curve) = GridSupportFunction::new(kind).blank_curve(self.curve_index, self.max_points) else {
            return Ok(None);
        };
        let (x_unit, y_unit) = (Unit::of_axis(curve.shape.x), Unit::of_axis(curve.shape.y));
        let points = xs
            .iter()
            .zip(ys)
            .map(|(x, y)| CurvePoint::new(x_unit.from_standard(*x), y_unit.from_standard(*y)))
            .collect();
        curve.set_points(points)?;
        curve.open_loop_response_time = response_time;
        Ok(Some(curve))
    }

    /// Read `kind` through `catalog` as standard parameters. `None` when the device doesn't
    /// support it.
    pub fn get(&self, catalog: &FunctionCatalog<'_>, kind: FunctionKind) -> Result<Option<StandardParams>> {
        match catalog.get(kind) {
            Ok(function) => Ok(Some(self.to_standard(&function))),
            Err(Error::UnsupportedFunction(_)) => {
                debug!(function = %kind, "not supported");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Apply standard parameters for `kind` through `catalog`. The flag is `false` when the
    /// device doesn't support `kind`.
    pub fn set(
        &self,
        catalog: &FunctionCatalog<'_>,
        kind: FunctionKind,
        params: &StandardParams,
    ) -> Result<(bool, Option<CommitAttempt>)> {
        let function = self.from_standard(kind, params)?;
        match catalog.set(&function) {
            Ok(attempt) => Ok((true, attempt)),
            Err(Error::UnsupportedFunction(_)) => {
                debug!(function = %kind, "not supported");
                Ok((false, None))
            }
            Err(e) => Err(e),
        }
    }

    pub fn get_nameplate(&self, catalog: &FunctionCatalog<'_>) -> Result<StandardParams> {
        Ok(nameplate_to_standard(&catalog.nameplate()?))
    }

    pub fn get_monitoring(&self, catalog: &FunctionCatalog<'_>) -> Result<StandardParams> {
        Ok(monitoring_to_standard(&catalog.monitoring()?))
    }

    /// `conn_as`, the permit to enter service.
    pub fn get_conn(&self, catalog: &FunctionCatalog<'_>) -> Result<StandardParams> {
        let mut standard = StandardParams::new();
        standard.insert(CONN_KEY.to_string(), StandardValue::Bool(catalog.conn()?));
        Ok(standard)
    }

    pub fn set_conn(&self, catalog: &FunctionCatalog<'_>, params: &StandardParams) -> Result<()> {
        let permitted = flag(params, CONN_KEY)?
            .ok_or_else(|| Error::InvalidParameter(format!("{CONN_KEY} missing")))?;
        catalog.set_conn(permitted)
    }
}

const CONN_KEY: &str = "conn_as";
