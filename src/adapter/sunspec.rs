//! SunSpec DER information models (700 series).
//!
//! Every model is located by the address of its ID register, given per model id in
//! [`ConnectionParams::models`]. Offsets below are relative to that register, so the
//! model ID is at `+0` and its length at `+1`. Values are scaled by the model's `_SF`
//! registers, which are read when a value is accessed.
//!
//! Curve models repeat their curve block `curves` times, each holding `points_per_curve`
//! points. Curve 1 reports what is in effect and cannot be written; the others are staged
//! and put into effect through the model's adoption request.

use tracing::debug;

use crate::{
    bitfield::StatusFamily,
    commit::CommitPolicy,
    config::ConnectionParams,
    curve::DependentRef,
    error::{Error, Result},
    function::{FunctionKind, SignFamily, scalar},
    monitor::{Measurand, Rating},
    register::{
        Access, AdoptionBindings, CurveBindings, DependentRefBinding, EnableBinding, FunctionBindings,
        PointStorage, RegisterBinding, RegisterMap, RegisterMapBuilder, SignConvention, ValueType,
    },
};

/// Model ids handled here.
pub mod model {
    pub const MEASUREMENTS_AC: u16 = 701;
    pub const NAMEPLATE: u16 = 702;
    pub const ENTER_SERVICE: u16 = 703;
    pub const AC_CONTROLS: u16 = 704;
    pub const VOLT_VAR: u16 = 705;
    pub const VOLT_WATT: u16 = 706;
    pub const TRIP_LV: u16 = 707;
    pub const TRIP_HV: u16 = 708;
    pub const TRIP_LF: u16 = 709;
    pub const TRIP_HF: u16 = 710;
    pub const FREQ_DROOP: u16 = 711;
    pub const WATT_VAR: u16 = 712;
}

/// Offsets shared by every model with an adoption handshake.
const ENA: u32 = 2;
/// __W__ - Curve (or control) to adopt.
const ADPT_REQ: u32 = 3;
/// __R__ - 0 = in progress, 1 = completed, 2 = failed.
const ADPT_RSLT: u32 = 4;

const ADPT_IN_PROGRESS: f64 = 0.0;
const ADPT_COMPLETED: f64 = 1.0;
const ADPT_FAILED: f64 = 2.0;

/// 703 offsets.
mod enter_service {
    pub const ES_V_HI: u32 = 3;
    pub const ES_V_LO: u32 = 4;
    pub const ES_HZ_HI: u32 = 5;
    pub const ES_HZ_LO: u32 = 7;
    pub const ES_DLY_TMS: u32 = 9;
    pub const ES_RND_TMS: u32 = 11;
    pub const ES_RMP_TMS: u32 = 13;
    pub const V_SF: u32 = 17;
    pub const HZ_SF: u32 = 18;
    pub const LEN: u32 = 19;
}

/// 704 offsets.
mod ac_controls {
    pub const PF_W_INJ_ENA: u32 = 2;
    pub const PF_W_INJ_RVRT_TMS: u32 = 4;
    pub const W_MAX_LIM_PCT_ENA: u32 = 14;
    pub const W_MAX_LIM_PCT: u32 = 15;
    pub const W_MAX_LIM_PCT_RVRT_TMS: u32 = 18;
    pub const VAR_SET_ENA: u32 = 35;
    pub const VAR_SET_PCT: u32 = 42;
    pub const VAR_SET_RVRT_TMS: u32 = 45;
    pub const PF_SF: u32 = 53;
    pub const W_MAX_LIM_PCT_SF: u32 = 54;
    pub const VAR_SET_PCT_SF: u32 = 58;
    /// __R/W__ - `PFWInj.PF`
    pub const PF_W_INJ_PF: u32 = 59;
    /// __R/W__ - `PFWInj.Ext`, 0 = over-excited, 1 = under-excited.
    pub const PF_W_INJ_EXT: u32 = 60;
    pub const LEN: u32 = 61;
}

/// 701 offsets.
mod measurements {
    /// __R__ - Alarm bitfield, two registers.
    pub const ALRM: u32 = 6;
    pub const W: u32 = 10;
    pub const VAR: u32 = 12;
    pub const HZ: u32 = 17;
    /// Line to neutral voltage of each phase block.
    pub const V_L1: u32 = 47;
    pub const V_L2: u32 = 70;
    pub const V_L3: u32 = 93;
    pub const V_SF: u32 = 114;
    pub const HZ_SF: u32 = 115;
    pub const W_SF: u32 = 116;
    pub const VAR_SF: u32 = 119;
    pub const LEN: u32 = 155;
}

/// 702 offsets.
mod nameplate {
    pub const W_MAX_RTG: u32 = 2;
    pub const W_OVR_EXT_RTG: u32 = 3;
    pub const W_OVR_EXT_RTG_PF: u32 = 4;
    pub const W_UND_EXT_RTG: u32 = 5;
    pub const W_UND_EXT_RTG_PF: u32 = 6;
    pub const VA_MAX_RTG: u32 = 7;
    pub const VAR_MAX_INJ_RTG: u32 = 8;
    pub const VAR_MAX_ABS_RTG: u32 = 9;
    pub const W_CHA_RTE_MAX_RTG: u32 = 10;
    pub const VA_CHA_RTE_MAX_RTG: u32 = 12;
    pub const V_NOM_RTG: u32 = 14;
    pub const V_MAX_RTG: u32 = 15;
    pub const V_MIN_RTG: u32 = 16;
    pub const W_SF: u32 = 45;
    pub const PF_SF: u32 = 46;
    pub const VA_SF: u32 = 47;
    pub const VAR_SF: u32 = 48;
    pub const V_SF: u32 = 49;
    pub const LEN: u32 = 52;
}

/// 705, 706 and 712 header offsets.
mod curve_header {
    pub const RVRT_TMS: u32 = 7;
    /// Scale factor of the x axis.
    pub const X_SF: u32 = 12;
    pub const DEPT_REF_SF: u32 = 13;
    pub const RSP_TMS_SF: u32 = 14;
}

/// 711 offsets.
mod droop {
    pub const RVRT_TMS: u32 = 6;
    pub const DB_SF: u32 = 11;
    pub const K_SF: u32 = 12;
    pub const RSP_TMS_SF: u32 = 13;
    pub const CTL: u32 = 14;
    pub const CTL_LEN: u32 = 10;
    pub const DB_OF: u32 = 0;
    pub const DB_UF: u32 = 2;
    pub const K_OF: u32 = 4;
    pub const K_UF: u32 = 5;
    pub const RSP_TMS: u32 = 6;
}

/// 707 to 710 offsets.
mod trip {
    /// Scale factor of the voltage or frequency axis.
    pub const Y_SF: u32 = 7;
    pub const TMS_SF: u32 = 8;
    pub const CRV: u32 = 9;
}

/// Curve groups inside one trip curve set.
#[derive(Debug, Clone, Copy)]
enum TripGroup {
    MustTrip = 0,
    MomCess = 2,
}

/// Curve slot holding the device's operating curve.
const OPERATING_CURVE: u8 = 1;
/// First slot that may be written.
const STAGED_CURVE: u8 = 2;

/// Shape of the repeated curve blocks, shared by every model.
struct Layout {
    points: u32,
    curves: u8,
    policy: CommitPolicy,
}

impl Layout {
    fn new(params: &ConnectionParams) -> Result<Self> {
        if params.points_per_curve == 0 {
            return Err(Error::Config("points_per_curve must be at least 1".into()));
        }
        if params.curves < STAGED_CURVE {
            return Err(Error::Config(format!(
                "curves must be at least {STAGED_CURVE}, curve {OPERATING_CURVE} is read-only"
            )));
        }
        Ok(Self {
            points: params.points_per_curve as u32,
            curves: params.curves,
            policy: params.commit.policy(),
        })
    }

    fn curve_indices(&self) -> impl Iterator<Item = u8> {
        1..=self.curves
    }
}

/// One model instance at a known address.
struct Model<'a> {
    id: u16,
    base: u16,
    layout: &'a Layout,
}

impl<'a> Model<'a> {
    /// Fails if a model of `len` registers at `base` runs past the end of the address space.
    fn new(id: u16, base: u16, len: u32, layout: &'a Layout) -> Result<Self> {
        if base as u32 + len > u16::MAX as u32 + 1 {
            return Err(Error::Config(format!(
                "model {id} at {base} needs {len} registers, past the end of the address space"
            )));
        }
        Ok(Self { id, base, layout })
    }

    fn address(&self, offset: u32) -> u16 {
        (self.base as u32 + offset) as u16
    }

    fn at(&self, offset: u32, value_type: ValueType) -> RegisterBinding {
        RegisterBinding::holding(self.address(offset), value_type)
    }

    fn scaled(&self, offset: u32, value_type: ValueType, sf: u32) -> RegisterBinding {
        self.at(offset, value_type).scale_register(self.address(sf))
    }

    fn enable(&self) -> EnableBinding {
        EnableBinding::flag(self.at(ENA, ValueType::U16))
    }

    fn adoption(&self, default_index: u8) -> AdoptionBindings {
        let mut request = self.at(ADPT_REQ, ValueType::U16);
        request.access = Access::Write;
        AdoptionBindings {
            request,
            result: self.at(ADPT_RSLT, ValueType::U16).read_only(),
            in_progress: ADPT_IN_PROGRESS,
            completed: ADPT_COMPLETED,
            failed: ADPT_FAILED,
            default_index,
            policy: self.layout.policy,
        }
    }

    /// Enable, revert timer and adoption of a curve model.
    fn curve_function(&self) -> FunctionBindings {
        FunctionBindings::new(self.enable())
            .timers(None, None, Some(self.at(curve_header::RVRT_TMS, ValueType::U32)))
            .adoption(self.adoption(STAGED_CURVE))
    }

    /// Start offset of curve `index` in a model whose curves begin at `first`.
    fn curve_start(&self, first: u32, stride: u32, index: u8) -> u32 {
        first + (index as u32 - 1) * stride
    }

    /// `(x, y)` point registers starting at `start`, two registers per point.
    fn xy_points(&self, start: u32, x: ValueType, y: ValueType) -> PointStorage {
        let n = self.layout.points;
        let x_sf = curve_header::X_SF;
        let y_sf = curve_header::DEPT_REF_SF;
        PointStorage::Registers {
            x: (0..n).map(|i| self.scaled(start + 2 * i, x, x_sf)).collect(),
            y: (0..n).map(|i| self.scaled(start + 2 * i + 1, y, y_sf)).collect(),
        }
    }

    fn dependent_ref(&self, offset: u32, codes: &[(DependentRef, f64)]) -> Option<DependentRefBinding> {
        Some(DependentRefBinding {
            binding: self.at(offset, ValueType::U16),
            codes: codes.to_vec(),
        })
    }
}

const REACTIVE_REFS: [(DependentRef, f64); 3] = [
    (DependentRef::WMaxPct, 1.0),
    (DependentRef::VArMaxPct, 2.0),
    (DependentRef::VArAvalPct, 3.0),
];

const ACTIVE_REFS: [(DependentRef, f64); 2] = [(DependentRef::WMaxPct, 1.0), (DependentRef::WAvalPct, 2.0)];

fn volt_var(builder: RegisterMapBuilder, m: &Model<'_>) -> RegisterMapBuilder {
    const FIRST: u32 = 15;
    const VREF: u32 = 3;
    const RSP_TMS: u32 = 7;
    const PT: u32 = 10;
    let stride = PT + 2 * m.layout.points;

    let vref = |index| m.scaled(m.curve_start(FIRST, stride, index) + VREF, ValueType::U16, curve_header::X_SF);
    // Written to the staged curve, read from the one in effect.
    let mut bindings = m
        .curve_function()
        .scalar(scalar::V_REF, vref(STAGED_CURVE))
        .read_back(scalar::V_REF, vref(OPERATING_CURVE).read_only());
    for index in m.layout.curve_indices() {
        let start = m.curve_start(FIRST, stride, index);
        bindings = bindings.curve(CurveBindings {
            index,
            read_only: index == OPERATING_CURVE,
            points: m.xy_points(start + PT, ValueType::U16, ValueType::I16),
            active_points: Some(m.at(start, ValueType::U16)),
            dependent_ref: m.dependent_ref(start + 1, &REACTIVE_REFS),
            response_time: Some(m.scaled(start + RSP_TMS, ValueType::U32, curve_header::RSP_TMS_SF)),
        });
    }
    builder.function(FunctionKind::VoltVar, bindings)
}

fn volt_watt(builder: RegisterMapBuilder, m: &Model<'_>) -> RegisterMapBuilder {
    const FIRST: u32 = 15;
    const RSP_TMS: u32 = 2;
    const PT: u32 = 5;
    let stride = PT + 2 * m.layout.points;

    let mut bindings = m.curve_function();
    for index in m.layout.curve_indices() {
        let start = m.curve_start(FIRST, stride, index);
        bindings = bindings.curve(CurveBindings {
            index,
            read_only: index == OPERATING_CURVE,
            points: m.xy_points(start + PT, ValueType::U16, ValueType::I16),
            active_points: Some(m.at(start, ValueType::U16)),
            dependent_ref: m.dependent_ref(start + 1, &ACTIVE_REFS),
            response_time: Some(m.scaled(start + RSP_TMS, ValueType::U32, curve_header::RSP_TMS_SF)),
        });
    }
    builder.function(FunctionKind::VoltWatt, bindings)
}

fn watt_var(builder: RegisterMapBuilder, m: &Model<'_>) -> RegisterMapBuilder {
    const FIRST: u32 = 14;
    const PT: u32 = 4;
    let stride = PT + 2 * m.layout.points;

    let mut bindings = m.curve_function();
    for index in m.layout.curve_indices() {
        let start = m.curve_start(FIRST, stride, index);
        bindings = bindings.curve(CurveBindings {
            index,
            read_only: index == OPERATING_CURVE,
            points: m.xy_points(start + PT, ValueType::I16, ValueType::I16),
            active_points: Some(m.at(start, ValueType::U16)),
            dependent_ref: m.dependent_ref(start + 1, &REACTIVE_REFS),
            response_time: None,
        });
    }
    builder.function(FunctionKind::WattVar, bindings)
}

fn freq_droop(builder: RegisterMapBuilder, m: &Model<'_>) -> RegisterMapBuilder {
    use droop::*;
    let ctl = CTL + (STAGED_CURVE as u32 - 1) * CTL_LEN;
    let bindings = FunctionBindings::new(m.enable())
        .scalar(scalar::DB_OF, m.scaled(ctl + DB_OF, ValueType::U32, DB_SF))
        .scalar(scalar::DB_UF, m.scaled(ctl + DB_UF, ValueType::U32, DB_SF))
        .scalar(scalar::K_OF, m.scaled(ctl + K_OF, ValueType::U16, K_SF))
        .scalar(scalar::K_UF, m.scaled(ctl + K_UF, ValueType::U16, K_SF))
        .scalar(scalar::RSP_TMS, m.scaled(ctl + RSP_TMS, ValueType::U32, RSP_TMS_SF))
        .timers(None, None, Some(m.at(RVRT_TMS, ValueType::U32)))
        .adoption(m.adoption(STAGED_CURVE));
    builder.function(FunctionKind::FreqWattDroop, bindings)
}

/// Registers per trip curve point: the voltage or frequency, then a 32 bit time.
fn trip_point_len(y: ValueType) -> u32 {
    y.word_count() as u32 + 2
}

fn trip_curves(m: &Model<'_>, y: ValueType, group: TripGroup) -> FunctionBindings {
    let n = m.layout.points;
    let point_len = trip_point_len(y);
    let group_len = 1 + n * point_len;
    let set_len = 1 + 3 * group_len;

    let mut bindings = FunctionBindings::new(m.enable()).adoption(m.adoption(STAGED_CURVE));
    for index in m.layout.curve_indices() {
        let active_points = m.curve_start(trip::CRV, set_len, index) + 1 + group as u32 * group_len;
        let first_point = active_points + 1;
        let points = PointStorage::Registers {
            x: (0..n)
                .map(|i| {
                    let offset = first_point + i * point_len + y.word_count() as u32;
                    m.scaled(offset, ValueType::U32, trip::TMS_SF)
                })
                .collect(),
            y: (0..n)
                .map(|i| m.scaled(first_point + i * point_len, y, trip::Y_SF))
                .collect(),
        };
        bindings = bindings.curve(CurveBindings {
            index,
            read_only: index == OPERATING_CURVE,
            points,
            active_points: Some(m.at(active_points, ValueType::U16)),
            dependent_ref: None,
            response_time: None,
        });
    }
    bindings
}

fn trip(builder: RegisterMapBuilder, m: &Model<'_>) -> RegisterMapBuilder {
    match m.id {
        model::TRIP_LV => builder
            .function(
                FunctionKind::LvRideThrough,
                trip_curves(m, ValueType::U16, TripGroup::MustTrip),
            )
            .function(
                FunctionKind::MomentaryCessationLv,
                trip_curves(m, ValueType::U16, TripGroup::MomCess),
            ),
        model::TRIP_HV => builder
            .function(
                FunctionKind::HvRideThrough,
                trip_curves(m, ValueType::U16, TripGroup::MustTrip),
            )
            .function(
                FunctionKind::MomentaryCessationHv,
                trip_curves(m, ValueType::U16, TripGroup::MomCess),
            ),
        model::TRIP_LF => builder.function(
            FunctionKind::LfRideThrough,
            trip_curves(m, ValueType::U32, TripGroup::MustTrip),
        ),
        _ => builder.function(
            FunctionKind::HfRideThrough,
            trip_curves(m, ValueType::U32, TripGroup::MustTrip),
        ),
    }
}

fn enter_service(builder: RegisterMapBuilder, m: &Model<'_>) -> RegisterMapBuilder {
    use enter_service::*;
    let bindings = FunctionBindings::new(m.enable())
        .scalar(scalar::ES_V_HI, m.scaled(ES_V_HI, ValueType::U16, V_SF))
        .scalar(scalar::ES_V_LO, m.scaled(ES_V_LO, ValueType::U16, V_SF))
        .scalar(scalar::ES_HZ_HI, m.scaled(ES_HZ_HI, ValueType::U32, HZ_SF))
        .scalar(scalar::ES_HZ_LO, m.scaled(ES_HZ_LO, ValueType::U32, HZ_SF))
        .scalar(scalar::ES_DLY_TMS, m.at(ES_DLY_TMS, ValueType::U32))
        .scalar(scalar::ES_RND_TMS, m.at(ES_RND_TMS, ValueType::U32))
        .scalar(scalar::ES_RMP_TMS, m.at(ES_RMP_TMS, ValueType::U32));
    builder.function(FunctionKind::EnterService, bindings)
}

fn ac_controls(builder: RegisterMapBuilder, m: &Model<'_>) -> RegisterMapBuilder {
    use ac_controls::*;
    let flag = |offset| EnableBinding::flag(m.at(offset, ValueType::U16));
    let revert = |offset| Some(m.at(offset, ValueType::U32));
    builder
        .function(
            FunctionKind::ConstantPf,
            FunctionBindings::new(flag(PF_W_INJ_ENA))
                .scalar(scalar::PF, m.scaled(PF_W_INJ_PF, ValueType::U16, PF_SF))
                .timers(None, None, revert(PF_W_INJ_RVRT_TMS)),
        )
        .function(
            FunctionKind::ActivePowerLimit,
            FunctionBindings::new(flag(W_MAX_LIM_PCT_ENA))
                .scalar(
                    scalar::W_MAX_PCT,
                    m.scaled(W_MAX_LIM_PCT, ValueType::U16, W_MAX_LIM_PCT_SF),
                )
                .timers(None, None, revert(W_MAX_LIM_PCT_RVRT_TMS)),
        )
        .function(
            FunctionKind::ReactivePowerLimit,
            FunctionBindings::new(flag(VAR_SET_ENA))
                .scalar(scalar::VAR_PCT, m.scaled(VAR_SET_PCT, ValueType::I16, VAR_SET_PCT_SF))
                .timers(None, None, revert(VAR_SET_RVRT_TMS)),
        )
        .sign(
            SignFamily::PowerFactor,
            SignConvention::ExcitationCode {
                code: m.at(PF_W_INJ_EXT, ValueType::U16),
                injecting: 0.0,
                absorbing: 1.0,
            },
        )
        .sign(SignFamily::ReactivePower, SignConvention::PositiveInjecting)
}

fn monitoring(builder: RegisterMapBuilder, m: &Model<'_>) -> RegisterMapBuilder {
    use measurements::*;
    let mut builder = builder
        .status(StatusFamily::Alarms, m.at(ALRM, ValueType::U32).read_only())
        .measurement(Measurand::W, m.scaled(W, ValueType::I16, W_SF))
        .measurement(Measurand::Var, m.scaled(VAR, ValueType::I16, VAR_SF))
        .measurement(Measurand::Hz, m.scaled(HZ, ValueType::U32, HZ_SF));
    for (measurand, offset) in Measurand::PHASE_VOLTAGES.into_iter().zip([V_L1, V_L2, V_L3]) {
        builder = builder.measurement(measurand, m.scaled(offset, ValueType::U16, V_SF));
    }
    builder
}

fn nameplate(builder: RegisterMapBuilder, m: &Model<'_>) -> RegisterMapBuilder {
    use nameplate::*;
    let ratings = [
        (Rating::WMax, W_MAX_RTG, W_SF),
        (Rating::WOverExcited, W_OVR_EXT_RTG, W_SF),
        (Rating::PfOverExcited, W_OVR_EXT_RTG_PF, PF_SF),
        (Rating::WUnderExcited, W_UND_EXT_RTG, W_SF),
        (Rating::PfUnderExcited, W_UND_EXT_RTG_PF, PF_SF),
        (Rating::VaMax, VA_MAX_RTG, VA_SF),
        (Rating::VarMaxInjected, VAR_MAX_INJ_RTG, VAR_SF),
        (Rating::VarMaxAbsorbed, VAR_MAX_ABS_RTG, VAR_SF),
        (Rating::WChargeMax, W_CHA_RTE_MAX_RTG, W_SF),
        (Rating::VaChargeMax, VA_CHA_RTE_MAX_RTG, VA_SF),
        (Rating::VNom, V_NOM_RTG, V_SF),
        (Rating::VMax, V_MAX_RTG, V_SF),
        (Rating::VMin, V_MIN_RTG, V_SF),
    ];
    ratings.into_iter().fold(builder, |builder, (rating, offset, sf)| {
        builder.rating(rating, m.scaled(offset, ValueType::U16, sf))
    })
}

fn model_len(id: u16, layout: &Layout) -> Option<u32> {
    let n = layout.points;
    let c = layout.curves as u32;
    let len = match id {
        model::MEASUREMENTS_AC => measurements::LEN,
        model::NAMEPLATE => nameplate::LEN,
        model::ENTER_SERVICE => enter_service::LEN,
        model::AC_CONTROLS => ac_controls::LEN,
        model::VOLT_VAR => 15 + c * (10 + 2 * n),
        model::VOLT_WATT => 15 + c * (5 + 2 * n),
        model::WATT_VAR => 14 + c * (4 + 2 * n),
        model::FREQ_DROOP => droop::CTL + c * droop::CTL_LEN,
        model::TRIP_LV | model::TRIP_HV => trip::CRV + c * (1 + 3 * (1 + n * trip_point_len(ValueType::U16))),
        model::TRIP_LF | model::TRIP_HF => trip::CRV + c * (1 + 3 * (1 + n * trip_point_len(ValueType::U32))),
        _ => return None,
    };
    Some(len)
}

pub fn register_map(params: &ConnectionParams) -> Result<RegisterMap> {
    if params.models.is_empty() {
        return Err(Error::Config(
            "SunSpec needs the address of at least one DER model".into(),
        ));
    }
    let layout = Layout::new(params)?;

    let mut builder = RegisterMap::builder("SunSpec");
    for (&id, &base) in &params.models {
        let Some(len) = model_len(id, &layout) else {
            debug!(model = id, "model not used");
            continue;
        };
        let m = Model::new(id, base, len, &layout)?;
        builder = match id {
            model::MEASUREMENTS_AC => monitoring(builder, &m),
            model::NAMEPLATE => nameplate(builder, &m),
            model::ENTER_SERVICE => enter_service(builder, &m),
            model::AC_CONTROLS => ac_controls(builder, &m),
            model::VOLT_VAR => volt_var(builder, &m),
            model::VOLT_WATT => volt_watt(builder, &m),
            model::WATT_VAR => watt_var(builder, &m),
            model::FREQ_DROOP => freq_droop(builder, &m),
            _ => trip(builder, &m),
        };
    }
    Ok(builder.build())
}
