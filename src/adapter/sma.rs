//! SMA inverters.
//!
//! SMA uses its own register layout with enumerated codes instead of flags: `303` is "off"
//! everywhere, the mode selector at 40200 picks the reactive power mode, and the excitation
//! of a fixed power factor lives in its own register. Curve coordinates are per-unit with
//! three decimals, which is percent with one.
//!
//! Register addresses differ between the Sunny Boy and Sunny Tripower firmware, picked by
//! the `firmware` connection parameter.

use crate::{
    config::ConnectionParams,
    monitor::Measurand,
    curve::DependentRef,
    error::{Error, Result},
    function::{FunctionKind, SignFamily, scalar},
    register::{
        Access, CurveBindings, DependentRefBinding, EnableBinding, FunctionBindings, PointStorage,
        RegisterBinding, RegisterMap, SignConvention, ValueType,
    },
};

/// Sunny Boy firmware.
pub const SB_FIRMWARE: &str = "02.02.30.R";
/// Sunny Tripower firmware.
pub const STP_FIRMWARE: &str = "02.83.03.R";

/// Generic "off" code.
const OFF: f64 = 303.0;
/// Characteristic curve "on" code.
const CURVE_ON: f64 = 308.0;

/// __R/W__ - Reactive power mode selector, shared by fixed power factor and volt-var.
const Q_MODE: u16 = 40200;
/// `Q_MODE` code for cos phi setpoint.
const Q_MODE_COS_PHI: f64 = 1074.0;
/// __R/W__ - cos phi setpoint, SF -2.
const COS_PHI: u16 = 40206;
/// __R/W__ - cos phi excitation.
const COS_PHI_EXCITATION: u16 = 40208;
const OVER_EXCITED: f64 = 1041.0;
const UNDER_EXCITED: f64 = 1042.0;

/// __R/W__ - Active power limitation on (802) or off (803).
const W_LIM_ENA: u16 = 40151;
const W_LIM_ON: f64 = 802.0;
const W_LIM_OFF: f64 = 803.0;
/// __R/W__ - Active power setpoint, percent of Pmax.
const W_LIM_PCT: u16 = 40016;

/// __W__ - Grid guard code login.
const GRID_GUARD: u16 = 43090;

/// __R__ - Measurements, all two registers wide.
const W: u16 = 30775;
const V_L1: u16 = 30783;
const V_L2: u16 = 30785;
const V_L3: u16 = 30787;
const HZ: u16 = 30803;
const VAR: u16 = 30805;

/// Dependent reference code for "var in percent of Pmax".
const VAR_PCT_PMAX: f64 = 1977.0;

/// Firmware specific volt-var registers.
struct VoltVarLayout {
    /// `Q_MODE` code for Q(U).
    mode: f64,
    /// Extra switches, e.g. curve mode, written before the curve enable.
    extra: &'static [(u16, f64, f64)],
    curves: &'static [VoltVarCurve],
    /// Which curve is in effect.
    active_curve: Option<u16>,
}

struct VoltVarCurve {
    x: &'static [u16],
    y: &'static [u16],
    points: u16,
    dependent_ref: u16,
    enable: u16,
}

const fn stride<const N: usize>(start: u16) -> [u16; N] {
    let mut regs = [0u16; N];
    let mut i = 0;
    while i < N {
        regs[i] = start + 2 * i as u16;
        i += 1;
    }
    regs
}

const SB_X1: [u16; 12] = stride(40282);
const SB_Y1: [u16; 12] = stride(40306);
const SB_X2: [u16; 12] = stride(40330);
const SB_Y2: [u16; 12] = stride(40354);
const SB_X3: [u16; 12] = stride(40378);
const SB_Y3: [u16; 12] = stride(40402);

const SB_VOLT_VAR: VoltVarLayout = VoltVarLayout {
    mode: 1069.0,
    extra: &[],
    curves: &[
        VoltVarCurve {
            x: &SB_X1,
            y: &SB_Y1,
            points: 40262,
            dependent_ref: 40977,
            enable: 40937,
        },
        VoltVarCurve {
            x: &SB_X2,
            y: &SB_Y2,
            points: 40264,
            dependent_ref: 40979,
            enable: 40939,
        },
        VoltVarCurve {
            x: &SB_X3,
            y: &SB_Y3,
            points: 40266,
            dependent_ref: 40981,
            enable: 40941,
        },
    ],
    active_curve: Some(40260),
};

const STP_VOLT_VAR: VoltVarLayout = VoltVarLayout {
    mode: 2269.0,
    extra: &[(41061, 2.0, 2.0)],
    curves: &[VoltVarCurve {
        x: &[41077, 41081, 41085, 41089],
        y: &[41079, 41083, 41087, 41091],
        points: 41071,
        dependent_ref: 41075,
        enable: 41063,
    }],
    active_curve: None,
};

fn volt_var(layout: &VoltVarLayout) -> FunctionBindings {
    let u32_reg = |address| RegisterBinding::holding(address, ValueType::U32);
    let point = |address| RegisterBinding::holding(address, ValueType::I32).fixed_scale(-1);

    let mut enables = layout
        .curves
        .iter()
        .map(|curve| EnableBinding::new(u32_reg(curve.enable), CURVE_ON, OFF));
    // The first curve's switch is the main one, everything else goes before it.
    let mut bindings = match enables.next() {
        Some(main) => FunctionBindings::new(main),
        None => FunctionBindings::new(EnableBinding::new(u32_reg(Q_MODE), layout.mode, OFF).shared()),
    };
    bindings = bindings.also_enable(EnableBinding::new(u32_reg(Q_MODE), layout.mode, OFF).shared());
    for (address, on, off) in layout.extra {
        bindings = bindings.also_enable(EnableBinding::new(u32_reg(*address), *on, *off));
    }
    for enable in enables {
        bindings = bindings.also_enable(enable);
    }

    for (i, curve) in layout.curves.iter().enumerate() {
        bindings = bindings.curve(CurveBindings {
            index: i as u8 + 1,
            read_only: false,
            points: PointStorage::Registers {
                x: curve.x.iter().map(|a| point(*a)).collect(),
                y: curve.y.iter().map(|a| point(*a)).collect(),
            },
            active_points: Some(u32_reg(curve.points)),
            dependent_ref: Some(DependentRefBinding {
                binding: u32_reg(curve.dependent_ref),
                codes: vec![(DependentRef::WMaxPct, VAR_PCT_PMAX)],
            }),
            response_time: None,
        });
    }
    if let Some(address) = layout.active_curve {
        bindings = bindings.active_curve(u32_reg(address));
    }
    bindings
}

pub fn register_map(params: &ConnectionParams) -> Result<RegisterMap> {
    let layout = match params.firmware.as_deref() {
        None | Some(SB_FIRMWARE) => &SB_VOLT_VAR,
        Some(STP_FIRMWARE) => &STP_VOLT_VAR,
        Some(other) => {
            return Err(Error::Config(format!(
                "unknown SMA firmware '{other}', expected {SB_FIRMWARE} or {STP_FIRMWARE}"
            )));
        }
    };

    let mut builder = RegisterMap::builder("SMA")
        .function(
            FunctionKind::ConstantPf,
            FunctionBindings::new(EnableBinding::new(
                RegisterBinding::holding(Q_MODE, ValueType::U32),
                Q_MODE_COS_PHI,
                OFF,
            )
            .shared())
            .scalar(
                scalar::PF,
                RegisterBinding::holding(COS_PHI, ValueType::U32).fixed_scale(-2),
            ),
        )
        .function(FunctionKind::VoltVar, volt_var(layout))
        .function(
            FunctionKind::ActivePowerLimit,
            FunctionBindings::new(EnableBinding::new(
                RegisterBinding::holding(W_LIM_ENA, ValueType::U32),
                W_LIM_ON,
                W_LIM_OFF,
            ))
            .scalar(scalar::W_MAX_PCT, RegisterBinding::holding(W_LIM_PCT, ValueType::I16)),
        )
        .sign(
            SignFamily::PowerFactor,
            SignConvention::ExcitationCode {
                code: RegisterBinding::holding(COS_PHI_EXCITATION, ValueType::U32),
                injecting: OVER_EXCITED,
                absorbing: UNDER_EXCITED,
            },
        )
        .measurement(Measurand::W, RegisterBinding::holding(W, ValueType::I32))
        .measurement(Measurand::Var, RegisterBinding::holding(VAR, ValueType::I32))
        .measurement(Measurand::Hz, RegisterBinding::holding(HZ, ValueType::U32).fixed_scale(-2));
    for (measurand, address) in Measurand::PHASE_VOLTAGES.into_iter().zip([V_L1, V_L2, V_L3]) {
        builder = builder.measurement(measurand, RegisterBinding::holding(address, ValueType::U32).fixed_scale(-2));
    }
    if let Some(code) = params.grid_guard_code {
        let mut login = RegisterBinding::holding(GRID_GUARD, ValueType::U32);
        login.access = Access::Write;
        builder = builder.login(login, code as f64);
    }
    Ok(builder.build())
}
