//! Hardware-in-the-loop DER model.
//!
//! The simulated inverter is programmed through named model variables instead of registers.
//! Three selectors pick the active function per quantity: `GSF_Q` for reactive power,
//! `GSF_P` for voltage driven active power and `GSF_F` for frequency droop. Curves are
//! vector variables, one for each axis.

use crate::{
    bitfield::StatusFamily,
    config::ConnectionParams,
    error::Result,
    function::{FunctionKind, SignFamily, scalar},
    register::{
        CurveBindings, EnableBinding, FunctionBindings, PointStorage, RegisterBinding, RegisterMap,
        SignConvention,
    },
};

/// `GSF_Q` selector values. The model has no "off": reactive power is released by going
/// back to constant power factor at unity.
mod q_mode {
    pub const CONSTANT_PF: f64 = 1.0;
    pub const VOLT_VAR: f64 = 2.0;
    pub const WATT_VAR: f64 = 3.0;
    pub const CONSTANT_Q: f64 = 4.0;
}

/// `GSF_P` and `GSF_F` selector values.
const P_OFF: f64 = 1.0;
const P_ON: f64 = 2.0;

/// Direction codes of the `*_Ext` variables.
const INJECTING: f64 = 1.0;
const ABSORBING: f64 = 2.0;

const fn var(name: &'static str) -> RegisterBinding {
    RegisterBinding::variable(name)
}

/// Constant power factor setpoints written when `GSF_Q` is released.
const UNITY_PF: &[(RegisterBinding, f64)] = &[
    (var("CPF_AbsSet"), 1.0),
    (var("CPF_InjSet"), 1.0),
    (var("CPF_Ext"), INJECTING),
];

/// Constant power factor at unity has no effect.
const UNITY_PF_IDLE: &[(RegisterBinding, f64)] = &[(var("CPF_Ext"), INJECTING), (var("CPF_InjSet"), 1.0)];

/// Reactive power functions hand priority to reactive power, then select themselves.
fn reactive(mode: f64) -> FunctionBindings {
    let selector = EnableBinding::new(var("GSF_Q"), mode, q_mode::CONSTANT_PF)
        .shared()
        .releasing(UNITY_PF);
    FunctionBindings::new(selector).also_enable(EnableBinding::new(var("Pow_Prio"), 1.0, 1.0))
}

fn vector_curve(x: &'static str, y: &'static str, max_points: usize, response_time: &'static str) -> CurveBindings {
    CurveBindings {
        index: 1,
        read_only: false,
        points: PointStorage::Vectors { x, y, max_points },
        active_points: None,
        dependent_ref: None,
        response_time: Some(var(response_time)),
    }
}

fn split(code: &'static str, injecting: &'static str, absorbing: &'static str) -> SignConvention {
    SignConvention::SplitSetpoint {
        code: var(code),
        injecting: INJECTING,
        absorbing: ABSORBING,
        injecting_setpoint: var(injecting),
        absorbing_setpoint: var(absorbing),
    }
}

pub fn register_map(_params: &ConnectionParams) -> Result<RegisterMap> {
    Ok(RegisterMap::builder("HIL")
        .function(
            FunctionKind::ConstantPf,
            reactive(q_mode::CONSTANT_PF)
                .idle_when(UNITY_PF_IDLE)
                .timers(None, None, Some(var("CPF_RspTms"))),
        )
        .function(
            FunctionKind::VoltVar,
            reactive(q_mode::VOLT_VAR)
                .scalar(scalar::V_REF, var("VV_Vref"))
                .curve(vector_curve("VV_V", "VV_Q", 4, "VV_RspTms")),
        )
        .function(
            FunctionKind::WattVar,
            reactive(q_mode::WATT_VAR).curve(vector_curve("WV_P", "WV_Q", 6, "WV_RspTms")),
        )
        .function(
            FunctionKind::ReactivePowerLimit,
            reactive(q_mode::CONSTANT_Q).timers(None, None, Some(var("CQ_RspTms"))),
        )
        .function(
            FunctionKind::VoltWatt,
            FunctionBindings::new(EnableBinding::new(var("GSF_P"), P_ON, P_OFF))
                .curve(vector_curve("VW_V", "VW_P", 2, "VW_RspTms")),
        )
        .function(
            FunctionKind::FreqWattDroop,
            FunctionBindings::new(EnableBinding::new(var("GSF_F"), P_ON, P_OFF))
                .scalar(scalar::DB_OF, var("FW_dbOF"))
                .scalar(scalar::DB_UF, var("FW_dbUF"))
                .scalar(scalar::K_OF, var("FW_kOF"))
                .scalar(scalar::K_UF, var("FW_kUF"))
                .scalar(scalar::RSP_TMS, var("FW_RspTms")),
        )
        .sign(SignFamily::PowerFactor, split("CPF_Ext", "CPF_InjSet", "CPF_AbsSet"))
        .sign(SignFamily::ReactivePower, split("CQ_Ext", "CQ_InjSet", "CQ_AbsSet"))
        .status(StatusFamily::OperationalState, var("DER_OpState"))
        .status(StatusFamily::ConnectionState, var("DER_ConnState"))
        .status(StatusFamily::Alarms, var("DER_Alarms"))
        .build())
}
