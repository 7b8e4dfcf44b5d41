//! Fronius inverters.
//!
//! Controls live in the SunSpec legacy immediate controls block (model 123) and status in
//! model 122, directly below it. Fronius doesn't publish scale-factor registers for these,
//! the factors are fixed by the firmware.
//!
//! Ratings come from the nameplate block (model 120) and measurements from the float
//! inverter block (model 113), both at fixed distances below model 123.

use crate::{
    bitfield::StatusFamily,
    config::ConnectionParams,
    error::{Error, Result},
    function::{FunctionKind, SignFamily, scalar},
    monitor::{Measurand, Rating},
    register::{EnableBinding, FunctionBindings, RegisterBinding, RegisterMap, SignConvention, ValueType},
};

/// Address of the model 123 ID register when none is configured.
pub const DEFAULT_BASE: u16 = 40237;
/// Model 122 starts this many registers before model 123.
const STATUS_OFFSET: u16 = 46;
/// Model 120 starts this many registers before model 123.
const NAMEPLATE_OFFSET: u16 = 106;
/// Model 113 starts this many registers before model 123.
const MEASUREMENTS_OFFSET: u16 = 168;
/// Length of model 123, ID and length registers included.
const CONTROLS_LEN: u16 = 26;

/// Register offsets within model 123.
mod controls {
    /// __R/W__ - Connect/disconnect, 1 = connected.
    pub const CONN: u16 = 4;
    /// __R/W__ - Active power limit, percent of WMax, SF -2.
    pub const WMAX_LIM_PCT: u16 = 5;
    pub const WMAX_LIM_PCT_WIN_TMS: u16 = 6;
    pub const WMAX_LIM_PCT_RVRT_TMS: u16 = 7;
    pub const WMAX_LIM_PCT_RMP_TMS: u16 = 8;
    pub const WMAX_LIM_ENA: u16 = 9;
    /// __R/W__ - Power factor setpoint, SF -3, negative is over-excited.
    pub const OUT_PF_SET: u16 = 10;
    pub const OUT_PF_SET_WIN_TMS: u16 = 11;
    pub const OUT_PF_SET_RVRT_TMS: u16 = 12;
    pub const OUT_PF_SET_RMP_TMS: u16 = 13;
    pub const OUT_PF_SET_ENA: u16 = 14;
    /// __R/W__ - Reactive power, percent of VArMax, SF -1.
    pub const VAR_MAX_PCT: u16 = 16;
    pub const VAR_PCT_WIN_TMS: u16 = 18;
    pub const VAR_PCT_RVRT_TMS: u16 = 19;
    pub const VAR_PCT_RMP_TMS: u16 = 20;
    /// __R/W__ - Which reactive power setpoint is in effect.
    pub const VAR_PCT_MOD: u16 = 21;
    pub const VAR_PCT_ENA: u16 = 22;
}

/// Register offsets within model 122.
mod status {
    pub const PV_CONN: u16 = 2;
    pub const STOR_CONN: u16 = 3;
    pub const ECP_CONN: u16 = 4;
    /// __R__ - Active controls, two registers.
    pub const ST_ACT_CTL: u16 = 35;
}

/// Register offsets within model 120.
mod nameplate {
    pub const W_RTG: u16 = 3;
    pub const W_RTG_SF: u16 = 4;
    pub const VA_RTG: u16 = 5;
    pub const VA_RTG_SF: u16 = 6;
    /// Quadrant 1 is injecting, quadrant 4 absorbing and negative.
    pub const VAR_RTG_Q1: u16 = 7;
    pub const VAR_RTG_Q4: u16 = 10;
    pub const VAR_RTG_SF: u16 = 11;
    pub const PF_RTG_Q1: u16 = 14;
    pub const PF_RTG_Q4: u16 = 17;
    pub const PF_RTG_SF: u16 = 18;
    pub const MAX_CHA_RTE: u16 = 23;
    pub const MAX_CHA_RTE_SF: u16 = 24;
}

/// Register offsets within model 113, every value a 32 bit float.
mod measurements {
    pub const PH_V_A: u16 = 16;
    pub const PH_V_B: u16 = 18;
    pub const PH_V_C: u16 = 20;
    pub const W: u16 = 22;
    pub const HZ: u16 = 24;
    pub const VAR: u16 = 28;
}

/// `VArPct_Mod` value selecting the percent-of-VArMax setpoint.
const VAR_PCT_MOD_VAR_MAX: f64 = 2.0;

pub fn register_map(params: &ConnectionParams) -> Result<RegisterMap> {
    let base = params.base_address.unwrap_or(DEFAULT_BASE);
    if base < MEASUREMENTS_OFFSET || base.checked_add(CONTROLS_LEN).is_none() {
        return Err(Error::Config(format!("Fronius model 123 address {base} out of range")));
    }
    let reg = |offset: u16, value_type| RegisterBinding::holding(base + offset, value_type);
    let timer = |offset: u16| Some(reg(offset, ValueType::U16));
    let status_base = base - STATUS_OFFSET;
    let monitor = |offset: u16, value_type| RegisterBinding::holding(status_base + offset, value_type).read_only();
    let nameplate_base = base - NAMEPLATE_OFFSET;
    let rating = |offset: u16, value_type, sf: u16| {
        RegisterBinding::holding(nameplate_base + offset, value_type).scale_register(nameplate_base + sf)
    };
    let measured = |offset: u16| RegisterBinding::holding(base - MEASUREMENTS_OFFSET + offset, ValueType::F32);

    use controls::*;
    let mut builder = RegisterMap::builder("Fronius")
        .function(
            FunctionKind::ConstantPf,
            FunctionBindings::new(EnableBinding::flag(reg(OUT_PF_SET_ENA, ValueType::U16)))
                .scalar(scalar::PF, reg(OUT_PF_SET, ValueType::I16).fixed_scale(-3))
                .timers(
                    timer(OUT_PF_SET_WIN_TMS),
                    timer(OUT_PF_SET_RMP_TMS),
                    timer(OUT_PF_SET_RVRT_TMS),
                ),
        )
        .function(
            FunctionKind::ActivePowerLimit,
            FunctionBindings::new(EnableBinding::flag(reg(WMAX_LIM_ENA, ValueType::U16)))
                .scalar(scalar::W_MAX_PCT, reg(WMAX_LIM_PCT, ValueType::U16).fixed_scale(-2))
                .timers(
                    timer(WMAX_LIM_PCT_WIN_TMS),
                    timer(WMAX_LIM_PCT_RMP_TMS),
                    timer(WMAX_LIM_PCT_RVRT_TMS),
                ),
        )
        .function(
            FunctionKind::ReactivePowerLimit,
            FunctionBindings::new(EnableBinding::flag(reg(VAR_PCT_ENA, ValueType::U16)))
                .also_enable(EnableBinding::new(
                    reg(VAR_PCT_MOD, ValueType::U16),
                    VAR_PCT_MOD_VAR_MAX,
                    VAR_PCT_MOD_VAR_MAX,
                ))
                .scalar(scalar::VAR_PCT, reg(VAR_MAX_PCT, ValueType::I16).fixed_scale(-1))
                .timers(timer(VAR_PCT_WIN_TMS), timer(VAR_PCT_RMP_TMS), timer(VAR_PCT_RVRT_TMS)),
        )
        .function(
            FunctionKind::EnterService,
            FunctionBindings::new(EnableBinding::flag(reg(CONN, ValueType::U16))),
        )
        .sign(SignFamily::PowerFactor, SignConvention::NegativeInjecting)
        .sign(SignFamily::ReactivePower, SignConvention::PositiveInjecting)
        .status(StatusFamily::PvConnection, monitor(status::PV_CONN, ValueType::U16))
        .status(StatusFamily::StorageConnection, monitor(status::STOR_CONN, ValueType::U16))
        .status(StatusFamily::EcpConnection, monitor(status::ECP_CONN, ValueType::U16))
        .status(StatusFamily::ActiveControls, monitor(status::ST_ACT_CTL, ValueType::U32));

    use nameplate::*;
    builder = builder
        .rating(Rating::WMax, rating(W_RTG, ValueType::U16, W_RTG_SF))
        .rating(Rating::VaMax, rating(VA_RTG, ValueType::U16, VA_RTG_SF))
        .rating(Rating::VarMaxInjected, rating(VAR_RTG_Q1, ValueType::I16, VAR_RTG_SF))
        .rating(Rating::VarMaxAbsorbed, rating(VAR_RTG_Q4, ValueType::I16, VAR_RTG_SF))
        .rating(Rating::PfOverExcited, rating(PF_RTG_Q1, ValueType::I16, PF_RTG_SF))
        .rating(Rating::PfUnderExcited, rating(PF_RTG_Q4, ValueType::I16, PF_RTG_SF))
        .rating(Rating::WChargeMax, rating(MAX_CHA_RTE, ValueType::U16, MAX_CHA_RTE_SF));

    use measurements::*;
    builder = builder
        .measurement(Measurand::W, measured(W))
        .measurement(Measurand::Var, measured(VAR))
        .measurement(Measurand::Hz, measured(HZ));
    for (measurand, offset) in Measurand::PHASE_VOLTAGES.into_iter().zip([PH_V_A, PH_V_B, PH_V_C]) {
        builder = builder.measurement(measurand, measured(offset));
    }
    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapter::DeviceAdapter,
        function::{Excitation, GridSupportFunction},
        mock_transport::{MockTransport, Op},
    };

    const BASE: u16 = DEFAULT_BASE;

    fn adapter() -> (DeviceAdapter, MockTransport) {
        let mock = MockTransport::new();
        let map = register_map(&ConnectionParams::default()).unwrap();
        (DeviceAdapter::new("Fronius", map, Box::new(mock.clone())), mock)
    }

    #[test]
    fn test_constant_pf_injecting() {
        let (adapter, mock) = adapter();
        let f = GridSupportFunction::new(FunctionKind::ConstantPf)
            .enabled(true)
            .with_scalar(scalar::PF, 0.95)
            .with_excitation(Excitation::Injecting)
            .with_window_time(5.0)
            .with_ramp_time(10.0)
            .with_revert_time(30.0);
        adapter.write_function(&f).unwrap();

        assert_eq!(mock.register(BASE + 10), 0xFC4A);
        assert_eq!(
            mock.writes(),
            vec![
                Op::Registers {
                    address: BASE + 10,
                    words: vec![0xFC4A, 5]
                },
                Op::Registers {
                    address: BASE + 13,
                    words: vec![10]
                },
                Op::Registers {
                    address: BASE + 12,
                    words: vec![30]
                },
                Op::Registers {
                    address: BASE + 14,
                    words: vec![1]
                },
            ]
        );

        assert_eq!(adapter.read_function(FunctionKind::ConstantPf).unwrap(), f);
    }

    #[test]
    fn test_constant_pf_absorbing_is_positive() {
        let (adapter, mock) = adapter();
        let f = GridSupportFunction::new(FunctionKind::ConstantPf)
            .enabled(true)
            .with_scalar(scalar::PF, 0.9)
            .with_excitation(Excitation::Absorbing);
        adapter.write_function(&f).unwrap();
        assert_eq!(mock.register(BASE + 10), 900);
    }

    #[test]
    fn test_reactive_power_positive_injecting() {
        let (adapter, mock) = adapter();
        let f = GridSupportFunction::new(FunctionKind::ReactivePowerLimit)
            .enabled(true)
            .with_scalar(scalar::VAR_PCT, 20.0)
            .with_excitation(Excitation::Absorbing);
        adapter.write_function(&f).unwrap();

        assert_eq!(mock.write_addresses(), vec![BASE + 16, BASE + 21, BASE + 22]);
        assert_eq!(mock.register(BASE + 16), (-200i16) as u16);
        assert_eq!(mock.register(BASE + 21), 2);

        let read = adapter.read_function(FunctionKind::ReactivePowerLimit).unwrap();
        assert!(read.enabled);
        assert_eq!(read.excitation, Some(Excitation::Absorbing));
        assert_eq!(read.scalar(scalar::VAR_PCT), Some(20.0));
    }

    #[test]
    fn test_active_power_limit() {
        let (adapter, mock) = adapter();
        let f = GridSupportFunction::new(FunctionKind::ActivePowerLimit)
            .enabled(true)
            .with_scalar(scalar::W_MAX_PCT, 42.5);
        adapter.write_function(&f).unwrap();
        assert_eq!(mock.write_addresses(), vec![BASE + 5, BASE + 9]);
        assert_eq!(mock.register(BASE + 5), 4250);
    }

    #[test]
    fn test_connection_status() {
        let (adapter, mock) = adapter();
        mock.set_register(BASE - 46 + 2, 0b0101);
        let flags = adapter.read_flags(StatusFamily::PvConnection).unwrap();
        assert!(flags["connected"]);
        assert!(!flags["available"]);
        assert!(flags["operating"]);

        // StActCtl spans two registers.
        mock.set_registers(BASE - 46 + 35, &[0, 1 << 2]);
        let controls = adapter.read_flags(StatusFamily::ActiveControls).unwrap();
        assert!(controls["fixed_pf"]);
        assert!(!controls["volt_var"]);
    }

    #[test]
    fn test_nameplate() {
        let (adapter, mock) = adapter();
        let np = BASE - 106;
        // WRtg_SF = 1, VArRtg_SF = 1, PFRtg_SF = -3
        mock.set_register(np + 4, 1);
        mock.set_register(np + 11, 1);
        mock.set_register(np + 18, 0xFFFD);
        mock.set_register(np + 3, 820);
        mock.set_register(np + 7, 440);
        mock.set_register(np + 10, (-440i16) as u16);
        mock.set_register(np + 17, (-850i16) as u16);

        let nameplate = adapter.read_nameplate().unwrap();
        assert_eq!(nameplate.len(), 7);
        assert_eq!(nameplate[&Rating::WMax], 8200.0);
        assert_eq!(nameplate[&Rating::VarMaxInjected], 4400.0);
        assert_eq!(nameplate[&Rating::VarMaxAbsorbed], -4400.0);
        assert_eq!(nameplate[&Rating::PfUnderExcited], -0.85);
    }

    #[test]
    fn test_float_measurements() {
        let (adapter, mock) = adapter();
        let float = |address: u16, value: f32| {
            let bits = value.to_bits();
            mock.set_registers(address, &[(bits >> 16) as u16, bits as u16]);
        };
        let inverter = BASE - 168;
        float(inverter + 22, 4200.0);
        float(inverter + 24, 59.5);
        float(inverter + 28, -1250.0);
        float(inverter + 16, 240.5);

        let read = adapter.read_measurements().unwrap();
        assert_eq!(read[&Measurand::W], 4200.0);
        assert_eq!(read[&Measurand::Hz], 59.5);
        assert_eq!(read[&Measurand::Var], -1250.0);
        assert_eq!(read[&Measurand::VL1], 240.5);
        assert_eq!(read[&Measurand::VL2], 0.0);
    }

    #[test]
    fn test_no_curves() {
        let (adapter, _mock) = adapter();
        assert_eq!(
            adapter.read_function(FunctionKind::VoltVar),
            Err(Error::UnsupportedFunction(FunctionKind::VoltVar))
        );
    }

    #[test]
    fn test_base_address_from_params() {
        let params = ConnectionParams {
            base_address: Some(150),
            ..Default::default()
        };
        assert!(matches!(register_map(&params), Err(Error::Config(_))));

        let params = ConnectionParams {
            base_address: Some(50_000),
            ..Default::default()
        };
        let map = register_map(&params).unwrap();
        let bindings = map.function(FunctionKind::EnterService).unwrap();
        assert_eq!(
            bindings.enable[0].binding,
            RegisterBinding::holding(50_004, ValueType::U16)
        );
    }
}
