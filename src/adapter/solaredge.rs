//! SolarEdge inverters.
//!
//! Power control goes through SolarEdge's proprietary block at `0xF000`. One switch,
//! `AdvancedPwrControlEn`, gates every function, so enabling either function here enables
//! both and disabling one disables the other.

use crate::{
    config::ConnectionParams,
    error::Result,
    function::{FunctionKind, SignFamily, scalar},
    register::{EnableBinding, FunctionBindings, RegisterBinding, RegisterMap, SignConvention, ValueType},
};

/// __R/W__ - Active power limit, percent of nominal.
const ACTIVE_POWER_LIMIT: u16 = 0xF001;
/// __R/W__ - Power factor setpoint, float. Negative is over-excited.
const COS_PHI: u16 = 0xF002;
/// __R/W__ - Advanced power control, 0 = off, 1 = on.
const ADVANCED_PWR_CONTROL_EN: u16 = 0xF142;

pub fn register_map(_params: &ConnectionParams) -> Result<RegisterMap> {
    let advanced = || EnableBinding::flag(RegisterBinding::holding(ADVANCED_PWR_CONTROL_EN, ValueType::I32));
    Ok(RegisterMap::builder("SolarEdge")
        .function(
            FunctionKind::ConstantPf,
            FunctionBindings::new(advanced())
                .scalar(scalar::PF, RegisterBinding::holding(COS_PHI, ValueType::F32)),
        )
        .function(
            FunctionKind::ActivePowerLimit,
            FunctionBindings::new(advanced()).scalar(
                scalar::W_MAX_PCT,
                RegisterBinding::holding(ACTIVE_POWER_LIMIT, ValueType::U16),
            ),
        )
        .sign(SignFamily::PowerFactor, SignConvention::NegativeInjecting)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapter::DeviceAdapter,
        function::{Excitation, GridSupportFunction},
        mock_transport::{MockTransport, Op},
    };

    fn adapter() -> (DeviceAdapter, MockTransport) {
        let mock = MockTransport::new();
        let map = register_map(&ConnectionParams::default()).unwrap();
        (DeviceAdapter::new("SolarEdge", map, Box::new(mock.clone())), mock)
    }

    #[test]
    fn test_constant_pf_float() {
        let (adapter, mock) = adapter();
        let f = GridSupportFunction::new(FunctionKind::ConstantPf)
            .enabled(true)
            .with_scalar(scalar::PF, 0.875)
            .with_excitation(Excitation::Injecting);
        adapter.write_function(&f).unwrap();

        let bits = (-0.875f32).to_bits();
        assert_eq!(
            mock.writes(),
            vec![
                Op::Registers {
                    address: COS_PHI,
                    words: vec![(bits >> 16) as u16, bits as u16]
                },
                Op::Registers {
                    address: ADVANCED_PWR_CONTROL_EN,
                    words: vec![0, 1]
                },
            ]
        );
        assert_eq!(adapter.read_function(FunctionKind::ConstantPf).unwrap(), f);
    }

    #[test]
    fn test_active_power_limit() {
        let (adapter, mock) = adapter();
        let f = GridSupportFunction::new(FunctionKind::ActivePowerLimit)
            .enabled(true)
            .with_scalar(scalar::W_MAX_PCT, 75.0);
        adapter.write_function(&f).unwrap();

        // The limit goes to its own register, not over the power factor.
        assert_eq!(mock.write_addresses(), vec![ACTIVE_POWER_LIMIT, ADVANCED_PWR_CONTROL_EN]);
        assert_eq!(mock.register(ACTIVE_POWER_LIMIT), 75);
        assert_eq!(mock.register(COS_PHI), 0);
        assert_eq!(adapter.read_function(FunctionKind::ActivePowerLimit).unwrap(), f);
    }

    #[test]
    fn test_shared_enable() {
        let (adapter, _mock) = adapter();
        let f = GridSupportFunction::new(FunctionKind::ActivePowerLimit)
            .enabled(true)
            .with_scalar(scalar::W_MAX_PCT, 75.0);
        adapter.write_function(&f).unwrap();
        assert!(adapter.read_function(FunctionKind::ConstantPf).unwrap().enabled);

        adapter
            .write_function(&GridSupportFunction::new(FunctionKind::ConstantPf))
            .unwrap();
        assert!(!adapter.read_function(FunctionKind::ActivePowerLimit).unwrap().enabled);
    }

    #[test]
    fn test_supported() {
        let (adapter, _mock) = adapter();
        let supported: Vec<_> = adapter.supported().collect();
        assert_eq!(supported, vec![FunctionKind::ConstantPf, FunctionKind::ActivePowerLimit]);
    }
}
