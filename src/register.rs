//! This module is used to describe where a device keeps each function parameter.
//!
//! A [`RegisterMap`] is pure data: one per vendor family, built once when the adapter is
//! opened and never modified afterwards.

use std::collections::BTreeMap;

use crate::{
    bitfield::StatusFamily,
    commit::CommitPolicy,
    curve::DependentRef,
    function::{FunctionKind, SignFamily},
    monitor::{Measurand, Rating},
    scaling::ScaleFactor,
};

/// Wire representation of a value.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ValueType {
    /// __1 register__ - unsigned.
    U16,
    /// __1 register__ - two's complement.
    I16,
    /// __2 registers__ - unsigned, high word first.
    U32,
    /// __2 registers__ - two's complement, high word first.
    I32,
    /// __2 registers__ - IEEE-754 single precision, high word first.
    F32,
    /// Double precision, only carried by HIL variables.
    F64,
}

impl ValueType {
    /// Number of 16 bit registers occupied.
    pub const fn word_count(&self) -> usize {
        match self {
            Self::U16 | Self::I16 => 1,
            Self::U32 | Self::I32 | Self::F32 => 2,
            Self::F64 => 0,
        }
    }

    /// Inclusive raw range for integer types.
    pub const fn integer_range(&self) -> Option<(i64, i64)> {
        match self {
            Self::U16 => Some((0, u16::MAX as i64)),
            Self::I16 => Some((i16::MIN as i64, i16::MAX as i64)),
            Self::U32 => Some((0, u32::MAX as i64)),
            Self::I32 => Some((i32::MIN as i64, i32::MAX as i64)),
            Self::F32 | Self::F64 => None,
        }
    }
}

/// Register access mode.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Access {
    /// __R__
    Read,
    /// __W__
    Write,
    /// __R/W__
    ReadWrite,
}

impl Access {
    pub const fn readable(&self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    pub const fn writable(&self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

/// Where a value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Modbus holding register address.
    Holding(u16),
    /// Named variable of a hardware-in-the-loop model.
    Variable(&'static str),
}

/// How a raw value is scaled into engineering units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    Fixed(ScaleFactor),
    /// SunSpec scale-factor register, read when the value is accessed.
    Register(u16),
}

/// One parameter's location, scale, type and access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterBinding {
    pub location: Location,
    pub scale: Scale,
    pub value_type: ValueType,
    pub access: Access,
}

impl RegisterBinding {
    /// Unscaled read/write holding register.
    pub const fn holding(address: u16, value_type: ValueType) -> Self {
        Self {
            location: Location::Holding(address),
            scale: Scale::Fixed(ScaleFactor::UNITY),
            value_type,
            access: Access::ReadWrite,
        }
    }

    /// Read/write HIL variable.
    pub const fn variable(name: &'static str) -> Self {
        Self {
            location: Location::Variable(name),
            scale: Scale::Fixed(ScaleFactor::UNITY),
            value_type: ValueType::F64,
            access: Access::ReadWrite,
        }
    }

    pub const fn fixed_scale(mut self, exponent: i8) -> Self {
        self.scale = Scale::Fixed(ScaleFactor::new(exponent));
        self
    }

    pub const fn scale_register(mut self, address: u16) -> Self {
        self.scale = Scale::Register(address);
        self
    }

    pub const fn read_only(mut self) -> Self {
        self.access = Access::Read;
        self
    }
}

/// A register that switches something on or off by holding one of two codes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnableBinding {
    pub binding: RegisterBinding,
    pub on: f64,
    pub off: f64,
    /// Mode selector that several functions write their own `on` code to. Switching off
    /// only happens while the register still holds this function's code.
    pub shared: bool,
    /// Written ahead of `off` when switching off.
    pub release: &'static [(RegisterBinding, f64)],
}

impl EnableBinding {
    pub const fn new(binding: RegisterBinding, on: f64, off: f64) -> Self {
        Self {
            binding,
            on,
            off,
            shared: false,
            release: &[],
        }
    }

    /// `1` for on and `0` for off.
    pub const fn flag(binding: RegisterBinding) -> Self {
        Self::new(binding, 1.0, 0.0)
    }

    pub const fn shared(mut self) -> Self {
        self.shared = true;
        self
    }

    pub const fn releasing(mut self, release: &'static [(RegisterBinding, f64)]) -> Self {
        self.release = release;
        self
    }
}

/// How a vendor expresses the direction of a power factor or reactive power setpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignConvention {
    /// Negative setpoint means injecting.
    NegativeInjecting,
    /// Positive setpoint means injecting.
    PositiveInjecting,
    /// Setpoint stays positive, a separate register holds the direction.
    ExcitationCode {
        code: RegisterBinding,
        injecting: f64,
        absorbing: f64,
    },
    /// A direction register plus one setpoint register per direction.
    SplitSetpoint {
        code: RegisterBinding,
        injecting: f64,
        absorbing: f64,
        injecting_setpoint: RegisterBinding,
        absorbing_setpoint: RegisterBinding,
    },
}

/// Dependent reference register and the codes a vendor uses for it.
#[derive(Debug, Clone, PartialEq)]
pub struct DependentRefBinding {
    pub binding: RegisterBinding,
    pub codes: Vec<(DependentRef, f64)>,
}

impl DependentRefBinding {
    pub fn code_of(&self, dependent_ref: DependentRef) -> Option<f64> {
        self.codes.iter().find(|(r, _)| *r == dependent_ref).map(|(_, c)| *c)
    }

    pub fn ref_of(&self, code: f64) -> Option<DependentRef> {
        self.codes.iter().find(|(_, c)| *c == code).map(|(r, _)| *r)
    }
}

/// Where a curve's points are stored.
#[derive(Debug, Clone, PartialEq)]
pub enum PointStorage {
    /// One register per coordinate, listed per point.
    Registers {
        x: Vec<RegisterBinding>,
        y: Vec<RegisterBinding>,
    },
    /// A pair of HIL vector variables holding every x and every y.
    Vectors {
        x: &'static str,
        y: &'static str,
        max_points: usize,
    },
}

impl PointStorage {
    pub fn max_points(&self) -> usize {
        match self {
            Self::Registers { x, y } => x.len().min(y.len()),
            Self::Vectors { max_points, .. } => *max_points,
        }
    }
}

/// Bindings for one curve slot.
#[derive(Debug, Clone, PartialEq)]
pub struct CurveBindings {
    /// 1-based slot number.
    pub index: u8,
    /// Device uses this slot to report the curve in effect.
    pub read_only: bool,
    pub points: PointStorage,
    /// Number of active points. Devices without it use every bound point.
    pub active_points: Option<RegisterBinding>,
    pub dependent_ref: Option<DependentRefBinding>,
    pub response_time: Option<RegisterBinding>,
}

/// Registers used to ask the device to adopt a written curve, and to learn the outcome.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdoptionBindings {
    pub request: RegisterBinding,
    pub result: RegisterBinding,
    pub in_progress: f64,
    pub completed: f64,
    pub failed: f64,
    /// Slot requested for functions which carry no curve.
    pub default_index: u8,
    pub policy: CommitPolicy,
}

/// Everything needed to read or write one function.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionBindings {
    /// Written last, in order. The function reads as enabled only if every entry is on.
    pub enable: Vec<EnableBinding>,
    /// Setpoints that leave the function without effect. While all of them are held the
    /// function reads as disabled, even with every switch on.
    pub idle: &'static [(RegisterBinding, f64)],
    pub scalars: Vec<(&'static str, RegisterBinding)>,
    /// Where a scalar is reported once in effect, when that differs from where it is
    /// written.
    pub readback: Vec<(&'static str, RegisterBinding)>,
    pub window_time: Option<RegisterBinding>,
    pub ramp_time: Option<RegisterBinding>,
    pub revert_time: Option<RegisterBinding>,
    pub curves: Vec<CurveBindings>,
    /// Selects which curve slot is in effect.
    pub active_curve: Option<RegisterBinding>,
    pub adoption: Option<AdoptionBindings>,
}

impl FunctionBindings {
    pub fn new(enable: EnableBinding) -> Self {
        Self {
            enable: vec![enable],
            idle: &[],
            scalars: Vec::new(),
            readback: Vec::new(),
            window_time: None,
            ramp_time: None,
            revert_time: None,
            curves: Vec::new(),
            active_curve: None,
            adoption: None,
        }
    }

    /// Extra switch written before the main one, e.g. a shared mode selector.
    pub fn also_enable(mut self, enable: EnableBinding) -> Self {
        self.enable.insert(self.enable.len() - 1, enable);
        self
    }

    pub fn idle_when(mut self, idle: &'static [(RegisterBinding, f64)]) -> Self {
        self.idle = idle;
        self
    }

    pub fn scalar(mut self, name: &'static str, binding: RegisterBinding) -> Self {
        self.scalars.push((name, binding));
        self
    }

    /// Read scalar `name` from `binding` instead of the register it is written to.
    pub fn read_back(mut self, name: &'static str, binding: RegisterBinding) -> Self {
        self.readback.push((name, binding));
        self
    }

    pub fn timers(
        mut self,
        window_time: Option<RegisterBinding>,
        ramp_time: Option<RegisterBinding>,
        revert_time: Option<RegisterBinding>,
    ) -> Self {
        self.window_time = window_time;
        self.ramp_time = ramp_time;
        self.revert_time = revert_time;
        self
    }

    pub fn curve(mut self, curve: CurveBindings) -> Self {
        self.curves.push(curve);
        self
    }

    pub fn active_curve(mut self, binding: RegisterBinding) -> Self {
        self.active_curve = Some(binding);
        self
    }

    pub fn adoption(mut self, adoption: AdoptionBindings) -> Self {
        self.adoption = Some(adoption);
        self
    }

    pub fn scalar_binding(&self, name: &str) -> Option<&RegisterBinding> {
        self.scalars.iter().find(|(n, _)| *n == name).map(|(_, b)| b)
    }

    /// Binding a scalar is read from.
    pub fn scalar_source(&self, name: &str) -> Option<&RegisterBinding> {
        self.readback
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, b)| b)
            .or_else(|| self.scalar_binding(name))
    }

    pub fn curve_binding(&self, index: u8) -> Option<&CurveBindings> {
        self.curves.iter().find(|c| c.index == index)
    }

    /// First slot that may be written.
    pub fn first_writable_curve(&self) -> Option<&CurveBindings> {
        self.curves.iter().find(|c| !c.read_only)
    }
}

/// A status flag register and the family of flags it holds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusBinding {
    pub binding: RegisterBinding,
    pub family: StatusFamily,
}

/// The complete binding table of one vendor family.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterMap {
    vendor: &'static str,
    functions: BTreeMap<FunctionKind, FunctionBindings>,
    signs: BTreeMap<SignFamily, SignConvention>,
    status: BTreeMap<StatusFamily, StatusBinding>,
    ratings: BTreeMap<Rating, RegisterBinding>,
    measurements: BTreeMap<Measurand, RegisterBinding>,
    login: Vec<(RegisterBinding, f64)>,
}

impl RegisterMap {
    pub fn builder(vendor: &'static str) -> RegisterMapBuilder {
        RegisterMapBuilder {
            map: RegisterMap {
                vendor,
                functions: BTreeMap::new(),
                signs: BTreeMap::new(),
                status: BTreeMap::new(),
                ratings: BTreeMap::new(),
                measurements: BTreeMap::new(),
                login: Vec::new(),
            },
        }
    }

    pub fn vendor(&self) -> &'static str {
        self.vendor
    }

    pub fn function(&self, kind: FunctionKind) -> Option<&FunctionBindings> {
        self.functions.get(&kind)
    }

    pub fn supported(&self) -> impl Iterator<Item = FunctionKind> + '_ {
        self.functions.keys().copied()
    }

    pub fn sign(&self, family: SignFamily) -> Option<&SignConvention> {
        self.signs.get(&family)
    }

    pub fn status(&self, family: StatusFamily) -> Option<&StatusBinding> {
        self.status.get(&family)
    }

    pub fn ratings(&self) -> impl Iterator<Item = (Rating, &RegisterBinding)> + '_ {
        self.ratings.iter().map(|(r, b)| (*r, b))
    }

    pub fn measurements(&self) -> impl Iterator<Item = (Measurand, &RegisterBinding)> + '_ {
        self.measurements.iter().map(|(m, b)| (*m, b))
    }

    /// Writes needed once per session before parameters can be changed.
    pub fn login(&self) -> &[(RegisterBinding, f64)] {
        &self.login
    }
}

/// Use this type to create a [`RegisterMap`].
pub struct RegisterMapBuilder {
    map: RegisterMap,
}

impl RegisterMapBuilder {
    pub fn function(mut self, kind: FunctionKind, bindings: FunctionBindings) -> Self {
        self.map.functions.insert(kind, bindings);
        self
    }

    pub fn sign(mut self, family: SignFamily, convention: SignConvention) -> Self {
        self.map.signs.insert(family, convention);
        self
    }

    pub fn status(mut self, family: StatusFamily, binding: RegisterBinding) -> Self {
        self.map.status.insert(family, StatusBinding { binding, family });
        self
    }

    pub fn rating(mut self, rating: Rating, binding: RegisterBinding) -> Self {
        self.map.ratings.insert(rating, binding.read_only());
        self
    }

    pub fn measurement(mut self, measurand: Measurand, binding: RegisterBinding) -> Self {
        self.map.measurements.insert(measurand, binding.read_only());
        self
    }

    pub fn login(mut self, binding: RegisterBinding, value: f64) -> Self {
        self.map.login.push((binding, value));
        self
    }

    pub fn build(self) -> RegisterMap {
        self.map
    }
}
