//! Reading and writing grid-support functions through a vendor [`RegisterMap`].
//!
//! A [`DeviceAdapter`] owns exactly one transport and one immutable binding table. Every
//! public operation locks the transport for its whole duration, so register traffic of two
//! callers never interleaves.
//!
//! Writes are planned completely before anything goes out: the function is validated, every
//! field is resolved to a binding, scale-factor registers are read and every value encoded.
//! Only then are the writes issued, in this order:
//!
//! 1. curve points
//! 2. curve metadata (active point count, dependent reference, response time)
//! 3. scalars and timers
//! 4. excitation / direction code
//! 5. active curve selector
//! 6. enable switches, one at a time
//!
//! A mode selector shared by several functions is only switched off while it still holds
//! the code of the function being disabled, so disabling one function never turns off
//! whichever sibling currently owns the selector.

pub mod fronius;
pub mod hil;
pub mod sma;
pub mod solaredge;
pub mod sunspec;

use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use tracing::{debug, info, warn};

use crate::{
    bitfield::{self, Flags, StatusFamily},
    commit::CommitResult,
    curve::{CurveModel, CurvePoint},
    error::{Error, GeometryFault, Result, TransportError},
    function::{Excitation, FunctionKind, GridSupportFunction, SignFamily},
    monitor::{Measurand, Nameplate},
    register::{
        AdoptionBindings, CurveBindings, EnableBinding, FunctionBindings, Location, PointStorage,
        RegisterBinding, RegisterMap, Scale, SignConvention, StatusBinding,
    },
    scaling::{self, ScaleFactor},
    transport::Transport,
};

/// A setpoint expressed in a vendor's sign convention.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignedValue {
    /// Value for the setpoint register.
    pub value: f64,
    /// Value for the direction register, for vendors which have one.
    pub excitation_code: Option<f64>,
}

impl SignConvention {
    fn translate(&self, excitation: Excitation, magnitude: f64) -> SignedValue {
        let magnitude = magnitude.abs();
        match (self, excitation) {
            (Self::NegativeInjecting, Excitation::Injecting)
            | (Self::PositiveInjecting, Excitation::Absorbing) => SignedValue {
                value: -magnitude,
                excitation_code: None,
            },
            (Self::NegativeInjecting | Self::PositiveInjecting, _) => SignedValue {
                value: magnitude,
                excitation_code: None,
            },
            (
                Self::ExcitationCode {
                    injecting,
                    absorbing,
                    ..
                }
                | Self::SplitSetpoint {
                    injecting,
                    absorbing,
                    ..
                },
                _,
            ) => SignedValue {
                value: magnitude,
                excitation_code: Some(match excitation {
                    Excitation::Injecting => *injecting,
                    Excitation::Absorbing => *absorbing,
                }),
            },
        }
    }

    /// A zero setpoint under a sign-only convention reads as injecting.
    fn interpret(&self, value: f64, code: Option<f64>) -> (f64, Option<Excitation>) {
        let excitation = match self {
            Self::NegativeInjecting if value < 0.0 => Some(Excitation::Injecting),
            Self::NegativeInjecting if value > 0.0 => Some(Excitation::Absorbing),
            Self::NegativeInjecting => Some(Excitation::Injecting),
            Self::PositiveInjecting if value < 0.0 => Some(Excitation::Absorbing),
            Self::PositiveInjecting => Some(Excitation::Injecting),
            Self::ExcitationCode {
                injecting,
                absorbing,
                ..
            }
            | Self::SplitSetpoint {
                injecting,
                absorbing,
                ..
            } => match code {
                Some(c) if c == *injecting => Some(Excitation::Injecting),
                Some(c) if c == *absorbing => Some(Excitation::Absorbing),
                _ => None,
            },
        };
        (value.abs(), excitation)
    }

    fn code_binding(&self) -> Option<&RegisterBinding> {
        match self {
            Self::ExcitationCode { code, .. } | Self::SplitSetpoint { code, .. } => Some(code),
            Self::NegativeInjecting | Self::PositiveInjecting => None,
        }
    }
}

/// One value bound for the device, before encoding.
enum Write<'m> {
    Value(&'m RegisterBinding, f64),
    Vector(&'static str, Vec<f64>),
    /// Switch off, unless a shared selector belongs to another function by now.
    Release(&'m EnableBinding),
}

/// One encoded request.
#[derive(Debug)]
enum Step {
    Registers { address: u16, words: Vec<u16> },
    Variable { name: &'static str, value: f64 },
    Vector { name: &'static str, values: Vec<f64> },
}

/// Encoded requests in issue order. Contiguous register writes of the same phase are
/// merged into one request.
#[derive(Debug, Default)]
struct WritePlan {
    steps: Vec<Step>,
    /// Steps before this index belong to earlier phases.
    sealed: usize,
}

impl WritePlan {
    fn push(&mut self, step: Step) {
        self.steps.push(step);
    }

    fn push_words(&mut self, address: u16, words: &[u16]) {
        if self.steps.len() > self.sealed {
            if let Some(Step::Registers {
                address: start,
                words: pending,
            }) = self.steps.last_mut()
            {
                if *start as usize + pending.len() == address as usize {
                    pending.extend_from_slice(words);
                    return;
                }
            }
        }
        self.push(Step::Registers {
            address,
            words: words.to_vec(),
        });
    }

    fn seal(&mut self) {
        self.sealed = self.steps.len();
    }
}

/// The transport, locked for one operation, plus the scale factors read so far.
struct Session<'a> {
    transport: MutexGuard<'a, Option<Box<dyn Transport + Send>>>,
    scales: BTreeMap<u16, ScaleFactor>,
}

impl Session<'_> {
    fn io(&mut self) -> Result<&mut (dyn Transport + Send + 'static)> {
        self.transport
            .as_deref_mut()
            .ok_or(Error::DeviceNotInitialized)
    }

    fn scale_factor(&mut self, scale: Scale) -> Result<ScaleFactor> {
        match scale {
            Scale::Fixed(factor) => Ok(factor),
            Scale::Register(address) => {
                if let Some(factor) = self.scales.get(&address) {
                    return Ok(*factor);
                }
                let words = self.io()?.read_registers(address, 1)?;
                let raw = words.first().copied().ok_or(TransportError::InvalidResponse)?;
                let factor = ScaleFactor::from_register(raw)?;
                self.scales.insert(address, factor);
                Ok(factor)
            }
        }
    }

    fn read(&mut self, binding: &RegisterBinding) -> Result<f64> {
        match binding.location {
            Location::Holding(address) => {
                let scale = self.scale_factor(binding.scale)?;
                let count = binding.value_type.word_count() as u16;
                let words = self.io()?.read_registers(address, count)?;
                scaling::decode(&words, scale, binding.value_type)
            }
            Location::Variable(name) => Ok(self.io()?.read_variable(name)?),
        }
    }

    fn read_vector(&mut self, name: &str) -> Result<Vec<f64>> {
        Ok(self.io()?.read_vector(name)?)
    }

    /// True while every binding holds its value. Vacuously true for an empty list.
    fn holds_all(&mut self, values: &[(RegisterBinding, f64)]) -> Result<bool> {
        for (binding, value) in values {
            if self.read(binding)? != *value {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn stage(&mut self, plan: &mut WritePlan, write: Write<'_>) -> Result<()> {
        match write {
            Write::Vector(name, values) => plan.push(Step::Vector { name, values }),
            Write::Release(enable) => {
                if enable.shared {
                    let held = self.read(&enable.binding)?;
                    if held != enable.on {
                        debug!(selector = ?enable.binding.location, held, "selector owned by another function");
                        return Ok(());
                    }
                }
                for (binding, value) in enable.release {
                    self.stage(plan, Write::Value(binding, *value))?;
                }
                self.stage(plan, Write::Value(&enable.binding, enable.off))?;
            }
            Write::Value(binding, value) => {
                if !binding.access.writable() {
                    return Err(Error::InvalidParameter(format!(
                        "{:?} is read-only",
                        binding.location
                    )));
                }
                match binding.location {
                    Location::Holding(address) => {
                        let scale = self.scale_factor(binding.scale)?;
                        let words = scaling::encode(value, scale, binding.value_type)?;
                        plan.push_words(address, &words);
                    }
                    Location::Variable(name) => plan.push(Step::Variable { name, value }),
                }
            }
        }
        Ok(())
    }

    fn execute(&mut self, plan: &WritePlan) -> Result<()> {
        let io = self.io()?;
        for step in &plan.steps {
            debug!(?step, "write");
            match step {
                Step::Registers { address, words } => io.write_registers(*address, words)?,
                Step::Variable { name, value } => io.write_variable(name, *value)?,
                Step::Vector { name, values } => io.write_vector(name, values)?,
            }
        }
        Ok(())
    }
}

/// Adapts the abstract function model to one device.
pub struct DeviceAdapter {
    mode: &'static str,
    map: RegisterMap,
    transport: Mutex<Option<Box<dyn Transport + Send>>>,
}

impl DeviceAdapter {
    /// Create an adapter speaking `map` over `transport`. Use [`crate::registry::open`] to
    /// get one by mode name.
    pub fn new(mode: &'static str, map: RegisterMap, transport: Box<dyn Transport + Send>) -> Self {
        Self {
            mode,
            map,
            transport: Mutex::new(Some(transport)),
        }
    }

    pub fn mode(&self) -> &'static str {
        self.mode
    }

    pub fn register_map(&self) -> &RegisterMap {
        &self.map
    }

    /// Functions this device has bindings for.
    pub fn supported(&self) -> impl Iterator<Item = FunctionKind> + '_ {
        self.map.supported()
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn Transport + Send>>> {
        // A panic elsewhere doesn't leave the transport in a state we can't use.
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn session(&self) -> Result<Session<'_>> {
        let transport = self.lock();
        if transport.is_none() {
            return Err(Error::DeviceNotInitialized);
        }
        Ok(Session {
            transport,
            scales: BTreeMap::new(),
        })
    }

    fn bindings(&self, kind: FunctionKind) -> Result<&FunctionBindings> {
        self.map.function(kind).ok_or(Error::UnsupportedFunction(kind))
    }

    fn convention(&self, family: SignFamily) -> Result<&SignConvention> {
        self.map.sign(family).ok_or_else(|| {
            Error::InvalidParameter(format!("{} has no {family} sign convention", self.map.vendor()))
        })
    }

    fn status_binding(&self, family: StatusFamily) -> Result<&StatusBinding> {
        self.map
            .status(family)
            .ok_or_else(|| Error::InvalidParameter(format!("{} does not report {family}", self.map.vendor())))
    }

    /// Read the current state of `kind`. Only fields the vendor binds are populated.
    pub fn read_function(&self, kind: FunctionKind) -> Result<GridSupportFunction> {
        let mut session = self.session()?;
        let bindings = self.bindings(kind)?;
        let mut function = GridSupportFunction::new(kind);

        function.enabled = true;
        for enable in &bindings.enable {
            if session.read(&enable.binding)? != enable.on {
                function.enabled = false;
                break;
            }
        }
        if function.enabled && !bindings.idle.is_empty() && session.holds_all(bindings.idle)? {
            function.enabled = false;
        }

        for (name, written) in &bindings.scalars {
            let binding = bindings.scalar_source(name).unwrap_or(written);
            if binding.access.readable() {
                let value = session.read(binding)?;
                function.scalars.insert(*name, value);
            }
        }
        if let (Some(family), Some(name)) = (kind.sign_family(), kind.signed_scalar()) {
            self.read_direction(&mut session, family, name, &mut function)?;
        }

        let timers = [
            (&bindings.window_time, &mut function.window_time),
            (&bindings.ramp_time, &mut function.ramp_time),
            (&bindings.revert_time, &mut function.revert_time),
        ];
        for (binding, field) in timers {
            if let Some(binding) = binding.as_ref().filter(|b| b.access.readable()) {
                *field = Some(session.read(binding)?);
            }
        }

        let selected = match &bindings.active_curve {
            Some(binding) => curve_selection(session.read(binding)?)?,
            None => 0,
        };
        for slot in &bindings.curves {
            if selected != 0 && slot.index != selected {
                continue;
            }
            let curve = Self::read_curve(&mut session, kind, slot)?;
            function.curves.push(curve);
        }

        debug!(mode = self.mode, function = %kind, enabled = function.enabled, "function read");
        Ok(function)
    }

    fn read_direction(
        &self,
        session: &mut Session<'_>,
        family: SignFamily,
        name: &'static str,
        function: &mut GridSupportFunction,
    ) -> Result<()> {
        let convention = self.convention(family)?;
        let code = match convention.code_binding() {
            Some(binding) => Some(session.read(binding)?),
            None => None,
        };
        let raw = match convention {
            SignConvention::SplitSetpoint {
                injecting_setpoint,
                absorbing_setpoint,
                ..
            } => match convention.interpret(0.0, code).1 {
                Some(Excitation::Injecting) => Some(session.read(injecting_setpoint)?),
                Some(Excitation::Absorbing) => Some(session.read(absorbing_setpoint)?),
                None => None,
            },
            _ => function.scalars.get(name).copied(),
        };
        match raw {
            Some(raw) => {
                let (magnitude, excitation) = convention.interpret(raw, code);
                function.scalars.insert(name, magnitude);
                function.excitation = excitation;
            }
            None => function.excitation = convention.interpret(0.0, code).1.filter(|_| code.is_some()),
        }
        Ok(())
    }

    fn read_curve(session: &mut Session<'_>, kind: FunctionKind, slot: &CurveBindings) -> Result<CurveModel> {
        let shape = kind
            .curve_shape()
            .ok_or_else(|| Error::InvalidParameter(format!("{kind} has no curves")))?;
        let max_points = slot.points.max_points();
        let mut curve = CurveModel::new(shape, slot.index, max_points);
        curve.read_only = slot.read_only;

        let mut points = Vec::new();
        match &slot.points {
            PointStorage::Registers { x, y } => {
                let count = match &slot.active_points {
                    Some(binding) => (session.read(binding)? as usize).min(max_points),
                    None => max_points,
                };
                for (x, y) in x.iter().zip(y).take(count) {
                    let px = session.read(x)?;
                    let py = session.read(y)?;
                    points.push(CurvePoint::new(px, py));
                }
            }
            PointStorage::Vectors { x, y, .. } => {
                let xs = session.read_vector(x)?;
                let ys = session.read_vector(y)?;
                points.extend(
                    xs.into_iter()
                        .zip(ys)
                        .take(max_points)
                        .map(CurvePoint::from),
                );
            }
        }
        curve.load_points(points);

        if let Some(dependent_ref) = &slot.dependent_ref {
            let code = session.read(&dependent_ref.binding)?;
            curve.dependent_ref = dependent_ref.ref_of(code);
        }
        if let Some(binding) = &slot.response_time {
            curve.open_loop_response_time = Some(session.read(binding)?);
        }
        Ok(curve)
    }

    /// Write every populated field of `function`.
    ///
    /// Nothing is written unless the whole function validates, every field has a writable
    /// binding and every value fits its register.
    pub fn write_function(&self, function: &GridSupportFunction) -> Result<()> {
        let kind = function.kind;
        function.validate()?;
        let bindings = self.bindings(kind)?;
        let phases = self.resolve(function, bindings)?;

        let mut session = self.session()?;
        let mut plan = WritePlan::default();
        for phase in phases {
            for write in phase {
                session.stage(&mut plan, write)?;
            }
            plan.seal();
        }
        session.execute(&plan)?;

        info!(mode = self.mode, function = %kind, enabled = function.enabled, "function written");
        Ok(())
    }

    /// Map every populated field onto its binding, grouped into write phases.
    fn resolve<'m>(
        &'m self,
        function: &GridSupportFunction,
        bindings: &'m FunctionBindings,
    ) -> Result<Vec<Vec<Write<'m>>>> {
        let kind = function.kind;
        let vendor = self.map.vendor();
        let missing = |what: &str| Error::InvalidParameter(format!("{vendor} does not store {kind} {what}"));

        let mut points = Vec::new();
        let mut meta = Vec::new();
        for curve in &function.curves {
            let index = curve.curve_index;
            let slot = bindings
                .curve_binding(index)
                .ok_or_else(|| missing(&format!("curve {index}")))?;
            if slot.read_only || curve.read_only {
                return Err(Error::ReadOnlyCurve(index));
            }
            let max = slot.points.max_points();
            if curve.active_point_count() > max {
                return Err(Error::InvalidCurveGeometry {
                    index: max,
                    reason: GeometryFault::TooManyPoints { max },
                });
            }

            match &slot.points {
                PointStorage::Registers { x, y } => {
                    for ((point, x), y) in curve.points().iter().zip(x).zip(y) {
                        points.push(Write::Value(x, point.x));
                        points.push(Write::Value(y, point.y));
                    }
                }
                PointStorage::Vectors { x, y, .. } => {
                    points.push(Write::Vector(*x, curve.points().iter().map(|p| p.x).collect()));
                    points.push(Write::Vector(*y, curve.points().iter().map(|p| p.y).collect()));
                }
            }

            if let Some(binding) = &slot.active_points {
                meta.push(Write::Value(binding, curve.active_point_count() as f64));
            }
            if let Some(dependent_ref) = curve.dependent_ref {
                let binding = slot
                    .dependent_ref
                    .as_ref()
                    .ok_or_else(|| missing("dependent reference"))?;
                let code = binding
                    .code_of(dependent_ref)
                    .ok_or_else(|| missing(&format!("dependent reference {dependent_ref}")))?;
                meta.push(Write::Value(&binding.binding, code));
            }
            if let Some(seconds) = curve.open_loop_response_time {
                let binding = slot.response_time.as_ref().ok_or_else(|| missing("response time"))?;
                meta.push(Write::Value(binding, seconds));
            }
        }

        let signed = kind.signed_scalar();
        let mut settings = Vec::new();
        for (name, value) in &function.scalars {
            if Some(*name) == signed {
                continue;
            }
            let binding = bindings.scalar_binding(name).ok_or_else(|| missing(name))?;
            settings.push(Write::Value(binding, *value));
        }
        let timers = [
            (function.window_time, &bindings.window_time, "window time"),
            (function.ramp_time, &bindings.ramp_time, "ramp time"),
            (function.revert_time, &bindings.revert_time, "revert time"),
        ];
        for (value, binding, what) in timers {
            if let Some(value) = value {
                let binding = binding.as_ref().ok_or_else(|| missing(what))?;
                settings.push(Write::Value(binding, value));
            }
        }

        let mut direction = Vec::new();
        if let (Some(family), Some(excitation)) = (kind.sign_family(), function.excitation) {
            let convention = self.convention(family)?;
            let magnitude = signed.and_then(|name| function.scalar(name).map(|m| (name, m)));
            match (convention, magnitude) {
                (
                    SignConvention::SplitSetpoint {
                        injecting_setpoint,
                        absorbing_setpoint,
                        ..
                    },
                    Some((_, magnitude)),
                ) => {
                    let binding = match excitation {
                        Excitation::Injecting => injecting_setpoint,
                        Excitation::Absorbing => absorbing_setpoint,
                    };
                    settings.push(Write::Value(binding, magnitude));
                }
                (_, Some((name, magnitude))) => {
                    let binding = bindings.scalar_binding(name).ok_or_else(|| missing(name))?;
                    let signed_value = convention.translate(excitation, magnitude);
                    settings.push(Write::Value(binding, signed_value.value));
                }
                (SignConvention::NegativeInjecting | SignConvention::PositiveInjecting, None) => {
                    return Err(Error::InvalidParameter(format!(
                        "{vendor} carries the {kind} direction in the setpoint sign, a magnitude is needed"
                    )));
                }
                _ => {}
            }
            if let (Some(binding), Some(code)) = (
                convention.code_binding(),
                convention.translate(excitation, 0.0).excitation_code,
            ) {
                direction.push(Write::Value(binding, code));
            }
        }

        let mut selector = Vec::new();
        if let (Some(binding), Some(curve)) = (&bindings.active_curve, function.curves.first()) {
            selector.push(Write::Value(binding, curve.curve_index as f64));
        }

        let mut phases = vec![points, meta, settings, direction, selector];
        phases.extend(bindings.enable.iter().map(|enable| {
            if function.enabled {
                vec![Write::Value(&enable.binding, enable.on)]
            } else {
                vec![Write::Release(enable)]
            }
        }));
        Ok(phases)
    }

    /// Express a setpoint direction and magnitude the way this vendor stores it.
    pub fn translate_sign(&self, family: SignFamily, excitation: Excitation, magnitude: f64) -> Result<SignedValue> {
        Ok(self.convention(family)?.translate(excitation, magnitude))
    }

    /// Inverse of [`Self::translate_sign`]. `code` is the direction register's value, if the
    /// vendor has one.
    pub fn interpret_sign(&self, family: SignFamily, value: f64, code: Option<f64>) -> Result<(f64, Option<Excitation>)> {
        Ok(self.convention(family)?.interpret(value, code))
    }

    pub fn read_flags(&self, family: StatusFamily) -> Result<Flags> {
        let mut session = self.session()?;
        let status = self.status_binding(family)?;
        let raw = session.read(&status.binding)?;
        Ok(bitfield::decode(raw as u32, family.layout()))
    }

    /// Only possible where the vendor exposes the flags as writable, e.g. HIL alarm injection.
    pub fn write_flags(&self, family: StatusFamily, flags: &Flags) -> Result<()> {
        let raw = bitfield::encode(flags, family.layout())?;
        let status = self.status_binding(family)?;
        let mut session = self.session()?;
        let mut plan = WritePlan::default();
        session.stage(&mut plan, Write::Value(&status.binding, raw as f64))?;
        session.execute(&plan)?;
        info!(mode = self.mode, %family, raw, "flags written");
        Ok(())
    }

    /// Every nameplate rating the vendor reports.
    pub fn read_nameplate(&self) -> Result<Nameplate> {
        let mut session = self.session()?;
        let mut nameplate = Nameplate::new();
        for (rating, binding) in self.map.ratings() {
            nameplate.insert(rating, session.read(binding)?);
        }
        debug!(mode = self.mode, ratings = nameplate.len(), "nameplate read");
        Ok(nameplate)
    }

    /// Every present measurement the vendor reports.
    pub fn read_measurements(&self) -> Result<BTreeMap<Measurand, f64>> {
        let mut session = self.session()?;
        let mut measurements = BTreeMap::new();
        for (measurand, binding) in self.map.measurements() {
            measurements.insert(measurand, session.read(binding)?);
        }
        Ok(measurements)
    }

    /// Adoption registers of `kind`, if the vendor stages writes.
    pub fn adoption(&self, kind: FunctionKind) -> Option<&AdoptionBindings> {
        self.map.function(kind).and_then(|b| b.adoption.as_ref())
    }

    fn adoption_bindings(&self, kind: FunctionKind) -> Result<&AdoptionBindings> {
        self.bindings(kind)?
            .adoption
            .as_ref()
            .ok_or_else(|| Error::InvalidParameter(format!("{} applies {kind} without adoption", self.map.vendor())))
    }

    /// Ask the device to put curve slot `curve_index` of `kind` into effect.
    pub fn request_adoption(&self, kind: FunctionKind, curve_index: u8) -> Result<()> {
        let adoption = self.adoption_bindings(kind)?;
        let mut session = self.session()?;
        let mut plan = WritePlan::default();
        session.stage(&mut plan, Write::Value(&adoption.request, curve_index as f64))?;
        session.execute(&plan)?;
        debug!(function = %kind, curve = curve_index, "adoption requested");
        Ok(())
    }

    pub fn read_adoption_result(&self, kind: FunctionKind) -> Result<CommitResult> {
        let adoption = self.adoption_bindings(kind)?;
        let mut session = self.session()?;
        let value = session.read(&adoption.result)?;
        let result = if value == adoption.completed {
            CommitResult::Success
        } else if value == adoption.in_progress {
            CommitResult::InProgress
        } else if value == adoption.failed {
            CommitResult::Failed
        } else {
            CommitResult::Unknown
        };
        Ok(result)
    }

    /// Issue the vendor's session login writes, e.g. the SMA grid guard code.
    pub fn login(&self) -> Result<()> {
        if self.map.login().is_empty() {
            return Ok(());
        }
        let mut session = self.session()?;
        let mut plan = WritePlan::default();
        for (binding, value) in self.map.login() {
            session.stage(&mut plan, Write::Value(binding, *value))?;
            plan.seal();
        }
        session.execute(&plan)?;
        info!(mode = self.mode, "logged in");
        Ok(())
    }

    /// Release the transport. Later operations fail with [`Error::DeviceNotInitialized`].
    pub fn close(&self) -> Result<()> {
        if let Some(mut transport) = self.lock().take() {
            transport.close()?;
            info!(mode = self.mode, "closed");
        }
        Ok(())
    }
}

/// Slot number held by an active curve selector, `0` when none is selected.
fn curve_selection(raw: f64) -> Result<u8> {
    let index = raw.is_finite().then(|| u8::try_from(raw.round() as i64).ok()).flatten();
    index.ok_or_else(|| {
        warn!(raw, "curve selector out of range");
        Error::Transport(TransportError::InvalidResponse)
    })
}
