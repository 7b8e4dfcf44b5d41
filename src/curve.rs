//! Piecewise characteristic curves programmed into a DER.

use strum_macros::{Display, EnumIter};

use crate::error::{Error, GeometryFault, Result};

/// Percent of nominal voltage around which volt-var curves must change sign.
pub const NOMINAL_VOLTAGE_PCT: f64 = 100.0;

/// One `(x, y)` pair of a curve, in the units declared by the curve's [`CurveShape`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurvePoint {
    pub x: f64,
    pub y: f64,
}

impl CurvePoint {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<(f64, f64)> for CurvePoint {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// Quantity the y-axis percentage is relative to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter)]
pub enum DependentRef {
    /// Percent of maximum active power.
    #[strum(serialize = "W_MAX_PCT")]
    WMaxPct,
    /// Percent of maximum reactive power.
    #[strum(serialize = "VAR_MAX_PCT")]
    VArMaxPct,
    /// Percent of currently available reactive power.
    #[strum(serialize = "VAR_AVAL_PCT")]
    VArAvalPct,
    /// Percent of currently available active power.
    #[strum(serialize = "W_AVAL_PCT")]
    WAvalPct,
}

/// Physical quantity and unit of a curve axis.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Display)]
pub enum Axis {
    /// Voltage, percent of nominal.
    #[strum(serialize = "%Vnom")]
    VoltagePct,
    /// Reactive power, percent of the dependent reference.
    #[strum(serialize = "%var")]
    VarPct,
    /// Active power, percent of the dependent reference.
    #[strum(serialize = "%W")]
    WattPct,
    /// Frequency in hertz.
    #[strum(serialize = "Hz")]
    Hertz,
    /// Time in seconds.
    #[strum(serialize = "s")]
    Seconds,
}

/// Axes of a curve and whether the reactive quadrant rule applies.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CurveShape {
    pub x: Axis,
    pub y: Axis,
    /// When set, points below this x must not absorb and points above it must not inject.
    pub quadrant_pivot: Option<f64>,
}

impl CurveShape {
    pub const fn new(x: Axis, y: Axis) -> Self {
        Self {
            x,
            y,
            quadrant_pivot: None,
        }
    }

    pub const fn with_quadrant_pivot(mut self, pivot: f64) -> Self {
        self.quadrant_pivot = Some(pivot);
        self
    }
}

/// An ordered set of points with the metadata a device stores alongside them.
#[derive(Debug, Clone, PartialEq)]
pub struct CurveModel {
    points: Vec<CurvePoint>,
    /// 1-based, as the device numbers its curve slots.
    pub curve_index: u8,
    pub dependent_ref: Option<DependentRef>,
    /// Open loop response time in seconds.
    pub open_loop_response_time: Option<f64>,
    /// Device reports this slot as its current operating curve, which cannot be written.
    pub read_only: bool,
    pub max_points: usize,
    pub shape: CurveShape,
}

impl CurveModel {
    /// Create an empty curve for slot `curve_index`.
    pub fn new(shape: CurveShape, curve_index: u8, max_points: usize) -> Self {
        Self {
            points: Vec::new(),
            curve_index,
            dependent_ref: None,
            open_loop_response_time: None,
            read_only: false,
            max_points,
            shape,
        }
    }

    /// Builder style [`Self::set_points`].
    pub fn with_points(mut self, points: impl IntoIterator<Item = impl Into<CurvePoint>>) -> Result<Self> {
        self.set_points(points.into_iter().map(Into::into).collect())?;
        Ok(self)
    }

    pub fn with_dependent_ref(mut self, dependent_ref: DependentRef) -> Self {
        self.dependent_ref = Some(dependent_ref);
        self
    }

    pub fn with_response_time(mut self, seconds: f64) -> Self {
        self.open_loop_response_time = Some(seconds);
        self
    }

    pub fn points(&self) -> &[CurvePoint] {
        &self.points
    }

    pub fn active_point_count(&self) -> usize {
        self.points.len()
    }

    /// Replace all points. On failure the previous points are kept.
    pub fn set_points(&mut self, points: Vec<CurvePoint>) -> Result<()> {
        Self::check(&points, self.max_points, &self.shape)?;
        self.points = points;
        Ok(())
    }

    /// Take points as a device reported them, without validation.
    pub(crate) fn load_points(&mut self, points: Vec<CurvePoint>) {
        self.points = points;
    }

    /// Check point count, x ordering and (where the shape asks for it) the reactive quadrant.
    pub fn validate(&self) -> Result<()> {
        Self::check(&self.points, self.max_points, &self.shape)
    }

    fn check(points: &[CurvePoint], max_points: usize, shape: &CurveShape) -> Result<()> {
        if points.len() > max_points {
            return Err(Error::InvalidCurveGeometry {
                index: max_points,
                reason: GeometryFault::TooManyPoints { max: max_points },
            });
        }
        let mut previous: Option<f64> = None;
        for (index, point) in points.iter().enumerate() {
            let fault = if !point.x.is_finite() || !point.y.is_finite() {
                Some(GeometryFault::NonFinite)
            } else if previous.is_some_and(|x| point.x <= x) {
                Some(GeometryFault::NotAscending)
            } else if let Some(pivot) = shape.quadrant_pivot {
                let absorbs_below = point.x < pivot && point.y < 0.0;
                let injects_above = point.x > pivot && point.y > 0.0;
                (absorbs_below || injects_above).then_some(GeometryFault::WrongQuadrant)
            } else {
                None
            };
            if let Some(reason) = fault {
                return Err(Error::InvalidCurveGeometry { index, reason });
            }
            previous = Some(point.x);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volt_var() -> CurveModel {
        let shape = CurveShape::new(Axis::VoltagePct, Axis::VarPct).with_quadrant_pivot(NOMINAL_VOLTAGE_PCT);
        CurveModel::new(shape, 1, 4)
    }

    #[test]
    fn test_valid_volt_var() {
        let curve = volt_var()
            .with_points([(92.0, 44.0), (98.0, 0.0), (102.0, 0.0), (108.0, -44.0)])
            .unwrap();
        assert_eq!(curve.active_point_count(), 4);
        assert!(curve.validate().is_ok());
    }

    #[test]
    fn test_non_monotonic_names_index() {
        let err = volt_var()
            .with_points([(105.0, -10.0), (99.0, 10.0), (101.0, -5.0), (95.0, 20.0)])
            .unwrap_err();
        assert_eq!(
            err,
            Error::InvalidCurveGeometry {
                index: 1,
                reason: GeometryFault::NotAscending
            }
        );
    }

    #[test]
    fn test_quadrant_violation() {
        let err = volt_var().with_points([(95.0, 20.0), (105.0, 50.0)]).unwrap_err();
        assert_eq!(
            err,
            Error::InvalidCurveGeometry {
                index: 1,
                reason: GeometryFault::WrongQuadrant
            }
        );

        let err = volt_var().with_points([(95.0, -20.0)]).unwrap_err();
        assert!(matches!(err, Error::InvalidCurveGeometry { index: 0, .. }));
    }

    #[test]
    fn test_quadrant_only_for_reactive_curves() {
        // Volt-watt curves happily reduce power above nominal.
        let shape = CurveShape::new(Axis::VoltagePct, Axis::WattPct);
        let curve = CurveModel::new(shape, 1, 4)
            .with_points([(106.0, 100.0), (110.0, 20.0)])
            .unwrap();
        assert!(curve.validate().is_ok());
    }

    #[test]
    fn test_too_many_points() {
        let err = volt_var()
            .with_points([(90.0, 40.0), (95.0, 10.0), (100.0, 0.0), (105.0, -10.0), (110.0, -40.0)])
            .unwrap_err();
        assert_eq!(
            err,
            Error::InvalidCurveGeometry {
                index: 4,
                reason: GeometryFault::TooManyPoints { max: 4 }
            }
        );
    }

    #[test]
    fn test_non_finite() {
        let err = volt_var().with_points([(f64::NAN, 0.0)]).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidCurveGeometry {
                index: 0,
                reason: GeometryFault::NonFinite
            }
        ));
    }

    #[test]
    fn test_set_points_is_atomic() {
        let mut curve = volt_var().with_points([(95.0, 10.0), (105.0, -10.0)]).unwrap();
        let before = curve.points().to_vec();

        let result = curve.set_points(vec![CurvePoint::new(95.0, 10.0), CurvePoint::new(90.0, 20.0)]);
        assert!(result.is_err());
        assert_eq!(curve.points(), before.as_slice());

        curve.set_points(vec![CurvePoint::new(97.0, 5.0)]).unwrap();
        assert_eq!(curve.active_point_count(), 1);
    }

    #[test]
    fn test_empty_curve_validates() {
        assert!(volt_var().validate().is_ok());
    }
}
