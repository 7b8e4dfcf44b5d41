//! Write, activate, poll: making a device adopt a freshly written curve.
//!
//! Some devices (SunSpec 2018 DER models) stage curve writes into a slot and only put the
//! slot into effect after an explicit adoption request. [`CurveCommitProtocol`] drives that
//! handshake for one function at a time.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use fugit::MillisDurationU32;
use strum_macros::Display;
use tracing::{debug, info, warn};

use crate::{
    adapter::DeviceAdapter,
    error::{Error, Result},
    function::GridSupportFunction,
};

/// Where a commit attempt has got to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Display)]
pub enum CommitState {
    Idle,
    PointsWritten,
    ActivationRequested,
    Polling,
    Committed,
    Failed,
    TimedOut,
}

impl CommitState {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Failed | Self::TimedOut)
    }
}

/// Classified contents of an adoption result register.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Display)]
pub enum CommitResult {
    /// Nothing read yet, or a code the vendor table doesn't know.
    Unknown,
    Success,
    InProgress,
    Failed,
}

/// Settle delay and poll bound for one vendor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommitPolicy {
    /// Wait before each poll of the result register.
    pub settle_delay: MillisDurationU32,
    pub max_polls: u32,
}

impl CommitPolicy {
    pub const fn new(settle_delay: MillisDurationU32, max_polls: u32) -> Self {
        Self {
            settle_delay,
            max_polls,
        }
    }
}

impl Default for CommitPolicy {
    fn default() -> Self {
        Self::new(MillisDurationU32::millis(2000), 10)
    }
}

/// Cooperative cancellation for a running commit. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Record of one commit, returned once it reaches [`CommitState::Committed`].
#[derive(Debug, Clone, PartialEq)]
pub struct CommitAttempt {
    pub requested_curve: u8,
    pub state: CommitState,
    pub started: Instant,
    pub last_poll: Option<Instant>,
    pub result: CommitResult,
    pub polls: u32,
}

impl CommitAttempt {
    fn new(requested_curve: u8) -> Self {
        Self {
            requested_curve,
            state: CommitState::Idle,
            started: Instant::now(),
            last_poll: None,
            result: CommitResult::Unknown,
            polls: 0,
        }
    }

    fn transition(&mut self, next: CommitState) {
        debug!(curve = self.requested_curve, from = %self.state, to = %next, "commit transition");
        self.state = next;
    }
}

/// Drives the adoption handshake. Holds no device state of its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurveCommitProtocol {
    /// Overrides the vendor's policy when set.
    policy: Option<CommitPolicy>,
}

impl CurveCommitProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `policy` instead of the one in the vendor table.
    pub fn with_policy(policy: CommitPolicy) -> Self {
        Self {
            policy: Some(policy),
        }
    }

    /// Write `function` and wait until the device reports curve slot `curve_index` adopted.
    ///
    /// Rewriting an already committed function is harmless. Failures after the write leave
    /// the device holding the new points in a staged slot; the error carries the state the
    /// attempt had reached.
    pub fn commit(
        &self,
        adapter: &DeviceAdapter,
        function: &GridSupportFunction,
        curve_index: u8,
        cancel: Option<&CancelToken>,
    ) -> Result<CommitAttempt> {
        let kind = function.kind;
        let mut attempt = CommitAttempt::new(curve_index);

        adapter.write_function(function)?;
        attempt.transition(CommitState::PointsWritten);

        let Some(adoption) = adapter.adoption(kind) else {
            // Nothing to adopt, the write is in effect.
            attempt.result = CommitResult::Success;
            attempt.transition(CommitState::Committed);
            return Ok(attempt);
        };
        let policy = self.policy.unwrap_or(adoption.policy);

        adapter.request_adoption(kind, curve_index)?;
        attempt.transition(CommitState::ActivationRequested);
        attempt.transition(CommitState::Polling);

        let settle = Duration::from_millis(policy.settle_delay.to_millis() as u64);
        for _ in 0..policy.max_polls {
            if cancel.is_some_and(CancelToken::is_cancelled) {
                warn!(function = %kind, curve = curve_index, state = %attempt.state, "commit cancelled");
                return Err(Error::CommitCancelled {
                    last_known_state: attempt.state,
                });
            }
            std::thread::sleep(settle);

            let result = adapter.read_adoption_result(kind)?;
            attempt.polls += 1;
            attempt.last_poll = Some(Instant::now());
            attempt.result = result;
            debug!(function = %kind, curve = curve_index, poll = attempt.polls, %result, "adoption polled");

            match result {
                CommitResult::Success => {
                    attempt.transition(CommitState::Committed);
                    info!(function = %kind, curve = curve_index, polls = attempt.polls, "curve committed");
                    return Ok(attempt);
                }
                CommitResult::Failed => {
                    attempt.transition(CommitState::Failed);
                    return Err(Error::CurveNotCommitted {
                        last_known_state: attempt.state,
                    });
                }
                CommitResult::InProgress | CommitResult::Unknown => {}
            }
        }

        attempt.transition(CommitState::TimedOut);
        warn!(function = %kind, curve = curve_index, polls = attempt.polls, "adoption timed out");
        Err(Error::CurveNotCommitted {
            last_known_state: attempt.state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapter::sunspec,
        config::ConnectionParams,
        curve::CurvePoint,
        function::FunctionKind,
        mock_transport::{MockTransport, Op},
    };

    const VOLT_VAR: u16 = 1000;

    fn fast() -> CurveCommitProtocol {
        CurveCommitProtocol::with_policy(CommitPolicy::new(MillisDurationU32::millis(0), 3))
    }

    fn sunspec_adapter() -> (DeviceAdapter, MockTransport) {
        let mut params = ConnectionParams::default();
        params.models.insert(705, VOLT_VAR);
        let mock = MockTransport::new();
        let adapter = DeviceAdapter::new("SunSpec", sunspec::register_map(&params).unwrap(), Box::new(mock.clone()));
        (adapter, mock)
    }

    fn volt_var(curve_index: u8) -> GridSupportFunction {
        let f = GridSupportFunction::new(FunctionKind::VoltVar).enabled(true);
        let mut curve = f.blank_curve(curve_index, 4).unwrap();
        curve
            .set_points(vec![
                CurvePoint::new(92.0, 30.0),
                CurvePoint::new(98.0, 0.0),
                CurvePoint::new(102.0, 0.0),
                CurvePoint::new(108.0, -30.0),
            ])
            .unwrap();
        f.with_curve(curve)
    }

    #[test]
    fn test_committed_after_in_progress() {
        let (adapter, mock) = sunspec_adapter();
        // AdptCrvRslt: in progress twice, then completed.
        mock.script_reads(VOLT_VAR + 4, &[0, 0, 1]);

        let attempt = fast().commit(&adapter, &volt_var(2), 2, None).unwrap();
        assert_eq!(attempt.state, CommitState::Committed);
        assert_eq!(attempt.result, CommitResult::Success);
        assert_eq!(attempt.polls, 3);
        assert!(attempt.last_poll.is_some());

        // The adoption request goes out after every point and the enable.
        let writes = mock.writes();
        let request = writes
            .iter()
            .position(|op| matches!(op, Op::Registers { address, .. } if *address == VOLT_VAR + 3))
            .unwrap();
        assert_eq!(request, writes.len() - 1);
        assert_eq!(mock.register(VOLT_VAR + 3), 2);
    }

    #[test]
    fn test_failed_adoption() {
        let (adapter, mock) = sunspec_adapter();
        mock.script_reads(VOLT_VAR + 4, &[0, 2]);

        let err = fast().commit(&adapter, &volt_var(2), 2, None).unwrap_err();
        assert_eq!(
            err,
            Error::CurveNotCommitted {
                last_known_state: CommitState::Failed
            }
        );
    }

    #[test]
    fn test_timed_out() {
        let (adapter, mock) = sunspec_adapter();
        mock.script_reads(VOLT_VAR + 4, &[0]);

        let err = fast().commit(&adapter, &volt_var(2), 2, None).unwrap_err();
        assert_eq!(
            err,
            Error::CurveNotCommitted {
                last_known_state: CommitState::TimedOut
            }
        );
        assert_eq!(mock.read_count(VOLT_VAR + 4), 3);
    }

    #[test]
    fn test_cancelled_between_polls() {
        let (adapter, mock) = sunspec_adapter();
        mock.script_reads(VOLT_VAR + 4, &[0]);
        let token = CancelToken::new();
        token.cancel();

        let err = fast().commit(&adapter, &volt_var(2), 2, Some(&token)).unwrap_err();
        assert_eq!(
            err,
            Error::CommitCancelled {
                last_known_state: CommitState::Polling
            }
        );
        // The points and the request were written, nothing was polled.
        assert_eq!(mock.register(VOLT_VAR + 3), 2);
        assert_eq!(mock.read_count(VOLT_VAR + 4), 0);
    }

    #[test]
    fn test_invalid_curve_never_reaches_device() {
        let (adapter, mock) = sunspec_adapter();
        let f = GridSupportFunction::new(FunctionKind::VoltVar).enabled(true);
        let curve = f.blank_curve(2, 4).unwrap();
        let f = f.with_curve(curve);

        assert_eq!(fast().commit(&adapter, &f, 2, None).unwrap_err(), Error::EmptyCurve);
        assert!(mock.writes().is_empty());
    }

    #[test]
    fn test_vendor_without_adoption_commits_on_write() {
        let mock = MockTransport::new();
        let map = crate::adapter::solaredge::register_map(&ConnectionParams::default()).unwrap();
        let adapter = DeviceAdapter::new("SolarEdge", map, Box::new(mock.clone()));
        let f = GridSupportFunction::new(FunctionKind::ActivePowerLimit)
            .enabled(true)
            .with_scalar(crate::function::scalar::W_MAX_PCT, 50.0);

        let attempt = fast().commit(&adapter, &f, 1, None).unwrap();
        assert_eq!(attempt.state, CommitState::Committed);
        assert_eq!(attempt.polls, 0);
        assert!(!mock.writes().is_empty());
    }

    #[test]
    fn test_default_policy() {
        let policy = CommitPolicy::default();
        assert_eq!(policy.settle_delay.to_millis(), 2000);
        assert_eq!(policy.max_polls, 10);
        assert!(CommitState::TimedOut.is_terminal());
        assert!(!CommitState::Polling.is_terminal());
    }
}
