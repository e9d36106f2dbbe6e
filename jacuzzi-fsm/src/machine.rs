//! The state machine driver.

use std::fmt::Debug;
use std::marker::PhantomData;

use jacuzzi_core::Limits;
use tracing::{debug, trace};

use crate::error::{FsmError, FsmResult};

/// Transition logic of a state machine.
pub trait FsmAction<S, I> {
    /// Returns the state the machine starts in.
    fn initial_state(&mut self) -> S;

    /// Computes the state that follows `state` on `input`.
    ///
    /// # Errors
    /// Returning an error stops the machine.
    fn process(&mut self, state: &S, input: I) -> FsmResult<S>;

    /// Returns whether `state` ends the machine.
    fn is_final(&self, state: &S) -> bool;

    /// Called once when the machine stops, with the state it stopped in.
    fn on_stop(&mut self, _state: &S) {}
}

/// A finite-state machine driven by an [`FsmAction`].
pub struct Fsm<S, I, A> {
    action: A,
    state: S,
    active: bool,
    transitions: u64,
    max_transitions: u64,
    _input: PhantomData<fn(I)>,
}

impl<S, I, A> Fsm<S, I, A>
where
    S: Debug,
    I: Debug,
    A: FsmAction<S, I>,
{
    /// Creates a machine in the action's initial state.
    ///
    /// If the initial state is already final the machine starts inactive.
    /// The transition budget defaults to `Limits::max_fsm_transitions`.
    pub fn new(mut action: A) -> Self {
        let state = action.initial_state();
        let active = !action.is_final(&state);
        if !active {
            action.on_stop(&state);
        }
        Self {
            action,
            state,
            active,
            transitions: 0,
            max_transitions: Limits::new().max_fsm_transitions,
            _input: PhantomData,
        }
    }

    /// Bounds the number of transitions this machine may perform.
    #[must_use]
    pub const fn with_max_transitions(mut self, max: u64) -> Self {
        self.max_transitions = max;
        self
    }

    /// Feeds one input to the machine.
    ///
    /// Returns whether the machine is still active afterwards.
    ///
    /// # Errors
    ///
    /// - `FsmError::Inactive` if the machine already stopped.
    /// - `FsmError::TransitionLimit` if the transition budget is spent.
    /// - Any error returned by the action; the machine stops.
    pub fn input(&mut self, input: I) -> FsmResult<bool> {
        if !self.active {
            return Err(FsmError::Inactive);
        }
        if self.transitions >= self.max_transitions {
            self.stop();
            return Err(FsmError::TransitionLimit {
                max: self.max_transitions,
            });
        }

        trace!(state = ?self.state, input = ?input, "fsm input");
        match self.action.process(&self.state, input) {
            Ok(next) => {
                self.transitions += 1;
                debug!(from = ?self.state, to = ?next, "fsm transition");
                self.state = next;
                if self.action.is_final(&self.state) {
                    self.stop();
                }
                Ok(self.active)
            }
            Err(e) => {
                debug!(state = ?self.state, error = %e, "fsm transition failed");
                self.stop();
                Err(e)
            }
        }
    }

    fn stop(&mut self) {
        self.active = false;
        self.action.on_stop(&self.state);
    }

    /// Returns the current state.
    pub const fn state(&self) -> &S {
        &self.state
    }

    /// Returns whether the machine still accepts input.
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Returns the transition budget.
    pub const fn max_transitions(&self) -> u64 {
        self.max_transitions
    }

    /// Returns the number of successful transitions so far.
    pub const fn transitions(&self) -> u64 {
        self.transitions
    }

    /// Returns the action, e.g. to inspect data it accumulated.
    pub const fn action(&self) -> &A {
        &self.action
    }

    /// Consumes the machine and returns its action.
    pub fn into_action(self) -> A {
        self.action
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Parses unsigned decimal numbers, one character at a time, ending on ';'.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Parse {
        Start,
        Digits,
        Done,
    }

    #[derive(Default)]
    struct NumberParser {
        value: u64,
        stopped_in: Option<Parse>,
    }

    impl FsmAction<Parse, char> for NumberParser {
        fn initial_state(&mut self) -> Parse {
            Parse::Start
        }

        fn process(&mut self, state: &Parse, input: char) -> FsmResult<Parse> {
            match (state, input) {
                (Parse::Start | Parse::Digits, c) if c.is_ascii_digit() => {
                    self.value = self.value * 10 + u64::from(c.to_digit(10).unwrap_or(0));
                    Ok(Parse::Digits)
                }
                (Parse::Digits, ';') => Ok(Parse::Done),
                (_, c) => Err(FsmError::Rejected {
                    message: format!("unexpected {c:?}"),
                }),
            }
        }

        fn is_final(&self, state: &Parse) -> bool {
            *state == Parse::Done
        }

        fn on_stop(&mut self, state: &Parse) {
            self.stopped_in = Some(*state);
        }
    }

    #[test]
    fn test_runs_to_final_state() {
        let mut fsm = Fsm::new(NumberParser::default());
        for c in "123".chars() {
            assert!(fsm.input(c).unwrap());
        }
        assert!(!fsm.input(';').unwrap());

        assert_eq!(*fsm.state(), Parse::Done);
        assert_eq!(fsm.transitions(), 4);
        assert_eq!(fsm.action().value, 123);
        assert_eq!(fsm.action().stopped_in, Some(Parse::Done));
    }

    #[test]
    fn test_input_after_stop_is_rejected() {
        let mut fsm = Fsm::new(NumberParser::default());
        fsm.input('1').unwrap();
        fsm.input(';').unwrap();
        assert_eq!(fsm.input('2'), Err(FsmError::Inactive));
    }

    #[test]
    fn test_error_stops_machine() {
        let mut fsm = Fsm::new(NumberParser::default());
        fsm.input('4').unwrap();
        let result = fsm.input('x');
        assert!(matches!(result, Err(FsmError::Rejected { .. })));
        assert!(!fsm.is_active());
        assert_eq!(*fsm.state(), Parse::Digits);
        assert_eq!(fsm.into_action().stopped_in, Some(Parse::Digits));
    }

    #[test]
    fn test_transition_limit() {
        let mut fsm = Fsm::new(NumberParser::default()).with_max_transitions(2);
        fsm.input('1').unwrap();
        fsm.input('2').unwrap();
        assert_eq!(fsm.input('3'), Err(FsmError::TransitionLimit { max: 2 }));
        assert!(!fsm.is_active());
    }

    #[test]
    fn test_default_budget_follows_limits() {
        let fsm = Fsm::new(NumberParser::default());
        assert_eq!(fsm.max_transitions(), Limits::new().max_fsm_transitions);

        let limits = Limits::for_testing();
        let mut fsm =
            Fsm::new(NumberParser::default()).with_max_transitions(limits.max_fsm_transitions);
        for _ in 0..limits.max_fsm_transitions {
            fsm.input('0').unwrap();
        }
        assert_eq!(
            fsm.input('0'),
            Err(FsmError::TransitionLimit {
                max: limits.max_fsm_transitions
            })
        );
    }

    struct AlreadyDone;

    impl FsmAction<u8, u8> for AlreadyDone {
        fn initial_state(&mut self) -> u8 {
            0
        }

        fn process(&mut self, state: &u8, _input: u8) -> FsmResult<u8> {
            Ok(*state)
        }

        fn is_final(&self, _state: &u8) -> bool {
            true
        }
    }

    #[test]
    fn test_final_initial_state_starts_inactive() {
        let mut fsm = Fsm::new(AlreadyDone);
        assert!(!fsm.is_active());
        assert_eq!(fsm.input(1), Err(FsmError::Inactive));
    }
}
