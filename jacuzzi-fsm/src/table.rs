//! Declarative transition tables.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;

use crate::error::{FsmError, FsmResult};
use crate::machine::FsmAction;

/// A fixed `(state, input) -> next state` lookup usable as an [`FsmAction`].
#[derive(Debug, Clone)]
pub struct TransitionTable<S, I> {
    initial: S,
    transitions: HashMap<(S, I), S>,
    finals: HashSet<S>,
    fallback: Option<S>,
}

impl<S, I> TransitionTable<S, I>
where
    S: Clone + Eq + Hash,
    I: Eq + Hash,
{
    /// Creates an empty table starting in `initial`.
    #[must_use]
    pub fn new(initial: S) -> Self {
        Self {
            initial,
            transitions: HashMap::new(),
            finals: HashSet::new(),
            fallback: None,
        }
    }

    /// Adds the transition `state --input--> next`, replacing any previous one.
    #[must_use]
    pub fn on(mut self, state: S, input: I, next: S) -> Self {
        self.transitions.insert((state, input), next);
        self
    }

    /// Marks the given states as final.
    #[must_use]
    pub fn finals(mut self, states: impl IntoIterator<Item = S>) -> Self {
        self.finals.extend(states);
        self
    }

    /// Sends every undefined `(state, input)` pair to `state`.
    #[must_use]
    pub fn fallback(mut self, state: S) -> Self {
        self.fallback = Some(state);
        self
    }

    /// Returns the number of defined transitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    /// Returns whether no transitions are defined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }
}

impl<S, I> FsmAction<S, I> for TransitionTable<S, I>
where
    S: Clone + Eq + Hash + Debug,
    I: Eq + Hash + Debug,
{
    fn initial_state(&mut self) -> S {
        self.initial.clone()
    }

    fn process(&mut self, state: &S, input: I) -> FsmResult<S> {
        let key = (state.clone(), input);
        if let Some(next) = self.transitions.get(&key) {
            return Ok(next.clone());
        }
        self.fallback.clone().ok_or_else(|| FsmError::NoTransition {
            state: format!("{state:?}"),
            input: format!("{:?}", key.1),
        })
    }

    fn is_final(&self, state: &S) -> bool {
        self.finals.contains(state)
    }
}
