//! Session invariants checked between ticks.
//!
//! A random operation sequence can drive a session down paths no scenario
//! test covers. The checks here state what must hold after every one of
//! them: each peer's observable state is captured into a
//! [`SystemSnapshot`] and every registered [`Invariant`] inspects it.
//!
//! ```ignore
//! let registry = InvariantRegistry::standard();
//! cluster.tick();
//! registry.assert_all(&cluster.snapshot(), "after tick");
//! ```

mod checks;
mod snapshot;

use std::fmt;

pub use checks::{ExclusiveRequests, HandlesSetOnce, RosterUniqueness, StageConsistency};
pub use snapshot::{ParticipantHandles, ParticipantSnapshot, SessionSnapshot, SystemSnapshot};

/// Outcome of one check.
pub type InvariantResult = Result<(), Violation>;

/// Which invariant a check enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvariantKind {
    /// No duplicate remotes; the local identity is never a remote.
    RosterUniqueness,
    /// Remote handles are set once.
    HandlesSetOnce,
    /// Stage agrees with held state.
    StageConsistency,
    /// Create and join are never both queued.
    ExclusiveRequests,
}

impl fmt::Display for InvariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A broken invariant and the state that broke it.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Which check failed.
    pub invariant: InvariantKind,
    /// Peer and participant details.
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// A property of every peer's snapshot.
pub trait Invariant: Send + Sync {
    /// Identifier reported in violations.
    fn kind(&self) -> InvariantKind;

    /// Inspect `state`, reporting the first peer that breaks the property.
    fn check(&self, state: &SystemSnapshot) -> InvariantResult;
}

/// Set of checks run together against one snapshot.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Registry without checks.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Registry holding [`RosterUniqueness`], [`HandlesSetOnce`],
    /// [`StageConsistency`] and [`ExclusiveRequests`].
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(RosterUniqueness);
        registry.add(HandlesSetOnce);
        registry.add(StageConsistency);
        registry.add(ExclusiveRequests);
        registry
    }

    /// Register another check.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Run every check, collecting all violations.
    pub fn check_all(&self, state: &SystemSnapshot) -> Result<(), Vec<Violation>> {
        let mut violations = Vec::new();
        for invariant in &self.invariants {
            if let Err(violation) = invariant.check(state) {
                violations.push(violation);
            }
        }
        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// [`Self::check_all`], panicking on any violation. For tests.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, state: &SystemSnapshot, context: &str) {
        let Err(violations) = self.check_all(state) else {
            return;
        };
        let report = violations.iter().map(|v| format!("\n  {v}")).collect::<String>();
        panic!("session invariants broken {context}:{report}");
    }

    /// Number of checks.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// `true` if no check is registered.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}
