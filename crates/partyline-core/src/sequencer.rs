//! Cooperative task sequencer.
//!
//! Runs an ordered list of multi-tick tasks, one at a time. A task is
//! started with [`Task::begin`]; if it reports that no work was needed the
//! next task is started in the same step. A started task is polled on every
//! following step until it reports its target state, then [`Task::end`] runs
//! and the slot frees up.
//!
//! A full session reset is the plan built by [`reset_plan`]:
//!
//! ```text
//! [Leave (if connected)] → Cleanup → Initialize → [Join (if was connected)]
//! ```

use std::collections::VecDeque;

use crate::{network_id::NetworkId, state::ConnectionStage};

/// A multi-tick operation driven against some context `C`.
pub trait Task<C> {
    /// Kick off the work. Returns `false` if nothing needed doing.
    fn begin(&mut self, ctx: &mut C) -> bool;

    /// `true` once the target state is reached.
    fn poll(&mut self, ctx: &mut C) -> bool;

    /// Final bookkeeping after [`Self::poll`] reported completion.
    fn end(&mut self, _ctx: &mut C) {}
}

/// Ordered pending tasks plus at most one running task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSequencer<T> {
    pending: VecDeque<T>,
    running: Option<T>,
}

impl<T> Default for TaskSequencer<T> {
    fn default() -> Self {
        Self { pending: VecDeque::new(), running: None }
    }
}

impl<T> TaskSequencer<T> {
    /// Create an idle sequencer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task.
    pub fn push(&mut self, task: T) {
        self.pending.push_back(task);
    }

    /// Append several tasks in order.
    pub fn extend(&mut self, tasks: impl IntoIterator<Item = T>) {
        self.pending.extend(tasks);
    }

    /// Abandon the running task and everything pending.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.running = None;
    }

    /// `true` if a task is running or pending.
    pub fn has_work(&self) -> bool {
        self.running.is_some() || !self.pending.is_empty()
    }

    /// The task currently running.
    pub fn running(&self) -> Option<&T> {
        self.running.as_ref()
    }

    /// Tasks not yet started, in order.
    pub fn pending(&self) -> impl Iterator<Item = &T> {
        self.pending.iter()
    }

    /// Advance by one step.
    pub fn step<C>(&mut self, ctx: &mut C)
    where
        T: Task<C>,
    {
        match self.running.as_mut() {
            Some(task) => {
                if task.poll(ctx) {
                    task.end(ctx);
                    self.running = None;
                }
            },
            None => {
                while let Some(mut task) = self.pending.pop_front() {
                    if task.begin(ctx) {
                        self.running = Some(task);
                        break;
                    }
                }
            },
        }
    }
}

/// Session operations the reset tasks drive.
pub trait SessionControl {
    /// Current connection stage.
    fn stage(&self) -> ConnectionStage;

    /// Leave the current network.
    fn leave(&mut self);

    /// Release the engine.
    fn cleanup(&mut self);

    /// Initialize the engine.
    fn initialize(&mut self);

    /// Join a network.
    fn join(&mut self, network_id: &NetworkId);
}

/// Step of a full session reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetTask {
    /// Leave the network if connected.
    Leave,
    /// Release the engine.
    Cleanup,
    /// Re-initialize the engine.
    Initialize,
    /// Re-join the network that was left.
    Join(NetworkId),
}

impl<C: SessionControl> Task<C> for ResetTask {
    fn begin(&mut self, ctx: &mut C) -> bool {
        let stage = ctx.stage();
        match self {
            Self::Leave => {
                if !stage.is_connected() {
                    return false;
                }
                ctx.leave();
                true
            },
            Self::Cleanup => {
                if stage != ConnectionStage::NotInitialized {
                    ctx.cleanup();
                }
                true
            },
            Self::Initialize => {
                if stage == ConnectionStage::Initialized {
                    return false;
                }
                ctx.initialize();
                true
            },
            Self::Join(network_id) => {
                if stage.is_connected() {
                    return false;
                }
                ctx.join(network_id);
                true
            },
        }
    }

    fn poll(&mut self, ctx: &mut C) -> bool {
        let stage = ctx.stage();
        match self {
            Self::Leave => !stage.is_connected(),
            Self::Cleanup => stage == ConnectionStage::NotInitialized,
            Self::Initialize => stage == ConnectionStage::Initialized,
            Self::Join(_) => stage.is_connected(),
        }
    }

    fn end(&mut self, _ctx: &mut C) {
        tracing::debug!(task = ?self, "reset task finished");
    }
}

/// Tasks for a full reset from `stage`.
///
/// Leave and Join are included only when connected with a published
/// network identity. Cleanup and Initialize are always included.
pub fn reset_plan(stage: ConnectionStage, network_id: Option<&NetworkId>) -> Vec<ResetTask> {
    let rejoin = network_id.filter(|_| stage.is_connected());

    let mut tasks = Vec::with_capacity(4);
    if rejoin.is_some() {
        tasks.push(ResetTask::Leave);
    }
    tasks.push(ResetTask::Cleanup);
    tasks.push(ResetTask::Initialize);
    if let Some(network_id) = rejoin {
        tasks.push(ResetTask::Join(network_id.clone()));
    }
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Session stand-in whose stage advances one notch per step towards a
    /// target, and which records the operations it was asked for.
    #[derive(Default)]
    struct FakeSession {
        stage: ConnectionStage,
        target: ConnectionStage,
        calls: Vec<&'static str>,
    }

    impl FakeSession {
        fn at(stage: ConnectionStage) -> Self {
            Self { stage, target: stage, calls: Vec::new() }
        }

        fn settle(&mut self) {
            self.stage = self.target;
        }
    }

    impl SessionControl for FakeSession {
        fn stage(&self) -> ConnectionStage {
            self.stage
        }

        fn leave(&mut self) {
            self.calls.push("leave");
            self.target = ConnectionStage::Initialized;
        }

        fn cleanup(&mut self) {
            self.calls.push("cleanup");
            self.target = ConnectionStage::NotInitialized;
        }

        fn initialize(&mut self) {
            self.calls.push("initialize");
            self.target = ConnectionStage::Initialized;
        }

        fn join(&mut self, _network_id: &NetworkId) {
            self.calls.push("join");
            self.target = ConnectionStage::ConnectedToNetwork;
        }
    }

    fn run(session: &mut FakeSession, sequencer: &mut TaskSequencer<ResetTask>) {
        for _ in 0..32 {
            if !sequencer.has_work() {
                return;
            }
            sequencer.step(session);
            session.settle();
        }
    }

    #[test]
    fn connected_reset_runs_full_plan_in_order() {
        let network_id = NetworkId::new("invite", "descriptor");
        let mut session = FakeSession::at(ConnectionStage::ConnectedToNetwork);
        let mut sequencer = TaskSequencer::new();
        sequencer.extend(reset_plan(session.stage, Some(&network_id)));

        run(&mut session, &mut sequencer);

        assert_eq!(session.calls, vec!["leave", "cleanup", "initialize", "join"]);
        assert_eq!(session.stage, ConnectionStage::ConnectedToNetwork);
        assert!(!sequencer.has_work());
    }

    #[test]
    fn unconnected_reset_skips_leave_and_join() {
        let plan = reset_plan(ConnectionStage::Initialized, None);
        assert_eq!(plan, vec![ResetTask::Cleanup, ResetTask::Initialize]);

        let mut session = FakeSession::at(ConnectionStage::Initialized);
        let mut sequencer = TaskSequencer::new();
        sequencer.extend(plan);
        run(&mut session, &mut sequencer);

        assert_eq!(session.calls, vec!["cleanup", "initialize"]);
    }

    #[test]
    fn connected_without_identity_does_not_rejoin() {
        let plan = reset_plan(ConnectionStage::ConnectedToNetwork, None);
        assert_eq!(plan, vec![ResetTask::Cleanup, ResetTask::Initialize]);
    }

    #[test]
    fn skipped_task_starts_next_in_same_step() {
        let mut session = FakeSession::at(ConnectionStage::Initialized);
        let mut sequencer = TaskSequencer::new();
        sequencer.push(ResetTask::Leave);
        sequencer.push(ResetTask::Cleanup);

        sequencer.step(&mut session);

        assert_eq!(sequencer.running(), Some(&ResetTask::Cleanup));
        assert_eq!(session.calls, vec!["cleanup"]);
    }

    #[test]
    fn running_task_waits_for_target_stage() {
        let mut session = FakeSession::at(ConnectionStage::NotInitialized);
        let mut sequencer = TaskSequencer::new();
        sequencer.push(ResetTask::Initialize);

        sequencer.step(&mut session);
        sequencer.step(&mut session);
        assert_eq!(sequencer.running(), Some(&ResetTask::Initialize));

        session.settle();
        sequencer.step(&mut session);
        assert!(!sequencer.has_work());
    }

    #[test]
    fn clear_abandons_everything() {
        let mut session = FakeSession::at(ConnectionStage::ConnectedToNetwork);
        let mut sequencer = TaskSequencer::new();
        sequencer.extend(reset_plan(session.stage, Some(&NetworkId::new("a", "b"))));
        sequencer.step(&mut session);
        assert!(sequencer.running().is_some());

        sequencer.clear();

        assert!(!sequencer.has_work());
        assert_eq!(sequencer.pending().count(), 0);
    }
}
