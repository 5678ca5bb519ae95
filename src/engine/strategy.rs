//! How a rebroadcast picks the delegate a task is offered to next.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::config::AssignmentMode;
use crate::error::Result;
use crate::model::{Task, keys};
use crate::services::{AssignmentService, CAPABILITY_ASSIGNMENT, FeatureFlagService};
use crate::store::TaskUpdate;

/// Adds delegate-selection changes to a pending rebroadcast update.
#[async_trait]
pub trait AssignmentStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Extend `update` for `task`, as read before the rebroadcast.
    async fn prepare(&self, task: &Task, update: &mut TaskUpdate) -> Result<()>;
}

/// Releases a soft pre-assignment after the first broadcast so any delegate
/// may claim the task.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyAssignmentStrategy;

#[async_trait]
impl AssignmentStrategy for LegacyAssignmentStrategy {
    fn name(&self) -> &'static str {
        "legacy"
    }

    async fn prepare(&self, task: &Task, update: &mut TaskUpdate) -> Result<()> {
        if task.pre_assigned_delegate().is_some()
            && task.must_execute_on().is_none()
            && task.broadcast_count > 0
        {
            update.unset(keys::PRE_ASSIGNED_DELEGATE_ID);
        }
        Ok(())
    }
}

/// Rotates the pre-assignment through capable delegates, never offering the
/// task twice to the same one.
pub struct CapabilityAssignmentStrategy {
    assignment: Arc<dyn AssignmentService>,
}

impl CapabilityAssignmentStrategy {
    pub fn new(assignment: Arc<dyn AssignmentService>) -> Self {
        Self { assignment }
    }
}

#[async_trait]
impl AssignmentStrategy for CapabilityAssignmentStrategy {
    fn name(&self) -> &'static str {
        "capability"
    }

    async fn prepare(&self, task: &Task, update: &mut TaskUpdate) -> Result<()> {
        if task.must_execute_on().is_some() {
            return Ok(());
        }
        let mut tried = task.already_tried_delegates.clone();
        if let Some(previous) = task.pre_assigned_delegate() {
            tried.insert(previous.clone());
            update.set_already_tried_delegates(&tried);
        }
        let next = self
            .assignment
            .obtain_capable_delegate_id(task, &tried)
            .await?;
        debug!(task_id = %task.uuid, next = ?next, tried = tried.len(), "capability pre-assignment");
        update.set_or_unset_pre_assigned_delegate(next.as_ref());
        Ok(())
    }
}

/// Chooses between the two strategies per account via the
/// [`CAPABILITY_ASSIGNMENT`] feature flag.
pub struct FlaggedAssignmentStrategy {
    flags: Arc<dyn FeatureFlagService>,
    legacy: LegacyAssignmentStrategy,
    capability: CapabilityAssignmentStrategy,
}

impl FlaggedAssignmentStrategy {
    pub fn new(flags: Arc<dyn FeatureFlagService>, assignment: Arc<dyn AssignmentService>) -> Self {
        Self {
            flags,
            legacy: LegacyAssignmentStrategy,
            capability: CapabilityAssignmentStrategy::new(assignment),
        }
    }
}

#[async_trait]
impl AssignmentStrategy for FlaggedAssignmentStrategy {
    fn name(&self) -> &'static str {
        "per-account"
    }

    async fn prepare(&self, task: &Task, update: &mut TaskUpdate) -> Result<()> {
        if self
            .flags
            .is_enabled(CAPABILITY_ASSIGNMENT, &task.account_id)
            .await?
        {
            self.capability.prepare(task, update).await
        } else {
            self.legacy.prepare(task, update).await
        }
    }
}

/// Build the strategy for a configured mode.
pub fn for_mode(
    mode: AssignmentMode,
    assignment: Arc<dyn AssignmentService>,
    flags: Arc<dyn FeatureFlagService>,
) -> Arc<dyn AssignmentStrategy> {
    match mode {
        AssignmentMode::Legacy => Arc::new(LegacyAssignmentStrategy),
        AssignmentMode::Capability => Arc::new(CapabilityAssignmentStrategy::new(assignment)),
        AssignmentMode::PerAccount => Arc::new(FlaggedAssignmentStrategy::new(flags, assignment)),
    }
}
