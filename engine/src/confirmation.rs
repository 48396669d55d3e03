//! Confirmation board: every projected entity waiting for, or past, user consent.
//!
//! # State machine
//!
//! ```text
//! pending ──confirm / countdown──► confirmed ──undo──► removed
//!    │                                 ▲
//!    └──cancel──► cancelled            │ create failed: back to pending
//! ```
//!
//! The board is pure. Transitions that need the server return a
//! [`BoardCommand`] for the caller to execute; the outcome comes back through
//! [`ConfirmationBoard::create_settled`] or [`ConfirmationBoard::delete_settled`].
//! At most one request is in flight per entity; an undo issued while the
//! create is still running is queued behind it.

use std::collections::BTreeMap;

use fieldhand_types::{ConfirmationStatus, EntityKey, PendingAction, RecordKind};

pub const DEFAULT_AUTO_CONFIRM_SECS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Countdown {
    Running { remaining: u32 },
    Stopped,
}

/// Server round-trip currently owned by an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Creating { undo_queued: bool },
    Deleting,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub key: EntityKey,
    pub action: PendingAction,
    pub status: ConfirmationStatus,
    pub countdown: Countdown,
    /// Identifier from the create response. Undo requires it.
    pub server_id: Option<String>,
    pub sync: SyncState,
    pub last_error: Option<String>,
}

impl PendingEntry {
    #[must_use]
    pub fn seconds_left(&self) -> Option<u32> {
        match self.countdown {
            Countdown::Running { remaining } => Some(remaining),
            Countdown::Stopped => None,
        }
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.status == ConfirmationStatus::Confirmed
            && match self.sync {
                SyncState::Idle => self.server_id.is_some(),
                SyncState::Creating { undo_queued } => !undo_queued,
                SyncState::Deleting => false,
            }
    }

    fn begin_create(&mut self) -> BoardCommand {
        self.status = ConfirmationStatus::Confirmed;
        self.countdown = Countdown::Stopped;
        self.sync = SyncState::Creating { undo_queued: false };
        self.last_error = None;
        BoardCommand::Create {
            key: self.key,
            action: self.action.clone(),
        }
    }

    fn begin_delete(&mut self, server_id: String) -> BoardCommand {
        self.sync = SyncState::Deleting;
        self.last_error = None;
        BoardCommand::Delete {
            key: self.key,
            kind: self.action.record_kind(),
            server_id,
        }
    }
}

/// Server request the board needs executed.
#[derive(Debug, Clone, PartialEq)]
pub enum BoardCommand {
    Create {
        key: EntityKey,
        action: PendingAction,
    },
    Delete {
        key: EntityKey,
        kind: RecordKind,
        server_id: String,
    },
}

/// The last server request that failed, kept so the user can retry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedCommand {
    Create(EntityKey),
    Delete(EntityKey),
}

impl FailedCommand {
    #[must_use]
    pub fn key(self) -> EntityKey {
        match self {
            Self::Create(key) | Self::Delete(key) => key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfirmationError {
    #[error("no entity {0}")]
    UnknownEntity(EntityKey),
    #[error("entity {key} is {} and can no longer be confirmed or cancelled", .status.as_str())]
    NotPending {
        key: EntityKey,
        status: ConfirmationStatus,
    },
    #[error("entity {key} is {} and cannot be undone", .status.as_str())]
    NotConfirmed {
        key: EntityKey,
        status: ConfirmationStatus,
    },
    #[error("entity {0} has no server id; nothing to undo")]
    UndoUnavailable(EntityKey),
    #[error("entity {0} already has a request in flight")]
    RequestInFlight(EntityKey),
    #[error("entity {0} is still awaiting a decision")]
    NotSettled(EntityKey),
    #[error("no failed action to retry")]
    NothingToRetry,
}

#[derive(Debug)]
pub struct ConfirmationBoard {
    entries: BTreeMap<EntityKey, PendingEntry>,
    next_key: u64,
    auto_confirm_secs: u32,
    auto_confirm: bool,
    last_failed: Option<FailedCommand>,
}

impl Default for ConfirmationBoard {
    fn default() -> Self {
        Self::new(DEFAULT_AUTO_CONFIRM_SECS, true)
    }
}

impl ConfirmationBoard {
    /// `auto_confirm_secs == 0` disables the countdown.
    #[must_use]
    pub fn new(auto_confirm_secs: u32, auto_confirm: bool) -> Self {
        Self {
            entries: BTreeMap::new(),
            next_key: 1,
            auto_confirm_secs,
            auto_confirm: auto_confirm && auto_confirm_secs > 0,
            last_failed: None,
        }
    }

    fn fresh_countdown(&self) -> Countdown {
        if self.auto_confirm {
            Countdown::Running {
                remaining: self.auto_confirm_secs,
            }
        } else {
            Countdown::Stopped
        }
    }

    fn entry_mut(&mut self, key: EntityKey) -> Result<&mut PendingEntry, ConfirmationError> {
        self.entries
            .get_mut(&key)
            .ok_or(ConfirmationError::UnknownEntity(key))
    }

    fn forget_failure_of(&mut self, key: EntityKey) {
        if self.last_failed.is_some_and(|failed| failed.key() == key) {
            self.last_failed = None;
        }
    }

    pub fn append(&mut self, action: PendingAction) -> EntityKey {
        let key = EntityKey::new(self.next_key);
        self.next_key += 1;
        let countdown = self.fresh_countdown();
        tracing::debug!(%key, label = action.label(), "Pending action added");
        self.entries.insert(
            key,
            PendingEntry {
                key,
                action,
                status: ConfirmationStatus::Pending,
                countdown,
                server_id: None,
                sync: SyncState::Idle,
                last_error: None,
            },
        );
        key
    }

    /// Advance every running countdown by one second.
    ///
    /// An entry reaching zero is confirmed exactly once; its countdown stops
    /// in the same step.
    pub fn tick(&mut self) -> Vec<BoardCommand> {
        let mut commands = Vec::new();
        for entry in self.entries.values_mut() {
            if entry.status != ConfirmationStatus::Pending {
                continue;
            }
            let Countdown::Running { remaining } = entry.countdown else {
                continue;
            };
            let remaining = remaining.saturating_sub(1);
            if remaining == 0 {
                tracing::info!(key = %entry.key, "Auto-confirming pending action");
                commands.push(entry.begin_create());
            } else {
                entry.countdown = Countdown::Running { remaining };
            }
        }
        for command in &commands {
            if let BoardCommand::Create { key, .. } = command {
                self.forget_failure_of(*key);
            }
        }
        commands
    }

    pub fn confirm(&mut self, key: EntityKey) -> Result<BoardCommand, ConfirmationError> {
        let entry = self.entry_mut(key)?;
        if entry.status != ConfirmationStatus::Pending {
            return Err(ConfirmationError::NotPending {
                key,
                status: entry.status,
            });
        }
        let command = entry.begin_create();
        self.forget_failure_of(key);
        Ok(command)
    }

    pub fn cancel(&mut self, key: EntityKey) -> Result<(), ConfirmationError> {
        let entry = self.entry_mut(key)?;
        if entry.status != ConfirmationStatus::Pending {
            return Err(ConfirmationError::NotPending {
                key,
                status: entry.status,
            });
        }
        entry.status = ConfirmationStatus::Cancelled;
        entry.countdown = Countdown::Stopped;
        self.forget_failure_of(key);
        Ok(())
    }

    /// Undo a confirmed entity.
    ///
    /// Returns `Ok(None)` when the undo was queued behind an in-flight create.
    pub fn undo(&mut self, key: EntityKey) -> Result<Option<BoardCommand>, ConfirmationError> {
        let entry = self.entry_mut(key)?;
        if entry.status != ConfirmationStatus::Confirmed {
            return Err(ConfirmationError::NotConfirmed {
                key,
                status: entry.status,
            });
        }
        match entry.sync {
            SyncState::Deleting | SyncState::Creating { undo_queued: true } => {
                Err(ConfirmationError::RequestInFlight(key))
            }
            SyncState::Creating { undo_queued: false } => {
                entry.sync = SyncState::Creating { undo_queued: true };
                Ok(None)
            }
            SyncState::Idle => {
                let Some(server_id) = entry.server_id.clone() else {
                    return Err(ConfirmationError::UndoUnavailable(key));
                };
                let command = entry.begin_delete(server_id);
                self.forget_failure_of(key);
                Ok(Some(command))
            }
        }
    }

    /// Apply the outcome of a create request.
    ///
    /// May return the queued delete.
    pub fn create_settled(
        &mut self,
        key: EntityKey,
        outcome: Result<Option<String>, String>,
    ) -> Option<BoardCommand> {
        let Some(entry) = self.entries.get_mut(&key) else {
            tracing::warn!(%key, "Create settled for unknown entity");
            return None;
        };
        let SyncState::Creating { undo_queued } = entry.sync else {
            tracing::warn!(%key, sync = ?entry.sync, "Create settled without a create in flight");
            return None;
        };

        match outcome {
            Ok(server_id) => {
                entry.server_id = server_id;
                entry.sync = SyncState::Idle;
                if !undo_queued {
                    return None;
                }
                match entry.server_id.clone() {
                    Some(id) => Some(entry.begin_delete(id)),
                    None => {
                        tracing::warn!(%key, "Queued undo dropped: create returned no id");
                        entry.last_error = Some("server returned no id; undo unavailable".into());
                        None
                    }
                }
            }
            Err(error) if undo_queued => {
                tracing::info!(%key, %error, "Create failed with undo queued; dropping entity");
                self.entries.remove(&key);
                None
            }
            Err(error) => {
                entry.status = ConfirmationStatus::Pending;
                entry.countdown = Countdown::Stopped;
                entry.sync = SyncState::Idle;
                entry.last_error = Some(error);
                self.last_failed = Some(FailedCommand::Create(key));
                None
            }
        }
    }

    /// Apply the outcome of a delete request. Success removes the entity.
    pub fn delete_settled(&mut self, key: EntityKey, outcome: Result<(), String>) {
        let Some(entry) = self.entries.get_mut(&key) else {
            tracing::warn!(%key, "Delete settled for unknown entity");
            return;
        };
        if entry.sync != SyncState::Deleting {
            tracing::warn!(%key, sync = ?entry.sync, "Delete settled without a delete in flight");
            return;
        }
        match outcome {
            Ok(()) => {
                self.entries.remove(&key);
                self.forget_failure_of(key);
            }
            Err(error) => {
                entry.sync = SyncState::Idle;
                entry.last_error = Some(error);
                self.last_failed = Some(FailedCommand::Delete(key));
            }
        }
    }

    /// Start or stop the countdown of a pending entity. Re-enabling restarts it.
    pub fn set_auto_confirm(&mut self, key: EntityKey, enabled: bool) -> Result<(), ConfirmationError> {
        let full = self.auto_confirm_secs;
        let entry = self.entry_mut(key)?;
        if entry.status != ConfirmationStatus::Pending {
            return Err(ConfirmationError::NotPending {
                key,
                status: entry.status,
            });
        }
        entry.countdown = match (enabled, entry.countdown) {
            (true, running @ Countdown::Running { .. }) => running,
            (true, Countdown::Stopped) if full > 0 => Countdown::Running { remaining: full },
            _ => Countdown::Stopped,
        };
        Ok(())
    }

    /// Remove a settled entity from the board.
    pub fn dismiss(&mut self, key: EntityKey) -> Result<PendingEntry, ConfirmationError> {
        let entry = self
            .entries
            .get(&key)
            .ok_or(ConfirmationError::UnknownEntity(key))?;
        let settled = match entry.status {
            ConfirmationStatus::Cancelled => true,
            ConfirmationStatus::Confirmed => entry.sync == SyncState::Idle,
            ConfirmationStatus::Pending => false,
        };
        if !settled {
            return Err(match entry.status {
                ConfirmationStatus::Pending => ConfirmationError::NotSettled(key),
                _ => ConfirmationError::RequestInFlight(key),
            });
        }
        self.forget_failure_of(key);
        self.entries
            .remove(&key)
            .ok_or(ConfirmationError::UnknownEntity(key))
    }

    /// Re-issue the most recent failed request.
    pub fn retry_last_failed(&mut self) -> Result<BoardCommand, ConfirmationError> {
        let failed = self
            .last_failed
            .take()
            .ok_or(ConfirmationError::NothingToRetry)?;
        match failed {
            FailedCommand::Create(key) => self.confirm(key),
            FailedCommand::Delete(key) => self
                .undo(key)?
                .ok_or(ConfirmationError::RequestInFlight(key)),
        }
    }

    /// Fill `field_name` on entries that only carry a `field_id`.
    pub fn backfill_field_names(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for entry in self.entries.values_mut() {
            if entry.action.field_name().is_some() {
                continue;
            }
            if let Some(name) = entry.action.field_id().and_then(&lookup) {
                entry.action.set_field_name(name);
            }
        }
    }

    #[must_use]
    pub fn get(&self, key: EntityKey) -> Option<&PendingEntry> {
        self.entries.get(&key)
    }

    pub fn entries(&self) -> impl Iterator<Item = &PendingEntry> {
        self.entries.values()
    }

    #[must_use]
    pub fn last_failed(&self) -> Option<FailedCommand> {
        self.last_failed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True while some pending entry is counting down.
    #[must_use]
    pub fn has_running_countdown(&self) -> bool {
        self.entries.values().any(|e| {
            e.status == ConfirmationStatus::Pending
                && matches!(e.countdown, Countdown::Running { .. })
        })
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.status == ConfirmationStatus::Pending)
            .count()
    }
}
