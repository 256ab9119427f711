//! Transactional command batching.
//!
//! A [`CommandProcessor`] runs its commands in insertion order inside one
//! catalog write transaction. Other connections see either every catalog write
//! of the batch or none of them. If a command fails, or the batch is cancelled
//! between commands, the transaction rolls back and the commands that ran get
//! [`Command::undo`] in reverse order for anything they did outside the catalog.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::error::{Result, StrataError};
use crate::study::StudyStorage;
use crate::types::QueueType;
use crate::work_queue::WorkQueueEntry;

// ---------------------------------------------------------------------------
// CancelToken
// ---------------------------------------------------------------------------

/// Cooperative cancellation flag shared between a host and running jobs.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// One mutation owned by a batch.
pub trait Command: Send {
    fn description(&self) -> String;
    fn execute(&mut self, catalog: &Catalog) -> Result<()>;

    /// Reverse effects outside the catalog. Runs after the batch transaction
    /// has rolled back, so catalog writes need no undo.
    fn undo(&mut self, _catalog: &Catalog) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CommandProcessor
// ---------------------------------------------------------------------------

pub struct CommandProcessor {
    description: String,
    commands: Vec<Box<dyn Command>>,
}

impl CommandProcessor {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            commands: Vec::new(),
        }
    }

    pub fn add_command(&mut self, command: impl Command + 'static) {
        self.commands.push(Box::new(command));
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Run the batch. Returns the number of commands executed.
    ///
    /// Fails with [`StrataError::CommandFailed`] naming the first failing
    /// command, or [`StrataError::Cancelled`] when `cancel` fires between
    /// commands. In both cases no catalog write of the batch survives.
    pub fn execute(self, catalog: &Catalog, cancel: &CancelToken) -> Result<usize> {
        let description = self.description;
        let mut done: Vec<Box<dyn Command>> = Vec::with_capacity(self.commands.len());

        let result = catalog.write_tx(|_| {
            for mut command in self.commands {
                if cancel.is_cancelled() {
                    warn!(batch = %description, executed = done.len(), "batch cancelled, rolling back");
                    return Err(StrataError::Cancelled);
                }
                if let Err(e) = command.execute(catalog) {
                    let name = command.description();
                    warn!(batch = %description, command = %name, error = %e, "command failed, rolling back");
                    return Err(StrataError::CommandFailed {
                        command: name,
                        source: Box::new(e),
                    });
                }
                done.push(command);
            }
            Ok(done.len())
        });

        match result {
            Ok(count) => {
                debug!(batch = %description, count, "batch committed");
                Ok(count)
            }
            Err(e) => {
                undo_all(catalog, &mut done);
                Err(e)
            }
        }
    }
}

fn undo_all(catalog: &Catalog, done: &mut [Box<dyn Command>]) {
    for command in done.iter_mut().rev() {
        if let Err(e) = command.undo(catalog) {
            error!(command = %command.description(), error = %e, "undo failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Built-in commands
// ---------------------------------------------------------------------------

pub struct InsertWorkQueueCommand {
    entry: WorkQueueEntry,
}

impl InsertWorkQueueCommand {
    pub fn new(entry: WorkQueueEntry) -> Self {
        Self { entry }
    }
}

impl Command for InsertWorkQueueCommand {
    fn description(&self) -> String {
        format!(
            "insert {} entry for {}",
            self.entry.queue_type,
            self.entry.study_key.as_deref().unwrap_or("-")
        )
    }

    fn execute(&mut self, catalog: &Catalog) -> Result<()> {
        catalog.insert_work_queue(&self.entry)
    }
}

pub struct DeleteWorkQueueCommand {
    id: Uuid,
}

impl DeleteWorkQueueCommand {
    pub fn new(id: Uuid) -> Self {
        Self { id }
    }
}

impl Command for DeleteWorkQueueCommand {
    fn description(&self) -> String {
        format!("delete work queue entry {}", self.id)
    }

    fn execute(&mut self, catalog: &Catalog) -> Result<()> {
        catalog.delete_work_queue(self.id)
    }
}

/// Drops a study's pending entries of the given types, e.g. before rules are
/// re-applied so that stale decisions are replaced rather than duplicated.
pub struct DeleteStudyQueueCommand {
    study_key: String,
    types: Vec<QueueType>,
}

impl DeleteStudyQueueCommand {
    pub fn new(study_key: impl Into<String>, types: &[QueueType]) -> Self {
        Self {
            study_key: study_key.into(),
            types: types.to_vec(),
        }
    }
}

impl Command for DeleteStudyQueueCommand {
    fn description(&self) -> String {
        format!("delete pending entries for {}", self.study_key)
    }

    fn execute(&mut self, catalog: &Catalog) -> Result<()> {
        let removed = catalog.delete_pending_work_queue_for_study(&self.study_key, &self.types)?;
        debug!(study = %self.study_key, removed = removed.len(), "pending entries dropped");
        Ok(())
    }
}

pub struct UpdateStudyFilesystemCommand {
    study_key: String,
    filesystem_key: String,
}

impl UpdateStudyFilesystemCommand {
    pub fn new(study_key: impl Into<String>, filesystem_key: impl Into<String>) -> Self {
        Self {
            study_key: study_key.into(),
            filesystem_key: filesystem_key.into(),
        }
    }
}

impl Command for UpdateStudyFilesystemCommand {
    fn description(&self) -> String {
        format!("move {} to {}", self.study_key, self.filesystem_key)
    }

    fn execute(&mut self, catalog: &Catalog) -> Result<()> {
        catalog.update_study_filesystem(&self.study_key, &self.filesystem_key)?;
        Ok(())
    }
}

pub struct DeleteStudyStorageCommand {
    study_key: String,
}

impl DeleteStudyStorageCommand {
    pub fn new(study_key: impl Into<String>) -> Self {
        Self {
            study_key: study_key.into(),
        }
    }
}

impl Command for DeleteStudyStorageCommand {
    fn description(&self) -> String {
        format!("delete storage record for {}", self.study_key)
    }

    fn execute(&mut self, catalog: &Catalog) -> Result<()> {
        catalog.delete_study(&self.study_key)
    }
}

/// Rewrites a study's storage record, e.g. after its pixel data was recoded.
pub struct UpdateStudyStorageCommand {
    study: StudyStorage,
}

impl UpdateStudyStorageCommand {
    pub fn new(study: StudyStorage) -> Self {
        Self { study }
    }
}

impl Command for UpdateStudyStorageCommand {
    fn description(&self) -> String {
        format!("update storage record for {}", self.study.study_key)
    }

    fn execute(&mut self, catalog: &Catalog) -> Result<()> {
        catalog.update_study(&self.study)
    }
}
