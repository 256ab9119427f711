//! Action items: what a satisfied rule does.
//!
//! An action never touches storage directly. It inspects the context, decides,
//! and appends commands to the open batch; the batch owner commits or rolls
//! back.

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::command::{CommandProcessor, InsertWorkQueueCommand};
use crate::error::{Result, StrataError};
use crate::expression::Expression;
use crate::subject::Subject;
use crate::types::{QueueType, TimeUnit};
use crate::work_queue::WorkQueueEntry;

// ---------------------------------------------------------------------------
// ActionContext
// ---------------------------------------------------------------------------

/// Per-invocation state handed to an action.
pub struct ActionContext<'a> {
    pub subject: &'a Subject,
    pub now: DateTime<Utc>,
    pub filesystem_key: Option<&'a str>,
    pub study_key: Option<&'a str>,
    pub processor: &'a mut CommandProcessor,
}

// ---------------------------------------------------------------------------
// ActionItem
// ---------------------------------------------------------------------------

pub trait ActionItem: Send + Sync {
    fn name(&self) -> &str;

    /// Append this action's commands to `ctx.processor`.
    ///
    /// Returns `Ok(false)` when the context lacks what the action needs; that
    /// is not an error.
    fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// TimeOffset
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOffset {
    pub amount: i64,
    pub unit: TimeUnit,
}

impl TimeOffset {
    pub fn new(amount: i64, unit: TimeUnit) -> Self {
        Self { amount, unit }
    }

    /// `base` shifted by this offset. Months and years follow calendar rules
    /// (Jan 31 + 1 month = Feb 28/29).
    pub fn apply(&self, base: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let shifted = match self.unit {
            TimeUnit::Months => add_months(base, self.amount),
            TimeUnit::Years => self
                .amount
                .checked_mul(12)
                .and_then(|months| add_months(base, months)),
            unit => fixed_duration(unit, self.amount).and_then(|d| base.checked_add_signed(d)),
        };
        shifted.ok_or_else(|| StrataError::InvalidOffset(format!("{self} from {base}")))
    }
}

impl std::fmt::Display for TimeOffset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.amount, self.unit)
    }
}

fn fixed_duration(unit: TimeUnit, amount: i64) -> Option<Duration> {
    let seconds_per_unit: i64 = match unit {
        TimeUnit::Seconds => 1,
        TimeUnit::Minutes => 60,
        TimeUnit::Hours => 60 * 60,
        TimeUnit::Days => 24 * 60 * 60,
        TimeUnit::Weeks => 7 * 24 * 60 * 60,
        TimeUnit::Months | TimeUnit::Years => return None,
    };
    amount
        .checked_mul(seconds_per_unit)
        .and_then(Duration::try_seconds)
}

fn add_months(base: DateTime<Utc>, months: i64) -> Option<DateTime<Utc>> {
    let magnitude = u32::try_from(months.unsigned_abs()).ok()?;
    if months >= 0 {
        base.checked_add_months(Months::new(magnitude))
    } else {
        base.checked_sub_months(Months::new(magnitude))
    }
}

// ---------------------------------------------------------------------------
// ScheduleQueueAction
// ---------------------------------------------------------------------------

/// Enqueue a work entry for the study at `reference` (or now) plus `offset`.
pub struct ScheduleQueueAction {
    name: String,
    queue_type: QueueType,
    offset: TimeOffset,
    reference: Option<Expression>,
    data: Option<serde_json::Value>,
}

impl ScheduleQueueAction {
    pub fn new(name: impl Into<String>, queue_type: QueueType, offset: TimeOffset) -> Self {
        Self {
            name: name.into(),
            queue_type,
            offset,
            reference: None,
            data: None,
        }
    }

    pub fn with_reference(mut self, reference: Expression) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    fn base_time(&self, ctx: &ActionContext<'_>) -> Result<DateTime<Utc>> {
        let Some(reference) = &self.reference else {
            return Ok(ctx.now);
        };
        let value = reference.evaluate(ctx.subject)?;
        match value.as_ref().and_then(|v| v.as_datetime()) {
            Some(at) => Ok(at),
            None => {
                debug!(
                    action = %self.name,
                    reference = %reference,
                    "reference time unavailable, scheduling from now"
                );
                Ok(ctx.now)
            }
        }
    }
}

impl ActionItem for ScheduleQueueAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<bool> {
        let (Some(filesystem_key), Some(study_key)) = (ctx.filesystem_key, ctx.study_key) else {
            return Ok(false);
        };
        let scheduled = self.offset.apply(self.base_time(ctx)?)?;

        let mut entry = WorkQueueEntry::new(self.queue_type, scheduled)
            .for_study(study_key)
            .on_filesystem(filesystem_key);
        if let Some(data) = &self.data {
            entry = entry.with_data(data.clone());
        }
        debug!(
            action = %self.name,
            study = study_key,
            queue = %self.queue_type,
            scheduled = %scheduled,
            "scheduling work"
        );
        ctx.processor.add_command(InsertWorkQueueCommand::new(entry));
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// ActionDef (declarative form)
// ---------------------------------------------------------------------------

/// Action as written in a rules file, keyed by `type:`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ActionDef {
    /// Migrate the study off tier-1 storage.
    Tier1Retention {
        time: i64,
        unit: TimeUnit,
        #[serde(default)]
        reference: Option<Expression>,
    },
    /// Make the study a candidate for deletion from online storage.
    OnlineRetention {
        time: i64,
        unit: TimeUnit,
        #[serde(default)]
        reference: Option<Expression>,
    },
    LosslessCompress {
        time: i64,
        unit: TimeUnit,
        #[serde(default)]
        reference: Option<Expression>,
    },
    LossyCompress {
        time: i64,
        unit: TimeUnit,
        #[serde(default)]
        reference: Option<Expression>,
        ratio: f64,
    },
}

impl ActionDef {
    pub fn type_name(&self) -> &'static str {
        match self {
            ActionDef::Tier1Retention { .. } => "tier1-retention",
            ActionDef::OnlineRetention { .. } => "online-retention",
            ActionDef::LosslessCompress { .. } => "lossless-compress",
            ActionDef::LossyCompress { .. } => "lossy-compress",
        }
    }

    /// Build the runtime action for the rule named `rule`.
    pub fn compile(&self, rule: &str) -> Result<Box<dyn ActionItem>> {
        let (queue_type, time, unit, reference) = match self {
            ActionDef::Tier1Retention { time, unit, reference } => {
                (QueueType::TierMigrate, *time, *unit, reference)
            }
            ActionDef::OnlineRetention { time, unit, reference } => {
                (QueueType::StudyDelete, *time, *unit, reference)
            }
            ActionDef::LosslessCompress { time, unit, reference } => {
                (QueueType::LosslessCompress, *time, *unit, reference)
            }
            ActionDef::LossyCompress { time, unit, reference, .. } => {
                (QueueType::LossyCompress, *time, *unit, reference)
            }
        };

        let mut action = ScheduleQueueAction::new(
            format!("{rule}/{}", self.type_name()),
            queue_type,
            TimeOffset::new(time, unit),
        );
        if let Some(reference) = reference {
            action = action.with_reference(reference.clone());
        }
        if let ActionDef::LossyCompress { ratio, .. } = self {
            if !ratio.is_finite() || *ratio <= 1.0 {
                return Err(StrataError::InvalidRule {
                    rule: rule.to_string(),
                    reason: format!("lossy-compress ratio must be greater than 1, got {ratio}"),
                });
            }
            action = action.with_data(serde_json::json!({ "ratio": ratio }));
        }
        Ok(Box::new(action))
    }
}
