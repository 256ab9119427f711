use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StrataError;

// ---------------------------------------------------------------------------
// FilesystemTier
// ---------------------------------------------------------------------------

/// Ranked storage class. Lower rank is preferred for placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilesystemTier {
    Tier1,
    Tier2,
    Tier3,
}

impl FilesystemTier {
    pub fn all() -> &'static [FilesystemTier] {
        &[
            FilesystemTier::Tier1,
            FilesystemTier::Tier2,
            FilesystemTier::Tier3,
        ]
    }

    pub fn rank(self) -> u8 {
        match self {
            FilesystemTier::Tier1 => 1,
            FilesystemTier::Tier2 => 2,
            FilesystemTier::Tier3 => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FilesystemTier::Tier1 => "tier1",
            FilesystemTier::Tier2 => "tier2",
            FilesystemTier::Tier3 => "tier3",
        }
    }
}

impl fmt::Display for FilesystemTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FilesystemTier {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tier1" => Ok(FilesystemTier::Tier1),
            "tier2" => Ok(FilesystemTier::Tier2),
            "tier3" => Ok(FilesystemTier::Tier3),
            other => Err(StrataError::UnknownType {
                kind: "filesystem tier",
                value: other.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// QueueType
// ---------------------------------------------------------------------------

/// Type tag of a work queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueType {
    /// Move the study to a lower-preference tier.
    TierMigrate,
    /// Candidate for removal once the filesystem crosses its high watermark.
    StudyDelete,
    LosslessCompress,
    LossyCompress,
    /// Remove the study from the archive.
    PurgeStudy,
}

impl QueueType {
    pub fn all() -> &'static [QueueType] {
        &[
            QueueType::TierMigrate,
            QueueType::StudyDelete,
            QueueType::LosslessCompress,
            QueueType::LossyCompress,
            QueueType::PurgeStudy,
        ]
    }

    /// Types written by rule actions, replaced wholesale when rules are reapplied.
    pub fn rule_driven() -> &'static [QueueType] {
        &[
            QueueType::TierMigrate,
            QueueType::StudyDelete,
            QueueType::LosslessCompress,
            QueueType::LossyCompress,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueueType::TierMigrate => "tier-migrate",
            QueueType::StudyDelete => "study-delete",
            QueueType::LosslessCompress => "lossless-compress",
            QueueType::LossyCompress => "lossy-compress",
            QueueType::PurgeStudy => "purge-study",
        }
    }
}

impl fmt::Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueueType {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueType::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| StrataError::UnknownType {
                kind: "queue type",
                value: s.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// ServiceLockType
// ---------------------------------------------------------------------------

/// Recurring job types gated by a service lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceLockType {
    FilesystemReapplyRules,
    FilesystemDelete,
    QueueMaintenance,
}

impl ServiceLockType {
    pub fn all() -> &'static [ServiceLockType] {
        &[
            ServiceLockType::FilesystemReapplyRules,
            ServiceLockType::FilesystemDelete,
            ServiceLockType::QueueMaintenance,
        ]
    }

    /// Whether one lock exists per filesystem rather than one per fleet.
    pub fn is_per_filesystem(self) -> bool {
        matches!(
            self,
            ServiceLockType::FilesystemReapplyRules | ServiceLockType::FilesystemDelete
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceLockType::FilesystemReapplyRules => "filesystem-reapply-rules",
            ServiceLockType::FilesystemDelete => "filesystem-delete",
            ServiceLockType::QueueMaintenance => "queue-maintenance",
        }
    }
}

impl fmt::Display for ServiceLockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ServiceLockType {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceLockType::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| StrataError::UnknownType {
                kind: "service lock type",
                value: s.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// RuleType
// ---------------------------------------------------------------------------

/// Groups rules for exempt/default resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleType {
    Tier1Retention,
    OnlineRetention,
    LosslessCompress,
    LossyCompress,
}

impl RuleType {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleType::Tier1Retention => "tier1-retention",
            RuleType::OnlineRetention => "online-retention",
            RuleType::LosslessCompress => "lossless-compress",
            RuleType::LossyCompress => "lossy-compress",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TimeUnit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
    Years,
}

impl TimeUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            TimeUnit::Seconds => "seconds",
            TimeUnit::Minutes => "minutes",
            TimeUnit::Hours => "hours",
            TimeUnit::Days => "days",
            TimeUnit::Weeks => "weeks",
            TimeUnit::Months => "months",
            TimeUnit::Years => "years",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
