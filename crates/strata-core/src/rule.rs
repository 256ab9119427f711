//! Rules: named predicates that own action items, and the engine that decides
//! which of them apply to a subject.
//!
//! Within one rule type, a satisfied exempt rule suppresses the whole type.
//! Otherwise every satisfied non-default rule applies, and only when none of
//! them does are the type's default rules applied.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::action::{ActionContext, ActionDef, ActionItem};
use crate::error::{Result, StrataError};
use crate::specification::{Predicate, PredicateDef};
use crate::subject::Subject;
use crate::types::{RuleType, ServiceLockType};

// ---------------------------------------------------------------------------
// RuleDefinition (declarative form)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub name: String,
    pub rule_type: RuleType,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub exempt: bool,
    #[serde(default)]
    pub condition: PredicateDef,
    #[serde(default)]
    pub actions: Vec<ActionDef>,
}

fn default_enabled() -> bool {
    true
}

impl RuleDefinition {
    pub fn compile(&self) -> Result<Rule> {
        if self.name.trim().is_empty() {
            return Err(StrataError::InvalidRule {
                rule: self.name.clone(),
                reason: "rule name is empty".to_string(),
            });
        }
        let actions = self
            .actions
            .iter()
            .map(|a| a.compile(&self.name))
            .collect::<Result<Vec<_>>>()?;
        Ok(Rule {
            name: self.name.clone(),
            rule_type: self.rule_type,
            enabled: self.enabled,
            default: self.default,
            exempt: self.exempt,
            predicate: self.condition.compile(&self.name)?,
            actions,
        })
    }
}

// ---------------------------------------------------------------------------
// Rule (compiled form)
// ---------------------------------------------------------------------------

pub struct Rule {
    pub name: String,
    pub rule_type: RuleType,
    pub enabled: bool,
    pub default: bool,
    pub exempt: bool,
    pub predicate: Predicate,
    pub actions: Vec<Box<dyn ActionItem>>,
}

impl Rule {
    pub fn is_satisfied_by(&self, subject: &Subject) -> Result<bool> {
        self.predicate.is_satisfied_by(subject)
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("rule_type", &self.rule_type)
            .field("default", &self.default)
            .field("exempt", &self.exempt)
            .field("actions", &self.actions.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// RulesEngine
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct RulesEngine {
    rules: Vec<Rule>,
}

/// What one engine run did for one subject.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RulesOutcome {
    pub applied: Vec<String>,
    pub actions_executed: usize,
}

impl RulesEngine {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules that apply to `subject`, grouped by rule type in type order and in
    /// definition order within a type.
    pub fn applicable(&self, subject: &Subject) -> Result<Vec<&Rule>> {
        let mut by_type: BTreeMap<RuleType, Vec<&Rule>> = BTreeMap::new();
        for rule in self.rules.iter().filter(|r| r.enabled) {
            by_type.entry(rule.rule_type).or_default().push(rule);
        }

        let mut applicable = Vec::new();
        for (rule_type, rules) in by_type {
            if let Some(exempt) = first_satisfied(rules.iter().filter(|r| r.exempt), subject)? {
                debug!(subject = %subject.key, rule_type = %rule_type, exempt_by = %exempt.name, "rule type exempted");
                continue;
            }

            let mut matched = Vec::new();
            for rule in rules.iter().filter(|r| !r.exempt && !r.default) {
                if rule.is_satisfied_by(subject)? {
                    matched.push(*rule);
                }
            }
            if matched.is_empty() {
                matched.extend(rules.iter().filter(|r| !r.exempt && r.default).copied());
            }
            applicable.extend(matched);
        }
        Ok(applicable)
    }

    /// Evaluate the rules against `ctx.subject` and run the actions of every
    /// applicable rule into `ctx.processor`.
    pub fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<RulesOutcome> {
        let mut outcome = RulesOutcome::default();
        for rule in self.applicable(ctx.subject)? {
            for action in &rule.actions {
                if action.execute(ctx)? {
                    outcome.actions_executed += 1;
                }
            }
            outcome.applied.push(rule.name.clone());
        }
        Ok(outcome)
    }
}

fn first_satisfied<'r>(
    rules: impl Iterator<Item = &'r &'r Rule>,
    subject: &Subject,
) -> Result<Option<&'r Rule>> {
    for rule in rules {
        if rule.is_satisfied_by(subject)? {
            return Ok(Some(*rule));
        }
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// RuleSource
// ---------------------------------------------------------------------------

/// Supplies the compiled rules for one job type. Called once per job run.
pub trait RuleSource: Send + Sync {
    fn rules(&self, job: ServiceLockType) -> Result<Vec<Rule>>;
}

/// Rule definitions grouped by the job type that evaluates them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RulesFile {
    pub jobs: BTreeMap<ServiceLockType, Vec<RuleDefinition>>,
}

impl RulesFile {
    pub fn parse(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn definitions(&self, job: ServiceLockType) -> &[RuleDefinition] {
        self.jobs.get(&job).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl RuleSource for RulesFile {
    fn rules(&self, job: ServiceLockType) -> Result<Vec<Rule>> {
        self.definitions(job)
            .iter()
            .map(RuleDefinition::compile)
            .collect()
    }
}

/// Reads the rules file from disk on every call, so edits apply on the next run.
pub struct YamlRuleSource {
    path: PathBuf,
}

impl YamlRuleSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<RulesFile> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no rules file, no rules");
            return Ok(RulesFile::default());
        }
        let data = std::fs::read_to_string(&self.path)?;
        RulesFile::parse(&data)
    }
}

impl RuleSource for YamlRuleSource {
    fn rules(&self, job: ServiceLockType) -> Result<Vec<Rule>> {
        self.load()?.rules(job)
    }
}

/// Starting rules written by `strata init`.
pub const RULES_TEMPLATE: &str = r#"# Storage lifecycle rules, grouped by the job that evaluates them.
filesystem-reapply-rules:
  - name: default-tier1-retention
    rule_type: tier1-retention
    default: true
    actions:
      - type: tier1-retention
        time: 90
        unit: days

  - name: mr-short-tier1
    rule_type: tier1-retention
    condition:
      type: equal
      test: $Modality
      value: 'MR'
    actions:
      - type: tier1-retention
        time: 30
        unit: days
        reference: $StudyDate

  - name: research-exempt
    rule_type: online-retention
    exempt: true
    condition:
      type: like
      test: $StudyDescription
      pattern: '*RESEARCH*'

  - name: default-online-retention
    rule_type: online-retention
    default: true
    actions:
      - type: online-retention
        time: 5
        unit: years
        reference: $StudyDate
"#;
