//! Boolean predicate trees over expressions.
//!
//! Definitions arrive as [`PredicateDef`] (deserialized from rule files, keyed
//! by their `type` tag) and are compiled once into [`Predicate`]. Compilation
//! folds wildcard-only patterns and empty ranges into `Always`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::{Result, StrataError};
use crate::expression::{Expression, Scalar};
use crate::subject::Subject;

// ---------------------------------------------------------------------------
// PredicateDef (declarative form)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PredicateDef {
    #[default]
    True,
    False,
    And { conditions: Vec<PredicateDef> },
    Or { conditions: Vec<PredicateDef> },
    Not { condition: Box<PredicateDef> },
    Null { test: Expression },
    NotNull { test: Expression },
    Equal { test: Expression, value: Expression },
    NotEqual { test: Expression, value: Expression },
    GreaterThan { test: Expression, value: Expression },
    LessThan { test: Expression, value: Expression },
    Between {
        test: Expression,
        lower: Expression,
        upper: Expression,
    },
    Like { test: Expression, pattern: String },
    Range { test: Expression, range: String },
}

impl PredicateDef {
    /// Compile into an evaluable tree. `rule` names the owner for error messages.
    pub fn compile(&self, rule: &str) -> Result<Predicate> {
        let compiled = match self {
            PredicateDef::True => Predicate::Always,
            PredicateDef::False => Predicate::Never,
            PredicateDef::And { conditions } => Predicate::And(compile_all(conditions, rule)?),
            PredicateDef::Or { conditions } => Predicate::Or(compile_all(conditions, rule)?),
            PredicateDef::Not { condition } => {
                Predicate::Not(Box::new(condition.compile(rule)?))
            }
            PredicateDef::Null { test } => Predicate::Null(test.clone()),
            PredicateDef::NotNull { test } => {
                Predicate::Not(Box::new(Predicate::Null(test.clone())))
            }
            PredicateDef::Equal { test, value } => compare(test, CompareOp::Equal, value),
            PredicateDef::NotEqual { test, value } => compare(test, CompareOp::NotEqual, value),
            PredicateDef::GreaterThan { test, value } => {
                compare(test, CompareOp::GreaterThan, value)
            }
            PredicateDef::LessThan { test, value } => compare(test, CompareOp::LessThan, value),
            PredicateDef::Between { test, lower, upper } => Predicate::Between {
                test: test.clone(),
                lower: lower.clone(),
                upper: upper.clone(),
            },
            PredicateDef::Like { test, pattern } => {
                if is_wildcard_only(pattern) {
                    Predicate::Always
                } else {
                    Predicate::Like {
                        test: test.clone(),
                        pattern: wildcard_regex(pattern).map_err(|e| {
                            StrataError::InvalidRule {
                                rule: rule.to_string(),
                                reason: format!("bad pattern '{pattern}': {e}"),
                            }
                        })?,
                    }
                }
            }
            PredicateDef::Range { test, range } => match RangeMatch::parse(range) {
                RangeMatch::Any => Predicate::Always,
                parsed => Predicate::Range {
                    test: test.clone(),
                    range: parsed,
                },
            },
        };
        Ok(compiled)
    }
}

fn compile_all(defs: &[PredicateDef], rule: &str) -> Result<Vec<Predicate>> {
    defs.iter().map(|d| d.compile(rule)).collect()
}

fn compare(test: &Expression, op: CompareOp, value: &Expression) -> Predicate {
    Predicate::Compare {
        left: test.clone(),
        op,
        right: value.clone(),
    }
}

// ---------------------------------------------------------------------------
// Predicate (compiled form)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    GreaterThan,
    LessThan,
}

#[derive(Debug, Clone)]
pub enum Predicate {
    Always,
    Never,
    Null(Expression),
    Compare {
        left: Expression,
        op: CompareOp,
        right: Expression,
    },
    Between {
        test: Expression,
        lower: Expression,
        upper: Expression,
    },
    Like {
        test: Expression,
        pattern: Regex,
    },
    Range {
        test: Expression,
        range: RangeMatch,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// Evaluate against `subject`. Attribute errors propagate to the caller.
    pub fn is_satisfied_by(&self, subject: &Subject) -> Result<bool> {
        match self {
            Predicate::Always => Ok(true),
            Predicate::Never => Ok(false),
            Predicate::Null(test) => Ok(test.evaluate(subject)?.is_none()),
            Predicate::Compare { left, op, right } => {
                let (Some(l), Some(r)) = (left.evaluate(subject)?, right.evaluate(subject)?)
                else {
                    return Ok(false);
                };
                let Some(ord) = compare_scalars(&l, &r) else {
                    return Ok(false);
                };
                Ok(match op {
                    CompareOp::Equal => ord == Ordering::Equal,
                    CompareOp::NotEqual => ord != Ordering::Equal,
                    CompareOp::GreaterThan => ord == Ordering::Greater,
                    CompareOp::LessThan => ord == Ordering::Less,
                })
            }
            Predicate::Between { test, lower, upper } => {
                let (Some(v), Some(lo), Some(hi)) = (
                    test.evaluate(subject)?,
                    lower.evaluate(subject)?,
                    upper.evaluate(subject)?,
                ) else {
                    return Ok(false);
                };
                Ok(within(&v, Some(&lo), Some(&hi)))
            }
            Predicate::Like { test, pattern } => Ok(test
                .evaluate(subject)?
                .is_some_and(|v| pattern.is_match(&v.to_string()))),
            Predicate::Range { test, range } => {
                Ok(test.evaluate(subject)?.is_some_and(|v| range.matches(&v)))
            }
            Predicate::And(children) => {
                for child in children {
                    if !child.is_satisfied_by(subject)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Predicate::Or(children) => {
                for child in children {
                    if child.is_satisfied_by(subject)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Predicate::Not(inner) => Ok(!inner.is_satisfied_by(subject)?),
        }
    }
}

// ---------------------------------------------------------------------------
// Value comparison
// ---------------------------------------------------------------------------

/// Numeric comparison when both sides are numeric, text comparison otherwise.
pub fn compare_scalars(a: &Scalar, b: &Scalar) -> Option<Ordering> {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => Some(a.to_string().cmp(&b.to_string())),
    }
}

fn within(v: &Scalar, lower: Option<&Scalar>, upper: Option<&Scalar>) -> bool {
    let above = lower.map_or(true, |lo| {
        matches!(
            compare_scalars(v, lo),
            Some(Ordering::Greater | Ordering::Equal)
        )
    });
    let below = upper.map_or(true, |hi| {
        matches!(
            compare_scalars(v, hi),
            Some(Ordering::Less | Ordering::Equal)
        )
    });
    above && below
}

// ---------------------------------------------------------------------------
// Wildcards
// ---------------------------------------------------------------------------

/// A pattern of only `*` (or nothing) places no constraint on the value.
pub fn is_wildcard_only(pattern: &str) -> bool {
    pattern.trim().chars().all(|c| c == '*')
}

/// Translate `*` / `?` wildcards into an anchored regex.
pub fn wildcard_regex(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push_str("^(?s)");
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
        }
    }
    re.push('$');
    Regex::new(&re)
}

// ---------------------------------------------------------------------------
// RangeMatch
// ---------------------------------------------------------------------------

/// Hyphenated range: `-V`, `V-`, `A-B`, or an exact value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeMatch {
    Any,
    Exact(String),
    AtMost(String),
    AtLeast(String),
    Between(String, String),
}

impl RangeMatch {
    pub fn parse(text: &str) -> Self {
        if text.is_empty() {
            return RangeMatch::Any;
        }
        let Some(pos) = text.find('-') else {
            return RangeMatch::Exact(text.to_string());
        };
        if pos == 0 {
            RangeMatch::AtMost(text[1..].to_string())
        } else if pos == text.len() - 1 {
            RangeMatch::AtLeast(text[..pos].to_string())
        } else {
            RangeMatch::Between(text[..pos].to_string(), text[pos + 1..].to_string())
        }
    }

    pub fn matches(&self, value: &Scalar) -> bool {
        let bound = |s: &String| Scalar::Text(s.clone());
        match self {
            RangeMatch::Any => true,
            RangeMatch::Exact(v) => compare_scalars(value, &bound(v)) == Some(Ordering::Equal),
            RangeMatch::AtMost(hi) => within(value, None, Some(&bound(hi))),
            RangeMatch::AtLeast(lo) => within(value, Some(&bound(lo)), None),
            RangeMatch::Between(lo, hi) => within(value, Some(&bound(lo)), Some(&bound(hi))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeValue;
    use crate::subject::AttributeSource;

    fn study(modality: &str, date: &str, instances: &str) -> Subject {
        Subject::new(
            "s",
            vec![AttributeSource::new("dataset")
                .with("Modality", AttributeValue::text(modality))
                .with("StudyDate", AttributeValue::text(date))
                .with("NumberOfStudyRelatedInstances", AttributeValue::text(instances))
                .with("StudyDescription", AttributeValue::Null)],
        )
    }

    fn compile(yaml: &str) -> Predicate {
        let def: PredicateDef = serde_yaml::from_str(yaml).unwrap();
        def.compile("test").unwrap()
    }

    #[test]
    fn equal_compares_attribute_with_literal() {
        let p = compile("type: equal\ntest: $Modality\nvalue: MR\n");
        assert!(p.is_satisfied_by(&study("MR", "20240101", "10")).unwrap());
        assert!(!p.is_satisfied_by(&study("CT", "20240101", "10")).unwrap());
    }

    #[test]
    fn numeric_comparison_is_not_lexicographic() {
        let p = compile("type: greater-than\ntest: $NumberOfStudyRelatedInstances\nvalue: '9'\n");
        assert!(p.is_satisfied_by(&study("MR", "20240101", "10")).unwrap());
        assert!(!p.is_satisfied_by(&study("MR", "20240101", "8")).unwrap());
    }

    #[test]
    fn null_operand_fails_comparisons() {
        let p = compile("type: not-equal\ntest: $StudyDescription\nvalue: X\n");
        assert!(!p.is_satisfied_by(&study("MR", "20240101", "1")).unwrap());
        let n = compile("type: null\ntest: $StudyDescription\n");
        assert!(n.is_satisfied_by(&study("MR", "20240101", "1")).unwrap());
    }

    #[test]
    fn and_or_not_compose() {
        let p = compile(
            r#"
type: and
conditions:
  - type: or
    conditions:
      - { type: equal, test: $Modality, value: MR }
      - { type: equal, test: $Modality, value: CT }
  - type: not
    condition: { type: less-than, test: $StudyDate, value: '20200101' }
"#,
        );
        assert!(p.is_satisfied_by(&study("CT", "20210101", "1")).unwrap());
        assert!(!p.is_satisfied_by(&study("US", "20210101", "1")).unwrap());
        assert!(!p.is_satisfied_by(&study("MR", "20190101", "1")).unwrap());
    }

    #[test]
    fn wildcard_star_and_question_mark() {
        let p = compile("type: like\ntest: $Modality\npattern: 'M?'\n");
        assert!(p.is_satisfied_by(&study("MR", "1", "1")).unwrap());
        assert!(!p.is_satisfied_by(&study("MRI", "1", "1")).unwrap());

        let p = compile("type: like\ntest: $Modality\npattern: 'C*'\n");
        assert!(p.is_satisfied_by(&study("CT", "1", "1")).unwrap());
        assert!(p.is_satisfied_by(&study("C", "1", "1")).unwrap());
        assert!(!p.is_satisfied_by(&study("MR", "1", "1")).unwrap());
    }

    #[test]
    fn wildcard_pattern_escapes_regex_metacharacters() {
        let p = compile("type: like\ntest: $Modality\npattern: 'a.c*'\n");
        assert!(p.is_satisfied_by(&study("a.cd", "1", "1")).unwrap());
        assert!(!p.is_satisfied_by(&study("abcd", "1", "1")).unwrap());
    }

    #[test]
    fn wildcard_only_pattern_compiles_to_always() {
        for pattern in ["*", "***", " * ", ""] {
            let def = PredicateDef::Like {
                test: Expression::new("$NoSuchAttribute"),
                pattern: pattern.to_string(),
            };
            let p = def.compile("test").unwrap();
            assert!(matches!(p, Predicate::Always), "pattern {pattern:?}");
            // Never evaluated, so even an unknown attribute is accepted.
            assert!(p.is_satisfied_by(&study("MR", "1", "1")).unwrap());
        }
    }

    #[test]
    fn range_forms() {
        let at_most = RangeMatch::parse("-20200101");
        let at_least = RangeMatch::parse("20200101-");
        let between = RangeMatch::parse("20200101-20201231");
        let exact = RangeMatch::parse("20200101");
        assert_eq!(at_most, RangeMatch::AtMost("20200101".into()));
        assert_eq!(at_least, RangeMatch::AtLeast("20200101".into()));
        assert_eq!(
            between,
            RangeMatch::Between("20200101".into(), "20201231".into())
        );
        assert_eq!(exact, RangeMatch::Exact("20200101".into()));

        let v = |s: &str| Scalar::Text(s.into());
        assert!(at_most.matches(&v("20200101")));
        assert!(at_most.matches(&v("20191231")));
        assert!(!at_most.matches(&v("20200102")));
        assert!(at_least.matches(&v("20200101")));
        assert!(!at_least.matches(&v("20191231")));
        assert!(between.matches(&v("20200101")));
        assert!(between.matches(&v("20201231")));
        assert!(between.matches(&v("20200615")));
        assert!(!between.matches(&v("20210101")));
        assert!(exact.matches(&v("20200101")));
        assert!(!exact.matches(&v("20200102")));
    }

    #[test]
    fn range_between_holds_for_every_value_in_a_grid() {
        for a in 0..6 {
            for b in a..6 {
                let range = RangeMatch::parse(&format!("{a}-{b}"));
                for v in 0..8 {
                    let expected = a <= v && v <= b;
                    assert_eq!(
                        range.matches(&Scalar::Int64(v)),
                        expected,
                        "{a}-{b} vs {v}"
                    );
                }
            }
        }
    }

    #[test]
    fn empty_range_matches_everything() {
        let p = compile("type: range\ntest: $StudyDate\nrange: ''\n");
        assert!(matches!(p, Predicate::Always));
    }

    #[test]
    fn unknown_attribute_propagates() {
        let p = compile("type: equal\ntest: $PatientFavoriteColor\nvalue: blue\n");
        let err = p.is_satisfied_by(&study("MR", "1", "1")).unwrap_err();
        assert!(matches!(err, StrataError::UnknownAttribute(ref n) if n == "PatientFavoriteColor"));
    }

    #[test]
    fn between_uses_expressions_for_bounds() {
        let p = compile(
            "type: between\ntest: $NumberOfStudyRelatedInstances\nlower: '10'\nupper: '20'\n",
        );
        assert!(p.is_satisfied_by(&study("MR", "1", "10")).unwrap());
        assert!(p.is_satisfied_by(&study("MR", "1", "20")).unwrap());
        assert!(!p.is_satisfied_by(&study("MR", "1", "21")).unwrap());
    }
}
