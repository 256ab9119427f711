//! Expression evaluation against a [`Subject`].
//!
//! Text with a leading `$` names an attribute; anything else is a literal that
//! evaluates to itself. Attribute values are decoded according to the VR the
//! dictionary declares for them.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::attribute::{self, AttributeValue, Vr};
use crate::error::{Result, StrataError};
use crate::subject::Subject;

pub const ATTRIBUTE_MARKER: char = '$';

// ---------------------------------------------------------------------------
// Scalar
// ---------------------------------------------------------------------------

/// Normalized value produced by evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Text(String),
}

impl Scalar {
    /// Numeric view. Text is parsed; non-numeric text yields `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int16(v) => Some(f64::from(*v)),
            Scalar::UInt16(v) => Some(f64::from(*v)),
            Scalar::Int32(v) => Some(f64::from(*v)),
            Scalar::UInt32(v) => Some(f64::from(*v)),
            Scalar::Int64(v) => Some(*v as f64),
            Scalar::UInt64(v) => Some(*v as f64),
            Scalar::Float32(v) => Some(f64::from(*v)),
            Scalar::Float64(v) => Some(*v),
            Scalar::Text(s) => s.trim().parse::<f64>().ok(),
        }
    }

    /// Date-time view for DA, DT and ISO-8601 text. Dates resolve to midnight UTC.
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        let Scalar::Text(s) = self else {
            return None;
        };
        parse_datetime(s.trim())
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int16(v) => write!(f, "{v}"),
            Scalar::UInt16(v) => write!(f, "{v}"),
            Scalar::Int32(v) => write!(f, "{v}"),
            Scalar::UInt32(v) => write!(f, "{v}"),
            Scalar::Int64(v) => write!(f, "{v}"),
            Scalar::UInt64(v) => write!(f, "{v}"),
            Scalar::Float32(v) => write!(f, "{v}"),
            Scalar::Float64(v) => write!(f, "{v}"),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y%m%d%H%M%S%.f", "%Y%m%d%H%M%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.and_utc());
        }
    }
    for fmt in ["%Y%m%d", "%Y-%m-%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Expression
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Expression {
    text: String,
}

impl Expression {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// The referenced attribute keyword, if this is an attribute expression.
    pub fn attribute(&self) -> Option<&str> {
        self.text.strip_prefix(ATTRIBUTE_MARKER)
    }

    /// Evaluate against `subject`.
    ///
    /// Returns `Ok(None)` for empty text and for attributes that are absent or
    /// empty; fails with [`StrataError::UnknownAttribute`] when the keyword is
    /// not in the dictionary.
    pub fn evaluate(&self, subject: &Subject) -> Result<Option<Scalar>> {
        if self.text.is_empty() {
            return Ok(None);
        }
        let Some(keyword) = self.attribute() else {
            return Ok(Some(Scalar::Text(self.text.clone())));
        };
        let info = attribute::lookup(keyword)
            .ok_or_else(|| StrataError::UnknownAttribute(keyword.to_string()))?;

        let Some(value) = subject.find(info.keyword) else {
            return Ok(None);
        };
        if value.is_empty() {
            return Ok(None);
        }
        Ok(Some(decode(info.vr, value)))
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<&str> for Expression {
    fn from(text: &str) -> Self {
        Expression::new(text)
    }
}

fn decode(vr: Vr, value: &AttributeValue) -> Scalar {
    let text = match value {
        AttributeValue::Binary { length } => return Scalar::UInt64(*length),
        AttributeValue::Text(s) => s.as_str(),
        AttributeValue::Null => "",
    };
    if vr.is_binary() {
        return Scalar::UInt64(text.len() as u64);
    }
    let first = text.split('\\').next().unwrap_or_default().trim();
    match vr {
        Vr::SL => Scalar::Int32(first.parse().unwrap_or(0)),
        Vr::SS => Scalar::Int16(first.parse().unwrap_or(0)),
        Vr::AT | Vr::UL => Scalar::UInt32(first.parse().unwrap_or(0)),
        Vr::DS | Vr::FD => Scalar::Float64(first.parse().unwrap_or(0.0)),
        Vr::FL => Scalar::Float32(first.parse().unwrap_or(0.0)),
        Vr::IS => Scalar::Int64(first.parse().unwrap_or(0)),
        Vr::US => Scalar::UInt16(first.parse().unwrap_or(0)),
        _ => Scalar::Text(text.trim().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subject::AttributeSource;
    use chrono::TimeZone;

    fn subject() -> Subject {
        Subject::new(
            "study-1",
            vec![
                AttributeSource::new("dataset")
                    .with("PatientId", AttributeValue::text("  PID-7 "))
                    .with("PatientBreedDescription", AttributeValue::text(""))
                    .with("NumberOfStudyRelatedInstances", AttributeValue::text("120"))
                    .with("PatientsWeight", AttributeValue::text("72.5"))
                    .with("Rows", AttributeValue::text("512\\256"))
                    .with("ReferencePixelX0", AttributeValue::text("-4"))
                    .with("TagAngleSecondAxis", AttributeValue::text("garbage"))
                    .with("PixelData", AttributeValue::Binary { length: 524_288 })
                    .with("StudyDate", AttributeValue::text("20240115"))
                    .with("StudyDescription", AttributeValue::Null),
                AttributeSource::new("meta")
                    .with("TransferSyntaxUid", AttributeValue::text("1.2.840.10008.1.2.1")),
            ],
        )
    }

    #[test]
    fn empty_text_evaluates_to_none() {
        assert_eq!(Expression::new("").evaluate(&subject()).unwrap(), None);
    }

    #[test]
    fn literal_passes_through_verbatim() {
        for text in ["MR", " spaced ", "30", "a$b"] {
            let value = Expression::new(text).evaluate(&subject()).unwrap();
            assert_eq!(value, Some(Scalar::Text(text.to_string())));
        }
    }

    #[test]
    fn empty_known_attribute_is_none_but_unknown_tag_errors() {
        let s = subject();
        let value = Expression::new("$PatientBreedDescription")
            .evaluate(&s)
            .unwrap();
        assert_eq!(value, None);

        let absent = Subject::new("other", vec![AttributeSource::new("dataset")]);
        assert_eq!(
            Expression::new("$PatientBreedDescription")
                .evaluate(&absent)
                .unwrap(),
            None
        );

        let err = Expression::new("$PatientBreedDescriptionX")
            .evaluate(&s)
            .unwrap_err();
        match err {
            StrataError::UnknownAttribute(name) => assert_eq!(name, "PatientBreedDescriptionX"),
            other => panic!("expected UnknownAttribute, got {other:?}"),
        }
    }

    #[test]
    fn null_attribute_is_none() {
        let value = Expression::new("$StudyDescription")
            .evaluate(&subject())
            .unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn text_attributes_are_trimmed() {
        let value = Expression::new("$PatientId").evaluate(&subject()).unwrap();
        assert_eq!(value, Some(Scalar::Text("PID-7".into())));
    }

    #[test]
    fn numeric_vrs_decode_by_width() {
        let s = subject();
        let eval = |text: &str| Expression::new(text).evaluate(&s).unwrap().unwrap();
        assert_eq!(eval("$NumberOfStudyRelatedInstances"), Scalar::Int64(120));
        assert_eq!(eval("$PatientsWeight"), Scalar::Float64(72.5));
        assert_eq!(eval("$Rows"), Scalar::UInt16(512));
        assert_eq!(eval("$ReferencePixelX0"), Scalar::Int32(-4));
        assert_eq!(eval("$TagAngleSecondAxis"), Scalar::Int16(0));
    }

    #[test]
    fn binary_vr_decodes_as_length() {
        let value = Expression::new("$PixelData").evaluate(&subject()).unwrap();
        assert_eq!(value, Some(Scalar::UInt64(524_288)));
    }

    #[test]
    fn fallback_source_is_consulted() {
        let value = Expression::new("$TransferSyntaxUid")
            .evaluate(&subject())
            .unwrap();
        assert_eq!(value, Some(Scalar::Text("1.2.840.10008.1.2.1".into())));
    }

    #[test]
    fn evaluation_leaves_subject_untouched() {
        let s = subject();
        let before = s.clone();
        let _ = Expression::new("$Rows").evaluate(&s);
        let _ = Expression::new("$Nope").evaluate(&s);
        assert_eq!(s, before);
    }

    #[test]
    fn da_text_converts_to_datetime() {
        let value = Expression::new("$StudyDate")
            .evaluate(&subject())
            .unwrap()
            .unwrap();
        assert_eq!(
            value.as_datetime(),
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap())
        );
        assert_eq!(Scalar::Text("not a date".into()).as_datetime(), None);
        assert_eq!(Scalar::Int64(20240115).as_datetime(), None);
    }

    #[test]
    fn rfc3339_and_dt_text_convert_to_datetime() {
        let expected = Utc.with_ymd_and_hms(2023, 6, 1, 12, 30, 0).unwrap();
        assert_eq!(
            Scalar::Text("2023-06-01T12:30:00Z".into()).as_datetime(),
            Some(expected)
        );
        assert_eq!(
            Scalar::Text("20230601123000".into()).as_datetime(),
            Some(expected)
        );
    }
}
