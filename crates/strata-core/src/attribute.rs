//! Attribute dictionary and stored attribute values.
//!
//! Rules reference attributes by DICOM keyword (`$StudyDate`). The dictionary
//! maps each keyword to its tag and value representation (VR), which decides
//! how the expression evaluator decodes the stored value.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Vr
// ---------------------------------------------------------------------------

/// DICOM value representation.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vr {
    AE,
    AS,
    AT,
    CS,
    DA,
    DS,
    DT,
    FD,
    FL,
    IS,
    LO,
    LT,
    OB,
    OF,
    OW,
    PN,
    SH,
    SL,
    SQ,
    SS,
    ST,
    TM,
    UI,
    UL,
    UN,
    US,
    UT,
}

impl Vr {
    /// Binary VRs are evaluated as their byte length.
    pub fn is_binary(self) -> bool {
        matches!(self, Vr::OB | Vr::OW | Vr::OF)
    }
}

// ---------------------------------------------------------------------------
// Dictionary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagInfo {
    pub keyword: &'static str,
    pub tag: u32,
    pub vr: Vr,
}

const fn tag(keyword: &'static str, tag: u32, vr: Vr) -> TagInfo {
    TagInfo { keyword, tag, vr }
}

static DICTIONARY: &[TagInfo] = &[
    // File meta information
    tag("MediaStorageSopClassUid", 0x0002_0002, Vr::UI),
    tag("MediaStorageSopInstanceUid", 0x0002_0003, Vr::UI),
    tag("TransferSyntaxUid", 0x0002_0010, Vr::UI),
    tag("ImplementationVersionName", 0x0002_0013, Vr::SH),
    tag("SourceApplicationEntityTitle", 0x0002_0016, Vr::AE),
    // Study / patient
    tag("SpecificCharacterSet", 0x0008_0005, Vr::CS),
    tag("InstanceCreationDate", 0x0008_0012, Vr::DA),
    tag("SopClassUid", 0x0008_0016, Vr::UI),
    tag("SopInstanceUid", 0x0008_0018, Vr::UI),
    tag("StudyDate", 0x0008_0020, Vr::DA),
    tag("SeriesDate", 0x0008_0021, Vr::DA),
    tag("AcquisitionDateTime", 0x0008_002A, Vr::DT),
    tag("StudyTime", 0x0008_0030, Vr::TM),
    tag("AccessionNumber", 0x0008_0050, Vr::SH),
    tag("Modality", 0x0008_0060, Vr::CS),
    tag("ModalitiesInStudy", 0x0008_0061, Vr::CS),
    tag("Manufacturer", 0x0008_0070, Vr::LO),
    tag("InstitutionName", 0x0008_0080, Vr::LO),
    tag("ReferringPhysiciansName", 0x0008_0090, Vr::PN),
    tag("StationName", 0x0008_1010, Vr::SH),
    tag("StudyDescription", 0x0008_1030, Vr::LO),
    tag("SeriesDescription", 0x0008_103E, Vr::LO),
    tag("SimpleFrameList", 0x0008_1161, Vr::UL),
    tag("ManufacturersModelName", 0x0008_1090, Vr::LO),
    tag("RecommendedDisplayFrameRateInFloat", 0x0008_9459, Vr::FL),
    tag("PatientsName", 0x0010_0010, Vr::PN),
    tag("PatientId", 0x0010_0020, Vr::LO),
    tag("PatientsBirthDate", 0x0010_0030, Vr::DA),
    tag("PatientsSex", 0x0010_0040, Vr::CS),
    tag("PatientsAge", 0x0010_1010, Vr::AS),
    tag("PatientsSize", 0x0010_1020, Vr::DS),
    tag("PatientsWeight", 0x0010_1030, Vr::DS),
    tag("PatientSpeciesDescription", 0x0010_2201, Vr::LO),
    tag("PatientBreedDescription", 0x0010_2292, Vr::LO),
    tag("PatientComments", 0x0010_4000, Vr::LT),
    // Acquisition
    tag("SliceThickness", 0x0018_0050, Vr::DS),
    tag("ExposureTime", 0x0018_1150, Vr::IS),
    tag("XRayTubeCurrent", 0x0018_1151, Vr::IS),
    tag("ReferencePixelX0", 0x0018_6020, Vr::SL),
    tag("ReferencePixelPhysicalValueX", 0x0018_6028, Vr::FD),
    tag("TagAngleSecondAxis", 0x0018_9219, Vr::SS),
    // Relationship
    tag("StudyInstanceUid", 0x0020_000D, Vr::UI),
    tag("SeriesInstanceUid", 0x0020_000E, Vr::UI),
    tag("StudyId", 0x0020_0010, Vr::SH),
    tag("SeriesNumber", 0x0020_0011, Vr::IS),
    tag("InstanceNumber", 0x0020_0013, Vr::IS),
    tag("NumberOfStudyRelatedSeries", 0x0020_1206, Vr::IS),
    tag("NumberOfStudyRelatedInstances", 0x0020_1208, Vr::IS),
    // Image pixel
    tag("SamplesPerPixel", 0x0028_0002, Vr::US),
    tag("FrameIncrementPointer", 0x0028_0009, Vr::AT),
    tag("Rows", 0x0028_0010, Vr::US),
    tag("Columns", 0x0028_0011, Vr::US),
    tag("PixelSpacing", 0x0028_0030, Vr::DS),
    tag("BitsAllocated", 0x0028_0100, Vr::US),
    tag("BitsStored", 0x0028_0101, Vr::US),
    tag("LossyImageCompression", 0x0028_2110, Vr::CS),
    tag("LossyImageCompressionRatio", 0x0028_2112, Vr::DS),
    tag("WindowCenter", 0x0028_1050, Vr::DS),
    tag("RescaleSlope", 0x0028_1053, Vr::DS),
    tag("FloatPixelData", 0x7FE0_0008, Vr::OF),
    tag("PixelData", 0x7FE0_0010, Vr::OW),
    tag("EncapsulatedDocument", 0x0042_0011, Vr::OB),
];

/// Look up an attribute by keyword.
pub fn lookup(keyword: &str) -> Option<&'static TagInfo> {
    DICTIONARY.iter().find(|t| t.keyword == keyword)
}

// ---------------------------------------------------------------------------
// AttributeValue
// ---------------------------------------------------------------------------

/// Raw stored value of one attribute.
///
/// Text values keep the DICOM encoding: multiple values are separated by `\`.
/// Binary values are carried by length only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Text(String),
    Binary { length: u64 },
    Null,
}

impl AttributeValue {
    pub fn text(s: impl Into<String>) -> Self {
        AttributeValue::Text(s.into())
    }

    /// Present in the subject but carrying no value.
    pub fn is_empty(&self) -> bool {
        match self {
            AttributeValue::Null => true,
            AttributeValue::Text(s) => s.is_empty(),
            AttributeValue::Binary { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_finds_known_keyword() {
        let info = lookup("PatientBreedDescription").unwrap();
        assert_eq!(info.tag, 0x0010_2292);
        assert_eq!(info.vr, Vr::LO);
    }

    #[test]
    fn lookup_is_case_sensitive() {
        assert!(lookup("studydate").is_none());
        assert!(lookup("StudyDate").is_some());
    }

    #[test]
    fn dictionary_has_no_duplicate_keywords() {
        for (i, a) in DICTIONARY.iter().enumerate() {
            assert!(
                DICTIONARY[i + 1..].iter().all(|b| b.keyword != a.keyword),
                "duplicate keyword {}",
                a.keyword
            );
        }
    }

    #[test]
    fn attribute_value_deserializes_untagged() {
        let v: AttributeValue = serde_json::from_str("\"MR\"").unwrap();
        assert_eq!(v, AttributeValue::text("MR"));
        let v: AttributeValue = serde_json::from_str("{\"length\": 512}").unwrap();
        assert_eq!(v, AttributeValue::Binary { length: 512 });
        let v: AttributeValue = serde_json::from_str("null").unwrap();
        assert!(v.is_empty());
    }
}
