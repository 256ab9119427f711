use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::catalog::{from_millis, to_millis, Catalog};
use crate::error::{Result, StrataError};
use crate::subject::{AttributeSource, Subject};

// ---------------------------------------------------------------------------
// StudyStorage
// ---------------------------------------------------------------------------

/// Where one stored study lives, and the attributes rules evaluate against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyStorage {
    pub study_key: String,
    pub filesystem_key: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub sources: Vec<AttributeSource>,
    pub created_at: DateTime<Utc>,
}

impl StudyStorage {
    pub fn new(
        study_key: impl Into<String>,
        filesystem_key: impl Into<String>,
        size_bytes: u64,
        sources: Vec<AttributeSource>,
    ) -> Self {
        Self {
            study_key: study_key.into(),
            filesystem_key: filesystem_key.into(),
            size_bytes,
            sources,
            created_at: Utc::now(),
        }
    }

    /// Read-only view for rule evaluation.
    pub fn subject(&self) -> Subject {
        Subject::new(self.study_key.clone(), self.sources.clone())
    }
}

// ---------------------------------------------------------------------------
// Catalog: study storage
// ---------------------------------------------------------------------------

const STUDY_COLUMNS: &str = "study_key, filesystem_key, size_bytes, attributes, created_at";

impl Catalog {
    pub fn insert_study(&self, study: &StudyStorage) -> Result<()> {
        let attributes = serde_json::to_string(&study.sources)?;
        self.conn().execute(
            "INSERT INTO study_storage (study_key, filesystem_key, size_bytes, attributes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                study.study_key,
                study.filesystem_key,
                size_to_sql(study.size_bytes),
                attributes,
                to_millis(study.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn load_study(&self, study_key: &str) -> Result<StudyStorage> {
        let row = self
            .conn()
            .query_row(
                &format!("SELECT {STUDY_COLUMNS} FROM study_storage WHERE study_key = ?1"),
                [study_key],
                StudyRow::from_row,
            )
            .optional()?
            .ok_or_else(|| StrataError::StudyNotFound(study_key.to_string()))?;
        row.try_into()
    }

    /// Studies stored on `filesystem_key`, ordered by study key.
    pub fn studies_on_filesystem(&self, filesystem_key: &str) -> Result<Vec<StudyStorage>> {
        self.query_studies(
            &format!(
                "SELECT {STUDY_COLUMNS} FROM study_storage
                 WHERE filesystem_key = ?1 ORDER BY study_key"
            ),
            [filesystem_key],
        )
    }

    pub fn list_studies(&self) -> Result<Vec<StudyStorage>> {
        self.query_studies(
            &format!("SELECT {STUDY_COLUMNS} FROM study_storage ORDER BY study_key"),
            [],
        )
    }

    /// Move a study's location record. Returns the filesystem it was on.
    pub fn update_study_filesystem(&self, study_key: &str, filesystem_key: &str) -> Result<String> {
        self.write_tx(|conn| {
            let previous: String = conn
                .query_row(
                    "SELECT filesystem_key FROM study_storage WHERE study_key = ?1",
                    [study_key],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| StrataError::StudyNotFound(study_key.to_string()))?;
            conn.execute(
                "UPDATE study_storage SET filesystem_key = ?2 WHERE study_key = ?1",
                params![study_key, filesystem_key],
            )?;
            Ok(previous)
        })
    }

    /// Overwrite size, location and attributes of an existing study.
    pub fn update_study(&self, study: &StudyStorage) -> Result<()> {
        let attributes = serde_json::to_string(&study.sources)?;
        let changed = self.conn().execute(
            "UPDATE study_storage SET filesystem_key = ?2, size_bytes = ?3, attributes = ?4
             WHERE study_key = ?1",
            params![
                study.study_key,
                study.filesystem_key,
                size_to_sql(study.size_bytes),
                attributes,
            ],
        )?;
        if changed == 0 {
            return Err(StrataError::StudyNotFound(study.study_key.clone()));
        }
        Ok(())
    }

    pub fn delete_study(&self, study_key: &str) -> Result<()> {
        let changed = self
            .conn()
            .execute("DELETE FROM study_storage WHERE study_key = ?1", [study_key])?;
        if changed == 0 {
            return Err(StrataError::StudyNotFound(study_key.to_string()));
        }
        Ok(())
    }

    fn query_studies(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<StudyStorage>> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt
            .query_map(params, StudyRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(StudyStorage::try_from).collect()
    }
}

fn size_to_sql(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

struct StudyRow {
    study_key: String,
    filesystem_key: String,
    size_bytes: i64,
    attributes: String,
    created_at: i64,
}

impl StudyRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            study_key: row.get(0)?,
            filesystem_key: row.get(1)?,
            size_bytes: row.get(2)?,
            attributes: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

impl TryFrom<StudyRow> for StudyStorage {
    type Error = StrataError;

    fn try_from(row: StudyRow) -> Result<Self> {
        Ok(StudyStorage {
            study_key: row.study_key,
            filesystem_key: row.filesystem_key,
            size_bytes: u64::try_from(row.size_bytes).unwrap_or(0),
            sources: serde_json::from_str(&row.attributes)?,
            created_at: from_millis(row.created_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeValue;

    fn study(key: &str, fs: &str) -> StudyStorage {
        StudyStorage::new(
            key,
            fs,
            4096,
            vec![
                AttributeSource::new("dataset")
                    .with("StudyDate", AttributeValue::text("20240101"))
                    .with("PixelData", AttributeValue::Binary { length: 2048 }),
                AttributeSource::new("meta")
                    .with("TransferSyntaxUid", AttributeValue::text("1.2.840.10008.1.2")),
            ],
        )
    }

    #[test]
    fn insert_and_load_preserves_sources() {
        let catalog = Catalog::open_in_memory().unwrap();
        let s = study("1.2.3", "fs1");
        catalog.insert_study(&s).unwrap();

        let loaded = catalog.load_study("1.2.3").unwrap();
        assert_eq!(loaded.sources, s.sources);
        assert_eq!(loaded.size_bytes, 4096);
        assert_eq!(loaded.subject().find("StudyDate"), Some(&AttributeValue::text("20240101")));
    }

    #[test]
    fn studies_on_filesystem_filters_and_orders() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog.insert_study(&study("b", "fs1")).unwrap();
        catalog.insert_study(&study("a", "fs1")).unwrap();
        catalog.insert_study(&study("c", "fs2")).unwrap();

        let keys: Vec<String> = catalog
            .studies_on_filesystem("fs1")
            .unwrap()
            .into_iter()
            .map(|s| s.study_key)
            .collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(catalog.list_studies().unwrap().len(), 3);
    }

    #[test]
    fn update_filesystem_returns_previous_location() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog.insert_study(&study("s1", "fs1")).unwrap();
        let previous = catalog.update_study_filesystem("s1", "fs2").unwrap();
        assert_eq!(previous, "fs1");
        assert_eq!(catalog.load_study("s1").unwrap().filesystem_key, "fs2");
    }

    #[test]
    fn missing_study_is_not_found() {
        let catalog = Catalog::open_in_memory().unwrap();
        assert!(matches!(
            catalog.load_study("nope"),
            Err(StrataError::StudyNotFound(_))
        ));
        assert!(matches!(
            catalog.update_study_filesystem("nope", "fs1"),
            Err(StrataError::StudyNotFound(_))
        ));
        assert!(matches!(
            catalog.delete_study("nope"),
            Err(StrataError::StudyNotFound(_))
        ));
        assert!(matches!(
            catalog.update_study(&study("nope", "fs1")),
            Err(StrataError::StudyNotFound(_))
        ));
    }

    #[test]
    fn update_study_keeps_creation_time() {
        let catalog = Catalog::open_in_memory().unwrap();
        let original = study("s1", "fs1");
        catalog.insert_study(&original).unwrap();

        let mut changed = original.clone();
        changed.size_bytes = 1024;
        changed.sources.truncate(1);
        changed.created_at = original.created_at + chrono::Duration::days(3);
        catalog.update_study(&changed).unwrap();

        let loaded = catalog.load_study("s1").unwrap();
        assert_eq!(loaded.size_bytes, 1024);
        assert_eq!(loaded.sources.len(), 1);
        assert_eq!(loaded.created_at, from_millis(to_millis(original.created_at)));
    }
}
