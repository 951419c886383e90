//! Record source: load named diagram blobs from the input dataset.
//!
//! The pipeline only depends on [`RecordSource`]. [`XmlDatasetSource`] reads
//! the legacy export format: a serialised DataSet where each row is an element
//! (`DEPICTION_TB` by default) whose children carry the name columns and a
//! base64 payload column.
//!
//! Names must be stable across runs, because the output directory is keyed on
//! them. Two rules keep them stable: the fallback column is used only when the
//! primary one is blank, and duplicates are suffixed in dataset order
//! (`Ramp`, `Ramp (2)`, …).

use crate::diagram::{derive_name, sanitize_name, Diagram};
use crate::error::MigrateError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// Loads the diagrams a run will migrate.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn load_records(&self, path: &Path) -> Result<Vec<Diagram>, MigrateError>;
}

/// Element names used by the dataset export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLayout {
    /// One element per record. Default: `DEPICTION_TB`.
    pub record: String,
    /// Primary name column. Default: `SHORT_NAME`.
    pub name_field: String,
    /// Used when the primary name column is blank. Default: `NAME`.
    pub fallback_name_field: String,
    /// Base64 payload column. Default: `DIAGRAM`.
    pub payload_field: String,
}

impl Default for DatasetLayout {
    fn default() -> Self {
        Self {
            record: "DEPICTION_TB".to_string(),
            name_field: "SHORT_NAME".to_string(),
            fallback_name_field: "NAME".to_string(),
            payload_field: "DIAGRAM".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Name,
    Fallback,
    Payload,
}

impl DatasetLayout {
    fn field_for(&self, tag: &[u8]) -> Option<Field> {
        if tag == self.name_field.as_bytes() {
            Some(Field::Name)
        } else if tag == self.fallback_name_field.as_bytes() {
            Some(Field::Fallback)
        } else if tag == self.payload_field.as_bytes() {
            Some(Field::Payload)
        } else {
            None
        }
    }
}

/// Column values of one record before validation.
#[derive(Debug, Default)]
struct RawRecord {
    name: Option<String>,
    fallback: Option<String>,
    payload: Option<String>,
}

impl RawRecord {
    fn push(&mut self, field: Field, text: &str) {
        let slot = match field {
            Field::Name => &mut self.name,
            Field::Fallback => &mut self.fallback,
            Field::Payload => &mut self.payload,
        };
        slot.get_or_insert_with(String::new).push_str(text);
    }
}

/// [`RecordSource`] for the XML DataSet export.
#[derive(Debug, Clone, Default)]
pub struct XmlDatasetSource {
    layout: DatasetLayout,
}

impl XmlDatasetSource {
    pub fn new(layout: DatasetLayout) -> Self {
        Self { layout }
    }

    /// Parse a dataset document into diagrams with unique, stable names.
    ///
    /// Records without a payload are skipped (there is nothing to convert).
    /// A record with neither name column set, or with a payload that is not
    /// valid base64, fails the whole load.
    pub fn parse(&self, xml: &str) -> Result<Vec<Diagram>, String> {
        let raw = self.scan(xml)?;
        debug!("Dataset contains {} {} records", raw.len(), self.layout.record);

        let mut diagrams = Vec::with_capacity(raw.len());
        for (idx, rec) in raw.into_iter().enumerate() {
            let row = idx + 1;
            let name = derive_name(rec.name.as_deref(), rec.fallback.as_deref()).ok_or_else(|| {
                format!(
                    "record {row}: both {} and {} are empty",
                    self.layout.name_field, self.layout.fallback_name_field
                )
            })?;

            let Some(encoded) = rec.payload else {
                warn!(row, name = %name, field = %self.layout.payload_field, "Record has no payload; skipping");
                continue;
            };
            let payload = decode_payload(&encoded)
                .map_err(|e| format!("record {row} ('{name}'): invalid base64 payload: {e}"))?;

            diagrams.push(Diagram::new(name, payload));
        }

        Ok(disambiguate(diagrams))
    }

    fn scan(&self, xml: &str) -> Result<Vec<RawRecord>, String> {
        let record_tag = self.layout.record.as_bytes();
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut records = Vec::new();
        let mut current: Option<RawRecord> = None;
        let mut field: Option<Field> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let local = e.local_name();
                    if current.is_none() {
                        if local.as_ref() == record_tag {
                            current = Some(RawRecord::default());
                        }
                    } else {
                        field = self.layout.field_for(local.as_ref());
                    }
                }
                Ok(Event::Empty(e)) => {
                    // `<DEPICTION_TB/>` is a record with no columns; empty
                    // columns inside a record carry nothing to collect.
                    if current.is_none() && e.local_name().as_ref() == record_tag {
                        records.push(RawRecord::default());
                    }
                }
                Ok(Event::Text(t)) => {
                    if let (Some(rec), Some(f)) = (current.as_mut(), field) {
                        let text = t
                            .unescape()
                            .map_err(|e| format!("bad text at byte {}: {e}", reader.buffer_position()))?;
                        rec.push(f, &text);
                    }
                }
                Ok(Event::CData(c)) => {
                    if let (Some(rec), Some(f)) = (current.as_mut(), field) {
                        rec.push(f, &String::from_utf8_lossy(&c.into_inner()));
                    }
                }
                Ok(Event::End(e)) => {
                    if e.local_name().as_ref() == record_tag {
                        if let Some(rec) = current.take() {
                            records.push(rec);
                        }
                    }
                    field = None;
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(format!(
                        "malformed XML at byte {}: {e}",
                        reader.buffer_position()
                    ))
                }
                Ok(_) => {}
            }
        }

        if current.is_some() {
            return Err(format!("unterminated <{}> element", self.layout.record));
        }
        Ok(records)
    }
}

#[async_trait]
impl RecordSource for XmlDatasetSource {
    async fn load_records(&self, path: &Path) -> Result<Vec<Diagram>, MigrateError> {
        let xml = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| MigrateError::RecordLoad {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;

        let diagrams = self.parse(&xml).map_err(|detail| MigrateError::RecordLoad {
            path: path.to_path_buf(),
            detail,
        })?;

        info!("Loaded {} diagrams from {}", diagrams.len(), path.display());
        Ok(diagrams)
    }
}

/// Decode a base64 column, ignoring the line breaks and indentation that
/// DataSet writers insert into long values.
fn decode_payload(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD.decode(compact)
}

/// Suffix repeated names so every diagram maps to a distinct artifact file.
///
/// Uniqueness is checked on the sanitized stem: `A/B` and `A\B` would
/// otherwise collide on disk.
fn disambiguate(diagrams: Vec<Diagram>) -> Vec<Diagram> {
    let mut taken: HashSet<String> = HashSet::with_capacity(diagrams.len());
    diagrams
        .into_iter()
        .map(|d| {
            if taken.insert(d.artifact_stem()) {
                return d;
            }
            let mut n = 2;
            loop {
                let candidate = format!("{} ({n})", d.name);
                if taken.insert(sanitize_name(&candidate)) {
                    warn!(name = %d.name, renamed = %candidate, "Duplicate diagram name");
                    return Diagram::new(candidate, d.payload);
                }
                n += 1;
            }
        })
        .collect()
}
