//! Schema migration for persisted documents
//!
//! Every document carries an integer `version`. Loading walks an ordered
//! list of upgraders, one per version step, until the document reaches the
//! current version. Each upgrader is a pure function from the old document
//! to a new one; the migrator stamps the new version after each step.

use cellblock_api::Location;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::record::{document_version, location_value, normalize_location, Document, VERSION_FIELD};

/// Current prisoner document version
pub const PRISONER_VERSION: u32 = 6;

/// Current jail list document version
pub const JAIL_VERSION: u32 = 4;

/// Errors raised by a single upgrade step
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MigrationError {
    #[error("field '{field}' is malformed: {message}")]
    Malformed { field: String, message: String },

    #[error("no upgrader registered from version {0}")]
    MissingStep(u32),
}

/// Settings an upgrade step may consult
#[derive(Debug, Clone, Default)]
pub struct MigrationContext {
    /// Location that older releases wrote when the real one was unknown
    pub legacy_backup_location: Option<Location>,
}

pub type UpgradeFn = fn(Document, &MigrationContext) -> Result<Document, MigrationError>;

/// One version step
#[derive(Clone, Copy)]
pub struct Upgrader {
    pub from: u32,
    pub description: &'static str,
    pub apply: UpgradeFn,
}

impl fmt::Debug for Upgrader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upgrader")
            .field("from", &self.from)
            .field("description", &self.description)
            .finish()
    }
}

/// Kind of document a migrator handles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Prisoner,
    Jails,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Prisoner => write!(f, "prisoner"),
            RecordKind::Jails => write!(f, "jails"),
        }
    }
}

/// Outcome of migrating one document
#[derive(Debug, Clone, PartialEq)]
pub struct Migrated {
    pub document: Document,
    pub from_version: u32,
    /// True when at least one step ran and the document should be rewritten
    pub upgraded: bool,
}

/// Applies the upgrade chain for one record kind
#[derive(Debug, Clone)]
pub struct SchemaMigrator {
    kind: RecordKind,
    current: u32,
    upgraders: Vec<Upgrader>,
    context: MigrationContext,
}

impl SchemaMigrator {
    pub fn new(
        kind: RecordKind,
        current: u32,
        upgraders: Vec<Upgrader>,
        context: MigrationContext,
    ) -> Self {
        Self {
            kind,
            current,
            upgraders,
            context,
        }
    }

    pub fn for_prisoners(context: MigrationContext) -> Self {
        Self::new(
            RecordKind::Prisoner,
            PRISONER_VERSION,
            prisoner::upgraders(),
            context,
        )
    }

    pub fn for_jails(context: MigrationContext) -> Self {
        Self::new(RecordKind::Jails, JAIL_VERSION, jail::upgraders(), context)
    }

    pub fn current_version(&self) -> u32 {
        self.current
    }

    /// Bring `doc` up to the current version.
    ///
    /// Never fails: a broken step is logged and the document from before
    /// that step is kept. `key` names the record in log output.
    pub fn migrate(&self, key: &str, doc: Document) -> Migrated {
        let from_version = document_version(&doc);

        if from_version > self.current {
            warn!(
                kind = %self.kind,
                record = key,
                version = from_version,
                current = self.current,
                "Record was written by a newer release"
            );
            warn!(kind = %self.kind, record = key, "Continuing to load it as-is");
            warn!(kind = %self.kind, record = key, "Consider updating cellblock");
            return Migrated {
                document: doc,
                from_version,
                upgraded: false,
            };
        }

        let mut doc = doc;
        let mut version = from_version;
        let mut upgraded = false;

        while version < self.current {
            let Some(step) = self.upgraders.iter().find(|u| u.from == version) else {
                error!(
                    kind = %self.kind,
                    record = key,
                    error = %MigrationError::MissingStep(version),
                    "Migration stopped"
                );
                break;
            };

            match (step.apply)(doc.clone(), &self.context) {
                Ok(mut next) => {
                    version += 1;
                    next.insert(VERSION_FIELD.into(), Value::from(version));
                    doc = next;
                    upgraded = true;
                }
                Err(e) => {
                    error!(
                        kind = %self.kind,
                        record = key,
                        from = step.from,
                        step = step.description,
                        error = %e,
                        "Migration step failed; keeping the record as it was before this step"
                    );
                    break;
                }
            }
        }

        if upgraded {
            info!(
                kind = %self.kind,
                record = key,
                from = from_version,
                to = version,
                "Migrated record"
            );
        }

        Migrated {
            document: doc,
            from_version,
            upgraded,
        }
    }
}

fn rename_key(doc: &mut Document, old: &str, new: &str) {
    if let Some(value) = doc.remove(old)
        && !doc.contains_key(new)
    {
        doc.insert(new.to_string(), value);
    }
}

fn normalized(field: &str, value: &Value) -> Result<Value, MigrationError> {
    normalize_location(value)
        .map(|loc| location_value(&loc))
        .ok_or_else(|| MigrationError::Malformed {
            field: field.to_string(),
            message: format!("not a location: {value}"),
        })
}

mod prisoner {
    use super::*;

    const UNKNOWN_LOCATION: &str = "unknown-location";
    const LAST_LOCATION: &str = "last-location";

    pub(super) fn upgraders() -> Vec<Upgrader> {
        vec![
            Upgrader {
                from: 1,
                description: "rename legacy keys",
                apply: rename_legacy_keys,
            },
            Upgrader {
                from: 2,
                description: "fold released flag into seconds-left",
                apply: fold_released,
            },
            Upgrader {
                from: 3,
                description: "mark unknown last locations",
                apply: mark_unknown_location,
            },
            Upgrader {
                from: 4,
                description: "add reason",
                apply: add_reason,
            },
            Upgrader {
                from: 5,
                description: "normalize last location",
                apply: normalize_last_location,
            },
        ]
    }

    fn rename_legacy_keys(mut doc: Document, _: &MigrationContext) -> Result<Document, MigrationError> {
        rename_key(&mut doc, "unjailed", "released");
        rename_key(&mut doc, "lastlocation", LAST_LOCATION);
        rename_key(&mut doc, "jailedby", "jailed-by");
        rename_key(&mut doc, "secondsleft", "seconds-left");
        Ok(doc)
    }

    fn fold_released(mut doc: Document, _: &MigrationContext) -> Result<Document, MigrationError> {
        if let Some(released) = doc.remove("released")
            && released.as_bool() == Some(true)
        {
            doc.insert("seconds-left".into(), Value::from(0));
        }
        Ok(doc)
    }

    fn mark_unknown_location(
        mut doc: Document,
        ctx: &MigrationContext,
    ) -> Result<Document, MigrationError> {
        let unknown = match doc.get(LAST_LOCATION) {
            None => true,
            Some(Value::Null) => true,
            Some(value) => match (&ctx.legacy_backup_location, normalize_location(value)) {
                (Some(backup), Some(loc)) => *backup == loc,
                _ => false,
            },
        };

        if unknown && doc.contains_key(LAST_LOCATION) {
            doc.insert(LAST_LOCATION.into(), Value::Null);
        }
        doc.insert(UNKNOWN_LOCATION.into(), Value::Bool(unknown));
        Ok(doc)
    }

    fn add_reason(mut doc: Document, _: &MigrationContext) -> Result<Document, MigrationError> {
        doc.entry("reason").or_insert(Value::Null);
        Ok(doc)
    }

    fn normalize_last_location(
        mut doc: Document,
        _: &MigrationContext,
    ) -> Result<Document, MigrationError> {
        let unknown = doc
            .remove(UNKNOWN_LOCATION)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let location = match doc.get(LAST_LOCATION) {
            _ if unknown => Value::Null,
            None | Some(Value::Null) => Value::Null,
            Some(value) => normalized(LAST_LOCATION, value)?,
        };
        doc.insert(LAST_LOCATION.into(), location);
        Ok(doc)
    }
}

mod jail {
    use super::*;

    pub(super) fn upgraders() -> Vec<Upgrader> {
        vec![
            Upgrader {
                from: 1,
                description: "collect jails into a list",
                apply: collect_into_list,
            },
            Upgrader {
                from: 2,
                description: "recognize release locations",
                apply: |doc, _| Ok(doc),
            },
            Upgrader {
                from: 3,
                description: "normalize jail locations",
                apply: normalize_locations,
            },
        ]
    }

    /// Version 1 stored each jail as a top-level `name: location` entry.
    fn collect_into_list(doc: Document, _: &MigrationContext) -> Result<Document, MigrationError> {
        let jails: Vec<Value> = doc
            .into_iter()
            .filter(|(name, value)| !(name == VERSION_FIELD && value.is_number()))
            .map(|(name, location)| {
                let mut entry = Map::new();
                entry.insert("name".into(), Value::String(name));
                entry.insert("location".into(), location);
                Value::Object(entry)
            })
            .collect();

        let mut next = Document::new();
        next.insert("jails".into(), Value::Array(jails));
        Ok(next)
    }

    fn normalize_locations(mut doc: Document, _: &MigrationContext) -> Result<Document, MigrationError> {
        let Some(Value::Array(entries)) = doc.get_mut("jails") else {
            return Err(MigrationError::Malformed {
                field: "jails".into(),
                message: "expected a list".into(),
            });
        };

        for entry in entries.iter_mut() {
            let Some(obj) = entry.as_object_mut() else {
                continue;
            };
            if let Some(location) = obj.get("location") {
                let location = normalized("location", location)?;
                obj.insert("location".into(), location);
            }
            if let Some(release) = obj.get("release-location")
                && !release.is_null()
            {
                let release = normalized("release-location", release)?;
                obj.insert("release-location".into(), release);
            }
        }
        Ok(doc)
    }
}
