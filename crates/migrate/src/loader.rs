//! Script Loader - discovers migration files in a directory
//!
//! A migration file is named `<version>_<label>.sql`, e.g. `0002_add_phone.sql`.
//! The leading digits are the version, the label becomes the migration name.
//! Anything else in the directory (other extensions, subdirectories, names without
//! a numeric prefix) is ignored. Nothing here touches the database.

use std::fs;
use std::path::Path;

use crate::definitions::Migration;
use crate::error::{MigrateError, MigrateResult, ParseError};

const EXTENSION: &str = ".sql";
const SEPARATOR: char = '_';

/// Load every migration script from `dir`, ordered ascending by version
///
/// Directory listings come back in no particular order, so the result is sorted
/// here. Two files with the same version fail the whole load.
pub fn load_migrations<P: AsRef<Path>>(dir: P) -> MigrateResult<Vec<Migration>> {
    let dir = dir.as_ref();
    let io_err = |source| MigrateError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        if !entry.file_type().map_err(io_err)?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            files.push(name.to_string());
        }
    }
    // Stable duplicate reports regardless of enumeration order
    files.sort();

    let mut migrations = Vec::new();
    for file in files {
        let Some((version, name)) = parse_filename(&file)? else {
            tracing::trace!(file = %file, "Ignoring non-migration file");
            continue;
        };

        let path = dir.join(&file);
        let sql = fs::read_to_string(&path).map_err(|source| MigrateError::Io { path, source })?;

        insert_sorted(
            &mut migrations,
            Migration {
                version,
                name,
                file,
                sql,
            },
        )?;
    }

    tracing::debug!(
        dir = %dir.display(),
        count = migrations.len(),
        "Loaded migration scripts"
    );
    Ok(migrations)
}

/// Split a filename into `(version, name)`
///
/// Returns `Ok(None)` for files that are not migrations at all. A file that has
/// the migration shape but whose version is zero or does not fit in an `i64` is
/// an error rather than silently skipped.
pub fn parse_filename(file: &str) -> Result<Option<(i64, String)>, ParseError> {
    let Some(stem) = file.strip_suffix(EXTENSION) else {
        return Ok(None);
    };
    let Some((digits, label)) = stem.split_once(SEPARATOR) else {
        return Ok(None);
    };
    if digits.is_empty() || label.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(None);
    }

    let version = match digits.parse::<i64>() {
        Ok(v) if v > 0 => v,
        _ => {
            return Err(ParseError::UnparsableFilename {
                file: file.to_string(),
            })
        }
    };

    Ok(Some((version, label.replace(SEPARATOR, " "))))
}

/// Insert keeping the sequence ascending; a repeated version is rejected
pub(crate) fn insert_sorted(
    migrations: &mut Vec<Migration>,
    migration: Migration,
) -> Result<(), ParseError> {
    match migrations.binary_search_by_key(&migration.version, |m| m.version) {
        Ok(existing) => Err(ParseError::DuplicateVersion {
            version: migration.version,
            first: migrations[existing].file.clone(),
            second: migration.file,
        }),
        Err(position) => {
            migrations.insert(position, migration);
            Ok(())
        }
    }
}
