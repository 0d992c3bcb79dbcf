//! Run configuration shared by the pipelines.
//!
//! Every location that may come from the environment is resolved in the same
//! order: an explicit argument, then a named [`LookupSource`], then failure.
//! Components receive the resolved values; nothing reads the process
//! environment behind the caller's back.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Environment variable holding the BLAST database root.
pub const BLASTDB_VAR: &str = "BLASTDB";

/// Environment variable holding the germline reference root.
pub const GERMLINE_VAR: &str = "GERMLINE";

/// Environment variable holding the igblast database folder.
pub const IGDATA_VAR: &str = "IGDATA";

/// Default output folder, relative to a sample directory.
pub const DEFAULT_DATA_DIR: &str = "vdjprep/data";

/// Where named settings are looked up when no explicit value is given.
pub trait LookupSource: Sync {
    fn lookup(&self, key: &str) -> Option<String>;
}

/// The process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl LookupSource for ProcessEnv {
    fn lookup(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

impl LookupSource for HashMap<String, String> {
    fn lookup(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Resolve a directory-like setting: explicit value, then `var` from `source`.
pub fn resolve_location(
    explicit: Option<&Path>,
    var: &str,
    source: &dyn LookupSource,
    what: &str,
) -> Result<ResolvedLocation> {
    if let Some(path) = explicit {
        return Ok(ResolvedLocation::Explicit(path.to_path_buf()));
    }
    match source.lookup(var) {
        Some(value) => Ok(ResolvedLocation::FromLookup(PathBuf::from(value))),
        None => Err(Error::configuration(
            what,
            Some(format!(
                "environment variable {var} must be set, otherwise provide the path explicitly"
            )),
        )),
    }
}

/// A resolved location, remembering where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedLocation {
    Explicit(PathBuf),
    FromLookup(PathBuf),
}

impl ResolvedLocation {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedLocation::Explicit(p) | ResolvedLocation::FromLookup(p) => p,
        }
    }

    pub fn is_explicit(&self) -> bool {
        matches!(self, ResolvedLocation::Explicit(_))
    }
}

/// Rearrangement table flavour produced by the igblast step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileFormat {
    #[default]
    Airr,
    Changeo,
}

impl FileFormat {
    /// Suffix appended to the FASTA stem for every derived file.
    pub fn suffix(&self) -> &'static str {
        match self {
            FileFormat::Airr => "_igblast_gap",
            FileFormat::Changeo => "_igblast_db-pass",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Airr => "airr",
            FileFormat::Changeo => "changeo",
        }
    }
}

impl FromStr for FileFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "airr" => Ok(FileFormat::Airr),
            "changeo" => Ok(FileFormat::Changeo),
            _ => Err(Error::configuration(
                format!("file format '{s}'"),
                Some("valid formats: airr, changeo"),
            )),
        }
    }
}

/// FASTA basename up to the first `.fasta`.
pub fn fasta_stem(fasta: &Path) -> String {
    let name = fasta
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.find(".fasta") {
        Some(pos) => name[..pos].to_string(),
        None => name,
    }
}

/// Directory containing `path`, or `.` for bare file names.
pub fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Files derived from one input FASTA by the isotype pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplePaths {
    pub fasta: PathBuf,
    pub report: PathBuf,
    pub summary: PathBuf,
    pub table: PathBuf,
}

impl SamplePaths {
    /// Report and summary go to `dirs` (or `<fasta dir>/tmp`); the table sits
    /// in `dirs` (or beside the FASTA).
    pub fn derive(fasta: &Path, format: FileFormat, dirs: Option<&Path>) -> Self {
        let base = format!("{}{}", fasta_stem(fasta), format.suffix());
        let fasta_dir = parent_dir(fasta);
        let (work_dir, table_dir) = match dirs {
            Some(d) => (d.to_path_buf(), d.to_path_buf()),
            None => (fasta_dir.join("tmp"), fasta_dir),
        };
        SamplePaths {
            fasta: fasta.to_path_buf(),
            report: work_dir.join(format!("{base}.xml")),
            summary: work_dir.join(format!("{base}.blastsummary.txt")),
            table: table_dir.join(format!("{base}.tsv")),
        }
    }
}
