//! blastn invocation against the constant-region database.

use log::debug;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::{resolve_location, LookupSource, ResolvedLocation, BLASTDB_VAR};
use crate::error::Result;
use crate::tools::{locate_tool, run_to_file, BLASTN_OVERRIDE};

const EVALUE_CUTOFF: &str = "0.001";
const MAX_TARGET_SEQS: &str = "1";
/// XML report.
const OUTFMT: &str = "5";

/// Produces an XML alignment report for a query FASTA.
pub trait Aligner: Sync {
    fn align(&self, query: &Path, report: &Path) -> Result<()>;
}

/// The reference database passed as `-db`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlastDatabase {
    pub path: PathBuf,
    /// Set when the path was given explicitly; exported to blastn as `BLASTDB`.
    pub export_root: Option<PathBuf>,
}

impl BlastDatabase {
    /// Explicit path, otherwise `$BLASTDB/<org>/<org>_BCR_C.fasta`.
    pub fn resolve(
        explicit: Option<&Path>,
        organism: &str,
        source: &dyn LookupSource,
    ) -> Result<Self> {
        let location = resolve_location(explicit, BLASTDB_VAR, source, "BLAST database")?;
        Ok(match location {
            ResolvedLocation::Explicit(path) => BlastDatabase {
                export_root: Some(path.clone()),
                path,
            },
            ResolvedLocation::FromLookup(root) => BlastDatabase {
                path: root
                    .join(organism)
                    .join(format!("{organism}_BCR_C.fasta")),
                export_root: None,
            },
        })
    }
}

/// `blastn` run as a subprocess.
#[derive(Debug, Clone)]
pub struct Blastn {
    pub executable: PathBuf,
    pub database: BlastDatabase,
}

impl Blastn {
    pub fn new(database: BlastDatabase, source: &dyn LookupSource) -> Result<Self> {
        let executable = locate_tool("blastn", BLASTN_OVERRIDE, source)?;
        Ok(Blastn {
            executable,
            database,
        })
    }

    pub fn command(&self, query: &Path) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.arg("-db")
            .arg(&self.database.path)
            .args(["-evalue", EVALUE_CUTOFF])
            .args(["-max_target_seqs", MAX_TARGET_SEQS])
            .args(["-outfmt", OUTFMT])
            .arg("-query")
            .arg(query);
        if let Some(root) = &self.database.export_root {
            debug!("[blastn] exporting {BLASTDB_VAR}={}", root.display());
            cmd.env(BLASTDB_VAR, root);
        }
        cmd
    }
}

impl Aligner for Blastn {
    fn align(&self, query: &Path, report: &Path) -> Result<()> {
        run_to_file("blastn", self.command(query), report)
    }
}
