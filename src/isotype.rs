//! Constant-region (isotype) assignment for one contig FASTA.
//!
//! Pipeline: align -> split report -> parse chunks -> write summary ->
//! index -> resolve every header -> transfer the `c_*` columns -> rewrite the
//! record table.

use log::{info, warn};
use std::path::{Path, PathBuf};

use crate::blast_xml::parse_report;
use crate::blastn::Aligner;
use crate::config::{FileFormat, SamplePaths};
use crate::error::Result;
use crate::fasta::read_headers;
use crate::resolve::resolve_batch;
use crate::summary::{write_summary_file, SummaryIndex};
use crate::table::RecordTable;

#[derive(Debug, Clone)]
pub struct IsotypeOptions {
    pub file_format: FileFormat,
    pub organism: String,
    /// Explicit BLAST database; `$BLASTDB` is consulted otherwise.
    pub blastdb: Option<PathBuf>,
    /// Keep the allele part of the call (`IGHG1*01` instead of `IGHG1`).
    pub allele: bool,
    pub parallel: bool,
    /// Directory for the report, summary and table, instead of the defaults.
    pub dirs: Option<PathBuf>,
}

impl Default for IsotypeOptions {
    fn default() -> Self {
        IsotypeOptions {
            file_format: FileFormat::Airr,
            organism: "human".to_string(),
            blastdb: None,
            allele: false,
            parallel: true,
            dirs: None,
        }
    }
}

/// What one run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct IsotypeReport {
    pub paths: SamplePaths,
    pub contigs: usize,
    pub assigned: usize,
    pub rows: usize,
}

/// Run the whole pipeline for one FASTA with the given aligner.
pub fn assign_isotype(
    fasta: &Path,
    opts: &IsotypeOptions,
    aligner: &dyn Aligner,
) -> Result<IsotypeReport> {
    let paths = SamplePaths::derive(fasta, opts.file_format, opts.dirs.as_deref());

    aligner.align(fasta, &paths.report)?;

    let outcomes = parse_report(&paths.report)?;
    write_summary_file(&paths.summary, &fasta.display().to_string(), &outcomes)?;
    let index = SummaryIndex::from_outcomes(outcomes);
    info!(
        "[isotype] {}: {} queries in report, {} without a C segment",
        fasta.display(),
        index.len(),
        index.no_hit_count()
    );

    let contigs = read_headers(fasta)?;
    let tables = resolve_batch(&index, &contigs, opts.allele, opts.parallel);

    let mut table = RecordTable::read_tsv(&paths.table)?;
    for (column, lookup) in tables.columns() {
        table.transfer_column(column, lookup)?;
    }
    table.add_cell_id()?;
    table.write_tsv(&paths.table)?;

    let assigned = tables.resolved_count();
    if assigned == 0 && !contigs.is_empty() {
        warn!(
            "[isotype] no contig in {} received a constant region call",
            fasta.display()
        );
    }
    info!(
        "[isotype] {} of {} contigs assigned, written to {}",
        assigned,
        contigs.len(),
        paths.table.display()
    );

    Ok(IsotypeReport {
        paths,
        contigs: contigs.len(),
        assigned,
        rows: table.len(),
    })
}
