//! Sample-prefixing of contig FASTA headers and their annotation table.

use log::{info, warn};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::{parent_dir, DEFAULT_DATA_DIR};
use crate::error::{Error, Result};
use crate::fasta::{write_fasta, FastaReader};
use crate::table::RecordTable;

pub const CONTIG_ID: &str = "contig_id";
pub const BARCODE: &str = "barcode";

/// Where one formatted sample was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedSample {
    pub fasta: PathBuf,
    pub annotations: Option<PathBuf>,
    pub records: usize,
}

/// `<fasta dir>/<stem>_annotations.csv` for a contig FASTA.
pub fn annotations_path(fasta: &Path) -> PathBuf {
    let name = fasta
        .file_name()
        .map(|n| n.to_string_lossy().replace(".fasta", "_annotations.csv"))
        .unwrap_or_default();
    parent_dir(fasta).join(name)
}

fn prefixed(prefix: Option<&str>, value: &str) -> String {
    match prefix {
        Some(p) => format!("{p}_{value}"),
        None => value.to_string(),
    }
}

/// Rewrite headers as `<prefix>_<header>` and prefix `contig_id`/`barcode`
/// in the companion annotation table. Output lands in `outdir`, or
/// `<fasta dir>/vdjprep/data`.
pub fn format_fasta(
    fasta: &Path,
    prefix: Option<&str>,
    outdir: Option<&Path>,
) -> Result<FormattedSample> {
    let out_dir = match outdir {
        Some(d) => d.to_path_buf(),
        None => parent_dir(fasta).join(DEFAULT_DATA_DIR),
    };
    std::fs::create_dir_all(&out_dir)?;

    let mut records = Vec::new();
    for record in FastaReader::from_path(fasta)? {
        let mut record = record?;
        record.header = prefixed(prefix, &record.header);
        records.push(record);
    }

    let file_name = fasta
        .file_name()
        .ok_or_else(|| Error::configuration(format!("FASTA path {:?}", fasta), None::<String>))?;
    let out_fasta = out_dir.join(file_name);
    let mut writer = BufWriter::new(File::create(&out_fasta)?);
    write_fasta(&mut writer, &records)?;
    writer.flush()?;

    let anno = annotations_path(fasta);
    let annotations = if anno.is_file() {
        let mut table = RecordTable::read_csv(&anno)?;
        table.require_column(CONTIG_ID)?;
        table.require_column(BARCODE)?;
        table.set_column_with(CONTIG_ID, |row| {
            prefixed(prefix, row.get(CONTIG_ID).unwrap_or_default())
        });
        table.set_column_with(BARCODE, |row| {
            let barcode = row.get(BARCODE).unwrap_or_default();
            let barcode = barcode.split_once('-').map(|(b, _)| b).unwrap_or(barcode);
            prefixed(prefix, barcode)
        });
        let out_anno = out_dir.join(anno.file_name().unwrap_or_default());
        table.write_csv(&out_anno)?;
        Some(out_anno)
    } else {
        warn!(
            "[format] no annotation table at {}, only the FASTA is rewritten",
            anno.display()
        );
        None
    };

    info!(
        "[format] {} records from {} written to {}",
        records.len(),
        fasta.display(),
        out_fasta.display()
    );

    Ok(FormattedSample {
        fasta: out_fasta,
        annotations,
        records: records.len(),
    })
}

/// [`format_fasta`] over several files; `prefixes`, when given, pairs up
/// with `fastas` by position.
pub fn format_fastas(
    fastas: &[PathBuf],
    prefixes: Option<&[String]>,
    outdir: Option<&Path>,
) -> Result<Vec<FormattedSample>> {
    if let Some(prefixes) = prefixes {
        if prefixes.len() != fastas.len() {
            return Err(Error::configuration(
                "sample prefixes",
                Some(format!(
                    "{} prefixes given for {} FASTA files",
                    prefixes.len(),
                    fastas.len()
                )),
            ));
        }
    }

    fastas
        .iter()
        .enumerate()
        .map(|(i, fasta)| {
            let prefix = prefixes.map(|p| p[i].as_str());
            format_fasta(fasta, prefix, outdir)
        })
        .collect()
}
