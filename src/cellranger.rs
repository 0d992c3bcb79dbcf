//! Transfer of 10x contig annotations onto a rearrangement table.

use log::{info, warn};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::config::{parent_dir, FileFormat};
use crate::error::Result;
use crate::fasta::open_input;
use crate::resolve::LookupTable;
use crate::table::RecordTable;

/// One row of `*_annotations.csv`; unused columns are ignored.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ContigAnnotation {
    pub contig_id: String,
    pub barcode: String,
    #[serde(default)]
    pub v_gene: Option<String>,
    #[serde(default)]
    pub d_gene: Option<String>,
    #[serde(default)]
    pub j_gene: Option<String>,
    #[serde(default)]
    pub c_gene: Option<String>,
    #[serde(default)]
    pub cdr3: Option<String>,
    #[serde(default)]
    pub cdr3_nt: Option<String>,
    #[serde(default)]
    pub reads: Option<String>,
    #[serde(default)]
    pub umis: Option<String>,
}

type Field = fn(&ContigAnnotation) -> Option<String>;

const BASIC_COLUMNS: [(&str, Field); 4] = [
    ("cell_id", |a: &ContigAnnotation| Some(a.barcode.clone())),
    ("c_call", |a: &ContigAnnotation| a.c_gene.clone()),
    ("consensus_count", |a: &ContigAnnotation| a.reads.clone()),
    ("umi_count", |a: &ContigAnnotation| a.umis.clone()),
];

const EXTENDED_COLUMNS: [(&str, Field); 5] = [
    ("v_call_10x", |a: &ContigAnnotation| a.v_gene.clone()),
    ("d_call_10x", |a: &ContigAnnotation| a.d_gene.clone()),
    ("j_call_10x", |a: &ContigAnnotation| a.j_gene.clone()),
    ("junction_10x", |a: &ContigAnnotation| a.cdr3_nt.clone()),
    ("junction_10x_aa", |a: &ContigAnnotation| a.cdr3.clone()),
];

/// Annotation table that belongs to a rearrangement TSV:
/// `<dir>/<name minus _igblast_gap.tsv>_annotations.csv`.
pub fn annotations_for_table(tsv: &Path) -> PathBuf {
    let name = tsv
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = [FileFormat::Airr, FileFormat::Changeo]
        .iter()
        .find_map(|f| name.strip_suffix(&format!("{}.tsv", f.suffix())))
        .or_else(|| name.strip_suffix(".tsv"))
        .unwrap_or(&name);
    parent_dir(tsv).join(format!("{stem}_annotations.csv"))
}

pub fn read_annotations<P: AsRef<Path>>(path: P) -> Result<Vec<ContigAnnotation>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(open_input(path)?);
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

fn lookup(annotations: &[ContigAnnotation], field: Field) -> LookupTable {
    annotations
        .iter()
        .map(|a| (a.contig_id.clone(), field(a)))
        .collect()
}

/// Fill barcode, c_gene, read and UMI counts (and, when `extended`, the 10x
/// V/D/J calls and junctions) into `table` by contig id.
pub fn apply_annotations(
    table: &mut RecordTable,
    annotations: &[ContigAnnotation],
    extended: bool,
) -> Result<usize> {
    let mut matched = 0;
    let extra: &[(&str, Field)] = if extended { &EXTENDED_COLUMNS } else { &[] };
    for (column, field) in BASIC_COLUMNS.iter().chain(extra) {
        let filled = table.transfer_column(column, &lookup(annotations, *field))?;
        if *column == "cell_id" {
            matched = filled;
        }
    }
    Ok(matched)
}

/// Rewrite `tsv` in place with the columns from its annotation table.
pub fn map_cellranger(tsv: &Path, extended: bool) -> Result<usize> {
    let anno = annotations_for_table(tsv);
    let annotations = read_annotations(&anno)?;
    let mut table = RecordTable::read_tsv(tsv)?;
    let matched = apply_annotations(&mut table, &annotations, extended)?;
    if matched < table.len() {
        warn!(
            "[cellranger] {} of {} rows in {} have no entry in {}",
            table.len() - matched,
            table.len(),
            tsv.display(),
            anno.display()
        );
    }
    table.write_tsv(tsv)?;
    info!(
        "[cellranger] mapped {} annotations onto {}",
        matched,
        tsv.display()
    );
    Ok(matched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::SEQUENCE_ID;
    use pretty_assertions::assert_eq;

    const ANNOTATIONS: &str = "barcode,is_cell,contig_id,v_gene,d_gene,j_gene,c_gene,cdr3,cdr3_nt,reads,umis\n\
AAAC-1,True,AAAC-1_contig_1,IGHV1-2,None,IGHJ4,IGHM,CARW,TGTGCGAGATGG,1200,8\n\
AAAC-1,True,AAAC-1_contig_2,IGKV1-5,,IGKJ1,IGKC,CQQY,TGTCAGCAGTAT,900,5\n";

    #[test]
    fn test_annotations_path_from_table() {
        assert_eq!(
            annotations_for_table(Path::new("/s/filtered_contig_igblast_gap.tsv")),
            PathBuf::from("/s/filtered_contig_annotations.csv")
        );
        assert_eq!(
            annotations_for_table(Path::new("/s/all_contig_igblast_db-pass.tsv")),
            PathBuf::from("/s/all_contig_annotations.csv")
        );
    }

    #[test]
    fn test_unmatched_rows_stay_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let anno = dir.path().join("filtered_contig_annotations.csv");
        std::fs::write(&anno, ANNOTATIONS).unwrap();
        let annotations = read_annotations(&anno).unwrap();
        assert_eq!(annotations[1].d_gene, None);

        let mut table = RecordTable::new([SEQUENCE_ID]);
        table.push_row([(SEQUENCE_ID, "AAAC-1_contig_1")]);
        table.push_row([(SEQUENCE_ID, "TTTT-1_contig_1")]);
        let matched = apply_annotations(&mut table, &annotations, false).unwrap();
        assert_eq!(matched, 1);
        assert_eq!(table.column_values("cell_id").unwrap(), vec!["AAAC-1", ""]);
        assert_eq!(table.column_values("umi_count").unwrap(), vec!["8", ""]);
        assert!(!table.has_column("v_call_10x"));
    }

    #[test]
    fn test_extended_columns_in_place() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("filtered_contig_annotations.csv"), ANNOTATIONS).unwrap();
        let tsv = dir.path().join("filtered_contig_igblast_gap.tsv");
        std::fs::write(
            &tsv,
            "sequence_id\tv_call\nAAAC-1_contig_2\tIGKV1-5*01\nAAAC-1_contig_1\tIGHV1-2*02\n",
        )
        .unwrap();

        assert_eq!(map_cellranger(&tsv, true).unwrap(), 2);
        let table = RecordTable::read_tsv(&tsv).unwrap();
        assert_eq!(
            table.column_values("junction_10x_aa").unwrap(),
            vec!["CQQY", "CARW"]
        );
        assert_eq!(table.column_values("d_call_10x").unwrap(), vec!["", "None"]);
        assert_eq!(table.column_values("c_call").unwrap(), vec!["IGKC", "IGHM"]);
    }
}
