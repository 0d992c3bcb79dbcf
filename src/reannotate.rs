//! Gene reannotation of contig FASTA files with igblast.
//!
//! Per input:
//! 1. Assign V(D)J genes with `AssignGenes.py igblast`
//! 2. airr: insert IMGT gaps into the V region of `sequence_alignment`, write
//!    `<stem>_igblast_gap.tsv` and map the 10x annotations onto it
//! 3. changeo: build `<stem>_igblast_db-pass.tsv` with `MakeDb.py igblast`
//! 4. Move the raw igblast output into `tmp/`

use log::{debug, info, warn};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;

use crate::cellranger::{annotations_for_table, map_cellranger};
use crate::config::{
    fasta_stem, parent_dir, resolve_location, FileFormat, LookupSource, DEFAULT_DATA_DIR,
    IGDATA_VAR,
};
use crate::error::{Error, Result};
use crate::fasta::read_fasta;
use crate::genotype::{GermlineReference, V_CALL};
use crate::table::RecordTable;
use crate::tools::{locate_tool, run_captured, IGBLAST_OVERRIDE, MAKEDB_OVERRIDE};

pub const SEQUENCE_ALIGNMENT: &str = "sequence_alignment";
pub const V_GERMLINE_START: &str = "v_germline_start";
pub const V_GERMLINE_END: &str = "v_germline_end";

/// IMGT allele name inside a FASTA header or a gene call.
const ALLELE_PATTERN: &str = r"(IG[HLK]|TR[ABGD])[VDJ][A-R0-9]+[-/\w]*[-*][.\w]+";

const REFERENCE_EXTENSIONS: [&str; 3] = ["fasta", "fa", "fna"];

/// Receptor family handed to igblast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Loci {
    #[default]
    Ig,
    Tr,
}

impl Loci {
    pub fn as_str(&self) -> &'static str {
        match self {
            Loci::Ig => "ig",
            Loci::Tr => "tr",
        }
    }
}

impl FromStr for Loci {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ig" => Ok(Loci::Ig),
            "tr" => Ok(Loci::Tr),
            _ => Err(Error::configuration(
                format!("loci '{s}'"),
                Some("valid loci: ig, tr"),
            )),
        }
    }
}

/// Folder with the igblast database (`$IGDATA`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgblastDatabase {
    pub dir: PathBuf,
}

impl IgblastDatabase {
    pub fn resolve(explicit: Option<&Path>, source: &dyn LookupSource) -> Result<Self> {
        let location = resolve_location(explicit, IGDATA_VAR, source, "igblast database")?;
        Ok(IgblastDatabase {
            dir: location.path().to_path_buf(),
        })
    }
}

/// Files around one contig FASTA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgblastPaths {
    pub fasta: PathBuf,
    /// Raw igblast output beside the FASTA.
    pub igblast_output: PathBuf,
    /// Where the raw output is kept once the table is built.
    pub archived_output: PathBuf,
    /// Rearrangement table consumed by the isotype and genotype steps.
    pub table: PathBuf,
}

impl IgblastPaths {
    pub fn derive(fasta: &Path, format: FileFormat) -> Self {
        let stem = fasta_stem(fasta);
        let dir = parent_dir(fasta);
        let raw_name = match format {
            FileFormat::Airr => format!("{stem}_igblast.tsv"),
            FileFormat::Changeo => format!("{stem}_igblast.fmt7"),
        };
        IgblastPaths {
            fasta: fasta.to_path_buf(),
            igblast_output: dir.join(&raw_name),
            archived_output: dir.join("tmp").join(&raw_name),
            table: dir.join(format!("{stem}{}.tsv", format.suffix())),
        }
    }
}

/// Input to one gene assignment run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignRequest {
    pub fasta: PathBuf,
    pub igdata: PathBuf,
    pub organism: String,
    pub loci: Loci,
    pub format: FileFormat,
    pub output: PathBuf,
}

pub trait GeneAssigner: Sync {
    /// Write the igblast result for `request.fasta` to `request.output`.
    fn assign_genes(&self, request: &AssignRequest) -> Result<()>;
}

/// `AssignGenes.py igblast`.
#[derive(Debug, Clone)]
pub struct AssignGenes {
    pub executable: PathBuf,
}

impl AssignGenes {
    pub fn new(source: &dyn LookupSource) -> Result<Self> {
        Ok(AssignGenes {
            executable: locate_tool("AssignGenes.py", IGBLAST_OVERRIDE, source)?,
        })
    }

    pub fn command(&self, request: &AssignRequest) -> Command {
        let format = match request.format {
            FileFormat::Airr => "airr",
            FileFormat::Changeo => "blast",
        };
        let mut cmd = Command::new(&self.executable);
        cmd.arg("igblast")
            .arg("-s")
            .arg(&request.fasta)
            .arg("-b")
            .arg(&request.igdata)
            .args(["--organism", request.organism.as_str()])
            .args(["--loci", request.loci.as_str()])
            .args(["--format", format])
            .arg("-o")
            .arg(&request.output);
        cmd
    }
}

impl GeneAssigner for AssignGenes {
    fn assign_genes(&self, request: &AssignRequest) -> Result<()> {
        run_captured("AssignGenes", self.command(request))?;
        Ok(())
    }
}

/// Input to one Change-O table build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MakeDbRequest {
    pub igblast_output: PathBuf,
    pub fasta: PathBuf,
    pub references: PathBuf,
    pub annotations: PathBuf,
    pub extended: bool,
    pub out_dir: PathBuf,
    /// Output name without the `_db-pass.tsv` suffix.
    pub out_name: String,
}

impl MakeDbRequest {
    pub fn output(&self) -> PathBuf {
        self.out_dir.join(format!("{}_db-pass.tsv", self.out_name))
    }
}

pub trait DatabaseBuilder: Sync {
    /// Write the Change-O table to `request.output()`.
    fn make_db(&self, request: &MakeDbRequest) -> Result<()>;
}

/// `MakeDb.py igblast`.
#[derive(Debug, Clone)]
pub struct MakeDb {
    pub executable: PathBuf,
}

impl MakeDb {
    pub fn new(source: &dyn LookupSource) -> Result<Self> {
        Ok(MakeDb {
            executable: locate_tool("MakeDb.py", MAKEDB_OVERRIDE, source)?,
        })
    }

    pub fn command(&self, request: &MakeDbRequest) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.arg("igblast")
            .arg("-i")
            .arg(&request.igblast_output)
            .arg("-s")
            .arg(&request.fasta)
            .arg("-r")
            .arg(&request.references)
            .arg("--10x")
            .arg(&request.annotations);
        if request.extended {
            cmd.arg("--extended");
        }
        cmd.arg("--outdir")
            .arg(&request.out_dir)
            .args(["--outname", request.out_name.as_str()]);
        cmd
    }
}

impl DatabaseBuilder for MakeDb {
    fn make_db(&self, request: &MakeDbRequest) -> Result<()> {
        run_captured("MakeDb", self.command(request))?;
        Ok(())
    }
}

/// Allele -> IMGT-gapped germline sequence.
pub type GappedReferences = HashMap<String, String>;

/// Read every FASTA in `dir`, keyed by the allele named in each header.
pub fn read_gapped_references(dir: &Path) -> Result<GappedReferences> {
    let allele = Regex::new(ALLELE_PATTERN)?;
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| REFERENCE_EXTENSIONS.contains(&ext))
                .unwrap_or(false)
        })
        .collect();
    files.sort();

    let mut references = GappedReferences::new();
    for file in &files {
        for record in read_fasta(file)? {
            let name = match allele.find(&record.header) {
                Some(m) => m.as_str().to_string(),
                None => record
                    .header
                    .split_whitespace()
                    .next()
                    .unwrap_or_default()
                    .to_string(),
            };
            references.insert(name, record.sequence.to_uppercase());
        }
    }

    if references.is_empty() {
        return Err(Error::configuration(
            format!("germline references in {}", dir.display()),
            Some("no FASTA records found"),
        ));
    }
    if !references.values().any(|seq| seq.contains('.')) {
        warn!(
            "[reannotate] germlines in {} carry no IMGT gaps, gapped alignments will match the input",
            dir.display()
        );
    }
    debug!(
        "[reannotate] {} germline alleles from {} file(s)",
        references.len(),
        files.len()
    );
    Ok(references)
}

/// A V region placed on IMGT numbering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GappedV {
    pub sequence: String,
    pub germline_start: usize,
    pub germline_end: usize,
}

/// Pad `aligned` to its germline start and copy the gaps of `gapped_reference`
/// that fall inside the V region.
///
/// `germline_start` is 1-based on the ungapped germline; `germline_length`
/// counts the aligned germline positions.
pub fn gap_v_region(
    aligned: &str,
    germline_start: usize,
    germline_length: usize,
    gapped_reference: &str,
) -> GappedV {
    let lead = germline_start.saturating_sub(1);
    let mut sequence = ".".repeat(lead);
    sequence.push_str(aligned);

    let mut gap_count = lead;
    for (i, _) in gapped_reference.match_indices('.') {
        if i >= germline_length + gap_count {
            break;
        }
        sequence.insert(i.min(sequence.len()), '.');
        gap_count += 1;
    }

    GappedV {
        sequence,
        germline_start: 1,
        germline_end: germline_length + gap_count,
    }
}

/// Outcome of gapping one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GapReport {
    pub gapped: usize,
    /// Rows whose V allele has no reference; left ungapped.
    pub missing_reference: usize,
    /// Rows without a V alignment.
    pub unaligned: usize,
}

/// Rewrite `sequence_alignment` and the V germline coordinates on IMGT
/// numbering for every row whose first V allele has a reference.
pub fn insert_gaps(table: &mut RecordTable, references: &GappedReferences) -> Result<GapReport> {
    let allele = Regex::new(ALLELE_PATTERN)?;
    for column in [V_CALL, SEQUENCE_ALIGNMENT, V_GERMLINE_START, V_GERMLINE_END] {
        table.require_column(column)?;
    }

    let mut report = GapReport::default();
    let mut updates = Vec::new();
    for (index, row) in table.rows().enumerate() {
        let coordinates = (
            row.get(V_GERMLINE_START).unwrap_or_default().parse::<usize>(),
            row.get(V_GERMLINE_END).unwrap_or_default().parse::<usize>(),
        );
        let (start, end) = match coordinates {
            (Ok(start), Ok(end)) if start >= 1 && end >= start => (start, end),
            _ => {
                report.unaligned += 1;
                continue;
            }
        };
        let call = row.get(V_CALL).unwrap_or_default();
        let reference = allele
            .find(call)
            .and_then(|m| references.get(m.as_str()));
        match reference {
            Some(reference) => {
                let aligned = row.get(SEQUENCE_ALIGNMENT).unwrap_or_default();
                updates.push((index, gap_v_region(aligned, start, end - start + 1, reference)));
                report.gapped += 1;
            }
            None => report.missing_reference += 1,
        }
    }

    for (index, gapped) in updates {
        table.set_cell(index, SEQUENCE_ALIGNMENT, gapped.sequence)?;
        table.set_cell(index, V_GERMLINE_START, gapped.germline_start.to_string())?;
        table.set_cell(index, V_GERMLINE_END, gapped.germline_end.to_string())?;
    }
    Ok(report)
}

#[derive(Debug, Clone)]
pub struct ReannotateOptions {
    /// Layout of sample folders.
    pub data_dir: PathBuf,
    pub organism: String,
    pub loci: Loci,
    pub file_format: FileFormat,
    /// Use `filtered_contig.fasta` instead of `all_contig.fasta`.
    pub filtered: bool,
    /// Also transfer the 10x V/D/J calls and junctions.
    pub extended: bool,
}

impl Default for ReannotateOptions {
    fn default() -> Self {
        ReannotateOptions {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            organism: "human".to_string(),
            loci: Loci::Ig,
            file_format: FileFormat::Airr,
            filtered: false,
            extended: false,
        }
    }
}

impl ReannotateOptions {
    /// A file is used as-is; anything else names a sample folder.
    pub fn contig_fasta(&self, input: &str) -> PathBuf {
        let path = Path::new(input);
        if path.is_file() {
            return path.to_path_buf();
        }
        let name = if self.filtered {
            "filtered_contig.fasta"
        } else {
            "all_contig.fasta"
        };
        path.join(&self.data_dir).join(name)
    }
}

/// External tools behind one reannotation run. `database_builder` is only
/// needed for Change-O output.
pub struct ReannotateTools<'a> {
    pub assigner: &'a dyn GeneAssigner,
    pub database_builder: Option<&'a dyn DatabaseBuilder>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReannotateReport {
    pub paths: IgblastPaths,
    pub rows: usize,
    /// Gap insertion counts; `None` for Change-O output.
    pub gaps: Option<GapReport>,
    /// Rows that received 10x annotations; `None` for Change-O output.
    pub annotated: Option<usize>,
}

/// How the igblast output becomes a rearrangement table.
enum TableStep<'a> {
    InsertGaps(GappedReferences),
    MakeDb(&'a dyn DatabaseBuilder),
}

/// Reannotate every input (sample folders or contig FASTA files).
pub fn reannotate_genes(
    inputs: &[String],
    opts: &ReannotateOptions,
    igdata: &IgblastDatabase,
    reference: &GermlineReference,
    tools: &ReannotateTools<'_>,
) -> Result<Vec<ReannotateReport>> {
    let table_step = match opts.file_format {
        FileFormat::Airr => TableStep::InsertGaps(read_gapped_references(&reference.dir)?),
        FileFormat::Changeo => match tools.database_builder {
            Some(builder) => TableStep::MakeDb(builder),
            None => {
                return Err(Error::configuration(
                    "changeo output",
                    Some("MakeDb.py is required to build Change-O tables"),
                ))
            }
        },
    };

    let mut reports = Vec::with_capacity(inputs.len());
    for input in inputs {
        let fasta = opts.contig_fasta(input);
        if !fasta.is_file() {
            return Err(Error::configuration(
                format!("contig FASTA for '{input}'"),
                Some(format!("{} does not exist", fasta.display())),
            ));
        }
        let paths = IgblastPaths::derive(&fasta, opts.file_format);

        tools.assigner.assign_genes(&AssignRequest {
            fasta: fasta.clone(),
            igdata: igdata.dir.clone(),
            organism: opts.organism.clone(),
            loci: opts.loci,
            format: opts.file_format,
            output: paths.igblast_output.clone(),
        })?;

        let report = match &table_step {
            TableStep::InsertGaps(references) => {
                let mut table = RecordTable::read_tsv(&paths.igblast_output)?;
                let gaps = insert_gaps(&mut table, references)?;
                if gaps.missing_reference > 0 {
                    warn!(
                        "[reannotate] {} row(s) in {} have a V call without a germline reference",
                        gaps.missing_reference,
                        paths.igblast_output.display()
                    );
                }
                table.write_tsv(&paths.table)?;
                let annotated = map_cellranger(&paths.table, opts.extended)?;
                ReannotateReport {
                    rows: table.len(),
                    gaps: Some(gaps),
                    annotated: Some(annotated),
                    paths,
                }
            }
            TableStep::MakeDb(builder) => {
                let request = MakeDbRequest {
                    igblast_output: paths.igblast_output.clone(),
                    fasta: fasta.clone(),
                    references: reference.dir.clone(),
                    annotations: annotations_for_table(&paths.table),
                    extended: opts.extended,
                    out_dir: parent_dir(&fasta),
                    out_name: format!("{}_igblast", fasta_stem(&fasta)),
                };
                builder.make_db(&request)?;
                let rows = RecordTable::read_tsv(request.output())?.len();
                ReannotateReport {
                    rows,
                    gaps: None,
                    annotated: None,
                    paths,
                }
            }
        };

        archive(&report.paths)?;
        info!(
            "[reannotate] {} rows written to {}",
            report.rows,
            report.paths.table.display()
        );
        reports.push(report);
    }
    Ok(reports)
}

/// Move the raw igblast output into `tmp/`.
fn archive(paths: &IgblastPaths) -> Result<()> {
    if let Some(dir) = paths.archived_output.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::rename(&paths.igblast_output, &paths.archived_output)?;
    debug!(
        "[reannotate] moved {} to {}",
        paths.igblast_output.display(),
        paths.archived_output.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::command_line;
    use pretty_assertions::assert_eq;

    fn request(format: FileFormat) -> AssignRequest {
        AssignRequest {
            fasta: PathBuf::from("s1/filtered_contig.fasta"),
            igdata: PathBuf::from("/igdata"),
            organism: "human".into(),
            loci: Loci::Ig,
            format,
            output: PathBuf::from("s1/filtered_contig_igblast.tsv"),
        }
    }

    #[test]
    fn test_igdata_from_environment() {
        let env: HashMap<String, String> =
            [(IGDATA_VAR.to_string(), "/share/igblast".to_string())].into();
        let db = IgblastDatabase::resolve(None, &env).unwrap();
        assert_eq!(db.dir, PathBuf::from("/share/igblast"));

        let empty: HashMap<String, String> = HashMap::new();
        let err = IgblastDatabase::resolve(None, &empty).unwrap_err();
        assert!(err.to_string().contains("IGDATA"));
    }

    #[test]
    fn test_assign_genes_command() {
        let tool = AssignGenes {
            executable: PathBuf::from("AssignGenes.py"),
        };
        assert_eq!(
            command_line(&tool.command(&request(FileFormat::Airr))),
            "AssignGenes.py igblast -s s1/filtered_contig.fasta -b /igdata --organism human \
             --loci ig --format airr -o s1/filtered_contig_igblast.tsv"
        );
        assert!(command_line(&tool.command(&request(FileFormat::Changeo)))
            .contains("--format blast"));
    }

    #[test]
    fn test_makedb_command() {
        let tool = MakeDb {
            executable: PathBuf::from("MakeDb.py"),
        };
        let request = MakeDbRequest {
            igblast_output: PathBuf::from("s1/all_contig_igblast.fmt7"),
            fasta: PathBuf::from("s1/all_contig.fasta"),
            references: PathBuf::from("/g/imgt/human/vdj"),
            annotations: PathBuf::from("s1/all_contig_annotations.csv"),
            extended: true,
            out_dir: PathBuf::from("s1"),
            out_name: "all_contig_igblast".into(),
        };
        assert_eq!(
            command_line(&tool.command(&request)),
            "MakeDb.py igblast -i s1/all_contig_igblast.fmt7 -s s1/all_contig.fasta \
             -r /g/imgt/human/vdj --10x s1/all_contig_annotations.csv --extended \
             --outdir s1 --outname all_contig_igblast"
        );
        assert_eq!(
            request.output(),
            PathBuf::from("s1/all_contig_igblast_db-pass.tsv")
        );
    }

    #[test]
    fn test_loci_parse() {
        assert_eq!("TR".parse::<Loci>().unwrap(), Loci::Tr);
        assert!("bcr".parse::<Loci>().is_err());
    }

    #[test]
    fn test_paths_per_format() {
        let airr = IgblastPaths::derive(Path::new("/s/filtered_contig.fasta"), FileFormat::Airr);
        assert_eq!(airr.igblast_output, PathBuf::from("/s/filtered_contig_igblast.tsv"));
        assert_eq!(
            airr.archived_output,
            PathBuf::from("/s/tmp/filtered_contig_igblast.tsv")
        );
        assert_eq!(airr.table, PathBuf::from("/s/filtered_contig_igblast_gap.tsv"));

        let changeo = IgblastPaths::derive(Path::new("/s/all_contig.fasta"), FileFormat::Changeo);
        assert_eq!(changeo.igblast_output, PathBuf::from("/s/all_contig_igblast.fmt7"));
        assert_eq!(changeo.table, PathBuf::from("/s/all_contig_igblast_db-pass.tsv"));
    }

    #[test]
    fn test_gaps_copied_from_reference() {
        let full = gap_v_region("CAGGTGCAGCTG", 1, 12, "CAGGTG...CAGCTG");
        assert_eq!(full.sequence, "CAGGTG...CAGCTG");
        assert_eq!((full.germline_start, full.germline_end), (1, 15));

        // A 5' truncated alignment is padded up to its germline start
        let partial = gap_v_region("GTGCAGCTG", 4, 9, "CAGGTG...CAGCTG");
        assert_eq!(partial.sequence, "...GTG...CAGCTG");
        assert_eq!(partial.germline_end, 15);

        // Gaps past the aligned region are not copied
        let short = gap_v_region("CAGGT", 1, 5, "CAGGTG...CAGCTG");
        assert_eq!(short.sequence, "CAGGT");
        assert_eq!(short.germline_end, 5);
    }

    #[test]
    fn test_insert_gaps_skips_unknown_and_unaligned() {
        let mut table = RecordTable::new([
            "sequence_id",
            V_CALL,
            SEQUENCE_ALIGNMENT,
            V_GERMLINE_START,
            V_GERMLINE_END,
        ]);
        table.push_row([
            ("sequence_id", "c1"),
            (V_CALL, "IGHV1-2*02,IGHV1-3*01"),
            (SEQUENCE_ALIGNMENT, "CAGGTGCAGCTG"),
            (V_GERMLINE_START, "1"),
            (V_GERMLINE_END, "12"),
        ]);
        table.push_row([
            ("sequence_id", "c2"),
            (V_CALL, "IGHV9-9*01"),
            (SEQUENCE_ALIGNMENT, "ACGT"),
            (V_GERMLINE_START, "1"),
            (V_GERMLINE_END, "4"),
        ]);
        table.push_row([("sequence_id", "c3"), (V_CALL, "")]);

        let references: GappedReferences =
            [("IGHV1-2*02".to_string(), "CAGGTG...CAGCTG".to_string())].into();
        let report = insert_gaps(&mut table, &references).unwrap();
        assert_eq!(
            report,
            GapReport {
                gapped: 1,
                missing_reference: 1,
                unaligned: 1,
            }
        );
        assert_eq!(
            table.column_values(SEQUENCE_ALIGNMENT).unwrap(),
            vec!["CAGGTG...CAGCTG", "ACGT", ""]
        );
        assert_eq!(
            table.column_values(V_GERMLINE_END).unwrap(),
            vec!["15", "4", ""]
        );
    }

    #[test]
    fn test_reference_names_from_imgt_headers() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("imgt_human_IGHV.fasta"),
            ">M99641|IGHV1-18*01|Homo sapiens|F|V-REGION|\ncaggtt...cagctg\n>IGHV1-2*02\nCAGGTG\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a reference\n").unwrap();

        let references = read_gapped_references(dir.path()).unwrap();
        assert_eq!(references.len(), 2);
        assert_eq!(references["IGHV1-18*01"], "CAGGTT...CAGCTG");
        assert!(references.contains_key("IGHV1-2*02"));
    }

    #[test]
    fn test_empty_reference_folder() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = read_gapped_references(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }
}
