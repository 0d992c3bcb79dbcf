//! Genotype-based V allele reassignment across samples.
//!
//! Steps:
//! 1. Concatenate the per-sample tables with a `sample_id` column
//! 2. Write the heavy chain subset and genotype it with the external tool
//! 3. Merge `v_call_genotyped` back by `sequence_id`; light chains keep `v_call`
//! 4. Rebuild germlines against the personalized genotype (skipped when no
//!    germline tool is given)
//! 5. Write the combined table, then one `_genotyped.tsv` per sample
//! 6. Summarize ambiguous and out-of-genotype calls before and after

use log::{debug, info, warn};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::{
    resolve_location, FileFormat, LookupSource, ResolvedLocation, DEFAULT_DATA_DIR, GERMLINE_VAR,
};
use crate::error::{Error, Result};
use crate::resolve::LookupTable;
use crate::table::{RecordTable, SEQUENCE_ID};
use crate::tools::{locate_tool, run_captured, CREATE_GERMLINES_OVERRIDE, TIGGER_OVERRIDE};

pub const LOCUS: &str = "locus";
pub const HEAVY_LOCUS: &str = "IGH";
pub const V_CALL: &str = "v_call";
pub const V_CALL_GENOTYPED: &str = "v_call_genotyped";
pub const SAMPLE_ID: &str = "sample_id";
pub const GENE: &str = "gene";

/// Two-digit allele suffix, e.g. `*01`.
const ALLELE_SUFFIX: &str = r"[*][0-9][0-9]";

/// Directory holding the IMGT germline FASTA files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GermlineReference {
    pub dir: PathBuf,
}

impl GermlineReference {
    /// Explicit directory, otherwise `$GERMLINE/imgt/<org>/vdj`.
    pub fn resolve(
        explicit: Option<&Path>,
        organism: &str,
        source: &dyn LookupSource,
    ) -> Result<Self> {
        let location = resolve_location(explicit, GERMLINE_VAR, source, "germline reference")?;
        Ok(match location {
            ResolvedLocation::Explicit(dir) => GermlineReference { dir },
            ResolvedLocation::FromLookup(root) => GermlineReference {
                dir: root.join("imgt").join(organism).join("vdj"),
            },
        })
    }

    /// Heavy chain V segment FASTA.
    pub fn heavy_v_segments(&self, organism: &str) -> PathBuf {
        self.dir.join(format!("imgt_{organism}_IGHV.fasta"))
    }
}

/// Input to one genotyping run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenotypeRequest {
    pub table: PathBuf,
    pub v_germline: PathBuf,
    pub name: String,
    pub out_dir: PathBuf,
    pub format: FileFormat,
}

impl GenotypeRequest {
    /// Files the genotyping tool leaves in `out_dir`.
    pub fn outputs(&self) -> GenotypeOutputs {
        GenotypeOutputs {
            genotyped_table: self.out_dir.join(format!("{}_genotyped.tsv", self.name)),
            genotype_fasta: self.out_dir.join(format!("{}_genotype.fasta", self.name)),
            inferred_genotype: self
                .out_dir
                .join(format!("{}_inferredGenotype.txt", self.name)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenotypeOutputs {
    /// Input table with `v_call_genotyped` added.
    pub genotyped_table: PathBuf,
    /// Personalized V germline sequences.
    pub genotype_fasta: PathBuf,
    /// Inferred genotype, one row per gene.
    pub inferred_genotype: PathBuf,
}

pub trait GenotypeTool: Sync {
    fn genotype(&self, request: &GenotypeRequest) -> Result<GenotypeOutputs>;
}

/// `tigger-genotype.R`.
#[derive(Debug, Clone)]
pub struct TiggerGenotype {
    pub executable: PathBuf,
}

impl TiggerGenotype {
    pub fn new(source: &dyn LookupSource) -> Result<Self> {
        Ok(TiggerGenotype {
            executable: locate_tool("tigger-genotype.R", TIGGER_OVERRIDE, source)?,
        })
    }

    pub fn command(&self, request: &GenotypeRequest) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.arg("-d")
            .arg(&request.table)
            .arg("-r")
            .arg(&request.v_germline)
            .args(["-n", request.name.as_str()])
            .arg("-o")
            .arg(&request.out_dir)
            .args(["-f", request.format.as_str()])
            .args(["-v", V_CALL]);
        cmd
    }
}

impl GenotypeTool for TiggerGenotype {
    fn genotype(&self, request: &GenotypeRequest) -> Result<GenotypeOutputs> {
        run_captured("tigger-genotype", self.command(request))?;
        Ok(request.outputs())
    }
}

/// Column names and germline types handed to germline reconstruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GermlineFields {
    pub seq_field: String,
    pub v_field: String,
    pub d_field: String,
    pub j_field: String,
    pub germ_types: String,
}

impl Default for GermlineFields {
    fn default() -> Self {
        GermlineFields {
            seq_field: "sequence_alignment".to_string(),
            v_field: V_CALL_GENOTYPED.to_string(),
            d_field: "d_call".to_string(),
            j_field: "j_call".to_string(),
            germ_types: "dmask".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GermlineRequest<'a> {
    pub table: &'a Path,
    pub references: Vec<PathBuf>,
    pub fields: &'a GermlineFields,
    pub format: FileFormat,
    pub output: &'a Path,
}

pub trait GermlineTool: Sync {
    /// Write `request.table` with germline columns added to `request.output`.
    fn create_germlines(&self, request: &GermlineRequest<'_>) -> Result<()>;
}

/// `CreateGermlines.py`.
#[derive(Debug, Clone)]
pub struct CreateGermlines {
    pub executable: PathBuf,
}

impl CreateGermlines {
    pub fn new(source: &dyn LookupSource) -> Result<Self> {
        Ok(CreateGermlines {
            executable: locate_tool("CreateGermlines.py", CREATE_GERMLINES_OVERRIDE, source)?,
        })
    }

    pub fn command(&self, request: &GermlineRequest<'_>) -> Command {
        let fields = request.fields;
        let mut cmd = Command::new(&self.executable);
        cmd.arg("-d").arg(request.table).arg("-r");
        cmd.args(&request.references);
        cmd.args(["-g", fields.germ_types.as_str()])
            .args(["--vf", fields.v_field.as_str()])
            .args(["--df", fields.d_field.as_str()])
            .args(["--jf", fields.j_field.as_str()])
            .args(["--sf", fields.seq_field.as_str()])
            .args(["--format", request.format.as_str()])
            .arg("-o")
            .arg(request.output);
        cmd
    }
}

impl GermlineTool for CreateGermlines {
    fn create_germlines(&self, request: &GermlineRequest<'_>) -> Result<()> {
        run_captured("CreateGermlines", self.command(request))?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ReassignOptions {
    /// Folder receiving the combined and heavy chain tables.
    pub out_folder: PathBuf,
    /// Layout of sample folders, relative to each sample and to `out_folder`.
    pub data_dir: PathBuf,
    pub organism: String,
    pub file_format: FileFormat,
    /// Use `filtered_contig` tables instead of `all_contig`.
    pub filtered: bool,
    /// Input -> sample_id; inputs without an entry use the input itself.
    pub sample_names: HashMap<String, String>,
    /// Name for the combined table; must end with `.tsv`.
    pub out_filename: Option<String>,
    pub germline_fields: GermlineFields,
}

impl ReassignOptions {
    pub fn new<P: Into<PathBuf>>(out_folder: P) -> Self {
        ReassignOptions {
            out_folder: out_folder.into(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            organism: "human".to_string(),
            file_format: FileFormat::Airr,
            filtered: false,
            sample_names: HashMap::new(),
            out_filename: None,
            germline_fields: GermlineFields::default(),
        }
    }

    fn contig_base(&self) -> &'static str {
        if self.filtered {
            "filtered_contig"
        } else {
            "all_contig"
        }
    }

    fn out_dir(&self) -> PathBuf {
        self.out_folder.join(&self.data_dir)
    }

    /// Table for an input that names a sample folder.
    fn sample_table(&self, sample_dir: &Path) -> PathBuf {
        sample_dir.join(&self.data_dir).join(format!(
            "{}{}.tsv",
            self.contig_base(),
            self.file_format.suffix()
        ))
    }

    fn heavy_path(&self) -> PathBuf {
        match &self.out_filename {
            Some(name) => self.out_dir().join(format!("heavy_{name}")),
            None => self.out_dir().join(format!(
                "{}_heavy{}.tsv",
                self.contig_base(),
                self.file_format.suffix()
            )),
        }
    }

    fn combined_path(&self) -> PathBuf {
        match &self.out_filename {
            Some(name) => self.out_dir().join(tsv_with_suffix(name, "_genotyped")),
            None => self.out_dir().join(format!(
                "{}{}_genotyped.tsv",
                self.contig_base(),
                self.file_format.suffix()
            )),
        }
    }
}

/// `name.tsv` -> `name<suffix>.tsv`.
pub fn tsv_with_suffix(name: &str, suffix: &str) -> String {
    let stem = name.strip_suffix(".tsv").unwrap_or(name);
    format!("{stem}{suffix}.tsv")
}

fn path_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(tsv_with_suffix(&name, suffix))
}

/// One input resolved to its table, sample id and per-sample output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassignInput {
    pub label: String,
    pub table: PathBuf,
    pub sample_id: String,
    pub output: PathBuf,
}

/// A file is used as-is; anything else names a sample folder.
pub fn resolve_inputs(inputs: &[String], opts: &ReassignOptions) -> Vec<ReassignInput> {
    inputs
        .iter()
        .map(|label| {
            let path = Path::new(label);
            let table = if path.is_file() {
                path.to_path_buf()
            } else {
                opts.sample_table(path)
            };
            ReassignInput {
                label: label.clone(),
                output: path_with_suffix(&table, "_genotyped"),
                sample_id: opts
                    .sample_names
                    .get(label)
                    .cloned()
                    .unwrap_or_else(|| label.clone()),
                table,
            }
        })
        .collect()
}

/// Light chain rows take their `v_call` as the genotyped call. Returns the
/// number of rows restored.
pub fn restore_light_chain_calls(table: &mut RecordTable) -> Result<usize> {
    table.require_column(LOCUS)?;
    table.require_column(V_CALL)?;
    let mut restored = 0;
    table.set_column_with(V_CALL_GENOTYPED, |row| {
        if row.get(LOCUS) == Some(HEAVY_LOCUS) {
            row.get(V_CALL_GENOTYPED).unwrap_or_default().to_string()
        } else {
            restored += 1;
            row.get(V_CALL).unwrap_or_default().to_string()
        }
    });
    Ok(restored)
}

/// Before/after percentages for one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct ReassignmentSummary {
    pub sample_id: String,
    /// % of calls listing more than one gene.
    pub ambiguous: (f64, f64),
    /// % of calls naming a gene absent from the inferred genotype.
    pub not_in_genotype: (f64, f64),
}

/// Genes of an inferred genotype table.
pub fn read_genotype_genes<P: AsRef<Path>>(path: P) -> Result<HashSet<String>> {
    let table = RecordTable::read_tsv(path)?;
    Ok(table
        .column_values(GENE)?
        .into_iter()
        .map(|g| g.to_string())
        .collect())
}

fn percent<T, F: Fn(&T) -> bool>(values: &[T], pred: F) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    100.0 * values.iter().filter(|v| pred(v)).count() as f64 / values.len() as f64
}

/// Compare `v_call` with `v_call_genotyped` per sample, alleles removed.
pub fn summarize_reassignment(
    heavy: &RecordTable,
    genotype_genes: &HashSet<String>,
) -> Result<Vec<ReassignmentSummary>> {
    let allele = Regex::new(ALLELE_SUFFIX)?;
    let samples = heavy.column_values(SAMPLE_ID)?;
    heavy.require_column(V_CALL)?;
    heavy.require_column(V_CALL_GENOTYPED)?;

    let mut order: Vec<&str> = Vec::new();
    for sample in samples {
        if !order.contains(&sample) {
            order.push(sample);
        }
    }

    let mut summaries = Vec::new();
    for sample in order {
        let rows: Vec<_> = heavy
            .rows()
            .filter(|row| row.get(SAMPLE_ID) == Some(sample))
            .collect();
        let strip = |column: &str| -> Vec<String> {
            rows.iter()
                .map(|row| {
                    allele
                        .replace_all(row.get(column).unwrap_or_default(), "")
                        .into_owned()
                })
                .collect()
        };
        let before = strip(V_CALL);
        let after = strip(V_CALL_GENOTYPED);

        let outside: HashSet<&str> = before
            .iter()
            .flat_map(|v| v.split(','))
            .filter(|gene| !genotype_genes.contains(*gene))
            .collect();
        let has_many = |v: &String| v.contains(',');
        let is_outside = |v: &String| outside.contains(v.as_str());

        summaries.push(ReassignmentSummary {
            sample_id: sample.to_string(),
            ambiguous: (percent(&before, has_many), percent(&after, has_many)),
            not_in_genotype: (percent(&before, is_outside), percent(&after, is_outside)),
        });
    }
    Ok(summaries)
}

/// Long table with columns `sample_id, vgroup, var, var_group`.
pub fn summary_table(summaries: &[ReassignmentSummary]) -> RecordTable {
    let mut table = RecordTable::new([SAMPLE_ID, "vgroup", "var", "var_group"]);
    let groups: [(&str, fn(&ReassignmentSummary) -> (f64, f64)); 2] = [
        ("ambiguous", |s| s.ambiguous),
        ("not_in_genotype", |s| s.not_in_genotype),
    ];
    for (vgroup, values) in groups {
        for (var_group, pick_after) in [("before", false), ("after", true)] {
            for summary in summaries {
                let (before, after) = values(summary);
                let var = if pick_after { after } else { before };
                table.push_row([
                    (SAMPLE_ID, summary.sample_id.clone()),
                    ("vgroup", vgroup.to_string()),
                    ("var", format!("{var:.2}")),
                    ("var_group", var_group.to_string()),
                ]);
            }
        }
    }
    table
}

/// What a reassignment run wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct ReassignReport {
    pub heavy: PathBuf,
    pub combined: PathBuf,
    pub per_sample: Vec<PathBuf>,
    pub summary: PathBuf,
    pub summaries: Vec<ReassignmentSummary>,
}

/// Run the whole reassignment for `inputs` (sample folders or tables).
pub fn reassign_alleles(
    inputs: &[String],
    opts: &ReassignOptions,
    reference: &GermlineReference,
    genotyper: &dyn GenotypeTool,
    germlines: Option<&dyn GermlineTool>,
) -> Result<ReassignReport> {
    if inputs.is_empty() {
        return Err(Error::configuration(
            "reassignment inputs",
            Some("at least one sample folder or table is required"),
        ));
    }
    if let Some(name) = &opts.out_filename {
        if !name.ends_with(".tsv") {
            return Err(Error::configuration(
                format!("output file name '{name}'"),
                Some("the name must end with .tsv"),
            ));
        }
    }

    let resolved = resolve_inputs(inputs, opts);
    let mut tables = Vec::with_capacity(resolved.len());
    for input in &resolved {
        debug!("[genotype] reading {}", input.table.display());
        let mut table = RecordTable::read_tsv(&input.table)?;
        let sample_id = input.sample_id.clone();
        table.set_column_with(SAMPLE_ID, |_| sample_id.clone());
        tables.push(table);
    }
    let mut combined = RecordTable::concat(&tables);
    info!(
        "[genotype] {} rows from {} input(s)",
        combined.len(),
        resolved.len()
    );

    let out_dir = opts.out_dir();
    std::fs::create_dir_all(&out_dir)?;

    combined.require_column(LOCUS)?;
    let heavy = combined.filter_rows(|row| row.get(LOCUS) == Some(HEAVY_LOCUS));
    let heavy_path = opts.heavy_path();
    heavy.write_tsv(&heavy_path)?;
    info!(
        "[genotype] {} heavy chain rows written to {}",
        heavy.len(),
        heavy_path.display()
    );

    let name = heavy_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let request = GenotypeRequest {
        table: heavy_path.clone(),
        v_germline: reference.heavy_v_segments(&opts.organism),
        name: name.strip_suffix(".tsv").unwrap_or(&name).to_string(),
        out_dir: out_dir.clone(),
        format: opts.file_format,
    };
    let outputs = genotyper.genotype(&request)?;

    let genotyped_heavy = RecordTable::read_tsv(&outputs.genotyped_table)?;
    let ids = genotyped_heavy.column_values(SEQUENCE_ID)?;
    let calls = genotyped_heavy.column_values(V_CALL_GENOTYPED)?;
    let lookup: LookupTable = ids
        .into_iter()
        .zip(calls)
        .map(|(id, call)| (id.to_string(), Some(call.to_string())))
        .collect();
    let merged = combined.transfer_column(V_CALL_GENOTYPED, &lookup)?;
    if merged < heavy.len() {
        warn!(
            "[genotype] {} heavy chain rows received no genotyped call",
            heavy.len() - merged
        );
    }
    let restored = restore_light_chain_calls(&mut combined)?;
    debug!("[genotype] restored v_call on {restored} light chain rows");

    let combined_path = opts.combined_path();
    match germlines {
        Some(tool) => {
            let staging = tempfile::Builder::new()
                .prefix("genotyped_")
                .suffix(".tsv")
                .tempfile_in(&out_dir)?;
            combined.write_tsv(staging.path())?;
            tool.create_germlines(&GermlineRequest {
                table: staging.path(),
                references: vec![reference.dir.clone(), outputs.genotype_fasta.clone()],
                fields: &opts.germline_fields,
                format: opts.file_format,
                output: &combined_path,
            })?;
            combined = RecordTable::read_tsv(&combined_path)?;
        }
        None => combined.write_tsv(&combined_path)?,
    }
    info!(
        "[genotype] combined genotyped table written to {}",
        combined_path.display()
    );

    let mut per_sample = Vec::with_capacity(resolved.len());
    for input in &resolved {
        let sample = combined.filter_rows(|row| row.get(SAMPLE_ID) == Some(input.sample_id.as_str()));
        sample.write_tsv(&input.output)?;
        debug!(
            "[genotype] {} rows for {} written to {}",
            sample.len(),
            input.sample_id,
            input.output.display()
        );
        per_sample.push(input.output.clone());
    }

    let genes = read_genotype_genes(&outputs.inferred_genotype)?;
    let summaries = summarize_reassignment(&genotyped_heavy, &genes)?;
    let summary = path_with_suffix(&heavy_path, "_reassign_summary");
    summary_table(&summaries).write_tsv(&summary)?;
    info!("[genotype] reassignment summary written to {}", summary.display());

    Ok(ReassignReport {
        heavy: heavy_path,
        combined: combined_path,
        per_sample,
        summary,
        summaries,
    })
}
