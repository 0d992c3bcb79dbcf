use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;

use vdjprep::blastn::{BlastDatabase, Blastn};
use vdjprep::cellranger::map_cellranger;
use vdjprep::config::{FileFormat, ProcessEnv, DEFAULT_DATA_DIR};
use vdjprep::format_fasta::format_fastas;
use vdjprep::genotype::{
    reassign_alleles, CreateGermlines, GermlineFields, GermlineReference, GermlineTool,
    ReassignOptions, TiggerGenotype,
};
use vdjprep::isotype::{assign_isotype, IsotypeOptions};
use vdjprep::reannotate::{
    reannotate_genes, AssignGenes, DatabaseBuilder, IgblastDatabase, Loci, MakeDb,
    ReannotateOptions, ReannotateTools,
};

/// Parse a `KEY=VALUE` pair
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))
}

/// vdjprep - Preprocessing of single-cell BCR/TCR contigs
///
/// Reannotates contigs with igblast, assigns constant region calls with
/// blastn, transfers 10x annotations and reassigns V alleles against a
/// personalized genotype
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Commands,

    /// Number of threads for parallel processing
    #[clap(short = 't', long = "threads", default_value = "8", global = true)]
    threads: usize,

    /// Quiet mode (warnings and errors only)
    #[clap(long = "quiet", global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode (debug output)
    #[clap(short = 'v', long = "verbose", global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Prefix contig headers and annotation ids with a sample name
    FormatFasta {
        /// Contig FASTA files
        #[clap(value_name = "FASTA", required = true)]
        fastas: Vec<PathBuf>,

        /// Prefix for each FASTA, in the same order (repeat per file)
        #[clap(short = 'p', long = "prefix")]
        prefixes: Vec<String>,

        /// Output folder (default: <fasta dir>/vdjprep/data)
        #[clap(short = 'o', long = "outdir")]
        outdir: Option<PathBuf>,
    },

    /// Reannotate contig FASTA files with igblast
    ReannotateGenes {
        /// Sample folders or contig FASTA files
        #[clap(value_name = "INPUT", required = true)]
        inputs: Vec<String>,

        /// igblast database folder (default: $IGDATA)
        #[clap(long = "igblast-db")]
        igblast_db: Option<PathBuf>,

        /// Germline folder (default: $GERMLINE/imgt/<org>/vdj)
        #[clap(long = "germline")]
        germline: Option<PathBuf>,

        /// Organism of the germline database
        #[clap(long = "org", default_value = "human")]
        organism: String,

        /// Receptor loci: ig or tr
        #[clap(long = "loci", default_value = "ig")]
        loci: Loci,

        /// Rearrangement table format: airr or changeo
        #[clap(short = 'f', long = "format", default_value = "airr")]
        format: FileFormat,

        /// Data folder inside each sample
        #[clap(long = "dirs", default_value = DEFAULT_DATA_DIR)]
        dirs: PathBuf,

        /// Use filtered_contig.fasta instead of all_contig.fasta
        #[clap(long = "filtered")]
        filtered: bool,

        /// Also transfer 10x V/D/J calls and junctions
        #[clap(long = "extended")]
        extended: bool,
    },

    /// Assign constant region calls to contigs with blastn
    AssignIsotype {
        /// Contig FASTA files
        #[clap(value_name = "FASTA", required = true)]
        fastas: Vec<PathBuf>,

        /// Rearrangement table format: airr or changeo
        #[clap(short = 'f', long = "format", default_value = "airr")]
        format: FileFormat,

        /// Organism of the constant region database
        #[clap(long = "org", default_value = "human")]
        organism: String,

        /// BLAST database (default: $BLASTDB/<org>/<org>_BCR_C.fasta)
        #[clap(long = "blastdb")]
        blastdb: Option<PathBuf>,

        /// Keep allele calls (IGHG1*01 instead of IGHG1)
        #[clap(long = "allele")]
        allele: bool,

        /// Resolve contigs one at a time
        #[clap(long = "no-parallel")]
        no_parallel: bool,

        /// Folder for the report, summary and table
        #[clap(long = "dirs")]
        dirs: Option<PathBuf>,
    },

    /// Transfer 10x annotations onto rearrangement tables
    MapCellranger {
        /// Rearrangement tables (*_igblast_gap.tsv)
        #[clap(value_name = "TSV", required = true)]
        tables: Vec<PathBuf>,

        /// Also transfer 10x V/D/J calls and junctions
        #[clap(long = "extended")]
        extended: bool,
    },

    /// Reassign heavy chain V alleles from a personalized genotype
    ReassignAlleles {
        /// Sample folders or rearrangement tables
        #[clap(value_name = "INPUT", required = true)]
        inputs: Vec<String>,

        /// Folder for the concatenated and genotyped tables
        #[clap(short = 'o', long = "out-folder")]
        out_folder: PathBuf,

        /// Data folder inside each sample and the output folder
        #[clap(long = "dirs", default_value = DEFAULT_DATA_DIR)]
        dirs: PathBuf,

        /// Germline folder (default: $GERMLINE/imgt/<org>/vdj)
        #[clap(long = "germline")]
        germline: Option<PathBuf>,

        /// Organism of the germline database
        #[clap(long = "org", default_value = "human")]
        organism: String,

        /// Rearrangement table format: airr or changeo
        #[clap(short = 'f', long = "format", default_value = "airr")]
        format: FileFormat,

        /// Use filtered_contig tables instead of all_contig
        #[clap(long = "filtered")]
        filtered: bool,

        /// Sample id for an input, as INPUT=SAMPLE_ID (repeatable)
        #[clap(long = "sample", value_parser = parse_key_val)]
        samples: Vec<(String, String)>,

        /// File name for the concatenated table (must end with .tsv)
        #[clap(long = "out-filename")]
        out_filename: Option<String>,

        /// Skip rebuilding germlines with CreateGermlines.py after genotyping
        #[clap(long = "no-germlines")]
        no_germlines: bool,

        /// Germline types passed to CreateGermlines.py
        #[clap(long = "germ-types", default_value = "dmask")]
        germ_types: String,

        /// Column with the aligned sequence
        #[clap(long = "seq-field", default_value = "sequence_alignment")]
        seq_field: String,

        /// Column with the V call used for germlines
        #[clap(long = "v-field", default_value = "v_call_genotyped")]
        v_field: String,

        /// Column with the D call
        #[clap(long = "d-field", default_value = "d_call")]
        d_field: String,

        /// Column with the J call
        #[clap(long = "j-field", default_value = "j_call")]
        j_field: String,
    },
}

fn init_logging(args: &Args) {
    let level = if args.quiet {
        "warn"
    } else if args.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    // Set up rayon thread pool
    rayon::ThreadPoolBuilder::new()
        .num_threads(args.threads)
        .build_global()?;

    match args.command {
        Commands::FormatFasta {
            fastas,
            prefixes,
            outdir,
        } => {
            let prefixes = (!prefixes.is_empty()).then_some(prefixes);
            let written = format_fastas(&fastas, prefixes.as_deref(), outdir.as_deref())
                .context("Failed to format FASTA files")?;
            info!("[format] {} file(s) formatted", written.len());
        }

        Commands::ReannotateGenes {
            inputs,
            igblast_db,
            germline,
            organism,
            loci,
            format,
            dirs,
            filtered,
            extended,
        } => {
            let igdata = IgblastDatabase::resolve(igblast_db.as_deref(), &ProcessEnv)
                .context("Cannot locate the igblast database")?;
            let reference = GermlineReference::resolve(germline.as_deref(), &organism, &ProcessEnv)
                .context("Cannot locate the germline reference")?;
            let opts = ReannotateOptions {
                data_dir: dirs,
                organism,
                loci,
                file_format: format,
                filtered,
                extended,
            };
            let assigner = AssignGenes::new(&ProcessEnv)?;
            let makedb = match format {
                FileFormat::Changeo => Some(MakeDb::new(&ProcessEnv)?),
                FileFormat::Airr => None,
            };
            let tools = ReannotateTools {
                assigner: &assigner,
                database_builder: makedb.as_ref().map(|m| m as &dyn DatabaseBuilder),
            };
            let reports = reannotate_genes(&inputs, &opts, &igdata, &reference, &tools)
                .context("Failed to reannotate genes")?;
            for report in &reports {
                if let Some(gaps) = report.gaps {
                    info!(
                        "[reannotate] {}: {} gapped, {} without reference, {} unaligned",
                        report.paths.table.display(),
                        gaps.gapped,
                        gaps.missing_reference,
                        gaps.unaligned
                    );
                }
            }
        }

        Commands::AssignIsotype {
            fastas,
            format,
            organism,
            blastdb,
            allele,
            no_parallel,
            dirs,
        } => {
            let opts = IsotypeOptions {
                file_format: format,
                organism,
                blastdb,
                allele,
                parallel: !no_parallel,
                dirs,
            };
            let database = BlastDatabase::resolve(opts.blastdb.as_deref(), &opts.organism, &ProcessEnv)
                .context("Cannot locate the constant region database")?;
            let blastn = Blastn::new(database, &ProcessEnv)?;
            for fasta in &fastas {
                assign_isotype(fasta, &opts, &blastn)
                    .with_context(|| format!("Failed to assign isotypes for {}", fasta.display()))?;
            }
        }

        Commands::MapCellranger { tables, extended } => {
            for table in &tables {
                map_cellranger(table, extended)
                    .with_context(|| format!("Failed to map annotations onto {}", table.display()))?;
            }
        }

        Commands::ReassignAlleles {
            inputs,
            out_folder,
            dirs,
            germline,
            organism,
            format,
            filtered,
            samples,
            out_filename,
            no_germlines,
            germ_types,
            seq_field,
            v_field,
            d_field,
            j_field,
        } => {
            let reference = GermlineReference::resolve(germline.as_deref(), &organism, &ProcessEnv)
                .context("Cannot locate the germline reference")?;
            let opts = ReassignOptions {
                out_folder,
                data_dir: dirs,
                organism,
                file_format: format,
                filtered,
                sample_names: samples.into_iter().collect(),
                out_filename,
                germline_fields: GermlineFields {
                    seq_field,
                    v_field,
                    d_field,
                    j_field,
                    germ_types,
                },
            };
            let tigger = TiggerGenotype::new(&ProcessEnv)?;
            let germlines = if no_germlines {
                None
            } else {
                Some(CreateGermlines::new(&ProcessEnv)?)
            };
            let report = reassign_alleles(
                &inputs,
                &opts,
                &reference,
                &tigger,
                germlines.as_ref().map(|g| g as &dyn GermlineTool),
            )
            .context("Failed to reassign alleles")?;
            for summary in &report.summaries {
                info!(
                    "[genotype] {}: ambiguous {:.1}% -> {:.1}%, not in genotype {:.1}% -> {:.1}%",
                    summary.sample_id,
                    summary.ambiguous.0,
                    summary.ambiguous.1,
                    summary.not_in_genotype.0,
                    summary.not_in_genotype.1
                );
            }
        }
    }

    Ok(())
}
