/// Allele reassignment with stand-in genotyping and germline tools
use anyhow::Result;
use pretty_assertions::assert_eq;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

use vdjprep::genotype::{
    reassign_alleles, GenotypeOutputs, GenotypeRequest, GenotypeTool, GermlineReference,
    GermlineRequest, GermlineTool, ReassignOptions, V_CALL, V_CALL_GENOTYPED,
};
use vdjprep::table::RecordTable;

/// Keeps the first listed allele of each heavy chain call.
struct FirstAlleleGenotyper {
    seen: Mutex<Vec<GenotypeRequest>>,
}

impl GenotypeTool for FirstAlleleGenotyper {
    fn genotype(&self, request: &GenotypeRequest) -> vdjprep::Result<GenotypeOutputs> {
        self.seen.lock().unwrap().push(request.clone());
        let outputs = request.outputs();

        let mut table = RecordTable::read_tsv(&request.table)?;
        table.set_column_with(V_CALL_GENOTYPED, |row| {
            let call = row.get(V_CALL).unwrap_or_default();
            call.split(',').next().unwrap_or_default().to_string()
        });
        table.write_tsv(&outputs.genotyped_table)?;
        fs::write(&outputs.genotype_fasta, ">IGHV1-2*02\nCAGGTG\n")?;
        fs::write(
            &outputs.inferred_genotype,
            "gene\talleles\tcounts\nIGHV1-2\t02\t1\nIGHV3-9\t01\t1\n",
        )?;
        Ok(outputs)
    }
}

/// Adds a masked germline column and records the references it was given.
struct MaskingGermlines {
    references: Mutex<Vec<PathBuf>>,
}

impl GermlineTool for MaskingGermlines {
    fn create_germlines(&self, request: &GermlineRequest<'_>) -> vdjprep::Result<()> {
        *self.references.lock().unwrap() = request.references.clone();
        let mut table = RecordTable::read_tsv(request.table)?;
        table.set_column_with("germline_alignment_d_mask", |_| "CAGNNN".to_string());
        table.write_tsv(request.output)?;
        Ok(())
    }
}

fn write_sample(root: &Path, name: &str, rows: &[(&str, &str, &str)]) -> PathBuf {
    let dir = root.join(name).join("vdjprep/data");
    fs::create_dir_all(&dir).unwrap();
    let mut content = String::from("sequence_id\tlocus\tv_call\td_call\tj_call\n");
    for (id, locus, v_call) in rows {
        content.push_str(&format!("{id}\t{locus}\t{v_call}\t\t{locus}J1*01\n"));
    }
    fs::write(dir.join("all_contig_igblast_gap.tsv"), content).unwrap();
    root.join(name)
}

fn setup(root: &Path) -> Vec<String> {
    let s1 = write_sample(
        root,
        "s1",
        &[
            ("s1_AAAC-1_contig_1", "IGH", "IGHV1-2*02,IGHV1-3*01"),
            ("s1_AAAC-1_contig_2", "IGK", "IGKV1-5*01"),
        ],
    );
    let s2 = write_sample(root, "s2", &[("s2_GGGT-1_contig_1", "IGH", "IGHV3-9*01")]);
    vec![s1.display().to_string(), s2.display().to_string()]
}

fn reference() -> GermlineReference {
    GermlineReference {
        dir: PathBuf::from("/germline/imgt/human/vdj"),
    }
}

#[test]
fn test_reassignment_writes_combined_and_per_sample() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let inputs = setup(temp_dir.path());
    let opts = ReassignOptions::new(temp_dir.path().join("donor"));
    let genotyper = FirstAlleleGenotyper {
        seen: Mutex::new(Vec::new()),
    };

    let report = reassign_alleles(&inputs, &opts, &reference(), &genotyper, None)?;

    let seen = genotyper.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].name, "all_contig_heavy_igblast_gap");
    assert_eq!(
        seen[0].v_germline,
        PathBuf::from("/germline/imgt/human/vdj/imgt_human_IGHV.fasta")
    );
    assert_eq!(
        report.heavy,
        temp_dir
            .path()
            .join("donor/vdjprep/data/all_contig_heavy_igblast_gap.tsv")
    );
    assert_eq!(RecordTable::read_tsv(&report.heavy)?.len(), 2);

    let combined = RecordTable::read_tsv(&report.combined)?;
    assert_eq!(combined.len(), 3);
    assert_eq!(
        combined.column_values(V_CALL_GENOTYPED)?,
        vec!["IGHV1-2*02", "IGKV1-5*01", "IGHV3-9*01"]
    );
    assert_eq!(
        combined.column_values("sample_id")?,
        vec![
            inputs[0].as_str(),
            inputs[0].as_str(),
            inputs[1].as_str()
        ]
    );

    assert_eq!(report.per_sample.len(), 2);
    assert_eq!(
        report.per_sample[0],
        Path::new(&inputs[0]).join("vdjprep/data/all_contig_igblast_gap_genotyped.tsv")
    );
    let s1 = RecordTable::read_tsv(&report.per_sample[0])?;
    assert_eq!(s1.len(), 2);
    let s2 = RecordTable::read_tsv(&report.per_sample[1])?;
    assert_eq!(s2.column_values(V_CALL_GENOTYPED)?, vec!["IGHV3-9*01"]);

    Ok(())
}

#[test]
fn test_summary_before_and_after() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let inputs = setup(temp_dir.path());
    let mut opts = ReassignOptions::new(temp_dir.path().join("donor"));
    opts.sample_names
        .insert(inputs[0].clone(), "donor1_s1".to_string());
    opts.sample_names
        .insert(inputs[1].clone(), "donor1_s2".to_string());
    let genotyper = FirstAlleleGenotyper {
        seen: Mutex::new(Vec::new()),
    };

    let report = reassign_alleles(&inputs, &opts, &reference(), &genotyper, None)?;

    assert_eq!(report.summaries.len(), 2);
    let s1 = &report.summaries[0];
    assert_eq!(s1.sample_id, "donor1_s1");
    assert_eq!(s1.ambiguous, (100.0, 0.0));
    assert_eq!(s1.not_in_genotype, (0.0, 0.0));
    assert_eq!(report.summaries[1].ambiguous, (0.0, 0.0));

    let summary = RecordTable::read_tsv(&report.summary)?;
    assert_eq!(summary.len(), 8);
    assert_eq!(
        summary.columns().collect::<Vec<_>>(),
        vec!["sample_id", "vgroup", "var", "var_group"]
    );
    Ok(())
}

#[test]
fn test_germline_reconstruction_uses_personal_genotype() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let inputs = setup(temp_dir.path());
    let mut opts = ReassignOptions::new(temp_dir.path().join("donor"));
    opts.out_filename = Some("donor1.tsv".to_string());
    let genotyper = FirstAlleleGenotyper {
        seen: Mutex::new(Vec::new()),
    };
    let germlines = MaskingGermlines {
        references: Mutex::new(Vec::new()),
    };

    let report = reassign_alleles(&inputs, &opts, &reference(), &genotyper, Some(&germlines))?;

    let data = temp_dir.path().join("donor/vdjprep/data");
    assert_eq!(report.heavy, data.join("heavy_donor1.tsv"));
    assert_eq!(report.combined, data.join("donor1_genotyped.tsv"));
    assert_eq!(
        *germlines.references.lock().unwrap(),
        vec![
            PathBuf::from("/germline/imgt/human/vdj"),
            data.join("heavy_donor1_genotype.fasta"),
        ]
    );

    let s1 = RecordTable::read_tsv(&report.per_sample[0])?;
    assert_eq!(
        s1.column_values("germline_alignment_d_mask")?,
        vec!["CAGNNN", "CAGNNN"]
    );

    // Only the outputs and the sample tables remain, no staging files
    let leftovers: Vec<_> = fs::read_dir(&data)?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("genotyped_"))
        .collect();
    assert!(leftovers.is_empty(), "staging files left: {leftovers:?}");
    Ok(())
}

#[test]
fn test_missing_locus_column() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let table = temp_dir.path().join("plain.tsv");
    fs::write(&table, "sequence_id\tv_call\nc1\tIGHV1-2*02\n")?;
    let opts = ReassignOptions::new(temp_dir.path().join("out"));
    let genotyper = FirstAlleleGenotyper {
        seen: Mutex::new(Vec::new()),
    };

    let err = reassign_alleles(
        &[table.display().to_string()],
        &opts,
        &reference(),
        &genotyper,
        None,
    )
    .unwrap_err();
    assert!(matches!(err, vdjprep::Error::MissingColumn { .. }));
    Ok(())
}
