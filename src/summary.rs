//! Human-readable hit summary and the in-memory index built from it.
//!
//! Layout of the summary file:
//!
//! ```text
//! ------------------
//! ##<fasta>##
//! ------------------
//!
//! #BCR#
//!
//! ##<query>##
//! No C segment found
//!
//! ##reversed|<query>##
//! C segment:	IGHM*01
//!
//! Segment	query_id	subject_id	...
//! C	reversed|<query>	IGHM*01	100.00	41	0	NA	0	51	91	40	80	3e-15	75.8	GGAG...
//! ```

use log::warn;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;

use crate::blast_xml::ChunkOutcome;
use crate::error::{Error, Result};
use crate::fasta::open_input;
use crate::hit::{untag_id, HitSummary};

pub const NO_C_SEGMENT: &str = "No C segment found";

const DETAIL_HEADER: &str = "Segment\tquery_id\tsubject_id\t% identity\talignment length\t\
mismatches\tgap opens\tgaps\tq start\tq end\ts start\ts end\tevalue\tbit score";

const DETAIL_FIELDS: usize = 15;

/// Write outcomes in the summary block format.
pub fn write_summary<W: Write>(
    writer: &mut W,
    source_label: &str,
    outcomes: &[ChunkOutcome],
) -> Result<()> {
    write!(
        writer,
        "------------------\n##{source_label}##\n------------------\n\n#BCR#\n\n"
    )?;
    for outcome in outcomes {
        match outcome {
            ChunkOutcome::NoHit { query_id } => {
                write!(writer, "##{query_id}##\n{NO_C_SEGMENT}\n\n")?;
            }
            ChunkOutcome::Hit(hit) => {
                write!(
                    writer,
                    "##{}##\nC segment:\t{}\n\n{DETAIL_HEADER}\n{hit}\n\n",
                    hit.display_id(),
                    hit.subject_id
                )?;
            }
        }
    }
    Ok(())
}

/// Write the summary file, creating its directory if needed.
pub fn write_summary_file<P: AsRef<Path>>(
    path: P,
    source_label: &str,
    outcomes: &[ChunkOutcome],
) -> Result<()> {
    let path = path.as_ref();
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    write_summary(&mut writer, source_label, outcomes)?;
    writer.flush()?;
    Ok(())
}

/// Parse one tab-separated `C` detail row.
pub fn parse_detail_row(line: &str) -> Result<HitSummary> {
    let fields: Vec<&str> = line.trim_end_matches(['\n', '\r']).split('\t').collect();
    if fields.len() < DETAIL_FIELDS || fields[0] != "C" {
        return Err(Error::format(
            "summary detail row",
            Some(format!(
                "expected {DETAIL_FIELDS} tab-separated fields starting with 'C', got {}",
                fields.len()
            )),
        ));
    }

    fn num<T: std::str::FromStr>(fields: &[&str], i: usize) -> Result<T> {
        fields[i].parse::<T>().map_err(|_| {
            Error::format(
                "summary detail row",
                Some(format!("field {} ('{}') is not a number", i + 1, fields[i])),
            )
        })
    }

    let (query_id, reversed) = untag_id(fields[1]);
    Ok(HitSummary {
        query_id: query_id.to_string(),
        reversed,
        subject_id: fields[2].to_string(),
        percent_identity: num(&fields, 3)?,
        alignment_length: num(&fields, 4)?,
        mismatches: num(&fields, 5)?,
        gaps: num(&fields, 7)?,
        query_start: num(&fields, 8)?,
        query_end: num(&fields, 9)?,
        subject_start: num(&fields, 10)?,
        subject_end: num(&fields, 11)?,
        evalue: fields[12].to_string(),
        bit_score: fields[13].to_string(),
        aligned_query_sequence: fields[14].to_string(),
    })
}

/// Identifier -> best hit (`None` for an explicit no-hit entry).
///
/// Keys never carry the orientation tag, so a contig resolves whether its hit
/// was reversed or not.
#[derive(Debug, Default, Clone)]
pub struct SummaryIndex {
    entries: HashMap<String, Option<HitSummary>>,
}

impl SummaryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, query_id: String, hit: Option<HitSummary>) {
        if self.entries.insert(query_id.clone(), hit).is_some() {
            warn!("[isotype] duplicate summary entry for '{query_id}', keeping the last one");
        }
    }

    pub fn from_outcomes<I: IntoIterator<Item = ChunkOutcome>>(outcomes: I) -> Self {
        let mut index = SummaryIndex::new();
        for outcome in outcomes {
            match outcome {
                ChunkOutcome::NoHit { query_id } => index.insert(query_id, None),
                ChunkOutcome::Hit(hit) => index.insert(hit.query_id.clone(), Some(hit)),
            }
        }
        index
    }

    /// Load a persisted summary. No-hit blocks become `None` entries.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = open_input(path)?;
        let mut index = SummaryIndex::new();
        let mut pending_block: Option<String> = None;
        let mut in_preamble = true;

        for line in reader.lines() {
            let line = line?;
            if let Some(name) = line.strip_prefix("##").and_then(|l| l.strip_suffix("##")) {
                // The first ##...## names the source FASTA.
                if in_preamble {
                    in_preamble = false;
                    continue;
                }
                pending_block = Some(name.to_string());
            } else if line == NO_C_SEGMENT {
                if let Some(name) = pending_block.take() {
                    let (query_id, _) = untag_id(&name);
                    index.insert(query_id.to_string(), None);
                }
            } else if line.starts_with("C\t") {
                let hit = parse_detail_row(&line)?;
                pending_block = None;
                index.insert(hit.query_id.clone(), Some(hit));
            }
        }

        Ok(index)
    }

    /// `None` when the identifier is absent, `Some(None)` for an explicit no-hit.
    pub fn get(&self, query_id: &str) -> Option<Option<&HitSummary>> {
        self.entries.get(query_id).map(|hit| hit.as_ref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> impl Iterator<Item = &HitSummary> {
        self.entries.values().flatten()
    }

    pub fn no_hit_count(&self) -> usize {
        self.entries.values().filter(|h| h.is_none()).count()
    }
}
