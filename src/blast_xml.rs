//! Reading `blastn -outfmt 5` reports.
//!
//! The report is not parsed as a document. It is split into one chunk per
//! query at each `<Iteration>` line, and each chunk is scanned line by line
//! for a fixed set of tags (see [`ChunkField`]). This keeps the parser
//! tolerant of the preamble and of reports truncated by blastn, while any
//! line that does match a known tag but has an unexpected shape is a
//! [`Error::Format`](crate::error::Error::Format).

use std::io::BufRead;
use std::path::Path;

use crate::error::{Error, Result};
use crate::fasta::open_input;
use crate::hit::{HitSummary, RawHit};

/// Line that opens each per-query chunk.
pub const ITERATION_START: &str = "<Iteration>";

/// Line that closes each per-query chunk.
pub const ITERATION_END: &str = "</Iteration>";

/// Footer line dropped from every chunk.
pub const TOTAL_QUERIES: &str = "Total queries";

/// Message blastn writes for a query without hits.
pub const NO_HITS_MESSAGE: &str = "<Iteration_message>No hits found";

/// Fields collected from a chunk, each bound to one report tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkField {
    QueryDef,
    QueryLength,
    Accession,
    BitScore,
    Evalue,
    QueryFrom,
    QueryTo,
    HitFrom,
    HitTo,
    AlignLength,
    Gaps,
    Identity,
    QuerySequence,
}

impl ChunkField {
    pub const ALL: [ChunkField; 13] = [
        ChunkField::QueryDef,
        ChunkField::QueryLength,
        ChunkField::Accession,
        ChunkField::BitScore,
        ChunkField::Evalue,
        ChunkField::QueryFrom,
        ChunkField::QueryTo,
        ChunkField::HitFrom,
        ChunkField::HitTo,
        ChunkField::AlignLength,
        ChunkField::Gaps,
        ChunkField::Identity,
        ChunkField::QuerySequence,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            ChunkField::QueryDef => "Iteration_query-def",
            ChunkField::QueryLength => "Iteration_query-len",
            ChunkField::Accession => "Hit_accession",
            ChunkField::BitScore => "Hsp_bit-score",
            ChunkField::Evalue => "Hsp_evalue",
            ChunkField::QueryFrom => "Hsp_query-from",
            ChunkField::QueryTo => "Hsp_query-to",
            ChunkField::HitFrom => "Hsp_hit-from",
            ChunkField::HitTo => "Hsp_hit-to",
            ChunkField::AlignLength => "Hsp_align-len",
            ChunkField::Gaps => "Hsp_gaps",
            ChunkField::Identity => "Hsp_identity",
            ChunkField::QuerySequence => "Hsp_qseq",
        }
    }

    /// Field whose opening tag starts `line`, if any.
    pub fn match_line(line: &str) -> Option<ChunkField> {
        let rest = line.strip_prefix('<')?;
        ChunkField::ALL.iter().copied().find(|field| {
            rest.strip_prefix(field.tag())
                .is_some_and(|after| after.starts_with('>'))
        })
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// Result of scanning one chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    NoHit { query_id: String },
    Hit(HitSummary),
}

impl ChunkOutcome {
    pub fn query_id(&self) -> &str {
        match self {
            ChunkOutcome::NoHit { query_id } => query_id,
            ChunkOutcome::Hit(hit) => &hit.query_id,
        }
    }
}

/// Text between the opening and closing tag of a one-line element.
pub fn extract_tag_text(line: &str) -> Result<&str> {
    let (_, after_open) = line
        .split_once('>')
        .ok_or_else(|| Error::format(line.to_string(), Some("no '>' after opening tag")))?;
    let (content, _) = after_open
        .split_once('<')
        .ok_or_else(|| Error::format(line.to_string(), Some("no closing tag")))?;
    Ok(content)
}

/// Split report lines into per-query chunks.
///
/// Without any `<Iteration>` line the whole input is one chunk.
pub fn split_lines<I, S>(lines: I) -> Vec<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut chunks = Vec::new();
    let mut current: Vec<String> = Vec::new();

    for line in lines {
        let line = line.as_ref().trim_end();
        let trimmed = line.trim_start();

        if trimmed.starts_with(ITERATION_START) && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if !trimmed.starts_with(TOTAL_QUERIES) {
            current.push(line.to_string());
        }
    }

    chunks.push(current);
    chunks
}

/// Split a report file into per-query chunks.
pub fn split_report<P: AsRef<Path>>(path: P) -> Result<Vec<Vec<String>>> {
    let reader = open_input(path)?;
    let lines = reader.lines().collect::<std::io::Result<Vec<String>>>()?;
    Ok(split_lines(lines))
}

/// Working values of the scan, last write wins.
#[derive(Debug, Default)]
struct ChunkFields {
    values: [Option<String>; ChunkField::ALL.len()],
}

impl ChunkFields {
    fn set(&mut self, field: ChunkField, value: &str) {
        self.values[field.index()] = Some(value.to_string());
    }

    fn get(&self, field: ChunkField) -> Option<&str> {
        self.values[field.index()].as_deref()
    }

    fn text(&self, field: ChunkField) -> Result<String> {
        self.get(field).map(str::to_string).ok_or_else(|| {
            Error::format(
                format!("report chunk for '{}'", self.get(ChunkField::QueryDef).unwrap_or("?")),
                Some(format!("missing <{}>", field.tag())),
            )
        })
    }

    fn number<T: std::str::FromStr>(&self, field: ChunkField) -> Result<T> {
        let text = self.text(field)?;
        text.trim().parse::<T>().map_err(|_| {
            Error::format(
                format!("<{}>", field.tag()),
                Some(format!("'{text}' is not a number")),
            )
        })
    }

    fn into_raw_hit(self) -> Result<RawHit> {
        Ok(RawHit {
            query_id: self.text(ChunkField::QueryDef)?,
            query_length: self.number(ChunkField::QueryLength)?,
            accession: self.text(ChunkField::Accession)?,
            identity: self.number(ChunkField::Identity)?,
            alignment_length: self.number(ChunkField::AlignLength)?,
            gaps: self.number(ChunkField::Gaps)?,
            query_start: self.number(ChunkField::QueryFrom)?,
            query_end: self.number(ChunkField::QueryTo)?,
            subject_start: self.number(ChunkField::HitFrom)?,
            subject_end: self.number(ChunkField::HitTo)?,
            evalue: self.number(ChunkField::Evalue)?,
            bit_score: self.text(ChunkField::BitScore)?,
            aligned_query_sequence: self.text(ChunkField::QuerySequence)?,
        })
    }
}

/// Scan one chunk. `Ok(None)` when the chunk reaches neither a no-hit
/// message nor an `</Iteration>` (the report preamble).
pub fn parse_chunk<S: AsRef<str>>(chunk: &[S]) -> Result<Option<ChunkOutcome>> {
    let mut fields = ChunkFields::default();

    for line in chunk {
        let line = line.as_ref().trim();

        if let Some(field) = ChunkField::match_line(line) {
            fields.set(field, extract_tag_text(line)?);
        } else if line.starts_with(NO_HITS_MESSAGE) {
            let query_id = fields.text(ChunkField::QueryDef)?;
            return Ok(Some(ChunkOutcome::NoHit { query_id }));
        } else if line.starts_with(ITERATION_END) {
            let hit = HitSummary::from_raw(fields.into_raw_hit()?)?;
            return Ok(Some(ChunkOutcome::Hit(hit)));
        }
    }

    Ok(None)
}

/// Split and scan a whole report, in report order.
pub fn parse_report<P: AsRef<Path>>(path: P) -> Result<Vec<ChunkOutcome>> {
    let mut outcomes = Vec::new();
    for chunk in split_report(path)? {
        if let Some(outcome) = parse_chunk(&chunk)? {
            outcomes.push(outcome);
        }
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HIT_CHUNK: &str = "<Iteration>
  <Iteration_iter-num>1</Iteration_iter-num>
  <Iteration_query-ID>Query_1</Iteration_query-ID>
  <Iteration_query-def>AAACCTGAGAAGGCCT-1_contig_1</Iteration_query-def>
  <Iteration_query-len>100</Iteration_query-len>
  <Iteration_hits>
    <Hit>
      <Hit_num>1</Hit_num>
      <Hit_accession>IGHM*01_CH1</Hit_accession>
      <Hit_hsps>
        <Hsp>
          <Hsp_bit-score>75.8</Hsp_bit-score>
          <Hsp_evalue>3.2e-15</Hsp_evalue>
          <Hsp_query-from>10</Hsp_query-from>
          <Hsp_query-to>50</Hsp_query-to>
          <Hsp_hit-from>80</Hsp_hit-from>
          <Hsp_hit-to>40</Hsp_hit-to>
          <Hsp_identity>41</Hsp_identity>
          <Hsp_gaps>0</Hsp_gaps>
          <Hsp_align-len>41</Hsp_align-len>
          <Hsp_qseq>GGAGTGCATCCGCCCCAACCCTTTTCCCCCTCGTCTCCTGT</Hsp_qseq>
        </Hsp>
      </Hit_hsps>
    </Hit>
  </Iteration_hits>
</Iteration>";

    const NO_HIT_CHUNK: &str = "<Iteration>
  <Iteration_iter-num>2</Iteration_iter-num>
  <Iteration_query-def>AAACCTGAGAAGGCCT-1_contig_2</Iteration_query-def>
  <Iteration_query-len>300</Iteration_query-len>
  <Iteration_message>No hits found</Iteration_message>
</Iteration>";

    fn lines(text: &str) -> Vec<&str> {
        text.lines().collect()
    }

    #[test]
    fn test_extract_tag_text() {
        assert_eq!(
            extract_tag_text("<Hsp_evalue>1e-10</Hsp_evalue>").unwrap(),
            "1e-10"
        );
        assert_eq!(
            extract_tag_text("<Iteration_query-def>a b c</Iteration_query-def>").unwrap(),
            "a b c"
        );
    }

    #[test]
    fn test_extract_tag_text_malformed() {
        assert!(extract_tag_text("Hsp_evalue 1e-10").unwrap_err().is_format());
        assert!(extract_tag_text("<Hsp_evalue>1e-10").unwrap_err().is_format());
    }

    #[test]
    fn test_match_line_requires_whole_tag() {
        assert_eq!(
            ChunkField::match_line("<Hsp_identity>41</Hsp_identity>"),
            Some(ChunkField::Identity)
        );
        assert_eq!(ChunkField::match_line("<Hsp_identity_x>41</Hsp_identity_x>"), None);
        assert_eq!(ChunkField::match_line("<Iteration_query-ID>Q</Iteration_query-ID>"), None);
    }

    #[test]
    fn test_split_lines_by_iteration() {
        let text = format!(
            "<BlastOutput>\n<BlastOutput_iterations>\n{HIT_CHUNK}\n{NO_HIT_CHUNK}\nTotal queries = 2\n</BlastOutput_iterations>"
        );
        let chunks = split_lines(text.lines());
        assert_eq!(chunks.len(), 3);
        assert!(chunks[1][0].starts_with(ITERATION_START));
        assert!(chunks[2][0].starts_with(ITERATION_START));
        assert!(chunks
            .iter()
            .flatten()
            .all(|l| !l.starts_with(TOTAL_QUERIES)));
    }

    #[test]
    fn test_split_without_marker_is_one_chunk() {
        let chunks = split_lines(["<BlastOutput>", "</BlastOutput>"]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 2);
    }

    #[test]
    fn test_parse_reversed_hit_chunk() {
        let outcome = parse_chunk(&lines(HIT_CHUNK)).unwrap().unwrap();
        let hit = match outcome {
            ChunkOutcome::Hit(hit) => hit,
            other => panic!("expected hit, got {other:?}"),
        };
        assert!(hit.reversed);
        assert_eq!(hit.display_id(), "reversed|AAACCTGAGAAGGCCT-1_contig_1");
        assert_eq!((hit.query_start, hit.query_end), (51, 91));
        assert_eq!((hit.subject_start, hit.subject_end), (40, 80));
        assert_eq!(hit.subject_id, "IGHM*01");
        assert_eq!(hit.evalue, "3e-15");
        assert_eq!(hit.identity_string(), "100.00");
    }

    #[test]
    fn test_parse_no_hit_chunk() {
        let outcome = parse_chunk(&lines(NO_HIT_CHUNK)).unwrap().unwrap();
        assert_eq!(
            outcome,
            ChunkOutcome::NoHit {
                query_id: "AAACCTGAGAAGGCCT-1_contig_2".into()
            }
        );
    }

    #[test]
    fn test_preamble_chunk_has_no_outcome() {
        let preamble = ["<BlastOutput>", "  <BlastOutput_program>blastn</BlastOutput_program>"];
        assert_eq!(parse_chunk(&preamble).unwrap(), None);
    }

    #[test]
    fn test_missing_field_is_format_error() {
        let truncated: Vec<&str> = lines(HIT_CHUNK)
            .into_iter()
            .filter(|l| !l.contains("Hsp_align-len"))
            .collect();
        assert!(parse_chunk(&truncated).unwrap_err().is_format());
    }

    #[test]
    fn test_bad_number_is_format_error() {
        let text = HIT_CHUNK.replace("<Hsp_gaps>0</Hsp_gaps>", "<Hsp_gaps>zero</Hsp_gaps>");
        assert!(parse_chunk(&lines(&text)).unwrap_err().is_format());
    }

    #[test]
    fn test_last_write_wins_for_repeated_hsp() {
        let text = HIT_CHUNK.replace(
            "<Hsp_bit-score>75.8</Hsp_bit-score>",
            "<Hsp_bit-score>10.0</Hsp_bit-score>\n<Hsp_bit-score>75.8</Hsp_bit-score>",
        );
        match parse_chunk(&lines(&text)).unwrap() {
            Some(ChunkOutcome::Hit(hit)) => assert_eq!(hit.bit_score, "75.8"),
            other => panic!("expected hit, got {other:?}"),
        }
    }
}
