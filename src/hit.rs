//! Best-hit model for one query: identity, orientation and gene-call rules.

use std::fmt;

use crate::error::{Error, Result};

/// Tag prepended to a query id whose hit lies on the reverse strand.
pub const REVERSED_TAG: &str = "reversed|";

/// Segment markers that identify a constant-region accession suffix.
const C_SEGMENT_MARKERS: [&str; 2] = ["C-REGION", "CH1"];

/// Field values pulled out of one report chunk, before any derivation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawHit {
    pub query_id: String,
    pub query_length: u32,
    pub accession: String,
    pub identity: u32,
    pub alignment_length: u32,
    pub gaps: u32,
    pub query_start: u32,
    pub query_end: u32,
    pub subject_start: u32,
    pub subject_end: u32,
    pub evalue: f64,
    /// Bit score text as reported.
    pub bit_score: String,
    pub aligned_query_sequence: String,
}

/// One resolved best hit, as persisted in the summary file.
#[derive(Debug, Clone, PartialEq)]
pub struct HitSummary {
    /// Query identifier without the orientation tag.
    pub query_id: String,
    pub reversed: bool,
    pub subject_id: String,
    /// Percent identity, rounded to two decimals.
    pub percent_identity: f64,
    pub alignment_length: u32,
    pub mismatches: u32,
    pub gaps: u32,
    pub query_start: u32,
    pub query_end: u32,
    pub subject_start: u32,
    pub subject_end: u32,
    /// E-value rendered as `%.0e`.
    pub evalue: String,
    pub bit_score: String,
    pub aligned_query_sequence: String,
}

impl HitSummary {
    /// Derive the persisted hit from raw chunk fields.
    pub fn from_raw(raw: RawHit) -> Result<Self> {
        if raw.alignment_length == 0 {
            return Err(Error::format(
                format!("hit for '{}'", raw.query_id),
                Some("alignment length is zero"),
            ));
        }
        if raw.identity > raw.alignment_length {
            return Err(Error::format(
                format!("hit for '{}'", raw.query_id),
                Some(format!(
                    "identity {} exceeds alignment length {}",
                    raw.identity, raw.alignment_length
                )),
            ));
        }

        let percent_identity = percent_identity(raw.identity, raw.alignment_length);
        let mismatches = raw.alignment_length - raw.identity;

        let reversed = raw.subject_start > raw.subject_end;
        let (query_start, query_end, subject_start, subject_end) = if reversed {
            let (qs, qe) = reflect_interval(raw.query_start, raw.query_end, raw.query_length);
            (qs, qe, raw.subject_end, raw.subject_start)
        } else {
            (
                raw.query_start,
                raw.query_end,
                raw.subject_start,
                raw.subject_end,
            )
        };

        Ok(HitSummary {
            query_id: raw.query_id,
            reversed,
            subject_id: normalize_segment_call(&raw.accession),
            percent_identity,
            alignment_length: raw.alignment_length,
            mismatches,
            gaps: raw.gaps,
            query_start,
            query_end,
            subject_start,
            subject_end,
            evalue: format_evalue(raw.evalue),
            bit_score: raw.bit_score,
            aligned_query_sequence: raw.aligned_query_sequence,
        })
    }

    /// Identifier as written to the summary, tagged when reversed.
    pub fn display_id(&self) -> String {
        tagged_id(&self.query_id, self.reversed)
    }

    /// Percent identity formatted with two decimals.
    pub fn identity_string(&self) -> String {
        format!("{:.2}", self.percent_identity)
    }
}

impl fmt::Display for HitSummary {
    /// The tab-separated `C` detail row of the summary file.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "C\t{}\t{}\t{}\t{}\t{}\tNA\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.display_id(),
            self.subject_id,
            self.identity_string(),
            self.alignment_length,
            self.mismatches,
            self.gaps,
            self.query_start,
            self.query_end,
            self.subject_start,
            self.subject_end,
            self.evalue,
            self.bit_score,
            self.aligned_query_sequence
        )
    }
}

/// `reversed|id` when `reversed`, otherwise `id`.
pub fn tagged_id(id: &str, reversed: bool) -> String {
    if reversed {
        format!("{REVERSED_TAG}{id}")
    } else {
        id.to_string()
    }
}

/// Split an optional orientation tag off a persisted identifier.
pub fn untag_id(id: &str) -> (&str, bool) {
    match id.strip_prefix(REVERSED_TAG) {
        Some(rest) => (rest, true),
        None => (id, false),
    }
}

/// `matched / aligned * 100` as written with two decimals.
///
/// Ties on the third decimal follow the exact binary value, so 157/160
/// gives `98.12`.
pub fn format_percent_identity(matched: u32, aligned: u32) -> String {
    format!("{:.2}", matched as f64 / aligned as f64 * 100.0)
}

/// Percent identity rounded to two decimals, agreeing with
/// [`format_percent_identity`].
pub fn percent_identity(matched: u32, aligned: u32) -> f64 {
    let exact = matched as f64 / aligned as f64 * 100.0;
    format_percent_identity(matched, aligned)
        .parse()
        .unwrap_or(exact)
}

/// Reflect a 1-based query interval onto the opposite strand.
///
/// Applying it twice with the same `query_length` returns the input.
pub fn reflect_interval(start: u32, end: u32, query_length: u32) -> (u32, u32) {
    let new_start = (query_length + 1).saturating_sub(end);
    let new_end = (query_length + 1).saturating_sub(start);
    (new_start, new_end)
}

/// Render like C's `%.0e`: `3e-05`, `1e-120`, `0e+00`.
pub fn format_evalue(value: f64) -> String {
    let rust = format!("{:.0e}", value);
    match rust.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => rust,
    }
}

/// Strip a constant-region segment suffix (`IGHM*01_CH1` -> `IGHM*01`).
///
/// Accessions without a `C-REGION`/`CH1` marker are kept as-is.
pub fn normalize_segment_call(accession: &str) -> String {
    if C_SEGMENT_MARKERS.iter().any(|m| accession.contains(m)) {
        accession
            .split_once('_')
            .map(|(head, _)| head)
            .unwrap_or(accession)
            .to_string()
    } else {
        accession.to_string()
    }
}

/// Drop the allele part of a call (`IGHG1*01` -> `IGHG1`); no `*` keeps it.
pub fn strip_allele(call: &str) -> &str {
    call.split_once('*').map(|(gene, _)| gene).unwrap_or(call)
}
