//! Per-contig and batch resolution of constant-region calls.

use rayon::prelude::*;
use std::collections::HashMap;

use crate::hit::{strip_allele, HitSummary};
use crate::summary::SummaryIndex;

/// Constant-region call for one contig, as transferred to the record table.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantRegionCall {
    pub call: String,
    pub sequence_alignment: String,
    /// Percent identity, two decimals.
    pub identity: String,
    /// E-value.
    pub support: String,
    /// Bit score.
    pub score: String,
    pub start: u32,
    pub end: u32,
}

impl ConstantRegionCall {
    pub fn from_hit(hit: &HitSummary, allele: bool) -> Self {
        let call = if allele {
            hit.subject_id.clone()
        } else {
            strip_allele(&hit.subject_id).to_string()
        };
        ConstantRegionCall {
            call,
            sequence_alignment: hit.aligned_query_sequence.clone(),
            identity: hit.identity_string(),
            support: hit.evalue.clone(),
            score: hit.bit_score.clone(),
            start: hit.query_start,
            end: hit.query_end,
        }
    }
}

/// Identifier -> value; `None` is the explicit missing marker.
pub type LookupTable = HashMap<String, Option<String>>;

/// One lookup table per derived field.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LookupTables {
    pub call: LookupTable,
    pub sequence: LookupTable,
    pub identity: LookupTable,
    pub support: LookupTable,
    pub score: LookupTable,
    pub start: LookupTable,
    pub end: LookupTable,
}

impl LookupTables {
    pub fn insert(&mut self, contig: &str, resolved: Option<&ConstantRegionCall>) {
        let key = contig.to_string();
        match resolved {
            Some(c) => {
                self.call.insert(key.clone(), Some(c.call.clone()));
                self.sequence
                    .insert(key.clone(), Some(c.sequence_alignment.clone()));
                self.identity.insert(key.clone(), Some(c.identity.clone()));
                self.support.insert(key.clone(), Some(c.support.clone()));
                self.score.insert(key.clone(), Some(c.score.clone()));
                self.start.insert(key.clone(), Some(c.start.to_string()));
                self.end.insert(key, Some(c.end.to_string()));
            }
            None => {
                for table in self.tables_mut() {
                    table.insert(key.clone(), None);
                }
            }
        }
    }

    fn tables_mut(&mut self) -> [&mut LookupTable; 7] {
        [
            &mut self.call,
            &mut self.sequence,
            &mut self.identity,
            &mut self.support,
            &mut self.score,
            &mut self.start,
            &mut self.end,
        ]
    }

    /// Output column names paired with their table, in transfer order.
    pub fn columns(&self) -> [(&'static str, &LookupTable); 7] {
        [
            ("c_call", &self.call),
            ("c_sequence_alignment", &self.sequence),
            ("c_sequence_start", &self.start),
            ("c_sequence_end", &self.end),
            ("c_score", &self.score),
            ("c_identity", &self.identity),
            ("c_support", &self.support),
        ]
    }

    pub fn len(&self) -> usize {
        self.call.len()
    }

    pub fn is_empty(&self) -> bool {
        self.call.is_empty()
    }

    /// Contigs that resolved to a call.
    pub fn resolved_count(&self) -> usize {
        self.call.values().filter(|v| v.is_some()).count()
    }
}

/// Look one contig up. `None` both for "no hit" and for contigs absent from
/// the report.
pub fn resolve_contig(
    index: &SummaryIndex,
    contig: &str,
    allele: bool,
) -> Option<ConstantRegionCall> {
    index
        .get(contig)
        .flatten()
        .map(|hit| ConstantRegionCall::from_hit(hit, allele))
}

/// Resolve every contig, fanning out over the rayon pool when `parallel`.
///
/// `index` must be complete before this is called; workers only read it.
pub fn resolve_batch(
    index: &SummaryIndex,
    contigs: &[String],
    allele: bool,
    parallel: bool,
) -> LookupTables {
    let resolved: Vec<(&str, Option<ConstantRegionCall>)> = if parallel {
        contigs
            .par_iter()
            .map(|c| (c.as_str(), resolve_contig(index, c, allele)))
            .collect()
    } else {
        contigs
            .iter()
            .map(|c| (c.as_str(), resolve_contig(index, c, allele)))
            .collect()
    };

    let mut tables = LookupTables::default();
    for (contig, call) in &resolved {
        tables.insert(contig, call.as_ref());
    }
    tables
}
