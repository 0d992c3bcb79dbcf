// Library exports for vdjprep
pub mod blast_xml;
pub mod blastn;
pub mod cellranger;
pub mod config;
pub mod error;
pub mod fasta;
pub mod format_fasta;
pub mod genotype;
pub mod hit;
pub mod isotype;
pub mod reannotate;
pub mod resolve;
pub mod summary;
pub mod table;
pub mod tools;

pub use error::{Error, Result};
