//! FASTA reading and writing.

use noodles::bgzf;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::error::{Error, Result};

/// One FASTA record: header (without `>`) and concatenated residues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceRecord {
    pub header: String,
    pub sequence: String,
}

/// Open a file and auto-detect bgzip compression, returning a boxed BufRead
pub fn open_input<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead>> {
    let path = path.as_ref();
    let file = File::open(path)?;

    let is_compressed = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext == "gz" || ext == "bgz")
        .unwrap_or(false);

    if is_compressed {
        Ok(Box::new(BufReader::new(bgzf::io::reader::Reader::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Lazy FASTA iterator over any buffered reader.
pub struct FastaReader<R: BufRead> {
    reader: R,
    pending_header: Option<String>,
    started: bool,
    line: String,
}

impl FastaReader<Box<dyn BufRead>> {
    /// Open `path` from the start. Each call yields a fresh iterator.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(FastaReader::new(open_input(path)?))
    }
}

impl<R: BufRead> FastaReader<R> {
    pub fn new(reader: R) -> Self {
        FastaReader {
            reader,
            pending_header: None,
            started: false,
            line: String::new(),
        }
    }

    /// Read the next line into `self.line`; false at end of stream.
    fn advance(&mut self) -> Result<bool> {
        self.line.clear();
        Ok(self.reader.read_line(&mut self.line)? > 0)
    }

    fn current(&self) -> &str {
        self.line.trim_end_matches(['\n', '\r'])
    }

    fn read_record(&mut self) -> Result<Option<SequenceRecord>> {
        if !self.started {
            self.started = true;
            loop {
                if !self.advance()? {
                    return Ok(None);
                }
                let line = self.current();
                if line.trim().is_empty() {
                    continue;
                }
                match line.strip_prefix('>') {
                    Some(header) => {
                        self.pending_header = Some(header.to_string());
                        break;
                    }
                    None => {
                        return Err(Error::format(
                            "FASTA input",
                            Some(format!("expected '>' at start of stream, found '{line}'")),
                        ))
                    }
                }
            }
        }

        let header = match self.pending_header.take() {
            Some(h) => h,
            None => return Ok(None),
        };

        let mut sequence = String::new();
        while self.advance()? {
            let line = self.current();
            if let Some(next_header) = line.strip_prefix('>') {
                self.pending_header = Some(next_header.to_string());
                break;
            }
            sequence.push_str(line.trim());
        }

        Ok(Some(SequenceRecord { header, sequence }))
    }
}

impl<R: BufRead> Iterator for FastaReader<R> {
    type Item = Result<SequenceRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

/// Read every record of a FASTA file into memory.
pub fn read_fasta<P: AsRef<Path>>(path: P) -> Result<Vec<SequenceRecord>> {
    FastaReader::from_path(path)?.collect()
}

/// Headers of a FASTA file, in file order.
pub fn read_headers<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    FastaReader::from_path(path)?
        .map(|r| r.map(|rec| rec.header))
        .collect()
}

/// Write records as `>header\nsequence\n`.
pub fn write_fasta<W: Write>(writer: &mut W, records: &[SequenceRecord]) -> Result<()> {
    for record in records {
        writeln!(writer, ">{}", record.header)?;
        writeln!(writer, "{}", record.sequence)?;
    }
    Ok(())
}
