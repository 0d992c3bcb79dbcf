//! Tab-separated record sets keyed by `sequence_id`.
//!
//! Columns keep their file order. Values transferred from a [`LookupTable`]
//! are matched on the exact identifier; rows without an entry keep an empty
//! cell, so a transfer never drops or reorders rows.

use indexmap::IndexMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::config::parent_dir;
use crate::error::{Error, Result};
use crate::fasta::open_input;
use crate::resolve::LookupTable;

pub const SEQUENCE_ID: &str = "sequence_id";
pub const CELL_ID: &str = "cell_id";

/// Cell identifier of a contig: the id up to `_contig`, then up to `-`.
pub fn cell_id_from_sequence_id(sequence_id: &str) -> &str {
    let before_contig = sequence_id
        .split_once("_contig")
        .map(|(head, _)| head)
        .unwrap_or(sequence_id);
    before_contig
        .split_once('-')
        .map(|(head, _)| head)
        .unwrap_or(before_contig)
}

/// Read-only view of one row.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a IndexMap<String, usize>,
    cells: &'a [String],
}

impl<'a> Row<'a> {
    pub fn get(&self, column: &str) -> Option<&'a str> {
        self.columns
            .get(column)
            .and_then(|&i| self.cells.get(i))
            .map(|s| s.as_str())
    }

    pub fn cells(&self) -> &'a [String] {
        self.cells
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordTable {
    source: PathBuf,
    columns: IndexMap<String, usize>,
    rows: Vec<Vec<String>>,
}

impl RecordTable {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        let mut table = RecordTable::default();
        for name in columns {
            table.ensure_column(&name.into());
        }
        table
    }

    pub fn read_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::read_delimited(path, b'\t')
    }

    pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::read_delimited(path, b',')
    }

    pub fn read_delimited<P: AsRef<Path>>(path: P, delimiter: u8) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .from_reader(open_input(path)?);

        let mut table = RecordTable::new(reader.headers()?.iter());
        table.source = path.to_path_buf();
        for record in reader.records() {
            let record = record?;
            table.rows.push(record.iter().map(|s| s.to_string()).collect());
        }
        Ok(table)
    }

    pub fn write_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.write_delimited(path, b'\t')
    }

    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.write_delimited(path, b',')
    }

    /// Write through a temporary file in the target directory, then rename
    /// over `path`.
    pub fn write_delimited<P: AsRef<Path>>(&self, path: P, delimiter: u8) -> Result<()> {
        let path = path.as_ref();
        let dir = parent_dir(path);
        std::fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        {
            let mut writer = csv::WriterBuilder::new()
                .delimiter(delimiter)
                .from_writer(tmp.as_file_mut());
            writer.write_record(self.columns.keys())?;
            for row in &self.rows {
                writer.write_record(row)?;
            }
            writer.flush()?;
        }
        tmp.as_file_mut().flush()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// File the table was read from; empty for tables built in memory.
    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(|k| k.as_str())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(move |cells| Row {
            columns: &self.columns,
            cells,
        })
    }

    pub fn row(&self, index: usize) -> Option<Row<'_>> {
        self.rows.get(index).map(|cells| Row {
            columns: &self.columns,
            cells,
        })
    }

    /// Index of `name`, or `Error::MissingColumn`.
    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.columns
            .get(name)
            .copied()
            .ok_or_else(|| Error::missing_column(&self.source, name))
    }

    /// Index of `name`, appending an empty column when absent.
    fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(&i) = self.columns.get(name) {
            return i;
        }
        let i = self.columns.len();
        self.columns.insert(name.to_string(), i);
        for row in &mut self.rows {
            row.push(String::new());
        }
        i
    }

    /// Append a row given as (column, value) pairs; unnamed columns stay empty.
    pub fn push_row<K: AsRef<str>, V: Into<String>>(
        &mut self,
        values: impl IntoIterator<Item = (K, V)>,
    ) {
        let mut cells = vec![String::new(); self.columns.len()];
        for (name, value) in values {
            let i = self.ensure_column(name.as_ref());
            if i >= cells.len() {
                cells.resize(i + 1, String::new());
            }
            cells[i] = value.into();
        }
        self.rows.push(cells);
    }

    pub fn column_values(&self, name: &str) -> Result<Vec<&str>> {
        let i = self.require_column(name)?;
        Ok(self.rows.iter().map(|row| row[i].as_str()).collect())
    }

    /// Fill `name` from `lookup` keyed by `sequence_id`. Returns the number
    /// of rows that received a value.
    pub fn transfer_column(&mut self, name: &str, lookup: &LookupTable) -> Result<usize> {
        self.transfer_column_by(SEQUENCE_ID, name, lookup)
    }

    /// Fill `name` from `lookup` keyed by the `key` column.
    pub fn transfer_column_by(
        &mut self,
        key: &str,
        name: &str,
        lookup: &LookupTable,
    ) -> Result<usize> {
        let key_idx = self.require_column(key)?;
        let target = self.ensure_column(name);
        let mut filled = 0;
        for row in &mut self.rows {
            let value = lookup.get(&row[key_idx]).cloned().flatten();
            if value.is_some() {
                filled += 1;
            }
            row[target] = value.unwrap_or_default();
        }
        Ok(filled)
    }

    /// Set every cell of `name` from a function of its row.
    pub fn set_column_with<F>(&mut self, name: &str, mut f: F)
    where
        F: FnMut(Row<'_>) -> String,
    {
        let target = self.ensure_column(name);
        let values: Vec<String> = self.rows().map(&mut f).collect();
        for (row, value) in self.rows.iter_mut().zip(values) {
            row[target] = value;
        }
    }

    /// Overwrite one cell of an existing column. Rows past the end are ignored.
    pub fn set_cell(&mut self, row: usize, name: &str, value: String) -> Result<()> {
        let i = self.require_column(name)?;
        if let Some(cells) = self.rows.get_mut(row) {
            cells[i] = value;
        }
        Ok(())
    }

    /// Derive `cell_id` from `sequence_id`.
    pub fn add_cell_id(&mut self) -> Result<()> {
        self.require_column(SEQUENCE_ID)?;
        self.set_column_with(CELL_ID, |row| {
            cell_id_from_sequence_id(row.get(SEQUENCE_ID).unwrap_or_default()).to_string()
        });
        Ok(())
    }

    /// Rows for which `keep` holds, same columns.
    pub fn filter_rows<F>(&self, mut keep: F) -> RecordTable
    where
        F: FnMut(Row<'_>) -> bool,
    {
        let rows = self
            .rows
            .iter()
            .filter(|cells| {
                keep(Row {
                    columns: &self.columns,
                    cells,
                })
            })
            .cloned()
            .collect();
        RecordTable {
            source: self.source.clone(),
            columns: self.columns.clone(),
            rows,
        }
    }

    /// Stack tables; columns are the union in first-seen order.
    pub fn concat<'a, I>(tables: I) -> RecordTable
    where
        I: IntoIterator<Item = &'a RecordTable>,
    {
        let mut out = RecordTable::default();
        for table in tables {
            for row in table.rows() {
                out.push_row(
                    table
                        .columns()
                        .zip(row.cells().iter())
                        .map(|(name, value)| (name, value.clone())),
                );
            }
            for name in table.columns() {
                out.ensure_column(name);
            }
        }
        out
    }
}
