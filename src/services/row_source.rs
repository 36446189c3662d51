//! Delimited-file row source with exact resume support
//!
//! Wraps a `csv::Reader` over the stored import file. The first line holds
//! column names. Rows whose column count differs from the header or that are
//! not valid UTF-8 are malformed; with skipping enabled they are counted and
//! dropped, otherwise they surface as errors.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::types::{ColumnRef, RowCursor};

#[derive(Debug, Error)]
pub enum RowSourceError {
    #[error("failed to read CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed row at line {line}: {reason}")]
    Malformed { line: u64, reason: String },
}

/// One valid data row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    headers: Arc<Vec<String>>,
    values: Vec<String>,
}

impl Row {
    pub fn new(headers: Arc<Vec<String>>, values: Vec<String>) -> Self {
        Self { headers, values }
    }

    pub fn get(&self, column: &ColumnRef) -> Option<&str> {
        let index = match column {
            ColumnRef::Index(i) => *i,
            ColumnRef::Name(name) => self.headers.iter().position(|h| h == name)?,
        };
        self.values.get(index).map(String::as_str)
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }
}

/// Streaming reader over the rows of an import file.
///
/// After `rewind` or `seek` the source sits on a "current" row (or is
/// exhausted).
/// `tell()` reports where the row after the current one begins, which is the
/// value to persist once the current row has been fully processed.
pub struct RowSource {
    path: PathBuf,
    delimiter: u8,
    enclosure: u8,
    reader: csv::Reader<File>,
    headers: Arc<Vec<String>>,
    current: Option<Row>,
    key: u64,
    after_current: RowCursor,
    skip_invalid: bool,
    skipped: u64,
}

fn ascii_byte(c: char) -> u8 {
    if c.is_ascii() {
        c as u8
    } else {
        b'?'
    }
}

impl RowSource {
    /// Open a file. Call `rewind` or `seek` before reading rows.
    pub fn open(path: impl AsRef<Path>, delimiter: char, enclosure: char) -> Result<Self, RowSourceError> {
        let path = path.as_ref().to_path_buf();
        let delimiter = ascii_byte(delimiter);
        let enclosure = ascii_byte(enclosure);
        let (reader, headers) = Self::open_reader(&path, delimiter, enclosure)?;
        Ok(Self {
            path,
            delimiter,
            enclosure,
            reader,
            headers,
            current: None,
            key: 0,
            after_current: RowCursor::default(),
            skip_invalid: false,
            skipped: 0,
        })
    }

    fn open_reader(
        path: &Path,
        delimiter: u8,
        enclosure: u8,
    ) -> Result<(csv::Reader<File>, Arc<Vec<String>>), RowSourceError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .quote(enclosure)
            .has_headers(true)
            .flexible(true)
            .from_path(path)?;
        let headers = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        Ok((reader, Arc::new(headers)))
    }

    /// Count every data record in the file, malformed ones included
    pub fn count_rows(path: impl AsRef<Path>, delimiter: char, enclosure: char) -> Result<u64, RowSourceError> {
        let (mut reader, _) = Self::open_reader(path.as_ref(), ascii_byte(delimiter), ascii_byte(enclosure))?;
        let mut record = csv::ByteRecord::new();
        let mut count = 0;
        while reader.read_byte_record(&mut record)? {
            count += 1;
        }
        Ok(count)
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Drop malformed rows silently (counted) instead of failing on them
    pub fn skip_invalid_rows(&mut self, skip: bool) {
        self.skip_invalid = skip;
    }

    /// Back to the first row
    pub fn rewind(&mut self) -> Result<(), RowSourceError> {
        let (reader, headers) = Self::open_reader(&self.path, self.delimiter, self.enclosure)?;
        self.reader = reader;
        self.headers = headers;
        self.key = 0;
        self.after_current = RowCursor::default();
        self.fetch()
    }

    /// Reposition to a cursor previously returned by `tell()`
    pub fn seek(&mut self, cursor: &RowCursor) -> Result<(), RowSourceError> {
        if cursor.is_start() {
            return self.rewind();
        }
        let (reader, headers) = Self::open_reader(&self.path, self.delimiter, self.enclosure)?;
        self.reader = reader;
        self.headers = headers;

        let mut position = csv::Position::new();
        position.set_byte(cursor.byte).set_line(cursor.line);
        self.reader.seek(position)?;

        self.key = cursor.row;
        self.after_current = *cursor;
        self.fetch()
    }

    pub fn current(&self) -> Option<&Row> {
        self.current.as_ref()
    }

    /// Ordinal of the current row among valid rows, starting at 1
    pub fn key(&self) -> u64 {
        self.key
    }

    /// Cursor just past the current row
    pub fn tell(&self) -> RowCursor {
        self.after_current
    }

    pub fn valid(&self) -> bool {
        self.current.is_some()
    }

    /// Move to the next valid row
    pub fn advance(&mut self) -> Result<(), RowSourceError> {
        self.fetch()
    }

    /// Malformed rows skipped since the last call
    pub fn take_skipped_count(&mut self) -> u64 {
        std::mem::take(&mut self.skipped)
    }

    fn fetch(&mut self) -> Result<(), RowSourceError> {
        let mut record = csv::ByteRecord::new();
        loop {
            if !self.reader.read_byte_record(&mut record)? {
                self.current = None;
                return Ok(());
            }
            let line = record.position().map_or(0, |p| p.line());
            match self.decode(&record) {
                Ok(values) => {
                    self.key += 1;
                    let position = self.reader.position();
                    self.after_current = RowCursor {
                        byte: position.byte(),
                        line: position.line(),
                        row: self.key,
                    };
                    self.current = Some(Row::new(Arc::clone(&self.headers), values));
                    return Ok(());
                }
                Err(reason) if self.skip_invalid => {
                    tracing::debug!("Skipping malformed row at line {}: {}", line, reason);
                    self.skipped += 1;
                    let position = self.reader.position();
                    self.after_current = RowCursor {
                        byte: position.byte(),
                        line: position.line(),
                        row: self.key,
                    };
                }
                Err(reason) => {
                    self.current = None;
                    return Err(RowSourceError::Malformed { line, reason });
                }
            }
        }
    }

    fn decode(&self, record: &csv::ByteRecord) -> Result<Vec<String>, String> {
        if record.len() != self.headers.len() {
            return Err(format!(
                "expected {} columns, found {}",
                self.headers.len(),
                record.len()
            ));
        }
        record
            .iter()
            .map(|field| {
                std::str::from_utf8(field)
                    .map(str::to_string)
                    .map_err(|e| format!("invalid UTF-8: {}", e))
            })
            .collect()
    }
}

/// Header names plus the first valid row, for authoring a mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnPreview {
    pub headers: Vec<String>,
    pub examples: Vec<String>,
}

pub fn preview(path: impl AsRef<Path>, delimiter: char, enclosure: char) -> Result<ColumnPreview, RowSourceError> {
    let mut source = RowSource::open(path, delimiter, enclosure)?;
    source.skip_invalid_rows(true);
    source.rewind()?;
    let headers = source.headers().to_vec();
    let examples = source
        .current()
        .map(|row| row.values().to_vec())
        .unwrap_or_default();
    Ok(ColumnPreview { headers, examples })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(content: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    fn open(file: &tempfile::NamedTempFile, delimiter: char, enclosure: char) -> RowSource {
        let mut source = RowSource::open(file.path(), delimiter, enclosure).unwrap();
        source.rewind().unwrap();
        source
    }

    fn titles(source: &mut RowSource) -> Vec<String> {
        let mut out = Vec::new();
        while source.valid() {
            out.push(source.current().unwrap().values()[0].clone());
            source.advance().unwrap();
        }
        out
    }

    #[test]
    fn test_reads_rows_by_name_and_index() {
        let file = write_csv(b"title,files\nMoonlight,http://x/a.mp3\n");
        let source = open(&file, ',', '"');
        let row = source.current().unwrap();

        assert_eq!(row.get(&ColumnRef::Name("title".to_string())), Some("Moonlight"));
        assert_eq!(row.get(&ColumnRef::Index(1)), Some("http://x/a.mp3"));
        assert_eq!(row.get(&ColumnRef::Name("missing".to_string())), None);
        assert_eq!(source.key(), 1);
    }

    #[test]
    fn test_honors_delimiter_and_enclosure() {
        let file = write_csv(b"a;b\n'x;y';z\n");
        let source = open(&file, ';', '\'');
        assert_eq!(source.current().unwrap().values(), &["x;y".to_string(), "z".to_string()]);
    }

    #[test]
    fn test_seek_to_told_position_resumes_at_next_row() {
        let file = write_csv(b"title\nr1\nr2\nr3\nr4\nr5\n");
        let mut source = open(&file, ',', '"');
        source.advance().unwrap();
        source.advance().unwrap();
        assert_eq!(source.current().unwrap().values()[0], "r3");
        let cursor = source.tell();
        assert_eq!(cursor.row, 3);

        let mut resumed = RowSource::open(file.path(), ',', '"').unwrap();
        resumed.seek(&cursor).unwrap();
        assert_eq!(resumed.key(), 4);
        assert_eq!(titles(&mut resumed), vec!["r4", "r5"]);
    }

    #[test]
    fn test_seek_to_start_cursor_rewinds() {
        let file = write_csv(b"title\nr1\nr2\n");
        let mut source = open(&file, ',', '"');
        source.advance().unwrap();
        source.seek(&RowCursor::default()).unwrap();
        assert_eq!(titles(&mut source), vec!["r1", "r2"]);
    }

    #[test]
    fn test_skips_and_counts_malformed_rows() {
        let file = write_csv(b"title,desc\nok1,a\nbroken\nok2,b\n\xff\xfe,c\nok3,c\n");
        let mut source = RowSource::open(file.path(), ',', '"').unwrap();
        source.skip_invalid_rows(true);
        source.rewind().unwrap();

        assert_eq!(titles(&mut source), vec!["ok1", "ok2", "ok3"]);
        assert_eq!(source.take_skipped_count(), 2);
        assert_eq!(source.take_skipped_count(), 0);
    }

    #[test]
    fn test_malformed_row_is_an_error_without_skipping() {
        let file = write_csv(b"title,desc\nok1,a\nbroken\n");
        let mut source = open(&file, ',', '"');
        let err = source.advance().unwrap_err();
        assert!(matches!(err, RowSourceError::Malformed { line: 3, .. }));
    }

    #[test]
    fn test_count_rows_includes_malformed() {
        let file = write_csv(b"title,desc\nok1,a\nbroken\nok2,b\n");
        assert_eq!(RowSource::count_rows(file.path(), ',', '"').unwrap(), 3);
    }

    #[test]
    fn test_preview_returns_headers_and_first_valid_row() {
        let file = write_csv(b"Title , Files\nbad\nSonata,a.mp3\n");
        let preview = preview(file.path(), ',', '"').unwrap();
        assert_eq!(preview.headers, vec!["Title", "Files"]);
        assert_eq!(preview.examples, vec!["Sonata", "a.mp3"]);
    }

    #[test]
    fn test_empty_file_body_is_not_valid() {
        let file = write_csv(b"title\n");
        let source = open(&file, ',', '"');
        assert!(!source.valid());
        assert_eq!(source.tell(), RowCursor::default());
    }
}
