//! CSV reading and decoding helpers shared by inference and loading.
//!
//! Every CSV byte that enters the importer flows through this module:
//!
//! - **Reader construction**: `open_csv_reader_from_path` builds a flexible
//!   reader so ragged rows can be triaged instead of aborting the stream.
//! - **Decoding**: fields are read as raw bytes and decoded with an explicit
//!   `encoding_rs` encoding; a decode failure is an error so the caller can
//!   retry with the next candidate encoding.
//! - **Chunking**: [`CsvChunks`] yields bounded row batches so arbitrarily
//!   large files never need to be held in memory.
//! - **Malformed rows**: rows with more fields than the header are dropped and
//!   counted; short rows are padded with empty cells.

use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use encoding_rs::Encoding;
use encoding_rs_io::DecodeReaderBytesBuilder;

pub const DEFAULT_CSV_DELIMITER: u8 = b',';

pub fn open_csv_reader<R>(reader: R, has_headers: bool) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(has_headers)
        .delimiter(DEFAULT_CSV_DELIMITER)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn open_csv_reader_from_path(path: &Path) -> Result<csv::Reader<Box<dyn Read>>> {
    let reader: Box<dyn Read> = Box::new(BufReader::new(
        File::open(path).with_context(|| format!("Opening input file {path:?}"))?,
    ));
    Ok(open_csv_reader(reader, true))
}

/// Opens `path` with lossy decoding: invalid sequences become U+FFFD instead
/// of failing. Used when no candidate encoding reads the file cleanly.
pub fn open_lossy_csv_reader(
    path: &Path,
    encoding: &'static Encoding,
) -> Result<csv::Reader<Box<dyn Read>>> {
    let file = File::open(path).with_context(|| format!("Opening input file {path:?}"))?;
    let decoder = DecodeReaderBytesBuilder::new()
        .encoding(Some(encoding))
        .build(BufReader::new(file));
    Ok(open_csv_reader(Box::new(decoder), true))
}

/// Decodes one field. Leading bytes are never read as a byte order mark; only
/// the header strips one.
pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

pub fn reader_headers<R>(
    reader: &mut csv::Reader<R>,
    encoding: &'static Encoding,
) -> Result<Vec<String>>
where
    R: Read,
{
    let headers = reader.byte_headers()?.clone();
    let mut decoded = decode_record(&headers, encoding)?;
    if let Some(first) = decoded.first_mut()
        && let Some(stripped) = first.strip_prefix('\u{feff}')
    {
        *first = stripped.to_string();
    }
    Ok(decoded)
}

/// Streams decoded CSV rows in batches of at most `chunk_rows` rows.
pub struct CsvChunks<R: Read> {
    reader: csv::Reader<R>,
    encoding: &'static Encoding,
    width: usize,
    chunk_rows: usize,
    record: csv::ByteRecord,
    rows_read: usize,
    malformed_rows: usize,
    finished: bool,
}

impl CsvChunks<Box<dyn Read>> {
    /// Opens `path`, decodes the header row and positions the stream at the
    /// first data row.
    pub fn open(
        path: &Path,
        encoding: &'static Encoding,
        chunk_rows: usize,
    ) -> Result<(Vec<String>, Self)> {
        let mut reader = open_csv_reader_from_path(path)?;
        let headers = reader_headers(&mut reader, encoding)
            .with_context(|| format!("Reading header row of {path:?}"))?;
        let chunks = CsvChunks::new(reader, encoding, headers.len(), chunk_rows);
        Ok((headers, chunks))
    }
}

impl<R: Read> CsvChunks<R> {
    pub fn new(
        reader: csv::Reader<R>,
        encoding: &'static Encoding,
        width: usize,
        chunk_rows: usize,
    ) -> Self {
        Self {
            reader,
            encoding,
            width,
            chunk_rows: chunk_rows.max(1),
            record: csv::ByteRecord::new(),
            rows_read: 0,
            malformed_rows: 0,
            finished: false,
        }
    }

    /// Data rows yielded so far.
    pub fn rows_read(&self) -> usize {
        self.rows_read
    }

    /// Rows dropped because they carried more fields than the header.
    pub fn malformed_rows(&self) -> usize {
        self.malformed_rows
    }

    fn next_chunk(&mut self) -> Result<Vec<Vec<String>>> {
        let mut chunk = Vec::with_capacity(self.chunk_rows.min(1024));
        while chunk.len() < self.chunk_rows {
            if !self.reader.read_byte_record(&mut self.record)? {
                self.finished = true;
                break;
            }
            if self.record.len() > self.width {
                self.malformed_rows += 1;
                continue;
            }
            let line = self.record.position().map(|pos| pos.line()).unwrap_or(0);
            let mut row = decode_record(&self.record, self.encoding)
                .with_context(|| format!("Decoding line {line}"))?;
            row.resize(self.width, String::new());
            chunk.push(row);
        }
        self.rows_read += chunk.len();
        Ok(chunk)
    }
}

impl<R: Read> Iterator for CsvChunks<R> {
    type Item = Result<Vec<Vec<String>>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_chunk() {
            Ok(chunk) if chunk.is_empty() => None,
            Ok(chunk) => Some(Ok(chunk)),
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}
