//! Column type inference for CSV files that have no predefined table.
//!
//! The file is streamed in chunks of `chunk_rows` rows. Each chunk classifies
//! every column on its own ([`TypeCandidate`]), and the per-chunk verdict is
//! folded into a running [`InferredKind`] with [`InferredKind::merge`]. Merging
//! only ever widens: once a column has seen free text it stays text, and a
//! VARCHAR only grows towards TEXT.
//!
//! Inference never fails outright. If the file cannot be decoded with any
//! candidate encoding, or reading breaks part-way, the schema degrades to the
//! header row with every column typed `VARCHAR(255)`.

use std::{fmt, io::Read, path::Path};

use anyhow::{Context, Result};
use encoding_rs::{Encoding, UTF_8};
use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    data::{is_null_sentinel, looks_like_datetime, parse_boolean},
    encoding,
    io_utils::{self, CsvChunks},
    sanitize::{sanitize_column_name, sanitize_headers},
};

/// Extra room added to the longest observed string when sizing a VARCHAR.
pub const VARCHAR_PADDING: usize = 50;
/// Strings this long or longer make the column TEXT.
pub const VARCHAR_LIMIT: usize = 255;
/// Column width used when only the header could be read.
pub const FALLBACK_VARCHAR: usize = 255;

/// What a column looks like after one or more chunks of evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferredKind {
    Integer,
    Float,
    Datetime,
    Boolean,
    /// Free text; carries the longest value length seen so far.
    Text(usize),
}

impl InferredKind {
    /// Widening merge, total over every pair. Identical kinds stay put,
    /// integers and floats meet at float, and every other disagreement is
    /// resolved as text.
    pub fn merge(self, other: InferredKind) -> InferredKind {
        use InferredKind::*;
        match (self, other) {
            (Text(left), Text(right)) => Text(left.max(right)),
            (Text(len), _) | (_, Text(len)) => Text(len),
            (left, right) if left == right => left,
            (Integer, Float) | (Float, Integer) => Float,
            _ => Text(0),
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, InferredKind::Text(_))
    }
}

/// Declared SQL type of an inferred column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SqlType {
    Int,
    Double,
    Datetime,
    Boolean,
    Varchar(usize),
    Text,
}

impl SqlType {
    /// `longest` is the longest value observed in the column regardless of
    /// kind; it sizes text columns that also saw numbers.
    pub fn from_kind(kind: Option<InferredKind>, longest: usize) -> SqlType {
        match kind {
            None => SqlType::Varchar(VARCHAR_PADDING),
            Some(InferredKind::Integer) => SqlType::Int,
            Some(InferredKind::Float) => SqlType::Double,
            Some(InferredKind::Datetime) => SqlType::Datetime,
            Some(InferredKind::Boolean) => SqlType::Boolean,
            Some(InferredKind::Text(len)) => {
                let len = len.max(longest);
                if len < VARCHAR_LIMIT {
                    SqlType::Varchar(len + VARCHAR_PADDING)
                } else {
                    SqlType::Text
                }
            }
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlType::Int => f.write_str("INT"),
            SqlType::Double => f.write_str("DOUBLE"),
            SqlType::Datetime => f.write_str("DATETIME"),
            SqlType::Boolean => f.write_str("BOOLEAN"),
            SqlType::Varchar(len) => write!(f, "VARCHAR({len})"),
            SqlType::Text => f.write_str("TEXT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub sql_type: SqlType,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InferenceReport {
    pub encoding: String,
    pub rows_scanned: usize,
    pub chunks: usize,
    pub malformed_rows: usize,
    /// Set when the header-only fallback produced the schema.
    pub degraded: bool,
}

/// Per-chunk evidence for one column.
#[derive(Debug, Clone)]
struct TypeCandidate {
    non_empty: usize,
    possible_boolean: bool,
    possible_integer: bool,
    possible_float: bool,
    possible_datetime: bool,
    max_len: usize,
}

impl TypeCandidate {
    fn new() -> Self {
        Self {
            non_empty: 0,
            possible_boolean: true,
            possible_integer: true,
            possible_float: true,
            possible_datetime: true,
            max_len: 0,
        }
    }

    fn update(&mut self, value: &str) {
        if is_null_sentinel(value) {
            return;
        }
        let trimmed = value.trim();
        self.non_empty += 1;
        self.max_len = self.max_len.max(value.chars().count());
        if self.possible_boolean && parse_boolean(trimmed).is_none() {
            self.possible_boolean = false;
        }
        if self.possible_integer && trimmed.parse::<i64>().is_err() {
            self.possible_integer = false;
        }
        if self.possible_float && trimmed.parse::<f64>().is_err() {
            self.possible_float = false;
        }
        if self.possible_datetime && !looks_like_datetime(trimmed) {
            self.possible_datetime = false;
        }
    }

    fn decide(&self) -> Option<InferredKind> {
        if self.non_empty == 0 {
            None
        } else if self.possible_boolean {
            Some(InferredKind::Boolean)
        } else if self.possible_integer {
            Some(InferredKind::Integer)
        } else if self.possible_float {
            Some(InferredKind::Float)
        } else if self.possible_datetime {
            Some(InferredKind::Datetime)
        } else {
            Some(InferredKind::Text(self.max_len))
        }
    }
}

/// Running classification for one column across chunks.
#[derive(Debug, Clone, Default)]
pub struct ColumnInference {
    kind: Option<InferredKind>,
    longest: usize,
}

impl ColumnInference {
    pub fn kind(&self) -> Option<InferredKind> {
        self.kind
    }

    /// Folds one chunk verdict into the running classification.
    pub fn absorb(&mut self, observed: Option<InferredKind>, longest_in_chunk: usize) {
        self.longest = self.longest.max(longest_in_chunk);
        if let Some(observed) = observed {
            self.kind = Some(match self.kind {
                Some(current) => current.merge(observed),
                None => observed,
            });
        }
    }

    pub fn sql_type(&self) -> SqlType {
        SqlType::from_kind(self.kind, self.longest)
    }
}

/// Infers a schema from `path`, never failing: decoding problems and read
/// errors degrade to [`header_only_schema`].
pub fn infer_schema_or_fallback(
    path: &Path,
    detected: &'static Encoding,
    chunk_rows: usize,
) -> (Vec<ColumnDescriptor>, InferenceReport) {
    let attempt = encoding::resolve_readable_encoding(path, detected).and_then(|resolved| {
        let encoding = resolved.with_context(|| {
            format!("No candidate encoding could decode {path:?}")
        })?;
        infer_table_schema(path, encoding, chunk_rows)
    });
    match attempt {
        Ok(result) => result,
        Err(err) => {
            warn!("Error inferring schema for {path:?}: {err:#}; using header-only fallback");
            let columns = header_only_schema(path);
            let report = InferenceReport {
                encoding: UTF_8.name().to_string(),
                degraded: true,
                ..InferenceReport::default()
            };
            (columns, report)
        }
    }
}

/// Streams `path` chunk by chunk and returns one descriptor per header column.
pub fn infer_table_schema(
    path: &Path,
    encoding: &'static Encoding,
    chunk_rows: usize,
) -> Result<(Vec<ColumnDescriptor>, InferenceReport)> {
    let (headers, mut chunks) = CsvChunks::open(path, encoding, chunk_rows)?;
    let names = sanitize_headers(&headers);
    let columns = infer_columns(&mut chunks, names.len())
        .with_context(|| format!("Inferring column types for {path:?}"))?;
    let report = InferenceReport {
        encoding: encoding.name().to_string(),
        rows_scanned: chunks.rows_read(),
        chunks: chunks.rows_read().div_ceil(chunk_rows.max(1)),
        malformed_rows: chunks.malformed_rows(),
        degraded: false,
    };
    info!(
        "Inferred {} column(s) from {} row(s) of {:?}",
        names.len(),
        report.rows_scanned,
        path
    );
    let descriptors = names
        .into_iter()
        .zip(columns)
        .map(|(name, column)| ColumnDescriptor::new(name, column.sql_type()))
        .collect();
    Ok((descriptors, report))
}

/// Classifies every column of a chunk stream.
pub fn infer_columns<R: Read>(
    chunks: &mut CsvChunks<R>,
    width: usize,
) -> Result<Vec<ColumnInference>> {
    let mut columns = vec![ColumnInference::default(); width];
    for (index, chunk) in chunks.enumerate() {
        let chunk = chunk?;
        let mut candidates = vec![TypeCandidate::new(); width];
        for row in &chunk {
            for (candidate, value) in candidates.iter_mut().zip(row) {
                candidate.update(value);
            }
        }
        for (column, candidate) in columns.iter_mut().zip(&candidates) {
            column.absorb(candidate.decide(), candidate.max_len);
        }
        debug!("Classified chunk {} ({} row(s))", index + 1, chunk.len());
    }
    Ok(columns)
}

/// Header-only schema: every column `VARCHAR(255)`. Returns an empty list when
/// even the header cannot be read.
pub fn header_only_schema(path: &Path) -> Vec<ColumnDescriptor> {
    let headers = io_utils::open_lossy_csv_reader(path, UTF_8).and_then(|mut reader| {
        let headers = reader.headers().context("Reading header row")?;
        Ok(headers.iter().map(str::to_string).collect::<Vec<_>>())
    });
    match headers {
        Ok(headers) => headers
            .iter()
            .map(|header| {
                ColumnDescriptor::new(
                    sanitize_column_name(Some(header.as_str())),
                    SqlType::Varchar(FALLBACK_VARCHAR),
                )
            })
            .collect(),
        Err(err) => {
            warn!("Fallback schema inference failed for {path:?}: {err:#}");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    use InferredKind::*;

    fn write_csv(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write csv");
        file
    }

    fn kind_strategy() -> impl Strategy<Value = InferredKind> {
        prop_oneof![
            Just(Integer),
            Just(Float),
            Just(Datetime),
            Just(Boolean),
            (0usize..400).prop_map(Text),
        ]
    }

    #[test]
    fn merge_widens_numbers_and_keeps_text() {
        assert_eq!(Integer.merge(Integer), Integer);
        assert_eq!(Integer.merge(Float), Float);
        assert_eq!(Float.merge(Integer), Float);
        assert_eq!(Integer.merge(Text(4)), Text(4));
        assert_eq!(Text(10).merge(Text(300)), Text(300));
        assert_eq!(Datetime.merge(Integer), Text(0));
        assert_eq!(Boolean.merge(Float), Text(0));
    }

    #[test]
    fn sql_types_follow_padding_and_limit() {
        assert_eq!(SqlType::from_kind(Some(Text(10)), 0), SqlType::Varchar(60));
        assert_eq!(SqlType::from_kind(Some(Text(254)), 0), SqlType::Varchar(304));
        assert_eq!(SqlType::from_kind(Some(Text(255)), 0), SqlType::Text);
        assert_eq!(SqlType::from_kind(Some(Text(3)), 20), SqlType::Varchar(70));
        assert_eq!(SqlType::from_kind(None, 0), SqlType::Varchar(50));
        assert_eq!(SqlType::Varchar(60).to_string(), "VARCHAR(60)");
        assert_eq!(SqlType::Double.to_string(), "DOUBLE");
    }

    #[test]
    fn infers_types_per_column() {
        let file = write_csv(
            "Screen ID,rating,opened,is combo,title\n\
             1,8.6,2024-01-05 18:30:00,true,Interstellar\n\
             2,7,2024-01-06,False,The Matrix\n\
             3,,2024-01-07 20:00,TRUE,\n",
        );
        let (columns, report) = infer_table_schema(file.path(), UTF_8, 2).expect("infer");
        let described: Vec<(String, SqlType)> = columns
            .into_iter()
            .map(|column| (column.name, column.sql_type))
            .collect();
        assert_eq!(
            described,
            vec![
                ("Screen_ID".to_string(), SqlType::Int),
                ("rating".to_string(), SqlType::Double),
                ("opened".to_string(), SqlType::Datetime),
                ("is_combo".to_string(), SqlType::Boolean),
                ("title".to_string(), SqlType::Varchar(62)),
            ]
        );
        assert_eq!(report.rows_scanned, 3);
        assert_eq!(report.chunks, 2);
        assert!(!report.degraded);
    }

    #[test]
    fn text_in_a_later_chunk_widens_permanently() {
        let file = write_csv("code\n1\n2\nA-17\n4\n5\n");
        let (columns, _) = infer_table_schema(file.path(), UTF_8, 2).expect("infer");
        assert_eq!(columns[0].sql_type, SqlType::Varchar(54));
    }

    #[test]
    fn long_text_becomes_text_type() {
        let long = "x".repeat(300);
        let file = write_csv(&format!("description\nshort\n{long}\nshort again\n"));
        let (columns, _) = infer_table_schema(file.path(), UTF_8, 1).expect("infer");
        assert_eq!(columns[0].sql_type, SqlType::Text);
    }

    #[test]
    fn undecodable_file_degrades_to_header_only_schema() {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(b"id,order\n1,\xff\xfe\n").expect("write");
        let (columns, report) =
            infer_schema_or_fallback(Path::new("/no/such/file.csv"), UTF_8, 10);
        assert!(columns.is_empty());
        assert!(report.degraded);

        let fallback = header_only_schema(file.path());
        assert_eq!(
            fallback,
            vec![
                ColumnDescriptor::new("id", SqlType::Varchar(255)),
                ColumnDescriptor::new("order_col", SqlType::Varchar(255)),
            ]
        );
    }

    proptest! {
        #[test]
        fn merge_is_commutative(left in kind_strategy(), right in kind_strategy()) {
            prop_assert_eq!(left.merge(right), right.merge(left));
        }

        #[test]
        fn text_never_reverts(
            first in 0usize..400,
            rest in proptest::collection::vec(kind_strategy(), 0..12),
        ) {
            let mut kind = Text(first);
            for next in rest {
                kind = kind.merge(next);
                prop_assert!(kind.is_text());
            }
        }

        #[test]
        fn integer_only_chunks_stay_integer(
            chunks in proptest::collection::vec(
                proptest::collection::vec(-1_000_000i64..1_000_000, 1..20),
                1..6,
            )
        ) {
            let mut column = ColumnInference::default();
            for chunk in chunks {
                let mut candidate = TypeCandidate::new();
                for value in chunk {
                    candidate.update(&value.to_string());
                }
                column.absorb(candidate.decide(), candidate.max_len);
            }
            prop_assert_eq!(column.sql_type(), SqlType::Int);
        }
    }
}
