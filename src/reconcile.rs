//! Aligns CSV headers with the columns of an existing table.
//!
//! Matching is case-insensitive. The first source column that matches a target
//! column wins; later duplicates are dropped along with columns the table does
//! not have. Target columns nothing matched are bound as NULL.

use log::{debug, info};
use serde::Serialize;

/// How one source position maps onto the target table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    /// Target column names in table order.
    target: Vec<String>,
    /// For each target column, the source position feeding it.
    sources: Vec<Option<usize>>,
    /// Source headers renamed to the target's spelling, as `(source, target)`.
    pub renamed: Vec<(String, String)>,
    /// Source headers with no target column, or duplicates of an earlier match.
    pub dropped: Vec<String>,
    /// Target columns absent from the source, filled with NULL.
    pub null_filled: Vec<String>,
}

impl Reconciliation {
    pub fn plan(source: &[String], target: &[String]) -> Self {
        let mut sources = vec![None; target.len()];
        let mut renamed = Vec::new();
        let mut dropped = Vec::new();
        for (position, header) in source.iter().enumerate() {
            let matched = target
                .iter()
                .position(|column| column.eq_ignore_ascii_case(header));
            match matched {
                Some(index) if sources[index].is_none() => {
                    sources[index] = Some(position);
                    if target[index] != *header {
                        renamed.push((header.clone(), target[index].clone()));
                    }
                }
                _ => dropped.push(header.clone()),
            }
        }
        let null_filled = target
            .iter()
            .zip(&sources)
            .filter(|(_, source)| source.is_none())
            .map(|(column, _)| column.clone())
            .collect();
        Self {
            target: target.to_vec(),
            sources,
            renamed,
            dropped,
            null_filled,
        }
    }

    /// Target column names, in the order [`Reconciliation::project`] emits values.
    pub fn columns(&self) -> &[String] {
        &self.target
    }

    pub fn is_identity(&self) -> bool {
        self.renamed.is_empty() && self.dropped.is_empty() && self.null_filled.is_empty()
    }

    /// Reorders one source row into target column order.
    pub fn project<'a>(&self, row: &'a [String]) -> Vec<Option<&'a str>> {
        self.sources
            .iter()
            .map(|source| source.and_then(|index| row.get(index)).map(String::as_str))
            .collect()
    }

    pub fn log_changes(&self, table: &str) {
        if self.is_identity() {
            debug!("Columns of '{table}' match the source exactly");
            return;
        }
        for (from, to) in &self.renamed {
            debug!("Matched source column '{from}' to '{table}.{to}'");
        }
        if !self.dropped.is_empty() {
            info!(
                "Dropping {} source column(s) not present in '{}': {}",
                self.dropped.len(),
                table,
                self.dropped.join(", ")
            );
        }
        if !self.null_filled.is_empty() {
            info!(
                "Filling {} column(s) of '{}' with NULL: {}",
                self.null_filled.len(),
                table,
                self.null_filled.join(", ")
            );
        }
    }
}
