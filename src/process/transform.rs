use std::{
    collections::{hash_map::DefaultHasher, HashSet},
    hash::{Hash, Hasher},
};

use crate::{
    process::utils::{coerce_number, is_date_column, normalize_date, upper_trim},
    tables::FaersTable,
};

/// Value written for missing free-text fields.
pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnRule {
    /// Free text, filled with `Unknown` when empty.
    Text,
    /// Free text normalized to upper case.
    Upper,
    /// Coerced to a number; left empty when unparseable.
    Number,
    /// Coerced to an ISO date; left empty when unparseable.
    Date,
    /// Identifier, trimmed.
    Key,
}

/// Why a row did not reach the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    MissingKeys,
    Duplicate,
}

/// Per-table cleaning rules applied row by row across every chunk of every
/// quarter of one table.
///
/// Duplicate detection keeps one 64-bit hash per distinct row for the whole
/// table.
#[derive(Debug)]
pub struct TableTransform {
    table: FaersTable,
    columns: Vec<String>,
    rules: Vec<ColumnRule>,
    primaryid: Option<usize>,
    caseid: Option<usize>,
    load_ts: String,
    seen: HashSet<u64>,
}

impl TableTransform {
    pub fn new(table: FaersTable, columns: Vec<String>, load_ts: String) -> Self {
        let rules = columns
            .iter()
            .map(|name| rule_for(table, name))
            .collect::<Vec<_>>();
        let primaryid = columns.iter().position(|c| c == "primaryid");
        let caseid = columns.iter().position(|c| c == "caseid");
        Self {
            table,
            columns,
            rules,
            primaryid,
            caseid,
            load_ts,
            seen: HashSet::new(),
        }
    }

    pub fn table(&self) -> FaersTable {
        self.table
    }

    /// Input column order every row must follow.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Output header: the input columns plus `load_ts`.
    pub fn output_header(&self) -> Vec<String> {
        let mut header = self.columns.clone();
        header.push("load_ts".to_string());
        header
    }

    /// Clean one row. Returns the output row, or why it was rejected.
    pub fn apply(&mut self, mut row: Vec<String>) -> Result<Vec<String>, Rejection> {
        for (value, rule) in row.iter_mut().zip(&self.rules) {
            match rule {
                ColumnRule::Number => *value = coerce_number(value).unwrap_or_default(),
                ColumnRule::Date => *value = normalize_date(value).unwrap_or_default(),
                ColumnRule::Upper => *value = upper_trim(value),
                ColumnRule::Key => *value = value.trim().to_string(),
                ColumnRule::Text => {}
            }
        }

        if let (Some(p), Some(c)) = (self.primaryid, self.caseid) {
            if row[p].is_empty() && row[c].is_empty() {
                return Err(Rejection::MissingKeys);
            }
        }

        let mut hasher = DefaultHasher::new();
        row.hash(&mut hasher);
        if !self.seen.insert(hasher.finish()) {
            return Err(Rejection::Duplicate);
        }

        for (value, rule) in row.iter_mut().zip(&self.rules) {
            if value.is_empty() {
                match rule {
                    ColumnRule::Text | ColumnRule::Key => *value = UNKNOWN.to_string(),
                    ColumnRule::Upper => *value = UNKNOWN.to_uppercase(),
                    ColumnRule::Number | ColumnRule::Date => {}
                }
            }
        }

        row.push(self.load_ts.clone());
        Ok(row)
    }

    /// Distinct rows seen so far.
    pub fn distinct_rows(&self) -> usize {
        self.seen.len()
    }
}

fn rule_for(table: FaersTable, column: &str) -> ColumnRule {
    match (table, column) {
        (_, "primaryid") | (_, "caseid") => ColumnRule::Key,
        (FaersTable::Demo, "age") | (FaersTable::Demo, "wt") => ColumnRule::Number,
        (FaersTable::Demo, "sex") => ColumnRule::Upper,
        (FaersTable::Demo, c) if is_date_column(c) => ColumnRule::Date,
        (FaersTable::Drug, "drugname") | (FaersTable::Drug, "role_cod") => ColumnRule::Upper,
        _ => ColumnRule::Text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TS: &str = "2026-10-15T00:00:00Z";

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn demo_rules() {
        let mut t = TableTransform::new(
            FaersTable::Demo,
            strings(&["primaryid", "caseid", "age", "sex", "wt", "event_dt", "some_col"]),
            TS.into(),
        );
        assert_eq!(
            t.output_header().last().map(String::as_str),
            Some("load_ts")
        );

        let out = t
            .apply(strings(&[" 1 ", "100", "25", "m", "70", "20250115", "A"]))
            .unwrap();
        assert_eq!(
            out,
            strings(&["1", "100", "25", "M", "70", "2025-01-15", "A", TS])
        );

        let out = t
            .apply(strings(&["2", "", "NaN", "", "x", "2025", ""]))
            .unwrap();
        assert_eq!(
            out,
            strings(&["2", "Unknown", "", "UNKNOWN", "", "2025-01-01", "Unknown", TS])
        );

        assert_eq!(
            t.apply(strings(&["", " ", "30", "F", "80", "", "B"])),
            Err(Rejection::MissingKeys)
        );
    }

    #[test]
    fn drug_rules_uppercase_before_dedupe() {
        let mut t = TableTransform::new(
            FaersTable::Drug,
            strings(&["primaryid", "caseid", "drugname", "role_cod"]),
            TS.into(),
        );
        let out = t
            .apply(strings(&["1", "100", " aspirin", "ps"]))
            .unwrap();
        assert_eq!(out, strings(&["1", "100", "ASPIRIN", "PS", TS]));
        assert_eq!(
            t.apply(strings(&["1", "100", "ASPIRIN ", "PS"])),
            Err(Rejection::Duplicate)
        );
        assert_eq!(t.distinct_rows(), 1);
    }

    #[test]
    fn generic_tables_only_fill_and_dedupe() {
        let mut t = TableTransform::new(
            FaersTable::Reac,
            strings(&["primaryid", "caseid", "pt", "drug_rec_act"]),
            TS.into(),
        );
        let out = t.apply(strings(&["1", "100", "nausea", ""])).unwrap();
        assert_eq!(out, strings(&["1", "100", "nausea", "Unknown", TS]));
        assert!(t.apply(strings(&["1", "100", "nausea", ""])).is_err());
        assert!(t.apply(strings(&["1", "100", "Nausea", ""])).is_ok());
    }

    #[test]
    fn single_key_column_never_drops_for_missing_keys() {
        let mut t = TableTransform::new(
            FaersTable::Outc,
            strings(&["primaryid", "outc_cod"]),
            TS.into(),
        );
        let out = t.apply(strings(&["", "HO"])).unwrap();
        assert_eq!(out, strings(&["Unknown", "HO", TS]));
    }
}
