// src/tables.rs
use once_cell::sync::Lazy;
use regex::Regex;
use std::{fmt, path::Path, str::FromStr};
use thiserror::Error;

/// The seven canonical FAERS tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FaersTable {
    Demo,
    Drug,
    Reac,
    Outc,
    Rpsr,
    Indi,
    Ther,
}

impl FaersTable {
    pub const ALL: [FaersTable; 7] = [
        FaersTable::Demo,
        FaersTable::Drug,
        FaersTable::Reac,
        FaersTable::Outc,
        FaersTable::Rpsr,
        FaersTable::Indi,
        FaersTable::Ther,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            FaersTable::Demo => "DEMO",
            FaersTable::Drug => "DRUG",
            FaersTable::Reac => "REAC",
            FaersTable::Outc => "OUTC",
            FaersTable::Rpsr => "RPSR",
            FaersTable::Indi => "INDI",
            FaersTable::Ther => "THER",
        }
    }

    pub fn from_code(s: &str) -> Option<Self> {
        let upper = s.trim().to_uppercase();
        Self::ALL.into_iter().find(|t| t.code() == upper)
    }

    /// Name of the merged output file for this table, e.g. `merged_demo.csv`.
    pub fn merged_file_name(&self) -> String {
        format!("merged_{}.csv", self.code().to_lowercase())
    }

    /// Columns the merged output is expected to carry. Extra columns are fine.
    pub fn expected_columns(&self) -> &'static [&'static str] {
        match self {
            FaersTable::Demo => &[
                "primaryid",
                "caseid",
                "caseversion",
                "i_f_code",
                "event_dt",
                "age",
                "age_cod",
                "sex",
                "wt",
                "reporter_country",
                "load_ts",
            ],
            FaersTable::Drug => &[
                "primaryid",
                "drug_seq",
                "role_cod",
                "drugname",
                "prod_ai",
                "load_ts",
            ],
            FaersTable::Reac => &["primaryid", "pt", "load_ts"],
            FaersTable::Outc => &["primaryid", "outc_cod", "load_ts"],
            FaersTable::Ther => &["primaryid", "dsg_drug_seq", "start_dt", "end_dt", "load_ts"],
            FaersTable::Rpsr => &["primaryid", "rpsr_cod", "load_ts"],
            FaersTable::Indi => &["primaryid", "indi_seq", "indi_name", "load_ts"],
        }
    }

    /// Inclusive row-count envelope for two quarters of merged data.
    pub fn row_envelope(&self) -> (u64, u64) {
        match self {
            FaersTable::Drug => (3_000_000, 6_000_000),
            FaersTable::Reac => (2_000_000, 5_000_000),
            FaersTable::Ther => (700_000, 2_000_000),
            FaersTable::Demo => (500_000, 1_500_000),
            FaersTable::Outc => (400_000, 1_200_000),
            FaersTable::Rpsr => (10_000, 100_000),
            FaersTable::Indi => (2_000_000, 2_500_000),
        }
    }
}

/// Envelope applied to merged tables outside the catalogue.
pub const DEFAULT_ROW_ENVELOPE: (u64, u64) = (10_000, 20_000_000);

impl fmt::Display for FaersTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuarterParseError {
    #[error("quarter `{0}` is not of the form YYYYQn")]
    Format(String),
    #[error("quarter number {0} out of range 1..=4")]
    Range(u8),
}

/// One quarterly FAERS release.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Quarter {
    pub year: u16,
    pub quarter: u8,
}

impl Quarter {
    pub fn new(year: u16, quarter: u8) -> Result<Self, QuarterParseError> {
        if !(1..=4).contains(&quarter) {
            return Err(QuarterParseError::Range(quarter));
        }
        Ok(Self { year, quarter })
    }

    /// Stem prefix of this quarter's file for `table`, e.g. `DEMO25Q1`.
    pub fn file_prefix(&self, table: FaersTable) -> String {
        format!("{}{:02}Q{}", table.code(), self.year % 100, self.quarter)
    }
}

impl fmt::Display for Quarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Q{}", self.year, self.quarter)
    }
}

impl FromStr for Quarter {
    type Err = QuarterParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        static RE: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"(?i)^\s*(\d{4})\s*Q\s*(\d)\s*$").expect("quarter regex"));
        let caps = RE
            .captures(s)
            .ok_or_else(|| QuarterParseError::Format(s.to_string()))?;
        let year: u16 = caps[1]
            .parse()
            .map_err(|_| QuarterParseError::Format(s.to_string()))?;
        let quarter: u8 = caps[2]
            .parse()
            .map_err(|_| QuarterParseError::Format(s.to_string()))?;
        Quarter::new(year, quarter)
    }
}

/// A raw FAERS text file recognised by its name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawFile {
    pub table: FaersTable,
    /// Two-digit year and quarter, when the stem ends in `YYQn`.
    pub quarter: Option<(u8, u8)>,
}

impl RawFile {
    /// Identify the table from the leading alphabetic run of the file stem.
    /// Returns `None` for files that are not one of the seven tables.
    pub fn from_path(path: &Path) -> Option<Self> {
        static SUFFIX: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"(?i)(\d{2})Q([1-4])$").expect("suffix regex"));

        let stem = path.file_stem()?.to_str()?;
        let code: String = stem.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
        let table = FaersTable::from_code(&code)?;
        let quarter = SUFFIX.captures(stem).and_then(|caps| {
            Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
        });
        Some(Self { table, quarter })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn quarter_parses_and_displays() {
        let q: Quarter = "2025q2".parse().unwrap();
        assert_eq!(q, Quarter { year: 2025, quarter: 2 });
        assert_eq!(q.to_string(), "2025Q2");
        assert_eq!(q.file_prefix(FaersTable::Demo), "DEMO25Q2");
        assert_eq!(
            "2025Q5".parse::<Quarter>(),
            Err(QuarterParseError::Range(5))
        );
        assert!(matches!(
            "25Q1".parse::<Quarter>(),
            Err(QuarterParseError::Format(_))
        ));
    }

    #[test]
    fn raw_file_identifies_table_and_quarter() {
        let f = RawFile::from_path(&PathBuf::from("data/raw/DRUG25Q1.txt")).unwrap();
        assert_eq!(f.table, FaersTable::Drug);
        assert_eq!(f.quarter, Some((25, 1)));

        let f = RawFile::from_path(&PathBuf::from("demo_sample.txt")).unwrap();
        assert_eq!(f.table, FaersTable::Demo);
        assert_eq!(f.quarter, None);

        assert!(RawFile::from_path(&PathBuf::from("STAT25Q1.txt")).is_none());
        assert!(RawFile::from_path(&PathBuf::from("ASC_NTS.txt")).is_none());
    }

    #[test]
    fn every_expected_column_set_carries_load_ts() {
        for t in FaersTable::ALL {
            assert!(t.expected_columns().contains(&"load_ts"), "{t}");
            assert!(t.expected_columns().contains(&"primaryid"), "{t}");
            let (lo, hi) = t.row_envelope();
            assert!(lo < hi);
        }
    }
}
