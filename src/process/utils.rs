use chrono::NaiveDate;

/// Lower-case and trim a header name, dropping a leading BOM.
pub fn normalize_header(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}').trim().to_lowercase()
}

/// Columns whose name mentions `dt` or `date` carry FAERS dates.
pub fn is_date_column(name: &str) -> bool {
    name.contains("dt") || name.contains("date")
}

/// Parse a numeric field. Unparseable or non-finite input yields `None`.
pub fn coerce_number(raw: &str) -> Option<String> {
    let v: f64 = raw.trim().parse().ok()?;
    if v.is_finite() {
        Some(v.to_string())
    } else {
        None
    }
}

/// FAERS dates are `YYYYMMDD`, or truncated to `YYYYMM` / `YYYY` when the
/// reporter gave less precision. Returns ISO `YYYY-MM-DD`, padding missing
/// parts with `01`.
pub fn normalize_date(raw: &str) -> Option<String> {
    let s = raw.trim();
    if !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (year, month, day) = match s.len() {
        8 => (s[0..4].parse().ok()?, s[4..6].parse().ok()?, s[6..8].parse().ok()?),
        6 => (s[0..4].parse().ok()?, s[4..6].parse().ok()?, 1),
        4 => (s[0..4].parse().ok()?, 1, 1),
        _ => return None,
    };
    NaiveDate::from_ymd_opt(year, month, day).map(|d| d.format("%Y-%m-%d").to_string())
}

/// Upper-case and trim free text.
pub fn upper_trim(raw: &str) -> String {
    raw.trim().to_uppercase()
}
