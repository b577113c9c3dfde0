/// Maps the columns of one input file onto the column order fixed by the
/// first file of the table.
#[derive(Debug, Clone)]
pub struct ColumnMap {
    sources: Vec<Option<usize>>,
    identity: bool,
    missing: Vec<String>,
    dropped: Vec<String>,
}

impl ColumnMap {
    pub fn new(target: &[String], source: &[String]) -> Self {
        let sources: Vec<Option<usize>> = target
            .iter()
            .map(|name| source.iter().position(|s| s == name))
            .collect();
        let identity = target == source;
        let missing = target
            .iter()
            .zip(&sources)
            .filter(|(_, src)| src.is_none())
            .map(|(name, _)| name.clone())
            .collect();
        let dropped = source
            .iter()
            .filter(|s| !target.contains(s))
            .cloned()
            .collect();
        Self {
            sources,
            identity,
            missing,
            dropped,
        }
    }

    /// Target columns absent from the source; filled with empty values.
    pub fn missing(&self) -> &[String] {
        &self.missing
    }

    /// Source columns with no place in the target.
    pub fn dropped(&self) -> &[String] {
        &self.dropped
    }

    pub fn project(&self, mut row: Vec<String>) -> Vec<String> {
        if self.identity {
            return row;
        }
        self.sources
            .iter()
            .map(|src| {
                src.and_then(|i| row.get_mut(i).map(std::mem::take))
                    .unwrap_or_default()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn identical_headers_pass_rows_through() {
        let m = ColumnMap::new(&cols(&["a", "b"]), &cols(&["a", "b"]));
        assert_eq!(m.project(cols(&["1", "2"])), cols(&["1", "2"]));
        assert!(m.missing().is_empty() && m.dropped().is_empty());
    }

    #[test]
    fn reorders_pads_and_drops() {
        let m = ColumnMap::new(&cols(&["a", "b", "c"]), &cols(&["c", "x", "a"]));
        assert_eq!(m.project(cols(&["3", "9", "1"])), cols(&["1", "", "3"]));
        assert_eq!(m.missing(), ["b"]);
        assert_eq!(m.dropped(), ["x"]);
    }
}
