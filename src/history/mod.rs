// src/history/mod.rs

pub mod merged;
pub mod table_history;

pub use merged::MergedRow;
pub use table_history::{HistoryRow, TableHistory};
