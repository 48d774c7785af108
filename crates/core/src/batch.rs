use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::period::Month;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthSummary {
    pub month: Month,
    pub new_count: usize,
    pub duplicate_count: usize,
}

impl MonthSummary {
    pub fn total(&self) -> usize {
        self.new_count + self.duplicate_count
    }
}

/// Outcome record of one file ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportBatch {
    pub batch_id: Uuid,
    pub filename: String,
    pub row_count: usize,
    pub duplicate_count: usize,
    /// Ascending by month.
    pub detected_months: Vec<MonthSummary>,
    pub warnings: Vec<String>,
    pub processing_time_ms: u64,
    pub encoding: String,
    pub delimiter: Option<char>,
}

impl ImportBatch {
    pub fn new_count(&self) -> usize {
        self.row_count.saturating_sub(self.duplicate_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts() {
        let batch = ImportBatch {
            batch_id: Uuid::new_v4(),
            filename: "releve.csv".into(),
            row_count: 5,
            duplicate_count: 2,
            detected_months: vec![MonthSummary {
                month: Month::new(2024, 1).unwrap(),
                new_count: 3,
                duplicate_count: 2,
            }],
            warnings: vec![],
            processing_time_ms: 1,
            encoding: "UTF-8".into(),
            delimiter: Some(','),
        };
        assert_eq!(batch.new_count(), 3);
        assert_eq!(batch.detected_months[0].total(), 5);
    }
}
