//! Result metadata written once per completed query.

use serde::{Deserialize, Serialize};

/// Summary of a completed query's result set.
///
/// Written strictly after the last result batch and immediately before the
/// terminal flip to `Completed`; readers may rely on metadata being present
/// whenever the status reads completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryMetadata {
    pub total_rows: u64,
    pub total_batches: u32,
    pub est_size_bytes: u64,
    pub column_names: Vec<String>,
    pub column_types: Vec<String>,
}
