use serde::{Deserialize, Serialize};

/// One catalog entry as persisted by every sink.
///
/// Field order is the column order of the tabular and relational outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub title: String,
    pub price: f64,
    pub availability: bool,
    /// 1..=5, `None` when the page carried no recognizable rating.
    pub rating: Option<u8>,
}

pub const COLUMNS: [&str; 4] = ["title", "price", "availability", "rating"];
