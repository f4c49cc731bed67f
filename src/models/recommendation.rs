use serde::{Deserialize, Serialize};

/// Final, fixed-size answer for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendations {
    pub item_ids: Vec<String>,
    /// Which tiers contributed how many items, e.g. `model_recs=8 novel_items=2`
    pub provenance: String,
}

/// Request body registering items into the catalog
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NewItemsRequest {
    pub item_ids: Vec<String>,
}
