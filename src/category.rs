use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;

/// Rakuten genre used when a source category has no explicit mapping (daily goods).
pub const DEFAULT_CATEGORY_ID: &str = "100804";

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CategoryMapping {
    pub label: &'static str,
    pub category_id: &'static str,
}

const CATEGORY_TABLE: [CategoryMapping; 10] = [
    CategoryMapping { label: "Electronics", category_id: "558885" },
    CategoryMapping { label: "Home & Kitchen", category_id: "100804" },
    CategoryMapping { label: "Sports & Outdoors", category_id: "101070" },
    CategoryMapping { label: "Toys & Games", category_id: "101164" },
    CategoryMapping { label: "Clothing", category_id: "100316" },
    CategoryMapping { label: "Books", category_id: "101240" },
    CategoryMapping { label: "Health & Personal Care", category_id: "101344" },
    CategoryMapping { label: "Beauty", category_id: "101344" },
    CategoryMapping { label: "Automotive", category_id: "100897" },
    CategoryMapping { label: "Tools & Home Improvement", category_id: "100804" },
];

static CATEGORY_INDEX: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    CATEGORY_TABLE
        .iter()
        .map(|entry| (entry.label, entry.category_id))
        .collect()
});

/// Resolves a source category label to a destination category code. Labels
/// match exactly; anything unknown falls back to [`DEFAULT_CATEGORY_ID`].
pub fn map_category(label: &str) -> &'static str {
    CATEGORY_INDEX
        .get(label)
        .copied()
        .unwrap_or(DEFAULT_CATEGORY_ID)
}

pub fn mappings() -> &'static [CategoryMapping] {
    &CATEGORY_TABLE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_label_maps_to_its_code() {
        assert_eq!(map_category("Electronics"), "558885");
        assert_eq!(map_category("Beauty"), "101344");
        assert_eq!(map_category("Automotive"), "100897");
    }

    #[test]
    fn unknown_label_falls_back_to_default() {
        assert_eq!(map_category("Garden"), DEFAULT_CATEGORY_ID);
        assert_eq!(map_category(""), DEFAULT_CATEGORY_ID);
        assert_eq!(map_category("electronics"), DEFAULT_CATEGORY_ID);
    }

    #[test]
    fn table_labels_are_unique() {
        assert_eq!(CATEGORY_INDEX.len(), mappings().len());
    }
}
