//! Postcode normalisation used on both sides of every postcode join.

/// Remove all whitespace and upper-case: `" sw1a 1aa "` -> `"SW1A1AA"`.
pub fn normalize_postcode(postcode: &str) -> String {
    postcode
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}
