//! Text normalization for headers, names, and cells

/// Fold full-width ASCII variants and the ideographic space to ASCII
pub fn fold_full_width(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{3000}' => ' ',
            '\u{FF01}'..='\u{FF5E}' => char::from_u32(c as u32 - 0xFEE0).unwrap_or(c),
            _ => c,
        })
        .collect()
}

/// Normalize a header for matching
///
/// Trims, folds full-width characters, lowercases, and drops everything that
/// is not a letter or digit. CJK ideographs count as letters, so ASCII and CJK
/// punctuation and all inner whitespace disappear.
pub fn normalize_header(header: &str) -> String {
    fold_full_width(header.trim())
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Normalize a person or class name for identity comparison
pub fn normalize_name(name: &str) -> String {
    fold_full_width(name)
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '·' && *c != '.')
        .collect()
}

/// Trim a cell and fold full-width characters, keeping punctuation
pub fn normalize_cell(value: &str) -> String {
    fold_full_width(value).trim().to_string()
}

/// Trimmed cell value, or None for an empty cell
pub fn non_empty(value: &str) -> Option<String> {
    let value = normalize_cell(value);
    if value.is_empty() { None } else { Some(value) }
}
