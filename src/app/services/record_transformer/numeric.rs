//! Score, rank, and grade cell coercion

use crate::app::services::field_mapper::normalize::normalize_cell;
use crate::constants::is_missing_marker;

/// Why a populated cell could not be used
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CellError {
    #[error("'{value}' is not a number")]
    NotANumber { value: String },

    #[error("score {value} is negative")]
    Negative { value: f64 },

    #[error("score {value} exceeds the maximum of {max}")]
    AboveMaximum { value: f64, max: f64 },

    #[error("'{value}' is not a rank")]
    NotARank { value: String },
}

/// Cell text with full-width folded, or None when it marks an absent value
fn present(raw: &str) -> Option<String> {
    let value = normalize_cell(raw);
    if is_missing_marker(&value.to_lowercase()) {
        None
    } else {
        Some(value)
    }
}

/// Parse a score cell
///
/// Accepts full-width digits and a trailing `分`. Blank cells and markers
/// such as `-` or `缺考` read as absent.
pub fn parse_score(raw: &str, max: f64) -> Result<Option<f64>, CellError> {
    let Some(value) = present(raw) else {
        return Ok(None);
    };
    let digits = value.trim_end_matches('分').trim();
    let score: f64 = digits.parse().map_err(|_| CellError::NotANumber {
        value: value.clone(),
    })?;
    if !score.is_finite() {
        return Err(CellError::NotANumber { value });
    }
    if score < 0.0 {
        return Err(CellError::Negative { value: score });
    }
    if score > max {
        return Err(CellError::AboveMaximum { value: score, max });
    }
    Ok(Some(score))
}

/// Parse a rank cell: `3`, `3.0`, or `第3名`
pub fn parse_rank(raw: &str) -> Result<Option<u32>, CellError> {
    let Some(value) = present(raw) else {
        return Ok(None);
    };
    let digits = value
        .trim_start_matches('第')
        .trim_end_matches('名')
        .trim();
    if let Ok(rank) = digits.parse::<u32>() {
        return Ok(Some(rank));
    }
    match digits.parse::<f64>() {
        Ok(rank)
            if rank.is_finite()
                && rank >= 0.0
                && rank.fract() == 0.0
                && rank <= u32::MAX as f64 =>
        {
            Ok(Some(rank as u32))
        }
        _ => Err(CellError::NotARank { value }),
    }
}

/// Letter grade text, kept verbatim
pub fn parse_grade(raw: &str) -> Option<String> {
    present(raw)
}
