//! Query-language rules.

use hw_core::RuleType;

use super::RuleError;

/// Drops comment lines (`#` or `//`) and joins the rest into one query.
pub fn strip_comments(text: &str) -> Result<String, RuleError> {
    let query = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with("//"))
        .collect::<Vec<_>>()
        .join("\n");

    if query.is_empty() {
        return Err(RuleError::syntax(RuleType::Lucene, "rule has no query"));
    }
    Ok(query)
}
