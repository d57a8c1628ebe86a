use super::document::StateDocument;

/// Closing braces tried, newest first, before giving up on a prefix repair.
const MAX_REPAIR_ATTEMPTS: usize = 64;

/// Best-effort recovery of a truncated or garbage-suffixed document: parse
/// the longest prefix that ends at a closing brace and forms a valid
/// document.
pub(super) fn repair_truncated(raw: &str) -> Option<StateDocument> {
    let mut end = raw.len();
    for _ in 0..MAX_REPAIR_ATTEMPTS {
        let brace = raw[..end].rfind('}')?;
        let candidate = &raw[..=brace];
        if let Ok(doc) = serde_json::from_str::<StateDocument>(candidate) {
            return Some(doc);
        }
        end = brace;
    }
    None
}
