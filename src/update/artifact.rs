use super::version::Version;
use crate::error::ValidationFailure;

/// Lines scanned for the version declaration.
pub const VERSION_SCAN_LINES: usize = 30;
/// Lines scanned for the signature header.
pub const SIGNATURE_SCAN_LINES: usize = 60;

/// Text markers that identify a genuine agent artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactMarkers {
    pub version: String,
    pub entry: String,
    pub signature_header: String,
}

/// A fetched candidate, alive for one update attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateArtifact {
    pub raw_bytes: Vec<u8>,
    pub declared_version: Version,
    pub signature_line: Option<String>,
}

impl UpdateArtifact {
    /// Format validation: both structural markers present and a parseable
    /// version declared near the top.
    pub fn parse(raw_bytes: Vec<u8>, markers: &ArtifactMarkers) -> Result<Self, ValidationFailure> {
        let text = String::from_utf8_lossy(&raw_bytes);
        if !text.contains(markers.version.as_str()) || !text.contains(markers.entry.as_str()) {
            return Err(ValidationFailure::NotAnArtifact);
        }
        let declared = declared_version(&text, &markers.version)
            .ok_or(ValidationFailure::MissingVersion)?;
        let declared_version = declared
            .parse::<Version>()
            .map_err(|_| ValidationFailure::InvalidVersion(declared.to_string()))?;
        let signature_line = signature_value(&text, &markers.signature_header).map(str::to_string);
        Ok(Self {
            raw_bytes,
            declared_version,
            signature_line,
        })
    }
}

/// Value following the version marker within the first
/// [`VERSION_SCAN_LINES`] lines.
pub fn declared_version<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    text.lines()
        .take(VERSION_SCAN_LINES)
        .find_map(|line| line.split_once(marker).map(|(_, rest)| rest))
        .and_then(|rest| rest.split_whitespace().next())
}

/// Value of the signature header within the first
/// [`SIGNATURE_SCAN_LINES`] lines: the first token after the `:` that
/// follows the header name.
pub fn signature_value<'a>(text: &'a str, header: &str) -> Option<&'a str> {
    text.lines()
        .take(SIGNATURE_SCAN_LINES)
        .find_map(|line| line.split_once(header).map(|(_, rest)| rest))
        .and_then(|rest| rest.split_once(':').map(|(_, value)| value))
        .and_then(|value| value.split_whitespace().next())
}

/// The bytes covered by the signature: the whole payload except the
/// signature line itself, which cannot sign its own contents.
pub fn signed_payload(raw: &[u8], header: &str) -> Vec<u8> {
    let needle = header.as_bytes();
    let mut out = Vec::with_capacity(raw.len());
    let mut skipped = false;
    for (index, line) in raw.split_inclusive(|b| *b == b'\n').enumerate() {
        if !skipped && index < SIGNATURE_SCAN_LINES && contains(line, needle) {
            skipped = true;
            continue;
        }
        out.extend_from_slice(line);
    }
    out
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}
