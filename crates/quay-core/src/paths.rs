//! Path hygiene for install-relative locations.
//!
//! Every path derived from a manifest (glob matches, tool locations, archive
//! member names) passes through [`sanitize_path`] before it is joined to a
//! filesystem root, so a hostile or sloppy manifest cannot escape its
//! install directory or smuggle in reserved device names.

/// Windows reserved device names; path segments matching one (any case) are
/// dropped.
const RESERVED_NAMES: [&str; 4] = ["con", "prn", "aux", "nul"];

fn is_reserved_segment(segment: &str) -> bool {
    let lower = segment.to_ascii_lowercase();
    if RESERVED_NAMES.contains(&lower.as_str()) {
        return true;
    }
    if let Some(digit) = lower.strip_prefix("com").or_else(|| lower.strip_prefix("lpt")) {
        return digit.len() == 1 && digit.chars().all(|c| c.is_ascii_digit());
    }
    false
}

fn is_illegal(c: char) -> bool {
    matches!(c, '?' | '<' | '>' | ':' | '|' | '"')
        || c.is_control()
        || ('\u{80}'..='\u{9f}').contains(&c)
}

/// Normalize an install-relative path to a safe forward-slash form.
///
/// Separators collapse to single forward slashes; characters illegal in file
/// names and control characters are stripped; empty, dot-only and
/// reserved-device-name segments are dropped; trailing dot runs are trimmed.
/// The function is idempotent.
pub fn sanitize_path(path: &str) -> String {
    let cleaned: String = path.chars().filter(|c| !is_illegal(*c)).collect();
    let segments: Vec<&str> = cleaned
        .split(['/', '\\'])
        .filter(|segment| {
            !segment.is_empty()
                && !segment.chars().all(|c| c == '.')
                && !is_reserved_segment(segment)
        })
        .collect();
    segments.join("/").trim_end_matches('.').to_string()
}

/// Derive a cache file name for an artifact acquisition: the artifact name
/// plus optional nametag/language tags, with every non-word run collapsed to
/// a dot.
pub fn artifact_file_name(name: &str, nametag: Option<&str>, lang: Option<&str>, extension: &str) -> String {
    let mut result = name.to_string();
    if let Some(tag) = nametag {
        result.push('-');
        result.push_str(tag);
    }
    if let Some(lang) = lang {
        result.push('-');
        result.push_str(lang);
    }
    result.push_str(extension);
    mangle(&result)
}

/// Collapse every run of non-word characters to a single dot.
pub fn mangle(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_run = false;
    for c in text.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('.');
            in_run = true;
        }
    }
    out
}

/// The final component of a URL, or the empty string.
pub fn filename_from_url(url: &str) -> &str {
    url.split('/').next_back().unwrap_or("")
}
