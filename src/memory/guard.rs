//! Anti-hallucination code-indicator scanning for [`super::SharedMemory`] writes.

use regex::RegexSet;
use std::sync::OnceLock;

/// Strings longer than this are sampled rather than scanned in full.
const SAMPLE_THRESHOLD: usize = 10_000;
/// Size of each sampled window.
const WINDOW: usize = 2_000;
/// Number of interior offsets sampled in addition to start and end.
const INTERIOR_SAMPLES: usize = 3;

fn indicator_patterns() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new([
            r"```[a-zA-Z]*\n",                       // fenced code block
            r"(?m)^\s*import\s+[\w\.]+",              // python/js import
            r"(?m)^\s*from\s+[\w\.]+\s+import\s+",    // python from-import
            r"(?m)^\s*function\s+\w*\s*\(",           // js/php function
            r"(?m)^\s*def\s+\w+\s*\(",                // python def
            r"(?m)^\s*class\s+\w+[\s:{(]",             // class declaration
            r"(?i)\bSELECT\b.+\bFROM\b",              // SQL
            r"(?i)\bINSERT\s+INTO\b",                  // SQL
            r"<script[\s>]",                           // embedded script tag
            r"<\?php",                                 // PHP open tag
            r"^#!/",                                   // shell shebang (position-sensitive; checked separately)
            r"(?m)^\s*(const|let|var)\s+\w+\s*=",     // js declaration
            r"(?m)^\s*public\s+(static\s+)?(class|void|int|String)\b", // java
        ])
        .expect("static indicator patterns must compile")
    })
}

/// Scan `s` for a canonical code indicator, returning a short tag naming the
/// first match found, or `None` if clean.
///
/// For strings over [`SAMPLE_THRESHOLD`] characters, only a start window,
/// several interior windows, and an end window are scanned — full scans of
/// arbitrarily large values are not required by the contract, but scanning
/// only a prefix would let an indicator planted mid-document slip through.
pub fn scan_for_code_indicators(s: &str) -> Option<&'static str> {
    if s.len() <= SAMPLE_THRESHOLD {
        return first_match(s);
    }

    for window in sample_windows(s) {
        if let Some(tag) = first_match(window) {
            return Some(tag);
        }
    }
    None
}

/// Snaps a raw byte offset down to the nearest UTF-8 character boundary, so
/// windows computed from arithmetic on `len()` never land mid-codepoint.
fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    let len = s.len();
    if index >= len {
        return len;
    }
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn sample_windows(s: &str) -> Vec<&str> {
    let len = s.len();
    let mut windows = Vec::with_capacity(INTERIOR_SAMPLES + 2);

    let start_end = floor_char_boundary(s, WINDOW.min(len));
    windows.push(&s[0..start_end]);

    let end_start = floor_char_boundary(s, len.saturating_sub(WINDOW));
    windows.push(&s[end_start..len]);

    for i in 1..=INTERIOR_SAMPLES {
        let center = len * i / (INTERIOR_SAMPLES + 1);
        let start = floor_char_boundary(s, center.saturating_sub(WINDOW / 2));
        let end = floor_char_boundary(s, (start + WINDOW).min(len));
        windows.push(&s[start..end]);
    }

    windows
}

const TAGS: &[&str] = &[
    "code_fence",
    "python_import",
    "python_from_import",
    "js_function",
    "python_def",
    "class_declaration",
    "sql_select",
    "sql_insert",
    "script_tag",
    "php_tag",
    "shell_shebang",
    "js_declaration",
    "java_declaration",
];

fn first_match(s: &str) -> Option<&'static str> {
    let matches = indicator_patterns().matches(s);
    matches.iter().next().map(|idx| TAGS[idx])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_prose_has_no_indicator() {
        assert_eq!(scan_for_code_indicators("just a long paragraph of notes"), None);
    }

    #[test]
    fn code_fence_at_start_is_detected() {
        let body = "```python\nimport os\n```\n".to_string() + &"prose ".repeat(2_000);
        assert_eq!(scan_for_code_indicators(&body), Some("code_fence"));
    }

    #[test]
    fn code_fence_in_middle_of_long_string_is_detected() {
        let prefix = "prose ".repeat(2_000);
        let suffix = "prose ".repeat(2_000);
        let body = format!("{prefix}```javascript\nfunction f() {{}}\n```{suffix}");
        assert!(body.len() > SAMPLE_THRESHOLD);
        assert!(scan_for_code_indicators(&body).is_some());
    }

    #[test]
    fn sql_keyword_pair_is_detected() {
        assert_eq!(
            scan_for_code_indicators("please run SELECT * FROM users where id=1"),
            Some("sql_select")
        );
    }

    #[test]
    fn long_multibyte_string_does_not_panic_on_window_boundaries() {
        let body = "日本語のプロセ".repeat(3_000);
        assert!(body.len() > SAMPLE_THRESHOLD);
        let _ = scan_for_code_indicators(&body);
    }
}
