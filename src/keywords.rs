//! Keyword extraction and file-name pattern detection.
//!
//! Seeds free-text searches and maintains a template's `semantic_model` and
//! `name_pattern` from its usage history.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

pub const DEFAULT_MIN_LENGTH: usize = 2;
pub const DEFAULT_MAX_COUNT: usize = 10;

/// `{Type}_{ProjectName}_{Date}` - used when no marker is recognised.
pub const PATTERN_TYPE_PROJECT_DATE: &str = "{Type}_{ProjectName}_{Date}";
/// `{ProjectName}_{Type}_{Date}` - sample leads with a project marker.
pub const PATTERN_PROJECT_TYPE_DATE: &str = "{ProjectName}_{Type}_{Date}";
/// `{Type}_{ProjectName}_V{Version}` - sample carries a version marker.
pub const PATTERN_TYPE_PROJECT_VERSION: &str = "{Type}_{ProjectName}_V{Version}";
/// `{Type}_{Date}` - sample carries only a date marker.
pub const PATTERN_TYPE_DATE: &str = "{Type}_{Date}";

/// Split on anything that is not a letter or digit. CJK ideographs count as
/// letters, so mixed-language names tokenize cleanly.
pub fn tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
}

/// Most frequent case-folded tokens of `text`.
///
/// Tokens shorter than `min_length` characters are dropped. Ties in frequency
/// keep first-occurrence order. At most `max_count` distinct tokens are
/// returned.
pub fn extract_keywords(text: &str, min_length: usize, max_count: usize) -> Vec<String> {
    // token -> (count, first position)
    let mut seen: HashMap<String, (usize, usize)> = HashMap::new();
    for (position, token) in tokens(text)
        .filter(|t| t.chars().count() >= min_length)
        .enumerate()
    {
        let entry = seen.entry(token.to_lowercase()).or_insert((0, position));
        entry.0 += 1;
    }

    let mut ranked: Vec<(String, usize, usize)> = seen
        .into_iter()
        .map(|(token, (count, first))| (token, count, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked
        .into_iter()
        .take(max_count)
        .map(|(token, _, _)| token)
        .collect()
}

static DATE_LIKE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:19|20)\d{2}[-_.]?(?:0[1-9]|1[0-2])(?:[-_.]?(?:0[1-9]|[12]\d|3[01]))?")
        .expect("valid date regex")
});

static VERSION_LIKE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^|[^a-z])v\d+(?:\.\d+)*(?:$|[^a-z0-9])").expect("valid version regex")
});

const PROJECT_MARKERS: &[&str] = &["project", "projectname", "项目"];
const VERSION_MARKERS: &[&str] = &["version", "版本"];
const DATE_MARKERS: &[&str] = &["date", "日期"];

/// Pick a naming pattern from a sample of file names.
///
/// Only the first name is inspected, case-insensitively. Bilingual markers
/// (`project`/`项目`, `version`/`版本`, `date`/`日期`) are recognised anywhere
/// in the name, placeholders such as `{Version}` included, as are literal
/// version (`v2`) and date (`2024-05-01`) fragments.
/// Precedence: project, then version, then date. An empty sample or one with no
/// marker yields [`PATTERN_TYPE_PROJECT_DATE`].
pub fn determine_name_pattern<S: AsRef<str>>(file_names: &[S]) -> &'static str {
    let Some(sample) = file_names.first().map(|s| s.as_ref().to_lowercase()) else {
        return PATTERN_TYPE_PROJECT_DATE;
    };

    let has = |markers: &[&str]| markers.iter().any(|m| sample.contains(m));

    if has(PROJECT_MARKERS) {
        PATTERN_PROJECT_TYPE_DATE
    } else if has(VERSION_MARKERS) || VERSION_LIKE.is_match(&sample) {
        PATTERN_TYPE_PROJECT_VERSION
    } else if has(DATE_MARKERS) || DATE_LIKE.is_match(&sample) {
        PATTERN_TYPE_DATE
    } else {
        PATTERN_TYPE_PROJECT_DATE
    }
}
