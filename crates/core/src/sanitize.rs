use serde::Serialize;
use thiserror::Error;

const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

const ILLEGAL_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

pub const MAX_FILENAME_LEN: usize = 255;
pub const MAX_PATH_LEN: usize = 260;

#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
pub enum FilenameIssue {
    #[error("ファイル名が空です")]
    Empty,
    #[error("不正な文字が含まれています: {}", join_chars(.0))]
    IllegalCharacters(Vec<char>),
    #[error("予約語は使用できません: {0}")]
    ReservedName(String),
    #[error("ファイル名が長すぎます（最大{max}文字）")]
    TooLong { max: usize },
    #[error("ファイル名の末尾にスペースまたはピリオドは使用できません")]
    TrailingSpaceOrPeriod,
    #[error("ファイル名の先頭にスペースは使用できません")]
    LeadingSpace,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilenameValidation {
    pub valid: bool,
    pub issues: Vec<FilenameIssue>,
}

pub fn validate_filename(name: &str) -> FilenameValidation {
    let mut issues = Vec::new();

    if name.is_empty() {
        issues.push(FilenameIssue::Empty);
        return FilenameValidation {
            valid: false,
            issues,
        };
    }

    let illegal = illegal_chars_in(name);
    if !illegal.is_empty() {
        issues.push(FilenameIssue::IllegalCharacters(illegal));
    }

    let base = name
        .rsplit_once('.')
        .map(|(base, _)| base)
        .unwrap_or(name)
        .to_uppercase();
    if is_windows_reserved(&base) {
        issues.push(FilenameIssue::ReservedName(base));
    }

    if name.chars().count() > MAX_FILENAME_LEN {
        issues.push(FilenameIssue::TooLong {
            max: MAX_FILENAME_LEN,
        });
    }

    if name.ends_with([' ', '.']) {
        issues.push(FilenameIssue::TrailingSpaceOrPeriod);
    }

    if name.starts_with(' ') {
        issues.push(FilenameIssue::LeadingSpace);
    }

    FilenameValidation {
        valid: issues.is_empty(),
        issues,
    }
}

/// Reserved device names are not rewritten here; re-validate when that matters.
pub fn sanitize_filename(value: &str) -> String {
    let replaced: String = value
        .chars()
        .map(|ch| if is_illegal_char(ch) { '_' } else { ch })
        .collect();

    let trimmed = replaced.trim_start_matches(' ').trim_end_matches([' ', '.']);

    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn validate_prefix(prefix: &str) -> Result<(), FilenameIssue> {
    if prefix.is_empty() {
        return Ok(());
    }

    let illegal = illegal_chars_in(prefix);
    if !illegal.is_empty() {
        return Err(FilenameIssue::IllegalCharacters(illegal));
    }

    let upper = prefix.to_uppercase();
    if is_windows_reserved(&upper) {
        return Err(FilenameIssue::ReservedName(upper));
    }

    Ok(())
}

pub fn validate_path_length(path: &str) -> bool {
    path.chars().count() <= MAX_PATH_LEN
}

fn illegal_chars_in(value: &str) -> Vec<char> {
    ILLEGAL_CHARS
        .iter()
        .copied()
        .filter(|ch| value.contains(*ch))
        .collect()
}

fn is_illegal_char(ch: char) -> bool {
    ILLEGAL_CHARS.contains(&ch)
}

fn is_windows_reserved(upper: &str) -> bool {
    WINDOWS_RESERVED_NAMES
        .iter()
        .any(|reserved| *reserved == upper)
}

fn join_chars(chars: &[char]) -> String {
    chars
        .iter()
        .map(char::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_device_name_is_rejected_with_extension() {
        let result = validate_filename("CON.txt");
        assert!(!result.valid);
        assert_eq!(
            result.issues,
            vec![FilenameIssue::ReservedName("CON".to_string())]
        );
    }

    #[test]
    fn reserved_check_ignores_case() {
        let result = validate_filename("lpt3.png");
        assert!(result
            .issues
            .contains(&FilenameIssue::ReservedName("LPT3".to_string())));
    }

    #[test]
    fn empty_name_reports_only_empty() {
        let result = validate_filename("");
        assert!(!result.valid);
        assert_eq!(result.issues, vec![FilenameIssue::Empty]);
    }

    #[test]
    fn collects_every_problem() {
        let result = validate_filename(" a<b>.");
        assert!(!result.valid);
        assert!(result
            .issues
            .contains(&FilenameIssue::IllegalCharacters(vec!['<', '>'])));
        assert!(result.issues.contains(&FilenameIssue::TrailingSpaceOrPeriod));
        assert!(result.issues.contains(&FilenameIssue::LeadingSpace));
    }

    #[test]
    fn rejects_names_longer_than_limit() {
        let long = "a".repeat(MAX_FILENAME_LEN + 1);
        let result = validate_filename(&long);
        assert_eq!(
            result.issues,
            vec![FilenameIssue::TooLong {
                max: MAX_FILENAME_LEN
            }]
        );
        assert!(validate_filename(&"a".repeat(MAX_FILENAME_LEN)).valid);
    }

    #[test]
    fn accepts_ordinary_name() {
        let result = validate_filename("Trip_01.png");
        assert!(result.valid);
        assert!(result.issues.is_empty());
    }

    #[test]
    fn issue_message_lists_characters() {
        let issue = FilenameIssue::IllegalCharacters(vec![':', '?']);
        assert_eq!(issue.to_string(), "不正な文字が含まれています: :, ?");
    }

    #[test]
    fn sanitize_replaces_illegal_chars() {
        assert_eq!(sanitize_filename("a/b:c"), "a_b_c");
    }

    #[test]
    fn sanitize_trims_edges_and_falls_back() {
        assert_eq!(sanitize_filename("  photo. . "), "photo");
        assert_eq!(sanitize_filename(" ..."), "untitled");
        assert_eq!(sanitize_filename(""), "untitled");
    }

    #[test]
    fn sanitize_keeps_reserved_names() {
        let value = sanitize_filename("AUX");
        assert_eq!(value, "AUX");
        assert!(!validate_filename(&value).valid);
    }

    #[test]
    fn prefix_rules() {
        assert_eq!(validate_prefix(""), Ok(()));
        assert_eq!(validate_prefix("Trip"), Ok(()));
        assert_eq!(
            validate_prefix("nul"),
            Err(FilenameIssue::ReservedName("NUL".to_string()))
        );
        assert_eq!(
            validate_prefix("a|b"),
            Err(FilenameIssue::IllegalCharacters(vec!['|']))
        );
    }

    #[test]
    fn path_length_limit() {
        assert!(validate_path_length(&"x".repeat(MAX_PATH_LEN)));
        assert!(!validate_path_length(&"x".repeat(MAX_PATH_LEN + 1)));
    }
}
