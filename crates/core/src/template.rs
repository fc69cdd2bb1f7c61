use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const SEQUENTIAL_PATTERN: &str = "{number}.{ext}";
const PREFIXED_PATTERN: &str = "{prefix}_{number}.{ext}";
const DATED_PATTERN: &str = "{date}_{number}.{ext}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RenameTemplate {
    #[default]
    Sequential,
    Prefixed,
    Dated,
}

impl RenameTemplate {
    pub const ALL: [RenameTemplate; 3] = [
        RenameTemplate::Sequential,
        RenameTemplate::Prefixed,
        RenameTemplate::Dated,
    ];

    /// Unknown identifiers fall back to `Sequential`.
    pub fn from_id(id: &str) -> Self {
        match id.trim().to_ascii_lowercase().as_str() {
            "prefixed" | "text_number" => RenameTemplate::Prefixed,
            "dated" | "date_number" => RenameTemplate::Dated,
            _ => RenameTemplate::Sequential,
        }
    }

    pub fn id(self) -> &'static str {
        match self {
            RenameTemplate::Sequential => "sequential",
            RenameTemplate::Prefixed => "prefixed",
            RenameTemplate::Dated => "dated",
        }
    }

    pub fn pattern(self) -> &'static str {
        match self {
            RenameTemplate::Sequential => SEQUENTIAL_PATTERN,
            RenameTemplate::Prefixed => PREFIXED_PATTERN,
            RenameTemplate::Dated => DATED_PATTERN,
        }
    }
}

impl From<String> for RenameTemplate {
    fn from(value: String) -> Self {
        RenameTemplate::from_id(&value)
    }
}

impl From<RenameTemplate> for String {
    fn from(value: RenameTemplate) -> Self {
        value.id().to_string()
    }
}

impl fmt::Display for RenameTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetExtension {
    #[default]
    KeepOriginal,
    Fixed(String),
}

impl TargetExtension {
    pub fn from_option(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().trim_start_matches('.')) {
            Some(ext) if !ext.is_empty() => TargetExtension::Fixed(ext.to_ascii_lowercase()),
            _ => TargetExtension::KeepOriginal,
        }
    }

    pub fn resolve<'a>(&'a self, original: &'a str) -> &'a str {
        match self {
            TargetExtension::KeepOriginal => original,
            TargetExtension::Fixed(ext) => ext,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameSettings {
    pub template: RenameTemplate,
    pub prefix: String,
    pub start_number: u64,
    pub digits: usize,
    pub extension: TargetExtension,
}

impl Default for RenameSettings {
    fn default() -> Self {
        Self {
            template: RenameTemplate::Sequential,
            prefix: String::new(),
            start_number: 1,
            digits: 3,
            extension: TargetExtension::KeepOriginal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("連番が上限を超えました: {start} + {offset}")]
pub struct NumberOverflow {
    pub start: u64,
    pub offset: u64,
}

fn number_at(start: u64, offset: u64) -> Result<u64, NumberOverflow> {
    start
        .checked_add(offset)
        .ok_or(NumberOverflow { start, offset })
}

impl RenameSettings {
    /// Name for the item at `index` of a batch, numbered from `start_number`.
    pub fn filename_for(&self, index: usize, extension: &str) -> Result<String, NumberOverflow> {
        let number = number_at(self.start_number, index as u64)?;
        Ok(generate_filename(
            self.template,
            &self.prefix,
            number,
            self.digits,
            extension,
        ))
    }

    pub fn samples(&self, extension: &str, count: usize) -> Vec<String> {
        generate_samples(
            self.template,
            &self.prefix,
            self.start_number,
            self.digits,
            extension,
            count,
        )
    }
}

pub fn generate_filename(
    template: RenameTemplate,
    prefix: &str,
    number: u64,
    digits: usize,
    extension: &str,
) -> String {
    generate_filename_on(
        template,
        prefix,
        number,
        digits,
        extension,
        Local::now().date_naive(),
    )
}

/// Tokens are replaced literally in the order number, ext, prefix, date.
pub fn generate_filename_on(
    template: RenameTemplate,
    prefix: &str,
    number: u64,
    digits: usize,
    extension: &str,
    date: NaiveDate,
) -> String {
    let number_str = format!("{:0width$}", number, width = digits);
    let date_str = date.format("%y%m%d").to_string();

    template
        .pattern()
        .replace("{number}", &number_str)
        .replace("{ext}", extension)
        .replace("{prefix}", prefix)
        .replace("{date}", &date_str)
}

/// Stops early if the numbering would run past `u64::MAX`.
pub fn generate_samples(
    template: RenameTemplate,
    prefix: &str,
    start: u64,
    digits: usize,
    extension: &str,
    count: usize,
) -> Vec<String> {
    (0..count as u64)
        .map_while(|offset| number_at(start, offset).ok())
        .map(|number| generate_filename(template, prefix, number, digits, extension))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, 6).expect("valid date")
    }

    #[test]
    fn sequential_pads_number() {
        let name = generate_filename(RenameTemplate::Sequential, "", 7, 3, "jpg");
        assert_eq!(name, "007.jpg");
    }

    #[test]
    fn prefixed_joins_with_underscore() {
        let name = generate_filename(RenameTemplate::from_id("prefixed"), "Trip", 1, 2, "png");
        assert_eq!(name, "Trip_01.png");
    }

    #[test]
    fn dated_uses_two_digit_year() {
        let name = generate_filename_on(RenameTemplate::Dated, "", 12, 3, "jpg", day());
        assert_eq!(name, "251006_012.jpg");
    }

    #[test]
    fn wide_numbers_are_not_truncated() {
        let name = generate_filename(RenameTemplate::Sequential, "", 1000, 3, "jpg");
        assert_eq!(name, "1000.jpg");
    }

    #[test]
    fn unknown_template_falls_back_to_sequential() {
        let template = RenameTemplate::from_id("no_such_template");
        assert_eq!(template, RenameTemplate::Sequential);
        assert_eq!(generate_filename(template, "x", 5, 2, "gif"), "05.gif");
    }

    #[test]
    fn legacy_identifiers_are_accepted() {
        assert_eq!(
            RenameTemplate::from_id("text_number"),
            RenameTemplate::Prefixed
        );
        assert_eq!(RenameTemplate::from_id("date_number"), RenameTemplate::Dated);
    }

    #[test]
    fn tokens_inside_prefix_are_not_expanded_again() {
        let name = generate_filename_on(RenameTemplate::Prefixed, "{number}", 3, 2, "jpg", day());
        assert_eq!(name, "{number}_03.jpg");

        let name = generate_filename_on(RenameTemplate::Sequential, "", 3, 2, "{prefix}", day());
        assert_eq!(name, "03.{prefix}");
    }

    #[test]
    fn samples_count_up_from_start() {
        let samples = generate_samples(RenameTemplate::Prefixed, "IMG", 9, 2, "jpg", 3);
        assert_eq!(samples, vec!["IMG_09.jpg", "IMG_10.jpg", "IMG_11.jpg"]);
    }

    #[test]
    fn settings_number_by_batch_index() {
        let settings = RenameSettings {
            template: RenameTemplate::Prefixed,
            prefix: "Trip".to_string(),
            start_number: 10,
            digits: 3,
            extension: TargetExtension::KeepOriginal,
        };
        assert_eq!(settings.filename_for(0, "png").as_deref(), Ok("Trip_010.png"));
        assert_eq!(settings.filename_for(5, "png").as_deref(), Ok("Trip_015.png"));
    }

    #[test]
    fn numbering_past_u64_max_is_an_error() {
        let settings = RenameSettings {
            start_number: u64::MAX,
            ..RenameSettings::default()
        };
        assert_eq!(settings.filename_for(0, "png"), Ok(format!("{}.png", u64::MAX)));
        assert_eq!(
            settings.filename_for(1, "png"),
            Err(NumberOverflow {
                start: u64::MAX,
                offset: 1
            })
        );

        let samples = generate_samples(RenameTemplate::Sequential, "", u64::MAX, 3, "jpg", 2);
        assert_eq!(samples, vec![format!("{}.jpg", u64::MAX)]);
    }

    #[test]
    fn target_extension_from_option() {
        assert_eq!(
            TargetExtension::from_option(Some(".JPG")),
            TargetExtension::Fixed("jpg".to_string())
        );
        assert_eq!(TargetExtension::from_option(Some("  ")), TargetExtension::KeepOriginal);
        assert_eq!(TargetExtension::from_option(None).resolve("png"), "png");
    }

    #[test]
    fn template_serializes_as_identifier() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            template: RenameTemplate,
        }

        let body = toml::to_string(&Wrapper {
            template: RenameTemplate::Dated,
        })
        .expect("serialize");
        assert_eq!(body.trim(), "template = \"dated\"");

        let parsed: Wrapper = toml::from_str("template = \"date_number\"").expect("parse");
        assert_eq!(parsed.template, RenameTemplate::Dated);
    }
}
