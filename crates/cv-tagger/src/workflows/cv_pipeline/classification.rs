//! Seven-field classification schema.
//!
//! Each field is either a value from its closed domain or the explicit `N/A` sentinel, so
//! consumers match exhaustively instead of comparing free-form strings. Mother tongue, school,
//! and field of study draw on vocabularies supplied as configuration.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::fmt::Write as _;
use std::path::Path;
use tracing::warn;

use super::error::PipelineError;

pub const NOT_AVAILABLE: &str = "N/A";

/// A classified field: a domain value or the `N/A` sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tag<T> {
    Known(T),
    NotAvailable,
}

impl<T: fmt::Display> Serialize for Tag<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<T: fmt::Display> fmt::Display for Tag<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Known(value) => value.fmt(f),
            Tag::NotAvailable => f.write_str(NOT_AVAILABLE),
        }
    }
}

macro_rules! closed_domain {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $label)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            pub const fn label(self) -> &'static str {
                match self {
                    $(Self::$variant => $label),+
                }
            }

            pub fn parse(raw: &str) -> Option<Self> {
                let raw = raw.trim();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|candidate| candidate.label().eq_ignore_ascii_case(raw))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        }
    };
}

closed_domain!(Gender {
    Male => "Male",
    Female => "Female",
});

closed_domain!(
    /// Highest completed or ongoing programme, strongest first.
    EducationLevel {
        ManaMa => "ManaMa",
        Master => "Master",
        BanaBa => "BanaBa",
        AcademicBachelor => "Academic Bachelor",
        ProfessionalBachelor => "Professional Bachelor",
        SecondaryLevel => "Secondary level",
    }
);

closed_domain!(ExperienceBand {
    UpToHalfYear => "0-0.5y exp",
    HalfToOneYear => "0.5-1y exp",
    OneToOneAndHalf => "1-1.5y exp",
    OneAndHalfToTwo => "1.5-2y exp",
    TwoToTwoAndHalf => "2-2.5y exp",
    TwoAndHalfToThree => "2.5-3y exp",
    ThreeToThreeAndHalf => "3-3.5y exp",
    ThreeAndHalfToFour => "3.5-4y exp",
    OverFour => ">4y exp",
    OverFive => ">5y exp",
    SixToTen => ">6y-10 exp",
    TenToFifteen => "10y-15y exp",
    FifteenToTwenty => "15y-20y exp",
    OverTwenty => ">20y exp",
});

/// Expected or actual graduation year of the latest programme, rendered as `GY 2024`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GraduationYear(pub u16);

impl GraduationYear {
    pub fn parse(raw: &str) -> Option<Self> {
        let digits = raw.trim().strip_prefix("GY")?.trim();
        if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok().map(Self)
    }
}

impl fmt::Display for GraduationYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GY {}", self.0)
    }
}

macro_rules! vocabulary_term {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

vocabulary_term!(Language);
vocabulary_term!(School);
vocabulary_term!(FieldOfStudy);

/// The seven fields, in report and tag order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassificationField {
    Gender,
    EducationLevel,
    GraduationYear,
    Experience,
    MotherTongue,
    School,
    FieldOfStudy,
}

impl ClassificationField {
    pub const ALL: [Self; 7] = [
        Self::Gender,
        Self::EducationLevel,
        Self::GraduationYear,
        Self::Experience,
        Self::MotherTongue,
        Self::School,
        Self::FieldOfStudy,
    ];

    /// Key used in the classifier's JSON output.
    pub const fn key(self) -> &'static str {
        match self {
            Self::Gender => "gender",
            Self::EducationLevel => "education_level",
            Self::GraduationYear => "graduation_year",
            Self::Experience => "experience",
            Self::MotherTongue => "mother_tong",
            Self::School => "school",
            Self::FieldOfStudy => "field_of_study",
        }
    }

    pub const fn header(self) -> &'static str {
        match self {
            Self::Gender => "Gender",
            Self::EducationLevel => "Education Level",
            Self::GraduationYear => "Graduation Year",
            Self::Experience => "Experience",
            Self::MotherTongue => "Mother Tongue",
            Self::School => "School",
            Self::FieldOfStudy => "Field of Study",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassificationResult {
    pub gender: Tag<Gender>,
    pub education_level: Tag<EducationLevel>,
    pub graduation_year: Tag<GraduationYear>,
    pub experience: Tag<ExperienceBand>,
    pub mother_tongue: Tag<Language>,
    pub school: Tag<School>,
    pub field_of_study: Tag<FieldOfStudy>,
}

impl ClassificationResult {
    pub fn label(&self, field: ClassificationField) -> String {
        match field {
            ClassificationField::Gender => self.gender.to_string(),
            ClassificationField::EducationLevel => self.education_level.to_string(),
            ClassificationField::GraduationYear => self.graduation_year.to_string(),
            ClassificationField::Experience => self.experience.to_string(),
            ClassificationField::MotherTongue => self.mother_tongue.to_string(),
            ClassificationField::School => self.school.to_string(),
            ClassificationField::FieldOfStudy => self.field_of_study.to_string(),
        }
    }

    pub fn labels(&self) -> [String; 7] {
        ClassificationField::ALL.map(|field| self.label(field))
    }

    /// Tags to push back to the tracking service: every field that is not `N/A`.
    pub fn tags(&self) -> Vec<String> {
        self.labels()
            .into_iter()
            .filter(|label| label != NOT_AVAILABLE)
            .collect()
    }
}

/// Instruction text handed to the classifier alongside each CV.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionSet {
    pub text: String,
}

impl InstructionSet {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

const DEFAULT_LANGUAGES: &[&str] = &[
    "Dutch",
    "French",
    "Spanish",
    "Italian",
    "Portuguese",
    "Romanian",
    "English",
    "German",
    "Swedish",
    "Danish",
    "Norwegian",
    "Russian",
    "Polish",
    "Ukrainian",
    "Czech",
    "Slovak",
    "Mandarin Chinese",
    "Japanese",
    "Korean",
    "Vietnamese",
    "Indonesian",
    "Thai",
    "Arabic",
    "Icelandic",
    "Finnish",
    "Lithuanian",
    "Latvian",
    "Turkish",
    "Persian (Farsi)",
    "Greek",
    "Hebrew",
    "Telugu",
    "Albanian",
    "Tagalog",
    "Chinese",
    "Bulgarian",
    "Amazigh",
    "Nepali",
    "Bangla",
    "Kazakh",
    "Catalan",
    "Azerbaijani",
    "Afrikaans",
    "Punjabi",
    "Kabyle",
];

/// Vocabularies for the open-ended fields. An empty vocabulary accepts any non-empty value.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClassificationSchema {
    #[serde(default = "default_languages")]
    pub languages: BTreeSet<String>,
    #[serde(default)]
    pub schools: BTreeSet<String>,
    #[serde(default)]
    pub fields_of_study: BTreeSet<String>,
}

fn default_languages() -> BTreeSet<String> {
    DEFAULT_LANGUAGES.iter().map(|s| s.to_string()).collect()
}

impl Default for ClassificationSchema {
    fn default() -> Self {
        Self {
            languages: default_languages(),
            schools: BTreeSet::new(),
            fields_of_study: BTreeSet::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("failed to read classification schema: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid classification schema: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClassificationSchema {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, SchemaError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Builds the classifier instructions: the required keys and each field's allowed values.
    pub fn instruction_set(&self) -> InstructionSet {
        let mut text = String::from(
            "Extract exactly the following fields from the CV and answer with a single JSON object. \
             Use \"N/A\" for any field that cannot be determined with confidence.\n",
        );

        let closed = |labels: Vec<&'static str>| labels.join(", ");
        for field in ClassificationField::ALL {
            let allowed = match field {
                ClassificationField::Gender => {
                    closed(Gender::ALL.iter().map(|g| g.label()).collect())
                }
                ClassificationField::EducationLevel => {
                    closed(EducationLevel::ALL.iter().map(|e| e.label()).collect())
                }
                ClassificationField::GraduationYear => {
                    "\"GY\" followed by a four-digit year, e.g. GY 2024".to_string()
                }
                ClassificationField::Experience => {
                    closed(ExperienceBand::ALL.iter().map(|e| e.label()).collect())
                }
                ClassificationField::MotherTongue => describe_vocabulary(&self.languages),
                ClassificationField::School => describe_vocabulary(&self.schools),
                ClassificationField::FieldOfStudy => describe_vocabulary(&self.fields_of_study),
            };
            // Writing into a String cannot fail.
            let _ = writeln!(text, "- {}: {}", field.key(), allowed);
        }

        InstructionSet::new(text)
    }

    /// Parses raw classifier output into a validated result.
    ///
    /// Non-JSON output or a missing key is a validation failure; a value outside its field's
    /// domain is logged and recorded as `N/A`.
    pub fn parse_response(&self, raw: &str) -> Result<ClassificationResult, PipelineError> {
        let payload = strip_code_fence(raw);
        let value: Value = serde_json::from_str(payload).map_err(|err| {
            PipelineError::Validation(format!("classifier output is not JSON: {err}"))
        })?;
        let object = value.as_object().ok_or_else(|| {
            PipelineError::Validation("classifier output is not a JSON object".to_string())
        })?;

        Ok(ClassificationResult {
            gender: field_tag(object, ClassificationField::Gender, Gender::parse)?,
            education_level: field_tag(
                object,
                ClassificationField::EducationLevel,
                EducationLevel::parse,
            )?,
            graduation_year: field_tag(
                object,
                ClassificationField::GraduationYear,
                GraduationYear::parse,
            )?,
            experience: field_tag(object, ClassificationField::Experience, ExperienceBand::parse)?,
            mother_tongue: field_tag(object, ClassificationField::MotherTongue, |raw| {
                lookup(&self.languages, raw).map(Language)
            })?,
            school: field_tag(object, ClassificationField::School, |raw| {
                lookup(&self.schools, raw).map(School)
            })?,
            field_of_study: field_tag(object, ClassificationField::FieldOfStudy, |raw| {
                lookup(&self.fields_of_study, raw).map(FieldOfStudy)
            })?,
        })
    }
}

fn describe_vocabulary(vocabulary: &BTreeSet<String>) -> String {
    if vocabulary.is_empty() {
        "free text".to_string()
    } else {
        vocabulary
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Canonical spelling of `raw` in the vocabulary, compared case-insensitively.
fn lookup(vocabulary: &BTreeSet<String>, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if vocabulary.is_empty() {
        return Some(raw.to_string());
    }
    vocabulary
        .iter()
        .find(|term| term.eq_ignore_ascii_case(raw))
        .cloned()
}

fn field_tag<T>(
    object: &Map<String, Value>,
    field: ClassificationField,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Tag<T>, PipelineError> {
    let value = object.get(field.key()).ok_or_else(|| {
        PipelineError::Validation(format!("classifier output is missing '{}'", field.key()))
    })?;

    let raw = match value {
        Value::Null => return Ok(Tag::NotAvailable),
        Value::String(raw) => raw.trim().to_string(),
        Value::Number(number) => number.to_string(),
        other => {
            return Err(PipelineError::Validation(format!(
                "'{}' must be a string, got {other}",
                field.key()
            )))
        }
    };

    if raw.is_empty() || raw.eq_ignore_ascii_case(NOT_AVAILABLE) {
        return Ok(Tag::NotAvailable);
    }

    match parse(&raw) {
        Some(parsed) => Ok(Tag::Known(parsed)),
        None => {
            warn!(field = field.key(), value = %raw, "value outside allowed domain, recording N/A");
            Ok(Tag::NotAvailable)
        }
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    match trimmed.strip_prefix("```") {
        Some(rest) => {
            let rest = rest.strip_prefix("json").unwrap_or(rest);
            rest.strip_suffix("```").unwrap_or(rest).trim()
        }
        None => trimmed,
    }
}
