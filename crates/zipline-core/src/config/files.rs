//! File naming and upload policy configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How the stored name of an upload is generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileNameFormat {
    /// Random alphanumeric characters of `files.length`.
    Random,
    /// A v4 UUID.
    Uuid,
    /// The upload timestamp, formatted with `files.default_date_format`.
    Date,
    /// The original file name (without extension).
    Name,
    /// Adjectives followed by an animal, joined by the configured separator.
    RandomWords,
    /// Legacy alias of `random-words`.
    Gfycat,
}

impl FileNameFormat {
    /// Wire value used in the `x-zipline-format` header.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::Uuid => "uuid",
            Self::Date => "date",
            Self::Name => "name",
            Self::RandomWords => "random-words",
            Self::Gfycat => "gfycat",
        }
    }
}

impl fmt::Display for FileNameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileNameFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random" => Ok(Self::Random),
            "uuid" => Ok(Self::Uuid),
            "date" => Ok(Self::Date),
            "name" => Ok(Self::Name),
            "random-words" => Ok(Self::RandomWords),
            "gfycat" => Ok(Self::Gfycat),
            _ => Err(()),
        }
    }
}

/// Upload policy applied to both chunked and single-request uploads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    /// Route prefix for returned file URLs.
    #[serde(default = "default_route")]
    pub route: String,
    /// Length of generated random names.
    #[serde(default = "default_length")]
    pub length: usize,
    /// Name format used when the request does not choose one.
    #[serde(default = "default_format")]
    pub default_format: FileNameFormat,
    /// Extensions (with leading dot) that may not be uploaded.
    #[serde(default)]
    pub disabled_extensions: Vec<String>,
    /// Maximum total size of one upload, in bytes (default 100 MiB).
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,
    /// Expiry applied when the request sets none, as a human duration (`"7d"`).
    #[serde(default)]
    pub default_expiration: Option<String>,
    /// Whether clients may overwrite an existing name with `x-zipline-file-overwrite`.
    #[serde(default)]
    pub file_overwrite: bool,
    /// Replace `application/octet-stream` with a type guessed from the extension.
    #[serde(default)]
    pub assume_mimetypes: bool,
    /// chrono format string for the `date` name format.
    #[serde(default = "default_date_format")]
    pub default_date_format: String,
    /// Number of adjectives in `random-words` names.
    #[serde(default = "default_num_adjectives")]
    pub random_words_num_adjectives: usize,
    /// Separator between words in `random-words` names.
    #[serde(default = "default_separator")]
    pub random_words_separator: String,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            route: default_route(),
            length: default_length(),
            default_format: default_format(),
            disabled_extensions: Vec::new(),
            max_file_size_bytes: default_max_file_size(),
            default_expiration: None,
            file_overwrite: false,
            assume_mimetypes: false,
            default_date_format: default_date_format(),
            random_words_num_adjectives: default_num_adjectives(),
            random_words_separator: default_separator(),
        }
    }
}

fn default_route() -> String {
    "/u".to_string()
}

fn default_length() -> usize {
    6
}

fn default_format() -> FileNameFormat {
    FileNameFormat::Random
}

fn default_max_file_size() -> u64 {
    104_857_600 // 100 MiB
}

fn default_date_format() -> String {
    "%Y-%m-%d_%H:%M:%S".to_string()
}

fn default_num_adjectives() -> usize {
    3
}

fn default_separator() -> String {
    "-".to_string()
}
