//! Stored-name generation.

use std::fmt::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;
use uuid::Uuid;

use zipline_core::config::{FileNameFormat, FilesConfig};

const FALLBACK_DATE_FORMAT: &str = "%Y-%m-%d_%H:%M:%S";

const ADJECTIVES: &[&str] = &[
    "able", "agile", "amber", "ample", "azure", "bold", "brave", "brief", "bright", "brisk",
    "calm", "clever", "cosmic", "crisp", "curly", "dapper", "daring", "deep", "eager", "early",
    "fancy", "fast", "fierce", "fluffy", "frosty", "gentle", "giant", "glad", "golden", "grand",
    "happy", "hardy", "hasty", "honest", "humble", "icy", "jolly", "keen", "kind", "lively",
    "lucky", "mellow", "mighty", "misty", "modest", "noble", "odd", "plucky", "polite", "proud",
    "quick", "quiet", "rapid", "rare", "rosy", "rusty", "shiny", "silent", "silly", "sleepy",
    "smart", "snowy", "solid", "spicy", "steady", "stormy", "sunny", "swift", "tidy", "tiny",
    "vast", "vivid", "warm", "wild", "wise", "witty", "young", "zany", "zesty",
];

const ANIMALS: &[&str] = &[
    "aardvark", "albatross", "alpaca", "badger", "beaver", "bison", "bobcat", "camel", "cheetah",
    "cobra", "condor", "cougar", "coyote", "crane", "dingo", "dolphin", "eagle", "falcon",
    "ferret", "finch", "gazelle", "gecko", "gibbon", "giraffe", "heron", "hyena", "ibis",
    "iguana", "impala", "jackal", "jaguar", "koala", "lemur", "leopard", "llama", "lynx",
    "marmot", "meerkat", "mongoose", "moose", "narwhal", "ocelot", "octopus", "orca", "osprey",
    "otter", "panda", "panther", "pelican", "penguin", "puffin", "quail", "raccoon", "raven",
    "salamander", "seal", "sloth", "sparrow", "squid", "stork", "tapir", "tiger", "toucan",
    "turtle", "vulture", "walrus", "weasel", "wombat", "yak", "zebra",
];

/// `len` random characters from `[A-Za-z0-9]`.
pub fn random_characters(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// `count` adjectives and an animal joined by `separator`.
pub fn random_words(count: usize, separator: &str) -> String {
    let mut rng = rand::thread_rng();
    let mut words: Vec<&str> = (0..count)
        .filter_map(|_| ADJECTIVES.choose(&mut rng).copied())
        .collect();
    if let Some(animal) = ANIMALS.choose(&mut rng) {
        words.push(animal);
    }
    words.join(separator)
}

/// Extension of `filename` with its leading dot, or an empty string.
pub fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default()
}

/// `filename` without its extension.
pub fn stem_of(filename: &str) -> &str {
    let ext = extension_of(filename);
    filename.strip_suffix(ext.as_str()).unwrap_or(filename)
}

/// Base name (no extension) for `format`.
///
/// `original` is the client file name and is only read by
/// [`FileNameFormat::Name`].
pub fn generate_base_name(
    format: FileNameFormat,
    original: &str,
    config: &FilesConfig,
    now: DateTime<Utc>,
) -> String {
    match format {
        FileNameFormat::Random => random_characters(config.length),
        FileNameFormat::Uuid => Uuid::new_v4().to_string(),
        FileNameFormat::Date => {
            let mut name = String::new();
            // Display fails on unknown specifiers instead of producing text.
            if write!(name, "{}", now.format(&config.default_date_format)).is_err() {
                name = now.format(FALLBACK_DATE_FORMAT).to_string();
            }
            name
        }
        FileNameFormat::Name => stem_of(original).to_string(),
        FileNameFormat::RandomWords | FileNameFormat::Gfycat => random_words(
            config.random_words_num_adjectives,
            &config.random_words_separator,
        ),
    }
}

/// Whether `format` yields names that can repeat and need a collision check.
pub fn is_deterministic(format: FileNameFormat) -> bool {
    matches!(format, FileNameFormat::Name)
}

/// Whether `name` is usable as a stored name and content-store key.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
        && name.chars().all(|c| !c.is_control())
}
