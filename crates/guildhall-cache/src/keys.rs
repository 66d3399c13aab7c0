//! Deterministic cache key namespace.
//!
//! ## Key Format
//!
//! `v1:{category}:{identifier}[:{suffix}]`, e.g. `v1:clan:77:members`.
//!
//! The version prefix lets a format change invalidate every old entry by
//! bumping [`KEY_VERSION`]: old keys are never matched again and age out on
//! their own TTL.

use std::fmt;
use std::str::FromStr;

use crate::error::KeyError;

/// Current key format version.
pub const KEY_VERSION: &str = "v1";

/// Segment separator.
pub const SEPARATOR: char = ':';

/// Suffix segment under which cached HTTP responses of an entity live,
/// e.g. `v1:clan:77:route:/clans/77`.
pub const ROUTE_SEGMENT: &str = "route";

/// Registered key categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheCategory {
    User,
    Clan,
    Federation,
    Mission,
    Stats,
    Session,
    Chat,
    Voice,
    Config,
    Lock,
}

impl CacheCategory {
    pub const ALL: [CacheCategory; 10] = [
        CacheCategory::User,
        CacheCategory::Clan,
        CacheCategory::Federation,
        CacheCategory::Mission,
        CacheCategory::Stats,
        CacheCategory::Session,
        CacheCategory::Chat,
        CacheCategory::Voice,
        CacheCategory::Config,
        CacheCategory::Lock,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheCategory::User => "user",
            CacheCategory::Clan => "clan",
            CacheCategory::Federation => "federation",
            CacheCategory::Mission => "mission",
            CacheCategory::Stats => "stats",
            CacheCategory::Session => "session",
            CacheCategory::Chat => "chat",
            CacheCategory::Voice => "voice",
            CacheCategory::Config => "config",
            CacheCategory::Lock => "lock",
        }
    }
}

impl fmt::Display for CacheCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheCategory {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CacheCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| KeyError::UnknownCategory(s.to_string()))
    }
}

/// A validated cache key in the current namespace version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    category: CacheCategory,
    identifier: String,
    suffix: Option<String>,
}

impl CacheKey {
    /// Build a key, rejecting empty identifiers and identifiers that would
    /// break segment parsing.
    pub fn new(category: CacheCategory, identifier: impl Into<String>) -> Result<Self, KeyError> {
        let identifier = identifier.into();
        if identifier.is_empty() {
            return Err(KeyError::Empty);
        }
        if identifier.contains(SEPARATOR) {
            return Err(KeyError::ContainsSeparator(identifier));
        }
        if is_pattern(&identifier) {
            return Err(KeyError::ContainsGlob(identifier));
        }
        Ok(Self {
            category,
            identifier,
            suffix: None,
        })
    }

    pub fn user(id: impl Into<String>) -> Result<Self, KeyError> {
        Self::new(CacheCategory::User, id)
    }

    pub fn clan(id: impl Into<String>) -> Result<Self, KeyError> {
        Self::new(CacheCategory::Clan, id)
    }

    pub fn federation(id: impl Into<String>) -> Result<Self, KeyError> {
        Self::new(CacheCategory::Federation, id)
    }

    pub fn mission(id: impl Into<String>) -> Result<Self, KeyError> {
        Self::new(CacheCategory::Mission, id)
    }

    pub fn stats(scope: impl Into<String>) -> Result<Self, KeyError> {
        Self::new(CacheCategory::Stats, scope)
    }

    pub fn session(id: impl Into<String>) -> Result<Self, KeyError> {
        Self::new(CacheCategory::Session, id)
    }

    pub fn chat(id: impl Into<String>) -> Result<Self, KeyError> {
        Self::new(CacheCategory::Chat, id)
    }

    pub fn voice(id: impl Into<String>) -> Result<Self, KeyError> {
        Self::new(CacheCategory::Voice, id)
    }

    pub fn config(name: impl Into<String>) -> Result<Self, KeyError> {
        Self::new(CacheCategory::Config, name)
    }

    /// Key used by [`crate::lock::CacheLock`]. The engine itself never locks.
    pub fn lock(name: impl Into<String>) -> Result<Self, KeyError> {
        Self::new(CacheCategory::Lock, name)
    }

    /// Attach a suffix. Suffixes may contain the separator.
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        let suffix = suffix.into();
        self.suffix = (!suffix.is_empty()).then_some(suffix);
        self
    }

    /// `{key}:route:{path}` for a cached response about this entity. Glob
    /// metacharacters in `path` are escaped, so the result is never taken
    /// for a pattern.
    pub fn route(self, path: &str) -> Self {
        let suffix = format!("{ROUTE_SEGMENT}{SEPARATOR}{}", escape_glob(path));
        self.with_suffix(suffix)
    }

    pub fn category(&self) -> CacheCategory {
        self.category
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn suffix(&self) -> Option<&str> {
        self.suffix.as_deref()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{KEY_VERSION}:{}:{}", self.category, self.identifier)?;
        if let Some(suffix) = &self.suffix {
            write!(f, ":{suffix}")?;
        }
        Ok(())
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<ParsedKey> for CacheKey {
    type Error = KeyError;

    fn try_from(parsed: ParsedKey) -> Result<Self, Self::Error> {
        let category = parsed.category.parse()?;
        let key = CacheKey::new(category, parsed.identifier)?;
        Ok(match parsed.suffix {
            Some(suffix) => key.with_suffix(suffix),
            None => key,
        })
    }
}

/// Raw segments of a key string. The version and category are not checked,
/// see [`is_valid_key`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey {
    pub version: String,
    pub category: String,
    pub identifier: String,
    pub suffix: Option<String>,
}

/// Split a key into its segments. Everything after the identifier is joined
/// back into the suffix.
pub fn parse_key(key: &str) -> Result<ParsedKey, KeyError> {
    let mut parts = key.splitn(4, SEPARATOR);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(version), Some(category), Some(identifier)) => Ok(ParsedKey {
            version: version.to_string(),
            category: category.to_string(),
            identifier: identifier.to_string(),
            suffix: parts.next().map(str::to_string),
        }),
        _ => Err(KeyError::TooFewSegments(key.to_string())),
    }
}

/// True iff the key belongs to the current version and a registered category
/// and has a non-empty identifier.
pub fn is_valid_key(key: &str) -> bool {
    match parse_key(key) {
        Ok(parsed) => {
            parsed.version == KEY_VERSION
                && parsed.category.parse::<CacheCategory>().is_ok()
                && !parsed.identifier.is_empty()
        }
        Err(_) => false,
    }
}

/// Whether a string holds a Redis glob wildcard.
pub fn is_pattern(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

/// Percent-escape the characters Redis globs treat specially (and `%`
/// itself, so the mapping stays reversible).
pub fn escape_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            '*' => out.push_str("%2A"),
            '?' => out.push_str("%3F"),
            '[' => out.push_str("%5B"),
            ']' => out.push_str("%5D"),
            '\\' => out.push_str("%5C"),
            c => out.push(c),
        }
    }
    out
}

/// Pattern builders for bulk operations.
pub struct KeyPattern;

impl KeyPattern {
    /// `v1:{category}:{glob}`
    pub fn new(category: CacheCategory, glob: &str) -> String {
        format!("{KEY_VERSION}:{category}:{glob}")
    }

    /// Every key of a category.
    pub fn category(category: CacheCategory) -> String {
        Self::new(category, "*")
    }

    /// Every cached response stored under `key` via [`CacheKey::route`].
    pub fn routes(key: &CacheKey) -> String {
        format!("{key}{SEPARATOR}{ROUTE_SEGMENT}{SEPARATOR}*")
    }

    /// Every key in the active namespace version.
    pub fn namespace() -> String {
        format!("{KEY_VERSION}:*")
    }

    /// Whether a pattern is scoped to the active namespace version.
    pub fn is_in_namespace(pattern: &str) -> bool {
        pattern
            .strip_prefix(KEY_VERSION)
            .is_some_and(|rest| rest.starts_with(SEPARATOR))
    }
}
