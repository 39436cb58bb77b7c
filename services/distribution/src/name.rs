//! Repository names, tags and manifest references

use std::fmt;
use std::str::FromStr;

use camino::Utf8PathBuf;

use crate::digest::{Digest, InvalidDigest};

const MAX_REPOSITORY_LEN: usize = 255;
const MAX_TAG_LEN: usize = 128;

/// A validated repository name such as `library/nginx`.
///
/// Each `/`-separated component matches `[a-z0-9]+((\.|_|__|-+)[a-z0-9]+)*`,
/// so no component can start with `_`. Storage keys use `_`-prefixed
/// components below the repository to keep namespaces apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Repository(String);

impl Repository {
    /// The name as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Storage prefix for objects of one kind in this repository, e.g. `library/nginx/_tags`.
    pub(crate) fn key(&self, kind: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.0).join(kind)
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A name that does not follow the repository or tag grammar.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid name: {0:?}")]
pub struct InvalidName(pub String);

impl FromStr for Repository {
    type Err = InvalidName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.len() > MAX_REPOSITORY_LEN || !s.split('/').all(valid_component) {
            return Err(InvalidName(s.to_owned()));
        }
        Ok(Self(s.to_owned()))
    }
}

fn valid_component(component: &str) -> bool {
    let bytes = component.as_bytes();
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();

    let (Some(&first), Some(&last)) = (bytes.first(), bytes.last()) else {
        return false;
    };
    if !alnum(first) || !alnum(last) {
        return false;
    }

    // Separators between alphanumeric runs: ".", "_", "__" or one or more "-".
    let mut i = 0;
    while i < bytes.len() {
        if alnum(bytes[i]) {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && !alnum(bytes[i]) {
            i += 1;
        }
        match &bytes[start..i] {
            b"." | b"_" | b"__" => {}
            sep if sep.iter().all(|&b| b == b'-') => {}
            _ => return false,
        }
    }
    true
}

/// A validated tag name, `[A-Za-z0-9_][A-Za-z0-9._-]{0,127}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(String);

impl Tag {
    /// The tag as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Tag {
    type Err = InvalidName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let word = |b: &u8| b.is_ascii_alphanumeric() || *b == b'_';
        let valid = match s.as_bytes() {
            [first, rest @ ..] => {
                s.len() <= MAX_TAG_LEN
                    && word(first)
                    && rest.iter().all(|b| word(b) || matches!(*b, b'.' | b'-'))
            }
            [] => false,
        };
        if valid {
            Ok(Self(s.to_owned()))
        } else {
            Err(InvalidName(s.to_owned()))
        }
    }
}

/// The `<reference>` of a manifest route: a digest or a tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// `sha256:<hex>`
    Digest(Digest),
    /// A tag name.
    Tag(Tag),
}

/// Why a manifest reference could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidReference {
    /// Looked like a digest but was not a canonical one.
    #[error(transparent)]
    Digest(#[from] InvalidDigest),
    /// Neither a digest nor a valid tag.
    #[error(transparent)]
    Name(#[from] InvalidName),
}

impl FromStr for Reference {
    type Err = InvalidReference;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with("sha256:") {
            Ok(Reference::Digest(s.parse()?))
        } else if s.contains(':') {
            Err(InvalidName(s.to_owned()).into())
        } else {
            Ok(Reference::Tag(s.parse()?))
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Digest(digest) => fmt::Display::fmt(digest, f),
            Reference::Tag(tag) => fmt::Display::fmt(tag, f),
        }
    }
}
