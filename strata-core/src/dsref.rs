//! Dataset references: the human-readable identifiers of the form
//! `username/name[@profileid][/path]` used throughout to name a dataset and
//! optionally a specific version.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A parsed dataset reference.
///
/// `profile_id` and `path` are optional and empty when absent. An unresolved
/// ref has a username and name only; resolution (see the loader subsystem)
/// fills in the profile id and the content-addressed version path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ref {
    pub username: String,
    #[serde(rename = "profileID", skip_serializing_if = "String::is_empty")]
    pub profile_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
}

impl Ref {
    /// Parse a reference string. Fails with a bad-request error when the
    /// string is not a well-formed reference.
    pub fn parse(s: &str) -> Result<Ref, Error> {
        try_parse(s).ok_or_else(|| Error::bad_request(format!("invalid dataset reference {s:?}")))
    }

    /// The `username/name` alias, ignoring version information.
    pub fn alias(&self) -> String {
        format!("{}/{}", self.username, self.name)
    }
}

impl std::fmt::Display for Ref {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.username, self.name)?;
        if !self.profile_id.is_empty() {
            write!(f, "@{}", self.profile_id)?;
        }
        if !self.path.is_empty() {
            f.write_str(&self.path)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Ref {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ref::parse(s)
    }
}

/// Whether `s` parses as a dataset reference. Filesystem paths, URLs, and
/// anything with characters outside the reference grammar all answer false.
pub fn is_ref_string(s: &str) -> bool {
    try_parse(s).is_some()
}

fn try_parse(s: &str) -> Option<Ref> {
    let (username, rest) = s.split_once('/')?;
    if !is_valid_identifier(username) {
        return None;
    }

    // Name runs until the optional @profileid or /path suffix.
    let name_end = rest
        .find(|c| c == '@' || c == '/')
        .unwrap_or(rest.len());
    let name = &rest[..name_end];
    if !is_valid_identifier(name) {
        return None;
    }

    let mut reference = Ref {
        username: username.to_string(),
        name: name.to_string(),
        ..Ref::default()
    };

    let mut suffix = &rest[name_end..];
    if let Some(after_at) = suffix.strip_prefix('@') {
        let id_end = after_at.find('/').unwrap_or(after_at.len());
        let profile_id = &after_at[..id_end];
        if profile_id.is_empty() || !profile_id.chars().all(char::is_alphanumeric) {
            return None;
        }
        reference.profile_id = profile_id.to_string();
        suffix = &after_at[id_end..];
    }

    if !suffix.is_empty() {
        // Version paths are content-addressed: /<store>/<hash>
        let mut parts = suffix.split('/').skip(1);
        let (store, hash) = (parts.next()?, parts.next()?);
        if parts.next().is_some()
            || store.is_empty()
            || hash.is_empty()
            || !store.chars().all(char::is_alphanumeric)
            || !hash.chars().all(char::is_alphanumeric)
        {
            return None;
        }
        reference.path = suffix.to_string();
    }

    Some(reference)
}

/// Usernames and dataset names: a letter, then letters, digits, `_` or `-`.
/// Notably no dots, which keeps filenames like `bar.csv` out of the grammar.
fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
