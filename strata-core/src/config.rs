//! Node configuration: a typed document stored as YAML (JSON parses too),
//! mutated only through validate-then-persist.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The identity this node acts as, including its signing key material.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub id: String,
    pub peername: String,
    /// Symmetric signing secret. Private: redacted on read by default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_secret: Option<String>,
    /// Ed25519 private key, PEM. Private: redacted on read by default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key_pem: Option<String>,
    /// Ed25519 public key, PEM. Safe to share.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key_pem: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    pub use_dscache: bool,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self { use_dscache: false }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub address: String,
    /// Request header the bridge reads the source-resolution hint from.
    pub source_header: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: "127.0.0.1:2503".to_string(),
            source_header: "x-strata-source".to_string(),
        }
    }
}

/// A named remote this node can push to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub name: String,
    pub address: String,
}

/// The whole node configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub profile: ProfileConfig,
    pub repo: RepoConfig,
    pub api: ApiConfig,
    pub remotes: Vec<RemoteConfig>,
}

impl Config {
    /// A standalone-node config with a symmetric signing key.
    pub fn default_with_profile(
        id: impl Into<String>,
        peername: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Self {
        Self {
            profile: ProfileConfig {
                id: id.into(),
                peername: peername.into(),
                key_secret: Some(key_secret.into()),
                private_key_pem: None,
                public_key_pem: None,
            },
            ..Self::default()
        }
    }

    /// Read a config file. YAML is canonical; JSON documents parse as well.
    pub fn load(path: &Path) -> Result<Config, Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::dependency(format!("reading config {}: {e}", path.display())))?;
        serde_yaml::from_str(&content)
            .map_err(|e| Error::bad_request(format!("parsing config {}: {e}", path.display())))
    }

    /// Write this config as YAML.
    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| Error::internal(format!("encoding config: {e}")))?;
        std::fs::write(path, content)
            .map_err(|e| Error::dependency(format!("writing config {}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.profile.id.is_empty() {
            return Err(Error::bad_request("config: profile.id may not be empty"));
        }
        if self.profile.peername.is_empty() {
            return Err(Error::bad_request("config: profile.peername may not be empty"));
        }
        if !self
            .profile
            .peername
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::bad_request(format!(
                "config: invalid peername {:?}",
                self.profile.peername
            )));
        }
        if self.profile.key_secret.is_none() && self.profile.private_key_pem.is_none() {
            return Err(Error::bad_request("config: profile has no signing key"));
        }
        if self.profile.private_key_pem.is_some() && self.profile.public_key_pem.is_none() {
            return Err(Error::bad_request(
                "config: private_key_pem requires public_key_pem",
            ));
        }
        if self.api.enabled && self.api.address.is_empty() {
            return Err(Error::bad_request("config: api.address may not be empty"));
        }
        if self.api.source_header.is_empty() {
            return Err(Error::bad_request(
                "config: api.source_header may not be empty",
            ));
        }
        let mut names: Vec<&str> = self.remotes.iter().map(|r| r.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.remotes.len() {
            return Err(Error::bad_request("config: remote names must be unique"));
        }
        if self.remotes.iter().any(|r| r.address.is_empty()) {
            return Err(Error::bad_request("config: remote address may not be empty"));
        }
        Ok(())
    }

    /// A copy with private key material stripped. Reads default to this
    /// form; callers opt in explicitly to see key material.
    pub fn redacted(&self) -> Config {
        let mut cfg = self.clone();
        cfg.profile.key_secret = None;
        cfg.profile.private_key_pem = None;
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        Config::default_with_profile("QmNode", "ada", "secret")
    }

    #[test]
    fn default_with_profile_validates() {
        valid().validate().unwrap();
    }

    #[test]
    fn missing_key_material_rejected() {
        let mut cfg = valid();
        cfg.profile.key_secret = None;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn bad_peername_rejected() {
        let mut cfg = valid();
        cfg.profile.peername = "not a name".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn duplicate_remote_names_rejected() {
        let mut cfg = valid();
        cfg.remotes = vec![
            RemoteConfig {
                name: "origin".to_string(),
                address: "http://a".to_string(),
            },
            RemoteConfig {
                name: "origin".to_string(),
                address: "http://b".to_string(),
            },
        ];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn redacted_strips_private_values() {
        let cfg = valid();
        let red = cfg.redacted();
        assert!(red.profile.key_secret.is_none());
        assert_eq!(red.profile.peername, "ada");
        // The original is untouched.
        assert!(cfg.profile.key_secret.is_some());
    }

    #[test]
    fn yaml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let cfg = valid();
        cfg.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn json_documents_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"profile": {"id": "QmNode", "peername": "ada", "key_secret": "s"}}"#,
        )
        .unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.profile.peername, "ada");
        assert_eq!(loaded.api.address, "127.0.0.1:2503");
    }
}
