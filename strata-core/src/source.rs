use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Where reference resolution should look first.
///
/// An advisory hint, not a guarantee: implementations may fall back to other
/// sources when the preferred one has no answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Resolve against the local repository only.
    #[default]
    Local,
    /// Ask configured remotes before the local repository.
    Network,
    /// Resolve over the peer-to-peer network.
    P2p,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Local => "local",
            Source::Network => "network",
            Source::P2p => "p2p",
        }
    }

    /// Parse the string form used on the wire and the CLI.
    pub fn parse(s: &str) -> Result<Source, Error> {
        match s {
            "local" => Ok(Source::Local),
            "network" => Ok(Source::Network),
            "p2p" => Ok(Source::P2p),
            other => Err(Error::bad_request(format!(
                "unknown resolution source {other:?}, want one of local, network, p2p"
            ))),
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
