use serde::{Deserialize, Serialize};

/// Configuration for the coordination core.
///
/// Holds the replicated-store endpoint conventions and the per-volume key
/// prefixes. This is a plain value the caller constructs and threads
/// through, not a process-wide static.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Store client endpoint port.
    pub client_port: u16,

    /// Store peer endpoint port.
    pub peer_port: u16,

    /// Bind address for both the client and peer endpoints.
    pub listen_interface: String,

    /// URL scheme used to build advertised endpoints.
    pub scheme: String,

    /// Fixed token identifying this deployment's store cluster.
    pub cluster_token: String,

    /// Per-operation deadline applied to every store call.
    pub request_timeout: std::time::Duration,

    /// Bootstrap's local-port poll interval.
    pub check_sleep: std::time::Duration,

    /// Key prefixes for the three per-volume keys. Must be mutually
    /// prefix-free: none of them may be a prefix of another.
    pub key_prefixes: KeyPrefixes,
}

/// The three per-volume key prefixes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPrefixes {
    pub state: String,
    pub gref: String,
    pub info: String,
}

impl Default for KeyPrefixes {
    fn default() -> Self {
        Self {
            state: "STATE:".to_string(),
            gref: "GREF:".to_string(),
            info: "INFO:".to_string(),
        }
    }
}

impl KeyPrefixes {
    /// Validates the mutual-prefix-freedom invariant. Returns the offending
    /// pair's description on violation.
    pub fn validate(&self) -> Result<(), String> {
        let all = [
            ("state", &self.state),
            ("gref", &self.gref),
            ("info", &self.info),
        ];
        for (name_a, a) in all {
            for (name_b, b) in all {
                if name_a != name_b && (a.starts_with(b.as_str()) || b.starts_with(a.as_str())) {
                    return Err(format!(
                        "key prefixes {name_a:?} ({a:?}) and {name_b:?} ({b:?}) are not mutually prefix-free"
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn state_key(&self, volume: &str) -> String {
        format!("{}{volume}", self.state)
    }

    pub fn gref_key(&self, volume: &str) -> String {
        format!("{}{volume}", self.gref)
    }

    pub fn info_key(&self, volume: &str) -> String {
        format!("{}{volume}", self.info)
    }

    /// Strips this prefix set's STATE prefix off a raw key, if present.
    pub fn strip_state(&self, key: &str) -> Option<String> {
        key.strip_prefix(self.state.as_str()).map(str::to_string)
    }

    /// Strips this prefix set's GREF prefix off a raw key, if present.
    pub fn strip_gref(&self, key: &str) -> Option<String> {
        key.strip_prefix(self.gref.as_str()).map(str::to_string)
    }

    /// Strips this prefix set's INFO prefix off a raw key, if present.
    pub fn strip_info(&self, key: &str) -> Option<String> {
        key.strip_prefix(self.info.as_str()).map(str::to_string)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_port: 2379,
            peer_port: 2380,
            listen_interface: "0.0.0.0".to_string(),
            scheme: "http://".to_string(),
            cluster_token: "clustervol-core-token".to_string(),
            request_timeout: std::time::Duration::from_secs(5),
            check_sleep: std::time::Duration::from_secs(1),
            key_prefixes: KeyPrefixes::default(),
        }
    }
}

impl Config {
    /// Loads configuration from a JSON file, falling back to defaults if
    /// the file does not exist.
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let config = match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?,
            Err(_) => Self::default(),
        };
        config
            .key_prefixes
            .validate()
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(config)
    }

    pub fn client_url(&self, address: &str) -> String {
        format!("{}{address}:{}", self.scheme, self.client_port)
    }

    pub fn peer_url(&self, address: &str) -> String {
        format!("{}{address}:{}", self.scheme, self.peer_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prefixes_are_mutually_prefix_free() {
        assert!(KeyPrefixes::default().validate().is_ok());
    }

    #[test]
    fn rejects_prefix_that_contains_another() {
        let bad = KeyPrefixes {
            state: "ST:".to_string(),
            gref: "ST:G:".to_string(),
            info: "INFO:".to_string(),
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn state_and_gref_key_formatting() {
        let p = KeyPrefixes::default();
        assert_eq!(p.state_key("vol1"), "STATE:vol1");
        assert_eq!(p.gref_key("vol1"), "GREF:vol1");
        assert_eq!(p.strip_state("STATE:vol1"), Some("vol1".to_string()));
        assert_eq!(p.strip_gref("GREF:vol1"), Some("vol1".to_string()));
        assert_eq!(p.strip_gref("STATE:vol1"), None);
    }

    #[test]
    fn load_missing_file_falls_back_to_default() {
        let cfg = Config::load("/nonexistent/path/config.json").unwrap();
        assert_eq!(cfg.client_port, 2379);
    }
}
