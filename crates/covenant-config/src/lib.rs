// NodeConfig + ConfigSource: the narrow configuration seam.
//
//! This crate does not decide a config file format; what it owns is the
//! *shape* a node needs to start, fatal-on-missing. `ConfigSource` is the
//! trait seam an embedder plugs a real loader into; `StaticConfigSource`
//! covers the in-memory/test case, and the `toml-config` feature adds a
//! convenience loader for the common case, not a mandate.

use std::collections::HashMap;
use std::path::PathBuf;

use covenant_crypto::{RsaKeyPair, RsaPublicKeyHandle};
use covenant_log::NodeId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration incomplete: missing {0}")]
    Incomplete(String),
    #[error("malformed field {field}: {reason}")]
    Malformed { field: String, reason: String },
    #[error("failed to read configuration source: {0}")]
    Source(String),
}

/// Every field a node needs to start. A `ConfigSource` reports any missing
/// field as `ConfigError::Incomplete` rather than leaving it defaulted, since
/// this crate does not own the caller's process lifetime and cannot decide
/// on its behalf whether a missing field is fatal.
pub struct NodeConfig {
    pub log_path: PathBuf,
    pub journal_path: PathBuf,
    pub snapshot_dir: PathBuf,
    pub value_dir: PathBuf,

    pub my_node_id: NodeId,
    pub my_bucket_name: String,
    pub ip_port: String,
    pub daemon_port: String,

    pub aes_key: Vec<u8>,
    pub aws_access_key: String,
    pub aws_secret_key: String,

    pub node_bucket_map: HashMap<NodeId, String>,
    pub node_ip_map: HashMap<NodeId, String>,
    pub private_key: RsaKeyPair,
    pub public_keys: HashMap<NodeId, RsaPublicKeyHandle>,
}

/// Narrow seam over "however the embedder actually loads configuration" --
/// this crate has no opinion on the file format, only on the typed shape
/// configuration must land in.
pub trait ConfigSource {
    fn load(&self) -> Result<NodeConfig, ConfigError>;
}

/// Wraps an already-constructed `NodeConfig`; used by tests and by embedders
/// who assemble configuration from their own process (env vars, a
/// service-discovery call, whatever) and just need the trait object.
pub struct StaticConfigSource(NodeConfig);

impl StaticConfigSource {
    pub fn new(config: NodeConfig) -> Self {
        Self(config)
    }
}

impl ConfigSource for StaticConfigSource {
    fn load(&self) -> Result<NodeConfig, ConfigError> {
        Ok(NodeConfig {
            log_path: self.0.log_path.clone(),
            journal_path: self.0.journal_path.clone(),
            snapshot_dir: self.0.snapshot_dir.clone(),
            value_dir: self.0.value_dir.clone(),
            my_node_id: self.0.my_node_id.clone(),
            my_bucket_name: self.0.my_bucket_name.clone(),
            ip_port: self.0.ip_port.clone(),
            daemon_port: self.0.daemon_port.clone(),
            aes_key: self.0.aes_key.clone(),
            aws_access_key: self.0.aws_access_key.clone(),
            aws_secret_key: self.0.aws_secret_key.clone(),
            node_bucket_map: self.0.node_bucket_map.clone(),
            node_ip_map: self.0.node_ip_map.clone(),
            private_key: RsaKeyPair::from_base64url_pkcs1(
                &self.0.private_key.to_base64url_pkcs1().expect("key round-trips"),
            )
            .expect("key round-trips"),
            public_keys: self
                .0
                .public_keys
                .iter()
                .map(|(n, k)| {
                    (
                        n.clone(),
                        RsaPublicKeyHandle::from_base64url_pkix(
                            &k.to_base64url_pkix().expect("key round-trips"),
                        )
                        .expect("key round-trips"),
                    )
                })
                .collect(),
        })
    }
}

/// Generate a fresh node identity (private key + its own entry in the public
/// key map) for test fixtures and first-run bootstrapping. Temp-directory and
/// bucket-naming choices belong to the caller, not this crate.
pub fn generate_node_identity(node_id: NodeId) -> Result<(RsaKeyPair, RsaPublicKeyHandle, NodeId), ConfigError> {
    let pair = RsaKeyPair::generate(covenant_crypto::DEFAULT_RSA_BITS)
        .map_err(|e| ConfigError::Malformed {
            field: "private_key".into(),
            reason: e.to_string(),
        })?;
    let public = pair.public_key();
    Ok((pair, public, node_id))
}

#[cfg(feature = "toml-config")]
pub mod toml_source {
    //! Convenience TOML loader. Flat snake_case scalar fields, plus
    //! `node_bucket_map`/`node_ip_map`/`public_keys` tables and a
    //! base64url-pkcs1 `private_key` string.

    use super::*;
    use serde::Deserialize;
    use std::path::Path;

    #[derive(Deserialize)]
    struct RawConfig {
        log_path: Option<String>,
        journal_path: Option<String>,
        snapshot_dir: Option<String>,
        value_dir: Option<String>,
        my_node_id: Option<String>,
        my_bucket_name: Option<String>,
        ip_port: Option<String>,
        daemon_port: Option<String>,
        aes_key: Option<String>,
        aws_access_key: Option<String>,
        aws_secret_key: Option<String>,
        node_bucket_map: Option<HashMap<String, String>>,
        node_ip_map: Option<HashMap<String, String>>,
        private_key: Option<String>,
        public_keys: Option<HashMap<String, String>>,
    }

    pub struct TomlConfigSource {
        path: PathBuf,
    }

    impl TomlConfigSource {
        pub fn new(path: impl AsRef<Path>) -> Self {
            Self {
                path: path.as_ref().to_path_buf(),
            }
        }
    }

    fn require<T>(value: Option<T>, field: &str) -> Result<T, ConfigError> {
        value.ok_or_else(|| ConfigError::Incomplete(field.to_string()))
    }

    impl ConfigSource for TomlConfigSource {
        fn load(&self) -> Result<NodeConfig, ConfigError> {
            let text = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::Source(e.to_string()))?;
            let raw: RawConfig = toml::from_str(&text).map_err(|e| ConfigError::Source(e.to_string()))?;

            let aes_key_hex = require(raw.aes_key, "aes_key")?;
            let aes_key = hex::decode(&aes_key_hex).map_err(|e| ConfigError::Malformed {
                field: "aes_key".into(),
                reason: e.to_string(),
            })?;

            let private_key_b64 = require(raw.private_key, "private_key")?;
            let private_key =
                RsaKeyPair::from_base64url_pkcs1(&private_key_b64).map_err(|e| ConfigError::Malformed {
                    field: "private_key".into(),
                    reason: e.to_string(),
                })?;

            let mut public_keys = HashMap::new();
            for (node, encoded) in require(raw.public_keys, "public_keys")? {
                let key = RsaPublicKeyHandle::from_base64url_pkix(&encoded).map_err(|e| ConfigError::Malformed {
                    field: format!("public_keys[{node}]"),
                    reason: e.to_string(),
                })?;
                public_keys.insert(NodeId::new(node), key);
            }

            let node_bucket_map = require(raw.node_bucket_map, "node_bucket_map")?
                .into_iter()
                .map(|(k, v)| (NodeId::new(k), v))
                .collect();
            let node_ip_map = require(raw.node_ip_map, "node_ip_map")?
                .into_iter()
                .map(|(k, v)| (NodeId::new(k), v))
                .collect();

            Ok(NodeConfig {
                log_path: PathBuf::from(require(raw.log_path, "log_path")?),
                journal_path: PathBuf::from(require(raw.journal_path, "journal_path")?),
                snapshot_dir: PathBuf::from(require(raw.snapshot_dir, "snapshot_dir")?),
                value_dir: PathBuf::from(require(raw.value_dir, "value_dir")?),
                my_node_id: NodeId::new(require(raw.my_node_id, "my_node_id")?),
                my_bucket_name: require(raw.my_bucket_name, "my_bucket_name")?,
                ip_port: require(raw.ip_port, "ip_port")?,
                daemon_port: require(raw.daemon_port, "daemon_port")?,
                aes_key,
                aws_access_key: require(raw.aws_access_key, "aws_access_key")?,
                aws_secret_key: require(raw.aws_secret_key, "aws_secret_key")?,
                node_bucket_map,
                node_ip_map,
                private_key,
                public_keys,
            })
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn missing_field_is_incomplete_error() {
            let tmp = tempfile::tempdir().unwrap();
            let path = tmp.path().join("node.toml");
            std::fs::write(&path, "log_path = \"log.txt\"\n").unwrap();
            let source = TomlConfigSource::new(&path);
            assert!(matches!(source.load(), Err(ConfigError::Incomplete(_))));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> NodeConfig {
        let (pair, public, node_id) = generate_node_identity(NodeId::new("A")).unwrap();
        let mut public_keys = HashMap::new();
        public_keys.insert(node_id.clone(), public);
        NodeConfig {
            log_path: "log.txt".into(),
            journal_path: "journal.txt".into(),
            snapshot_dir: "snapshot".into(),
            value_dir: "values".into(),
            my_node_id: node_id,
            my_bucket_name: "bucket-a".into(),
            ip_port: "127.0.0.1:9000".into(),
            daemon_port: "9100".into(),
            aes_key: vec![0u8; 32],
            aws_access_key: "key".into(),
            aws_secret_key: "secret".into(),
            node_bucket_map: HashMap::new(),
            node_ip_map: HashMap::new(),
            private_key: pair,
            public_keys,
        }
    }

    #[test]
    fn static_config_source_round_trips() {
        let config = sample_config();
        let node_id = config.my_node_id.clone();
        let source = StaticConfigSource::new(config);
        let loaded = source.load().unwrap();
        assert_eq!(loaded.my_node_id, node_id);
        assert!(loaded.public_keys.contains_key(&node_id));
    }
}
