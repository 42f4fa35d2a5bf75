//! Layered configuration helpers shared by the CloudCalc binaries.
//!
//! Precedence: built-in defaults, then an optional YAML file, then
//! `CLOUDCALC__SECTION__KEY` environment variables. CLI flags are applied
//! by each binary on top of the extracted value.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Environment variable prefix; `__` separates nested keys.
pub const ENV_PREFIX: &str = "CLOUDCALC__";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file does not exist: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("no RPC listen address: set server.grpc_endpoint, --grpc-endpoint or PORT")]
    MissingRpcAddress,

    #[error("no calculator endpoint: set probe.grpc_endpoint or --grpc-endpoint")]
    MissingServerEndpoint,

    #[error("invalid listen address '{addr}': {reason}")]
    InvalidListenAddress { addr: String, reason: String },

    #[error("configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),
}

/// Extract `T` from defaults, the optional YAML file and the environment.
///
/// # Errors
/// Fails if `config_path` does not point at a file or a layer does not
/// deserialize into `T`.
pub fn load_layered<T>(config_path: Option<&Path>) -> Result<T, ConfigError>
where
    T: Serialize + DeserializeOwned + Default,
{
    let mut figment = Figment::from(Serialized::defaults(T::default()));

    if let Some(path) = config_path {
        if !path.is_file() {
            return Err(ConfigError::MissingFile(path.to_path_buf()));
        }
        figment = figment.merge(Yaml::file(path));
    }

    figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::Figment(Box::new(e)))
}

/// Parse a listen address, accepting the `:port` shorthand for all interfaces.
///
/// # Errors
/// Returns [`ConfigError::InvalidListenAddress`] if the address is not a
/// socket address.
pub fn normalize_listen_addr(addr: &str) -> Result<SocketAddr, ConfigError> {
    let trimmed = addr.trim();
    let invalid = |reason: String| ConfigError::InvalidListenAddress {
        addr: addr.to_owned(),
        reason,
    };

    if let Some(port) = trimmed.strip_prefix(':') {
        let port: u16 = port.parse().map_err(|e| invalid(format!("bad port: {e}")))?;
        return Ok(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)));
    }

    trimmed.parse().map_err(|e| invalid(format!("{e}")))
}

/// Resolve the RPC listen address: explicit setting first, then `PORT`.
///
/// # Errors
/// Returns [`ConfigError::MissingRpcAddress`] if neither is set, or
/// [`ConfigError::InvalidListenAddress`] if the chosen value is malformed.
pub fn resolve_rpc_addr(explicit: Option<&str>, port_env: Option<&str>) -> Result<SocketAddr, ConfigError> {
    let explicit = explicit.map(str::trim).filter(|s| !s.is_empty());
    let from_port = port_env
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|p| format!(":{p}"));

    match (explicit, from_port) {
        (Some(addr), _) => normalize_listen_addr(addr),
        (None, Some(addr)) => normalize_listen_addr(&addr),
        (None, None) => Err(ConfigError::MissingRpcAddress),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write as _;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    #[serde(default)]
    struct Sample {
        server: SampleServer,
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    #[serde(default)]
    struct SampleServer {
        grpc_endpoint: Option<String>,
        diagnostics_endpoint: String,
    }

    impl Default for SampleServer {
        fn default() -> Self {
            Self {
                grpc_endpoint: None,
                diagnostics_endpoint: ":9998".to_owned(),
            }
        }
    }

    #[test]
    fn test_normalize_port_shorthand() {
        assert_eq!(
            normalize_listen_addr(":50051").unwrap(),
            "0.0.0.0:50051".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            normalize_listen_addr("127.0.0.1:9998").unwrap(),
            "127.0.0.1:9998".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(matches!(
            normalize_listen_addr(":http"),
            Err(ConfigError::InvalidListenAddress { .. })
        ));
        assert!(normalize_listen_addr("localhost").is_err());
        assert!(normalize_listen_addr(":70000").is_err());
    }

    #[test]
    fn test_resolve_rpc_addr_precedence() {
        let explicit = resolve_rpc_addr(Some("127.0.0.1:1"), Some("8080")).unwrap();
        assert_eq!(explicit.port(), 1);

        let from_port = resolve_rpc_addr(None, Some("8080")).unwrap();
        assert_eq!(from_port, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());

        assert!(matches!(
            resolve_rpc_addr(Some(" "), None),
            Err(ConfigError::MissingRpcAddress)
        ));
    }

    #[test]
    fn test_load_defaults_only() {
        temp_env::with_var_unset("CLOUDCALC__SERVER__DIAGNOSTICS_ENDPOINT", || {
            let cfg: Sample = load_layered(None).unwrap();
            assert_eq!(cfg, Sample::default());
        });
    }

    #[test]
    fn test_yaml_then_env_precedence() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "server:\n  grpc_endpoint: \":50051\"\n  diagnostics_endpoint: \":7000\""
        )
        .unwrap();

        temp_env::with_var("CLOUDCALC__SERVER__DIAGNOSTICS_ENDPOINT", Some(":7001"), || {
            let cfg: Sample = load_layered(Some(file.path())).unwrap();
            assert_eq!(cfg.server.grpc_endpoint.as_deref(), Some(":50051"));
            assert_eq!(cfg.server.diagnostics_endpoint, ":7001");
        });
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = load_layered::<Sample>(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::MissingFile(_)));
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_bad_yaml_value_is_figment_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server:\n  diagnostics_endpoint: [1, 2]").unwrap();

        let err = load_layered::<Sample>(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Figment(_)));
    }
}
