//! Configuration types and loading logic.

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;
use tm_tracing::TracingConfig;

/// Top-level relay configuration.
///
/// Built once at startup and immutable for the process lifetime; every
/// in-flight request reads the same value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub relay: RouteConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub tracing: TracingConfig,
}

/// Server listen configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// How long in-flight requests may drain after a termination signal.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

/// Local routing configuration: which inbound paths are relayed.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    /// Path prefix that inbound requests must carry. Stripped before the
    /// remainder is appended to the upstream base URL.
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,

    /// Drop the inbound `authorization` header instead of forwarding it.
    #[serde(default = "default_true")]
    pub strip_authorization: bool,
}

/// Upstream endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Deadline covering connect, request write, and response-header
    /// receipt. The response body is bounded separately.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Idle deadline between body chunks once headers have arrived. A slow
    /// but live stream resets this on every chunk.
    #[serde(default = "default_idle_read_timeout")]
    pub idle_read_timeout_secs: u64,

    /// Idle connections kept pooled per upstream host.
    #[serde(default = "default_max_idle_per_host")]
    pub max_idle_per_host: usize,

    /// Concurrent in-flight dispatches; further dispatches wait up to the
    /// request deadline for a slot.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_listen_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_shutdown_grace() -> u64 {
    10
}

fn default_path_prefix() -> String {
    "/sss".to_string()
}

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    "https://taskmaster-mcp.fly.dev".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_idle_read_timeout() -> u64 {
    60
}

fn default_max_idle_per_host() -> usize {
    8
}

fn default_max_in_flight() -> usize {
    50
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            path_prefix: default_path_prefix(),
            strip_authorization: default_true(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            idle_read_timeout_secs: default_idle_read_timeout(),
            max_idle_per_host: default_max_idle_per_host(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from TOML file and environment variables.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (TM_ prefix, __ for nesting)
    /// 2. TOML config file
    /// 3. Defaults
    pub fn load(config_path: &str) -> anyhow::Result<Self> {
        let config: RelayConfig = Figment::new()
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("TM_").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot produce a working relay.
    fn validate(&self) -> anyhow::Result<()> {
        let prefix = &self.relay.path_prefix;
        if !prefix.starts_with('/') || prefix.trim_matches('/').is_empty() {
            anyhow::bail!("relay.path_prefix must name at least one path segment, got {prefix:?}");
        }
        let base = &self.upstream.base_url;
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            anyhow::bail!("upstream.base_url must be an absolute http(s) URL, got {base:?}");
        }
        if self.upstream.request_timeout_secs == 0 {
            anyhow::bail!("upstream.request_timeout_secs must be non-zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = RelayConfig::load("tm-relay.toml").expect("defaults should load");
            assert_eq!(config.server.listen_address, "0.0.0.0:8080");
            assert_eq!(config.relay.path_prefix, "/sss");
            assert!(config.relay.strip_authorization);
            assert_eq!(config.upstream.base_url, "https://taskmaster-mcp.fly.dev");
            assert_eq!(config.upstream.request_timeout_secs, 30);
            assert_eq!(config.tracing.service_name, "tm-relay");
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_toml() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "tm-relay.toml",
                r#"
                [relay]
                path_prefix = "/toml"

                [upstream]
                base_url = "https://from-toml.test"
                "#,
            )?;
            jail.set_env("TM_UPSTREAM__BASE_URL", "https://from-env.test");

            let config = RelayConfig::load("tm-relay.toml").expect("should load");
            assert_eq!(config.upstream.base_url, "https://from-env.test");
            assert_eq!(config.relay.path_prefix, "/toml");
            Ok(())
        });
    }

    #[test]
    fn test_rejects_prefix_without_leading_slash() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("TM_RELAY__PATH_PREFIX", "sss");
            assert!(RelayConfig::load("tm-relay.toml").is_err());
            Ok(())
        });
    }

    #[test]
    fn test_rejects_bare_slash_prefix() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("TM_RELAY__PATH_PREFIX", "/");
            assert!(RelayConfig::load("tm-relay.toml").is_err());
            Ok(())
        });
    }

    #[test]
    fn test_rejects_relative_upstream_url() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("TM_UPSTREAM__BASE_URL", "example.test/api");
            assert!(RelayConfig::load("tm-relay.toml").is_err());
            Ok(())
        });
    }
}
