//! server configuration: CLI flag parsing, the YAML document it points
//! at, and the `tracing` subscriber built from it.

pub mod cli {
    //! parse the single CLI flag

    use std::path::PathBuf;

    pub use clap::Parser;

    /// default path to the YAML config document
    pub static DEFAULT_CONFIG_PATH: &str = "config.yaml";

    #[derive(Parser, Debug, Clone, PartialEq, Eq)]
    #[clap(author, name = "dhcp-server", about, long_about = None)]
    /// parsed from argv; the server has exactly one flag
    pub struct Args {
        /// path to the YAML config document
        #[clap(short = 'c', long = "config", default_value = DEFAULT_CONFIG_PATH)]
        pub config_path: PathBuf,
    }
}

pub mod file {
    //! the YAML document itself

    use serde::{Deserialize, Serialize};

    /// default UDP port for the DHCPv4 listener
    pub const DEFAULT_DHCP_PORT: u16 = 67;
    /// default TCP port for the PXE/metrics HTTP server
    pub const DEFAULT_PXE_PORT: u16 = 8080;
    /// default log level
    pub fn default_log_level() -> String {
        "info".to_string()
    }
    /// default log format
    pub fn default_log_format() -> String {
        "text".to_string()
    }

    fn default_dhcp_port() -> u16 {
        DEFAULT_DHCP_PORT
    }

    fn default_pxe_port() -> u16 {
        DEFAULT_PXE_PORT
    }

    /// logging-related knobs, nested under the `log` key
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct LogConfig {
        /// one of `debug`, `info`, `warn`
        #[serde(default = "default_log_level")]
        pub level: String,
        /// one of `text`, `json`
        #[serde(default = "default_log_format")]
        pub format: String,
    }

    impl Default for LogConfig {
        fn default() -> Self {
            Self {
                level: default_log_level(),
                format: default_log_format(),
            }
        }
    }

    /// the parsed YAML config document (spec §6)
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct FileConfig {
        /// UDP DHCP listen port
        #[serde(default = "default_dhcp_port")]
        pub dhcp_port: u16,
        /// HTTP listen port for PXE + metrics
        #[serde(default = "default_pxe_port")]
        pub pxe_port: u16,
        #[serde(default)]
        pub log: LogConfig,
        /// address to present as DHCP option 54 (Server Identifier);
        /// falls back to the packet's `giaddr` for relayed flows when
        /// unset (spec §9 open question, resolved)
        #[serde(default)]
        pub server_identity: Option<String>,
    }

    impl FileConfig {
        /// load and parse a YAML document from `path`
        pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
            let raw = std::fs::read_to_string(path)
                .map_err(|err| anyhow::anyhow!("reading config {}: {err}", path.display()))?;
            let cfg: FileConfig = serde_yaml::from_str(&raw)
                .map_err(|err| anyhow::anyhow!("parsing config {}: {err}", path.display()))?;
            Ok(cfg)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn defaults_apply_when_keys_are_absent() {
            let cfg: FileConfig = serde_yaml::from_str("dhcpPort: 6700").unwrap();
            assert_eq!(cfg.dhcp_port, 6700);
            assert_eq!(cfg.pxe_port, DEFAULT_PXE_PORT);
            assert_eq!(cfg.log.level, "info");
            assert_eq!(cfg.log.format, "text");
            assert!(cfg.server_identity.is_none());
        }

        #[test]
        fn parses_full_document() {
            let yaml = "dhcpPort: 67\npxePort: 8080\nlog:\n  level: debug\n  format: json\nserverIdentity: \"10.0.0.1\"\n";
            let cfg: FileConfig = serde_yaml::from_str(yaml).unwrap();
            assert_eq!(cfg.dhcp_port, 67);
            assert_eq!(cfg.log.level, "debug");
            assert_eq!(cfg.log.format, "json");
            assert_eq!(cfg.server_identity.as_deref(), Some("10.0.0.1"));
        }
    }
}

pub mod trace {
    //! tracing subscriber construction

    use anyhow::Result;
    use tracing_subscriber::{
        filter::EnvFilter,
        fmt::{self, format::Format},
        prelude::__tracing_subscriber_SubscriberExt,
        util::SubscriberInitExt,
    };

    /// build and install the global tracing subscriber from the YAML
    /// `log.level`/`log.format` knobs
    pub fn init(level: &str, format: &str) -> Result<()> {
        let filter = EnvFilter::try_new(level)
            .or_else(|_| EnvFilter::try_new("info"))?
            .add_directive("kube=info".parse()?);

        match format {
            "json" => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().json())
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().event_format(Format::default()))
                    .init();
            }
        }
        Ok(())
    }
}

pub use file::FileConfig;
