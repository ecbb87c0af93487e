use std::net::SocketAddr;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:8080";
pub const DEFAULT_LOCAL_NAME: &str = "local";
pub const DEFAULT_REMOTE_NAME: &str = "remote";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub listen: SocketAddr,
    /// Name the local client goes by.
    pub local_name: String,
    /// Address the remote peer's session is stored under.
    pub remote_name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid listen address {value:?}: {reason}")]
    InvalidListen { value: String, reason: String },

    #[error("missing value for {0}")]
    MissingValue(String),
}

impl RelayConfig {
    /// Read flags from the process arguments, falling back to
    /// `POSTBOX_LISTEN`, `POSTBOX_LOCAL_NAME` and `POSTBOX_REMOTE_NAME`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::parse_args(std::env::args().skip(1), |key| std::env::var(key).ok())
    }

    pub fn parse_args(
        args: impl IntoIterator<Item = String>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut args = args.into_iter();
        let mut listen = None;
        let mut local_name = None;
        let mut remote_name = None;

        while let Some(arg) = args.next() {
            let slot = match arg.as_str() {
                "--listen" => &mut listen,
                "--local-name" => &mut local_name,
                "--remote-name" => &mut remote_name,
                _ => {
                    tracing::warn!(arg = %arg, "ignoring unknown argument");
                    continue;
                }
            };
            *slot = Some(args.next().ok_or(ConfigError::MissingValue(arg))?);
        }

        let listen = listen
            .or_else(|| env("POSTBOX_LISTEN"))
            .unwrap_or_else(|| DEFAULT_LISTEN.to_string());
        let listen = listen
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::InvalidListen {
                reason: e.to_string(),
                value: listen,
            })?;

        Ok(Self {
            listen,
            local_name: local_name
                .or_else(|| env("POSTBOX_LOCAL_NAME"))
                .unwrap_or_else(|| DEFAULT_LOCAL_NAME.to_string()),
            remote_name: remote_name
                .or_else(|| env("POSTBOX_REMOTE_NAME"))
                .unwrap_or_else(|| DEFAULT_REMOTE_NAME.to_string()),
        })
    }
}
