use std::fmt;
use std::fs::DirBuilder;
use std::net::SocketAddr;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Address replite clients dial.
///
/// Written as `tcp://host:port`, `unix:///path/to/socket`, or the bare
/// `host:port` form cluster members use to name each other. Configuration
/// files, environment variables and flags all take the same text.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(try_from = "String", into = "String")]
pub enum SocketEndpoint {
    /// Unix domain socket, for clients on the same host.
    Unix { path: Utf8PathBuf },
    /// TCP listener. IPv6 hosts are stored without brackets.
    Tcp { host: String, port: u16 },
}

impl SocketEndpoint {
    /// Builds a Unix domain socket endpoint.
    #[must_use]
    pub fn unix(path: impl Into<Utf8PathBuf>) -> Self {
        Self::Unix { path: path.into() }
    }

    /// Builds a TCP socket endpoint.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Socket path, for Unix endpoints only.
    #[must_use]
    pub fn unix_path(&self) -> Option<&Utf8Path> {
        match self {
            Self::Unix { path } => Some(path.as_ref()),
            Self::Tcp { .. } => None,
        }
    }

    /// Address the server reports to clients asking for the cluster leader.
    ///
    /// TCP endpoints report `host:port`. When the listener picked its own
    /// port (port 0), `bound` supplies the address actually in use. Unix
    /// endpoints report their `unix://` form.
    #[must_use]
    pub fn leader_address(&self, bound: Option<SocketAddr>) -> String {
        match (self, bound) {
            (Self::Tcp { .. }, Some(addr)) => addr.to_string(),
            (Self::Tcp { host, port }, None) => host_port(host, *port),
            (Self::Unix { .. }, _) => self.to_string(),
        }
    }

    /// Creates the directory holding a Unix socket, readable by the server's
    /// user only.
    ///
    /// A bare file name is refused so the socket never lands in whatever the
    /// working directory happens to be. TCP endpoints need nothing.
    pub fn prepare_filesystem(&self) -> Result<(), SocketPreparationError> {
        let Some(path) = self.unix_path() else {
            return Ok(());
        };
        let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) else {
            return Err(SocketPreparationError::MissingParent {
                path: path.to_path_buf(),
            });
        };

        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder
            .create(parent.as_std_path())
            .map_err(|source| SocketPreparationError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })
    }
}

fn host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

impl fmt::Display for SocketEndpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix { path } => write!(formatter, "unix://{path}"),
            Self::Tcp { host, port } => write!(formatter, "tcp://{}", host_port(host, *port)),
        }
    }
}

impl FromStr for SocketEndpoint {
    type Err = SocketParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if !input.contains("://") {
            return parse_host_port(input);
        }
        let url = Url::parse(input)?;
        match url.scheme() {
            "unix" => match url.path() {
                "" | "/" => Err(SocketParseError::MissingUnixPath(input.to_owned())),
                path => Ok(Self::unix(path)),
            },
            "tcp" => {
                let host = url
                    .host_str()
                    .filter(|host| !host.is_empty())
                    .ok_or_else(|| SocketParseError::MissingHost(input.to_owned()))?;
                let port = url
                    .port()
                    .ok_or_else(|| SocketParseError::MissingPort(input.to_owned()))?;
                Ok(Self::tcp(strip_brackets(host), port))
            }
            other => Err(SocketParseError::UnsupportedScheme(other.to_owned())),
        }
    }
}

fn parse_host_port(input: &str) -> Result<SocketEndpoint, SocketParseError> {
    let (host, port) = input
        .rsplit_once(':')
        .ok_or_else(|| SocketParseError::MissingPort(input.to_owned()))?;
    let host = strip_brackets(host);
    if host.is_empty() {
        return Err(SocketParseError::MissingHost(input.to_owned()));
    }
    let port = port
        .parse()
        .map_err(|_| SocketParseError::MissingPort(input.to_owned()))?;
    Ok(SocketEndpoint::tcp(host, port))
}

fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|inner| inner.strip_suffix(']'))
        .unwrap_or(host)
}

impl TryFrom<String> for SocketEndpoint {
    type Error = SocketParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SocketEndpoint> for String {
    fn from(endpoint: SocketEndpoint) -> Self {
        endpoint.to_string()
    }
}

/// Errors encountered while parsing a [`SocketEndpoint`] from text.
#[derive(Debug, Error)]
pub enum SocketParseError {
    /// Scheme was neither `unix` nor `tcp`.
    #[error("unsupported socket scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("missing TCP host in '{0}'")]
    MissingHost(String),
    /// The port was absent or not a number between 0 and 65535.
    #[error("missing or invalid TCP port in '{0}'")]
    MissingPort(String),
    #[error("missing Unix socket path in '{0}'")]
    MissingUnixPath(String),
    #[error(transparent)]
    Url(#[from] url::ParseError),
}

/// Errors raised when preparing the socket directory.
#[derive(Debug, Error)]
pub enum SocketPreparationError {
    /// The socket path is a bare file name.
    #[error("socket path '{path}' has no parent directory")]
    MissingParent { path: Utf8PathBuf },
    #[error("failed to create socket directory '{path}': {source}")]
    CreateDirectory {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}
