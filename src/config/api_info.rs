//! Lotus-style `*_API_INFO` values: `TOKEN:/ip4/HOST/tcp/PORT/http`.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiInfoError {
    Empty,
    UnsupportedAddress(String),
    InvalidPort(String),
}

impl std::fmt::Display for ApiInfoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "api info is empty"),
            Self::UnsupportedAddress(addr) => write!(f, "unsupported api address {addr}"),
            Self::InvalidPort(port) => write!(f, "invalid api port {port}"),
        }
    }
}

impl std::error::Error for ApiInfoError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiInfo {
    pub token: String,
    pub host: String,
    pub port: u16,
    /// `http` or `https`.
    pub scheme: String,
}

impl ApiInfo {
    /// JSON-RPC endpoint for an API version, e.g. `http://10.0.0.5:1234/rpc/v1`.
    pub fn rpc_url(&self, version: &str) -> String {
        format!("{}://{}/rpc/{version}", self.scheme, self.host_port())
    }

    pub fn host_port(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

pub fn parse(raw: &str) -> Result<ApiInfo, ApiInfoError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ApiInfoError::Empty);
    }
    let (token, addr) = match raw.split_once(':') {
        // A URL has "://"; the token never contains '/'.
        Some((tok, rest)) if !tok.contains('/') && !rest.starts_with("//") => (tok, rest),
        _ => ("", raw),
    };

    let mut info = if addr.starts_with('/') {
        parse_multiaddr(addr)?
    } else {
        parse_url(addr)?
    };
    info.token = token.to_string();
    Ok(info)
}

fn parse_multiaddr(addr: &str) -> Result<ApiInfo, ApiInfoError> {
    let unsupported = || ApiInfoError::UnsupportedAddress(addr.to_string());
    let parts: Vec<&str> = addr.trim_start_matches('/').split('/').collect();
    let [proto, host, "tcp", port, rest @ ..] = parts.as_slice() else {
        return Err(unsupported());
    };
    if !matches!(*proto, "ip4" | "ip6" | "dns" | "dns4" | "dns6") {
        return Err(unsupported());
    }
    let port: u16 = port
        .parse()
        .map_err(|_| ApiInfoError::InvalidPort(port.to_string()))?;
    let scheme = match rest {
        [] | ["http"] | ["ws"] => "http",
        ["https"] | ["wss"] => "https",
        _ => return Err(unsupported()),
    };
    Ok(ApiInfo {
        token: String::new(),
        host: host.to_string(),
        port,
        scheme: scheme.to_string(),
    })
}

fn parse_url(addr: &str) -> Result<ApiInfo, ApiInfoError> {
    let url = reqwest::Url::parse(addr).map_err(|_| ApiInfoError::UnsupportedAddress(addr.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "http",
        "https" | "wss" => "https",
        _ => return Err(ApiInfoError::UnsupportedAddress(addr.to_string())),
    };
    let host = url
        .host_str()
        .ok_or_else(|| ApiInfoError::UnsupportedAddress(addr.to_string()))?
        .trim_matches(|c| c == '[' || c == ']')
        .to_string();
    let port = url
        .port_or_known_default()
        .ok_or_else(|| ApiInfoError::InvalidPort(addr.to_string()))?;
    Ok(ApiInfo {
        token: String::new(),
        host,
        port,
        scheme: scheme.to_string(),
    })
}
