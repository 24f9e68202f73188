use anyhow::Context;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Server settings, read from the environment at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    /// Durable store location; memory only when unset.
    pub data_dir: Option<PathBuf>,
    /// Token signing key. Authentication is off without one.
    pub secret_key: Option<String>,
    pub admin_user: String,
    pub admin_password: String,
    pub token_ttl_secs: u64,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            data_dir: None,
            secret_key: None,
            admin_user: "admin".into(),
            admin_password: String::new(),
            token_ttl_secs: 3600,
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        let d = Self::default();
        let port = match var("LITESEARCH_PORT") {
            Some(p) => p
                .parse()
                .with_context(|| format!("LITESEARCH_PORT must be a port number, got {p:?}"))?,
            None => d.port,
        };
        let token_ttl_secs = match var("TOKEN_TTL_SECS") {
            Some(t) => t
                .parse()
                .with_context(|| format!("TOKEN_TTL_SECS must be a number of seconds, got {t:?}"))?,
            None => d.token_ttl_secs,
        };
        let settings = Self {
            host: var("LITESEARCH_HOST").unwrap_or(d.host),
            port,
            data_dir: var("DATA_DIR").map(PathBuf::from),
            secret_key: var("SECRET_KEY"),
            admin_user: var("ADMIN_USER").unwrap_or(d.admin_user),
            admin_password: var("ADMIN_PASSWORD").unwrap_or(d.admin_password),
            token_ttl_secs,
            tls_cert_path: var("TLS_CERT_PATH").map(PathBuf::from),
            tls_key_path: var("TLS_KEY_PATH").map(PathBuf::from),
        };
        if settings.tls_cert_path.is_some() != settings.tls_key_path.is_some() {
            anyhow::bail!("TLS_CERT_PATH and TLS_KEY_PATH must be set together");
        }
        Ok(settings)
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }

    pub fn auth_enabled(&self) -> bool {
        self.secret_key.is_some()
    }
}
