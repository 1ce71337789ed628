use kestrel_core::error::AppError;

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Bearer token guarding write endpoints (None = admin endpoints disabled).
    pub admin_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            admin_token: None,
        }
    }
}

impl ServerConfig {
    /// Read configuration from environment variables.
    ///
    /// - `KESTREL_SERVER_PORT` (defaults to 8000)
    /// - `KESTREL_ADMIN_TOKEN` (optional; blank counts as unset)
    pub fn from_env() -> Result<Self, AppError> {
        let port = match std::env::var("KESTREL_SERVER_PORT") {
            Err(_) => Self::default().port,
            Ok(raw) => raw.trim().parse().map_err(|_| {
                AppError::ConfigError(format!("Invalid KESTREL_SERVER_PORT '{raw}'"))
            })?,
        };
        let admin_token = std::env::var("KESTREL_ADMIN_TOKEN")
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        Ok(Self { port, admin_token })
    }

    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}
