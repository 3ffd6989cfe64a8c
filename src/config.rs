use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub listen_addr: String,
    pub static_dir: String,
    /// Allowed CORS origin; any origin when unset
    pub origin_url: Option<String>,
    pub admin_jwt_secret: String,
    pub admin_password_file: PathBuf,
    pub admin_default_password: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:tacmed_quiz.db".to_string());

        let database_max_connections = match env::var("DATABASE_MAX_CONNECTIONS") {
            Ok(val) => val
                .parse()
                .context("Failed to parse DATABASE_MAX_CONNECTIONS")?,
            Err(_) => 5,
        };

        let listen_addr = env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let static_dir = env::var("STATIC_DIR").unwrap_or_else(|_| "./static".to_string());
        let origin_url = env::var("ORIGIN_URL").ok().filter(|o| !o.is_empty());

        let admin_jwt_secret =
            env::var("ADMIN_JWT_SECRET").context("ADMIN_JWT_SECRET must be set")?;
        if admin_jwt_secret.is_empty() {
            anyhow::bail!("ADMIN_JWT_SECRET must not be empty");
        }

        let admin_password_file = env::var("ADMIN_PASSWORD_FILE")
            .unwrap_or_else(|_| "admin-password.txt".to_string())
            .into();
        let admin_default_password =
            env::var("ADMIN_DEFAULT_PASSWORD").unwrap_or_else(|_| "12345".to_string());

        Ok(Config {
            database_url,
            database_max_connections,
            listen_addr,
            static_dir,
            origin_url,
            admin_jwt_secret,
            admin_password_file,
            admin_default_password,
        })
    }
}
