use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;

/// Runtime configuration. Values come from an optional TOML file, with
/// environment variables taking precedence over both the file and the
/// defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub database_url: String,
    pub admin_user: String,
    pub admin_password: String,
    /// Local path of the provisioning script uploaded during deploy.
    pub install_script: PathBuf,
    /// Where generated helper scripts (TLS bootstrap) are written.
    pub generated_dir: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    listen_addr: Option<String>,
    database_url: Option<String>,
    admin_user: Option<String>,
    admin_password: Option<String>,
    install_script: Option<String>,
    generated_dir: Option<String>,
}

impl ServerConfig {
    pub fn load(path: Option<&str>) -> Result<Self, String> {
        let file = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|e| format!("read config {path}: {e}"))?;
                toml::from_str::<FileConfig>(&raw)
                    .map_err(|e| format!("parse config {path}: {e}"))?
            }
            None => FileConfig::default(),
        };

        let pick = |env_key: &str, file_value: Option<String>, default: &str| {
            env::var(env_key)
                .ok()
                .or(file_value)
                .unwrap_or_else(|| default.to_string())
        };

        let listen_addr = pick("LISTEN_ADDR", file.listen_addr, "0.0.0.0:8080");
        let listen_addr: SocketAddr = listen_addr
            .parse()
            .map_err(|e| format!("invalid listen address {listen_addr}: {e}"))?;

        Ok(ServerConfig {
            listen_addr,
            database_url: pick("DATABASE_URL", file.database_url, "sqlite://manager.db"),
            admin_user: pick("ADMIN_USER", file.admin_user, "admin"),
            admin_password: pick("ADMIN_PASSWORD", file.admin_password, "admin"),
            install_script: PathBuf::from(pick(
                "INSTALL_SCRIPT",
                file.install_script,
                "/opt/mystfleet/remote_install.sh",
            )),
            generated_dir: PathBuf::from(pick("GENERATED_DIR", file.generated_dir, "generated")),
        })
    }

    /// The panel's own listening port, one of the implicit firewall rules.
    pub fn panel_port(&self) -> u16 {
        self.listen_addr.port()
    }
}
