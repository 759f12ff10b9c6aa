use serde::Deserialize;
use std::path::PathBuf;

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Writer loop only.
    Writer,
    /// HTTP façade only, expects a running writer to connect to.
    Web,
    /// Everything in one process.
    All,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_wallet_db_root")]
    pub wallet_db_root: PathBuf,
    #[serde(default = "default_api_listen")]
    pub api_listen: String,
    #[serde(default = "default_writer_socket")]
    pub writer_socket: PathBuf,
    #[serde(default = "default_role")]
    pub role: Role,

    pub bitcoind_url: String,
    pub bitcoind_user: Option<String>,
    pub bitcoind_password: Option<String>,

    #[serde(default = "default_upstream_timeout_secs")]
    pub upstream_timeout_secs: u64,
    #[serde(default = "default_writer_timeout_secs")]
    pub writer_timeout_secs: u64,
    /// Bound on how long a queued writer task may wait behind more urgent
    /// ones before it is served anyway.
    #[serde(default = "default_writer_max_wait_secs")]
    pub writer_max_wait_secs: u64,
}

fn default_wallet_db_root() -> PathBuf {
    std::env::home_dir().unwrap().join(".wallet-history")
}

fn default_api_listen() -> String {
    "127.0.0.1:3008".to_string()
}

fn default_writer_socket() -> PathBuf {
    PathBuf::from("/tmp/wallet-writer.sock")
}

fn default_role() -> Role {
    Role::All
}

fn default_upstream_timeout_secs() -> u64 {
    30
}

fn default_writer_timeout_secs() -> u64 {
    30
}

fn default_writer_max_wait_secs() -> u64 {
    60
}

pub fn get_server_config() -> anyhow::Result<ServerConfig> {
    Ok(envy::from_env::<ServerConfig>()?)
}
