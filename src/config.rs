use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub host: String,
    pub gateway_port: u16,
    pub portal_port: u16,
    /// Public base URL used when building per-signer signing links.
    pub base_url: String,

    // Persistence
    pub data_dir: PathBuf,

    // Sessions
    pub session_expiry_hours: u64,

    // OTP
    pub otp_ttl_secs: i64,
    pub otp_max_attempts: u32,
    pub otp_min_interval_secs: i64,

    // Portal tokens
    pub portal_token_ttl_secs: i64,
    pub portal_token_cap: usize,

    // Anchoring
    pub ipfs_api_url: String,
    pub xrpl_rpc_url: String,
    pub stellar_rpc_url: String,
    pub eth_rpc_url: String,
    pub polygon_rpc_url: String,
    pub adapter_timeout_secs: u64,

    // Backups
    pub backup_dir: PathBuf,
    pub backup_interval_secs: u64,
    pub backup_retention_days: i64,
    pub backup_passphrase: Option<String>,

    // CORS
    pub cors_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let gateway_port: u16 = env("GATEWAY_PORT", "8100")
            .parse()
            .expect("GATEWAY_PORT must be a number");

        let base_url = env("BASE_URL", &format!("http://localhost:{gateway_port}/sign"));
        url::Url::parse(&base_url).expect("BASE_URL must be a valid URL");

        Self {
            host: env("HOST", "0.0.0.0"),
            gateway_port,
            portal_port: env("PORTAL_PORT", "8101").parse().expect("PORTAL_PORT must be a number"),
            base_url,

            data_dir: PathBuf::from(env("DATA_DIR", ".doc-engine")),

            session_expiry_hours: env("SESSION_EXPIRY_HOURS", "72").parse().unwrap_or(72),

            otp_ttl_secs: env("OTP_TTL_SECS", "600").parse().unwrap_or(600),
            otp_max_attempts: env("OTP_MAX_ATTEMPTS", "5").parse().unwrap_or(5),
            otp_min_interval_secs: env("OTP_MIN_INTERVAL_SECS", "30").parse().unwrap_or(30),

            portal_token_ttl_secs: env("PORTAL_TOKEN_TTL_SECS", "1800").parse().unwrap_or(1800),
            portal_token_cap: env("PORTAL_TOKEN_CAP", "100").parse().unwrap_or(100),

            ipfs_api_url: env("IPFS_API_URL", "http://127.0.0.1:5001"),
            xrpl_rpc_url: env("XRPL_RPC_URL", "https://s1.ripple.com:51234"),
            stellar_rpc_url: env("STELLAR_RPC_URL", "https://horizon.stellar.org"),
            eth_rpc_url: env("ETH_RPC_URL", "https://eth.llamarpc.com"),
            polygon_rpc_url: env("POLYGON_RPC_URL", "https://polygon-rpc.com"),
            adapter_timeout_secs: env("ADAPTER_TIMEOUT_SECS", "30").parse().unwrap_or(30),

            backup_dir: PathBuf::from(env("BACKUP_DIR", "backups")),
            backup_interval_secs: env("BACKUP_INTERVAL_SECS", "3600").parse().unwrap_or(3600),
            backup_retention_days: env("BACKUP_RETENTION_DAYS", "30").parse().unwrap_or(30),
            backup_passphrase: env_opt("BACKUP_PASSPHRASE"),

            cors_origins: env("CORS_ORIGINS", "http://localhost:3000")
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
        }
    }

    pub fn gateway_addr(&self) -> SocketAddr {
        format!("{}:{}", self.host, self.gateway_port)
            .parse()
            .expect("Invalid gateway address")
    }

    pub fn portal_addr(&self) -> SocketAddr {
        format!("{}:{}", self.host, self.portal_port)
            .parse()
            .expect("Invalid portal address")
    }
}

fn env(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}
