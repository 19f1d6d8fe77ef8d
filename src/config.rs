use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    /// ISO currency code used for every charge; the store is single-currency.
    pub currency: String,
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub key_id: String,
    pub key_secret: String,
    pub base_url: String,
    /// Hard deadline for any gateway call; a timed-out call is reported as
    /// unavailable and never guessed at.
    pub timeout_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);
        let currency = env::var("CURRENCY").unwrap_or_else(|_| "INR".to_string());

        let gateway = GatewayConfig {
            key_id: env::var("GATEWAY_KEY_ID").unwrap_or_default(),
            key_secret: env::var("GATEWAY_KEY_SECRET").unwrap_or_default(),
            base_url: env::var("GATEWAY_BASE_URL")
                .unwrap_or_else(|_| "https://api.razorpay.com".to_string()),
            timeout_secs: env::var("GATEWAY_TIMEOUT_SECS")
                .ok()
                .and_then(|t| t.parse::<u64>().ok())
                .unwrap_or(10),
        };

        Ok(Self {
            database_url,
            host,
            port,
            currency,
            gateway,
        })
    }
}
