use serde::Deserialize;

fn require_url(var: &str) -> anyhow::Result<String> {
    std::env::var(var)
        .map_err(|_| anyhow::anyhow!("{} environment variable required", var))
        .and_then(|raw| {
            if raw.trim().is_empty() {
                anyhow::bail!("{} cannot be empty", var);
            }
            url::Url::parse(&raw).map_err(|_| anyhow::anyhow!("{} must be a valid URL", var))?;
            Ok(raw)
        })
}

fn optional_number<T: std::str::FromStr>(var: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(var) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a valid number", var)),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Base URL of the chat transport HTTP API (outbound messages).
    pub chat_api_base: String,
    /// Token for the chat transport API.
    pub chat_api_token: String,
    /// User key of the single administrator identity.
    pub admin_key: String,
    /// Credits deducted per lookup.
    pub lookup_cost: i64,
    /// Free lookups granted to a newly created account.
    pub free_allowance: i64,
    /// Minimum seconds between two accepted requests from the same user.
    pub cooldown_secs: u64,
    /// Accepted requests allowed per rolling day window.
    pub daily_cap: i64,
    /// Per-attempt timeout for outbound provider calls.
    pub provider_timeout_secs: u64,
    /// Fallback chain for identity lookups: base URLs, tried in order.
    pub identity_endpoints: Vec<String>,
    /// Credential pool for identity lookups. Empty means the endpoints are
    /// open and a single token-less attempt is made per endpoint.
    pub identity_tokens: Vec<String>,
    pub relationship_url: String,
    pub vehicle_url: String,
    pub financial_code_url: String,
    pub social_profile_url: String,
    pub network_address_url: String,
    /// Default region for phone-number query validation (ISO 3166 alpha-2).
    pub phone_region: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DB_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DB_URL or DATABASE_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DB_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            chat_api_base: require_url("CHAT_API_BASE")?,
            chat_api_token: std::env::var("CHAT_API_TOKEN")
                .map_err(|_| anyhow::anyhow!("CHAT_API_TOKEN environment variable required"))
                .and_then(|token| {
                    if token.trim().is_empty() {
                        anyhow::bail!("CHAT_API_TOKEN cannot be empty");
                    }
                    Ok(token)
                })?,
            admin_key: std::env::var("ADMIN_USER_KEY")
                .map_err(|_| anyhow::anyhow!("ADMIN_USER_KEY environment variable required"))
                .and_then(|key| {
                    if key.trim().is_empty() {
                        anyhow::bail!("ADMIN_USER_KEY cannot be empty");
                    }
                    Ok(key)
                })?,
            lookup_cost: optional_number("LOOKUP_COST", 1)?,
            free_allowance: optional_number("FREE_ALLOWANCE", 2)?,
            cooldown_secs: optional_number("COOLDOWN_SECS", 30)?,
            daily_cap: optional_number("DAILY_CAP", 10)?,
            provider_timeout_secs: optional_number("PROVIDER_TIMEOUT_SECS", 15)?,
            identity_endpoints: std::env::var("IDENTITY_LOOKUP_URLS")
                .map_err(|_| anyhow::anyhow!("IDENTITY_LOOKUP_URLS environment variable required"))
                .and_then(|raw| {
                    let urls: Vec<String> = raw
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect();
                    if urls.is_empty() {
                        anyhow::bail!("IDENTITY_LOOKUP_URLS must list at least one URL");
                    }
                    for u in &urls {
                        url::Url::parse(u).map_err(|_| {
                            anyhow::anyhow!("IDENTITY_LOOKUP_URLS entry is not a valid URL: {}", u)
                        })?;
                    }
                    Ok(urls)
                })?,
            identity_tokens: std::env::var("IDENTITY_LOOKUP_TOKENS")
                .map(|raw| {
                    raw.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            relationship_url: require_url("RELATIONSHIP_LOOKUP_URL")?,
            vehicle_url: require_url("VEHICLE_LOOKUP_URL")?,
            financial_code_url: require_url("FINANCIAL_CODE_LOOKUP_URL")?,
            social_profile_url: require_url("SOCIAL_PROFILE_LOOKUP_URL")?,
            network_address_url: require_url("NETWORK_ADDRESS_LOOKUP_URL")?,
            phone_region: std::env::var("PHONE_REGION").unwrap_or_else(|_| "IN".to_string()),
        };

        if config.lookup_cost < 1 {
            anyhow::bail!("LOOKUP_COST must be at least 1");
        }
        if config.daily_cap < 1 {
            anyhow::bail!("DAILY_CAP must be at least 1");
        }

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::debug!("Chat API base: {}", config.chat_api_base);
        tracing::debug!(
            "Identity fallback chain: {} endpoint(s), {} credential(s)",
            config.identity_endpoints.len(),
            config.identity_tokens.len()
        );
        tracing::debug!(
            "Lookup cost: {}, cooldown: {}s, daily cap: {}",
            config.lookup_cost,
            config.cooldown_secs,
            config.daily_cap
        );
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}
