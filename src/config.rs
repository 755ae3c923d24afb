use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub sms: SmsConfig,
    pub mail: MailConfig,
    #[serde(default)]
    pub billing: BillingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub access_token_expires_in: i64, // seconds
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_phone: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    pub base_url: String,
    pub api_key: String,
    pub from_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    /// 到期后的宽限期天数，0 表示到期立即 expired
    #[serde(default = "default_grace_period_days")]
    pub grace_period_days: i64,
    /// 新学校注册时的试用天数
    #[serde(default = "default_trial_days")]
    pub trial_days: i64,
}

fn default_grace_period_days() -> i64 {
    7
}

fn default_trial_days() -> i64 {
    14
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            grace_period_days: default_grace_period_days(),
            trial_days: default_trial_days(),
        }
    }
}

impl Config {
    pub fn from_toml() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        use std::io::ErrorKind;

        // 尝试读取配置文件，如果不存在则完全依赖环境变量
        let config_result = std::fs::read_to_string(&config_path);

        let mut config: Config = match config_result {
            Ok(config_str) => {
                // 有配置文件：先解析再用环境变量覆盖
                toml::from_str(&config_str)
                    .map_err(|e| format!("Failed to parse config file: {e}"))?
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // 无配置文件：使用环境变量与默认值构建
                fn get_env(name: &str) -> Option<String> {
                    env::var(name).ok()
                }
                fn get_env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
                    env::var(name)
                        .ok()
                        .and_then(|v| v.parse::<T>().ok())
                        .unwrap_or(default)
                }

                // 数据库 URL 在无配置文件时必须提供
                let database_url = get_env("DATABASE_URL")
                    .ok_or("Missing DATABASE_URL and no config.toml found")?;

                Config {
                    server: ServerConfig {
                        host: get_env("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                        port: get_env_parse("SERVER_PORT", 8080u16),
                    },
                    database: DatabaseConfig {
                        url: database_url,
                        max_connections: get_env_parse("DB_MAX_CONNECTIONS", 10u32),
                    },
                    jwt: JwtConfig {
                        secret: get_env("JWT_SECRET")
                            .unwrap_or_else(|| "change-me-in-production".to_string()),
                        access_token_expires_in: get_env_parse("JWT_ACCESS_EXPIRES_IN", 7200i64),
                    },
                    sms: SmsConfig {
                        account_sid: get_env("SMS_ACCOUNT_SID").unwrap_or_default(),
                        auth_token: get_env("SMS_AUTH_TOKEN").unwrap_or_default(),
                        from_phone: get_env("SMS_FROM_PHONE").unwrap_or_default(),
                        base_url: get_env("SMS_BASE_URL"),
                    },
                    mail: MailConfig {
                        base_url: get_env("MAIL_BASE_URL")
                            .unwrap_or_else(|| "https://api.mailrelay.example".to_string()),
                        api_key: get_env("MAIL_API_KEY").unwrap_or_default(),
                        from_address: get_env("MAIL_FROM_ADDRESS")
                            .unwrap_or_else(|| "noreply@schoolpulse.app".to_string()),
                    },
                    billing: BillingConfig {
                        grace_period_days: get_env_parse(
                            "BILLING_GRACE_PERIOD_DAYS",
                            default_grace_period_days(),
                        ),
                        trial_days: get_env_parse("BILLING_TRIAL_DAYS", default_trial_days()),
                    },
                }
            }
            Err(e) => {
                return Err(format!("Failed to read config file {config_path}: {e}").into());
            }
        };

        // 环境变量覆盖（即便文件存在时也覆盖）
        if let Ok(v) = env::var("SERVER_HOST") {
            config.server.host = v;
        }
        if let Ok(v) = env::var("SERVER_PORT")
            && let Ok(p) = v.parse()
        {
            config.server.port = p;
        }
        if let Ok(v) = env::var("DATABASE_URL") {
            config.database.url = v;
        }
        if let Ok(v) = env::var("DB_MAX_CONNECTIONS")
            && let Ok(mc) = v.parse()
        {
            config.database.max_connections = mc;
        }
        if let Ok(v) = env::var("JWT_SECRET") {
            config.jwt.secret = v;
        }
        if let Ok(v) = env::var("JWT_ACCESS_EXPIRES_IN")
            && let Ok(n) = v.parse()
        {
            config.jwt.access_token_expires_in = n;
        }
        if let Ok(v) = env::var("SMS_ACCOUNT_SID") {
            config.sms.account_sid = v;
        }
        if let Ok(v) = env::var("SMS_AUTH_TOKEN") {
            config.sms.auth_token = v;
        }
        if let Ok(v) = env::var("SMS_FROM_PHONE") {
            config.sms.from_phone = v;
        }
        if let Ok(v) = env::var("SMS_BASE_URL") {
            config.sms.base_url = Some(v);
        }
        if let Ok(v) = env::var("MAIL_BASE_URL") {
            config.mail.base_url = v;
        }
        if let Ok(v) = env::var("MAIL_API_KEY") {
            config.mail.api_key = v;
        }
        if let Ok(v) = env::var("MAIL_FROM_ADDRESS") {
            config.mail.from_address = v;
        }
        if let Ok(v) = env::var("BILLING_GRACE_PERIOD_DAYS")
            && let Ok(n) = v.parse()
        {
            config.billing.grace_period_days = n;
        }
        if let Ok(v) = env::var("BILLING_TRIAL_DAYS")
            && let Ok(n) = v.parse()
        {
            config.billing.trial_days = n;
        }

        Ok(config)
    }
}
