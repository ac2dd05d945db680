use std::{env, fs, path::Path, time::Duration};

use crate::{claims::coordinator::DEFAULT_LOCK_TTL, errors::Error, Result};

pub const DEFAULT_REDIS_PORT: u16 = 6379;

/// Which claim store the process runs against, decided once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreSelection {
    Redis { host: String, port: u16 },
    Local,
}

/// Typed configuration for the bot.
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,
    /// Group chats the bot answers in; empty means every chat.
    pub helpdesk_chat_ids: Vec<i64>,

    // Claim store
    pub redis_host: Option<String>,
    pub redis_port: u16,
    pub redis_connect_timeout: Duration,
    pub redis_op_timeout: Duration,
    pub claim_lock_ttl: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable source (the environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let telegram_bot_token = lookup("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }
        let helpdesk_chat_ids = parse_csv_i64(lookup("HELPDESK_CHAT_IDS"));

        let redis_host = lookup("REDIS_HOST").and_then(non_empty);
        let redis_port = match lookup("REDIS_PORT").and_then(non_empty) {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| Error::Config(format!("REDIS_PORT is not a valid port: {raw}")))?,
            None => DEFAULT_REDIS_PORT,
        };

        let millis = |key: &str, default: u64| {
            Duration::from_millis(parse_u64(lookup(key)).unwrap_or(default))
        };
        let redis_connect_timeout = millis("REDIS_CONNECT_TIMEOUT_MS", 2_000);
        let redis_op_timeout = millis("REDIS_OP_TIMEOUT_MS", 2_000);

        let claim_lock_ttl = parse_u64(lookup("CLAIM_LOCK_TTL_SECS"))
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_LOCK_TTL);

        Ok(Self {
            telegram_bot_token,
            helpdesk_chat_ids,
            redis_host,
            redis_port,
            redis_connect_timeout,
            redis_op_timeout,
            claim_lock_ttl,
        })
    }

    pub fn store_selection(&self) -> StoreSelection {
        match &self.redis_host {
            Some(host) => StoreSelection::Redis {
                host: host.clone(),
                port: self.redis_port,
            },
            None => StoreSelection::Local,
        }
    }

    pub fn allows_chat(&self, chat_id: i64) -> bool {
        self.helpdesk_chat_ids.is_empty() || self.helpdesk_chat_ids.contains(&chat_id)
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, strip_quotes(v.trim()));
    }
}

fn strip_quotes(val: &str) -> &str {
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        &val[1..val.len() - 1]
    } else {
        val
    }
}

fn parse_u64(v: Option<String>) -> Option<u64> {
    v.and_then(|s| s.trim().parse::<u64>().ok())
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s.trim().to_string())
    }
}
