use std::collections::HashMap;

const PREFIX: &str = "TWITCH_";

pub const KEY_CLIENT_ID: &str = "TWITCH_CLIENT_ID";
pub const KEY_CLIENT_SECRET: &str = "TWITCH_CLIENT_SECRET";
pub const KEY_ACCESS_TOKEN: &str = "TWITCH_ACCESS_TOKEN";
pub const KEY_REFRESH_TOKEN: &str = "TWITCH_REFRESH_TOKEN";
pub const KEY_BROADCASTER_ID: &str = "TWITCH_BROADCASTER_ID";
pub const KEY_CREDENTIALS_FILE: &str = "TWITCH_CREDENTIALS_FILE";

#[non_exhaustive]
pub struct Config {
    kv: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        let kv = std::env::vars()
            .filter(|(k, _)| k.starts_with(PREFIX))
            .collect();

        Self { kv }
    }
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn from_map(kv: HashMap<String, String>) -> Self {
        Self { kv }
    }

    pub fn optional(&self, key: &str) -> Option<&str> {
        self.kv.get(key).map(|v| v.as_str())
    }

    pub fn require(&self, key: &str) -> anyhow::Result<&str> {
        self.optional(key)
            .ok_or_else(|| anyhow::anyhow!("required config key '{key}'"))
    }
}
