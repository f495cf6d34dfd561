//! Settings baked in at build time from `.env` (see `build.rs`)

use doorlock_core::config::{
    AuthorizerConfig, DEFAULT_AUTHORIZER_PORT, InternetConfig, NodeConfig, PeerConfig,
};
use log::warn;

pub const WIFI_SSID: &str = env!("DOORLOCK_WIFI_SSID");
pub const WIFI_PASSWORD: &str = env!("DOORLOCK_WIFI_PASSWORD");
pub const API_KEY: &str = env!("DOORLOCK_API_KEY");
pub const AUTHORIZER_HOST: &str = env!("DOORLOCK_AUTHORIZER_HOST");
pub const AUTHORIZER_PORT: &str = env!("DOORLOCK_AUTHORIZER_PORT");
pub const LOCK_HOST: &str = env!("DOORLOCK_LOCK_HOST");

pub fn node_config() -> NodeConfig<'static> {
    if API_KEY.is_empty() {
        warn!("DOORLOCK_API_KEY is empty; every request will be refused");
    }
    if AUTHORIZER_HOST.is_empty() {
        warn!("DOORLOCK_AUTHORIZER_HOST is empty");
    }

    let mut authorizer = AuthorizerConfig::new(AUTHORIZER_HOST, API_KEY);
    authorizer.port = AUTHORIZER_PORT.parse().unwrap_or_else(|_| {
        warn!("Bad DOORLOCK_AUTHORIZER_PORT {:?}, using {}", AUTHORIZER_PORT, DEFAULT_AUTHORIZER_PORT);
        DEFAULT_AUTHORIZER_PORT
    });

    let config = NodeConfig::new(
        InternetConfig {
            ssid: WIFI_SSID,
            password: WIFI_PASSWORD,
        },
        authorizer,
    );

    if LOCK_HOST.is_empty() {
        config
    } else {
        config.with_peer(PeerConfig::new(LOCK_HOST))
    }
}
