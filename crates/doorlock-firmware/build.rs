//! Bakes node secrets from `.env` into the firmware image.
//!
//! Every key gets a value (possibly empty) so `env!` in `secrets.rs` always
//! resolves; the firmware warns at boot about anything left unset.

const KEYS: &[(&str, &str)] = &[
    ("DOORLOCK_WIFI_SSID", ""),
    ("DOORLOCK_WIFI_PASSWORD", ""),
    ("DOORLOCK_API_KEY", ""),
    ("DOORLOCK_AUTHORIZER_HOST", ""),
    ("DOORLOCK_AUTHORIZER_PORT", "5000"),
    ("DOORLOCK_LOCK_HOST", ""),
];

fn main() {
    println!("cargo:rerun-if-changed=.env");
    if let Err(e) = dotenvy::dotenv() {
        println!("cargo:warning=no .env loaded ({e}); using process environment");
    }

    for (key, default) in KEYS {
        println!("cargo:rerun-if-env-changed={key}");
        let value = std::env::var(key).unwrap_or_else(|_| (*default).to_owned());
        println!("cargo:rustc-env={key}={value}");
    }

    println!("cargo:rustc-link-arg=-Tlinkall.x");
}
