//! Environment configuration, read once at startup.

use std::path::PathBuf;
use std::str::FromStr;

use crate::model::Ms;

/// Booking policy knobs shared by every tenant engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Check-in opens this long before the session starts.
    pub checkin_grace_ms: Ms,
    /// Bookings close this long before the session starts.
    pub booking_cutoff_ms: Ms,
    /// Offer seats freed after the session started (late cancel, no-show)
    /// to the waitlist.
    pub reoffer_after_start: bool,
    /// The sweeper marks remaining BOOKED bookings as NO_SHOW this long after end.
    pub no_show_after_ms: Ms,
    pub sweep_interval_ms: u64,
    pub qr_secret: Vec<u8>,
    pub qr_ttl_ms: Ms,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            checkin_grace_ms: 30 * 60_000,
            booking_cutoff_ms: 0,
            reoffer_after_start: false,
            no_show_after_ms: 15 * 60_000,
            sweep_interval_ms: 5_000,
            qr_secret: random_secret(),
            qr_ttl_ms: 24 * 3_600_000,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            checkin_grace_ms: env_or("ROLLCALL_CHECKIN_GRACE_MS", defaults.checkin_grace_ms),
            booking_cutoff_ms: env_or("ROLLCALL_BOOKING_CUTOFF_MS", defaults.booking_cutoff_ms),
            reoffer_after_start: env_or(
                "ROLLCALL_REOFFER_AFTER_START",
                defaults.reoffer_after_start,
            ),
            no_show_after_ms: env_or("ROLLCALL_NO_SHOW_AFTER_MS", defaults.no_show_after_ms),
            sweep_interval_ms: env_or("ROLLCALL_SWEEP_INTERVAL_MS", defaults.sweep_interval_ms),
            qr_secret: std::env::var("ROLLCALL_QR_SECRET")
                .map(String::into_bytes)
                .unwrap_or(defaults.qr_secret),
            qr_ttl_ms: env_or("ROLLCALL_QR_TTL_MS", defaults.qr_ttl_ms),
        }
    }
}

/// Server settings.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    /// Cancellations at least this long before start get their credit back
    /// from the in-process membership ledger.
    pub refund_cutoff_ms: Ms,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub engine: EngineConfig,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env_or("ROLLCALL_PORT", 5433),
            bind: std::env::var("ROLLCALL_BIND").unwrap_or_else(|_| "0.0.0.0".into()),
            data_dir: PathBuf::from(
                std::env::var("ROLLCALL_DATA_DIR").unwrap_or_else(|_| "./data".into()),
            ),
            password: std::env::var("ROLLCALL_PASSWORD").unwrap_or_else(|_| "rollcall".into()),
            max_connections: env_or("ROLLCALL_MAX_CONNECTIONS", 256),
            compact_threshold: env_or("ROLLCALL_COMPACT_THRESHOLD", 1000),
            refund_cutoff_ms: env_or("ROLLCALL_REFUND_CUTOFF_MS", 2 * 3_600_000),
            metrics_port: std::env::var("ROLLCALL_METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
            tls_cert: std::env::var("ROLLCALL_TLS_CERT").ok(),
            tls_key: std::env::var("ROLLCALL_TLS_KEY").ok(),
            engine: EngineConfig::from_env(),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("ignoring unparseable {key}={raw:?}");
            default
        }),
        Err(_) => default,
    }
}

/// 256 bits from the OS-seeded thread RNG. Codes signed with it die with
/// the process; set `ROLLCALL_QR_SECRET` to keep them valid across restarts.
fn random_secret() -> Vec<u8> {
    let bytes: [u8; 32] = rand::random();
    bytes.to_vec()
}
