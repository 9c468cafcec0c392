//! Konfiguration
//!
//! Die einzige externe Konfiguration des Cores ist die Adresse des
//! Signaling-Kanals und das bereits ausgestellte Credential. Alles andere
//! (Reconnect-Policy, Ring-Timeout) hat sinnvolle Defaults.

use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Fallback falls `SIGNALING_URL` nicht gesetzt ist
pub const DEFAULT_SIGNALING_URL: &str = "wss://signaling.localhost/ws";

/// Standard Ring-Timeout für eingehende Anrufe
pub const DEFAULT_RING_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid signaling URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Unsupported URL scheme '{0}' (expected ws, wss, http or https)")]
    UnsupportedScheme(String),

    #[error("Missing credential: set {0}")]
    MissingCredential(&'static str),
}

// ============================================================================
// RECONNECT POLICY
// ============================================================================

/// Begrenzte Reconnect-Strategie mit exponentiellem Backoff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Maximale Anzahl Versuche nach einem Verbindungsabbruch
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// Wartezeit vor Versuch `attempt` (1-basiert): `base * 2^(n-1)`, gedeckelt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        }
    }
}

// ============================================================================
// CALL CONFIG
// ============================================================================

/// Timer-Einstellungen des Call Controllers
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// Countdown für eingehende Anrufe im Ringing-Status
    pub ring_timeout: Duration,
    /// Intervall der Tick-Events für die Anzeige
    pub tick_interval: Duration,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ring_timeout: DEFAULT_RING_TIMEOUT,
            tick_interval: Duration::from_secs(1),
        }
    }
}

// ============================================================================
// CORE CONFIG
// ============================================================================

/// Startkonfiguration, wird von der Anwendung beim Start übergeben
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub endpoint: Url,
    pub credential: String,
    pub reconnect: ReconnectPolicy,
    pub connect_timeout: Duration,
    pub call: CallConfig,
}

impl CoreConfig {
    /// Erstellt eine Konfiguration mit Defaults
    ///
    /// `http(s)` wird zu `ws(s)` umgeschrieben, andere Schemes werden abgelehnt.
    pub fn new(endpoint: &str, credential: impl Into<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            endpoint: normalize_endpoint(endpoint)?,
            credential: credential.into(),
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            call: CallConfig::default(),
        })
    }

    /// Liest `SIGNALING_URL` und `SIGNALING_TOKEN` aus der Umgebung
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_values(
            std::env::var("SIGNALING_URL").ok(),
            std::env::var("SIGNALING_TOKEN").ok(),
        )
    }

    fn from_values(
        endpoint: Option<String>,
        credential: Option<String>,
    ) -> Result<Self, ConfigError> {
        let endpoint = endpoint.unwrap_or_else(|| DEFAULT_SIGNALING_URL.to_string());
        let credential = credential
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::MissingCredential("SIGNALING_TOKEN"))?;

        Self::new(&endpoint, credential)
    }
}

fn normalize_endpoint(raw: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(raw)?;
    let scheme = match url.scheme() {
        "ws" | "wss" => return Ok(url),
        "http" => "ws",
        "https" => "wss",
        other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|_| ConfigError::UnsupportedScheme(scheme.to_string()))?;
    Ok(url)
}

// ============================================================================
// TESTS
// ============================================================================
