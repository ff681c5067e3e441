//! Structured Logging Setup via tracing-subscriber
//!
//! Die Einstellungen kommen aus dem `[logging]`-Abschnitt der
//! Konfiguration und koennen per Umgebungsvariable ueberschrieben werden:
//! - `NIO_LOG_LEVEL`: Filter-Direktive (z.B. `debug` oder `nio_crypto=trace`)
//! - `NIO_LOG_FORMAT`: Format (text/json)

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_LEVEL_ENV: &str = "NIO_LOG_LEVEL";
pub const LOG_FORMAT_ENV: &str = "NIO_LOG_FORMAT";

/// Logging-Einstellungen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level oder Filter-Direktive: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl LoggingEinstellungen {
    /// Wendet Overrides aus der Umgebung an (leere Werte werden ignoriert)
    pub fn mit_overrides(mut self, level: Option<String>, format: Option<String>) -> Self {
        if let Some(level) = level.filter(|l| !l.trim().is_empty()) {
            self.level = level;
        }
        if let Some(format) = format.filter(|f| log_format_gueltig(f)) {
            self.format = format;
        }
        self
    }

    /// Liest `NIO_LOG_LEVEL` und `NIO_LOG_FORMAT` aus der Umgebung
    pub fn aus_env(self) -> Self {
        self.mit_overrides(
            std::env::var(LOG_LEVEL_ENV).ok(),
            std::env::var(LOG_FORMAT_ENV).ok(),
        )
    }
}

/// Initialisiert das Logging-System.
///
/// Ein ungueltiger Level faellt auf `info` zurueck. Gibt `false` zurueck, wenn
/// bereits ein globaler Subscriber installiert war (z.B. in Tests).
pub fn logging_initialisieren(einstellungen: &LoggingEinstellungen) -> bool {
    let einstellungen = einstellungen.clone().aus_env();
    let filter =
        EnvFilter::try_new(&einstellungen.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let ergebnis = match einstellungen.format.as_str() {
        "json" => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_current_span(true)
            .try_init(),
        _ => fmt().with_env_filter(filter).with_target(true).try_init(),
    };

    match ergebnis {
        Ok(()) => {
            tracing::debug!(
                level = %einstellungen.level,
                format = %einstellungen.format,
                "Logging initialisiert"
            );
            true
        }
        Err(_) => false,
    }
}

/// Validiert ob ein Log-Level-String gueltig ist.
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

/// Validiert ob ein Log-Format-String gueltig ist.
pub fn log_format_gueltig(format: &str) -> bool {
    matches!(format, "text" | "json")
}
