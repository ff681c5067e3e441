//! # nio-observability
//!
//! Observability-Crate fuer nio:
//! - Structured Logging (Text oder JSON) via tracing-subscriber
//! - Logging-Einstellungen fuer den `[logging]`-Abschnitt der Konfiguration

pub mod logging;

pub use logging::{
    log_format_gueltig, log_level_gueltig, logging_initialisieren, LoggingEinstellungen,
};
