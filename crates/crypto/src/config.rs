//! Konfiguration der Verschluesselungs-Maschine
//!
//! Wird optional aus einer TOML-Datei geladen. Alle Felder haben sinnvolle
//! Standardwerte, sodass die Maschine ohne Konfigurationsdatei lauffaehig ist.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use nio_observability::LoggingEinstellungen;

use crate::group_sessions::DEFAULT_MAX_MESSAGES_PER_REQUEST;
use crate::megolm::EncryptionSettings;
use crate::store::DEFAULT_MAX_SESSIONS_PER_DEVICE;

/// Vollstaendige Konfiguration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Einmalschluessel
    pub schluessel: SchluesselEinstellungen,
    /// Megolm-Rotation und Verteilung
    pub gruppen_sitzung: GruppenSitzungEinstellungen,
    /// Speicher-Grenzen
    pub speicher: SpeicherEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchluesselEinstellungen {
    /// Ziel-Anzahl veroeffentlichter Einmalschluessel
    pub max_einmal_schluessel: usize,
}

impl Default for SchluesselEinstellungen {
    fn default() -> Self {
        Self {
            max_einmal_schluessel: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GruppenSitzungEinstellungen {
    /// Rotation nach so vielen Nachrichten
    pub rotation_nachrichten: u64,
    /// Rotation nach so vielen Sekunden
    pub rotation_intervall_sek: u64,
    /// Maximale Anzahl Empfaenger-Geraete pro To-Device-Anfrage
    pub max_nachrichten_pro_anfrage: usize,
}

impl Default for GruppenSitzungEinstellungen {
    fn default() -> Self {
        Self {
            rotation_nachrichten: 100,
            rotation_intervall_sek: 7 * 24 * 60 * 60,
            max_nachrichten_pro_anfrage: DEFAULT_MAX_MESSAGES_PER_REQUEST,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeicherEinstellungen {
    /// Aeltere Olm-Sitzungen werden darueber hinaus verdraengt
    pub max_sitzungen_pro_geraet: usize,
}

impl Default for SpeicherEinstellungen {
    fn default() -> Self {
        Self {
            max_sitzungen_pro_geraet: DEFAULT_MAX_SESSIONS_PER_DEVICE,
        }
    }
}

impl MachineConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    ///
    /// Fehlt die Datei, werden Standardwerte verwendet.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => Self::aus_toml(&inhalt)
                .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}")),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    pub fn aus_toml(inhalt: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(inhalt)?)
    }

    /// Initialisiert das Logging aus dem `[logging]`-Abschnitt
    pub fn logging_initialisieren(&self) -> bool {
        nio_observability::logging_initialisieren(&self.logging)
    }

    pub fn encryption_settings(&self) -> EncryptionSettings {
        EncryptionSettings {
            rotation_period: Duration::from_secs(self.gruppen_sitzung.rotation_intervall_sek),
            rotation_period_msgs: self.gruppen_sitzung.rotation_nachrichten,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
