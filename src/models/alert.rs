use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const SOUND_TYPES: &[&str] = &["default", "chime", "alarm", "silent"];
pub const CONDITION_TYPES: &[&str] = &["price_above", "price_below", "pct_change"];

/// Threshold for pct_change alerts is capped here so a corrupt row can never
/// demand an impossible move.
pub const PCT_CHANGE_THRESHOLD_CAP: f64 = 100.0;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PriceAlert {
    pub id: i64,
    pub ticker: String,
    pub condition_type: String,
    pub threshold: f64,
    pub enabled: i64,
    pub sound_type: String,
    pub triggered_at: Option<String>,
    pub notification_sent: i64,
    pub fired_at: Option<String>,
    pub fire_count: i64,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAlertRequest {
    pub ticker: String,
    pub condition_type: String,
    pub threshold: f64,
    pub sound_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateAlertRequest {
    pub condition_type: Option<String>,
    pub threshold: Option<f64>,
    pub sound_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateAlertSoundRequest {
    pub sound_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GlobalSoundSettings {
    pub enabled: bool,
    pub sound_type: String,
    pub volume: i64,
    pub mute_when_active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateGlobalSoundSettings {
    pub enabled: Option<bool>,
    pub sound_type: Option<String>,
    pub volume: Option<i64>,
    pub mute_when_active: Option<bool>,
}

/// Normalise a stored or submitted sound type; anything outside the allowed
/// set falls back to 'default' so corrupt rows never crash the engine.
pub fn validate_sound_type(sound_type: &str) -> &'static str {
    match sound_type {
        "chime" => "chime",
        "alarm" => "alarm",
        "silent" => "silent",
        _ => "default",
    }
}

/// A ticker is 1-5 ASCII uppercase letters.
pub fn is_valid_ticker(ticker: &str) -> bool {
    !ticker.is_empty() && ticker.len() <= 5 && ticker.bytes().all(|b| b.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_sound_type_falls_back() {
        assert_eq!(validate_sound_type("chime"), "chime");
        assert_eq!(validate_sound_type("alarm"), "alarm");
        assert_eq!(validate_sound_type("silent"), "silent");
        assert_eq!(validate_sound_type("default"), "default");
        assert_eq!(validate_sound_type("klaxon"), "default");
        assert_eq!(validate_sound_type(""), "default");
    }

    #[test]
    fn test_ticker_validation() {
        assert!(is_valid_ticker("AAPL"));
        assert!(is_valid_ticker("A"));
        assert!(is_valid_ticker("GOOGL"));
        assert!(!is_valid_ticker(""));
        assert!(!is_valid_ticker("TOOLONG"));
        assert!(!is_valid_ticker("aapl"));
        assert!(!is_valid_ticker("BRK.B"));
        assert!(!is_valid_ticker("AAP1"));
    }
}
