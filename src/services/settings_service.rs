use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::warn;

use crate::db::pool::ImmediateTx;
use crate::db::settings_queries;
use crate::errors::AppError;
use crate::models::alert::{validate_sound_type, GlobalSoundSettings, UpdateGlobalSoundSettings};

pub const KEY_PRICE_REFRESH_INTERVAL: &str = "price_refresh_interval";
pub const KEY_ALERT_SOUND_ENABLED: &str = "alert_sound_enabled";
pub const KEY_ALERT_SOUND_TYPE: &str = "alert_sound_type";
pub const KEY_ALERT_SOUND_VOLUME: &str = "alert_sound_volume";
pub const KEY_ALERT_MUTE_WHEN_ACTIVE: &str = "alert_mute_when_active";

/// KV settings access with serialized read-modify-write.
///
/// WAL lets concurrent readers run, but two writers interleaving a
/// read-then-write on the same key would lose one update. All multi-step
/// writes go through the process mutex AND a BEGIN IMMEDIATE transaction;
/// multi-process deployments rely on the latter.
pub struct SettingsService {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl SettingsService {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(settings_queries::get_setting(&self.pool, key).await?)
    }

    pub async fn get_or(&self, key: &str, default: &str) -> String {
        settings_queries::get_setting_or(&self.pool, key, default).await
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = ImmediateTx::begin(&self.pool).await?;
        settings_queries::set_setting_on(tx.conn(), key, value).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn all(&self) -> Result<Vec<(String, String)>, AppError> {
        Ok(settings_queries::all_settings(&self.pool).await?)
    }

    // ------------------------------------------------------------------
    // Price refresh interval
    // ------------------------------------------------------------------

    /// Stored interval in seconds; 0 means manual mode. Falls back to
    /// `default` when the key is absent or unparseable.
    pub async fn price_refresh_interval(&self, default: u64) -> u64 {
        match self.get(KEY_PRICE_REFRESH_INTERVAL).await {
            Ok(Some(raw)) => raw.parse().unwrap_or(default),
            _ => default,
        }
    }

    // ------------------------------------------------------------------
    // Global alert sound settings
    // ------------------------------------------------------------------

    pub async fn global_sound_settings(&self) -> GlobalSoundSettings {
        let enabled = self.get_or(KEY_ALERT_SOUND_ENABLED, "true").await;
        let sound_type_raw = self.get_or(KEY_ALERT_SOUND_TYPE, "chime").await;
        let volume_raw = self.get_or(KEY_ALERT_SOUND_VOLUME, "70").await;
        let mute = self.get_or(KEY_ALERT_MUTE_WHEN_ACTIVE, "false").await;

        // The global sound type must never be 'default' (circular); fall
        // back to 'chime'.
        let sound_type = match sound_type_raw.as_str() {
            "chime" | "alarm" | "silent" => sound_type_raw,
            _ => "chime".to_string(),
        };

        GlobalSoundSettings {
            enabled: enabled != "false",
            sound_type,
            volume: volume_raw.parse::<i64>().unwrap_or(70).clamp(0, 100),
            mute_when_active: mute == "true",
        }
    }

    pub async fn update_global_sound_settings(
        &self,
        update: UpdateGlobalSoundSettings,
    ) -> Result<GlobalSoundSettings, AppError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = ImmediateTx::begin(&self.pool).await?;

        if let Some(enabled) = update.enabled {
            settings_queries::set_setting_on(
                tx.conn(),
                KEY_ALERT_SOUND_ENABLED,
                if enabled { "true" } else { "false" },
            )
            .await?;
        }
        if let Some(sound_type) = &update.sound_type {
            let safe = validate_sound_type(sound_type);
            if safe == "default" && sound_type != "default" {
                tx.rollback().await.ok();
                return Err(AppError::Validation(format!(
                    "invalid sound_type: {sound_type}"
                )));
            }
            // The stored global must be a concrete sound.
            let stored = if safe == "default" { "chime" } else { safe };
            settings_queries::set_setting_on(tx.conn(), KEY_ALERT_SOUND_TYPE, stored).await?;
        }
        if let Some(volume) = update.volume {
            settings_queries::set_setting_on(
                tx.conn(),
                KEY_ALERT_SOUND_VOLUME,
                &volume.clamp(0, 100).to_string(),
            )
            .await?;
        }
        if let Some(mute) = update.mute_when_active {
            settings_queries::set_setting_on(
                tx.conn(),
                KEY_ALERT_MUTE_WHEN_ACTIVE,
                if mute { "true" } else { "false" },
            )
            .await?;
        }

        tx.commit().await?;
        Ok(self.global_sound_settings().await)
    }
}

/// Resolve a per-alert sound to a concrete sound at fire-time.
///
/// 'default' (or anything unrecognised) resolves through the global setting;
/// a literal 'default' global falls back to 'chime'.
pub fn resolve_alert_sound_type(alert_sound_type: &str, global_sound_type: &str) -> String {
    let safe = validate_sound_type(alert_sound_type);
    if safe == "default" {
        match global_sound_type {
            "chime" | "alarm" | "silent" => global_sound_type.to_string(),
            other => {
                if other != "chime" {
                    warn!("global alert_sound_type {:?} is not concrete, using chime", other);
                }
                "chime".to_string()
            }
        }
    } else {
        safe.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::init_all_tables;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn service() -> SettingsService {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_all_tables(&pool).await.unwrap();
        SettingsService::new(pool)
    }

    #[test]
    fn test_resolve_override_wins() {
        assert_eq!(resolve_alert_sound_type("alarm", "chime"), "alarm");
        assert_eq!(resolve_alert_sound_type("silent", "alarm"), "silent");
    }

    #[test]
    fn test_resolve_default_uses_global() {
        assert_eq!(resolve_alert_sound_type("default", "alarm"), "alarm");
        assert_eq!(resolve_alert_sound_type("default", "silent"), "silent");
    }

    #[test]
    fn test_resolve_never_returns_default() {
        // A literal 'default' global falls back to chime.
        assert_eq!(resolve_alert_sound_type("default", "default"), "chime");
        assert_eq!(resolve_alert_sound_type("garbage", "garbage"), "chime");
    }

    #[tokio::test]
    async fn test_set_get_round_trip() {
        let svc = service().await;
        svc.set("price_refresh_interval", "30").await.unwrap();
        assert_eq!(svc.price_refresh_interval(60).await, 30);
        assert_eq!(svc.get_or("missing", "fallback").await, "fallback");
    }

    #[tokio::test]
    async fn test_global_sound_defaults() {
        let svc = service().await;
        let settings = svc.global_sound_settings().await;
        assert!(settings.enabled);
        assert_eq!(settings.sound_type, "chime");
        assert_eq!(settings.volume, 70);
        assert!(!settings.mute_when_active);
    }

    #[tokio::test]
    async fn test_stored_default_global_resolves_to_chime() {
        let svc = service().await;
        // Corrupt state: global literally stores 'default'.
        svc.set(KEY_ALERT_SOUND_TYPE, "default").await.unwrap();
        let settings = svc.global_sound_settings().await;
        assert_eq!(settings.sound_type, "chime");
    }
}
