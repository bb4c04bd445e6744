//! Shop settings provider with a read-through cache (§4.10/C10).

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use otp_store::{KeyedStore, KeyedStoreExt, StoreError};

const SETTINGS_KEY: &str = "shop:settings";
const SETTINGS_CACHE_KEY: &str = "cache:settings";
const CACHE_TTL: Duration = Duration::from_secs(5 * 60);
const SETTINGS_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ButtonStyle {
    Rounded,
    Square,
    Pill,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnabledMethods {
    pub sms: bool,
    pub email: bool,
    pub google: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiCustomization {
    pub primary_color: String,
    pub button_style: ButtonStyle,
    pub logo_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShopSettings {
    pub enabled_methods: EnabledMethods,
    pub ui_customization: UiCustomization,
}

impl Default for ShopSettings {
    fn default() -> Self {
        Self {
            enabled_methods: EnabledMethods { sms: true, email: true, google: false },
            ui_customization: UiCustomization { primary_color: "#000000".to_string(), button_style: ButtonStyle::Rounded, logo_url: None },
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("at least one authentication method must remain enabled")]
    AllMethodsDisabled,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub struct SettingsProvider {
    store: Arc<dyn KeyedStore>,
}

impl SettingsProvider {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self { store }
    }

    /// Reads from the 5-minute cache, falling through to the primary
    /// record (and repopulating the cache) on a miss. Defaults are
    /// returned when neither key has ever been written.
    pub async fn get(&self) -> Result<ShopSettings, SettingsError> {
        if let Some(cached) = self.store.get::<ShopSettings>(SETTINGS_CACHE_KEY).await? {
            return Ok(cached);
        }

        let settings = self.store.get::<ShopSettings>(SETTINGS_KEY).await?.unwrap_or_default();
        self.store.set(SETTINGS_CACHE_KEY, &settings, CACHE_TTL).await?;
        Ok(settings)
    }

    /// Writes the primary record, then overwrites the cache (§4.10:
    /// "write primary then overwrite cache"). Rejects a write that
    /// would disable every authentication method.
    pub async fn update(&self, settings: ShopSettings) -> Result<(), SettingsError> {
        let methods = &settings.enabled_methods;
        if !methods.sms && !methods.email && !methods.google {
            return Err(SettingsError::AllMethodsDisabled);
        }

        self.store.set(SETTINGS_KEY, &settings, SETTINGS_TTL).await?;
        self.store.set(SETTINGS_CACHE_KEY, &settings, CACHE_TTL).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otp_store::InMemoryStore;

    fn provider() -> SettingsProvider {
        SettingsProvider::new(Arc::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn get_returns_defaults_when_unset() {
        let provider = provider();
        let settings = provider.get().await.unwrap();
        assert!(settings.enabled_methods.sms);
    }

    #[tokio::test]
    async fn update_then_get_round_trips() {
        let provider = provider();
        let mut settings = ShopSettings::default();
        settings.enabled_methods.google = true;
        settings.ui_customization.primary_color = "#ff0000".to_string();
        provider.update(settings.clone()).await.unwrap();

        let fetched = provider.get().await.unwrap();
        assert!(fetched.enabled_methods.google);
        assert_eq!(fetched.ui_customization.primary_color, "#ff0000");
    }

    #[tokio::test]
    async fn update_rejects_all_methods_disabled() {
        let provider = provider();
        let settings = ShopSettings {
            enabled_methods: EnabledMethods { sms: false, email: false, google: false },
            ..ShopSettings::default()
        };
        assert!(matches!(provider.update(settings).await, Err(SettingsError::AllMethodsDisabled)));
    }
}
