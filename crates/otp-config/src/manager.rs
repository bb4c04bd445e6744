//! Hot-reloadable configuration handle.
//!
//! Wraps the loaded `AppConfig` in a `watch` channel so long-lived
//! components (the rate limiter, SMS router) can react to a reload
//! without the process restarting.

use crate::config::AppConfig;
use crate::loader::ConfigLoader;
use crate::validation::ConfigValidator;
use anyhow::Result;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

pub struct ConfigManager {
    current_config: Arc<RwLock<AppConfig>>,
    config_sender: watch::Sender<AppConfig>,
    config_receiver: watch::Receiver<AppConfig>,
    loader: ConfigLoader,
}

impl ConfigManager {
    pub fn new(loader: ConfigLoader) -> Result<Self> {
        let initial_config = loader
            .load()
            .map_err(|e| anyhow::anyhow!("failed to load initial configuration: {}", e))?;
        ConfigValidator::validate_config(&initial_config)
            .map_err(|e| anyhow::anyhow!("initial configuration is invalid: {}", e))?;

        let (config_sender, config_receiver) = watch::channel(initial_config.clone());

        Ok(Self {
            current_config: Arc::new(RwLock::new(initial_config)),
            config_sender,
            config_receiver,
            loader,
        })
    }

    #[cfg(test)]
    pub fn new_with_config(config: AppConfig) -> Self {
        let (config_sender, config_receiver) = watch::channel(config.clone());
        Self {
            current_config: Arc::new(RwLock::new(config)),
            config_sender,
            config_receiver,
            loader: ConfigLoader::new("config", "test"),
        }
    }

    pub fn get_config(&self) -> AppConfig {
        self.current_config.read().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AppConfig> {
        self.config_receiver.clone()
    }

    pub async fn reload_config(&self) -> Result<()> {
        let new_config = self
            .loader
            .load()
            .map_err(|e| anyhow::anyhow!("configuration reload failed: {}", e))?;

        if let Err(e) = ConfigValidator::validate_config(&new_config) {
            error!("configuration validation failed: {}", e);
            return Err(anyhow::anyhow!("invalid configuration: {}", e));
        }

        {
            let mut config = self.current_config.write();
            *config = new_config.clone();
        }
        if self.config_sender.send(new_config).is_err() {
            info!("configuration reloaded with no active subscribers");
        }
        Ok(())
    }
}

impl Clone for ConfigManager {
    fn clone(&self) -> Self {
        Self {
            current_config: Arc::clone(&self.current_config),
            config_sender: self.config_sender.clone(),
            config_receiver: self.config_receiver.clone(),
            loader: ConfigLoader::new("config", "development"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_initial_config() {
        let manager = ConfigManager::new_with_config(AppConfig::default());
        assert_eq!(manager.get_config().server.port, AppConfig::default().server.port);
    }

    #[tokio::test]
    async fn subscribers_see_cloned_config() {
        let manager = ConfigManager::new_with_config(AppConfig::default());
        let rx = manager.subscribe();
        assert_eq!(rx.borrow().server.port, 8080);
    }
}
