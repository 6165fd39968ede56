//! Per-user notification preferences and contact details

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::NotificationFrequency;
use crate::traits::{KeyValueStore, PreferencesService, UserDirectory};

const PREFERENCES_PREFIX: &str = "user-preferences:";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPreferences {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub frequency: Option<NotificationFrequency>,
    /// Per-kind switches; kinds not listed are enabled
    #[serde(default)]
    pub notifications: HashMap<String, bool>,
}

pub struct PreferenceStore {
    store: Arc<dyn KeyValueStore>,
}

impl PreferenceStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn load(&self, user_id: &str) -> Result<Option<UserPreferences>> {
        let key = format!("{PREFERENCES_PREFIX}{user_id}");
        self.store
            .get(&key)
            .await?
            .map(|json| {
                serde_json::from_str(&json).with_context(|| format!("corrupt preferences {key}"))
            })
            .transpose()
    }

    pub async fn save(&self, user_id: &str, preferences: &UserPreferences) -> Result<()> {
        let json = serde_json::to_string(preferences)?;
        self.store
            .set(&format!("{PREFERENCES_PREFIX}{user_id}"), &json, None)
            .await
    }
}

#[async_trait]
impl PreferencesService for PreferenceStore {
    async fn is_notification_enabled(&self, user_id: &str, kind: &str) -> Result<bool> {
        Ok(self
            .load(user_id)
            .await?
            .and_then(|prefs| prefs.notifications.get(kind).copied())
            .unwrap_or(true))
    }

    async fn get_notification_frequency(
        &self,
        user_id: &str,
    ) -> Result<Option<NotificationFrequency>> {
        Ok(self.load(user_id).await?.and_then(|prefs| prefs.frequency))
    }
}

#[async_trait]
impl UserDirectory for PreferenceStore {
    async fn get_user_email(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self.load(user_id).await?.and_then(|prefs| prefs.email))
    }
}
