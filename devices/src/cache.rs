//! Shared property cache
//!
//! Device state normalized by the transport adapters lands here as dotted
//! `GROUP.ELEMENT` keys. A key is present only after a successful read from
//! the active transport; absence means unknown, never zero.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A single normalized device property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Number(f64),
    Text(String),
    Switch(bool),
}

impl PropertyValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            PropertyValue::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_switch(&self) -> Option<bool> {
        match self {
            PropertyValue::Switch(v) => Some(*v),
            _ => None,
        }
    }
}

impl std::fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertyValue::Number(v) => write!(f, "{}", v),
            PropertyValue::Text(v) => write!(f, "{}", v),
            PropertyValue::Switch(v) => write!(f, "{}", if *v { "On" } else { "Off" }),
        }
    }
}

/// Dotted-key property map shared between a facade and its adapters
///
/// Cloning is cheap and yields a handle onto the same map. The single lock
/// means readers never observe a torn multi-key write from one vector update.
#[derive(Debug, Clone, Default)]
pub struct PropertyCache {
    inner: Arc<RwLock<HashMap<String, PropertyValue>>>,
}

impl PropertyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a value by dotted key
    pub async fn get(&self, key: &str) -> Option<PropertyValue> {
        self.inner.read().await.get(key).cloned()
    }

    /// Get a number value, None when absent or of another kind
    pub async fn number(&self, key: &str) -> Option<f64> {
        self.get(key).await.and_then(|v| v.as_number())
    }

    /// Get a text value, None when absent or of another kind
    pub async fn text(&self, key: &str) -> Option<String> {
        match self.get(key).await {
            Some(PropertyValue::Text(v)) => Some(v),
            _ => None,
        }
    }

    /// Get a switch value, None when absent or of another kind
    pub async fn switch(&self, key: &str) -> Option<bool> {
        self.get(key).await.and_then(|v| v.as_switch())
    }

    /// Store a value, overwriting any previous one
    pub async fn set(&self, key: &str, value: PropertyValue) {
        self.inner.write().await.insert(key.to_string(), value);
    }

    /// Remove a single key
    pub async fn remove(&self, key: &str) -> Option<PropertyValue> {
        self.inner.write().await.remove(key)
    }

    /// Remove every key belonging to one property group
    pub async fn remove_group(&self, property: &str) {
        let prefix = format!("{}.", property);
        self.inner
            .write()
            .await
            .retain(|key, _| !key.starts_with(&prefix) && key != property);
    }

    /// Drop all entries. The cache itself stays usable.
    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.inner.read().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Copy of the whole map for observers
    pub async fn snapshot(&self) -> HashMap<String, PropertyValue> {
        self.inner.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_overwrite() {
        let cache = PropertyCache::new();
        assert!(cache.get("CCD_TEMPERATURE.CCD_TEMPERATURE_VALUE").await.is_none());

        cache
            .set(
                "CCD_TEMPERATURE.CCD_TEMPERATURE_VALUE",
                PropertyValue::Number(-10.0),
            )
            .await;
        assert_eq!(
            cache.number("CCD_TEMPERATURE.CCD_TEMPERATURE_VALUE").await,
            Some(-10.0)
        );

        cache
            .set(
                "CCD_TEMPERATURE.CCD_TEMPERATURE_VALUE",
                PropertyValue::Number(-12.5),
            )
            .await;
        assert_eq!(
            cache.number("CCD_TEMPERATURE.CCD_TEMPERATURE_VALUE").await,
            Some(-12.5)
        );
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_typed_getters_reject_other_kinds() {
        let cache = PropertyCache::new();
        cache
            .set("CONNECTION.CONNECT", PropertyValue::Switch(true))
            .await;

        assert_eq!(cache.switch("CONNECTION.CONNECT").await, Some(true));
        assert_eq!(cache.number("CONNECTION.CONNECT").await, None);
        assert_eq!(cache.text("CONNECTION.CONNECT").await, None);
    }

    #[tokio::test]
    async fn test_clear_keeps_cache_usable() {
        let cache = PropertyCache::new();
        cache
            .set("WEATHER_PARAMETERS.WEATHER_TEMPERATURE", PropertyValue::Number(4.0))
            .await;
        assert!(!cache.is_empty().await);

        cache.clear().await;
        assert!(cache.is_empty().await);

        cache
            .set("WEATHER_PARAMETERS.WEATHER_TEMPERATURE", PropertyValue::Number(5.0))
            .await;
        assert_eq!(
            cache.number("WEATHER_PARAMETERS.WEATHER_TEMPERATURE").await,
            Some(5.0)
        );
    }

    #[tokio::test]
    async fn test_remove_group() {
        let cache = PropertyCache::new();
        cache.set("CCD_FRAME.X", PropertyValue::Number(0.0)).await;
        cache.set("CCD_FRAME.Y", PropertyValue::Number(0.0)).await;
        cache
            .set("CCD_BINNING.HOR_BIN", PropertyValue::Number(1.0))
            .await;

        cache.remove_group("CCD_FRAME").await;
        assert!(!cache.contains("CCD_FRAME.X").await);
        assert!(!cache.contains("CCD_FRAME.Y").await);
        assert!(cache.contains("CCD_BINNING.HOR_BIN").await);
    }

    #[tokio::test]
    async fn test_clone_shares_storage() {
        let cache = PropertyCache::new();
        let handle = cache.clone();
        handle.set("IMAGEREADY", PropertyValue::Switch(false)).await;
        assert_eq!(cache.switch("IMAGEREADY").await, Some(false));
    }

    #[tokio::test]
    async fn test_snapshot_is_independent() {
        let cache = PropertyCache::new();
        cache.set("CAN_FAST", PropertyValue::Switch(true)).await;

        let snapshot = cache.snapshot().await;
        cache.clear().await;

        assert_eq!(
            snapshot.get("CAN_FAST"),
            Some(&PropertyValue::Switch(true))
        );
        assert!(cache.is_empty().await);
    }
}
