#![forbid(unsafe_code)]

//! Store configuration.

/// Configuration for a [`Store`](crate::Store).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct StoreConfig {
    /// Label carried in errors and log events. Default: `"store"`.
    pub name: String,
    /// Skip commit and notification when an update yields the identical
    /// snapshot. Default: true.
    pub skip_identical: bool,
    /// Stop a running notification loop once a listener destroys the store.
    /// Default: true.
    pub stop_on_destroy: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: "store".to_owned(),
            skip_identical: true,
            stop_on_destroy: true,
        }
    }
}

impl StoreConfig {
    /// Default configuration with the given name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_skip_identical(mut self, enabled: bool) -> Self {
        self.skip_identical = enabled;
        self
    }

    #[must_use]
    pub fn with_stop_on_destroy(mut self, enabled: bool) -> Self {
        self.stop_on_destroy = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.name, "store");
        assert!(config.skip_identical);
        assert!(config.stop_on_destroy);
    }

    #[test]
    fn builder_chain() {
        let config = StoreConfig::named("cart")
            .with_skip_identical(false)
            .with_stop_on_destroy(false);
        assert_eq!(config.name, "cart");
        assert!(!config.skip_identical);
        assert!(!config.stop_on_destroy);
        assert_eq!(config.with_name("other").name, "other");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn partial_json_fills_defaults() {
        let config: StoreConfig = serde_json::from_str(r#"{"name":"cart"}"#).unwrap();
        assert_eq!(config, StoreConfig::named("cart"));
    }
}
