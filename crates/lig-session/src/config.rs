use serde::{Deserialize, Serialize};

use lig_link::LinkOptions;
use lig_stream::ReadOptions;
use lig_types::PointerWidth;

use crate::error::{LoadError, LoadResult};

/// Configuration for one load.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Raw data blocks at least this many bytes long stay in the source
    /// until asked for. Ignored for sources that cannot seek back.
    pub defer_threshold: Option<usize>,
    /// Move objects into the database of the document they came from
    /// before linking.
    pub split_libraries: bool,
    /// List every library object in the main database after linking.
    pub join_after_link: bool,
    /// Open library documents and resolve placeholders.
    pub expand_libraries: bool,
    /// Expansion passes before giving up (reported when hit).
    pub max_link_passes: usize,
    /// Address width (4 or 8) addresses are converted to; native if unset.
    pub runtime_pointer_width: Option<usize>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            defer_threshold: None,
            split_libraries: true,
            join_after_link: false,
            expand_libraries: true,
            max_link_passes: 64,
            runtime_pointer_width: None,
        }
    }
}

impl LoadConfig {
    /// Read only the opened document.
    pub fn shallow() -> Self {
        Self {
            expand_libraries: false,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> LoadResult<()> {
        if self.max_link_passes == 0 {
            return Err(LoadError::Config("max_link_passes must be at least 1".into()));
        }
        self.address_width().map(|_| ())
    }

    pub fn address_width(&self) -> LoadResult<PointerWidth> {
        match self.runtime_pointer_width {
            None => Ok(PointerWidth::native()),
            Some(n) => PointerWidth::from_bytes(n).map_err(|e| LoadError::Config(e.to_string())),
        }
    }

    pub fn read_options(&self) -> LoadResult<ReadOptions> {
        Ok(ReadOptions {
            defer_threshold: self.defer_threshold,
            address_width: self.address_width()?,
        })
    }

    pub fn link_options(&self) -> LoadResult<LinkOptions> {
        Ok(LinkOptions {
            max_passes: self.max_link_passes,
            // Library objects are read on demand; keep their payloads resident.
            read: ReadOptions {
                defer_threshold: None,
                address_width: self.address_width()?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_keys() {
        let config: LoadConfig = toml::from_str("join_after_link = true\nruntime_pointer_width = 4").unwrap();
        assert!(config.join_after_link);
        assert!(config.expand_libraries);
        assert_eq!(config.max_link_passes, 64);
        assert_eq!(config.address_width().unwrap(), PointerWidth::Four);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let config = LoadConfig {
            runtime_pointer_width: Some(6),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(LoadError::Config(_))));
        let config = LoadConfig {
            max_link_passes: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(LoadConfig::default().validate().is_ok());
    }

    #[test]
    fn json_roundtrip() {
        let config = LoadConfig::shallow();
        let json = serde_json::to_string(&config).unwrap();
        let back: LoadConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
