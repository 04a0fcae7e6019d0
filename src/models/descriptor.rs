//! Asset descriptor: identity, location and runtime tuning of a model file

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Runtime tuning keys (`n_predict`, `temperature`, ...) mapped to values
pub type TuningParams = BTreeMap<String, f64>;

/// Identity and location of a model weight file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    /// Stable registry key (the file name)
    pub id: String,
    /// Human readable name
    pub name: String,
    pub source_url: String,
    pub local_path: PathBuf,
    /// Observed size on disk, 0 until known
    pub size_bytes: u64,
    pub is_downloaded: bool,
    pub is_local: bool,
    /// Tuning the model ships with
    pub default_tuning: TuningParams,
    /// Tuning the runtime context is built with
    pub active_tuning: TuningParams,
}

impl AssetDescriptor {
    pub fn new(id: String, name: String, source_url: String, local_path: PathBuf) -> Self {
        Self {
            id,
            name,
            source_url,
            local_path,
            size_bytes: 0,
            is_downloaded: false,
            is_local: false,
            default_tuning: TuningParams::new(),
            active_tuning: TuningParams::new(),
        }
    }

    /// Record that the file is present on disk with the given size
    pub fn mark_downloaded(&mut self, size_bytes: u64) {
        self.size_bytes = size_bytes;
        self.is_downloaded = true;
        self.is_local = true;
    }

    /// Overlay `params` onto the active tuning
    pub fn apply_tuning(&mut self, params: &TuningParams) {
        for (key, value) in params {
            self.active_tuning.insert(key.clone(), *value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> AssetDescriptor {
        AssetDescriptor::new(
            "tiny.gguf".to_string(),
            "Tiny".to_string(),
            "https://example.com/tiny.gguf".to_string(),
            PathBuf::from("/models/tiny.gguf"),
        )
    }

    #[test]
    fn test_new_descriptor_is_not_downloaded() {
        let d = descriptor();
        assert_eq!(d.size_bytes, 0);
        assert!(!d.is_downloaded);
        assert!(!d.is_local);
        assert!(d.active_tuning.is_empty());
    }

    #[test]
    fn test_mark_downloaded() {
        let mut d = descriptor();
        d.mark_downloaded(4096);
        assert_eq!(d.size_bytes, 4096);
        assert!(d.is_downloaded);
        assert!(d.is_local);
    }

    #[test]
    fn test_apply_tuning_overlays() {
        let mut d = descriptor();
        d.active_tuning.insert("temperature".to_string(), 1.0);
        d.active_tuning.insert("min_p".to_string(), 0.05);

        d.apply_tuning(&TuningParams::from([
            ("temperature".to_string(), 0.7),
            ("top_k".to_string(), 20.0),
        ]));

        assert_eq!(d.active_tuning["temperature"], 0.7);
        assert_eq!(d.active_tuning["top_k"], 20.0);
        assert_eq!(d.active_tuning["min_p"], 0.05);
    }

    #[test]
    fn test_descriptor_serialize() {
        let d = descriptor();
        let json = serde_json::to_string(&d).unwrap();
        assert!(json.contains("tiny.gguf"));
        assert!(json.contains("\"is_downloaded\":false"));
    }
}
