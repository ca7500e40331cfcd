use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// Stable storage keys shared with the web client's localStorage layout.
pub mod keys {
    pub const USER_PROFILE: &str = "rizz_user_profile";
    pub const SAVED_PARTNERS: &str = "rizz_saved_partners";
    pub const PRO_EXPIRY: &str = "rizz_pro_expiry";
    pub const PRO_TYPE: &str = "rizz_pro_type";
    pub const FREE_PASSES: &str = "rizz_free_passes";
    pub const LANGUAGE: &str = "rizz_language";
    pub const HAS_VISITED: &str = "rizz_has_visited";
}

/// File-backed key/value preference store.
///
/// Stands in for the browser's localStorage: scalar and JSON-serialized
/// values under stable string keys, with every mutation written through to
/// disk before returning. Reads refresh from disk so a second handle on the
/// same path observes prior writes.
#[derive(Debug, Clone)]
pub struct PrefsStore {
    path: PathBuf,
    payload: Option<Map<String, Value>>,
}

impl PrefsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            payload: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get_value(&mut self, key: &str) -> Option<Value> {
        self.ensure_loaded(true).get(key).cloned()
    }

    pub fn set_value(&mut self, key: &str, value: Value) -> Result<()> {
        let payload = self.ensure_loaded(true);
        if payload.get(key) == Some(&value) {
            return Ok(());
        }
        payload.insert(key.to_string(), value);
        self.write_through()
    }

    pub fn remove(&mut self, key: &str) -> Result<()> {
        let payload = self.ensure_loaded(true);
        if payload.remove(key).is_none() {
            return Ok(());
        }
        self.write_through()
    }

    /// Drops every persisted key, used by the "reset data" support action.
    pub fn clear(&mut self) -> Result<()> {
        self.payload = Some(Map::new());
        self.write_through()
    }

    pub fn get_json<T: DeserializeOwned>(&mut self, key: &str) -> Option<T> {
        let value = self.get_value(key)?;
        serde_json::from_value(value).ok()
    }

    pub fn set_json<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)
            .with_context(|| format!("failed serializing value for key '{key}'"))?;
        self.set_value(key, value)
    }

    pub fn get_i64(&mut self, key: &str) -> Option<i64> {
        self.get_value(key).and_then(|value| value.as_i64())
    }

    pub fn set_i64(&mut self, key: &str, value: i64) -> Result<()> {
        self.set_value(key, Value::Number(value.into()))
    }

    pub fn get_string(&mut self, key: &str) -> Option<String> {
        self.get_value(key)
            .and_then(|value| value.as_str().map(str::to_string))
    }

    pub fn set_string(&mut self, key: &str, value: &str) -> Result<()> {
        self.set_value(key, Value::String(value.to_string()))
    }

    pub fn get_bool(&mut self, key: &str) -> Option<bool> {
        self.get_value(key).and_then(|value| value.as_bool())
    }

    pub fn set_bool(&mut self, key: &str, value: bool) -> Result<()> {
        self.set_value(key, Value::Bool(value))
    }

    fn ensure_loaded(&mut self, refresh: bool) -> &mut Map<String, Value> {
        if refresh || self.payload.is_none() {
            self.payload = Some(read_json_object(&self.path).unwrap_or_default());
        }
        self.payload.as_mut().expect("store payload initialized")
    }

    fn write_through(&mut self) -> Result<()> {
        let payload = self.payload.clone().unwrap_or_default();
        write_json_object(&self.path, &payload)?;
        Ok(())
    }
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        path,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{keys, PrefsStore};

    #[test]
    fn set_writes_through_and_reloads_from_disk() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("prefs.json");

        let mut store = PrefsStore::new(&path);
        store.set_i64(keys::FREE_PASSES, 3)?;
        store.set_string(keys::LANGUAGE, "ko")?;

        let mut other = PrefsStore::new(&path);
        assert_eq!(other.get_i64(keys::FREE_PASSES), Some(3));
        assert_eq!(other.get_string(keys::LANGUAGE), Some("ko".to_string()));
        Ok(())
    }

    #[test]
    fn two_handles_with_disjoint_keys_do_not_clobber() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("prefs.json");

        let mut ticker = PrefsStore::new(&path);
        let mut consumer = PrefsStore::new(&path);
        ticker.set_i64(keys::PRO_EXPIRY, 0)?;
        consumer.set_i64(keys::FREE_PASSES, 2)?;
        ticker.set_string(keys::PRO_TYPE, "none")?;

        let mut check = PrefsStore::new(&path);
        assert_eq!(check.get_i64(keys::PRO_EXPIRY), Some(0));
        assert_eq!(check.get_i64(keys::FREE_PASSES), Some(2));
        assert_eq!(check.get_string(keys::PRO_TYPE), Some("none".to_string()));
        Ok(())
    }

    #[test]
    fn json_values_round_trip() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut store = PrefsStore::new(temp.path().join("prefs.json"));

        let value = json!({ "gender": "Female", "age": 24, "mbti": "INFJ" });
        store.set_value(keys::USER_PROFILE, value.clone())?;
        assert_eq!(store.get_value(keys::USER_PROFILE), Some(value));
        Ok(())
    }

    #[test]
    fn remove_and_clear_drop_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut store = PrefsStore::new(temp.path().join("prefs.json"));
        store.set_i64(keys::PRO_EXPIRY, 123)?;
        store.set_string(keys::PRO_TYPE, "share")?;
        store.set_bool(keys::HAS_VISITED, true)?;

        store.remove(keys::PRO_EXPIRY)?;
        assert_eq!(store.get_value(keys::PRO_EXPIRY), None);
        assert_eq!(store.get_bool(keys::HAS_VISITED), Some(true));

        store.clear()?;
        assert_eq!(store.get_value(keys::PRO_TYPE), None);
        assert_eq!(store.get_value(keys::HAS_VISITED), None);
        Ok(())
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut store = PrefsStore::new(temp.path().join("nope.json"));
        assert_eq!(store.get_value("anything"), None::<Value>);
    }
}
