//! Device identity resolution
//!
//! Each installation gets one pseudo-random identifier, generated on first use
//! and persisted in a device-local key-value store. The resolver never fails:
//! if the store cannot be read or written, a volatile id is used for the rest
//! of the process lifetime.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::KvError;
use crate::types::DeviceId;

/// Key under which the device id is cached
pub const DEVICE_ID_KEY: &str = "medtrack.device_id";

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Device-local persistent key-value store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), KvError>;
}

/// JSON file backed key-value store
pub struct FileKeyValueStore {
    path: PathBuf,
    // Serializes read-modify-write of the file within this process
    write_lock: tokio::sync::Mutex<()>,
}

impl FileKeyValueStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_map(&self) -> Result<HashMap<String, String>, KvError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => Ok(serde_json::from_str(&s)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        Ok(self.read_map().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.read_map().await?;
        map.insert(key.to_string(), value.to_string());

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(&map)?;
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }
}

/// In-memory key-value store (for testing)
#[derive(Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, String>>,
    failing: Mutex<bool>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `KvError::Unavailable`
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        if *self.failing.lock() {
            return Err(KvError::Unavailable);
        }
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        if *self.failing.lock() {
            return Err(KvError::Unavailable);
        }
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Resolves and caches this installation's [`DeviceId`]
pub struct DeviceIdResolver {
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    cached: OnceCell<DeviceId>,
}

impl DeviceIdResolver {
    pub fn new(kv: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            kv,
            clock,
            cached: OnceCell::new(),
        }
    }

    /// Return the device id, creating and persisting it on first use
    pub async fn device_id(&self) -> DeviceId {
        self.cached
            .get_or_init(|| async { self.load_or_create().await })
            .await
            .clone()
    }

    async fn load_or_create(&self) -> DeviceId {
        match self.kv.get(DEVICE_ID_KEY).await {
            Ok(Some(stored)) if !stored.is_empty() => {
                debug!("Loaded device id {}", stored);
                return DeviceId::new(stored);
            }
            Ok(_) => {}
            Err(e) => {
                let id = generate_device_id(self.clock.now());
                warn!(
                    "Device id store unreadable ({}), using volatile id {} for this process",
                    e, id
                );
                return id;
            }
        }

        let id = generate_device_id(self.clock.now());
        match self.kv.set(DEVICE_ID_KEY, id.as_str()).await {
            Ok(()) => info!("Generated new device id {}", id),
            Err(e) => warn!(
                "Failed to persist device id ({}), using volatile id {} for this process",
                e, id
            ),
        }
        id
    }
}

/// Generate a fresh id: base-36 timestamp prefix followed by a base-36 random suffix
pub fn generate_device_id(now: DateTime<Utc>) -> DeviceId {
    let millis = u64::try_from(now.timestamp_millis()).unwrap_or(0);
    let mut id = to_base36(millis);
    id.push_str(&to_base36(random_suffix(now)));
    DeviceId::new(id)
}

fn random_suffix(now: DateTime<Utc>) -> u64 {
    let mut bytes = [0u8; 8];
    match getrandom::fill(&mut bytes) {
        Ok(()) => u64::from_le_bytes(bytes),
        Err(e) => {
            // Best-effort uniqueness only
            warn!("System RNG unavailable ({}), deriving suffix from clock", e);
            u64::from(now.timestamp_subsec_nanos()) ^ u64::from(std::process::id()).rotate_left(32)
        }
    }
}

/// Encode a number in lowercase base 36
pub fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36[(n % 36) as usize]);
        n /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}
