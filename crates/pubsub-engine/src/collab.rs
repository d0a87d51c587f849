//! Interfaces to the engine's collaborators, plus the implementations the
//! daemon ships with.
//!
//! - [`ConfigurationStore`]: where subscription configurations come from
//! - [`NotificationDispatcher`]: where matching events go
//! - [`NetworkSignal`]: current connectivity and its quality

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use parking_lot::RwLock;
use pubsub_core::{Configuration, ConfigurationFile, RelayEvent};

use crate::bus::{EngineEvent, EventBus};
use crate::error::{Error, Result};
use crate::relay::url::normalize_all;

// =============================================================================
// Configurations
// =============================================================================

/// Read-only source of subscription configurations.
pub trait ConfigurationStore: Send + Sync {
    /// Every enabled configuration.
    fn enabled_configurations(&self) -> Vec<Configuration>;

    /// A configuration by id, enabled or not.
    fn by_id(&self, id: &str) -> Option<Configuration>;
}

/// Configurations held in memory. Replaceable at runtime.
#[derive(Default)]
pub struct StaticConfigurationStore {
    configurations: RwLock<Vec<Configuration>>,
}

impl StaticConfigurationStore {
    pub fn new(configurations: Vec<Configuration>) -> Self {
        Self {
            configurations: RwLock::new(prepare(configurations)),
        }
    }

    /// Swap in a new set of configurations.
    pub fn replace(&self, configurations: Vec<Configuration>) {
        *self.configurations.write() = prepare(configurations);
    }

    pub fn len(&self) -> usize {
        self.configurations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ConfigurationStore for StaticConfigurationStore {
    fn enabled_configurations(&self) -> Vec<Configuration> {
        self.configurations
            .read()
            .iter()
            .filter(|c| c.enabled)
            .cloned()
            .collect()
    }

    fn by_id(&self, id: &str) -> Option<Configuration> {
        self.configurations.read().iter().find(|c| c.id == id).cloned()
    }
}

/// Normalize relay URLs and drop configurations that cannot be used.
fn prepare(configurations: Vec<Configuration>) -> Vec<Configuration> {
    configurations
        .into_iter()
        .filter_map(|mut config| {
            config.relay_urls = normalize_all(&config.relay_urls);
            match config.validate() {
                Ok(()) => Some(config),
                Err(e) => {
                    tracing::warn!("Skipping configuration: {}", e);
                    None
                }
            }
        })
        .collect()
}

/// Configurations loaded from a JSON file (see [`ConfigurationFile`]).
pub struct FileConfigurationStore {
    path: PathBuf,
    inner: StaticConfigurationStore,
}

impl FileConfigurationStore {
    /// Load configurations from `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let configurations = read_file(path)?;
        tracing::info!(
            "Loaded {} configurations from {}",
            configurations.len(),
            path.display()
        );
        Ok(Self {
            path: path.to_path_buf(),
            inner: StaticConfigurationStore::new(configurations),
        })
    }

    /// Re-read the file. On error the previous configurations stay in place.
    pub fn reload(&self) -> Result<usize> {
        let configurations = read_file(&self.path)?;
        self.inner.replace(configurations);
        Ok(self.inner.len())
    }
}

impl ConfigurationStore for FileConfigurationStore {
    fn enabled_configurations(&self) -> Vec<Configuration> {
        self.inner.enabled_configurations()
    }

    fn by_id(&self, id: &str) -> Option<Configuration> {
        self.inner.by_id(id)
    }
}

fn read_file(path: &Path) -> Result<Vec<Configuration>> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read configurations from {}: {}",
            path.display(),
            e
        ))
    })?;
    let file: ConfigurationFile = serde_json::from_str(&contents)?;
    Ok(file.configurations)
}

// =============================================================================
// Dispatch
// =============================================================================

/// Receives every event that passed the pipeline.
pub trait NotificationDispatcher: Send + Sync {
    /// Present `event`. `destination_uri` already carries the event reference.
    fn show(&self, event: &RelayEvent, destination_uri: &str, configuration: &Configuration);
}

/// Logs each delivery and publishes it on the event bus.
pub struct BusDispatcher {
    bus: EventBus,
}

impl BusDispatcher {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

impl NotificationDispatcher for BusDispatcher {
    fn show(&self, event: &RelayEvent, destination_uri: &str, configuration: &Configuration) {
        tracing::info!(
            configuration = %configuration.id,
            event = %event.id,
            kind = event.kind,
            "Delivering event to {}",
            configuration.destination
        );
        self.bus.publish(EngineEvent::EventDelivered {
            configuration_id: configuration.id.clone(),
            event_id: event.id.clone(),
            destination_uri: destination_uri.to_string(),
        });
    }
}

// =============================================================================
// Network
// =============================================================================

/// Coarse connection quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NetworkQuality {
    None = 0,
    Low = 1,
    Medium = 2,
    High = 3,
}

impl NetworkQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            3 => Self::High,
            2 => Self::Medium,
            1 => Self::Low,
            _ => Self::None,
        }
    }
}

impl std::fmt::Display for NetworkQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NetworkQuality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            "none" => Ok(Self::None),
            other => Err(Error::Config(format!("Unknown network quality: {}", other))),
        }
    }
}

/// Current network availability.
pub trait NetworkSignal: Send + Sync {
    fn available(&self) -> bool;
    fn quality(&self) -> NetworkQuality;
}

/// Network signal set by hand (CLI flag, tests, or an external probe).
pub struct StaticNetworkSignal {
    available: AtomicBool,
    quality: AtomicU8,
}

impl StaticNetworkSignal {
    pub fn new(quality: NetworkQuality) -> Self {
        Self {
            available: AtomicBool::new(quality != NetworkQuality::None),
            quality: AtomicU8::new(quality as u8),
        }
    }

    pub fn set(&self, quality: NetworkQuality) {
        self.quality.store(quality as u8, Ordering::Relaxed);
        self.available
            .store(quality != NetworkQuality::None, Ordering::Relaxed);
    }
}

impl NetworkSignal for StaticNetworkSignal {
    fn available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    fn quality(&self) -> NetworkQuality {
        if !self.available() {
            return NetworkQuality::None;
        }
        NetworkQuality::from_u8(self.quality.load(Ordering::Relaxed))
    }
}
