//! Lazily constructed, process-wide provider singletons.
//!
//! Each capability has a selector key (e.g. `IMAGE_STORAGE_PROVIDER`) read
//! from a [`ConfigSource`] at the moment of first use. The constructed
//! instance is cached until [`ProviderRegistry::reset`] is called.

use std::fmt::Display;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::{ConfigSource, ProviderConfig};
use crate::services::image_gen::{self, ImageGenerator, ImageKind};
use crate::services::storage::{self, Storage, StorageKind};
use crate::services::synth::{self, SynthKind, Synthesizer};

pub const STORAGE_SELECTOR: &str = "IMAGE_STORAGE_PROVIDER";
pub const AUDIO_SELECTOR: &str = "AUDIO_PROVIDER";
pub const IMAGE_SELECTOR: &str = "IMAGE_PROVIDER";

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Capability {
    Storage,
    Audio,
    ImageGeneration,
}

type Factory<K, T> = Box<dyn Fn(K, &ProviderConfig) -> Arc<T> + Send + Sync>;

/// One lazily built provider instance per capability.
pub struct ProviderRegistry<K, T: ?Sized> {
    capability: Capability,
    selector_key: &'static str,
    source: Arc<dyn ConfigSource>,
    build: Factory<K, T>,
    slot: Mutex<Option<Arc<T>>>,
}

impl<K, T> ProviderRegistry<K, T>
where
    K: FromStr + Default + Display + Copy,
    T: ?Sized,
{
    pub fn new<F>(
        capability: Capability,
        selector_key: &'static str,
        source: Arc<dyn ConfigSource>,
        build: F,
    ) -> Self
    where
        F: Fn(K, &ProviderConfig) -> Arc<T> + Send + Sync + 'static,
    {
        Self {
            capability,
            selector_key,
            source,
            build: Box::new(build),
            slot: Mutex::new(None),
        }
    }

    /// The cached instance, constructing it on first use.
    ///
    /// Construction happens under the slot lock, so concurrent first callers
    /// all receive the same instance.
    pub fn get(&self) -> Arc<T> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(instance) = slot.as_ref() {
            return Arc::clone(instance);
        }

        let config = ProviderConfig::capture(self.source.as_ref());
        let kind: K = select_kind(config.get(self.selector_key), self.capability);
        let instance = (self.build)(kind, &config);
        tracing::info!(
            capability = %self.capability,
            provider = %kind,
            "Provider constructed"
        );
        *slot = Some(Arc::clone(&instance));
        instance
    }

    /// Drop the cached instance; the next `get` re-reads configuration.
    pub fn reset(&self) {
        let previous = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if previous.is_some() {
            tracing::info!(capability = %self.capability, "Provider reset");
        }
    }

    pub fn is_constructed(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Parse a selector value. Missing values select the default kind; unknown
/// values log a warning and select the default kind.
pub fn select_kind<K>(raw: Option<&str>, capability: Capability) -> K
where
    K: FromStr + Default + Display,
{
    let Some(raw) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return K::default();
    };
    raw.parse().unwrap_or_else(|_| {
        let fallback = K::default();
        tracing::warn!(
            capability = %capability,
            value = raw,
            fallback = %fallback,
            "Unknown provider kind, using default"
        );
        fallback
    })
}

/// The three capability registries behind the HTTP surface.
pub struct Providers {
    storage: ProviderRegistry<StorageKind, dyn Storage>,
    audio: ProviderRegistry<SynthKind, dyn Synthesizer>,
    images: ProviderRegistry<ImageKind, dyn ImageGenerator>,
}

impl Providers {
    pub fn new(source: Arc<dyn ConfigSource>) -> Self {
        Self {
            storage: ProviderRegistry::new(
                Capability::Storage,
                STORAGE_SELECTOR,
                Arc::clone(&source),
                storage::build,
            ),
            audio: ProviderRegistry::new(
                Capability::Audio,
                AUDIO_SELECTOR,
                Arc::clone(&source),
                synth::build,
            ),
            images: ProviderRegistry::new(
                Capability::ImageGeneration,
                IMAGE_SELECTOR,
                source,
                image_gen::build,
            ),
        }
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        self.storage.get()
    }

    pub fn audio(&self) -> Arc<dyn Synthesizer> {
        self.audio.get()
    }

    pub fn images(&self) -> Arc<dyn ImageGenerator> {
        self.images.get()
    }

    pub fn reset(&self, capability: Capability) {
        match capability {
            Capability::Storage => self.storage.reset(),
            Capability::Audio => self.audio.reset(),
            Capability::ImageGeneration => self.images.reset(),
        }
    }

    pub fn reset_all(&self) {
        self.storage.reset();
        self.audio.reset();
        self.images.reset();
    }
}
