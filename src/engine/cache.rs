//! Named cache volume registry
//!
//! The first reference that names a sharing mode fixes it. Later references
//! without a mode inherit it; references with a different mode conflict.

use crate::engine::errors::{EngineError, Result};
use crate::spec::SharingMode;
use ahash::AHashMap;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// A named, engine-scoped cache volume
#[derive(Debug)]
pub struct CacheVolume {
    id: Uuid,
    name: String,
    sharing: RwLock<SharingMode>,
    fixed: RwLock<bool>,
    source_dir: Option<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl CacheVolume {
    fn new(name: &str, sharing: Option<SharingMode>, source_dir: Option<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            sharing: RwLock::new(sharing.unwrap_or_default()),
            fixed: RwLock::new(sharing.is_some()),
            source_dir,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Identity of the underlying volume
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Volume name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current sharing mode
    #[must_use]
    pub fn sharing(&self) -> SharingMode {
        *self.sharing.read()
    }

    /// Seed directory recorded by the first reference
    #[must_use]
    pub fn source_dir(&self) -> Option<&PathBuf> {
        self.source_dir.as_ref()
    }

    /// Acquires the volume for `Private` or `Locked` access.
    ///
    /// `Shared` volumes return `None` immediately.
    pub async fn acquire(&self) -> Option<OwnedMutexGuard<()>> {
        match self.sharing() {
            SharingMode::Shared => None,
            SharingMode::Private | SharingMode::Locked => {
                Some(Arc::clone(&self.lock).lock_owned().await)
            }
        }
    }
}

/// Engine-scoped map from volume name to volume
#[derive(Debug, Default)]
pub struct CacheVolumeRegistry {
    volumes: RwLock<AHashMap<String, Arc<CacheVolume>>>,
}

impl CacheVolumeRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `name`, creating the volume on first use.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidConfig`] for a blank name.
    /// - [`EngineError::CacheVolumeConflict`] when `sharing` differs from the
    ///   mode fixed by an earlier reference.
    pub fn reference(
        &self,
        name: &str,
        sharing: Option<SharingMode>,
        source_dir: Option<PathBuf>,
    ) -> Result<Arc<CacheVolume>> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::config("cache volume name must not be empty"));
        }

        if let Some(volume) = self.volumes.read().get(name) {
            Self::check_mode(volume, sharing)?;
            return Ok(Arc::clone(volume));
        }

        let mut volumes = self.volumes.write();
        // Another writer may have won the race between the two locks.
        if let Some(volume) = volumes.get(name) {
            Self::check_mode(volume, sharing)?;
            return Ok(Arc::clone(volume));
        }

        let volume = Arc::new(CacheVolume::new(name, sharing, source_dir));
        tracing::debug!(volume = %name, sharing = %volume.sharing(), "Cache volume created");
        volumes.insert(name.to_string(), Arc::clone(&volume));
        Ok(volume)
    }

    fn check_mode(volume: &CacheVolume, requested: Option<SharingMode>) -> Result<()> {
        let Some(requested) = requested else {
            return Ok(());
        };

        let mut fixed = volume.fixed.write();
        let existing = volume.sharing();
        if !*fixed {
            *volume.sharing.write() = requested;
            *fixed = true;
            return Ok(());
        }
        if existing == requested {
            Ok(())
        } else {
            tracing::warn!(volume = %volume.name, %existing, %requested, "Cache volume sharing conflict");
            Err(EngineError::CacheVolumeConflict {
                name: volume.name.clone(),
                existing,
                requested,
            })
        }
    }

    /// Looks up an existing volume
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<CacheVolume>> {
        self.volumes.read().get(name).cloned()
    }

    /// Number of volumes created so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.volumes.read().len()
    }

    /// Returns true when no volume was referenced yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.volumes.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_same_name_same_volume() {
        let registry = CacheVolumeRegistry::new();
        let a = registry.reference("gomodcache", None, None).unwrap();
        let b = registry.reference("gomodcache", None, None).unwrap();
        assert_eq!(a.id(), b.id());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_defaults_to_shared() {
        let registry = CacheVolumeRegistry::new();
        let volume = registry.reference("v", None, None).unwrap();
        assert_eq!(volume.sharing(), SharingMode::Shared);
    }

    #[test]
    fn test_first_explicit_mode_fixes_it() {
        let registry = CacheVolumeRegistry::new();
        registry.reference("v", None, None).unwrap();
        let volume = registry
            .reference("v", Some(SharingMode::Locked), None)
            .unwrap();
        assert_eq!(volume.sharing(), SharingMode::Locked);

        let err = registry
            .reference("v", Some(SharingMode::Shared), None)
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::CacheVolumeConflict {
                existing: SharingMode::Locked,
                requested: SharingMode::Shared,
                ..
            }
        ));
        assert!(registry.reference("v", None, None).is_ok());
    }

    #[test]
    fn test_blank_name_rejected() {
        let registry = CacheVolumeRegistry::new();
        assert!(registry.reference("  ", None, None).is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_shared_volume_does_not_lock() {
        let registry = CacheVolumeRegistry::new();
        let volume = registry
            .reference("shared", Some(SharingMode::Shared), None)
            .unwrap();
        assert!(volume.acquire().await.is_none());
    }

    #[tokio::test]
    async fn test_locked_volume_serialises() {
        let registry = CacheVolumeRegistry::new();
        let volume = registry
            .reference("locked", Some(SharingMode::Locked), None)
            .unwrap();
        let guard = volume.acquire().await;
        assert!(guard.is_some());

        let waiter = Arc::clone(&volume);
        let second = tokio::spawn(async move { waiter.acquire().await.is_some() });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second.is_finished());

        drop(guard);
        assert!(second.await.unwrap());
    }
}
