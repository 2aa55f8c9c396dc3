//! Profile resolution with a bounded TTL cache.
//!
//! Names flow in from the extractor; profiles flow out from an upstream
//! [`ProfileSource`] through a read-through cache. Misses are reported, not
//! errored: a name the source does not know is a normal outcome the router
//! turns into a "not found" answer.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use async_trait::async_trait;

use crate::config::ProfileCacheConfig;
use crate::error::CoreError;
use crate::types::{EntityProfile, EquipmentRecord};

// ---------------------------------------------------------------------------
// Source trait
// ---------------------------------------------------------------------------

/// Upstream store of entity profiles and their equipment.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    /// Batched lookup. The returned map is keyed by the *requested* name, so
    /// alias hits map the alias back to the full profile.
    async fn lookup_profiles(
        &self,
        names: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, EntityProfile>, CoreError>;

    /// Equipment owned by the named entities. Default: none.
    async fn lookup_equipment(
        &self,
        _owner_names: &BTreeSet<String>,
    ) -> Result<Vec<EquipmentRecord>, CoreError> {
        Ok(Vec::new())
    }
}

/// Outcome of a batched resolution.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Requested name -> full profile, for every name that resolved.
    pub found: BTreeMap<String, EntityProfile>,
    /// Requested names nobody knew.
    pub missing: BTreeSet<String>,
}

impl Resolution {
    pub fn all_found(&self) -> bool {
        self.missing.is_empty() && !self.found.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

struct CacheEntry {
    profile: EntityProfile,
    expires_at: Instant,
}

/// Read-through profile resolver.
///
/// The cache is keyed by the normalized requested name. Entries expire after
/// the configured TTL and the map is bounded; when full, expired entries are
/// evicted first and new inserts are skipped if the bound still holds.
/// Negative results are never cached, so a profile created upstream becomes
/// visible on the next query.
pub struct ProfileResolver {
    source: Arc<dyn ProfileSource>,
    cache: RwLock<HashMap<String, CacheEntry>>,
    config: ProfileCacheConfig,
}

fn cache_key(name: &str) -> String {
    name.trim().to_lowercase()
}

impl ProfileResolver {
    pub fn new(source: Arc<dyn ProfileSource>, config: ProfileCacheConfig) -> Self {
        Self {
            source,
            cache: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Resolve `names` against the cache, then the source for the remainder.
    ///
    /// A source failure is recovered locally: the names that missed the cache
    /// are all reported missing and a warning is logged.
    pub async fn resolve(&self, names: &BTreeSet<String>) -> Resolution {
        let mut resolution = Resolution::default();
        let mut uncached: BTreeSet<String> = BTreeSet::new();

        {
            let now = Instant::now();
            let cache = self.cache.read().expect("profile cache lock poisoned");
            for name in names {
                match cache.get(&cache_key(name)) {
                    Some(entry) if entry.expires_at > now => {
                        resolution
                            .found
                            .insert(name.clone(), entry.profile.clone());
                    }
                    _ => {
                        uncached.insert(name.clone());
                    }
                }
            }
        }

        if uncached.is_empty() {
            return resolution;
        }

        match self.source.lookup_profiles(&uncached).await {
            Ok(fetched) => {
                for name in &uncached {
                    match fetched.get(name) {
                        Some(profile) => {
                            self.insert(name, profile.clone());
                            resolution.found.insert(name.clone(), profile.clone());
                        }
                        None => {
                            resolution.missing.insert(name.clone());
                        }
                    }
                }
            }
            Err(e) => {
                log::warn!("profile source lookup failed, treating {} name(s) as missing: {}", uncached.len(), e);
                resolution.missing.extend(uncached);
            }
        }

        resolution
    }

    /// Equipment for the given owners, straight from the source. Failures
    /// degrade to an empty list.
    pub async fn equipment_for(&self, owner_names: &BTreeSet<String>) -> Vec<EquipmentRecord> {
        match self.source.lookup_equipment(owner_names).await {
            Ok(records) => records,
            Err(e) => {
                log::warn!("equipment lookup failed, continuing without: {}", e);
                Vec::new()
            }
        }
    }

    fn insert(&self, name: &str, profile: EntityProfile) {
        let now = Instant::now();
        let mut cache = self.cache.write().expect("profile cache lock poisoned");
        if cache.len() >= self.config.max_entries {
            cache.retain(|_, entry| entry.expires_at > now);
        }
        // Still full after evicting expired entries: serve this one uncached.
        if cache.len() >= self.config.max_entries {
            return;
        }
        cache.insert(
            cache_key(name),
            CacheEntry {
                profile,
                expires_at: now + self.config.ttl,
            },
        );
    }

    #[cfg(test)]
    fn cached_len(&self) -> usize {
        self.cache.read().unwrap().len()
    }
}

// ---------------------------------------------------------------------------
// In-memory source
// ---------------------------------------------------------------------------

/// Simple source over an in-memory profile list. Lookup order per name:
/// exact canonical match, then case-insensitive canonical or alias match.
#[derive(Default)]
pub struct InMemoryProfileSource {
    profiles: Vec<EntityProfile>,
    equipment: Vec<EquipmentRecord>,
}

impl InMemoryProfileSource {
    pub fn new(profiles: Vec<EntityProfile>, equipment: Vec<EquipmentRecord>) -> Self {
        Self {
            profiles,
            equipment,
        }
    }
}

#[async_trait]
impl ProfileSource for InMemoryProfileSource {
    async fn lookup_profiles(
        &self,
        names: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, EntityProfile>, CoreError> {
        let mut found = BTreeMap::new();
        for name in names {
            if let Some(profile) = self.profiles.iter().find(|p| p.matches_name(name)) {
                found.insert(name.clone(), profile.clone());
            }
        }
        Ok(found)
    }

    async fn lookup_equipment(
        &self,
        owner_names: &BTreeSet<String>,
    ) -> Result<Vec<EquipmentRecord>, CoreError> {
        Ok(self
            .equipment
            .iter()
            .filter(|r| {
                owner_names
                    .iter()
                    .any(|n| r.owner_name.eq_ignore_ascii_case(n))
            })
            .cloned()
            .collect())
    }
}
