//! Customer store abstraction with an in-memory fallback
//!
//! `save_all` replaces the whole record set, so every caller must treat
//! load → mutate → save as one unit with no suspension point in between.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};

use crate::customer::{IdentityRecord, TurnRecord};
use crate::matcher::{self, MatchPolicy};
use crate::{Error, Result};

/// Persistence of identity records and their transcripts
pub trait CustomerStore: Send + Sync {
    /// Load every record in insertion order
    ///
    /// # Errors
    ///
    /// Returns error if storage is unavailable
    fn load_all(&self) -> Result<Vec<IdentityRecord>>;

    /// Replace the persisted record set
    ///
    /// # Errors
    ///
    /// Returns error if storage is unavailable
    fn save_all(&self, records: &[IdentityRecord]) -> Result<()>;

    /// Append one turn to a record's conversation log
    ///
    /// # Errors
    ///
    /// Returns error if storage is unavailable or the id is unknown
    fn append_turn(&self, id: &str, turn: TurnRecord) -> Result<()>;

    /// Whether records are lost on restart
    fn is_volatile(&self) -> bool {
        false
    }
}

/// Volatile store, lost on restart
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<IdentityRecord>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with records
    #[must_use]
    pub const fn with_records(records: Vec<IdentityRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<IdentityRecord>>> {
        self.records
            .lock()
            .map_err(|_| Error::Database("memory store poisoned".to_string()))
    }
}

impl CustomerStore for MemoryStore {
    fn load_all(&self) -> Result<Vec<IdentityRecord>> {
        Ok(self.lock()?.clone())
    }

    fn save_all(&self, records: &[IdentityRecord]) -> Result<()> {
        *self.lock()? = records.to_vec();
        Ok(())
    }

    fn append_turn(&self, id: &str, turn: TurnRecord) -> Result<()> {
        let mut records = self.lock()?;
        let record = records
            .iter_mut()
            .find(|r| r.id() == id)
            .ok_or_else(|| Error::Database(format!("unknown customer: {id}")))?;
        record.push_turn(turn);
        Ok(())
    }

    fn is_volatile(&self) -> bool {
        true
    }
}

/// Store that degrades to memory when the primary fails
///
/// After the first primary failure every operation goes to the fallback for
/// the rest of the session; identities become volatile.
pub struct ResilientStore {
    primary: Option<Box<dyn CustomerStore>>,
    fallback: MemoryStore,
    degraded: AtomicBool,
}

impl ResilientStore {
    /// Wrap a primary store
    #[must_use]
    pub fn new(primary: Box<dyn CustomerStore>) -> Self {
        Self {
            primary: Some(primary),
            fallback: MemoryStore::new(),
            degraded: AtomicBool::new(false),
        }
    }

    /// A store that only ever keeps records in memory
    #[must_use]
    pub fn volatile() -> Self {
        Self {
            primary: None,
            fallback: MemoryStore::new(),
            degraded: AtomicBool::new(true),
        }
    }

    /// Whether persistence has been lost for this session
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    fn active_primary(&self) -> Option<&dyn CustomerStore> {
        if self.is_degraded() {
            None
        } else {
            self.primary.as_deref()
        }
    }

    fn degrade(&self, op: &str, error: &Error) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            tracing::warn!(op, error = %error, "customer storage failed, continuing in memory");
        }
    }
}

impl CustomerStore for ResilientStore {
    fn load_all(&self) -> Result<Vec<IdentityRecord>> {
        if let Some(primary) = self.active_primary() {
            match primary.load_all() {
                Ok(records) => return Ok(records),
                Err(e) => self.degrade("load_all", &e),
            }
        }
        Ok(self.fallback.load_all().unwrap_or_default())
    }

    fn save_all(&self, records: &[IdentityRecord]) -> Result<()> {
        if let Some(primary) = self.active_primary() {
            match primary.save_all(records) {
                Ok(()) => return Ok(()),
                Err(e) => self.degrade("save_all", &e),
            }
        }
        if let Err(e) = self.fallback.save_all(records) {
            tracing::warn!(error = %e, "in-memory save failed");
        }
        Ok(())
    }

    fn append_turn(&self, id: &str, turn: TurnRecord) -> Result<()> {
        if let Some(primary) = self.active_primary() {
            match primary.append_turn(id, turn.clone()) {
                Ok(()) => return Ok(()),
                Err(e) => self.degrade("append_turn", &e),
            }
        }
        if let Err(e) = self.fallback.append_turn(id, turn) {
            tracing::debug!(customer = id, error = %e, "turn not recorded");
        }
        Ok(())
    }

    fn is_volatile(&self) -> bool {
        self.is_degraded()
    }
}

/// Matching parameters for [`identify`]
#[derive(Debug, Clone, Copy)]
pub struct MatchSettings {
    pub threshold: f32,
    pub policy: MatchPolicy,
    /// Time since last sighting after which a returning customer is re-greeted
    pub staleness: Duration,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            threshold: matcher::DEFAULT_MATCH_THRESHOLD,
            policy: MatchPolicy::FirstMatch,
            staleness: Duration::minutes(30),
        }
    }
}

/// Result of resolving a captured descriptor to a customer
#[derive(Debug, Clone)]
pub struct Identification {
    pub record: IdentityRecord,
    pub is_new: bool,
    /// New customer, or returning after the staleness window
    pub should_greet: bool,
}

/// Match a descriptor, creating or touching the record, and persist
///
/// Staleness is judged against the `last_seen_at` stored before this
/// sighting.
///
/// # Errors
///
/// Returns error if the store fails
pub fn identify<S: CustomerStore + ?Sized>(
    store: &S,
    descriptor: &[f32],
    now: DateTime<Utc>,
    settings: &MatchSettings,
) -> Result<Identification> {
    let mut records = store.load_all()?;

    let identification = match matcher::match_index(
        descriptor,
        &records,
        settings.threshold,
        settings.policy,
    ) {
        Some(index) => {
            let record = &mut records[index];
            let should_greet = record.is_stale(now, settings.staleness);
            record.touch(now);
            Identification {
                record: record.clone(),
                is_new: false,
                should_greet,
            }
        }
        None => {
            let record = IdentityRecord::new(descriptor.to_vec(), now);
            records.push(record.clone());
            Identification {
                record,
                is_new: true,
                should_greet: true,
            }
        }
    };

    store.save_all(&records)?;

    tracing::info!(
        customer = identification.record.id(),
        is_new = identification.is_new,
        should_greet = identification.should_greet,
        "customer identified"
    );

    Ok(identification)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenStore;

    impl CustomerStore for BrokenStore {
        fn load_all(&self) -> Result<Vec<IdentityRecord>> {
            Err(Error::Database("disk gone".into()))
        }

        fn save_all(&self, _records: &[IdentityRecord]) -> Result<()> {
            Err(Error::Database("disk gone".into()))
        }

        fn append_turn(&self, _id: &str, _turn: TurnRecord) -> Result<()> {
            Err(Error::Database("disk gone".into()))
        }
    }

    fn face(seed: f32) -> Vec<f32> {
        vec![seed; 128]
    }

    #[test]
    fn test_identify_lifecycle() {
        let store = MemoryStore::new();
        let settings = MatchSettings::default();
        let t0 = Utc::now();

        let first = identify(&store, &face(0.1), t0, &settings).unwrap();
        assert!(first.is_new);
        assert!(first.should_greet);
        assert_eq!(first.record.last_seen_at(), t0);

        let soon = identify(&store, &face(0.1), t0 + Duration::minutes(5), &settings).unwrap();
        assert!(!soon.is_new);
        assert!(!soon.should_greet);
        assert_eq!(soon.record.id(), first.record.id());

        let later = identify(&store, &face(0.1), t0 + Duration::minutes(36), &settings).unwrap();
        assert!(!later.is_new);
        assert!(later.should_greet);
        assert_eq!(store.load_all().unwrap().len(), 1);
    }

    #[test]
    fn test_identify_keeps_descriptor_immutable() {
        let store = MemoryStore::new();
        let settings = MatchSettings::default();
        let t0 = Utc::now();

        identify(&store, &face(0.1), t0, &settings).unwrap();
        identify(&store, &face(0.12), t0 + Duration::minutes(1), &settings).unwrap();

        let records = store.load_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].descriptor(), face(0.1).as_slice());
    }

    #[test]
    fn test_resilient_store_falls_back_to_memory() {
        let store = ResilientStore::new(Box::new(BrokenStore));
        assert!(!store.is_degraded());

        assert!(store.load_all().unwrap().is_empty());
        assert!(store.is_degraded());

        let id = identify(&store, &face(0.3), Utc::now(), &MatchSettings::default())
            .unwrap()
            .record
            .id()
            .to_string();
        store
            .append_turn(
                &id,
                TurnRecord {
                    user_text: "salam".into(),
                    assistant_text: "salam!".into(),
                    timestamp: Utc::now(),
                },
            )
            .unwrap();

        let records = store.load_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].conversations().len(), 1);
    }

    #[test]
    fn test_volatile_store() {
        let store = ResilientStore::volatile();
        assert!(store.is_degraded());
        assert!(store.is_volatile());
        let turn = TurnRecord {
            user_text: String::new(),
            assistant_text: String::new(),
            timestamp: Utc::now(),
        };
        assert!(store.append_turn("nobody", turn).is_ok());
    }
}
