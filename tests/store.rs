//! Customer persistence integration tests

use chrono::{Duration, Utc};

use kiosk_concierge::customer::TurnRecord;
use kiosk_concierge::store::{self, MatchSettings};
use kiosk_concierge::{CustomerRepo, CustomerStore, MatchPolicy, ResilientStore, db};

mod common;
use common::{descriptor, setup_test_repo};

#[test]
fn test_identities_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("customers.db");
    let now = Utc::now();

    let first_id = {
        let repo = CustomerRepo::new(db::init(&path).unwrap());
        let first =
            store::identify(&repo, &descriptor(0.1), now, &MatchSettings::default()).unwrap();
        assert!(first.is_new);
        repo.append_turn(
            first.record.id(),
            TurnRecord {
                user_text: "Salam".to_string(),
                assistant_text: "Salam! Sizə necə kömək edə bilərəm?".to_string(),
                timestamp: now,
            },
        )
        .unwrap();
        first.record.id().to_string()
    };

    let repo = CustomerRepo::new(db::init(&path).unwrap());
    let later = now + Duration::minutes(10);
    let again = store::identify(&repo, &descriptor(0.1), later, &MatchSettings::default()).unwrap();

    assert!(!again.is_new);
    assert!(!again.should_greet);
    assert_eq!(again.record.id(), first_id);
    assert_eq!(again.record.conversations().len(), 1);
    assert_eq!(again.record.last_seen_at(), later);
    assert_eq!(repo.count().unwrap(), 1);
}

#[test]
fn test_distinct_faces_get_distinct_records() {
    let repo = setup_test_repo();
    let now = Utc::now();
    let settings = MatchSettings::default();

    let a = store::identify(&repo, &descriptor(0.0), now, &settings).unwrap();
    let b = store::identify(&repo, &descriptor(0.5), now, &settings).unwrap();

    assert!(a.is_new && b.is_new);
    assert_ne!(a.record.id(), b.record.id());
    assert_eq!(repo.load_all().unwrap().len(), 2);
}

#[test]
fn test_nearest_policy_prefers_closest_record() {
    let repo = setup_test_repo();
    let now = Utc::now() - Duration::hours(1);
    let settings = MatchSettings {
        policy: MatchPolicy::Nearest,
        ..MatchSettings::default()
    };

    let far = store::identify(&repo, &descriptor(0.0), now, &settings).unwrap();
    let near = store::identify(&repo, &descriptor(0.06), now, &settings).unwrap();
    assert_ne!(far.record.id(), near.record.id());

    // Within the threshold of both; first-match would pick `far`
    let probe = store::identify(&repo, &descriptor(0.04), Utc::now(), &settings).unwrap();
    assert_eq!(probe.record.id(), near.record.id());
    assert!(probe.should_greet);
}

#[test]
fn test_resilient_store_persists_while_healthy() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("customers.db");

    let store = ResilientStore::new(Box::new(CustomerRepo::new(db::init(&path).unwrap())));
    store::identify(&store, &descriptor(0.2), Utc::now(), &MatchSettings::default()).unwrap();
    assert!(!store.is_volatile());

    let reopened = CustomerRepo::new(db::init(&path).unwrap());
    assert_eq!(reopened.load_all().unwrap().len(), 1);
}
