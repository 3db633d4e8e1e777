//! Customer identity records and conversation turns

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Length of a face descriptor produced by the analysis model
pub const DESCRIPTOR_LEN: usize = 128;

/// Face embedding compared by euclidean distance
pub type Descriptor = Vec<f32>;

/// One user-utterance / assistant-response exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub user_text: String,
    pub assistant_text: String,
    pub timestamp: DateTime<Utc>,
}

/// A persisted customer profile
///
/// The id and descriptor are fixed at creation; only `last_seen_at` and the
/// conversation log change afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    id: String,
    descriptor: Descriptor,
    last_seen_at: DateTime<Utc>,
    conversations: Vec<TurnRecord>,
}

impl IdentityRecord {
    /// Create a record for a face that matched nobody
    #[must_use]
    pub fn new(descriptor: Descriptor, now: DateTime<Utc>) -> Self {
        Self {
            id: generate_customer_id(now),
            descriptor,
            last_seen_at: now,
            conversations: Vec::new(),
        }
    }

    /// Rebuild a record from storage
    #[must_use]
    pub const fn from_parts(
        id: String,
        descriptor: Descriptor,
        last_seen_at: DateTime<Utc>,
        conversations: Vec<TurnRecord>,
    ) -> Self {
        Self {
            id,
            descriptor,
            last_seen_at,
            conversations,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn descriptor(&self) -> &[f32] {
        &self.descriptor
    }

    #[must_use]
    pub const fn last_seen_at(&self) -> DateTime<Utc> {
        self.last_seen_at
    }

    #[must_use]
    pub fn conversations(&self) -> &[TurnRecord] {
        &self.conversations
    }

    /// Record a sighting
    pub const fn touch(&mut self, now: DateTime<Utc>) {
        self.last_seen_at = now;
    }

    /// Append a turn to the conversation log
    pub fn push_turn(&mut self, turn: TurnRecord) {
        self.conversations.push(turn);
    }

    /// Whether the last sighting is older than `staleness`
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, staleness: Duration) -> bool {
        self.last_seen_at < now - staleness
    }

    /// Most recent turns flattened into speaker-prefixed lines
    #[must_use]
    pub fn conversation_history(&self, max_turns: usize) -> Vec<String> {
        let skip = self.conversations.len().saturating_sub(max_turns);
        self.conversations
            .iter()
            .skip(skip)
            .flat_map(|turn| {
                [
                    format!("user: {}", turn.user_text),
                    format!("assistant: {}", turn.assistant_text),
                ]
            })
            .collect()
    }
}

/// Generate an id of the form `customer_<unix_ms>_<9 base36 chars>`
#[must_use]
pub fn generate_customer_id(now: DateTime<Utc>) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("customer_{}_{suffix}", now.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_customer_id_format() {
        let now = Utc::now();
        let id = generate_customer_id(now);
        let parts: Vec<&str> = id.split('_').collect();

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "customer");
        assert_eq!(parts[1], now.timestamp_millis().to_string());
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_ids_are_unique() {
        let now = Utc::now();
        assert_ne!(generate_customer_id(now), generate_customer_id(now));
    }

    #[test]
    fn test_staleness_boundary() {
        let t0 = Utc::now();
        let record = IdentityRecord::new(vec![0.0; DESCRIPTOR_LEN], t0);
        let window = Duration::minutes(30);

        assert!(!record.is_stale(t0 + Duration::minutes(5), window));
        assert!(!record.is_stale(t0 + Duration::minutes(30), window));
        assert!(record.is_stale(t0 + Duration::minutes(31), window));
    }

    #[test]
    fn test_conversation_history_keeps_latest_turns() {
        let now = Utc::now();
        let mut record = IdentityRecord::new(vec![0.0; 4], now);
        for i in 0..3 {
            record.push_turn(TurnRecord {
                user_text: format!("q{i}"),
                assistant_text: format!("a{i}"),
                timestamp: now,
            });
        }

        let history = record.conversation_history(2);
        assert_eq!(history, vec!["user: q1", "assistant: a1", "user: q2", "assistant: a2"]);
    }
}
