//! Normalization of parsed message streams.
//!
//! The [`Normalizer`] sits between the parsers and the store. While batches
//! stream through it, it
//!
//! - maps each platform sender id to a stable internal member id, creating
//!   members on first sight;
//! - tracks name history, closing the previous interval when a member shows
//!   up under a new display name;
//! - resolves replies through a per-corpus `platform id → internal id` map,
//!   with a second pass at end of import for forward references;
//! - reorders non-monotonic batches by `(ts, platform_msg_id)` and warns on
//!   cross-batch inversions beyond a small tolerance;
//! - skips duplicates on re-import, keyed by
//!   `(ts, sender platform id, content hash)`.
//!
//! All maps live for the duration of one import transaction and are never
//! shared with analytics workers.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::message::{ChatKind, ChatMeta, MemberRecord, MessageKind, RawMessage};

/// Seconds of cross-batch timestamp inversion tolerated silently.
const INVERSION_TOLERANCE_SECS: i64 = 5;

/// A normalized message ready for insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    /// Internal id, monotonically assigned in parse order.
    pub id: i64,
    /// Internal member id of the sender.
    pub sender_id: i64,
    /// UTC seconds.
    pub ts: i64,
    /// Uniform kind.
    pub kind: MessageKind,
    /// Text content.
    pub content: Option<String>,
    /// Internal id of the replied-to message, when already resolvable.
    pub reply_to: Option<i64>,
    /// Platform-native message id.
    pub platform_msg_id: Option<String>,
    /// Opaque auxiliary payload.
    pub extra: Option<serde_json::Value>,
}

/// A normalized member ready for insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMember {
    /// Internal id, unique within the corpus.
    pub id: i64,
    /// Raw identifier from the source platform.
    pub platform_id: String,
    /// Account-level name.
    pub account_name: Option<String>,
    /// Per-group nickname.
    pub group_nickname: Option<String>,
    /// Former and alternate names.
    pub aliases: Vec<String>,
    /// Format-specific role strings.
    pub roles: Vec<String>,
    /// Avatar reference.
    pub avatar: Option<String>,
}

impl StoredMember {
    /// Display name: first of group nickname, account name, platform id.
    pub fn display_name(&self) -> &str {
        self.group_nickname
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.account_name.as_deref().filter(|s| !s.is_empty()))
            .unwrap_or(&self.platform_id)
    }
}

/// One name-history interval. `end_ts = None` marks the current name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NameInterval {
    pub member_id: i64,
    pub name: String,
    pub start_ts: i64,
    pub end_ts: Option<i64>,
}

/// Non-fatal conditions observed during normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Cross-batch timestamp inversion beyond tolerance.
    TimestampInversion,
    /// A reply referenced a platform id that never arrived.
    DanglingReply,
}

/// A counted, logged, non-fatal normalization event.
#[derive(Debug, Clone, Serialize)]
pub struct ImportWarning {
    pub kind: WarningKind,
    pub detail: String,
}

struct MemberState {
    member: StoredMember,
    current_name: String,
    name_since: i64,
    /// Timestamp of this member's most recent message.
    last_ts: Option<i64>,
    seeded: bool,
}

/// Everything the import coordinator persists once the stream ends.
pub struct NormalizerOutput {
    pub members: Vec<StoredMember>,
    pub intervals: Vec<NameInterval>,
    pub warnings: Vec<ImportWarning>,
    pub duplicates_skipped: u64,
}

/// Streaming normalizer for one import.
pub struct Normalizer {
    members: HashMap<String, MemberState>,
    next_member_id: i64,
    next_message_id: i64,
    msg_ids: HashMap<String, i64>,
    pending_replies: Vec<(i64, String)>,
    dedup: HashSet<[u8; 32]>,
    closed_intervals: Vec<NameInterval>,
    warnings: Vec<ImportWarning>,
    duplicates_skipped: u64,
    last_batch_max_ts: Option<i64>,
    min_ts: Option<i64>,
}

impl Normalizer {
    /// Creates a normalizer for a fresh corpus.
    pub fn new() -> Self {
        Self::with_next_ids(1, 1)
    }

    /// Creates a normalizer whose id counters continue an existing corpus.
    pub fn with_next_ids(next_member_id: i64, next_message_id: i64) -> Self {
        Self {
            members: HashMap::new(),
            next_member_id,
            next_message_id,
            msg_ids: HashMap::new(),
            pending_replies: Vec::new(),
            dedup: HashSet::new(),
            closed_intervals: Vec::new(),
            warnings: Vec::new(),
            duplicates_skipped: 0,
            last_batch_max_ts: None,
            min_ts: None,
        }
    }

    /// Seeds an existing member (re-import path). `current_name` and
    /// `name_since` describe the member's open name-history interval.
    pub fn seed_member(&mut self, member: StoredMember, current_name: String, name_since: i64) {
        self.next_member_id = self.next_member_id.max(member.id + 1);
        self.members.insert(
            member.platform_id.clone(),
            MemberState {
                current_name,
                name_since,
                last_ts: None,
                seeded: true,
                member,
            },
        );
    }

    /// Seeds a known platform message id (re-import path).
    pub fn seed_msg_id(&mut self, platform_id: String, internal_id: i64) {
        self.msg_ids.insert(platform_id, internal_id);
    }

    /// Seeds an existing dedup key (re-import path).
    pub fn seed_dedup_key(&mut self, key: [u8; 32]) {
        self.dedup.insert(key);
    }

    /// Dedup key for a message: `(ts, sender platform id, content hash)`.
    pub fn dedup_key(ts: i64, sender_platform_id: &str, content: Option<&str>) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(ts.to_le_bytes());
        hasher.update([0u8]);
        hasher.update(sender_platform_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(content.unwrap_or("").as_bytes());
        hasher.finalize().into()
    }

    /// Ingests the roster event. Creates members without opening name
    /// intervals; those open at each member's first message.
    pub fn ingest_members(&mut self, records: Vec<MemberRecord>) {
        for record in records {
            if self.members.contains_key(&record.platform_id) {
                continue;
            }
            let id = self.next_member_id;
            self.next_member_id += 1;
            let current_name = record.display_name().to_string();
            self.members.insert(
                record.platform_id.clone(),
                MemberState {
                    member: StoredMember {
                        id,
                        platform_id: record.platform_id,
                        account_name: record.account_name,
                        group_nickname: record.group_nickname,
                        aliases: record.aliases,
                        roles: record.roles,
                        avatar: record.avatar,
                    },
                    current_name,
                    name_since: i64::MIN,
                    last_ts: None,
                    seeded: false,
                },
            );
        }
    }

    /// Normalizes one batch: reorder, dedup, assign ids, resolve what can be
    /// resolved. Returns messages in insertion order.
    pub fn ingest_batch(&mut self, mut batch: Vec<RawMessage>) -> Vec<StoredMessage> {
        // Some exports interleave threads; restore order within the batch.
        batch.sort_by(|a, b| {
            (a.ts, a.platform_msg_id.as_deref()).cmp(&(b.ts, b.platform_msg_id.as_deref()))
        });

        if let (Some(first), Some(prev_max)) = (batch.first(), self.last_batch_max_ts) {
            if first.ts + INVERSION_TOLERANCE_SECS < prev_max {
                let detail = format!(
                    "batch starts at {} but a previous batch reached {}",
                    first.ts, prev_max
                );
                warn!(first_ts = first.ts, prev_max, "cross-batch timestamp inversion");
                self.warnings.push(ImportWarning {
                    kind: WarningKind::TimestampInversion,
                    detail,
                });
            }
        }
        if let Some(last) = batch.last() {
            self.last_batch_max_ts = Some(
                self.last_batch_max_ts
                    .map_or(last.ts, |prev| prev.max(last.ts)),
            );
        }

        let mut stored = Vec::with_capacity(batch.len());
        for msg in batch {
            let key = Self::dedup_key(msg.ts, &msg.sender_id, msg.content.as_deref());
            if !self.dedup.insert(key) {
                self.duplicates_skipped += 1;
                continue;
            }

            self.min_ts = Some(self.min_ts.map_or(msg.ts, |m| m.min(msg.ts)));
            let sender_id = self.observe_sender(&msg);

            let id = self.next_message_id;
            self.next_message_id += 1;
            if let Some(platform_id) = &msg.platform_msg_id {
                self.msg_ids.insert(platform_id.clone(), id);
            }

            let reply_to = match &msg.reply_to {
                Some(target) => match self.msg_ids.get(target) {
                    Some(&internal) => Some(internal),
                    None => {
                        self.pending_replies.push((id, target.clone()));
                        None
                    }
                },
                None => None,
            };

            stored.push(StoredMessage {
                id,
                sender_id,
                ts: msg.ts,
                kind: msg.kind,
                content: msg.content,
                reply_to,
                platform_msg_id: msg.platform_msg_id,
                extra: msg.extra,
            });
        }
        stored
    }

    /// Looks up or creates the sender's member and updates name history.
    fn observe_sender(&mut self, msg: &RawMessage) -> i64 {
        let display = msg
            .sender_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&msg.sender_id)
            .to_string();

        if let Some(state) = self.members.get_mut(&msg.sender_id) {
            if state.name_since == i64::MIN {
                // Roster member's first message opens its interval.
                state.name_since = msg.ts;
            }
            if display != state.current_name
                && msg.sender_name.as_deref().is_some_and(|s| !s.is_empty())
            {
                let closed_at = state.last_ts.unwrap_or(msg.ts);
                self.closed_intervals.push(NameInterval {
                    member_id: state.member.id,
                    name: state.current_name.clone(),
                    start_ts: state.name_since,
                    end_ts: Some(closed_at),
                });
                if !state.member.aliases.contains(&state.current_name) {
                    state.member.aliases.push(state.current_name.clone());
                }
                state.current_name = display.clone();
                // Intervals abut: the new name takes over where the old one
                // closed, so the spans partition the member's lifetime.
                state.name_since = closed_at;
                if state.member.account_name.as_deref() != Some(&display) {
                    state.member.account_name = Some(display);
                }
            }
            state.last_ts = Some(msg.ts);
            return state.member.id;
        }

        let id = self.next_member_id;
        self.next_member_id += 1;
        self.members.insert(
            msg.sender_id.clone(),
            MemberState {
                member: StoredMember {
                    id,
                    platform_id: msg.sender_id.clone(),
                    account_name: msg.sender_name.clone().filter(|s| !s.is_empty()),
                    group_nickname: None,
                    aliases: Vec::new(),
                    roles: Vec::new(),
                    avatar: None,
                },
                current_name: display,
                name_since: msg.ts,
                last_ts: Some(msg.ts),
                seeded: false,
            },
        );
        id
    }

    /// Second pass over replies recorded as pending. Returns resolved
    /// `(message id, target id)` pairs and still-dangling
    /// `(message id, platform id)` pairs; dangling targets are preserved by
    /// the store, never dropped.
    pub fn resolve_replies(&mut self) -> (Vec<(i64, i64)>, Vec<(i64, String)>) {
        let mut resolved = Vec::new();
        let mut dangling = Vec::new();
        for (msg_id, target) in self.pending_replies.drain(..) {
            match self.msg_ids.get(&target) {
                Some(&internal) => resolved.push((msg_id, internal)),
                None => {
                    self.warnings.push(ImportWarning {
                        kind: WarningKind::DanglingReply,
                        detail: format!("message {msg_id} replies to unknown id {target}"),
                    });
                    dangling.push((msg_id, target));
                }
            }
        }
        (resolved, dangling)
    }

    /// The chat kind to persist: parsers' explicit detection wins; the
    /// fallback guess is replaced by the distinct-sender count.
    pub fn effective_kind(&self, meta: &ChatMeta) -> ChatKind {
        if !meta.kind_is_fallback {
            return meta.kind;
        }
        if self.human_sender_count() <= 2 {
            ChatKind::Private
        } else {
            ChatKind::Group
        }
    }

    /// Distinct senders, excluding system pseudo-members.
    pub fn human_sender_count(&self) -> usize {
        self.members
            .values()
            .filter(|s| s.last_ts.is_some() && !s.member.platform_id.starts_with('@'))
            .count()
    }

    /// Internal member ids that existed before this import (re-import path).
    pub fn seeded_member_ids(&self) -> Vec<i64> {
        self.members
            .values()
            .filter(|s| s.seeded)
            .map(|s| s.member.id)
            .collect()
    }

    /// Finalizes members, name intervals and warnings.
    pub fn finish(mut self) -> NormalizerOutput {
        let fallback_start = self.min_ts.unwrap_or(0);
        let mut intervals = std::mem::take(&mut self.closed_intervals);
        let mut members: Vec<StoredMember> = Vec::with_capacity(self.members.len());

        let mut states: Vec<MemberState> = self.members.into_values().collect();
        states.sort_by_key(|s| s.member.id);
        for state in states {
            intervals.push(NameInterval {
                member_id: state.member.id,
                name: state.current_name,
                start_ts: if state.name_since == i64::MIN {
                    // Roster member that never spoke.
                    fallback_start
                } else {
                    state.name_since
                },
                end_ts: None,
            });
            members.push(state.member);
        }

        NormalizerOutput {
            members,
            intervals,
            warnings: self.warnings,
            duplicates_skipped: self.duplicates_skipped,
        }
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}
