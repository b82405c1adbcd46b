//! Parsers for chatlens native exports.
//!
//! The native formats are the only ones that carry a roster and reply
//! references, so they round-trip losslessly through the store.
//!
//! **JSON**: a single object whose `messages` array is written last, one
//! object per line, so the header can be parsed from the file prefix and the
//! messages streamed incrementally:
//!
//! ```json
//! {
//!   "chatlens_version": 1,
//!   "name": "MyGroup",
//!   "platform": "line",
//!   "chat_kind": "group",
//!   "members": [{"platform_id": "u1", "account_name": "Alice"}],
//!   "messages": [
//!     {"sender_id": "u1", "ts": 1735812900, "kind": "text", "content": "hi"}
//!   ]
//! }
//! ```
//!
//! **JSONL**: the same header object (without `messages`) on the first line,
//! then one message object per line.

use std::collections::{HashSet, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Deserialize;

use crate::config::ParseOptions;
use crate::error::{ChatlensError, Result};
use crate::message::{
    ChatKind, ChatMeta, MemberRecord, ParseEvent, ParseSummary, RawMessage,
};
use crate::parsers::common::{strip_bom, JsonArrayScanner};
use crate::parsers::EventIter;
use crate::progress::{ImportPhase, ImportProgress};

const FORMAT_JSON: &str = "chatlens JSON";
const FORMAT_JSONL: &str = "chatlens JSONL";

/// Export header shared by both native shapes.
#[derive(Debug, Deserialize)]
struct NativeHeader {
    #[allow(dead_code)]
    chatlens_version: u32,
    name: String,
    #[serde(default)]
    platform: Option<String>,
    #[serde(default)]
    chat_kind: Option<ChatKind>,
    #[serde(default)]
    members: Vec<MemberRecord>,
}

impl NativeHeader {
    fn meta(&self) -> ChatMeta {
        let platform = self.platform.clone().unwrap_or_else(|| "chatlens".to_string());
        match self.chat_kind {
            Some(kind) => ChatMeta::new(self.name.clone(), platform, kind),
            None => {
                ChatMeta::new(self.name.clone(), platform, ChatKind::Group).with_fallback_kind()
            }
        }
    }
}

// ============================================================================
// JSON
// ============================================================================

/// Opens a chatlens JSON export.
pub(crate) fn json_events(path: &Path, options: &ParseOptions) -> Result<EventIter> {
    let file = File::open(path)?;
    let file_size = file.metadata()?.len();
    let mut reader = BufReader::with_capacity(options.buffer_size, file);

    // Accumulate the header prefix up to the messages array, then close the
    // object so it parses on its own. Native exports write `messages` last.
    let mut header_text = String::new();
    let mut bytes_read = 0u64;
    loop {
        let mut line = String::new();
        let bytes = reader.read_line(&mut line)?;
        if bytes == 0 {
            return Err(ChatlensError::structural(
                FORMAT_JSON,
                "no 'messages' array found",
                Some(path.to_path_buf()),
            ));
        }
        bytes_read += bytes as u64;
        if header_text.len() + line.len() > 8 * 1024 * 1024 {
            return Err(ChatlensError::structural(
                FORMAT_JSON,
                "header too large; not a chatlens export",
                Some(path.to_path_buf()),
            ));
        }
        let trimmed = line.trim_start();
        let trimmed = strip_bom(trimmed);
        if trimmed.starts_with("\"messages\"") {
            break;
        }
        header_text.push_str(strip_bom(&line));
    }
    header_text.push_str("\"messages\": []}");

    let header: NativeHeader = serde_json::from_str(&header_text).map_err(|e| {
        ChatlensError::structural(
            FORMAT_JSON,
            format!("unreadable header: {e}"),
            Some(path.to_path_buf()),
        )
    })?;

    let mut senders: HashSet<String> = HashSet::new();
    for member in &header.members {
        senders.insert(member.platform_id.clone());
    }

    let mut scanner = JsonArrayScanner::new(reader, FORMAT_JSON, options.max_message_size);

    Ok(Box::new(NativeIter {
        next_object: Box::new(move || {
            let object = scanner.next_object()?;
            Ok((object, scanner.bytes_read(), scanner.finished()))
        }),
        // Align progress with the header bytes already consumed.
        header_offset: bytes_read,
        options: options.clone(),
        file_size,
        stage: Stage::Meta,
        meta: header.meta(),
        members: header.members,
        senders,
        message_count: 0,
        skipped: 0,
        eof: false,
        queued: VecDeque::new(),
    }))
}

// ============================================================================
// JSONL
// ============================================================================

/// Opens a chatlens JSONL export.
pub(crate) fn jsonl_events(path: &Path, options: &ParseOptions) -> Result<EventIter> {
    let file = File::open(path)?;
    let file_size = file.metadata()?.len();
    let mut reader = BufReader::with_capacity(options.buffer_size, file);

    let mut first = String::new();
    let header_bytes = reader.read_line(&mut first)?;
    if header_bytes == 0 {
        return Err(ChatlensError::structural(
            FORMAT_JSONL,
            "empty file",
            Some(path.to_path_buf()),
        ));
    }
    let header: NativeHeader = serde_json::from_str(strip_bom(first.trim())).map_err(|e| {
        ChatlensError::structural(
            FORMAT_JSONL,
            format!("unreadable header line: {e}"),
            Some(path.to_path_buf()),
        )
    })?;

    let mut senders: HashSet<String> = HashSet::new();
    for member in &header.members {
        senders.insert(member.platform_id.clone());
    }

    let mut bytes_read = header_bytes as u64;
    let next = move || -> Result<(Option<String>, u64, bool)> {
        loop {
            let mut line = String::new();
            let bytes = reader.read_line(&mut line)?;
            if bytes == 0 {
                return Ok((None, bytes_read, true));
            }
            bytes_read += bytes as u64;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return Ok((Some(trimmed.to_string()), bytes_read, false));
        }
    };

    Ok(Box::new(NativeIter {
        next_object: Box::new(next),
        header_offset: 0,
        options: options.clone(),
        file_size,
        stage: Stage::Meta,
        meta: header.meta(),
        members: header.members,
        senders,
        message_count: 0,
        skipped: 0,
        eof: false,
        queued: VecDeque::new(),
    }))
}

// ============================================================================
// Shared iterator
// ============================================================================

/// Pulls the next raw JSON object: `(object, bytes_consumed, finished)`.
type ObjectSource = Box<dyn FnMut() -> Result<(Option<String>, u64, bool)> + Send>;

enum Stage {
    Meta,
    Members,
    Stream,
    Finished,
}

struct NativeIter {
    next_object: ObjectSource,
    header_offset: u64,
    options: ParseOptions,
    file_size: u64,
    stage: Stage,
    meta: ChatMeta,
    members: Vec<MemberRecord>,
    senders: HashSet<String>,
    message_count: u64,
    skipped: u64,
    eof: bool,
    queued: VecDeque<ParseEvent>,
}

impl NativeIter {
    fn fill_batch(&mut self) -> Result<()> {
        let mut batch = Vec::with_capacity(self.options.batch_size);
        let mut bytes = 0;

        while batch.len() < self.options.batch_size && !self.eof {
            let (object, bytes_read, finished) = (self.next_object)()?;
            bytes = self.header_offset + bytes_read;
            if finished {
                self.eof = true;
            }
            let Some(object) = object else {
                self.eof = true;
                break;
            };
            if object.len() > self.options.max_message_size {
                self.skipped += 1;
                continue;
            }
            match serde_json::from_str::<RawMessage>(&object) {
                Ok(msg) => {
                    self.senders.insert(msg.sender_id.clone());
                    self.message_count += 1;
                    batch.push(msg);
                }
                Err(_) if self.options.skip_invalid => self.skipped += 1,
                Err(e) => return Err(e.into()),
            }
        }

        if !batch.is_empty() {
            self.queued.push_back(ParseEvent::Messages(batch));
        }
        self.queued.push_back(ParseEvent::Progress(ImportProgress::new(
            ImportPhase::Parsing,
            bytes,
            Some(self.file_size),
            self.message_count,
        )));
        if self.eof {
            self.queued.push_back(ParseEvent::Done(ParseSummary {
                message_count: self.message_count,
                member_count: self.senders.len() as u64,
                skipped_records: self.skipped,
            }));
        }
        Ok(())
    }
}

impl Iterator for NativeIter {
    type Item = Result<ParseEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(event) = self.queued.pop_front() {
            return Some(Ok(event));
        }
        match self.stage {
            Stage::Meta => {
                self.stage = Stage::Members;
                Some(Ok(ParseEvent::Meta(self.meta.clone())))
            }
            Stage::Members => {
                self.stage = Stage::Stream;
                Some(Ok(ParseEvent::Members(std::mem::take(&mut self.members))))
            }
            Stage::Stream => {
                if self.eof {
                    self.stage = Stage::Finished;
                    return None;
                }
                if let Err(e) = self.fill_batch() {
                    self.stage = Stage::Finished;
                    return Some(Err(e));
                }
                match self.queued.pop_front() {
                    Some(event) => Some(Ok(event)),
                    None => {
                        self.stage = Stage::Finished;
                        None
                    }
                }
            }
            Stage::Finished => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;
    use std::io::Write;

    fn write_temp(content: &str, ext: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(&format!(".{ext}"))
            .tempfile()
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn messages_of(events: &[ParseEvent]) -> Vec<RawMessage> {
        events
            .iter()
            .filter_map(|e| match e {
                ParseEvent::Messages(batch) => Some(batch.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    const JSON_SAMPLE: &str = r#"{
  "chatlens_version": 1,
  "name": "MyGroup",
  "platform": "line",
  "chat_kind": "group",
  "members": [
    {"platform_id": "u1", "account_name": "Alice"},
    {"platform_id": "u2", "account_name": "Bob", "group_nickname": "Bobby"}
  ],
  "messages": [
    {"sender_id": "u1", "ts": 100, "kind": "text", "content": "hi", "platform_msg_id": "m1"},
    {"sender_id": "u2", "ts": 160, "kind": "text", "content": "yo", "platform_msg_id": "m2", "reply_to": "m1"},
    {"sender_id": "u1", "ts": 200, "kind": "image"}
  ]
}
"#;

    #[test]
    fn test_json_header_and_roster() {
        let file = write_temp(JSON_SAMPLE, "json");
        let events: Vec<_> = json_events(file.path(), &ParseOptions::new())
            .unwrap()
            .map(|e| e.unwrap())
            .collect();

        let ParseEvent::Meta(meta) = &events[0] else {
            panic!();
        };
        assert_eq!(meta.name, "MyGroup");
        assert_eq!(meta.platform, "line");
        assert_eq!(meta.kind, ChatKind::Group);
        assert!(!meta.kind_is_fallback);

        let ParseEvent::Members(members) = &events[1] else {
            panic!();
        };
        assert_eq!(members.len(), 2);
        assert_eq!(members[1].display_name(), "Bobby");
    }

    #[test]
    fn test_json_messages_and_replies() {
        let file = write_temp(JSON_SAMPLE, "json");
        let events: Vec<_> = json_events(file.path(), &ParseOptions::new())
            .unwrap()
            .map(|e| e.unwrap())
            .collect();
        let messages = messages_of(&events);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].reply_to.as_deref(), Some("m1"));
        assert_eq!(messages[2].kind, MessageKind::Image);
        assert!(messages[2].content.is_none());

        let ParseEvent::Done(summary) = events.last().unwrap() else {
            panic!();
        };
        assert_eq!(summary.message_count, 3);
        assert_eq!(summary.member_count, 2);
    }

    #[test]
    fn test_json_missing_messages_is_structural() {
        let file = write_temp("{\"chatlens_version\": 1, \"name\": \"x\"}\n", "json");
        let err = match json_events(file.path(), &ParseOptions::new()) {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(err.is_structural());
    }

    #[test]
    fn test_json_bad_header_is_structural() {
        let file = write_temp("{\"name\": \"x\",\n\"messages\": [\n]}\n", "json");
        // chatlens_version is required
        let err = match json_events(file.path(), &ParseOptions::new()) {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(err.is_structural());
    }

    const JSONL_SAMPLE: &str = concat!(
        "{\"chatlens_version\": 1, \"name\": \"Pair\", \"platform\": \"qq\", \"chat_kind\": \"private\", \"members\": [{\"platform_id\": \"a\"}]}\n",
        "{\"sender_id\": \"a\", \"ts\": 10, \"kind\": \"text\", \"content\": \"one\"}\n",
        "\n",
        "{\"sender_id\": \"b\", \"ts\": 20, \"kind\": \"sticker\"}\n",
        "not json\n",
        "{\"sender_id\": \"a\", \"ts\": 30, \"kind\": \"text\", \"content\": \"three\"}\n",
    );

    #[test]
    fn test_jsonl_stream() {
        let file = write_temp(JSONL_SAMPLE, "jsonl");
        let events: Vec<_> = jsonl_events(file.path(), &ParseOptions::new())
            .unwrap()
            .map(|e| e.unwrap())
            .collect();

        let ParseEvent::Meta(meta) = &events[0] else {
            panic!();
        };
        assert_eq!(meta.kind, ChatKind::Private);

        let messages = messages_of(&events);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].kind, MessageKind::Sticker);

        let ParseEvent::Done(summary) = events.last().unwrap() else {
            panic!();
        };
        assert_eq!(summary.message_count, 3);
        // roster member "a" plus inferred sender "b"
        assert_eq!(summary.member_count, 2);
        assert_eq!(summary.skipped_records, 1);
    }

    #[test]
    fn test_jsonl_strict_mode_fails_on_bad_line() {
        let file = write_temp(JSONL_SAMPLE, "jsonl");
        let options = ParseOptions::new().with_skip_invalid(false);
        let result: Result<Vec<_>> = jsonl_events(file.path(), &options)
            .unwrap()
            .collect();
        assert!(result.is_err());
    }

    #[test]
    fn test_jsonl_empty_file_is_structural() {
        let file = write_temp("", "jsonl");
        let err = match jsonl_events(file.path(), &ParseOptions::new()) {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(err.is_structural());
    }

    #[test]
    fn test_json_batches_bounded() {
        let mut sample = String::from(
            "{\n\"chatlens_version\": 1,\n\"name\": \"big\",\n\"chat_kind\": \"group\",\n\"messages\": [\n",
        );
        for i in 0..12 {
            sample.push_str(&format!(
                "{{\"sender_id\": \"a\", \"ts\": {i}, \"kind\": \"text\", \"content\": \"m\"}},\n"
            ));
        }
        sample.push_str("]\n}\n");
        let file = write_temp(&sample, "json");
        let options = ParseOptions::new().with_batch_size(5);
        let batches: Vec<usize> = json_events(file.path(), &options)
            .unwrap()
            .map(|e| e.unwrap())
            .filter_map(|e| match e {
                ParseEvent::Messages(batch) => Some(batch.len()),
                _ => None,
            })
            .collect();
        assert_eq!(batches, vec![5, 5, 2]);
    }
}
