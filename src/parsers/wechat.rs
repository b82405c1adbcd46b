//! Parsers for WeChat exports.
//!
//! Two shapes are supported:
//!
//! - **Database JSON** ([`json_events`]): the flat record arrays produced by
//!   WeChat database export tools. Records carry epoch `createTime`, a
//!   numeric `type` code and the peer id in `talker`; chatroom messages embed
//!   the actual sender as a `wxid:` prefix on the content.
//! - **Third-party TXT** ([`txt_events`]): date-divider framed text dumps:
//!
//! ```text
//! ————— 2023-05-01 —————
//! Alice 12:00
//! 你好
//! Bob 12:01:30
//! [图片]
//! ```
//!
//! TXT timestamps are wall-clock without a zone; they are interpreted in the
//! corpus timezone offset (`ParseOptions::tz_offset`).

use std::collections::{HashSet, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use chrono::NaiveDate;
use regex::Regex;
use serde::Deserialize;

use crate::config::ParseOptions;
use crate::error::{ChatlensError, Result};
use crate::message::{
    ChatKind, ChatMeta, MessageKind, ParseEvent, ParseSummary, RawMessage,
};
use crate::parsers::common::{
    is_url_only, parse_date, parse_stamp, parse_time, strip_bom, JsonArrayScanner,
};
use crate::parsers::EventIter;
use crate::progress::{ImportPhase, ImportProgress};

// ============================================================================
// Database JSON
// ============================================================================

/// Opens a WeChat database JSON export (a top-level array of records).
pub(crate) fn json_events(path: &Path, options: &ParseOptions) -> Result<EventIter> {
    let file = File::open(path)?;
    let file_size = file.metadata()?.len();
    let mut reader = BufReader::with_capacity(options.buffer_size, file);

    // The export must be a top-level array.
    let mut probe = [0u8; 1];
    let mut first = None;
    loop {
        let n = reader.read(&mut probe)?;
        if n == 0 {
            break;
        }
        let c = probe[0] as char;
        if !c.is_whitespace() && c != '\u{feff}' {
            first = Some(c);
            break;
        }
    }
    match first {
        Some('[') => {}
        _ => {
            return Err(ChatlensError::structural(
                "WeChat JSON",
                "expected a top-level array of message records",
                Some(path.to_path_buf()),
            ))
        }
    }

    let fallback_name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "WeChat chat".to_string());

    Ok(Box::new(WeChatJsonIter {
        scanner: JsonArrayScanner::new(reader, "WeChat JSON", options.max_message_size),
        options: options.clone(),
        file_size,
        stage: Stage::Meta,
        meta: None,
        fallback_name,
        senders: HashSet::new(),
        message_count: 0,
        skipped: 0,
        queued: VecDeque::new(),
    }))
}

/// One record as produced by common WeChat export tools. Field casing varies
/// between tools; aliases cover the spellings seen in the wild.
#[derive(Debug, Deserialize)]
struct WeChatRecord {
    #[serde(rename = "msgSvrId", alias = "MsgSvrID", alias = "msgSvrID", default)]
    msg_svr_id: Option<serde_json::Value>,
    #[serde(alias = "Talker", default)]
    talker: Option<String>,
    #[serde(rename = "nickName", alias = "NickName", alias = "nickname", default)]
    nick_name: Option<String>,
    #[serde(rename = "createTime", alias = "CreateTime", default)]
    create_time: Option<serde_json::Value>,
    #[serde(rename = "type", alias = "Type", alias = "localType", default)]
    msg_type: Option<i64>,
    #[serde(rename = "subType", alias = "SubType", default)]
    sub_type: Option<i64>,
    #[serde(alias = "Content", alias = "strContent", alias = "StrContent", default)]
    content: Option<String>,
    #[serde(rename = "isSend", alias = "IsSend", default)]
    is_send: Option<i64>,
}

/// Epoch seconds from a number/string `createTime`, tolerating milliseconds.
fn record_timestamp(value: &serde_json::Value) -> Option<i64> {
    let raw = match value {
        serde_json::Value::Number(n) => n.as_i64()?,
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    // Millisecond exports are three orders of magnitude larger.
    if raw >= 1_000_000_000_000 {
        Some(raw / 1000)
    } else {
        Some(raw)
    }
}

/// Maps WeChat numeric type codes onto the uniform kind set.
fn kind_from_type(msg_type: i64, sub_type: Option<i64>) -> MessageKind {
    match msg_type {
        1 => MessageKind::Text,
        3 => MessageKind::Image,
        34 => MessageKind::Voice,
        43 => MessageKind::Video,
        47 => MessageKind::Sticker,
        48 => MessageKind::Location,
        49 => match sub_type {
            Some(6) => MessageKind::File,
            _ => MessageKind::Link,
        },
        10000 | 10002 => MessageKind::System,
        _ => MessageKind::Other,
    }
}

impl WeChatRecord {
    /// Converts a record into a message, splitting chatroom sender prefixes.
    fn into_message(self) -> Option<RawMessage> {
        let ts = record_timestamp(self.create_time.as_ref()?)?;
        let talker = self.talker.unwrap_or_default();
        let mut kind = kind_from_type(self.msg_type.unwrap_or(1), self.sub_type);
        let mut content = self.content;
        let mut sender_id;
        let mut sender_name = self.nick_name;

        if self.is_send == Some(1) {
            sender_id = "self".to_string();
            sender_name = None;
        } else if talker.ends_with("@chatroom") {
            // Chatroom records carry the real sender as "wxid:\ncontent".
            sender_id = talker.clone();
            if let Some(text) = content.take() {
                if let Some((prefix, rest)) = text.split_once(":\n") {
                    if !prefix.contains(char::is_whitespace) && !prefix.is_empty() {
                        sender_id = prefix.to_string();
                        content = Some(rest.to_string());
                    } else {
                        content = Some(text);
                    }
                } else {
                    content = Some(text);
                }
            }
        } else {
            sender_id = talker;
        }
        if sender_id.is_empty() {
            return None;
        }

        if kind == MessageKind::Text {
            if let Some(text) = content.as_deref() {
                if is_url_only(text) {
                    kind = MessageKind::Link;
                }
            }
        }

        let mut msg = RawMessage::new(sender_id, ts, kind);
        if let Some(name) = sender_name {
            if !name.is_empty() {
                msg = msg.with_name(name);
            }
        }
        if let Some(text) = content {
            msg = msg.with_content(text);
        }
        if let Some(id) = self.msg_svr_id {
            let id = match id {
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::String(s) => s,
                _ => String::new(),
            };
            if !id.is_empty() {
                msg = msg.with_platform_msg_id(id);
            }
        }
        Some(msg)
    }
}

enum Stage {
    Meta,
    Members,
    Stream,
    Finished,
}

struct WeChatJsonIter<R: BufRead> {
    scanner: JsonArrayScanner<R>,
    options: ParseOptions,
    file_size: u64,
    stage: Stage,
    /// Filled lazily from the first record (chatroom name detection).
    meta: Option<ChatMeta>,
    fallback_name: String,
    senders: HashSet<String>,
    message_count: u64,
    skipped: u64,
    queued: VecDeque<ParseEvent>,
}

impl<R: BufRead> WeChatJsonIter<R> {
    /// Reads ahead one record to decide chat name and kind before `Meta`.
    fn build_meta(&mut self) -> Result<ChatMeta> {
        let mut pending_first: Option<RawMessage> = None;
        let mut meta = None;

        while meta.is_none() {
            let Some(object) = self.scanner.next_object()? else {
                break;
            };
            match serde_json::from_str::<WeChatRecord>(&object) {
                Ok(record) => {
                    let room = record
                        .talker
                        .as_deref()
                        .is_some_and(|t| t.ends_with("@chatroom"));
                    let room_name = record
                        .talker
                        .clone()
                        .filter(|_| room)
                        .unwrap_or_else(|| self.fallback_name.clone());
                    if let Some(msg) = record.into_message() {
                        pending_first = Some(msg);
                        meta = Some(if room {
                            ChatMeta::new(room_name, "wechat", ChatKind::Group)
                        } else {
                            ChatMeta::new(
                                self.fallback_name.clone(),
                                "wechat",
                                ChatKind::Private,
                            )
                            .with_fallback_kind()
                        });
                    } else {
                        self.skipped += 1;
                    }
                }
                Err(_) => self.skipped += 1,
            }
        }

        if let Some(msg) = pending_first {
            self.senders.insert(msg.sender_id.clone());
            self.message_count += 1;
            self.queued.push_back(ParseEvent::Messages(vec![msg]));
        }
        Ok(meta.unwrap_or_else(|| {
            ChatMeta::new(self.fallback_name.clone(), "wechat", ChatKind::Private)
                .with_fallback_kind()
        }))
    }

    fn fill_batch(&mut self) -> Result<()> {
        let mut batch = Vec::with_capacity(self.options.batch_size);

        while batch.len() < self.options.batch_size {
            let Some(object) = self.scanner.next_object()? else {
                break;
            };
            match serde_json::from_str::<WeChatRecord>(&object) {
                Ok(record) => match record.into_message() {
                    Some(msg) => {
                        self.senders.insert(msg.sender_id.clone());
                        self.message_count += 1;
                        batch.push(msg);
                    }
                    None => self.skipped += 1,
                },
                Err(_) if self.options.skip_invalid => self.skipped += 1,
                Err(e) => return Err(e.into()),
            }
        }

        if !batch.is_empty() {
            self.queued.push_back(ParseEvent::Messages(batch));
        }
        self.queued.push_back(ParseEvent::Progress(ImportProgress::new(
            ImportPhase::Parsing,
            self.scanner.bytes_read(),
            Some(self.file_size),
            self.message_count,
        )));
        if self.scanner.finished() {
            self.queued.push_back(ParseEvent::Done(ParseSummary {
                message_count: self.message_count,
                member_count: self.senders.len() as u64,
                skipped_records: self.skipped,
            }));
        }
        Ok(())
    }
}

impl<R: BufRead + Send> Iterator for WeChatJsonIter<R> {
    type Item = Result<ParseEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.stage {
            Stage::Meta => {
                self.stage = Stage::Members;
                let meta = match self.meta.clone() {
                    Some(meta) => meta,
                    None => match self.build_meta() {
                        Ok(meta) => {
                            self.meta = Some(meta.clone());
                            meta
                        }
                        Err(e) => {
                            self.stage = Stage::Finished;
                            return Some(Err(e));
                        }
                    },
                };
                Some(Ok(ParseEvent::Meta(meta)))
            }
            Stage::Members => {
                self.stage = Stage::Stream;
                Some(Ok(ParseEvent::Members(Vec::new())))
            }
            Stage::Stream => {
                if let Some(event) = self.queued.pop_front() {
                    return Some(Ok(event));
                }
                if self.scanner.finished() {
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

// ============================================================================
// Third-party TXT
// ============================================================================

/// Opens a third-party WeChat TXT export.
pub(crate) fn txt_events(path: &Path, options: &ParseOptions) -> Result<EventIter> {
    let file = File::open(path)?;
    let file_size = file.metadata()?.len();
    let reader = BufReader::with_capacity(options.buffer_size, file);
    let fallback_name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "WeChat chat".to_string());

    Ok(Box::new(WeChatTxtIter {
        reader,
        options: options.clone(),
        file_size,
        bytes_read: 0,
        stage: Stage::Meta,
        meta: ChatMeta::new(fallback_name, "wechat", ChatKind::Private).with_fallback_kind(),
        divider: Regex::new(r"^[—\-]{3,}\s*(\d{4}-\d{2}-\d{2})\s*[—\-]{3,}$").unwrap(),
        short_header: Regex::new(r"^(.{1,48}?)\s+(\d{1,2}:\d{2}(?::\d{2})?)$").unwrap(),
        full_header: Regex::new(r"^(\d{4}-\d{2}-\d{2})\s+(\d{1,2}:\d{2}(?::\d{2})?)\s+(.+)$")
            .unwrap(),
        current_date: None,
        pending: None,
        senders: HashSet::new(),
        message_count: 0,
        skipped: 0,
        eof: false,
        queued: VecDeque::new(),
    }))
}

const TXT_SYSTEM_TOKENS: &[&str] = &[
    "撤回了一条消息",
    "拍了拍",
    "加入了群聊",
    "邀请",
    "与群里其他人都不是朋友关系",
    "开启了朋友验证",
];

/// Classifies TXT message content into the uniform kind set.
fn classify_txt_content(content: &str) -> MessageKind {
    let trimmed = content.trim();
    match trimmed {
        "[图片]" => return MessageKind::Image,
        "[语音]" => return MessageKind::Voice,
        "[视频]" => return MessageKind::Video,
        "[文件]" => return MessageKind::File,
        "[动画表情]" | "[表情]" => return MessageKind::Sticker,
        "[位置]" => return MessageKind::Location,
        "[链接]" => return MessageKind::Link,
        _ => {}
    }
    if TXT_SYSTEM_TOKENS.iter().any(|token| trimmed.contains(token)) {
        return MessageKind::System;
    }
    if is_url_only(trimmed) {
        return MessageKind::Link;
    }
    MessageKind::Text
}

#[derive(Debug)]
struct TxtPending {
    sender: String,
    ts: i64,
    lines: Vec<String>,
}

impl TxtPending {
    fn into_message(self) -> RawMessage {
        let content = self.lines.join("\n").trim().to_string();
        let kind = classify_txt_content(&content);
        RawMessage::new(self.sender.clone(), self.ts, kind)
            .with_name(self.sender)
            .with_content(content)
    }
}

struct WeChatTxtIter<R: BufRead> {
    reader: R,
    options: ParseOptions,
    file_size: u64,
    bytes_read: u64,
    stage: Stage,
    meta: ChatMeta,
    divider: Regex,
    short_header: Regex,
    full_header: Regex,
    current_date: Option<NaiveDate>,
    pending: Option<TxtPending>,
    senders: HashSet<String>,
    message_count: u64,
    skipped: u64,
    eof: bool,
    queued: VecDeque<ParseEvent>,
}

impl<R: BufRead> WeChatTxtIter<R> {
    fn next_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let bytes = self.reader.read_line(&mut line)?;
        if bytes == 0 {
            return Ok(None);
        }
        self.bytes_read += bytes as u64;
        Ok(Some(
            strip_bom(line.trim_end_matches(['\n', '\r'])).to_string(),
        ))
    }

    fn finalize_pending(&mut self, batch: &mut Vec<RawMessage>) {
        if let Some(pending) = self.pending.take() {
            let msg = pending.into_message();
            self.senders.insert(msg.sender_id.clone());
            self.message_count += 1;
            batch.push(msg);
        }
    }

    fn fill_batch(&mut self) -> Result<()> {
        let mut batch = Vec::with_capacity(self.options.batch_size);

        loop {
            let Some(line) = self.next_line()? else {
                self.eof = true;
                self.finalize_pending(&mut batch);
                break;
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                if let Some(pending) = self.pending.as_mut() {
                    pending.lines.push(String::new());
                }
                continue;
            }

            if let Some(caps) = self.divider.captures(trimmed) {
                self.finalize_pending(&mut batch);
                self.current_date = parse_date(caps.get(1).map_or("", |m| m.as_str()));
            } else if let Some(caps) = self.full_header.captures(trimmed) {
                self.finalize_pending(&mut batch);
                let date = caps.get(1).map_or("", |m| m.as_str());
                let time = caps.get(2).map_or("", |m| m.as_str());
                let sender = caps.get(3).map_or("", |m| m.as_str()).trim();
                self.current_date = parse_date(date);
                match parse_stamp(date, time, self.options.tz_offset) {
                    Some(ts) => {
                        self.pending = Some(TxtPending {
                            sender: sender.to_string(),
                            ts,
                            lines: Vec::new(),
                        })
                    }
                    None => self.skipped += 1,
                }
            } else if let Some(caps) = self
                .short_header
                .captures(trimmed)
                .filter(|c| parse_time(c.get(2).map_or("", |m| m.as_str())).is_some())
            {
                // "Alice 12:00" style headers need a date divider in effect.
                let time = parse_time(caps.get(2).map_or("", |m| m.as_str()));
                match (self.current_date, time) {
                    (Some(date), Some(time)) => {
                        self.finalize_pending(&mut batch);
                        let ts = super::common::to_utc_seconds(
                            date,
                            time,
                            self.options.tz_offset,
                        );
                        self.pending = Some(TxtPending {
                            sender: caps.get(1).map_or("", |m| m.as_str()).trim().to_string(),
                            ts,
                            lines: Vec::new(),
                        });
                    }
                    _ => {
                        // Without a date this could equally be content.
                        if let Some(pending) = self.pending.as_mut() {
                            pending.lines.push(line.clone());
                        } else {
                            self.skipped += 1;
                        }
                    }
                }
            } else if let Some(pending) = self.pending.as_mut() {
                let total: usize = pending.lines.iter().map(|l| l.len() + 1).sum();
                if total + line.len() <= self.options.max_message_size {
                    pending.lines.push(line);
                } else {
                    self.pending = None;
                    self.skipped += 1;
                }
            }

            if batch.len() >= self.options.batch_size {
                break;
            }
        }

        if !batch.is_empty() {
            self.queued.push_back(ParseEvent::Messages(batch));
        }
        self.queued.push_back(ParseEvent::Progress(ImportProgress::new(
            ImportPhase::Parsing,
            self.bytes_read,
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

impl<R: BufRead + Send> Iterator for WeChatTxtIter<R> {
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
                Some(Ok(ParseEvent::Members(Vec::new())))
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
    use std::io::Cursor;

    fn txt_iter(input: &str) -> WeChatTxtIter<BufReader<Cursor<String>>> {
        WeChatTxtIter {
            reader: BufReader::new(Cursor::new(input.to_string())),
            options: ParseOptions::new()
                .with_tz_offset(chrono::FixedOffset::east_opt(8 * 3600).unwrap()),
            file_size: input.len() as u64,
            bytes_read: 0,
            stage: Stage::Meta,
            meta: ChatMeta::new("test", "wechat", ChatKind::Private).with_fallback_kind(),
            divider: Regex::new(r"^[—\-]{3,}\s*(\d{4}-\d{2}-\d{2})\s*[—\-]{3,}$").unwrap(),
            short_header: Regex::new(r"^(.{1,48}?)\s+(\d{1,2}:\d{2}(?::\d{2})?)$").unwrap(),
            full_header: Regex::new(
                r"^(\d{4}-\d{2}-\d{2})\s+(\d{1,2}:\d{2}(?::\d{2})?)\s+(.+)$",
            )
            .unwrap(),
            current_date: None,
            pending: None,
            senders: HashSet::new(),
            message_count: 0,
            skipped: 0,
            eof: false,
            queued: VecDeque::new(),
        }
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

    #[test]
    fn test_txt_divider_and_short_headers() {
        let input = "————— 2023-05-01 —————\nAlice 12:00\n你好\n多行\nBob 12:01:30\n[图片]\n";
        let events: Vec<_> = txt_iter(input).map(|e| e.unwrap()).collect();
        let messages = messages_of(&events);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender_id, "Alice");
        assert_eq!(messages[0].content.as_deref(), Some("你好\n多行"));
        // 12:00 CST = 04:00 UTC
        assert_eq!(messages[0].ts, 1682913600);
        assert_eq!(messages[1].kind, MessageKind::Image);
        assert_eq!(messages[1].ts - messages[0].ts, 90);
    }

    #[test]
    fn test_txt_full_headers_without_divider() {
        let input = "2023-05-01 12:00:00 Alice\nhello\n2023-05-01 12:05:00 Bob\n拍了拍\"Alice\"\n";
        let events: Vec<_> = txt_iter(input).map(|e| e.unwrap()).collect();
        let messages = messages_of(&events);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender_id, "Alice");
        assert_eq!(messages[1].kind, MessageKind::System);
    }

    #[test]
    fn test_txt_header_before_divider_counts_as_skip() {
        let input = "Alice 12:00\nlost\n————— 2023-05-01 —————\nAlice 12:01\nkept\n";
        let events: Vec<_> = txt_iter(input).map(|e| e.unwrap()).collect();
        let messages = messages_of(&events);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content.as_deref(), Some("kept"));
    }

    #[test]
    fn test_record_timestamp_units() {
        assert_eq!(
            record_timestamp(&serde_json::json!(1682913600)),
            Some(1682913600)
        );
        assert_eq!(
            record_timestamp(&serde_json::json!(1682913600123u64)),
            Some(1682913600)
        );
        assert_eq!(
            record_timestamp(&serde_json::json!("1682913600")),
            Some(1682913600)
        );
        assert_eq!(record_timestamp(&serde_json::json!(null)), None);
    }

    #[test]
    fn test_kind_from_type_codes() {
        assert_eq!(kind_from_type(1, None), MessageKind::Text);
        assert_eq!(kind_from_type(3, None), MessageKind::Image);
        assert_eq!(kind_from_type(34, None), MessageKind::Voice);
        assert_eq!(kind_from_type(43, None), MessageKind::Video);
        assert_eq!(kind_from_type(47, None), MessageKind::Sticker);
        assert_eq!(kind_from_type(49, Some(6)), MessageKind::File);
        assert_eq!(kind_from_type(49, None), MessageKind::Link);
        assert_eq!(kind_from_type(10000, None), MessageKind::System);
        assert_eq!(kind_from_type(9999, None), MessageKind::Other);
    }

    #[test]
    fn test_chatroom_sender_prefix_split() {
        let record: WeChatRecord = serde_json::from_str(
            r#"{"msgSvrId": 7, "talker": "123@chatroom", "createTime": 1682913600,
                "type": 1, "content": "wxid_alice:\nhello room"}"#,
        )
        .unwrap();
        let msg = record.into_message().unwrap();
        assert_eq!(msg.sender_id, "wxid_alice");
        assert_eq!(msg.content.as_deref(), Some("hello room"));
        assert_eq!(msg.platform_msg_id.as_deref(), Some("7"));
    }

    #[test]
    fn test_own_messages_use_self_sender() {
        let record: WeChatRecord = serde_json::from_str(
            r#"{"talker": "wxid_bob", "createTime": 1682913600, "type": 1,
                "content": "mine", "isSend": 1}"#,
        )
        .unwrap();
        let msg = record.into_message().unwrap();
        assert_eq!(msg.sender_id, "self");
    }

    #[test]
    fn test_json_stream_end_to_end() {
        let json = r#"[
  {"msgSvrId": 1, "talker": "88@chatroom", "createTime": 1682913600, "type": 1, "content": "wxid_a:\nhi"},
  {"msgSvrId": 2, "talker": "88@chatroom", "createTime": 1682913660, "type": 3, "content": "wxid_b:\n[img]"},
  {"bad": true},
  {"msgSvrId": 3, "talker": "88@chatroom", "createTime": 1682913720, "type": 10000, "content": "系统提示"}
]"#;
        // Strip the leading '[' the way json_events' probe does.
        let body = &json[1..];
        let mut iter = WeChatJsonIter {
            scanner: JsonArrayScanner::new(
                BufReader::new(Cursor::new(body.as_bytes().to_vec())),
                "WeChat JSON",
                1024 * 1024,
            ),
            options: ParseOptions::new(),
            file_size: json.len() as u64,
            stage: Stage::Meta,
            meta: None,
            fallback_name: "export".to_string(),
            senders: HashSet::new(),
            message_count: 0,
            skipped: 0,
            queued: VecDeque::new(),
        };

        let events: Vec<_> = iter.by_ref().map(|e| e.unwrap()).collect();
        let ParseEvent::Meta(meta) = &events[0] else {
            panic!();
        };
        assert_eq!(meta.kind, ChatKind::Group);
        assert!(!meta.kind_is_fallback);

        let messages = messages_of(&events);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].sender_id, "wxid_a");
        assert_eq!(messages[1].kind, MessageKind::Image);
        assert_eq!(messages[2].kind, MessageKind::System);

        let ParseEvent::Done(summary) = events.last().unwrap() else {
            panic!();
        };
        assert_eq!(summary.message_count, 3);
        assert_eq!(summary.skipped_records, 1);
    }
}
