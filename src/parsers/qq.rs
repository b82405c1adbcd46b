//! Parser for QQ message manager TXT exports.
//!
//! The QQ desktop client exports a text file framed by `====` dividers:
//!
//! ```text
//! 消息记录（此消息记录为文本格式，转换为其他格式的过程中可能会有部分信息丢失）
//! ================================================================
//! 消息分组:我的群聊
//! ================================================================
//! 消息对象:测试群
//! ================================================================
//!
//! 2023-05-01 12:00:00 张三(10001)
//! 你好
//!
//! 2023-05-01 12:01:05 李四<lisi@example.com>
//! [图片]
//! ```
//!
//! Every message header carries a full date and time, so no rolling date is
//! needed; content lines (including blank lines) continue until the next
//! header. The trailing `(QQ号)` or `<email>` is the sender's platform id.

use std::collections::{HashSet, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use regex::Regex;

use crate::config::ParseOptions;
use crate::error::Result;
use crate::message::{
    ChatKind, ChatMeta, MessageKind, ParseEvent, ParseSummary, RawMessage,
};
use crate::parsers::common::{is_url_only, parse_stamp, strip_bom};
use crate::parsers::EventIter;
use crate::progress::{ImportPhase, ImportProgress};

/// Opens a QQ TXT export and returns its event stream.
pub(crate) fn events(path: &Path, options: &ParseOptions) -> Result<EventIter> {
    let file = File::open(path)?;
    let file_size = file.metadata()?.len();
    let reader = BufReader::with_capacity(options.buffer_size, file);
    let fallback_name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "QQ chat".to_string());

    let iter = QqEventIter::new(reader, file_size, options.clone(), fallback_name)?;
    Ok(Box::new(iter))
}

/// `2023-05-01 12:00:00 张三(10001)` — date, time, sender tail.
fn header_regex() -> Regex {
    Regex::new(r"^(\d{4}-\d{2}-\d{2})\s+(\d{1,2}:\d{2}:\d{2})\s+(.+)$").unwrap()
}

/// Splits the sender tail into display name and platform id.
///
/// `张三(10001)` → ("张三", "10001"); `李四<a@b.c>` → ("李四", "a@b.c").
/// With neither suffix, the name doubles as the id.
fn split_sender(tail: &str) -> (String, String) {
    let tail = tail.trim();
    if let Some(open) = tail.rfind('(') {
        if let Some(inner) = tail[open + 1..].strip_suffix(')') {
            if !inner.is_empty() && inner.chars().all(|c| c.is_ascii_digit()) {
                return (tail[..open].trim().to_string(), inner.to_string());
            }
        }
    }
    if let Some(open) = tail.rfind('<') {
        if let Some(inner) = tail[open + 1..].strip_suffix('>') {
            if inner.contains('@') {
                return (tail[..open].trim().to_string(), inner.to_string());
            }
        }
    }
    (tail.to_string(), tail.to_string())
}

const SYSTEM_SENDER_NAMES: &[&str] = &["系统消息", "系统消息(10000)"];

const SYSTEM_TOKENS: &[&str] = &[
    "撤回了一条消息",
    "加入本群",
    "退出本群",
    "被管理员",
    "修改了群名称",
    "邀请",
    "禁言",
];

/// Classifies message content into the uniform kind set.
fn classify_content(content: &str) -> MessageKind {
    let trimmed = content.trim();
    match trimmed {
        "[图片]" | "[闪照]" => return MessageKind::Image,
        "[表情]" => return MessageKind::Sticker,
        "[语音]" => return MessageKind::Voice,
        "[视频]" => return MessageKind::Video,
        "[文件]" => return MessageKind::File,
        "[位置]" => return MessageKind::Location,
        _ => {}
    }
    if SYSTEM_TOKENS.iter().any(|token| trimmed.contains(token)) {
        return MessageKind::System;
    }
    if is_url_only(trimmed) {
        return MessageKind::Link;
    }
    MessageKind::Text
}

#[derive(Debug)]
struct Pending {
    name: String,
    platform_id: String,
    ts: i64,
    lines: Vec<String>,
}

impl Pending {
    fn into_message(self) -> RawMessage {
        let content = self.lines.join("\n").trim().to_string();
        let system = SYSTEM_SENDER_NAMES.contains(&self.name.as_str());
        let kind = if system {
            MessageKind::System
        } else {
            classify_content(&content)
        };
        RawMessage::new(self.platform_id, self.ts, kind)
            .with_name(self.name)
            .with_content(content)
    }
}

enum Stage {
    Meta,
    Members,
    Stream,
    Finished,
}

struct QqEventIter<R: BufRead> {
    reader: R,
    options: ParseOptions,
    file_size: u64,
    bytes_read: u64,
    stage: Stage,
    meta: ChatMeta,
    header: Regex,
    carry: Option<String>,
    pending: Option<Pending>,
    senders: HashSet<String>,
    message_count: u64,
    skipped: u64,
    eof: bool,
    queued: VecDeque<ParseEvent>,
}

impl<R: BufRead> QqEventIter<R> {
    fn new(
        mut reader: R,
        file_size: u64,
        options: ParseOptions,
        fallback_name: String,
    ) -> Result<Self> {
        let header = header_regex();
        let mut bytes_read = 0u64;
        let mut group_label: Option<String> = None;
        let mut subject: Option<String> = None;
        let mut carry = None;

        // The framed preamble ends at the first message header line.
        loop {
            let mut line = String::new();
            let bytes = reader.read_line(&mut line)?;
            if bytes == 0 {
                break;
            }
            bytes_read += bytes as u64;

            let cleaned = strip_bom(line.trim_end_matches(['\n', '\r'])).to_string();
            let trimmed = cleaned.trim();
            if header.is_match(trimmed) {
                carry = Some(cleaned);
                break;
            }
            if let Some(value) = trimmed
                .strip_prefix("消息分组:")
                .or_else(|| trimmed.strip_prefix("消息分组："))
            {
                group_label = Some(value.trim().to_string());
            } else if let Some(value) = trimmed
                .strip_prefix("消息对象:")
                .or_else(|| trimmed.strip_prefix("消息对象："))
            {
                subject = Some(value.trim().to_string());
            }
            // Dividers, the 消息记录 banner and blank lines are skipped.
        }

        let name = subject.unwrap_or(fallback_name);
        let meta = match group_label {
            Some(label) if label.contains('群') => ChatMeta::new(name, "qq", ChatKind::Group),
            _ => ChatMeta::new(name, "qq", ChatKind::Private).with_fallback_kind(),
        };

        Ok(Self {
            reader,
            options,
            file_size,
            bytes_read,
            stage: Stage::Meta,
            meta,
            header,
            carry,
            pending: None,
            senders: HashSet::new(),
            message_count: 0,
            skipped: 0,
            eof: false,
            queued: VecDeque::new(),
        })
    }

    fn next_line(&mut self) -> Result<Option<String>> {
        if let Some(line) = self.carry.take() {
            return Ok(Some(line));
        }
        let mut line = String::new();
        let bytes = self.reader.read_line(&mut line)?;
        if bytes == 0 {
            return Ok(None);
        }
        self.bytes_read += bytes as u64;
        Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
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
            if let Some(caps) = self.header.captures(trimmed) {
                self.finalize_pending(&mut batch);

                let date = caps.get(1).map_or("", |m| m.as_str());
                let time = caps.get(2).map_or("", |m| m.as_str());
                let tail = caps.get(3).map_or("", |m| m.as_str());
                let Some(ts) = parse_stamp(date, time, self.options.tz_offset) else {
                    self.skipped += 1;
                    continue;
                };
                let (name, platform_id) = split_sender(tail);
                self.pending = Some(Pending {
                    name,
                    platform_id,
                    ts,
                    lines: Vec::new(),
                });
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

impl<R: BufRead + Send> Iterator for QqEventIter<R> {
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

    const SAMPLE: &str = "\u{feff}消息记录（此消息记录为文本格式）\n\
================================================================\n\
消息分组:我的群聊\n\
================================================================\n\
消息对象:测试群\n\
================================================================\n\
\n\
2023-05-01 12:00:00 张三(10001)\n\
你好\n\
\n\
2023-05-01 12:01:05 李四<lisi@example.com>\n\
[图片]\n\
\n\
2023-05-01 12:02:00 系统消息(10000)\n\
张三 撤回了一条消息\n";

    fn collect_events(input: &str) -> Vec<ParseEvent> {
        let options = ParseOptions::new()
            .with_tz_offset(chrono::FixedOffset::east_opt(8 * 3600).unwrap());
        let iter = QqEventIter::new(
            BufReader::new(Cursor::new(input.as_bytes().to_vec())),
            input.len() as u64,
            options,
            "fallback".to_string(),
        )
        .unwrap();
        iter.map(|e| e.unwrap()).collect()
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
    fn test_header_meta() {
        let events = collect_events(SAMPLE);
        let ParseEvent::Meta(meta) = &events[0] else {
            panic!();
        };
        assert_eq!(meta.name, "测试群");
        assert_eq!(meta.kind, ChatKind::Group);
        assert!(!meta.kind_is_fallback);
        assert_eq!(meta.platform, "qq");
    }

    #[test]
    fn test_sender_ids() {
        let messages = messages_of(&collect_events(SAMPLE));
        assert_eq!(messages[0].sender_id, "10001");
        assert_eq!(messages[0].sender_name.as_deref(), Some("张三"));
        assert_eq!(messages[1].sender_id, "lisi@example.com");
        assert_eq!(messages[1].sender_name.as_deref(), Some("李四"));
    }

    #[test]
    fn test_timestamps_use_offset() {
        let messages = messages_of(&collect_events(SAMPLE));
        // 2023-05-01 12:00 CST (+8) = 04:00 UTC
        assert_eq!(messages[0].ts, 1682913600);
        assert_eq!(messages[1].ts - messages[0].ts, 65);
    }

    #[test]
    fn test_kinds_and_system() {
        let messages = messages_of(&collect_events(SAMPLE));
        assert_eq!(messages[0].kind, MessageKind::Text);
        assert_eq!(messages[1].kind, MessageKind::Image);
        assert_eq!(messages[2].kind, MessageKind::System);
    }

    #[test]
    fn test_private_category_is_fallback() {
        let input = "消息对象:张三\n================\n\
2023-05-01 12:00:00 张三(10001)\nhi\n";
        let events = collect_events(input);
        let ParseEvent::Meta(meta) = &events[0] else {
            panic!();
        };
        assert_eq!(meta.kind, ChatKind::Private);
        assert!(meta.kind_is_fallback);
    }

    #[test]
    fn test_multiline_content_with_blank_lines() {
        let input = "消息对象:G\n\n2023-05-01 12:00:00 A(1)\nfirst\n\nsecond\n\
2023-05-01 12:01:00 B(2)\nok\n";
        let messages = messages_of(&collect_events(input));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content.as_deref(), Some("first\n\nsecond"));
    }

    #[test]
    fn test_split_sender_variants() {
        assert_eq!(
            split_sender("张三(10001)"),
            ("张三".to_string(), "10001".to_string())
        );
        assert_eq!(
            split_sender("李四<a@b.c>"),
            ("李四".to_string(), "a@b.c".to_string())
        );
        assert_eq!(
            split_sender("nested(paren)(123)"),
            ("nested(paren)".to_string(), "123".to_string())
        );
        assert_eq!(
            split_sender("bare name"),
            ("bare name".to_string(), "bare name".to_string())
        );
    }

    #[test]
    fn test_done_summary() {
        let events = collect_events(SAMPLE);
        let ParseEvent::Done(summary) = events.last().unwrap() else {
            panic!();
        };
        assert_eq!(summary.message_count, 3);
        assert_eq!(summary.member_count, 3);
        assert_eq!(summary.skipped_records, 0);
    }
}
