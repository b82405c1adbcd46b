//! Parser for LINE TXT exports.
//!
//! LINE's "export chat history" produces a text file whose header and system
//! wording depend on the app language:
//!
//! ```text
//! [LINE] Chat history in MyGroup
//! Saved on: 2025/01/02 10:00
//!
//! 2025/01/02 Friday
//! 10:15\tAlice\thi
//! 10:16\tBob\t"first line
//! second line"
//! 10:20\tAlice joined the group
//! ```
//!
//! Date-only lines set the rolling current date consumed by the time-only
//! stamps below them; that state is explicit in the iterator and nothing
//! looks behind beyond the message being assembled. Multiline content is
//! double-quote wrapped by LINE; the parser buffers continuation lines until
//! the quote closes. Times may carry localized meridiem markers
//! (`午前`/`午後`, `上午`/`下午`, `AM`/`PM`).

use std::collections::{HashSet, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use chrono::NaiveDate;

use crate::config::ParseOptions;
use crate::error::Result;
use crate::message::{
    ChatKind, ChatMeta, MessageKind, ParseEvent, ParseSummary, RawMessage,
};
use crate::parsers::common::{is_url_only, parse_date, parse_time, strip_bom, to_utc_seconds};
use crate::parsers::EventIter;
use crate::progress::{ImportPhase, ImportProgress};

/// Pseudo platform id under which sender-less system notices are recorded.
pub(crate) const SYSTEM_SENDER: &str = "@system";

/// Opens a LINE TXT export and returns its event stream.
pub(crate) fn events(path: &Path, options: &ParseOptions) -> Result<EventIter> {
    let file = File::open(path)?;
    let file_size = file.metadata()?.len();
    let reader = BufReader::with_capacity(options.buffer_size, file);
    let fallback_name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "LINE chat".to_string());

    let iter = LineEventIter::new(reader, file_size, options.clone(), fallback_name)?;
    Ok(Box::new(iter))
}

/// Media/sticker placeholder tokens per app language.
const IMAGE_TOKENS: &[&str] = &["[Photo]", "[写真]", "[照片]", "[相片]", "[圖片]", "[图片]"];
const VIDEO_TOKENS: &[&str] = &["[Video]", "[動画]", "[视频]", "[影片]"];
const STICKER_TOKENS: &[&str] = &["[Sticker]", "[スタンプ]", "[贴图]", "[貼圖]"];
const VOICE_TOKENS: &[&str] = &[
    "[Voice message]",
    "[ボイスメッセージ]",
    "[语音消息]",
    "[語音訊息]",
];
const FILE_TOKENS: &[&str] = &["[File]", "[ファイル]", "[文件]", "[檔案]"];
const LOCATION_TOKENS: &[&str] = &["[Location]", "[位置情報]", "[位置]", "[位置资讯]"];

/// Join/leave/invite/unsend notice fragments per app language.
const SYSTEM_TOKENS: &[&str] = &[
    "joined the group",
    "left the group",
    "invited",
    "unsent a message",
    "changed the group",
    "グループに参加しました",
    "が参加しました",
    "が退会しました",
    "を招待しました",
    "送信を取り消しました",
    "グループ名を",
    "加入了群聊",
    "已加入聊天室",
    "退出了群聊",
    "已退出群組",
    "收回了讯息",
    "已收回訊息",
    "邀请",
    "邀請",
];

/// Classifies message content into the uniform kind set.
fn classify_content(content: &str) -> MessageKind {
    let trimmed = content.trim();
    if IMAGE_TOKENS.contains(&trimmed) {
        return MessageKind::Image;
    }
    if VIDEO_TOKENS.contains(&trimmed) {
        return MessageKind::Video;
    }
    if STICKER_TOKENS.contains(&trimmed) {
        return MessageKind::Sticker;
    }
    if VOICE_TOKENS.contains(&trimmed) {
        return MessageKind::Voice;
    }
    if FILE_TOKENS.contains(&trimmed) {
        return MessageKind::File;
    }
    if LOCATION_TOKENS.contains(&trimmed) {
        return MessageKind::Location;
    }
    if trimmed.starts_with('☎') {
        return MessageKind::System;
    }
    if is_line_system_message(trimmed) {
        return MessageKind::System;
    }
    if is_url_only(trimmed) {
        return MessageKind::Link;
    }
    MessageKind::Text
}

/// Returns `true` for join/leave/rename/unsend notices in any supported
/// app language.
pub(crate) fn is_line_system_message(content: &str) -> bool {
    SYSTEM_TOKENS.iter().any(|token| content.contains(token))
}

/// Header parse result.
struct Header {
    name: String,
    kind: ChatKind,
    explicit: bool,
}

/// Parses the `[LINE] ...` banner into chat name and kind.
fn parse_banner(banner: &str) -> Option<Header> {
    let rest = banner.strip_prefix("[LINE]")?.trim();

    if let Some(name) = rest.strip_prefix("Chat history in ") {
        return Some(Header {
            name: name.trim().to_string(),
            kind: ChatKind::Group,
            explicit: true,
        });
    }
    if let Some(name) = rest.strip_prefix("Chat history with ") {
        return Some(Header {
            name: name.trim().to_string(),
            kind: ChatKind::Private,
            explicit: true,
        });
    }
    if let Some(name) = rest.strip_suffix("とのトーク履歴") {
        return Some(Header {
            name: name.trim().to_string(),
            kind: ChatKind::Private,
            explicit: true,
        });
    }
    if let Some(name) = rest.strip_suffix("のトーク履歴") {
        return Some(Header {
            name: name.trim().to_string(),
            kind: ChatKind::Group,
            explicit: true,
        });
    }
    for (with_prefix, suffix) in [("与", "的聊天记录"), ("與", "的聊天記錄")] {
        if let Some(tail) = rest.strip_suffix(suffix) {
            if let Some(name) = tail.strip_prefix(with_prefix) {
                return Some(Header {
                    name: name.trim().to_string(),
                    kind: ChatKind::Private,
                    explicit: true,
                });
            }
            return Some(Header {
                name: tail.trim().to_string(),
                kind: ChatKind::Group,
                explicit: true,
            });
        }
    }

    // Banner present but wording unknown: keep the raw remainder as the name.
    Some(Header {
        name: rest.to_string(),
        kind: ChatKind::Group,
        explicit: false,
    })
}

/// "Saved on:" line prefixes per app language.
const SAVED_ON_PREFIXES: &[&str] = &[
    "Saved on:",
    "保存日時：",
    "保存日時:",
    "保存日期：",
    "儲存日期：",
    "儲存時間：",
];

#[derive(Debug, Default)]
struct Pending {
    sender: String,
    content: String,
    ts: i64,
    system: bool,
    open_quotes: bool,
}

impl Pending {
    fn push_continuation(&mut self, line: &str) {
        self.content.push('\n');
        self.content.push_str(line.trim_end_matches('\n'));
        if line.matches('"').count() % 2 == 1 {
            self.open_quotes = !self.open_quotes;
        }
    }

    fn into_message(mut self) -> RawMessage {
        // LINE wraps multiline content in double quotes.
        let trimmed = self.content.trim();
        if trimmed.len() >= 2
            && trimmed.starts_with('"')
            && trimmed.ends_with('"')
            && trimmed.contains('\n')
        {
            self.content = trimmed[1..trimmed.len() - 1].to_string();
        } else {
            self.content = trimmed.to_string();
        }

        let kind = if self.system {
            MessageKind::System
        } else {
            classify_content(&self.content)
        };
        let sender_id = if self.system {
            SYSTEM_SENDER.to_string()
        } else {
            self.sender.clone()
        };

        let mut msg = RawMessage::new(sender_id, self.ts, kind).with_content(self.content);
        if !self.system {
            msg = msg.with_name(self.sender);
        }
        msg
    }
}

enum Stage {
    Meta,
    Members,
    Stream,
    Finished,
}

struct LineEventIter<R: BufRead> {
    reader: R,
    options: ParseOptions,
    file_size: u64,
    bytes_read: u64,
    stage: Stage,
    meta: ChatMeta,
    /// First non-header line, replayed before further reads.
    carry: Option<String>,
    current_date: Option<NaiveDate>,
    pending: Option<Pending>,
    senders: HashSet<String>,
    message_count: u64,
    skipped: u64,
    eof: bool,
    queued: VecDeque<ParseEvent>,
}

impl<R: BufRead> LineEventIter<R> {
    fn new(
        mut reader: R,
        file_size: u64,
        options: ParseOptions,
        fallback_name: String,
    ) -> Result<Self> {
        // Consume banner and "Saved on" lines; stop at the first content line.
        let mut bytes_read = 0u64;
        let mut header: Option<Header> = None;
        let mut carry = None;

        loop {
            let mut line = String::new();
            let bytes = reader.read_line(&mut line)?;
            if bytes == 0 {
                break;
            }
            bytes_read += bytes as u64;

            let cleaned = strip_bom(line.trim_end_matches(['\n', '\r'])).to_string();
            let trimmed = cleaned.trim();
            if trimmed.is_empty() {
                continue;
            }
            if header.is_none() && trimmed.starts_with("[LINE]") {
                header = parse_banner(trimmed);
                continue;
            }
            if SAVED_ON_PREFIXES.iter().any(|p| trimmed.starts_with(p)) {
                continue;
            }
            carry = Some(cleaned);
            break;
        }

        let meta = match header {
            Some(h) if h.explicit => ChatMeta::new(h.name, "line", h.kind),
            Some(h) => ChatMeta::new(h.name, "line", h.kind).with_fallback_kind(),
            None => ChatMeta::new(fallback_name, "line", ChatKind::Group).with_fallback_kind(),
        };

        Ok(Self {
            reader,
            options,
            file_size,
            bytes_read,
            stage: Stage::Meta,
            meta,
            carry,
            current_date: None,
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

    /// Splits a message line into (time, sender, content) on tabs.
    ///
    /// Two-field lines (`time<TAB>notice`) are system notices.
    fn split_message_line(line: &str) -> Option<(&str, Option<&str>, &str)> {
        let mut parts = line.splitn(3, '\t');
        let time = parts.next()?;
        let second = parts.next()?;
        parse_time(time)?;
        match parts.next() {
            Some(content) => Some((time, Some(second), content)),
            None => Some((time, None, second)),
        }
    }

    /// Reads lines until a full batch is assembled or EOF.
    fn fill_batch(&mut self) -> Result<()> {
        let mut batch = Vec::with_capacity(self.options.batch_size);

        loop {
            let Some(line) = self.next_line()? else {
                self.eof = true;
                self.finalize_pending(&mut batch);
                break;
            };

            // Inside a quoted multiline message everything is continuation,
            // even date-shaped lines.
            if let Some(pending) = self.pending.as_mut() {
                if pending.open_quotes {
                    pending.push_continuation(&line);
                    continue;
                }
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                if let Some(pending) = self.pending.as_mut() {
                    pending.push_continuation("");
                }
                continue;
            }

            if let Some((time, sender, content)) = Self::split_message_line(trimmed) {
                self.finalize_pending(&mut batch);

                let Some(date) = self.current_date else {
                    // Time stamp before any date header; nothing to anchor to.
                    self.skipped += 1;
                    continue;
                };
                let Some(time) = parse_time(time) else {
                    self.skipped += 1;
                    continue;
                };
                let ts = to_utc_seconds(date, time, self.options.tz_offset);
                let mut pending = Pending {
                    sender: sender.unwrap_or_default().trim().to_string(),
                    content: content.to_string(),
                    ts,
                    system: sender.is_none(),
                    open_quotes: false,
                };
                if content.matches('"').count() % 2 == 1 && content.starts_with('"') {
                    pending.open_quotes = true;
                }
                if pending.content.len() <= self.options.max_message_size {
                    self.pending = Some(pending);
                } else {
                    self.skipped += 1;
                }
            } else if !trimmed.contains('\t') && parse_date(trimmed).is_some() {
                self.finalize_pending(&mut batch);
                self.current_date = parse_date(trimmed);
            } else if let Some(pending) = self.pending.as_mut() {
                if pending.content.len() + line.len() <= self.options.max_message_size {
                    pending.push_continuation(&line);
                } else {
                    self.pending = None;
                    self.skipped += 1;
                }
            }
            // Stray lines before the first message are ignored.

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

impl<R: BufRead + Send> Iterator for LineEventIter<R> {
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
                // LINE exports carry no roster; members are inferred from senders.
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
