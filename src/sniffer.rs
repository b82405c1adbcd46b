//! Format registry and content sniffer.
//!
//! Every parser is described by a [`FormatDescriptor`]: accepted extensions
//! plus content signatures matched against the file head. Sniffing filters
//! by extension, reads the head once, keeps descriptors with at least one
//! matching signature and picks the lowest-priority survivor (ties broken by
//! lexicographic id, so detection is deterministic).
//!
//! # Example
//!
//! ```rust,no_run
//! use chatlens::sniffer::sniff;
//!
//! let descriptor = sniff("export.txt".as_ref())?;
//! println!("detected {}", descriptor.name);
//! # Ok::<(), chatlens::ChatlensError>(())
//! ```

use std::fs::File;
use std::io::Read;
use std::path::Path;

use regex::RegexBuilder;

use crate::error::{ChatlensError, Result};
use crate::parsers::Format;

/// How much of the file head is decoded and matched against signatures.
pub const SNIFF_HEAD_BYTES: usize = 64 * 1024;

/// Static description of one supported input format.
#[derive(Debug, Clone, Copy)]
pub struct FormatDescriptor {
    /// Stable identifier, used as the deterministic tie breaker.
    pub id: &'static str,
    /// Human-readable name for logs and error messages.
    pub name: &'static str,
    /// Platform tag recorded on imported corpora.
    pub platform: &'static str,
    /// Parser selected when this descriptor wins.
    pub format: Format,
    /// Lower is preferred when several descriptors match.
    pub priority: u8,
    /// Accepted file extensions, lowercase, without dot.
    pub extensions: &'static [&'static str],
    /// Content signatures; one match keeps the descriptor in the running.
    pub signatures: &'static [&'static str],
}

/// The registry. Order is irrelevant; priority and id decide.
pub const DESCRIPTORS: &[FormatDescriptor] = &[
    FormatDescriptor {
        id: "chatlens-json",
        name: "chatlens JSON export",
        platform: "chatlens",
        format: Format::NativeJson,
        priority: 10,
        extensions: &["json"],
        signatures: &[r#""chatlens_version""#],
    },
    FormatDescriptor {
        id: "chatlens-jsonl",
        name: "chatlens JSONL export",
        platform: "chatlens",
        format: Format::NativeJsonl,
        priority: 10,
        extensions: &["jsonl", "ndjson"],
        signatures: &[r#""chatlens_version""#],
    },
    FormatDescriptor {
        id: "wechat-json",
        name: "WeChat database JSON export",
        platform: "wechat",
        format: Format::WeChatJson,
        priority: 20,
        extensions: &["json"],
        signatures: &[r#""msgSvrId""#, r#""MsgSvrID""#, r#""talker""#, r#""strContent""#],
    },
    FormatDescriptor {
        id: "line-txt",
        name: "LINE TXT export",
        platform: "line",
        format: Format::LineTxt,
        priority: 20,
        extensions: &["txt"],
        signatures: &[
            r"^\[LINE\]",
            r"Chat history (in|with) ",
            r"のトーク履歴",
            r"的聊天记录",
            r"的聊天記錄",
        ],
    },
    FormatDescriptor {
        id: "qq-txt",
        name: "QQ TXT export",
        platform: "qq",
        format: Format::QqTxt,
        priority: 20,
        extensions: &["txt"],
        signatures: &[r"消息分组[:：]", r"消息对象[:：]", r"^消息记录"],
    },
    FormatDescriptor {
        id: "wechat-txt",
        name: "third-party WeChat TXT export",
        platform: "wechat",
        format: Format::WeChatTxt,
        priority: 30,
        extensions: &["txt"],
        signatures: &[r"^[—\-]{3,}\s*\d{4}-\d{2}-\d{2}\s*[—\-]{3,}$"],
    },
    // Third-party QQ tools dump the same stanza format without the framed
    // preamble; the QQ parser tolerates the missing header.
    FormatDescriptor {
        id: "qq-txt-bare",
        name: "third-party QQ TXT export",
        platform: "qq",
        format: Format::QqTxt,
        priority: 40,
        extensions: &["txt"],
        signatures: &[r"^\d{4}-\d{2}-\d{2} \d{1,2}:\d{2}:\d{2} .+[(（]\d{5,}[)）]\s*$"],
    },
];

/// Identifies the format of `path`.
///
/// # Errors
///
/// [`ChatlensError::Io`] if the file cannot be read,
/// [`ChatlensError::UnknownFormat`] if no descriptor matches.
pub fn sniff(path: &Path) -> Result<&'static FormatDescriptor> {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let candidates: Vec<&'static FormatDescriptor> = DESCRIPTORS
        .iter()
        .filter(|d| d.extensions.contains(&extension.as_str()))
        .collect();
    if candidates.is_empty() {
        return Err(ChatlensError::unknown_format(path));
    }

    let mut file = File::open(path)?;
    let mut head = vec![0u8; SNIFF_HEAD_BYTES];
    let mut filled = 0;
    loop {
        let n = file.read(&mut head[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
        if filled == head.len() {
            break;
        }
    }
    head.truncate(filled);

    let decoded = String::from_utf8_lossy(&head);
    let decoded = decoded
        .strip_prefix('\u{feff}')
        .unwrap_or(&decoded)
        .replace('\r', "");

    sniff_head(&decoded, &extension).ok_or_else(|| ChatlensError::unknown_format(path))
}

/// Signature matching over an already-read head. Split out for tests.
pub fn sniff_head(head: &str, extension: &str) -> Option<&'static FormatDescriptor> {
    DESCRIPTORS
        .iter()
        .filter(|d| d.extensions.contains(&extension))
        .filter(|d| {
            d.signatures.iter().any(|pattern| {
                RegexBuilder::new(pattern)
                    .multi_line(true)
                    .build()
                    .map(|re| re.is_match(head))
                    .unwrap_or(false)
            })
        })
        .min_by_key(|d| (d.priority, d.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_registry_ids_are_unique() {
        let mut ids: Vec<_> = DESCRIPTORS.iter().map(|d| d.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), DESCRIPTORS.len());
    }

    #[test]
    fn test_registry_signatures_compile() {
        for descriptor in DESCRIPTORS {
            for pattern in descriptor.signatures {
                assert!(
                    RegexBuilder::new(pattern).multi_line(true).build().is_ok(),
                    "bad signature in {}: {}",
                    descriptor.id,
                    pattern
                );
            }
        }
    }

    #[test]
    fn test_sniff_head_line() {
        let head = "[LINE] Chat history in MyGroup\nSaved on: 2025/01/02 10:00\n";
        let descriptor = sniff_head(head, "txt").unwrap();
        assert_eq!(descriptor.id, "line-txt");
    }

    #[test]
    fn test_sniff_head_line_japanese() {
        let head = "[LINE] 田中とのトーク履歴\n保存日時：2025/01/02 10:00\n";
        assert_eq!(sniff_head(head, "txt").unwrap().id, "line-txt");
    }

    #[test]
    fn test_sniff_head_qq() {
        let head = "消息记录（此消息记录为文本格式）\n====\n消息分组:我的群聊\n";
        assert_eq!(sniff_head(head, "txt").unwrap().id, "qq-txt");
    }

    #[test]
    fn test_sniff_head_bare_qq_without_preamble() {
        let head = "2023-05-01 12:00:00 张三(10001)\n你好\n";
        assert_eq!(sniff_head(head, "txt").unwrap().id, "qq-txt-bare");
        // The framed native export still wins through its lower priority.
        let framed = "消息记录\n====\n消息对象:G\n\n2023-05-01 12:00:00 张三(10001)\n你好\n";
        assert_eq!(sniff_head(framed, "txt").unwrap().id, "qq-txt");
    }

    #[test]
    fn test_sniff_head_wechat_txt() {
        let head = "————— 2023-05-01 —————\nAlice 12:00\n你好\n";
        assert_eq!(sniff_head(head, "txt").unwrap().id, "wechat-txt");
    }

    #[test]
    fn test_sniff_head_native_beats_wechat_on_priority() {
        // A native export that happens to mention "talker" in content still
        // resolves to the native descriptor through its lower priority.
        let head = "{\n\"chatlens_version\": 1,\n\"name\": \"talker talk\",\n\"talker\": true\n";
        assert_eq!(sniff_head(head, "json").unwrap().id, "chatlens-json");
    }

    #[test]
    fn test_sniff_head_wechat_json() {
        let head = "[\n{\"msgSvrId\": 1, \"talker\": \"wxid_a\", \"createTime\": 1}\n";
        assert_eq!(sniff_head(head, "json").unwrap().id, "wechat-json");
    }

    #[test]
    fn test_sniff_head_extension_filter() {
        let head = "[LINE] Chat history in G\n";
        assert!(sniff_head(head, "json").is_none());
        assert!(sniff_head(head, "").is_none());
    }

    #[test]
    fn test_sniff_head_no_match() {
        assert!(sniff_head("just some text\n", "txt").is_none());
    }

    #[test]
    fn test_sniff_file_round_trip() {
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        file.write_all("[LINE] Chat history in G\n\n2025/01/02\n10:15\tA\thi\n".as_bytes())
            .unwrap();
        file.flush().unwrap();
        let descriptor = sniff(file.path()).unwrap();
        assert_eq!(descriptor.format, Format::LineTxt);
    }

    #[test]
    fn test_sniff_unknown_extension_fails() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(b"a;b;c\n").unwrap();
        let err = sniff(file.path()).unwrap_err();
        assert!(matches!(err, ChatlensError::UnknownFormat { .. }));
    }

    #[test]
    fn test_sniff_bom_is_stripped() {
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        file.write_all("\u{feff}消息记录\n消息对象:G\n".as_bytes())
            .unwrap();
        file.flush().unwrap();
        assert_eq!(sniff(file.path()).unwrap().id, "qq-txt");
    }
}
