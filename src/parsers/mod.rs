//! Chat export parsers.
//!
//! One parser per supported input format, each producing the uniform
//! [`ParseEvent`](crate::message::ParseEvent) stream described in
//! [`crate::message`]. The set of formats is closed and known at build time,
//! so dispatch is a plain `match` on [`Format`] rather than trait objects.
//!
//! # Supported formats
//!
//! | Format | Source | Shape |
//! |--------|--------|-------|
//! | [`Format::NativeJson`] | chatlens export | single JSON object, messages array last |
//! | [`Format::NativeJsonl`] | chatlens export | header line + one message object per line |
//! | [`Format::LineTxt`] | LINE app "export chat history" | TXT, localized headers (en/ja/zh) |
//! | [`Format::QqTxt`] | QQ message manager export | TXT, `====` framed header |
//! | [`Format::WeChatJson`] | WeChat database export tools | JSON array of raw records |
//! | [`Format::WeChatTxt`] | third-party WeChat export tools | TXT, date dividers |
//!
//! All parsers stream: memory used is bounded by the batch size plus file
//! buffers, independent of file size. Line-oriented parsers read forward
//! once; JSON formats use an incremental object scanner.
//!
//! # Example
//!
//! ```rust,no_run
//! use chatlens::parsers::Format;
//! use chatlens::config::ParseOptions;
//! use chatlens::message::ParseEvent;
//!
//! let options = ParseOptions::new();
//! for event in Format::LineTxt.events("chat.txt".as_ref(), &options)? {
//!     match event? {
//!         ParseEvent::Messages(batch) => println!("{} messages", batch.len()),
//!         ParseEvent::Done(summary) => println!("total {}", summary.message_count),
//!         _ => {}
//!     }
//! }
//! # Ok::<(), chatlens::ChatlensError>(())
//! ```

pub(crate) mod common;
mod line;
mod native;
mod qq;
mod wechat;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::ParseOptions;
use crate::error::Result;
use crate::message::ParseEvent;

/// Iterator over parse events.
///
/// The boxed form lets the import coordinator hold any parser's stream
/// behind one type; each concrete iterator is still a plain blocking
/// state machine.
pub type EventIter = Box<dyn Iterator<Item = Result<ParseEvent>> + Send>;

/// The closed set of supported input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Format {
    /// chatlens native JSON export.
    #[serde(rename = "native-json")]
    NativeJson,
    /// chatlens native JSONL export.
    #[serde(rename = "native-jsonl")]
    NativeJsonl,
    /// LINE application TXT export.
    #[serde(rename = "line-txt")]
    LineTxt,
    /// QQ message manager TXT export.
    #[serde(rename = "qq-txt")]
    QqTxt,
    /// WeChat database JSON export.
    #[serde(rename = "wechat-json")]
    WeChatJson,
    /// Third-party WeChat TXT export.
    #[serde(rename = "wechat-txt")]
    WeChatTxt,
}

impl Format {
    /// Human-readable format label used in errors and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Format::NativeJson => "chatlens JSON",
            Format::NativeJsonl => "chatlens JSONL",
            Format::LineTxt => "LINE TXT",
            Format::QqTxt => "QQ TXT",
            Format::WeChatJson => "WeChat JSON",
            Format::WeChatTxt => "WeChat TXT",
        }
    }

    /// Platform tag recorded on corpora imported through this format.
    pub fn platform(&self) -> &'static str {
        match self {
            Format::NativeJson | Format::NativeJsonl => "chatlens",
            Format::LineTxt => "line",
            Format::QqTxt => "qq",
            Format::WeChatJson | Format::WeChatTxt => "wechat",
        }
    }

    /// Opens the file and returns its event stream.
    ///
    /// # Errors
    ///
    /// Returns [`ChatlensError::Io`](crate::ChatlensError::Io) if the file
    /// cannot be opened and
    /// [`ChatlensError::ParseStructural`](crate::ChatlensError::ParseStructural)
    /// if its header is unusable. Record-level problems surface later as
    /// skip counts, not errors.
    pub fn events(self, path: &Path, options: &ParseOptions) -> Result<EventIter> {
        match self {
            Format::NativeJson => native::json_events(path, options),
            Format::NativeJsonl => native::jsonl_events(path, options),
            Format::LineTxt => line::events(path, options),
            Format::QqTxt => qq::events(path, options),
            Format::WeChatJson => wechat::json_events(path, options),
            Format::WeChatTxt => wechat::txt_events(path, options),
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_labels() {
        assert_eq!(Format::LineTxt.label(), "LINE TXT");
        assert_eq!(Format::NativeJsonl.label(), "chatlens JSONL");
    }

    #[test]
    fn test_format_platform_tags() {
        assert_eq!(Format::LineTxt.platform(), "line");
        assert_eq!(Format::QqTxt.platform(), "qq");
        assert_eq!(Format::WeChatJson.platform(), "wechat");
        assert_eq!(Format::WeChatTxt.platform(), "wechat");
        assert_eq!(Format::NativeJson.platform(), "chatlens");
    }

    #[test]
    fn test_format_serde_tags() {
        let json = serde_json::to_string(&Format::WeChatJson).unwrap();
        assert_eq!(json, "\"wechat-json\"");
    }
}
