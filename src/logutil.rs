//! Helpers for keeping host-supplied text on one log line.

use std::fmt::Write;

use crate::profile::ItemId;

const MAX_PREVIEW: usize = 200;

/// Escape control characters and cap the length of a host-supplied string.
///
/// Host events arrive as JSON lines, so a reason or a malformed line can carry
/// embedded newlines that would otherwise split a log record.
pub fn escape_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// `a, b, c (+4 more)` style summary of item ids.
pub fn preview_ids(ids: &[ItemId], max: usize) -> String {
    let shown: Vec<String> = ids
        .iter()
        .take(max)
        .map(|id| escape_log(id.as_str()))
        .collect();
    let mut out = shown.join(", ");
    if ids.len() > max {
        let _ = write!(&mut out, " (+{} more)", ids.len() - max);
    }
    out
}
