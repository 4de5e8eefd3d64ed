//! Relay formatting.
//!
//! Relayed text names its author, and, when the target accepts it, the origin
//! network:
//!
//! ```text
//! chat     [IRC] alice: hi
//! action   [IRC] * alice waves
//! notice   [IRC] -alice- server restarting
//! ```
//!
//! Multi-line messages get the prefix on every line.

use crate::event::{MessageEvent, MessageKind};

/// Format a relayed message.
///
/// `origin_label` is `None` when the target socket does not tag origins.
#[must_use]
pub fn relay_text(origin_label: Option<&str>, event: &MessageEvent) -> String {
    let mut out = String::with_capacity(event.text.len() + event.sender.len() + 16);
    for (i, line) in event.text.lines().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        if let Some(label) = origin_label {
            out.push('[');
            out.push_str(label);
            out.push_str("] ");
        }
        match event.kind {
            MessageKind::Chat => {
                out.push_str(&event.sender);
                out.push_str(": ");
            }
            MessageKind::Action => {
                out.push_str("* ");
                out.push_str(&event.sender);
                out.push(' ');
            }
            MessageKind::Notice => {
                out.push('-');
                out.push_str(&event.sender);
                out.push_str("- ");
            }
        }
        out.push_str(line);
    }
    out
}
