// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Rendering of migrated cases as destination tickets and notes

use chrono::{DateTime, Utc};

use helpdesk_types::{MessageKind, SourceId};

/// What a rendered body introduces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Heading {
    /// The case's first message, used as the ticket description
    Original,
    Message(MessageKind),
}

impl Heading {
    fn first_line(self, from: &str) -> String {
        let from = html_escape::encode_safe(from);
        match self {
            Heading::Original => format!("Original message from {}.\n", from),
            Heading::Message(MessageKind::Reply) => format!("Reply from {}.\n", from),
            Heading::Message(MessageKind::Note) => format!("Internal Note made by {}.\n", from),
        }
    }
}

/// Render a message body with a bold header naming its sender and time.
pub fn format_body(heading: Heading, from: &str, created_at: Option<DateTime<Utc>>, text: &str) -> String {
    let created_at = created_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_default();
    format!(
        "<b>{}Created at: {}.</b>\n\n{}",
        heading.first_line(from),
        created_at,
        text
    )
    .replace('\n', "</br>\n")
}

/// Subject of the destination ticket for a source case.
pub fn ticket_subject(subject: Option<&str>, source_id: SourceId) -> String {
    format!("{} - Original Desk Case {}", subject.unwrap_or_default(), source_id)
}
