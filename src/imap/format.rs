//-
// Copyright (c) 2026, The Mooring Developers
//
// This file is part of Mooring.
//
// Mooring is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mooring is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along
// with Mooring. If not, see <http://www.gnu.org/licenses/>.

//! Textual rendering of message attributes in IMAP syntax.

use chrono::{DateTime, Utc};

use crate::index::{FullFlags, MailFlags};

/// System flags in the order they are rendered on the wire.
static SYSTEM_FLAGS: &[(MailFlags, &str)] = &[
    (MailFlags::ANSWERED, "\\Answered"),
    (MailFlags::FLAGGED, "\\Flagged"),
    (MailFlags::DELETED, "\\Deleted"),
    (MailFlags::SEEN, "\\Seen"),
    (MailFlags::DRAFT, "\\Draft"),
    (MailFlags::RECENT, "\\Recent"),
];

/// Render a flag set as the space-separated interior of a `FLAGS (...)`
/// list, system flags first, custom keywords after in their stored order.
pub fn write_flags(flags: &FullFlags) -> String {
    let mut out = String::new();
    for &(flag, name) in SYSTEM_FLAGS {
        if flags.flags.contains(flag) {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(name);
        }
    }
    for custom in &flags.custom {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(custom);
    }
    out
}

/// Render a timestamp in IMAP date-time syntax, e.g.
/// `04-Jul-2020 16:31:00 +0000`.
pub fn to_datetime(date: DateTime<Utc>) -> String {
    date.format("%d-%b-%Y %H:%M:%S %z").to_string()
}
