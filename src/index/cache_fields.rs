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

use bitflags::bitflags;
use lazy_static::lazy_static;
use log::warn;

bitflags! {
    /// Message attributes the index's field cache can hold.
    pub struct CacheFields: u32 {
        const SENT_DATE = 1 << 0;
        const RECEIVED_DATE = 1 << 1;
        const VIRTUAL_SIZE = 1 << 2;
        const BODY = 1 << 3;
        const BODYSTRUCTURE = 1 << 4;
        const MESSAGEPART = 1 << 5;
    }
}

static FIELD_NAMES: [(&str, CacheFields); 6] = [
    ("sent_date", CacheFields::SENT_DATE),
    ("received_date", CacheFields::RECEIVED_DATE),
    ("virtual_size", CacheFields::VIRTUAL_SIZE),
    ("body", CacheFields::BODY),
    ("bodystructure", CacheFields::BODYSTRUCTURE),
    ("messagepart", CacheFields::MESSAGEPART),
];

/// Parse a space/comma-separated field-name list. Names are matched
/// case-insensitively; unknown names are logged and ignored.
pub fn parse_cache_fields(fields: &str) -> CacheFields {
    let mut ret = CacheFields::empty();
    for name in fields.split(|c| c == ' ' || c == ',') {
        if name.is_empty() {
            continue;
        }

        match FIELD_NAMES
            .iter()
            .find(|&&(known, _)| known.eq_ignore_ascii_case(name))
        {
            Some(&(_, mask)) => ret |= mask,
            None => warn!("Invalid cache field name '{}', ignoring", name),
        }
    }
    ret
}

lazy_static! {
    static ref DEFAULT_CACHE_FIELDS: CacheFields = parse_cache_fields(
        &std::env::var("MAIL_CACHE_FIELDS").unwrap_or_default()
    );
    static ref NEVER_CACHE_FIELDS: CacheFields = parse_cache_fields(
        &std::env::var("MAIL_NEVER_CACHE_FIELDS").unwrap_or_default()
    );
}

/// Fields cached by default, from `MAIL_CACHE_FIELDS`. Read once per
/// process.
pub fn default_cache_fields() -> CacheFields {
    *DEFAULT_CACHE_FIELDS
}

/// Fields never to cache, from `MAIL_NEVER_CACHE_FIELDS`. Read once per
/// process.
pub fn never_cache_fields() -> CacheFields {
    *NEVER_CACHE_FIELDS
}
