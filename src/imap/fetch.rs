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

//! The FETCH response engine.
//!
//! Given an open mailbox session and a requested attribute set, iterates the
//! matching messages and streams one `* <seq> FETCH (...)` line per message
//! to the output sink. Small attributes are assembled into a per-message
//! scratch line; message content goes out as length-prefixed literals copied
//! straight from the message stream. Any failure aborts the whole command;
//! bytes already sent are not retracted, so the caller must treat a failed
//! FETCH as fatal to the connection.

use std::fmt::Write as _;
use std::io::{self, Read, Seek, Write};

use bitflags::bitflags;
use chrono::{DateTime, Utc};

use super::format;
use crate::index::{FlagUpdate, FullFlags, MailFlags};
use crate::storage::{LockAccess, MailboxSession};
use crate::support::error::Error;

bitflags! {
    /// Attributes resolved by the storage layer for every fetched message.
    pub struct MailFetchFields: u32 {
        const FLAGS = 1 << 0;
        const RECEIVED_DATE = 1 << 1;
        const SIZE = 1 << 2;
        const IMAP_BODY = 1 << 3;
        const IMAP_BODYSTRUCTURE = 1 << 4;
        const IMAP_ENVELOPE = 1 << 5;
    }
}

bitflags! {
    /// Attributes handled by the engine itself.
    pub struct ImapFetchFields: u32 {
        const UID = 1 << 0;
        const RFC822 = 1 << 1;
        const RFC822_HEADER = 1 << 2;
        const RFC822_TEXT = 1 << 3;
    }
}

/// One requested body section, e.g. `1.2` or `HEADER.FIELDS (From To)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BodySection {
    pub section: String,
    /// Fetching this section must not mark the message seen.
    pub peek: bool,
}

/// Size of a span of message content. The physical size counts the stored
/// bytes, the virtual size the bytes after line endings are normalised to
/// CRLF; literals are framed with the virtual size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MessageSize {
    pub physical: u64,
    pub virtual_size: u64,
}

pub trait MessageStream: Read + Seek {}
impl<T: Read + Seek + ?Sized> MessageStream for T {}

/// A message's content stream positioned at the start of the headers,
/// together with the header/body size split.
pub struct OpenedStream<'a> {
    pub hdr_size: MessageSize,
    pub body_size: MessageSize,
    pub stream: Box<dyn MessageStream + 'a>,
}

/// One message under fetch. Attribute getters may fail (missing cache
/// entry, unreadable file); any such failure aborts the whole FETCH.
pub trait Mail {
    fn seq(&self) -> u32;
    fn uid(&self) -> u32;
    fn flags(&self) -> Result<FullFlags, Error>;
    fn received_date(&self) -> Result<DateTime<Utc>, Error>;
    fn rfc822_size(&self) -> Result<u64, Error>;
    fn imap_body(&self) -> Result<String, Error>;
    fn imap_bodystructure(&self) -> Result<String, Error>;
    fn imap_envelope(&self) -> Result<String, Error>;
    fn open_stream(&mut self) -> Result<OpenedStream<'_>, Error>;
    fn update_flags(
        &mut self,
        flags: &FullFlags,
        update: FlagUpdate,
    ) -> Result<(), Error>;
    /// Render one body section as a literal into `out`.
    fn send_section(
        &mut self,
        section: &BodySection,
        out: &mut FetchOutput<'_>,
    ) -> Result<(), Error>;
}

/// Iterator over the messages matching one FETCH, in ascending sequence
/// order.
pub trait MailIter {
    fn next_mail(&mut self) -> Option<&mut dyn Mail>;
    /// Tear down the iteration. Returns whether every requested identifier
    /// in the message set was actually found.
    fn finish(self: Box<Self>) -> Result<bool, Error>;
}

/// The storage layer's entry point for message iteration.
pub trait FetchSource {
    /// `wanted_headers`, when given, names the only header fields the
    /// caller will look at, so the storage layer may serve them from its
    /// field cache instead of opening the full message.
    fn fetch_init(
        &mut self,
        fields: MailFetchFields,
        wanted_headers: Option<&[String]>,
        messageset: &str,
        uidset: bool,
    ) -> Result<Box<dyn MailIter + '_>, Error>;
}

#[derive(Clone, Debug)]
pub struct FetchRequest<'a> {
    pub fields: MailFetchFields,
    pub imap_fields: ImapFetchFields,
    pub sections: &'a [BodySection],
    pub messageset: &'a str,
    pub uidset: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchSummary {
    /// Number of messages a line was emitted for.
    pub fetched: u32,
    /// Whether the message set was matched in full.
    pub all_found: bool,
}

/// Sink wrapper tracking literal framing state within one FETCH line.
pub struct FetchOutput<'a> {
    sink: &'a mut dyn Write,
    first: bool,
}

impl<'a> FetchOutput<'a> {
    pub fn new(sink: &'a mut dyn Write) -> Self {
        FetchOutput { sink, first: true }
    }

    fn set_first(&mut self, first: bool) {
        self.first = first;
    }

    pub fn write_all(&mut self, data: &[u8]) -> Result<(), Error> {
        self.sink.write_all(data)?;
        Ok(())
    }

    /// Announce a literal attribute: its name, a space, and the byte count
    /// that must follow exactly. A separating space is prepended unless this
    /// is the first item inside the parens.
    pub fn begin_literal(&mut self, name: &str, len: u64) -> Result<(), Error> {
        if self.first {
            self.first = false;
        } else {
            self.sink.write_all(b" ")?;
        }
        write!(self.sink, "{} {{{}}}\r\n", name, len)?;
        Ok(())
    }

    /// Copy exactly `len` bytes from `stream` to the sink. Falling short
    /// would leave the literal frame short of its announced length, which
    /// the client cannot recover from, so it is an error here.
    pub fn stream_exact(
        &mut self,
        stream: impl Read,
        len: u64,
    ) -> Result<(), Error> {
        let copied = io::copy(&mut stream.take(len), &mut self.sink)?;
        if copied != len {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("literal promised {} bytes, stream had {}", len, copied),
            )));
        }
        Ok(())
    }
}

/// Run one FETCH against `session`, writing the response to `sink`.
///
/// Validates the body-section syntax and decides the \Seen side effect
/// before any locking or output; if the side effect applies, a flags+read
/// lock is held for the whole iteration and released on every exit path.
pub fn fetch(
    session: &mut MailboxSession,
    source: &mut dyn FetchSource,
    sink: &mut dyn Write,
    request: &FetchRequest<'_>,
) -> Result<FetchSummary, Error> {
    let wanted_headers = wanted_header_fields(request.sections)?;

    let update_seen = !session.is_read_only()
        && (request.sections.iter().any(|s| !s.peek)
            || request.imap_fields.intersects(
                ImapFetchFields::RFC822 | ImapFetchFields::RFC822_TEXT,
            ));

    if update_seen {
        session.lock(LockAccess::READ | LockAccess::FLAGS)?;
    }

    let mut output = FetchOutput::new(sink);
    let result = run_fetch(
        source,
        &mut output,
        request,
        wanted_headers.as_deref(),
        update_seen,
    );
    let unlocked = session.unlock();

    let summary = result?;
    unlocked?;
    Ok(summary)
}

fn run_fetch(
    source: &mut dyn FetchSource,
    output: &mut FetchOutput<'_>,
    request: &FetchRequest<'_>,
    wanted_headers: Option<&[String]>,
    update_seen: bool,
) -> Result<FetchSummary, Error> {
    let mut iter = source.fetch_init(
        request.fields,
        wanted_headers,
        request.messageset,
        request.uidset,
    )?;

    let mut fetched = 0u32;
    let mut failure = None;
    // scratch line reused across messages
    let mut line = String::new();
    while let Some(mail) = iter.next_mail() {
        match fetch_mail(mail, output, request, &mut line, update_seen) {
            Ok(()) => fetched += 1,
            Err(e) => {
                failure = Some(e);
                break;
            },
        }
    }

    let finished = iter.finish();
    if let Some(e) = failure {
        return Err(e);
    }
    Ok(FetchSummary {
        fetched,
        all_found: finished?,
    })
}

fn fetch_mail(
    mail: &mut dyn Mail,
    output: &mut FetchOutput<'_>,
    request: &FetchRequest<'_>,
    line: &mut String,
    update_seen: bool,
) -> Result<(), Error> {
    let mut snapshot = None;
    let mut seen_updated = false;
    if update_seen {
        let flags = mail.flags()?;
        if !flags.flags.contains(MailFlags::SEEN) {
            mail.update_flags(
                &FullFlags {
                    flags: MailFlags::SEEN,
                    custom: vec![],
                },
                FlagUpdate::Add,
            )?;
            seen_updated = true;
        }
        snapshot = Some(flags);
    }

    line.clear();
    let _ = write!(line, "* {} FETCH (", mail.seq());
    let prefix_len = line.len();

    if request.imap_fields.contains(ImapFetchFields::UID) {
        let _ = write!(line, "UID {} ", mail.uid());
    }

    if request.fields.contains(MailFetchFields::FLAGS) || seen_updated {
        let flags = match snapshot {
            Some(snapshot) => rendered_flags(snapshot, seen_updated),
            None => mail.flags()?,
        };
        let _ = write!(line, "FLAGS ({}) ", format::write_flags(&flags));
    }

    if request.fields.contains(MailFetchFields::RECEIVED_DATE) {
        let _ = write!(
            line,
            "INTERNALDATE \"{}\" ",
            format::to_datetime(mail.received_date()?)
        );
    }

    if request.fields.contains(MailFetchFields::SIZE) {
        let _ = write!(line, "RFC822.SIZE {} ", mail.rfc822_size()?);
    }

    if request.fields.contains(MailFetchFields::IMAP_BODY) {
        let _ = write!(line, "BODY {} ", mail.imap_body()?);
    }

    if request.fields.contains(MailFetchFields::IMAP_BODYSTRUCTURE) {
        let _ = write!(line, "BODYSTRUCTURE {} ", mail.imap_bodystructure()?);
    }

    if request.fields.contains(MailFetchFields::IMAP_ENVELOPE) {
        let _ = write!(line, "ENVELOPE {} ", mail.imap_envelope()?);
    }

    let wrote_inline = line.len() > prefix_len;
    if wrote_inline {
        // drop the trailing token separator
        line.pop();
    }
    output.write_all(line.as_bytes())?;
    output.set_first(!wrote_inline);

    let mut result = Ok(());

    if request.imap_fields.contains(ImapFetchFields::RFC822) {
        result = send_rfc822(mail, output);
    }
    if result.is_ok()
        && request.imap_fields.contains(ImapFetchFields::RFC822_HEADER)
    {
        result = send_rfc822_header(mail, output);
    }
    if result.is_ok()
        && request.imap_fields.contains(ImapFetchFields::RFC822_TEXT)
    {
        result = send_rfc822_text(mail, output);
    }
    for section in request.sections {
        if result.is_ok() {
            result = mail.send_section(section, output);
        }
    }

    // Close the line even after a failure so an already-complete line is
    // not left dangling; the error still aborts the command.
    let closed = output.write_all(b")\r\n");
    result.and(closed)
}

/// The flags to show on the line given the pre-update snapshot. A \Seen
/// update applied by this very FETCH is folded in rather than re-fetched.
fn rendered_flags(mut snapshot: FullFlags, seen_updated: bool) -> FullFlags {
    if seen_updated {
        snapshot.flags |= MailFlags::SEEN;
    }
    snapshot
}

fn send_rfc822(
    mail: &mut dyn Mail,
    output: &mut FetchOutput<'_>,
) -> Result<(), Error> {
    let opened = mail.open_stream()?;
    let len = opened.hdr_size.virtual_size + opened.body_size.virtual_size;
    output.begin_literal("RFC822", len)?;
    output.stream_exact(opened.stream, len)
}

fn send_rfc822_header(
    mail: &mut dyn Mail,
    output: &mut FetchOutput<'_>,
) -> Result<(), Error> {
    let opened = mail.open_stream()?;
    let len = opened.hdr_size.virtual_size;
    output.begin_literal("RFC822.HEADER", len)?;
    output.stream_exact(opened.stream, len)
}

fn send_rfc822_text(
    mail: &mut dyn Mail,
    output: &mut FetchOutput<'_>,
) -> Result<(), Error> {
    let mut opened = mail.open_stream()?;
    opened
        .stream
        .seek(io::SeekFrom::Start(opened.hdr_size.physical))?;
    let len = opened.body_size.virtual_size;
    output.begin_literal("RFC822.TEXT", len)?;
    output.stream_exact(opened.stream, len)
}

/// If every requested section is of the exact form `HEADER.FIELDS (...)`,
/// the combined field list to pass down as a cache hint; `None` when any
/// section needs the full message. Malformed `HEADER.FIELDS` syntax is a
/// client error, rejected before any locking or output.
fn wanted_header_fields(
    sections: &[BodySection],
) -> Result<Option<Vec<String>>, Error> {
    let mut wanted = Vec::new();
    for section in sections {
        let rest = match section.section.strip_prefix("HEADER.FIELDS ") {
            Some(rest) => rest,
            None => return Ok(None),
        };
        match parse_header_fields(rest) {
            Some(fields) => wanted.extend(fields),
            None => {
                return Err(Error::BadBodySection(section.section.clone()))
            },
        }
    }
    Ok(Some(wanted))
}

/// Parse the parenthesised field-name list of a `HEADER.FIELDS` section.
/// `None` if the list syntax is malformed.
fn parse_header_fields(list: &str) -> Option<Vec<String>> {
    let list = list.trim_start_matches(' ');
    let inner = list.strip_prefix('(')?;
    Some(
        inner
            .split(|c| ' ' == c || ')' == c)
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .collect(),
    )
}
