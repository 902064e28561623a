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

//! Contracts for the on-disk per-mailbox index layer.
//!
//! The physical record/header format, the custom-flag table, and the
//! cross-process lock mechanics live behind the `MailIndex` trait; everything
//! above (registry, sessions, FETCH) is written against these interfaces
//! only.

use std::path::Path;
use std::time::Duration;

use bitflags::bitflags;

pub mod cache_fields;
pub mod registry;

pub use self::cache_fields::CacheFields;

/// Error kinds reported by the index layer.
///
/// Values are moved out of the index and consumed by the session-level
/// translation, so a stale error can never be re-reported for an unrelated
/// later operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexError {
    Internal,
    Inconsistent,
    DiskSpace,
    IndexLockTimeout,
    MailboxLockTimeout,
}

/// Advisory lock levels understood by the index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexLock {
    Unlock,
    Shared,
    Exclusive,
}

bitflags! {
    /// Flags for `MailIndex::open`.
    pub struct IndexOpenFlags: u32 {
        /// Create the index files if they do not exist yet.
        const CREATE = 1 << 0;
        /// Open without validating everything up front.
        const FAST = 1 << 1;
        /// Update the first-recent-UID marker while opening.
        const UPDATE_RECENT = 1 << 2;
        /// Invalidate any memory mappings of the index files.
        const MMAP_INVALIDATE = 1 << 3;
    }
}

bitflags! {
    /// Standard system flags on a message.
    pub struct MailFlags: u32 {
        const ANSWERED = 1 << 0;
        const FLAGGED = 1 << 1;
        const DELETED = 1 << 2;
        const SEEN = 1 << 3;
        const DRAFT = 1 << 4;
        const RECENT = 1 << 5;
    }
}

impl Default for MailFlags {
    fn default() -> Self {
        MailFlags::empty()
    }
}

/// System flags plus any custom keywords set on a message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FullFlags {
    pub flags: MailFlags,
    pub custom: Vec<String>,
}

/// Whether a flag update adds to or removes from the current set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlagUpdate {
    Add,
    Remove,
}

/// Snapshot of the index header fields the storage layer consumes.
#[derive(Clone, Copy, Debug, Default)]
pub struct IndexHeader {
    pub messages_count: u32,
    pub next_uid: u32,
    pub first_recent_uid: u32,
}

/// Stall notifications the lock provider may raise while a `set_lock` call
/// is blocked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockNotify {
    /// The mailbox is locked by someone else and the wait will be aborted.
    MailboxAbort,
    /// A stale mailbox lock file was detected and will be overridden.
    MailboxOverride,
    /// The index itself is locked and the wait will be aborted.
    IndexAbort,
}

/// Callback invoked by the lock provider while it is blocked waiting for a
/// lock, with the notification kind and the seconds left until it gives up.
/// The returned duration, if any, asks the provider to invoke the callback
/// again after that long so that notifications land on round intervals.
pub type LockStallFn<'a> = dyn FnMut(LockNotify, u32) -> Option<Duration> + 'a;

/// Outcome of resolving a message's ad hoc keywords against the mailbox's
/// custom-flag table.
#[derive(Debug)]
pub enum CustomFlagsFix {
    Applied,
    TooMany,
    Failed(IndexError),
}

/// An opened per-mailbox on-disk index. Implementations are supplied by the
/// storage backend; dropping the last reference frees the handle.
pub trait MailIndex {
    /// The directory holding the index files. Registry identity is this
    /// directory's device+inode pair.
    fn dir(&self) -> &Path;

    fn is_opened(&self) -> bool;

    fn open(&mut self, flags: IndexOpenFlags) -> Result<(), IndexError>;

    /// Acquire or release the advisory lock. May block; while blocked the
    /// provider calls `notify` zero or more times.
    fn set_lock(
        &mut self,
        lock: IndexLock,
        notify: Option<&mut LockStallFn<'_>>,
    ) -> Result<(), IndexError>;

    fn header(&self) -> IndexHeader;

    /// Sequence number of the first message whose UID falls in
    /// `first_uid..=last_uid`, if any.
    fn lookup_uid_range(&self, first_uid: u32, last_uid: u32) -> Option<u32>;

    /// Whether the index ended up memory-backed instead of on disk.
    fn is_in_memory(&self) -> bool;

    fn is_mailbox_readonly(&self) -> bool;

    fn allows_new_custom_flags(&self) -> bool;

    fn set_cache_defaults(
        &mut self,
        default_fields: CacheFields,
        never_fields: CacheFields,
    );

    fn fix_custom_flags(
        &mut self,
        flags: &mut FullFlags,
        custom: &[String],
    ) -> CustomFlagsFix;
}

/// A cache-write transaction staged against a locked index. Committed and
/// ended when the owning session releases its lock.
pub trait CacheTransaction {
    fn commit(&mut self) -> Result<(), IndexError>;
    fn end(self: Box<Self>) -> Result<(), IndexError>;
}
