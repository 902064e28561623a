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

//! Cache of opened index handles.
//!
//! Opening an index means real file I/O, and short-lived sessions against
//! the same mailbox arrive in quick succession, so handles whose last
//! session went away are kept for a grace window and handed back out to the
//! next session that resolves to the same physical directory. A hard cap on
//! unreferenced handles and a periodic sweep bound memory growth and
//! staleness.

use std::cell::RefCell;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::MailIndex;

/// How many seconds to keep an index handle for reuse after its last
/// session released it.
const INDEX_CACHE_TIMEOUT: i64 = 10;
/// How many unreferenced handles to keep.
const INDEX_CACHE_MAX: usize = 3;
/// How often the host should drive `sweep` while the timer is scheduled.
pub const INDEX_SWEEP_PERIOD: Duration = Duration::from_millis(1000);

/// A shared, interior-mutable index handle. The registry keeps one clone of
/// the `Rc` as its cache-keepalive reference; every other clone belongs to a
/// mailbox session.
pub type SharedIndex = Rc<RefCell<dyn MailIndex>>;

/// Recurring timer driving `IndexRegistry::sweep`, supplied by the host
/// event loop.
pub trait SweepTimer {
    fn schedule(&mut self, period: Duration);
    fn cancel(&mut self);
}

/// Filesystem identity of an index directory. Comparing device+inode keeps
/// symlinked paths to the same mailbox on one handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
}

impl FileIdentity {
    fn of(path: &Path) -> std::io::Result<Self> {
        let md = fs::metadata(path)?;
        Ok(FileIdentity {
            dev: md.dev(),
            ino: md.ino(),
        })
    }
}

struct CacheEntry {
    index: SharedIndex,
    /// When this entry may be destroyed. Meaningful only while the entry is
    /// unreferenced; restamped on every release.
    destroy_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    fn is_unreferenced(&self) -> bool {
        Rc::strong_count(&self.index) == 1
    }

    fn expired(&self, now: DateTime<Utc>) -> bool {
        self.destroy_at.map_or(true, |at| at <= now)
    }
}

/// The process-wide index handle cache. One instance is wired through the
/// process; ownership is explicit rather than a hidden global.
pub struct IndexRegistry {
    entries: Vec<CacheEntry>,
    timer: Box<dyn SweepTimer>,
    timer_scheduled: bool,
}

impl IndexRegistry {
    pub fn new(timer: Box<dyn SweepTimer>) -> Self {
        IndexRegistry {
            entries: Vec::new(),
            timer,
            timer_scheduled: false,
        }
    }

    /// Resolve `path` to a cached handle, incrementing its reference.
    ///
    /// Returns `None` when `path` cannot be statted or no cached entry has
    /// the same filesystem identity; the caller then opens a fresh index and
    /// hands it to `attach_new`. The walk also reaps unreferenced entries
    /// that have expired or exceed the cache cap. Duplicate identities
    /// should not occur, but the scan does not assume it and returns the
    /// first match.
    pub fn resolve_or_attach(
        &mut self,
        path: &Path,
        now: DateTime<Utc>,
    ) -> Option<SharedIndex> {
        let id = FileIdentity::of(path).ok()?;

        let mut matched: Option<SharedIndex> = None;
        let mut destroy_count = 0;
        let mut i = 0;
        while i < self.entries.len() {
            if matched.is_none() {
                let same = {
                    let index = self.entries[i].index.borrow();
                    FileIdentity::of(index.dir()).ok() == Some(id)
                };
                if same {
                    matched = Some(Rc::clone(&self.entries[i].index));
                }
            }

            if self.entries[i].is_unreferenced() {
                if self.entries[i].expired(now)
                    || destroy_count >= INDEX_CACHE_MAX
                {
                    self.entries.remove(i);
                    continue;
                }
                destroy_count += 1;
            }

            i += 1;
        }

        matched
    }

    /// Insert a freshly created handle. Called exactly once per physical
    /// mailbox, the first time it is opened; the caller keeps its own
    /// reference.
    pub fn attach_new(&mut self, index: &SharedIndex) {
        self.entries.push(CacheEntry {
            index: Rc::clone(index),
            destroy_at: None,
        });
    }

    /// Give back a reference obtained from `resolve_or_attach` or retained
    /// across `attach_new`. Consumes the handle, restamps the entry's
    /// destroy time, and makes sure the sweep timer is running.
    pub fn release(&mut self, index: SharedIndex, now: DateTime<Utc>) {
        let pos = self
            .entries
            .iter()
            .position(|e| Rc::ptr_eq(&e.index, &index));
        let pos = match pos {
            Some(pos) => pos,
            None => panic!("released an index handle that is not registered"),
        };

        drop(index);
        self.entries[pos].destroy_at =
            Some(now + chrono::Duration::seconds(INDEX_CACHE_TIMEOUT));

        if !self.timer_scheduled {
            self.timer.schedule(INDEX_SWEEP_PERIOD);
            self.timer_scheduled = true;
        }
    }

    /// Destroy unreferenced entries whose destroy time has elapsed or that
    /// exceed the cache cap; with `force`, destroy every unreferenced entry
    /// regardless of its timestamp (the shutdown path). Cancels the timer
    /// once the registry is empty.
    pub fn sweep(&mut self, force: bool, now: DateTime<Utc>) {
        let mut keep_count = 0;
        self.entries.retain(|entry| {
            if entry.is_unreferenced()
                && (force || entry.expired(now) || keep_count >= INDEX_CACHE_MAX)
            {
                return false;
            }
            if entry.is_unreferenced() {
                keep_count += 1;
            }
            true
        });

        if self.entries.is_empty() && self.timer_scheduled {
            self.timer.cancel();
            self.timer_scheduled = false;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
