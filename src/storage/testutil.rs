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

//! Scriptable index and storage doubles shared by the crate's tests.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use super::MailboxCallbacks;
use crate::index::registry::{SharedIndex, SweepTimer};
use crate::index::{
    CacheFields, CacheTransaction, CustomFlagsFix, FullFlags, IndexError,
    IndexHeader, IndexLock, IndexOpenFlags, LockNotify, LockStallFn, MailIndex,
};

/// In-memory `MailIndex` whose failures and stall notifications are scripted
/// by the test. Scripted failures are one-shot; calls and configuration are
/// recorded for inspection through a probe handle.
pub(crate) struct TestIndex {
    pub(crate) dir: PathBuf,
    pub(crate) opened: bool,
    pub(crate) in_memory: bool,
    pub(crate) mailbox_readonly: bool,
    pub(crate) allow_new_custom_flags: bool,
    pub(crate) header: IndexHeader,
    pub(crate) recent_seq: Option<u32>,
    pub(crate) fail_open: Option<IndexError>,
    pub(crate) fail_lock: Option<IndexError>,
    pub(crate) notify_script: Vec<(LockNotify, u32)>,
    pub(crate) custom_flags_fix: Option<FixOutcome>,
    // recorded
    pub(crate) opened_with: Option<IndexOpenFlags>,
    pub(crate) lock_calls: Vec<IndexLock>,
    pub(crate) cache_defaults: Option<(CacheFields, CacheFields)>,
}

pub(crate) enum FixOutcome {
    TooMany,
    Failed(IndexError),
}

impl Default for TestIndex {
    fn default() -> Self {
        TestIndex {
            dir: PathBuf::new(),
            opened: false,
            in_memory: false,
            mailbox_readonly: false,
            allow_new_custom_flags: true,
            header: IndexHeader::default(),
            recent_seq: None,
            fail_open: None,
            fail_lock: None,
            notify_script: vec![],
            custom_flags_fix: None,
            opened_with: None,
            lock_calls: vec![],
            cache_defaults: None,
        }
    }
}

impl TestIndex {
    pub(crate) fn new(dir: &Path) -> Self {
        TestIndex {
            dir: dir.to_owned(),
            ..TestIndex::default()
        }
    }
}

impl MailIndex for TestIndex {
    fn dir(&self) -> &Path {
        &self.dir
    }

    fn is_opened(&self) -> bool {
        self.opened
    }

    fn open(&mut self, flags: IndexOpenFlags) -> Result<(), IndexError> {
        self.opened_with = Some(flags);
        if let Some(e) = self.fail_open.take() {
            return Err(e);
        }
        self.opened = true;
        Ok(())
    }

    fn set_lock(
        &mut self,
        lock: IndexLock,
        notify: Option<&mut LockStallFn<'_>>,
    ) -> Result<(), IndexError> {
        self.lock_calls.push(lock);
        if let Some(e) = self.fail_lock.take() {
            return Err(e);
        }
        if let Some(notify) = notify {
            for &(kind, secs_left) in &self.notify_script {
                notify(kind, secs_left);
            }
        }
        Ok(())
    }

    fn header(&self) -> IndexHeader {
        self.header
    }

    fn lookup_uid_range(&self, _first_uid: u32, _last_uid: u32) -> Option<u32> {
        self.recent_seq
    }

    fn is_in_memory(&self) -> bool {
        self.in_memory
    }

    fn is_mailbox_readonly(&self) -> bool {
        self.mailbox_readonly
    }

    fn allows_new_custom_flags(&self) -> bool {
        self.allow_new_custom_flags
    }

    fn set_cache_defaults(
        &mut self,
        default_fields: CacheFields,
        never_fields: CacheFields,
    ) {
        self.cache_defaults = Some((default_fields, never_fields));
    }

    fn fix_custom_flags(
        &mut self,
        flags: &mut FullFlags,
        custom: &[String],
    ) -> CustomFlagsFix {
        match self.custom_flags_fix {
            None => {
                flags.custom = custom.to_vec();
                CustomFlagsFix::Applied
            },
            Some(FixOutcome::TooMany) => CustomFlagsFix::TooMany,
            Some(FixOutcome::Failed(e)) => CustomFlagsFix::Failed(e),
        }
    }
}

pub(crate) fn shared(index: TestIndex) -> SharedIndex {
    Rc::new(RefCell::new(index))
}

/// Like `shared`, but also returns a concrete handle to the same index so
/// the test can inspect and adjust it behind the trait object.
pub(crate) fn shared_with_probe(
    index: TestIndex,
) -> (Rc<RefCell<TestIndex>>, SharedIndex) {
    let probe = Rc::new(RefCell::new(index));
    let index = Rc::clone(&probe) as SharedIndex;
    (probe, index)
}

/// `SweepTimer` for tests that do not care about the sweep schedule.
pub(crate) struct NullTimer;

impl SweepTimer for NullTimer {
    fn schedule(&mut self, _period: Duration) {}

    fn cancel(&mut self) {}
}

#[derive(Default)]
pub(crate) struct RecordingCallbacks {
    pub(crate) ok: RefCell<Vec<(String, String)>>,
    pub(crate) no: RefCell<Vec<(String, String)>>,
}

impl MailboxCallbacks for RecordingCallbacks {
    fn notify_ok(&self, mailbox: &str, message: &str) {
        self.ok
            .borrow_mut()
            .push((mailbox.to_owned(), message.to_owned()));
    }

    fn notify_no(&self, mailbox: &str, message: &str) {
        self.no
            .borrow_mut()
            .push((mailbox.to_owned(), message.to_owned()));
    }
}

/// Shared journal of what happened to a `TestTransaction`.
#[derive(Default, Clone)]
pub(crate) struct TransLog(pub(crate) Rc<RefCell<Vec<&'static str>>>);

pub(crate) struct TestTransaction {
    pub(crate) log: TransLog,
    pub(crate) fail_commit: Option<IndexError>,
    pub(crate) fail_end: Option<IndexError>,
}

impl TestTransaction {
    pub(crate) fn new(log: &TransLog) -> Self {
        TestTransaction {
            log: log.clone(),
            fail_commit: None,
            fail_end: None,
        }
    }
}

impl CacheTransaction for TestTransaction {
    fn commit(&mut self) -> Result<(), IndexError> {
        self.log.0.borrow_mut().push("commit");
        match self.fail_commit.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn end(self: Box<Self>) -> Result<(), IndexError> {
        self.log.0.borrow_mut().push("end");
        match self.fail_end {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
