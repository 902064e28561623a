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

use std::rc::Rc;

use chrono::{DateTime, Utc};

use super::lock::LockNotifyState;
use super::{MailStorage, MailboxOpenFlags};
use crate::index::registry::{IndexRegistry, SharedIndex};
use crate::index::{
    cache_fields, CacheTransaction, CustomFlagsFix, FullFlags, IndexError,
    IndexLock, IndexOpenFlags,
};
use crate::support::error::Error;

/// One opened mailbox, bound to a (possibly shared) index handle.
///
/// Several sessions may share one handle through the registry; each session
/// owns its own lock state, staged cache transaction, and notification
/// throttle. A session never outlives its registry reference.
pub struct MailboxSession {
    pub(super) storage: Rc<MailStorage>,
    pub(super) index: SharedIndex,
    pub(super) name: String,
    pub(super) lock: IndexLock,
    pub(super) trans: Option<Box<dyn CacheTransaction>>,
    pub(super) notify: LockNotifyState,
    read_only: bool,
    inconsistent: bool,
    synced_messages_count: u32,
}

impl MailboxSession {
    /// Open a mailbox over `index`, which the caller obtained from the
    /// registry (`resolve_or_attach`, or a fresh handle passed through
    /// `attach_new`).
    ///
    /// Opens the index if this is its first use, applies the cache-field
    /// configuration, and validates the handle by taking a short shared lock
    /// to snapshot the message count. On any failure the partially-acquired
    /// resources are wound back (lock dropped, registry reference released);
    /// no partial session is ever returned.
    pub fn open(
        storage: Rc<MailStorage>,
        registry: &mut IndexRegistry,
        index: SharedIndex,
        name: &str,
        flags: MailboxOpenFlags,
        now: DateTime<Utc>,
    ) -> Result<MailboxSession, Error> {
        let mut index_flags = IndexOpenFlags::CREATE;
        if flags.contains(MailboxOpenFlags::FAST) {
            index_flags |= IndexOpenFlags::FAST;
        }
        if flags.contains(MailboxOpenFlags::READONLY) {
            index_flags |= IndexOpenFlags::UPDATE_RECENT;
        }
        if flags.contains(MailboxOpenFlags::MMAP_INVALIDATE) {
            index_flags |= IndexOpenFlags::MMAP_INVALIDATE;
        }

        let read_only = flags.contains(MailboxOpenFlags::READONLY)
            || index.borrow().is_mailbox_readonly();

        let mut session = MailboxSession {
            storage,
            index,
            name: name.to_owned(),
            lock: IndexLock::Unlock,
            trans: None,
            notify: LockNotifyState::new(now),
            read_only,
            inconsistent: false,
            synced_messages_count: 0,
        };

        match session.open_index_and_snapshot(index_flags) {
            Ok(()) => Ok(session),
            Err(e) => {
                let _ = session.set_lock(IndexLock::Unlock);
                let MailboxSession { index, .. } = session;
                registry.release(index, now);
                Err(e)
            },
        }
    }

    fn open_index_and_snapshot(
        &mut self,
        index_flags: IndexOpenFlags,
    ) -> Result<(), Error> {
        let needs_open = !self.index.borrow().is_opened();
        if needs_open {
            let opened = self.index.borrow_mut().open(index_flags);
            if let Err(e) = opened {
                return Err(self.translate_index_error(e));
            }

            self.index.borrow_mut().set_cache_defaults(
                cache_fields::default_cache_fields(),
                cache_fields::never_cache_fields(),
            );

            // Falling back to an in-memory index is degraded but survivable;
            // tell the user and carry on.
            let degraded = self.index.borrow().is_in_memory()
                && self.storage.index_dir().is_some();
            if degraded {
                self.storage
                    .callbacks()
                    .notify_ok(&self.name, "Couldn't use index files");
            }
        }

        self.set_lock(IndexLock::Shared)?;
        self.synced_messages_count = self.index.borrow().header().messages_count;
        self.set_lock(IndexLock::Unlock)?;

        Ok(())
    }

    /// Close the session: force the lock off (best effort) and give the
    /// index reference back to the registry.
    pub fn close(self, registry: &mut IndexRegistry, now: DateTime<Utc>) {
        let mut session = self;
        let _ = session.set_lock(IndexLock::Unlock);
        let MailboxSession { index, .. } = session;
        registry.release(index, now);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Whether the index layer ever reported the mailbox inconsistent. The
    /// flag is sticky; the session must be closed and reopened to clear it.
    pub fn is_inconsistent(&self) -> bool {
        self.inconsistent
    }

    pub fn allows_new_custom_flags(&self) -> bool {
        self.index.borrow().allows_new_custom_flags()
    }

    /// Message count snapshotted from the index header at open time.
    pub fn synced_messages_count(&self) -> u32 {
        self.synced_messages_count
    }

    /// Stage a cache-write transaction against this session's lock. It is
    /// committed and ended when the lock is next released.
    pub fn stage_cache_transaction(&mut self, trans: Box<dyn CacheTransaction>) {
        assert!(
            self.trans.is_none(),
            "cache transaction already staged on {}",
            self.name
        );
        self.trans = Some(trans);
    }

    /// Resolve a message's ad hoc keywords against the mailbox's custom-flag
    /// table. Running out of flag slots is a recoverable, user-visible
    /// condition distinct from index-layer failures.
    pub fn fix_custom_flags(
        &mut self,
        flags: &mut FullFlags,
        custom: &[String],
    ) -> Result<(), Error> {
        let fix = self.index.borrow_mut().fix_custom_flags(flags, custom);
        match fix {
            CustomFlagsFix::Applied => Ok(()),
            CustomFlagsFix::TooMany => Err(Error::CustomFlagsOverflow),
            CustomFlagsFix::Failed(e) => Err(self.translate_index_error(e)),
        }
    }

    /// Number of messages still flagged recent, from the index header and
    /// the first-recent-UID marker.
    pub fn recent_count(&self) -> u32 {
        let index = self.index.borrow();
        let hdr = index.header();

        if hdr.first_recent_uid <= 1 {
            // all are recent
            return hdr.messages_count;
        }
        if hdr.first_recent_uid >= hdr.next_uid {
            return 0;
        }

        match index.lookup_uid_range(hdr.first_recent_uid, hdr.next_uid - 1) {
            Some(seq) => hdr.messages_count + 1 - seq,
            None => 0,
        }
    }

    /// Map an index-layer error onto the session boundary. Inconsistency is
    /// remembered on the session; the other kinds become user-visible
    /// errors. The index error is consumed here, so it cannot be re-reported
    /// by a later unrelated operation.
    pub(super) fn translate_index_error(&mut self, error: IndexError) -> Error {
        match error {
            IndexError::Internal => Error::Internal,
            IndexError::Inconsistent => {
                self.inconsistent = true;
                Error::Inconsistent
            },
            IndexError::DiskSpace => Error::OutOfDiskSpace,
            IndexError::IndexLockTimeout => {
                Error::IndexLockTimeout(self.name.clone())
            },
            IndexError::MailboxLockTimeout => {
                Error::MailboxLockTimeout(self.name.clone())
            },
        }
    }
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::fs;

    use tempfile::TempDir;

    use super::super::testutil::*;
    use super::*;
    use crate::index::IndexHeader;
    use crate::support::chronox::*;

    struct Setup {
        root: TempDir,
        registry: IndexRegistry,
        storage: Rc<MailStorage>,
    }

    fn set_up() -> Setup {
        let root = TempDir::new().unwrap();
        let registry = IndexRegistry::new(Box::new(NullTimer));
        let storage = Rc::new(MailStorage::new(None));
        Setup {
            root,
            registry,
            storage,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.ymd_hmsx(2026, 3, 14, 12, 0, 0)
    }

    fn attach(
        setup: &mut Setup,
        index: TestIndex,
    ) -> (Rc<RefCell<TestIndex>>, SharedIndex) {
        let dir = setup.root.path().join("inbox");
        if !dir.exists() {
            fs::create_dir(&dir).unwrap();
        }
        let (probe, index) = shared_with_probe(TestIndex { dir, ..index });
        setup.registry.attach_new(&index);
        (probe, index)
    }

    fn open(
        setup: &mut Setup,
        index: SharedIndex,
        flags: MailboxOpenFlags,
    ) -> Result<MailboxSession, Error> {
        MailboxSession::open(
            Rc::clone(&setup.storage),
            &mut setup.registry,
            index,
            "INBOX",
            flags,
            now(),
        )
    }

    #[test]
    fn open_snapshots_message_count() {
        let mut setup = set_up();
        let (probe, index) = attach(
            &mut setup,
            TestIndex {
                header: IndexHeader {
                    messages_count: 42,
                    next_uid: 100,
                    first_recent_uid: 1,
                },
                ..TestIndex::default()
            },
        );

        let session =
            open(&mut setup, Rc::clone(&index), MailboxOpenFlags::empty())
                .unwrap();
        assert_eq!(42, session.synced_messages_count());
        assert_eq!("INBOX", session.name());
        assert!(!session.is_read_only());
        assert!(!session.is_inconsistent());

        {
            let ix = probe.borrow();
            assert_eq!(vec![IndexLock::Shared, IndexLock::Unlock], ix.lock_calls);
            assert_eq!(Some(IndexOpenFlags::CREATE), ix.opened_with);
            assert!(ix.cache_defaults.is_some());
        }

        session.close(&mut setup.registry, now());
        // registry keepalive + probe + our clone
        assert_eq!(3, Rc::strong_count(&index));
    }

    #[test]
    fn open_flags_map_onto_index_flags() {
        let mut setup = set_up();
        let (probe, index) = attach(&mut setup, TestIndex::default());

        let session = open(
            &mut setup,
            Rc::clone(&index),
            MailboxOpenFlags::READONLY
                | MailboxOpenFlags::FAST
                | MailboxOpenFlags::MMAP_INVALIDATE,
        )
        .unwrap();
        assert!(session.is_read_only());

        assert_eq!(
            Some(
                IndexOpenFlags::CREATE
                    | IndexOpenFlags::FAST
                    | IndexOpenFlags::UPDATE_RECENT
                    | IndexOpenFlags::MMAP_INVALIDATE
            ),
            probe.borrow().opened_with
        );

        session.close(&mut setup.registry, now());
    }

    #[test]
    fn readonly_index_forces_readonly_session() {
        let mut setup = set_up();
        let (_probe, index) = attach(
            &mut setup,
            TestIndex {
                mailbox_readonly: true,
                ..TestIndex::default()
            },
        );

        let session =
            open(&mut setup, Rc::clone(&index), MailboxOpenFlags::empty())
                .unwrap();
        assert!(session.is_read_only());
        session.close(&mut setup.registry, now());
    }

    #[test]
    fn already_opened_index_is_not_reopened() {
        let mut setup = set_up();
        let (probe, index) = attach(
            &mut setup,
            TestIndex {
                opened: true,
                ..TestIndex::default()
            },
        );

        let session =
            open(&mut setup, Rc::clone(&index), MailboxOpenFlags::empty())
                .unwrap();

        {
            let ix = probe.borrow();
            assert_eq!(None, ix.opened_with);
            assert!(ix.cache_defaults.is_none());
        }

        session.close(&mut setup.registry, now());
    }

    #[test]
    fn in_memory_fallback_notifies_user() {
        let mut setup = set_up();
        setup.storage =
            Rc::new(MailStorage::new(Some(setup.root.path().join("indexes"))));
        let callbacks = Rc::new(RecordingCallbacks::default());
        setup.storage.set_callbacks(Rc::clone(&callbacks) as _);

        let (_probe, index) = attach(
            &mut setup,
            TestIndex {
                in_memory: true,
                ..TestIndex::default()
            },
        );

        let session =
            open(&mut setup, Rc::clone(&index), MailboxOpenFlags::empty())
                .unwrap();
        assert_eq!(
            vec![("INBOX".to_owned(), "Couldn't use index files".to_owned())],
            *callbacks.ok.borrow()
        );
        session.close(&mut setup.registry, now());
    }

    #[test]
    fn failed_open_releases_registry_reference() {
        let mut setup = set_up();
        let (_probe, index) = attach(
            &mut setup,
            TestIndex {
                fail_open: Some(IndexError::DiskSpace),
                ..TestIndex::default()
            },
        );

        let result = open(&mut setup, Rc::clone(&index), MailboxOpenFlags::empty())
            .map(|_| ());
        assert_matches!(Err(Error::OutOfDiskSpace), result);
        // The session's reference went back to the registry; only the
        // keepalive, the probe, and our clone remain.
        assert_eq!(3, Rc::strong_count(&index));
    }

    #[test]
    fn failed_validation_lock_releases_everything() {
        let mut setup = set_up();
        let (_probe, index) = attach(
            &mut setup,
            TestIndex {
                fail_lock: Some(IndexError::IndexLockTimeout),
                ..TestIndex::default()
            },
        );

        let result =
            open(&mut setup, Rc::clone(&index), MailboxOpenFlags::empty());
        match result {
            Err(Error::IndexLockTimeout(name)) => assert_eq!("INBOX", name),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        assert_eq!(3, Rc::strong_count(&index));
    }

    #[test]
    fn inconsistency_is_sticky() {
        let mut setup = set_up();
        let (probe, index) = attach(&mut setup, TestIndex::default());

        let mut session =
            open(&mut setup, Rc::clone(&index), MailboxOpenFlags::empty())
                .unwrap();

        probe.borrow_mut().fail_lock = Some(IndexError::Inconsistent);
        let result = session.set_lock(IndexLock::Shared);
        assert_matches!(Err(Error::Inconsistent), result);
        assert!(session.is_inconsistent());

        // A later successful operation does not clear the flag.
        session.set_lock(IndexLock::Shared).unwrap();
        assert!(session.is_inconsistent());

        session.close(&mut setup.registry, now());
    }

    #[test]
    fn custom_flag_overflow_is_distinguished() {
        let mut setup = set_up();
        let (_probe, index) = attach(
            &mut setup,
            TestIndex {
                custom_flags_fix: Some(FixOutcome::TooMany),
                ..TestIndex::default()
            },
        );

        let mut session =
            open(&mut setup, Rc::clone(&index), MailboxOpenFlags::empty())
                .unwrap();
        let mut flags = FullFlags::default();
        let result =
            session.fix_custom_flags(&mut flags, &["urgent".to_owned()]);
        assert_matches!(Err(Error::CustomFlagsOverflow), result);
        assert!(!session.is_inconsistent());

        session.close(&mut setup.registry, now());
    }

    #[test]
    fn custom_flag_index_failure_is_translated() {
        let mut setup = set_up();
        let (_probe, index) = attach(
            &mut setup,
            TestIndex {
                custom_flags_fix: Some(FixOutcome::Failed(
                    IndexError::Inconsistent,
                )),
                ..TestIndex::default()
            },
        );

        let mut session =
            open(&mut setup, Rc::clone(&index), MailboxOpenFlags::empty())
                .unwrap();
        let mut flags = FullFlags::default();
        let result =
            session.fix_custom_flags(&mut flags, &["urgent".to_owned()]);
        assert_matches!(Err(Error::Inconsistent), result);
        assert!(session.is_inconsistent());

        session.close(&mut setup.registry, now());
    }

    #[test]
    fn recent_count_follows_first_recent_uid() {
        let mut setup = set_up();
        let (probe, index) = attach(
            &mut setup,
            TestIndex {
                header: IndexHeader {
                    messages_count: 10,
                    next_uid: 21,
                    first_recent_uid: 0,
                },
                ..TestIndex::default()
            },
        );
        let session =
            open(&mut setup, Rc::clone(&index), MailboxOpenFlags::empty())
                .unwrap();

        // first_recent_uid <= 1: everything is recent
        assert_eq!(10, session.recent_count());

        // past next_uid: nothing is recent
        probe.borrow_mut().header.first_recent_uid = 21;
        assert_eq!(0, session.recent_count());

        // somewhere in the middle: counted from the matching sequence
        {
            let mut ix = probe.borrow_mut();
            ix.header.first_recent_uid = 15;
            ix.recent_seq = Some(7);
        }
        assert_eq!(4, session.recent_count());

        session.close(&mut setup.registry, now());
    }
}
