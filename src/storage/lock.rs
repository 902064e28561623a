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

//! Lock acquisition for mailbox sessions.
//!
//! Index locks can stall behind other processes. While stalled, the index
//! layer calls back into the session so the user can be told what is being
//! waited on and how long until the operation gives up. Notifications are
//! throttled so a long wait produces a periodic reminder rather than a
//! flood.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::session::MailboxSession;
use super::{LockAccess, MailboxCallbacks};
use crate::index::{IndexLock, LockNotify, LockStallFn};
use crate::support::error::Error;

/// Seconds between repeated notifications about the same stall.
const LOCK_NOTIFY_INTERVAL: i64 = 30;

/// Throttle state for lock stall notifications, one per session.
pub(super) struct LockNotifyState {
    last: Option<LockNotify>,
    next_notify: DateTime<Utc>,
}

impl LockNotifyState {
    pub(super) fn new(now: DateTime<Utc>) -> Self {
        LockNotifyState {
            last: None,
            next_notify: now + chrono::Duration::seconds(LOCK_NOTIFY_INTERVAL),
        }
    }

    /// Reset the throttle at the start of a fresh lock attempt so a stall on
    /// one operation is not suppressed by a notification sent during an
    /// earlier one.
    pub(super) fn rearm(&mut self, now: DateTime<Utc>) {
        self.last = None;
        self.next_notify =
            now + chrono::Duration::seconds(LOCK_NOTIFY_INTERVAL);
    }

    /// Handle one stall callback. Returns the delay until the index layer
    /// should poll us again, `None` to keep its default cadence.
    pub(super) fn on_notify(
        &mut self,
        kind: LockNotify,
        secs_left: u32,
        now: DateTime<Utc>,
        mailbox: &str,
        callbacks: &dyn MailboxCallbacks,
    ) -> Option<Duration> {
        // Wake up again exactly when secs_left next crosses a multiple of
        // 15, so the countdown in the message stays on round numbers.
        let wakeup = match secs_left % 15 {
            0 => None,
            rem => Some(Duration::from_secs(u64::from(rem))),
        };

        let show = match self.last {
            // The first stale-lock override is always worth announcing.
            None if kind == LockNotify::MailboxOverride => true,
            // Same situation as last time: once per interval, except that
            // the final countdown is always shown.
            None => now >= self.next_notify || secs_left < 15,
            Some(last) if last == kind => {
                now >= self.next_notify || secs_left < 15
            },
            // The situation changed; tell the user immediately.
            Some(_) => true,
        };
        if !show {
            return wakeup;
        }

        self.next_notify =
            now + chrono::Duration::seconds(LOCK_NOTIFY_INTERVAL);
        self.last = Some(kind);

        match kind {
            LockNotify::MailboxAbort => callbacks.notify_no(
                mailbox,
                &format!(
                    "Mailbox is locked, will abort in {} seconds",
                    secs_left
                ),
            ),
            LockNotify::MailboxOverride => callbacks.notify_ok(
                mailbox,
                &format!(
                    "Stale mailbox lock file detected, \
                     will override in {} seconds",
                    secs_left
                ),
            ),
            LockNotify::IndexAbort => callbacks.notify_no(
                mailbox,
                &format!(
                    "Mailbox index is locked, will abort in {} seconds",
                    secs_left
                ),
            ),
        }

        wakeup
    }
}

impl MailboxSession {
    /// Take the lock appropriate for the given kind of access.
    pub fn lock(&mut self, access: LockAccess) -> Result<(), Error> {
        let lock = if access.is_empty() {
            IndexLock::Unlock
        } else if access.contains(LockAccess::SAVE) {
            IndexLock::Exclusive
        } else {
            IndexLock::Shared
        };
        self.set_lock(lock)
    }

    pub fn unlock(&mut self) -> Result<(), Error> {
        self.set_lock(IndexLock::Unlock)
    }

    /// Move the session to the given lock level.
    ///
    /// Unlocking first flushes any staged cache transaction; both the commit
    /// and the teardown are attempted even if one of them fails, and the
    /// first error wins. While the session holds an exclusive lock, requests
    /// for any other lock level short of unlocking are no-ops.
    pub fn set_lock(&mut self, lock: IndexLock) -> Result<(), Error> {
        if let IndexLock::Unlock = lock {
            let mut pending = None;

            if let Some(mut trans) = self.trans.take() {
                if let Err(e) = trans.commit() {
                    pending.get_or_insert(e);
                }
                if let Err(e) = trans.end() {
                    pending.get_or_insert(e);
                }
            }

            if self.lock != IndexLock::Unlock {
                let unlocked =
                    self.index.borrow_mut().set_lock(IndexLock::Unlock, None);
                if let Err(e) = unlocked {
                    pending.get_or_insert(e);
                }
                self.lock = IndexLock::Unlock;
            }

            return match pending {
                None => Ok(()),
                Some(e) => Err(self.translate_index_error(e)),
            };
        }

        if self.lock == IndexLock::Exclusive {
            return Ok(());
        }

        self.notify.rearm(Utc::now());
        let result = {
            let name = &self.name;
            let notify = &mut self.notify;
            let callbacks = self.storage.callbacks();
            let mut on_stall = |kind: LockNotify, secs_left: u32| {
                notify.on_notify(kind, secs_left, Utc::now(), name, &*callbacks)
            };
            self.index
                .borrow_mut()
                .set_lock(lock, Some(&mut on_stall as &mut LockStallFn<'_>))
        };

        match result {
            Ok(()) => {
                self.lock = lock;
                Ok(())
            },
            Err(e) => Err(self.translate_index_error(e)),
        }
    }
}
