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

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use bitflags::bitflags;
use log::{info, warn};

pub mod lock;
pub mod session;
#[cfg(test)]
pub(crate) mod testutil;

pub use self::session::MailboxSession;

bitflags! {
    /// Options for opening a mailbox.
    pub struct MailboxOpenFlags: u32 {
        const READONLY = 1 << 0;
        const FAST = 1 << 1;
        const MMAP_INVALIDATE = 1 << 2;
    }
}

bitflags! {
    /// What a caller intends to do under a mailbox lock. READ and FLAGS map
    /// onto a shared index lock, SAVE onto an exclusive one.
    pub struct LockAccess: u32 {
        const READ = 1 << 0;
        const FLAGS = 1 << 1;
        const SAVE = 1 << 2;
    }
}

/// Notification sink for messages the user should see while an operation is
/// in flight: `notify_ok` for benign notices, `notify_no` for abort-risk
/// ones.
pub trait MailboxCallbacks {
    fn notify_ok(&self, mailbox: &str, message: &str);
    fn notify_no(&self, mailbox: &str, message: &str);
}

/// Fallback sink used until the frontend registers its own: notices just go
/// to the log.
struct LogCallbacks;

impl MailboxCallbacks for LogCallbacks {
    fn notify_ok(&self, mailbox: &str, message: &str) {
        info!("{}: {}", mailbox, message);
    }

    fn notify_no(&self, mailbox: &str, message: &str) {
        warn!("{}: {}", mailbox, message);
    }
}

/// Per-storage-instance state shared by every session opened through it.
pub struct MailStorage {
    index_dir: Option<PathBuf>,
    callbacks: RefCell<Rc<dyn MailboxCallbacks>>,
}

impl MailStorage {
    /// `index_dir` is where persistent index files were requested to live,
    /// if anywhere; it only matters for the degraded-mode notice when an
    /// index falls back to memory.
    pub fn new(index_dir: Option<PathBuf>) -> Self {
        MailStorage {
            index_dir,
            callbacks: RefCell::new(Rc::new(LogCallbacks)),
        }
    }

    pub fn index_dir(&self) -> Option<&Path> {
        self.index_dir.as_deref()
    }

    /// Replace the notification sink. Takes effect for every session sharing
    /// this storage, including ones already open.
    pub fn set_callbacks(&self, callbacks: Rc<dyn MailboxCallbacks>) {
        *self.callbacks.borrow_mut() = callbacks;
    }

    pub(crate) fn callbacks(&self) -> Rc<dyn MailboxCallbacks> {
        Rc::clone(&*self.callbacks.borrow())
    }
}
