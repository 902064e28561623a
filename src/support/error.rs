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

use std::io;

use thiserror::Error;

/// Errors surfaced at the mailbox/storage boundary.
///
/// The lock-timeout and custom-flag variants carry user-visible messages;
/// `Internal` deliberately does not, since the details belong in the server
/// log rather than on the wire.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Internal error occurred. Refer to server log for more information.")]
    Internal,
    #[error("Mailbox is in inconsistent state")]
    Inconsistent,
    #[error("Out of disk space")]
    OutOfDiskSpace,
    #[error("Timeout while waiting for lock to index of mailbox {0}")]
    IndexLockTimeout(String),
    #[error("Timeout while waiting for lock to mailbox {0}")]
    MailboxLockTimeout(String),
    #[error("Maximum number of different custom flags exceeded")]
    CustomFlagsOverflow,
    #[error("Invalid body section: {0}")]
    BadBodySection(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}
