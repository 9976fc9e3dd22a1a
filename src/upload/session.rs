// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Staging buffer ownership for one in-flight upload.
// Author: Lukas Bower

//! Upload staging session.

use alloc::boxed::Box;

use slot_wire::Rejection;

use crate::config::MAX_BYTECODE_SIZE;

/// Identity of a wireless connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u16);

/// Ownership state of the staging buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No upload in flight; the buffer is zeroed.
    Idle,
    /// `owner` has staged at least one chunk.
    Receiving {
        /// Connection that started the upload.
        owner: ConnectionId,
    },
}

/// Staging buffer plus the connection that owns it.
pub struct StagingSession {
    state: SessionState,
    buffer: Box<[u8; MAX_BYTECODE_SIZE]>,
}

impl StagingSession {
    /// Idle session with a zeroed buffer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            buffer: Box::new([0u8; MAX_BYTECODE_SIZE]),
        }
    }

    /// Current ownership state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whole staging buffer.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.buffer[..]
    }

    /// Fail with [`Rejection::SessionBusy`] if another connection owns the buffer.
    pub fn check_owner(&self, conn: ConnectionId) -> Result<(), Rejection> {
        match self.state {
            SessionState::Receiving { owner } if owner != conn => Err(Rejection::SessionBusy),
            _ => Ok(()),
        }
    }

    /// Copy `payload` to `offset`. The buffer is untouched on error.
    pub fn stage(
        &mut self,
        conn: ConnectionId,
        offset: usize,
        payload: &[u8],
    ) -> Result<(), Rejection> {
        self.check_owner(conn)?;
        let end = offset
            .checked_add(payload.len())
            .filter(|end| *end <= MAX_BYTECODE_SIZE)
            .ok_or(Rejection::SizeExceedsBuffer)?;
        self.buffer[offset..end].copy_from_slice(payload);
        self.state = SessionState::Receiving { owner: conn };
        Ok(())
    }

    /// First `len` staged bytes, if `len` fits the buffer.
    #[must_use]
    pub fn staged(&self, len: usize) -> Option<&[u8]> {
        self.buffer.get(..len)
    }

    /// Zero the buffer and return to idle.
    pub fn finish(&mut self) {
        self.buffer.fill(0);
        self.state = SessionState::Idle;
    }

    /// End the session if `conn` owns it. Returns whether anything was dropped.
    pub fn abandon(&mut self, conn: ConnectionId) -> bool {
        match self.state {
            SessionState::Receiving { owner } if owner == conn => {
                self.finish();
                true
            }
            _ => false,
        }
    }
}

impl Default for StagingSession {
    fn default() -> Self {
        Self::new()
    }
}
