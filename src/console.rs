// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Bounded console line ring streamed to the client's console channel.
// Author: Lukas Bower

//! Diagnostic console stream.
//!
//! Lines printed by scripts and by the supervisor are queued in a bounded
//! ring and drained to the console notification channel. When the ring is
//! full the oldest line is discarded.

use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

use heapless::{Deque, String as HeaplessString, Vec as HeaplessVec};
use spin::Mutex;

use crate::upload::Notifier;

pub const CONSOLE_LINE_CAPACITY: usize = 96;
const CONSOLE_RING_CAPACITY: usize = 64;

type ConsoleLine = HeaplessString<CONSOLE_LINE_CAPACITY>;

fn truncated(line: &str) -> ConsoleLine {
    let mut entry = ConsoleLine::new();
    for ch in line.chars() {
        if entry.push(ch).is_err() {
            break;
        }
    }
    entry
}

/// Bounded ring of console lines.
pub struct ConsoleLog {
    lines: Mutex<Deque<ConsoleLine, CONSOLE_RING_CAPACITY>>,
    dropped: AtomicUsize,
}

impl ConsoleLog {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            lines: Mutex::new(Deque::new()),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Queue every non-empty line of `text`.
    pub fn push_line(&self, text: &str) {
        let mut lines = self.lines.lock();
        for line in text.lines().filter(|line| !line.is_empty()) {
            if lines.is_full() {
                let _ = lines.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            let _ = lines.push_back(truncated(line));
        }
    }

    pub fn printer(&self) -> ConsolePrinter<'_> {
        ConsolePrinter {
            log: self,
            pending: ConsoleLine::new(),
        }
    }

    /// Send every queued line to the console channel, oldest first.
    pub fn drain<N: Notifier + ?Sized>(&self, notifier: &N) -> usize {
        let mut sent = 0;
        loop {
            // Ring lock is dropped before the notifier runs.
            let Some(line) = self.lines.lock().pop_front() else {
                break;
            };
            notifier.notify_console(line.as_str());
            sent += 1;
        }
        sent
    }

    pub fn snapshot<const LIMIT: usize>(&self) -> HeaplessVec<ConsoleLine, LIMIT> {
        let lines = self.lines.lock();
        let skip = lines.len().saturating_sub(LIMIT);
        lines.iter().skip(skip).cloned().collect()
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for ConsoleLog {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ConsolePrinter<'a> {
    log: &'a ConsoleLog,
    pending: ConsoleLine,
}

impl ConsolePrinter<'_> {
    fn flush(&mut self) {
        if !self.pending.is_empty() {
            self.log.push_line(self.pending.as_str());
            self.pending.clear();
        }
    }
}

impl fmt::Write for ConsolePrinter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for ch in s.chars() {
            if ch == '\n' {
                self.flush();
            } else if self.pending.push(ch).is_err() {
                self.flush();
                let _ = self.pending.push(ch);
            }
        }
        Ok(())
    }
}

impl Drop for ConsolePrinter<'_> {
    fn drop(&mut self) {
        self.flush();
    }
}
