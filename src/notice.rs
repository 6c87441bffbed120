//! Transient user-facing notices.
//!
//! One slot per kind: a newer notice replaces the older one of the same
//! kind. Errors stay up for 5 seconds, successes for 3.

use std::time::{Duration, Instant};

pub const ERROR_TTL: Duration = Duration::from_secs(5);
pub const SUCCESS_TTL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Error,
    Success,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
    pub raised: Instant,
    pub ttl: Duration,
}

impl Notice {
    pub fn is_visible(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.raised) < self.ttl
    }
}

#[derive(Debug, Clone, Default)]
pub struct NoticeBoard {
    error: Option<Notice>,
    success: Option<Notice>,
}

impl NoticeBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report_error(&mut self, message: impl Into<String>) {
        self.report_error_at(message, Instant::now());
    }

    pub fn report_success(&mut self, message: impl Into<String>) {
        self.report_success_at(message, Instant::now());
    }

    pub fn report_error_at(&mut self, message: impl Into<String>, now: Instant) {
        self.error = Some(Notice {
            kind: NoticeKind::Error,
            message: message.into(),
            raised: now,
            ttl: ERROR_TTL,
        });
    }

    pub fn report_success_at(&mut self, message: impl Into<String>, now: Instant) {
        self.success = Some(Notice {
            kind: NoticeKind::Success,
            message: message.into(),
            raised: now,
            ttl: SUCCESS_TTL,
        });
    }

    /// Latest notice of `kind`, expired or not.
    pub fn latest(&self, kind: NoticeKind) -> Option<&Notice> {
        match kind {
            NoticeKind::Error => self.error.as_ref(),
            NoticeKind::Success => self.success.as_ref(),
        }
    }

    /// Notices still on screen at `now`, error first.
    pub fn visible(&self, now: Instant) -> Vec<&Notice> {
        [self.error.as_ref(), self.success.as_ref()]
            .into_iter()
            .flatten()
            .filter(|n| n.is_visible(now))
            .collect()
    }

    /// Drops expired notices. Returns true when something was dismissed.
    pub fn dismiss_expired(&mut self, now: Instant) -> bool {
        let mut dismissed = false;
        for slot in [&mut self.error, &mut self.success] {
            if slot.as_ref().is_some_and(|n| !n.is_visible(now)) {
                *slot = None;
                dismissed = true;
            }
        }
        dismissed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newer_notice_replaces_older() {
        let mut board = NoticeBoard::new();
        let now = Instant::now();
        board.report_error_at("first", now);
        board.report_error_at("second", now);
        let visible = board.visible(now);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].message, "second");
    }

    #[test]
    fn test_kinds_have_separate_slots() {
        let mut board = NoticeBoard::new();
        let now = Instant::now();
        board.report_error_at("boom", now);
        board.report_success_at("saved", now);
        assert_eq!(board.visible(now).len(), 2);
    }

    #[test]
    fn test_auto_dismiss_windows() {
        let mut board = NoticeBoard::new();
        let now = Instant::now();
        board.report_error_at("boom", now);
        board.report_success_at("saved", now);

        let later = now + Duration::from_secs(4);
        let visible = board.visible(later);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].kind, NoticeKind::Error);

        assert!(board.dismiss_expired(now + Duration::from_secs(5)));
        assert!(board.latest(NoticeKind::Error).is_none());
        assert!(board.latest(NoticeKind::Success).is_none());
    }
}
