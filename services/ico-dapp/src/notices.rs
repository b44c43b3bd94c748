use ico_api_types::{Notice, NoticeLevel};
use ico_session::Notifier;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

use crate::epoch_ms;

const DEFAULT_CAPACITY: usize = 32;

/// Recent user-facing notices, oldest first.
///
/// `/state` lists every retained notice; the page shows each one once.
pub(crate) struct NoticeBoard {
    capacity: usize,
    inner: Mutex<Board>,
}

#[derive(Default)]
struct Board {
    entries: VecDeque<Notice>,
    /// Notices pushed since the last page render.
    unseen: usize,
}

impl Default for NoticeBoard {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl NoticeBoard {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Board::default()),
        }
    }

    fn board(&self) -> MutexGuard<'_, Board> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn recent(&self) -> Vec<Notice> {
        self.board().entries.iter().cloned().collect()
    }

    /// Notices raised since the previous call.
    pub(crate) fn take_unseen(&self) -> Vec<Notice> {
        let mut board = self.board();
        let skip = board.entries.len() - board.unseen;
        board.unseen = 0;
        board.entries.iter().skip(skip).cloned().collect()
    }
}

impl Notifier for NoticeBoard {
    fn notify(&self, level: NoticeLevel, message: &str) {
        match level {
            NoticeLevel::Info => info!(notice = message),
            NoticeLevel::Warning => warn!(notice = message),
        }

        let mut board = self.board();
        if board.entries.len() == self.capacity {
            board.entries.pop_front();
        }
        board.entries.push_back(Notice {
            level,
            message: message.to_owned(),
            at_epoch_ms: epoch_ms(),
        });
        board.unseen = (board.unseen + 1).min(self.capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_notices_fall_off_the_board() {
        let board = NoticeBoard::with_capacity(2);
        board.notify(NoticeLevel::Warning, "Change the network to Rinkeby");
        board.notify(NoticeLevel::Info, "first");
        board.notify(NoticeLevel::Info, "second");

        let messages: Vec<_> = board.recent().into_iter().map(|n| n.message).collect();
        assert_eq!(messages, vec!["first", "second"]);
    }

    #[test]
    fn page_sees_each_notice_once() {
        let board = NoticeBoard::default();
        board.notify(NoticeLevel::Warning, "Change the network to Rinkeby");

        let first: Vec<_> = board.take_unseen().into_iter().map(|n| n.message).collect();
        assert_eq!(first, vec!["Change the network to Rinkeby"]);
        assert!(board.take_unseen().is_empty());

        board.notify(NoticeLevel::Info, "Successfully claimed Crypto Dev Tokens");
        let next: Vec<_> = board.take_unseen().into_iter().map(|n| n.message).collect();
        assert_eq!(next, vec!["Successfully claimed Crypto Dev Tokens"]);
        assert_eq!(board.recent().len(), 2);
    }
}
