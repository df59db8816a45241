use std::collections::VecDeque;

use crate::common::PeerIndex;

use super::message::PeerMessage;

struct Early {
    from: PeerIndex,
    msg: PeerMessage,
    age: u32,
}

/// Messages that arrived before the local round could take them. Bounded;
/// the oldest entry goes first when full.
pub(crate) struct EarlyMessages {
    limit: usize,
    max_ticks: u32,
    items: VecDeque<Early>,
}

impl EarlyMessages {
    pub(crate) fn new(limit: usize, max_ticks: u32) -> Self {
        EarlyMessages {
            limit,
            max_ticks,
            items: VecDeque::new(),
        }
    }

    /// Returns false if an older message had to be evicted.
    pub(crate) fn push(&mut self, from: PeerIndex, msg: PeerMessage) -> bool {
        if self.limit == 0 {
            return false;
        }
        let mut evicted = false;
        while self.items.len() >= self.limit {
            self.items.pop_front();
            evicted = true;
        }
        self.items.push_back(Early { from, msg, age: 0 });
        !evicted
    }

    /// Removes and returns the messages of `session_id` in arrival order.
    /// Messages of earlier sessions are dropped on the way.
    pub(crate) fn take_session(&mut self, session_id: u64) -> Vec<(PeerIndex, PeerMessage)> {
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(self.items.len());
        for early in self.items.drain(..) {
            let session = early.msg.session_id();
            if session == session_id {
                taken.push((early.from, early.msg));
            } else if session > session_id {
                kept.push_back(early);
            }
        }
        self.items = kept;
        taken
    }

    /// Ages every entry by one tick and drops the expired ones.
    pub(crate) fn tick(&mut self) -> usize {
        let before = self.items.len();
        let max = self.max_ticks;
        self.items.retain_mut(|e| {
            e.age += 1;
            e.age <= max
        });
        before - self.items.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::crypto::FullSignature;
    use crate::common::hashing::HashValue;
    use crate::consensus::message::FinalizedResultMsg;

    fn msg(session_id: u64) -> PeerMessage {
        PeerMessage::FinalizedResult(FinalizedResultMsg {
            session_id,
            state_index: 0,
            essence_hash: HashValue::default(),
            signature: FullSignature { shares: vec![] },
        })
    }

    #[test]
    fn test_bounded() {
        let mut early = EarlyMessages::new(2, 10);
        assert!(early.push(0, msg(1)));
        assert!(early.push(0, msg(2)));
        assert!(!early.push(0, msg(3)));
        assert_eq!(early.len(), 2);
        assert!(early.take_session(1).is_empty());
    }

    #[test]
    fn test_take_session_drops_older() {
        let mut early = EarlyMessages::new(8, 10);
        early.push(0, msg(1));
        early.push(1, msg(2));
        early.push(2, msg(3));
        early.push(3, msg(2));

        let taken = early.take_session(2);
        assert_eq!(taken.iter().map(|(f, _)| *f).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(early.len(), 1);
    }

    #[test]
    fn test_tick_expires() {
        let mut early = EarlyMessages::new(8, 2);
        early.push(0, msg(1));
        assert_eq!(early.tick(), 0);
        early.push(0, msg(1));
        assert_eq!(early.tick(), 0);
        assert_eq!(early.tick(), 1);
        assert_eq!(early.len(), 1);
    }
}
