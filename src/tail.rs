use crate::{
    alphabet::SymbolIndex,
    word::{TimedEvent, TimedSample},
    Delay,
};

/// Index of a [`Tail`] within its [`TailStore`].
pub type TailId = usize;
/// Index of a training word within its [`TailStore`].
pub type WordId = usize;

/// A tail refers to one position within one training word. Its event is the next one to be
/// consumed, the events after it are reachable by following [`Tail::next`]. The back-link
/// [`Tail::prev`] points to the tail that was consumed right before.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Tail {
    word: WordId,
    position: usize,
    symbol: SymbolIndex,
    delay: Delay,
    prev: Option<TailId>,
    next: Option<TailId>,
}

impl Tail {
    /// The word this tail belongs to.
    pub fn word(&self) -> WordId {
        self.word
    }
    /// Position of the tail's event within its word.
    pub fn position(&self) -> usize {
        self.position
    }
    /// Symbol of the event to be consumed.
    pub fn symbol(&self) -> SymbolIndex {
        self.symbol
    }
    /// Delay of the event to be consumed.
    pub fn delay(&self) -> Delay {
        self.delay
    }
    /// The tail consumed right before this one, `None` for the first event of a word.
    pub fn prev(&self) -> Option<TailId> {
        self.prev
    }
    /// The tail following this one, `None` for the last event of a word.
    pub fn next(&self) -> Option<TailId> {
        self.next
    }
    /// Returns what arrives at the target state once this tail has been consumed.
    pub fn successor(&self) -> Head {
        match self.next {
            Some(next) => Head::Tail(next),
            None => Head::End(self.word),
        }
    }
}

/// What arrives at a state: either a tail that still has to be consumed there, or the end of
/// a word, which makes the state final.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Head {
    /// A tail that is routed through one of the state's intervals.
    Tail(TailId),
    /// The given word ends in the state.
    End(WordId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct WordEntry {
    label: Option<String>,
    first: Option<TailId>,
    len: usize,
}

/// Arena of all tails of a training sample. Tails are created once when the automaton is built
/// and never change afterwards; states only move tail ids around.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TailStore {
    tails: Vec<Tail>,
    words: Vec<WordEntry>,
}

impl TailStore {
    /// Creates one tail per (word, position) pair of the sample, linked in both directions.
    pub fn from_sample(sample: &TimedSample) -> Self {
        let mut store = Self::default();
        for (word_id, word) in sample.words().enumerate() {
            let first = (!word.is_empty()).then_some(store.tails.len());
            let mut prev: Option<TailId> = None;
            for (position, TimedEvent { symbol, delay }) in word.events().iter().enumerate() {
                let id = store.tails.len();
                if let Some(p) = prev {
                    store.tails[p].next = Some(id);
                }
                store.tails.push(Tail {
                    word: word_id,
                    position,
                    symbol: *symbol,
                    delay: *delay,
                    prev,
                    next: None,
                });
                prev = Some(id);
            }
            store.words.push(WordEntry {
                label: word.label().map(str::to_string),
                first,
                len: word.len(),
            });
        }
        store
    }

    /// Returns the tail with the given id, if it exists.
    pub fn get(&self, id: TailId) -> Option<&Tail> {
        self.tails.get(id)
    }

    /// Number of tails, which is the number of (word, position) pairs.
    pub fn len(&self) -> usize {
        self.tails.len()
    }

    /// Whether there are no tails at all.
    pub fn is_empty(&self) -> bool {
        self.tails.is_empty()
    }

    /// Number of words.
    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    /// Class label of the given word.
    pub fn label(&self, word: WordId) -> Option<&str> {
        self.words.get(word).and_then(|w| w.label.as_deref())
    }

    /// Length of the given word.
    pub fn word_len(&self, word: WordId) -> Option<usize> {
        self.words.get(word).map(|w| w.len)
    }

    /// Returns what arrives at the root for the given word.
    pub fn initial_head(&self, word: WordId) -> Head {
        match self.words.get(word).and_then(|w| w.first) {
            Some(first) => Head::Tail(first),
            None => Head::End(word),
        }
    }

    /// Returns the heads of all words in word order.
    pub fn initial_heads(&self) -> Vec<Head> {
        (0..self.words.len())
            .map(|w| self.initial_head(w))
            .collect()
    }

    /// Iterates over the events still to be consumed, starting with the given tail.
    pub fn remaining(&self, id: TailId) -> impl Iterator<Item = TimedEvent> + '_ {
        std::iter::successors(self.tails.get(id), |t| {
            t.next.and_then(|n| self.tails.get(n))
        })
        .map(|t| TimedEvent {
            symbol: t.symbol,
            delay: t.delay,
        })
    }

    /// Walks the back-links from the given tail towards the start of its word.
    pub fn consumed(&self, id: TailId) -> impl Iterator<Item = &Tail> + '_ {
        std::iter::successors(
            self.tails.get(id).and_then(|t| t.prev).and_then(|p| self.tails.get(p)),
            |t| t.prev.and_then(|p| self.tails.get(p)),
        )
    }
}

impl std::ops::Index<TailId> for TailStore {
    type Output = Tail;

    fn index(&self, index: TailId) -> &Self::Output {
        &self.tails[index]
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::*;
    use crate::word::TimedSample;

    #[test]
    fn tails_are_linked() {
        let sample = TimedSample::from_symbolic([
            vec![("a", 1), ("b", 2), ("a", 3)],
            vec![],
            vec![("b", 7)],
        ]);
        let store = TailStore::from_sample(&sample);
        assert_eq!(store.len(), 4);
        assert_eq!(store.word_count(), 3);

        assert_eq!(store.initial_head(0), Head::Tail(0));
        assert_eq!(store.initial_head(1), Head::End(1));
        assert_eq!(store.initial_head(2), Head::Tail(3));

        assert_eq!(store[1].prev(), Some(0));
        assert_eq!(store[1].successor(), Head::Tail(2));
        assert_eq!(store[2].successor(), Head::End(0));
        assert_eq!(store[3].prev(), None);

        let remaining = store.remaining(1).map(|e| (e.symbol, e.delay)).collect_vec();
        assert_eq!(remaining, vec![(1, 2), (0, 3)]);
        let consumed = store.consumed(2).map(|t| t.position()).collect_vec();
        assert_eq!(consumed, vec![1, 0]);
    }
}
