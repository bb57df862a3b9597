use itertools::Itertools;

use crate::{
    alphabet::{SymbolIndex, TimedAlphabet},
    error::{PdrtaError, Result},
    Delay, Show, INFINITY,
};

/// A single observation: a symbol together with the delay since the previous observation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimedEvent {
    /// Index of the observed symbol.
    pub symbol: SymbolIndex,
    /// Time that passed since the previous event (or since the start of the word).
    pub delay: Delay,
}

impl From<(SymbolIndex, Delay)> for TimedEvent {
    fn from((symbol, delay): (SymbolIndex, Delay)) -> Self {
        Self { symbol, delay }
    }
}

/// A finite sequence of [`TimedEvent`]s, optionally carrying the class label of the sequence.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct TimedWord {
    events: Vec<TimedEvent>,
    label: Option<String>,
}

impl TimedWord {
    /// Creates an unlabelled word from the given events.
    pub fn new<E: Into<TimedEvent>, I: IntoIterator<Item = E>>(events: I) -> Self {
        Self {
            events: events.into_iter().map(Into::into).collect(),
            label: None,
        }
    }

    /// Attaches a class label to the word.
    pub fn labelled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Returns the class label, if any.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Returns the events of the word in order.
    pub fn events(&self) -> &[TimedEvent] {
        &self.events
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the word contains no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl<E: Into<TimedEvent>> FromIterator<E> for TimedWord {
    fn from_iter<T: IntoIterator<Item = E>>(iter: T) -> Self {
        Self::new(iter)
    }
}

impl Show for TimedWord {
    fn show(&self) -> String {
        format!(
            "[{}]",
            self.events
                .iter()
                .map(|e| format!("({}, {})", e.symbol, e.delay))
                .join(", ")
        )
    }
}

/// The training corpus: an alphabet together with an ordered list of [`TimedWord`]s.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct TimedSample {
    alphabet: TimedAlphabet,
    words: Vec<TimedWord>,
}

impl TimedSample {
    /// Creates an empty sample over the given alphabet.
    pub fn new(alphabet: TimedAlphabet) -> Self {
        Self {
            alphabet,
            words: vec![],
        }
    }

    /// Creates a sample over `alphabet` that contains the given words.
    pub fn with_words<I: IntoIterator<Item = TimedWord>>(alphabet: TimedAlphabet, words: I) -> Self {
        Self {
            alphabet,
            words: words.into_iter().collect(),
        }
    }

    /// Builds a sample from words given as `(symbol name, delay)` pairs. The alphabet is built
    /// from the symbols in order of their first occurrence.
    ///
    /// # Example
    /// ```
    /// use pdrta::prelude::*;
    ///
    /// let sample = TimedSample::from_symbolic([vec![("a", 1), ("b", 2)], vec![("b", 4)]]);
    /// assert_eq!(sample.alphabet().size(), 2);
    /// assert_eq!(sample.event_count(), 3);
    /// ```
    pub fn from_symbolic<'a, W, I>(words: I) -> Self
    where
        W: IntoIterator<Item = (&'a str, Delay)>,
        I: IntoIterator<Item = W>,
    {
        let mut alphabet = TimedAlphabet::default();
        let words = words
            .into_iter()
            .map(|word| {
                word.into_iter()
                    .map(|(symbol, delay)| TimedEvent {
                        symbol: alphabet.push(symbol),
                        delay,
                    })
                    .collect::<TimedWord>()
            })
            .collect_vec();
        Self { alphabet, words }
    }

    /// Appends a word to the sample.
    pub fn push(&mut self, word: TimedWord) {
        self.words.push(word);
    }

    /// Returns a reference to the underlying alphabet.
    pub fn alphabet(&self) -> &TimedAlphabet {
        &self.alphabet
    }

    /// Gives an iterator over all words in the sample.
    pub fn words(&self) -> impl Iterator<Item = &'_ TimedWord> + '_ {
        self.words.iter()
    }

    /// Number of words.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether the sample contains no words.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Counts all (word, position) pairs of the sample.
    pub fn event_count(&self) -> usize {
        self.words.iter().map(TimedWord::len).sum()
    }

    /// Iterates over every observed delay.
    pub fn delays(&self) -> impl Iterator<Item = Delay> + '_ {
        self.words
            .iter()
            .flat_map(|w| w.events().iter().map(|e| e.delay))
    }

    /// Verifies that every event refers to a symbol of the alphabet and carries a representable
    /// delay.
    pub fn validate(&self) -> Result<()> {
        let size = self.alphabet.size();
        for event in self.words.iter().flat_map(|w| w.events()) {
            if event.symbol >= size {
                return Err(PdrtaError::InvalidSymbol {
                    index: event.symbol,
                    size,
                });
            }
            if event.delay == INFINITY {
                return Err(PdrtaError::InvalidDelay(event.delay));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbolic_sample() {
        let sample = TimedSample::from_symbolic([
            vec![("a", 1), ("b", 2)],
            vec![("a", 3)],
            vec![],
        ]);
        assert_eq!(sample.len(), 3);
        assert_eq!(sample.event_count(), 3);
        assert_eq!(sample.delays().collect_vec(), vec![1, 2, 3]);
        assert!(sample.validate().is_ok());
    }

    #[test]
    fn rejects_unknown_symbols_and_reserved_delays() {
        let alphabet = TimedAlphabet::of_size(1);
        let sample = TimedSample::with_words(alphabet.clone(), [TimedWord::new([(1, 2)])]);
        assert_eq!(
            sample.validate(),
            Err(PdrtaError::InvalidSymbol { index: 1, size: 1 })
        );
        let sample = TimedSample::with_words(alphabet, [TimedWord::new([(0, INFINITY)])]);
        assert_eq!(sample.validate(), Err(PdrtaError::InvalidDelay(INFINITY)));
    }

    #[test]
    fn labels() {
        let word = TimedWord::new([(0, 1)]).labelled("normal");
        assert_eq!(word.label(), Some("normal"));
        assert_eq!(word.show(), "[(0, 1)]");
    }
}
