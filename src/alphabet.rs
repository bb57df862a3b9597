use itertools::Itertools;

use crate::{math::Bijection, Show};

/// Index of a symbol within a [`TimedAlphabet`]. Indices are stable and range over `0..size`.
pub type SymbolIndex = usize;

/// A closed alphabet of named symbols, fixed before learning. Every symbol has a stable index,
/// which is the position in which it was first given.
///
/// # Example
/// ```
/// use pdrta::prelude::*;
///
/// let alphabet = TimedAlphabet::from_iter(["open", "read", "close", "read"]);
/// assert_eq!(alphabet.size(), 3);
/// assert_eq!(alphabet.index_of("close"), Some(2));
/// assert_eq!(alphabet.symbol(1), Some("read"));
/// ```
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct TimedAlphabet {
    symbols: Bijection<String, SymbolIndex>,
}

impl TimedAlphabet {
    /// Creates an alphabet of the given size whose symbols are the first `size` lowercase letters.
    pub fn of_size(size: usize) -> Self {
        assert!(size <= 26, "Alphabet is too large");
        Self::from_iter((0..size).map(|i| ((b'a' + i as u8) as char).to_string()))
    }

    /// Returns the number of symbols.
    pub fn size(&self) -> usize {
        self.symbols.len()
    }

    /// Whether the alphabet has no symbols at all.
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Looks up the index of a symbol by its name.
    pub fn index_of(&self, symbol: &str) -> Option<SymbolIndex> {
        self.symbols.get_by_left(symbol).copied()
    }

    /// Looks up the name of the symbol with the given index.
    pub fn symbol(&self, index: SymbolIndex) -> Option<&str> {
        self.symbols.get_by_right(&index).map(|s| s.as_str())
    }

    /// Iterates over all symbol indices in ascending order.
    pub fn universe(&self) -> std::ops::Range<SymbolIndex> {
        0..self.size()
    }

    /// Iterates over `(index, name)` pairs in ascending index order.
    pub fn symbols(&self) -> impl Iterator<Item = (SymbolIndex, &str)> + '_ {
        self.universe()
            .filter_map(move |i| self.symbol(i).map(|s| (i, s)))
    }

    /// Adds a symbol if it is not yet present and returns its index.
    pub fn push(&mut self, symbol: impl Into<String>) -> SymbolIndex {
        let symbol = symbol.into();
        if let Some(index) = self.index_of(&symbol) {
            return index;
        }
        let index = self.size();
        self.symbols.insert(symbol, index);
        index
    }
}

impl<S: Into<String>> FromIterator<S> for TimedAlphabet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        let mut alphabet = Self::default();
        for symbol in iter {
            alphabet.push(symbol);
        }
        alphabet
    }
}

impl Show for TimedAlphabet {
    fn show(&self) -> String {
        format!("{{{}}}", self.symbols().map(|(_, s)| s).join(", "))
    }
}
