use bit_set::BitSet;

use crate::{
    error::{PdrtaError, Result},
    math::Set,
    pdrta::{Pdrta, StateId},
};

/// The color of a state during the search. Red states are final parts of the hypothesis, blue
/// states are the frontier of candidates directly reachable from red ones, and white states are
/// everything else.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StateColor {
    /// Part of the learned hypothesis.
    Red,
    /// Target of a red interval that is not red itself.
    Blue,
    /// Neither red nor blue.
    White,
}

/// Partition of the states of a [`Pdrta`] into red, blue and white ones.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StateColoring {
    red: BitSet,
    blue: BitSet,
}

impl StateColoring {
    /// Colors the root red and its targets blue.
    pub fn new(pdrta: &Pdrta) -> Self {
        let mut coloring = Self::default();
        coloring.red.insert(pdrta.root());
        coloring.refresh(pdrta);
        coloring
    }

    /// The color of the given state.
    pub fn color(&self, state: StateId) -> StateColor {
        if self.red.contains(state) {
            StateColor::Red
        } else if self.blue.contains(state) {
            StateColor::Blue
        } else {
            StateColor::White
        }
    }

    /// Whether the state is red.
    pub fn is_red(&self, state: StateId) -> bool {
        self.red.contains(state)
    }

    /// Whether the state is blue.
    pub fn is_blue(&self, state: StateId) -> bool {
        self.blue.contains(state)
    }

    /// Red states in ascending order.
    pub fn red(&self) -> impl Iterator<Item = StateId> + '_ {
        self.red.iter()
    }

    /// Blue states in ascending order.
    pub fn blue(&self) -> impl Iterator<Item = StateId> + '_ {
        self.blue.iter()
    }

    /// Red states as a set, for operations that must not touch them.
    pub fn red_set(&self) -> Set<StateId> {
        self.red.iter().collect()
    }

    /// Whether there are no blue states left.
    pub fn frontier_is_empty(&self) -> bool {
        self.blue.is_empty()
    }

    /// Colors a blue state red and recomputes the frontier. Promoting a state that already is red
    /// changes nothing.
    pub fn promote(&mut self, state: StateId, pdrta: &Pdrta) -> Result<()> {
        if self.is_red(state) {
            return Ok(());
        }
        if !self.is_blue(state) {
            return Err(PdrtaError::illegal(format!(
                "only blue states can be promoted, {state} is {:?}",
                self.color(state)
            )));
        }
        self.red.insert(state);
        self.refresh(pdrta);
        Ok(())
    }

    /// Recomputes the blue frontier: every non-red target of a red state is blue.
    pub fn refresh(&mut self, pdrta: &Pdrta) {
        self.red = self.red.iter().filter(|q| pdrta.contains(*q)).collect();
        self.blue = self
            .red
            .iter()
            .filter_map(|q| pdrta.state(q))
            .flat_map(|q| q.targets())
            .filter(|q| !self.red.contains(*q))
            .collect();
    }

    /// Verifies that every red state exists and that the frontier matches the red states.
    pub fn check(&self, pdrta: &Pdrta) -> Result<()> {
        if let Some(q) = self.red.iter().find(|q| !pdrta.contains(*q)) {
            return Err(PdrtaError::invariant(format!("red state {q} was deleted")));
        }
        if !self.red.contains(pdrta.root()) {
            return Err(PdrtaError::invariant("root is not red"));
        }
        let mut expected = self.clone();
        expected.refresh(pdrta);
        if expected.blue != self.blue {
            return Err(PdrtaError::invariant("blue frontier is stale"));
        }
        Ok(())
    }

    /// Renders the automaton as a table, with red and blue states highlighted.
    pub fn show_with(&self, pdrta: &Pdrta) -> String {
        use owo_colors::OwoColorize;

        pdrta.build_table(|q| {
            let name = format!("q{}", q.id());
            match Self::color(self, q.id()) {
                StateColor::Red => name.red().to_string(),
                StateColor::Blue => name.blue().to_string(),
                StateColor::White => name,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::word::TimedSample;

    #[test_log::test]
    fn frontier_follows_promotions() {
        let sample = TimedSample::from_symbolic([vec![("a", 1), ("b", 2)], vec![("b", 1)]]);
        let pta = Pdrta::from_sample(&sample, 1).unwrap();
        let mut coloring = StateColoring::new(&pta);
        let a = pta.run([(0, 1)]).unwrap();
        let b = pta.run([(1, 1)]).unwrap();
        let ab = pta.run([(0, 1), (1, 2)]).unwrap();

        assert_eq!(coloring.color(pta.root()), StateColor::Red);
        assert_eq!(coloring.blue().collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(coloring.color(ab), StateColor::White);

        coloring.promote(a, &pta).unwrap();
        assert_eq!(coloring.blue().collect::<Vec<_>>(), vec![b, ab]);
        let snapshot = coloring.clone();
        coloring.promote(a, &pta).unwrap();
        assert_eq!(snapshot, coloring);
        assert!(coloring.check(&pta).is_ok());

        assert!(matches!(
            coloring.promote(42, &pta),
            Err(PdrtaError::IllegalOperation(_))
        ));
    }

    #[test]
    fn colored_table_lists_every_state() {
        let sample = TimedSample::from_symbolic([vec![("a", 1), ("b", 2)]]);
        let pta = Pdrta::from_sample(&sample, 1).unwrap();
        let mut coloring = StateColoring::new(&pta);
        let a = pta.run([(0, 1)]).unwrap();
        coloring.promote(a, &pta).unwrap();
        assert_eq!(coloring.color(a), StateColor::Red);
        let table = coloring.show_with(&pta);
        for q in pta.state_ids() {
            assert!(table.contains(&format!("q{q}")));
        }
    }
}
