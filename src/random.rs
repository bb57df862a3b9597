use tracing::trace;

use crate::{
    pdrta::Pdrta,
    word::{TimedEvent, TimedSample, TimedWord},
};

impl Pdrta {
    /// Draws a random word. In every state, the next head is picked uniformly among the heads the
    /// state holds: picking the end of a word stops, picking a tail emits its symbol and delay
    /// and moves along its interval. So symbols, delays and word ends follow the empirical
    /// distributions of the training sample. Words are cut off after `max_len` events.
    pub fn generate_word(&self, rng: &mut fastrand::Rng, max_len: usize) -> TimedWord {
        let mut events = vec![];
        let mut current = self.state(self.root());
        while let Some(q) = current {
            if events.len() >= max_len || q.visits() == 0 {
                break;
            }
            let mut pick = rng.usize(..q.visits());
            if pick < q.ends().len() {
                break;
            }
            pick -= q.ends().len();
            let Some((symbol, interval)) = q
                .all_intervals()
                .find_map(|(symbol, _, interval)| {
                    if pick < interval.tail_count() {
                        Some((symbol, interval))
                    } else {
                        pick -= interval.tail_count();
                        None
                    }
                })
            else {
                break;
            };
            let delay = self.tails()[interval.tails()[pick]].delay();
            events.push(TimedEvent { symbol, delay });
            current = interval.target().and_then(|t| self.state(t));
        }
        TimedWord::new(events)
    }

    /// Draws `count` words with [`Self::generate_word`] into a sample over the same alphabet.
    pub fn generate_sample(
        &self,
        rng: &mut fastrand::Rng,
        count: usize,
        max_len: usize,
    ) -> TimedSample {
        trace!("generating {count} words of at most {max_len} events");
        TimedSample::with_words(
            self.alphabet().clone(),
            (0..count).map(|_| self.generate_word(rng, max_len)),
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        config::LearnerConfig,
        learner::Learner,
        pdrta::Pdrta,
        word::{TimedEvent, TimedSample},
    };

    fn alternating() -> TimedSample {
        let mut words = vec![];
        for k in 0..8usize {
            for _ in 0..(1 << (7 - k)) {
                words.push([("a", 2), ("b", 3)].repeat(k));
            }
        }
        TimedSample::from_symbolic(words)
    }

    #[test]
    fn prefix_tree_only_generates_observed_words() {
        let sample = TimedSample::from_symbolic([vec![("a", 1), ("b", 2)], vec![("b", 5)]]);
        let pta = Pdrta::from_sample(&sample, 1).unwrap();
        let mut rng = fastrand::Rng::with_seed(7);
        for _ in 0..50 {
            let word = pta.generate_word(&mut rng, 10);
            assert!(sample.words().any(|w| w.events() == word.events()));
        }
        assert!(pta.generate_word(&mut rng, 0).is_empty());
    }

    #[test_log::test]
    fn generated_words_do_not_grow_the_automaton() {
        let learner = Learner::new(LearnerConfig::default()).unwrap();
        let learned = learner.learn(&alternating()).unwrap();
        assert_eq!(learned.size(), 2);

        let mut rng = fastrand::Rng::with_seed(42);
        let generated = learned.generate_sample(&mut rng, 2000, 100);
        for word in generated.words() {
            for (i, TimedEvent { symbol, delay }) in word.events().iter().enumerate() {
                assert_eq!(*symbol, i % 2);
                assert_eq!(*delay, if i % 2 == 0 { 2 } else { 3 });
            }
        }

        let relearner = Learner::new(LearnerConfig::default().with_alpha(0.001)).unwrap();
        let relearned = relearner.learn(&generated).unwrap();
        assert!(relearned.size() <= learned.size());
    }
}
