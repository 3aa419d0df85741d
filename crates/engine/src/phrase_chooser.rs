// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Confirmation phrase selection (§4.4): picks the "Yes?" spoken back to the
//! user after a wake is accepted, uniformly at random from the configured
//! list, mirroring the [`Clock`](loader_core::Clock)/`FakeClock` split so the
//! dialog machine stays deterministic under test.

use rand::seq::IndexedRandom;

/// Chooses one confirmation phrase out of a list. Implementors must not
/// return `None` unless the list is empty — the machine treats that as "no
/// phrase configured" and speaks an empty string.
pub trait PhraseChooser: Clone + Send + Sync {
    fn choose<'a>(&self, phrases: &'a [String]) -> Option<&'a String>;
}

/// Picks uniformly at random via [`rand::rng`].
#[derive(Clone, Default)]
pub struct RandomPhraseChooser;

impl PhraseChooser for RandomPhraseChooser {
    fn choose<'a>(&self, phrases: &'a [String]) -> Option<&'a String> {
        phrases.choose(&mut rand::rng())
    }
}

/// Test double that always returns the phrase at a fixed index, wrapping
/// modulo the list length so call sites don't need to special-case length 1.
#[derive(Clone)]
pub struct FixedPhraseChooser {
    index: usize,
}

impl FixedPhraseChooser {
    pub fn new(index: usize) -> Self {
        Self { index }
    }
}

impl PhraseChooser for FixedPhraseChooser {
    fn choose<'a>(&self, phrases: &'a [String]) -> Option<&'a String> {
        if phrases.is_empty() {
            None
        } else {
            Some(&phrases[self.index % phrases.len()])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_chooser_wraps_around_list_length() {
        let phrases = vec!["a".to_string(), "b".to_string()];
        let chooser = FixedPhraseChooser::new(3);
        assert_eq!(chooser.choose(&phrases), Some(&"b".to_string()));
    }

    #[test]
    fn empty_list_yields_none() {
        let chooser = RandomPhraseChooser;
        let phrases: Vec<String> = vec![];
        assert_eq!(chooser.choose(&phrases), None);
    }
}
