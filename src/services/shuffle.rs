// Shuffle engine - orderings over the aggregated episode list
//
// Both entry points are pure functions of their input and the supplied RNG,
// so tests drive them with a seeded StdRng.

use std::collections::VecDeque;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::models::Episode;

/// Uniformly random permutation of the whole episode list (Fisher-Yates).
pub fn shuffle_uniform<R: Rng>(mut episodes: Vec<Episode>, rng: &mut R) -> Vec<Episode> {
    episodes.shuffle(rng);
    episodes
}

/// Fair round-robin shuffle: each show's episodes are shuffled uniformly,
/// then one episode per show is emitted per round, with the order of shows
/// re-randomized every round.
///
/// Guarantees: every episode appears exactly once, and no show contributes
/// two consecutive episodes unless it is the only show left in rotation.
pub fn shuffle_fair<R: Rng>(episodes: Vec<Episode>, rng: &mut R) -> Vec<Episode> {
    let total = episodes.len();

    // Group by owning show, preserving first-seen group order so the result
    // is a pure function of input + rng.
    let mut groups: Vec<(String, VecDeque<Episode>)> = Vec::new();
    for episode in episodes {
        match groups.iter_mut().find(|(key, _)| *key == episode.show_key) {
            Some((_, group)) => group.push_back(episode),
            None => {
                let key = episode.show_key.clone();
                groups.push((key, VecDeque::from([episode])));
            }
        }
    }

    for (_, group) in &mut groups {
        group.make_contiguous().shuffle(rng);
    }

    let mut out = Vec::with_capacity(total);
    let mut last_show: Option<String> = None;

    while !groups.is_empty() {
        let mut order: Vec<usize> = (0..groups.len()).collect();
        order.shuffle(rng);

        // The show that closed the previous round must not open this one,
        // otherwise it would contribute two episodes back to back.
        if order.len() > 1 {
            if let Some(ref last) = last_show {
                if groups[order[0]].0 == *last {
                    let end = order.len() - 1;
                    order.swap(0, end);
                }
            }
        }

        for idx in order {
            let (key, group) = &mut groups[idx];
            if let Some(episode) = group.pop_front() {
                last_show = Some(key.clone());
                out.push(episode);
            }
        }

        groups.retain(|(_, group)| !group.is_empty());
    }

    out
}
