//! Candidate subject names for enrollment.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

const HEROES: &[&str] = &[
    "Achilles", "Atalanta", "Athena", "Hector", "Heracles", "Jason", "Odysseus", "Perseus",
    "Theseus", "Hippolyta", "Bellerophon", "Penelope",
];

const VILLAINS: &[&str] = &[
    "Medusa", "Circe", "Typhon", "Echidna", "Polyphemus", "Procrustes", "Scylla", "Charybdis",
    "Lamia", "Sinis", "Antaeus", "Geryon",
];

/// The two disjoint pools a subject name is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NamePool {
    Heroes,
    Villains,
}

impl NamePool {
    pub fn names(self) -> &'static [&'static str] {
        match self {
            Self::Heroes => HEROES,
            Self::Villains => VILLAINS,
        }
    }

    /// Every name once, in draw order: a pool chosen uniformly and shuffled,
    /// then the other pool shuffled.
    pub fn candidates<R: Rng + ?Sized>(rng: &mut R) -> Vec<(Self, &'static str)> {
        let first = if rng.gen_bool(0.5) { Self::Heroes } else { Self::Villains };
        let mut out = Vec::with_capacity(HEROES.len() + VILLAINS.len());
        for pool in [first, first.other()] {
            let mut names = pool.names().to_vec();
            names.shuffle(rng);
            out.extend(names.into_iter().map(|name| (pool, name)));
        }
        out
    }

    fn other(self) -> Self {
        match self {
            Self::Heroes => Self::Villains,
            Self::Villains => Self::Heroes,
        }
    }
}
