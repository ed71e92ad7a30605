use std::collections::BTreeMap;
use std::fmt;

use crate::lexer;

/// Lexeme weight label, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Weight {
    A,
    B,
    C,
    D,
}

impl Weight {
    /// Index into a `[D, C, B, A]` weight array, matching `ts_rank_cd`'s
    /// `{D, C, B, A}` argument order.
    pub(crate) fn rank_index(self) -> usize {
        match self {
            Weight::D => 0,
            Weight::C => 1,
            Weight::B => 2,
            Weight::A => 3,
        }
    }

    fn label(self) -> Option<char> {
        match self {
            Weight::A => Some('A'),
            Weight::B => Some('B'),
            Weight::C => Some('C'),
            Weight::D => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Position {
    pub pos: u16,
    pub weight: Weight,
}

/// Sorted lexeme → positions map, the in-process counterpart of `tsvector`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TsVector {
    entries: BTreeMap<String, Vec<Position>>,
}

impl TsVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// `to_tsvector('english', text)`; every position carries weight D.
    pub fn from_text(text: &str) -> Self {
        let mut vector = Self::new();
        for token in lexer::tokenize(text) {
            if let Some(lexeme) = token.lexeme {
                vector.insert(lexeme, token.position, Weight::D);
            }
        }
        vector
    }

    /// Concatenate weighted parts left to right, like
    /// `setweight(to_tsvector(a), 'A') || setweight(to_tsvector(b), 'B') || ..`.
    pub fn weighted<'a, I>(parts: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Weight)>,
    {
        parts
            .into_iter()
            .fold(Self::new(), |acc, (text, weight)| {
                acc.concat(&Self::from_text(text).with_weight(weight))
            })
    }

    /// `setweight(self, weight)`.
    pub fn with_weight(mut self, weight: Weight) -> Self {
        for positions in self.entries.values_mut() {
            for p in positions.iter_mut() {
                p.weight = weight;
            }
        }
        self
    }

    /// `self || other`: positions of `other` shift by the highest position in `self`.
    pub fn concat(&self, other: &TsVector) -> TsVector {
        let shift = self.max_position();
        let mut out = self.clone();
        for (lexeme, positions) in &other.entries {
            for p in positions {
                out.insert(lexeme.clone(), p.pos.saturating_add(shift), p.weight);
            }
        }
        out
    }

    pub fn insert(&mut self, lexeme: String, pos: u16, weight: Weight) {
        let positions = self.entries.entry(lexeme).or_default();
        match positions.binary_search_by_key(&pos, |p| p.pos) {
            // On a position clash the stronger weight wins.
            Ok(idx) => {
                if weight < positions[idx].weight {
                    positions[idx].weight = weight;
                }
            }
            Err(idx) => positions.insert(idx, Position { pos, weight }),
        }
    }

    pub fn max_position(&self) -> u16 {
        self.entries
            .values()
            .filter_map(|positions| positions.last().map(|p| p.pos))
            .max()
            .unwrap_or(0)
    }

    pub fn contains(&self, lexeme: &str) -> bool {
        self.entries.contains_key(lexeme)
    }

    pub fn positions(&self, lexeme: &str) -> &[Position] {
        self.entries.get(lexeme).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn lexemes(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// All `(lexeme, position)` occurrences ordered by position.
    pub(crate) fn occurrences(&self) -> Vec<(&str, Position)> {
        let mut out: Vec<(&str, Position)> = self
            .entries
            .iter()
            .flat_map(|(lexeme, positions)| positions.iter().map(move |p| (lexeme.as_str(), *p)))
            .collect();
        out.sort_by_key(|(lexeme, p)| (p.pos, *lexeme));
        out
    }
}

impl fmt::Display for TsVector {
    /// Renders the PostgreSQL text form, e.g. `'asthma':2A 'child':1A,5`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (lexeme, positions) in &self.entries {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            write!(f, "'{}'", lexeme.replace('\'', "''"))?;
            for (idx, p) in positions.iter().enumerate() {
                f.write_str(if idx == 0 { ":" } else { "," })?;
                write!(f, "{}", p.pos)?;
                if let Some(label) = p.weight.label() {
                    write!(f, "{label}")?;
                }
            }
        }
        Ok(())
    }
}
