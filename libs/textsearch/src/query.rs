//! Boolean text query parsing.
//!
//! Grammar (case-insensitive keywords):
//!
//! ```text
//! or      := and ("OR" and)*
//! and     := unary (["AND"] unary)*      adjacent terms are AND-ed
//! unary   := "NOT" unary | primary
//! primary := "(" or ")" | "\"phrase\"" | word
//! ```
//!
//! Input that does not parse is sanitised instead of rejected: operators,
//! quotes and parentheses are dropped and the remaining words are AND-ed.

use std::collections::BTreeSet;

use crate::lexer;
use crate::vector::TsVector;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Phrase(String),
    Word(String),
}

/// Parsed query expression after lexeme normalisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryExpr {
    /// A bare word. One raw word can normalise into several lexemes
    /// (`type-2` → `type`, `2`); all of them are required, like `plainto_tsquery`.
    Term { raw: String, lexemes: Vec<String> },
    /// A quoted phrase: lexemes with their offsets from the first lexeme.
    Phrase {
        raw: String,
        lexemes: Vec<(String, u16)>,
    },
    And(Box<QueryExpr>, Box<QueryExpr>),
    Or(Box<QueryExpr>, Box<QueryExpr>),
    Not(Box<QueryExpr>),
}

/// A parsed, non-empty text query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TsQuery {
    expr: QueryExpr,
    raw: String,
}

impl TsQuery {
    /// Parse user input. Returns `None` when nothing searchable remains
    /// (empty input, only stop words, only operators).
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let expr = parse_strict(trimmed).or_else(|| parse_sanitised(trimmed))?;
        let expr = prune(expr)?;
        Some(Self {
            expr,
            raw: trimmed.to_string(),
        })
    }

    pub fn expr(&self) -> &QueryExpr {
        &self.expr
    }

    /// The trimmed input the query was parsed from.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Whitespace-joined words without operators; used for trigram matching.
    pub fn plain_text(&self) -> String {
        let mut words = Vec::new();
        collect_raw(&self.expr, &mut words);
        words.join(" ")
    }

    /// `vector @@ query`.
    pub fn matches(&self, vector: &TsVector) -> bool {
        eval_document(&self.expr, vector)
    }

    /// Lexemes that contribute positively to a match (not under `NOT`).
    pub fn positive_lexemes(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        collect_positive(&self.expr, false, &mut out);
        out
    }

    /// Evaluate against a bag of lexemes, ignoring positions. `NOT` counts as
    /// satisfied and phrases only need their lexemes present, which is how
    /// cover detection treats a window.
    pub(crate) fn satisfied_by(&self, present: &dyn Fn(&str) -> bool) -> bool {
        eval_window(&self.expr, present)
    }
}

fn collect_raw(expr: &QueryExpr, out: &mut Vec<String>) {
    match expr {
        QueryExpr::Term { raw, .. } | QueryExpr::Phrase { raw, .. } => out.push(raw.clone()),
        QueryExpr::And(a, b) | QueryExpr::Or(a, b) => {
            collect_raw(a, out);
            collect_raw(b, out);
        }
        QueryExpr::Not(_) => {}
    }
}

fn collect_positive(expr: &QueryExpr, negated: bool, out: &mut BTreeSet<String>) {
    match expr {
        QueryExpr::Term { lexemes, .. } if !negated => out.extend(lexemes.iter().cloned()),
        QueryExpr::Phrase { lexemes, .. } if !negated => {
            out.extend(lexemes.iter().map(|(l, _)| l.clone()))
        }
        QueryExpr::Term { .. } | QueryExpr::Phrase { .. } => {}
        QueryExpr::And(a, b) | QueryExpr::Or(a, b) => {
            collect_positive(a, negated, out);
            collect_positive(b, negated, out);
        }
        QueryExpr::Not(inner) => collect_positive(inner, !negated, out),
    }
}

fn eval_document(expr: &QueryExpr, vector: &TsVector) -> bool {
    match expr {
        QueryExpr::Term { lexemes, .. } => lexemes.iter().all(|l| vector.contains(l)),
        QueryExpr::Phrase { lexemes, .. } => phrase_matches(lexemes, vector),
        QueryExpr::And(a, b) => eval_document(a, vector) && eval_document(b, vector),
        QueryExpr::Or(a, b) => eval_document(a, vector) || eval_document(b, vector),
        QueryExpr::Not(inner) => !eval_document(inner, vector),
    }
}

fn eval_window(expr: &QueryExpr, present: &dyn Fn(&str) -> bool) -> bool {
    match expr {
        QueryExpr::Term { lexemes, .. } => lexemes.iter().all(|l| present(l)),
        QueryExpr::Phrase { lexemes, .. } => lexemes.iter().all(|(l, _)| present(l)),
        QueryExpr::And(a, b) => eval_window(a, present) && eval_window(b, present),
        QueryExpr::Or(a, b) => eval_window(a, present) || eval_window(b, present),
        QueryExpr::Not(_) => true,
    }
}

fn phrase_matches(lexemes: &[(String, u16)], vector: &TsVector) -> bool {
    let Some((first, _)) = lexemes.first() else {
        return false;
    };
    vector.positions(first).iter().any(|start| {
        lexemes.iter().skip(1).all(|(lexeme, offset)| {
            let want = start.pos.saturating_add(*offset);
            vector.positions(lexeme).iter().any(|p| p.pos == want)
        })
    })
}

/// Drop terms that normalised to nothing (stop words) and collapse the tree.
fn prune(expr: QueryExpr) -> Option<QueryExpr> {
    match expr {
        QueryExpr::Term { ref lexemes, .. } if lexemes.is_empty() => None,
        QueryExpr::Phrase { ref lexemes, .. } if lexemes.is_empty() => None,
        QueryExpr::Term { .. } | QueryExpr::Phrase { .. } => Some(expr),
        QueryExpr::And(a, b) => match (prune(*a), prune(*b)) {
            (Some(a), Some(b)) => Some(QueryExpr::And(Box::new(a), Box::new(b))),
            (one, other) => one.or(other),
        },
        QueryExpr::Or(a, b) => match (prune(*a), prune(*b)) {
            (Some(a), Some(b)) => Some(QueryExpr::Or(Box::new(a), Box::new(b))),
            (one, other) => one.or(other),
        },
        QueryExpr::Not(inner) => prune(*inner).map(|e| QueryExpr::Not(Box::new(e))),
    }
}

fn term(raw: String) -> QueryExpr {
    let lexemes = lexer::lexemes(&raw);
    QueryExpr::Term { raw, lexemes }
}

fn phrase(raw: String) -> QueryExpr {
    let mut lexemes = Vec::new();
    let mut first_pos = None;
    for token in lexer::tokenize(&raw) {
        let Some(lexeme) = token.lexeme else {
            continue;
        };
        let base = *first_pos.get_or_insert(token.position);
        lexemes.push((lexeme, token.position - base));
    }
    QueryExpr::Phrase { raw, lexemes }
}

fn parse_strict(raw: &str) -> Option<QueryExpr> {
    let mut p = Parser::new(raw);
    let expr = p.parse_or()?;
    if p.peek().is_some() {
        return None;
    }
    Some(expr)
}

fn parse_sanitised(raw: &str) -> Option<QueryExpr> {
    raw.split(|c: char| c.is_whitespace() || matches!(c, '(' | ')' | '"'))
        .filter(|w| !w.is_empty())
        .filter(|w| !matches!(w.to_ascii_uppercase().as_str(), "AND" | "OR" | "NOT"))
        .map(|w| term(w.to_string()))
        .reduce(|acc, next| QueryExpr::And(Box::new(acc), Box::new(next)))
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek_char(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn consume_char(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek_char(), Some(c) if c.is_whitespace()) {
            self.consume_char();
        }
    }

    fn next_tok(&mut self) -> Option<Tok> {
        self.skip_ws();
        match self.peek_char()? {
            '(' => {
                self.consume_char();
                Some(Tok::LParen)
            }
            ')' => {
                self.consume_char();
                Some(Tok::RParen)
            }
            '"' => self.lex_phrase(),
            _ => self.lex_word(),
        }
    }

    fn lex_phrase(&mut self) -> Option<Tok> {
        if self.consume_char() != Some('"') {
            return None;
        }
        let mut out = String::new();
        let mut escaped = false;
        while let Some(c) = self.consume_char() {
            if escaped {
                out.push(c);
                escaped = false;
                continue;
            }
            match c {
                '\\' => escaped = true,
                '"' => return Some(Tok::Phrase(out)),
                _ => out.push(c),
            }
        }
        None
    }

    fn lex_word(&mut self) -> Option<Tok> {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() || c == '(' || c == ')' || c == '"' {
                break;
            }
            self.consume_char();
        }
        let raw = self.input[start..self.pos].trim();
        if raw.is_empty() {
            return None;
        }
        match raw.to_ascii_uppercase().as_str() {
            "AND" => Some(Tok::And),
            "OR" => Some(Tok::Or),
            "NOT" => Some(Tok::Not),
            _ => Some(Tok::Word(raw.to_string())),
        }
    }
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    peeked: Option<Tok>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            lexer: Lexer::new(input),
            peeked: None,
        }
    }

    fn peek(&mut self) -> Option<&Tok> {
        if self.peeked.is_none() {
            self.peeked = self.lexer.next_tok();
        }
        self.peeked.as_ref()
    }

    fn next(&mut self) -> Option<Tok> {
        if let Some(tok) = self.peeked.take() {
            return Some(tok);
        }
        self.lexer.next_tok()
    }

    fn parse_or(&mut self) -> Option<QueryExpr> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Tok::Or)) {
            self.next();
            let right = self.parse_and()?;
            left = QueryExpr::Or(Box::new(left), Box::new(right));
        }
        Some(left)
    }

    fn parse_and(&mut self) -> Option<QueryExpr> {
        let mut left = self.parse_unary()?;
        loop {
            match self.peek() {
                Some(Tok::And) => {
                    self.next();
                }
                Some(Tok::Or) | Some(Tok::RParen) | None => break,
                Some(Tok::Word(_) | Tok::Phrase(_) | Tok::LParen | Tok::Not) => {}
            }
            let right = match self.peek() {
                Some(Tok::Or) | Some(Tok::RParen) | None => break,
                _ => self.parse_unary()?,
            };
            left = QueryExpr::And(Box::new(left), Box::new(right));
        }
        Some(left)
    }

    fn parse_unary(&mut self) -> Option<QueryExpr> {
        if matches!(self.peek(), Some(Tok::Not)) {
            self.next();
            let inner = self.parse_unary()?;
            return Some(QueryExpr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Option<QueryExpr> {
        match self.next()? {
            Tok::LParen => {
                let inner = self.parse_or()?;
                if self.next() != Some(Tok::RParen) {
                    return None;
                }
                Some(inner)
            }
            Tok::Phrase(s) => Some(phrase(s)),
            Tok::Word(s) => Some(term(s)),
            _ => None,
        }
    }
}
