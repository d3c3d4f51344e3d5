//! Stable paper identities.
//!
//! An id is derived once from the first author's surname, the year and the
//! first title word (`vaswani2017attention`) and never changes afterwards.
//! When another paper already owns the derived id, a letter suffix is added
//! (`vaswani2017attentiona`, `…b`, …).

use crate::matching::normalize_title;
use crate::paper::{Paper, surname};

const RANDOM_ID_LEN: usize = 10;

/// Lookup of ids already in use.
pub trait IdentityIndex: Send + Sync {
    /// Normalized title of the paper owning `id`, if any.
    fn owner_of(&self, id: &str) -> Option<String>;
}

/// Index for contexts with no other papers.
pub struct NoIdentityIndex;

impl IdentityIndex for NoIdentityIndex {
    fn owner_of(&self, _id: &str) -> Option<String> {
        None
    }
}

/// Derive an id from bibliographic fields. `None` unless author, year and
/// title all contribute.
pub fn derive_id(paper: &Paper) -> Option<String> {
    let author: String = paper
        .authors
        .first()
        .map(|a| surname(a))
        .unwrap_or("")
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase();

    let word = paper
        .title
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_lowercase();

    let year: String = paper.year.chars().filter(|c| c.is_alphanumeric()).collect();
    if author.is_empty() || year.is_empty() || word.is_empty() {
        return None;
    }
    Some(format!("{author}{year}{word}"))
}

/// Random base-36 id for papers without usable metadata.
pub fn random_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    (0..RANDOM_ID_LEN)
        .map(|_| ALPHABET[fastrand::usize(..ALPHABET.len())] as char)
        .collect()
}

/// Assign an id to `paper` if it has none and return it.
///
/// An existing id is returned untouched. A derived id owned by a paper with
/// a different title gets the first free suffix.
pub fn ensure_identity(paper: &mut Paper, index: &dyn IdentityIndex) -> String {
    if !paper.id.is_empty() {
        return paper.id.clone();
    }

    let Some(base) = derive_id(paper) else {
        paper.id = random_id();
        return paper.id.clone();
    };

    let title = normalize_title(&paper.title);
    let is_free = |candidate: &str| match index.owner_of(candidate) {
        None => true,
        Some(owner) => owner == title,
    };

    let candidate = std::iter::once(base.clone())
        .chain(('a'..='z').map(|suffix| format!("{base}{suffix}")))
        .find(|c| is_free(c))
        .unwrap_or_else(|| format!("{base}{}", random_id()));

    if candidate != base {
        log::debug!("id '{base}' already taken, using '{candidate}'");
    }
    paper.id = candidate;
    paper.id.clone()
}

/// Like [`ensure_identity`], but an id already owned by a paper with a
/// different title is dropped and assigned afresh.
///
/// For papers entering the library with an id they got while ephemeral.
pub fn claim_identity(paper: &mut Paper, index: &dyn IdentityIndex) -> String {
    if !paper.id.is_empty() {
        let title = normalize_title(&paper.title);
        if index.owner_of(&paper.id).is_some_and(|owner| owner != title) {
            log::debug!("id '{}' belongs to another paper, reassigning", paper.id);
            paper.id.clear();
        }
    }
    ensure_identity(paper, index)
}
