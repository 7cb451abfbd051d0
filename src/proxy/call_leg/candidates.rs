use super::media_session::SharedMediaSession;
use super::state::LegId;
use std::fmt;

/// A leg that was offered the call and has not been selected or rejected.
#[derive(Clone)]
pub struct Candidate {
    pub id: LegId,
    pub media: Option<SharedMediaSession>,
}

impl Candidate {
    pub fn new(id: impl Into<LegId>) -> Self {
        Self {
            id: id.into(),
            media: None,
        }
    }

    pub fn with_media(mut self, media: SharedMediaSession) -> Self {
        self.media = Some(media);
        self
    }
}

impl fmt::Debug for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Candidate")
            .field("id", &self.id)
            .field("media", &self.media.is_some())
            .finish()
    }
}

/// Candidates of a forking caller leg, kept in the order they were added.
#[derive(Default, Debug)]
pub struct PeerCandidateRegistry {
    candidates: Vec<Candidate>,
}

impl PeerCandidateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a candidate. Returns false if one with the same id is present.
    pub fn add(&mut self, candidate: Candidate) -> bool {
        if self.contains(&candidate.id) {
            return false;
        }
        self.candidates.push(candidate);
        true
    }

    /// Removes a candidate and drops its media session reference.
    pub fn remove(&mut self, id: &str) -> bool {
        self.take(id).is_some()
    }

    pub fn take(&mut self, id: &str) -> Option<Candidate> {
        let pos = self.candidates.iter().position(|c| c.id == id)?;
        Some(self.candidates.remove(pos))
    }

    /// Removes every candidate except `keep` and returns the removed ids.
    pub fn take_others(&mut self, keep: &str) -> Vec<LegId> {
        let mut removed = Vec::new();
        self.candidates.retain(|c| {
            if c.id == keep {
                true
            } else {
                removed.push(c.id.clone());
                false
            }
        });
        removed
    }

    pub fn clear(&mut self) -> Vec<LegId> {
        self.candidates.drain(..).map(|c| c.id).collect()
    }

    pub fn get(&self, id: &str) -> Option<&Candidate> {
        self.candidates.iter().find(|c| c.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.candidates.iter().any(|c| c.id == id)
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn ids(&self) -> Vec<LegId> {
        self.candidates.iter().map(|c| c.id.clone()).collect()
    }

    /// The only candidate, if there is exactly one.
    pub fn sole(&self) -> Option<&Candidate> {
        match self.candidates.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }
}
