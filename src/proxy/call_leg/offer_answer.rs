use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationState {
    #[default]
    Idle,
    Stable,
    LocalOfferSent,
    RemoteOfferReceived,
}

/// Tracks the offer/answer exchange on one dialog. `local` is what this leg
/// sent to its remote party, `remote` what it received.
#[derive(Debug, Default)]
pub struct OfferAnswer {
    state: NegotiationState,
    /// CSeq of the transaction carrying the current exchange.
    cseq: u32,
    local: Option<String>,
    remote: Option<String>,
    completed: bool,
}

impl OfferAnswer {
    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn local(&self) -> Option<&str> {
        self.local.as_deref()
    }

    pub fn remote(&self) -> Option<&str> {
        self.remote.as_deref()
    }

    pub fn cseq(&self) -> u32 {
        self.cseq
    }

    /// A body in the same transaction as an exchange that already
    /// completed, such as a 200 repeating the answer from a 183.
    pub fn is_subsequent(&self, cseq: u32) -> bool {
        self.completed && self.state == NegotiationState::Stable && self.cseq == cseq
    }

    pub fn on_offer_sent(&mut self, cseq: u32, sdp: &str) {
        self.state = NegotiationState::LocalOfferSent;
        self.cseq = cseq;
        self.local = Some(sdp.to_string());
    }

    pub fn on_offer_received(&mut self, cseq: u32, sdp: &str) {
        self.state = NegotiationState::RemoteOfferReceived;
        self.cseq = cseq;
        self.remote = Some(sdp.to_string());
    }

    /// Returns `(local, remote)` when the answer completes an exchange.
    pub fn on_answer_received(&mut self, sdp: &str) -> Option<(String, String)> {
        if self.state != NegotiationState::LocalOfferSent {
            return None;
        }
        self.remote = Some(sdp.to_string());
        self.complete()
    }

    pub fn on_answer_sent(&mut self, sdp: &str) -> Option<(String, String)> {
        if self.state != NegotiationState::RemoteOfferReceived {
            return None;
        }
        self.local = Some(sdp.to_string());
        self.complete()
    }

    /// The pending offer failed; the previous agreement, if any, stays.
    pub fn on_offer_rejected(&mut self) {
        self.state = if self.completed {
            NegotiationState::Stable
        } else {
            NegotiationState::Idle
        };
    }

    /// Lets a newly selected peer answer an offer that an earlier candidate
    /// already answered.
    pub fn reset_to_offer_received(&mut self) {
        if self.completed && self.state == NegotiationState::Stable {
            self.state = NegotiationState::RemoteOfferReceived;
        }
    }

    fn complete(&mut self) -> Option<(String, String)> {
        self.state = NegotiationState::Stable;
        self.completed = true;
        Some((self.local.clone()?, self.remote.clone()?))
    }
}
