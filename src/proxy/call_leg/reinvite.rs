use super::message::SipRequest;
use super::state::HoldState;
use std::collections::VecDeque;

/// A re-INVITE that could not be sent yet because another INVITE
/// transaction on the leg is still open.
#[derive(Debug, Clone)]
pub struct PendingReinvite {
    pub request: SipRequest,
    /// CSeq of the request in the peer's dialog when relayed.
    pub peer_cseq: Option<u32>,
    pub relayed: bool,
    /// Completes bridge setup; its CSeq becomes the established one.
    pub establishing: bool,
    /// Local hold or resume, entered when the request goes out. A failed
    /// send is treated as a rejected offer instead of ending the call.
    pub local_hold: Option<HoldState>,
}

impl PendingReinvite {
    pub fn relayed(request: SipRequest, peer_cseq: u32) -> Self {
        Self {
            request,
            peer_cseq: Some(peer_cseq),
            relayed: true,
            establishing: false,
            local_hold: None,
        }
    }

    pub fn local(request: SipRequest) -> Self {
        Self {
            request,
            peer_cseq: None,
            relayed: false,
            establishing: false,
            local_hold: None,
        }
    }

    pub fn establishing(request: SipRequest) -> Self {
        Self {
            establishing: true,
            ..Self::local(request)
        }
    }

    pub fn hold(request: SipRequest) -> Self {
        Self {
            local_hold: Some(HoldState::HoldRequested),
            ..Self::local(request)
        }
    }

    pub fn resume(request: SipRequest) -> Self {
        Self {
            local_hold: Some(HoldState::ResumeRequested),
            ..Self::local(request)
        }
    }
}

/// Serializes INVITE transactions of one leg: at most one is outstanding,
/// the rest wait in arrival order.
#[derive(Debug, Default)]
pub struct ReinviteQueue {
    pending: VecDeque<PendingReinvite>,
    in_flight: Option<u32>,
}

impl ReinviteQueue {
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn mark_sent(&mut self, cseq: u32) {
        self.in_flight = Some(cseq);
    }

    /// Clears the outstanding transaction if `cseq` matches it.
    pub fn mark_completed(&mut self, cseq: u32) -> bool {
        if self.in_flight == Some(cseq) {
            self.in_flight = None;
            true
        } else {
            false
        }
    }

    pub fn push(&mut self, reinvite: PendingReinvite) {
        self.pending.push_back(reinvite);
    }

    /// The next queued re-INVITE, if nothing is outstanding.
    pub fn next_ready(&mut self) -> Option<PendingReinvite> {
        if self.is_busy() {
            return None;
        }
        self.pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.in_flight = None;
    }
}
