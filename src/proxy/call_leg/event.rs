use super::candidates::Candidate;
use super::message::{SipReply, SipRequest};
use super::state::LegId;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Payload of a connect request sent to a freshly created callee leg.
#[derive(Clone)]
pub struct ConnectLeg {
    /// The caller's initial INVITE, with the body already processed by the
    /// caller leg.
    pub request: SipRequest,
    /// CSeq of that INVITE in the caller's dialog.
    pub peer_cseq: u32,
    /// Whether the callee should relay the offer/answer exchange with the
    /// caller. When false the callee negotiates on its own.
    pub relayed_invite: bool,
    pub media: Option<crate::proxy::call_leg::SharedMediaSession>,
}

impl fmt::Debug for ConnectLeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectLeg")
            .field("method", &self.request.method)
            .field("peer_cseq", &self.peer_cseq)
            .field("relayed_invite", &self.relayed_invite)
            .field("media", &self.media.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum LegEvent {
    /// Sent by the caller leg to each candidate it adds.
    Connect { sender: LegId, connect: ConnectLeg },
    RelayRequest {
        sender: LegId,
        request: SipRequest,
        forward: bool,
    },
    RelayReply {
        sender: LegId,
        reply: SipReply,
        forward: bool,
    },
    /// The sending leg is gone; tear this one down too.
    Terminate { sender: LegId },
    AddCandidate(Candidate),

    /// Events raised by this leg's own dialog.
    Request(SipRequest),
    Reply(SipReply),
    Cancel,
    NoAck(u32),
    NoPrack(u32),
    RtpTimeout,
    SessionTimeout,
    RemoteUnreachable(SipReply),

    PutOnHold,
    ResumeHeld,
    Disconnect { hold_remote: bool },
    Stop(Option<String>),
}

impl LegEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LegEvent::Connect { .. } => "connect",
            LegEvent::RelayRequest { .. } => "relay_request",
            LegEvent::RelayReply { .. } => "relay_reply",
            LegEvent::Terminate { .. } => "terminate",
            LegEvent::AddCandidate(_) => "add_candidate",
            LegEvent::Request(_) => "request",
            LegEvent::Reply(_) => "reply",
            LegEvent::Cancel => "cancel",
            LegEvent::NoAck(_) => "no_ack",
            LegEvent::NoPrack(_) => "no_prack",
            LegEvent::RtpTimeout => "rtp_timeout",
            LegEvent::SessionTimeout => "session_timeout",
            LegEvent::RemoteUnreachable(_) => "remote_unreachable",
            LegEvent::PutOnHold => "put_on_hold",
            LegEvent::ResumeHeld => "resume_held",
            LegEvent::Disconnect { .. } => "disconnect",
            LegEvent::Stop(_) => "stop",
        }
    }
}

pub type LegEventSender = mpsc::UnboundedSender<LegEvent>;
pub type LegEventReceiver = mpsc::UnboundedReceiver<LegEvent>;

/// Delivers events to legs by id. Posting never blocks; a post to a leg that
/// no longer exists returns false.
pub trait EventBus: Send + Sync {
    fn post(&self, target: &str, event: LegEvent) -> bool;
    fn unregister(&self, _leg_id: &str) {}
}

pub type EventBusRef = Arc<dyn EventBus>;

#[derive(Clone)]
pub struct CallLegHandle {
    leg_id: LegId,
    tx: LegEventSender,
}

impl CallLegHandle {
    pub fn new() -> (Self, LegEventReceiver) {
        Self::with_id(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_id(leg_id: impl Into<LegId>) -> (Self, LegEventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                leg_id: leg_id.into(),
                tx,
            },
            rx,
        )
    }

    pub fn leg_id(&self) -> &str {
        &self.leg_id
    }

    pub fn send(&self, event: LegEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn put_on_hold(&self) -> bool {
        self.send(LegEvent::PutOnHold)
    }

    pub fn resume_held(&self) -> bool {
        self.send(LegEvent::ResumeHeld)
    }

    pub fn disconnect(&self, hold_remote: bool) -> bool {
        self.send(LegEvent::Disconnect { hold_remote })
    }

    pub fn stop(&self, reason: Option<String>) -> bool {
        self.send(LegEvent::Stop(reason))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

