use super::message::{SipReply, SipRequest};
use super::offer_answer::NegotiationState;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type LegId = String;

/// Which side of the bridge a leg represents. The A-leg faces the caller.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum LegRole {
    A,
    B,
}

impl LegRole {
    pub fn complement(&self) -> Self {
        match self {
            LegRole::A => LegRole::B,
            LegRole::B => LegRole::A,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Disconnected,
    NoReply,
    Ringing,
    Connected,
    Disconnecting,
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallStatus::Disconnected => "disconnected",
            CallStatus::NoReply => "no_reply",
            CallStatus::Ringing => "ringing",
            CallStatus::Connected => "connected",
            CallStatus::Disconnecting => "disconnecting",
        };
        write!(f, "{}", s)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldState {
    #[default]
    PreserveHoldStatus,
    HoldRequested,
    ResumeRequested,
}

/// Why a leg changed its call status.
#[derive(Debug, Clone)]
pub enum StatusChangeCause {
    SipReply(SipReply),
    SipRequest(SipRequest),
    Canceled,
    NoAck,
    NoPrack,
    RtpTimeout,
    SessionTimeout,
    InternalError,
    Other(Option<String>),
}

impl StatusChangeCause {
    pub fn other(description: impl Into<String>) -> Self {
        StatusChangeCause::Other(Some(description.into()))
    }
}

impl fmt::Display for StatusChangeCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusChangeCause::SipReply(reply) => write!(f, "reply {} {}", reply.code, reply.reason),
            StatusChangeCause::SipRequest(req) => write!(f, "request {}", req.method),
            StatusChangeCause::Canceled => write!(f, "canceled"),
            StatusChangeCause::NoAck => write!(f, "no ACK"),
            StatusChangeCause::NoPrack => write!(f, "no PRACK"),
            StatusChangeCause::RtpTimeout => write!(f, "RTP timeout"),
            StatusChangeCause::SessionTimeout => write!(f, "session timeout"),
            StatusChangeCause::InternalError => write!(f, "internal error"),
            StatusChangeCause::Other(Some(desc)) => write!(f, "{}", desc),
            StatusChangeCause::Other(None) => write!(f, "other"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallFailureReason {
    CallRefused,
    CallCanceled,
}

#[derive(Clone, Debug, Serialize)]
pub struct CallLegSnapshot {
    pub leg_id: LegId,
    pub role: LegRole,
    pub status: CallStatus,
    pub peer_id: Option<LegId>,
    pub candidates: Vec<LegId>,
    pub relay_only: bool,
    pub hold_state: HoldState,
    pub on_hold: bool,
    pub has_non_hold_media: bool,
    pub pending_reinvites: usize,
    pub est_invite_cseq: u32,
    pub est_peer_cseq: u32,
    pub negotiation: NegotiationState,
}
