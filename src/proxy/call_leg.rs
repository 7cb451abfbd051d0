use crate::config::{Config, LegProfile};
use crate::media::codec_groups::CodecGroupsRef;
use crate::media::negotiate::NegotiationError;
use std::sync::Arc;
use thiserror::Error;

pub(crate) mod candidates;
pub(crate) mod dialog;
pub(crate) mod event;
pub(crate) mod hold;
pub(crate) mod hooks;
pub(crate) mod media_session;
pub(crate) mod message;
pub(crate) mod offer_answer;
pub(crate) mod registry;
pub(crate) mod reinvite;
pub(crate) mod relay;
pub(crate) mod session;
pub(crate) mod state;

#[cfg(test)]
pub(crate) mod test_util;


pub use candidates::{Candidate, PeerCandidateRegistry};
pub use dialog::DialogTransport;
pub use event::{CallLegHandle, ConnectLeg, EventBus, EventBusRef, LegEvent, LegEventReceiver};
pub use hooks::{CallLegHooks, CallLegHooksRef, NoopHooks};
pub use media_session::{MediaSession, SharedMediaSession};
pub use message::{SipReply, SipRequest};
pub use offer_answer::{NegotiationState, OfferAnswer};
pub use registry::LegRegistry;
pub use reinvite::{PendingReinvite, ReinviteQueue};
pub use session::CallLeg;
pub use state::{
    CallFailureReason, CallLegSnapshot, CallStatus, HoldState, LegId, LegRole, StatusChangeCause,
};

#[derive(Debug, Error)]
pub enum LegError {
    #[error("negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),
    #[error("no stored non-hold description to resume with")]
    NoResumeDescription,
    #[error("candidate {0} already added")]
    DuplicateCandidate(LegId),
    #[error("leg {0} is not running")]
    UnknownLeg(LegId),
    #[error("cannot {operation} in {status} state")]
    InvalidState {
        operation: &'static str,
        status: CallStatus,
    },
}

pub struct CallLegBuilder {
    role: LegRole,
    id: Option<LegId>,
    profile: LegProfile,
    codecs: Option<CodecGroupsRef>,
    hooks: Option<CallLegHooksRef>,
    media: Option<SharedMediaSession>,
}

impl CallLegBuilder {
    pub fn new(role: LegRole) -> Self {
        Self {
            role,
            id: None,
            profile: LegProfile::default(),
            codecs: None,
            hooks: None,
            media: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<LegId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_profile(mut self, profile: LegProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_codec_groups(mut self, codecs: CodecGroupsRef) -> Self {
        self.codecs = Some(codecs);
        self
    }

    pub fn with_hooks(mut self, hooks: CallLegHooksRef) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn with_media(mut self, media: SharedMediaSession) -> Self {
        self.media = Some(media);
        self
    }

    /// Builds the leg. Fails if the profile names a codec group that does
    /// not exist.
    pub fn build(
        self,
        dialog: Box<dyn DialogTransport>,
        bus: EventBusRef,
    ) -> Result<CallLeg, LegError> {
        let codecs = self
            .codecs
            .unwrap_or_else(|| Arc::new(Config::default().codec_groups()));
        codecs.get(self.profile.codec_group)?;
        let id = self
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if let Some(media) = &self.media {
            media.attach(self.role, &id);
        }
        Ok(CallLeg {
            id,
            role: self.role,
            status: CallStatus::Disconnected,
            peer_id: None,
            candidates: PeerCandidateRegistry::new(),
            tracked: None,
            relay_only: false,
            hold_state: HoldState::PreserveHoldStatus,
            on_hold: false,
            saved_non_hold_media: None,
            est_invite_cseq: 0,
            est_peer_cseq: 0,
            initial_invite: None,
            invite_pending: false,
            confirmed: false,
            reinvites: ReinviteQueue::default(),
            offer_answer: OfferAnswer::default(),
            negotiated: Vec::new(),
            offered: Vec::new(),
            received_requests: Default::default(),
            relayed_requests: Default::default(),
            media: self.media,
            dialog,
            bus,
            hooks: self.hooks.unwrap_or_else(|| Arc::new(NoopHooks)),
            codecs,
            profile: self.profile,
            terminated: false,
            remote_gone: false,
        })
    }
}

impl CallLeg {
    /// Creates a leg that reaches a callee on behalf of this one. It shares
    /// codec groups, hooks and the event bus; the peer link and media come
    /// with the Connect event once it is added as a candidate.
    pub fn new_callee(
        &self,
        id: impl Into<LegId>,
        dialog: Box<dyn DialogTransport>,
        profile: LegProfile,
    ) -> Result<CallLeg, LegError> {
        CallLegBuilder::new(self.role.complement())
            .with_id(id)
            .with_profile(profile)
            .with_codec_groups(self.codecs.clone())
            .with_hooks(self.hooks.clone())
            .build(dialog, self.bus.clone())
    }

    /// A callee that starts forking on its own becomes the creator of a new
    /// bridge and takes the caller role for CANCEL handling.
    pub fn set_role(&mut self, role: LegRole) {
        self.role = role;
    }
}
