use super::candidates::{Candidate, PeerCandidateRegistry};
use super::dialog::DialogTransport;
use super::event::{ConnectLeg, EventBusRef, LegEvent, LegEventReceiver};
use super::hooks::CallLegHooksRef;
use super::media_session::{release, SharedMediaSession};
use super::message::{SipReply, SipRequest};
use super::offer_answer::OfferAnswer;
use super::reinvite::ReinviteQueue;
use super::LegError;
use super::state::{
    CallFailureReason, CallLegSnapshot, CallStatus, HoldState, LegId, LegRole, StatusChangeCause,
};
use crate::config::LegProfile;
use crate::media::codec_groups::{CodecAllowList, CodecGroupsRef};
use crate::media::negotiate::NegotiationError;
use crate::media::sdp::{SdpMedia, SessionMedia};
use rsip::Method;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One side of a bridged call.
///
/// A leg owns its SIP dialog and reacts to [`LegEvent`]s one at a time.
/// Everything it tells other legs goes through the event bus; the only state
/// shared with a peer is the media session handle.
pub struct CallLeg {
    pub(crate) id: LegId,
    pub(crate) role: LegRole,
    pub(crate) status: CallStatus,
    pub(crate) peer_id: Option<LegId>,
    pub(crate) candidates: PeerCandidateRegistry,
    /// Candidate whose to-tag reply arrived first while forking.
    pub(crate) tracked: Option<LegId>,
    pub(crate) relay_only: bool,

    pub(crate) hold_state: HoldState,
    pub(crate) on_hold: bool,
    pub(crate) saved_non_hold_media: Option<SessionMedia>,

    pub(crate) est_invite_cseq: u32,
    pub(crate) est_peer_cseq: u32,
    /// Caller side: the initial INVITE with its processed offer.
    pub(crate) initial_invite: Option<SipRequest>,
    /// Callee side: the establishing INVITE has no final reply yet.
    pub(crate) invite_pending: bool,
    /// The dialog was confirmed by a 2xx to the establishing INVITE.
    pub(crate) confirmed: bool,

    pub(crate) reinvites: ReinviteQueue,
    pub(crate) offer_answer: OfferAnswer,
    /// Offer received from this leg's remote, after inbound processing.
    pub(crate) negotiated: Vec<SdpMedia>,
    /// Last offer this leg sent to its remote.
    pub(crate) offered: Vec<SdpMedia>,
    /// Requests from the remote awaiting a relayed reply, by remote CSeq.
    pub(crate) received_requests: HashMap<u32, SipRequest>,
    /// Own CSeq of a relayed request to the peer's CSeq.
    pub(crate) relayed_requests: HashMap<u32, u32>,

    pub(crate) media: Option<SharedMediaSession>,
    pub(crate) dialog: Box<dyn DialogTransport>,
    pub(crate) bus: EventBusRef,
    pub(crate) hooks: CallLegHooksRef,
    pub(crate) codecs: CodecGroupsRef,
    pub(crate) profile: LegProfile,

    pub(crate) terminated: bool,
    pub(crate) remote_gone: bool,
}

impl CallLeg {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> LegRole {
        self.role
    }

    pub fn status(&self) -> CallStatus {
        self.status
    }

    /// The selected peer, or the only remaining candidate during setup.
    pub fn peer_id(&self) -> Option<&str> {
        self.peer_id
            .as_deref()
            .or_else(|| self.candidates.sole().map(|c| c.id.as_str()))
    }

    pub fn candidates(&self) -> &PeerCandidateRegistry {
        &self.candidates
    }

    pub fn hold_state(&self) -> HoldState {
        self.hold_state
    }

    pub fn is_on_hold(&self) -> bool {
        self.on_hold
    }

    pub fn is_relay_only(&self) -> bool {
        self.relay_only
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn media(&self) -> Option<&SharedMediaSession> {
        self.media.as_ref()
    }

    pub fn snapshot(&self) -> CallLegSnapshot {
        CallLegSnapshot {
            leg_id: self.id.clone(),
            role: self.role,
            status: self.status,
            peer_id: self.peer_id().map(str::to_string),
            candidates: self.candidates.ids(),
            relay_only: self.relay_only,
            hold_state: self.hold_state,
            on_hold: self.on_hold,
            has_non_hold_media: self.saved_non_hold_media.is_some(),
            pending_reinvites: self.reinvites.len(),
            est_invite_cseq: self.est_invite_cseq,
            est_peer_cseq: self.est_peer_cseq,
            negotiation: self.offer_answer.state(),
        }
    }

    pub fn debug(&self) {
        match serde_json::to_string(&self.snapshot()) {
            Ok(snapshot) => debug!(leg = %self.id, %snapshot, "Call leg state"),
            Err(e) => warn!(leg = %self.id, "Failed to serialize call leg state: {}", e),
        }
    }

    pub(crate) fn allow_list(&self) -> Result<CodecAllowList, NegotiationError> {
        self.codecs.get(self.profile.codec_group)
    }

    pub(crate) fn post(&self, target: &str, event: LegEvent) -> bool {
        let name = event.name();
        let delivered = self.bus.post(target, event);
        if !delivered {
            debug!(leg = %self.id, target, event = name, "Event target is gone");
        }
        delivered
    }

    pub(crate) fn post_terminate(&self, target: &str) {
        self.post(
            target,
            LegEvent::Terminate {
                sender: self.id.clone(),
            },
        );
    }

    /// Where requests and replies from this leg's remote are relayed.
    pub(crate) fn relay_target(&self) -> Option<LegId> {
        self.peer_id
            .clone()
            .or_else(|| self.tracked.clone())
            .or_else(|| self.candidates.sole().map(|c| c.id.clone()))
    }

    pub(crate) fn update_status(&mut self, new_status: CallStatus, cause: StatusChangeCause) {
        let old = self.status;
        if old == new_status {
            return;
        }
        info!(
            leg = %self.id,
            role = ?self.role,
            peer = ?self.peer_id(),
            old = %old,
            new = %new_status,
            %cause,
            "Call status changed"
        );
        self.status = new_status;
        self.hooks
            .on_status_change(&self.id, old, new_status, &cause);
    }

    /// Dispatches one event. Returns false once the leg has terminated.
    pub fn handle_event(&mut self, event: LegEvent) -> bool {
        if self.terminated {
            debug!(leg = %self.id, event = event.name(), "Event for terminated leg dropped");
            return false;
        }
        match event {
            LegEvent::Connect { sender, connect } => self.on_connect(sender, connect),
            LegEvent::RelayRequest {
                sender,
                request,
                forward,
            } => self.on_relayed_request(sender, request, forward),
            LegEvent::RelayReply {
                sender,
                reply,
                forward,
            } => self.on_relayed_reply(sender, reply, forward),
            LegEvent::Terminate { sender } => self.on_terminate(sender),
            LegEvent::AddCandidate(candidate) => {
                if let Err(e) = self.add_candidate(candidate) {
                    warn!(leg = %self.id, "Candidate not added: {}", e);
                }
            }
            LegEvent::Request(request) => self.on_sip_request(request),
            LegEvent::Reply(reply) => self.on_sip_reply(reply),
            LegEvent::Cancel => self.on_cancel(),
            LegEvent::NoAck(cseq) => {
                warn!(leg = %self.id, cseq, "No ACK received");
                self.stop_call(StatusChangeCause::NoAck);
            }
            LegEvent::NoPrack(cseq) => {
                warn!(leg = %self.id, cseq, "No PRACK received");
                self.stop_call(StatusChangeCause::NoPrack);
            }
            LegEvent::RtpTimeout => self.stop_call(StatusChangeCause::RtpTimeout),
            LegEvent::SessionTimeout => self.stop_call(StatusChangeCause::SessionTimeout),
            LegEvent::RemoteUnreachable(reply) => self.on_remote_disappeared(reply),
            LegEvent::PutOnHold => self.put_on_hold(),
            LegEvent::ResumeHeld => {
                if let Err(e) = self.resume_held() {
                    warn!(leg = %self.id, "Resume failed: {}", e);
                }
            }
            LegEvent::Disconnect { hold_remote } => self.disconnect(hold_remote),
            LegEvent::Stop(reason) => self.stop_call(StatusChangeCause::Other(reason)),
        }
        !self.terminated
    }

    /// Offers the call to another leg. The candidate receives a Connect
    /// event carrying the initial INVITE.
    pub fn add_candidate(&mut self, candidate: Candidate) -> Result<(), LegError> {
        if self.terminated || matches!(self.status, CallStatus::Connected | CallStatus::Disconnecting) {
            return Err(LegError::InvalidState {
                operation: "add candidate",
                status: self.status,
            });
        }
        let id = candidate.id.clone();
        if !self.candidates.add(candidate) {
            return Err(LegError::DuplicateCandidate(id));
        }
        let connect = match self.initial_invite.clone() {
            Some(request) if !self.confirmed => ConnectLeg {
                request,
                peer_cseq: self.est_invite_cseq,
                relayed_invite: true,
                media: self.media.clone(),
            },
            _ => {
                // The remote was already answered; the callee negotiates on
                // its own and the result is offered here by re-INVITE.
                let mut request = SipRequest::new(Method::Invite, self.est_invite_cseq);
                request.body = self.offer_answer.remote().map(str::to_string);
                ConnectLeg {
                    request,
                    peer_cseq: self.est_invite_cseq,
                    relayed_invite: false,
                    media: self.media.clone(),
                }
            }
        };
        debug!(leg = %self.id, candidate = %id, relayed = connect.relayed_invite, "Adding candidate");
        if !self.post(
            &id,
            LegEvent::Connect {
                sender: self.id.clone(),
                connect,
            },
        ) {
            self.candidates.remove(&id);
            return Err(LegError::UnknownLeg(id));
        }
        self.relay_only = true;
        if self.status == CallStatus::Disconnected {
            self.update_status(
                CallStatus::NoReply,
                StatusChangeCause::other("candidate added"),
            );
        }
        Ok(())
    }

    pub(crate) fn on_cancel(&mut self) {
        if self.role != LegRole::A
            || !matches!(
                self.status,
                CallStatus::NoReply | CallStatus::Ringing | CallStatus::Disconnected
            )
        {
            debug!(leg = %self.id, status = %self.status, "CANCEL ignored");
            return;
        }
        info!(leg = %self.id, "Call canceled by caller");
        if let Some(request) = self.received_requests.remove(&self.est_invite_cseq) {
            if let Err(e) = self.dialog.reply(
                &request,
                487,
                "Request Terminated",
                &rsip::Headers::default(),
                None,
            ) {
                warn!(leg = %self.id, "Failed to reply 487: {}", e);
            }
        }
        self.initial_invite = None;
        self.hooks
            .on_call_failed(&self.id, CallFailureReason::CallCanceled, None);
        self.update_status(CallStatus::Disconnected, StatusChangeCause::Canceled);
        self.stop_call(StatusChangeCause::Canceled);
    }

    pub(crate) fn on_terminate(&mut self, sender: LegId) {
        if self.candidates.contains(&sender) {
            // A candidate gave up before replying.
            self.candidates.remove(&sender);
            if self.tracked.as_deref() == Some(sender.as_str()) {
                self.tracked = None;
            }
            if !self.candidates.is_empty() || self.peer_id.is_some() {
                return;
            }
        } else if self.peer_id.as_deref() != Some(sender.as_str()) {
            debug!(leg = %self.id, %sender, "Terminate from unrelated leg ignored");
            return;
        }
        info!(leg = %self.id, %sender, "Terminated by peer");
        self.peer_id = None;
        self.update_status(
            CallStatus::Disconnected,
            StatusChangeCause::other("terminated by peer"),
        );
        self.stop_call(StatusChangeCause::other("terminated by peer"));
    }

    pub(crate) fn on_remote_disappeared(&mut self, reply: SipReply) {
        warn!(leg = %self.id, code = reply.code, "Remote unreachable");
        self.remote_gone = true;
        self.stop_call(StatusChangeCause::SipReply(reply));
    }

    /// Tears down the whole bridge from this leg. Safe to call repeatedly.
    pub fn stop_call(&mut self, cause: StatusChangeCause) {
        if self.terminated {
            return;
        }
        if self.status != CallStatus::Disconnected {
            self.update_status(CallStatus::Disconnected, cause);
        }
        for id in self.candidates.clear() {
            self.post_terminate(&id);
        }
        self.tracked = None;
        if let Some(peer) = self.peer_id.clone() {
            self.post_terminate(&peer);
        }
        self.terminate_leg();
    }

    /// Ends this leg's own dialog and drops its media reference.
    pub(crate) fn terminate_leg(&mut self) {
        if self.terminated {
            return;
        }
        if let Some(request) = self.received_requests.remove(&self.est_invite_cseq) {
            if self.role == LegRole::A && !self.confirmed {
                if let Err(e) = self.dialog.reply(
                    &request,
                    500,
                    "Server Internal Error",
                    &rsip::Headers::default(),
                    None,
                ) {
                    warn!(leg = %self.id, "Failed to reject initial INVITE: {}", e);
                }
            }
        }
        let result = if self.invite_pending {
            self.invite_pending = false;
            self.dialog.cancel()
        } else if self.confirmed && !self.remote_gone {
            self.dialog.terminate()
        } else {
            Ok(())
        };
        if let Err(e) = result {
            warn!(leg = %self.id, "Failed to end dialog: {}", e);
        }
        release(&mut self.media, self.role, &self.id);
        self.reinvites.clear();
        self.received_requests.clear();
        self.relayed_requests.clear();
        self.terminated = true;
        debug!(leg = %self.id, "Call leg terminated");
    }

    /// Runs the leg until it terminates or `cancel_token` fires.
    pub async fn serve(mut self, mut rx: LegEventReceiver, cancel_token: CancellationToken) {
        debug!(leg = %self.id, role = ?self.role, "Call leg started");
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    self.stop_call(StatusChangeCause::other("shutdown"));
                    break;
                }
                event = rx.recv() => {
                    let Some(event) = event else {
                        self.stop_call(StatusChangeCause::other("event channel closed"));
                        break;
                    };
                    if !self.handle_event(event) {
                        break;
                    }
                }
            }
        }
        self.bus.unregister(&self.id);
        debug!(leg = %self.id, "Call leg stopped");
    }
}
