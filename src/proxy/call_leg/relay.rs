use super::event::{ConnectLeg, LegEvent};
use super::message::{carries_sdp, SipReply, SipRequest};
use super::offer_answer::NegotiationState;
use super::reinvite::PendingReinvite;
use super::session::CallLeg;
use super::state::{CallFailureReason, CallStatus, LegId, LegRole, StatusChangeCause};
use crate::media::negotiate::{filter_offer, process_answer, process_offer, NegotiationError};
use crate::media::sdp::SessionMedia;
use rsip::headers::UntypedHeader;
use rsip::Method;
use tracing::{debug, info, warn};

impl CallLeg {
    fn reply_to(&mut self, request: &SipRequest, code: u16, reason: &str, body: Option<&str>) {
        if let Err(e) = self
            .dialog
            .reply(request, code, reason, &rsip::Headers::default(), body)
        {
            warn!(leg = %self.id, code, method = %request.method, "Failed to send reply: {}", e);
        }
    }

    /// Synthesizes an error reply for a request the peer asked us to relay.
    pub(crate) fn relay_error(&self, peer_cseq: u32, method: Method, code: u16, reason: &str) {
        let Some(target) = self.relay_target() else {
            return;
        };
        self.post(
            &target,
            LegEvent::RelayReply {
                sender: self.id.clone(),
                reply: SipReply::new(code, reason, peer_cseq, method),
                forward: true,
            },
        );
    }

    /// Processes a body received from this leg's remote. Offers run through
    /// the inbound pipeline; answers complete the exchange and pass through.
    pub(crate) fn incoming_body(&mut self, cseq: u32, body: &str) -> Result<String, NegotiationError> {
        if self.offer_answer.is_subsequent(cseq) {
            return Ok(body.to_string());
        }
        if self.offer_answer.state() == NegotiationState::LocalOfferSent {
            if let Some((local, remote)) = self.offer_answer.on_answer_received(body) {
                self.on_sdp_completed(&local, &remote);
            }
            return Ok(body.to_string());
        }
        let allow = self.allow_list()?;
        let processed = process_offer(body, &allow, &self.profile.media, &mut self.negotiated, false)?;
        self.offer_answer.on_offer_received(cseq, &processed);
        Ok(processed)
    }

    /// Processes a body about to be sent to this leg's remote in transaction
    /// `cseq`.
    pub(crate) fn outgoing_body(
        &mut self,
        cseq: u32,
        body: Option<&str>,
        answer_mandatory: bool,
    ) -> Result<Option<String>, NegotiationError> {
        if self.offer_answer.is_subsequent(cseq) {
            return Ok(body.and(self.offer_answer.local()).map(str::to_string));
        }
        if self.offer_answer.state() == NegotiationState::RemoteOfferReceived {
            let answer = process_answer(body, &mut self.negotiated, &self.profile.media, answer_mandatory)?;
            if let Some(answer) = answer.as_deref() {
                if let Some((local, remote)) = self.offer_answer.on_answer_sent(answer) {
                    self.on_sdp_completed(&local, &remote);
                }
            }
            return Ok(answer);
        }
        let Some(body) = body else {
            return Ok(None);
        };
        let offer = self.prepare_outgoing_offer(body)?.to_sdp_string();
        self.offer_answer.on_offer_sent(cseq, &offer);
        Ok(Some(offer))
    }

    /// Outbound offer pipeline for an offer relayed from the peer.
    pub(crate) fn prepare_outgoing_offer(&mut self, body: &str) -> Result<SessionMedia, NegotiationError> {
        let allow = self.allow_list()?;
        let mut sdp = filter_offer(body, &allow, &self.profile.media, &self.offered)?;
        self.adjust_offer(&mut sdp);
        self.offered = sdp.media.clone();
        Ok(sdp)
    }

    pub(crate) fn on_initial_invite(&mut self, mut request: SipRequest) {
        self.est_invite_cseq = request.cseq;
        if let Some(body) = request.sdp().map(str::to_string) {
            match self.incoming_body(request.cseq, &body) {
                Ok(processed) => request.body = Some(processed),
                Err(e) => {
                    warn!(leg = %self.id, code = e.internal_code(), "Initial offer rejected: {}", e);
                    self.reply_to(&request, e.response_code(), e.reason(), None);
                    self.terminate_leg();
                    return;
                }
            }
        }
        debug!(leg = %self.id, cseq = request.cseq, "Initial INVITE received");
        self.received_requests.insert(request.cseq, request.clone());
        self.initial_invite = Some(request);
    }

    /// Callee side: the caller asks this leg to place the call.
    pub(crate) fn on_connect(&mut self, sender: LegId, connect: ConnectLeg) {
        if self.status != CallStatus::Disconnected {
            warn!(leg = %self.id, %sender, status = %self.status, "BUG: connect received in wrong state");
            return;
        }
        let relayed = connect.relayed_invite;
        self.peer_id = Some(sender.clone());
        self.est_peer_cseq = connect.peer_cseq;
        self.relay_only = true;
        if self.media.is_none() {
            self.media = connect.media.clone();
        }
        if let Some(media) = &self.media {
            media.attach(self.role, &self.id);
        }

        let request = connect.request;
        let cseq = self.dialog.cseq();
        let body = match self.outgoing_body(cseq, request.sdp(), false) {
            Ok(body) => body,
            Err(e) => {
                warn!(leg = %self.id, code = e.internal_code(), "Offer for callee rejected: {}", e);
                if relayed {
                    self.relay_error(connect.peer_cseq, Method::Invite, e.response_code(), e.reason());
                }
                self.stop_call(StatusChangeCause::InternalError);
                return;
            }
        };
        match self
            .dialog
            .send_request(Method::Invite, &request.headers, body.as_deref())
        {
            Ok(sent) => {
                self.est_invite_cseq = sent;
                self.invite_pending = true;
                self.reinvites.mark_sent(sent);
                if relayed {
                    self.relayed_requests.insert(sent, connect.peer_cseq);
                }
                self.update_status(CallStatus::NoReply, StatusChangeCause::SipRequest(request));
            }
            Err(e) => {
                warn!(leg = %self.id, "Failed to send INVITE: {}", e);
                self.offer_answer.on_offer_rejected();
                if relayed {
                    self.relay_error(
                        connect.peer_cseq,
                        Method::Invite,
                        500,
                        "Server Internal Error",
                    );
                }
                self.stop_call(StatusChangeCause::InternalError);
            }
        }
    }

    /// A request from this leg's remote.
    pub(crate) fn on_sip_request(&mut self, request: SipRequest) {
        if request.method == Method::Invite
            && self.role == LegRole::A
            && self.status == CallStatus::Disconnected
            && self.est_invite_cseq == 0
            && self.initial_invite.is_none()
            && !self.confirmed
        {
            return self.on_initial_invite(request);
        }
        match request.method {
            Method::Ack => return self.on_remote_ack(request),
            Method::Cancel => return self.on_cancel(),
            _ => {}
        }
        let target = if self.relay_only {
            self.relay_target()
        } else {
            None
        };
        let Some(target) = target else {
            return self.handle_local_request(request);
        };
        if request.method == Method::Bye {
            return self.on_remote_bye(request, target);
        }
        self.relay_request(request, target);
    }

    fn relay_request(&mut self, mut request: SipRequest, target: LegId) {
        if let Some(body) = request.sdp().map(str::to_string) {
            match self.incoming_body(request.cseq, &body) {
                Ok(processed) => request.body = Some(processed),
                Err(e) => {
                    warn!(leg = %self.id, method = %request.method, "Offer rejected: {}", e);
                    self.reply_to(&request, e.response_code(), e.reason(), None);
                    return;
                }
            }
        }
        debug!(leg = %self.id, method = %request.method, cseq = request.cseq, %target, "Relaying request");
        self.received_requests.insert(request.cseq, request.clone());
        let cseq = request.cseq;
        if !self.post(
            &target,
            LegEvent::RelayRequest {
                sender: self.id.clone(),
                request: request.clone(),
                forward: true,
            },
        ) {
            self.received_requests.remove(&cseq);
            self.reply_to(&request, 481, "Call/Transaction Does Not Exist", None);
        }
    }

    fn on_remote_ack(&mut self, request: SipRequest) {
        if let Some(body) = request.sdp() {
            if self.offer_answer.state() == NegotiationState::LocalOfferSent {
                if let Some((local, remote)) = self.offer_answer.on_answer_received(body) {
                    self.on_sdp_completed(&local, &remote);
                }
            }
        }
        if !self.relay_only {
            return;
        }
        if let Some(target) = self.relay_target() {
            self.post(
                &target,
                LegEvent::RelayRequest {
                    sender: self.id.clone(),
                    request,
                    forward: true,
                },
            );
        }
    }

    fn on_remote_bye(&mut self, request: SipRequest, target: LegId) {
        info!(leg = %self.id, "BYE received from remote");
        self.reply_to(&request, 200, "OK", None);
        self.remote_gone = true;
        self.post(
            &target,
            LegEvent::RelayRequest {
                sender: self.id.clone(),
                request: request.clone(),
                forward: false,
            },
        );
        for id in self.candidates.clear() {
            if id != target {
                self.post_terminate(&id);
            }
        }
        self.tracked = None;
        self.peer_id = None;
        self.update_status(CallStatus::Disconnected, StatusChangeCause::SipRequest(request));
        self.terminate_leg();
    }

    /// Requests arriving while nothing is bridged are answered here.
    fn handle_local_request(&mut self, request: SipRequest) {
        match request.method {
            Method::Bye => {
                info!(leg = %self.id, status = %self.status, "BYE received without peer");
                self.reply_to(&request, 200, "OK", None);
                self.remote_gone = true;
                self.stop_call(StatusChangeCause::SipRequest(request));
            }
            Method::Invite => self.accept_pending_invite(request),
            _ => {
                debug!(leg = %self.id, method = %request.method, "Request without peer rejected");
                self.reply_to(&request, 501, "Not Implemented", None);
            }
        }
    }

    /// Answers a re-INVITE locally while the leg has no peer. Media stays
    /// parked on the unspecified address.
    fn accept_pending_invite(&mut self, request: SipRequest) {
        let mut sdp = match request.sdp() {
            Some(body) => {
                let processed = self.allow_list().and_then(|allow| {
                    process_offer(body, &allow, &self.profile.media, &mut self.negotiated, true)
                });
                match processed.and_then(|p| SessionMedia::parse(&p)) {
                    Ok(sdp) => {
                        self.offer_answer.on_offer_received(request.cseq, body);
                        sdp
                    }
                    Err(e) => {
                        warn!(leg = %self.id, "Pending INVITE offer rejected: {}", e);
                        self.reply_to(&request, e.response_code(), e.reason(), None);
                        return;
                    }
                }
            }
            None => {
                let mut sdp = self
                    .media
                    .as_ref()
                    .filter(|m| m.has_local_description(self.role))
                    .and_then(|m| m.local_description(self.role))
                    .unwrap_or_else(SessionMedia::fake_hold);
                sdp.bump_version();
                sdp
            }
        };
        sdp.zero_connections();
        let body = sdp.to_sdp_string();
        debug!(leg = %self.id, status = %self.status, "Accepting INVITE without peer");
        self.reply_to(&request, 200, "OK", Some(&body));
        if request.sdp().is_some() {
            if let Some((local, remote)) = self.offer_answer.on_answer_sent(&body) {
                self.on_sdp_completed(&local, &remote);
            }
        } else {
            self.offer_answer.on_offer_sent(request.cseq, &body);
        }
    }

    /// A reply from this leg's remote.
    pub(crate) fn on_sip_reply(&mut self, mut reply: SipReply) {
        let is_invite = reply.cseq_method == Method::Invite;
        let establishing = is_invite && reply.cseq == self.est_invite_cseq && self.invite_pending;

        if reply.code >= 300 {
            if is_invite {
                if self.offer_answer.state() == NegotiationState::LocalOfferSent
                    && self.offer_answer.cseq() == reply.cseq
                {
                    self.offer_answer.on_offer_rejected();
                    self.offer_rejected();
                }
                self.reinvites.mark_completed(reply.cseq);
            }
        } else if let Some(body) = reply.sdp().map(str::to_string) {
            match self.incoming_body(reply.cseq, &body) {
                Ok(processed) => reply.body = Some(processed),
                Err(e) => {
                    warn!(leg = %self.id, code = reply.code, "Body in reply rejected: {}", e);
                    if let Some(peer_cseq) = self.relayed_requests.remove(&reply.cseq) {
                        self.relay_error(peer_cseq, reply.cseq_method.clone(), e.response_code(), e.reason());
                    }
                    self.stop_call(StatusChangeCause::InternalError);
                    return;
                }
            }
        }

        if establishing {
            if reply.is_provisional() {
                if reply.code != 100 && reply.to_tag.is_some() && self.status == CallStatus::NoReply {
                    self.update_status(CallStatus::Ringing, StatusChangeCause::SipReply(reply.clone()));
                }
            } else {
                self.invite_pending = false;
                if reply.is_success() {
                    self.confirmed = true;
                    self.hooks.on_call_connected(&self.id, Some(&reply));
                    self.update_status(CallStatus::Connected, StatusChangeCause::SipReply(reply.clone()));
                }
            }
        }

        match self.relayed_requests.get(&reply.cseq).copied() {
            Some(peer_cseq) => {
                if reply.is_final() && !(is_invite && reply.is_success()) {
                    self.relayed_requests.remove(&reply.cseq);
                }
                if let Some(target) = self.relay_target() {
                    let mut relayed = reply.clone();
                    relayed.cseq = peer_cseq;
                    debug!(leg = %self.id, code = reply.code, %target, "Relaying reply");
                    self.post(
                        &target,
                        LegEvent::RelayReply {
                            sender: self.id.clone(),
                            reply: relayed,
                            forward: true,
                        },
                    );
                }
            }
            None => {
                if is_invite && reply.cseq == self.est_invite_cseq && self.role == LegRole::B {
                    if let Some(target) = self.relay_target() {
                        let mut relayed = reply.clone();
                        relayed.cseq = self.est_peer_cseq;
                        self.post(
                            &target,
                            LegEvent::RelayReply {
                                sender: self.id.clone(),
                                reply: relayed,
                                forward: false,
                            },
                        );
                    }
                }
                if is_invite && reply.is_success() {
                    if let Err(e) = self.dialog.send_ack(reply.cseq, None) {
                        warn!(leg = %self.id, "Failed to send ACK: {}", e);
                    }
                    self.on_ack_processed(reply.cseq);
                }
            }
        }

        if establishing && reply.code >= 300 {
            self.peer_id = None;
            self.update_status(CallStatus::Disconnected, StatusChangeCause::SipReply(reply.clone()));
            self.terminate_leg();
        } else if (reply.code == 408 || reply.code == 481) && self.status == CallStatus::Connected {
            self.on_remote_disappeared(reply);
        } else if is_invite && reply.code >= 300 {
            self.dispatch_queued();
        }
    }

    /// A request relayed by the peer, to be sent on this leg's dialog.
    pub(crate) fn on_relayed_request(&mut self, sender: LegId, request: SipRequest, forward: bool) {
        if self.relay_target().as_deref() != Some(sender.as_str()) && !self.candidates.contains(&sender) {
            debug!(leg = %self.id, %sender, method = %request.method, "Request from unrelated leg ignored");
            return;
        }
        let forward = forward && self.relay_only;
        match request.method {
            Method::Ack => self.on_relayed_ack(request),
            Method::Bye if self.relay_target().as_deref() == Some(sender.as_str()) => {
                self.on_other_bye(request)
            }
            Method::Bye => {
                debug!(leg = %self.id, %sender, "BYE from unselected candidate");
                self.candidates.remove(&sender);
            }
            Method::Invite if forward => {
                let pending = PendingReinvite::relayed(request.clone(), request.cseq);
                if self.reinvites.is_busy() {
                    debug!(leg = %self.id, cseq = request.cseq, "INVITE pending, queueing relayed re-INVITE");
                    self.reinvites.push(pending);
                } else {
                    self.reinvite(pending);
                }
            }
            _ => self.send_relayed(request, forward),
        }
    }

    fn send_relayed(&mut self, request: SipRequest, forward: bool) {
        let method = request.method.clone();
        let body = if carries_sdp(&method) {
            let cseq = self.dialog.cseq();
            match self.outgoing_body(cseq, request.sdp(), false) {
                Ok(body) => body,
                Err(e) => {
                    warn!(leg = %self.id, %method, "Relayed body rejected: {}", e);
                    if forward {
                        self.relay_error(request.cseq, method, e.response_code(), e.reason());
                    }
                    return;
                }
            }
        } else {
            request.body.clone()
        };
        match self.dialog.send_request(method.clone(), &request.headers, body.as_deref()) {
            Ok(sent) => {
                if forward {
                    self.relayed_requests.insert(sent, request.cseq);
                }
            }
            Err(e) => {
                warn!(leg = %self.id, %method, "Failed to relay request: {}", e);
                if forward {
                    self.relay_error(request.cseq, method, 500, "Server Internal Error");
                }
                self.stop_call(StatusChangeCause::InternalError);
            }
        }
    }

    fn on_relayed_ack(&mut self, request: SipRequest) {
        let own = self
            .relayed_requests
            .iter()
            .find(|(_, peer)| **peer == request.cseq)
            .map(|(own, _)| *own);
        let Some(own_cseq) = own else {
            debug!(leg = %self.id, cseq = request.cseq, "ACK without relayed INVITE dropped");
            return;
        };
        self.relayed_requests.remove(&own_cseq);
        let mut failed = None;
        let body = if self.offer_answer.state() == NegotiationState::RemoteOfferReceived {
            match self.outgoing_body(own_cseq, request.sdp(), true) {
                Ok(body) => body,
                Err(e) => {
                    failed = Some(e);
                    None
                }
            }
        } else {
            None
        };
        if let Err(e) = self.dialog.send_ack(own_cseq, body.as_deref()) {
            warn!(leg = %self.id, "Failed to send ACK: {}", e);
        }
        if let Some(e) = failed {
            warn!(leg = %self.id, "Answer in ACK rejected: {}", e);
            self.stop_call(StatusChangeCause::InternalError);
            return;
        }
        self.on_ack_processed(own_cseq);
    }

    /// The peer hung up; end this side too.
    pub(crate) fn on_other_bye(&mut self, request: SipRequest) {
        info!(leg = %self.id, "Peer hung up");
        self.peer_id = None;
        self.update_status(CallStatus::Disconnected, StatusChangeCause::SipRequest(request));
        self.terminate_leg();
    }

    /// A reply relayed by the peer or a candidate, to be answered on this
    /// leg's dialog.
    pub(crate) fn on_relayed_reply(&mut self, sender: LegId, reply: SipReply, forward: bool) {
        let initial = reply.cseq_method == Method::Invite
            && matches!(self.status, CallStatus::NoReply | CallStatus::Ringing)
            && ((reply.cseq == self.est_invite_cseq && forward) || !forward);
        if initial {
            if reply.is_provisional() {
                self.on_initial_1xx(sender, reply, forward);
            } else if reply.is_success() {
                self.on_initial_2xx(sender, reply, forward);
            } else {
                self.on_initial_error(sender, reply, forward);
            }
            return;
        }

        if self.status == CallStatus::Connected
            && reply.is_final()
            && reply.cseq_method == Method::Invite
            && self.peer_id.as_deref() != Some(sender.as_str())
        {
            if reply.is_success() {
                if self.peer_id.is_none() {
                    info!(leg = %self.id, %sender, "Adopting answering leg as peer");
                    self.peer_id = Some(sender);
                } else {
                    debug!(leg = %self.id, %sender, "Positive reply from other leg suppressed");
                }
            } else {
                warn!(leg = %self.id, %sender, code = reply.code, "Error reply from other leg while connected");
                self.hooks.on_connected_error(&self.id, &reply);
                self.post_terminate(&sender);
            }
            return;
        }

        if self.relay_target().as_deref() != Some(sender.as_str()) {
            debug!(leg = %self.id, %sender, code = reply.code, status = %self.status, "Reply from unrelated leg ignored");
            return;
        }
        if forward {
            self.relay_reply_to_remote(reply);
        }
    }

    fn is_selected(&self, id: &str) -> bool {
        self.tracked.as_deref() == Some(id) || self.peer_id.as_deref() == Some(id)
    }

    /// Starts tracking a candidate as the peer. The candidate's media
    /// session is adopted if this leg has none yet.
    fn select_candidate(&mut self, id: &str, forward: bool) -> bool {
        if self.is_selected(id) {
            return true;
        }
        let Some(candidate) = self.candidates.get(id) else {
            warn!(leg = %self.id, candidate = id, "Not a candidate of this leg");
            return false;
        };
        if self.media.is_none() {
            if let Some(media) = candidate.media.clone() {
                media.attach(self.role, &self.id);
                self.media = Some(media);
            }
        }
        self.tracked = Some(id.to_string());
        if forward {
            self.offer_answer.reset_to_offer_received();
        }
        self.relay_only = true;
        true
    }

    fn on_initial_1xx(&mut self, sender: LegId, mut reply: SipReply, forward: bool) {
        if reply.code == 100 {
            debug!(leg = %self.id, "Discarding 100 Trying");
            return;
        }
        if reply.to_tag.is_none() {
            if !self.profile.allow_1xx_without_to_tag {
                debug!(leg = %self.id, code = reply.code, "Provisional reply without to-tag dropped");
                return;
            }
            reply.to_tag = Some(self.id.clone());
        }
        if self.status == CallStatus::NoReply {
            if self.select_candidate(&sender, forward) {
                self.update_status(CallStatus::Ringing, StatusChangeCause::SipReply(reply.clone()));
                if forward {
                    self.relay_reply_to_remote(reply);
                }
            }
        } else if self.is_selected(&sender) {
            if forward {
                self.relay_reply_to_remote(reply);
            }
        } else {
            debug!(leg = %self.id, %sender, code = reply.code, "Provisional reply from other candidate ignored");
        }
    }

    fn on_initial_2xx(&mut self, sender: LegId, reply: SipReply, forward: bool) {
        if self.status == CallStatus::Ringing && !self.is_selected(&sender) {
            debug!(leg = %self.id, %sender, "2xx from unselected candidate discarded");
            if self.candidates.remove(&sender) {
                self.post_terminate(&sender);
            }
            return;
        }
        if !self.select_candidate(&sender, forward) {
            debug!(leg = %self.id, %sender, "2xx from unknown leg ignored");
            return;
        }
        for id in self.candidates.take_others(&sender) {
            self.post_terminate(&id);
        }
        self.candidates.clear();
        self.tracked = None;
        self.peer_id = Some(sender);
        self.hooks.on_call_connected(&self.id, Some(&reply));

        if !forward {
            let mut request = SipRequest::new(Method::Invite, 0);
            request.body = reply.sdp().map(str::to_string);
            self.send_or_queue(PendingReinvite::establishing(request));
            if self.terminated {
                return;
            }
        } else if !self.relay_reply_to_remote(reply.clone()) {
            return;
        }
        self.update_status(CallStatus::Connected, StatusChangeCause::SipReply(reply));
    }

    fn on_initial_error(&mut self, sender: LegId, reply: SipReply, forward: bool) {
        if self.status == CallStatus::Ringing && !self.is_selected(&sender) {
            self.candidates.remove(&sender);
            debug!(leg = %self.id, %sender, code = reply.code, "Dropping error reply from other candidate");
            self.add_refused_candidates(&sender, &reply);
            return;
        }
        info!(leg = %self.id, %sender, code = reply.code, remaining = self.candidates.len().saturating_sub(1), "Candidate refused call");
        self.candidates.remove(&sender);
        if self.tracked.as_deref() == Some(sender.as_str()) {
            self.tracked = None;
        }
        self.update_status(CallStatus::NoReply, StatusChangeCause::SipReply(reply.clone()));
        self.relay_only = false;
        self.add_refused_candidates(&sender, &reply);
        if !self.candidates.is_empty() {
            return;
        }

        self.hooks
            .on_call_failed(&self.id, CallFailureReason::CallRefused, Some(&reply));
        if forward {
            self.relay_reply_to_remote(reply.clone());
        }
        self.update_status(CallStatus::Disconnected, StatusChangeCause::SipReply(reply.clone()));
        self.stop_call(StatusChangeCause::SipReply(reply));
    }

    fn add_refused_candidates(&mut self, sender: &str, reply: &SipReply) {
        for candidate in self.hooks.on_candidate_refused(&self.id, sender, reply) {
            if let Err(e) = self.add_candidate(candidate) {
                warn!(leg = %self.id, "Fork candidate not added: {}", e);
            }
        }
    }

    /// Answers a pending request from this leg's remote with a reply
    /// relayed by the peer. Returns false if the leg was torn down.
    pub(crate) fn relay_reply_to_remote(&mut self, mut reply: SipReply) -> bool {
        let Some(request) = self.received_requests.get(&reply.cseq).cloned() else {
            debug!(leg = %self.id, cseq = reply.cseq, code = reply.code, "No pending request for relayed reply");
            return true;
        };
        if self.role == LegRole::A && self.profile.suppress_early_media && (180..190).contains(&reply.code) {
            debug!(leg = %self.id, code = reply.code, "Converting early media to 180 Ringing");
            reply.code = 180;
            reply.reason = "Ringing".to_string();
            reply.body = None;
        }
        let is_invite = reply.cseq_method == Method::Invite;

        let body = if reply.code >= 300 {
            if is_invite
                && self.offer_answer.state() == NegotiationState::RemoteOfferReceived
                && self.offer_answer.cseq() == reply.cseq
            {
                self.offer_answer.on_offer_rejected();
                self.offer_rejected();
            }
            None
        } else if carries_sdp(&reply.cseq_method) {
            match self.outgoing_body(reply.cseq, reply.sdp(), reply.is_success()) {
                Ok(body) => body,
                Err(e) => {
                    warn!(leg = %self.id, code = reply.code, "Relayed answer rejected: {}", e);
                    self.received_requests.remove(&reply.cseq);
                    self.reply_to(&request, e.response_code(), e.reason(), None);
                    if is_invite && reply.cseq == self.est_invite_cseq {
                        self.initial_invite = None;
                    }
                    self.stop_call(StatusChangeCause::InternalError);
                    return false;
                }
            }
        } else {
            reply.body.clone()
        };

        let mut headers = reply.headers.clone();
        if reply.is_redirect_with_contact() {
            if let Some(contact) = reply.contact.as_deref() {
                headers.push(rsip::Header::Contact(rsip::headers::Contact::new(contact)));
            }
        }
        if let Err(e) = self
            .dialog
            .reply(&request, reply.code, &reply.reason, &headers, body.as_deref())
        {
            warn!(leg = %self.id, code = reply.code, "Failed to relay reply: {}", e);
            self.received_requests.remove(&reply.cseq);
            self.stop_call(StatusChangeCause::InternalError);
            return false;
        }
        if reply.is_final() {
            self.received_requests.remove(&reply.cseq);
            if is_invite && reply.is_success() && reply.cseq == self.est_invite_cseq {
                self.confirmed = true;
            }
        }
        true
    }

    pub(crate) fn send_or_queue(&mut self, pending: PendingReinvite) {
        if self.reinvites.is_busy() {
            debug!(leg = %self.id, "INVITE pending, queueing re-INVITE");
            self.reinvites.push(pending);
        } else {
            self.reinvite(pending);
        }
    }

    /// Sends a re-INVITE now. Returns false if it could not be sent.
    pub(crate) fn reinvite(&mut self, pending: PendingReinvite) -> bool {
        let cseq = self.dialog.cseq();
        let body = if let Some(hold) = pending.local_hold {
            self.hold_state = hold;
            pending.request.sdp().map(|body| self.local_offer_body(body))
        } else {
            match self.outgoing_body(cseq, pending.request.sdp(), false) {
                Ok(body) => body,
                Err(e) => {
                    warn!(leg = %self.id, "re-INVITE offer rejected: {}", e);
                    match pending.peer_cseq.filter(|_| pending.relayed) {
                        Some(peer_cseq) => {
                            self.relay_error(peer_cseq, Method::Invite, e.response_code(), e.reason())
                        }
                        None if pending.establishing => {
                            self.stop_call(StatusChangeCause::InternalError)
                        }
                        None => {}
                    }
                    self.dispatch_queued();
                    return false;
                }
            }
        };
        match self
            .dialog
            .send_request(Method::Invite, &pending.request.headers, body.as_deref())
        {
            Ok(sent) => {
                self.reinvites.mark_sent(sent);
                if pending.local_hold.is_some() {
                    if let Some(body) = body.as_deref() {
                        self.offer_answer.on_offer_sent(sent, body);
                    }
                }
                if let Some(peer_cseq) = pending.peer_cseq.filter(|_| pending.relayed) {
                    self.relayed_requests.insert(sent, peer_cseq);
                }
                if pending.establishing {
                    self.est_invite_cseq = sent;
                }
                debug!(leg = %self.id, cseq = sent, relayed = pending.relayed, "re-INVITE sent");
                true
            }
            Err(e) => {
                warn!(leg = %self.id, "re-INVITE failed: {}", e);
                self.offer_answer.on_offer_rejected();
                if pending.local_hold.is_some() {
                    self.offer_rejected();
                    return false;
                }
                if let Some(peer_cseq) = pending.peer_cseq.filter(|_| pending.relayed) {
                    self.relay_error(peer_cseq, Method::Invite, 500, "Server Internal Error");
                }
                self.stop_call(StatusChangeCause::InternalError);
                false
            }
        }
    }

    /// The ACK for an INVITE this leg sent went out; the next queued
    /// re-INVITE may go.
    pub(crate) fn on_ack_processed(&mut self, cseq: u32) {
        self.reinvites.mark_completed(cseq);
        self.dispatch_queued();
    }

    fn dispatch_queued(&mut self) {
        if self.terminated {
            return;
        }
        if let Some(next) = self.reinvites.next_ready() {
            debug!(leg = %self.id, remaining = self.reinvites.len(), "Dispatching queued re-INVITE");
            self.reinvite(next);
        }
    }
}
