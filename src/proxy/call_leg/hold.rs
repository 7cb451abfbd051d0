use super::media_session::release;
use super::message::SipRequest;
use super::reinvite::PendingReinvite;
use super::session::CallLeg;
use super::state::{CallStatus, HoldState, StatusChangeCause};
use super::LegError;
use crate::media::sdp::SessionMedia;
use rsip::Method;
use tracing::{debug, info, warn};

impl CallLeg {
    /// Puts this leg's remote on hold with a locally generated re-INVITE.
    /// The leg enters HoldRequested once the request is actually sent.
    pub fn put_on_hold(&mut self) {
        if self.on_hold {
            return;
        }
        info!(leg = %self.id, "Putting remote on hold");
        self.hooks.on_hold_requested(&self.id);

        let mut sdp = self
            .saved_non_hold_media
            .clone()
            .filter(|s| !s.media.is_empty())
            .unwrap_or_else(SessionMedia::fake_hold);
        if let Some(media) = &self.media {
            media.replace_offer(&mut sdp, self.role);
        }
        self.alter_hold_request(&mut sdp);
        let request = SipRequest::new(Method::Invite, 0).with_body(sdp.to_sdp_string());
        self.send_or_queue(PendingReinvite::hold(request));
    }

    /// Offers the description saved before the hold again.
    pub fn resume_held(&mut self) -> Result<(), LegError> {
        if !self.on_hold {
            return Ok(());
        }
        info!(leg = %self.id, "Resuming held remote");
        self.hooks.on_resume_requested(&self.id);

        let Some(mut sdp) = self
            .saved_non_hold_media
            .clone()
            .filter(|s| !s.media.is_empty())
        else {
            warn!(leg = %self.id, "No stored non-hold description, can't resume");
            self.hold_state = HoldState::ResumeRequested;
            self.offer_rejected();
            return Err(LegError::NoResumeDescription);
        };
        if let Some(media) = &self.media {
            media.replace_offer(&mut sdp, self.role);
        }
        let request = SipRequest::new(Method::Invite, 0).with_body(sdp.to_sdp_string());
        self.send_or_queue(PendingReinvite::resume(request));
        Ok(())
    }

    /// Final body of a local hold or resume offer: origin version one above
    /// whatever was last sent on this dialog.
    pub(crate) fn local_offer_body(&self, body: &str) -> String {
        let mut sdp = match SessionMedia::parse(body) {
            Ok(sdp) => sdp,
            Err(e) => {
                warn!(leg = %self.id, "Local offer not versioned: {}", e);
                return body.to_string();
            }
        };
        let last = self
            .offer_answer
            .local()
            .and_then(|local| SessionMedia::parse(local).ok())
            .map(|local| local.origin_version());
        if let Some(last) = last {
            if last > sdp.origin_version() {
                sdp.set_origin_version(last);
            }
        }
        sdp.bump_version();
        sdp.to_sdp_string()
    }

    /// Rewrites a hold offer per the leg's hold settings.
    pub(crate) fn alter_hold_request(&self, sdp: &mut SessionMedia) {
        let settings = self.profile.hold;
        let (send, recv) = settings.activity.flags();
        for m in sdp.media.iter_mut().filter(|m| m.is_active()) {
            m.set_direction(send, recv);
        }
        if settings.mark_zero_connection {
            sdp.zero_connections();
        }
    }

    /// Classifies an offer relayed from the peer as hold or resume.
    pub(crate) fn adjust_offer(&mut self, sdp: &mut SessionMedia) {
        if self.hold_state != HoldState::PreserveHoldStatus {
            // Local hold and resume offers are already in final form.
            return;
        }
        if sdp.is_hold_request() {
            debug!(leg = %self.id, "B2B hold request");
            self.hooks.on_hold_requested(&self.id);
            if self.profile.hold.alter_b2b {
                self.alter_hold_request(sdp);
            }
            self.hold_state = HoldState::HoldRequested;
        } else if self.on_hold {
            debug!(leg = %self.id, "B2B resume request");
            self.hooks.on_resume_requested(&self.id);
            self.hold_state = HoldState::ResumeRequested;
        }
    }

    /// An offer/answer exchange on this leg's dialog completed.
    pub(crate) fn on_sdp_completed(&mut self, local: &str, remote: &str) {
        self.hooks.on_sdp_completed(&self.id, local, remote);
        match self.hold_state {
            HoldState::HoldRequested => self.hold_accepted(),
            HoldState::ResumeRequested => self.resume_accepted(),
            HoldState::PreserveHoldStatus => {
                if self.on_hold {
                    return;
                }
                let parsed = SessionMedia::parse(local);
                let remote_hold = SessionMedia::parse(remote)
                    .map(|r| r.is_hold_request())
                    .unwrap_or(false);
                match parsed {
                    Ok(sdp) if !remote_hold && !sdp.is_hold_request() && !sdp.media.is_empty() => {
                        self.saved_non_hold_media = Some(sdp);
                    }
                    Ok(_) => {}
                    Err(e) => debug!(leg = %self.id, "Completed description not stored: {}", e),
                }
            }
        }
    }

    /// The pending offer failed on this leg's dialog.
    pub(crate) fn offer_rejected(&mut self) {
        match self.hold_state {
            HoldState::HoldRequested => self.hold_rejected(),
            HoldState::ResumeRequested => self.resume_rejected(),
            HoldState::PreserveHoldStatus => {}
        }
    }

    fn hold_accepted(&mut self) {
        info!(leg = %self.id, "Hold accepted");
        self.on_hold = true;
        self.hold_state = HoldState::PreserveHoldStatus;
        if let Some(media) = &self.media {
            media.mute(self.role.complement());
        }
        self.hooks.on_hold_accepted(&self.id);
        self.finish_disconnecting("hold accepted");
    }

    fn hold_rejected(&mut self) {
        info!(leg = %self.id, "Hold rejected");
        self.hold_state = HoldState::PreserveHoldStatus;
        self.hooks.on_hold_rejected(&self.id);
        self.finish_disconnecting("hold rejected");
    }

    fn resume_accepted(&mut self) {
        info!(leg = %self.id, "Resume accepted");
        self.on_hold = false;
        self.hold_state = HoldState::PreserveHoldStatus;
        if let Some(media) = &self.media {
            media.unmute(self.role.complement());
        }
        self.hooks.on_resume_accepted(&self.id);
    }

    fn resume_rejected(&mut self) {
        info!(leg = %self.id, "Resume rejected");
        self.hold_state = HoldState::PreserveHoldStatus;
        self.hooks.on_resume_rejected(&self.id);
    }

    fn finish_disconnecting(&mut self, reason: &str) {
        if self.status == CallStatus::Disconnecting {
            self.update_status(CallStatus::Disconnected, StatusChangeCause::other(reason));
        }
    }

    /// Detaches this leg from its peer and candidates. With `hold_remote`
    /// the remote is put on hold first and the leg passes through
    /// Disconnecting until the hold completes.
    pub fn disconnect(&mut self, hold_remote: bool) {
        info!(leg = %self.id, hold_remote, "Disconnecting leg from peer");
        for id in self.candidates.clear() {
            self.post_terminate(&id);
        }
        self.tracked = None;
        if let Some(peer) = self.peer_id.take() {
            self.post_terminate(&peer);
        }
        self.relay_only = false;

        if hold_remote && !self.on_hold {
            self.update_status(CallStatus::Disconnecting, StatusChangeCause::other("disconnect"));
            self.put_on_hold();
        } else {
            self.update_status(CallStatus::Disconnected, StatusChangeCause::other("disconnect"));
        }
        release(&mut self.media, self.role, &self.id);
    }
}
