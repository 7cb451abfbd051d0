use super::candidates::Candidate;
use super::message::SipReply;
use super::state::{CallFailureReason, CallStatus, StatusChangeCause};
use std::sync::Arc;

/// Extension points for the application embedding the legs. Every method has
/// a no-op default.
pub trait CallLegHooks: Send + Sync {
    fn on_status_change(
        &self,
        _leg_id: &str,
        _old: CallStatus,
        _new: CallStatus,
        _cause: &StatusChangeCause,
    ) {
    }

    fn on_call_connected(&self, _leg_id: &str, _reply: Option<&SipReply>) {}

    fn on_call_failed(&self, _leg_id: &str, _reason: CallFailureReason, _reply: Option<&SipReply>) {}

    /// Called when a candidate refuses the call. Returned candidates are
    /// added to the leg, which allows serial forking.
    fn on_candidate_refused(
        &self,
        _leg_id: &str,
        _candidate: &str,
        _reply: &SipReply,
    ) -> Vec<Candidate> {
        Vec::new()
    }

    /// A final error reply to the initial INVITE arrived after the call was
    /// already connected.
    fn on_connected_error(&self, _leg_id: &str, _reply: &SipReply) {}

    fn on_sdp_completed(&self, _leg_id: &str, _local: &str, _remote: &str) {}

    fn on_hold_requested(&self, _leg_id: &str) {}
    fn on_hold_accepted(&self, _leg_id: &str) {}
    fn on_hold_rejected(&self, _leg_id: &str) {}
    fn on_resume_requested(&self, _leg_id: &str) {}
    fn on_resume_accepted(&self, _leg_id: &str) {}
    fn on_resume_rejected(&self, _leg_id: &str) {}
}

pub struct NoopHooks;

impl CallLegHooks for NoopHooks {}

pub type CallLegHooksRef = Arc<dyn CallLegHooks>;
