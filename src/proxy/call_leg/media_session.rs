use super::state::{LegId, LegRole};
use crate::media::sdp::SessionMedia;
use std::sync::Arc;

/// Media relay shared by both legs of a bridged call.
pub trait MediaSession: Send + Sync {
    fn attach(&self, role: LegRole, leg_id: &str);
    fn detach(&self, role: LegRole, leg_id: &str);
    fn mute(&self, role: LegRole);
    fn unmute(&self, role: LegRole);
    fn has_local_description(&self, role: LegRole) -> bool;
    /// Last description the relay sent out on `role`.
    fn local_description(&self, role: LegRole) -> Option<SessionMedia>;
    /// Rewrites connection and ports of an offer leaving on `role` so media
    /// flows through the relay.
    fn replace_offer(&self, sdp: &mut SessionMedia, role: LegRole);
}

pub type SharedMediaSession = Arc<dyn MediaSession>;

pub(crate) fn release(media: &mut Option<SharedMediaSession>, role: LegRole, leg_id: &LegId) {
    if let Some(media) = media.take() {
        media.detach(role, leg_id);
    }
}
