use super::candidates::Candidate;
use super::dialog::DialogTransport;
use super::event::{EventBus, EventBusRef, LegEvent};
use super::hooks::CallLegHooks;
use super::media_session::MediaSession;
use super::message::{SipReply, SipRequest};
use super::session::CallLeg;
use super::state::{CallFailureReason, CallStatus, LegId, LegRole, StatusChangeCause};
use super::CallLegBuilder;
use crate::config::{Config, LegProfile};
use crate::media::codec_groups::CodecGroupsRef;
use crate::media::sdp::{Connection, SessionMedia};
use anyhow::{anyhow, Result};
use rsip::Method;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

pub(crate) const OFFER: &str = "v=0\r\n\
o=alice 100 100 IN IP4 192.0.2.10\r\n\
s=-\r\n\
c=IN IP4 192.0.2.10\r\n\
t=0 0\r\n\
m=audio 49170 RTP/AVP 0 8 101\r\n\
a=rtpmap:101 telephone-event/8000\r\n\
a=fmtp:101 0-15\r\n\
a=sendrecv\r\n";

pub(crate) const ANSWER: &str = "v=0\r\n\
o=bob 200 200 IN IP4 192.0.2.20\r\n\
s=-\r\n\
c=IN IP4 192.0.2.20\r\n\
t=0 0\r\n\
m=audio 30000 RTP/AVP 0 101\r\n\
a=rtpmap:101 telephone-event/8000\r\n\
a=fmtp:101 0-15\r\n\
a=sendrecv\r\n";

pub(crate) const HOLD_OFFER: &str = "v=0\r\n\
o=bob 200 201 IN IP4 192.0.2.20\r\n\
s=-\r\n\
c=IN IP4 192.0.2.20\r\n\
t=0 0\r\n\
m=audio 30000 RTP/AVP 0 101\r\n\
a=rtpmap:101 telephone-event/8000\r\n\
a=sendonly\r\n";

pub(crate) const HOLD_ANSWER: &str = "v=0\r\n\
o=alice 100 101 IN IP4 192.0.2.10\r\n\
s=-\r\n\
c=IN IP4 192.0.2.10\r\n\
t=0 0\r\n\
m=audio 49170 RTP/AVP 0 101\r\n\
a=rtpmap:101 telephone-event/8000\r\n\
a=recvonly\r\n";

pub(crate) const RELAY_ADDR: &str = "203.0.113.5";

#[derive(Debug, Clone)]
pub(crate) struct SentReply {
    pub code: u16,
    pub cseq: u32,
    pub method: Method,
    pub headers: rsip::Headers,
    pub body: Option<String>,
}

impl SentReply {
    pub fn has_contact(&self) -> bool {
        self.headers
            .iter()
            .any(|h| matches!(h, rsip::Header::Contact(_)))
    }
}

#[derive(Debug, Default)]
pub(crate) struct DialogLog {
    pub next_cseq: u32,
    pub requests: Vec<(Method, u32, Option<String>)>,
    pub acks: Vec<(u32, Option<String>)>,
    pub replies: Vec<SentReply>,
    pub canceled: bool,
    pub terminated: bool,
    pub fail_requests: bool,
}

/// Dialog double that records everything the leg sends.
#[derive(Clone)]
pub(crate) struct MockDialog {
    log: Arc<Mutex<DialogLog>>,
}

impl MockDialog {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(DialogLog {
                next_cseq: 10,
                ..Default::default()
            })),
        }
    }

    pub fn log(&self) -> MutexGuard<'_, DialogLog> {
        self.log.lock().unwrap()
    }

    pub fn reply_codes(&self) -> Vec<u16> {
        self.log().replies.iter().map(|r| r.code).collect()
    }

    pub fn last_reply(&self) -> Option<SentReply> {
        self.log().replies.last().cloned()
    }

    pub fn request_count(&self) -> usize {
        self.log().requests.len()
    }

    pub fn last_request_body(&self) -> Option<String> {
        self.log().requests.last().and_then(|(_, _, body)| body.clone())
    }

    pub fn set_fail_requests(&self, fail: bool) {
        self.log().fail_requests = fail;
    }
}

impl DialogTransport for MockDialog {
    fn send_request(
        &mut self,
        method: Method,
        _headers: &rsip::Headers,
        body: Option<&str>,
    ) -> Result<u32> {
        let mut log = self.log();
        if log.fail_requests {
            return Err(anyhow!("transport unavailable"));
        }
        let cseq = log.next_cseq;
        log.next_cseq += 1;
        log.requests.push((method, cseq, body.map(str::to_string)));
        Ok(cseq)
    }

    fn send_ack(&mut self, cseq: u32, body: Option<&str>) -> Result<()> {
        self.log().acks.push((cseq, body.map(str::to_string)));
        Ok(())
    }

    fn reply(
        &mut self,
        request: &SipRequest,
        code: u16,
        _reason: &str,
        headers: &rsip::Headers,
        body: Option<&str>,
    ) -> Result<()> {
        self.log().replies.push(SentReply {
            code,
            cseq: request.cseq,
            method: request.method.clone(),
            headers: headers.clone(),
            body: body.map(str::to_string),
        });
        Ok(())
    }

    fn cancel(&mut self) -> Result<()> {
        self.log().canceled = true;
        Ok(())
    }

    fn terminate(&mut self) -> Result<()> {
        self.log().terminated = true;
        Ok(())
    }

    fn cseq(&self) -> u32 {
        self.log().next_cseq
    }
}

#[derive(Default)]
pub(crate) struct MockMedia {
    events: Mutex<Vec<String>>,
    local: Mutex<Option<SessionMedia>>,
}

impl MockMedia {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn set_local_description(&self, sdp: SessionMedia) {
        *self.local.lock().unwrap() = Some(sdp);
    }
}

impl MediaSession for MockMedia {
    fn attach(&self, role: LegRole, leg_id: &str) {
        self.events
            .lock()
            .unwrap()
            .push(format!("attach {:?} {}", role, leg_id));
    }

    fn detach(&self, role: LegRole, leg_id: &str) {
        self.events
            .lock()
            .unwrap()
            .push(format!("detach {:?} {}", role, leg_id));
    }

    fn mute(&self, role: LegRole) {
        self.events.lock().unwrap().push(format!("mute {:?}", role));
    }

    fn unmute(&self, role: LegRole) {
        self.events.lock().unwrap().push(format!("unmute {:?}", role));
    }

    fn has_local_description(&self, _role: LegRole) -> bool {
        self.local.lock().unwrap().is_some()
    }

    fn local_description(&self, _role: LegRole) -> Option<SessionMedia> {
        self.local.lock().unwrap().clone()
    }

    fn replace_offer(&self, sdp: &mut SessionMedia, _role: LegRole) {
        sdp.connection = Some(Connection::ip4(RELAY_ADDR));
        for m in sdp.media.iter_mut() {
            m.connection = None;
        }
    }
}

#[derive(Default)]
pub(crate) struct RecordingHooks {
    events: Mutex<Vec<String>>,
    forks: Mutex<Vec<Candidate>>,
}

impl RecordingHooks {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn has(&self, event: &str) -> bool {
        self.events.lock().unwrap().iter().any(|e| e == event)
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    /// Candidates returned from the next refusal.
    pub fn fork_on_refusal(&self, candidate: Candidate) {
        self.forks.lock().unwrap().push(candidate);
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl CallLegHooks for RecordingHooks {
    fn on_status_change(
        &self,
        leg_id: &str,
        old: CallStatus,
        new: CallStatus,
        cause: &StatusChangeCause,
    ) {
        self.record(format!("status {} {}->{} ({})", leg_id, old, new, cause));
    }

    fn on_call_connected(&self, leg_id: &str, _reply: Option<&SipReply>) {
        self.record(format!("connected {}", leg_id));
    }

    fn on_call_failed(&self, leg_id: &str, reason: CallFailureReason, _reply: Option<&SipReply>) {
        self.record(format!("failed {} {:?}", leg_id, reason));
    }

    fn on_candidate_refused(&self, leg_id: &str, candidate: &str, reply: &SipReply) -> Vec<Candidate> {
        self.record(format!("refused {} {} {}", leg_id, candidate, reply.code));
        std::mem::take(&mut *self.forks.lock().unwrap())
    }

    fn on_connected_error(&self, leg_id: &str, reply: &SipReply) {
        self.record(format!("connected_error {} {}", leg_id, reply.code));
    }

    fn on_sdp_completed(&self, leg_id: &str, _local: &str, _remote: &str) {
        self.record(format!("sdp_completed {}", leg_id));
    }

    fn on_hold_requested(&self, leg_id: &str) {
        self.record(format!("hold_requested {}", leg_id));
    }

    fn on_hold_accepted(&self, leg_id: &str) {
        self.record(format!("hold_accepted {}", leg_id));
    }

    fn on_hold_rejected(&self, leg_id: &str) {
        self.record(format!("hold_rejected {}", leg_id));
    }

    fn on_resume_requested(&self, leg_id: &str) {
        self.record(format!("resume_requested {}", leg_id));
    }

    fn on_resume_accepted(&self, leg_id: &str) {
        self.record(format!("resume_accepted {}", leg_id));
    }

    fn on_resume_rejected(&self, leg_id: &str) {
        self.record(format!("resume_rejected {}", leg_id));
    }
}

/// In-memory bus: events are queued and delivered by [`Bridge::run`].
#[derive(Default)]
pub(crate) struct QueueBus {
    registered: Mutex<HashSet<LegId>>,
    queue: Mutex<VecDeque<(LegId, LegEvent)>>,
    posted: Mutex<Vec<(LegId, &'static str)>>,
}

impl QueueBus {
    pub fn register(&self, leg_id: &str) {
        self.registered.lock().unwrap().insert(leg_id.to_string());
    }

    pub fn posted(&self, target: &str, name: &str) -> usize {
        self.posted
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, n)| t == target && *n == name)
            .count()
    }

    fn pop(&self) -> Option<(LegId, LegEvent)> {
        self.queue.lock().unwrap().pop_front()
    }
}

impl EventBus for QueueBus {
    fn post(&self, target: &str, event: LegEvent) -> bool {
        self.posted
            .lock()
            .unwrap()
            .push((target.to_string(), event.name()));
        if !self.registered.lock().unwrap().contains(target) {
            return false;
        }
        self.queue
            .lock()
            .unwrap()
            .push_back((target.to_string(), event));
        true
    }

    fn unregister(&self, leg_id: &str) {
        self.registered.lock().unwrap().remove(leg_id);
    }
}

fn reason(code: u16) -> &'static str {
    match code {
        100 => "Trying",
        180 => "Ringing",
        183 => "Session Progress",
        200 => "OK",
        302 => "Moved Temporarily",
        404 => "Not Found",
        408 => "Request Timeout",
        481 => "Call/Transaction Does Not Exist",
        486 => "Busy Here",
        488 => "Not Acceptable Here",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// A set of legs sharing one queue bus, driven synchronously.
pub(crate) struct Bridge {
    pub bus: Arc<QueueBus>,
    pub hooks: Arc<RecordingHooks>,
    pub codecs: CodecGroupsRef,
    legs: HashMap<LegId, CallLeg>,
    dialogs: HashMap<LegId, MockDialog>,
}

impl Bridge {
    pub fn new() -> Self {
        Self {
            bus: Arc::new(QueueBus::default()),
            hooks: Arc::new(RecordingHooks::default()),
            codecs: Arc::new(Config::default().codec_groups()),
            legs: HashMap::new(),
            dialogs: HashMap::new(),
        }
    }

    pub fn add_leg(&mut self, id: &str, role: LegRole) {
        self.add_leg_with(id, role, LegProfile::default());
    }

    pub fn add_leg_with(&mut self, id: &str, role: LegRole, profile: LegProfile) {
        let dialog = MockDialog::new();
        let bus: EventBusRef = self.bus.clone();
        let leg = CallLegBuilder::new(role)
            .with_id(id)
            .with_profile(profile)
            .with_codec_groups(self.codecs.clone())
            .with_hooks(self.hooks.clone())
            .build(Box::new(dialog.clone()), bus)
            .expect("build leg");
        self.bus.register(id);
        self.legs.insert(id.to_string(), leg);
        self.dialogs.insert(id.to_string(), dialog);
    }

    pub fn leg(&self, id: &str) -> &CallLeg {
        self.legs.get(id).expect("leg")
    }

    pub fn leg_mut(&mut self, id: &str) -> &mut CallLeg {
        self.legs.get_mut(id).expect("leg")
    }

    pub fn dialog(&self, id: &str) -> MockDialog {
        self.dialogs.get(id).expect("dialog").clone()
    }

    /// Delivers an event to `id` and everything it causes.
    pub fn send(&mut self, id: &str, event: LegEvent) {
        self.deliver(id.to_string(), event);
        self.run();
    }

    /// Runs `f` on a leg, then delivers whatever it posted.
    pub fn with_leg<R>(&mut self, id: &str, f: impl FnOnce(&mut CallLeg) -> R) -> R {
        let result = f(self.leg_mut(id));
        if self.leg(id).is_terminated() {
            self.bus.unregister(id);
        }
        self.run();
        result
    }

    pub fn run(&mut self) {
        while let Some((target, event)) = self.bus.pop() {
            self.deliver(target, event);
        }
    }

    fn deliver(&mut self, target: LegId, event: LegEvent) {
        if let Some(leg) = self.legs.get_mut(&target) {
            if !leg.handle_event(event) {
                self.bus.unregister(&target);
            }
        }
    }

    pub fn request(&mut self, id: &str, method: Method, cseq: u32, body: Option<&str>) {
        let mut request = SipRequest::new(method, cseq);
        request.body = body.map(str::to_string);
        self.send(id, LegEvent::Request(request));
    }

    pub fn invite(&mut self, id: &str, cseq: u32, body: Option<&str>) {
        self.request(id, Method::Invite, cseq, body);
    }

    pub fn ack(&mut self, id: &str, cseq: u32) {
        self.request(id, Method::Ack, cseq, None);
    }

    pub fn reply(&mut self, id: &str, code: u16, cseq: u32, body: Option<&str>) {
        let mut reply = SipReply::new(code, reason(code), cseq, Method::Invite);
        if code > 100 {
            reply.to_tag = Some(format!("tag-{}", id));
        }
        reply.body = body.map(str::to_string);
        self.send(id, LegEvent::Reply(reply));
    }

    pub fn send_reply(&mut self, id: &str, reply: SipReply) {
        self.send(id, LegEvent::Reply(reply));
    }

    /// Caller leg `a` receives the initial INVITE and forks to `callees`.
    pub fn call(&mut self, callees: &[&str]) {
        self.add_leg("a", LegRole::A);
        for id in callees {
            self.add_leg(id, LegRole::B);
        }
        self.invite("a", 1, Some(OFFER));
        for id in callees {
            self.send("a", LegEvent::AddCandidate(Candidate::new(*id)));
        }
    }

    /// `a` bridged to `b1`, INVITE answered and ACKed end to end.
    pub fn connected() -> Self {
        let mut bridge = Self::new();
        bridge.call(&["b1"]);
        bridge.reply("b1", 180, 10, None);
        bridge.reply("b1", 200, 10, Some(ANSWER));
        bridge.ack("a", 1);
        bridge
    }
}
