use super::message::SipRequest;
use anyhow::Result;
use rsip::Method;

/// The SIP dialog a leg drives. Implementations own transactions, routing
/// and CSeq bookkeeping; the leg only sees CSeq numbers and bodies.
pub trait DialogTransport: Send {
    /// Sends an in-dialog (or the dialog-creating) request and returns the
    /// CSeq it was sent with.
    fn send_request(
        &mut self,
        method: Method,
        headers: &rsip::Headers,
        body: Option<&str>,
    ) -> Result<u32>;

    fn send_ack(&mut self, cseq: u32, body: Option<&str>) -> Result<()>;

    fn reply(
        &mut self,
        request: &SipRequest,
        code: u16,
        reason: &str,
        headers: &rsip::Headers,
        body: Option<&str>,
    ) -> Result<()>;

    /// Cancels the pending dialog-creating INVITE.
    fn cancel(&mut self) -> Result<()>;

    /// Ends the dialog, sending BYE when it is confirmed.
    fn terminate(&mut self) -> Result<()>;

    /// The next local CSeq.
    fn cseq(&self) -> u32;
}
