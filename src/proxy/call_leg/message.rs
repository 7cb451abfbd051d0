use rsip::Method;

/// An in-dialog or dialog-creating request, reduced to what the leg logic
/// reads. Headers other than CSeq and body are carried opaquely.
#[derive(Debug, Clone)]
pub struct SipRequest {
    pub method: Method,
    pub cseq: u32,
    pub headers: rsip::Headers,
    pub body: Option<String>,
}

impl SipRequest {
    pub fn new(method: Method, cseq: u32) -> Self {
        Self {
            method,
            cseq,
            headers: rsip::Headers::default(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn sdp(&self) -> Option<&str> {
        if !carries_sdp(&self.method) {
            return None;
        }
        self.body.as_deref().filter(|b| !b.trim().is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct SipReply {
    pub code: u16,
    pub reason: String,
    pub cseq: u32,
    pub cseq_method: Method,
    pub to_tag: Option<String>,
    pub contact: Option<String>,
    pub headers: rsip::Headers,
    pub body: Option<String>,
}

impl SipReply {
    pub fn new(code: u16, reason: impl Into<String>, cseq: u32, cseq_method: Method) -> Self {
        Self {
            code,
            reason: reason.into(),
            cseq,
            cseq_method,
            to_tag: None,
            contact: None,
            headers: rsip::Headers::default(),
            body: None,
        }
    }

    pub fn with_to_tag(mut self, tag: impl Into<String>) -> Self {
        self.to_tag = Some(tag.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_contact(mut self, contact: impl Into<String>) -> Self {
        self.contact = Some(contact.into());
        self
    }

    pub fn is_provisional(&self) -> bool {
        self.code < 200
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn is_final(&self) -> bool {
        self.code >= 200
    }

    pub fn is_redirect_with_contact(&self) -> bool {
        (300..=305).contains(&self.code) && self.contact.is_some()
    }

    pub fn sdp(&self) -> Option<&str> {
        if !carries_sdp(&self.cseq_method) {
            return None;
        }
        self.body.as_deref().filter(|b| !b.trim().is_empty())
    }
}

/// Methods whose bodies take part in offer/answer.
pub fn carries_sdp(method: &Method) -> bool {
    matches!(
        method,
        Method::Invite | Method::Update | Method::PRack | Method::Ack
    )
}
