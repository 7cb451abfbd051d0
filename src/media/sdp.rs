use super::negotiate::NegotiationError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;
use webrtc::sdp::description::common::{Address, Attribute, ConnectionInformation};
use webrtc::sdp::description::media::{MediaDescription, MediaName, RangedPort};
use webrtc::sdp::SessionDescription;

pub const DYNAMIC_PAYLOAD_TYPE_START: u8 = 96;
pub const DYNAMIC_PAYLOAD_TYPE_END: u8 = 127;
pub const TELEPHONE_EVENT: &str = "telephone-event";
pub const DEFAULT_CLOCK_RATE: u32 = 8000;

/// Static payload types with a well-known encoding. Types below 20 are
/// matched by number as well as by name on plain RTP/AVP streams.
const STATIC_PAYLOADS: &[(u8, &str, u32, Option<u32>)] = &[
    (0, "PCMU", 8000, None),
    (3, "GSM", 8000, None),
    (4, "G723", 8000, None),
    (5, "DVI4", 8000, None),
    (6, "DVI4", 16000, None),
    (7, "LPC", 8000, None),
    (8, "PCMA", 8000, None),
    (9, "G722", 8000, None),
    (10, "L16", 44100, Some(2)),
    (11, "L16", 44100, Some(1)),
    (12, "QCELP", 8000, None),
    (13, "CN", 8000, None),
    (14, "MPA", 90000, None),
    (15, "G728", 8000, None),
    (16, "DVI4", 11025, None),
    (17, "DVI4", 22050, None),
    (18, "G729", 8000, None),
];

const STATIC_MATCH_LIMIT: u8 = 20;

pub fn static_payload(payload_type: u8) -> Option<SdpPayload> {
    STATIC_PAYLOADS
        .iter()
        .find(|(pt, ..)| *pt == payload_type)
        .map(|(pt, name, rate, param)| SdpPayload {
            payload_type: Some(*pt),
            encoding_name: name.to_string(),
            clock_rate: *rate,
            encoding_param: *param,
            format_params: String::new(),
        })
}

/// Looks up the static payload type registered for an encoding, if any.
pub fn static_payload_type(name: &str, clock_rate: u32, param: Option<u32>) -> Option<u8> {
    STATIC_PAYLOADS
        .iter()
        .find(|(_, n, rate, p)| {
            n.eq_ignore_ascii_case(name)
                && *rate == clock_rate
                && match (param, p) {
                    (Some(a), Some(b)) => a == *b,
                    _ => true,
                }
        })
        .map(|(pt, ..)| *pt)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Audio,
    Video,
    Application,
    Text,
    Message,
    Image,
    Other,
}

impl From<&str> for MediaType {
    fn from(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "audio" => MediaType::Audio,
            "video" => MediaType::Video,
            "application" => MediaType::Application,
            "text" => MediaType::Text,
            "message" => MediaType::Message,
            "image" => MediaType::Image,
            _ => MediaType::Other,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum TransportProfile {
    #[serde(rename = "RTP/AVP")]
    RtpAvp,
    #[serde(rename = "RTP/AVPF")]
    RtpAvpf,
    #[serde(rename = "RTP/SAVP")]
    RtpSavp,
    #[serde(rename = "RTP/SAVPF")]
    RtpSavpf,
    #[serde(rename = "UDP/TLS/RTP/SAVP")]
    UdpTlsRtpSavp,
    #[serde(rename = "UDP/TLS/RTP/SAVPF")]
    UdpTlsRtpSavpf,
    #[serde(rename = "udptl")]
    Udptl,
    #[serde(rename = "other")]
    Other,
}

impl TransportProfile {
    pub fn from_protos(protos: &[String]) -> Self {
        match protos.join("/").to_ascii_uppercase().as_str() {
            "RTP/AVP" => TransportProfile::RtpAvp,
            "RTP/AVPF" => TransportProfile::RtpAvpf,
            "RTP/SAVP" => TransportProfile::RtpSavp,
            "RTP/SAVPF" => TransportProfile::RtpSavpf,
            "UDP/TLS/RTP/SAVP" => TransportProfile::UdpTlsRtpSavp,
            "UDP/TLS/RTP/SAVPF" => TransportProfile::UdpTlsRtpSavpf,
            "UDPTL" | "UDP/UDPTL" => TransportProfile::Udptl,
            _ => TransportProfile::Other,
        }
    }

    pub fn is_rtp(&self) -> bool {
        !matches!(self, TransportProfile::Udptl | TransportProfile::Other)
    }
}

impl fmt::Display for TransportProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportProfile::RtpAvp => "RTP/AVP",
            TransportProfile::RtpAvpf => "RTP/AVPF",
            TransportProfile::RtpSavp => "RTP/SAVP",
            TransportProfile::RtpSavpf => "RTP/SAVPF",
            TransportProfile::UdpTlsRtpSavp => "UDP/TLS/RTP/SAVP",
            TransportProfile::UdpTlsRtpSavpf => "UDP/TLS/RTP/SAVPF",
            TransportProfile::Udptl => "udptl",
            TransportProfile::Other => "other",
        };
        write!(f, "{}", s)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum AddressType {
    IP4,
    IP6,
}

/// A connection line reduced to what the negotiator touches. The network
/// type is always `IN`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub address_type: AddressType,
    pub address: String,
}

impl Connection {
    pub fn ip4(address: impl Into<String>) -> Self {
        Self {
            address_type: AddressType::IP4,
            address: address.into(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.address == "0.0.0.0" || self.address == "::"
    }

    fn from_info(info: &ConnectionInformation) -> Option<Self> {
        let address = info.address.as_ref()?;
        let address_type = if info.address_type.eq_ignore_ascii_case("IP6") {
            AddressType::IP6
        } else {
            AddressType::IP4
        };
        Some(Self {
            address_type,
            address: address.address.clone(),
        })
    }

    fn to_info(&self) -> ConnectionInformation {
        ConnectionInformation {
            network_type: "IN".to_string(),
            address_type: match self.address_type {
                AddressType::IP4 => "IP4".to_string(),
                AddressType::IP6 => "IP6".to_string(),
            },
            address: Some(Address {
                address: self.address.clone(),
                ttl: None,
                range: None,
            }),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SdpPayload {
    /// `None` until a dynamic type has been assigned.
    pub payload_type: Option<u8>,
    pub encoding_name: String,
    /// Zero means unknown.
    pub clock_rate: u32,
    pub encoding_param: Option<u32>,
    pub format_params: String,
}

impl SdpPayload {
    pub fn new(payload_type: Option<u8>, name: &str, clock_rate: u32) -> Self {
        Self {
            payload_type,
            encoding_name: name.to_string(),
            clock_rate,
            encoding_param: None,
            format_params: String::new(),
        }
    }

    pub fn is_telephone_event(&self) -> bool {
        self.encoding_name.eq_ignore_ascii_case(TELEPHONE_EVENT)
    }

    pub fn is_dynamic(&self) -> bool {
        match self.payload_type {
            Some(pt) => pt >= DYNAMIC_PAYLOAD_TYPE_START,
            None => true,
        }
    }

    /// Whether `self`, a payload found in an SDP stream, satisfies `pattern`.
    ///
    /// On plain RTP/AVP a static pattern type also matches by number. Clock
    /// rate is compared when the candidate knows it, the encoding parameter
    /// only when both sides carry one.
    pub fn matches(&self, pattern: &SdpPayload, transport: TransportProfile) -> bool {
        let by_number = transport == TransportProfile::RtpAvp
            && matches!(pattern.payload_type, Some(pt) if pt < STATIC_MATCH_LIMIT)
            && self.payload_type == pattern.payload_type;
        if !by_number && !self.encoding_name.eq_ignore_ascii_case(&pattern.encoding_name) {
            return false;
        }
        if self.clock_rate > 0 && pattern.clock_rate > 0 && self.clock_rate != pattern.clock_rate {
            return false;
        }
        match (self.encoding_param, pattern.encoding_param) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }

    /// Same encoding, ignoring payload type numbers.
    pub fn same_encoding(&self, other: &SdpPayload) -> bool {
        self.encoding_name.eq_ignore_ascii_case(&other.encoding_name)
            && self.clock_rate == other.clock_rate
            && match (self.encoding_param, other.encoding_param) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
    }

    fn rtpmap(&self) -> String {
        match self.encoding_param {
            Some(param) => format!("{}/{}/{}", self.encoding_name, self.clock_rate, param),
            None => format!("{}/{}", self.encoding_name, self.clock_rate),
        }
    }
}

impl fmt::Display for SdpPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.payload_type {
            Some(pt) => write!(f, "{} {}", pt, self.rtpmap()),
            None => write!(f, "? {}", self.rtpmap()),
        }
    }
}

/// Parses an rtpmap value such as `PCMU/8000` or `opus/48000/2`.
pub fn parse_encoding(value: &str) -> Option<(String, u32, Option<u32>)> {
    let mut parts = value.trim().split('/');
    let name = parts.next().filter(|n| !n.is_empty())?.to_string();
    let clock_rate = match parts.next() {
        Some(rate) => rate.trim().parse().ok()?,
        None => DEFAULT_CLOCK_RATE,
    };
    let param = match parts.next() {
        Some(p) => Some(p.trim().parse().ok()?),
        None => None,
    };
    Some((name, clock_rate, param))
}

#[derive(Clone, Debug)]
pub struct SdpMedia {
    pub media: String,
    pub port: u16,
    pub protos: Vec<String>,
    pub connection: Option<Connection>,
    pub payloads: Vec<SdpPayload>,
    /// Formats of non-RTP streams, kept verbatim.
    pub formats: Vec<String>,
    pub send: bool,
    pub recv: bool,
    pub attributes: Vec<Attribute>,
    template: MediaDescription,
}

impl SdpMedia {
    pub fn new(media_type: MediaType, port: u16, transport: TransportProfile) -> Self {
        let media = match media_type {
            MediaType::Audio => "audio",
            MediaType::Video => "video",
            MediaType::Application => "application",
            MediaType::Text => "text",
            MediaType::Message => "message",
            MediaType::Image => "image",
            MediaType::Other => "other",
        };
        Self {
            media: media.to_string(),
            port,
            protos: transport.to_string().split('/').map(|s| s.to_string()).collect(),
            connection: None,
            payloads: Vec::new(),
            formats: Vec::new(),
            send: true,
            recv: true,
            attributes: Vec::new(),
            template: MediaDescription::default(),
        }
    }

    pub fn media_type(&self) -> MediaType {
        MediaType::from(self.media.as_str())
    }

    pub fn is_audio(&self) -> bool {
        self.media_type() == MediaType::Audio
    }

    pub fn transport(&self) -> TransportProfile {
        TransportProfile::from_protos(&self.protos)
    }

    pub fn is_active(&self) -> bool {
        self.port != 0
    }

    pub fn direction(&self) -> &'static str {
        match (self.send, self.recv) {
            (true, true) => "sendrecv",
            (true, false) => "sendonly",
            (false, true) => "recvonly",
            (false, false) => "inactive",
        }
    }

    pub fn set_direction(&mut self, send: bool, recv: bool) {
        self.send = send;
        self.recv = recv;
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.key.eq_ignore_ascii_case(key))
            .and_then(|a| a.value.as_deref())
    }

    pub fn set_attribute(&mut self, key: &str, value: Option<String>) {
        self.attributes.retain(|a| !a.key.eq_ignore_ascii_case(key));
        self.attributes.push(Attribute {
            key: key.to_string(),
            value,
        });
    }

    fn from_description(
        mut desc: MediaDescription,
        session_direction: Option<(bool, bool)>,
    ) -> Self {
        let protos = desc.media_name.protos.clone();
        let transport = TransportProfile::from_protos(&protos);
        let port = desc.media_name.port.value.clamp(0, u16::MAX as isize) as u16;
        let connection = desc
            .connection_information
            .take()
            .and_then(|c| Connection::from_info(&c));
        let (send, recv) = take_direction(&mut desc.attributes)
            .or(session_direction)
            .unwrap_or((true, true));

        let mut payloads = Vec::new();
        let mut formats = Vec::new();
        let mut attributes = std::mem::take(&mut desc.attributes);
        if transport.is_rtp() {
            let mut rtpmaps = HashMap::new();
            let mut fmtps = HashMap::new();
            attributes.retain(|attr| {
                let target = match attr.key.as_str() {
                    "rtpmap" => &mut rtpmaps,
                    "fmtp" => &mut fmtps,
                    _ => return true,
                };
                if let Some((pt, rest)) = attr.value.as_deref().and_then(split_format_value) {
                    target.insert(pt, rest.to_string());
                }
                false
            });
            for format in desc.media_name.formats.iter() {
                let Ok(pt) = format.trim().parse::<u8>() else {
                    continue;
                };
                let mut payload = match rtpmaps.get(&pt).and_then(|v| parse_encoding(v)) {
                    Some((name, clock_rate, encoding_param)) => SdpPayload {
                        payload_type: Some(pt),
                        encoding_name: name,
                        clock_rate,
                        encoding_param,
                        format_params: String::new(),
                    },
                    None => static_payload(pt)
                        .unwrap_or_else(|| SdpPayload::new(Some(pt), "", 0)),
                };
                if let Some(fmtp) = fmtps.get(&pt) {
                    payload.format_params = fmtp.clone();
                }
                payloads.push(payload);
            }
        } else {
            formats = desc.media_name.formats.clone();
        }

        let media = desc.media_name.media.clone();
        Self {
            media,
            port,
            protos,
            connection,
            payloads,
            formats,
            send,
            recv,
            attributes,
            template: desc,
        }
    }

    fn to_description(&self) -> MediaDescription {
        let mut desc = self.template.clone();
        let mut attributes = Vec::new();
        let formats = if self.transport().is_rtp() {
            let mut formats = Vec::new();
            for payload in self.payloads.iter() {
                let Some(pt) = payload.payload_type else {
                    continue;
                };
                formats.push(pt.to_string());
                if !payload.encoding_name.is_empty() {
                    attributes.push(Attribute {
                        key: "rtpmap".to_string(),
                        value: Some(format!("{} {}", pt, payload.rtpmap())),
                    });
                }
                if !payload.format_params.is_empty() {
                    attributes.push(Attribute {
                        key: "fmtp".to_string(),
                        value: Some(format!("{} {}", pt, payload.format_params)),
                    });
                }
            }
            formats
        } else {
            self.formats.clone()
        };
        attributes.extend(self.attributes.iter().cloned());
        attributes.push(Attribute {
            key: self.direction().to_string(),
            value: None,
        });
        desc.media_name = MediaName {
            media: self.media.clone(),
            port: RangedPort {
                value: self.port as isize,
                range: None,
            },
            protos: self.protos.clone(),
            formats,
        };
        desc.connection_information = self.connection.as_ref().map(|c| c.to_info());
        desc.attributes = attributes;
        desc
    }
}

impl PartialEq for SdpMedia {
    fn eq(&self, other: &Self) -> bool {
        self.media == other.media
            && self.port == other.port
            && self.protos == other.protos
            && self.connection == other.connection
            && self.payloads == other.payloads
            && self.formats == other.formats
            && self.send == other.send
            && self.recv == other.recv
    }
}

fn split_format_value(value: &str) -> Option<(u8, &str)> {
    let (pt, rest) = value.trim().split_once(' ')?;
    Some((pt.parse().ok()?, rest.trim()))
}

fn take_direction(attributes: &mut Vec<Attribute>) -> Option<(bool, bool)> {
    let mut direction = None;
    attributes.retain(|attr| {
        let dir = match attr.key.as_str() {
            "sendrecv" => (true, true),
            "sendonly" => (true, false),
            "recvonly" => (false, true),
            "inactive" => (false, false),
            _ => return true,
        };
        direction = Some(dir);
        false
    });
    direction
}

/// A parsed session description: the session-level lines the negotiator
/// never touches, plus the streams it rewrites.
#[derive(Clone, Debug)]
pub struct SessionMedia {
    pub connection: Option<Connection>,
    pub attributes: Vec<Attribute>,
    pub media: Vec<SdpMedia>,
    session: SessionDescription,
}

impl SessionMedia {
    pub fn parse(body: &str) -> Result<Self, NegotiationError> {
        let mut reader = Cursor::new(body.as_bytes());
        let mut session = SessionDescription::unmarshal(&mut reader)
            .map_err(|e| NegotiationError::ParseFailed(e.to_string()))?;
        let session_direction = take_direction(&mut session.attributes);
        let connection = session
            .connection_information
            .take()
            .and_then(|c| Connection::from_info(&c));
        let attributes = std::mem::take(&mut session.attributes);
        let media = std::mem::take(&mut session.media_descriptions)
            .into_iter()
            .map(|desc| SdpMedia::from_description(desc, session_direction))
            .collect();
        Ok(Self {
            connection,
            attributes,
            media,
            session,
        })
    }

    /// Minimal description with an anonymous origin, used when no previous
    /// description exists.
    pub fn with_media(connection: Connection, media: Vec<SdpMedia>) -> Self {
        let fallback = "v=0\r\n\
            o=- 0 0 IN IP4 0.0.0.0\r\n\
            s=-\r\n\
            t=0 0\r\n";
        let mut reader = Cursor::new(fallback.as_bytes());
        let session = SessionDescription::unmarshal(&mut reader).unwrap_or_default();
        Self {
            connection: Some(connection),
            attributes: Vec::new(),
            media,
            session,
        }
    }

    /// Zero-address description with one inactive PCMU stream, used for
    /// holds without a stored description and for locally accepted INVITEs.
    pub fn fake_hold() -> Self {
        let mut audio = SdpMedia::new(MediaType::Audio, 0, TransportProfile::RtpAvp);
        audio.port = 9;
        audio.payloads = static_payload(0).into_iter().collect();
        audio.set_direction(false, false);
        Self::with_media(Connection::ip4("0.0.0.0"), vec![audio])
    }

    pub fn has_audio(&self) -> bool {
        self.media.iter().any(|m| m.is_audio())
    }

    /// Increments the origin session version for locally generated offers.
    pub fn bump_version(&mut self) {
        self.session.origin.session_version = self.session.origin.session_version.wrapping_add(1);
    }

    pub fn origin_version(&self) -> u64 {
        self.session.origin.session_version
    }

    pub fn set_origin_version(&mut self, version: u64) {
        self.session.origin.session_version = version;
    }

    /// Points every connection line at the unspecified address of its
    /// family. A description without any connection line gets a session
    /// level `0.0.0.0`.
    pub fn zero_connections(&mut self) {
        fn zero(c: &mut Connection) {
            c.address = match c.address_type {
                AddressType::IP4 => "0.0.0.0",
                AddressType::IP6 => "::",
            }
            .to_string();
        }
        if let Some(c) = self.connection.as_mut() {
            zero(c);
        }
        for c in self.media.iter_mut().filter_map(|m| m.connection.as_mut()) {
            zero(c);
        }
        if self.connection.is_none() && self.media.iter().all(|m| m.connection.is_none()) {
            self.connection = Some(Connection::ip4("0.0.0.0"));
        }
    }

    /// A description is a hold request when it has at least one active
    /// stream and every active stream either stops receiving or points at a
    /// zero connection address.
    pub fn is_hold_request(&self) -> bool {
        let session_zero = self.connection.as_ref().map(|c| c.is_zero()).unwrap_or(false);
        let mut active = 0;
        for m in self.media.iter().filter(|m| m.is_active()) {
            active += 1;
            let zero = m
                .connection
                .as_ref()
                .map(|c| c.is_zero())
                .unwrap_or(session_zero);
            if !zero && m.recv {
                return false;
            }
        }
        active > 0
    }

    pub fn to_sdp_string(&self) -> String {
        let mut session = self.session.clone();
        session.connection_information = self.connection.as_ref().map(|c| c.to_info());
        session.attributes = self.attributes.clone();
        session.media_descriptions = self.media.iter().map(|m| m.to_description()).collect();
        session.marshal()
    }
}

impl fmt::Display for SessionMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_sdp_string())
    }
}
