use super::codec_groups::{CodecAllowList, FilterEntry, FilterMode};
use super::sdp::{
    SdpMedia, SdpPayload, SessionMedia, TransportProfile, DYNAMIC_PAYLOAD_TYPE_END,
    DYNAMIC_PAYLOAD_TYPE_START,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("SDP parsing failed: {0}")]
    ParseFailed(String),
    #[error("empty answer")]
    EmptyAnswer,
    #[error("answer has {answer} streams, expected {expected}")]
    StreamsCount { answer: usize, expected: usize },
    #[error("stream {index} has a different media type in the answer")]
    StreamsTypes { index: usize },
    #[error("no compatible codecs")]
    CodecsNotMatched,
    #[error("no audio streams")]
    NoAudioStreams,
    #[error("stream {index} uses transport {actual}, expected {expected}")]
    TransportMismatch {
        index: usize,
        expected: TransportProfile,
        actual: TransportProfile,
    },
    #[error("codecs group {0} not found")]
    CodecGroupNotFound(u32),
}

impl NegotiationError {
    pub fn internal_code(&self) -> u16 {
        match self {
            NegotiationError::ParseFailed(_) => 1501,
            NegotiationError::EmptyAnswer => 1502,
            NegotiationError::StreamsCount { .. } => 1503,
            NegotiationError::StreamsTypes { .. } => 1504,
            NegotiationError::CodecsNotMatched => 1505,
            NegotiationError::NoAudioStreams => 1506,
            NegotiationError::TransportMismatch { .. } => 1507,
            NegotiationError::CodecGroupNotFound(_) => 140,
        }
    }

    /// SIP status code to answer the failing transaction with.
    pub fn response_code(&self) -> u16 {
        match self {
            NegotiationError::CodecGroupNotFound(_) => 500,
            _ => 488,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self.response_code() {
            500 => "Server Internal Error",
            _ => "Not Acceptable Here",
        }
    }
}

/// Where connection lines end up after normalization.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnLocation {
    #[default]
    Both,
    SessionOnly,
    MediaOnly,
}

/// Per-direction negotiation settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaProfile {
    pub single_codec: bool,
    pub avoid_transcoding: bool,
    pub filter_noaudio_streams: bool,
    pub conn_location: ConnLocation,
    pub attribute_filter: FilterEntry,
    pub media_transport: Option<TransportProfile>,
    pub ptime: Option<u32>,
}

/// Rearranges every audio stream's payload list according to `allow`.
///
/// Streams left without payloads, or with only telephone-event, are disabled
/// (port zero) and keep their first original payload so the m-line stays
/// valid. Fails only when every audio stream touched was disabled.
pub fn filter_arrange(
    sdp: &mut SessionMedia,
    allow: &CodecAllowList,
    add_missing: bool,
    ptime: Option<u32>,
) -> Result<(), NegotiationError> {
    if let Some(ptime) = ptime {
        for m in sdp.media.iter_mut().filter(|m| m.is_audio()) {
            m.set_attribute("ptime", Some(ptime.to_string()));
        }
    }
    if allow.mode == FilterMode::Transparent {
        return Ok(());
    }

    let mut left = false;
    let mut filtered = false;
    for (index, m) in sdp
        .media
        .iter_mut()
        .enumerate()
        .filter(|(_, m)| m.is_audio() && !m.payloads.is_empty())
    {
        let transport = m.transport();
        let kept = match allow.mode {
            FilterMode::Whitelist => arrange_whitelist(&m.payloads, allow, add_missing, transport),
            _ => m
                .payloads
                .iter()
                .filter(|p| allow.find(p, transport).is_none())
                .cloned()
                .collect(),
        };
        let only_te = !kept.is_empty() && kept.iter().all(|p| p.is_telephone_event());
        if kept.is_empty() || only_te {
            debug!("stream {} has no usable codecs, disabling it", index);
            let first = m.payloads[0].clone();
            m.payloads = vec![first];
            m.port = 0;
            filtered = true;
        } else {
            m.payloads = kept;
            left = true;
        }
    }

    if filtered && !left {
        return Err(NegotiationError::CodecsNotMatched);
    }
    Ok(())
}

fn arrange_whitelist(
    payloads: &[SdpPayload],
    allow: &CodecAllowList,
    add_missing: bool,
    transport: TransportProfile,
) -> Vec<SdpPayload> {
    let mut kept: Vec<SdpPayload> = Vec::new();
    for pattern in allow.codecs.iter() {
        match payloads.iter().find(|p| p.matches(pattern, transport)) {
            Some(p) => {
                if kept.iter().any(|k| k.payload_type == p.payload_type) {
                    continue;
                }
                let mut chosen = p.clone();
                if add_missing {
                    chosen.encoding_name = pattern.encoding_name.clone();
                    if !pattern.format_params.is_empty() {
                        chosen.format_params = pattern.format_params.clone();
                    }
                    if chosen.is_dynamic() && pattern.payload_type.is_some() {
                        chosen.payload_type = pattern.payload_type;
                    }
                }
                kept.push(chosen);
            }
            None if add_missing => kept.push(pattern.clone()),
            None => {}
        }
    }
    kept
}

/// Disables non-audio streams. Fails when no audio stream is present.
pub fn filter_no_audio_streams(sdp: &mut SessionMedia, enabled: bool) -> Result<(), NegotiationError> {
    if !enabled {
        return Ok(());
    }
    for m in sdp.media.iter_mut().filter(|m| !m.is_audio()) {
        m.port = 0;
    }
    if !sdp.has_audio() {
        return Err(NegotiationError::NoAudioStreams);
    }
    Ok(())
}

/// Removes non-audio streams. Fails when nothing is left.
pub fn cut_no_audio_streams(sdp: &mut SessionMedia, enabled: bool) -> Result<(), NegotiationError> {
    if !enabled {
        return Ok(());
    }
    sdp.media.retain(|m| m.is_audio());
    if sdp.media.is_empty() {
        return Err(NegotiationError::NoAudioStreams);
    }
    Ok(())
}

/// Keeps the first codec plus telephone-event.
pub fn reduce_to_single_codec(payloads: &[SdpPayload]) -> Vec<SdpPayload> {
    let mut out: Vec<SdpPayload> = Vec::new();
    for p in payloads {
        let accept = out.is_empty()
            || p.is_telephone_event()
            || out.iter().all(|o| o.is_telephone_event());
        if accept {
            out.push(p.clone());
        }
    }
    out
}

pub fn filter_attributes(sdp: &mut SessionMedia, filter: &FilterEntry) {
    if !filter.is_active() {
        return;
    }
    sdp.attributes.retain(|a| filter.allows(&a.key));
    for m in sdp.media.iter_mut() {
        m.attributes.retain(|a| filter.allows(&a.key));
    }
}

pub fn normalize_conn_location(sdp: &mut SessionMedia, location: ConnLocation) {
    match location {
        ConnLocation::Both => {
            assert_session_conn(sdp);
            assert_media_conn(sdp);
        }
        ConnLocation::SessionOnly => {
            assert_session_conn(sdp);
            for m in sdp.media.iter_mut() {
                m.connection = None;
            }
        }
        ConnLocation::MediaOnly => {
            assert_media_conn(sdp);
            sdp.connection = None;
        }
    }
}

fn assert_session_conn(sdp: &mut SessionMedia) {
    if sdp.connection.is_some() {
        return;
    }
    sdp.connection = sdp.media.iter().find_map(|m| m.connection.clone());
}

fn assert_media_conn(sdp: &mut SessionMedia) {
    let Some(session) = sdp.connection.clone() else {
        return;
    };
    for m in sdp.media.iter_mut().filter(|m| m.connection.is_none()) {
        m.connection = Some(session.clone());
    }
}

/// Turns sendonly streams of a hold offer into recvonly so the stored
/// description reads as the answer we give.
pub fn fix_media_activity(sdp: &mut SessionMedia) {
    if !sdp.is_hold_request() {
        return;
    }
    for m in sdp.media.iter_mut().filter(|m| m.is_active()) {
        if m.send && !m.recv {
            m.set_direction(false, true);
        }
    }
}

/// A re-offer must keep every previously negotiated stream in place; extra
/// streams are accepted but disabled.
pub fn validate_reoffer(sdp: &mut SessionMedia, negotiated: &[SdpMedia]) -> Result<(), NegotiationError> {
    if negotiated.is_empty() {
        return Ok(());
    }
    if sdp.media.len() < negotiated.len() {
        return Err(NegotiationError::StreamsCount {
            answer: sdp.media.len(),
            expected: negotiated.len(),
        });
    }
    for (index, m) in sdp.media.iter_mut().enumerate() {
        match negotiated.get(index) {
            Some(prev) if prev.media_type() != m.media_type() => {
                return Err(NegotiationError::StreamsTypes { index });
            }
            Some(_) => {}
            None => m.port = 0,
        }
    }
    Ok(())
}

pub fn check_transport(
    sdp: &SessionMedia,
    expected: Option<TransportProfile>,
) -> Result<(), NegotiationError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    for (index, m) in sdp.media.iter().enumerate() {
        if m.is_audio() && m.is_active() && m.transport() != expected {
            return Err(NegotiationError::TransportMismatch {
                index,
                expected,
                actual: m.transport(),
            });
        }
    }
    Ok(())
}

/// Gives every payload a unique type number.
///
/// Encodings present in `reference` adopt the reference numbering; a local
/// payload already holding that number moves to the one being vacated.
/// Anything left unnumbered, duplicated, or clashing with a different
/// encoding in `reference` gets the lowest free dynamic type.
pub fn replace_dynamic_payloads(payloads: &mut [SdpPayload], reference: Option<&[SdpPayload]>) {
    let reference = reference.unwrap_or(&[]);
    let mut pinned: HashSet<u8> = HashSet::new();
    let mut is_pinned = vec![false; payloads.len()];

    for i in 0..payloads.len() {
        let desired = reference
            .iter()
            .find(|r| r.same_encoding(&payloads[i]))
            .and_then(|r| r.payload_type);
        let Some(desired) = desired else {
            continue;
        };
        if pinned.contains(&desired) {
            continue;
        }
        let vacated = payloads[i].payload_type;
        if vacated != Some(desired) {
            for (j, other) in payloads.iter_mut().enumerate() {
                if j != i && !is_pinned[j] && other.payload_type == Some(desired) {
                    other.payload_type = vacated;
                }
            }
        }
        payloads[i].payload_type = Some(desired);
        pinned.insert(desired);
        is_pinned[i] = true;
    }

    let reserved: HashSet<u8> = reference
        .iter()
        .chain(payloads.iter())
        .filter_map(|p| p.payload_type)
        .collect();
    let mut used = pinned;
    for i in 0..payloads.len() {
        if is_pinned[i] {
            continue;
        }
        let keep = match payloads[i].payload_type {
            Some(pt) if used.contains(&pt) => None,
            Some(pt) if pt >= DYNAMIC_PAYLOAD_TYPE_START => {
                let clashes = reference
                    .iter()
                    .any(|r| r.payload_type == Some(pt) && !r.same_encoding(&payloads[i]));
                (!clashes).then_some(pt)
            }
            Some(pt) => Some(pt),
            None => None,
        };
        if let Some(pt) = keep {
            used.insert(pt);
            continue;
        }
        match next_free_dynamic(&used, &reserved) {
            Some(pt) => {
                payloads[i].payload_type = Some(pt);
                used.insert(pt);
            }
            None => warn!("no free dynamic payload type for {}", payloads[i]),
        }
    }
}

fn next_free_dynamic(used: &HashSet<u8>, reserved: &HashSet<u8>) -> Option<u8> {
    let range = DYNAMIC_PAYLOAD_TYPE_START..=DYNAMIC_PAYLOAD_TYPE_END;
    range
        .clone()
        .find(|pt| !used.contains(pt) && !reserved.contains(pt))
        .or_else(|| range.clone().find(|pt| !used.contains(pt)))
}

/// Inbound offer pipeline for the direction described by `profile`.
///
/// The processed description becomes the new `negotiated` snapshot and is
/// returned printed.
pub fn process_offer(
    body: &str,
    allow: &CodecAllowList,
    profile: &MediaProfile,
    negotiated: &mut Vec<SdpMedia>,
    local_reoffer: bool,
) -> Result<String, NegotiationError> {
    let mut sdp = SessionMedia::parse(body)?;
    if local_reoffer {
        validate_reoffer(&mut sdp, negotiated)?;
    }
    filter_arrange(&mut sdp, allow, false, None)?;
    filter_attributes(&mut sdp, &profile.attribute_filter);
    filter_no_audio_streams(&mut sdp, profile.filter_noaudio_streams)?;
    if local_reoffer {
        fix_media_activity(&mut sdp);
    }
    if profile.single_codec {
        for m in sdp.media.iter_mut().filter(|m| m.is_audio()) {
            m.payloads = reduce_to_single_codec(&m.payloads);
        }
    }
    check_transport(&sdp, profile.media_transport)?;
    *negotiated = sdp.media.clone();
    Ok(sdp.to_sdp_string())
}

/// Outbound offer pipeline, applied to a peer's offer before it is sent on
/// this side. `offered` is what this side offered last time and keeps
/// dynamic payload numbering stable across renegotiations.
pub fn filter_offer(
    body: &str,
    allow: &CodecAllowList,
    profile: &MediaProfile,
    offered: &[SdpMedia],
) -> Result<SessionMedia, NegotiationError> {
    let mut sdp = SessionMedia::parse(body)?;
    filter_arrange(&mut sdp, allow, true, profile.ptime)?;
    filter_attributes(&mut sdp, &profile.attribute_filter);
    cut_no_audio_streams(&mut sdp, profile.filter_noaudio_streams)?;
    for (index, m) in sdp.media.iter_mut().enumerate() {
        let reference = offered
            .get(index)
            .filter(|r| r.media_type() == m.media_type())
            .map(|r| r.payloads.as_slice());
        if m.transport().is_rtp() {
            replace_dynamic_payloads(&mut m.payloads, reference);
        }
    }
    normalize_conn_location(&mut sdp, profile.conn_location);
    Ok(sdp)
}

/// Answer pipeline: builds the answer for the side whose offer produced
/// `negotiated`. Payload lists come from the offer snapshot so the answer
/// never names a codec the offerer did not offer.
pub fn process_answer(
    body: Option<&str>,
    negotiated: &mut Vec<SdpMedia>,
    profile: &MediaProfile,
    answer_mandatory: bool,
) -> Result<Option<String>, NegotiationError> {
    let Some(body) = body.map(str::trim).filter(|b| !b.is_empty()) else {
        if answer_mandatory {
            return Err(NegotiationError::EmptyAnswer);
        }
        return Ok(None);
    };
    let mut sdp = SessionMedia::parse(body)?;

    if !negotiated.is_empty() {
        let total = negotiated.len();
        let audio = negotiated.iter().filter(|m| m.is_audio()).count();
        // A filtered offer carried only the audio streams.
        let (expected, skip_noaudio) = if sdp.media.len() == total {
            (total, false)
        } else if profile.filter_noaudio_streams && sdp.media.len() == audio {
            (audio, true)
        } else {
            return Err(NegotiationError::StreamsCount {
                answer: sdp.media.len(),
                expected: total,
            });
        };
        let mut answered = std::mem::take(&mut sdp.media).into_iter();
        let mut merged = Vec::with_capacity(negotiated.len());
        for (index, offered) in negotiated.iter().enumerate() {
            if skip_noaudio && !offered.is_audio() {
                merged.push(offered.clone());
                continue;
            }
            let Some(mut m) = answered.next() else {
                return Err(NegotiationError::StreamsCount {
                    answer: index,
                    expected,
                });
            };
            if m.media_type() != offered.media_type() {
                return Err(NegotiationError::StreamsTypes { index });
            }
            if m.is_audio() && !offered.payloads.is_empty() {
                m.payloads = answer_payloads(offered, &m, profile);
                replace_dynamic_payloads(&mut m.payloads, Some(&offered.payloads));
            }
            merged.push(m);
        }
        sdp.media = merged;
    }

    filter_attributes(&mut sdp, &profile.attribute_filter);
    normalize_conn_location(&mut sdp, profile.conn_location);
    *negotiated = sdp.media.clone();
    Ok(Some(sdp.to_sdp_string()))
}

fn answer_payloads(offered: &SdpMedia, answer: &SdpMedia, profile: &MediaProfile) -> Vec<SdpPayload> {
    if !profile.avoid_transcoding {
        if profile.single_codec {
            return reduce_to_single_codec(&offered.payloads);
        }
        return offered.payloads.clone();
    }
    let transport = offered.transport();
    let mut out: Vec<SdpPayload> = Vec::new();
    for accepted in answer.payloads.iter() {
        if let Some(p) = offered.payloads.iter().find(|p| p.matches(accepted, transport)) {
            if !out.contains(p) {
                out.push(p.clone());
            }
        }
    }
    for p in offered.payloads.iter() {
        if !out.contains(p) {
            out.push(p.clone());
        }
    }
    if profile.single_codec {
        return reduce_to_single_codec(&out);
    }
    out
}
