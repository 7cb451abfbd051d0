#[cfg(test)]
mod negotiation_tests {
    use rustsbc::config::Config;
    use rustsbc::media::negotiate::{filter_offer, process_answer, process_offer, NegotiationError};
    use rustsbc::media::sdp::{SdpMedia, SessionMedia};
    use rustsbc::proxy::call_leg::LegRole;

    const CALLER_OFFER: &str = "v=0\r\n\
o=alice 100 100 IN IP4 192.0.2.10\r\n\
s=-\r\n\
c=IN IP4 192.0.2.10\r\n\
t=0 0\r\n\
m=audio 49170 RTP/AVP 8 0 18 101\r\n\
a=rtpmap:101 telephone-event/8000\r\n\
a=fmtp:101 0-15\r\n\
a=sendrecv\r\n";

    const CALLEE_ANSWER: &str = "v=0\r\n\
o=bob 200 200 IN IP4 192.0.2.20\r\n\
s=-\r\n\
c=IN IP4 192.0.2.20\r\n\
t=0 0\r\n\
m=audio 30000 RTP/AVP 0 101\r\n\
a=rtpmap:101 telephone-event/8000\r\n\
a=sendrecv\r\n";

    fn pts(m: &SdpMedia) -> Vec<Option<u8>> {
        m.payloads.iter().map(|p| p.payload_type).collect()
    }

    fn config(toml_text: &str) -> Config {
        toml::from_str(toml_text).expect("valid config")
    }

    #[test]
    fn test_offer_crosses_the_bridge() {
        let config = Config::default();
        let groups = config.codec_groups();
        let aleg = config.profile.leg(LegRole::A);
        let bleg = config.profile.leg(LegRole::B);

        let mut negotiated = Vec::new();
        let processed = process_offer(
            CALLER_OFFER,
            &groups.get(aleg.codec_group).unwrap(),
            &aleg.media,
            &mut negotiated,
            false,
        )
        .unwrap();
        let inbound = SessionMedia::parse(&processed).unwrap();
        assert_eq!(pts(&inbound.media[0]), vec![Some(0), Some(8), Some(101)]);
        assert_eq!(pts(&negotiated[0]), pts(&inbound.media[0]));

        let outbound = filter_offer(
            &processed,
            &groups.get(bleg.codec_group).unwrap(),
            &bleg.media,
            &[],
        )
        .unwrap();
        assert_eq!(pts(&outbound.media[0]), vec![Some(0), Some(8), Some(101)]);
        assert_eq!(outbound.media[0].port, 49170);

        let answer = process_answer(Some(CALLEE_ANSWER), &mut negotiated, &aleg.media, true)
            .unwrap()
            .unwrap();
        let answer = SessionMedia::parse(&answer).unwrap();
        assert_eq!(answer.media[0].port, 30000);
        let offered: Vec<_> = pts(&inbound.media[0]);
        assert!(pts(&answer.media[0]).iter().all(|pt| offered.contains(pt)));
    }

    #[test]
    fn test_single_codec_profile() {
        let config = config(
            r#"
[profile.aleg]
single_codec = true
"#,
        );
        let aleg = config.profile.leg(LegRole::A);
        let allow = config.codec_groups().get(aleg.codec_group).unwrap();

        let mut negotiated = Vec::new();
        process_offer(CALLER_OFFER, &allow, &aleg.media, &mut negotiated, false).unwrap();
        assert_eq!(pts(&negotiated[0]), vec![Some(0), Some(101)]);

        let answer = process_answer(Some(CALLEE_ANSWER), &mut negotiated, &aleg.media, true)
            .unwrap()
            .unwrap();
        let answer = SessionMedia::parse(&answer).unwrap();
        assert_eq!(pts(&answer.media[0]), vec![Some(0), Some(101)]);
    }

    #[test]
    fn test_answer_with_extra_stream_is_refused() {
        let config = Config::default();
        let aleg = config.profile.leg(LegRole::A);
        let allow = config.codec_groups().get(aleg.codec_group).unwrap();
        let mut negotiated = Vec::new();
        process_offer(CALLER_OFFER, &allow, &aleg.media, &mut negotiated, false).unwrap();

        let two_streams = format!("{}m=audio 30002 RTP/AVP 0\r\n", CALLEE_ANSWER);
        let err = process_answer(Some(&two_streams), &mut negotiated, &aleg.media, true)
            .unwrap_err();
        assert_eq!(
            err,
            NegotiationError::StreamsCount {
                answer: 2,
                expected: 1
            }
        );
        assert_eq!(err.internal_code(), 1503);
        assert_eq!(err.response_code(), 488);
    }

    #[test]
    fn test_missing_answer_when_mandatory() {
        let config = Config::default();
        let aleg = config.profile.leg(LegRole::A);
        let mut negotiated = Vec::new();
        let err = process_answer(None, &mut negotiated, &aleg.media, true).unwrap_err();
        assert_eq!(err, NegotiationError::EmptyAnswer);
        assert_eq!(
            process_answer(None, &mut negotiated, &aleg.media, false),
            Ok(None)
        );
    }

    #[test]
    fn test_secure_transport_required() {
        let config = config(
            r#"
[profile.aleg]
media_transport = "RTP/SAVP"
"#,
        );
        let aleg = config.profile.leg(LegRole::A);
        let allow = config.codec_groups().get(aleg.codec_group).unwrap();
        let mut negotiated = Vec::new();
        let err = process_offer(CALLER_OFFER, &allow, &aleg.media, &mut negotiated, false)
            .unwrap_err();
        assert_eq!(err.internal_code(), 1507);
        assert!(negotiated.is_empty());
    }

    #[test]
    fn test_unknown_codec_group() {
        let config = config(
            r#"
[profile.bleg]
codec_group = 9
"#,
        );
        let bleg = config.profile.leg(LegRole::B);
        let err = config.codec_groups().get(bleg.codec_group).unwrap_err();
        assert_eq!(err, NegotiationError::CodecGroupNotFound(9));
        assert_eq!(err.internal_code(), 140);
        assert_eq!(err.response_code(), 500);
        assert_eq!(err.reason(), "Server Internal Error");
    }

    #[test]
    fn test_no_common_codec() {
        let config = config(
            r#"
[[codec_groups]]
id = 1
codecs = [{ name = "G722/8000" }]
"#,
        );
        let aleg = config.profile.leg(LegRole::A);
        let allow = config.codec_groups().get(aleg.codec_group).unwrap();
        let mut negotiated = Vec::new();
        let err = process_offer(CALLER_OFFER, &allow, &aleg.media, &mut negotiated, false)
            .unwrap_err();
        assert_eq!(err, NegotiationError::CodecsNotMatched);
        assert_eq!(err.reason(), "Not Acceptable Here");
    }
}
