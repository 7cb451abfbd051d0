use crate::media::codec_groups::{CodecConfig, CodecGroupConfig, CodecGroups};
use crate::media::negotiate::MediaProfile;
use crate::proxy::call_leg::LegRole;
use anyhow::Error;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CODEC_GROUP: u32 = 1;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    pub codec_groups: Vec<CodecGroupConfig>,
    pub profile: CallProfile,
}

/// Settings for both sides of a bridged call.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CallProfile {
    pub aleg: LegProfile,
    pub bleg: LegProfile,
}

impl CallProfile {
    pub fn leg(&self, role: LegRole) -> &LegProfile {
        match role {
            LegRole::A => &self.aleg,
            LegRole::B => &self.bleg,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LegProfile {
    pub codec_group: u32,
    #[serde(flatten)]
    pub media: MediaProfile,
    pub hold: HoldSettings,
    pub allow_1xx_without_to_tag: bool,
    pub suppress_early_media: bool,
}

impl Default for LegProfile {
    fn default() -> Self {
        Self {
            codec_group: DEFAULT_CODEC_GROUP,
            media: MediaProfile::default(),
            hold: HoldSettings::default(),
            allow_1xx_without_to_tag: false,
            suppress_early_media: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldActivity {
    Sendrecv,
    #[default]
    Sendonly,
    Recvonly,
    Inactive,
}

impl HoldActivity {
    /// `(send, recv)` flags for streams in a hold offer.
    pub fn flags(&self) -> (bool, bool) {
        match self {
            HoldActivity::Sendrecv => (true, true),
            HoldActivity::Sendonly => (true, false),
            HoldActivity::Recvonly => (false, true),
            HoldActivity::Inactive => (false, false),
        }
    }
}

/// How hold offers sent on a leg are rewritten.
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HoldSettings {
    pub mark_zero_connection: bool,
    pub activity: HoldActivity,
    /// Also rewrite hold offers relayed from the peer.
    pub alter_b2b: bool,
}

impl Default for Config {
    fn default() -> Self {
        let codec = |name: &str, dynamic_payload_type: Option<u8>| CodecConfig {
            name: name.to_string(),
            format_params: None,
            dynamic_payload_type,
        };
        Self {
            log_level: Some("info".to_string()),
            log_file: None,
            codec_groups: vec![CodecGroupConfig {
                id: DEFAULT_CODEC_GROUP,
                mode: None,
                codecs: vec![
                    codec("PCMU/8000", None),
                    codec("PCMA/8000", None),
                    codec("telephone-event/8000", Some(101)),
                ],
            }],
            profile: CallProfile::default(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self, Error> {
        let config = toml::from_str(
            &std::fs::read_to_string(path).map_err(|e| anyhow::anyhow!("{}: {}", e, path))?,
        )?;
        Ok(config)
    }

    pub fn codec_groups(&self) -> CodecGroups {
        CodecGroups::from_config(&self.codec_groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::codec_groups::FilterMode;
    use crate::media::negotiate::ConnLocation;
    use crate::media::sdp::TransportProfile;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        let groups = config.codec_groups();
        assert_eq!(groups.get(DEFAULT_CODEC_GROUP).unwrap().codecs.len(), 3);
        assert_eq!(config.profile.leg(LegRole::A).hold.activity, HoldActivity::Sendonly);
        assert_eq!(config.profile.bleg.codec_group, DEFAULT_CODEC_GROUP);
    }

    #[test]
    fn test_load_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
log_level = "debug"

[[codec_groups]]
id = 7
codecs = [
    {{ name = "opus/48000/2", dynamic_payload_type = 111 }},
    {{ name = "PCMA/8000" }},
]

[profile.aleg]
codec_group = 7
single_codec = true
conn_location = "session_only"
media_transport = "RTP/SAVP"
attribute_filter = {{ mode = "blacklist", items = ["ice-ufrag"] }}

[profile.aleg.hold]
activity = "inactive"
mark_zero_connection = true

[profile.bleg]
filter_noaudio_streams = true
allow_1xx_without_to_tag = true
"#
        )
        .unwrap();

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        let aleg = &config.profile.aleg;
        assert_eq!(aleg.codec_group, 7);
        assert!(aleg.media.single_codec);
        assert_eq!(aleg.media.conn_location, ConnLocation::SessionOnly);
        assert_eq!(aleg.media.media_transport, Some(TransportProfile::RtpSavp));
        assert_eq!(aleg.media.attribute_filter.mode, FilterMode::Blacklist);
        assert_eq!(aleg.hold.activity.flags(), (false, false));
        assert!(aleg.hold.mark_zero_connection);

        let bleg = &config.profile.bleg;
        assert_eq!(bleg.codec_group, DEFAULT_CODEC_GROUP);
        assert!(bleg.media.filter_noaudio_streams);
        assert!(bleg.allow_1xx_without_to_tag);

        let group = config.codec_groups().get(7).unwrap();
        assert_eq!(group.codecs[0].payload_type, Some(111));
        assert_eq!(group.codecs[1].payload_type, Some(8));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/rustsbc.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/rustsbc.toml"));
    }
}
