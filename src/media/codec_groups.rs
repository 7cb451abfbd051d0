use super::negotiate::NegotiationError;
use super::sdp::{
    parse_encoding, static_payload_type, SdpPayload, TransportProfile, DYNAMIC_PAYLOAD_TYPE_START,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    #[default]
    Transparent,
    Whitelist,
    Blacklist,
}

/// A named filter over SDP attribute keys.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterEntry {
    pub mode: FilterMode,
    pub items: Vec<String>,
}

impl FilterEntry {
    pub fn is_active(&self) -> bool {
        self.mode != FilterMode::Transparent
    }

    /// Whether an item with `key` survives the filter.
    pub fn allows(&self, key: &str) -> bool {
        let listed = self.items.iter().any(|i| i.eq_ignore_ascii_case(key));
        match self.mode {
            FilterMode::Transparent => true,
            FilterMode::Whitelist => listed,
            FilterMode::Blacklist => !listed,
        }
    }
}

/// Ordered codec patterns plus the mode they are applied in. Order is the
/// preference order used when rearranging payload lists.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CodecAllowList {
    pub mode: FilterMode,
    pub codecs: Vec<SdpPayload>,
}

impl CodecAllowList {
    pub fn transparent() -> Self {
        Self::default()
    }

    pub fn whitelist(codecs: Vec<SdpPayload>) -> Self {
        Self {
            mode: FilterMode::Whitelist,
            codecs,
        }
    }

    pub fn blacklist(codecs: Vec<SdpPayload>) -> Self {
        Self {
            mode: FilterMode::Blacklist,
            codecs,
        }
    }

    pub fn find(&self, payload: &SdpPayload, transport: TransportProfile) -> Option<&SdpPayload> {
        self.codecs.iter().find(|c| payload.matches(c, transport))
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct CodecConfig {
    /// `NAME[/rate[/param]]`, for example `opus/48000/2`.
    pub name: String,
    pub format_params: Option<String>,
    pub dynamic_payload_type: Option<u8>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct CodecGroupConfig {
    pub id: u32,
    #[serde(default)]
    pub mode: Option<FilterMode>,
    pub codecs: Vec<CodecConfig>,
}

/// Builds one allow-list entry from its textual form. Encodings with a
/// registered static type get that type; otherwise a configured dynamic
/// type is used when it lies in the dynamic range.
pub fn parse_codec(codec: &CodecConfig) -> Option<SdpPayload> {
    let Some((name, clock_rate, encoding_param)) = parse_encoding(&codec.name) else {
        error!("invalid codec specification: {}", codec.name);
        return None;
    };
    let payload_type = match static_payload_type(&name, clock_rate, encoding_param) {
        Some(pt) => Some(pt),
        None => match codec.dynamic_payload_type {
            Some(pt) if pt >= DYNAMIC_PAYLOAD_TYPE_START => Some(pt),
            Some(pt) => {
                error!(
                    "dynamic payload type {} for {} is below {}, ignored",
                    pt, codec.name, DYNAMIC_PAYLOAD_TYPE_START
                );
                None
            }
            None => None,
        },
    };
    Some(SdpPayload {
        payload_type,
        encoding_name: name,
        clock_rate,
        encoding_param,
        format_params: codec.format_params.clone().unwrap_or_default(),
    })
}

impl From<&CodecGroupConfig> for CodecAllowList {
    fn from(group: &CodecGroupConfig) -> Self {
        Self {
            mode: group.mode.unwrap_or(FilterMode::Whitelist),
            codecs: group.codecs.iter().filter_map(parse_codec).collect(),
        }
    }
}

/// Process-wide codec groups. Readers take a cheap snapshot; `reload`
/// swaps the whole table at once.
pub struct CodecGroups {
    groups: RwLock<Arc<HashMap<u32, CodecAllowList>>>,
}

pub type CodecGroupsRef = Arc<CodecGroups>;

impl CodecGroups {
    pub fn new(groups: HashMap<u32, CodecAllowList>) -> Self {
        Self {
            groups: RwLock::new(Arc::new(groups)),
        }
    }

    pub fn from_config(groups: &[CodecGroupConfig]) -> Self {
        Self::new(Self::build(groups))
    }

    fn build(groups: &[CodecGroupConfig]) -> HashMap<u32, CodecAllowList> {
        groups
            .iter()
            .map(|g| {
                let list = CodecAllowList::from(g);
                debug!("codec group {} loaded with {} codecs", g.id, list.codecs.len());
                (g.id, list)
            })
            .collect()
    }

    pub fn reload(&self, groups: &[CodecGroupConfig]) {
        let table = Arc::new(Self::build(groups));
        info!("codec groups reloaded: {} groups", table.len());
        *self.groups.write().unwrap() = table;
    }

    pub fn snapshot(&self) -> Arc<HashMap<u32, CodecAllowList>> {
        self.groups.read().unwrap().clone()
    }

    pub fn get(&self, id: u32) -> Result<CodecAllowList, NegotiationError> {
        self.snapshot()
            .get(&id)
            .cloned()
            .ok_or(NegotiationError::CodecGroupNotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec(name: &str, dyn_pt: Option<u8>) -> CodecConfig {
        CodecConfig {
            name: name.to_string(),
            format_params: None,
            dynamic_payload_type: dyn_pt,
        }
    }

    #[test]
    fn test_parse_codec_static_and_dynamic() {
        let pcma = parse_codec(&codec("PCMA/8000", None)).unwrap();
        assert_eq!(pcma.payload_type, Some(8));

        let g729 = parse_codec(&codec("G729", Some(100))).unwrap();
        assert_eq!(g729.payload_type, Some(18));
        assert_eq!(g729.clock_rate, 8000);

        let opus = parse_codec(&codec("opus/48000/2", Some(111))).unwrap();
        assert_eq!(opus.payload_type, Some(111));
        assert_eq!(opus.encoding_param, Some(2));

        let low = parse_codec(&codec("telephone-event/8000", Some(50))).unwrap();
        assert_eq!(low.payload_type, None);

        assert!(parse_codec(&codec("", None)).is_none());
    }

    #[test]
    fn test_filter_entry_modes() {
        let mut filter = FilterEntry {
            mode: FilterMode::Whitelist,
            items: vec!["ptime".to_string()],
        };
        assert!(filter.allows("PTIME"));
        assert!(!filter.allows("ice-ufrag"));
        filter.mode = FilterMode::Blacklist;
        assert!(!filter.allows("ptime"));
        assert!(filter.allows("ice-ufrag"));
        filter.mode = FilterMode::Transparent;
        assert!(filter.allows("ptime"));
    }

    #[test]
    fn test_groups_reload_and_lookup() {
        let groups = CodecGroups::from_config(&[CodecGroupConfig {
            id: 1,
            mode: None,
            codecs: vec![codec("PCMU/8000", None)],
        }]);
        assert_eq!(groups.get(1).unwrap().codecs.len(), 1);
        assert_eq!(groups.get(2), Err(NegotiationError::CodecGroupNotFound(2)));

        let held = groups.snapshot();
        groups.reload(&[CodecGroupConfig {
            id: 2,
            mode: Some(FilterMode::Blacklist),
            codecs: vec![codec("G729/8000", None)],
        }]);
        assert!(held.contains_key(&1));
        assert!(groups.get(1).is_err());
        assert_eq!(groups.get(2).unwrap().mode, FilterMode::Blacklist);
    }
}
