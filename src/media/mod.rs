pub mod codec_groups;
pub mod negotiate;
pub mod sdp;
