use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Strings longer than this are treated as inline base64 by the legacy
/// `img_path` classifier.
pub const LEGACY_BASE64_MIN_LEN: usize = 500;

/// One unit of work handed to an isolated worker. Immutable once submitted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Job {
    Separate(SeparationJob),
    Detect(DetectionJob),
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Job::Separate(_) => "separate",
            Job::Detect(_) => "detect",
        }
    }
}

/// Split a track into vocals and accompaniment.
///
/// Inline `audio` wins over `audio_url` when both are present.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SeparationJob {
    #[serde(default)]
    pub audio_url: String,
    #[serde(default, with = "crate::b64")]
    pub audio: Bytes,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionJob {
    pub model: String,
    pub confidence: f32,
    /// Class id to display name.
    #[serde(default)]
    pub map_names: BTreeMap<u32, String>,
    pub image: ImageSource,
}

/// Where the image for a detection job comes from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    Url(String),
    Base64(String),
    #[serde(rename = "path")]
    LocalPath(String),
}

impl ImageSource {
    /// Classify an untyped `img_path` the way older callers expect:
    /// anything mentioning an http(s) scheme is a URL, anything longer than
    /// [`LEGACY_BASE64_MIN_LEN`] is inline base64, the rest is a local path.
    ///
    /// A short base64 string is therefore read as a path. Callers that can
    /// should send an explicit [`ImageSource`] instead.
    pub fn classify_legacy(raw: &str) -> Self {
        if raw.contains("http://") || raw.contains("https://") {
            ImageSource::Url(raw.to_string())
        } else if raw.len() > LEGACY_BASE64_MIN_LEN {
            ImageSource::Base64(raw.to_string())
        } else {
            ImageSource::LocalPath(raw.to_string())
        }
    }

    /// Short form for logs; never prints an inline payload.
    pub fn describe(&self) -> String {
        match self {
            ImageSource::Url(url) => format!("url:{url}"),
            ImageSource::Base64(data) => format!("base64:{}b", data.len()),
            ImageSource::LocalPath(path) => format!("path:{path}"),
        }
    }
}
