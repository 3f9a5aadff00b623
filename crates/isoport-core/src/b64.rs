//! Serde adapter that carries binary fields as standard base64 strings.
//!
//! JSON has no byte type; an array of numbers would be several times larger
//! than the payload it carries.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
    let raw = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
    STANDARD
        .decode(raw.as_bytes())
        .map(Bytes::from)
        .map_err(serde::de::Error::custom)
}
