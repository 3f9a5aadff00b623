//! Resolve job input references into bytes.
//!
//! All functions here block; they are meant to run inside a worker, never on
//! the async executor.

use std::io::Read;
use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use tracing::debug;

use crate::{FetchError, ImageSource, MAX_MESSAGE_BYTES};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(60);

pub fn fetch_image(source: &ImageSource) -> Result<Bytes, FetchError> {
    match source {
        ImageSource::Url(url) => fetch_url(url),
        ImageSource::Base64(data) => decode_base64(data),
        ImageSource::LocalPath(path) => read_path(Path::new(path)),
    }
}

/// Inline bytes take precedence; the url is only consulted when they are empty.
pub fn fetch_audio(audio_url: &str, audio: &Bytes) -> Result<Bytes, FetchError> {
    if !audio.is_empty() {
        return Ok(audio.clone());
    }
    if audio_url.trim().is_empty() {
        return Err(FetchError::Empty);
    }
    fetch_url(audio_url.trim())
}

/// GET `url`, following redirects, with the body capped at the transport ceiling.
pub fn fetch_url(url: &str) -> Result<Bytes, FetchError> {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(FetchError::InvalidUrl(url.to_string()));
    }

    let agent = ureq::AgentBuilder::new()
        .timeout_connect(CONNECT_TIMEOUT)
        .timeout_read(READ_TIMEOUT)
        .redirects(5)
        .build();

    let response = match agent.get(url).call() {
        Ok(response) => response,
        Err(ureq::Error::Status(status, _)) => {
            return Err(FetchError::Http {
                url: url.to_string(),
                status,
            })
        }
        Err(ureq::Error::Transport(transport)) => {
            return Err(FetchError::Transport {
                url: url.to_string(),
                reason: transport.to_string(),
            })
        }
    };

    let mut body = Vec::new();
    response
        .into_reader()
        .take(MAX_MESSAGE_BYTES as u64 + 1)
        .read_to_end(&mut body)
        .map_err(|e| FetchError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
    if body.len() > MAX_MESSAGE_BYTES {
        return Err(FetchError::TooLarge {
            url: url.to_string(),
            limit: MAX_MESSAGE_BYTES,
        });
    }

    debug!(%url, bytes = body.len(), "fetched");
    Ok(Bytes::from(body))
}

/// Decode standard base64, tolerating a `data:<mime>;base64,` prefix and
/// embedded whitespace.
pub fn decode_base64(data: &str) -> Result<Bytes, FetchError> {
    let data = match data.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    };
    let compact: Vec<u8> = data
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    Ok(Bytes::from(STANDARD.decode(compact)?))
}

fn read_path(path: &Path) -> Result<Bytes, FetchError> {
    std::fs::read(path)
        .map(Bytes::from)
        .map_err(|source| FetchError::Io {
            path: path.to_path_buf(),
            source,
        })
}
