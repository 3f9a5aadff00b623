use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Success fields produced by a worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    Separation {
        #[serde(with = "crate::b64")]
        vocals: Bytes,
        #[serde(with = "crate::b64")]
        accomp: Bytes,
    },
    Detection {
        delta_time: String,
        img_base64: String,
    },
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Separation { .. } => "separation",
            Payload::Detection { .. } => "detection",
        }
    }
}

/// What a worker leaves in the handoff slot: exactly one of a payload or a
/// failure message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Success(Payload),
    Failure { message: String },
}

impl JobOutcome {
    pub fn failure(message: impl Into<String>) -> Self {
        JobOutcome::Failure {
            message: message.into(),
        }
    }

    /// Flatten a handler result; errors keep their whole context chain.
    pub fn from_result(result: anyhow::Result<Payload>) -> Self {
        match result {
            Ok(payload) => JobOutcome::Success(payload),
            Err(err) => JobOutcome::failure(format!("{err:#}")),
        }
    }
}
