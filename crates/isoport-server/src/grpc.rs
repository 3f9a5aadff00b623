use std::sync::Arc;

use bytes::Bytes;
use isoport_core::{Job, Payload, SeparationJob, MAX_MESSAGE_BYTES};
use isoport_proto::isoport::v1 as pb;
use isoport_proto::isoport::v1::sound_spleeter_server::SoundSpleeterServer;
use isoport_runtime::Dispatcher;
use tonic::{Request, Response, Status};
use tracing::warn;

pub struct SpleeterSvc {
    pub dispatcher: Arc<Dispatcher>,
}

/// The servicer wrapped with the transport's message ceiling in both directions.
pub fn spleeter_service(dispatcher: Arc<Dispatcher>) -> SoundSpleeterServer<SpleeterSvc> {
    SoundSpleeterServer::new(SpleeterSvc { dispatcher })
        .max_decoding_message_size(MAX_MESSAGE_BYTES)
        .max_encoding_message_size(MAX_MESSAGE_BYTES)
}

#[tonic::async_trait]
impl pb::sound_spleeter_server::SoundSpleeter for SpleeterSvc {
    async fn spleeter(
        &self,
        req: Request<pb::Input>,
    ) -> std::result::Result<Response<pb::Output>, Status> {
        let pb::Input { audio_url, audio } = req.into_inner();
        let job = Job::Separate(SeparationJob {
            audio_url,
            audio: Bytes::from(audio),
        });

        match self.dispatcher.dispatch(job).await {
            Ok(Payload::Separation { vocals, accomp }) => Ok(Response::new(pb::Output {
                vocals: vocals.to_vec(),
                accomp: accomp.to_vec(),
            })),
            Ok(other) => Err(Status::internal(format!(
                "worker returned a {} payload for a separation job",
                other.kind()
            ))),
            Err(err) => {
                warn!(error = %err, "spleeter call failed");
                Err(Status::internal(err.to_string()))
            }
        }
    }
}
