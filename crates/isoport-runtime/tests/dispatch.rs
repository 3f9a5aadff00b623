use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use assert_matches::assert_matches;
use bytes::Bytes;
use isoport_core::{Backend, DispatchError, Job, Payload, SeparationJob};
use isoport_runtime::{Dispatcher, DispatcherConfig, Isolation};
use tokio_util::sync::CancellationToken;

/// Behaves according to `audio_url`: `fail:<msg>`, `panic`, `sleep:<ms>`,
/// otherwise echoes the inputs back.
struct Scripted;

impl Backend for Scripted {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn accepts(&self, job: &Job) -> bool {
        matches!(job, Job::Separate(_))
    }

    fn run(&self, job: Job) -> Result<Payload> {
        let Job::Separate(sep) = job else {
            anyhow::bail!("unexpected job");
        };
        if let Some(msg) = sep.audio_url.strip_prefix("fail:") {
            anyhow::bail!("{msg}");
        }
        if sep.audio_url == "panic" {
            panic!("native library blew up");
        }
        if let Some(ms) = sep.audio_url.strip_prefix("sleep:") {
            std::thread::sleep(Duration::from_millis(ms.parse()?));
        }
        Ok(Payload::Separation {
            vocals: sep.audio.clone(),
            accomp: Bytes::from(sep.audio_url.into_bytes()),
        })
    }
}

fn dispatcher(timeout: Option<Duration>) -> Dispatcher {
    Dispatcher::new(
        DispatcherConfig::new(Isolation::Thread)
            .timeout(timeout)
            .max_in_flight(4),
        Arc::new(Scripted),
    )
}

fn job(url: &str, audio: &'static [u8]) -> Job {
    Job::Separate(SeparationJob {
        audio_url: url.to_string(),
        audio: Bytes::from_static(audio),
    })
}

#[tokio::test]
async fn success_payload_is_returned_unchanged() {
    let payload = dispatcher(None).dispatch(job("song", b"pcm")).await.unwrap();
    assert_eq!(
        payload,
        Payload::Separation {
            vocals: Bytes::from_static(b"pcm"),
            accomp: Bytes::from_static(b"song"),
        }
    );
}

#[tokio::test]
async fn worker_error_message_is_forwarded() {
    let err = dispatcher(None)
        .dispatch(job("fail:model exploded", b""))
        .await
        .unwrap_err();
    assert_matches!(err, DispatchError::Worker { message } if message == "model exploded");
}

#[tokio::test]
async fn panicking_worker_yields_generic_failure() {
    let err = dispatcher(None).dispatch(job("panic", b"")).await.unwrap_err();
    assert_matches!(err, DispatchError::NoResult);
}

#[tokio::test]
async fn repeated_dispatch_is_idempotent() {
    let d = dispatcher(None);
    let first = d.dispatch(job("same", b"input")).await.unwrap();
    let second = d.dispatch(job("same", b"input")).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_do_not_share_slots() {
    let d = Arc::new(dispatcher(None));
    let mut handles = Vec::new();
    for i in 0..16 {
        let d = d.clone();
        handles.push(tokio::spawn(async move {
            let url = format!("sleep:{}", (i * 7) % 20);
            let out = d
                .dispatch(Job::Separate(SeparationJob {
                    audio_url: url.clone(),
                    audio: Bytes::from(format!("track-{i}")),
                }))
                .await
                .unwrap();
            (i, url, out)
        }));
    }
    for handle in handles {
        let (i, url, out) = handle.await.unwrap();
        assert_eq!(
            out,
            Payload::Separation {
                vocals: Bytes::from(format!("track-{i}")),
                accomp: Bytes::from(url),
            }
        );
    }
}

#[tokio::test]
async fn hung_worker_times_out() {
    let started = Instant::now();
    let err = dispatcher(Some(Duration::from_millis(50)))
        .dispatch(job("sleep:2000", b""))
        .await
        .unwrap_err();
    assert_matches!(err, DispatchError::Timeout(limit) if limit == Duration::from_millis(50));
    assert!(started.elapsed() < Duration::from_millis(1500));
}

#[tokio::test]
async fn cancel_token_stops_waiting() {
    let d = dispatcher(None);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });
    let err = d
        .dispatch_with_cancel(job("sleep:2000", b""), &cancel)
        .await
        .unwrap_err();
    assert_matches!(err, DispatchError::Cancelled);
}

#[tokio::test]
async fn shutdown_fails_new_calls() {
    let d = dispatcher(None);
    d.shutdown_token().cancel();
    let err = d.dispatch(job("song", b"pcm")).await.unwrap_err();
    assert_matches!(err, DispatchError::Cancelled);
}

#[tokio::test]
async fn abandoned_thread_keeps_its_slot() {
    let d = Dispatcher::new(
        DispatcherConfig::new(Isolation::Thread)
            .timeout(Some(Duration::from_millis(100)))
            .max_in_flight(1),
        Arc::new(Scripted),
    );
    let started = Instant::now();
    let err = d.dispatch(job("sleep:600", b"")).await.unwrap_err();
    assert_matches!(err, DispatchError::Timeout(_));

    // The only slot is still held by the hung thread.
    let payload = d.dispatch(job("song", b"pcm")).await.unwrap();
    assert_eq!(
        payload,
        Payload::Separation {
            vocals: Bytes::from_static(b"pcm"),
            accomp: Bytes::from_static(b"song"),
        }
    );
    assert!(started.elapsed() >= Duration::from_millis(550));
}
