//! Vocal/accompaniment separation by driving the `spleeter` program.
//!
//! Each job gets its own scratch directory; nothing is shared between calls.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use isoport_core::fetch::fetch_audio;
use isoport_core::{Backend, Job, Payload, SeparationJob};
use tracing::{debug, info};

/// How much of the program's stderr ends up in an error message.
const STDERR_TAIL_BYTES: usize = 2048;

#[derive(Clone, Debug)]
pub struct SpleeterConfig {
    pub program: PathBuf,
    pub preset: String,
}

impl Default for SpleeterConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("spleeter"),
            preset: "spleeter:2stems".to_string(),
        }
    }
}

pub struct SpleeterBackend {
    config: SpleeterConfig,
}

impl SpleeterBackend {
    pub fn new(config: SpleeterConfig) -> Self {
        Self { config }
    }

    pub fn separate(&self, job: SeparationJob) -> Result<Payload> {
        let SpleeterConfig { program: path, preset } = &self.config;
        let started = Instant::now();

        let audio = fetch_audio(&job.audio_url, &job.audio).context("fetching audio")?;
        let scratch = tempfile::Builder::new()
            .prefix("isoport-spleeter-")
            .tempdir()
            .context("creating scratch dir")?;
        let input = scratch.path().join(input_file_name(&job.audio_url));
        let out_dir = scratch.path().join("out");
        std::fs::create_dir(&out_dir).context("creating output dir")?;
        std::fs::write(&input, &audio).context("writing input audio")?;

        debug!(program = %path.display(), %preset, input = %input.display(), "running separator");
        let output = Command::new(path)
            .arg("separate")
            .args(["-p", preset.as_str()])
            .arg("-o")
            .arg(&out_dir)
            .args(["-f", "{instrument}.{codec}"])
            .arg(&input)
            .output()
            .with_context(|| format!("failed to run {}", path.display()))?;
        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                path.display(),
                output.status,
                stderr_tail(&output.stderr)
            );
        }

        let vocals = read_stem(&out_dir, "vocals")?;
        let accomp = read_stem(&out_dir, "accompaniment")?;
        info!(
            source = %job.audio_url.chars().take(32).collect::<String>(),
            input_bytes = audio.len(),
            vocals_bytes = vocals.len(),
            accomp_bytes = accomp.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "separation finished"
        );
        Ok(Payload::Separation { vocals, accomp })
    }
}

impl Backend for SpleeterBackend {
    fn name(&self) -> &'static str {
        "spleeter"
    }

    fn accepts(&self, job: &Job) -> bool {
        matches!(job, Job::Separate(_))
    }

    fn run(&self, job: Job) -> Result<Payload> {
        match job {
            Job::Separate(job) => self.separate(job),
            other => bail!("spleeter backend cannot run {} jobs", other.kind()),
        }
    }
}

/// Keep the url's extension so the decoder can guess the container.
fn input_file_name(audio_url: &str) -> String {
    let path = audio_url.split(['?', '#']).next().unwrap_or_default();
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()));
    match ext {
        Some(ext) => format!("input.{}", ext.to_ascii_lowercase()),
        None => "input".to_string(),
    }
}

fn read_stem(out_dir: &Path, instrument: &str) -> Result<Bytes> {
    let path = out_dir.join(format!("{instrument}.wav"));
    std::fs::read(&path)
        .map(Bytes::from)
        .with_context(|| format!("separator produced no {instrument} stem at {}", path.display()))
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let start = text.len().saturating_sub(STDERR_TAIL_BYTES);
    let start = (start..=text.len())
        .find(|i| text.is_char_boundary(*i))
        .unwrap_or(text.len());
    text[start..].to_string()
}
