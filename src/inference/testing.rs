//! Fixtures shared by the unit tests.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::inference::engines::{EngineError, EngineResult, SpeechEngine};
use crate::inference::task::transcribe::TranscriptionRequest;

/// Writes a 16-bit sine tone, the same signal on every channel.
pub(crate) fn write_tone_wav(
    path: &Path,
    sample_rate: u32,
    channels: u16,
    seconds: f32,
    frequency: f32,
) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let frames = (sample_rate as f32 * seconds) as usize;
    for n in 0..frames {
        let t = n as f32 / sample_rate as f32;
        let value = (t * frequency * std::f32::consts::TAU).sin() * 0.5;
        for _ in 0..channels {
            writer
                .write_sample((value * f32::from(i16::MAX)) as i16)
                .unwrap();
        }
    }
    writer.finalize().unwrap();
}

/// Engine double returning a canned result and recording what it was asked.
pub(crate) struct FakeEngine {
    name: &'static str,
    available: bool,
    result: EngineResult,
    calls: AtomicUsize,
    seen: Mutex<Vec<TranscriptionRequest>>,
}

impl FakeEngine {
    pub(crate) fn succeeding(name: &'static str, text: &str) -> Self {
        Self::new(name, true, Ok(text.to_string()))
    }

    pub(crate) fn failing(name: &'static str, error: EngineError) -> Self {
        Self::new(name, true, Err(error))
    }

    pub(crate) fn unavailable(name: &'static str) -> Self {
        Self::new(name, false, Ok("should never be used".to_string()))
    }

    fn new(name: &'static str, available: bool, result: EngineResult) -> Self {
        Self {
            name,
            available,
            result,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn seen(&self) -> Vec<TranscriptionRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechEngine for FakeEngine {
    fn name(&self) -> &str {
        self.name
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn transcribe(&self, request: &TranscriptionRequest) -> EngineResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(request.clone());
        self.result.clone()
    }
}
