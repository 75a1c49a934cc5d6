//! Energy-based utterance segmentation
//!
//! Splits a microphone stream into speech segments: speech starts when the
//! RMS energy of a chunk crosses the threshold and ends after a run of
//! silence. Completed segments are handed to the transcription client.

use super::capture::SAMPLE_RATE;

/// Default minimum RMS energy to consider a chunk speech
pub const DEFAULT_ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum duration of speech for a segment (0.3 s at 16 kHz)
const MIN_SPEECH_SAMPLES: usize = 4800;

/// Silence duration that ends a segment (0.5 s at 16 kHz)
const SILENCE_SAMPLES: usize = 8000;

/// Segments are cut after this many samples even without silence (15 s)
const MAX_SEGMENT_SAMPLES: usize = SAMPLE_RATE as usize * 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Speaking,
}

/// Accumulates audio and yields complete speech segments
#[derive(Debug)]
pub struct SpeechSegmenter {
    threshold: f32,
    phase: Phase,
    buffer: Vec<f32>,
    silence: usize,
}

impl SpeechSegmenter {
    #[must_use]
    pub const fn new(threshold: f32) -> Self {
        Self {
            threshold,
            phase: Phase::Idle,
            buffer: Vec::new(),
            silence: 0,
        }
    }

    /// Feed a chunk of samples
    ///
    /// Returns a finished segment once enough speech has been followed by
    /// silence, or when the segment grows past the maximum length.
    pub fn push(&mut self, samples: &[f32]) -> Option<Vec<f32>> {
        let energy = calculate_energy(samples);
        let is_speech = energy > self.threshold;

        match self.phase {
            Phase::Idle => {
                if is_speech {
                    self.phase = Phase::Speaking;
                    self.buffer.clear();
                    self.buffer.extend_from_slice(samples);
                    self.silence = 0;
                    tracing::trace!(energy, "speech started");
                }
                None
            }
            Phase::Speaking => {
                self.buffer.extend_from_slice(samples);
                if is_speech {
                    self.silence = 0;
                } else {
                    self.silence += samples.len();
                }

                if self.buffer.len() >= MAX_SEGMENT_SAMPLES {
                    tracing::debug!(samples = self.buffer.len(), "segment cut at max length");
                    return Some(self.take());
                }

                if self.silence > SILENCE_SAMPLES {
                    if self.buffer.len() > MIN_SPEECH_SAMPLES + self.silence {
                        tracing::debug!(samples = self.buffer.len(), "speech segment complete");
                        return Some(self.take());
                    }
                    // A blip of noise, not speech
                    self.reset();
                }
                None
            }
        }
    }

    /// Audio of the segment in progress, if speech has started
    #[must_use]
    pub fn in_progress(&self) -> Option<&[f32]> {
        (self.phase == Phase::Speaking && self.buffer.len() > MIN_SPEECH_SAMPLES)
            .then_some(self.buffer.as_slice())
    }

    /// Return whatever speech is buffered and reset
    pub fn flush(&mut self) -> Option<Vec<f32>> {
        let segment = self.in_progress().is_some().then(|| self.take());
        self.reset();
        segment
    }

    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.phase == Phase::Speaking
    }

    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.buffer.clear();
        self.silence = 0;
    }

    fn take(&mut self) -> Vec<f32> {
        let segment = std::mem::take(&mut self.buffer);
        self.reset();
        segment
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(len: usize) -> Vec<f32> {
        vec![0.2; len]
    }

    fn silence(len: usize) -> Vec<f32> {
        vec![0.0; len]
    }

    #[test]
    fn test_energy_calculation() {
        assert!(calculate_energy(&silence(100)) < 0.001);
        assert!(calculate_energy(&vec![0.5f32; 100]) > 0.4);
        assert!(calculate_energy(&[]) < f32::EPSILON);
    }

    #[test]
    fn test_segment_after_speech_then_silence() {
        let mut seg = SpeechSegmenter::new(DEFAULT_ENERGY_THRESHOLD);
        assert!(seg.push(&silence(1600)).is_none());
        assert!(!seg.is_speaking());

        for _ in 0..5 {
            assert!(seg.push(&tone(1600)).is_none());
        }
        assert!(seg.is_speaking());
        assert!(seg.in_progress().is_some());

        let mut segment = None;
        for _ in 0..6 {
            if let Some(s) = seg.push(&silence(1600)) {
                segment = Some(s);
                break;
            }
        }
        let segment = segment.expect("segment should complete after silence");
        assert!(segment.len() > MIN_SPEECH_SAMPLES);
        assert!(!seg.is_speaking());
    }

    #[test]
    fn test_short_blip_is_discarded() {
        let mut seg = SpeechSegmenter::new(DEFAULT_ENERGY_THRESHOLD);
        seg.push(&tone(800));
        for _ in 0..6 {
            assert!(seg.push(&silence(1600)).is_none());
        }
        assert!(!seg.is_speaking());
    }

    #[test]
    fn test_flush_returns_buffered_speech() {
        let mut seg = SpeechSegmenter::new(DEFAULT_ENERGY_THRESHOLD);
        assert!(seg.flush().is_none());
        seg.push(&tone(8000));
        let flushed = seg.flush().unwrap();
        assert_eq!(flushed.len(), 8000);
        assert!(seg.flush().is_none());
    }

    #[test]
    fn test_max_length_cut() {
        let mut seg = SpeechSegmenter::new(DEFAULT_ENERGY_THRESHOLD);
        let mut cut = None;
        for _ in 0..=(MAX_SEGMENT_SAMPLES / 16000) {
            if let Some(s) = seg.push(&tone(16000)) {
                cut = Some(s);
                break;
            }
        }
        assert_eq!(cut.unwrap().len(), MAX_SEGMENT_SAMPLES);
    }
}
