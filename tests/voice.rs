//! Voice subsystem integration tests
//!
//! Runs the wake monitor, speech capture and synthesis queue against
//! scripted engines; no audio hardware required.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, timeout};

use wordy_voice::Error;
use wordy_voice::voice::{
    AudioSession, CaptureEvent, CaptureOptions, CaptureSession, InputOwner, RecognitionError,
    RecognitionMode, SAMPLE_RATE, SessionMode, SpeechSegmenter, SynthesisEvent, SynthesisQueue,
    DEFAULT_ENERGY_THRESHOLD, WakeCue, WakePhraseMatcher, WakePhraseMonitor, samples_to_wav,
};

mod common;
use common::{CountingCue, ScriptedOutput, ScriptedRecognizer, Step};

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Generate sine wave audio samples
fn generate_sine_samples(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Generate silence
fn generate_silence(duration_secs: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    vec![0.0; num_samples]
}

fn matcher() -> WakePhraseMatcher {
    WakePhraseMatcher::new(vec!["hey wordy".to_string()], vec!["wordy".to_string()]).unwrap()
}

fn monitor(
    recognizer: &Arc<ScriptedRecognizer>,
    audio: &AudioSession,
) -> (
    WakePhraseMonitor,
    tokio::sync::mpsc::UnboundedReceiver<wordy_voice::voice::WakeDetection>,
    Arc<CountingCue>,
) {
    let cue = Arc::new(CountingCue::default());
    let (monitor, detections) = WakePhraseMonitor::new(
        matcher(),
        recognizer.clone(),
        audio.clone(),
        cue.clone(),
        ms(500),
    );
    (monitor, detections, cue)
}

fn capture_options() -> CaptureOptions {
    CaptureOptions {
        finalize_after_first_result: ms(1500),
        listen_timeout: Duration::from_secs(5),
    }
}

/// Yield until `pred` holds, advancing paused time in small steps
async fn eventually(mut pred: impl FnMut() -> bool) {
    for _ in 0..200 {
        if pred() {
            return;
        }
        tokio::time::sleep(ms(10)).await;
    }
    panic!("condition never became true");
}

#[test]
fn test_matcher_detects_phrases_in_any_case() {
    let m = matcher();
    for transcript in ["hey wordy", "HEY WORDY", "um hey wordy what", "wordie... wordy?"] {
        assert!(m.matches(transcript).is_some(), "{transcript}");
    }
    for transcript in ["hello there", "", "   ", "word"] {
        assert!(m.matches(transcript).is_none(), "{transcript}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_monitor_fires_once_and_pauses() {
    let recognizer = ScriptedRecognizer::new();
    recognizer.push_continuous(vec![
        Step::Partial("what is"),
        Step::Final("hey wordy"),
        Step::Final("hey wordy"),
    ]);
    let audio = AudioSession::new();
    let (mut monitor, mut detections, cue) = monitor(&recognizer, &audio);

    monitor.start();
    let detection = timeout(Duration::from_secs(5), detections.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(detection.phrase, "hey wordy");

    // Auto-paused: the second phrase never surfaces
    assert!(timeout(Duration::from_secs(1), detections.recv()).await.is_err());
    assert_eq!(cue.count(), 1);

    let state = monitor.state();
    assert!(state.running);
    assert!(state.paused);
    assert!(state.last_heard_transcript.is_empty());
    assert!(!monitor.is_listening());
    assert_eq!(audio.input_owner(), None);

    monitor.stop();
}

/// Cue that remembers the session mode it was played under
struct ModeCue {
    audio: AudioSession,
    heard: std::sync::Mutex<Vec<SessionMode>>,
}

impl WakeCue for ModeCue {
    fn acknowledge(&self) {
        self.heard.lock().unwrap().push(self.audio.mode());
    }
}

#[tokio::test(start_paused = true)]
async fn test_wake_cue_plays_after_output_is_configured() {
    let recognizer = ScriptedRecognizer::new();
    recognizer.push_continuous(vec![Step::Final("hey wordy")]);
    let audio = AudioSession::new();
    let cue = Arc::new(ModeCue {
        audio: audio.clone(),
        heard: Default::default(),
    });
    let (mut monitor, mut detections) = WakePhraseMonitor::new(
        matcher(),
        recognizer.clone(),
        audio.clone(),
        cue.clone(),
        ms(500),
    );

    monitor.start();
    timeout(Duration::from_secs(5), detections.recv())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(*cue.heard.lock().unwrap(), vec![SessionMode::Playback]);
    assert_eq!(audio.mode(), SessionMode::Playback);
    assert_eq!(audio.input_owner(), None);

    monitor.stop();
}

#[tokio::test(start_paused = true)]
async fn test_monitor_restarts_after_engine_error() {
    let recognizer = ScriptedRecognizer::new();
    recognizer.push_continuous(vec![Step::Fail(RecognitionError::Engine("glitch".to_string()))]);
    recognizer.push_continuous(vec![Step::Final("hey wordy")]);
    let audio = AudioSession::new();
    let (mut monitor, mut detections, _cue) = monitor(&recognizer, &audio);

    let started = Instant::now();
    monitor.start();
    let detection = timeout(Duration::from_secs(5), detections.recv())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(detection.transcript, "hey wordy");
    assert!(started.elapsed() >= ms(500));
    assert_eq!(recognizer.starts(RecognitionMode::Continuous), 2);

    monitor.stop();
}

#[tokio::test(start_paused = true)]
async fn test_monitor_waits_after_cancellation() {
    let recognizer = ScriptedRecognizer::new();
    recognizer.push_continuous(vec![Step::Fail(RecognitionError::Cancelled)]);
    let audio = AudioSession::new();
    let (mut monitor, _detections, _cue) = monitor(&recognizer, &audio);

    monitor.start();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(recognizer.starts(RecognitionMode::Continuous), 1);
    assert!(!monitor.is_listening());

    // An explicit resume re-engages
    monitor.resume();
    eventually(|| monitor.is_listening()).await;
    assert_eq!(recognizer.starts(RecognitionMode::Continuous), 2);

    monitor.stop();
}

#[tokio::test(start_paused = true)]
async fn test_monitor_pause_resume_and_stop() {
    let recognizer = ScriptedRecognizer::new();
    let audio = AudioSession::new();
    let (mut monitor, _detections, _cue) = monitor(&recognizer, &audio);

    monitor.start();
    eventually(|| monitor.is_listening()).await;
    assert_eq!(audio.input_owner(), Some(InputOwner::WakeMonitor));

    monitor.pause();
    assert!(!monitor.is_listening());
    assert_eq!(audio.input_owner(), None);
    assert!(monitor.state().running);
    assert_eq!(recognizer.stops(), 1);

    monitor.resume();
    eventually(|| monitor.is_listening()).await;

    monitor.stop();
    monitor.stop();
    assert!(!monitor.state().running);
    assert_eq!(audio.input_owner(), None);

    // Resume does nothing once stopped
    monitor.resume();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!monitor.is_listening());
    assert_eq!(recognizer.starts(RecognitionMode::Continuous), 2);
}

#[tokio::test(start_paused = true)]
async fn test_capture_refused_while_monitor_listens() {
    let recognizer = ScriptedRecognizer::new();
    let audio = AudioSession::new();
    let (mut monitor, _detections, _cue) = monitor(&recognizer, &audio);
    let mut capture = CaptureSession::new(recognizer.clone(), audio.clone(), capture_options());

    monitor.start();
    eventually(|| monitor.is_listening()).await;

    let err = capture.start_capture().unwrap_err();
    assert!(matches!(err, Error::EngineStart(_)));
    assert_eq!(recognizer.starts(RecognitionMode::OneShot), 0);

    monitor.pause();
    let handle = capture.start_capture().unwrap();
    assert_eq!(audio.input_owner(), Some(InputOwner::SpeechCapture));
    drop(handle);
    capture.cancel();
    monitor.stop();
}

#[tokio::test(start_paused = true)]
async fn test_capture_cancel_never_yields_transcript() {
    let recognizer = ScriptedRecognizer::new();
    recognizer.push_one_shot(vec![
        Step::Wait(ms(100)),
        Step::Partial("apple"),
        Step::Final("apple"),
    ]);
    let audio = AudioSession::new();
    let mut capture = CaptureSession::new(recognizer.clone(), audio.clone(), capture_options());

    let mut handle = capture.start_capture().unwrap();
    assert!(capture.is_active());
    capture.cancel();

    assert_eq!(audio.input_owner(), None);
    assert!(!capture.is_active());
    assert_eq!(recognizer.stops(), 1);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(handle.next_event().await, CaptureEvent::Cancelled);
    assert_eq!(handle.next_event().await, CaptureEvent::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_capture_finalizes_after_first_partial() {
    let recognizer = ScriptedRecognizer::new();
    recognizer.push_one_shot(vec![
        Step::Partial("ephem"),
        Step::Partial("ephemeral"),
        Step::Wait(Duration::from_secs(10)),
        Step::Final("too late"),
    ]);
    let audio = AudioSession::new();
    let mut capture = CaptureSession::new(recognizer.clone(), audio.clone(), capture_options());

    let started = Instant::now();
    let mut handle = capture.start_capture().unwrap();
    assert_eq!(handle.next_event().await, CaptureEvent::Partial("ephem".to_string()));
    assert!(capture.state().unwrap().partial_transcript.starts_with("ephem"));

    let outcome = handle.finish().await.unwrap();
    assert_eq!(outcome.transcript, "ephemeral");
    assert!(outcome.error.is_none());

    let elapsed = started.elapsed();
    assert!(elapsed >= ms(1500), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(10), "{elapsed:?}");
    assert_eq!(audio.input_owner(), None);
    assert!(!capture.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_capture_times_out_with_empty_transcript() {
    let recognizer = ScriptedRecognizer::new();
    let audio = AudioSession::new();
    let mut capture = CaptureSession::new(recognizer.clone(), audio.clone(), capture_options());

    let started = Instant::now();
    let outcome = capture.start_capture().unwrap().finish().await.unwrap();

    assert!(outcome.is_empty());
    assert!(outcome.error.is_none());
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_eq!(audio.input_owner(), None);
}

#[tokio::test(start_paused = true)]
async fn test_capture_empty_final_keeps_partial() {
    let recognizer = ScriptedRecognizer::new();
    recognizer.push_one_shot(vec![Step::Partial("lucid"), Step::Final("  ")]);
    let audio = AudioSession::new();
    let mut capture = CaptureSession::new(recognizer.clone(), audio, capture_options());

    let outcome = capture.start_capture().unwrap().finish().await.unwrap();
    assert_eq!(outcome.transcript, "lucid");
}

#[tokio::test(start_paused = true)]
async fn test_capture_error_keeps_partial_and_reports() {
    let recognizer = ScriptedRecognizer::new();
    recognizer.push_one_shot(vec![
        Step::Partial("app"),
        Step::Fail(RecognitionError::Engine("network down".to_string())),
    ]);
    let audio = AudioSession::new();
    let mut capture = CaptureSession::new(recognizer.clone(), audio, capture_options());

    let outcome = capture.start_capture().unwrap().finish().await.unwrap();
    assert_eq!(outcome.transcript, "app");
    assert_eq!(
        outcome.error,
        Some(RecognitionError::Engine("network down".to_string()))
    );
}

#[tokio::test(start_paused = true)]
async fn test_speak_preempts_previous_utterance() {
    let output = ScriptedOutput::new(ms(200));
    let queue = SynthesisQueue::new(output.clone(), AudioSession::new());
    let mut events = queue.subscribe();

    let first = queue.speak("first", 1.0, None);
    let second = queue.speak("second", 1.0, None);

    let mut seen = Vec::new();
    loop {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        seen.push(event);
        if event == SynthesisEvent::Finished(second) {
            break;
        }
    }

    assert!(seen.contains(&SynthesisEvent::Cancelled(first)));
    assert!(seen.contains(&SynthesisEvent::Started(second)));
    assert!(!seen.contains(&SynthesisEvent::Finished(first)));
    assert_eq!(output.spoken().last().map(String::as_str), Some("second"));
}

#[tokio::test(start_paused = true)]
async fn test_sequence_speaks_in_order_with_pause() {
    let output = ScriptedOutput::new(ms(100));
    let queue = SynthesisQueue::new(output.clone(), AudioSession::new());
    let mut events = queue.subscribe();

    let started = Instant::now();
    let ids = queue.enqueue_sequence(&["one", "two", "three"], 1.0, ms(300));
    assert_eq!(ids.len(), 3);

    let last = *ids.last().unwrap();
    let mut finished = Vec::new();
    while finished.last() != Some(&last) {
        if let SynthesisEvent::Finished(id) = events.recv().await.unwrap() {
            finished.push(id);
        }
    }

    assert_eq!(finished, ids);
    assert_eq!(output.spoken(), vec!["one", "two", "three"]);
    assert!(started.elapsed() >= ms(3 * 100 + 2 * 300));
    assert!(!queue.is_speaking());
}

#[tokio::test(start_paused = true)]
async fn test_stop_drops_remaining_sequence() {
    let output = ScriptedOutput::new(ms(100));
    let queue = SynthesisQueue::new(output.clone(), AudioSession::new());
    let mut events = queue.subscribe();

    let ids = queue.enqueue_sequence(&["one", "two"], 1.0, ms(50));
    assert_eq!(events.recv().await.unwrap(), SynthesisEvent::Started(ids[0]));
    queue.stop();
    assert_eq!(events.recv().await.unwrap(), SynthesisEvent::Cancelled(ids[0]));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(events.try_recv().is_err());
    assert_eq!(output.spoken(), vec!["one"]);
    assert!(!queue.is_speaking());
}

#[tokio::test(start_paused = true)]
async fn test_output_refused_during_capture_still_finishes() {
    let recognizer = ScriptedRecognizer::new();
    let audio = AudioSession::new();
    let mut capture = CaptureSession::new(recognizer, audio.clone(), capture_options());
    let output = ScriptedOutput::new(ms(100));
    let queue = SynthesisQueue::new(output.clone(), audio);
    let mut events = queue.subscribe();

    let _handle = capture.start_capture().unwrap();
    let id = queue.speak("hello", 1.0, None);

    assert_eq!(events.recv().await.unwrap(), SynthesisEvent::Started(id));
    assert_eq!(events.recv().await.unwrap(), SynthesisEvent::Finished(id));
    assert!(output.spoken().is_empty());
    capture.cancel();
}

#[test]
fn test_segmenter_splits_on_silence() {
    let mut segmenter = SpeechSegmenter::new(DEFAULT_ENERGY_THRESHOLD);

    assert!(segmenter.push(&generate_silence(0.1)).is_none());
    assert!(!segmenter.is_speaking());

    let speech = generate_sine_samples(440.0, 0.5, 0.3);
    assert!(segmenter.push(&speech).is_none());
    assert!(segmenter.is_speaking());

    let segment = segmenter.push(&generate_silence(0.6)).unwrap();
    assert!(segment.len() > speech.len());
    assert!(!segmenter.is_speaking());
}

#[test]
fn test_samples_to_wav() {
    let samples = generate_sine_samples(440.0, 0.1, 0.5);
    let wav_data = samples_to_wav(&samples, SAMPLE_RATE).unwrap();

    assert_eq!(&wav_data[0..4], b"RIFF");
    assert_eq!(&wav_data[8..12], b"WAVE");
    assert!(wav_data.len() > 44);
}

#[test]
fn test_wav_readable_by_hound() {
    let original: Vec<f32> = vec![0.0, 0.5, -0.5, 1.0, -1.0, 0.25];
    let wav_data = samples_to_wav(&original, SAMPLE_RATE).unwrap();

    let mut reader = hound::WavReader::new(Cursor::new(wav_data)).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, SAMPLE_RATE);
    assert_eq!(spec.channels, 1);

    let read: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(read.len(), original.len());
}
