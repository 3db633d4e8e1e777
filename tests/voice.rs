//! Voice pipeline integration tests
//!
//! Tests voice components without requiring audio hardware

use std::io::Cursor;

use kiosk_concierge::voice::{
    DEFAULT_ENERGY_THRESHOLD, SAMPLE_RATE, SegmenterState, UtteranceSegmenter, decode_audio,
    energy, resample_audio, samples_to_wav,
};
use tokio_test::{assert_err, assert_ok};

mod common;
use common::{generate_silence, generate_sine_samples};

/// Feed audio to the segmenter in 100ms chunks, collecting utterances
fn segment(segmenter: &mut UtteranceSegmenter, audio: &[f32]) -> Vec<Vec<f32>> {
    audio
        .chunks(SAMPLE_RATE as usize / 10)
        .filter_map(|chunk| segmenter.push(chunk))
        .collect()
}

#[test]
fn test_segmenter_starts_idle() {
    let segmenter = UtteranceSegmenter::new(DEFAULT_ENERGY_THRESHOLD);
    assert_eq!(segmenter.state(), SegmenterState::Idle);
}

#[test]
fn test_silence_produces_no_utterance() {
    let mut segmenter = UtteranceSegmenter::new(DEFAULT_ENERGY_THRESHOLD);
    let utterances = segment(&mut segmenter, &generate_silence(3.0));
    assert!(utterances.is_empty());
    assert_eq!(segmenter.state(), SegmenterState::Idle);
}

#[test]
fn test_two_phrases_give_two_utterances() {
    let mut segmenter = UtteranceSegmenter::new(DEFAULT_ENERGY_THRESHOLD);

    let mut audio = generate_sine_samples(220.0, 1.0, 0.3);
    audio.extend(generate_silence(1.0));
    audio.extend(generate_sine_samples(330.0, 0.8, 0.3));
    audio.extend(generate_silence(1.0));

    let utterances = segment(&mut segmenter, &audio);
    assert_eq!(utterances.len(), 2);
    assert!(utterances[0].len() >= SAMPLE_RATE as usize);
}

#[test]
fn test_long_speech_is_capped() {
    let mut segmenter = UtteranceSegmenter::new(DEFAULT_ENERGY_THRESHOLD);
    let utterances = segment(&mut segmenter, &generate_sine_samples(200.0, 20.0, 0.3));

    assert_eq!(utterances.len(), 1);
    assert_eq!(utterances[0].len(), SAMPLE_RATE as usize * 15);
    // The remainder is already a new utterance in progress
    assert_eq!(segmenter.state(), SegmenterState::Speaking);
}

#[test]
fn test_energy_tracks_amplitude() {
    let quiet = energy(&generate_sine_samples(440.0, 0.1, 0.01));
    let loud = energy(&generate_sine_samples(440.0, 0.1, 0.5));

    assert!(quiet < DEFAULT_ENERGY_THRESHOLD);
    assert!(loud > 0.3);
    assert!(energy(&[]).abs() < f32::EPSILON);
}

#[test]
fn test_wav_encoding_is_16bit_mono() {
    let samples = generate_sine_samples(440.0, 0.5, 0.5);
    let wav = assert_ok!(samples_to_wav(&samples, SAMPLE_RATE));

    let reader = hound::WavReader::new(Cursor::new(&wav)).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.sample_rate, SAMPLE_RATE);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(reader.len() as usize, samples.len());
}

#[test]
fn test_reply_audio_decodes_and_resamples() {
    let wav = samples_to_wav(&generate_sine_samples(440.0, 1.0, 0.4), SAMPLE_RATE).unwrap();
    let clip = assert_ok!(decode_audio(&wav));
    assert_eq!(clip.sample_rate, SAMPLE_RATE);
    assert_eq!(clip.samples.len(), SAMPLE_RATE as usize);

    let resampled = assert_ok!(resample_audio(&clip.samples, SAMPLE_RATE, 48_000));
    assert_eq!(resampled.len(), 48_000);
    assert!(energy(&resampled) > 0.2);
}

#[test]
fn test_unplayable_reply_is_rejected() {
    assert_err!(decode_audio(&[]));
    assert_err!(decode_audio(b"{\"text\":\"json, not audio\"}"));
}
