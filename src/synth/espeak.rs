//! Offline speech through espeak-ng.
//!
//! espeak-ng renders at 22050Hz into a process-global callback buffer, so
//! calls are serialized and run on the blocking pool. The result is resampled
//! to 48kHz before it reaches the pipeline.

#![allow(non_upper_case_globals)]

use super::{PcmChunk, PcmStream, SpeechEngine};
use crate::{
    constants::{ESPEAK_SAMPLE_RATE, SAMPLE_RATE},
    error::SynthesisError,
    text::Speech,
};
use async_trait::async_trait;
use futures::StreamExt;
use rubato::{FftFixedIn, Resampler};

/// Samples per chunk handed to the pipeline.
const CHUNK_SAMPLES: usize = 4800;
const RESAMPLER_CHUNK: usize = 1024;

pub struct EspeakSpeech {
    voice: String,
}

impl EspeakSpeech {
    pub fn new(voice: impl Into<String>) -> Self {
        Self {
            voice: voice.into(),
        }
    }
}

#[async_trait]
impl SpeechEngine for EspeakSpeech {
    async fn synthesize(&self, speech: &Speech) -> Result<PcmStream, SynthesisError> {
        let voice = self.voice.clone();
        let text = speech.text.clone();

        let samples = tokio::task::spawn_blocking(move || {
            let wav = ffi::speak(&voice, &text)?;
            resample(&wav)
        })
        .await
        .map_err(|e| SynthesisError::Engine(format!("espeak task failed: {e}")))??;

        let chunks = samples
            .chunks(CHUNK_SAMPLES)
            .map(|chunk| Ok(chunk.to_vec()))
            .collect::<Vec<_>>();

        Ok(futures::stream::iter(chunks).boxed())
    }
}

/// Resample mono 22050Hz audio to the 48kHz pipeline rate.
fn resample(input: &[i16]) -> Result<PcmChunk, SynthesisError> {
    if input.is_empty() {
        return Ok(vec![]);
    }

    let mut resampler = FftFixedIn::<f64>::new(
        ESPEAK_SAMPLE_RATE as usize,
        SAMPLE_RATE as usize,
        RESAMPLER_CHUNK,
        2,
        1,
    )
    .map_err(|e| SynthesisError::Engine(format!("could not create resampler: {e}")))?;

    let expected = input.len() * SAMPLE_RATE as usize / ESPEAK_SAMPLE_RATE as usize;
    let mut output = Vec::with_capacity(expected + RESAMPLER_CHUNK * 3);

    for chunk in input.chunks(RESAMPLER_CHUNK) {
        let mut frames = chunk
            .iter()
            .map(|&s| s as f64 / 32768.0)
            .collect::<Vec<_>>();
        frames.resize(RESAMPLER_CHUNK, 0.0);

        let resampled = resampler
            .process(&[frames], None)
            .map_err(|e| SynthesisError::Engine(format!("resampling failed: {e}")))?;

        if let Some(channel) = resampled.first() {
            output.extend(
                channel
                    .iter()
                    .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16),
            );
        }
    }

    // Drop the zero padding of the last chunk
    output.truncate(expected.max(1));

    Ok(output)
}

mod ffi {
    use crate::error::SynthesisError;
    use espeakng_sys::*;
    use lazy_static::lazy_static;
    use std::ffi::{c_void, CString};
    use std::os::raw::{c_char, c_int, c_short};
    use std::sync::{Mutex, MutexGuard};

    const BUFF_LEN: i32 = 500;
    const OPTIONS: i32 = 0;

    lazy_static! {
        /// Held for the whole of one synthesis, espeak-ng is not reentrant
        static ref SPEAK_LOCK: Mutex<()> = Mutex::new(());
        static ref AUDIO: Mutex<Vec<i16>> = Mutex::new(Vec::new());
    }

    fn plock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn speak(voice: &str, text: &str) -> Result<Vec<i16>, SynthesisError> {
        let _guard = plock(&SPEAK_LOCK);
        plock(&AUDIO).clear();

        let voice = CString::new(voice)
            .map_err(|_| SynthesisError::Engine("voice name contains a nul byte".into()))?;
        let filtered: String = text.chars().filter(|&c| c != '\0').collect();
        let text = CString::new(filtered)
            .map_err(|_| SynthesisError::Engine("text contains a nul byte".into()))?;

        let sample_rate = unsafe {
            espeak_Initialize(
                espeak_AUDIO_OUTPUT_AUDIO_OUTPUT_RETRIEVAL,
                BUFF_LEN,
                std::ptr::null::<c_char>(),
                OPTIONS,
            )
        };
        if sample_rate <= 0 {
            return Err(SynthesisError::Engine(
                "espeak-ng failed to initialize".into(),
            ));
        }

        let result = unsafe {
            espeak_SetVoiceByName(voice.as_ptr());
            espeak_SetSynthCallback(Some(synth_callback));

            espeak_Synth(
                text.as_ptr() as *const c_void,
                BUFF_LEN as usize,
                0,
                0,
                0,
                espeakCHARS_AUTO,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            );

            let result = espeak_Synchronize();
            espeak_Terminate();
            result
        };

        match result {
            espeak_ERROR_EE_OK => Ok(std::mem::take(&mut *plock(&AUDIO))),
            code => Err(SynthesisError::Engine(format!(
                "espeak-ng synthesis failed with code {code}"
            ))),
        }
    }

    unsafe extern "C" fn synth_callback(
        wav: *mut c_short,
        sample_count: c_int,
        _events: *mut espeak_EVENT,
    ) -> c_int {
        if !wav.is_null() && sample_count > 0 {
            let samples = std::slice::from_raw_parts(wav, sample_count as usize);
            plock(&AUDIO).extend_from_slice(samples);
        }

        0
    }
}
