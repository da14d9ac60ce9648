//! Audio output side of streaming synthesis.
//!
//! The consumer owns a single output stream for the whole utterance and
//! writes buffers in the order they arrive, so chunk boundaries play without
//! gaps. Cancellation is cooperative through a shared [`CancelToken`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::error::TtsError;

/// How often a blocked consumer wakes up to look at the cancel flag.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// An open mono float32 output stream.
pub trait AudioSink {
    /// Queue samples for playback. May block while the device catches up.
    fn write(&mut self, samples: &[f32]) -> Result<(), TtsError>;

    /// Block until everything written so far has played.
    fn finish(&mut self) -> Result<(), TtsError>;

    /// Stop immediately, dropping anything not yet played.
    fn abort(&mut self);
}

/// Opens output streams on a device.
///
/// `open` is called on the consumer thread, so sinks need not be `Send`.
pub trait AudioOutput: Send + Sync {
    fn open(
        &self,
        device: Option<usize>,
        sample_rate: u32,
        cancel: &CancelToken,
    ) -> Result<Box<dyn AudioSink>, TtsError>;
}

/// Items on the producer to consumer queue.
#[derive(Debug)]
pub enum PlaybackMessage {
    Audio(Vec<f32>),
    EndOfStream,
}

/// What a finished stream did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackReport {
    pub chunks_played: usize,
    pub samples_written: usize,
    pub cancelled: bool,
}

/// Consumer loop: pulls buffers off `rx` and writes them to one sink.
///
/// Returns when the end-of-stream marker has played out, when the producer
/// disappears, or when `cancel` is raised. On cancel the sink is aborted and
/// nothing further is written.
pub(crate) fn consume(
    rx: Receiver<PlaybackMessage>,
    output: &dyn AudioOutput,
    device: Option<usize>,
    sample_rate: u32,
    cancel: &CancelToken,
) -> Result<PlaybackReport, TtsError> {
    let mut report = PlaybackReport::default();
    if cancel.is_cancelled() {
        report.cancelled = true;
        return Ok(report);
    }

    let mut sink = output.open(device, sample_rate, cancel)?;
    loop {
        if cancel.is_cancelled() {
            sink.abort();
            report.cancelled = true;
            break;
        }
        match rx.recv_timeout(CANCEL_POLL_INTERVAL) {
            Ok(PlaybackMessage::Audio(samples)) => {
                if cancel.is_cancelled() {
                    continue;
                }
                sink.write(&samples)?;
                report.chunks_played += 1;
                report.samples_written += samples.len();
            }
            Ok(PlaybackMessage::EndOfStream) | Err(RecvTimeoutError::Disconnected) => {
                sink.finish()?;
                report.cancelled = cancel.is_cancelled();
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    log::debug!(
        "Playback done: {} chunks, {} samples, cancelled={}",
        report.chunks_played,
        report.samples_written,
        report.cancelled
    );
    Ok(report)
}

#[cfg(feature = "playback")]
pub use device::{list_output_devices, RodioOutput};

#[cfg(feature = "playback")]
mod device {
    use std::thread;
    use std::time::Duration;

    use rodio::buffer::SamplesBuffer;
    use rodio::cpal::traits::{DeviceTrait, HostTrait};
    use rodio::{OutputStream, OutputStreamBuilder, Sink};

    use super::{AudioOutput, AudioSink, CancelToken};
    use crate::error::TtsError;

    /// Buffers allowed to sit in the device queue before `write` waits.
    const MAX_QUEUED_BUFFERS: usize = 2;
    const POLL_INTERVAL: Duration = Duration::from_millis(20);

    /// Names of the output devices on the default host, in index order.
    pub fn list_output_devices() -> Result<Vec<String>, TtsError> {
        let host = rodio::cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| TtsError::Audio(format!("Failed to enumerate output devices: {e}")))?;
        Ok(devices
            .map(|d| d.name().unwrap_or_else(|_| "<unnamed>".to_string()))
            .collect())
    }

    /// [`AudioOutput`] playing through the system audio stack.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct RodioOutput;

    impl AudioOutput for RodioOutput {
        fn open(
            &self,
            device: Option<usize>,
            sample_rate: u32,
            cancel: &CancelToken,
        ) -> Result<Box<dyn AudioSink>, TtsError> {
            let mut stream = match device {
                Some(index) => {
                    let device = rodio::cpal::default_host()
                        .output_devices()
                        .map_err(|e| TtsError::Audio(e.to_string()))?
                        .nth(index)
                        .ok_or_else(|| {
                            TtsError::Audio(format!("No output device at index {index}"))
                        })?;
                    OutputStreamBuilder::from_device(device)
                        .and_then(|builder| builder.open_stream_or_fallback())
                        .map_err(|e| TtsError::Audio(format!("Failed to open device: {e}")))?
                }
                None => OutputStreamBuilder::open_default_stream()
                    .map_err(|e| TtsError::Audio(format!("Failed to open audio output: {e}")))?,
            };
            stream.log_on_drop(false);
            let sink = Sink::connect_new(stream.mixer());
            log::debug!("Opened audio output at {sample_rate} Hz");

            Ok(Box::new(RodioSink {
                sink,
                _stream: stream,
                sample_rate,
                cancel: cancel.clone(),
            }))
        }
    }

    struct RodioSink {
        sink: Sink,
        // Dropping the stream closes the device.
        _stream: OutputStream,
        sample_rate: u32,
        cancel: CancelToken,
    }

    impl RodioSink {
        fn wait_until(&self, done: impl Fn(&Sink) -> bool) {
            while !done(&self.sink) && !self.cancel.is_cancelled() {
                thread::sleep(POLL_INTERVAL);
            }
        }
    }

    impl AudioSink for RodioSink {
        fn write(&mut self, samples: &[f32]) -> Result<(), TtsError> {
            self.wait_until(|sink| sink.len() < MAX_QUEUED_BUFFERS);
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            self.sink
                .append(SamplesBuffer::new(1, self.sample_rate, samples.to_vec()));
            Ok(())
        }

        fn finish(&mut self) -> Result<(), TtsError> {
            self.wait_until(Sink::empty);
            if self.cancel.is_cancelled() {
                self.sink.stop();
            }
            Ok(())
        }

        fn abort(&mut self) {
            self.sink.stop();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records every write; optionally raises the cancel flag after N writes.
    ///
    /// With a `gate`, each write blocks until the gate's sender sends or is
    /// dropped, like a device that is still busy playing.
    #[derive(Default)]
    pub(crate) struct RecordingOutput {
        pub writes: Arc<Mutex<Vec<Vec<f32>>>>,
        pub events: Arc<Mutex<Vec<&'static str>>>,
        pub cancel_after: Option<usize>,
        pub gate: Option<Receiver<()>>,
    }

    struct RecordingSink {
        writes: Arc<Mutex<Vec<Vec<f32>>>>,
        events: Arc<Mutex<Vec<&'static str>>>,
        cancel_after: Option<usize>,
        gate: Option<Receiver<()>>,
        cancel: CancelToken,
    }

    impl AudioOutput for RecordingOutput {
        fn open(
            &self,
            _device: Option<usize>,
            _sample_rate: u32,
            cancel: &CancelToken,
        ) -> Result<Box<dyn AudioSink>, TtsError> {
            self.events.lock().push("open");
            Ok(Box::new(RecordingSink {
                writes: Arc::clone(&self.writes),
                events: Arc::clone(&self.events),
                cancel_after: self.cancel_after,
                gate: self.gate.clone(),
                cancel: cancel.clone(),
            }))
        }
    }

    impl AudioSink for RecordingSink {
        fn write(&mut self, samples: &[f32]) -> Result<(), TtsError> {
            if let Some(gate) = &self.gate {
                let _ = gate.recv();
            }
            let mut writes = self.writes.lock();
            writes.push(samples.to_vec());
            if Some(writes.len()) == self.cancel_after {
                self.cancel.cancel();
            }
            Ok(())
        }

        fn finish(&mut self) -> Result<(), TtsError> {
            self.events.lock().push("finish");
            Ok(())
        }

        fn abort(&mut self) {
            self.events.lock().push("abort");
        }
    }

    #[test]
    fn plays_buffers_in_order_then_finishes() {
        let output = RecordingOutput::default();
        let (tx, rx) = crossbeam_channel::bounded(4);
        tx.send(PlaybackMessage::Audio(vec![1.0; 3])).unwrap();
        tx.send(PlaybackMessage::Audio(vec![2.0; 2])).unwrap();
        tx.send(PlaybackMessage::EndOfStream).unwrap();

        let report = consume(rx, &output, None, 24_000, &CancelToken::new()).unwrap();
        assert_eq!(
            report,
            PlaybackReport {
                chunks_played: 2,
                samples_written: 5,
                cancelled: false
            }
        );
        assert_eq!(*output.writes.lock(), vec![vec![1.0; 3], vec![2.0; 2]]);
        assert_eq!(*output.events.lock(), vec!["open", "finish"]);
    }

    #[test]
    fn cancelled_before_start_opens_nothing() {
        let output = RecordingOutput::default();
        let (_tx, rx) = crossbeam_channel::bounded(1);
        let cancel = CancelToken::new();
        cancel.cancel();

        let report = consume(rx, &output, None, 24_000, &cancel).unwrap();
        assert!(report.cancelled);
        assert!(output.events.lock().is_empty());
    }

    #[test]
    fn cancel_mid_stream_aborts_and_writes_nothing_more() {
        let output = RecordingOutput {
            cancel_after: Some(1),
            ..Default::default()
        };
        let (tx, rx) = crossbeam_channel::bounded(4);
        for i in 0..3 {
            tx.send(PlaybackMessage::Audio(vec![i as f32])).unwrap();
        }
        tx.send(PlaybackMessage::EndOfStream).unwrap();

        let report = consume(rx, &output, None, 24_000, &CancelToken::new()).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.chunks_played, 1);
        assert_eq!(output.writes.lock().len(), 1);
        assert_eq!(*output.events.lock(), vec!["open", "abort"]);
    }

    #[test]
    fn producer_disconnect_ends_playback() {
        let output = RecordingOutput::default();
        let (tx, rx) = crossbeam_channel::bounded(1);
        drop(tx);
        let report = consume(rx, &output, None, 24_000, &CancelToken::new()).unwrap();
        assert_eq!(report.chunks_played, 0);
        assert_eq!(*output.events.lock(), vec!["open", "finish"]);
    }

    #[test]
    fn cancel_token_clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
