use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use polyglot_tts::engines::kokoro::load_engine;
use polyglot_tts::playback::list_output_devices;
use polyglot_tts::{CancelToken, EngineConfig, SynthesisRequest, VoiceSelection};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    // Optional first argument: path to a JSON engine config.
    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_json_file(Path::new(&path))?,
        None => EngineConfig::default(),
    };

    let load_start = Instant::now();
    let engine = load_engine(&config)?;
    println!("Engine ready in {:.2?}", load_start.elapsed());

    println!("Languages: {:?}", engine.list_languages());
    println!("Models: {:?}", engine.list_models()?);
    println!("English voices: {:?}", engine.list_voices(Some("English (US)")));
    println!("Output devices: {:?}", list_output_devices()?);

    let text = "Hello! This is a multilingual streaming demo. \
                你好，世界。今日はいい天気ですね。 \
                The first sentence plays alone, then chunks grow as playback continues.";

    let request = SynthesisRequest::new(text, "af_heart");
    let report = engine.stream(&request)?;
    println!("Streamed {} chunks", report.chunks_played);

    // Cancel a long utterance after two seconds.
    let cancel = CancelToken::new();
    let long_text = "This sentence repeats to make a long utterance. ".repeat(30);
    let request = SynthesisRequest::new(long_text, "am_adam").with_cancel(cancel.clone());
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_secs(2));
        cancel.cancel();
    });
    let report = engine.stream(&request)?;
    canceller.join().map_err(|_| "cancel thread panicked")?;
    println!(
        "Cancelled stream after {} chunks (cancelled={})",
        report.chunks_played, report.cancelled
    );

    let blend = VoiceSelection::Blend(vec![
        ("af_heart".to_string(), 0.7),
        ("bf_emma".to_string(), 0.3),
    ]);
    let request = SynthesisRequest::new(text, blend).with_speed(1.1);

    let synth_start = Instant::now();
    let mut audio = engine.synthesize_to_memory(&request)?;
    let synth_dur = synth_start.elapsed();
    println!(
        "Synthesized {:.2}s audio in {:.2?} ({:.1}x real-time)",
        audio.duration_secs(),
        synth_dur,
        audio.duration_secs() / synth_dur.as_secs_f64()
    );

    audio.normalize_peak(0.95);
    audio.write_wav(&PathBuf::from("output.wav"))?;
    println!("Saved to output.wav");
    Ok(())
}
