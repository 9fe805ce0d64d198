//! Beat-synchronized music mixer
//!
//! The mixer runs on its own thread and owns every piece of playback state.
//! The game talks to it only through [`MusicMaster`], which pushes
//! [`Message`]s onto a FIFO guarded by a mutex and condition variable.
//! Sending never waits on the mixer.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::assets::{Song, SoundData};

/// Called once with the beat number it fired on
pub type BeatCallback = Box<dyn FnOnce(u64) + Send + 'static>;

/// Mixer command
pub enum Message {
    /// Advance playback by this many seconds
    Tick(f32),
    PlayTrack(usize),
    StopTrack(usize),
    /// Fire on the next beat divisible by `divisor` (0 behaves as 1)
    OnNextBeat { callback: BeatCallback, divisor: u64 },
    /// Playback speed factor; also scales the tempo
    SetPitch(f32),
    SetGain(f32),
    Shutdown,
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::Tick(dt) => write!(f, "Tick({})", dt),
            Message::PlayTrack(i) => write!(f, "PlayTrack({})", i),
            Message::StopTrack(i) => write!(f, "StopTrack({})", i),
            Message::OnNextBeat { divisor, .. } => write!(f, "OnNextBeat(divisor {})", divisor),
            Message::SetPitch(p) => write!(f, "SetPitch({})", p),
            Message::SetGain(g) => write!(f, "SetGain({})", g),
            Message::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// Errors reported when sending to the mixer
#[derive(Debug, Error, PartialEq)]
pub enum MusicError {
    #[error("song has no track {0}")]
    NoSuchTrack(usize),
    #[error("pitch must be a positive number, got {0}")]
    InvalidPitch(f32),
    #[error("tick delta must be a finite non-negative number, got {0}")]
    InvalidDelta(f32),
    #[error("music thread has shut down")]
    Closed,
}

/// Audio source handle issued by an [`AudioOutput`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub u32);

/// Audio device as seen from the mixer thread
pub trait AudioOutput: Send {
    fn create_source(&mut self) -> SourceId;
    fn play(&mut self, source: SourceId);
    fn stop(&mut self, source: SourceId);
    /// Append interleaved PCM16 samples to a source's stream
    fn queue(&mut self, source: SourceId, samples: &[i16], channels: u16, sample_rate: u32);
    fn set_pitch(&mut self, source: SourceId, pitch: f32);
    fn set_gain(&mut self, source: SourceId, gain: f32);
}

/// Output that discards everything
#[derive(Debug, Default)]
pub struct NullOutput {
    sources: u32,
}

impl AudioOutput for NullOutput {
    fn create_source(&mut self) -> SourceId {
        self.sources += 1;
        SourceId(self.sources)
    }
    fn play(&mut self, _source: SourceId) {}
    fn stop(&mut self, _source: SourceId) {}
    fn queue(&mut self, _source: SourceId, _samples: &[i16], _channels: u16, _rate: u32) {}
    fn set_pitch(&mut self, _source: SourceId, _pitch: f32) {}
    fn set_gain(&mut self, _source: SourceId, _gain: f32) {}
}

/// Mixer settings
#[derive(Debug, Clone)]
pub struct MixerConfig {
    /// Restart streams from the top when they run out
    pub looping: bool,
    /// Frames queued up front when a track starts
    pub chunk_frames: usize,
    pub gain: f32,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            looping: true,
            chunk_frames: 4096,
            gain: 1.0,
        }
    }
}

/// Read-only copy of the mixer state, published after every batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MixerStatus {
    pub beat: u64,
    pub bpm: f32,
    pub pitch: f32,
    pub gain: f32,
    /// Per-track playing flag
    pub active: Vec<bool>,
    pub pending_callbacks: usize,
    /// Messages consumed so far
    pub processed: u64,
}

struct MessageQueue {
    messages: Mutex<VecDeque<Message>>,
    wake: Condvar,
    closed: AtomicBool,
}

struct Track {
    source: SourceId,
    stream: Option<Arc<SoundData>>,
    /// Next frame to queue
    cursor: usize,
    active: bool,
}

struct Mixer<O: AudioOutput> {
    output: O,
    config: MixerConfig,
    song_bpm: f32,
    bpm: f32,
    beat_length: f32,
    beat_timer: f32,
    beat: u64,
    pitch: f32,
    gain: f32,
    pending: Vec<(BeatCallback, u64)>,
    tracks: Vec<Track>,
    processed: u64,
}

impl<O: AudioOutput> Mixer<O> {
    fn new(song: &Song, mut output: O, config: MixerConfig) -> Self {
        let tracks = song
            .tracks
            .iter()
            .map(|t| Track {
                source: output.create_source(),
                stream: t.stream.clone(),
                cursor: 0,
                active: false,
            })
            .collect();
        let song_bpm = song.bpm.max(1) as f32;
        Self {
            output,
            gain: config.gain,
            config,
            song_bpm,
            bpm: song_bpm,
            beat_length: 60.0 / song_bpm,
            beat_timer: 0.0,
            beat: 0,
            pitch: 1.0,
            pending: Vec::new(),
            tracks,
            processed: 0,
        }
    }

    /// Apply one message; returns false on shutdown
    fn handle(&mut self, message: Message) -> bool {
        self.processed += 1;
        match message {
            Message::Tick(dt) => self.tick(dt),
            Message::PlayTrack(index) => self.play(index),
            Message::StopTrack(index) => self.stop(index),
            Message::OnNextBeat { callback, divisor } => {
                self.pending.push((callback, divisor.max(1)));
            }
            Message::SetPitch(pitch) => {
                self.pitch = pitch;
                self.bpm = self.song_bpm * pitch;
                self.beat_length = 60.0 / self.bpm;
                for track in self.tracks.iter().filter(|t| t.active) {
                    self.output.set_pitch(track.source, pitch);
                }
                log::debug!("Pitch {} ({} bpm)", pitch, self.bpm);
            }
            Message::SetGain(gain) => {
                self.gain = gain;
                for track in self.tracks.iter().filter(|t| t.active) {
                    self.output.set_gain(track.source, gain);
                }
            }
            Message::Shutdown => return false,
        }
        true
    }

    fn tick(&mut self, dt: f32) {
        self.beat_timer += dt;
        while self.beat_timer >= self.beat_length {
            self.beat_timer -= self.beat_length;
            self.beat += 1;
            self.fire_callbacks();
        }

        for index in 0..self.tracks.len() {
            if !self.tracks[index].active {
                continue;
            }
            let frames = self.tracks[index]
                .stream
                .as_ref()
                .map(|s| (dt * s.sample_rate as f32 * self.pitch).ceil() as usize)
                .unwrap_or(0);
            self.fill(index, frames);
        }
    }

    /// Run and drop every callback due on the current beat, in registration order
    fn fire_callbacks(&mut self) {
        let beat = self.beat;
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|(_, divisor)| beat % divisor == 0);
        self.pending = waiting;
        for (callback, _) in due {
            if catch_unwind(AssertUnwindSafe(|| callback(beat))).is_err() {
                log::error!("Beat callback panicked on beat {}", beat);
            }
        }
    }

    /// Queue up to `frames` more frames of a track's stream
    fn fill(&mut self, index: usize, frames: usize) {
        let looping = self.config.looping;
        let track = &mut self.tracks[index];
        let Some(stream) = track.stream.clone() else {
            return;
        };
        let channels = stream.channels.max(1) as usize;
        let total = stream.frames();

        let mut remaining = frames;
        while remaining > 0 {
            if track.cursor >= total {
                if looping && total > 0 {
                    track.cursor = 0;
                } else {
                    self.output.stop(track.source);
                    track.active = false;
                    log::debug!("Track {} ran out of stream data", index);
                    return;
                }
            }
            let end = (track.cursor + remaining).min(total);
            self.output.queue(
                track.source,
                &stream.samples[track.cursor * channels..end * channels],
                stream.channels,
                stream.sample_rate,
            );
            remaining -= end - track.cursor;
            track.cursor = end;
        }
    }

    fn play(&mut self, index: usize) {
        let Some(track) = self.tracks.get_mut(index) else {
            log::warn!("PlayTrack({}) out of range", index);
            return;
        };
        if track.stream.is_none() {
            log::warn!("Track {} has no stream, not playing", index);
            return;
        }
        track.cursor = 0;
        track.active = true;
        let source = track.source;
        self.output.set_pitch(source, self.pitch);
        self.output.set_gain(source, self.gain);
        self.fill(index, self.config.chunk_frames);
        if self.tracks[index].active {
            self.output.play(source);
        }
    }

    fn stop(&mut self, index: usize) {
        let Some(track) = self.tracks.get_mut(index) else {
            log::warn!("StopTrack({}) out of range", index);
            return;
        };
        if track.active {
            track.active = false;
            self.output.stop(track.source);
        }
    }

    fn status(&self) -> MixerStatus {
        MixerStatus {
            beat: self.beat,
            bpm: self.bpm,
            pitch: self.pitch,
            gain: self.gain,
            active: self.tracks.iter().map(|t| t.active).collect(),
            pending_callbacks: self.pending.len(),
            processed: self.processed,
        }
    }
}

fn mixer_loop<O: AudioOutput>(
    mut mixer: Mixer<O>,
    queue: &MessageQueue,
    status: &Mutex<MixerStatus>,
) {
    loop {
        let batch = {
            let mut messages = queue.messages.lock();
            while messages.is_empty() {
                queue.wake.wait(&mut messages);
            }
            std::mem::take(&mut *messages)
        };

        for message in batch {
            if !mixer.handle(message) {
                *status.lock() = mixer.status();
                queue.closed.store(true, Ordering::Release);
                log::debug!("Music thread stopping");
                return;
            }
        }
        *status.lock() = mixer.status();
    }
}

/// Handle to the music thread
pub struct MusicMaster {
    queue: Arc<MessageQueue>,
    status: Arc<Mutex<MixerStatus>>,
    handle: Option<JoinHandle<()>>,
    track_count: usize,
    sent: AtomicU64,
}

impl MusicMaster {
    /// Start the mixer thread for a loaded song
    pub fn spawn<O: AudioOutput + 'static>(song: &Song, output: O, config: MixerConfig) -> Self {
        let mixer = Mixer::new(song, output, config);
        let status = Arc::new(Mutex::new(mixer.status()));
        let queue = Arc::new(MessageQueue {
            messages: Mutex::new(VecDeque::new()),
            wake: Condvar::new(),
            closed: AtomicBool::new(false),
        });

        let thread_queue = Arc::clone(&queue);
        let thread_status = Arc::clone(&status);
        let handle = thread::Builder::new()
            .name("music-mixer".into())
            .spawn(move || mixer_loop(mixer, &thread_queue, &thread_status))
            .expect("failed to spawn music thread");

        log::info!(
            "Music master started ({} tracks, {} bpm)",
            song.tracks.len(),
            song.bpm
        );
        Self {
            queue,
            status,
            handle: Some(handle),
            track_count: song.tracks.len(),
            sent: AtomicU64::new(0),
        }
    }

    /// Enqueue a message without waiting for the mixer
    pub fn send(&self, message: Message) -> Result<(), MusicError> {
        if self.queue.closed.load(Ordering::Acquire) {
            return Err(MusicError::Closed);
        }
        match &message {
            Message::PlayTrack(i) | Message::StopTrack(i) if *i >= self.track_count => {
                return Err(MusicError::NoSuchTrack(*i));
            }
            Message::SetPitch(p) if !(p.is_finite() && *p > 0.0) => {
                return Err(MusicError::InvalidPitch(*p));
            }
            Message::Tick(dt) if !(dt.is_finite() && *dt >= 0.0) => {
                return Err(MusicError::InvalidDelta(*dt));
            }
            _ => {}
        }

        self.queue.messages.lock().push_back(message);
        self.queue.wake.notify_one();
        self.sent.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    pub fn tick(&self, dt: f32) -> Result<(), MusicError> {
        self.send(Message::Tick(dt))
    }

    pub fn play_track(&self, index: usize) -> Result<(), MusicError> {
        self.send(Message::PlayTrack(index))
    }

    pub fn stop_track(&self, index: usize) -> Result<(), MusicError> {
        self.send(Message::StopTrack(index))
    }

    /// Run `callback` once, on the next beat divisible by `divisor`
    pub fn on_next_beat(
        &self,
        divisor: u64,
        callback: impl FnOnce(u64) + Send + 'static,
    ) -> Result<(), MusicError> {
        self.send(Message::OnNextBeat {
            callback: Box::new(callback),
            divisor,
        })
    }

    pub fn set_pitch(&self, pitch: f32) -> Result<(), MusicError> {
        self.send(Message::SetPitch(pitch))
    }

    pub fn set_gain(&self, gain: f32) -> Result<(), MusicError> {
        self.send(Message::SetGain(gain))
    }

    /// Latest published mixer state
    pub fn status(&self) -> MixerStatus {
        self.status.lock().clone()
    }

    /// Wait until every message sent so far has been consumed
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let sent = self.sent.load(Ordering::Acquire);
        while self.status.lock().processed < sent {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }

    pub fn track_count(&self) -> usize {
        self.track_count
    }
}

impl Drop for MusicMaster {
    fn drop(&mut self) {
        if !self.queue.closed.load(Ordering::Acquire) {
            self.queue.messages.lock().push_back(Message::Shutdown);
            self.queue.wake.notify_one();
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Music thread exited with a panic");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::SongTrack;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Play(SourceId),
        Stop(SourceId),
        Queue(SourceId, usize),
        Pitch(SourceId, f32),
        Gain(SourceId, f32),
    }

    #[derive(Clone, Default)]
    struct RecordingOutput {
        events: Arc<Mutex<Vec<Event>>>,
        sources: u32,
    }

    impl AudioOutput for RecordingOutput {
        fn create_source(&mut self) -> SourceId {
            self.sources += 1;
            SourceId(self.sources)
        }
        fn play(&mut self, source: SourceId) {
            self.events.lock().push(Event::Play(source));
        }
        fn stop(&mut self, source: SourceId) {
            self.events.lock().push(Event::Stop(source));
        }
        fn queue(&mut self, source: SourceId, samples: &[i16], _channels: u16, _rate: u32) {
            self.events.lock().push(Event::Queue(source, samples.len()));
        }
        fn set_pitch(&mut self, source: SourceId, pitch: f32) {
            self.events.lock().push(Event::Pitch(source, pitch));
        }
        fn set_gain(&mut self, source: SourceId, gain: f32) {
            self.events.lock().push(Event::Gain(source, gain));
        }
    }

    fn song(bpm: u32, frames: &[usize]) -> Song {
        Song {
            bpm,
            tracks: frames
                .iter()
                .enumerate()
                .map(|(i, &n)| SongTrack {
                    filename: format!("track{}.wav", i),
                    name: None,
                    stream: Some(Arc::new(SoundData {
                        channels: 1,
                        sample_rate: 1000,
                        samples: vec![0; n],
                    })),
                })
                .collect(),
        }
    }

    fn quiet_master(song: &Song) -> MusicMaster {
        MusicMaster::spawn(song, NullOutput::default(), MixerConfig::default())
    }

    fn settle(master: &MusicMaster) {
        assert!(master.wait_idle(Duration::from_secs(10)), "mixer never caught up");
    }

    #[test]
    fn test_beat_callback_fires_once() {
        let master = quiet_master(&song(120, &[]));
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        master
            .on_next_beat(1, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        // Burst of ticks spanning many beats
        for _ in 0..20 {
            master.tick(0.25).unwrap();
        }
        settle(&master);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        let status = master.status();
        assert_eq!(status.beat, 10);
        assert_eq!(status.pending_callbacks, 0);
    }

    #[test]
    fn test_divisor_and_registration_order() {
        let master = quiet_master(&song(60, &[]));
        let order = Arc::new(Mutex::new(Vec::new()));
        for (tag, divisor) in [("a", 1), ("four", 4), ("b", 1), ("zero", 0)] {
            let order = Arc::clone(&order);
            master
                .on_next_beat(divisor, move |beat| order.lock().push((tag, beat)))
                .unwrap();
        }
        for _ in 0..5 {
            master.tick(1.0).unwrap();
        }
        settle(&master);
        assert_eq!(
            *order.lock(),
            vec![("a", 1), ("b", 1), ("zero", 1), ("four", 4)]
        );
    }

    #[test]
    fn test_set_pitch_scales_tempo() {
        let output = RecordingOutput::default();
        let events = Arc::clone(&output.events);
        let master = MusicMaster::spawn(&song(120, &[10_000]), output, MixerConfig::default());
        master.play_track(0).unwrap();
        master.set_pitch(2.0).unwrap();
        settle(&master);

        let status = master.status();
        assert_eq!(status.bpm, 240.0);
        assert!(events.lock().contains(&Event::Pitch(SourceId(1), 2.0)));

        // Beat length is now a quarter second
        master.tick(1.0).unwrap();
        settle(&master);
        assert_eq!(master.status().beat, 4);
    }

    #[test]
    fn test_gain_applies_to_active_tracks_only() {
        let output = RecordingOutput::default();
        let events = Arc::clone(&output.events);
        let master = MusicMaster::spawn(&song(120, &[5000, 5000]), output, MixerConfig::default());
        master.play_track(1).unwrap();
        master.set_gain(0.5).unwrap();
        settle(&master);

        let events = events.lock();
        assert!(events.contains(&Event::Gain(SourceId(2), 0.5)));
        assert!(!events.contains(&Event::Gain(SourceId(1), 0.5)));
    }

    #[test]
    fn test_messages_are_fifo() {
        let output = RecordingOutput::default();
        let events = Arc::clone(&output.events);
        let config = MixerConfig {
            chunk_frames: 10,
            ..Default::default()
        };
        let master = MusicMaster::spawn(&song(120, &[1000]), output, config);
        master.play_track(0).unwrap();
        master.stop_track(0).unwrap();
        settle(&master);

        let events = events.lock();
        let play = events.iter().position(|e| *e == Event::Play(SourceId(1)));
        let stop = events.iter().position(|e| *e == Event::Stop(SourceId(1)));
        assert!(play.unwrap() < stop.unwrap());
        assert_eq!(master.status().active, vec![false]);
    }

    #[test]
    fn test_stream_end_deactivates_track() {
        let output = RecordingOutput::default();
        let events = Arc::clone(&output.events);
        let config = MixerConfig {
            looping: false,
            chunk_frames: 10,
            gain: 1.0,
        };
        let master = MusicMaster::spawn(&song(120, &[300]), output, config);
        master.play_track(0).unwrap();
        master.tick(0.125).unwrap();
        settle(&master);
        assert_eq!(master.status().active, vec![true]);

        master.tick(0.125).unwrap();
        master.tick(0.125).unwrap();
        settle(&master);
        assert_eq!(master.status().active, vec![false]);

        let events = events.lock();
        let queued: usize = events
            .iter()
            .filter_map(|e| match e {
                Event::Queue(_, n) => Some(*n),
                _ => None,
            })
            .sum();
        assert_eq!(queued, 300);
        assert_eq!(events.last(), Some(&Event::Stop(SourceId(1))));
    }

    #[test]
    fn test_looping_stream_wraps() {
        let config = MixerConfig {
            looping: true,
            chunk_frames: 10,
            gain: 1.0,
        };
        let master = MusicMaster::spawn(&song(120, &[30]), NullOutput::default(), config);
        master.play_track(0).unwrap();
        for _ in 0..10 {
            master.tick(0.05).unwrap();
        }
        settle(&master);
        assert_eq!(master.status().active, vec![true]);
    }

    #[test]
    fn test_missing_stream_never_plays() {
        let mut song = song(120, &[10]);
        song.tracks[0].stream = None;
        let master = MusicMaster::spawn(&song, NullOutput::default(), MixerConfig::default());
        master.play_track(0).unwrap();
        settle(&master);
        assert_eq!(master.status().active, vec![false]);
    }

    #[test]
    fn test_send_validation() {
        let master = quiet_master(&song(120, &[10]));
        assert_eq!(master.play_track(3), Err(MusicError::NoSuchTrack(3)));
        assert_eq!(master.set_pitch(0.0), Err(MusicError::InvalidPitch(0.0)));
        assert!(master.set_pitch(f32::NAN).is_err());
    }

    #[test]
    fn test_bad_tick_delta_is_rejected() {
        let master = quiet_master(&song(120, &[]));
        assert!(matches!(master.tick(f32::NAN), Err(MusicError::InvalidDelta(_))));
        assert_eq!(master.tick(f32::INFINITY), Err(MusicError::InvalidDelta(f32::INFINITY)));
        assert_eq!(master.tick(-0.5), Err(MusicError::InvalidDelta(-0.5)));

        // The beat clock keeps running afterwards
        for _ in 0..8 {
            master.tick(0.5).unwrap();
        }
        settle(&master);
        assert_eq!(master.status().beat, 8);
    }

    #[test]
    fn test_send_after_shutdown_fails() {
        let master = quiet_master(&song(120, &[]));
        master.send(Message::Shutdown).unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        while master.tick(0.1).is_ok() {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(master.tick(0.1), Err(MusicError::Closed));
    }
}
