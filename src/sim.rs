//! Synthetic pipeline peers for the demo binary and tests.
//!
//! - `SyntheticSource`: upstream producing fixed-rate frames for whatever
//!   range it is asked for, from its own streaming thread
//! - `CollectSink`: downstream recording everything it receives, with
//!   optional real-time pacing and failure injection

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use log::{debug, info, trace, warn};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::core::clock::ClockTime;
use crate::core::error::FlowError;
use crate::core::event::{Caps, Event, SeekEvent, SeekFlags};
use crate::core::frame_cache::CacheSink;
use crate::core::pad::{Downstream, Upstream};
use crate::core::segment::Segment;
use crate::core::store::Entry;

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub fps: u32,
    /// Payload bytes per frame
    pub frame_size: usize,
    /// End of the synthetic media
    pub media_duration: ClockTime,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            fps: 25,
            frame_size: 64 * 1024,
            media_duration: ClockTime::from_seconds(10),
        }
    }
}

impl SourceSettings {
    pub fn frame_duration(&self) -> ClockTime {
        ClockTime::from_nseconds(ClockTime::SECOND.nseconds() / u64::from(self.fps.max(1)))
    }

    pub fn caps(&self) -> Caps {
        Caps::new("video/x-synthetic")
            .field("framerate", format!("{}/1", self.fps))
            .field("frame-size", self.frame_size)
    }
}

enum Command {
    Range(SeekEvent),
    Shutdown,
}

/// How a range ended
enum RangeEnd {
    Done,
    Interrupted(Command),
}

/// Upstream that answers range requests with synthetic frames.
///
/// Holds a `CacheSink` while streaming: call `shutdown()` to release it.
pub struct SyntheticSource {
    settings: SourceSettings,
    commands: Sender<Command>,
    receiver: Mutex<Option<Receiver<Command>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SyntheticSource {
    pub fn new(settings: SourceSettings) -> Self {
        let (commands, receiver) = crossbeam_channel::unbounded();
        Self {
            settings,
            commands,
            receiver: Mutex::new(Some(receiver)),
            thread: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    /// Start streaming into `sink`. Range requests sent before this are
    /// queued and served once started.
    pub fn start(&self, sink: CacheSink) -> std::io::Result<()> {
        let Some(receiver) = self.receiver.lock().unwrap_or_else(|e| e.into_inner()).take() else {
            return Ok(());
        };
        let settings = self.settings.clone();
        let handle = thread::Builder::new()
            .name("framecache-source".into())
            .spawn(move || stream_loop(receiver, sink, settings))?;
        *self.thread.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        info!(
            "Synthetic source started: {} fps, {} bytes/frame, {}",
            self.settings.fps, self.settings.frame_size, self.settings.media_duration
        );
        Ok(())
    }

    /// Stop the streaming thread and wait for it.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        let handle = self.thread.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle
            && handle.thread().id() != thread::current().id()
        {
            let _ = handle.join();
        }
    }
}

impl Upstream for SyntheticSource {
    fn send_event(&self, event: Event) -> Result<(), FlowError> {
        match event {
            Event::Seek(seek) => self
                .commands
                .send(Command::Range(seek))
                .map_err(|_| FlowError::NotLinked),
            other => {
                trace!("Source ignoring {}", other.name());
                Ok(())
            }
        }
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn stream_loop(receiver: Receiver<Command>, sink: CacheSink, settings: SourceSettings) {
    let mut pending = None;
    loop {
        let seek = match pending.take() {
            Some(seek) => seek,
            None => match receiver.recv() {
                Ok(Command::Range(seek)) => seek,
                Ok(Command::Shutdown) | Err(_) => break,
            },
        };

        match stream_range(&receiver, &sink, &settings, &seek) {
            RangeEnd::Done => {}
            RangeEnd::Interrupted(Command::Range(next)) => pending = Some(next),
            RangeEnd::Interrupted(Command::Shutdown) => break,
        }
    }
    debug!("Synthetic source thread exiting");
}

fn stream_range(receiver: &Receiver<Command>, sink: &CacheSink, settings: &SourceSettings, seek: &SeekEvent) -> RangeEnd {
    let frame = settings.frame_duration().nseconds().max(1);
    let media_end = settings.media_duration;
    let stop = seek.stop.unwrap_or(media_end).min(media_end);
    let requested = seek.start.unwrap_or(ClockTime::ZERO);

    // Key-unit snap: every frame is a key frame
    let mut index = requested.nseconds() / frame;
    if !seek.flags.contains(SeekFlags::SNAP_BEFORE) && index * frame < requested.nseconds() {
        index += 1;
    }
    let start = ClockTime::from_nseconds(index * frame).min(stop);

    debug!("Source streaming [{}, {})", start, stop);

    if seek.flags.contains(SeekFlags::FLUSH) {
        sink.push_event(Event::FlushStart);
        sink.push_event(Event::FlushStop { reset_time: true });
    }
    sink.push_event(Event::Caps(settings.caps()));
    sink.push_event(Event::Segment(Segment::new_time(start, Some(stop))));

    loop {
        let timestamp = ClockTime::from_nseconds(index * frame);
        if timestamp >= stop {
            break;
        }

        match receiver.try_recv() {
            Ok(command) => {
                debug!("Source range [{}, {}) interrupted at {}", start, stop, timestamp);
                return RangeEnd::Interrupted(command);
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => return RangeEnd::Interrupted(Command::Shutdown),
        }

        let next = ClockTime::from_nseconds((index + 1) * frame).min(media_end);
        let payload = Bytes::from(vec![(index % 256) as u8; settings.frame_size]);
        match sink.push(Entry::new(timestamp, next - timestamp, payload)) {
            Ok(()) => {}
            Err(FlowError::Flushing) => {
                debug!("Cache flushing, dropping rest of [{}, {})", start, stop);
                return RangeEnd::Done;
            }
            Err(e) => {
                warn!("Cache refused {}: {}", timestamp, e);
                return RangeEnd::Done;
            }
        }
        index += 1;
    }

    sink.push_event(Event::Eos);
    RangeEnd::Done
}

#[derive(Debug, Default)]
struct Collected {
    entries: Vec<Entry>,
    events: Vec<Event>,
    /// Bumped on every flush-start; interrupts pacing
    flush_generation: u64,
}

/// Downstream that records what it is given.
#[derive(Debug, Default)]
pub struct CollectSink {
    collected: Mutex<Collected>,
    cond: Condvar,
    realtime: bool,
    failure: Mutex<Option<(usize, FlowError)>>,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block each push for the entry's duration, like a display would.
    pub fn realtime() -> Self {
        Self {
            realtime: true,
            ..Self::default()
        }
    }

    fn lock(&self) -> MutexGuard<'_, Collected> {
        self.collected.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Refuse every push once `after` entries were accepted.
    pub fn fail_after(&self, after: usize, error: FlowError) {
        *self.failure.lock().unwrap_or_else(|e| e.into_inner()) = Some((after, error));
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.lock().entries.clone()
    }

    pub fn timestamps(&self) -> Vec<ClockTime> {
        self.lock().entries.iter().map(|e| e.timestamp).collect()
    }

    pub fn served_count(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn event_names(&self) -> Vec<&'static str> {
        self.lock().events.iter().map(Event::name).collect()
    }

    pub fn segments(&self) -> Vec<Segment> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Segment(segment) => Some(segment.clone()),
                _ => None,
            })
            .collect()
    }

    /// Forget everything received so far
    pub fn clear(&self) {
        let mut collected = self.lock();
        collected.entries.clear();
        collected.events.clear();
    }

    pub fn wait_for_served(&self, count: usize, timeout: Duration) -> bool {
        let (collected, _) = self
            .cond
            .wait_timeout_while(self.lock(), timeout, |c| c.entries.len() < count)
            .unwrap_or_else(|e| e.into_inner());
        collected.entries.len() >= count
    }

    pub fn wait_for_event(&self, name: &str, timeout: Duration) -> bool {
        let (collected, _) = self
            .cond
            .wait_timeout_while(self.lock(), timeout, |c| !c.events.iter().any(|e| e.name() == name))
            .unwrap_or_else(|e| e.into_inner());
        collected.events.iter().any(|e| e.name() == name)
    }
}

impl Downstream for CollectSink {
    fn push(&self, entry: Entry) -> Result<(), FlowError> {
        let mut collected = self.lock();
        if let Some((after, error)) = self.failure.lock().unwrap_or_else(|e| e.into_inner()).clone()
            && collected.entries.len() >= after
        {
            return Err(error);
        }

        let pace: Duration = entry.duration.into();
        collected.entries.push(entry);
        self.cond.notify_all();

        if self.realtime {
            let generation = collected.flush_generation;
            let _ = self
                .cond
                .wait_timeout_while(collected, pace, |c| c.flush_generation == generation)
                .unwrap_or_else(|e| e.into_inner());
        }
        Ok(())
    }

    fn push_event(&self, event: Event) -> bool {
        let mut collected = self.lock();
        if event == Event::FlushStart {
            collected.flush_generation += 1;
        }
        collected.events.push(event);
        self.cond.notify_all();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::core::bus::MessageKind;
    use crate::core::frame_cache::FrameCache;
    use std::sync::Arc;
    use std::time::Instant;

    const WAIT: Duration = Duration::from_secs(5);

    fn ms(ms: u64) -> ClockTime {
        ClockTime::from_mseconds(ms)
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    fn pipeline(settings: SourceSettings, config: CacheConfig) -> (Arc<SyntheticSource>, FrameCache, Arc<CollectSink>) {
        let source = Arc::new(SyntheticSource::new(settings));
        let sink = Arc::new(CollectSink::new());
        let cache = FrameCache::new(config, source.clone(), sink.clone()).unwrap();
        source.start(cache.sink()).unwrap();
        cache.start().unwrap();
        (source, cache, sink)
    }

    fn config(duration_limit_ms: u64, lookahead_ms: u64) -> CacheConfig {
        CacheConfig {
            duration_soft_limit_ms: duration_limit_ms,
            lookahead_ms,
            wait_timeout_ms: 10,
            clamp_to_available_memory: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_plays_whole_media() {
        let settings = SourceSettings {
            fps: 10,
            frame_size: 16,
            media_duration: ClockTime::from_seconds(3),
        };
        let (source, cache, sink) = pipeline(settings, config(5_000, 1_000));

        cache.seek(&SeekEvent::new(ClockTime::ZERO, None)).unwrap();
        assert!(sink.wait_for_served(30, WAIT));
        assert!(wait_until(|| cache.position() == ms(3_000)));

        let served = sink.timestamps();
        assert_eq!(served.len(), 30);
        assert!(served.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(served.last(), Some(&ms(2_900)));
        assert!(sink.entries().iter().all(|e| e.duration == ms(100) && e.payload.len() == 16));

        assert!(wait_until(|| cache
            .bus()
            .poll()
            .iter()
            .any(|m| m.kind == MessageKind::ForwardFillDone)));

        // Replay from inside the cache: no new upstream ranges
        let requests = cache.stats().range_requests;
        sink.clear();
        cache.seek(&SeekEvent::new(ms(1_500), None)).unwrap();
        assert!(sink.wait_for_served(15, WAIT));
        assert_eq!(sink.timestamps().first(), Some(&ms(1_500)));
        assert!(cache.sync_deferred(WAIT));
        assert_eq!(cache.stats().range_requests, requests);

        cache.stop();
        source.shutdown();
    }

    #[test]
    fn test_eviction_follows_playback() {
        let settings = SourceSettings {
            fps: 10,
            frame_size: 8,
            media_duration: ClockTime::from_seconds(20),
        };
        let (source, cache, sink) = pipeline(settings, config(2_000, 1_000));

        cache.seek(&SeekEvent::new(ClockTime::ZERO, None)).unwrap();
        assert!(sink.wait_for_served(200, WAIT));

        // last = 19.9 s, limit 2 s: everything before 17.9 s goes
        assert!(wait_until(|| cache.cached_timestamps().first() == Some(&ms(17_900))));
        assert!(cache.stats().evicted >= 170);
        assert_eq!(cache.span().0, Some(ms(17_900)));

        cache.stop();
        source.shutdown();
    }

    #[test]
    fn test_seek_outside_cache_refetches() {
        let settings = SourceSettings {
            fps: 10,
            frame_size: 8,
            media_duration: ClockTime::from_seconds(10),
        };
        let (source, cache, sink) = pipeline(settings, config(5_000, 1_000));

        cache.seek(&SeekEvent::new(ClockTime::ZERO, Some(ms(1_000)))).unwrap();
        assert!(sink.wait_for_event("eos", WAIT));
        assert_eq!(sink.served_count(), 10);

        sink.clear();
        cache.seek(&SeekEvent::new(ms(6_000), Some(ms(7_000)))).unwrap();
        assert!(sink.wait_for_event("eos", WAIT));
        let served = sink.timestamps();
        assert_eq!(served.first(), Some(&ms(6_000)));
        assert_eq!(served.last(), Some(&ms(6_900)));
        assert!(cache.cached_timestamps().iter().all(|&t| t >= ms(6_000)));

        cache.stop();
        source.shutdown();
    }

    #[test]
    fn test_realtime_sink_paces_playback() {
        let sink = CollectSink::realtime();
        let started = Instant::now();
        sink.push(Entry::new(ClockTime::ZERO, ms(30), vec![0u8; 4])).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_source_snaps_to_frame() {
        let settings = SourceSettings {
            fps: 10,
            frame_size: 4,
            media_duration: ClockTime::from_seconds(1),
        };
        let (source, cache, sink) = pipeline(settings, config(5_000, 500));

        cache.seek(&SeekEvent::new(ms(250), None)).unwrap();
        // Frame at 200 ms covers 250 ms and is served first
        assert!(sink.wait_for_served(1, WAIT));
        assert_eq!(sink.timestamps().first(), Some(&ms(200)));

        cache.stop();
        source.shutdown();
    }
}
