//! Replay drivers.
//!
//! A capture names the driver that understands its payload. Drivers are looked up by that name
//! in a [`DriverRegistry`]; the crate ships [`ChunkStreamDriver`], which treats the payload as
//! a sequence of `u32` little-endian length prefixed chunks, one per recorded event.

use super::types::ReplayStatus;
use log::debug;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Name under which [`ChunkStreamDriver`] is registered.
pub const CHUNK_STREAM_DRIVER: &str = "chunk-stream";

/// An opened replay.
pub trait ReplayController: Send {
    fn driver_name(&self) -> &str;
    fn event_count(&self) -> usize;
    fn event(&self, index: usize) -> Option<&[u8]>;
    /// Moves the replay to `index`. Returns `false` if there is no such event.
    fn set_frame_event(&mut self, index: usize) -> bool;
    fn current_event(&self) -> Option<usize>;
}

/// Turns a capture payload into a [`ReplayController`].
///
/// Drivers are looked up by the `driver` name stored in the capture header, see
/// [`DriverRegistry`].
pub trait ReplayDriver: Send + Sync {
    fn name(&self) -> &str;

    /// Prepares `payload` for replay. `progress` receives fractions in `[0, 1]`.
    fn open(
        &self,
        payload: &[u8],
        progress: &mut dyn FnMut(f32),
    ) -> Result<Box<dyn ReplayController>, ReplayStatus>;
}

#[derive(Clone)]
pub struct DriverRegistry {
    drivers: BTreeMap<String, Arc<dyn ReplayDriver>>,
}

impl DriverRegistry {
    pub fn empty() -> Self {
        Self {
            drivers: BTreeMap::new(),
        }
    }

    /// Registers `driver`, replacing any driver of the same name.
    pub fn register(&mut self, driver: Arc<dyn ReplayDriver>) {
        self.drivers.insert(driver.name().to_string(), driver);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ReplayDriver>> {
        self.drivers.get(name).cloned()
    }

    pub fn supports(&self, name: &str) -> bool {
        self.drivers.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.drivers.keys().cloned().collect()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(ChunkStreamDriver));
        registry
    }
}

/// Forces reported progress to stay in `[0, 1]` and never go backwards.
pub struct ProgressTracker<'a> {
    callback: &'a mut dyn FnMut(f32),
    last: f32,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(callback: &'a mut dyn FnMut(f32)) -> Self {
        Self {
            callback,
            last: 0.0,
        }
    }

    pub fn report(&mut self, fraction: f32) {
        if fraction.is_nan() {
            return;
        }
        self.last = fraction.clamp(0.0, 1.0).max(self.last);
        (self.callback)(self.last);
    }

    pub fn last(&self) -> f32 {
        self.last
    }
}

/// Replays a payload of length-prefixed chunks, one event per chunk.
///
/// ```text
/// ┌─────────┬──────────┬─────────┬──────────┬─────
/// │ len u32 │ bytes... │ len u32 │ bytes... │ ...
/// └─────────┴──────────┴─────────┴──────────┴─────
/// ```
pub struct ChunkStreamDriver;

impl ReplayDriver for ChunkStreamDriver {
    fn name(&self) -> &str {
        CHUNK_STREAM_DRIVER
    }

    fn open(
        &self,
        payload: &[u8],
        progress: &mut dyn FnMut(f32),
    ) -> Result<Box<dyn ReplayController>, ReplayStatus> {
        let total = payload.len().max(1) as f32;
        let mut chunks = Vec::new();
        let mut offset = 0usize;

        while offset < payload.len() {
            let prefix = payload
                .get(offset..offset + 4)
                .ok_or(ReplayStatus::FileCorrupted)?;
            let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
            let start = offset + 4;
            let chunk = start
                .checked_add(len)
                .and_then(|end| payload.get(start..end))
                .ok_or(ReplayStatus::FileCorrupted)?;
            chunks.push(chunk.to_vec());
            offset = start + len;
            progress(offset as f32 / total);
        }

        debug!("Chunk stream replay opened with {} events", chunks.len());
        Ok(Box::new(ChunkStreamReplay {
            chunks,
            current: None,
        }))
    }
}

/// Encodes chunks in the format [`ChunkStreamDriver`] reads.
pub fn encode_chunk_stream<I, C>(chunks: I) -> Vec<u8>
where
    I: IntoIterator<Item = C>,
    C: AsRef<[u8]>,
{
    let mut out = Vec::new();
    for chunk in chunks {
        let chunk = chunk.as_ref();
        out.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
        out.extend_from_slice(chunk);
    }
    out
}

struct ChunkStreamReplay {
    chunks: Vec<Vec<u8>>,
    current: Option<usize>,
}

impl ReplayController for ChunkStreamReplay {
    fn driver_name(&self) -> &str {
        CHUNK_STREAM_DRIVER
    }

    fn event_count(&self) -> usize {
        self.chunks.len()
    }

    fn event(&self, index: usize) -> Option<&[u8]> {
        self.chunks.get(index).map(Vec::as_slice)
    }

    fn set_frame_event(&mut self, index: usize) -> bool {
        if index < self.chunks.len() {
            self.current = Some(index);
            true
        } else {
            false
        }
    }

    fn current_event(&self) -> Option<usize> {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_stream_events_and_progress() {
        let payload = encode_chunk_stream([&b"draw"[..], b"", b"present"]);
        let mut seen = Vec::new();

        let mut replay = ChunkStreamDriver
            .open(&payload, &mut |p: f32| seen.push(p))
            .unwrap();

        assert_eq!(replay.event_count(), 3);
        assert_eq!(replay.event(2), Some(&b"present"[..]));
        assert_eq!(seen.len(), 3);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.last().copied(), Some(1.0));

        assert!(replay.set_frame_event(1));
        assert!(!replay.set_frame_event(3));
        assert_eq!(replay.current_event(), Some(1));
    }

    #[test]
    fn test_truncated_chunk_is_corrupt() {
        let mut payload = encode_chunk_stream([b"abcdef"]);
        payload.pop();
        assert_eq!(
            ChunkStreamDriver.open(&payload, &mut |_: f32| {}).err(),
            Some(ReplayStatus::FileCorrupted)
        );
        assert_eq!(
            ChunkStreamDriver.open(&[1, 0], &mut |_: f32| {}).err(),
            Some(ReplayStatus::FileCorrupted)
        );
    }

    #[test]
    fn test_progress_tracker_clamps_and_never_regresses() {
        let mut seen = Vec::new();
        {
            let mut callback = |p: f32| seen.push(p);
            let mut tracker = ProgressTracker::new(&mut callback);
            tracker.report(-1.0);
            tracker.report(0.5);
            tracker.report(0.25);
            tracker.report(f32::NAN);
            tracker.report(3.0);
        }
        assert_eq!(seen, vec![0.0, 0.5, 0.5, 1.0]);
    }

    #[test]
    fn test_registry_has_builtin_driver() {
        let registry = DriverRegistry::default();
        assert!(registry.supports(CHUNK_STREAM_DRIVER));
        assert!(!registry.supports("d3d11"));
        assert_eq!(registry.names(), vec![CHUNK_STREAM_DRIVER.to_string()]);
        assert!(DriverRegistry::empty().get(CHUNK_STREAM_DRIVER).is_none());
    }
}
