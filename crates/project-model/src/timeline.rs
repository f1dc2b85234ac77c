//! Edit timeline: contiguous input-frame ranges tagged with a playback speed.
//!
//! A timeline is produced upstream (silence/motion analysis, manual edits)
//! and is immutable once built. Every chunk covers the half-open range
//! `[start, end)` of input frame indices; chunks are ordered and jointly
//! cover `[0, total_input_frames)` without gaps.
//!
//! On disk a chunk is a three-element array `[start, end, speed]` where
//! `speed` is a positive number, the string `"delete"`, or the legacy
//! numeric sentinel `99999`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric speed value older timelines use to mark deleted chunks.
pub const LEGACY_DELETE_SPEED: f64 = 99999.0;

/// Playback speed of a chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Speed {
    /// Play at the given rate (1.0 = original speed, 2.0 = twice as fast).
    Rate(f64),
    /// Drop the chunk from the output entirely.
    Delete,
}

impl Speed {
    pub fn is_delete(&self) -> bool {
        matches!(self, Speed::Delete)
    }

    /// The playback rate, or `None` for deleted chunks.
    pub fn rate(&self) -> Option<f64> {
        match self {
            Speed::Rate(rate) => Some(*rate),
            Speed::Delete => None,
        }
    }

    /// Output frames contributed by one input frame at this speed.
    pub fn output_weight(&self) -> f64 {
        match self {
            Speed::Rate(rate) => 1.0 / rate,
            Speed::Delete => 0.0,
        }
    }
}

impl fmt::Display for Speed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speed::Rate(rate) => write!(f, "{rate}x"),
            Speed::Delete => f.write_str("delete"),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum SpeedRepr {
    Number(f64),
    Tag(String),
}

impl Serialize for Speed {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Speed::Rate(rate) => SpeedRepr::Number(*rate),
            Speed::Delete => SpeedRepr::Tag("delete".to_string()),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Speed {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match SpeedRepr::deserialize(deserializer)? {
            SpeedRepr::Number(n) if n == LEGACY_DELETE_SPEED => Ok(Speed::Delete),
            SpeedRepr::Number(n) => Ok(Speed::Rate(n)),
            SpeedRepr::Tag(tag) if tag.eq_ignore_ascii_case("delete") => Ok(Speed::Delete),
            SpeedRepr::Tag(tag) => Err(serde::de::Error::custom(format!(
                "invalid speed '{tag}': expected a number or \"delete\""
            ))),
        }
    }
}

/// A contiguous range of input frames played at one speed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(u64, u64, Speed)", into = "(u64, u64, Speed)")]
pub struct Chunk {
    /// First input frame index (inclusive).
    pub start: u64,
    /// One past the last input frame index.
    pub end: u64,
    pub speed: Speed,
}

impl Chunk {
    pub fn new(start: u64, end: u64, speed: Speed) -> Self {
        Self { start, end, speed }
    }

    pub fn kept(start: u64, end: u64, rate: f64) -> Self {
        Self::new(start, end, Speed::Rate(rate))
    }

    pub fn deleted(start: u64, end: u64) -> Self {
        Self::new(start, end, Speed::Delete)
    }

    /// Number of input frames covered.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the input frame `index` falls inside this chunk.
    pub fn contains(&self, index: u64) -> bool {
        index >= self.start && index < self.end
    }
}

impl From<(u64, u64, Speed)> for Chunk {
    fn from((start, end, speed): (u64, u64, Speed)) -> Self {
        Self { start, end, speed }
    }
}

impl From<Chunk> for (u64, u64, Speed) {
    fn from(chunk: Chunk) -> Self {
        (chunk.start, chunk.end, chunk.speed)
    }
}

/// Ordered, contiguous, validated list of chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TimelineRepr", into = "TimelineRepr")]
pub struct Timeline {
    chunks: Vec<Chunk>,
}

#[derive(Serialize, Deserialize)]
struct TimelineRepr {
    chunks: Vec<Chunk>,
}

impl TryFrom<TimelineRepr> for Timeline {
    type Error = TimelineError;

    fn try_from(repr: TimelineRepr) -> Result<Self, Self::Error> {
        Timeline::new(repr.chunks)
    }
}

impl From<Timeline> for TimelineRepr {
    fn from(timeline: Timeline) -> Self {
        Self {
            chunks: timeline.chunks,
        }
    }
}

impl Timeline {
    /// Build a timeline, rejecting anything that is not ordered and
    /// contiguous from frame 0.
    pub fn new(chunks: Vec<Chunk>) -> Result<Self, TimelineError> {
        if chunks.is_empty() {
            return Err(TimelineError::Empty);
        }

        let mut expected_start = 0u64;
        for (index, chunk) in chunks.iter().enumerate() {
            if chunk.start != expected_start {
                return Err(TimelineError::NotContiguous {
                    index,
                    expected: expected_start,
                    found: chunk.start,
                });
            }
            if chunk.end <= chunk.start {
                return Err(TimelineError::EmptyRange {
                    index,
                    start: chunk.start,
                    end: chunk.end,
                });
            }
            if let Speed::Rate(rate) = chunk.speed {
                if !rate.is_finite() || rate <= 0.0 {
                    return Err(TimelineError::InvalidSpeed { index, speed: rate });
                }
            }
            expected_start = chunk.end;
        }

        Ok(Self { chunks })
    }

    /// A timeline playing `total_frames` input frames at a single speed.
    pub fn uniform(total_frames: u64, speed: Speed) -> Result<Self, TimelineError> {
        Self::new(vec![Chunk::new(0, total_frames, speed)])
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Number of input frames covered by the whole timeline.
    pub fn total_input_frames(&self) -> u64 {
        self.chunks.last().map(|c| c.end).unwrap_or(0)
    }

    /// End frame of the last chunk that is not deleted, or 0 if every chunk
    /// is deleted.
    pub fn kept_end(&self) -> u64 {
        self.chunks
            .iter()
            .rev()
            .find(|c| !c.speed.is_delete())
            .map(|c| c.end)
            .unwrap_or(0)
    }

    /// Chunks to play back, with a trailing deleted chunk stripped.
    ///
    /// Once the last kept chunk is exhausted nothing else can be emitted, so
    /// playback stops there rather than decoding the deleted tail.
    pub fn playback_chunks(&self) -> Vec<Chunk> {
        let mut chunks = self.chunks.clone();
        if chunks.last().is_some_and(|c| c.speed.is_delete()) {
            chunks.pop();
        }
        chunks
    }

    /// Chunk containing the input frame `index`.
    pub fn chunk_at(&self, index: u64) -> Option<&Chunk> {
        let pos = self.chunks.partition_point(|c| c.end <= index);
        self.chunks.get(pos).filter(|c| c.contains(index))
    }

    /// Expected number of output frames (rounded to nearest).
    pub fn estimated_output_frames(&self) -> u64 {
        self.chunks
            .iter()
            .map(|c| c.len() as f64 * c.speed.output_weight())
            .sum::<f64>()
            .round() as u64
    }

    /// Number of input frames excluded by deleted chunks.
    pub fn deleted_frames(&self) -> u64 {
        self.chunks
            .iter()
            .filter(|c| c.speed.is_delete())
            .map(Chunk::len)
            .sum()
    }
}

/// Reasons a chunk list is not a valid timeline.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimelineError {
    #[error("timeline has no chunks")]
    Empty,

    #[error("chunk #{index} starts at frame {found}, expected {expected}")]
    NotContiguous {
        index: usize,
        expected: u64,
        found: u64,
    },

    #[error("chunk #{index} covers no frames ({start}..{end})")]
    EmptyRange { index: usize, start: u64, end: u64 },

    #[error("chunk #{index} has invalid speed {speed}; speeds must be positive")]
    InvalidSpeed { index: usize, speed: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> Timeline {
        Timeline::new(vec![
            Chunk::kept(0, 100, 1.0),
            Chunk::deleted(100, 150),
            Chunk::kept(150, 200, 2.0),
        ])
        .unwrap()
    }

    #[test]
    fn test_parse_mixed_speed_representations() {
        let json = r#"{"chunks":[[0,10,1.0],[10,20,"delete"],[20,30,99999],[30,40,1.5]]}"#;
        let timeline: Timeline = serde_json::from_str(json).unwrap();
        let speeds: Vec<Speed> = timeline.chunks().iter().map(|c| c.speed).collect();
        assert_eq!(
            speeds,
            vec![
                Speed::Rate(1.0),
                Speed::Delete,
                Speed::Delete,
                Speed::Rate(1.5)
            ]
        );
    }

    #[test]
    fn test_serialize_writes_delete_tag() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert_eq!(
            json,
            r#"{"chunks":[[0,100,1.0],[100,150,"delete"],[150,200,2.0]]}"#
        );
    }

    #[test]
    fn test_rejects_gap() {
        let err = Timeline::new(vec![Chunk::kept(0, 10, 1.0), Chunk::kept(12, 20, 1.0)])
            .unwrap_err();
        assert_eq!(
            err,
            TimelineError::NotContiguous {
                index: 1,
                expected: 10,
                found: 12
            }
        );
    }

    #[test]
    fn test_rejects_unordered_and_empty() {
        assert!(Timeline::new(vec![Chunk::kept(10, 20, 1.0), Chunk::kept(0, 10, 1.0)]).is_err());
        assert!(matches!(
            Timeline::new(vec![Chunk::kept(0, 0, 1.0)]),
            Err(TimelineError::EmptyRange { .. })
        ));
        assert_eq!(Timeline::new(vec![]), Err(TimelineError::Empty));
    }

    #[test]
    fn test_rejects_non_positive_speed() {
        assert!(matches!(
            Timeline::uniform(10, Speed::Rate(0.0)),
            Err(TimelineError::InvalidSpeed { .. })
        ));
        assert!(Timeline::uniform(10, Speed::Rate(-2.0)).is_err());
        assert!(Timeline::uniform(10, Speed::Rate(f64::NAN)).is_err());
    }

    #[test]
    fn test_malformed_json_is_not_tolerated() {
        let json = r#"{"chunks":[[0,10,1.0],[5,20,1.0]]}"#;
        assert!(serde_json::from_str::<Timeline>(json).is_err());

        let json = r#"{"chunks":[[0,10,"fast"]]}"#;
        assert!(serde_json::from_str::<Timeline>(json).is_err());
    }

    #[test]
    fn test_kept_end_ignores_trailing_delete() {
        let timeline = Timeline::new(vec![Chunk::kept(0, 40, 1.0), Chunk::deleted(40, 90)]).unwrap();
        assert_eq!(timeline.kept_end(), 40);
        assert_eq!(timeline.total_input_frames(), 90);
        assert_eq!(timeline.playback_chunks(), vec![Chunk::kept(0, 40, 1.0)]);

        let all_deleted = Timeline::uniform(30, Speed::Delete).unwrap();
        assert_eq!(all_deleted.kept_end(), 0);
        assert!(all_deleted.playback_chunks().is_empty());
    }

    #[test]
    fn test_chunk_at_uses_half_open_ranges() {
        let timeline = sample();
        assert_eq!(timeline.chunk_at(99).unwrap().speed, Speed::Rate(1.0));
        assert!(timeline.chunk_at(100).unwrap().speed.is_delete());
        assert_eq!(timeline.chunk_at(150).unwrap().speed, Speed::Rate(2.0));
        assert!(timeline.chunk_at(200).is_none());
    }

    #[test]
    fn test_estimated_output_frames() {
        let timeline = sample();
        assert_eq!(timeline.estimated_output_frames(), 125);
        assert_eq!(timeline.deleted_frames(), 50);
    }

    proptest! {
        #[test]
        fn prop_contiguous_lengths_always_validate(
            lengths in proptest::collection::vec(1u64..500, 1..20),
            delete_mask in proptest::collection::vec(any::<bool>(), 20),
        ) {
            let mut start = 0;
            let mut chunks = Vec::new();
            for (i, len) in lengths.iter().enumerate() {
                let speed = if delete_mask[i] { Speed::Delete } else { Speed::Rate(1.0) };
                chunks.push(Chunk::new(start, start + len, speed));
                start += len;
            }

            let timeline = Timeline::new(chunks).unwrap();
            prop_assert_eq!(timeline.total_input_frames(), lengths.iter().sum::<u64>());
            prop_assert!(timeline.kept_end() <= timeline.total_input_frames());
            prop_assert_eq!(
                timeline.estimated_output_frames() + timeline.deleted_frames(),
                timeline.total_input_frames()
            );
        }
    }
}
