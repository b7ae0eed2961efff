/// One indexed unit of the media pipeline. Segments are numbered from 1.
pub type SegmentId = u32;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
