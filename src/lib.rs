//! Deauthentication / disassociation flood and EAPOL handshake-hunt
//! detection over 802.11 packet captures.
//!
//! Frames are classified one at a time, bucketed into fixed-width time bins
//! and every bin whose event count reaches the threshold is flagged.

pub mod alert;
pub mod analysis;
pub mod batch;
pub mod bins;
pub mod capture;
pub mod classify;
pub mod discovery;
pub mod dot11;
pub mod error;
pub mod report;

pub use analysis::{analyze_file, analyze_trace, AnalysisConfig, EapolPolicy, FileSummary};
pub use batch::{analyze_batch, analyze_directory, BatchOptions, BatchSummary, TraceFailure};
pub use bins::TimeBin;
pub use capture::{CaptureReader, FrameRecord};
pub use classify::{classify, ClassifiedEvent, EventKind, SourceId};
pub use error::{AnalysisError, FrameAnomaly};
