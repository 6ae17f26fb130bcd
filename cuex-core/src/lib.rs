pub mod condition;
pub mod error;
pub mod marker;
pub mod stimulus;
pub mod trial;

pub use condition::{Modality, TestCondition, UnknownTest};
pub use error::{Classify, ErrorKind};
pub use marker::{Answer, Marker};
pub use stimulus::{normalize_basename, Element, ImageStimulus, Origin, Sequence, SequenceError};
pub use trial::{StroopResponse, TrialState};
