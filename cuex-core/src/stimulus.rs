use crate::condition::Modality;
use crate::error::{Classify, ErrorKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use std::path::{Path, PathBuf};

/// Which pool an image was drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Alcohol,
    Neutral,
    Unknown,
}

/// Canonical key for an image name: file name only, extension dropped,
/// lowercased, whitespace and punctuation removed.
///
/// `"Red_Wine 2.JPG"` and `"redwine2"` normalize to the same key.
pub fn normalize_basename(name: &str) -> String {
    let file = Path::new(name.trim())
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = match file.rfind('.') {
        Some(idx) if idx > 0 => &file[..idx],
        _ => file.as_str(),
    };
    stem.chars()
        .filter(|c| !c.is_whitespace() && !c.is_ascii_punctuation())
        .flat_map(char::to_lowercase)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageStimulus {
    pub path: PathBuf,
    pub origin: Origin,
    pub repetitions: Option<u32>,
}

impl ImageStimulus {
    pub fn new(path: impl Into<PathBuf>, origin: Origin) -> Self {
        Self {
            path: path.into(),
            origin,
            repetitions: None,
        }
    }

    /// File stem exactly as on disk; this is the name that appears in markers.
    pub fn basename(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn key(&self) -> String {
        normalize_basename(&self.path.to_string_lossy())
    }
}

/// One step of a sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Element {
    Image(ImageStimulus),
    CravingPrompt { is_original: bool },
}

impl Element {
    pub fn original_prompt() -> Self {
        Element::CravingPrompt { is_original: true }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Element::Image(_))
    }

    pub fn as_image(&self) -> Option<&ImageStimulus> {
        match self {
            Element::Image(img) => Some(img),
            Element::CravingPrompt { .. } => None,
        }
    }

    fn is_original_prompt(&self) -> bool {
        matches!(self, Element::CravingPrompt { is_original: true })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequenceError {
    #[error("passive sequence has no trailing craving prompt")]
    MissingCravingPrompt,

    #[error("craving prompt at {0} is not the tail")]
    MisplacedCravingPrompt(usize),

    #[error("Stroop sequence has a craving prompt at {0}")]
    UnexpectedCravingPrompt(usize),

    #[error("element index {0} out of range")]
    IndexOutOfRange(usize),
}

/// A malformed sequence cannot be run, so it blocks Start like a missing
/// asset does.
impl Classify for SequenceError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::AssetError
    }
}

/// Ordered stimulus list for one test run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    elements: Vec<Element>,
}

impl Sequence {
    /// Stroop sequences carry no prompt.
    pub fn stroop(images: Vec<ImageStimulus>) -> Self {
        Self {
            elements: images.into_iter().map(Element::Image).collect(),
        }
    }

    /// Passive sequences always end with exactly one original craving prompt.
    pub fn passive(images: Vec<ImageStimulus>) -> Self {
        let mut elements: Vec<Element> = images.into_iter().map(Element::Image).collect();
        elements.push(Element::original_prompt());
        Self { elements }
    }

    pub fn for_modality(modality: Modality, images: Vec<ImageStimulus>) -> Self {
        match modality {
            Modality::Passive => Self::passive(images),
            Modality::Stroop => Self::stroop(images),
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Element> {
        self.elements.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Element> {
        self.elements.iter()
    }

    pub fn image_count(&self) -> usize {
        self.elements.iter().filter(|e| e.is_image()).count()
    }

    pub fn images(&self) -> impl Iterator<Item = &ImageStimulus> {
        self.elements.iter().filter_map(Element::as_image)
    }

    /// Marker names of the image elements, in order.
    pub fn basenames(&self) -> Vec<String> {
        self.images().map(ImageStimulus::basename).collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.images().map(ImageStimulus::key).collect()
    }

    fn has_original_tail(&self) -> bool {
        self.elements.last().is_some_and(Element::is_original_prompt)
    }

    /// Moves one element. A trailing original craving prompt never moves and
    /// nothing can be placed after it.
    pub fn move_element(&mut self, from: usize, to: usize) -> Result<(), SequenceError> {
        let movable = if self.has_original_tail() {
            self.elements.len() - 1
        } else {
            self.elements.len()
        };
        if from >= movable {
            return Err(SequenceError::IndexOutOfRange(from));
        }
        let to = to.min(movable - 1);
        let element = self.elements.remove(from);
        self.elements.insert(to, element);
        Ok(())
    }

    pub fn validate(&self, modality: Modality) -> Result<(), SequenceError> {
        let last = self.elements.len().saturating_sub(1);
        for (i, e) in self.elements.iter().enumerate() {
            if let Element::CravingPrompt { .. } = e {
                match modality {
                    Modality::Stroop => return Err(SequenceError::UnexpectedCravingPrompt(i)),
                    Modality::Passive if i != last => {
                        return Err(SequenceError::MisplacedCravingPrompt(i));
                    }
                    Modality::Passive => {}
                }
            }
        }
        if modality == Modality::Passive && !self.has_original_tail() {
            return Err(SequenceError::MissingCravingPrompt);
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Sequence {
    type Item = &'a Element;
    type IntoIter = std::slice::Iter<'a, Element>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.iter()
    }
}
