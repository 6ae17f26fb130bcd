use crate::error::{Classify, ErrorKind};
use crate::stimulus::Origin;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// How the subject engages with the stimuli of a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    /// Subject only views; the sequence ends with a craving prompt.
    Passive,
    /// Subject answers Yes/No per stimulus.
    Stroop,
}

/// The closed set of experimental conditions. Identity is the exact name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum TestCondition {
    UnisensoryNeutralVisual,
    UnisensoryAlcoholVisual,
    MultisensoryNeutralOlfactory,
    MultisensoryAlcoholOlfactory,
    MultisensoryNeutralTactile,
    MultisensoryAlcoholTactile,
    StroopNeutralOlfactory,
    StroopAlcoholOlfactory,
    StroopNeutralTactile,
    StroopAlcoholTactile,
}

static CATALOGUE: [TestCondition; 10] = TestCondition::ALL;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown test name {0:?}")]
pub struct UnknownTest(pub String);

/// Test names arrive over the control channel and the command line.
impl Classify for UnknownTest {
    fn kind(&self) -> ErrorKind {
        ErrorKind::ProtocolError
    }
}

impl TestCondition {
    pub const ALL: [TestCondition; 10] = [
        Self::UnisensoryNeutralVisual,
        Self::UnisensoryAlcoholVisual,
        Self::MultisensoryNeutralOlfactory,
        Self::MultisensoryAlcoholOlfactory,
        Self::MultisensoryNeutralTactile,
        Self::MultisensoryAlcoholTactile,
        Self::StroopNeutralOlfactory,
        Self::StroopAlcoholOlfactory,
        Self::StroopNeutralTactile,
        Self::StroopAlcoholTactile,
    ];

    pub fn name(&self) -> &'static str {
        use TestCondition::*;
        match self {
            UnisensoryNeutralVisual => "Unisensory Neutral Visual",
            UnisensoryAlcoholVisual => "Unisensory Alcohol Visual",
            MultisensoryNeutralOlfactory => "Multisensory Neutral (Visual & Olfactory)",
            MultisensoryAlcoholOlfactory => "Multisensory Alcohol (Visual & Olfactory)",
            MultisensoryNeutralTactile => "Multisensory Neutral (Visual & Tactile)",
            MultisensoryAlcoholTactile => "Multisensory Alcohol (Visual & Tactile)",
            StroopNeutralOlfactory => "Stroop Multisensory Neutral (Visual & Olfactory)",
            StroopAlcoholOlfactory => "Stroop Multisensory Alcohol (Visual & Olfactory)",
            StroopNeutralTactile => "Stroop Multisensory Neutral (Visual & Tactile)",
            StroopAlcoholTactile => "Stroop Multisensory Alcohol (Visual & Tactile)",
        }
    }

    /// Tests selected by a session's test number: 1 is passive viewing, 2 is Stroop.
    pub fn for_test_number(test_number: u8) -> &'static [TestCondition] {
        match test_number {
            1 => &CATALOGUE[..6],
            2 => &CATALOGUE[6..],
            _ => &[],
        }
    }

    pub fn test_number(&self) -> u8 {
        match self.modality() {
            Modality::Passive => 1,
            Modality::Stroop => 2,
        }
    }

    pub fn modality(&self) -> Modality {
        if self.name().starts_with("Stroop") {
            Modality::Stroop
        } else {
            Modality::Passive
        }
    }

    pub fn is_passive(&self) -> bool {
        self.modality() == Modality::Passive
    }

    pub fn origin(&self) -> Origin {
        if self.name().contains("Alcohol") {
            Origin::Alcohol
        } else {
            Origin::Neutral
        }
    }

    pub fn uses_olfactory(&self) -> bool {
        self.name().contains("Olfactory")
    }

    pub fn uses_tactile(&self) -> bool {
        self.name().contains("Tactile")
    }

    /// Marker published when the post-test instructions appear.
    pub fn end_label(&self) -> &'static str {
        match self.modality() {
            Modality::Passive => "Passive Test Ended",
            Modality::Stroop => "Stroop Test Ended",
        }
    }
}

impl fmt::Display for TestCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TestCondition {
    type Err = UnknownTest;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.name() == s)
            .ok_or_else(|| UnknownTest(s.to_string()))
    }
}

impl From<TestCondition> for String {
    fn from(t: TestCondition) -> Self {
        t.name().to_string()
    }
}

impl TryFrom<String> for TestCondition {
    type Error = UnknownTest;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}
