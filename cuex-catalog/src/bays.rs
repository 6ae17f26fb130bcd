use crate::error::{CatalogError, CatalogResult};
use cuex_core::{normalize_basename, Sequence};
use std::collections::HashMap;

pub const BAY_COUNT: u8 = 16;

/// Built-in placement of the standard tactile objects on the carousel.
const DEFAULT_BAYS: [(&str, u8); 16] = [
    ("beer", 0),
    ("water", 1),
    ("wine", 2),
    ("soda", 3),
    ("vodka", 4),
    ("juice", 5),
    ("whiskey", 6),
    ("milk", 7),
    ("cider", 8),
    ("coffee", 9),
    ("gin", 10),
    ("tea", 11),
    ("rum", 12),
    ("lemonade", 13),
    ("tequila", 14),
    ("sparklingwater", 15),
];

/// Maps any image name to a bay. Session overrides win over the default
/// table; names in neither get a stable hashed bay.
#[derive(Debug, Clone)]
pub struct BayAssignment {
    defaults: HashMap<String, u8>,
    overrides: HashMap<String, u8>,
}

impl Default for BayAssignment {
    fn default() -> Self {
        Self {
            defaults: DEFAULT_BAYS
                .iter()
                .map(|(name, bay)| (name.to_string(), *bay))
                .collect(),
            overrides: HashMap::new(),
        }
    }
}

impl BayAssignment {
    pub fn with_overrides<I, K>(overrides: I) -> CatalogResult<Self>
    where
        I: IntoIterator<Item = (K, u8)>,
        K: AsRef<str>,
    {
        let mut table = Self::default();
        for (name, bay) in overrides {
            table.set_override(name.as_ref(), bay)?;
        }
        Ok(table)
    }

    pub fn set_override(&mut self, name: &str, bay: u8) -> CatalogResult<()> {
        if bay >= BAY_COUNT {
            return Err(CatalogError::BayOutOfRange {
                name: name.to_string(),
                bay,
                max: BAY_COUNT,
            });
        }
        self.overrides.insert(normalize_basename(name), bay);
        Ok(())
    }

    pub fn bay_for(&self, name: &str) -> u8 {
        let key = normalize_basename(name);
        if let Some(bay) = self.overrides.get(&key).or_else(|| self.defaults.get(&key)) {
            return *bay;
        }
        let hash = key
            .bytes()
            .fold(5381u32, |h, b| h.wrapping_mul(33).wrapping_add(u32::from(b)));
        let bay = (hash % u32::from(BAY_COUNT)) as u8;
        tracing::warn!(name, bay, "no bay assigned, using hashed bay");
        bay
    }

    /// Bays for the image elements of `sequence`, in presentation order.
    pub fn bays_for(&self, sequence: &Sequence) -> Vec<u8> {
        sequence.keys().iter().map(|k| self.bay_for(k)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cuex_core::{ImageStimulus, Origin};

    #[test]
    fn overrides_win_over_defaults() {
        let table = BayAssignment::with_overrides([("Beer.jpg", 9)]).unwrap();
        assert_eq!(table.bay_for("beer"), 9);
        assert_eq!(table.bay_for("Water_.png"), 1);
    }

    #[test]
    fn every_name_gets_a_bay() {
        let table = BayAssignment::default();
        let bay = table.bay_for("mystery drink");
        assert!(bay < BAY_COUNT);
        assert_eq!(bay, table.bay_for("MysteryDrink.jpg"));
    }

    #[test]
    fn out_of_range_override_is_rejected() {
        assert!(BayAssignment::with_overrides([("beer", 16)]).is_err());
    }

    #[test]
    fn sequence_bays_skip_the_prompt() {
        let seq = Sequence::passive(vec![
            ImageStimulus::new("/a/wine.jpg", Origin::Alcohol),
            ImageStimulus::new("/a/gin.jpg", Origin::Alcohol),
        ]);
        assert_eq!(BayAssignment::default().bays_for(&seq), vec![2, 10]);
    }
}
