use crate::error::{CatalogError, CatalogResult};
use cuex_core::{normalize_basename, ImageStimulus, Origin, Sequence, TestCondition};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use std::collections::HashMap;
use std::path::Path;

pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "gif"];

/// Upper bound (inclusive) of the seed drawn when none is configured.
const MAX_RANDOM_SEED: u64 = 10_000;

/// Ordering options shared by every test of a session.
#[derive(Debug, Clone, Default)]
pub struct CatalogSettings {
    pub randomize_cues: bool,
    pub seed: Option<u64>,
    /// Copies per image, keyed by normalized basename. Absent means one.
    pub repetitions: HashMap<String, u32>,
}

impl CatalogSettings {
    /// Re-keys a user supplied map so that `"Red Wine.jpg"` and `"redwine"`
    /// address the same image.
    pub fn with_repetitions<I, K>(mut self, reps: I) -> Self
    where
        I: IntoIterator<Item = (K, u32)>,
        K: AsRef<str>,
    {
        self.repetitions = reps
            .into_iter()
            .map(|(k, v)| (normalize_basename(k.as_ref()), v))
            .collect();
        self
    }
}

/// A resolved sequence together with the seed that shuffled it.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub sequence: Sequence,
    pub seed: Option<u64>,
}

/// Lists the images in `dir`, sorted by file name.
pub fn scan_folder(dir: &Path, origin: Origin) -> CatalogResult<Vec<ImageStimulus>> {
    let io_err = |source| CatalogError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if path.is_file() && is_image {
            paths.push(path);
        }
    }
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(paths
        .into_iter()
        .map(|p| ImageStimulus::new(p, origin))
        .collect())
}

/// Owns the image pools and the per-test manual orders of one session.
#[derive(Debug, Clone, Default)]
pub struct StimulusCatalog {
    alcohol: Vec<ImageStimulus>,
    neutral: Vec<ImageStimulus>,
    personalized: Vec<ImageStimulus>,
    settings: CatalogSettings,
    manual_orders: HashMap<TestCondition, Vec<ImageStimulus>>,
}

impl StimulusCatalog {
    pub fn new(
        alcohol: Vec<ImageStimulus>,
        neutral: Vec<ImageStimulus>,
        settings: CatalogSettings,
    ) -> Self {
        Self {
            alcohol,
            neutral,
            personalized: Vec::new(),
            settings,
            manual_orders: HashMap::new(),
        }
    }

    /// Builds the catalog from folders on disk.
    pub fn from_folders(
        alcohol_dir: &Path,
        neutral_dir: &Path,
        personalized_dir: Option<&Path>,
        settings: CatalogSettings,
    ) -> CatalogResult<Self> {
        let mut catalog = Self::new(
            scan_folder(alcohol_dir, Origin::Alcohol)?,
            scan_folder(neutral_dir, Origin::Neutral)?,
            settings,
        );
        if let Some(dir) = personalized_dir {
            catalog.personalized = scan_folder(dir, Origin::Alcohol)?;
        }
        tracing::info!(
            alcohol = catalog.alcohol.len(),
            neutral = catalog.neutral.len(),
            personalized = catalog.personalized.len(),
            "stimulus catalog loaded"
        );
        Ok(catalog)
    }

    /// Personalized images count as alcohol cues.
    pub fn with_personalized(mut self, images: Vec<ImageStimulus>) -> Self {
        self.personalized = images;
        self
    }

    pub fn settings(&self) -> &CatalogSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut CatalogSettings {
        &mut self.settings
    }

    /// Images applicable to `test`, de-duplicated by normalized basename.
    /// A personalized image replaces a general one with the same key.
    pub fn pool(&self, test: TestCondition) -> Vec<ImageStimulus> {
        let (general, personalized) = match test.origin() {
            Origin::Alcohol => (self.alcohol.as_slice(), self.personalized.as_slice()),
            _ => (self.neutral.as_slice(), &[][..]),
        };
        let mut pool: Vec<ImageStimulus> = Vec::with_capacity(general.len() + personalized.len());
        let mut index: HashMap<String, usize> = HashMap::new();
        for img in general.iter().chain(personalized) {
            let key = img.key();
            match index.get(&key).copied() {
                Some(i) => pool[i] = img.clone(),
                None => {
                    index.insert(key, pool.len());
                    pool.push(img.clone());
                }
            }
        }
        pool
    }

    /// Looks names up in the test's pool. Unknown names are collected and
    /// reported together; nothing is stored in that case.
    pub fn set_manual_order<S: AsRef<str>>(
        &mut self,
        test: TestCondition,
        names: &[S],
    ) -> CatalogResult<()> {
        let pool = self.pool(test);
        let by_key: HashMap<String, &ImageStimulus> = pool.iter().map(|i| (i.key(), i)).collect();
        let mut images = Vec::with_capacity(names.len());
        let mut missing = Vec::new();
        for name in names {
            match by_key.get(&normalize_basename(name.as_ref())) {
                Some(img) => images.push((*img).clone()),
                None => missing.push(name.as_ref().to_string()),
            }
        }
        if !missing.is_empty() {
            return Err(CatalogError::MissingImages { test, missing });
        }
        tracing::info!(%test, count = images.len(), "manual order set");
        self.manual_orders.insert(test, images);
        Ok(())
    }

    pub fn clear_manual_order(&mut self, test: TestCondition) {
        self.manual_orders.remove(&test);
    }

    pub fn manual_order(&self, test: TestCondition) -> Option<&[ImageStimulus]> {
        self.manual_orders.get(&test).map(Vec::as_slice)
    }

    /// Resolves `test` to the sequence the engine will present.
    ///
    /// A manual order is returned as stored. Otherwise the pool is expanded
    /// by repetitions and, when enabled, shuffled with a seeded generator;
    /// an unset seed draws a fresh one on every call.
    pub fn resolve(&self, test: TestCondition) -> Resolved {
        if let Some(order) = self.manual_orders.get(&test) {
            return Resolved {
                sequence: Sequence::for_modality(test.modality(), order.clone()),
                seed: None,
            };
        }

        let mut images = self.expand_repetitions(self.pool(test));

        let seed = if self.settings.randomize_cues {
            let seed = self
                .settings
                .seed
                .unwrap_or_else(|| rand::rng().random_range(0..=MAX_RANDOM_SEED));
            let mut rng = StdRng::seed_from_u64(seed);
            images.shuffle(&mut rng);
            tracing::info!(%test, seed, "cues shuffled");
            Some(seed)
        } else {
            None
        };

        Resolved {
            sequence: Sequence::for_modality(test.modality(), images),
            seed,
        }
    }

    fn expand_repetitions(&self, pool: Vec<ImageStimulus>) -> Vec<ImageStimulus> {
        if self.settings.repetitions.is_empty() {
            return pool;
        }
        pool.into_iter()
            .flat_map(|mut img| {
                let count = self.settings.repetitions.get(&img.key()).copied();
                img.repetitions = count;
                std::iter::repeat(img).take(count.unwrap_or(1) as usize)
            })
            .collect()
    }
}
