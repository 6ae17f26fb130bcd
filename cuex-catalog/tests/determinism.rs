use cuex_catalog::{CatalogSettings, StimulusCatalog};
use cuex_core::{Element, ImageStimulus, Origin, TestCondition};

fn pool(origin: Origin, names: &[&str]) -> Vec<ImageStimulus> {
    names
        .iter()
        .map(|n| ImageStimulus::new(format!("/stimuli/{n}.jpg"), origin))
        .collect()
}

fn seeded_catalog(seed: u64) -> StimulusCatalog {
    let settings = CatalogSettings {
        randomize_cues: true,
        seed: Some(seed),
        ..Default::default()
    }
    .with_repetitions([("beer", 2), ("wine", 3)]);
    StimulusCatalog::new(
        pool(Origin::Alcohol, &["beer", "wine", "vodka", "cider", "gin", "rum"]),
        pool(Origin::Neutral, &["water", "soda"]),
        settings,
    )
}

#[test]
fn same_seed_same_order_including_repetitions() {
    let a = seeded_catalog(123).resolve(TestCondition::UnisensoryAlcoholVisual);
    let b = seeded_catalog(123).resolve(TestCondition::UnisensoryAlcoholVisual);
    assert_eq!(a.seed, Some(123));
    assert_eq!(a.sequence, b.sequence);
    assert_eq!(a.sequence.image_count(), 9);
}

#[test]
fn repeated_resolution_with_fixed_seed_is_stable() {
    let catalog = seeded_catalog(123);
    let first = catalog.resolve(TestCondition::StroopAlcoholTactile);
    for _ in 0..5 {
        assert_eq!(catalog.resolve(TestCondition::StroopAlcoholTactile), first);
    }
}

#[test]
fn shuffling_never_moves_the_prompt() {
    for seed in 0..50 {
        let r = seeded_catalog(seed).resolve(TestCondition::MultisensoryAlcoholOlfactory);
        let last = r.sequence.get(r.sequence.len() - 1);
        assert_eq!(last, Some(&Element::CravingPrompt { is_original: true }));
        assert_eq!(
            r.sequence
                .iter()
                .filter(|e| !e.is_image())
                .count(),
            1
        );
    }
}
