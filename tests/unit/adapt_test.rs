//! Randomized checks for content adaptation

use content_pipeline::core::{adapt_content, PlatformRules};
use content_pipeline::util::Platform;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};

const TOKENS: &[&str] = &[
    "launch", "café", "naïve", "🚀", "growth", "#product", "#b2b", "lessons", "東京", "weekly",
    "a", "customers", "über", "roadmap",
];

fn random_text(rng: &mut StdRng) -> String {
    let words = rng.random_range(1..900);
    (0..words)
        .map(|_| *TOKENS.choose(rng).unwrap())
        .collect::<Vec<_>>()
        .join(if rng.random_bool(0.1) { "  " } else { " " })
}

#[test]
fn adapted_text_always_fits_the_platform() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..300 {
        let text = random_text(&mut rng);
        let trimmed = text.trim();
        for platform in Platform::ALL {
            let rules = PlatformRules::for_platform(platform);
            let adapted = adapt_content(&text, platform).unwrap();

            assert!(adapted.text.chars().count() <= rules.max_chars);
            assert_eq!(adapted.truncated, trimmed.chars().count() > rules.max_chars);
            if adapted.truncated {
                let body = adapted.text.strip_suffix(rules.ellipsis).unwrap();
                assert!(trimmed.starts_with(body));
                assert!(adapted.warnings.iter().any(|w| w.contains("truncated")));
            } else {
                assert_eq!(adapted.text, trimmed);
            }
        }
    }
}

#[test]
fn adaptation_is_deterministic() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..50 {
        let text = random_text(&mut rng);
        let platform = *Platform::ALL.choose(&mut rng).unwrap();
        assert_eq!(
            adapt_content(&text, platform).unwrap(),
            adapt_content(&text, platform).unwrap()
        );
    }
}

#[test]
fn blank_content_is_rejected() {
    for platform in Platform::ALL {
        assert!(adapt_content(" \n\t ", platform).is_err());
    }
}
