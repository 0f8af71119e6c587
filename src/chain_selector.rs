//! Chain selection.

use crate::models::{Chain, Rational};

/// Returns the first chain, in declared order, whose pixel and fps ranges both contain the
/// video. `None` means passthrough.
pub fn select(chains: &[Chain], pixel_count: u64, fps: Rational) -> Option<&Chain> {
    chains.iter().find(|chain| chain.matches(pixel_count, fps))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(name: &str, min_px: u64, max_px: u64, min_fps: u64, max_fps: u64) -> Chain {
        Chain {
            min_px,
            max_px,
            min_fps: Rational::integer(min_fps),
            max_fps: Rational::integer(max_fps),
            ..Chain::accept_all(name)
        }
    }

    #[test]
    fn test_first_match_wins() {
        let chains = vec![
            chain("1", 0, 2_073_600, 0, 31),
            chain("2", 0, 2_073_600, 0, 60),
            chain("3", 0, u64::MAX, 0, 1000),
        ];

        let picked = select(&chains, 1280 * 720, Rational::integer(24)).unwrap();
        assert_eq!(picked.name, "1");

        let picked = select(&chains, 1280 * 720, Rational::integer(50)).unwrap();
        assert_eq!(picked.name, "2");

        let picked = select(&chains, 3840 * 2160, Rational::integer(24)).unwrap();
        assert_eq!(picked.name, "3");
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let chains = vec![chain("1", 921_600, 2_073_600, 24, 30)];
        assert!(select(&chains, 921_600, Rational::integer(24)).is_some());
        assert!(select(&chains, 2_073_600, Rational::integer(30)).is_some());
        assert!(select(&chains, 921_599, Rational::integer(24)).is_none());
        assert!(select(&chains, 2_073_601, Rational::integer(24)).is_none());
    }

    #[test]
    fn test_fractional_fps() {
        let mut c = chain("1", 0, u64::MAX, 0, 0);
        c.min_fps = "23.976".parse().unwrap();
        c.max_fps = "23.976".parse().unwrap();
        let chains = vec![c];

        // 24000/1001 is slightly above 23.976, so it falls outside the exact range.
        assert!(select(&chains, 100, Rational::new(24000, 1001).unwrap()).is_none());
        assert!(select(&chains, 100, Rational::new(23976, 1000).unwrap()).is_some());
    }

    #[test]
    fn test_no_match_and_empty() {
        let chains = vec![chain("1", 0, 2_073_600, 0, 60)];
        assert!(select(&chains, 3840 * 2160, Rational::integer(24)).is_none());
        assert!(select(&[], 100, Rational::integer(24)).is_none());
    }

    #[test]
    fn test_both_ranges_required() {
        let chains = vec![chain("1", 0, 2_073_600, 0, 30)];
        assert!(select(&chains, 1920 * 1080, Rational::integer(60)).is_none());
    }
}
