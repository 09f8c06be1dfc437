//! Tests for phase correlation and translation resolution

#[cfg(test)]
mod tests {
    use gridstitch::algorithm::backend::{ComputeBackend, CpuBackend};
    use gridstitch::algorithm::correlation::{
        CorrelationParams, CorrelationQuality, PairwiseCorrelation, Translation,
        TranslationBound, correlate_tiles, cross_power_spectrum, interpretations, overlap_ncc,
        rank_candidates, resolve_translation,
    };
    use gridstitch::algorithm::peaks::PeakCandidate;
    use gridstitch::io::configuration::{OverlapBounds, StitchConfig};
    use gridstitch::spatial::grid::{Direction, GridPosition};
    use ndarray::Array2;

    const SHAPE: (usize, usize) = (40, 40);

    fn params() -> CorrelationParams {
        CorrelationParams::from_config(&StitchConfig {
            peak_candidates: 4,
            ..StitchConfig::default()
        })
    }

    // Tests translation arithmetic and formatting
    // Verified by swapping the operands of translation subtraction
    #[test]
    fn test_translation_ops() {
        let a = Translation::new(3, -2);
        let b = Translation::new(1, 5);

        assert_eq!(a + b, Translation::new(4, 3));
        assert_eq!(a - b, Translation::new(2, -7));
        assert_eq!(-a, Translation::new(-3, 2));
        assert_eq!(a.chebyshev(b), 7);
        assert_eq!(a.to_string(), "(+3, -2)");
    }

    // Tests per-direction bounds with the default overlap range
    // Verified by swapping the overlap and drift axes of north pairs
    #[test]
    fn test_direction_bounds() {
        let overlap = OverlapBounds::default();

        let west = TranslationBound::for_direction(Direction::West, SHAPE, overlap, 10.0);
        assert_eq!(west.dx, 20..=40);
        assert_eq!(west.dy, -4..=4);

        let north = TranslationBound::for_direction(Direction::North, SHAPE, overlap, 10.0);
        assert_eq!(north.dx, -4..=4);
        assert_eq!(north.dy, 20..=40);

        let east = TranslationBound::for_direction(Direction::East, SHAPE, overlap, 10.0);
        assert_eq!(east.dx, -40..=-20);

        let south = TranslationBound::for_direction(Direction::South, SHAPE, overlap, 10.0);
        assert_eq!(south.dy, -40..=-20);

        assert!(west.contains(Translation::new(30, -4)));
        assert!(!west.contains(Translation::new(30, 5)));
    }

    // Tests uneven tile shapes and percentage rounding
    // Verified by rounding the overlap limits outward
    #[test]
    fn test_bounds_round_inward() {
        let overlap = OverlapBounds {
            min_percent: 12.5,
            max_percent: 33.0,
        };
        let west = TranslationBound::for_direction(Direction::West, (30, 50), overlap, 7.0);

        // 33% of 50 floors to 16, 12.5% ceils to 7
        assert_eq!(west.dx, 34..=43);
        assert_eq!(west.dy, -2..=2);

        let unbounded = TranslationBound::unbounded((30, 50));
        assert_eq!(unbounded.dx, -49..=49);
        assert_eq!(unbounded.dy, -29..=29);
    }

    // Tests the four wraparound interpretations of a peak
    // Verified by dropping the wrapped vertical interpretation
    #[test]
    fn test_interpretations() {
        let index = 2 * 8 + 5;
        assert_eq!(
            interpretations(index, (10, 8)),
            [
                Translation::new(5, 2),
                Translation::new(-3, 2),
                Translation::new(5, -8),
                Translation::new(-3, -8),
            ]
        );
    }

    // Tests overlap scoring on shifted windows of one scene
    // Verified by scoring the overlap without subtracting the means
    #[test]
    fn test_overlap_ncc() {
        let scene = crate::noise((40, 40), 4);
        let reference = crate::window(&scene, 0, 0, (20, 20));
        let moving = crate::window(&scene, 8, 3, (20, 20));

        let score =
            overlap_ncc(&reference, &moving, Translation::new(8, 3), 16).expect("overlap");
        assert!((score - 1.0).abs() < 1e-9);

        let wrong =
            overlap_ncc(&reference, &moving, Translation::new(3, 8), 16).expect("overlap");
        assert!(wrong < 0.5);

        assert_eq!(overlap_ncc(&reference, &moving, Translation::new(20, 0), 1), None);
        assert_eq!(overlap_ncc(&reference, &moving, Translation::new(18, 0), 100), None);
        assert_eq!(
            overlap_ncc(&reference, &Array2::zeros((20, 21)), Translation::default(), 1),
            None
        );

        let flat = Array2::from_elem((20, 20), 7.0);
        assert_eq!(overlap_ncc(&flat, &moving, Translation::new(8, 3), 16), Some(0.0));
    }

    // Tests the cross-power spectrum is unit magnitude where defined
    // Verified by skipping the magnitude normalization
    #[test]
    fn test_cross_power_spectrum() {
        let backend = CpuBackend::new();
        let pixels = crate::noise((8, 8), 5);
        let mut spectrum = Array2::zeros((8, 8));
        backend.transform(&pixels, &mut spectrum).expect("transform");

        let cross = cross_power_spectrum(&spectrum, &spectrum);
        assert!(
            cross
                .iter()
                .all(|value| value.norm() < 1e-9 || (value.norm() - 1.0).abs() < 1e-9)
        );

        let candidates = rank_candidates(&backend, &spectrum, &spectrum, 1).expect("ranked");
        assert_eq!(candidates.first().map(|c| c.index), Some(0));
    }

    // Tests ranked candidates resolve to the best feasible interpretation
    // Verified by stopping at the first feasible interpretation instead of the best scored
    #[test]
    fn test_resolve_translation() {
        let bound = TranslationBound::unbounded((10, 10));
        let first = PeakCandidate { index: 3, value: 0.5 };
        let second = PeakCandidate { index: 12, value: 0.8 };

        assert_eq!(
            resolve_translation(&[first], (10, 10), &bound, None, 1),
            Some((Translation::new(3, 0), 0.5))
        );
        assert_eq!(
            resolve_translation(&[first, second], (10, 10), &bound, None, 1),
            Some((Translation::new(2, 1), 0.8))
        );
    }

    // Tests peaks outside the bound leave the pair without a translation
    // Verified by falling back to the unbounded best peak
    #[test]
    fn test_no_feasible_peak() {
        let bound = TranslationBound::for_direction(
            Direction::West,
            SHAPE,
            OverlapBounds::default(),
            10.0,
        );
        let origin = PeakCandidate { index: 0, value: 1.0 };
        assert_eq!(resolve_translation(&[origin], SHAPE, &bound, None, 1), None);
        assert_eq!(resolve_translation(&[], SHAPE, &bound, None, 1), None);
    }

    // Tests a west neighbour's shift is recovered exactly
    // Verified by correlating the tile against itself
    #[test]
    fn test_correlate_west() {
        let backend = CpuBackend::new();
        let scene = crate::noise((60, 90), 6);
        let west = crate::window(&scene, 0, 0, SHAPE);
        let east = crate::window(&scene, 30, 2, SHAPE);
        let neighbor = crate::transformed_tile(GridPosition::new(0, 0), &west, &backend);
        let tile = crate::transformed_tile(GridPosition::new(0, 1), &east, &backend);

        let result = correlate_tiles(&backend, &tile, &neighbor, Direction::West, &params());

        assert_eq!(result.quality, CorrelationQuality::Measured);
        assert_eq!(result.translation, Translation::new(30, 2));
        assert!(result.confidence > 0.99);
        assert_eq!(result.neighbor, GridPosition::new(0, 0));
    }

    // Tests a north neighbour's shift is recovered exactly
    // Verified by using the west bound for north pairs
    #[test]
    fn test_correlate_north() {
        let backend = CpuBackend::new();
        let scene = crate::noise((90, 60), 7);
        let north = crate::window(&scene, 4, 0, SHAPE);
        let south = crate::window(&scene, 1, 28, SHAPE);
        let neighbor = crate::transformed_tile(GridPosition::new(0, 0), &north, &backend);
        let tile = crate::transformed_tile(GridPosition::new(1, 0), &south, &backend);

        let result = backend.correlate(&tile, &neighbor, Direction::North, &params());

        assert!(result.is_trusted(0.9));
        assert_eq!(result.translation, Translation::new(-3, 28));
    }

    // Tests a released operand yields an invalid pair instead of an error
    // Verified by propagating the missing spectrum as an error
    #[test]
    fn test_missing_operand() {
        let backend = CpuBackend::new();
        let pixels = crate::noise(SHAPE, 8);
        let neighbor = crate::transformed_tile(GridPosition::new(0, 0), &pixels, &backend);
        let mut tile = crate::transformed_tile(GridPosition::new(0, 1), &pixels, &backend);
        tile.release().expect("release");

        let result = correlate_tiles(&backend, &tile, &neighbor, Direction::West, &params());

        assert_eq!(result.quality, CorrelationQuality::MissingOperand);
        assert!(!result.is_valid());
        assert!(result.confidence.abs() < f64::EPSILON);
    }

    // Tests validity and trust of pair records
    // Verified by trusting invalid pairs with a high confidence
    #[test]
    fn test_pair_records() {
        let tile = GridPosition::new(1, 1);
        let north = GridPosition::new(0, 1);
        let shift = Translation::new(0, 30);
        let measured = PairwiseCorrelation::measured(tile, north, Direction::North, shift, 0.6);

        assert!(measured.is_trusted(0.6));
        assert!(!measured.is_trusted(0.61));
        assert_eq!(measured.id().tile, tile);
        assert_eq!(measured.id().direction, Direction::North);

        let invalid = PairwiseCorrelation::invalid(
            tile,
            north,
            Direction::North,
            CorrelationQuality::NoFeasiblePeak,
        );
        assert!(!invalid.is_trusted(-1.0));
        assert_eq!(invalid.quality.name(), "no-feasible-peak");
    }
}
