//! Tests for per-line and per-direction repeatability statistics

#[cfg(test)]
mod tests {
    use gridstitch::algorithm::correlation::{PairId, PairwiseCorrelation, Translation};
    use gridstitch::analysis::repeatability::{RepeatabilityStats, line_of};
    use gridstitch::io::configuration::RepairPolicy;
    use gridstitch::math::statistics::Estimator;
    use gridstitch::spatial::grid::{Direction, GridPosition};

    fn west(row: usize, col: usize, dx: i64, dy: i64, confidence: f64) -> PairwiseCorrelation {
        PairwiseCorrelation::measured(
            GridPosition::new(row, col),
            GridPosition::new(row, col - 1),
            Direction::West,
            Translation::new(dx, dy),
            confidence,
        )
    }

    fn north(row: usize, col: usize, dx: i64, dy: i64, confidence: f64) -> PairwiseCorrelation {
        PairwiseCorrelation::measured(
            GridPosition::new(row, col),
            GridPosition::new(row - 1, col),
            Direction::North,
            Translation::new(dx, dy),
            confidence,
        )
    }

    // Tests west pairs are summarized per row and north pairs per column
    // Verified by summarizing west pairs per column
    #[test]
    fn test_lines_follow_direction() {
        let correlations = vec![
            west(0, 1, 50, 1, 0.9),
            west(0, 2, 52, 1, 0.9),
            west(1, 1, 51, 0, 0.9),
            north(1, 0, 1, 40, 0.9),
            north(1, 2, 0, 41, 0.9),
        ];
        let stats =
            RepeatabilityStats::gather(2, 3, &correlations, 0.5, &RepairPolicy::default());

        assert_eq!(stats.west.lines.len(), 2);
        assert_eq!(stats.north.lines.len(), 3);
        assert_eq!(stats.west.samples, 3);
        assert_eq!(stats.west.estimate, Some(Translation::new(51, 1)));
        assert_eq!(stats.west.repeatability, 1);

        let row0 = stats.west.lines.first().expect("row 0");
        assert_eq!(row0.pairs, 2);
        assert_eq!(row0.samples, 2);
        assert_eq!(row0.estimate, Some(Translation::new(50, 1)));
        assert_eq!(row0.repeatability, 1);

        assert_eq!(stats.degenerate_columns(), vec![1]);
        assert!(stats.degenerate_rows().is_empty());
    }

    // Tests untrusted and invalid translations are not sampled
    // Verified by sampling every valid translation regardless of confidence
    #[test]
    fn test_only_trusted_samples() {
        let correlations = vec![west(0, 1, 50, 0, 0.9), west(0, 2, 10, 0, 0.4)];
        let stats =
            RepeatabilityStats::gather(1, 3, &correlations, 0.5, &RepairPolicy::default());

        assert_eq!(stats.west.samples, 1);
        assert_eq!(stats.west.estimate, Some(Translation::new(50, 0)));
        assert_eq!(stats.north.lines.len(), 0);
        assert_eq!(stats.north.estimate, None);
    }

    // Tests the repair source falls back from line to direction
    // Verified by returning no repair when the line has too few samples
    #[test]
    fn test_repair_estimate_fallback() {
        let policy = RepairPolicy {
            min_samples: 2,
            ..RepairPolicy::default()
        };
        let correlations = vec![
            west(0, 1, 50, 1, 0.9),
            west(0, 2, 50, 1, 0.9),
            west(1, 1, 51, 1, 0.9),
        ];
        let stats = RepeatabilityStats::gather(2, 3, &correlations, 0.5, &policy);

        assert_eq!(
            stats.repair_estimate(Direction::West, 0),
            Some(Translation::new(50, 1))
        );
        assert_eq!(stats.degenerate_rows(), vec![1]);
        assert_eq!(
            stats.repair_estimate(Direction::West, 1),
            Some(Translation::new(50, 1))
        );
        assert_eq!(stats.repair_estimate(Direction::North, 0), None);
        assert_eq!(stats.repair_estimate(Direction::East, 0), None);
    }

    // Tests the estimator choice changes the summary
    // Verified by always taking the median
    #[test]
    fn test_mode_estimator() {
        let policy = RepairPolicy {
            estimator: Estimator::Mode,
            ..RepairPolicy::default()
        };
        let correlations = vec![
            west(0, 1, 48, 0, 0.9),
            west(0, 2, 50, 0, 0.9),
            west(0, 3, 50, 0, 0.9),
            west(0, 4, 47, 0, 0.9),
        ];
        let stats = RepeatabilityStats::gather(1, 5, &correlations, 0.5, &policy);
        assert_eq!(stats.west.estimate, Some(Translation::new(50, 0)));

        let median = RepeatabilityStats::gather(1, 5, &correlations, 0.5, &RepairPolicy::default());
        assert_eq!(median.west.estimate, Some(Translation::new(48, 0)));
    }

    // Tests outliers are excluded before the final estimate
    // Verified by keeping outliers in the final estimate
    #[test]
    fn test_outliers() {
        let policy = RepairPolicy {
            outlier_tolerance: Some(3),
            ..RepairPolicy::default()
        };
        let correlations = vec![
            north(1, 0, 0, 40, 0.9),
            north(1, 1, 1, 41, 0.9),
            north(1, 2, 0, 60, 0.9),
        ];
        let stats = RepeatabilityStats::gather(2, 3, &correlations, 0.5, &policy);

        let outlier = PairId {
            tile: GridPosition::new(1, 2),
            direction: Direction::North,
        };
        assert_eq!(stats.outliers, vec![outlier]);
        assert!(stats.is_outlier(outlier));
        assert_eq!(stats.north.samples, 2);
        assert_eq!(stats.degenerate_columns(), vec![2]);
    }

    // Tests outliers are measured against an observed translation
    // Verified by measuring outliers against the per-axis estimate, which no sample matches
    #[test]
    fn test_outliers_against_observed_sample() {
        let policy = RepairPolicy {
            outlier_tolerance: Some(2),
            ..RepairPolicy::default()
        };
        let correlations = vec![
            north(1, 0, -2, 80, 0.9),
            north(2, 0, -2, 80, 0.9),
            north(1, 1, 2, 85, 0.9),
            north(2, 1, 1, 83, 0.9),
            north(1, 2, 7, 81, 0.9),
            north(2, 2, 1, 77, 0.9),
        ];
        let stats = RepeatabilityStats::gather(3, 3, &correlations, 0.5, &policy);

        assert_eq!(stats.outliers.len(), 4);
        assert_eq!(stats.north.samples, 2);
        assert_eq!(stats.north.estimate, Some(Translation::new(-2, 80)));
    }

    // Tests exclusion never leaves fewer samples than a repair needs
    // Verified by excluding outliers regardless of the samples left
    #[test]
    fn test_outliers_keep_min_samples() {
        let policy = RepairPolicy {
            min_samples: 3,
            outlier_tolerance: Some(2),
            ..RepairPolicy::default()
        };
        let correlations = vec![
            north(1, 0, -2, 80, 0.9),
            north(2, 0, -2, 80, 0.9),
            north(1, 1, 2, 85, 0.9),
            north(2, 1, 1, 83, 0.9),
            north(1, 2, 7, 81, 0.9),
            north(2, 2, 1, 77, 0.9),
        ];
        let stats = RepeatabilityStats::gather(3, 3, &correlations, 0.5, &policy);

        assert!(stats.outliers.is_empty());
        assert_eq!(stats.north.samples, 6);
        assert_eq!(stats.north.estimate, Some(Translation::new(1, 80)));
        assert!(stats.repair_estimate(Direction::North, 1).is_some());
    }

    // Tests the line of a pair
    // Verified by using the row for north pairs
    #[test]
    fn test_line_of() {
        let tile = GridPosition::new(4, 7);
        assert_eq!(
            line_of(PairId {
                tile,
                direction: Direction::West
            }),
            4
        );
        assert_eq!(
            line_of(PairId {
                tile,
                direction: Direction::North
            }),
            7
        );
    }
}
