//! Tests for error types including source chaining and message formatting

#[cfg(test)]
mod tests {
    use gridstitch::StitchError;
    use gridstitch::io::error::{backend_error, invalid_parameter};
    use gridstitch::spatial::grid::{Direction, GridPosition};
    use gridstitch::spatial::tiles::TileState;
    use std::error::Error;

    // Tests error source chaining works correctly
    // Verified by returning None from source for image errors
    #[test]
    fn test_error_source_chain() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error = StitchError::FileSystem {
            path: "/tmp/positions.tsv".into(),
            operation: "write",
            source: io_error,
        };

        assert!(error.source().is_some());
        assert!(error.to_string().contains("/tmp/positions.tsv"));
        assert!(StitchError::Aborted.source().is_none());
    }

    // Tests InvalidParameter error contains all fields
    // Verified by leaving the reason out of the message
    #[test]
    fn test_invalid_parameter_error() {
        let error = invalid_parameter("workers", &0, &"at least one worker is required");

        let message = error.to_string();
        assert!(message.contains("workers"));
        assert!(message.contains("'0'"));
        assert!(message.contains("at least one worker"));
        assert!(error.is_fatal());
    }

    // Tests per-tile and per-pair failures are the only recoverable classes
    // Verified by treating load failures as fatal
    #[test]
    fn test_fatality_classes() {
        let load = StitchError::LoadFailure {
            position: GridPosition::new(1, 1),
            source_name: "tile_r01_c01.png".to_string(),
            reason: "no such image".to_string(),
        };
        let pair = StitchError::InvalidCorrelation {
            position: GridPosition::new(0, 1),
            direction: Direction::West,
            reason: "no peak in bounds".to_string(),
        };

        assert!(!load.is_fatal());
        assert!(!pair.is_fatal());
        assert!(load.to_string().contains("(1, 1)"));
        assert!(pair.to_string().contains("west"));

        for fatal in [
            StitchError::EmptyGrid { rows: 0, cols: 3 },
            StitchError::PoolClosed { pool: "pixel" },
            StitchError::GlobalOptimization { unresolved: vec![] },
            StitchError::Aborted,
            backend_error("device", &"queue closed"),
        ] {
            assert!(fatal.is_fatal(), "{fatal} should be fatal");
        }
    }

    // Tests unresolved tiles are summarized by their bounding region
    // Verified by listing only the first unresolved tile
    #[test]
    fn test_global_optimization_region() {
        let error = StitchError::GlobalOptimization {
            unresolved: vec![GridPosition::new(2, 0), GridPosition::new(3, 4)],
        };

        let message = error.to_string();
        assert!(message.contains("2 tile(s)"));
        assert!(message.contains("rows 2..=3 cols 0..=4"));
    }

    // Tests lifecycle violations name both states
    // Verified by printing the target state twice
    #[test]
    fn test_invalid_transition_message() {
        let error = StitchError::InvalidTransition {
            position: GridPosition::new(0, 2),
            from: TileState::Unloaded,
            to: TileState::Transformed,
        };

        let message = error.to_string();
        assert!(message.contains("unloaded"));
        assert!(message.contains("transformed"));
    }

    // Tests conversion from io::Error keeps the cause
    // Verified by discarding the io error in the conversion
    #[test]
    fn test_from_io_error() {
        let error: StitchError = std::io::Error::other("disk full").into();

        assert!(matches!(error, StitchError::FileSystem { .. }));
        assert!(error.to_string().contains("disk full"));
    }

    // Tests backend errors carry the backend name
    // Verified by leaving the backend name out of the message
    #[test]
    fn test_backend_error_message() {
        let error = backend_error("device", &"reply channel closed");

        assert!(matches!(error, StitchError::Backend { backend: "device", .. }));
        assert!(error.to_string().contains("reply channel closed"));
    }
}
