//! Tests for in-memory and directory image sources

#[cfg(test)]
mod tests {
    use gridstitch::StitchError;
    use gridstitch::io::source::{DirectorySource, ImageSource, MemorySource};
    use gridstitch::spatial::grid::GridPosition;
    use gridstitch::spatial::tiles::TileDescriptor;
    use image::{ImageBuffer, Luma};
    use ndarray::Array2;

    fn descriptor(name: &str) -> TileDescriptor {
        TileDescriptor::new(GridPosition::new(0, 1), name.to_string())
    }

    // Tests stored images are copied into the pixel buffer
    // Verified by transposing pixels while copying
    #[test]
    fn test_memory_source_loads() {
        let mut source = MemorySource::new();
        let pixels = Array2::from_shape_fn((3, 4), |(r, c)| (r * 4 + c) as f64);
        source.insert("a", pixels.clone());

        assert_eq!(source.len(), 1);
        assert_eq!(source.tile_shape(&descriptor("a")).expect("shape"), (3, 4));

        let mut buffer = Array2::zeros((3, 4));
        source.load_pixels(&descriptor("a"), &mut buffer).expect("load");
        assert_eq!(buffer, pixels);
    }

    // Tests missing and mis-shaped images fail as recoverable load failures
    // Verified by zero-filling the buffer for a missing image
    #[test]
    fn test_memory_source_failures() {
        let mut source = MemorySource::new();
        source.insert("a", Array2::zeros((3, 4)));

        let mut wrong = Array2::zeros((4, 4));
        let error = source
            .load_pixels(&descriptor("a"), &mut wrong)
            .expect_err("shape mismatch");
        assert!(matches!(error, StitchError::LoadFailure { .. }));
        assert!(!error.is_fatal());

        let mut buffer = Array2::zeros((3, 4));
        let error = source
            .load_pixels(&descriptor("b"), &mut buffer)
            .expect_err("missing image");
        assert!(error.to_string().contains("'b'"));

        assert!(source.remove("a").is_some());
        assert!(source.is_empty());
        assert!(source.tile_shape(&descriptor("a")).is_err());
    }

    // Tests 16-bit PNG tiles are read from a directory as grey values
    // Verified by scaling 16-bit values down to 8 bits
    #[test]
    fn test_directory_source_reads_png() {
        let dir = tempfile::tempdir().expect("temp dir");
        let raw: Vec<u16> = (0..12).map(|v| v * 1000).collect();
        let image: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_raw(4, 3, raw).expect("buffer");
        image.save(dir.path().join("t.png")).expect("save");

        let source = DirectorySource::new(dir.path());
        assert_eq!(source.root(), dir.path());
        assert_eq!(source.path_of(&descriptor("t.png")), dir.path().join("t.png"));
        assert_eq!(source.tile_shape(&descriptor("t.png")).expect("shape"), (3, 4));

        let mut buffer = Array2::zeros((3, 4));
        source.load_pixels(&descriptor("t.png"), &mut buffer).expect("load");
        assert!((buffer[[0, 1]] - 1000.0).abs() < f64::EPSILON);
        assert!((buffer[[2, 3]] - 11_000.0).abs() < f64::EPSILON);

        let mut wrong = Array2::zeros((4, 3));
        assert!(source.load_pixels(&descriptor("t.png"), &mut wrong).is_err());
    }

    // Tests unreadable files become load failures
    // Verified by returning ImageLoad instead of LoadFailure
    #[test]
    fn test_directory_source_missing_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let source = DirectorySource::new(dir.path());

        let error = source
            .tile_shape(&descriptor("absent.png"))
            .expect_err("missing file");
        assert!(matches!(error, StitchError::LoadFailure { .. }));
    }
}
