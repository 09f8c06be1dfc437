//! Tests for the tile lifecycle and buffer ownership

#[cfg(test)]
mod tests {
    use gridstitch::StitchError;
    use gridstitch::algorithm::backend::CpuBackend;
    use gridstitch::io::source::MemorySource;
    use gridstitch::memory::pool::{BufferPool, PixelBuffer, SpectrumBuffer};
    use gridstitch::spatial::grid::GridPosition;
    use gridstitch::spatial::tiles::{Tile, TileDescriptor, TileState};
    use ndarray::Array2;

    struct Fixture {
        pixels: BufferPool<PixelBuffer>,
        spectra: BufferPool<SpectrumBuffer>,
        source: MemorySource,
    }

    impl Fixture {
        fn new() -> Self {
            let mut source = MemorySource::new();
            source.insert("a", crate::noise((8, 8), 3));
            Self {
                pixels: BufferPool::new("pixel", 2, || Array2::zeros((8, 8))).expect("pool"),
                spectra: BufferPool::new("spectrum", 2, || Array2::zeros((8, 8))).expect("pool"),
                source,
            }
        }

        fn tile(&self, name: &str) -> Tile {
            let position = GridPosition::new(0, 0);
            Tile::new(
                TileDescriptor::new(position, name.to_string()),
                self.pixels.acquire(position).expect("pixel buffer"),
                self.spectra.acquire(position).expect("spectrum buffer"),
            )
        }
    }

    // Tests the full lifecycle exposes data only in the right states
    // Verified by exposing the spectrum before the tile is transformed
    #[test]
    fn test_lifecycle() {
        let fixture = Fixture::new();
        let backend = CpuBackend::new();
        let mut tile = fixture.tile("a");

        assert_eq!(tile.state(), TileState::Unloaded);
        assert!(tile.pixels().is_none());

        tile.load(&fixture.source).expect("load");
        assert_eq!(tile.state(), TileState::PixelsLoaded);
        assert_eq!(tile.pixels(), fixture.source.get("a"));
        assert!(tile.spectrum().is_none());

        tile.transform(&backend).expect("transform");
        assert_eq!(tile.state(), TileState::Transformed);
        assert!(tile.spectrum().is_some());
        assert_eq!(fixture.pixels.checked_out(), 1);

        tile.release().expect("release");
        assert_eq!(tile.state(), TileState::Released);
        assert!(tile.pixels().is_none());
        assert_eq!(fixture.pixels.checked_out(), 0);
        assert_eq!(fixture.spectra.checked_out(), 0);
    }

    // Tests a failed load marks the tile failed and returns its buffers
    // Verified by keeping the buffers of a failed tile
    #[test]
    fn test_load_failure_returns_buffers() {
        let fixture = Fixture::new();
        let mut tile = fixture.tile("missing");

        let error = tile.load(&fixture.source).expect_err("no such image");
        assert!(matches!(error, StitchError::LoadFailure { .. }));
        assert_eq!(tile.state(), TileState::Failed);
        assert_eq!(fixture.pixels.checked_out(), 0);
        assert_eq!(fixture.spectra.checked_out(), 0);
    }

    // Tests states cannot be skipped or repeated
    // Verified by allowing a transform straight from unloaded
    #[test]
    fn test_invalid_transitions() {
        let fixture = Fixture::new();
        let backend = CpuBackend::new();
        let mut tile = fixture.tile("a");

        assert!(matches!(
            tile.transform(&backend),
            Err(StitchError::InvalidTransition { .. })
        ));
        assert!(tile.release().is_err());

        tile.load(&fixture.source).expect("load");
        assert!(tile.load(&fixture.source).is_err());
    }

    // Tests dropping a tile returns its buffers
    // Verified by forgetting buffers when a tile is dropped
    #[test]
    fn test_drop_returns_buffers() {
        let fixture = Fixture::new();
        {
            let _first = fixture.tile("a");
            let _second = fixture.tile("a");
            assert_eq!(fixture.pixels.available(), 0);
        }
        assert_eq!(fixture.pixels.available(), 2);
        assert_eq!(fixture.pixels.releases(), 2);
    }

    // Tests the transition table
    // Verified by allowing released tiles to be loaded again
    #[test]
    fn test_state_table() {
        use TileState::{Failed, PixelsLoaded, Released, Transformed, Unloaded};

        assert!(Unloaded.can_advance_to(PixelsLoaded));
        assert!(PixelsLoaded.can_advance_to(Transformed));
        assert!(Transformed.can_advance_to(Released));
        assert!(Unloaded.can_advance_to(Failed));
        assert!(PixelsLoaded.can_advance_to(Failed));
        assert!(!Transformed.can_advance_to(Failed));
        assert!(!Unloaded.can_advance_to(Transformed));
        assert!(!Released.can_advance_to(Unloaded));
        assert!(Released.is_terminal() && Failed.is_terminal());
        assert!(!Transformed.is_terminal());
        assert_eq!(PixelsLoaded.name(), "pixels-loaded");
    }
}
