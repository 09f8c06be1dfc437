//! Tests for the interchangeable compute backends

#[cfg(test)]
mod tests {
    use gridstitch::algorithm::backend::{
        BackendKind, ComputeBackend, CpuBackend, DeviceBackend, VectorizedBackend, create_backend,
    };
    use gridstitch::algorithm::correlation::cross_power_spectrum;
    use ndarray::Array2;
    use std::sync::Arc;
    use std::thread;

    fn backends() -> Vec<Box<dyn ComputeBackend>> {
        vec![
            Box::new(CpuBackend::new()),
            Box::new(VectorizedBackend::new()),
            Box::new(VectorizedBackend::serial()),
            Box::new(DeviceBackend::new().expect("device")),
        ]
    }

    // Tests every backend agrees with the row-by-row reference
    // Verified by dropping the last lane of each batch in the vectorized backend
    #[test]
    fn test_backends_agree() {
        let pixels = crate::noise((12, 20), 11);
        let reference = CpuBackend::new();
        let mut expected = Array2::zeros((12, 20));
        reference.transform(&pixels, &mut expected).expect("transform");

        for backend in backends() {
            let mut spectrum = Array2::zeros((12, 20));
            backend.transform(&pixels, &mut spectrum).expect("transform");
            assert!(
                spectrum
                    .iter()
                    .zip(expected.iter())
                    .all(|(a, b)| (a - b).norm() < 1e-6),
                "{} disagrees",
                backend.name()
            );

            let restored = backend.inverse_transform(&spectrum).expect("inverse");
            assert!(
                restored
                    .iter()
                    .zip(pixels.iter())
                    .all(|(a, b)| (a - b).abs() < 1e-6)
            );
        }
    }

    // Tests an all-zero tile transforms to zeros and back on every backend
    // Verified by dividing the cross-power term by its magnitude without the epsilon guard
    #[test]
    fn test_zero_round_trip() {
        let pixels = Array2::<f64>::zeros((16, 16));

        for backend in backends() {
            let mut spectrum = Array2::zeros((16, 16));
            backend.transform(&pixels, &mut spectrum).expect("transform");
            assert!(spectrum.iter().all(|value| value.norm() < f64::EPSILON), "{}", backend.name());

            let restored = backend.inverse_transform(&spectrum).expect("inverse");
            assert!(restored.iter().all(|value| value.abs() < f64::EPSILON), "{}", backend.name());

            let surface = backend
                .inverse_transform(&cross_power_spectrum(&spectrum, &spectrum))
                .expect("inverse");
            assert!(surface.iter().all(|value| value.abs() < f64::EPSILON), "{}", backend.name());
        }
    }

    // Tests the factory builds the requested kind
    // Verified by mapping every backend kind to the CPU backend
    #[test]
    fn test_create_backend() {
        for kind in [BackendKind::Cpu, BackendKind::Vectorized, BackendKind::Device] {
            let backend = create_backend(kind).expect("backend");
            assert_eq!(backend.name(), kind.name());
            assert_eq!(backend.queue_depth(), 0);
        }
        assert_eq!(BackendKind::default(), BackendKind::Cpu);
    }

    // Tests the device thread serves concurrent callers
    // Verified by replying to the first queued job for every caller
    #[test]
    fn test_device_concurrent_callers() {
        let device = Arc::new(DeviceBackend::new().expect("device"));

        let handles: Vec<_> = (0..4_u64)
            .map(|seed| {
                let device = Arc::clone(&device);
                thread::spawn(move || {
                    let pixels = crate::noise((8, 8), seed);
                    let mut spectrum = Array2::zeros((8, 8));
                    device.transform(&pixels, &mut spectrum).expect("transform");
                    let restored = device.inverse_transform(&spectrum).expect("inverse");
                    restored
                        .iter()
                        .zip(pixels.iter())
                        .all(|(a, b)| (a - b).abs() < 1e-6)
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().expect("joined"));
        }
        assert!(device.peak_queue_depth() >= 1);
        assert_eq!(device.queue_depth(), 0);
    }

    // Tests a mismatched spectrum buffer is replaced by the result shape
    // Verified by writing the result into the caller's buffer without resizing it
    #[test]
    fn test_device_reshapes_output() {
        let device = DeviceBackend::new().expect("device");
        let pixels = crate::noise((4, 6), 12);
        let mut spectrum = Array2::zeros((1, 1));
        device.transform(&pixels, &mut spectrum).expect("transform");
        assert_eq!(spectrum.dim(), (4, 6));
    }
}
