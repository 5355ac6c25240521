//! The filter gives the same result wherever it runs.

use imgbench::ImageObjectService;
use imgbench::bench;
use imgbench::image::ImageObject;
use proptest::prelude::*;
use workrpc::WorkerConfig;

fn image_strategy() -> impl Strategy<Value = (u32, u32, Vec<u8>)> {
    (1u32..12, 1u32..12).prop_flat_map(|(w, h)| {
        let len = (w * h * 4) as usize;
        (Just(w), Just(h), proptest::collection::vec(any::<u8>(), len))
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_worker_filter_matches_local((w, h, data) in image_strategy(), iterations in 0u32..6) {
        let mut local = ImageObject::new(w, h, data.clone()).expect("valid image");
        local.average_filter(iterations);
        let (_, _, expected) = local.into_parts();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        let contents = runtime.block_on(async {
            let (service, _handle) =
                ImageObjectService::spawn(WorkerConfig::new("prop-filter")).expect("spawn");
            let id = service.create(w, h, data).await.expect("create");
            service.apply_average_filter(id, iterations, None).await.expect("filter");
            service.transfer(id).await.expect("transfer")
        });

        prop_assert_eq!((contents.width, contents.height), (w, h));
        prop_assert_eq!(bench::checksum(&contents.buffer), bench::checksum(&expected));
        prop_assert_eq!(contents.buffer, expected);
    }

    #[test]
    fn prop_filtered_pixels_are_opaque((w, h, data) in image_strategy(), iterations in 1u32..4) {
        let mut image = ImageObject::new(w, h, data).expect("valid image");
        image.average_filter(iterations);

        prop_assert!(image.data().chunks_exact(4).all(|p| p[3] == u8::MAX));
    }
}
