use abtest::{
    AllocateOptions, AllocationEvent, AllocatorConfig, BuiltinStrategy, ConfigurationMap,
    ExperimentSpec, FileStorage, Groups, Strategy,
};

pub fn main() {
    env_logger::init();

    let dir = std::env::temp_dir().join("abtest-simple-demo");
    let storage = FileStorage::new(&dir).unwrap();

    let allocator = AllocatorConfig::with_storage(storage)
        .listener(|event: &AllocationEvent| {
            println!(
                "allocated {:?}, reassigned {:?}, pruned {:?}",
                event.result, event.reassigned, event.pruned
            );
        })
        .to_allocator();

    let config = ConfigurationMap::from([
        (
            "button_color",
            ExperimentSpec::new("exp_button", "button_color", [(0, 50.0), (1, 50.0)]),
        ),
        (
            "pricing_page",
            ExperimentSpec::new("exp_pricing", "pricing_page", [(0, 30.0), (1, 30.0)])
                .strategy(BuiltinStrategy::Crc32),
        ),
        (
            "onboarding",
            ExperimentSpec::new("exp_onboarding", "onboarding", [(0, 50.0), (1, 50.0)])
                // Everybody gets the new onboarding.
                .strategy(Strategy::custom(|_: &Groups| -> i64 { 1 })),
        ),
    ]);

    let options = AllocateOptions::new().identity("user-42");

    // Run the demo twice: the second run reuses what the first one stored.
    let result = allocator.allocate(&config, &options);
    println!("Assignments: {:?}", result);
    println!("Userstat: {}", allocator.userstat(None));
    println!("Stored in: {}", dir.display());
}
