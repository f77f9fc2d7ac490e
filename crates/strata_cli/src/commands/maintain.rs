//! Index and merge commands.

use super::AggregatorArgs;
use std::time::Instant;
use strata_core::CancelToken;

/// Builds every missing index, required and optional.
pub fn index(args: &AggregatorArgs) -> Result<(), Box<dyn std::error::Error>> {
    let agg = args.open()?;
    let start = Instant::now();
    let built = agg.build_optional_missed_indices(&CancelToken::new())?;
    println!("Built {built} indices in {:?}", start.elapsed());
    agg.close()?;
    Ok(())
}

/// Merges until no candidate is left.
pub fn merge(args: &AggregatorArgs) -> Result<(), Box<dyn std::error::Error>> {
    let agg = args.open()?;
    let start = Instant::now();
    let merges = agg.merge_loop(&CancelToken::new())?;
    println!("Ran {merges} merges in {:?}", start.elapsed());
    for info in agg.files() {
        println!("  {} {}", info.domain, info.range);
    }
    agg.close()?;
    Ok(())
}
