//! Key debugging command.

use super::{parse_key, AggregatorArgs};

/// Prints every file set that mentions `key` in `domain`.
pub fn run(args: &AggregatorArgs, domain: &str, key: &str) -> Result<(), Box<dyn std::error::Error>> {
    let key = parse_key(key)?;
    let agg = args.open()?;
    let view = agg.begin_view()?;
    let traces = view.debug_key(domain, &key)?;

    if traces.is_empty() {
        println!("Key {} not found in {domain}", hex::encode(&key));
    }
    for trace in &traces {
        let source = match trace.range {
            Some(range) => format!("files {range}"),
            None => "hot".to_string(),
        };
        let latest = match &trace.latest {
            Some((tx, Some(value))) => format!("{} @ {tx}", hex::encode(value)),
            Some((tx, None)) => format!("deleted @ {tx}"),
            None => "-".to_string(),
        };
        println!("{source:<16} latest: {latest}");
        println!("{:<16} txNums: {:?}", "", trace.tx_nums);
    }
    view.close();
    agg.close()?;
    Ok(())
}
