use blockwatch_core::prelude::*;
use blockwatch_core::{filter_recent_blocks, Calculator, DataLoader, SessionIdentifier};
use std::env;
use std::path::Path;

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    let loader = DataLoader::default();

    let events = match args.get(1) {
        Some(path) if Path::new(path).is_file() => loader.load_from_file(path)?,
        Some(path) => loader.load_from_directory(path)?,
        None => {
            for dir in loader.roots() {
                println!("Reading {}", dir.display());
            }
            loader.load_all()?
        }
    };

    if events.is_empty() {
        println!("No usage data found.");
        return Ok(());
    }

    let now = Utc::now();
    let identifier = SessionIdentifier::new();
    let calculator = Calculator::new();
    let blocks = identifier.identify_blocks(&events, now);

    println!("Loaded {} events into {} blocks", events.len(), blocks.len());
    println!("Total tokens: {}", format_number(calculator.calculate_total_tokens(&blocks)));
    println!("Total cost: ${:.4}", calculator.calculate_total_cost(&blocks));

    println!("\n--- Last 3 days ---");
    for block in filter_recent_blocks(&blocks, 3, now) {
        if block.is_gap() {
            println!(
                "  gap    {} -> {}",
                block.start_time().format("%m-%d %H:%M"),
                block.end_time().format("%m-%d %H:%M")
            );
            continue;
        }

        let rate = calculator
            .calculate_burn_rate(&block, now)
            .map(|r| format!("{:.1} tok/min", r.tokens_per_minute()))
            .unwrap_or_default();
        println!(
            "  {} {} {:>12} tokens  ${:>8.4}  {}",
            if block.is_active() { "ACTIVE" } else { "block " },
            block.start_time().format("%m-%d %H:%M"),
            format_number(block.token_counts().total()),
            block.cost_usd(),
            rate
        );
    }

    if let Some(active) = blocks.iter().find(|b| b.is_active()) {
        if let Some(projection) = calculator.project_block_usage(active, now) {
            println!("\n--- Active block projection ---");
            println!("Current tokens: {}", format_number(projection.current_tokens()));
            println!("Minutes remaining: {:.0}", projection.remaining_minutes());
            println!(
                "Projected total: {} tokens, ${:.4}",
                format_number(projection.projected_total_tokens()),
                projection.projected_total_cost()
            );
        }
    }

    Ok(())
}
