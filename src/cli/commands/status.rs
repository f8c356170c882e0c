//! Queue and breaker status display.

use chrono::Utc;
use console::style;

use crate::config::Settings;
use crate::models::BreakerState;
use crate::repository::{BreakerRepository, QueueRepository};

pub fn cmd_status(settings: &Settings) -> anyhow::Result<()> {
    let db_path = settings.db_path();
    if !db_path.exists() {
        println!(
            "{} No pipeline database at {}. Run 'hopper run' first.",
            style("!").yellow(),
            db_path.display()
        );
        return Ok(());
    }

    let queue = QueueRepository::new(&db_path)?;
    let stats = queue.queue_status()?;

    println!("\n{}", style("Queue").bold());
    println!("{}", "-".repeat(40));
    println!("{:<20} {}", "Pending:", stats.pending);
    println!("{:<20} {}", "Processing:", stats.processing);
    println!("{:<20} {}", "Awaiting retry:", stats.failed_retry);
    println!("{:<20} {}", "Done:", stats.done);
    println!("{:<20} {}", "Dead:", stats.dead);
    println!("{:<20} {}", "Total:", stats.total());

    let record = BreakerRepository::new(&db_path)?.load(settings.breaker.initial_cooldown_secs)?;
    println!("\n{}", style("Analysis circuit").bold());
    println!("{}", "-".repeat(40));
    let state = match record.status {
        BreakerState::Closed => style("closed").green(),
        BreakerState::Open => style("open").red(),
        BreakerState::HalfOpen => style("half-open").yellow(),
    };
    println!("{:<20} {}", "State:", state);
    println!("{:<20} {}", "Recent failures:", record.consecutive_failures);
    if record.status == BreakerState::Open {
        println!(
            "{:<20} {}s",
            "Retry probe in:",
            record.cooldown_remaining_secs(Utc::now())
        );
    }

    let dead = queue.list_dead(10)?;
    if !dead.is_empty() {
        println!("\n{}", style("Dead items (requeue with 'hopper requeue <id>')").bold());
        println!("{}", "-".repeat(40));
        for item in dead {
            println!(
                "  #{:<6} {} {}",
                item.id,
                item.source_path.display(),
                style(item.error_message.unwrap_or_default()).dim()
            );
        }
    }

    Ok(())
}
