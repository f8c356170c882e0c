//! Give a dead item another run through the pipeline.

use console::style;

use crate::config::Settings;
use crate::repository::QueueRepository;

pub fn cmd_requeue(settings: &Settings, item_id: i64) -> anyhow::Result<()> {
    let queue = QueueRepository::new(&settings.db_path())?;

    if queue.requeue_dead(item_id)? {
        println!("  {} #{} reset to pending", style("✓").green(), item_id);
    } else {
        println!(
            "  {} #{} is not a dead item (see 'hopper status')",
            style("✗").red(),
            item_id
        );
    }
    Ok(())
}
