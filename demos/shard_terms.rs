use shard_terms::{InMemoryStore, ShardTerms, ShardTermsConfig, ShardTermsCoordinator, ShardTermsOptions, TermsListener};
use slog::Drain;
use std::collections::HashSet;
use std::error::Error;
use std::sync::Arc;
use tokio::time::Duration;

const PATH: &str = "/collections/demo/terms/shard1";

/// Two replicas of one shard, each with its own coordinator on a shared store. The leader
/// takes a write that the follower missed, so the follower must recover before it may lead.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let logger = create_root_logger_for_stdout();
    let store = Arc::new(InMemoryStore::new());
    store.create_node(PATH, "{}")?;

    let leader = ShardTermsCoordinator::create(config(&logger, "core_node1"), store.clone()).await?;
    let follower = ShardTermsCoordinator::create(config(&logger, "core_node2"), store.clone()).await?;
    follower.add_listener(Arc::new(PrintingListener("core_node2")));

    leader.register_term("core_node1").await?;
    follower.register_term("core_node2").await?;
    leader.ensure_highest_terms_are_not_zero().await?;

    let mut missed_update = HashSet::new();
    missed_update.insert("core_node2".to_string());
    leader.ensure_terms_is_higher("core_node1", &missed_update).await?;
    wait_for_version(&follower, &leader).await;
    println!(
        "After missed update: can_become_leader(core_node2)={} skip_sending_updates_to(core_node2)={}",
        follower.can_become_leader("core_node2"),
        leader.skip_sending_updates_to("core_node2"),
    );

    follower.start_recovering("core_node2").await?;
    println!("Recovering: {:?}", follower.shard_terms());
    follower.done_recovering("core_node2").await?;
    wait_for_version(&leader, &follower).await;
    println!(
        "After recovery: can_become_leader(core_node2)={} skip_sending_updates_to(core_node2)={}",
        leader.can_become_leader("core_node2"),
        leader.skip_sending_updates_to("core_node2"),
    );

    println!("Removing core_node2: {:?}", follower.remove_term_for_core("core_node2").await?);
    follower.close();
    wait_for_version(&leader, &leader).await;
    println!("Final terms: {:?}", leader.terms());
    leader.close();

    Ok(())
}

struct PrintingListener(&'static str);

impl TermsListener for PrintingListener {
    fn on_term_changed(&self, terms: &ShardTerms) -> bool {
        println!("[{}] terms changed: {:?}", self.0, terms);
        true
    }

    fn close(&self) {
        println!("[{}] listener closed", self.0);
    }
}

fn config(logger: &slog::Logger, core: &str) -> ShardTermsConfig {
    ShardTermsConfig {
        collection: "demo".to_string(),
        shard: "shard1".to_string(),
        logger: logger.new(slog::o!("Core" => core.to_string())),
        options: ShardTermsOptions::default(),
    }
}

/// Wait until `observer` has caught up with the last write `writer` knows about.
async fn wait_for_version(observer: &ShardTermsCoordinator<InMemoryStore>, writer: &ShardTermsCoordinator<InMemoryStore>) {
    let target = writer.shard_terms().map_or(-1, |terms| terms.version());
    for _ in 0..100 {
        if observer.shard_terms().map_or(false, |terms| terms.version() >= target) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn create_root_logger_for_stdout() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).use_file_location().build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}
