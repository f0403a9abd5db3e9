#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hockey_stats_crawler::run().await
}
