use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    handoff_cli::cli::run().await
}
