#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    loka_cli::cli::run().await
}
