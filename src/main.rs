#[cfg(feature = "server")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    billing_sync::server::run().await
}
