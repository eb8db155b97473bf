//! Voxserve - Realtime AI voice conversation server.

use voxserve::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::run().await
}
