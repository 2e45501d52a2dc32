//! Runs the aggregation pipeline once and prints the rendered digest. Nothing is sent.

use standup_digest::{build_engine, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_target(false).init();

    let settings = Settings::load()?;
    let engine = build_engine(&settings)?;

    let artifact = engine.generate_digest().await;
    println!("{}", artifact.text);
    eprintln!("({} records)", artifact.records);
    Ok(())
}
