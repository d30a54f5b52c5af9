use logkv::{Engine, EngineConfig};
use std::env;

/// A thin demo entrypoint: opens a store at the given directory (or a
/// default), runs a handful of puts/gets so the log output is visible,
/// then shuts down cleanly.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let data_dir = env::args().nth(1).unwrap_or_else(|| "./.logkv_data".to_string());
    let config = EngineConfig::new(data_dir);

    let engine = Engine::open(config)?;
    engine.start()?;

    engine.put(b"hello", b"world")?;
    println!("GET hello = {:?}", engine.get(b"hello")?.map(|v| String::from_utf8_lossy(&v).into_owned()));

    engine.delete(b"hello")?;
    println!("GET hello after delete = {:?}", engine.get(b"hello")?);

    engine.graceful_shutdown()?;
    Ok(())
}
