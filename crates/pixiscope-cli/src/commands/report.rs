//! Commands that print one agent method's reply.

use anyhow::Result;
use pixiscope_probe::Method;
use serde_json::Value;

use super::print_json;
use crate::config::PixiscopeConfig;
use crate::connection::Connection;

/// Call `method` and print whatever comes back, `{error}` replies included.
pub async fn run(conn: &Connection, config: &PixiscopeConfig, method: Method, args: &[Value]) -> Result<()> {
    let reply = conn.call(method, args, config).await?;
    print_json(&reply)
}

/// `pixiscope benchmark`: run the render loop for `duration_ms`.
pub async fn benchmark(conn: &Connection, config: &PixiscopeConfig, duration_ms: Option<u64>) -> Result<()> {
    let duration = duration_ms.unwrap_or(config.benchmark_duration_ms);
    eprintln!("Benchmarking {} for {duration} ms...", conn.describe());
    run(conn, config, Method::Benchmark, &[Value::from(duration)]).await
}
