//! `pixiscope stats`, once or as a watcher.

use std::time::Duration;

use anyhow::Result;
use pixiscope_probe::{Method, StatsAggregate};

use super::{print_agent_error, print_json};
use crate::config::PixiscopeConfig;
use crate::connection::{Connection, Reply};
use crate::watch::StopHandle;

#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    pub watch: bool,
    pub interval_ms: Option<u64>,
    /// Stop after this many polls.
    pub count: Option<u64>,
}

/// Print scene statistics and return how many polls were printed. With
/// `watch`, poll until stopped; a poll that returns an agent error is printed
/// and the watcher keeps going.
pub async fn run(
    conn: &Connection,
    config: &PixiscopeConfig,
    options: &WatchOptions,
    stop: &StopHandle,
) -> Result<u64> {
    if !options.watch {
        print_once(conn, config).await?;
        return Ok(1);
    }

    let interval = options.interval_ms.unwrap_or(config.watch_interval_ms);
    let mut polls = 0u64;
    while !stop.is_stopped() {
        print_once(conn, config).await?;
        polls += 1;
        if options.count.is_some_and(|max| polls >= max) {
            break;
        }
        conn.advance(interval);
        tokio::time::sleep(Duration::from_millis(interval)).await;
    }
    tracing::debug!(polls, "stats watcher stopped");
    Ok(polls)
}

async fn print_once(conn: &Connection, config: &PixiscopeConfig) -> Result<()> {
    match conn.call_as::<StatsAggregate>(Method::GetStats, &[], config).await? {
        Reply::Ok(stats) => print_json(&stats),
        Reply::Error(message) => print_agent_error(&message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PixiscopeConfig {
        PixiscopeConfig {
            watch_interval_ms: 1,
            ..PixiscopeConfig::default()
        }
    }

    fn frames(conn: &Connection) -> u64 {
        match conn {
            Connection::Simulated { app, .. } => app.frames_rendered(),
            Connection::Cdp { .. } => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_single_poll_without_watch() {
        let conn = Connection::simulated();
        let before = frames(&conn);
        let polls = run(&conn, &config(), &WatchOptions::default(), &StopHandle::new())
            .await
            .unwrap();
        assert_eq!(polls, 1);
        assert_eq!(frames(&conn), before);
    }

    #[tokio::test]
    async fn test_watch_respects_count() {
        let conn = Connection::simulated();
        let before = frames(&conn);
        let options = WatchOptions {
            watch: true,
            interval_ms: Some(1),
            count: Some(3),
        };
        let polls = run(&conn, &config(), &options, &StopHandle::new())
            .await
            .unwrap();
        assert_eq!(polls, 3);
        // The page advances between polls, not after the last one.
        assert_eq!(frames(&conn) - before, 2);
    }

    #[tokio::test]
    async fn test_watch_exits_when_already_stopped() {
        let conn = Connection::simulated();
        let before = frames(&conn);
        let stop = StopHandle::new();
        stop.stop();
        let options = WatchOptions {
            watch: true,
            ..WatchOptions::default()
        };
        let polls = run(&conn, &config(), &options, &stop).await.unwrap();
        assert_eq!(polls, 0);
        assert_eq!(frames(&conn), before);
    }

    #[tokio::test]
    async fn test_watch_stops_when_flag_flips() {
        let conn = Connection::simulated();
        let stop = StopHandle::new();
        let remote = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            remote.stop();
        });
        let options = WatchOptions {
            watch: true,
            interval_ms: Some(5),
            count: None,
        };
        let polls = run(&conn, &config(), &options, &stop).await.unwrap();
        assert!(polls >= 1);
        assert!(stop.is_stopped());
    }
}
