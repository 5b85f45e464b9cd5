// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reachability probes.

use std::time::Duration;

use crate::error::Result;
use crate::executor::Executor;

/// One ICMP echo with a one second deadline.
pub async fn ping(executor: &dyn Executor, ip: &str) -> Result<bool> {
    Ok(executor.run("ping", &["-c", "1", "-W", "1", ip]).await?.success())
}

/// Ping `ip` until it answers or `deadline` passes.
pub async fn wait_reachable(
    executor: &dyn Executor,
    ip: &str,
    deadline: Duration,
    step: Duration,
) -> Result<bool> {
    let started = tokio::time::Instant::now();
    loop {
        if ping(executor, ip).await? {
            return Ok(true);
        }
        if started.elapsed() + step > deadline {
            return Ok(false);
        }
        tokio::time::sleep(step).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::CommandOutput;
    use crate::mock::ScriptedExecutor;

    #[tokio::test]
    async fn test_ping_maps_rc() {
        let exec = ScriptedExecutor::new();
        exec.respond("ping -c 1 -W 1 10.0.0.9", CommandOutput::failed(1, ""));
        assert!(ping(&exec, "10.0.0.1").await.unwrap());
        assert!(!ping(&exec, "10.0.0.9").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_reachable_gives_up() {
        let exec = ScriptedExecutor::new();
        exec.respond("ping", CommandOutput::failed(1, ""));
        let up = wait_reachable(&exec, "10.0.0.9", Duration::from_secs(30), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(!up);
        assert_eq!(exec.commands().len(), 31);
    }
}
