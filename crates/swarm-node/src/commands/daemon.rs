//! Daemon supervision for the server: start/stop/restart/reload/status.
//!
//! Workers are plain child processes of this binary running `server` on
//! consecutive ports; each registers independently with the backend. The
//! `--api-key`/`--registry`/`--agents` flags given alongside a daemon
//! action are forwarded to every spawned worker. PIDs live in
//! `~/.swarm/swarm.pid`, one per line.

use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use swarm_config::Settings;

use super::server::ServerArgs;

/// How long `stop` waits for workers to exit before force-killing.
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Shorter grace period when cleaning up a partially started cluster.
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Daemon management actions.
#[derive(Subcommand, Debug, Clone, Copy)]
pub enum DaemonAction {
    /// Start background workers.
    Start,
    /// Stop all workers (SIGTERM, then SIGKILL stragglers).
    Stop,
    /// Stop, then start.
    Restart,
    /// Ask workers to re-pull config (SIGHUP).
    Reload,
    /// Show worker status.
    Status,
}

/// Path of the PID file.
pub fn pid_file_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".swarm").join("swarm.pid")
}

fn log_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".swarm").join("logs")
}

/// Write worker PIDs, one per line.
pub fn write_pids(pids: &[u32]) -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let lines: Vec<String> = pids.iter().map(u32::to_string).collect();
    std::fs::write(&path, lines.join("\n")).context("writing PID file")
}

/// Write a single PID (foreground mode).
pub fn write_pid(pid: u32) -> Result<()> {
    write_pids(&[pid])
}

/// Read worker PIDs; unparseable lines are skipped.
pub fn read_pids() -> Vec<u32> {
    let Ok(data) = std::fs::read_to_string(pid_file_path()) else {
        return Vec::new();
    };
    data.lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect()
}

/// Remove the PID file.
pub fn remove_pid() {
    let _ = std::fs::remove_file(pid_file_path());
}

fn signal_pid(pid: u32, sig: &str) -> bool {
    Command::new("kill")
        .arg(format!("-{sig}"))
        .arg(pid.to_string())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn pid_alive(pid: u32) -> bool {
    signal_pid(pid, "0")
}

/// PIDs from the file that are actually alive. A fully dead cluster
/// removes the stale PID file.
pub fn running_pids() -> Vec<u32> {
    let pids = read_pids();
    if pids.is_empty() {
        return Vec::new();
    }
    let alive: Vec<u32> = pids.into_iter().filter(|&p| pid_alive(p)).collect();
    if alive.is_empty() {
        remove_pid();
    }
    alive
}

/// SIGTERM every worker, poll until all exit (or `timeout`), then
/// SIGKILL any stragglers before removing the PID file.
fn stop_all_workers(pids: &[u32], timeout: Duration) {
    for pid in pids {
        signal_pid(*pid, "TERM");
    }

    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pids.iter().all(|&p| !pid_alive(p)) {
            remove_pid();
            return;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    let stragglers: Vec<u32> = pids.iter().copied().filter(|&p| pid_alive(p)).collect();
    for pid in &stragglers {
        println!("worker pid {pid} ignored SIGTERM, sending SIGKILL");
        signal_pid(*pid, "KILL");
    }
    if !stragglers.is_empty() {
        std::thread::sleep(POLL_INTERVAL);
    }
    remove_pid();
}

/// Run a daemon action.
pub fn run(action: DaemonAction, args: &ServerArgs) -> Result<()> {
    match action {
        DaemonAction::Start => start(args),
        DaemonAction::Stop => stop(),
        DaemonAction::Restart => {
            let _ = stop();
            start(args)
        }
        DaemonAction::Reload => reload(),
        DaemonAction::Status => status(),
    }
}

/// Build the argv for one worker, forwarding the shared server flags.
fn worker_command(exe: &std::path::Path, port: u16, args: &ServerArgs) -> Command {
    let mut cmd = Command::new(exe);
    cmd.arg("server").arg("--port").arg(port.to_string());
    if let Some(api_key) = args.api_key.as_deref().filter(|k| !k.is_empty()) {
        cmd.arg("--api-key").arg(api_key);
    }
    if let Some(registry) = args.registry.as_deref().filter(|u| !u.is_empty()) {
        cmd.arg("--registry").arg(registry);
    }
    if let Some(agents) = &args.agents {
        cmd.arg("--agents").arg(agents);
    }
    cmd
}

fn start(args: &ServerArgs) -> Result<()> {
    let running = running_pids();
    if !running.is_empty() {
        bail!("server already running (pids: {running:?})");
    }

    let settings = Settings::load(None)?;
    let base_port = args.port.unwrap_or(settings.gateway.port);
    let workers = settings.gateway.workers.max(1);
    let exe = std::env::current_exe().context("resolving own binary path")?;
    std::fs::create_dir_all(log_dir())?;

    let mut pids: Vec<u32> = Vec::with_capacity(workers);
    for i in 0..workers {
        let port = base_port + i as u16;
        let log_path = log_dir().join(format!("server-{port}.log"));
        let log = std::fs::File::create(&log_path)
            .with_context(|| format!("creating {}", log_path.display()))?;
        let err_log = log.try_clone()?;

        let spawned = worker_command(&exe, port, args)
            .stdin(std::process::Stdio::null())
            .stdout(log)
            .stderr(err_log)
            .spawn();
        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                // Don't leave a half-started cluster behind.
                if !pids.is_empty() {
                    println!("worker {} failed, stopping {} started worker(s)", i + 1, pids.len());
                    stop_all_workers(&pids, CLEANUP_TIMEOUT);
                }
                return Err(e).with_context(|| format!("spawning worker on port {port}"));
            }
        };
        println!("started worker {} on port {port} (pid {})", i + 1, child.id());
        pids.push(child.id());
    }

    write_pids(&pids)?;
    println!("{} worker(s) running, PID file: {}", pids.len(), pid_file_path().display());
    Ok(())
}

fn stop() -> Result<()> {
    let pids = running_pids();
    if pids.is_empty() {
        println!("server is not running");
        return Ok(());
    }
    println!("stopping {} worker(s) (pids: {pids:?})", pids.len());
    stop_all_workers(&pids, STOP_TIMEOUT);
    println!("all workers stopped");
    Ok(())
}

fn reload() -> Result<()> {
    let pids = running_pids();
    if pids.is_empty() {
        bail!("server is not running");
    }
    for pid in &pids {
        signal_pid(*pid, "HUP");
    }
    println!("reload signal sent to {} worker(s) (pids: {pids:?})", pids.len());
    Ok(())
}

fn status() -> Result<()> {
    let pids = running_pids();
    if pids.is_empty() {
        println!("not running");
        return Ok(());
    }
    println!("{} worker(s) running", pids.len());
    for (i, pid) in pids.iter().enumerate() {
        println!("  worker {}: pid {pid}", i + 1);
    }
    println!("PID file: {}", pid_file_path().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_file_roundtrip() {
        let _env = crate::env_lock();
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("HOME", dir.path());

        assert!(read_pids().is_empty());
        write_pids(&[101, 102, 103]).unwrap();
        assert_eq!(read_pids(), vec![101, 102, 103]);

        let raw = std::fs::read_to_string(pid_file_path()).unwrap();
        assert_eq!(raw, "101\n102\n103");

        remove_pid();
        assert!(read_pids().is_empty());
    }

    #[test]
    fn unparseable_pid_lines_are_skipped() {
        let _env = crate::env_lock();
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("HOME", dir.path());
        std::fs::create_dir_all(pid_file_path().parent().unwrap()).unwrap();
        std::fs::write(pid_file_path(), "12\n\nabc\n 34 \n").unwrap();
        assert_eq!(read_pids(), vec![12, 34]);
    }

    #[test]
    fn running_pids_drops_stale_file() {
        let _env = crate::env_lock();
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("HOME", dir.path());
        // PIDs that certainly aren't ours; u32::MAX is never a valid pid.
        write_pids(&[u32::MAX - 1, u32::MAX]).unwrap();
        assert!(running_pids().is_empty());
        assert!(!pid_file_path().exists());
    }

    #[test]
    fn worker_command_forwards_shared_flags() {
        let args = ServerArgs {
            action: None,
            port: Some(9000),
            api_key: Some("secret".into()),
            registry: Some("http://backend:3000".into()),
            agents: Some(PathBuf::from("/etc/swarm/agents.yaml")),
        };
        let cmd = worker_command(std::path::Path::new("/usr/bin/swarm"), 9001, &args);
        let argv: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            argv,
            vec![
                "server",
                "--port",
                "9001",
                "--api-key",
                "secret",
                "--registry",
                "http://backend:3000",
                "--agents",
                "/etc/swarm/agents.yaml",
            ]
        );
    }

    #[test]
    fn worker_command_omits_unset_flags() {
        let args = ServerArgs {
            action: None,
            port: None,
            api_key: None,
            registry: Some(String::new()),
            agents: None,
        };
        let cmd = worker_command(std::path::Path::new("/usr/bin/swarm"), 18790, &args);
        let argv: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        // Empty registry is treated as unset, matching the server command.
        assert_eq!(argv, vec!["server", "--port", "18790"]);
    }
}
