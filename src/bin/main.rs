use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use followee_bridge::{AttributionPolicy, Bridge, BridgeError, load_settings};
use log::{error, info, warn};
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::{JoinError, JoinSet};

const TARGET: &str = "followee_bridge::main";

/// How long to wait for the worker to exit after `shutdown`.
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// Drive the followee fetcher worker from a line-oriented prompt.
///
/// Commands are read from stdin, one per line:
///   login USER PASS [CODE]
///   fetch TARGET
///   logout
///   quit
///
/// Each result is printed to stdout as one JSON line. Logs go to stderr.
#[derive(Parser)]
#[command(name = "followee-bridge")]
#[command(version)]
#[command(about = "Drive the followee fetcher worker over line-delimited JSON")]
struct Cli {
    /// Configuration file (default: user config, then built-in defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Worker interpreter or executable
    #[arg(long)]
    program: Option<String>,

    /// Directory containing the worker script
    #[arg(long, env = "PYTHON_SCRIPT_PATH")]
    script_dir: Option<PathBuf>,

    /// Stderr attribution policy (latest-pending or sole-pending)
    #[arg(long, value_enum)]
    classifier_policy: Option<AttributionPolicy>,

    /// Worker arguments, replacing the configured ones
    #[arg(last = true)]
    worker_args: Vec<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum ReplCommand {
    Login {
        username: String,
        password: String,
        code: Option<String>,
    },
    Fetch {
        target: String,
    },
    Logout,
    Quit,
}

fn parse_command(line: &str) -> Result<ReplCommand, String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    match words.as_slice() {
        ["login", username, password] => Ok(ReplCommand::Login {
            username: username.to_string(),
            password: password.to_string(),
            code: None,
        }),
        ["login", username, password, code] => Ok(ReplCommand::Login {
            username: username.to_string(),
            password: password.to_string(),
            code: Some(code.to_string()),
        }),
        ["fetch", target] => Ok(ReplCommand::Fetch {
            target: target.to_string(),
        }),
        ["logout"] => Ok(ReplCommand::Logout),
        ["quit"] | ["exit"] => Ok(ReplCommand::Quit),
        [] => Err("empty command".to_string()),
        [other, ..] => Err(format!(
            "unknown or malformed command {:?} (expected login, fetch, logout, quit)",
            other
        )),
    }
}

fn result_line(command: &str, result: Result<Value, BridgeError>) -> Value {
    match result {
        Ok(value) => json!({ "command": command, "ok": true, "result": value }),
        Err(e) => json!({ "command": command, "ok": false, "error": e.to_string() }),
    }
}

async fn run_command(bridge: Bridge, command: ReplCommand) -> Value {
    match command {
        ReplCommand::Login {
            username,
            password,
            code,
        } => {
            let result = bridge.login(&username, &password, code.as_deref()).await;
            result_line("login", result.map(|outcome| json!(outcome)))
        }
        ReplCommand::Fetch { target } => {
            let result = bridge.fetch(&target).await;
            result_line("fetch", result.map(|fetched| json!(fetched)))
        }
        ReplCommand::Logout => {
            let result = bridge.logout().await;
            result_line("logout", result.map(|ack| json!(ack)))
        }
        ReplCommand::Quit => json!({ "command": "quit", "ok": true }),
    }
}

fn joined_line(joined: Result<Value, JoinError>) -> Value {
    joined.unwrap_or_else(|e| json!({ "ok": false, "error": e.to_string() }))
}

/// Why the prompt loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplEnd {
    /// `quit` or end of input; every command already issued has answered.
    Input,
    ReadFailed,
    /// Commands still in flight are abandoned.
    Signal,
    WorkerExited,
}

impl ReplEnd {
    fn exit_code(self) -> ExitCode {
        match self {
            ReplEnd::Input | ReplEnd::Signal => ExitCode::SUCCESS,
            ReplEnd::ReadFailed | ReplEnd::WorkerExited => ExitCode::FAILURE,
        }
    }
}

/// Run commands read from `input` concurrently, handing each result line to
/// `emit` as it completes.
async fn run_repl<R, S, E>(bridge: &Bridge, input: R, signal: S, mut emit: E) -> ReplEnd
where
    R: AsyncBufRead + Unpin,
    S: Future<Output = ()>,
    E: FnMut(Value),
{
    let mut lines = input.lines();
    let mut tasks = JoinSet::new();
    tokio::pin!(signal);

    let end = loop {
        tokio::select! {
            _ = &mut signal => {
                info!(target: TARGET, "Signal received, shutting down");
                return ReplEnd::Signal;
            }
            _ = bridge.terminated() => {
                error!(target: TARGET, "Worker exited unexpectedly");
                return ReplEnd::WorkerExited;
            }
            Some(joined) = tasks.join_next() => emit(joined_line(joined)),
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match parse_command(&line) {
                    Ok(ReplCommand::Quit) => break ReplEnd::Input,
                    Ok(command) => {
                        tasks.spawn(run_command(bridge.clone(), command));
                    }
                    Err(message) => emit(json!({ "ok": false, "error": message })),
                },
                Ok(None) => break ReplEnd::Input,
                Err(e) => {
                    warn!(target: TARGET, "Failed to read stdin: {}", e);
                    break ReplEnd::ReadFailed;
                }
            },
        }
    };

    if !tasks.is_empty() {
        info!(target: TARGET, "Waiting for {} in-flight command(s)", tasks.len());
    }
    loop {
        tokio::select! {
            _ = &mut signal => {
                info!(target: TARGET, "Signal received, abandoning in-flight commands");
                return ReplEnd::Signal;
            }
            joined = tasks.join_next() => match joined {
                Some(joined) => emit(joined_line(joined)),
                None => return end,
            },
        }
    }
}

async fn termination_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(target: TARGET, "Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();

    let mut settings = match load_settings(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            error!(target: TARGET, "{}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(program) = cli.program {
        settings.worker.program = program;
    }
    if let Some(dir) = cli.script_dir {
        settings.worker.script_dir = Some(dir);
    }
    if let Some(policy) = cli.classifier_policy {
        settings.classifier.policy = policy;
    }
    if !cli.worker_args.is_empty() {
        settings.worker.args = cli.worker_args;
    }

    let bridge = match Bridge::spawn(&settings) {
        Ok(bridge) => bridge,
        Err(e) => {
            error!(target: TARGET, "{}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = bridge.wait_until_ready().await {
        error!(
            target: TARGET,
            "Worker did not become ready within {:?}: {}",
            settings.timeouts.ready_timeout(),
            e
        );
        return ExitCode::FAILURE;
    }
    info!(target: TARGET, "Worker ready");

    let end = run_repl(
        &bridge,
        BufReader::new(tokio::io::stdin()),
        termination_signal(),
        |line| println!("{}", line),
    )
    .await;
    if end == ReplEnd::WorkerExited {
        return end.exit_code();
    }

    if let Err(e) = bridge.shutdown().await {
        warn!(target: TARGET, "Shutdown failed: {}", e);
    }
    if tokio::time::timeout(EXIT_GRACE, bridge.terminated())
        .await
        .is_err()
    {
        warn!(target: TARGET, "Worker still running after {:?}; killing it", EXIT_GRACE);
    }
    end.exit_code()
}

#[cfg(test)]
mod tests {
    use super::*;
    use followee_bridge::BridgeSettings;
    use rstest::rstest;
    use tokio::io::{AsyncWriteExt, DuplexStream};

    /// Bridge attached to in-memory pipes, already past the ready handshake.
    /// Returns the worker's ends of stdin and stdout.
    async fn ready_bridge() -> (Bridge, DuplexStream, DuplexStream, DuplexStream) {
        let (bridge_stdin, worker_stdin) = tokio::io::duplex(4096);
        let (mut worker_stdout, bridge_stdout) = tokio::io::duplex(4096);
        let (worker_stderr, bridge_stderr) = tokio::io::duplex(4096);
        let bridge = Bridge::attach(
            &BridgeSettings::default(),
            bridge_stdin,
            bridge_stdout,
            bridge_stderr,
            std::future::pending::<Option<i32>>(),
        );
        worker_stdout
            .write_all(b"{\"status\": \"ready\", \"message\": \"Fetcher ready\"}\n")
            .await
            .unwrap();
        bridge.wait_until_ready().await.unwrap();
        (bridge, worker_stdin, worker_stdout, worker_stderr)
    }

    /// Answers the first fetch with one followee after a delay.
    async fn answer_fetch_slowly(worker_stdin: DuplexStream, mut worker_stdout: DuplexStream) {
        let mut commands = BufReader::new(worker_stdin).lines();
        let line = commands.next_line().await.unwrap().unwrap();
        let command: Value = serde_json::from_str(&line).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let reply = json!({
            "command": "fetch_batch",
            "request_id": command["request_id"],
            "success": true,
            "target": "alice",
            "data": [{"username": "bob", "full_name": "Bob"}],
            "total_batches": 1,
        });
        worker_stdout
            .write_all(format!("{}\n", reply).as_bytes())
            .await
            .unwrap();
        // Keep the pipes open until the bridge shuts down.
        let _ = commands.next_line().await;
    }

    #[rstest]
    #[case::end_of_input("fetch alice\n")]
    #[case::quit("fetch alice\nquit\n")]
    #[tokio::test]
    async fn input_end_waits_for_in_flight_commands(#[case] input: &'static str) {
        let (bridge, worker_stdin, worker_stdout, _stderr) = ready_bridge().await;
        tokio::spawn(answer_fetch_slowly(worker_stdin, worker_stdout));

        let mut printed = Vec::new();
        let end = run_repl(
            &bridge,
            BufReader::new(input.as_bytes()),
            std::future::pending::<()>(),
            |line| printed.push(line),
        )
        .await;

        assert_eq!(end, ReplEnd::Input);
        assert_eq!(printed.len(), 1);
        assert_eq!(printed[0]["command"], "fetch");
        assert_eq!(printed[0]["ok"], true);
        assert_eq!(printed[0]["result"]["items"][0]["username"], "bob");
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test]
    async fn signal_abandons_in_flight_commands() {
        let (bridge, worker_stdin, _stdout, _stderr) = ready_bridge().await;
        let mut commands = BufReader::new(worker_stdin).lines();
        let (mut feed, input) = tokio::io::duplex(64);
        feed.write_all(b"fetch alice\n").await.unwrap();

        let signal = async {
            // Fires once the fetch has reached the worker.
            commands.next_line().await.unwrap().unwrap();
        };
        let mut printed = Vec::new();
        let end = run_repl(&bridge, BufReader::new(input), signal, |line| {
            printed.push(line)
        })
        .await;

        assert_eq!(end, ReplEnd::Signal);
        assert!(printed.is_empty());
        // Left for shutdown to reject.
        assert_eq!(bridge.pending_count(), 1);
    }

    #[test]
    fn unparseable_lines_and_failures_become_error_lines() {
        let line = result_line("logout", Err(BridgeError::NotReady));
        assert_eq!(line["command"], "logout");
        assert_eq!(line["ok"], false);
        assert_eq!(line["error"], BridgeError::NotReady.to_string());
    }

    #[test]
    fn parses_login_with_and_without_code() {
        assert_eq!(
            parse_command("login alice s3cret"),
            Ok(ReplCommand::Login {
                username: "alice".to_string(),
                password: "s3cret".to_string(),
                code: None,
            })
        );
        assert_eq!(
            parse_command("login alice s3cret 123456"),
            Ok(ReplCommand::Login {
                username: "alice".to_string(),
                password: "s3cret".to_string(),
                code: Some("123456".to_string()),
            })
        );
    }

    #[test]
    fn parses_fetch_logout_and_quit() {
        assert_eq!(
            parse_command("  fetch   bob "),
            Ok(ReplCommand::Fetch {
                target: "bob".to_string()
            })
        );
        assert_eq!(parse_command("logout"), Ok(ReplCommand::Logout));
        assert_eq!(parse_command("exit"), Ok(ReplCommand::Quit));
    }

    #[test]
    fn rejects_malformed_commands() {
        assert!(parse_command("fetch").is_err());
        assert!(parse_command("login alice").is_err());
        assert!(parse_command("dance").is_err());
    }

    #[test]
    fn cli_reads_policy_and_trailing_worker_args() {
        let cli = Cli::parse_from([
            "followee-bridge",
            "--classifier-policy",
            "sole-pending",
            "--",
            "fetcher.py",
            "--debug",
        ]);
        assert_eq!(cli.classifier_policy, Some(AttributionPolicy::SolePending));
        assert_eq!(cli.worker_args, vec!["fetcher.py", "--debug"]);
    }
}
