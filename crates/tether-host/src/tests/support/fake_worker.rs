//! Shell-scripted workers that exercise specific supervisor paths.
//!
//! Scripts that idle end in `exec sleep` so a kill reaches the process that
//! holds the pipes open.

use std::time::Duration;

use crate::settings::{LinkSettings, WorkerCommand};

const PRELUDE: &str = r#"
READY='{"jsonrpc":"2.0","method":"ready","params":{"pid":0,"version":"test"}}'
HEARTBEAT='{"jsonrpc":"2.0","method":"heartbeat","params":{"seq":0}}'
"#;

const RESPONSIVE: &str = r#"
echo 'booting fake worker'
echo 'fake worker diagnostic' >&2
printf '%s\n' "$READY"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"exit"'*) exit 0 ;;
    *'"method":"getLines"'*) ;;
    *'"method":"fail"'*)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32000,"message":"automation failed"}}\n' "$id" ;;
    *'"method":"emit"'*)
      printf '%s\n' "$HEARTBEAT"
      printf '{"jsonrpc":"2.0","method":"lineChanged","params":{"line":1}}\n'
      printf '{"jsonrpc":"2.0","id":%s,"result":null}\n' "$id" ;;
    *)
      if [ -n "$id" ]; then
        printf '{"jsonrpc":"2.0","id":%s,"result":"ok"}\n' "$id"
      fi ;;
  esac
done
"#;

const FALLS_SILENT: &str = r#"
printf '%s\n' "$READY"
i=0
while [ "$i" -lt 3 ]; do
  sleep 0.1
  printf '%s\n' "$HEARTBEAT"
  i=$((i + 1))
done
exec sleep 30
"#;

const EXITS_AFTER_READY: &str = r#"
printf '%s\n' "$READY"
exit 1
"#;

const EXITS_ON_REQUEST: &str = r#"
printf '%s\n' "$READY"
read -r line
exit 3
"#;

const REPORTS_INTERVAL: &str = r#"
printf '%s\n' "$READY"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"exit"'*) exit 0 ;;
  esac
  if [ -n "$id" ]; then
    printf '{"jsonrpc":"2.0","id":%s,"result":"%s"}\n' "$id" "$TETHER_HEARTBEAT_INTERVAL_MS"
  fi
done
"#;

const NEVER_READY: &str = r"
exec sleep 30
";

/// Scripted worker behaviours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeWorker {
    /// Answers requests until told to exit; ignores `getLines`.
    Responsive,
    /// Heartbeats briefly, then hangs without output.
    FallsSilent,
    /// Exits immediately after reporting readiness.
    ExitsAfterReady,
    /// Exits when the first request arrives.
    ExitsOnRequest,
    /// Answers every request with the heartbeat interval it inherited.
    ReportsInterval,
    /// Never reports readiness.
    NeverReady,
    /// Points at an executable that does not exist.
    Missing,
}

impl FakeWorker {
    fn script(self) -> &'static str {
        match self {
            Self::Responsive => RESPONSIVE,
            Self::FallsSilent => FALLS_SILENT,
            Self::ExitsAfterReady => EXITS_AFTER_READY,
            Self::ExitsOnRequest => EXITS_ON_REQUEST,
            Self::ReportsInterval => REPORTS_INTERVAL,
            Self::NeverReady | Self::Missing => NEVER_READY,
        }
    }

    fn command(self) -> WorkerCommand {
        if self == Self::Missing {
            return WorkerCommand::new("/nonexistent/tether-fake-worker");
        }
        WorkerCommand::new("/bin/sh").with_args(["-c".to_owned(), format!("{PRELUDE}{}", self.script())])
    }

    /// Settings tuned for fast, deterministic scenarios.
    ///
    /// The long backoff keeps a scheduled restart from firing while a
    /// scenario inspects the `Restarting` state.
    pub fn settings(self) -> LinkSettings {
        LinkSettings::new(self.command())
            .with_heartbeat(Duration::from_millis(100), Duration::from_secs(30))
            .with_restart_budget(3, Duration::from_secs(60))
            .with_restart_backoff(Duration::from_secs(5))
            .with_stable_connection(Duration::from_secs(60))
            .with_startup_timeout(Duration::from_secs(5))
            .with_request_timeout(Duration::from_secs(5))
    }
}
