use anyhow::{Context, Result, anyhow};
use log::{error, info, warn};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use serde_json::{Value, json};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use std::{
    fs,
    io::{BufRead, BufReader, Write},
    os::unix::net::{UnixListener, UnixStream},
    path::{Path, PathBuf},
    sync::mpsc::{self, Receiver, Sender},
    thread,
    time::Duration,
};

use super::runtime::socket_path;
use crate::config::DaemonConfigState;
use crate::session::SessionControl;

/// One JSON object per line, tagged by `op`.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request {
    StartSession { source: PathBuf },
    StopSession,
    Status,
    Reload,
    Use { profile: String },
    List,
    Doctor,
    Shutdown,
}

enum DaemonMsg {
    Request(Request, Sender<Value>),
    ProfileChanged(Vec<PathBuf>),
    Signal(i32),
}

/// Config and session state, owned by the daemon's main loop.
struct Daemon {
    cfg: DaemonConfigState,
    sessions: SessionControl,
}

impl Daemon {
    fn handle(&mut self, req: Request) -> Value {
        match req {
            Request::StartSession { source } => self.start(&source),
            Request::StopSession => {
                let stopped = self.sessions.stop_session();
                ok(json!({ "stopped": stopped }))
            }
            Request::Status => ok(json!({
                "is_tracking": self.sessions.is_tracking(),
                "source": self.sessions.source(),
                "active_profile": self.cfg.active_name,
                "profile_name": self.cfg.profile.meta.name,
                "profile_path": self.cfg.active_path(),
                "cameras": self.cfg.detected_cameras,
            })),
            Request::Reload => match self.cfg.reload() {
                Ok(()) => {
                    self.note_profile_change();
                    ok(json!({ "active_profile": self.cfg.active_name }))
                }
                Err(e) => fail(format!("{e:#}")),
            },
            Request::Use { profile } => match self.cfg.set_active(&profile) {
                Ok(()) => {
                    self.note_profile_change();
                    ok(json!({ "active_profile": self.cfg.active_name }))
                }
                Err(e) => fail(format!("{e:#}")),
            },
            Request::List => ok(json!({
                "profiles": self.cfg.list_profiles(),
                "active": self.cfg.active_name,
            })),
            Request::Doctor => ok(self.cfg.doctor_report()),
            Request::Shutdown => {
                self.sessions.stop_session();
                ok(json!("shutting down"))
            }
        }
    }

    fn start(&mut self, source: &Path) -> Value {
        match self.sessions.start_session(source, &self.cfg.profile) {
            Ok(()) => ok(json!({
                "source": source,
                "active_profile": self.cfg.active_name,
            })),
            Err(e) => {
                error!("start_session failed: {e}");
                fail(e.to_string())
            }
        }
    }

    fn note_profile_change(&self) {
        if self.sessions.is_tracking() {
            info!(
                "profile '{}' loaded; it applies from the next session",
                self.cfg.active_name
            );
        } else {
            info!("profile '{}' loaded", self.cfg.active_name);
        }
    }

    fn on_profile_files_changed(&mut self, paths: &[PathBuf]) {
        let active = self.cfg.active_path();
        if !paths.iter().any(|p| *p == active) {
            return;
        }
        match self.cfg.reload() {
            Ok(()) => self.note_profile_change(),
            Err(e) => warn!("{} changed but is invalid, keeping last good: {e:#}", active.display()),
        }
    }
}

fn ok(data: Value) -> Value {
    json!({ "ok": true, "data": data })
}

fn fail(error: impl Into<String>) -> Value {
    json!({ "ok": false, "error": error.into() })
}

pub fn run_daemon(initial_source: Option<PathBuf>) -> Result<()> {
    let sock = socket_path()?;
    if sock.exists() {
        if UnixStream::connect(&sock).is_ok() {
            return Err(anyhow!("handctl daemon already running at {}", sock.display()));
        }
        let _ = fs::remove_file(&sock);
    }
    let listener = UnixListener::bind(&sock)
        .with_context(|| format!("failed to bind {}", sock.display()))?;
    listener.set_nonblocking(true)?;
    info!("daemon: listening on {}", sock.display());

    let mut daemon = Daemon {
        cfg: DaemonConfigState::load_or_install_default()?,
        sessions: SessionControl::default(),
    };
    info!("daemon: active profile '{}'", daemon.cfg.active_name);

    let (tx, rx) = mpsc::channel::<DaemonMsg>();
    let _watcher = watch_profiles(&daemon.cfg.profiles_dir, tx.clone())?;
    spawn_signal_thread(tx.clone())?;

    if let Some(source) = initial_source {
        daemon.start(&source);
    }

    let result = serve(&listener, &mut daemon, &tx, &rx);
    daemon.sessions.stop_session();
    let _ = fs::remove_file(&sock);
    info!("daemon: exited");
    result
}

fn serve(
    listener: &UnixListener,
    daemon: &mut Daemon,
    tx: &Sender<DaemonMsg>,
    rx: &Receiver<DaemonMsg>,
) -> Result<()> {
    let mut was_tracking = false;
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                let tx = tx.clone();
                thread::spawn(move || {
                    if let Err(e) = handle_client(stream, tx) {
                        error!("ipc client error: {e}");
                    }
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => warn!("ipc accept failed: {e}"),
        }

        while let Ok(msg) = rx.try_recv() {
            match msg {
                DaemonMsg::Request(req, reply) => {
                    let shutdown = req == Request::Shutdown;
                    let _ = reply.send(daemon.handle(req));
                    if shutdown {
                        return Ok(());
                    }
                }
                DaemonMsg::ProfileChanged(paths) => daemon.on_profile_files_changed(&paths),
                DaemonMsg::Signal(sig) => {
                    info!("daemon: caught signal {sig}, shutting down");
                    return Ok(());
                }
            }
        }

        let tracking = daemon.sessions.is_tracking();
        if was_tracking && !tracking {
            info!("session ended: source exhausted or failed");
        }
        was_tracking = tracking;

        thread::sleep(Duration::from_millis(5));
    }
}

fn handle_client(mut stream: UnixStream, tx: Sender<DaemonMsg>) -> Result<()> {
    stream.set_nonblocking(false)?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim().is_empty() {
        return Ok(());
    }

    let resp = match serde_json::from_str::<Request>(&line) {
        Ok(req) => {
            let (reply_tx, reply_rx) = mpsc::channel();
            tx.send(DaemonMsg::Request(req, reply_tx))
                .map_err(|_| anyhow!("daemon is shutting down"))?;
            reply_rx
                .recv()
                .map_err(|_| anyhow!("daemon dropped the request"))?
        }
        Err(e) => fail(format!("bad request: {e}")),
    };

    writeln!(stream, "{resp}")?;
    Ok(())
}

fn watch_profiles(dir: &Path, tx: Sender<DaemonMsg>) -> Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
            let _ = tx.send(DaemonMsg::ProfileChanged(event.paths));
        }
        Ok(_) => {}
        Err(e) => warn!("profile watcher: {e}"),
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

fn spawn_signal_thread(tx: Sender<DaemonMsg>) -> Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::Builder::new()
        .name("handctl-signals".into())
        .spawn(move || {
            if let Some(sig) = signals.forever().next() {
                let _ = tx.send(DaemonMsg::Signal(sig));
            }
        })?;
    Ok(())
}

pub fn client_request(req: Value) -> Result<Value> {
    let sock = socket_path()?;
    if !sock.exists() {
        return Err(anyhow!(
            "handctl daemon is not running (socket missing at {})",
            sock.display()
        ));
    }
    let mut stream = UnixStream::connect(&sock)?;
    let line = serde_json::to_string(&req)? + "\n";
    stream.write_all(line.as_bytes())?;
    let mut reader = BufReader::new(stream);
    let mut resp = String::new();
    reader.read_line(&mut resp)?;
    Ok(serde_json::from_str(&resp)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_parsing() {
        let r: Request =
            serde_json::from_str(r#"{"op":"start_session","source":"/tmp/hands.jsonl"}"#).unwrap();
        assert_eq!(r, Request::StartSession { source: "/tmp/hands.jsonl".into() });
        let r: Request = serde_json::from_str(r#"{"op":"use","profile":"work"}"#).unwrap();
        assert_eq!(r, Request::Use { profile: "work".into() });
        let r: Request = serde_json::from_str(r#"{"op":"stop_session"}"#).unwrap();
        assert_eq!(r, Request::StopSession);
    }

    #[test]
    fn test_bad_requests_are_rejected() {
        assert!(serde_json::from_str::<Request>(r#"{"op":"explode"}"#).is_err());
        assert!(serde_json::from_str::<Request>(r#"{"op":"start_session"}"#).is_err());
        assert!(serde_json::from_str::<Request>(r#"{"source":"x"}"#).is_err());
    }

    #[test]
    fn test_response_shapes() {
        assert_eq!(ok(json!(1)), json!({"ok": true, "data": 1}));
        assert_eq!(fail("nope"), json!({"ok": false, "error": "nope"}));
    }
}
