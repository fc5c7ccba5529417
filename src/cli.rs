use anyhow::{Result, anyhow};
use pico_args::Arguments;
use serde_json::json;
use std::{env, os::unix::net::UnixStream, path::PathBuf, process::Command};

use crate::actions::{ActionSink, DesktopSink};
use crate::config::DaemonConfigState;
use crate::ipc;

pub fn run() -> Result<()> {
    let mut pargs = Arguments::from_env();

    // Hidden daemon mode (spawned by `start`)
    if pargs.contains("--daemon") {
        let source: Option<PathBuf> = pargs.opt_value_from_str("--source")?;
        return ipc::run_daemon(source);
    }

    if env::args().len() == 1 || pargs.contains("-h") || pargs.contains("--help") {
        print_help();
        return Ok(());
    }

    let subcmd: Option<String> = pargs.free_from_str().ok();

    match subcmd.as_deref() {
        Some("help") => {
            match pargs.free_from_str::<String>().ok() {
                Some(t) => print_subcmd_help(&t),
                None => print_help(),
            }
            Ok(())
        }

        Some("start") => {
            let source: Option<PathBuf> = pargs.opt_value_from_str("--source")?;
            let sock = ipc::socket_path()?;
            if UnixStream::connect(&sock).is_ok() {
                return Err(anyhow!("handctl daemon already running ({})", sock.display()));
            }
            let mut cmd = Command::new(env::current_exe()?);
            cmd.arg("--daemon");
            if let Some(src) = &source {
                cmd.arg("--source").arg(src);
            }
            let child = cmd.spawn()?;
            println!("handctl: started daemon (pid={})", child.id());
            Ok(())
        }

        Some("stop") => request(json!({"op": "shutdown"})),

        Some("track") => {
            let source: PathBuf = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handctl track <landmark-stream>"))?;
            // the daemon resolves paths against its own cwd
            let source = if source.is_relative() {
                env::current_dir()?.join(source)
            } else {
                source
            };
            request(json!({"op": "start_session", "source": source}))
        }

        Some("untrack") => request(json!({"op": "stop_session"})),
        Some("status") => request(json!({"op": "status"})),
        Some("reload") => request(json!({"op": "reload"})),

        Some("use") => {
            let name: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handctl use <profile_name>"))?;
            request(json!({"op": "use", "profile": name}))
        }

        Some("list") => request(json!({"op": "list"})),
        Some("doctor") => request(json!({"op": "doctor"})),
        Some("emit") => emit(&mut pargs),

        Some(other) => {
            eprintln!("unknown subcommand: {other}\n");
            print_help();
            Ok(())
        }

        None => {
            print_help();
            Ok(())
        }
    }
}

fn request(req: serde_json::Value) -> Result<()> {
    let r = ipc::client_request(req)?;
    println!("{}", serde_json::to_string_pretty(&r).unwrap_or_default());
    if r.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        return Err(anyhow!("daemon reported an error"));
    }
    Ok(())
}

/// Drive the desktop sink directly, without a daemon.
fn emit(pargs: &mut Arguments) -> Result<()> {
    let what: String = pargs
        .free_from_str()
        .map_err(|_| anyhow!("usage: handctl emit <click|key|move|type> ..."))?;
    let cfg = DaemonConfigState::load_or_install_default()?;
    let mut sink = DesktopSink::new(cfg.profile.screen())?;
    match what.as_str() {
        "click" => {
            sink.click()?;
            println!("ok: clicked");
        }
        "key" => {
            let chord: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handctl emit key CTRL+SHIFT+S"))?;
            let keys: Vec<&str> = chord.split('+').collect();
            sink.send_hotkey(&keys)?;
            println!("ok: sent key chord {chord}");
        }
        "move" => {
            let usage = || anyhow!("usage: handctl emit move <x> <y>");
            let x: i32 = pargs.free_from_str().map_err(|_| usage())?;
            let y: i32 = pargs.free_from_str().map_err(|_| usage())?;
            sink.move_pointer(x, y)?;
            println!("ok: moved pointer to ({x}, {y})");
        }
        "type" => {
            let text: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handctl emit type <text>"))?;
            sink.type_text(&text)?;
            println!("ok: typed {} char(s)", text.chars().count());
        }
        other => return Err(anyhow!("unknown emit kind: {other}")),
    }
    Ok(())
}

fn print_help() {
    println!(
        r#"handctl: hand-gesture desktop control daemon

USAGE:
  handctl help [command]            Show general or command-specific help
  handctl start [--source <path>]   Start the daemon, optionally tracking right away
  handctl stop                      Stop the daemon
  handctl track <path>              Start a tracking session from a landmark stream
  handctl untrack                   Stop the tracking session
  handctl status                    Show tracking state and active profile
  handctl reload                    Reload active profile
  handctl use <name>                Switch active profile
  handctl list                      List profiles
  handctl doctor                    Diagnose permissions, tools and cameras
  handctl emit click                Emit a left click
  handctl emit key CTRL+SHIFT+S     Emit a key or chord
  handctl emit move <x> <y>         Move the pointer to screen pixels
  handctl emit type <text>          Type text into the focused window

TIPS:
  - Landmark streams are JSON lines: {{"hands":[{{"handedness":"Right","landmarks":[[x,y,z],...]}}]}}
  - Profiles: ~/.config/handctl/profiles
  - Active profile pointer: ~/.config/handctl/active
"#
    );
}

fn print_subcmd_help(cmd: &str) {
    match cmd {
        "start" => println!(
            "usage: handctl start [--source <path>]\nStarts the background daemon; with --source it begins tracking immediately."
        ),
        "stop" => println!("usage: handctl stop\nStops any session, then the daemon."),
        "track" => println!(
            "usage: handctl track <path>\nReads hand landmarks from a file or FIFO. Fails if a session is running."
        ),
        "untrack" => println!("usage: handctl untrack\nStops the session and discards buffered frames."),
        "status" => println!(
            "usage: handctl status\nShows whether tracking is active, its source and the active profile."
        ),
        "reload" => println!(
            "usage: handctl reload\nReloads the current profile; keeps last good on error."
        ),
        "use" => {
            println!("usage: handctl use <name>\nSwitches active profile to <name> and reloads.")
        }
        "list" => println!("usage: handctl list\nLists available profiles."),
        "doctor" => println!(
            "usage: handctl doctor\nChecks /dev/uinput, input group, xdotool/xclip and capture devices."
        ),
        "emit" => println!(
            "usage:\n  handctl emit click\n  handctl emit key CTRL+SHIFT+S\n  handctl emit move <x> <y>\n  handctl emit type <text>"
        ),
        _ => {
            eprintln!("unknown command: {cmd}\n");
            print_help();
        }
    }
}
