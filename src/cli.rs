//! Command-line interface and REPL
//!
//! Lines are read by rustyline on a dedicated thread and handed to the event
//! loop over a channel; commands run against the controller on the loop.

use anyhow::{bail, Context, Result};
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::controller::Controller;
use crate::monitor;
use crate::params::ParameterSnapshot;

const PROMPT: &str = "synthctl> ";

/// Default number of entries shown by `log`
const DEFAULT_LOG_LINES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NrpnSwitch {
    On,
    Off,
    Toggle,
}

/// A parsed REPL command. Channels are 0-based here; the REPL takes 1-16.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Ports,
    Refresh,
    /// `None` deselects
    Input(Option<String>),
    Output(Option<String>),
    Params,
    Set { key: String, value: i32 },
    Get(String),
    Reset,
    Nrpn(NrpnSwitch),
    Cc { channel: u8, controller: u8, value: u8 },
    NrpnSend { channel: u8, parameter: u16, value: u16 },
    Note { channel: u8, note: u8, velocity: u8 },
    ProgramChange { channel: u8, program: u8 },
    Log(usize),
    Stats,
    Clear,
    Save(Option<PathBuf>),
    Load(Option<PathBuf>),
    Quit,
}

/// Whether the loop should keep going after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

impl Command {
    /// Parse one input line; blank lines yield `None`
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();

        let command = match (name.to_lowercase().as_str(), args.as_slice()) {
            ("help" | "?", []) => Command::Help,
            ("ports", []) => Command::Ports,
            ("refresh", []) => Command::Refresh,
            ("in", [port]) => Command::Input(port_arg(port)),
            ("out", [port]) => Command::Output(port_arg(port)),
            ("params", []) => Command::Params,
            ("set", [key, value]) => Command::Set {
                key: key.to_string(),
                value: number(value, "value")?,
            },
            ("get", [key]) => Command::Get(key.to_string()),
            ("reset", []) => Command::Reset,
            ("nrpn", [switch]) => Command::Nrpn(match switch.to_lowercase().as_str() {
                "on" => NrpnSwitch::On,
                "off" => NrpnSwitch::Off,
                "toggle" => NrpnSwitch::Toggle,
                other => bail!("Expected on, off or toggle, got '{}'", other),
            }),
            ("nrpn", []) => Command::Nrpn(NrpnSwitch::Toggle),
            ("cc", [channel, controller, value]) => Command::Cc {
                channel: channel_arg(channel)?,
                controller: number(controller, "controller")?,
                value: number(value, "value")?,
            },
            ("nrpn-send", [channel, parameter, value]) => Command::NrpnSend {
                channel: channel_arg(channel)?,
                parameter: number(parameter, "parameter")?,
                value: number(value, "value")?,
            },
            ("note", [channel, note, velocity]) => Command::Note {
                channel: channel_arg(channel)?,
                note: number(note, "note")?,
                velocity: number(velocity, "velocity")?,
            },
            ("pc", [channel, program]) => Command::ProgramChange {
                channel: channel_arg(channel)?,
                program: number(program, "program")?,
            },
            ("log", []) => Command::Log(DEFAULT_LOG_LINES),
            ("log", [count]) => Command::Log(number(count, "count")?),
            ("stats", []) => Command::Stats,
            ("clear", []) => Command::Clear,
            ("save", []) => Command::Save(None),
            ("save", [path]) => Command::Save(Some(PathBuf::from(path))),
            ("load", []) => Command::Load(None),
            ("load", [path]) => Command::Load(Some(PathBuf::from(path))),
            ("quit" | "exit", []) => Command::Quit,
            (other, _) => bail!("Unknown command or wrong arguments: '{}' (try 'help')", other),
        };
        Ok(Some(command))
    }
}

fn port_arg(arg: &str) -> Option<String> {
    match arg {
        "-" | "none" => None,
        pattern => Some(pattern.to_string()),
    }
}

fn number<T: std::str::FromStr>(arg: &str, what: &str) -> Result<T> {
    arg.parse()
        .ok()
        .with_context(|| format!("Invalid {}: '{}'", what, arg))
}

/// REPL channels are 1-16, as shown in the log
fn channel_arg(arg: &str) -> Result<u8> {
    let channel: u8 = number(arg, "channel")?;
    if !(1..=16).contains(&channel) {
        bail!("Channel must be 1-16, got {}", channel);
    }
    Ok(channel - 1)
}

/// Run a command against the controller.
///
/// MIDI failures are already in the message log; they are printed and the
/// REPL carries on. Only snapshot I/O errors are returned.
pub async fn execute(
    controller: &mut Controller,
    command: Command,
    snapshot_path: &Path,
) -> Result<Flow> {
    debug!("REPL command: {:?}", command);

    let outcome = match command {
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Ports => {
            monitor::print_ports(controller.ports());
            Ok(())
        }
        Command::Refresh => controller.refresh_ports().map(|changes| {
            for change in changes {
                println!("  {}", change);
            }
        }),
        Command::Input(pattern) => controller
            .select_input(pattern.as_deref())
            .map(|port| report_selection("Input", port.map(|p| p.name))),
        Command::Output(pattern) => controller
            .select_output(pattern.as_deref())
            .map(|port| report_selection("Output", port.map(|p| p.name))),
        Command::Params => {
            monitor::print_params(controller.params(), controller.nrpn_mode());
            Ok(())
        }
        Command::Set { key, value } => {
            controller.set_parameter(&key, value).map(|(stored, format)| {
                println!(
                    "  {} = {} {}",
                    key.yellow(),
                    stored.to_string().bright_green(),
                    format!("via {}", format.as_str()).dimmed()
                );
            })
        }
        Command::Get(key) => {
            match controller.params().get(&key) {
                Some(param) => println!(
                    "  {} = {} {}",
                    key.yellow(),
                    param.value().to_string().bright_green(),
                    format!("[{}..={}]", param.min, param.max).dimmed()
                ),
                None => println!("  {}", format!("Unknown parameter: {}", key).red()),
            }
            Ok(())
        }
        Command::Reset => {
            controller.reset_parameters();
            println!("  Parameters reset to defaults");
            Ok(())
        }
        Command::Nrpn(switch) => {
            match switch {
                NrpnSwitch::On => controller.set_nrpn_mode(true),
                NrpnSwitch::Off => controller.set_nrpn_mode(false),
                NrpnSwitch::Toggle => {
                    controller.toggle_nrpn_mode();
                }
            }
            println!(
                "  NRPN mode {}",
                if controller.nrpn_mode() { "on".green() } else { "off".yellow() }
            );
            Ok(())
        }
        Command::Cc {
            channel,
            controller: cc,
            value,
        } => controller.send_cc(channel, cc, value),
        Command::NrpnSend {
            channel,
            parameter,
            value,
        } => controller.send_nrpn(channel, parameter, value),
        Command::Note {
            channel,
            note,
            velocity,
        } => controller.send_note(channel, note, velocity),
        Command::ProgramChange { channel, program } => {
            controller.send_program_change(channel, program)
        }
        Command::Log(count) => {
            monitor::print_log(controller.log().entries(), count);
            Ok(())
        }
        Command::Stats => {
            monitor::print_stats(controller.log().stats());
            Ok(())
        }
        Command::Clear => {
            controller.log_mut().clear();
            println!("  Log cleared");
            Ok(())
        }
        Command::Save(path) => {
            let path = path.as_deref().unwrap_or(snapshot_path);
            controller.snapshot().save_to_file(path).await?;
            println!("  Saved parameters to {}", path.display());
            Ok(())
        }
        Command::Load(path) => {
            let path = path.as_deref().unwrap_or(snapshot_path);
            let snapshot = ParameterSnapshot::load_from_file(path).await?;
            let restored = controller.restore(&snapshot);
            println!("  Restored {} values from {}", restored, path.display());
            Ok(())
        }
        Command::Quit => return Ok(Flow::Quit),
    };

    if let Err(e) = outcome {
        println!("  {}", e.to_string().bright_red());
    }
    Ok(Flow::Continue)
}

fn report_selection(direction: &str, name: Option<String>) {
    match name {
        Some(name) => println!("  {} -> {}", direction, name.bright_white()),
        None => println!("  {} deselected", direction),
    }
}

fn print_help() {
    let commands = [
        ("ports", "list MIDI ports (* = selected)"),
        ("refresh", "re-enumerate ports now"),
        ("in <id|index|name|->", "select input, '-' to deselect"),
        ("out <id|index|name|->", "select output, '-' to deselect"),
        ("params", "list parameters and current values"),
        ("set <group.id> <value>", "write a parameter"),
        ("get <group.id>", "show a parameter"),
        ("reset", "reset parameters to defaults (not sent)"),
        ("nrpn [on|off|toggle]", "switch parameter writes to NRPN"),
        ("cc <ch> <cc> <val>", "send a Control Change (ch 1-16)"),
        ("nrpn-send <ch> <param> <val>", "send an NRPN write"),
        ("note <ch> <note> <vel>", "send Note On (vel 0 = Note Off)"),
        ("pc <ch> <program>", "send a Program Change"),
        ("log [n]", "show the newest n log entries"),
        ("stats", "traffic statistics"),
        ("clear", "clear the log and statistics"),
        ("save [path]", "save a parameter snapshot"),
        ("load [path]", "restore a parameter snapshot"),
        ("quit", "exit"),
    ];
    println!("\n{}", "Commands:".bold());
    for (usage, description) in commands {
        println!("  {:<30} {}", usage.yellow(), description);
    }
    println!();
}

/// Read lines on a blocking thread and forward them to the event loop.
///
/// Ctrl-C / Ctrl-D end the REPL with a final `quit`.
pub fn spawn_repl() -> Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel(16);

    std::thread::Builder::new()
        .name("repl".to_string())
        .spawn(move || {
            let mut editor = match DefaultEditor::new() {
                Ok(editor) => editor,
                Err(e) => {
                    warn!("Failed to initialize line editor: {}", e);
                    let _ = tx.blocking_send("quit".to_string());
                    return;
                }
            };

            loop {
                let line = match editor.readline(PROMPT) {
                    Ok(line) => {
                        if !line.trim().is_empty() {
                            let _ = editor.add_history_entry(line.as_str());
                        }
                        line
                    }
                    Err(ReadlineError::Interrupted | ReadlineError::Eof) => "quit".to_string(),
                    Err(e) => {
                        warn!("REPL read error: {}", e);
                        "quit".to_string()
                    }
                };
                let quitting = matches!(Command::parse(&line), Ok(Some(Command::Quit)));
                if tx.blocking_send(line).is_err() || quitting {
                    break;
                }
            }
        })
        .context("Failed to spawn REPL thread")?;

    Ok(rx)
}
