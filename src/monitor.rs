//! Terminal rendering of traffic, ports and parameters

use colored::*;

use crate::message_log::{Direction, LogEntry, TrafficStats};
use crate::midi::{format_hex, MessageKind};
use crate::params::ParameterTable;
use crate::ports::{PortInfo, PortManager};

fn direction_label(direction: Direction) -> ColoredString {
    match direction {
        Direction::In => "IN ".green(),
        Direction::Out => "OUT".red(),
        Direction::System => "SYS".yellow(),
        Direction::Error => "ERR".bright_red().bold(),
    }
}

/// One log line: `[time] DIR | hex => summary`
pub fn format_entry(entry: &LogEntry) -> String {
    let timestamp = entry.timestamp.format("%H:%M:%S%.3f").to_string();
    let direction = direction_label(entry.direction);

    if entry.raw.is_empty() {
        let summary = match entry.direction {
            Direction::Error => entry.summary.bright_red(),
            _ => entry.summary.normal(),
        };
        return format!("[{}] {} | {}", timestamp.dimmed(), direction, summary);
    }

    let hex = format_hex(&entry.raw);
    // Color code by message type
    let hex = match entry.kind {
        Some(MessageKind::NoteOn) => hex.bright_green(),
        Some(MessageKind::NoteOff) => hex.bright_red(),
        Some(MessageKind::ControlChange) => hex.bright_yellow(),
        Some(MessageKind::PitchBend) => hex.bright_cyan(),
        Some(MessageKind::SysEx) => hex.bright_magenta(),
        Some(MessageKind::Unknown) | None => hex.bright_black(),
        _ => hex.normal(),
    };

    format!(
        "[{}] {} | {:<12} => {}",
        timestamp.dimmed(),
        direction,
        hex,
        entry.summary.bright_blue()
    )
}

pub fn print_entry(entry: &LogEntry) {
    println!("{}", format_entry(entry));
}

/// Print the newest `count` entries, oldest first so the newest ends up last
pub fn print_log<'a>(entries: impl Iterator<Item = &'a LogEntry>, count: usize) {
    let mut recent: Vec<_> = entries.take(count).collect();
    if recent.is_empty() {
        println!("  {}", "Log is empty".dimmed());
        return;
    }
    recent.reverse();
    for entry in recent {
        print_entry(entry);
    }
}

fn print_port_list(title: &str, ports: &[PortInfo], selected: Option<&PortInfo>) {
    println!("\n{}", title.bold());
    if ports.is_empty() {
        println!("  {}", "No ports found".dimmed());
        return;
    }
    for (index, port) in ports.iter().enumerate() {
        let marker = if selected.map(|s| s.id == port.id).unwrap_or(false) {
            "*".bright_green().bold()
        } else {
            " ".normal()
        };
        println!(
            "  {} [{}] {} {}",
            marker,
            index,
            port.name.bright_white(),
            format!("({}, {})", port.id, port.manufacturer).dimmed()
        );
    }
}

/// List all ports in a formatted way, marking the current selection
pub fn print_ports(ports: &PortManager) {
    println!("\n{}", "=== MIDI Ports ===".bold().cyan());
    print_port_list("Input Ports:", ports.inputs(), ports.selected_input());
    print_port_list("Output Ports:", ports.outputs(), ports.selected_output());
    println!();
}

pub fn print_params(table: &ParameterTable, nrpn_mode: bool) {
    let mode = if nrpn_mode { "NRPN".bright_magenta() } else { "CC".bright_yellow() };
    println!("\n{} {}", "=== Parameters ===".bold().cyan(), format!("[{}]", mode));

    for group in table.groups() {
        println!(
            "\n{} {}",
            group.title.bold(),
            format!("({}, channel {})", group.key, group.channel() + 1).dimmed()
        );
        for param in &group.parameters {
            let cc = param
                .target
                .cc
                .map(|cc| format!("cc {:>3}", cc))
                .unwrap_or_else(|| "      ".to_string());
            let nrpn = param
                .target
                .nrpn
                .map(|n| format!("nrpn {:>5}", n))
                .unwrap_or_default();
            println!(
                "  {:<14} {:<12} {:>5}  {}",
                format!("{}.{}", group.key, param.id).yellow(),
                param.name,
                param.value().to_string().bright_green(),
                format!("[{}..={}] {} {}", param.min, param.max, cc, nrpn).dimmed()
            );
        }
    }
    println!();
}

pub fn print_stats(stats: &TrafficStats) {
    println!("\n{}", "=== Traffic ===".bold().cyan());
    println!("  Total messages: {}", stats.total_messages.to_string().green());

    if !stats.by_kind.is_empty() {
        println!("\n{}", "By type:".bold());
        for (kind, count) in &stats.by_kind {
            println!("  {:<16} {}", kind.as_str(), count);
        }
    }
    if !stats.by_channel.is_empty() {
        println!("\n{}", "By channel:".bold());
        for (channel, count) in &stats.by_channel {
            println!("  {:<16} {}", channel, count);
        }
    }
    match stats.average_gap_ms() {
        Some(gap) => println!("\n  Average gap: {:.2} ms", gap),
        None => println!("\n  Average gap: {}", "n/a".dimmed()),
    }
    if !stats.errors.is_empty() {
        println!("\n{}", "Recent errors:".bold().bright_red());
        for error in &stats.errors {
            println!("  {}", error);
        }
    }
    println!();
}
