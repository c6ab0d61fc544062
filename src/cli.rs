//! Argument parsing and usage text for the `observers` binary. Mirrors the
//! teacher's flat `parse_view_args`/`get_flag`/`filter_flags` style rather
//! than pulling in a clap-style derive — this binary has few enough flags
//! that hand parsing stays readable.

use crate::models::Severity;
use crate::store::ObservationFilter;

pub fn print_help() {
    println!("observers {}", env!("CARGO_PKG_VERSION"));
    println!("Hook-driven LLM observers that watch files and conversation turns for issues.\n");
    print_usage();
    print_options();
}

fn print_usage() {
    println!("USAGE:");
    println!("  observers                          Read one hook event from stdin, run due observers");
    println!("  observers run-once                 Run every enabled observer once, ignoring fingerprints");
    println!("  observers watch                     Live tail of the local observation store");
    println!("  observers list      [OPTIONS]       List stored observations");
    println!("  observers resolve   <id> [--note]   Mark an observation resolved");
    println!("  observers ack       <id>             Mark an observation acknowledged");
    println!("  observers doctor                    Check config, store, and observer definitions");
    println!("  observers init                      Scaffold ~/.observers/config.json and an example observer");
    println!("  observers help | --help | -h        Show this message");
    println!("  observers --version | -V            Show version\n");
}

fn print_options() {
    println!("LIST OPTIONS:");
    println!("  --severity <level>   Filter by severity: info | low | medium | high | critical");
    println!("  --observer <name>    Filter by observer name");
    println!("  --status <status>    Filter by status: open | acknowledged | resolved\n");
    println!("RESOLVE OPTIONS:");
    println!("  --note <text>        Resolution note to store alongside the observation\n");
    println!("ENVIRONMENT:");
    println!("  OBSERVERS_CONFIG     Path to config.json (default: ~/.observers/config.json)");
    println!("  OBSERVERS_STORE      Path to the local observation store (default: ~/.observers/observations.jsonl)");
    println!("  OBSERVERS_LLM_URL    Base URL of an HTTP completion endpoint, if set");
    println!("  NO_COLOR             Disable colored output\n");
}

pub fn get_flag(args: &[String], flag: &str) -> Option<String> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].clone())
}

pub fn parse_severity(s: &str) -> Option<Severity> {
    match s {
        "info" => Some(Severity::Info),
        "low" => Some(Severity::Low),
        "medium" => Some(Severity::Medium),
        "high" => Some(Severity::High),
        "critical" => Some(Severity::Critical),
        _ => None,
    }
}

pub fn parse_status(s: &str) -> Option<crate::models::Status> {
    use crate::models::Status;
    match s {
        "open" => Some(Status::Open),
        "acknowledged" => Some(Status::Acknowledged),
        "resolved" => Some(Status::Resolved),
        _ => None,
    }
}

pub fn parse_list_args(args: &[String]) -> anyhow::Result<ObservationFilter> {
    let mut filter = ObservationFilter::default();
    if let Some(s) = get_flag(args, "--severity") {
        filter.severity = Some(
            parse_severity(&s).ok_or_else(|| anyhow::anyhow!("unknown severity '{s}'"))?,
        );
    }
    if let Some(o) = get_flag(args, "--observer") {
        filter.observer = Some(o);
    }
    if let Some(s) = get_flag(args, "--status") {
        filter.status = Some(
            parse_status(&s).ok_or_else(|| anyhow::anyhow!("unknown status '{s}'"))?,
        );
    }
    Ok(filter)
}
