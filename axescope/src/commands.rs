use crate::CLAP_STYLING;
use clap::{Arg, ArgAction, arg, command};
use std::path::PathBuf;

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("axescope")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("axescope")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and progress output").required(false))
        .arg(
            arg!(-v --"verbose" "Enable debug logging (RUST_LOG takes precedence)")
                .required(false)
                .global(true),
        )
        .arg(
            arg!(-c --"config" <PATH>)
                .required(false)
                .global(true)
                .help("Path to a JSON run configuration"),
        )
        .subcommand_required(false)
        .subcommand(
            run_args(command!("crawl"))
                .about(
                    "Crawl the configured domains, sampling one page per URL template. \
                Writes crawl_state.json to the output directory.",
                )
                .args(crawl_args()),
        )
        .subcommand(
            run_args(command!("scan"))
                .about(
                    "Scan the representative page of every sampled template for \
                accessibility violations. Appends to findings.jsonl.",
                )
                .args(scan_args()),
        )
        .subcommand(
            run_args(command!("run"))
                .about("Crawl, then scan the sampled templates")
                .args(crawl_args())
                .args(scan_args()),
        )
        .subcommand(
            command!("status")
                .about("Summarize the persisted crawl state, resume record and findings")
                .arg(output_arg())
                .arg(run_id_arg()),
        )
}

fn output_arg() -> Arg {
    arg!(-o --"output" <DIR>)
        .required(false)
        .help("Directory for crawl state, resume records and findings")
        .value_parser(clap::value_parser!(PathBuf))
}

fn run_id_arg() -> Arg {
    arg!(--"run-id" <ID>)
        .required(false)
        .help("Name of the scan run; keys the resume record")
}

/// Arguments shared by every subcommand that crawls or scans.
fn run_args(cmd: clap::Command) -> clap::Command {
    cmd.arg(
        arg!(-d --"domain" <DOMAIN>)
            .required(false)
            .help("Domain to crawl; repeat for several. Replaces the configured list")
            .action(ArgAction::Append),
    )
    .arg(output_arg())
    .arg(run_id_arg())
    .arg(
        arg!(--"fresh")
            .required(false)
            .help("Ignore saved crawl state and resume records")
            .action(ArgAction::SetTrue),
    )
    .arg(
        arg!(--"discard-corrupt")
            .required(false)
            .help("Start over instead of failing when saved state is corrupt")
            .action(ArgAction::SetTrue),
    )
}

fn crawl_args() -> Vec<Arg> {
    vec![
        arg!(-t --"threads" <NUM_WORKERS>)
            .required(false)
            .help("Number of concurrent crawl workers")
            .value_parser(clap::value_parser!(usize)),
        arg!(--"max-urls" <NUM>)
            .required(false)
            .help("Unique pages to accept per domain")
            .value_parser(clap::value_parser!(usize)),
        arg!(--"depth" <NUM>)
            .required(false)
            .help("Link depth below each domain root")
            .value_parser(clap::value_parser!(usize)),
        arg!(--"no-hybrid")
            .required(false)
            .help("Never render pages in a browser while crawling")
            .action(ArgAction::SetTrue),
    ]
}

fn scan_args() -> Vec<Arg> {
    vec![
        arg!(-p --"pool-size" <NUM>)
            .required(false)
            .help("Number of browser sessions scanning in parallel")
            .value_parser(clap::value_parser!(usize)),
        arg!(--"max-templates" <NUM>)
            .required(false)
            .help("Scan only the N most common templates per domain")
            .value_parser(clap::value_parser!(usize)),
        arg!(--"headed")
            .required(false)
            .help("Show the browser windows")
            .action(ArgAction::SetTrue),
        arg!(--"no-monitor")
            .required(false)
            .help("Do not pause scanning when CPU or memory runs high")
            .action(ArgAction::SetTrue),
    ]
}
