use axescope::command_argument_builder;
use axescope::handlers::{
    handle_crawl, handle_run, handle_scan, handle_status, init_tracing, print_banner,
};

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");

    // Show banner unless --quiet flag is set
    if !quiet {
        print_banner();
    }

    let Some((name, sub_matches)) = chosen_command.subcommand() else {
        // No subcommand provided, just show the banner
        return;
    };
    init_tracing(sub_matches.get_flag("verbose"), quiet);

    let status = match name {
        "crawl" => handle_crawl(sub_matches, quiet).await,
        "scan" => handle_scan(sub_matches, quiet).await,
        "run" => handle_run(sub_matches, quiet).await,
        "status" => handle_status(sub_matches).await,
        _ => unreachable!("clap should ensure we don't get here"),
    };
    std::process::exit(status.exit_code());
}
