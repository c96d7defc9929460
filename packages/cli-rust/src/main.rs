//! dockhost CLI entry point

use console::style;

fn main() {
    if let Err(e) = dockhost::run() {
        eprintln!("{} {e:#}", style("Error:").red().bold());
        std::process::exit(1);
    }
}
