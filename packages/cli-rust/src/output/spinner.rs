//! Per-host progress spinner
//!
//! Long driver calls (create, rm, power actions) run behind a spinner
//! labelled with the host and the driver doing the work, so a slow cloud
//! call reads as `Creating web1 (openstack)... (00:01:12)`.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner for one driver operation on one host
///
/// Becomes a no-op in quiet mode.
pub struct HostSpinner {
    bar: Option<ProgressBar>,
    label: String,
}

/// `web1 (vsphere)`, or just `web1` when the driver is unknown
fn host_label(host: &str, driver: &str) -> String {
    if driver.is_empty() {
        host.to_string()
    } else {
        format!("{host} ({driver})")
    }
}

impl HostSpinner {
    /// Start spinning with `{action} {host} ({driver})...`
    pub fn start(action: &str, host: &str, driver: &str, quiet: bool) -> Self {
        let label = host_label(host, driver);
        if quiet {
            return Self { bar: None, label };
        }

        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} {msg} ({elapsed_precise:.dim})")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("\u{28CB}\u{2819}\u{2839}\u{2838}\u{283C}\u{2834}\u{2826}\u{2827}\u{2807}\u{280F}"),
        );
        bar.set_message(format!("{action} {label}..."));
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar: Some(bar), label }
    }

    /// Finish with a green check: `✓ web1 (vsphere) {outcome}`
    pub fn success(self, outcome: &str) {
        if let Some(bar) = self.bar {
            bar.finish_with_message(format!(
                "{} {} {outcome}",
                console::style("\u{2713}").green(),
                self.label
            ));
        }
    }

    /// Finish with a red cross: `✗ web1 (vsphere) {outcome}`
    pub fn fail(self, outcome: &str) {
        if let Some(bar) = self.bar {
            bar.finish_with_message(format!(
                "{} {} {outcome}",
                console::style("\u{2717}").red(),
                self.label
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_names_host_and_driver() {
        assert_eq!(host_label("web1", "vsphere"), "web1 (vsphere)");
        assert_eq!(host_label("web1", ""), "web1");
    }

    #[test]
    fn quiet_spinner_has_no_bar() {
        let spinner = HostSpinner::start("Creating", "web1", "fusion", true);
        assert!(spinner.bar.is_none());
        assert_eq!(spinner.label, "web1 (fusion)");
        spinner.fail("failed");
    }

    #[test]
    fn spinner_finishes_with_outcome() {
        let spinner = HostSpinner::start("Stopping", "web1", "azure", false);
        let bar = spinner.bar.clone().unwrap();
        spinner.success("stopped");
        assert!(bar.is_finished());
        assert!(bar.message().ends_with("web1 (azure) stopped"));
    }
}
