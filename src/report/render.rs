//! Text and HTML rendering for a [`FleetReport`], grounded on `email_sender.py`'s
//! `_generate_automated_subject`/`_generate_automated_html_body`/`_generate_automated_text_body`.

use chrono::Utc;
use fleetpatch_api::model::{FleetReport, Outcome, UpdateResult};

/// Generates the email subject line the way `_generate_automated_subject` prioritizes critical
/// failures, then other failures/reverts, then successes, then opt-outs.
pub fn subject(report: &FleetReport) -> String {
    let total = report.results.len();
    let count = |o: Outcome| report.results.iter().filter(|r| r.outcome == o).count();

    let successful = count(Outcome::Success);
    let no_updates = count(Outcome::NoUpdates);
    let opt_out = count(Outcome::OptOut);
    let critical = count(Outcome::RevertFailed);
    let reverted = count(Outcome::Reverted);
    let failed = total - successful - no_updates - opt_out - critical - reverted;

    if critical > 0 {
        format!("URGENT: {critical} host(s) failed update+revert, {failed} other failures - fleetpatch")
    } else if failed > 0 || reverted > 0 {
        format!("Update Issues: {failed} failed, {reverted} reverted, {successful} success - fleetpatch")
    } else if successful > 0 {
        if opt_out > 0 {
            format!("Updates Applied: {successful} updated, {opt_out} opt-out, {no_updates} up-to-date - fleetpatch")
        } else {
            format!("Updates Applied: {successful} updated, {no_updates} up-to-date - fleetpatch")
        }
    } else if opt_out > 0 {
        format!("Check Complete: {opt_out} opt-out (manual updates needed), {no_updates} up-to-date - fleetpatch")
    } else {
        format!("No Updates Needed: {no_updates} hosts checked - fleetpatch")
    }
}

pub fn text_body(report: &FleetReport) -> String {
    let mut text = String::new();
    text.push_str("AUTOMATED SYSTEM UPDATES REPORT\n");
    text.push_str(&"=".repeat(50));
    text.push('\n');
    text.push_str(&format!("Generated on {}\n\n", Utc::now().format("%Y-%m-%d %H:%M:%S")));

    text.push_str(&summary_text(report));
    text.push('\n');

    for (outcome, results) in report.grouped() {
        text.push_str(&format!("{}\n", group_heading(outcome)));
        text.push_str(&"-".repeat(30));
        text.push('\n');
        for result in results {
            text.push_str(&host_text(result));
            text.push('\n');
        }
    }

    text
}

fn summary_text(report: &FleetReport) -> String {
    let total = report.results.len();
    let count = |o: Outcome| report.results.iter().filter(|r| r.outcome == o).count();

    let mut out = String::new();
    out.push_str("SUMMARY\n");
    out.push_str(&"-".repeat(20));
    out.push('\n');
    out.push_str(&format!("Total hosts processed: {total}\n"));
    out.push_str(&format!("Successfully updated: {}\n", count(Outcome::Success)));
    out.push_str(&format!("No updates needed: {}\n", count(Outcome::NoUpdates)));
    out.push_str(&format!("Opt-out hosts (check-only): {}\n", count(Outcome::OptOut)));
    out.push_str(&format!("Reverted to snapshot: {}\n", count(Outcome::Reverted)));

    let critical = count(Outcome::RevertFailed);
    if critical > 0 {
        out.push_str(&format!("CRITICAL: Revert failures: {critical}\n"));
    }
    out
}

fn host_text(result: &UpdateResult) -> String {
    let mut text = format!("{}\n", result.host);
    text.push_str(&format!("  Status: {}\n", status_label(result.outcome)));

    let duration = (result.end_time - result.start_time).num_seconds();
    text.push_str(&format!("  Duration: {duration}s\n"));

    if let Some(os_info) = &result.os_info {
        text.push_str(&format!(
            "  OS: {} {} ({})\n",
            os_info.distribution, os_info.version, os_info.architecture
        ));
    }

    if let Some(node) = &result.vm_node {
        if let Some(vmid) = result.vm_id {
            text.push_str(&format!("  VM: {vmid} on {node}\n"));
        }
    }
    if let Some(snapshot) = &result.snapshot_name {
        text.push_str(&format!("  Snapshot: {snapshot}\n"));
    }

    if matches!(result.outcome, Outcome::Success | Outcome::OptOut) && !result.updates.is_empty() {
        let prefix = if result.outcome == Outcome::OptOut { "Available " } else { "" };
        let security: Vec<_> = result.security_updates().collect();
        let regular: Vec<_> = result.regular_updates().collect();

        if !security.is_empty() {
            text.push_str(&format!("  {prefix}Security Updates ({}):\n", security.len()));
            for update in security {
                text.push_str(&format!("    - {} {} -> {}\n", update.name, update.current_version.as_deref().unwrap_or("?"), update.new_version));
            }
        }
        if !regular.is_empty() {
            text.push_str(&format!("  {prefix}Regular Updates ({}):\n", regular.len()));
            for update in regular {
                text.push_str(&format!("    - {} {} -> {}\n", update.name, update.current_version.as_deref().unwrap_or("?"), update.new_version));
            }
        }
    }

    if let Some(detail) = &result.detail {
        text.push_str(&format!("  Detail: {detail}\n"));
    }

    text
}

pub fn html_body(report: &FleetReport) -> String {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html><html><head><meta charset=\"UTF-8\"><style>");
    html.push_str(
        "body{font-family:Arial,sans-serif;margin:20px;background-color:#f5f5f5}\
         .container{max-width:800px;margin:0 auto;background-color:white;padding:20px;border-radius:8px}\
         .header{background:#667eea;color:white;padding:20px;margin:-20px -20px 20px -20px;border-radius:8px 8px 0 0}\
         .summary{background-color:#f8f9fa;padding:15px;border-radius:5px;margin-bottom:20px;border-left:4px solid #007bff}\
         .host{margin:15px 0;padding:15px;border-radius:5px;border-left:4px solid #28a745}\
         .host.critical{border-left-color:#dc3545;background-color:#fff5f5}\
         .host.reverted{border-left-color:#ffc107;background-color:#fffbf0}\
         .host.failed{border-left-color:#fd7e14;background-color:#fff8f0}\
         .host.no-updates{border-left-color:#6c757d;background-color:#f8f9fa}\
         .host-name{font-weight:bold;font-size:16px}\
         .security-update{background-color:#f8d7da;color:#721c24;font-weight:bold}\
         .update-item{background-color:#e9ecef;padding:5px 8px;margin:2px 0;border-radius:3px}",
    );
    html.push_str("</style></head><body><div class=\"container\">");
    html.push_str(&format!(
        "<div class=\"header\"><h1>Automated System Updates Report</h1><p>Generated on {}</p></div>",
        Utc::now().format("%Y-%m-%d %H:%M:%S")
    ));
    html.push_str(&summary_html(report));

    for (outcome, results) in report.grouped() {
        html.push_str(&format!("<h2>{}</h2>", group_heading(outcome)));
        for result in results {
            html.push_str(&host_html(result, outcome));
        }
    }

    html.push_str("</div></body></html>");
    html
}

fn summary_html(report: &FleetReport) -> String {
    let total = report.results.len();
    let count = |o: Outcome| report.results.iter().filter(|r| r.outcome == o).count();
    let critical = count(Outcome::RevertFailed);

    let mut html = format!(
        "<div class=\"summary\"><h2>Summary</h2><ul>\
         <li>Total hosts processed: {total}</li>\
         <li>Successfully updated: {}</li>\
         <li>No updates needed: {}</li>\
         <li>Opt-out hosts (check-only): {}</li>\
         <li>Reverted to snapshot: {}</li>",
        count(Outcome::Success),
        count(Outcome::NoUpdates),
        count(Outcome::OptOut),
        count(Outcome::Reverted),
    );
    if critical > 0 {
        html.push_str(&format!("<li style=\"color:#dc3545\">CRITICAL: Revert failures: {critical}</li>"));
    }
    html.push_str("</ul></div>");
    html
}

fn host_html(result: &UpdateResult, outcome: Outcome) -> String {
    let css_class = match outcome {
        Outcome::RevertFailed => "host critical",
        Outcome::Reverted => "host reverted",
        Outcome::FailedSnapshot | Outcome::FailedUpdates | Outcome::FailedReboot | Outcome::FailedAvailability => "host failed",
        Outcome::NoUpdates => "host no-updates",
        Outcome::OptOut | Outcome::Success => "host",
    };

    let mut html = format!("<div class=\"{css_class}\"><div class=\"host-name\">{}</div>", html_escape(&result.host));
    html.push_str(&format!("<div>{}</div>", status_label(outcome)));

    let duration = (result.end_time - result.start_time).num_seconds();
    html.push_str(&format!("<div class=\"timing\">Duration: {duration}s</div>"));

    if let Some(os_info) = &result.os_info {
        html.push_str(&format!(
            "<div class=\"os-info\">{} {} ({})</div>",
            html_escape(&os_info.distribution),
            html_escape(&os_info.version),
            html_escape(&os_info.architecture)
        ));
    }

    if let (Some(node), Some(vmid)) = (&result.vm_node, result.vm_id) {
        html.push_str(&format!("<div class=\"host-details\">VM: {vmid} on {}", html_escape(node)));
        if let Some(snapshot) = &result.snapshot_name {
            html.push_str(&format!(" (Snapshot: {})", html_escape(snapshot)));
        }
        html.push_str("</div>");
    }

    if matches!(outcome, Outcome::Success | Outcome::OptOut) && !result.updates.is_empty() {
        let prefix = if outcome == Outcome::OptOut { "Available " } else { "" };
        let security: Vec<_> = result.security_updates().collect();
        let regular: Vec<_> = result.regular_updates().collect();

        if !security.is_empty() {
            html.push_str(&format!("<div><strong>{prefix}Security Updates ({}):</strong></div><div class=\"updates-list\">", security.len()));
            for update in security {
                html.push_str(&format!(
                    "<div class=\"update-item security-update\">{} {} -&gt; {}</div>",
                    html_escape(&update.name),
                    html_escape(update.current_version.as_deref().unwrap_or("?")),
                    html_escape(&update.new_version)
                ));
            }
            html.push_str("</div>");
        }
        if !regular.is_empty() {
            html.push_str(&format!("<div><strong>{prefix}Regular Updates ({}):</strong></div><div class=\"updates-list\">", regular.len()));
            for update in regular {
                html.push_str(&format!(
                    "<div class=\"update-item\">{} {} -&gt; {}</div>",
                    html_escape(&update.name),
                    html_escape(update.current_version.as_deref().unwrap_or("?")),
                    html_escape(&update.new_version)
                ));
            }
            html.push_str("</div>");
        }
    }

    if let Some(detail) = &result.detail {
        html.push_str(&format!("<div class=\"error-details\">{}</div>", html_escape(detail)));
    }

    html.push_str("</div>");
    html
}

fn group_heading(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::RevertFailed => "CRITICAL FAILURES (Revert Failed)",
        Outcome::Reverted => "Reverted Hosts",
        Outcome::FailedSnapshot | Outcome::FailedUpdates | Outcome::FailedReboot | Outcome::FailedAvailability => "Failed Updates",
        Outcome::OptOut => "Opt-out Hosts (Check Only)",
        Outcome::Success => "Successfully Updated",
        Outcome::NoUpdates => "No Updates Needed",
    }
}

fn status_label(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::RevertFailed => "CRITICAL - Revert Failed",
        Outcome::Reverted => "Reverted to Snapshot",
        Outcome::FailedSnapshot => "Failed - Snapshot",
        Outcome::FailedUpdates => "Failed - Updates",
        Outcome::FailedReboot => "Failed - Reboot",
        Outcome::FailedAvailability => "Failed - Availability",
        Outcome::OptOut => "Opt-out (Check Only)",
        Outcome::Success => "Successfully Updated",
        Outcome::NoUpdates => "No Updates Needed",
    }
}

fn html_escape(raw: &str) -> String {
    raw.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fleetpatch_api::model::PackageUpdate;

    fn result(host: &str, outcome: Outcome, updates: Vec<PackageUpdate>) -> UpdateResult {
        let now = Utc::now();
        UpdateResult {
            host: host.to_string(),
            outcome,
            os_info: None,
            updates,
            detail: None,
            vm_node: None,
            vm_id: None,
            snapshot_name: None,
            start_time: now,
            end_time: now,
        }
    }

    #[test]
    fn subject_prioritizes_critical_failures() {
        let report = FleetReport {
            results: vec![
                result("a", Outcome::RevertFailed, vec![]),
                result("b", Outcome::Success, vec![]),
            ],
        };
        assert!(subject(&report).starts_with("URGENT"));
    }

    #[test]
    fn subject_reports_all_up_to_date() {
        let report = FleetReport {
            results: vec![result("a", Outcome::NoUpdates, vec![])],
        };
        assert!(subject(&report).contains("No Updates Needed"));
    }

    #[test]
    fn text_body_lists_security_updates() {
        let update = PackageUpdate {
            name: "openssl".to_string(),
            current_version: Some("1.0".to_string()),
            new_version: "1.1".to_string(),
            repository: "jammy-security".to_string(),
            description: None,
            is_security: true,
        };
        let report = FleetReport {
            results: vec![result("a", Outcome::Success, vec![update])],
        };
        let body = text_body(&report);
        assert!(body.contains("openssl"));
        assert!(body.contains("Security Updates"));
    }
}
