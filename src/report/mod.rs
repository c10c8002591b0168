//! Fleet-report rendering and delivery, grounded on `email_sender.py` and `main.py`'s `check`
//! command: render subject/text/HTML, then either email it or print it for a dry run.

mod mailer;
mod render;

use fleetpatch_api::error::FleetPatchError;
use fleetpatch_api::model::FleetReport;
use log::info;

use crate::config::EmailConfig;

/// Renders `report` and either sends it via SMTP or prints it to stdout when `dry_run` is set,
/// matching `main.py check --dry-run`.
pub fn deliver(config: &EmailConfig, report: &FleetReport, dry_run: bool) -> Result<(), FleetPatchError> {
    let subject = render::subject(report);
    let text_body = render::text_body(report);

    if dry_run {
        println!("Subject: {subject}\n\n{text_body}");
        return Ok(());
    }

    let html_body = render::html_body(report);
    info!("Sending email report...");
    mailer::send_report(config, &subject, &text_body, &html_body)?;
    info!("Email report sent successfully");
    Ok(())
}
