//! SMTP delivery, grounded on `email_sender.py`'s `_send_email`: EHLO, optional STARTTLS, optional
//! AUTH, then a single multipart (text + HTML) message to every recipient.

use fleetpatch_api::error::{FleetPatchError, ReportingError, ReportError};
use lettre::message::{header::ContentType, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use log::{debug, info};

use crate::config::EmailConfig;

/// Builds and sends the given subject/text/html report to every address in `config.to_email`.
pub fn send_report(config: &EmailConfig, subject: &str, text_body: &str, html_body: &str) -> Result<(), FleetPatchError> {
    if !config.from_email.contains('@') {
        return Err(FleetPatchError::new(ReportingError::InvalidAddress {
            address: config.from_email.clone(),
        }));
    }

    debug!("Initiating SMTP connection to {}:{}", config.smtp_server, config.smtp_port);

    let mut message_builder = Message::builder()
        .from(config.from_email.parse().structured(ReportingError::InvalidAddress {
            address: config.from_email.clone(),
        })?)
        .subject(subject);

    for address in &config.to_email {
        message_builder = message_builder.to(address.parse().structured(ReportingError::InvalidAddress {
            address: address.clone(),
        })?);
    }

    let message = message_builder
        .multipart(
            MultiPart::alternative()
                .singlepart(SinglePart::builder().header(ContentType::TEXT_PLAIN).body(text_body.to_string()))
                .singlepart(SinglePart::builder().header(ContentType::TEXT_HTML).body(html_body.to_string())),
        )
        .structured(ReportingError::Render)?;

    let mut builder = if config.use_tls {
        SmtpTransport::starttls_relay(&config.smtp_server).structured(ReportingError::SmtpConnect {
            relay: config.smtp_server.clone(),
        })?
    } else {
        SmtpTransport::builder_dangerous(&config.smtp_server)
    };
    builder = builder.port(config.smtp_port);

    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        debug!("Authenticating as user: {username}");
        builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
    } else {
        debug!("No SMTP authentication credentials provided");
    }

    let transport = builder.build();
    transport.send(&message).structured(ReportingError::SmtpSend)?;

    info!("Update report sent to {}", config.to_email.join(", "));
    Ok(())
}
