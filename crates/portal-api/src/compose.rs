//! Compose template rendering
//!
//! Fills the `{{TOKEN}}` placeholders of a service template with booking
//! values and rejects any manifest that still carries an unresolved token.

use beyondfire_common::{Booking, Error, Result, ServiceDefinition};

/// Render the compose manifest for a booking
pub fn render_compose(service: &ServiceDefinition, booking: &Booking) -> Result<String> {
    render(&service.compose_template, booking)
}

/// Render the reverse-proxy config for a booking, when the service has one
pub fn render_proxy_conf(
    service: &ServiceDefinition,
    booking: &Booking,
) -> Result<Option<String>> {
    match &service.proxy_conf_template {
        Some(template) => Ok(Some(render(template, booking)?)),
        None => Ok(None),
    }
}

fn render(template: &str, booking: &Booking) -> Result<String> {
    let mut rendered = template
        .replace("{{PORT}}", &booking.port.to_string())
        .replace("{{DOMAIN}}", &booking.domain)
        .replace("{{UNIQUE_ID}}", booking.short_id());

    if let Some(license) = &booking.license_info {
        rendered = rendered
            .replace("{{FE2_EMAIL}}", &license.email)
            .replace("{{FE2_PASSWORD}}", &license.password);
    }

    ensure_fully_rendered(&rendered)?;
    Ok(rendered)
}

/// Reject templates that still carry a `{{...}}` token after substitution
fn ensure_fully_rendered(rendered: &str) -> Result<()> {
    if let Some(start) = rendered.find("{{") {
        let rest = &rendered[start..];
        let token = match rest.find("}}") {
            Some(end) => &rest[..end + 2],
            None => rest,
        };
        return Err(Error::Template(format!(
            "Unresolved placeholder {} in rendered template",
            token
        )));
    }
    Ok(())
}
